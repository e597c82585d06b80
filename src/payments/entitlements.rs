//! HTTP client for the subscription/token service
//!
//! `POST {base_url}/entitlements/apply` with the payment record id and the
//! final outcome. Response classes decide whether the reconciler retries.

use crate::config::EntitlementConfig;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::traits::{EntitlementService, SideEffectError};
use crate::payments::types::PaymentOutcome;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

const APPLY_PATH: &str = "/entitlements/apply";

#[derive(Debug, Serialize)]
struct ApplyRequest<'a> {
    payment_record_id: &'a str,
    outcome: PaymentOutcome,
}

/// Map a collaborator response status to a side-effect result
///
/// `409 Conflict` means the effect is already in place.
pub fn classify_status(status: StatusCode) -> Result<(), SideEffectError> {
    if status.is_success() || status == StatusCode::CONFLICT {
        Ok(())
    } else if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        Err(SideEffectError::Transient(format!("HTTP {}", status)))
    } else {
        Err(SideEffectError::Permanent(format!("HTTP {}", status)))
    }
}

pub struct HttpEntitlementClient {
    base_url: String,
    client: Client,
}

impl HttpEntitlementClient {
    pub fn new(config: &EntitlementConfig) -> PaymentResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PaymentError::configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn apply_url(&self) -> String {
        format!("{}{}", self.base_url, APPLY_PATH)
    }
}

#[async_trait]
impl EntitlementService for HttpEntitlementClient {
    async fn apply_side_effect(
        &self,
        payment_record_id: &str,
        outcome: PaymentOutcome,
    ) -> Result<(), SideEffectError> {
        let body = ApplyRequest {
            payment_record_id,
            outcome,
        };
        let idempotency_key = format!("{}:{:?}", payment_record_id, outcome).to_lowercase();

        let response = self
            .client
            .post(self.apply_url())
            .header("Idempotency-Key", idempotency_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(payment_record_id, error = %e, "Entitlement request failed");
                SideEffectError::Transient(e.to_string())
            })?;

        let status = response.status();
        debug!(payment_record_id, %status, "Entitlement service responded");
        classify_status(status)
    }
}
