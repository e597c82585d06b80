//! Inbound notification pipeline
//!
//! Verify, reconcile, append to the notification log, raise alerts, and
//! decide what the gateway gets told. Redirect callbacks and webhooks share
//! this path.

use crate::config::{Config, Secret};
use crate::database::repository::PaymentStore;
use crate::payments::alerts::{AlertKind, SecurityAlert};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::reconciler::{ReconcileOutcome, Reconciler, RetryPolicy};
use crate::payments::traits::{AlertSink, EntitlementService};
use crate::payments::types::{
    GatewayResponse, NotificationRecord, NotificationSource, NotificationVerdict, TransactionState,
};
use crate::payments::verifier::Verifier;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub merchant_key: String,
    pub merchant_salt: Secret,
    pub retry: RetryPolicy,
    pub manual_reconciliation_window: Duration,
    pub unknown_status_alert_threshold: i64,
}

impl ProcessorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            merchant_key: config.gateway.merchant_key.clone(),
            merchant_salt: config.gateway.merchant_salt.clone(),
            retry: RetryPolicy::from_config(&config.reconciliation, &config.entitlements),
            manual_reconciliation_window: Duration::from_secs(
                config
                    .reconciliation
                    .manual_reconciliation_window_hours
                    .saturating_mul(3600),
            ),
            unknown_status_alert_threshold: config.reconciliation.unknown_status_alert_threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Applied {
        from: TransactionState,
        to: TransactionState,
    },
    Duplicate,
    /// Authentic message with a status outside the table; nothing changed
    UnknownStatus,
}

/// What the gateway is told. Never carries rejection detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    Accepted,
    Rejected,
    /// Transient failure on our side; the gateway should redeliver
    RetryLater,
}

impl Acknowledgement {
    pub fn for_result(result: &PaymentResult<ProcessOutcome>) -> Self {
        match result {
            Ok(_) => Acknowledgement::Accepted,
            Err(e) if e.is_retryable() => Acknowledgement::RetryLater,
            Err(_) => Acknowledgement::Rejected,
        }
    }
}

fn verdict_for(result: &PaymentResult<ProcessOutcome>) -> NotificationVerdict {
    match result {
        Ok(ProcessOutcome::Applied { .. }) => NotificationVerdict::Applied,
        Ok(ProcessOutcome::Duplicate) => NotificationVerdict::Duplicate,
        Ok(ProcessOutcome::UnknownStatus) => NotificationVerdict::UnknownStatus,
        Err(PaymentError::MalformedMessage { .. }) => NotificationVerdict::Malformed,
        Err(PaymentError::UnknownOrClosedTransaction { .. }) => NotificationVerdict::UnknownOrClosed,
        Err(PaymentError::SignatureMismatch { .. }) => NotificationVerdict::SignatureMismatch,
        Err(PaymentError::AmountMismatch { .. }) => NotificationVerdict::AmountMismatch,
        Err(PaymentError::UnknownStatus { .. }) => NotificationVerdict::UnknownStatus,
        Err(PaymentError::DuplicateNotification { .. }) => NotificationVerdict::Duplicate,
        Err(PaymentError::SideEffectFailure { .. }) => NotificationVerdict::SideEffectFailed,
        Err(_) => NotificationVerdict::Error,
    }
}

pub struct NotificationProcessor {
    verifier: Verifier,
    reconciler: Reconciler,
    store: Arc<dyn PaymentStore>,
    alerts: Arc<dyn AlertSink>,
    unknown_status_alert_threshold: i64,
}

impl NotificationProcessor {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        entitlements: Arc<dyn EntitlementService>,
        alerts: Arc<dyn AlertSink>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            verifier: Verifier::new(config.merchant_key, config.merchant_salt, store.clone()),
            reconciler: Reconciler::new(
                store.clone(),
                entitlements,
                alerts.clone(),
                config.retry,
                config.manual_reconciliation_window,
            ),
            store,
            alerts,
            unknown_status_alert_threshold: config.unknown_status_alert_threshold,
        }
    }

    pub async fn process(
        &self,
        message: &GatewayResponse,
        source: NotificationSource,
    ) -> PaymentResult<ProcessOutcome> {
        let result = self.verify_and_reconcile(message).await;
        let txn_id = GatewayResponse::present(&message.txnid);

        match &result {
            Ok(outcome) => info!(txn_id = ?txn_id, source = source.as_str(), ?outcome, "Notification processed"),
            Err(e) if e.is_security_relevant() => {
                error!(txn_id = ?txn_id, source = source.as_str(), error = %e, "Notification rejected");
                let kind = match e {
                    PaymentError::AmountMismatch { .. } => AlertKind::AmountMismatch,
                    _ => AlertKind::SignatureMismatch,
                };
                self.alerts
                    .raise(SecurityAlert::new(kind, txn_id, e.to_string()));
            }
            Err(e) => warn!(txn_id = ?txn_id, source = source.as_str(), error = %e, "Notification rejected"),
        }

        let verdict = verdict_for(&result);
        self.log_notification(message, source, verdict, &result).await;

        if verdict == NotificationVerdict::UnknownStatus {
            if let Some(txn_id) = txn_id {
                self.escalate_unknown_status(txn_id, message).await;
            }
        }

        result
    }

    async fn verify_and_reconcile(&self, message: &GatewayResponse) -> PaymentResult<ProcessOutcome> {
        let verified = match self.verifier.verify(message).await {
            Ok(verified) => verified,
            Err(PaymentError::DuplicateNotification { txn_id, status }) => {
                info!(txn_id = %txn_id, status = %status, "DuplicateNotification for closed transaction");
                return Ok(ProcessOutcome::Duplicate);
            }
            Err(PaymentError::UnknownStatus { .. }) => return Ok(ProcessOutcome::UnknownStatus),
            Err(e) => return Err(e),
        };

        Ok(match self.reconciler.reconcile(&verified).await? {
            ReconcileOutcome::Applied { from, to } => ProcessOutcome::Applied { from, to },
            ReconcileOutcome::Duplicate => ProcessOutcome::Duplicate,
        })
    }

    async fn log_notification(
        &self,
        message: &GatewayResponse,
        source: NotificationSource,
        verdict: NotificationVerdict,
        result: &PaymentResult<ProcessOutcome>,
    ) {
        let record = NotificationRecord {
            id: Uuid::new_v4().to_string(),
            txn_id: GatewayResponse::present(&message.txnid).map(str::to_string),
            source,
            status: GatewayResponse::present(&message.status).map(str::to_string),
            verdict,
            detail: result.as_ref().err().map(|e| e.to_string()),
            payload: serde_json::to_value(message).unwrap_or(serde_json::Value::Null),
            received_at: Utc::now(),
        };

        if let Err(e) = self.store.record_notification(&record).await {
            warn!(txn_id = ?record.txn_id, error = %e, "Failed to record notification");
        }
    }

    async fn escalate_unknown_status(&self, txn_id: &str, message: &GatewayResponse) {
        let count = match self
            .store
            .count_notifications(txn_id, NotificationVerdict::UnknownStatus)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                warn!(txn_id = %txn_id, error = %e, "Failed to count unknown statuses");
                return;
            }
        };

        if count == self.unknown_status_alert_threshold {
            self.alerts.raise(SecurityAlert::new(
                AlertKind::RepeatedUnknownStatus,
                Some(txn_id),
                format!(
                    "{} notifications with unmapped status, latest '{}'",
                    count,
                    message.status.as_deref().unwrap_or("")
                ),
            ));
        }
    }
}
