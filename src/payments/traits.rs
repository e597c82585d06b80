//! Collaborator seams of the reconciler
//!
//! The reconciler only knows these traits; the HTTP entitlement client and
//! the tracing alert sink are wired in by the binary, tests plug in
//! recording doubles.

use crate::payments::alerts::SecurityAlert;
use crate::payments::types::PaymentOutcome;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SideEffectError {
    /// Worth retrying: timeouts, 5xx, rate limiting, connection failures
    #[error("transient side-effect failure: {0}")]
    Transient(String),

    /// Retrying cannot help: the collaborator rejected the request
    #[error("permanent side-effect failure: {0}")]
    Permanent(String),
}

impl SideEffectError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SideEffectError::Transient(_))
    }
}

/// Downstream business effect of a terminal outcome (grant or revoke access)
///
/// Implementations must tolerate repeated calls for the same payment record:
/// the reconciler applies at most once under normal operation, but a worker
/// crash between the effect and the commit leads to a second call after the
/// claim lease expires.
#[async_trait]
pub trait EntitlementService: Send + Sync {
    async fn apply_side_effect(
        &self,
        payment_record_id: &str,
        outcome: PaymentOutcome,
    ) -> Result<(), SideEffectError>;
}

/// Destination for events an operator must see
pub trait AlertSink: Send + Sync {
    fn raise(&self, alert: SecurityAlert);
}
