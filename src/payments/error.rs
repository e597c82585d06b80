use crate::database::error::DatabaseError;
use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Error)]
pub enum PaymentError {
    /// Bad input to the request builder; rejected before anything is sent
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Malformed message: missing {}", .missing.join(", "))]
    MalformedMessage { missing: Vec<&'static str> },

    #[error("Unknown or closed transaction: {txn_id}")]
    UnknownOrClosedTransaction { txn_id: String },

    #[error("Signature mismatch for transaction {txn_id}")]
    SignatureMismatch { txn_id: String },

    #[error("Amount mismatch for transaction {txn_id}: expected {expected}, received {received}")]
    AmountMismatch {
        txn_id: String,
        expected: String,
        received: String,
    },

    #[error("Unknown gateway status '{status}' for transaction {txn_id}")]
    UnknownStatus { txn_id: String, status: String },

    #[error("Duplicate notification for transaction {txn_id} (status {status})")]
    DuplicateNotification { txn_id: String, status: String },

    #[error("Side effect failed for transaction {txn_id} after {attempts} attempt(s): {message}")]
    SideEffectFailure {
        txn_id: String,
        attempts: u32,
        message: String,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl PaymentError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    pub fn unknown_or_closed(txn_id: impl Into<String>) -> Self {
        Self::UnknownOrClosedTransaction {
            txn_id: txn_id.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Tampering indicators that must reach an operator, not just a log file
    pub fn is_security_relevant(&self) -> bool {
        matches!(
            self,
            PaymentError::SignatureMismatch { .. } | PaymentError::AmountMismatch { .. }
        )
    }

    /// Outcomes that are reported but never treated as failures
    pub fn is_informational(&self) -> bool {
        matches!(
            self,
            PaymentError::DuplicateNotification { .. } | PaymentError::UnknownStatus { .. }
        )
    }

    /// Whether redelivering the same notification later could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::SideEffectFailure { .. } => true,
            PaymentError::Database(e) => e.is_retryable() || !e.is_constraint_violation(),
            _ => false,
        }
    }
}
