//! Payment domain types and data structures
//!
//! Shared by the signature engine, the request builder, the verifier and the
//! reconciler. Amounts are always carried as [`Amount`] so every call site
//! renders them through the same canonicalizer.

use crate::payments::error::{PaymentError, PaymentResult};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of decimal places every amount is rendered with.
pub const AMOUNT_SCALE: u32 = 2;

/// Largest amount the ledger column (`NUMERIC(14, 2)`) can hold.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(276_447_231, 23_283, 0, false, 2);

/// Currency-scaled decimal amount with a single canonical text form.
///
/// Parsing rejects anything that is not a plain decimal number (no `NaN`,
/// no infinities, no exponents) and anything with more precision than
/// [`AMOUNT_SCALE`]. Sign is preserved so callers can reject negatives with a
/// meaningful error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(Decimal);

impl Amount {
    pub fn parse(raw: &str) -> PaymentResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PaymentError::invalid_field("amount", "must not be empty"));
        }

        let value = Decimal::from_str(trimmed).map_err(|_| {
            PaymentError::invalid_field("amount", format!("'{}' is not a decimal number", trimmed))
        })?;

        Self::from_decimal(value)
    }

    pub fn from_decimal(value: Decimal) -> PaymentResult<Self> {
        if value.normalize().scale() > AMOUNT_SCALE {
            return Err(PaymentError::invalid_field(
                "amount",
                format!("'{}' has more than {} decimal places", value, AMOUNT_SCALE),
            ));
        }
        if value.abs() > MAX_AMOUNT {
            return Err(PaymentError::invalid_field(
                "amount",
                format!("'{}' exceeds maximum {}", value, MAX_AMOUNT),
            ));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// The one textual form used in signatures, wire fields and storage.
    pub fn canonical(&self) -> String {
        let mut value = if self.0.is_zero() { Decimal::ZERO } else { self.0 };
        value.rescale(AMOUNT_SCALE);
        value.to_string()
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl TryFrom<String> for Amount {
    type Error = PaymentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Amount> for String {
    fn from(amount: Amount) -> Self {
        amount.canonical()
    }
}

/// Internal transaction state machine
///
/// `Initiated -> Pending -> {Success, Failure, Cancelled}`; `Initiated` may
/// also jump straight to a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Initiated,
    Pending,
    Success,
    Failure,
    Cancelled,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Success | TransactionState::Failure | TransactionState::Cancelled
        )
    }

    /// States from which `self` can be entered.
    pub fn predecessors(&self) -> &'static [TransactionState] {
        match self {
            TransactionState::Initiated => &[],
            TransactionState::Pending => &[TransactionState::Initiated],
            TransactionState::Success | TransactionState::Failure | TransactionState::Cancelled => {
                &[TransactionState::Initiated, TransactionState::Pending]
            }
        }
    }

    pub fn can_transition_to(&self, target: TransactionState) -> bool {
        target.predecessors().contains(self)
    }

    pub fn as_db_status(&self) -> &'static str {
        match self {
            TransactionState::Initiated => "initiated",
            TransactionState::Pending => "pending",
            TransactionState::Success => "success",
            TransactionState::Failure => "failure",
            TransactionState::Cancelled => "cancelled",
        }
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status {
            "initiated" => Some(TransactionState::Initiated),
            "pending" => Some(TransactionState::Pending),
            "success" => Some(TransactionState::Success),
            "failure" => Some(TransactionState::Failure),
            "cancelled" => Some(TransactionState::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_status())
    }
}

/// Internal meaning of a gateway status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayOutcome {
    Success,
    Failure,
    Pending,
    Cancelled,
    /// Not in the status table; never transitions state.
    Unknown,
}

impl GatewayOutcome {
    pub fn target_state(&self) -> Option<TransactionState> {
        match self {
            GatewayOutcome::Success => Some(TransactionState::Success),
            GatewayOutcome::Failure => Some(TransactionState::Failure),
            GatewayOutcome::Pending => Some(TransactionState::Pending),
            GatewayOutcome::Cancelled => Some(TransactionState::Cancelled),
            GatewayOutcome::Unknown => None,
        }
    }
}

/// Final outcome handed to the entitlement collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Success,
    Failure,
    Cancelled,
}

impl PaymentOutcome {
    pub fn for_state(state: TransactionState) -> Option<Self> {
        match state {
            TransactionState::Success => Some(PaymentOutcome::Success),
            TransactionState::Failure => Some(PaymentOutcome::Failure),
            TransactionState::Cancelled => Some(PaymentOutcome::Cancelled),
            TransactionState::Initiated | TransactionState::Pending => None,
        }
    }
}

/// Internal transaction record, owned by the reconciler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub txn_id: String,
    /// Internal payment/subscription record this attempt pays for
    pub payment_record_id: String,
    pub user_id: String,
    pub amount: Amount,
    pub state: TransactionState,
    pub gateway_txn_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data needed to persist a freshly issued transaction id
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub txn_id: String,
    pub payment_record_id: String,
    pub user_id: String,
    pub amount: Amount,
}

/// One notification instance: (transaction id, gateway transaction id, status)
///
/// `target` is the state the status maps to; it decides whether the claim
/// competes for the single terminal slot of the transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub txn_id: String,
    pub gateway_txn_id: String,
    pub status: String,
    pub target: TransactionState,
}

impl IdempotencyKey {
    pub fn new(
        txn_id: impl Into<String>,
        gateway_txn_id: impl Into<String>,
        status: impl Into<String>,
        target: TransactionState,
    ) -> Self {
        Self {
            txn_id: txn_id.into(),
            gateway_txn_id: gateway_txn_id.into(),
            status: status.into(),
            target,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.target.is_terminal()
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.txn_id, self.gateway_txn_id, self.status)
    }
}

/// Inbound redirect response or webhook, exactly as the gateway posted it
///
/// Every field is optional so structural validation can report what is
/// missing instead of failing deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayResponse {
    pub key: Option<String>,
    pub txnid: Option<String>,
    pub amount: Option<String>,
    pub productinfo: Option<String>,
    pub firstname: Option<String>,
    pub email: Option<String>,
    pub udf1: Option<String>,
    pub udf2: Option<String>,
    pub udf3: Option<String>,
    pub udf4: Option<String>,
    pub udf5: Option<String>,
    pub mihpayid: Option<String>,
    pub status: Option<String>,
    pub error: Option<String>,
    #[serde(rename = "error_Message")]
    pub error_message: Option<String>,
    #[serde(rename = "additionalCharges")]
    pub additional_charges: Option<String>,
    pub hash: Option<String>,
}

impl GatewayResponse {
    pub fn udf(&self) -> [&str; 5] {
        [
            self.udf1.as_deref().unwrap_or(""),
            self.udf2.as_deref().unwrap_or(""),
            self.udf3.as_deref().unwrap_or(""),
            self.udf4.as_deref().unwrap_or(""),
            self.udf5.as_deref().unwrap_or(""),
        ]
    }

    /// Trimmed, non-empty value of an optional field
    pub fn present(field: &Option<String>) -> Option<&str> {
        field.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }
}

/// Which inbound path delivered a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationSource {
    Redirect,
    Webhook,
}

impl NotificationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationSource::Redirect => "redirect",
            NotificationSource::Webhook => "webhook",
        }
    }
}

/// What happened to one inbound notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationVerdict {
    Applied,
    Duplicate,
    Malformed,
    UnknownOrClosed,
    SignatureMismatch,
    AmountMismatch,
    UnknownStatus,
    SideEffectFailed,
    Error,
}

impl NotificationVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationVerdict::Applied => "applied",
            NotificationVerdict::Duplicate => "duplicate",
            NotificationVerdict::Malformed => "malformed",
            NotificationVerdict::UnknownOrClosed => "unknown_or_closed",
            NotificationVerdict::SignatureMismatch => "signature_mismatch",
            NotificationVerdict::AmountMismatch => "amount_mismatch",
            NotificationVerdict::UnknownStatus => "unknown_status",
            NotificationVerdict::SideEffectFailed => "side_effect_failed",
            NotificationVerdict::Error => "error",
        }
    }
}

/// Append-only audit entry for an inbound notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub txn_id: Option<String>,
    pub source: NotificationSource,
    pub status: Option<String>,
    pub verdict: NotificationVerdict,
    pub detail: Option<String>,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}
