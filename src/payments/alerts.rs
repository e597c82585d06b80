use crate::payments::traits::AlertSink;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use tracing::error;

/// Log target operators route to paging
pub const ALERT_TARGET: &str = "payment_alerts";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    SignatureMismatch,
    AmountMismatch,
    SideEffectExhausted,
    ManualReconciliationRequired,
    RepeatedUnknownStatus,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::SignatureMismatch => "signature_mismatch",
            AlertKind::AmountMismatch => "amount_mismatch",
            AlertKind::SideEffectExhausted => "side_effect_exhausted",
            AlertKind::ManualReconciliationRequired => "manual_reconciliation_required",
            AlertKind::RepeatedUnknownStatus => "repeated_unknown_status",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityAlert {
    pub kind: AlertKind,
    pub txn_id: Option<String>,
    pub detail: String,
    pub raised_at: DateTime<Utc>,
}

impl SecurityAlert {
    pub fn new(kind: AlertKind, txn_id: Option<&str>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            txn_id: txn_id.map(str::to_string),
            detail: detail.into(),
            raised_at: Utc::now(),
        }
    }
}

/// Emits alerts as error events on [`ALERT_TARGET`]
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn raise(&self, alert: SecurityAlert) {
        error!(
            target: ALERT_TARGET,
            kind = alert.kind.as_str(),
            txn_id = alert.txn_id.as_deref().unwrap_or("-"),
            raised_at = %alert.raised_at,
            "{}",
            alert.detail
        );
    }
}

/// Keeps every alert in memory
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<SecurityAlert>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<SecurityAlert> {
        self.alerts
            .lock()
            .map(|alerts| alerts.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, kind: AlertKind) -> usize {
        self.alerts().iter().filter(|a| a.kind == kind).count()
    }
}

impl AlertSink for RecordingAlertSink {
    fn raise(&self, alert: SecurityAlert) {
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push(alert);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_counts_by_kind() {
        let sink = RecordingAlertSink::new();
        sink.raise(SecurityAlert::new(AlertKind::SignatureMismatch, Some("TXN1"), "bad hash"));
        sink.raise(SecurityAlert::new(AlertKind::AmountMismatch, Some("TXN1"), "1.00 != 2.00"));
        sink.raise(SecurityAlert::new(AlertKind::SignatureMismatch, None, "bad hash"));

        assert_eq!(sink.count(AlertKind::SignatureMismatch), 2);
        assert_eq!(sink.count(AlertKind::AmountMismatch), 1);
        assert_eq!(sink.alerts()[0].txn_id.as_deref(), Some("TXN1"));
    }
}
