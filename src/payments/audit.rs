//! Audit / conformance harness
//!
//! Drives the request builder, verifier and reconciler through known-good
//! and adversarial fixtures. Every fixture runs against its own in-memory
//! store and recording collaborators, so a run never touches real state.

use crate::config::{GatewayConfig, Secret};
use crate::database::memory::InMemoryPaymentStore;
use crate::database::repository::PaymentStore;
use crate::payments::alerts::{AlertKind, RecordingAlertSink};
use crate::payments::error::PaymentError;
use crate::payments::processor::{NotificationProcessor, ProcessOutcome, ProcessorConfig};
use crate::payments::providers::payu::{response_hash_fields, HashInput, PayuMode};
use crate::payments::reconciler::RetryPolicy;
use crate::payments::request::{PaymentIntent, RequestBuilder, TransactionRequest};
use crate::payments::signature::sign;
use crate::payments::traits::{EntitlementService, SideEffectError};
use crate::payments::types::{GatewayResponse, NotificationSource, PaymentOutcome, TransactionState};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const FIXTURE_MERCHANT_KEY: &str = "conformance-key";
pub const FIXTURE_SALT: &str = "conformance-salt";
const FIXTURE_AMOUNT: &str = "499.00";
const FIXTURE_GATEWAY_TXN_ID: &str = "403993715521";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Fixture {
    WellFormedSuccess,
    WellFormedFailure,
    WellFormedCancellation,
    PendingStatus,
    MalformedPayload,
    TamperedSignature,
    AmountMismatch,
    UnknownTransaction,
    DuplicateTerminalDelivery,
    NegativeAmount,
    ZeroAmount,
    OversizedAmount,
}

impl Fixture {
    pub const ALL: [Fixture; 12] = [
        Fixture::WellFormedSuccess,
        Fixture::WellFormedFailure,
        Fixture::WellFormedCancellation,
        Fixture::PendingStatus,
        Fixture::MalformedPayload,
        Fixture::TamperedSignature,
        Fixture::AmountMismatch,
        Fixture::UnknownTransaction,
        Fixture::DuplicateTerminalDelivery,
        Fixture::NegativeAmount,
        Fixture::ZeroAmount,
        Fixture::OversizedAmount,
    ];

    pub fn remediation(&self) -> &'static str {
        match self {
            Fixture::WellFormedSuccess | Fixture::WellFormedFailure | Fixture::WellFormedCancellation => {
                "Check the response hash sequence (reverse field order, reserved udf slots) and that terminal outcomes call the entitlement service exactly once."
            }
            Fixture::PendingStatus => {
                "Pending must move INITIATED to PENDING without calling the entitlement service."
            }
            Fixture::MalformedPayload => {
                "Require txnid, status, amount, mihpayid and hash before any lookup or hashing."
            }
            Fixture::TamperedSignature => {
                "Recompute the digest with the merchant salt, compare in constant time, and raise an alert on mismatch."
            }
            Fixture::AmountMismatch => {
                "Compare the canonical decimal amount with the stored request amount after the signature check."
            }
            Fixture::UnknownTransaction => {
                "Reject notifications whose txnid was never issued; never create a transaction from an inbound message."
            }
            Fixture::DuplicateTerminalDelivery => {
                "Claim (txnid, mihpayid, status) in the idempotency ledger before the side effect and report redeliveries as duplicates."
            }
            Fixture::NegativeAmount | Fixture::ZeroAmount => {
                "Reject non-positive amounts in the request builder before a transaction is persisted."
            }
            Fixture::OversizedAmount => {
                "Bound amounts by MAX_AMOUNT so the canonical form keeps two decimals and fits the ledger column."
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FixtureResult {
    pub fixture: Fixture,
    pub passed: bool,
    pub observed: String,
    /// Only set for failures
    pub remediation: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConformanceReport {
    pub results: Vec<FixtureResult>,
}

impl ConformanceReport {
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    pub fn failures(&self) -> Vec<&FixtureResult> {
        self.results.iter().filter(|r| !r.passed).collect()
    }
}

/// Entitlement double that counts calls and can fail on demand
#[derive(Debug, Default)]
pub struct CountingEntitlementService {
    applied: Mutex<Vec<(String, PaymentOutcome)>>,
    attempts: AtomicU32,
    transient_failures: AtomicU32,
    permanent_failure: bool,
    delay: Option<Duration>,
}

impl CountingEntitlementService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail transiently on the first `failures` calls
    pub fn failing_transiently(failures: u32) -> Self {
        Self {
            transient_failures: AtomicU32::new(failures),
            ..Self::default()
        }
    }

    pub fn rejecting() -> Self {
        Self {
            permanent_failure: true,
            ..Self::default()
        }
    }

    /// Sleep before answering
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Successful applications
    pub fn applied(&self) -> Vec<(String, PaymentOutcome)> {
        self.applied
            .lock()
            .map(|applied| applied.clone())
            .unwrap_or_default()
    }

    pub fn applied_count(&self) -> usize {
        self.applied().len()
    }

    /// Every call, including failed ones
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntitlementService for CountingEntitlementService {
    async fn apply_side_effect(
        &self,
        payment_record_id: &str,
        outcome: PaymentOutcome,
    ) -> Result<(), SideEffectError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.permanent_failure {
            return Err(SideEffectError::Permanent("record rejected".to_string()));
        }
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(SideEffectError::Transient("service unavailable".to_string()));
        }

        if let Ok(mut applied) = self.applied.lock() {
            applied.push((payment_record_id.to_string(), outcome));
        }
        Ok(())
    }
}

/// Gateway simulator: the response the gateway would post for `request`
pub fn signed_response(
    request: &TransactionRequest,
    status: &str,
    amount: &str,
    salt: &str,
) -> GatewayResponse {
    let udf = request.udf();
    let field = |value: &str| Some(value.to_string());

    let mut response = GatewayResponse {
        key: field(request.merchant_key()),
        txnid: field(request.txn_id()),
        amount: field(amount),
        productinfo: field(request.product_info()),
        firstname: field(request.payer_name()),
        email: field(request.payer_email()),
        udf1: field(udf[0].as_str()),
        udf2: field(udf[1].as_str()),
        udf3: field(udf[2].as_str()),
        udf4: field(udf[3].as_str()),
        udf5: field(udf[4].as_str()),
        mihpayid: field(FIXTURE_GATEWAY_TXN_ID),
        status: field(status),
        error: field("E000"),
        error_message: field("No Error"),
        ..Default::default()
    };

    let hash_fields = response_hash_fields(
        &HashInput {
            key: request.merchant_key(),
            txnid: request.txn_id(),
            amount,
            productinfo: request.product_info(),
            firstname: request.payer_name(),
            email: request.payer_email(),
            udf: response.udf(),
        },
        status,
        None,
    );
    response.hash = sign(&hash_fields, salt).ok();
    response
}

pub fn fixture_gateway_config() -> GatewayConfig {
    GatewayConfig {
        merchant_key: FIXTURE_MERCHANT_KEY.to_string(),
        merchant_salt: Secret::new(FIXTURE_SALT),
        mode: PayuMode::Test,
        success_url: "https://conformance.invalid/payments/success".to_string(),
        failure_url: "https://conformance.invalid/payments/failure".to_string(),
        result_url: "https://conformance.invalid/billing/result".to_string(),
        require_https: true,
    }
}

pub fn fixture_intent(amount: &str) -> PaymentIntent {
    PaymentIntent {
        payment_record_id: "sub_conformance".to_string(),
        user_id: "user_conformance".to_string(),
        amount: amount.to_string(),
        product_info: "Conformance plan".to_string(),
        payer_name: "Conformance".to_string(),
        payer_email: "conformance@example.com".to_string(),
        udf1: None,
        udf2: None,
        udf5: None,
        success_url: None,
        failure_url: None,
    }
}

/// Isolated components for one fixture
struct Sandbox {
    store: Arc<InMemoryPaymentStore>,
    entitlements: Arc<CountingEntitlementService>,
    alerts: Arc<RecordingAlertSink>,
    builder: RequestBuilder,
    processor: NotificationProcessor,
}

impl Sandbox {
    fn new() -> Self {
        let store = Arc::new(InMemoryPaymentStore::default());
        let entitlements = Arc::new(CountingEntitlementService::new());
        let alerts = Arc::new(RecordingAlertSink::new());
        let gateway = fixture_gateway_config();

        let processor = NotificationProcessor::new(
            store.clone(),
            entitlements.clone(),
            alerts.clone(),
            ProcessorConfig {
                merchant_key: gateway.merchant_key.clone(),
                merchant_salt: gateway.merchant_salt.clone(),
                retry: RetryPolicy {
                    max_attempts: 3,
                    initial_backoff: Duration::from_millis(1),
                    max_backoff: Duration::from_millis(4),
                    call_timeout: Duration::from_secs(1),
                },
                manual_reconciliation_window: Duration::from_secs(24 * 3600),
                unknown_status_alert_threshold: 3,
            },
        );

        Self {
            builder: RequestBuilder::new(gateway, store.clone()),
            store,
            entitlements,
            alerts,
            processor,
        }
    }

    async fn state_of(&self, txn_id: &str) -> Option<TransactionState> {
        self.store
            .load_transaction(txn_id)
            .await
            .ok()
            .flatten()
            .map(|t| t.state)
    }
}

/// Check outcome of one fixture: `Ok(observed)` or `Err(observed)`
type Check = Result<String, String>;

fn expect(condition: bool, observed: String) -> Check {
    if condition {
        Ok(observed)
    } else {
        Err(observed)
    }
}

pub struct ConformanceHarness;

impl Default for ConformanceHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl ConformanceHarness {
    pub fn new() -> Self {
        Self
    }

    pub async fn run_all(&self) -> ConformanceReport {
        let mut results = Vec::with_capacity(Fixture::ALL.len());
        for fixture in Fixture::ALL {
            results.push(self.run(fixture).await);
        }
        ConformanceReport { results }
    }

    pub async fn run(&self, fixture: Fixture) -> FixtureResult {
        let check = match fixture {
            Fixture::WellFormedSuccess => {
                self.terminal(fixture, "success", TransactionState::Success).await
            }
            Fixture::WellFormedFailure => {
                self.terminal(fixture, "failure", TransactionState::Failure).await
            }
            Fixture::WellFormedCancellation => {
                self.terminal(fixture, "cancel", TransactionState::Cancelled).await
            }
            Fixture::PendingStatus => self.pending().await,
            Fixture::MalformedPayload => self.malformed().await,
            Fixture::TamperedSignature => self.tampered_signature().await,
            Fixture::AmountMismatch => self.amount_mismatch().await,
            Fixture::UnknownTransaction => self.unknown_transaction().await,
            Fixture::DuplicateTerminalDelivery => self.duplicate_delivery().await,
            Fixture::NegativeAmount => self.rejected_amount("-1.00").await,
            Fixture::ZeroAmount => self.rejected_amount("0.00").await,
            Fixture::OversizedAmount => self.rejected_amount("1000000000000.00").await,
        };

        match check {
            Ok(observed) => FixtureResult {
                fixture,
                passed: true,
                observed,
                remediation: None,
            },
            Err(observed) => FixtureResult {
                fixture,
                passed: false,
                observed,
                remediation: Some(fixture.remediation()),
            },
        }
    }

    async fn issue(&self, sandbox: &Sandbox) -> Result<TransactionRequest, String> {
        sandbox
            .builder
            .build(&fixture_intent(FIXTURE_AMOUNT))
            .await
            .map_err(|e| format!("request builder failed: {}", e))
    }

    async fn terminal(&self, fixture: Fixture, status: &str, expected: TransactionState) -> Check {
        let sandbox = Sandbox::new();
        let request = self.issue(&sandbox).await?;
        let result = sandbox
            .processor
            .process(
                &signed_response(&request, status, FIXTURE_AMOUNT, FIXTURE_SALT),
                NotificationSource::Webhook,
            )
            .await;

        let state = sandbox.state_of(request.txn_id()).await;
        let applied = sandbox.entitlements.applied_count();
        expect(
            matches!(result, Ok(ProcessOutcome::Applied { to, .. }) if to == expected)
                && state == Some(expected)
                && applied == 1,
            format!(
                "{:?}: result {:?}, state {:?}, side effects {}",
                fixture, result, state, applied
            ),
        )
    }

    async fn pending(&self) -> Check {
        let sandbox = Sandbox::new();
        let request = self.issue(&sandbox).await?;
        let result = sandbox
            .processor
            .process(
                &signed_response(&request, "pending", FIXTURE_AMOUNT, FIXTURE_SALT),
                NotificationSource::Webhook,
            )
            .await;

        let state = sandbox.state_of(request.txn_id()).await;
        let attempts = sandbox.entitlements.attempts();
        expect(
            result.is_ok() && state == Some(TransactionState::Pending) && attempts == 0,
            format!("result {:?}, state {:?}, side-effect calls {}", result, state, attempts),
        )
    }

    async fn malformed(&self) -> Check {
        let sandbox = Sandbox::new();
        let request = self.issue(&sandbox).await?;
        let mut message = signed_response(&request, "success", FIXTURE_AMOUNT, FIXTURE_SALT);
        message.mihpayid = None;
        message.hash = None;

        let result = sandbox
            .processor
            .process(&message, NotificationSource::Redirect)
            .await;
        let state = sandbox.state_of(request.txn_id()).await;
        expect(
            matches!(result, Err(PaymentError::MalformedMessage { .. }))
                && state == Some(TransactionState::Initiated),
            format!("result {:?}, state {:?}", result, state),
        )
    }

    async fn tampered_signature(&self) -> Check {
        let sandbox = Sandbox::new();
        let request = self.issue(&sandbox).await?;
        let mut message = signed_response(&request, "success", FIXTURE_AMOUNT, FIXTURE_SALT);
        message.hash = message.hash.map(|hash| {
            let mut chars: Vec<char> = hash.chars().collect();
            if let Some(first) = chars.first_mut() {
                *first = if *first == 'a' { 'b' } else { 'a' };
            }
            chars.into_iter().collect()
        });

        let result = sandbox
            .processor
            .process(&message, NotificationSource::Webhook)
            .await;
        let state = sandbox.state_of(request.txn_id()).await;
        let alerts = sandbox.alerts.count(AlertKind::SignatureMismatch);
        expect(
            matches!(result, Err(PaymentError::SignatureMismatch { .. }))
                && state == Some(TransactionState::Initiated)
                && alerts == 1
                && sandbox.entitlements.attempts() == 0,
            format!("result {:?}, state {:?}, alerts {}", result, state, alerts),
        )
    }

    async fn amount_mismatch(&self) -> Check {
        let sandbox = Sandbox::new();
        let request = self.issue(&sandbox).await?;
        let result = sandbox
            .processor
            .process(
                &signed_response(&request, "success", "500.00", FIXTURE_SALT),
                NotificationSource::Webhook,
            )
            .await;

        let state = sandbox.state_of(request.txn_id()).await;
        let alerts = sandbox.alerts.count(AlertKind::AmountMismatch);
        expect(
            matches!(result, Err(PaymentError::AmountMismatch { .. }))
                && state == Some(TransactionState::Initiated)
                && alerts == 1
                && sandbox.entitlements.attempts() == 0,
            format!("result {:?}, state {:?}, alerts {}", result, state, alerts),
        )
    }

    async fn unknown_transaction(&self) -> Check {
        let sandbox = Sandbox::new();
        let request = self.issue(&sandbox).await?;
        let mut message = signed_response(&request, "success", FIXTURE_AMOUNT, FIXTURE_SALT);
        message.txnid = Some("TXN_NEVER_ISSUED".to_string());

        let result = sandbox
            .processor
            .process(&message, NotificationSource::Webhook)
            .await;
        let created = sandbox.state_of("TXN_NEVER_ISSUED").await;
        let count = sandbox.store.transaction_count().await;
        expect(
            matches!(result, Err(PaymentError::UnknownOrClosedTransaction { .. }))
                && created.is_none()
                && count == 1,
            format!("result {:?}, transactions {}", result, count),
        )
    }

    async fn duplicate_delivery(&self) -> Check {
        let sandbox = Sandbox::new();
        let request = self.issue(&sandbox).await?;
        let message = signed_response(&request, "success", FIXTURE_AMOUNT, FIXTURE_SALT);

        let first = sandbox
            .processor
            .process(&message, NotificationSource::Redirect)
            .await;
        let second = sandbox
            .processor
            .process(&message, NotificationSource::Webhook)
            .await;
        let applied = sandbox.entitlements.applied_count();
        expect(
            matches!(first, Ok(ProcessOutcome::Applied { .. }))
                && matches!(second, Ok(ProcessOutcome::Duplicate))
                && applied == 1,
            format!("first {:?}, second {:?}, side effects {}", first, second, applied),
        )
    }

    async fn rejected_amount(&self, amount: &str) -> Check {
        let sandbox = Sandbox::new();
        let result = sandbox.builder.build(&fixture_intent(amount)).await;
        let count = sandbox.store.transaction_count().await;
        expect(
            matches!(result, Err(PaymentError::Validation { .. })) && count == 0,
            format!(
                "amount {}: {:?}, transactions {}",
                amount,
                result.map(|r| r.txn_id().to_string()),
                count
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_fixture_passes() {
        let report = ConformanceHarness::new().run_all().await;
        assert_eq!(report.results.len(), Fixture::ALL.len());
        for result in &report.results {
            assert!(result.passed, "{:?}: {}", result.fixture, result.observed);
            assert!(result.remediation.is_none());
        }
        assert!(report.all_passed());
    }

    #[test]
    fn test_report_serializes_fixture_names() {
        let report = ConformanceReport {
            results: vec![FixtureResult {
                fixture: Fixture::TamperedSignature,
                passed: false,
                observed: "accepted".to_string(),
                remediation: Some(Fixture::TamperedSignature.remediation()),
            }],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["results"][0]["fixture"], "tampered_signature");
        assert_eq!(report.failures().len(), 1);
        assert!(!report.all_passed());
    }
}
