//! Status reconciler
//!
//! Owns every transaction state transition. For each verified message it
//! consults the idempotency ledger, claims the notification, runs the side
//! effect for terminal outcomes and then commits the transition together
//! with the ledger stamp. A failed side effect releases the claim so a later
//! redelivery can try again.

use crate::config::{EntitlementConfig, ReconciliationConfig};
use crate::database::repository::PaymentStore;
use crate::payments::alerts::{AlertKind, SecurityAlert};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::traits::{AlertSink, EntitlementService, SideEffectError};
use crate::payments::types::{IdempotencyKey, PaymentOutcome, PaymentTransaction, TransactionState};
use crate::payments::verifier::VerifiedMessage;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Bounded exponential backoff for the side-effect call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Limit on a single side-effect call
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            call_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(reconciliation: &ReconciliationConfig, entitlements: &EntitlementConfig) -> Self {
        Self {
            max_attempts: reconciliation.max_attempts,
            initial_backoff: Duration::from_millis(reconciliation.initial_backoff_ms),
            max_backoff: Duration::from_millis(reconciliation.max_backoff_ms),
            call_timeout: Duration::from_secs(entitlements.timeout_secs),
        }
    }

    /// Delay after failed attempt `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied {
        from: TransactionState,
        to: TransactionState,
    },
    /// Already applied, superseded, or claimed by another worker
    Duplicate,
}

pub struct Reconciler {
    store: Arc<dyn PaymentStore>,
    entitlements: Arc<dyn EntitlementService>,
    alerts: Arc<dyn AlertSink>,
    policy: RetryPolicy,
    manual_reconciliation_window: Duration,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        entitlements: Arc<dyn EntitlementService>,
        alerts: Arc<dyn AlertSink>,
        policy: RetryPolicy,
        manual_reconciliation_window: Duration,
    ) -> Self {
        Self {
            store,
            entitlements,
            alerts,
            policy,
            manual_reconciliation_window,
        }
    }

    pub async fn reconcile(&self, message: &VerifiedMessage) -> PaymentResult<ReconcileOutcome> {
        let key = message.idempotency_key();

        if self.store.is_key_applied(&key).await? {
            info!(key = %key, "DuplicateNotification: already applied");
            return Ok(ReconcileOutcome::Duplicate);
        }

        // The verifier's snapshot may be stale by now
        let transaction = self
            .store
            .load_transaction(message.txn_id())
            .await?
            .ok_or_else(|| PaymentError::unknown_or_closed(message.txn_id()))?;

        if !transaction.state.can_transition_to(key.target) {
            info!(
                key = %key,
                state = %transaction.state,
                target = %key.target,
                "DuplicateNotification: transition not applicable"
            );
            return Ok(ReconcileOutcome::Duplicate);
        }

        if !self.store.claim_idempotency_key(&key).await? {
            info!(key = %key, "DuplicateNotification: claimed elsewhere");
            return Ok(ReconcileOutcome::Duplicate);
        }

        if let Some(outcome) = PaymentOutcome::for_state(key.target) {
            if let Err(e) = self.apply_with_retry(&transaction, outcome).await {
                self.release(&key).await;
                self.escalate(&transaction, &e);
                return Err(e);
            }
        }

        match self.store.commit_reconciliation(&key).await {
            Ok(true) => {
                info!(
                    key = %key,
                    from = %transaction.state,
                    to = %key.target,
                    "Transaction transitioned"
                );
                Ok(ReconcileOutcome::Applied {
                    from: transaction.state,
                    to: key.target,
                })
            }
            Ok(false) => {
                warn!(key = %key, "DuplicateNotification: state moved before commit");
                Ok(ReconcileOutcome::Duplicate)
            }
            Err(e) => {
                error!(key = %key, error = %e, "Failed to commit reconciliation");
                self.release(&key).await;
                Err(e.into())
            }
        }
    }

    async fn apply_with_retry(
        &self,
        transaction: &PaymentTransaction,
        outcome: PaymentOutcome,
    ) -> PaymentResult<()> {
        let txn_id = transaction.txn_id.as_str();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match tokio::time::timeout(
                self.policy.call_timeout,
                self.entitlements
                    .apply_side_effect(&transaction.payment_record_id, outcome),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(SideEffectError::Transient(format!(
                    "timed out after {:?}",
                    self.policy.call_timeout
                ))),
            };

            match result {
                Ok(()) => {
                    info!(txn_id = %txn_id, ?outcome, attempt, "Side effect applied");
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    let backoff = self.policy.backoff_for(attempt);
                    warn!(
                        txn_id = %txn_id,
                        attempt,
                        error = %e,
                        "Side effect failed, retrying after {:?}",
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    error!(txn_id = %txn_id, attempt, error = %e, "Side effect failed");
                    return Err(PaymentError::SideEffectFailure {
                        txn_id: txn_id.to_string(),
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    async fn release(&self, key: &IdempotencyKey) {
        match self.store.release_idempotency_key(key).await {
            Ok(()) => info!(key = %key, "Idempotency claim released"),
            // The lease expiry frees it eventually
            Err(e) => error!(key = %key, error = %e, "Failed to release idempotency claim"),
        }
    }

    fn escalate(&self, transaction: &PaymentTransaction, failure: &PaymentError) {
        self.alerts.raise(SecurityAlert::new(
            AlertKind::SideEffectExhausted,
            Some(&transaction.txn_id),
            failure.to_string(),
        ));

        let age = (Utc::now() - transaction.created_at)
            .to_std()
            .unwrap_or_default();
        if age >= self.manual_reconciliation_window {
            self.alerts.raise(SecurityAlert::new(
                AlertKind::ManualReconciliationRequired,
                Some(&transaction.txn_id),
                format!(
                    "side effect still failing {}h after initiation",
                    age.as_secs() / 3600
                ),
            ));
        }
    }
}
