use crate::database::error::DatabaseError;
use crate::payments::types::{
    IdempotencyKey, NewTransaction, NotificationRecord, NotificationVerdict, PaymentTransaction,
    TransactionState,
};
use async_trait::async_trait;

/// Durable store behind the payment integrity components
///
/// Transaction ids and idempotency keys are both guarded by uniqueness
/// constraints, so every method here is safe to call from several worker
/// processes at once. The idempotency claim is the only serialization point.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Persist a transaction in `Initiated`.
    ///
    /// A reused transaction id fails with a unique-constraint violation.
    async fn create_transaction(
        &self,
        transaction: &NewTransaction,
    ) -> Result<PaymentTransaction, DatabaseError>;

    async fn load_transaction(
        &self,
        txn_id: &str,
    ) -> Result<Option<PaymentTransaction>, DatabaseError>;

    /// Move a transaction to `new_state` if its current state is a legal
    /// predecessor. Returns whether a row changed.
    async fn transition_transaction(
        &self,
        txn_id: &str,
        new_state: TransactionState,
        gateway_txn_id: Option<&str>,
    ) -> Result<bool, DatabaseError>;

    /// Atomically claim a notification. A second claim of the same key, or a
    /// second terminal claim for the same transaction, observes `false`.
    /// Unapplied claims older than the store's lease may be taken over.
    async fn claim_idempotency_key(&self, key: &IdempotencyKey) -> Result<bool, DatabaseError>;

    /// Drop an unapplied claim so the notification can be reprocessed.
    async fn release_idempotency_key(&self, key: &IdempotencyKey) -> Result<(), DatabaseError>;

    /// Whether this exact notification has already been fully applied.
    async fn is_key_applied(&self, key: &IdempotencyKey) -> Result<bool, DatabaseError>;

    /// Apply the transition for `key` and stamp the claim as applied in one
    /// atomic unit. Returns whether the transaction state changed.
    async fn commit_reconciliation(&self, key: &IdempotencyKey) -> Result<bool, DatabaseError>;

    async fn record_notification(&self, record: &NotificationRecord) -> Result<(), DatabaseError>;

    async fn count_notifications(
        &self,
        txn_id: &str,
        verdict: NotificationVerdict,
    ) -> Result<i64, DatabaseError>;

    /// Cheap liveness probe for the health endpoint
    async fn health_check(&self) -> Result<(), DatabaseError>;
}
