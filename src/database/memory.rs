//! In-process implementation of [`PaymentStore`]
//!
//! Mirrors the Postgres constraints (unique transaction id, unique
//! idempotency key, one terminal claim per transaction) behind a single
//! mutex. Used by tests and the conformance harness; state is lost with the
//! process, so production uses [`super::store::PgPaymentStore`].

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::PaymentStore;
use crate::payments::types::{
    IdempotencyKey, NewTransaction, NotificationRecord, NotificationVerdict, PaymentTransaction,
    TransactionState,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct ClaimEntry {
    claimed_at: DateTime<Utc>,
    applied_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Inner {
    transactions: HashMap<String, PaymentTransaction>,
    claims: HashMap<IdempotencyKey, ClaimEntry>,
    notifications: Vec<NotificationRecord>,
}

pub struct InMemoryPaymentStore {
    inner: Mutex<Inner>,
    claim_lease: Duration,
}

impl Default for InMemoryPaymentStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(900))
    }
}

impl InMemoryPaymentStore {
    pub fn new(claim_lease: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            claim_lease,
        }
    }

    pub async fn transaction_count(&self) -> usize {
        self.inner.lock().await.transactions.len()
    }

    pub async fn notifications(&self) -> Vec<NotificationRecord> {
        self.inner.lock().await.notifications.clone()
    }

    fn is_stale(&self, entry: &ClaimEntry, now: DateTime<Utc>) -> bool {
        entry.applied_at.is_none()
            && (now - entry.claimed_at)
                .to_std()
                .map(|age| age >= self.claim_lease)
                .unwrap_or(false)
    }
}

fn transition_in_place(
    transaction: &mut PaymentTransaction,
    new_state: TransactionState,
    gateway_txn_id: Option<&str>,
    now: DateTime<Utc>,
) -> bool {
    if !transaction.state.can_transition_to(new_state) {
        return false;
    }
    transaction.state = new_state;
    if let Some(gateway_txn_id) = gateway_txn_id {
        transaction.gateway_txn_id = Some(gateway_txn_id.to_string());
    }
    transaction.updated_at = now;
    true
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn create_transaction(
        &self,
        transaction: &NewTransaction,
    ) -> Result<PaymentTransaction, DatabaseError> {
        let mut inner = self.inner.lock().await;
        if inner.transactions.contains_key(&transaction.txn_id) {
            return Err(DatabaseError::unique_violation("payment_transactions_pkey"));
        }

        let now = Utc::now();
        let record = PaymentTransaction {
            txn_id: transaction.txn_id.clone(),
            payment_record_id: transaction.payment_record_id.clone(),
            user_id: transaction.user_id.clone(),
            amount: transaction.amount,
            state: TransactionState::Initiated,
            gateway_txn_id: None,
            created_at: now,
            updated_at: now,
        };
        inner
            .transactions
            .insert(record.txn_id.clone(), record.clone());
        Ok(record)
    }

    async fn load_transaction(
        &self,
        txn_id: &str,
    ) -> Result<Option<PaymentTransaction>, DatabaseError> {
        Ok(self.inner.lock().await.transactions.get(txn_id).cloned())
    }

    async fn transition_transaction(
        &self,
        txn_id: &str,
        new_state: TransactionState,
        gateway_txn_id: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let mut inner = self.inner.lock().await;
        let transaction = inner
            .transactions
            .get_mut(txn_id)
            .ok_or_else(|| DatabaseError::not_found("PaymentTransaction", txn_id))?;
        Ok(transition_in_place(
            transaction,
            new_state,
            gateway_txn_id,
            Utc::now(),
        ))
    }

    async fn claim_idempotency_key(&self, key: &IdempotencyKey) -> Result<bool, DatabaseError> {
        let mut inner = self.inner.lock().await;
        if !inner.transactions.contains_key(&key.txn_id) {
            return Err(DatabaseError::new(DatabaseErrorKind::ForeignKeyViolation {
                constraint: "payment_idempotency_keys_txn_id_fkey".to_string(),
            }));
        }

        let now = Utc::now();
        if let Some(entry) = inner.claims.get(key) {
            if !self.is_stale(entry, now) {
                return Ok(false);
            }
            inner.claims.insert(
                key.clone(),
                ClaimEntry {
                    claimed_at: now,
                    applied_at: None,
                },
            );
            return Ok(true);
        }

        if key.is_terminal() {
            let stale: Vec<IdempotencyKey> = inner
                .claims
                .iter()
                .filter(|(k, e)| k.txn_id == key.txn_id && k.is_terminal() && self.is_stale(e, now))
                .map(|(k, _)| k.clone())
                .collect();
            for k in stale {
                inner.claims.remove(&k);
            }

            let terminal_taken = inner
                .claims
                .keys()
                .any(|k| k.txn_id == key.txn_id && k.is_terminal());
            if terminal_taken {
                return Ok(false);
            }
        }

        inner.claims.insert(
            key.clone(),
            ClaimEntry {
                claimed_at: now,
                applied_at: None,
            },
        );
        Ok(true)
    }

    async fn release_idempotency_key(&self, key: &IdempotencyKey) -> Result<(), DatabaseError> {
        let mut inner = self.inner.lock().await;
        if matches!(inner.claims.get(key), Some(entry) if entry.applied_at.is_none()) {
            inner.claims.remove(key);
        }
        Ok(())
    }

    async fn is_key_applied(&self, key: &IdempotencyKey) -> Result<bool, DatabaseError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .claims
            .get(key)
            .map(|entry| entry.applied_at.is_some())
            .unwrap_or(false))
    }

    async fn commit_reconciliation(&self, key: &IdempotencyKey) -> Result<bool, DatabaseError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        let transaction = inner
            .transactions
            .get_mut(&key.txn_id)
            .ok_or_else(|| DatabaseError::not_found("PaymentTransaction", &key.txn_id))?;
        let changed = transition_in_place(transaction, key.target, Some(&key.gateway_txn_id), now);

        let entry = inner.claims.entry(key.clone()).or_insert(ClaimEntry {
            claimed_at: now,
            applied_at: None,
        });
        entry.applied_at = Some(now);

        Ok(changed)
    }

    async fn record_notification(&self, record: &NotificationRecord) -> Result<(), DatabaseError> {
        self.inner.lock().await.notifications.push(record.clone());
        Ok(())
    }

    async fn count_notifications(
        &self,
        txn_id: &str,
        verdict: NotificationVerdict,
    ) -> Result<i64, DatabaseError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .notifications
            .iter()
            .filter(|n| n.txn_id.as_deref() == Some(txn_id) && n.verdict == verdict)
            .count() as i64)
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::Amount;

    fn new_transaction(txn_id: &str) -> NewTransaction {
        NewTransaction {
            txn_id: txn_id.to_string(),
            payment_record_id: "sub_77".to_string(),
            user_id: "42".to_string(),
            amount: Amount::parse("499.00").unwrap(),
        }
    }

    fn key(txn_id: &str, status: &str, target: TransactionState) -> IdempotencyKey {
        IdempotencyKey::new(txn_id, "403993715521", status, target)
    }

    #[tokio::test]
    async fn test_duplicate_transaction_id_is_rejected() {
        let store = InMemoryPaymentStore::default();
        store.create_transaction(&new_transaction("TXN1")).await.unwrap();
        let err = store
            .create_transaction(&new_transaction("TXN1"))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn test_transition_respects_state_machine() {
        let store = InMemoryPaymentStore::default();
        store.create_transaction(&new_transaction("TXN1")).await.unwrap();

        assert!(store
            .transition_transaction("TXN1", TransactionState::Pending, None)
            .await
            .unwrap());
        assert!(!store
            .transition_transaction("TXN1", TransactionState::Pending, None)
            .await
            .unwrap());
        assert!(store
            .transition_transaction("TXN1", TransactionState::Success, Some("403993715521"))
            .await
            .unwrap());
        assert!(!store
            .transition_transaction("TXN1", TransactionState::Failure, None)
            .await
            .unwrap());

        let stored = store.load_transaction("TXN1").await.unwrap().unwrap();
        assert_eq!(stored.state, TransactionState::Success);
        assert_eq!(stored.gateway_txn_id.as_deref(), Some("403993715521"));
    }

    #[tokio::test]
    async fn test_claim_is_exclusive_until_released() {
        let store = InMemoryPaymentStore::default();
        store.create_transaction(&new_transaction("TXN1")).await.unwrap();
        let success = key("TXN1", "success", TransactionState::Success);

        assert!(store.claim_idempotency_key(&success).await.unwrap());
        assert!(!store.claim_idempotency_key(&success).await.unwrap());

        store.release_idempotency_key(&success).await.unwrap();
        assert!(store.claim_idempotency_key(&success).await.unwrap());
    }

    #[tokio::test]
    async fn test_single_terminal_claim_per_transaction() {
        let store = InMemoryPaymentStore::default();
        store.create_transaction(&new_transaction("TXN1")).await.unwrap();

        let pending = key("TXN1", "pending", TransactionState::Pending);
        let success = key("TXN1", "success", TransactionState::Success);
        let failure = key("TXN1", "failure", TransactionState::Failure);

        assert!(store.claim_idempotency_key(&pending).await.unwrap());
        assert!(store.claim_idempotency_key(&success).await.unwrap());
        assert!(!store.claim_idempotency_key(&failure).await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_claim_can_be_taken_over() {
        let store = InMemoryPaymentStore::new(Duration::ZERO);
        store.create_transaction(&new_transaction("TXN1")).await.unwrap();
        let success = key("TXN1", "success", TransactionState::Success);
        let failure = key("TXN1", "failure", TransactionState::Failure);

        assert!(store.claim_idempotency_key(&success).await.unwrap());
        assert!(store.claim_idempotency_key(&success).await.unwrap());
        assert!(store.claim_idempotency_key(&failure).await.unwrap());
    }

    #[tokio::test]
    async fn test_applied_claim_is_never_released_or_taken_over() {
        let store = InMemoryPaymentStore::new(Duration::ZERO);
        store.create_transaction(&new_transaction("TXN1")).await.unwrap();
        let success = key("TXN1", "success", TransactionState::Success);

        assert!(store.claim_idempotency_key(&success).await.unwrap());
        assert!(store.commit_reconciliation(&success).await.unwrap());
        assert!(store.is_key_applied(&success).await.unwrap());

        store.release_idempotency_key(&success).await.unwrap();
        assert!(store.is_key_applied(&success).await.unwrap());
        assert!(!store.claim_idempotency_key(&success).await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_for_unknown_transaction_fails() {
        let store = InMemoryPaymentStore::default();
        let err = store
            .claim_idempotency_key(&key("NOPE", "success", TransactionState::Success))
            .await
            .unwrap_err();
        assert!(err.is_constraint_violation());
    }
}
