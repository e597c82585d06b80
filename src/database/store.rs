use crate::database;
use crate::database::error::DatabaseError;
use crate::database::idempotency_repository::IdempotencyRepository;
use crate::database::repository::PaymentStore;
use crate::database::transaction::DatabaseTransaction;
use crate::database::transaction_repository::TransactionRepository;
use crate::database::webhook_repository::NotificationRepository;
use crate::payments::types::{
    IdempotencyKey, NewTransaction, NotificationRecord, NotificationVerdict, PaymentTransaction,
    TransactionState,
};
use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;
use tracing::debug;

/// Postgres-backed [`PaymentStore`]
pub struct PgPaymentStore {
    pool: PgPool,
    transactions: TransactionRepository,
    idempotency: IdempotencyRepository,
    notifications: NotificationRepository,
}

impl PgPaymentStore {
    pub fn new(pool: PgPool, claim_lease: Duration) -> Self {
        Self {
            transactions: TransactionRepository::new(pool.clone()),
            idempotency: IdempotencyRepository::new(pool.clone(), claim_lease),
            notifications: NotificationRepository::new(pool.clone()),
            pool,
        }
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn create_transaction(
        &self,
        transaction: &NewTransaction,
    ) -> Result<PaymentTransaction, DatabaseError> {
        self.transactions.create(transaction).await
    }

    async fn load_transaction(
        &self,
        txn_id: &str,
    ) -> Result<Option<PaymentTransaction>, DatabaseError> {
        self.transactions.find_by_txn_id(txn_id).await
    }

    async fn transition_transaction(
        &self,
        txn_id: &str,
        new_state: TransactionState,
        gateway_txn_id: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        self.transactions
            .transition(txn_id, new_state, gateway_txn_id)
            .await
    }

    async fn claim_idempotency_key(&self, key: &IdempotencyKey) -> Result<bool, DatabaseError> {
        self.idempotency.claim(key).await
    }

    async fn release_idempotency_key(&self, key: &IdempotencyKey) -> Result<(), DatabaseError> {
        self.idempotency.release(key).await
    }

    async fn is_key_applied(&self, key: &IdempotencyKey) -> Result<bool, DatabaseError> {
        self.idempotency.is_applied(key).await
    }

    async fn commit_reconciliation(&self, key: &IdempotencyKey) -> Result<bool, DatabaseError> {
        let mut tx = DatabaseTransaction::begin(&self.pool).await?;
        let conn = tx.conn()?;

        if TransactionRepository::lock_for_update(&mut *conn, &key.txn_id)
            .await?
            .is_none()
        {
            tx.rollback().await?;
            return Err(DatabaseError::not_found("PaymentTransaction", &key.txn_id));
        }

        let changed = TransactionRepository::transition_on(
            &mut *conn,
            &key.txn_id,
            key.target,
            Some(&key.gateway_txn_id),
        )
        .await?;
        IdempotencyRepository::mark_applied_on(conn, key).await?;

        tx.commit()
            .await
            .map_err(|e| e.with_context(format!("committing {}", key)))?;
        debug!(key = %key, changed, "Reconciliation committed");
        Ok(changed)
    }

    async fn record_notification(&self, record: &NotificationRecord) -> Result<(), DatabaseError> {
        self.notifications.log_event(record).await.map(|_| ())
    }

    async fn count_notifications(
        &self,
        txn_id: &str,
        verdict: NotificationVerdict,
    ) -> Result<i64, DatabaseError> {
        self.notifications.count_by_verdict(txn_id, verdict).await
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        database::health_check(&self.pool).await
    }
}
