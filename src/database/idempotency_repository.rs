use crate::database::error::DatabaseError;
use crate::payments::types::IdempotencyKey;
use sqlx::{PgConnection, PgPool};
use std::time::Duration;
use tracing::debug;

/// Idempotency ledger over `payment_idempotency_keys`
///
/// The primary key makes each notification claimable once. The partial
/// unique index on terminal rows makes each transaction's outcome claimable
/// once. A claim that was never applied expires after `claim_lease` so a
/// crashed worker does not block redelivery forever.
pub struct IdempotencyRepository {
    pool: PgPool,
    claim_lease: Duration,
}

impl IdempotencyRepository {
    pub fn new(pool: PgPool, claim_lease: Duration) -> Self {
        Self { pool, claim_lease }
    }

    pub async fn claim(&self, key: &IdempotencyKey) -> Result<bool, DatabaseError> {
        let lease_secs = self.claim_lease.as_secs_f64();

        if key.is_terminal() {
            let expired = sqlx::query(
                "DELETE FROM payment_idempotency_keys
                 WHERE txn_id = $1 AND terminal AND applied_at IS NULL
                   AND claimed_at < NOW() - make_interval(secs => $2)",
            )
            .bind(&key.txn_id)
            .bind(lease_secs)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

            if expired.rows_affected() > 0 {
                debug!(txn_id = %key.txn_id, "Expired stale terminal claim");
            }
        }

        let claimed = sqlx::query_scalar::<_, String>(
            "INSERT INTO payment_idempotency_keys
             (txn_id, gateway_txn_id, status, target_state, terminal, claimed_at)
             VALUES ($1, $2, $3, $4, $5, NOW())
             ON CONFLICT (txn_id, gateway_txn_id, status) DO UPDATE SET claimed_at = NOW()
             WHERE payment_idempotency_keys.applied_at IS NULL
               AND payment_idempotency_keys.claimed_at < NOW() - make_interval(secs => $6)
             RETURNING txn_id",
        )
        .bind(&key.txn_id)
        .bind(&key.gateway_txn_id)
        .bind(&key.status)
        .bind(key.target.as_db_status())
        .bind(key.is_terminal())
        .bind(lease_secs)
        .fetch_optional(&self.pool)
        .await;

        match claimed {
            Ok(row) => Ok(row.is_some()),
            Err(e) => {
                let err = DatabaseError::from_sqlx(e);
                // Another outcome already holds the terminal slot
                if err.is_unique_violation() {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    pub async fn release(&self, key: &IdempotencyKey) -> Result<(), DatabaseError> {
        sqlx::query(
            "DELETE FROM payment_idempotency_keys
             WHERE txn_id = $1 AND gateway_txn_id = $2 AND status = $3 AND applied_at IS NULL",
        )
        .bind(&key.txn_id)
        .bind(&key.gateway_txn_id)
        .bind(&key.status)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(())
    }

    pub async fn is_applied(&self, key: &IdempotencyKey) -> Result<bool, DatabaseError> {
        let applied = sqlx::query_scalar::<_, bool>(
            "SELECT applied_at IS NOT NULL FROM payment_idempotency_keys
             WHERE txn_id = $1 AND gateway_txn_id = $2 AND status = $3",
        )
        .bind(&key.txn_id)
        .bind(&key.gateway_txn_id)
        .bind(&key.status)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(applied.unwrap_or(false))
    }

    /// Stamp the claim as applied inside the caller's transaction
    pub async fn mark_applied_on(
        conn: &mut PgConnection,
        key: &IdempotencyKey,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO payment_idempotency_keys
             (txn_id, gateway_txn_id, status, target_state, terminal, claimed_at, applied_at)
             VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
             ON CONFLICT (txn_id, gateway_txn_id, status)
             DO UPDATE SET applied_at = COALESCE(payment_idempotency_keys.applied_at, NOW())",
        )
        .bind(&key.txn_id)
        .bind(&key.gateway_txn_id)
        .bind(&key.status)
        .bind(key.target.as_db_status())
        .bind(key.is_terminal())
        .execute(conn)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(())
    }
}
