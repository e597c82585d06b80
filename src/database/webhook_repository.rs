use crate::database::error::DatabaseError;
use crate::payments::types::{NotificationRecord, NotificationVerdict};
use sqlx::{FromRow, PgPool};

/// Stored inbound notification
#[derive(Debug, Clone, FromRow)]
pub struct NotificationEvent {
    pub id: String,
    pub txn_id: Option<String>,
    pub source: String,
    pub status: Option<String>,
    pub verdict: String,
    pub detail: Option<String>,
    pub payload: serde_json::Value,
    pub received_at: chrono::DateTime<chrono::Utc>,
}

/// Append-only log of every redirect and webhook delivery
pub struct NotificationRepository {
    pool: PgPool,
}

impl NotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Log an inbound notification together with its verdict
    pub async fn log_event(
        &self,
        record: &NotificationRecord,
    ) -> Result<NotificationEvent, DatabaseError> {
        sqlx::query_as::<_, NotificationEvent>(
            "INSERT INTO payment_notifications
             (id, txn_id, source, status, verdict, detail, payload, received_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING id, txn_id, source, status, verdict, detail, payload, received_at",
        )
        .bind(&record.id)
        .bind(&record.txn_id)
        .bind(record.source.as_str())
        .bind(&record.status)
        .bind(record.verdict.as_str())
        .bind(&record.detail)
        .bind(&record.payload)
        .bind(record.received_at)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn count_by_verdict(
        &self,
        txn_id: &str,
        verdict: NotificationVerdict,
    ) -> Result<i64, DatabaseError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM payment_notifications WHERE txn_id = $1 AND verdict = $2",
        )
        .bind(txn_id)
        .bind(verdict.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
