use crate::database::error::DatabaseError;
use crate::payments::types::{Amount, NewTransaction, PaymentTransaction, TransactionState};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection, PgExecutor, PgPool};

/// Row shape of `payment_transactions`
#[derive(Debug, Clone, FromRow)]
pub struct PaymentTransactionRow {
    pub txn_id: String,
    pub payment_record_id: String,
    pub user_id: String,
    pub amount: Decimal,
    pub status: String,
    pub gateway_txn_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<PaymentTransactionRow> for PaymentTransaction {
    type Error = DatabaseError;

    fn try_from(row: PaymentTransactionRow) -> Result<Self, Self::Error> {
        let state = TransactionState::from_db_status(&row.status).ok_or_else(|| {
            DatabaseError::invalid_record(format!(
                "transaction {} has unknown status '{}'",
                row.txn_id, row.status
            ))
        })?;
        let amount = Amount::from_decimal(row.amount)
            .map_err(|e| DatabaseError::invalid_record(e.to_string()))?;

        Ok(PaymentTransaction {
            txn_id: row.txn_id,
            payment_record_id: row.payment_record_id,
            user_id: row.user_id,
            amount,
            state,
            gateway_txn_id: row.gateway_txn_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const COLUMNS: &str = "txn_id, payment_record_id, user_id, amount, status, gateway_txn_id, created_at, updated_at";

/// Transaction Repository for the internal transaction record
pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a transaction in `initiated`
    pub async fn create(
        &self,
        transaction: &NewTransaction,
    ) -> Result<PaymentTransaction, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentTransactionRow>(&format!(
            "INSERT INTO payment_transactions
             (txn_id, payment_record_id, user_id, amount, status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
             RETURNING {}",
            COLUMNS
        ))
        .bind(&transaction.txn_id)
        .bind(&transaction.payment_record_id)
        .bind(&transaction.user_id)
        .bind(transaction.amount.value())
        .bind(TransactionState::Initiated.as_db_status())
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.try_into()
    }

    pub async fn find_by_txn_id(
        &self,
        txn_id: &str,
    ) -> Result<Option<PaymentTransaction>, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentTransactionRow>(&format!(
            "SELECT {} FROM payment_transactions WHERE txn_id = $1",
            COLUMNS
        ))
        .bind(txn_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(PaymentTransaction::try_from).transpose()
    }

    pub async fn transition(
        &self,
        txn_id: &str,
        new_state: TransactionState,
        gateway_txn_id: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        Self::transition_on(&self.pool, txn_id, new_state, gateway_txn_id).await
    }

    /// Conditional status update; only rows whose current status is a legal
    /// predecessor of `new_state` are touched
    pub async fn transition_on<'e, E: PgExecutor<'e>>(
        executor: E,
        txn_id: &str,
        new_state: TransactionState,
        gateway_txn_id: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let predecessors: Vec<String> = new_state
            .predecessors()
            .iter()
            .map(|state| state.as_db_status().to_string())
            .collect();

        let result = sqlx::query(
            "UPDATE payment_transactions
             SET status = $2, gateway_txn_id = COALESCE($3, gateway_txn_id), updated_at = NOW()
             WHERE txn_id = $1 AND status = ANY($4)",
        )
        .bind(txn_id)
        .bind(new_state.as_db_status())
        .bind(gateway_txn_id)
        .bind(predecessors)
        .execute(executor)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    /// Lock the row for the rest of the surrounding transaction
    pub async fn lock_for_update(
        conn: &mut PgConnection,
        txn_id: &str,
    ) -> Result<Option<PaymentTransaction>, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentTransactionRow>(&format!(
            "SELECT {} FROM payment_transactions WHERE txn_id = $1 FOR UPDATE",
            COLUMNS
        ))
        .bind(txn_id)
        .fetch_optional(conn)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(PaymentTransaction::try_from).transpose()
    }
}
