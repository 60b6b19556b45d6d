use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::models::{NewTransaction, ResultUpdate, Transaction, TransactionStatus};
use crate::database::repository::TransactionStore;
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const COLUMNS: &str = "id, phone_number, amount, reference, status, merchant_request_id, \
     checkout_request_id, result_code, result_desc, mpesa_receipt_number, created_at, updated_at";

/// Row shape of the `transactions` table
#[derive(Debug, Clone, FromRow)]
struct TransactionRecord {
    id: Uuid,
    phone_number: String,
    amount: f64,
    reference: String,
    status: String,
    merchant_request_id: Option<String>,
    checkout_request_id: Option<String>,
    result_code: Option<String>,
    result_desc: Option<String>,
    mpesa_receipt_number: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<TransactionRecord> for Transaction {
    type Error = DatabaseError;

    fn try_from(record: TransactionRecord) -> Result<Self, Self::Error> {
        let status = record.status.parse::<TransactionStatus>().map_err(|message| {
            DatabaseError::new(DatabaseErrorKind::CorruptRecord { message })
                .with_context(format!("transaction {}", record.id))
        })?;

        Ok(Transaction {
            id: record.id,
            phone_number: record.phone_number,
            amount: record.amount,
            reference: record.reference,
            status,
            merchant_request_id: record.merchant_request_id,
            checkout_request_id: record.checkout_request_id,
            result_code: record.result_code,
            result_desc: record.result_desc,
            mpesa_receipt_number: record.mpesa_receipt_number,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

fn into_domain(record: Option<TransactionRecord>) -> Result<Option<Transaction>, DatabaseError> {
    record.map(Transaction::try_from).transpose()
}

/// PostgreSQL-backed transaction store
pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TransactionStore for TransactionRepository {
    async fn create(&self, new: NewTransaction) -> Result<Transaction, DatabaseError> {
        let transaction_id = Uuid::new_v4();

        let record = sqlx::query_as::<_, TransactionRecord>(&format!(
            "INSERT INTO transactions (id, phone_number, amount, reference, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, NOW(), NOW()) \
             RETURNING {COLUMNS}"
        ))
        .bind(transaction_id)
        .bind(&new.phone_number)
        .bind(new.amount)
        .bind(&new.reference)
        .bind(TransactionStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        record.try_into()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Transaction>, DatabaseError> {
        let record = sqlx::query_as::<_, TransactionRecord>(&format!(
            "SELECT {COLUMNS} FROM transactions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        into_domain(record)
    }

    async fn find_by_checkout_request_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<Transaction>, DatabaseError> {
        let record = sqlx::query_as::<_, TransactionRecord>(&format!(
            "SELECT {COLUMNS} FROM transactions WHERE checkout_request_id = $1"
        ))
        .bind(checkout_request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        into_domain(record)
    }

    async fn attach_correlation(
        &self,
        id: Uuid,
        merchant_request_id: &str,
        checkout_request_id: &str,
    ) -> Result<Transaction, DatabaseError> {
        let record = sqlx::query_as::<_, TransactionRecord>(&format!(
            "UPDATE transactions \
             SET merchant_request_id = $1, checkout_request_id = $2, updated_at = NOW() \
             WHERE id = $3 AND checkout_request_id IS NULL \
             RETURNING {COLUMNS}"
        ))
        .bind(merchant_request_id)
        .bind(checkout_request_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        match record {
            Some(record) => record.try_into(),
            None if self.exists(id).await? => Err(DatabaseError::new(DatabaseErrorKind::Conflict {
                message: format!("transaction {} already has correlation ids", id),
            })),
            None => Err(DatabaseError::new(DatabaseErrorKind::NotFound {
                entity: "Transaction".to_string(),
                id: id.to_string(),
            })),
        }
    }

    async fn apply_result_if_pending(
        &self,
        id: Uuid,
        update: &ResultUpdate,
    ) -> Result<Option<Transaction>, DatabaseError> {
        // The status predicate is the race guard between callback and poll.
        let record = sqlx::query_as::<_, TransactionRecord>(&format!(
            "UPDATE transactions \
             SET status = $1, result_code = $2, result_desc = $3, mpesa_receipt_number = $4, updated_at = NOW() \
             WHERE id = $5 AND status = 'pending' \
             RETURNING {COLUMNS}"
        ))
        .bind(update.status.as_str())
        .bind(&update.result_code)
        .bind(&update.result_desc)
        .bind(&update.mpesa_receipt_number)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        match record {
            Some(record) => Ok(Some(record.try_into()?)),
            None if self.exists(id).await? => Ok(None),
            None => Err(DatabaseError::new(DatabaseErrorKind::NotFound {
                entity: "Transaction".to_string(),
                id: id.to_string(),
            })),
        }
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        crate::database::health_check(&self.pool).await
    }
}
