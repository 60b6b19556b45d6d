//! In-process transaction store
//!
//! Used when no database is configured and by the test suite. All writes go
//! through one lock, which makes the pending-guarded update atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::models::{NewTransaction, ResultUpdate, Transaction, TransactionStatus};
use crate::database::repository::TransactionStore;

#[derive(Default)]
struct Tables {
    transactions: HashMap<Uuid, Transaction>,
    by_checkout_id: HashMap<String, Uuid>,
}

#[derive(Default)]
pub struct InMemoryTransactionStore {
    tables: RwLock<Tables>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tables.read().await.transactions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// All stored transactions, oldest first
    pub async fn snapshot(&self) -> Vec<Transaction> {
        let mut all: Vec<Transaction> =
            self.tables.read().await.transactions.values().cloned().collect();
        all.sort_by_key(|t| t.created_at);
        all
    }
}

fn not_found(id: Uuid) -> DatabaseError {
    DatabaseError::new(DatabaseErrorKind::NotFound {
        entity: "Transaction".to_string(),
        id: id.to_string(),
    })
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn create(&self, new: NewTransaction) -> Result<Transaction, DatabaseError> {
        let now = Utc::now();
        let transaction = Transaction {
            id: Uuid::new_v4(),
            phone_number: new.phone_number,
            amount: new.amount,
            reference: new.reference,
            status: TransactionStatus::Pending,
            merchant_request_id: None,
            checkout_request_id: None,
            result_code: None,
            result_desc: None,
            mpesa_receipt_number: None,
            created_at: now,
            updated_at: now,
        };

        let mut tables = self.tables.write().await;
        tables
            .transactions
            .insert(transaction.id, transaction.clone());
        debug!(transaction_id = %transaction.id, "Stored new transaction");
        Ok(transaction)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Transaction>, DatabaseError> {
        Ok(self.tables.read().await.transactions.get(&id).cloned())
    }

    async fn find_by_checkout_request_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<Transaction>, DatabaseError> {
        let tables = self.tables.read().await;
        Ok(tables
            .by_checkout_id
            .get(checkout_request_id)
            .and_then(|id| tables.transactions.get(id))
            .cloned())
    }

    async fn attach_correlation(
        &self,
        id: Uuid,
        merchant_request_id: &str,
        checkout_request_id: &str,
    ) -> Result<Transaction, DatabaseError> {
        let mut tables = self.tables.write().await;

        if let Some(owner) = tables.by_checkout_id.get(checkout_request_id) {
            if *owner != id {
                return Err(DatabaseError::new(
                    DatabaseErrorKind::UniqueConstraintViolation {
                        column: "checkout_request_id".to_string(),
                        value: checkout_request_id.to_string(),
                    },
                ));
            }
        }

        let transaction = tables.transactions.get_mut(&id).ok_or_else(|| not_found(id))?;
        if transaction.checkout_request_id.is_some() {
            return Err(DatabaseError::new(DatabaseErrorKind::Conflict {
                message: format!("transaction {} already has correlation ids", id),
            }));
        }

        transaction.merchant_request_id = Some(merchant_request_id.to_string());
        transaction.checkout_request_id = Some(checkout_request_id.to_string());
        transaction.updated_at = Utc::now();
        let updated = transaction.clone();

        tables
            .by_checkout_id
            .insert(checkout_request_id.to_string(), id);
        Ok(updated)
    }

    async fn apply_result_if_pending(
        &self,
        id: Uuid,
        update: &ResultUpdate,
    ) -> Result<Option<Transaction>, DatabaseError> {
        let mut tables = self.tables.write().await;
        let transaction = tables.transactions.get_mut(&id).ok_or_else(|| not_found(id))?;

        if transaction.status != TransactionStatus::Pending {
            return Ok(None);
        }

        transaction.status = update.status;
        transaction.result_code = Some(update.result_code.clone());
        transaction.result_desc = Some(update.result_desc.clone());
        transaction.mpesa_receipt_number = update.mpesa_receipt_number.clone();
        transaction.updated_at = Utc::now();
        Ok(Some(transaction.clone()))
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}
