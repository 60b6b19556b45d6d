use crate::database::error::DatabaseError;
use crate::database::models::{NewTransaction, ResultUpdate, Transaction};
use async_trait::async_trait;
use uuid::Uuid;

/// Keyed record store for push-payment transactions.
///
/// Implementations must make `apply_result_if_pending` atomic: the write only
/// lands while the stored status is still `pending`, so concurrent callback and
/// poll reconciliations cannot overwrite each other.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert a new `pending` transaction with a freshly generated id
    async fn create(&self, new: NewTransaction) -> Result<Transaction, DatabaseError>;

    /// Find a transaction by its internal id
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Transaction>, DatabaseError>;

    /// Find a transaction by the provider's checkout request id
    async fn find_by_checkout_request_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<Transaction>, DatabaseError>;

    /// Record the provider correlation pair. Fails if the pair is already set
    /// or the checkout request id belongs to another transaction.
    async fn attach_correlation(
        &self,
        id: Uuid,
        merchant_request_id: &str,
        checkout_request_id: &str,
    ) -> Result<Transaction, DatabaseError>;

    /// Write a terminal result if the transaction is still pending.
    ///
    /// Returns `Ok(None)` when the record was already terminal and nothing
    /// was written.
    async fn apply_result_if_pending(
        &self,
        id: Uuid,
        update: &ResultUpdate,
    ) -> Result<Option<Transaction>, DatabaseError>;

    /// Cheap liveness check
    async fn health_check(&self) -> Result<(), DatabaseError>;

    /// Check if a transaction exists by id
    async fn exists(&self, id: Uuid) -> Result<bool, DatabaseError> {
        match self.find_by_id(id).await {
            Ok(Some(_)) => Ok(true),
            Ok(None) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
