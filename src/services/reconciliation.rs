//! Payment-state reconciliation
//!
//! Callbacks and status polls both report a provider result code for a
//! transaction. They may arrive in any order, more than once, or not at all.
//! This module turns a result code into the next state and writes it at most
//! once: the first terminal result wins and every later one is a no-op.

use tracing::{debug, info};

use crate::database::{ResultUpdate, Transaction, TransactionStatus, TransactionStore};
use crate::error::{AppError, AppResult};

/// Provider result code for a completed payment
pub const SUCCESS_CODE: i64 = 0;

/// Provider result code meaning the request is still in flight
pub const STILL_PROCESSING_CODE: i64 = 1032;

/// Result reported by the provider, from either the callback or a poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderResult {
    pub code: i64,
    pub description: String,
    /// Only the callback ever carries a receipt
    pub receipt: Option<String>,
}

impl ProviderResult {
    pub fn new(code: i64, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
            receipt: None,
        }
    }

    pub fn with_receipt(mut self, receipt: Option<String>) -> Self {
        self.receipt = receipt;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Write this terminal result
    Apply(ResultUpdate),
    StillProcessing,
    /// The record already holds a terminal result; inputs are ignored
    AlreadyTerminal,
}

/// Compute the next state for a transaction currently in `current`
pub fn decide(current: TransactionStatus, result: &ProviderResult) -> Decision {
    if current.is_terminal() {
        return Decision::AlreadyTerminal;
    }

    match result.code {
        STILL_PROCESSING_CODE => Decision::StillProcessing,
        SUCCESS_CODE => Decision::Apply(ResultUpdate {
            status: TransactionStatus::Success,
            result_code: result.code.to_string(),
            result_desc: result.description.clone(),
            mpesa_receipt_number: result.receipt.clone(),
        }),
        _ => Decision::Apply(ResultUpdate {
            status: TransactionStatus::Failed,
            result_code: result.code.to_string(),
            result_desc: result.description.clone(),
            mpesa_receipt_number: None,
        }),
    }
}

/// Outcome of applying a provider result
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    /// The stored record after reconciliation
    pub transaction: Transaction,
    /// Whether this call performed the write
    pub changed: bool,
}

/// Decide and, when warranted, write the result with a pending-guarded update.
///
/// When a concurrent reconciliation wins the race the winner's record is
/// re-read and returned unchanged.
pub async fn apply(
    store: &dyn TransactionStore,
    transaction: Transaction,
    result: &ProviderResult,
) -> AppResult<Reconciled> {
    let update = match decide(transaction.status, result) {
        Decision::Apply(update) => update,
        Decision::StillProcessing => {
            debug!(
                transaction_id = %transaction.id,
                "Payment still processing (code {})",
                result.code
            );
            return Ok(Reconciled {
                transaction,
                changed: false,
            });
        }
        Decision::AlreadyTerminal => {
            debug!(
                transaction_id = %transaction.id,
                status = %transaction.status,
                "Ignoring result {} for settled transaction",
                result.code
            );
            return Ok(Reconciled {
                transaction,
                changed: false,
            });
        }
    };

    match store.apply_result_if_pending(transaction.id, &update).await? {
        Some(updated) => {
            info!(
                transaction_id = %updated.id,
                status = %updated.status,
                result_code = %update.result_code,
                "Transaction settled"
            );
            Ok(Reconciled {
                transaction: updated,
                changed: true,
            })
        }
        None => {
            debug!(
                transaction_id = %transaction.id,
                "Lost settlement race, keeping stored result"
            );
            let current = store
                .find_by_id(transaction.id)
                .await?
                .ok_or_else(|| AppError::transaction_not_found(transaction.id.to_string()))?;
            Ok(Reconciled {
                transaction: current,
                changed: false,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{InMemoryTransactionStore, NewTransaction};
    use std::sync::Arc;

    async fn pending(store: &InMemoryTransactionStore) -> Transaction {
        let txn = store
            .create(NewTransaction {
                phone_number: "254712345678".to_string(),
                amount: 500.0,
                reference: "Online Payment".to_string(),
            })
            .await
            .unwrap();
        store
            .attach_correlation(txn.id, "29115-1", "ws_CO_1")
            .await
            .unwrap()
    }

    #[test]
    fn test_decide_codes() {
        let success = ProviderResult::new(0, "Processed").with_receipt(Some("NLJ7RT61SV".into()));
        match decide(TransactionStatus::Pending, &success) {
            Decision::Apply(update) => {
                assert_eq!(update.status, TransactionStatus::Success);
                assert_eq!(update.result_code, "0");
                assert_eq!(update.mpesa_receipt_number.as_deref(), Some("NLJ7RT61SV"));
            }
            other => panic!("unexpected decision {:?}", other),
        }

        assert_eq!(
            decide(
                TransactionStatus::Pending,
                &ProviderResult::new(1032, "Request cancelled by user")
            ),
            Decision::StillProcessing
        );

        let failed = ProviderResult::new(2001, "Wrong PIN").with_receipt(Some("X".into()));
        match decide(TransactionStatus::Pending, &failed) {
            Decision::Apply(update) => {
                assert_eq!(update.status, TransactionStatus::Failed);
                assert_eq!(update.result_code, "2001");
                assert_eq!(update.mpesa_receipt_number, None);
            }
            other => panic!("unexpected decision {:?}", other),
        }
    }

    #[test]
    fn test_decide_is_noop_on_terminal_records() {
        for status in [TransactionStatus::Success, TransactionStatus::Failed] {
            for code in [0, 1, 1032] {
                assert_eq!(
                    decide(status, &ProviderResult::new(code, "x")),
                    Decision::AlreadyTerminal
                );
            }
        }
    }

    #[tokio::test]
    async fn test_success_is_written_once() {
        let store = InMemoryTransactionStore::new();
        let txn = pending(&store).await;

        let first = apply(
            &store,
            txn,
            &ProviderResult::new(0, "Processed").with_receipt(Some("NLJ7RT61SV".into())),
        )
        .await
        .unwrap();
        assert!(first.changed);
        assert_eq!(first.transaction.status, TransactionStatus::Success);

        // A later failure report for the same record changes nothing.
        let second = apply(
            &store,
            first.transaction.clone(),
            &ProviderResult::new(1, "Insufficient balance"),
        )
        .await
        .unwrap();
        assert!(!second.changed);
        assert_eq!(second.transaction, first.transaction);
    }

    #[tokio::test]
    async fn test_still_processing_never_mutates() {
        let store = InMemoryTransactionStore::new();
        let txn = pending(&store).await;

        let result = apply(&store, txn.clone(), &ProviderResult::new(1032, "In progress"))
            .await
            .unwrap();
        assert!(!result.changed);

        let stored = store.find_by_id(txn.id).await.unwrap().unwrap();
        assert_eq!(stored, txn);
    }

    #[tokio::test]
    async fn test_stale_snapshot_returns_winner() {
        let store = InMemoryTransactionStore::new();
        let snapshot = pending(&store).await;

        apply(
            &store,
            snapshot.clone(),
            &ProviderResult::new(0, "Processed").with_receipt(Some("NLJ7RT61SV".into())),
        )
        .await
        .unwrap();

        // The poller still holds the pending snapshot from before the callback.
        let late = apply(&store, snapshot, &ProviderResult::new(1, "Failed"))
            .await
            .unwrap();
        assert!(!late.changed);
        assert_eq!(late.transaction.status, TransactionStatus::Success);
        assert_eq!(
            late.transaction.mpesa_receipt_number.as_deref(),
            Some("NLJ7RT61SV")
        );
    }

    #[tokio::test]
    async fn test_concurrent_results_have_one_winner() {
        let store = Arc::new(InMemoryTransactionStore::new());
        let txn = pending(&store).await;

        let success = {
            let store = store.clone();
            let txn = txn.clone();
            tokio::spawn(async move {
                apply(store.as_ref(), txn, &ProviderResult::new(0, "Processed")).await
            })
        };
        let failure = {
            let store = store.clone();
            let txn = txn.clone();
            tokio::spawn(async move {
                apply(store.as_ref(), txn, &ProviderResult::new(1, "Failed")).await
            })
        };

        let a = success.await.unwrap().unwrap();
        let b = failure.await.unwrap().unwrap();

        assert!(a.changed ^ b.changed);
        assert_eq!(a.transaction, b.transaction);
        assert!(a.transaction.status.is_terminal());
    }
}
