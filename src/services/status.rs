//! Server-side status query
//!
//! Asks the gateway for the result of a push and reconciles it the same way
//! a callback would. Settled transactions are answered from the store.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::database::{Transaction, TransactionStatus, TransactionStore};
use crate::error::{AppError, AppResult};
use crate::payments::PaymentGateway;
use crate::services::reconciliation::{self, ProviderResult};
use crate::workers::status_poller::{StatusSnapshot, StatusSource};

pub const MISSING_CHECKOUT_ID_MESSAGE: &str = "Checkout request ID is required";

/// Current view of a transaction after a status query
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub status: TransactionStatus,
    /// Stored result once settled, otherwise the gateway's latest answer
    pub result_code: Option<String>,
    pub result_desc: Option<String>,
    pub mpesa_receipt_number: Option<String>,
    pub transaction: Transaction,
}

impl StatusReport {
    fn settled(transaction: Transaction) -> Self {
        Self {
            status: transaction.status,
            result_code: transaction.result_code.clone(),
            result_desc: transaction.result_desc.clone(),
            mpesa_receipt_number: transaction.mpesa_receipt_number.clone(),
            transaction,
        }
    }
}

pub struct StatusService {
    store: Arc<dyn TransactionStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl StatusService {
    pub fn new(store: Arc<dyn TransactionStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { store, gateway }
    }

    pub async fn query_status(&self, checkout_request_id: &str) -> AppResult<StatusReport> {
        let checkout_request_id = checkout_request_id.trim();
        if checkout_request_id.is_empty() {
            return Err(AppError::validation(MISSING_CHECKOUT_ID_MESSAGE));
        }

        let transaction = self
            .store
            .find_by_checkout_request_id(checkout_request_id)
            .await?
            .ok_or_else(|| {
                warn!("Status query for unknown checkout request {}", checkout_request_id);
                AppError::transaction_not_found(checkout_request_id)
            })?;

        if transaction.status.is_terminal() {
            debug!(
                transaction_id = %transaction.id,
                "Answering status query from store"
            );
            return Ok(StatusReport::settled(transaction));
        }

        let response = self
            .gateway
            .stk_query(checkout_request_id)
            .await
            .map_err(|e| {
                error!(
                    transaction_id = %transaction.id,
                    "STK query failed: {}", e
                );
                e
            })?;

        let Some(raw_code) = response.result_code.clone() else {
            debug!(
                transaction_id = %transaction.id,
                "Gateway has no result yet: {}",
                response.response_description
            );
            return Ok(StatusReport {
                status: transaction.status,
                result_code: None,
                result_desc: response.result_desc,
                mpesa_receipt_number: None,
                transaction,
            });
        };

        let code = raw_code.trim().parse::<i64>().map_err(|_| {
            AppError::gateway_unavailable(format!("Unexpected ResultCode '{}'", raw_code))
        })?;
        let description = response.result_desc.clone().unwrap_or_default();

        let reconciled = reconciliation::apply(
            self.store.as_ref(),
            transaction,
            &ProviderResult::new(code, description.clone()),
        )
        .await?;

        if reconciled.transaction.status.is_terminal() {
            return Ok(StatusReport::settled(reconciled.transaction));
        }

        Ok(StatusReport {
            status: reconciled.transaction.status,
            result_code: Some(raw_code),
            result_desc: Some(description),
            mpesa_receipt_number: None,
            transaction: reconciled.transaction,
        })
    }
}

impl From<StatusReport> for StatusSnapshot {
    fn from(report: StatusReport) -> Self {
        Self {
            status: report.status,
            result_desc: report.result_desc,
            mpesa_receipt_number: report.mpesa_receipt_number,
        }
    }
}

/// Lets the poller run in-process against the service directly
#[async_trait]
impl StatusSource for StatusService {
    async fn check(&self, checkout_request_id: &str) -> anyhow::Result<StatusSnapshot> {
        Ok(self.query_status(checkout_request_id).await?.into())
    }
}
