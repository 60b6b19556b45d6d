//! Push initiation: validate, record, push, correlate

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::{NewTransaction, ResultUpdate, Transaction, TransactionStatus, TransactionStore};
use crate::error::{AppError, AppResult};
use crate::payments::types::StkPushRequest;
use crate::payments::PaymentGateway;
use crate::services::validation::{self, AmountInput, MISSING_FIELDS_MESSAGE};

/// Fallback shown when the gateway declines without a customer message
pub const REJECTION_FALLBACK_MESSAGE: &str = "Failed to initiate payment";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePayment {
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub amount: Option<AmountInput>,
}

#[derive(Debug, Clone)]
pub struct Initiated {
    pub transaction: Transaction,
    pub checkout_request_id: String,
    pub customer_message: String,
}

impl Initiated {
    pub fn transaction_id(&self) -> Uuid {
        self.transaction.id
    }
}

pub struct InitiationHandler {
    store: Arc<dyn TransactionStore>,
    gateway: Arc<dyn PaymentGateway>,
    account_reference: String,
    transaction_desc: String,
}

impl InitiationHandler {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        gateway: Arc<dyn PaymentGateway>,
        account_reference: impl Into<String>,
    ) -> Self {
        let account_reference = account_reference.into();
        let transaction_desc = format!("Payment for {}", account_reference);
        Self {
            store,
            gateway,
            account_reference,
            transaction_desc,
        }
    }

    /// Start a push payment.
    ///
    /// Invalid input is rejected before anything is stored. A gateway outage
    /// leaves the new record `pending` without correlation ids.
    pub async fn initiate(&self, input: InitiatePayment) -> AppResult<Initiated> {
        let (raw_phone, raw_amount) = match (&input.phone_number, &input.amount) {
            (Some(phone), Some(amount)) if !phone.trim().is_empty() && !is_blank(amount) => {
                (phone, amount)
            }
            _ => return Err(AppError::validation(MISSING_FIELDS_MESSAGE)),
        };

        let phone_number = validation::normalize_phone(raw_phone)?;
        let amount = validation::parse_amount(raw_amount)?;

        let transaction = self
            .store
            .create(NewTransaction {
                phone_number: phone_number.clone(),
                amount,
                reference: self.account_reference.clone(),
            })
            .await?;

        info!(
            transaction_id = %transaction.id,
            "Initiating STK push: phone={}, amount={}",
            phone_number, amount
        );

        let response = self
            .gateway
            .stk_push(StkPushRequest {
                phone_number,
                amount: validation::gateway_amount(amount),
                account_reference: self.account_reference.clone(),
                transaction_desc: self.transaction_desc.clone(),
            })
            .await
            .map_err(|e| {
                error!(transaction_id = %transaction.id, "STK push failed: {}", e);
                e
            })?;

        if !response.is_accepted() {
            warn!(
                transaction_id = %transaction.id,
                "STK push rejected: code={}, description={}",
                response.response_code, response.response_description
            );

            let update = ResultUpdate {
                status: TransactionStatus::Failed,
                result_code: response.response_code.clone(),
                result_desc: response.response_description.clone(),
                mpesa_receipt_number: None,
            };
            self.store
                .apply_result_if_pending(transaction.id, &update)
                .await?;

            let message = if response.customer_message.trim().is_empty() {
                REJECTION_FALLBACK_MESSAGE.to_string()
            } else {
                response.customer_message
            };
            return Err(AppError::GatewayRejected {
                code: response.response_code,
                message,
            });
        }

        if response.checkout_request_id.trim().is_empty() {
            error!(
                transaction_id = %transaction.id,
                "STK push accepted without a CheckoutRequestID"
            );
            return Err(AppError::gateway_unavailable(
                "STK push accepted without a checkout request id",
            ));
        }

        let transaction = self
            .store
            .attach_correlation(
                transaction.id,
                &response.merchant_request_id,
                &response.checkout_request_id,
            )
            .await?;

        info!(
            transaction_id = %transaction.id,
            checkout_request_id = %response.checkout_request_id,
            "STK push accepted"
        );

        Ok(Initiated {
            transaction,
            checkout_request_id: response.checkout_request_id,
            customer_message: response.customer_message,
        })
    }
}

fn is_blank(amount: &AmountInput) -> bool {
    matches!(amount, AmountInput::Text(s) if s.trim().is_empty())
}
