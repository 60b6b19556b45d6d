//! Request and response bodies of the checkout API
//!
//! Shared by the handlers and by `CheckoutClient`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::{Transaction, TransactionStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StkPushReply {
    pub success: bool,
    pub message: String,
    pub checkout_request_id: String,
    pub transaction_id: Uuid,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    #[serde(default)]
    pub checkout_request_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryReply {
    pub success: bool,
    pub status: TransactionStatus,
    pub result_code: Option<String>,
    pub result_desc: Option<String>,
    pub mpesa_receipt_number: Option<String>,
    pub transaction: Transaction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionReply {
    pub success: bool,
    pub transaction: Transaction,
}

/// Body of every non-2xx reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReply {
    #[serde(default)]
    pub success: bool,
    pub error: String,
}
