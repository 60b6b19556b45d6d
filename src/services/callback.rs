//! Provider callback handling
//!
//! Decodes the STK result envelope, optionally checks its HMAC signature,
//! and reconciles the result against the matching transaction.

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::database::TransactionStore;
use crate::error::{AppError, AppResult};
use crate::payments::types::StkCallbackEnvelope;
use crate::services::reconciliation::{self, ProviderResult, Reconciled};

/// Header carrying the hex HMAC-SHA256 of the raw callback body
pub const SIGNATURE_HEADER: &str = "x-callback-signature";

type HmacSha256 = Hmac<Sha256>;

/// Fixed acknowledgement the provider expects
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallbackAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: &'static str,
}

impl CallbackAck {
    pub fn accepted() -> Self {
        Self {
            result_code: 0,
            result_desc: "Accepted",
        }
    }
}

pub struct CallbackHandler {
    store: Arc<dyn TransactionStore>,
    secret: Option<String>,
}

impl CallbackHandler {
    pub fn new(store: Arc<dyn TransactionStore>, secret: Option<String>) -> Self {
        Self { store, secret }
    }

    /// Process one callback delivery.
    ///
    /// Redeliveries and callbacks arriving after a poll already settled the
    /// transaction are acknowledged without changing anything.
    pub async fn handle(&self, body: &[u8], signature: Option<&str>) -> AppResult<CallbackAck> {
        if let Some(secret) = &self.secret {
            verify_signature(body, signature, secret)?;
        }

        debug!("M-Pesa callback received: {}", String::from_utf8_lossy(body));

        let reconciled = self.reconcile(body).await?;
        if reconciled.changed {
            info!(
                transaction_id = %reconciled.transaction.id,
                status = %reconciled.transaction.status,
                "Callback settled transaction"
            );
        }

        Ok(CallbackAck::accepted())
    }

    async fn reconcile(&self, body: &[u8]) -> AppResult<Reconciled> {
        let envelope: StkCallbackEnvelope = serde_json::from_slice(body).map_err(|e| {
            warn!("Rejecting malformed callback: {}", e);
            AppError::malformed_callback(e.to_string())
        })?;
        let callback = envelope.body.stk_callback;

        let transaction = self
            .store
            .find_by_checkout_request_id(&callback.checkout_request_id)
            .await?
            .ok_or_else(|| {
                warn!(
                    "Callback for unknown checkout request {}",
                    callback.checkout_request_id
                );
                AppError::transaction_not_found(callback.checkout_request_id.clone())
            })?;

        let result = ProviderResult::new(callback.result_code, callback.result_desc.clone())
            .with_receipt(callback.receipt_number());

        reconciliation::apply(self.store.as_ref(), transaction, &result).await
    }
}

fn verify_signature(body: &[u8], signature: Option<&str>, secret: &str) -> AppResult<()> {
    let provided = signature
        .and_then(|s| hex::decode(s.trim()).ok())
        .ok_or_else(|| {
            warn!("Callback rejected: missing or unreadable signature");
            AppError::Unauthorized
        })?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Configuration(format!("Invalid callback secret: {}", e)))?;
    mac.update(body);

    mac.verify_slice(&provided).map_err(|_| {
        warn!("Callback rejected: signature mismatch");
        AppError::Unauthorized
    })
}

/// Hex HMAC-SHA256 of `body`, as a provider or test harness would send it
pub fn sign_body(body: &[u8], secret: &str) -> AppResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Configuration(format!("Invalid callback secret: {}", e)))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}
