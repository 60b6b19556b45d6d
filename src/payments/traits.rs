//! Payment gateway trait definitions
//!
//! Defines the interface the checkout core uses to talk to the push-payment
//! provider.

use crate::error::AppResult;
use crate::payments::types::{StkPushRequest, StkPushResponse, StkQueryResponse};
use async_trait::async_trait;

/// Trait for push-payment gateway implementations
///
/// Transport and authentication failures are reported as
/// `AppError::GatewayUnavailable`. A response the gateway did return, even a
/// refusal, is passed through for the caller to interpret.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Short provider name for logs and health output
    fn name(&self) -> &'static str;

    /// Prompt the payer's handset to authorize a debit
    ///
    /// # Returns
    /// * `StkPushResponse` - Synchronous acknowledgement carrying the
    ///   correlation ids; not the final payment result
    async fn stk_push(&self, request: StkPushRequest) -> AppResult<StkPushResponse>;

    /// Ask the gateway for the current result of an earlier push
    ///
    /// # Arguments
    /// * `checkout_request_id` - Correlation id returned by `stk_push`
    async fn stk_query(&self, checkout_request_id: &str) -> AppResult<StkQueryResponse>;
}
