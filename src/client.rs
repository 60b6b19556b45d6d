//! HTTP client for the checkout API
//!
//! What a checkout front end needs: start a push, query its status, and
//! drive a `StatusPoller` against the server.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::api::models::{ErrorReply, QueryReply, QueryRequest, StkPushReply, TransactionReply};
use crate::services::initiation::InitiatePayment;
use crate::services::validation::AmountInput;
use crate::workers::status_poller::{
    PollHandle, PollerConfig, StatusPoller, StatusSnapshot, StatusSource,
};

#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with an error body
    #[error("{message} (HTTP {status})")]
    Api { status: u16, message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl ClientError {
    /// Message suitable for showing to the payer
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Api { message, .. } => message.clone(),
            ClientError::Http(_) => {
                "Network error. Please check your connection and try again.".to_string()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckoutClient {
    base_url: String,
    client: Client,
}

impl CheckoutClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub async fn initiate(
        &self,
        phone_number: impl Into<String>,
        amount: impl Into<AmountInput>,
    ) -> Result<StkPushReply, ClientError> {
        let body = InitiatePayment {
            phone_number: Some(phone_number.into()),
            amount: Some(amount.into()),
        };
        let response = self
            .client
            .post(self.url("/api/mpesa/stk-push"))
            .json(&body)
            .send()
            .await?;
        decode(response).await
    }

    pub async fn query(&self, checkout_request_id: &str) -> Result<QueryReply, ClientError> {
        let body = QueryRequest {
            checkout_request_id: Some(checkout_request_id.to_string()),
        };
        let response = self
            .client
            .post(self.url("/api/mpesa/query"))
            .json(&body)
            .send()
            .await?;
        decode(response).await
    }

    pub async fn transaction(&self, id: Uuid) -> Result<TransactionReply, ClientError> {
        let response = self
            .client
            .get(self.url(&format!("/api/mpesa/transactions/{}", id)))
            .send()
            .await?;
        decode(response).await
    }

    /// Poll `checkout_request_id` in the background until it settles
    pub fn watch(&self, checkout_request_id: impl Into<String>, config: PollerConfig) -> PollHandle {
        StatusPoller::new(Arc::new(self.clone()), config).spawn(checkout_request_id)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let message = match response.json::<ErrorReply>().await {
        Ok(reply) => reply.error,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("Request failed")
            .to_string(),
    };
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl StatusSource for CheckoutClient {
    async fn check(&self, checkout_request_id: &str) -> anyhow::Result<StatusSnapshot> {
        let reply = self.query(checkout_request_id).await?;
        Ok(StatusSnapshot {
            status: reply.status,
            result_desc: reply.result_desc,
            mpesa_receipt_number: reply.mpesa_receipt_number,
        })
    }
}
