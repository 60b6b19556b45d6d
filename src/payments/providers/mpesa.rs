//! M-Pesa (Daraja) STK push gateway
//!
//! Handles the OAuth client-credentials exchange, request signing and the two
//! STK endpoints: push (`processrequest`) and status query (`query`).

use crate::error::{AppError, AppResult};
use crate::payments::traits::PaymentGateway;
use crate::payments::types::{StkPushRequest, StkPushResponse, StkQueryResponse};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as base64, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

#[cfg(feature = "cache")]
use crate::cache::TokenCache;
#[cfg(feature = "cache")]
use std::sync::Arc;

const SANDBOX_BASE_URL: &str = "https://sandbox.safaricom.co.ke";
const PRODUCTION_BASE_URL: &str = "https://api.safaricom.co.ke";

/// Public Daraja sandbox credentials
pub const SANDBOX_SHORT_CODE: &str = "174379";
pub const SANDBOX_PASSKEY: &str = "bfb279f9aa9bdbcf158e97dd71a467cd2e0c893059b10f78e6b72ada1ed2c919";

const TRANSACTION_TYPE: &str = "CustomerPayBillOnline";

/// Tokens are refreshed this long before the provider says they expire
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3599;

/// Daraja expects timestamps in East Africa Time (UTC+3)
const EAT_OFFSET_HOURS: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpesaEnvironment {
    Sandbox,
    Production,
    /// In-process gateway, no network calls
    Simulated,
}

impl MpesaEnvironment {
    pub fn as_str(&self) -> &'static str {
        match self {
            MpesaEnvironment::Sandbox => "sandbox",
            MpesaEnvironment::Production => "production",
            MpesaEnvironment::Simulated => "simulated",
        }
    }
}

impl fmt::Display for MpesaEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MpesaEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Ok(MpesaEnvironment::Sandbox),
            "production" => Ok(MpesaEnvironment::Production),
            "simulated" => Ok(MpesaEnvironment::Simulated),
            other => Err(format!(
                "MPESA_ENVIRONMENT must be 'sandbox', 'production' or 'simulated', got {}",
                other
            )),
        }
    }
}

/// M-Pesa gateway configuration
#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub business_short_code: String,
    pub passkey: String,
    /// Where the provider posts the asynchronous result
    pub callback_url: String,
    pub environment: MpesaEnvironment,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Fixed account reference shown to the payer
    pub account_reference: String,
    /// When set, callbacks must carry a matching HMAC signature
    pub callback_secret: Option<String>,
    /// Overrides the environment's base URL (used against mock servers)
    pub base_url_override: Option<String>,
}

impl Default for MpesaConfig {
    fn default() -> Self {
        Self {
            consumer_key: String::new(),
            consumer_secret: String::new(),
            business_short_code: SANDBOX_SHORT_CODE.to_string(),
            passkey: SANDBOX_PASSKEY.to_string(),
            callback_url: "http://localhost:3000/api/mpesa/callback".to_string(),
            environment: MpesaEnvironment::Sandbox,
            timeout_secs: 30,
            account_reference: "Online Payment".to_string(),
            callback_secret: None,
            base_url_override: None,
        }
    }
}

impl MpesaConfig {
    pub fn base_url(&self) -> &str {
        if let Some(url) = &self.base_url_override {
            return url.trim_end_matches('/');
        }
        match self.environment {
            MpesaEnvironment::Production => PRODUCTION_BASE_URL,
            MpesaEnvironment::Sandbox | MpesaEnvironment::Simulated => SANDBOX_BASE_URL,
        }
    }

    pub fn transaction_description(&self) -> String {
        format!("Payment for {}", self.account_reference)
    }
}

/// `YYYYMMDDHHmmss` in East Africa Time
pub fn generate_timestamp(now: DateTime<Utc>) -> String {
    (now + chrono::Duration::hours(EAT_OFFSET_HOURS))
        .format("%Y%m%d%H%M%S")
        .to_string()
}

/// `base64(shortcode + passkey + timestamp)`
pub fn generate_password(business_short_code: &str, passkey: &str, timestamp: &str) -> String {
    base64.encode(format!("{}{}{}", business_short_code, passkey, timestamp))
}

/// OAuth token together with the instant it stops being usable
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) > now
    }
}

/// M-Pesa STK push gateway
pub struct MpesaGateway {
    config: MpesaConfig,
    client: Client,
    token: RwLock<Option<CachedToken>>,
    #[cfg(feature = "cache")]
    shared_tokens: Option<Arc<dyn TokenCache>>,
}

impl MpesaGateway {
    /// Create a new gateway instance
    pub fn new(config: MpesaConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            token: RwLock::new(None),
            #[cfg(feature = "cache")]
            shared_tokens: None,
        })
    }

    /// Share access tokens with other instances through the cache
    #[cfg(feature = "cache")]
    pub fn with_shared_token_cache(mut self, cache: Arc<dyn TokenCache>) -> Self {
        self.shared_tokens = Some(cache);
        self
    }

    pub fn config(&self) -> &MpesaConfig {
        &self.config
    }

    /// Get a bearer token, reusing a cached one while it is fresh
    pub async fn access_token(&self) -> AppResult<String> {
        let now = Utc::now();

        if let Some(token) = self.token.read().await.as_ref() {
            if token.is_fresh(now) {
                debug!("Using cached access token");
                return Ok(token.access_token.clone());
            }
        }

        if let Some(token) = self.load_shared_token(now).await {
            debug!("Using shared access token");
            let access_token = token.access_token.clone();
            *self.token.write().await = Some(token);
            return Ok(access_token);
        }

        let token = self.fetch_access_token().await?;
        let access_token = token.access_token.clone();
        self.store_shared_token(&token).await;

        *self.token.write().await = Some(token);
        Ok(access_token)
    }

    #[cfg(feature = "cache")]
    async fn load_shared_token(&self, now: DateTime<Utc>) -> Option<CachedToken> {
        let shared = self.shared_tokens.as_ref()?;
        match shared.load(&self.config.business_short_code).await {
            Ok(token) => token.filter(|t| t.is_fresh(now)),
            Err(e) => {
                warn!("Shared token cache unavailable: {}", e);
                None
            }
        }
    }

    #[cfg(not(feature = "cache"))]
    async fn load_shared_token(&self, _now: DateTime<Utc>) -> Option<CachedToken> {
        None
    }

    #[cfg(feature = "cache")]
    async fn store_shared_token(&self, token: &CachedToken) {
        let Some(shared) = &self.shared_tokens else {
            return;
        };
        if let Err(e) = shared.store(&self.config.business_short_code, token).await {
            warn!("Failed to share access token: {}", e);
        }
    }

    #[cfg(not(feature = "cache"))]
    async fn store_shared_token(&self, _token: &CachedToken) {}

    /// Forget a token the provider answered 401 to, here and in the shared cache
    async fn discard_token(&self, rejected: &str) {
        {
            let mut token = self.token.write().await;
            if token.as_ref().is_some_and(|t| t.access_token == rejected) {
                *token = None;
            }
        }
        self.invalidate_shared_token().await;
    }

    #[cfg(feature = "cache")]
    async fn invalidate_shared_token(&self) {
        let Some(shared) = &self.shared_tokens else {
            return;
        };
        if let Err(e) = shared.invalidate(&self.config.business_short_code).await {
            warn!("Failed to drop shared access token: {}", e);
        }
    }

    #[cfg(not(feature = "cache"))]
    async fn invalidate_shared_token(&self) {}

    async fn fetch_access_token(&self) -> AppResult<CachedToken> {
        info!("Requesting new M-Pesa access token");

        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.config.base_url()
        );
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Failed to get access token: {} - {}", status, body);
            return Err(AppError::gateway_unavailable(format!(
                "M-Pesa auth failed: {}",
                status
            )));
        }

        let auth: AuthResponse = response.json().await.map_err(|e| {
            AppError::gateway_unavailable(format!("Invalid auth response: {}", e))
        })?;

        let lifetime = match auth.expires_in {
            Some(serde_json::Value::String(s)) => s.trim().parse::<i64>().ok(),
            Some(serde_json::Value::Number(n)) => n.as_i64(),
            _ => None,
        }
        .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);

        info!("Access token obtained, valid for {}s", lifetime);
        Ok(CachedToken {
            access_token: auth.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(lifetime),
        })
    }

    /// POST a signed request and decode the gateway's JSON reply
    async fn post_signed<B, R>(&self, operation: &str, path: &str, body: &B) -> AppResult<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned + Send,
    {
        let access_token = self.access_token().await?;
        let url = format!("{}{}", self.config.base_url(), path);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&access_token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if status == reqwest::StatusCode::UNAUTHORIZED {
            warn!("{} rejected the access token, fetching a new one next time", operation);
            self.discard_token(&access_token).await;
        }

        if !status.is_success() {
            error!("{} failed: {} - {}", operation, status, text);
            return Err(AppError::gateway_unavailable(format!(
                "{} failed: {}",
                operation, status
            )));
        }

        serde_json::from_str(&text).map_err(|e| {
            error!("Failed to parse {} response: {}", operation, e);
            AppError::gateway_unavailable(format!("Invalid {} response: {}", operation, e))
        })
    }

    fn sign(&self) -> (String, String) {
        let timestamp = generate_timestamp(Utc::now());
        let password = generate_password(
            &self.config.business_short_code,
            &self.config.passkey,
            &timestamp,
        );
        (timestamp, password)
    }
}

#[async_trait]
impl PaymentGateway for MpesaGateway {
    fn name(&self) -> &'static str {
        "mpesa"
    }

    async fn stk_push(&self, request: StkPushRequest) -> AppResult<StkPushResponse> {
        info!(
            "STK push: phone={}, amount={}, reference={}",
            request.phone_number, request.amount, request.account_reference
        );

        let (timestamp, password) = self.sign();
        let payload = StkPushPayload {
            business_short_code: &self.config.business_short_code,
            password,
            timestamp,
            transaction_type: TRANSACTION_TYPE,
            amount: request.amount,
            party_a: &request.phone_number,
            party_b: &self.config.business_short_code,
            phone_number: &request.phone_number,
            callback_url: &self.config.callback_url,
            account_reference: &request.account_reference,
            transaction_desc: &request.transaction_desc,
        };

        let response: StkPushResponse = self
            .post_signed("STK push", "/mpesa/stkpush/v1/processrequest", &payload)
            .await?;

        info!(
            "STK push acknowledged: code={}, checkout_request_id={}",
            response.response_code, response.checkout_request_id
        );
        Ok(response)
    }

    async fn stk_query(&self, checkout_request_id: &str) -> AppResult<StkQueryResponse> {
        debug!("STK query: checkout_request_id={}", checkout_request_id);

        let (timestamp, password) = self.sign();
        let payload = StkQueryPayload {
            business_short_code: &self.config.business_short_code,
            password,
            timestamp,
            checkout_request_id,
        };

        self.post_signed("STK query", "/mpesa/stkpushquery/v1/query", &payload)
            .await
    }
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: String,
    // "3599" in practice, but not guaranteed to be quoted
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushPayload<'a> {
    business_short_code: &'a str,
    password: String,
    timestamp: String,
    transaction_type: &'a str,
    amount: u64,
    party_a: &'a str,
    party_b: &'a str,
    phone_number: &'a str,
    #[serde(rename = "CallBackURL")]
    callback_url: &'a str,
    account_reference: &'a str,
    transaction_desc: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkQueryPayload<'a> {
    business_short_code: &'a str,
    password: String,
    timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_password_matches_daraja_sample() {
        let password = generate_password(SANDBOX_SHORT_CODE, SANDBOX_PASSKEY, "20160216165627");
        assert_eq!(
            password,
            "MTc0Mzc5YmZiMjc5ZjlhYTliZGJjZjE1OGU5N2RkNzFhNDY3Y2QyZTBjODkzMDU5YjEwZjc4ZTZiNzJhZGExZWQyYzkxOTIwMTYwMjE2MTY1NjI3"
        );
    }

    #[test]
    fn test_timestamp_is_east_africa_time() {
        let now = Utc.with_ymd_and_hms(2024, 12, 31, 22, 5, 9).unwrap();
        assert_eq!(generate_timestamp(now), "20250101010509");
    }

    #[test]
    fn test_base_url_by_environment() {
        let mut config = MpesaConfig::default();
        assert_eq!(config.base_url(), SANDBOX_BASE_URL);

        config.environment = MpesaEnvironment::Production;
        assert_eq!(config.base_url(), PRODUCTION_BASE_URL);

        config.base_url_override = Some("http://127.0.0.1:9999/".to_string());
        assert_eq!(config.base_url(), "http://127.0.0.1:9999");
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("Sandbox".parse(), Ok(MpesaEnvironment::Sandbox));
        assert_eq!("production".parse(), Ok(MpesaEnvironment::Production));
        assert_eq!("simulated".parse(), Ok(MpesaEnvironment::Simulated));
        assert!("staging".parse::<MpesaEnvironment>().is_err());
    }

    #[test]
    fn test_push_payload_field_names() {
        let payload = StkPushPayload {
            business_short_code: "174379",
            password: "pw".to_string(),
            timestamp: "20250101010509".to_string(),
            transaction_type: TRANSACTION_TYPE,
            amount: 500,
            party_a: "254712345678",
            party_b: "174379",
            phone_number: "254712345678",
            callback_url: "https://example.com/api/mpesa/callback",
            account_reference: "Online Payment",
            transaction_desc: "Payment for Online Payment",
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["BusinessShortCode"], "174379");
        assert_eq!(json["TransactionType"], "CustomerPayBillOnline");
        assert_eq!(json["Amount"], 500);
        assert_eq!(json["PartyA"], "254712345678");
        assert_eq!(json["PartyB"], "174379");
        assert_eq!(json["CallBackURL"], "https://example.com/api/mpesa/callback");
        assert_eq!(json["AccountReference"], "Online Payment");
    }

    #[test]
    fn test_query_payload_field_names() {
        let payload = StkQueryPayload {
            business_short_code: "174379",
            password: "pw".to_string(),
            timestamp: "20250101010509".to_string(),
            checkout_request_id: "ws_CO_1",
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["CheckoutRequestID"], "ws_CO_1");
        assert_eq!(json["Timestamp"], "20250101010509");
    }

    #[test]
    fn test_token_freshness_respects_refresh_margin() {
        let now = Utc::now();
        let fresh = CachedToken {
            access_token: "t".to_string(),
            expires_at: now + chrono::Duration::seconds(3599),
        };
        let stale = CachedToken {
            access_token: "t".to_string(),
            expires_at: now + chrono::Duration::seconds(30),
        };
        assert!(fresh.is_fresh(now));
        assert!(!stale.is_fresh(now));
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_unavailable() {
        let config = MpesaConfig {
            consumer_key: "key".to_string(),
            consumer_secret: "secret".to_string(),
            base_url_override: Some("http://127.0.0.1:9".to_string()),
            timeout_secs: 2,
            ..Default::default()
        };
        let gateway = MpesaGateway::new(config).unwrap();

        let err = gateway.stk_query("ws_CO_1").await.unwrap_err();
        assert!(matches!(err, AppError::GatewayUnavailable(_)));
    }
}
