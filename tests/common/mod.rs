//! Loopback servers shared by the integration tests

#![allow(dead_code)]

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const CONSUMER_KEY: &str = "test-key";
pub const CONSUMER_SECRET: &str = "test-secret";
pub const ACCESS_TOKEN: &str = "mock-access-token";

/// Serve `router` on an ephemeral loopback port
pub async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Records what the gateway client sent to a fake Daraja API
#[derive(Default)]
pub struct MockDaraja {
    pub token_requests: AtomicUsize,
    pub pushes: Mutex<Vec<Value>>,
    pub queries: Mutex<Vec<Value>>,
    pub fail_pushes: AtomicBool,
    /// Answer the next bearer call with 401, as if the token was revoked early
    pub revoke_token: AtomicBool,
}

impl MockDaraja {
    pub fn token_requests(&self) -> usize {
        self.token_requests.load(Ordering::SeqCst)
    }
}

pub async fn start_mock_daraja() -> (Arc<MockDaraja>, String) {
    let mock = Arc::new(MockDaraja::default());
    let router = Router::new()
        .route("/oauth/v1/generate", get(oauth))
        .route("/mpesa/stkpush/v1/processrequest", post(process_request))
        .route("/mpesa/stkpushquery/v1/query", post(query))
        .with_state(mock.clone());
    let addr = serve(router).await;
    (mock, format!("http://{}", addr))
}

fn authorized(mock: &MockDaraja, headers: &HeaderMap) -> bool {
    if mock.revoke_token.swap(false, Ordering::SeqCst) {
        return false;
    }
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {}", ACCESS_TOKEN))
        .unwrap_or(false)
}

async fn oauth(State(mock): State<Arc<MockDaraja>>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    let expected = format!(
        "Basic {}",
        STANDARD.encode(format!("{}:{}", CONSUMER_KEY, CONSUMER_SECRET))
    );
    let provided = headers.get("authorization").and_then(|v| v.to_str().ok());
    if provided != Some(expected.as_str()) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "errorMessage": "Invalid credentials" })));
    }

    mock.token_requests.fetch_add(1, Ordering::SeqCst);
    (
        StatusCode::OK,
        Json(json!({ "access_token": ACCESS_TOKEN, "expires_in": "3599" })),
    )
}

async fn process_request(
    State(mock): State<Arc<MockDaraja>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if !authorized(&mock, &headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "errorMessage": "Invalid Access Token" })));
    }
    if mock.fail_pushes.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "errorMessage": "Service is currently unreachable" })),
        );
    }

    let mut pushes = mock.pushes.lock().unwrap();
    pushes.push(body);
    let n = pushes.len();
    (
        StatusCode::OK,
        Json(json!({
            "MerchantRequestID": format!("29115-34620561-{}", n),
            "CheckoutRequestID": format!("ws_CO_19122019102036392{}", n),
            "ResponseCode": "0",
            "ResponseDescription": "Success. Request accepted for processing",
            "CustomerMessage": "Success. Request accepted for processing"
        })),
    )
}

async fn query(
    State(mock): State<Arc<MockDaraja>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if !authorized(&mock, &headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "errorMessage": "Invalid Access Token" })));
    }

    let checkout_id = body["CheckoutRequestID"].clone();
    mock.queries.lock().unwrap().push(body);
    (
        StatusCode::OK,
        Json(json!({
            "ResponseCode": "0",
            "ResponseDescription": "The service request has been accepted successsfully",
            "MerchantRequestID": "29115-34620561-1",
            "CheckoutRequestID": checkout_id,
            "ResultCode": "0",
            "ResultDesc": "The service request is processed successfully."
        })),
    )
}
