//! End-to-end checkout over HTTP with the in-memory store and simulated gateway

mod common;

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use stkpay::api::{self, AppState};
use stkpay::client::{CheckoutClient, ClientError};
use stkpay::database::{InMemoryTransactionStore, TransactionStatus, TransactionStore};
use stkpay::payments::providers::{ScriptedQuery, SimulatedGateway};
use stkpay::workers::status_poller::{PollOutcome, PollerConfig, StatusPoller, TIMEOUT_MESSAGE};

struct Harness {
    base_url: String,
    client: CheckoutClient,
    store: Arc<InMemoryTransactionStore>,
    gateway: Arc<SimulatedGateway>,
}

async fn start() -> Harness {
    let store = Arc::new(InMemoryTransactionStore::new());
    let gateway = Arc::new(SimulatedGateway::new());
    let state = AppState::new(
        "development",
        store.clone(),
        gateway.clone(),
        "Online Payment",
        None,
    );
    let addr = common::serve(api::router(state)).await;
    let base_url = format!("http://{}", addr);

    Harness {
        client: CheckoutClient::new(base_url.clone()).unwrap(),
        base_url,
        store,
        gateway,
    }
}

fn fast_poller(max_attempts: u32) -> PollerConfig {
    PollerConfig {
        initial_delay: Duration::from_millis(10),
        interval: Duration::from_millis(10),
        max_attempts,
    }
}

async fn post_callback(h: &Harness, checkout_id: &str, code: i64, receipt: Option<&str>) -> Value {
    let mut stk_callback = json!({
        "MerchantRequestID": "29115-34620561-1",
        "CheckoutRequestID": checkout_id,
        "ResultCode": code,
        "ResultDesc": if code == 0 { "The service request is processed successfully." } else { "Request cancelled by user" },
    });
    if let Some(receipt) = receipt {
        stk_callback["CallbackMetadata"] = json!({
            "Item": [
                { "Name": "Amount", "Value": 500.0 },
                { "Name": "MpesaReceiptNumber", "Value": receipt },
                { "Name": "TransactionDate", "Value": 20191219102115u64 },
                { "Name": "PhoneNumber", "Value": 254712345678u64 }
            ]
        });
    }

    let response = reqwest::Client::new()
        .post(format!("{}/api/mpesa/callback", h.base_url))
        .json(&json!({ "Body": { "stkCallback": stk_callback } }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    response.json().await.unwrap()
}

#[tokio::test]
async fn test_initiate_then_callback_success() {
    let h = start().await;

    let reply = h.client.initiate("0712345678", "500").await.unwrap();
    assert!(reply.success);

    let stored = h.store.find_by_id(reply.transaction_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Pending);
    assert_eq!(stored.phone_number, "254712345678");
    assert_eq!(
        stored.checkout_request_id.as_deref(),
        Some(reply.checkout_request_id.as_str())
    );

    let ack = post_callback(&h, &reply.checkout_request_id, 0, Some("NLJ7RT61SV")).await;
    assert_eq!(ack, json!({ "ResultCode": 0, "ResultDesc": "Accepted" }));

    let query = h.client.query(&reply.checkout_request_id).await.unwrap();
    assert_eq!(query.status, TransactionStatus::Success);
    assert_eq!(query.mpesa_receipt_number.as_deref(), Some("NLJ7RT61SV"));

    let lookup = h.client.transaction(reply.transaction_id).await.unwrap();
    assert_eq!(lookup.transaction.status, TransactionStatus::Success);
}

#[tokio::test]
async fn test_callback_failure_then_poller_reports_it() {
    let h = start().await;
    let reply = h.client.initiate("254712345678", 100.0_f64).await.unwrap();

    post_callback(&h, &reply.checkout_request_id, 1, None).await;

    let poller = StatusPoller::new(Arc::new(h.client.clone()), fast_poller(5));
    let outcome = poller.spawn(reply.checkout_request_id.clone()).wait().await.unwrap();

    assert_eq!(
        outcome,
        PollOutcome::Failed {
            reason: Some("Request cancelled by user".to_string()),
            attempts: 1
        }
    );

    let stored = h.store.find_by_id(reply.transaction_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Failed);
    assert_eq!(stored.mpesa_receipt_number, None);
}

#[tokio::test]
async fn test_poll_timeout_leaves_transaction_pending() {
    let h = start().await;
    let reply = h.client.initiate("0712345678", "500").await.unwrap();
    let before = h.store.find_by_id(reply.transaction_id).await.unwrap().unwrap();

    let outcome = h
        .client
        .watch(reply.checkout_request_id.clone(), fast_poller(3))
        .wait()
        .await
        .unwrap();

    assert_eq!(outcome, PollOutcome::TimedOut { attempts: 3 });
    assert_eq!(outcome.user_message(), TIMEOUT_MESSAGE);
    assert_eq!(h.gateway.query_count(), 3);

    let after = h.store.find_by_id(reply.transaction_id).await.unwrap().unwrap();
    assert_eq!(after, before);
}

#[tokio::test]
async fn test_poll_settles_before_late_callback() {
    let h = start().await;
    let reply = h.client.initiate("0712345678", "500").await.unwrap();
    h.gateway
        .query_next(ScriptedQuery::result("0", "The service request is processed successfully."));

    let poller = StatusPoller::new(Arc::new(h.client.clone()), fast_poller(5));
    let outcome = poller.spawn(reply.checkout_request_id.clone()).wait().await.unwrap();
    assert_eq!(
        outcome,
        PollOutcome::Succeeded {
            mpesa_receipt_number: None,
            attempts: 1
        }
    );

    // A late failure callback is acknowledged but cannot overturn the result.
    post_callback(&h, &reply.checkout_request_id, 1, None).await;

    let stored = h.store.find_by_id(reply.transaction_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Success);
    assert_eq!(stored.result_code.as_deref(), Some("0"));
    assert_eq!(stored.mpesa_receipt_number, None);
}

#[tokio::test]
async fn test_concurrent_callback_and_poll_agree() {
    let h = start().await;
    let reply = h.client.initiate("0712345678", "500").await.unwrap();
    h.gateway
        .query_next(ScriptedQuery::result("2001", "The initiator information is invalid."));

    let checkout_id = reply.checkout_request_id.clone();
    let (_, query) = tokio::join!(
        post_callback(&h, &checkout_id, 0, Some("NLJ7RT61SV")),
        h.client.query(&checkout_id),
    );
    let query = query.unwrap();

    let stored = h.store.find_by_id(reply.transaction_id).await.unwrap().unwrap();
    assert!(stored.status.is_terminal());
    assert_eq!(query.status, stored.status);
    assert_eq!(query.transaction, stored);
}

#[tokio::test]
async fn test_validation_errors_reach_client() {
    let h = start().await;

    let err = h.client.initiate("0812345678", "500").await.unwrap_err();
    assert!(matches!(err, ClientError::Api { status: 400, .. }));

    let err = h.client.initiate("0712345678", "0").await.unwrap_err();
    assert_eq!(err.user_message(), "Amount must be between KES 1 and KES 70,000");

    let err = h.client.query("ws_CO_unknown").await.unwrap_err();
    assert!(matches!(err, ClientError::Api { status: 404, .. }));
    assert_eq!(err.user_message(), "Transaction not found");

    assert!(h.store.is_empty().await);
}
