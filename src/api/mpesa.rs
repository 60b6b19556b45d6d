//! Checkout endpoints

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use tracing::info;
use uuid::Uuid;

use crate::api::models::{QueryReply, QueryRequest, StkPushReply, TransactionReply};
use crate::api::AppState;
use crate::error::{AppError, AppResult};
use crate::services::callback::{CallbackAck, SIGNATURE_HEADER};
use crate::services::initiation::InitiatePayment;
use crate::services::status::MISSING_CHECKOUT_ID_MESSAGE;

pub fn mpesa_routes() -> Router<AppState> {
    Router::new()
        .route("/stk-push", post(initiate_stk_push))
        .route("/callback", post(mpesa_callback))
        .route("/query", post(query_status))
        .route("/transactions/:id", get(get_transaction))
}

pub async fn initiate_stk_push(
    State(state): State<AppState>,
    payload: Result<Json<InitiatePayment>, JsonRejection>,
) -> AppResult<Json<StkPushReply>> {
    let Json(request) = payload?;

    let initiated = state.initiation.initiate(request).await?;

    Ok(Json(StkPushReply {
        success: true,
        message: initiated.customer_message.clone(),
        checkout_request_id: initiated.checkout_request_id.clone(),
        transaction_id: initiated.transaction_id(),
    }))
}

/// Raw body so the signature can be checked over the exact bytes received
pub async fn mpesa_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<CallbackAck>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let ack = state.callbacks.handle(&body, signature).await?;
    Ok(Json(ack))
}

pub async fn query_status(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> AppResult<Json<QueryReply>> {
    let Json(request) = payload?;
    let checkout_request_id = request
        .checkout_request_id
        .ok_or_else(|| AppError::validation(MISSING_CHECKOUT_ID_MESSAGE))?;

    let report = state.status.query_status(&checkout_request_id).await?;
    info!(
        "Status query for {}: {}",
        checkout_request_id, report.status
    );

    Ok(Json(QueryReply {
        success: true,
        status: report.status,
        result_code: report.result_code,
        result_desc: report.result_desc,
        mpesa_receipt_number: report.mpesa_receipt_number,
        transaction: report.transaction,
    }))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<TransactionReply>> {
    let transaction = match Uuid::parse_str(&id) {
        Ok(uuid) => state.store.find_by_id(uuid).await?,
        Err(_) => None,
    }
    .ok_or_else(|| AppError::transaction_not_found(id))?;

    Ok(Json(TransactionReply {
        success: true,
        transaction,
    }))
}
