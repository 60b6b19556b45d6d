//! HTTP surface
//!
//! `/health` plus the checkout endpoints nested under `/api/mpesa`.

pub mod health;
pub mod models;
pub mod mpesa;

use axum::{extract::Request, routing::get, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info_span;

use crate::database::TransactionStore;
use crate::payments::PaymentGateway;
use crate::services::{CallbackHandler, InitiationHandler, StatusService};

#[derive(Clone)]
pub struct AppState {
    pub environment: String,
    pub store: Arc<dyn TransactionStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub initiation: Arc<InitiationHandler>,
    pub callbacks: Arc<CallbackHandler>,
    pub status: Arc<StatusService>,
}

impl AppState {
    pub fn new(
        environment: impl Into<String>,
        store: Arc<dyn TransactionStore>,
        gateway: Arc<dyn PaymentGateway>,
        account_reference: &str,
        callback_secret: Option<String>,
    ) -> Self {
        Self {
            environment: environment.into(),
            initiation: Arc::new(InitiationHandler::new(
                store.clone(),
                gateway.clone(),
                account_reference,
            )),
            callbacks: Arc::new(CallbackHandler::new(store.clone(), callback_secret)),
            status: Arc::new(StatusService::new(store.clone(), gateway.clone())),
            store,
            gateway,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let request_tracing = TraceLayer::new_for_http().make_span_with(|request: &Request| {
        let request_id = request
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");
        info_span!(
            "http_request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    });

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api/mpesa", mpesa::mpesa_routes())
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(request_tracing)
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .with_state(state)
}
