//! Application error taxonomy
//!
//! Every failure a checkout operation can surface to a caller. The HTTP
//! mapping lives here so handlers can simply return `AppResult<T>`.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::database::error::DatabaseError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    /// Bad input; never reaches the gateway or the store
    #[error("Validation error: {0}")]
    Validation(String),

    /// The gateway synchronously declined the push
    #[error("Gateway rejected request ({code}): {message}")]
    GatewayRejected { code: String, message: String },

    /// Transport, auth or protocol failure talking to the gateway
    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Malformed callback: {0}")]
    MalformedCallback(String),

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),

    #[error("Callback signature verification failed")]
    Unauthorized,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn gateway_unavailable(msg: impl Into<String>) -> Self {
        AppError::GatewayUnavailable(msg.into())
    }

    pub fn malformed_callback(msg: impl Into<String>) -> Self {
        AppError::MalformedCallback(msg.into())
    }

    pub fn transaction_not_found(id: impl Into<String>) -> Self {
        AppError::NotFound {
            entity: "Transaction",
            id: id.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::GatewayRejected { .. } => StatusCode::BAD_REQUEST,
            AppError::MalformedCallback(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::GatewayUnavailable(_)
            | AppError::Storage(_)
            | AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Storage(err) => err.is_retryable(),
            AppError::GatewayUnavailable(_) => true,
            _ => false,
        }
    }

    /// Message safe to show to the payer
    pub fn public_message(&self) -> String {
        match self {
            AppError::Validation(msg) => msg.clone(),
            AppError::GatewayRejected { message, .. } => message.clone(),
            AppError::NotFound { entity, .. } => format!("{} not found", entity),
            AppError::MalformedCallback(_) => "Invalid callback format".to_string(),
            AppError::Unauthorized => "Invalid callback signature".to_string(),
            AppError::GatewayUnavailable(_) => {
                "Payment provider is unavailable. Please try again.".to_string()
            }
            AppError::Storage(_) | AppError::Configuration(_) => {
                "Internal server error".to_string()
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, retryable = self.is_retryable(), "Request failed");
        }

        let body = Json(json!({
            "success": false,
            "error": self.public_message(),
        }));

        (status, body).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::GatewayUnavailable(format!("Request timed out: {}", err))
        } else {
            AppError::GatewayUnavailable(format!("HTTP request failed: {}", err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::error::DatabaseErrorKind;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::validation("bad").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::GatewayRejected {
                code: "1".to_string(),
                message: "nope".to_string()
            }
            .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::transaction_not_found("ws_CO_1").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::malformed_callback("missing Body").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::gateway_unavailable("down").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_storage_errors_hide_details() {
        let err: AppError = DatabaseError::new(DatabaseErrorKind::QueryError {
            message: "relation \"transactions\" does not exist".to_string(),
        })
        .into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "Internal server error");
    }

    #[test]
    fn test_retryable_follows_storage_kind() {
        let down: AppError = DatabaseError::new(DatabaseErrorKind::ConnectionError {
            message: "connection refused".to_string(),
        })
        .into();
        assert!(down.is_retryable());

        let corrupt: AppError = DatabaseError::new(DatabaseErrorKind::CorruptRecord {
            message: "unknown status 'settled'".to_string(),
        })
        .into();
        assert!(!corrupt.is_retryable());

        assert!(AppError::gateway_unavailable("timeout").is_retryable());
        assert!(!AppError::validation("bad phone").is_retryable());
    }

    #[test]
    fn test_rejection_message_is_user_facing() {
        let err = AppError::GatewayRejected {
            code: "1".to_string(),
            message: "Insufficient balance".to_string(),
        };
        assert_eq!(err.public_message(), "Insufficient balance");
    }
}
