use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::engine::evidence::EvidenceError;
use crate::models::delivery::DeliveryStatus;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error(transparent)]
    Evidence(EvidenceError),

    #[error("request body too large: {0}")]
    PayloadTooLarge(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("cannot move a delivery from {from} to {to}")]
    InvalidTransition {
        from: DeliveryStatus,
        to: DeliveryStatus,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    /// The order code passed the advisory check but lost the race on insert.
    #[error("order code collided with an existing delivery")]
    CodeCollision,

    #[error("order code generation exhausted after {attempts} attempts")]
    GenerationExhausted { attempts: u32 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::CodeCollision)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation {
                column: "order_code",
                ..
            } => AppError::CodeCollision,
            StoreError::RowNotFound { table, id } => {
                AppError::NotFound(format!("{table} row {id} not found"))
            }
            StoreError::Poisoned => AppError::Internal("store lock poisoned".to_string()),
            other => AppError::Conflict(other.to_string()),
        }
    }
}

impl From<EvidenceError> for AppError {
    fn from(err: EvidenceError) -> Self {
        match err {
            EvidenceError::Io(detail) => {
                AppError::Internal(format!("proof storage failed: {detail}"))
            }
            other => AppError::Evidence(other),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, field) = match &self {
            AppError::Validation { field, message } => {
                (StatusCode::BAD_REQUEST, message.clone(), Some(*field))
            }
            AppError::Evidence(err) => {
                let status = match err {
                    EvidenceError::SizeExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                    _ => StatusCode::BAD_REQUEST,
                };
                (status, err.to_string(), Some("photo_proof"))
            }
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg.clone(), None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone(), None),
            AppError::InvalidTransition { .. } | AppError::CodeCollision => {
                (StatusCode::CONFLICT, self.to_string(), None)
            }
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone(), None),
            AppError::GenerationExhausted { attempts } => {
                tracing::error!(attempts, "order code space exhausted");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "unable to allocate an order code".to_string(),
                    None,
                )
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "request failed with internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                    None,
                )
            }
        };

        let body = match field {
            Some(field) => json!({ "error": message, "field": field }),
            None => json!({ "error": message }),
        };

        (status, Json(body)).into_response()
    }
}
