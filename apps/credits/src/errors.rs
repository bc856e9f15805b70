use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized")]
    Unauthorized,

    /// The paid action already ran; only the charge is missing.
    #[error("Credit not charged: {0}")]
    CreditNotCharged(String),

    #[error("Chain error: {0}")]
    Chain(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Not authorized".to_string(),
            ),
            AppError::CreditNotCharged(msg) => {
                tracing::error!("Credit deduction failed: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "CREDIT_NOT_CHARGED",
                    format!("Action succeeded but credit could not be charged: {msg}"),
                )
            }
            AppError::Chain(msg) => {
                tracing::error!("Chain error: {msg}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "CHAIN_UNAVAILABLE",
                    "The chain node could not be reached".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
