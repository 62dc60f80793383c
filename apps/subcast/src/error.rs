use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

/// Failures raised by the subscription layer.
///
/// Configuration and definition errors are programmer or deploy mistakes and
/// surface eagerly. Delivery errors (`Execution`, `Broadcast`,
/// `DeliveryTimeout`, `DeliveryPanicked`) are scoped to a single subscriber and
/// are routed to a delivery iterator's error handler instead of the caller.
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("invalid subscription configuration: {0}")]
    InvalidConfig(String),

    #[error("no subscription is registered for field `{0}`")]
    UnknownSubscription(String),

    #[error("invalid broadcaster driver: {0}")]
    InvalidDriver(String),

    #[error("subscription storage failed: {0}")]
    Storage(String),

    #[error("subscriber serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("subscription execution failed: {0}")]
    Execution(String),

    #[error("broadcast failed: {0}")]
    Broadcast(String),

    #[error("delivery to {channel} timed out after {timeout:?}")]
    DeliveryTimeout { channel: String, timeout: Duration },

    #[error("delivery to {channel} panicked: {message}")]
    DeliveryPanicked { channel: String, message: String },
}

impl From<redis::RedisError> for SubscriptionError {
    fn from(err: redis::RedisError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for SubscriptionError {
    fn from(err: reqwest::Error) -> Self {
        Self::Broadcast(err.to_string())
    }
}

/// Structured API error returned to clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

/// Application-level error type that converts into an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "BAD_REQUEST".to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "NOT_FOUND".to_string(),
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "UNAUTHORIZED".to_string(),
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            code: "FORBIDDEN".to_string(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL_ERROR".to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<SubscriptionError> for ApiError {
    fn from(err: SubscriptionError) -> Self {
        match err {
            SubscriptionError::UnknownSubscription(field) => {
                tracing::error!(%field, "unknown subscription field");
                Self::not_found("Unknown subscription")
            }
            SubscriptionError::Serialization(err) => {
                tracing::warn!(?err, "malformed subscription payload");
                Self::bad_request("Malformed payload")
            }
            err => {
                tracing::error!(?err, "subscription error");
                Self::internal("An internal error occurred")
            }
        }
    }
}
