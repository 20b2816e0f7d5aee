//! Debounce Error Types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use super::store::StoreError;
use crate::publish::PublishError;
use crate::webhooks::dispatch::DispatchError;

/// Errors surfaced by the debounce coordinator.
#[derive(Debug, Error)]
pub enum DebounceError {
    /// The state store is unreachable; nothing was published or stored.
    #[error("State store unavailable")]
    StoreUnavailable(#[source] StoreError),

    /// The remote message could not be edited; the cycle was abandoned.
    #[error("Publish failed")]
    PublishFatal(#[from] PublishError),

    /// The trailing callback could not be scheduled; the record was removed.
    #[error("Failed to schedule trailing update")]
    DispatchSchedulingFailed(#[from] DispatchError),

    /// The requested trailing window is zero.
    #[error("Trailing window must be greater than zero")]
    InvalidDelay,

    /// The callback was not signed by a trusted key.
    #[error("Invalid signature")]
    SignatureInvalid,

    /// The callback body is not a trailing payload.
    #[error("Malformed callback body: {0}")]
    MalformedCallbackBody(String),
}

impl From<StoreError> for DebounceError {
    fn from(e: StoreError) -> Self {
        Self::StoreUnavailable(e)
    }
}

/// Error response body for JSON responses.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Machine-readable error code.
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

impl DebounceError {
    /// HTTP status and error code for this error.
    pub const fn status(&self) -> (StatusCode, &'static str) {
        match self {
            Self::SignatureInvalid => (StatusCode::UNAUTHORIZED, "INVALID_SIGNATURE"),
            Self::MalformedCallbackBody(_) => (StatusCode::BAD_REQUEST, "MALFORMED_BODY"),
            Self::InvalidDelay => (StatusCode::BAD_REQUEST, "INVALID_DELAY"),
            Self::StoreUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE"),
            Self::PublishFatal(_) => (StatusCode::BAD_GATEWAY, "PUBLISH_FAILED"),
            Self::DispatchSchedulingFailed(_) => (StatusCode::BAD_GATEWAY, "DISPATCH_FAILED"),
        }
    }
}

impl IntoResponse for DebounceError {
    fn into_response(self) -> Response {
        let (status, code) = self.status();

        // Messages never include upstream details (`#[source]` is not rendered)
        let body = Json(ErrorResponse {
            error: code.to_string(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}

/// Result type for debounce operations.
pub type DebounceResult<T> = Result<T, DebounceError>;
