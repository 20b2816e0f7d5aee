//! Webhook API Handlers
//!
//! Inbound trailing-update callback from the dispatch service.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use bytes::Bytes;
use serde::Serialize;
use tracing::instrument;

use super::signing::SIGNATURE_HEADER;
use crate::api::AppState;
use crate::debounce::{CallbackOutcome, DebounceError};

/// Response body of a handled callback.
#[derive(Debug, Serialize)]
pub struct TrailingUpdateResponse {
    /// `published`, `no_record` or `discarded`.
    pub status: &'static str,
}

impl From<CallbackOutcome> for TrailingUpdateResponse {
    fn from(outcome: CallbackOutcome) -> Self {
        let status = match outcome {
            CallbackOutcome::Published => "published",
            CallbackOutcome::NoRecord => "no_record",
            CallbackOutcome::Discarded => "discarded",
        };
        Self { status }
    }
}

/// POST /trailing-update
///
/// The raw body is verified before it is parsed, so it is taken as bytes.
#[instrument(skip_all)]
pub async fn trailing_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<TrailingUpdateResponse>), DebounceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let outcome = state
        .coordinator
        .handle_trailing_callback(&body, signature)
        .await?;

    Ok((StatusCode::OK, Json(outcome.into())))
}
