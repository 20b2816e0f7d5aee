//! Delayed Callback Dispatch
//!
//! Schedules one-shot HTTP callbacks after a delay. Dispatchers are treated as
//! at-least-once and imprecise: a callback may fire late or more than once.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Dispatch scheduling failures.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The dispatch service refused the request.
    #[error("dispatcher rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The dispatch service could not be reached.
    #[error("dispatcher unreachable: {0}")]
    Transport(String),

    /// The payload could not be encoded.
    #[error("payload encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The backing queue rejected the write.
    #[error("queue unavailable: {0}")]
    Queue(String),
}

impl From<reqwest::Error> for DispatchError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Schedules a callback POST of `payload` to `callback_url` after `delay`.
#[async_trait]
pub trait DelayedDispatcher: Send + Sync {
    /// The delay the callback will actually fire after when `delay` is
    /// requested. Record lifetimes are derived from this value.
    fn effective_delay(&self, delay: Duration) -> Duration {
        delay
    }

    /// Returns the dispatcher's identifier for the scheduled callback.
    async fn schedule(
        &self,
        callback_url: &str,
        payload: &serde_json::Value,
        delay: Duration,
    ) -> Result<String, DispatchError>;
}

/// Round a delay up to whole seconds, at least one.
pub fn delay_secs(delay: Duration) -> u64 {
    let secs = delay.as_secs() + u64::from(delay.subsec_nanos() > 0);
    secs.max(1)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    message_id: String,
}

/// Upstash `QStash` delayed publish.
#[derive(Clone)]
pub struct QStashDispatcher {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl QStashDispatcher {
    pub fn new(base_url: &str, token: &str) -> Result<Self, DispatchError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn publish_url(&self, callback_url: &str) -> String {
        format!("{}/v2/publish/{callback_url}", self.base_url)
    }
}

#[async_trait]
impl DelayedDispatcher for QStashDispatcher {
    /// `Upstash-Delay` only takes whole seconds.
    fn effective_delay(&self, delay: Duration) -> Duration {
        Duration::from_secs(delay_secs(delay))
    }

    async fn schedule(
        &self,
        callback_url: &str,
        payload: &serde_json::Value,
        delay: Duration,
    ) -> Result<String, DispatchError> {
        let resp = self
            .http
            .post(self.publish_url(callback_url))
            .bearer_auth(&self.token)
            .header("Upstash-Delay", format!("{}s", delay_secs(delay)))
            .json(payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "QStash refused delayed publish");
            return Err(DispatchError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let published: PublishResponse = resp.json().await?;
        debug!(message_id = %published.message_id, "Trailing callback scheduled");
        Ok(published.message_id)
    }
}
