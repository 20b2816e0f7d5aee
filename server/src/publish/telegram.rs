//! Telegram Bot API Publisher
//!
//! Edits poll messages through `editMessageText`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{PublishError, PublishOutcome, PublishPort};
use crate::debounce::types::{Content, FormatMode, MessageHandle, ReplyControls};

/// Bot API description fragment for an edit that changes nothing.
const NOT_MODIFIED: &str = "message is not modified";

#[derive(Serialize)]
struct EditMessageText<'a> {
    #[serde(flatten)]
    handle: &'a MessageHandle,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a ReplyControls>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<FormatMode>,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    description: Option<String>,
}

/// Publisher backed by the Telegram Bot API.
#[derive(Clone)]
pub struct TelegramPublisher {
    http: reqwest::Client,
    endpoint: String,
}

impl TelegramPublisher {
    /// Create a publisher for the given API base URL and bot token.
    pub fn new(api_url: &str, bot_token: &str) -> Result<Self, PublishError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self::with_client(http, api_url, bot_token))
    }

    pub fn with_client(http: reqwest::Client, api_url: &str, bot_token: &str) -> Self {
        Self {
            http,
            endpoint: format!(
                "{}/bot{bot_token}/editMessageText",
                api_url.trim_end_matches('/')
            ),
        }
    }
}

/// Map a Bot API reply onto a publish outcome.
fn classify(status: u16, reply: ApiResponse) -> Result<PublishOutcome, PublishError> {
    if reply.ok {
        return Ok(PublishOutcome::Success);
    }

    let description = reply.description.unwrap_or_default();
    if description.contains(NOT_MODIFIED) {
        return Ok(PublishOutcome::RecoverableNoOp);
    }

    Err(PublishError::Rejected {
        status: reply.error_code.unwrap_or(status),
        description,
    })
}

#[async_trait]
impl PublishPort for TelegramPublisher {
    async fn publish(
        &self,
        handle: &MessageHandle,
        content: &Content,
    ) -> Result<PublishOutcome, PublishError> {
        let request = EditMessageText {
            handle,
            text: &content.text,
            reply_markup: content.reply_controls.as_ref(),
            parse_mode: content.format_mode,
        };

        let resp = self.http.post(&self.endpoint).json(&request).send().await?;
        let status = resp.status().as_u16();

        let reply: ApiResponse = resp.json().await.map_err(|e| {
            warn!(status, error = %e, "Unreadable Bot API response");
            PublishError::Transport(format!("HTTP {status}: {e}"))
        })?;

        let outcome = classify(status, reply)?;
        if outcome == PublishOutcome::RecoverableNoOp {
            debug!(?handle, "Message already shows this content");
        }
        Ok(outcome)
    }
}
