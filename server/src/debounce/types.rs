//! Debounce Types
//!
//! Keys, render payloads and outcomes for one debounce cycle. Content is
//! produced by the view layer and carried through untouched; it is only
//! serialized at the store and dispatcher boundaries.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one externally displayed, rate-limited shared message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DebounceKey(String);

impl DebounceKey {
    /// Build the key for a message handle under the given prefix.
    pub fn for_message(prefix: &str, handle: &MessageHandle) -> Self {
        match handle {
            MessageHandle::Inline { inline_message_id } => {
                Self(format!("{prefix}:{inline_message_id}"))
            }
            MessageHandle::Chat {
                chat_id,
                message_id,
            } => Self(format!("{prefix}:{chat_id}:{message_id}")),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for DebounceKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for DebounceKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for DebounceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The remote message a publish edits.
///
/// Serialized with the same field names the Bot API expects, so the handle
/// can be flattened straight into an edit request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageHandle {
    /// Message sent through inline mode.
    Inline { inline_message_id: String },
    /// Regular message in a chat.
    Chat { chat_id: i64, message_id: i64 },
}

impl MessageHandle {
    pub fn inline(id: impl Into<String>) -> Self {
        Self::Inline {
            inline_message_id: id.into(),
        }
    }

    pub const fn chat(chat_id: i64, message_id: i64) -> Self {
        Self::Chat {
            chat_id,
            message_id,
        }
    }
}

/// Text formatting mode understood by the remote renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormatMode {
    MarkdownV2,
    #[serde(rename = "HTML")]
    Html,
    Markdown,
}

/// One inline keyboard button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyButton {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch_inline_query: Option<String>,
}

impl ReplyButton {
    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: Some(data.into()),
            url: None,
            switch_inline_query: None,
        }
    }
}

/// Structured reply controls attached below the message text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyControls {
    pub inline_keyboard: Vec<Vec<ReplyButton>>,
}

/// Rendered message content. Never inspected by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_controls: Option<ReplyControls>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_mode: Option<FormatMode>,
    /// Opaque metadata for the caller (poll group id, membership, ...).
    #[serde(default)]
    pub correlation_ids: BTreeMap<String, String>,
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            reply_controls: None,
            format_mode: None,
            correlation_ids: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_reply_controls(mut self, controls: ReplyControls) -> Self {
        self.reply_controls = Some(controls);
        self
    }

    #[must_use]
    pub const fn with_format_mode(mut self, mode: FormatMode) -> Self {
        self.format_mode = Some(mode);
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.correlation_ids.insert(name.into(), value.into());
        self
    }
}

/// Value held in the state store for the duration of one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredUpdate {
    pub message_handle: MessageHandle,
    #[serde(flatten)]
    pub content: Content,
}

/// Body posted back by the dispatcher when the trailing window closes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailingPayload {
    pub debounce_key: DebounceKey,
    #[serde(flatten)]
    pub update: StoredUpdate,
}

/// Result of a `request_update` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// This call won the cycle: published now and scheduled a trailing update.
    Published,
    /// Another call holds the cycle; nothing was done.
    Suppressed,
}

/// Result of a trailing callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// The stored content was published and the record removed.
    Published,
    /// No record for the key (already handled or expired).
    NoRecord,
    /// The stored record could not be decoded and was removed.
    Discarded,
}

/// Renders aggregate domain state into message content.
pub trait Renderer<S: ?Sized> {
    fn render(&self, state: &S) -> Content;
}
