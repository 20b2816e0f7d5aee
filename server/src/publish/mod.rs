//! Message Publishing
//!
//! The capability to edit the shared remote message. Outcomes are exactly
//! success, a recoverable no-op (content already displayed) or a fatal error.

pub mod telegram;

use async_trait::async_trait;
use thiserror::Error;

use crate::debounce::types::{Content, MessageHandle};

pub use telegram::TelegramPublisher;

/// Non-fatal publish results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The message now shows the new content.
    Success,
    /// The remote side rejected the edit only because nothing changed.
    RecoverableNoOp,
}

/// Fatal publish failures. The debounce cycle is abandoned, never retried.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The remote API rejected the edit.
    #[error("remote API rejected edit ({status}): {description}")]
    Rejected { status: u16, description: String },

    /// The request never produced a usable response.
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for PublishError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Edits the remote message identified by a handle.
#[async_trait]
pub trait PublishPort: Send + Sync {
    async fn publish(
        &self,
        handle: &MessageHandle,
        content: &Content,
    ) -> Result<PublishOutcome, PublishError>;
}
