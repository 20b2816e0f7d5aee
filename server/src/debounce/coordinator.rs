//! Debounce Coordinator
//!
//! Caps how often one shared message is edited while many actors change the
//! state it displays. The first request in a window publishes immediately and
//! schedules one trailing publish; concurrent requests in the same window are
//! suppressed. The trailing callback republishes the content captured by the
//! winning request, then frees the key for the next cycle.
//!
//! Coordination happens only through the state store's atomic set-if-absent,
//! so any number of server instances may run side by side.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, error, info, instrument, warn};

use super::error::{DebounceError, DebounceResult};
use super::store::{SharedStateStore, StoreError};
use super::types::{
    CallbackOutcome, Content, DebounceKey, MessageHandle, Renderer, StoredUpdate,
    TrailingPayload, UpdateOutcome,
};
use crate::publish::{PublishOutcome, PublishPort};
use crate::webhooks::dispatch::{DelayedDispatcher, DispatchError};
use crate::webhooks::signing::SignatureVerifier;

/// Record lifetime for a trailing window: always twice the delay.
pub fn ttl_for(delay: Duration) -> Duration {
    delay.saturating_mul(2)
}

/// Static coordinator settings.
#[derive(Debug, Clone)]
pub struct DebounceSettings {
    /// Trailing window.
    pub delay: Duration,
    /// Prefix for keys in the state store.
    pub key_prefix: String,
    /// URL the dispatcher posts the trailing payload to.
    pub callback_url: String,
}

/// Only the key matters on the way back; stored content is authoritative.
#[derive(Deserialize)]
struct CallbackKey {
    debounce_key: DebounceKey,
}

/// Orchestrates store, publisher, dispatcher and signature verification.
pub struct DebounceCoordinator {
    store: Arc<dyn SharedStateStore>,
    publisher: Arc<dyn PublishPort>,
    dispatcher: Arc<dyn DelayedDispatcher>,
    verifier: SignatureVerifier,
    settings: DebounceSettings,
}

impl DebounceCoordinator {
    pub fn new(
        store: Arc<dyn SharedStateStore>,
        publisher: Arc<dyn PublishPort>,
        dispatcher: Arc<dyn DelayedDispatcher>,
        verifier: SignatureVerifier,
        settings: DebounceSettings,
    ) -> Self {
        Self {
            store,
            publisher,
            dispatcher,
            verifier,
            settings,
        }
    }

    pub const fn settings(&self) -> &DebounceSettings {
        &self.settings
    }

    /// Store key for a message.
    pub fn key_for(&self, handle: &MessageHandle) -> DebounceKey {
        DebounceKey::for_message(&self.settings.key_prefix, handle)
    }

    /// Request an update of `handle` using the configured trailing window.
    ///
    /// The caller must have persisted the underlying state change first.
    pub async fn request_update(
        &self,
        handle: &MessageHandle,
        content: Content,
    ) -> DebounceResult<UpdateOutcome> {
        self.request_update_with_delay(handle, content, self.settings.delay)
            .await
    }

    /// Render `state` and request an update with the result.
    pub async fn render_and_request<S, R>(
        &self,
        handle: &MessageHandle,
        renderer: &R,
        state: &S,
    ) -> DebounceResult<UpdateOutcome>
    where
        S: ?Sized + Sync,
        R: Renderer<S> + Sync,
    {
        let content = renderer.render(state);
        self.request_update(handle, content).await
    }

    /// Request an update of `handle` with an explicit trailing window.
    ///
    /// Winning calls publish immediately and schedule exactly one trailing
    /// callback. Losing calls do nothing and do not refresh stored content.
    ///
    /// `delay` must be non-zero. It is widened to what the dispatcher can
    /// honour before the record TTL is derived from it.
    #[instrument(skip(self, content), fields(debounce_key = tracing::field::Empty))]
    pub async fn request_update_with_delay(
        &self,
        handle: &MessageHandle,
        content: Content,
        delay: Duration,
    ) -> DebounceResult<UpdateOutcome> {
        let key = self.key_for(handle);
        tracing::Span::current().record("debounce_key", key.as_str());

        // A zero window would store a record that is already expired
        if delay.is_zero() {
            warn!("Rejecting update request with a zero trailing window");
            return Err(DebounceError::InvalidDelay);
        }
        let delay = self.dispatcher.effective_delay(delay);

        let update = StoredUpdate {
            message_handle: handle.clone(),
            content,
        };

        let acquired = self
            .store
            .try_acquire(&key, &update, ttl_for(delay))
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to acquire debounce key");
                DebounceError::from(e)
            })?;

        if !acquired {
            debug!("Debounce key held by another request, suppressing update");
            return Ok(UpdateOutcome::Suppressed);
        }

        match self
            .publisher
            .publish(&update.message_handle, &update.content)
            .await
        {
            Ok(PublishOutcome::Success) => {}
            Ok(PublishOutcome::RecoverableNoOp) => {
                debug!("Immediate publish was a no-op");
            }
            Err(e) => {
                error!(error = %e, "Immediate publish failed, abandoning cycle");
                self.release(&key).await;
                return Err(e.into());
            }
        }

        let payload = match serde_json::to_value(TrailingPayload {
            debounce_key: key.clone(),
            update,
        }) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to encode trailing payload");
                self.release(&key).await;
                return Err(DispatchError::from(e).into());
            }
        };

        match self
            .dispatcher
            .schedule(&self.settings.callback_url, &payload, delay)
            .await
        {
            Ok(callback_id) => {
                info!(%callback_id, delay_ms = delay.as_millis() as u64, "Published, trailing update scheduled");
                Ok(UpdateOutcome::Published)
            }
            Err(e) => {
                error!(error = %e, "Failed to schedule trailing update");
                self.release(&key).await;
                Err(e.into())
            }
        }
    }

    /// Handle the dispatcher's trailing callback.
    ///
    /// Safe to invoke any number of times for one cycle: once the record is
    /// gone every further invocation is a no-op.
    #[instrument(skip_all, fields(debounce_key = tracing::field::Empty))]
    pub async fn handle_trailing_callback(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> DebounceResult<CallbackOutcome> {
        let Some(signature) = signature else {
            warn!("Trailing callback without signature");
            return Err(DebounceError::SignatureInvalid);
        };

        if !self.verifier.verify(signature, body) {
            warn!("Trailing callback signature verification failed");
            return Err(DebounceError::SignatureInvalid);
        }

        let CallbackKey { debounce_key: key } = serde_json::from_slice(body).map_err(|e| {
            warn!(error = %e, "Unparseable trailing callback body");
            DebounceError::MalformedCallbackBody(e.to_string())
        })?;
        if key.as_str().is_empty() {
            return Err(DebounceError::MalformedCallbackBody(
                "debounce_key is empty".to_string(),
            ));
        }
        tracing::Span::current().record("debounce_key", key.as_str());

        let update = match self.store.get(&key).await {
            Ok(Some(update)) => update,
            Ok(None) => {
                debug!("No debounce record, nothing to do");
                return Ok(CallbackOutcome::NoRecord);
            }
            Err(StoreError::Corrupt(e)) => {
                warn!(error = %e, "Discarding undecodable debounce record");
                self.store.delete(&key).await?;
                return Ok(CallbackOutcome::Discarded);
            }
            Err(e) => {
                error!(error = %e, "Failed to read debounce record");
                return Err(e.into());
            }
        };

        let published = self
            .publisher
            .publish(&update.message_handle, &update.content)
            .await;

        // The slot is freed whatever the publish outcome
        self.store.delete(&key).await.map_err(|e| {
            error!(error = %e, "Failed to delete debounce record");
            DebounceError::from(e)
        })?;

        match published {
            Ok(PublishOutcome::Success) => {
                info!("Trailing update published");
                Ok(CallbackOutcome::Published)
            }
            Ok(PublishOutcome::RecoverableNoOp) => {
                debug!("Trailing update unchanged");
                Ok(CallbackOutcome::Published)
            }
            Err(e) => {
                error!(error = %e, "Trailing publish failed");
                Err(e.into())
            }
        }
    }

    /// Free `key` after a failed cycle; TTL expiry covers a failed delete.
    async fn release(&self, key: &DebounceKey) {
        if let Err(e) = self.store.delete(key).await {
            error!(
                debounce_key = %key,
                error = %e,
                "Failed to release debounce key, it will expire on its own"
            );
        }
    }
}
