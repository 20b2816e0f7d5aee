//! Self-Hosted Callback Delivery
//!
//! A Redis-backed [`DelayedDispatcher`] for deployments without `QStash`.
//!
//! Architecture:
//! - `schedule` adds the callback to a sorted set (score = Unix ms when due).
//! - A background worker atomically pops due items with a Lua script, signs
//!   the body with the current signing key and POSTs it to the callback URL.
//! - Non-2xx responses are re-scheduled with bounded backoff, then dropped.
//!
//! Delivery is at-least-once within those bounds: an item popped by a worker
//! that crashes before posting is lost, which the debounce record TTL covers.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fred::error::Error as RedisError;
use fred::interfaces::{LuaInterface, SortedSetsInterface};
use fred::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::dispatch::{DelayedDispatcher, DispatchError};
use super::signing::{CallbackSigner, SIGNATURE_HEADER};

/// Maximum redeliveries after the first attempt.
const MAX_REDELIVERIES: u32 = 3;

/// Redelivery delays in seconds.
const RETRY_DELAYS_SECS: [u64; 3] = [5, 30, 120];

const _: () = assert!(MAX_REDELIVERIES as usize <= RETRY_DELAYS_SECS.len());

/// Items popped per worker tick.
const BATCH_SIZE: u32 = 50;

/// Atomically removes and returns due items from the sorted set, so two
/// workers never pop the same callback.
const POP_DUE_LUA: &str = r"
local items = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
if #items > 0 then
    redis.call('ZREM', KEYS[1], unpack(items))
end
return items
";

/// A callback waiting in the sorted set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledCallback {
    pub id: Uuid,
    pub url: String,
    /// Raw JSON body, signed exactly as stored.
    pub body: String,
    pub attempt: u32,
    pub scheduled_at: DateTime<Utc>,
}

/// Delay before redelivery number `attempt + 1`, or `None` when exhausted.
pub fn retry_delay(attempt: u32) -> Option<Duration> {
    if attempt >= MAX_REDELIVERIES {
        return None;
    }
    RETRY_DELAYS_SECS
        .get(attempt as usize)
        .map(|secs| Duration::from_secs(*secs))
}

/// Sorted-set score for an item due `delay` after `now_ms`.
fn due_at(now_ms: i64, delay: Duration) -> i64 {
    now_ms.saturating_add(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX))
}

/// Queue key for a debounce key prefix.
pub fn queue_key(prefix: &str) -> String {
    format!("{prefix}:dispatch:due")
}

async fn enqueue_at(
    redis: &Client,
    queue_key: &str,
    item: &ScheduledCallback,
    due_at_ms: i64,
) -> Result<(), DispatchError> {
    let payload = serde_json::to_string(item)?;
    redis
        .zadd::<(), _, _>(
            queue_key,
            None,
            None,
            false,
            false,
            (due_at_ms as f64, payload),
        )
        .await
        .map_err(|e| DispatchError::Queue(e.to_string()))
}

/// Dispatcher that schedules callbacks into Redis.
#[derive(Clone)]
pub struct RedisDelayedDispatcher {
    redis: Client,
    queue_key: String,
}

impl RedisDelayedDispatcher {
    pub fn new(redis: Client, queue_key: impl Into<String>) -> Self {
        Self {
            redis,
            queue_key: queue_key.into(),
        }
    }
}

#[async_trait]
impl DelayedDispatcher for RedisDelayedDispatcher {
    async fn schedule(
        &self,
        callback_url: &str,
        payload: &serde_json::Value,
        delay: Duration,
    ) -> Result<String, DispatchError> {
        let now = Utc::now();
        let item = ScheduledCallback {
            id: Uuid::now_v7(),
            url: callback_url.to_string(),
            body: serde_json::to_string(payload)?,
            attempt: 0,
            scheduled_at: now,
        };
        let due_at_ms = due_at(now.timestamp_millis(), delay);

        enqueue_at(&self.redis, &self.queue_key, &item, due_at_ms).await?;
        debug!(callback_id = %item.id, due_at_ms, "Trailing callback queued");
        Ok(item.id.to_string())
    }
}

/// Background worker delivering due callbacks.
#[derive(Clone)]
pub struct DeliveryWorker {
    redis: Client,
    queue_key: String,
    http: reqwest::Client,
    signer: CallbackSigner,
    poll_interval: Duration,
}

impl DeliveryWorker {
    pub fn new(
        redis: Client,
        queue_key: impl Into<String>,
        signer: CallbackSigner,
        poll_interval: Duration,
    ) -> Result<Self, DispatchError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            redis,
            queue_key: queue_key.into(),
            http,
            signer,
            poll_interval,
        })
    }

    /// Run forever, delivering callbacks as they come due.
    pub async fn run(self) {
        info!(queue = %self.queue_key, "Callback delivery worker started");

        let mut consecutive_errors: u32 = 0;

        loop {
            let due = match self.pop_due().await {
                Ok(due) => {
                    consecutive_errors = 0;
                    due
                }
                Err(e) => {
                    consecutive_errors += 1;
                    let backoff_secs = 1u64 << consecutive_errors.min(5); // 2, 4, ... 32
                    error!(
                        consecutive_errors,
                        backoff_secs,
                        error = %e,
                        "Failed to pop due callbacks"
                    );
                    tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                    continue;
                }
            };

            if due.is_empty() {
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }

            for raw in due {
                let item: ScheduledCallback = match serde_json::from_str(&raw) {
                    Ok(item) => item,
                    Err(e) => {
                        let truncated: String = raw.chars().take(500).collect();
                        error!(error = %e, payload_preview = %truncated, "Dropping undecodable callback");
                        continue;
                    }
                };

                let worker = self.clone();
                tokio::spawn(async move {
                    worker.deliver(item).await;
                });
            }
        }
    }

    async fn pop_due(&self) -> Result<Vec<String>, RedisError> {
        let now_ms = Utc::now().timestamp_millis();
        self.redis
            .eval(
                POP_DUE_LUA,
                vec![self.queue_key.as_str()],
                vec![now_ms.to_string(), BATCH_SIZE.to_string()],
            )
            .await
    }

    /// POST one signed callback and re-schedule it on failure.
    async fn deliver(&self, item: ScheduledCallback) {
        let signature = match self.signer.sign(&item.url, item.body.as_bytes()) {
            Ok(sig) => sig,
            Err(e) => {
                error!(callback_id = %item.id, error = %e, "Failed to sign callback, dropping");
                return;
            }
        };

        let result = self
            .http
            .post(&item.url)
            .header("Content-Type", "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(item.body.clone())
            .send()
            .await;

        let failure = match result {
            Ok(resp) if resp.status().is_success() => {
                debug!(callback_id = %item.id, attempt = item.attempt, "Callback delivered");
                return;
            }
            Ok(resp) => format!("HTTP {}", resp.status().as_u16()),
            Err(e) => e.to_string(),
        };

        warn!(
            callback_id = %item.id,
            attempt = item.attempt,
            error = %failure,
            "Callback delivery failed"
        );
        self.handle_retry(item, &failure).await;
    }

    async fn handle_retry(&self, mut item: ScheduledCallback, failure: &str) {
        let Some(delay) = retry_delay(item.attempt) else {
            error!(
                callback_id = %item.id,
                url = %item.url,
                error = %failure,
                "Callback exhausted all redeliveries, dropping"
            );
            return;
        };

        item.attempt += 1;
        let due_at_ms = due_at(Utc::now().timestamp_millis(), delay);
        if let Err(e) = enqueue_at(&self.redis, &self.queue_key, &item, due_at_ms).await {
            error!(
                callback_id = %item.id,
                attempt = item.attempt,
                error = %e,
                "Failed to re-schedule callback, dropping"
            );
        }
    }
}
