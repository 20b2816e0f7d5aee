//! Server Configuration
//!
//! Loads configuration from environment variables.

use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;

/// Where debounce records live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateBackend {
    /// Shared Redis instance (safe across many server instances).
    Redis,
    /// Process-local map (single instance only).
    Memory,
}

impl StateBackend {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Redis => "redis",
            Self::Memory => "memory",
        }
    }
}

/// Which service delivers the trailing callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchBackend {
    /// Upstash `QStash` delayed publish.
    QStash,
    /// Self-hosted Redis sorted set plus delivery worker.
    Redis,
}

impl DispatchBackend {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::QStash => "qstash",
            Self::Redis => "redis",
        }
    }
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:8080")
    pub bind_address: String,

    /// Redis connection URL
    pub redis_url: String,

    /// Debounce record storage
    pub state_backend: StateBackend,

    /// Public base URL of this server, used to build the callback URL
    pub deployment_url: String,

    /// Trailing update window in milliseconds (default: 2000)
    pub debounce_delay_ms: u64,

    /// Prefix for debounce keys in the state store (default: "debounce")
    pub debounce_key_prefix: String,

    /// Trailing callback delivery backend
    pub dispatch_backend: DispatchBackend,

    /// `QStash` API base URL
    pub qstash_url: String,

    /// `QStash` bearer token (required for the qstash backend)
    pub qstash_token: Option<String>,

    /// Current callback signing key
    pub current_signing_key: String,

    /// Next callback signing key, accepted during key rotation
    pub next_signing_key: Option<String>,

    /// Clock tolerance in seconds for callback token `exp`/`nbf`
    pub signature_leeway_secs: u64,

    /// Require the callback token subject to equal our callback URL
    pub verify_callback_url: bool,

    /// Telegram bot token
    pub bot_token: String,

    /// Telegram Bot API base URL
    pub telegram_api_url: String,

    /// Maximum accepted callback body size in bytes (default: 64KB)
    pub max_callback_body_bytes: usize,

    /// Poll period of the redis dispatcher worker in milliseconds
    pub dispatch_poll_interval_ms: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let dispatch_backend = match env::var("DISPATCH_BACKEND")
            .unwrap_or_else(|_| "qstash".into())
            .to_ascii_lowercase()
            .as_str()
        {
            "qstash" => DispatchBackend::QStash,
            "redis" => DispatchBackend::Redis,
            other => bail!("DISPATCH_BACKEND must be 'qstash' or 'redis', got '{other}'"),
        };

        let state_backend = match env::var("STATE_BACKEND")
            .unwrap_or_else(|_| "redis".into())
            .to_ascii_lowercase()
            .as_str()
        {
            "redis" => StateBackend::Redis,
            "memory" => StateBackend::Memory,
            other => bail!("STATE_BACKEND must be 'redis' or 'memory', got '{other}'"),
        };

        let qstash_token = env::var("QSTASH_TOKEN").ok().filter(|t| !t.is_empty());
        if dispatch_backend == DispatchBackend::QStash && qstash_token.is_none() {
            bail!("QSTASH_TOKEN must be set when DISPATCH_BACKEND=qstash");
        }

        let debounce_delay_ms = env::var("DEBOUNCE_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2000);
        if debounce_delay_ms == 0 {
            bail!("DEBOUNCE_DELAY_MS must be greater than zero");
        }

        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into()),
            state_backend,
            deployment_url: env::var("DEPLOYMENT_URL")
                .context("DEPLOYMENT_URL must be set")?
                .trim_end_matches('/')
                .to_string(),
            debounce_delay_ms,
            debounce_key_prefix: env::var("DEBOUNCE_KEY_PREFIX")
                .unwrap_or_else(|_| "debounce".into()),
            dispatch_backend,
            qstash_url: env::var("QSTASH_URL")
                .unwrap_or_else(|_| "https://qstash.upstash.io".into())
                .trim_end_matches('/')
                .to_string(),
            qstash_token,
            current_signing_key: env::var("QSTASH_CURRENT_SIGNING_KEY")
                .context("QSTASH_CURRENT_SIGNING_KEY must be set")?,
            next_signing_key: env::var("QSTASH_NEXT_SIGNING_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            signature_leeway_secs: env::var("SIGNATURE_LEEWAY_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            verify_callback_url: env::var("VERIFY_CALLBACK_URL")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            bot_token: env::var("BOT_TOKEN").context("BOT_TOKEN must be set")?,
            telegram_api_url: env::var("TELEGRAM_API_URL")
                .unwrap_or_else(|_| "https://api.telegram.org".into())
                .trim_end_matches('/')
                .to_string(),
            max_callback_body_bytes: env::var("MAX_CALLBACK_BODY_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(64 * 1024), // 64KB
            dispatch_poll_interval_ms: env::var("DISPATCH_POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(250),
        })
    }

    /// Trailing update window.
    #[must_use]
    pub const fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_delay_ms)
    }

    /// URL the dispatcher calls back with the trailing payload.
    #[must_use]
    pub fn callback_url(&self) -> String {
        format!("{}/trailing-update", self.deployment_url)
    }

    /// Create a default configuration for testing.
    ///
    /// Redis-backed tests expect: `docker run -d --name pollcast-test-redis -p 6380:6379 redis:7`
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".into(),
            redis_url: "redis://localhost:6380".into(),
            state_backend: StateBackend::Memory,
            deployment_url: "http://127.0.0.1:8080".into(),
            debounce_delay_ms: 2000,
            debounce_key_prefix: "test:debounce".into(),
            dispatch_backend: DispatchBackend::Redis,
            qstash_url: "http://127.0.0.1:8081".into(),
            qstash_token: None,
            current_signing_key: "sig_current_test_key".into(),
            next_signing_key: Some("sig_next_test_key".into()),
            signature_leeway_secs: 0,
            verify_callback_url: false,
            bot_token: "123456:test-token".into(),
            telegram_api_url: "http://127.0.0.1:8082".into(),
            max_callback_body_bytes: 64 * 1024,
            dispatch_poll_interval_ms: 50,
        }
    }
}
