//! Pollcast Server - Main Entry Point
//!
//! Serves the trailing-update webhook and, for the self-hosted dispatch
//! backend, runs the callback delivery worker.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use pollcast_server::config::{Config, DispatchBackend, StateBackend};
use pollcast_server::debounce::{
    DebounceCoordinator, DebounceSettings, MemoryStateStore, RedisStateStore, SharedStateStore,
};
use pollcast_server::publish::TelegramPublisher;
use pollcast_server::webhooks::delivery::{queue_key, DeliveryWorker, RedisDelayedDispatcher};
use pollcast_server::webhooks::dispatch::{DelayedDispatcher, QStashDispatcher};
use pollcast_server::webhooks::signing::{CallbackSigner, SignatureVerifier};
use pollcast_server::{api, db};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pollcast_server=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        delay_ms = config.debounce_delay_ms,
        dispatcher = config.dispatch_backend.as_str(),
        state_backend = config.state_backend.as_str(),
        "Starting Pollcast Server"
    );

    // Redis is needed by the redis state store and the redis dispatcher
    let redis = if config.state_backend == StateBackend::Redis
        || config.dispatch_backend == DispatchBackend::Redis
    {
        Some(db::create_redis_client(&config.redis_url).await?)
    } else {
        None
    };

    let store: Arc<dyn SharedStateStore> = match (&redis, config.state_backend) {
        (Some(redis), StateBackend::Redis) => Arc::new(RedisStateStore::new(redis.clone())),
        _ => {
            warn!("Using in-memory debounce state; only safe with a single server instance");
            Arc::new(MemoryStateStore::new())
        }
    };

    let queue = queue_key(&config.debounce_key_prefix);
    let (dispatcher, worker): (Arc<dyn DelayedDispatcher>, Option<DeliveryWorker>) =
        match (&redis, config.dispatch_backend) {
            (Some(redis), DispatchBackend::Redis) => {
                let worker = DeliveryWorker::new(
                    redis.clone(),
                    queue.clone(),
                    CallbackSigner::new(&config.current_signing_key),
                    Duration::from_millis(config.dispatch_poll_interval_ms),
                )?;
                let dispatcher: Arc<dyn DelayedDispatcher> =
                    Arc::new(RedisDelayedDispatcher::new(redis.clone(), queue));
                (dispatcher, Some(worker))
            }
            _ => {
                let token = config.qstash_token.as_deref().unwrap_or_default();
                let dispatcher: Arc<dyn DelayedDispatcher> =
                    Arc::new(QStashDispatcher::new(&config.qstash_url, token)?);
                (dispatcher, None)
            }
        };

    let publisher = Arc::new(TelegramPublisher::new(
        &config.telegram_api_url,
        &config.bot_token,
    )?);

    let mut verifier = SignatureVerifier::new(
        &config.current_signing_key,
        config.next_signing_key.as_deref(),
    )
    .with_leeway(config.signature_leeway_secs);
    if config.verify_callback_url {
        verifier = verifier.with_expected_url(&config.callback_url());
    }

    let coordinator = DebounceCoordinator::new(
        store,
        publisher,
        dispatcher,
        verifier,
        DebounceSettings {
            delay: config.debounce_delay(),
            key_prefix: config.debounce_key_prefix.clone(),
            callback_url: config.callback_url(),
        },
    );

    if let Some(worker) = worker {
        tokio::spawn(worker.run());
    }

    // Build router
    let state = api::AppState::new(coordinator, config.clone());
    let app = api::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(address = %config.bind_address, "Server listening");

    // Graceful shutdown handler
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server shutdown complete");

    Ok(())
}
