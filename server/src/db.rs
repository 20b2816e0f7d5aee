//! Redis Connection
//!
//! Shared Redis client used by the debounce state store and the
//! self-hosted callback dispatcher.

use anyhow::Result;
use fred::prelude::*;
use tracing::info;

/// Create Redis client.
pub async fn create_redis_client(redis_url: &str) -> Result<Client> {
    let config = Config::from_url(redis_url)?;
    let client = Client::new(config, None, None, None);
    client.connect();
    client.wait_for_connect().await?;

    info!("Connected to Redis");
    Ok(client)
}
