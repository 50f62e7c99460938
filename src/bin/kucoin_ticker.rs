//! KuCoin ticker stream
//!
//! Loads the stream configuration, connects to KuCoin's WebSocket feed,
//! subscribes to the configured topics and prints every data frame until
//! Ctrl+C. Connection events and counters are printed every 30 seconds.
//!
//! Usage:
//!   cargo run --bin kucoin_ticker [config.yaml]

use anyhow::{Context, Result};
use chrono::Utc;
use kucoin_stream::bin_common::{load_config_from_env, parse_args, ConfigType};
use kucoin_stream::kucoin::{
    init_tracing, DataMessage, KucoinStreamClient, RestTokenProvider, ShutdownManager, StreamConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const STATUS_INTERVAL: Duration = Duration::from_secs(30);

fn print_message(message: DataMessage) -> kucoin_stream::feedsockets::Result<()> {
    let now = Utc::now().format("%H:%M:%S%.3f");
    match (message.topic.as_deref(), message.data()) {
        (Some(topic), Some(data)) => println!("{}  {:<32} {}", now, topic, data),
        _ => println!("{}  {}", now, message.payload),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = match parse_args().into_iter().next() {
        Some(path) => load_config_from_env(ConfigType::Custom(path)),
        None => load_config_from_env(ConfigType::Stream),
    };
    let config = StreamConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    init_tracing(&config.log_level);
    config.log();

    let shutdown = ShutdownManager::new();
    shutdown.spawn_signal_handler();

    let mut provider = RestTokenProvider::new(&config.rest_base_url)?;
    if let Some(credentials) = config.credentials.clone() {
        provider = provider.with_credentials(credentials);
    }

    let client = KucoinStreamClient::new(Arc::new(provider), print_message, config.client_options());

    for topic in &config.topics {
        client.subscribe(&topic.topic, topic.private, topic.response).await;
    }

    println!("========================================");
    println!("  KuCoin stream ({} topic(s))", config.topics.len());
    println!("  Press Ctrl+C to stop");
    println!("========================================");

    if !client.connect().await {
        warn!("First connection attempt failed, retrying in the background");
    }

    while shutdown.is_running() {
        shutdown.interruptible_sleep(STATUS_INTERVAL).await;

        while let Some(event) = client.try_recv_event() {
            info!("Client event: {:?}", event);
        }
        let metrics = client.metrics();
        info!(
            "State: {:?} | received {} | sent {} | reconnects {} | malformed {} | handler failures {}",
            client.state(),
            metrics.messages_received,
            metrics.messages_sent,
            metrics.reconnect_count,
            metrics.malformed_frames,
            metrics.handler_failures
        );
    }

    client.disconnect().await;
    println!("Shutdown complete");
    Ok(())
}
