//! Tabletop Match Server
//!
//! Authoritative match server: WebSocket front, action processor, and the
//! turn driver for AI and absent seats.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tabletop::{
    config::AppConfig,
    network::{Authenticator, GameServer, ServerConfig},
    services::{LogNotifier, MemoryIdentityDirectory},
    sync::{ActionProcessor, EventHub, MemoryMatchStore, TurnDriver},
    LudoRules, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to set tracing subscriber")?;

    let config = AppConfig::from_env().context("invalid configuration")?;
    info!("Tabletop Server v{}", VERSION);
    let auth = Authenticator::new(&config.auth).context("failed to load auth key")?;
    if auth.is_development() {
        warn!("No auth key configured: development mode, bare user ids accepted");
    }

    let processor = Arc::new(ActionProcessor::new(
        Arc::new(LudoRules),
        Arc::new(MemoryMatchStore::new()),
        Arc::new(EventHub::new(config.event_channel_capacity)),
        Arc::new(LogNotifier),
        config.processor.clone(),
    ));

    let server_config = ServerConfig { version: VERSION.to_string(), ..config.server.clone() };
    let server = Arc::new(GameServer::new(
        server_config,
        auth,
        processor.clone(),
        Arc::new(MemoryIdentityDirectory::default()),
    ));

    let driver = Arc::new(TurnDriver::new(processor, config.turns.clone()));
    let driver_task = tokio::spawn(driver.run(server.subscribe_shutdown()));

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_server.shutdown("Server shutting down").await;
        }
    });

    server.run().await.context("server failed")?;
    let _ = driver_task.await;

    info!("Bye");
    Ok(())
}
