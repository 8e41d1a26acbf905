//! Standalone relay server binary: hosts the signaling bus and media rooms.

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use duet_core::adapters::relay::server::RelayServer;
use duet_core::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env()?;
    info!(?config, "Relay server starting");
    if config.app_id.is_none() {
        warn!("DUET_APP_ID not set; room joins are not checked");
    }

    let server = RelayServer::bind(config)?;
    let accept_loop = tokio::spawn(server.clone().run());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    server.close();
    accept_loop.await??;
    Ok(())
}
