//! Wires the duet-core adapters and use cases into one running call client.

use std::sync::Arc;

use tracing::info;

use duet_core::adapters::bus::codec::JsonSignalCodec;
use duet_core::adapters::registry::InMemoryParticipantRegistry;
use duet_core::adapters::relay::bus::RelaySignalBus;
use duet_core::adapters::relay::client::RelayClient;
use duet_core::adapters::relay::engine::RelayMediaEngine;
use duet_core::application::call_controller::{CallController, CallHandle};
use duet_core::application::ports::AppEvents;
use duet_core::application::session_lifecycle::SessionLifecycleManager;
use duet_core::config::ClientConfig;
use duet_core::domain::identity::PeerId;

/// One connected client context: the call controller plus its relay link.
pub struct CallClient {
    pub handle: CallHandle,
    relay: Arc<RelayClient>,
}

impl CallClient {
    /// Leave any call, then drop the relay connection.
    pub async fn shutdown(&self) {
        if let Err(e) = self.handle.shutdown().await {
            tracing::warn!("Controller shutdown: {e}");
        }
        self.relay.close();
    }
}

pub async fn build_call_client(
    config: &ClientConfig,
    app_events: Arc<dyn AppEvents>,
) -> anyhow::Result<CallClient> {
    let relay = RelayClient::connect(config.relay_addr, &config.server_name).await?;

    let local_id = config.peer_id.clone().unwrap_or_else(PeerId::random);
    info!(peer_id = %local_id, channel = %config.engine.channel, "Building call client");

    let session = Arc::new(SessionLifecycleManager::new(
        Arc::new(RelayMediaEngine::new(Arc::clone(&relay))),
        Arc::new(InMemoryParticipantRegistry::new()),
        Arc::clone(&app_events),
        config.engine.clone(),
        local_id,
    ));

    let handle = CallController::new(
        config.glare_policy,
        Arc::new(RelaySignalBus::new(Arc::clone(&relay))),
        Arc::new(JsonSignalCodec),
        session,
        app_events,
    )
    .spawn()?;

    Ok(CallClient { handle, relay })
}
