//! [`AppEvents`] adapter that only logs, for headless contexts.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::application::ports::{AppEvents, Participant};
use crate::domain::call::CallState;
use crate::domain::identity::PeerId;

#[derive(Debug, Clone, Copy, Default)]
pub struct LogAppEvents;

#[async_trait]
impl AppEvents for LogAppEvents {
    async fn emit_call_state(&self, state: &CallState) {
        info!(%state, "Call state changed");
    }

    async fn emit_participant_joined(&self, participant: &Participant) {
        info!(peer_id = %participant.id, "Participant joined");
    }

    async fn emit_participant_left(&self, peer_id: &PeerId) {
        info!(%peer_id, "Participant left");
    }

    async fn emit_mute_changed(&self, muted: bool) {
        info!(muted, "Microphone mute changed");
    }

    async fn emit_error(&self, message: &str) {
        warn!("{message}");
    }
}
