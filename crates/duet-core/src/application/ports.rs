//! Port traits (interfaces) that use cases depend on.
//!
//! Adapters implement these traits; use cases never reference Quinn, serde_json, etc.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::config::EngineConfig;
use crate::domain::call::CallState;
use crate::domain::identity::PeerId;
use crate::domain::media::{EngineEvent, MediaKind};
use crate::domain::signal::{BusNotification, SignalKey, SignalMsg};

// ---------------------------------------------------------------------------
// Signaling bus
// ---------------------------------------------------------------------------

/// Broadcast key/value channel shared by every context of one origin.
///
/// Holds only the latest value per key. A write is delivered to every other
/// attached context, never back to the writer, and never replayed to a
/// context that attaches later.
#[async_trait]
pub trait SignalBus: Send + Sync {
    /// Overwrite `key` with `value`.
    async fn write(&self, key: SignalKey, value: String) -> anyhow::Result<()>;

    /// Take this context's notification stream. Can only be taken once.
    fn notifications(&self) -> anyhow::Result<mpsc::UnboundedReceiver<BusNotification>>;
}

/// Encodes / decodes signaling payloads stored on the bus.
pub trait SignalCodec: Send + Sync {
    fn encode(&self, msg: &SignalMsg) -> anyhow::Result<String>;
    fn decode(&self, key: SignalKey, raw: &str) -> anyhow::Result<SignalMsg>;
}

// ---------------------------------------------------------------------------
// Media engine
// ---------------------------------------------------------------------------

/// One captured or received media track.
#[async_trait]
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> MediaKind;

    /// Start rendering. Video needs a target; audio plays without one.
    fn play(&self, target: Option<&str>) -> anyhow::Result<()>;

    async fn set_enabled(&self, enabled: bool) -> anyhow::Result<()>;
    fn is_enabled(&self) -> bool;

    /// Release the track. Closing twice is an error.
    fn close(&self) -> anyhow::Result<()>;
}

pub type SharedTrack = Arc<dyn MediaTrack>;

/// External real-time media system: room membership, capture, transport.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn join(&self, config: &EngineConfig, local_id: &PeerId) -> anyhow::Result<()>;

    /// Capture microphone and camera, in that order.
    async fn create_local_tracks(&self) -> anyhow::Result<Vec<SharedTrack>>;

    async fn publish(&self, tracks: &[SharedTrack]) -> anyhow::Result<()>;

    /// Subscribe to what `user` published of `kind`, returning the remote track.
    async fn subscribe(&self, user: &PeerId, kind: MediaKind) -> anyhow::Result<SharedTrack>;

    async fn leave(&self) -> anyhow::Result<()>;

    /// Start receiving participant notifications. Dropping the receiver stops.
    fn events(&self) -> broadcast::Receiver<EngineEvent>;
}

// ---------------------------------------------------------------------------
// Participant registry
// ---------------------------------------------------------------------------

/// A call member (self included) with its current tracks.
#[derive(Clone)]
pub struct Participant {
    pub id: PeerId,
    pub video_track: Option<SharedTrack>,
    pub audio_track: Option<SharedTrack>,
}

impl Participant {
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            video_track: None,
            audio_track: None,
        }
    }
}

impl fmt::Debug for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Participant")
            .field("id", &self.id)
            .field("video_track", &self.video_track.as_ref().map(|t| t.id().to_owned()))
            .field("audio_track", &self.audio_track.as_ref().map(|t| t.id().to_owned()))
            .finish()
    }
}

/// Participants of the current call, keyed by id, in stable rendering order.
pub trait ParticipantRegistry: Send + Sync {
    fn participants(&self) -> Vec<Participant>;
    fn get(&self, id: &PeerId) -> Option<Participant>;
    fn contains(&self, id: &PeerId) -> bool {
        self.get(id).is_some()
    }
    /// Insert or replace by id, keeping the original position.
    fn upsert(&self, participant: Participant);
    /// Put `track` into the slot for its kind, creating the entry if needed.
    /// Returns `true` if the participant was not present before.
    fn attach_track(&self, id: &PeerId, track: SharedTrack) -> bool;
    fn remove(&self, id: &PeerId) -> Option<Participant>;
    fn clear(&self);
}

// ---------------------------------------------------------------------------
// App events (UI bridge)
// ---------------------------------------------------------------------------

/// Emits events toward the user-facing layer.
#[async_trait]
pub trait AppEvents: Send + Sync {
    async fn emit_call_state(&self, state: &CallState);
    async fn emit_participant_joined(&self, participant: &Participant);
    async fn emit_participant_left(&self, peer_id: &PeerId);
    async fn emit_mute_changed(&self, muted: bool);
    async fn emit_error(&self, message: &str);
}
