//! [`MediaEngine`] over the relay. Room membership and publications live on
//! the relay; capture is simulated with [`VirtualTrack`]s.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::adapters::media::track::VirtualTrack;
use crate::application::ports::{MediaEngine, SharedTrack};
use crate::config::EngineConfig;
use crate::domain::identity::PeerId;
use crate::domain::media::{EngineEvent, MediaKind};
use crate::domain::relay::RelayMsg;

use super::client::RelayClient;

pub struct RelayMediaEngine {
    client: Arc<RelayClient>,
    track_serial: AtomicUsize,
}

impl RelayMediaEngine {
    pub fn new(client: Arc<RelayClient>) -> Self {
        Self {
            client,
            track_serial: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MediaEngine for RelayMediaEngine {
    async fn join(&self, config: &EngineConfig, local_id: &PeerId) -> anyhow::Result<()> {
        self.client
            .request(|request_id| RelayMsg::JoinRoom {
                request_id,
                app_id: config.app_id.clone(),
                channel: config.channel.0.clone(),
                token: config.token.clone(),
                peer_id: local_id.clone(),
            })
            .await
    }

    async fn create_local_tracks(&self) -> anyhow::Result<Vec<SharedTrack>> {
        let serial = self.track_serial.fetch_add(1, Ordering::Relaxed);
        let tracks: Vec<SharedTrack> = vec![
            Arc::new(VirtualTrack::new(MediaKind::Audio, format!("mic-{serial}"))),
            Arc::new(VirtualTrack::new(MediaKind::Video, format!("camera-{serial}"))),
        ];
        Ok(tracks)
    }

    async fn publish(&self, tracks: &[SharedTrack]) -> anyhow::Result<()> {
        let kinds: Vec<MediaKind> = tracks.iter().map(|t| t.kind()).collect();
        debug!(?kinds, "Publishing through relay");
        self.client
            .request(|request_id| RelayMsg::Publish { request_id, kinds })
            .await
    }

    async fn subscribe(&self, user: &PeerId, kind: MediaKind) -> anyhow::Result<SharedTrack> {
        self.client
            .request(|request_id| RelayMsg::Subscribe {
                request_id,
                peer_id: user.clone(),
                kind,
            })
            .await?;
        Ok(Arc::new(VirtualTrack::new(kind, format!("{user}-{kind}"))))
    }

    async fn leave(&self) -> anyhow::Result<()> {
        self.client
            .request(|request_id| RelayMsg::LeaveRoom { request_id })
            .await
    }

    fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.client.subscribe_events()
    }
}
