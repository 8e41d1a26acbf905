//! In-process [`MediaEngine`] adapter.
//!
//! Engines created from the same [`LoopbackMediaHub`] share rooms, so two
//! contexts in one process can hold a call. Capture is simulated with
//! [`VirtualTrack`]s. Each engine carries a [`FaultPlan`] so failure paths of
//! the session lifecycle can be exercised.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::application::ports::{MediaEngine, SharedTrack};
use crate::config::EngineConfig;
use crate::domain::identity::PeerId;
use crate::domain::media::{EngineEvent, MediaKind};

use super::track::VirtualTrack;

const EVENT_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Hub (shared rooms)
// ---------------------------------------------------------------------------

struct Member {
    published: Vec<MediaKind>,
    events: broadcast::Sender<EngineEvent>,
}

#[derive(Default)]
struct Room {
    members: HashMap<PeerId, Member>,
}

impl Room {
    fn notify_others(&self, except: &PeerId, event: &EngineEvent) {
        for (id, member) in &self.members {
            if id != except {
                // No receiver just means that context is not listening.
                let _ = member.events.send(event.clone());
            }
        }
    }
}

/// Rooms shared by every engine created from this hub.
#[derive(Default)]
pub struct LoopbackMediaHub {
    rooms: Mutex<HashMap<String, Room>>,
}

impl LoopbackMediaHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A fresh engine (one per context) attached to this hub.
    pub fn engine(self: &Arc<Self>) -> Arc<LoopbackMediaEngine> {
        Arc::new(LoopbackMediaEngine::new(Arc::clone(self)))
    }

    /// Ids currently joined to `channel`.
    pub fn members(&self, channel: &str) -> Vec<PeerId> {
        let rooms = self.lock();
        let mut ids: Vec<PeerId> = rooms
            .get(channel)
            .map(|room| room.members.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Room>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add_member(
        &self,
        channel: &str,
        peer_id: &PeerId,
        events: broadcast::Sender<EngineEvent>,
    ) -> anyhow::Result<()> {
        let mut rooms = self.lock();
        let room = rooms.entry(channel.to_owned()).or_default();
        if room.members.contains_key(peer_id) {
            anyhow::bail!("peer {peer_id} is already in channel {channel}");
        }

        // Replay what is already published, as a real engine does after join.
        for (id, member) in &room.members {
            for kind in &member.published {
                let _ = events.send(EngineEvent::UserPublished {
                    user: id.clone(),
                    kind: *kind,
                });
            }
        }

        room.members.insert(
            peer_id.clone(),
            Member {
                published: Vec::new(),
                events,
            },
        );
        Ok(())
    }

    fn publish(&self, channel: &str, peer_id: &PeerId, kinds: &[MediaKind]) -> anyhow::Result<()> {
        let mut rooms = self.lock();
        let room = rooms
            .get_mut(channel)
            .ok_or_else(|| anyhow::anyhow!("channel {channel} does not exist"))?;
        let member = room
            .members
            .get_mut(peer_id)
            .ok_or_else(|| anyhow::anyhow!("peer {peer_id} is not in channel {channel}"))?;

        let fresh: Vec<MediaKind> = kinds
            .iter()
            .copied()
            .filter(|k| !member.published.contains(k))
            .collect();
        member.published.extend(fresh.iter().copied());

        for kind in fresh {
            room.notify_others(
                peer_id,
                &EngineEvent::UserPublished {
                    user: peer_id.clone(),
                    kind,
                },
            );
        }
        Ok(())
    }

    fn has_published(&self, channel: &str, peer_id: &PeerId, kind: MediaKind) -> bool {
        self.lock()
            .get(channel)
            .and_then(|room| room.members.get(peer_id))
            .is_some_and(|m| m.published.contains(&kind))
    }

    fn remove_member(&self, channel: &str, peer_id: &PeerId) {
        let mut rooms = self.lock();
        let Some(room) = rooms.get_mut(channel) else {
            return;
        };
        if room.members.remove(peer_id).is_some() {
            room.notify_others(
                peer_id,
                &EngineEvent::UserLeft {
                    user: peer_id.clone(),
                },
            );
        }
        if room.members.is_empty() {
            rooms.remove(channel);
        }
    }
}

// ---------------------------------------------------------------------------
// Fault injection
// ---------------------------------------------------------------------------

/// Operations to fail on purpose. All off by default. Subscribe faults are
/// per media kind.
#[derive(Default)]
pub struct FaultPlan {
    pub fail_join: AtomicBool,
    pub fail_create_tracks: AtomicBool,
    pub fail_publish: AtomicBool,
    pub fail_subscribe_audio: AtomicBool,
    pub fail_subscribe_video: AtomicBool,
    pub fail_leave: AtomicBool,
}

impl FaultPlan {
    fn subscribe_flag(&self, kind: MediaKind) -> &AtomicBool {
        match kind {
            MediaKind::Audio => &self.fail_subscribe_audio,
            MediaKind::Video => &self.fail_subscribe_video,
        }
    }

    fn check(flag: &AtomicBool, op: &str) -> anyhow::Result<()> {
        if flag.load(Ordering::Acquire) {
            anyhow::bail!("injected {op} failure");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// One context's view of the loopback media system.
pub struct LoopbackMediaEngine {
    hub: Arc<LoopbackMediaHub>,
    events: broadcast::Sender<EngineEvent>,
    membership: Mutex<Option<(String, PeerId)>>,
    pub faults: FaultPlan,
    join_delay: Mutex<Duration>,
    join_calls: AtomicUsize,
    leave_calls: AtomicUsize,
    track_serial: AtomicUsize,
    local_tracks: Mutex<Vec<Arc<VirtualTrack>>>,
}

impl LoopbackMediaEngine {
    pub fn new(hub: Arc<LoopbackMediaHub>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            hub,
            events,
            membership: Mutex::new(None),
            faults: FaultPlan::default(),
            join_delay: Mutex::new(Duration::ZERO),
            join_calls: AtomicUsize::new(0),
            leave_calls: AtomicUsize::new(0),
            track_serial: AtomicUsize::new(0),
            local_tracks: Mutex::new(Vec::new()),
        }
    }

    /// Make `join` take this long before it completes.
    pub fn set_join_delay(&self, delay: Duration) {
        *self.join_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    pub fn join_calls(&self) -> usize {
        self.join_calls.load(Ordering::Acquire)
    }

    pub fn leave_calls(&self) -> usize {
        self.leave_calls.load(Ordering::Acquire)
    }

    pub fn is_joined(&self) -> bool {
        self.membership_lock().is_some()
    }

    /// Every local track this engine has handed out.
    pub fn created_tracks(&self) -> Vec<Arc<VirtualTrack>> {
        self.local_tracks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn membership_lock(&self) -> MutexGuard<'_, Option<(String, PeerId)>> {
        self.membership.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn membership(&self) -> anyhow::Result<(String, PeerId)> {
        self.membership_lock()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("not joined to a room"))
    }
}

#[async_trait]
impl MediaEngine for LoopbackMediaEngine {
    async fn join(&self, config: &EngineConfig, local_id: &PeerId) -> anyhow::Result<()> {
        self.join_calls.fetch_add(1, Ordering::AcqRel);

        let delay = *self.join_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        FaultPlan::check(&self.faults.fail_join, "join")?;

        if self.is_joined() {
            anyhow::bail!("already joined to a room");
        }
        let channel = config.channel.0.clone();
        self.hub.add_member(&channel, local_id, self.events.clone())?;
        *self.membership_lock() = Some((channel.clone(), local_id.clone()));
        info!(%channel, peer_id = %local_id, "Joined loopback room");
        Ok(())
    }

    async fn create_local_tracks(&self) -> anyhow::Result<Vec<SharedTrack>> {
        FaultPlan::check(&self.faults.fail_create_tracks, "track acquisition")?;

        let serial = self.track_serial.fetch_add(1, Ordering::AcqRel);
        let mic = Arc::new(VirtualTrack::new(MediaKind::Audio, format!("mic-{serial}")));
        let camera = Arc::new(VirtualTrack::new(MediaKind::Video, format!("camera-{serial}")));
        self.local_tracks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([Arc::clone(&mic), Arc::clone(&camera)]);

        let tracks: Vec<SharedTrack> = vec![mic, camera];
        Ok(tracks)
    }

    async fn publish(&self, tracks: &[SharedTrack]) -> anyhow::Result<()> {
        FaultPlan::check(&self.faults.fail_publish, "publish")?;
        let (channel, peer_id) = self.membership()?;
        let kinds: Vec<MediaKind> = tracks.iter().map(|t| t.kind()).collect();
        self.hub.publish(&channel, &peer_id, &kinds)?;
        debug!(%channel, ?kinds, "Published local tracks");
        Ok(())
    }

    async fn subscribe(&self, user: &PeerId, kind: MediaKind) -> anyhow::Result<SharedTrack> {
        FaultPlan::check(self.faults.subscribe_flag(kind), "subscribe")?;
        let (channel, _) = self.membership()?;
        if !self.hub.has_published(&channel, user, kind) {
            anyhow::bail!("{user} has not published {kind}");
        }
        Ok(Arc::new(VirtualTrack::new(kind, format!("{user}-{kind}"))))
    }

    async fn leave(&self) -> anyhow::Result<()> {
        self.leave_calls.fetch_add(1, Ordering::AcqRel);
        FaultPlan::check(&self.faults.fail_leave, "leave")?;

        let membership = self.membership_lock().take();
        if let Some((channel, peer_id)) = membership {
            self.hub.remove_member(&channel, &peer_id);
            info!(%channel, %peer_id, "Left loopback room");
        }
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}
