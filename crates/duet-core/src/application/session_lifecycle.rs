//! Session lifecycle use case: owns local media for one connected episode.
//!
//! Activation joins the room, captures, registers self, publishes and starts
//! the participant listener. Each step races the episode's cancellation token
//! and records what it acquired, so [`SessionLifecycleManager::deactivate`]
//! can unwind exactly what exists no matter where activation stopped.
//!
//! Lock order: `inner` before an episode's `progress`. Neither is held across
//! an await.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::domain::identity::PeerId;
use crate::domain::media::{video_container, EngineEvent, MediaKind};
use crate::error::ActivationError;

use super::ports::{AppEvents, MediaEngine, Participant, ParticipantRegistry, SharedTrack};

// ---------------------------------------------------------------------------
// Episode bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum JoinStatus {
    #[default]
    NotJoined,
    /// Join was sent and may have landed.
    Joining,
    Joined,
}

#[derive(Default)]
struct Progress {
    join: JoinStatus,
    tracks: Vec<SharedTrack>,
    listener: Option<JoinHandle<()>>,
}

/// One connected episode: from activation to deactivation.
struct Episode {
    id: u64,
    cancel: CancellationToken,
    progress: Mutex<Progress>,
}

impl Episode {
    fn new(id: u64) -> Self {
        Self {
            id,
            cancel: CancellationToken::new(),
            progress: Mutex::new(Progress::default()),
        }
    }

    fn progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` unless the episode was cancelled. Teardown cancels before it
    /// drains, so anything recorded here is seen by the teardown.
    fn record<T>(&self, f: impl FnOnce(&mut Progress) -> T) -> Result<T, ActivationError> {
        let mut progress = self.progress();
        if self.cancel.is_cancelled() {
            return Err(ActivationError::Cancelled);
        }
        Ok(f(&mut progress))
    }
}

/// An episode registered by [`SessionLifecycleManager::begin`] whose
/// activation steps have not run yet.
pub struct PendingActivation {
    episode: Arc<Episode>,
}

impl PendingActivation {
    pub fn episode_id(&self) -> u64 {
        self.episode.id
    }
}

#[derive(Default)]
struct SessionInner {
    episode: Option<Arc<Episode>>,
    muted: bool,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct SessionLifecycleManager {
    engine: Arc<dyn MediaEngine>,
    registry: Arc<dyn ParticipantRegistry>,
    app_events: Arc<dyn AppEvents>,
    config: EngineConfig,
    local_id: PeerId,
    inner: Mutex<SessionInner>,
    next_episode: AtomicU64,
}

impl SessionLifecycleManager {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        registry: Arc<dyn ParticipantRegistry>,
        app_events: Arc<dyn AppEvents>,
        config: EngineConfig,
        local_id: PeerId,
    ) -> Self {
        Self {
            engine,
            registry,
            app_events,
            config,
            local_id,
            inner: Mutex::new(SessionInner::default()),
            next_episode: AtomicU64::new(1),
        }
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    pub fn is_active(&self) -> bool {
        self.lock().episode.is_some()
    }

    pub fn is_muted(&self) -> bool {
        self.lock().muted
    }

    /// The Local Track Set. Empty unless an episode is active.
    pub fn local_tracks(&self) -> Vec<SharedTrack> {
        let episode = self.lock().episode.clone();
        episode
            .map(|ep| ep.progress().tracks.clone())
            .unwrap_or_default()
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.registry.participants()
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Activation
    // -----------------------------------------------------------------------

    /// Bring the media session up. A no-op while an episode is active.
    ///
    /// On failure everything acquired so far has been released. On
    /// [`ActivationError::Cancelled`] the concurrent deactivation does that.
    pub async fn activate(&self) -> Result<(), ActivationError> {
        match self.begin() {
            Some(pending) => self.run(pending).await,
            None => Ok(()),
        }
    }

    /// Register a new episode without running any step yet, so a
    /// [`deactivate`](Self::deactivate) issued from now on cancels it.
    /// `None` while an episode is already active.
    pub fn begin(&self) -> Option<PendingActivation> {
        let mut inner = self.lock();
        if inner.episode.is_some() {
            debug!("Media session already active");
            return None;
        }
        let id = self.next_episode.fetch_add(1, Ordering::Relaxed);
        let episode = Arc::new(Episode::new(id));
        inner.episode = Some(Arc::clone(&episode));
        inner.muted = false;
        Some(PendingActivation { episode })
    }

    /// Run the activation steps of an episode obtained from [`begin`](Self::begin).
    pub async fn run(&self, pending: PendingActivation) -> Result<(), ActivationError> {
        let episode = pending.episode;
        info!(episode = episode.id, channel = %self.config.channel, "Activating media session");

        match self.run_activation(&episode).await {
            Ok(()) => {
                info!(episode = episode.id, "Media session active");
                Ok(())
            }
            Err(ActivationError::Cancelled) => {
                info!(episode = episode.id, "Activation cancelled");
                Err(ActivationError::Cancelled)
            }
            Err(e) => {
                warn!(episode = episode.id, "Activation failed: {e}");
                self.end_episode(episode.id).await;
                Err(e)
            }
        }
    }

    async fn run_activation(&self, episode: &Arc<Episode>) -> Result<(), ActivationError> {
        // Subscribe before joining so publications announced during the join
        // are buffered for the listener.
        let events = self.engine.events();

        // --- 1. Join the room ---
        episode.record(|p| p.join = JoinStatus::Joining)?;
        let joined = tokio::select! {
            biased;
            _ = episode.cancel.cancelled() => return Err(ActivationError::Cancelled),
            r = self.engine.join(&self.config, &self.local_id) => r,
        };
        if let Err(e) = joined {
            episode.progress().join = JoinStatus::NotJoined;
            return Err(ActivationError::Join(format!("{e:#}")));
        }
        episode.record(|p| p.join = JoinStatus::Joined)?;
        info!(channel = %self.config.channel, peer_id = %self.local_id, "Joined room");

        // --- 2. Acquire local tracks ---
        let tracks = tokio::select! {
            biased;
            _ = episode.cancel.cancelled() => return Err(ActivationError::Cancelled),
            r = self.engine.create_local_tracks() => {
                r.map_err(|e| ActivationError::AcquireTracks(format!("{e:#}")))?
            }
        };
        if let Err(cancelled) = episode.record(|p| p.tracks = tracks.clone()) {
            close_tracks(&tracks);
            return Err(cancelled);
        }
        debug!(count = tracks.len(), "Local tracks acquired");

        // --- 3. Register self ---
        let mut me = Participant::new(self.local_id.clone());
        me.audio_track = first_of_kind(&tracks, MediaKind::Audio);
        me.video_track = first_of_kind(&tracks, MediaKind::Video);
        let registry = Arc::clone(&self.registry);
        episode.record(|_| registry.upsert(me.clone()))?;
        if let Some(video) = &me.video_track {
            if let Err(e) = video.play(Some(&video_container(&self.local_id))) {
                warn!("Failed to play local video: {e}");
            }
        }
        self.app_events.emit_participant_joined(&me).await;

        // --- 4. Publish ---
        tokio::select! {
            biased;
            _ = episode.cancel.cancelled() => return Err(ActivationError::Cancelled),
            r = self.engine.publish(&tracks) => {
                r.map_err(|e| ActivationError::Publish(format!("{e:#}")))?
            }
        }
        info!(count = tracks.len(), "Published local tracks");

        // --- 5. Listen for remote participants ---
        let listener = ParticipantListener {
            engine: Arc::clone(&self.engine),
            registry: Arc::clone(&self.registry),
            app_events: Arc::clone(&self.app_events),
            local_id: self.local_id.clone(),
            episode: Arc::clone(episode),
            cancel: episode.cancel.child_token(),
        };
        let handle = tokio::spawn(listener.run(events));
        // If cancelled meanwhile, the child token already stopped the listener.
        episode.record(|p| p.listener = Some(handle))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Deactivation
    // -----------------------------------------------------------------------

    /// End the active episode. A no-op when nothing is active.
    ///
    /// Always completes: close and leave failures are logged and reported,
    /// never returned.
    pub async fn deactivate(&self) {
        let episode = {
            let mut inner = self.lock();
            inner.muted = false;
            inner.episode.take()
        };
        match episode {
            Some(ep) => {
                info!(episode = ep.id, "Deactivating media session");
                self.teardown(&ep).await;
            }
            None => debug!("Media session not active"),
        }
    }

    /// End episode `id` if it is still the active one. A no-op otherwise, so
    /// a later episode is never torn down by mistake.
    pub async fn end_episode(&self, id: u64) {
        let current = {
            let mut inner = self.lock();
            let is_current = inner.episode.as_ref().is_some_and(|ep| ep.id == id);
            if is_current {
                inner.muted = false;
                inner.episode.take()
            } else {
                None
            }
        };
        if let Some(ep) = current {
            self.teardown(&ep).await;
        }
    }

    async fn teardown(&self, episode: &Episode) {
        episode.cancel.cancel();
        let (join, tracks, listener) = {
            let mut progress = episode.progress();
            (
                std::mem::take(&mut progress.join),
                std::mem::take(&mut progress.tracks),
                progress.listener.take(),
            )
        };

        // --- 1. Stop listening ---
        if let Some(handle) = listener {
            if let Err(e) = handle.await {
                warn!("Participant listener ended abnormally: {e}");
            }
        }

        // --- 2. Close local tracks ---
        close_tracks(&tracks);

        // --- 3. Leave the room ---
        if join != JoinStatus::NotJoined {
            match self.engine.leave().await {
                Ok(()) => info!(channel = %self.config.channel, "Left room"),
                Err(e) => {
                    warn!("Failed to leave room: {e:#}");
                    self.app_events
                        .emit_error(&format!("Leaving the room failed: {e:#}"))
                        .await;
                }
            }
        }

        // --- 4. Clear derived state ---
        self.registry.clear();
        info!(episode = episode.id, "Media session ended");
    }

    // -----------------------------------------------------------------------
    // Mute
    // -----------------------------------------------------------------------

    /// Flip the local microphone. Returns the resulting mute state, which is
    /// unchanged when there is no local audio track or the flip failed.
    pub async fn toggle_mute(&self) -> bool {
        let (episode_id, audio, muted) = {
            let inner = self.lock();
            let audio = inner.episode.as_ref().and_then(|ep| {
                first_of_kind(&ep.progress().tracks, MediaKind::Audio).map(|t| (ep.id, t))
            });
            match audio {
                Some((id, track)) => (id, track, inner.muted),
                None => {
                    warn!("No local audio track; mute state unchanged");
                    return inner.muted;
                }
            }
        };

        let want_muted = !muted;
        if let Err(e) = audio.set_enabled(!want_muted).await {
            warn!("Failed to toggle mute: {e:#}");
            return muted;
        }

        {
            let mut inner = self.lock();
            if !inner.episode.as_ref().is_some_and(|ep| ep.id == episode_id) {
                return inner.muted;
            }
            inner.muted = want_muted;
        }
        info!(muted = want_muted, "Microphone toggled");
        self.app_events.emit_mute_changed(want_muted).await;
        want_muted
    }
}

fn first_of_kind(tracks: &[SharedTrack], kind: MediaKind) -> Option<SharedTrack> {
    tracks.iter().find(|t| t.kind() == kind).cloned()
}

fn close_tracks(tracks: &[SharedTrack]) {
    for track in tracks {
        match track.close() {
            Ok(()) => debug!(track = track.id(), kind = %track.kind(), "Closed local track"),
            Err(e) => warn!(track = track.id(), "Failed to close local track: {e:#}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Participant listener
// ---------------------------------------------------------------------------

/// Applies engine notifications to the registry for one episode.
struct ParticipantListener {
    engine: Arc<dyn MediaEngine>,
    registry: Arc<dyn ParticipantRegistry>,
    app_events: Arc<dyn AppEvents>,
    local_id: PeerId,
    episode: Arc<Episode>,
    cancel: CancellationToken,
}

impl ParticipantListener {
    async fn run(self, mut events: broadcast::Receiver<EngineEvent>) {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                ev = events.recv() => ev,
            };
            match event {
                Ok(EngineEvent::UserPublished { user, kind }) => self.on_published(user, kind).await,
                Ok(EngineEvent::UserLeft { user }) => self.on_left(user).await,
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Participant listener lagged behind engine events");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Participant listener stopped");
    }

    async fn on_published(&self, user: PeerId, kind: MediaKind) {
        if user == self.local_id {
            return;
        }
        info!(peer_id = %user, %kind, "Remote user published");

        let subscribed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            r = self.engine.subscribe(&user, kind) => r,
        };
        let track = match subscribed {
            Ok(track) => track,
            Err(e) => {
                warn!(peer_id = %user, %kind, "Subscribe failed: {e:#}");
                return;
            }
        };

        // Audio and video attach independently; one failing never blocks the other.
        let target = match kind {
            MediaKind::Video => Some(video_container(&user)),
            MediaKind::Audio => None,
        };
        if let Err(e) = track.play(target.as_deref()) {
            warn!(peer_id = %user, %kind, "Failed to play remote track: {e:#}");
        }

        let registry = &self.registry;
        let Ok(added) = self
            .episode
            .record(|_| registry.attach_track(&user, Arc::clone(&track)))
        else {
            return;
        };
        if added {
            if let Some(participant) = registry.get(&user) {
                self.app_events.emit_participant_joined(&participant).await;
            }
        }
    }

    async fn on_left(&self, user: PeerId) {
        info!(peer_id = %user, "Remote user left");
        let registry = &self.registry;
        if let Ok(Some(_)) = self.episode.record(|_| registry.remove(&user)) {
            self.app_events.emit_participant_left(&user).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::adapters::events::LogAppEvents;
    use crate::adapters::media::loopback::{LoopbackMediaEngine, LoopbackMediaHub};
    use crate::adapters::registry::InMemoryParticipantRegistry;
    use crate::application::ports::MediaTrack;

    struct Fixture {
        engine: Arc<LoopbackMediaEngine>,
        registry: Arc<InMemoryParticipantRegistry>,
        session: Arc<SessionLifecycleManager>,
    }

    fn fixture(hub: &Arc<LoopbackMediaHub>, id: &str) -> Fixture {
        let engine = hub.engine();
        let registry = Arc::new(InMemoryParticipantRegistry::new());
        let session = Arc::new(SessionLifecycleManager::new(
            engine.clone(),
            registry.clone(),
            Arc::new(LogAppEvents),
            EngineConfig::new("app", "room", ""),
            PeerId::from(id),
        ));
        Fixture {
            engine,
            registry,
            session,
        }
    }

    #[tokio::test]
    async fn activation_registers_self_with_local_tracks() {
        let hub = LoopbackMediaHub::new();
        let f = fixture(&hub, "111111");

        f.session.activate().await.unwrap();

        assert!(f.session.is_active());
        assert_eq!(f.session.local_tracks().len(), 2);
        let me = f.registry.get(&"111111".into()).unwrap();
        assert!(me.audio_track.is_some());
        assert!(me.video_track.is_some());
        assert_eq!(hub.members("room"), vec![PeerId::from("111111")]);
    }

    #[tokio::test]
    async fn second_activation_is_a_noop() {
        let hub = LoopbackMediaHub::new();
        let f = fixture(&hub, "111111");

        f.session.activate().await.unwrap();
        f.session.activate().await.unwrap();
        assert_eq!(f.engine.join_calls(), 1);
    }

    #[tokio::test]
    async fn mute_toggles_strictly_alternate() {
        let hub = LoopbackMediaHub::new();
        let f = fixture(&hub, "111111");
        f.session.activate().await.unwrap();
        let mic = f.engine.created_tracks()[0].clone();
        assert_eq!(mic.kind(), MediaKind::Audio);

        assert!(!f.session.is_muted());
        assert!(mic.is_enabled());

        assert!(f.session.toggle_mute().await);
        assert!(!mic.is_enabled());

        assert!(!f.session.toggle_mute().await);
        assert!(mic.is_enabled());

        // Mute never drops the track from the registry.
        let me = f.registry.get(&"111111".into()).unwrap();
        assert!(me.audio_track.is_some());
    }

    #[tokio::test]
    async fn mute_without_audio_track_changes_nothing() {
        let hub = LoopbackMediaHub::new();
        let f = fixture(&hub, "111111");
        assert!(!f.session.toggle_mute().await);
        assert!(!f.session.is_muted());
    }

    #[tokio::test]
    async fn deactivation_releases_everything_once() {
        let hub = LoopbackMediaHub::new();
        let f = fixture(&hub, "111111");
        f.session.activate().await.unwrap();
        f.session.toggle_mute().await;

        f.session.deactivate().await;
        f.session.deactivate().await;

        assert!(!f.session.is_active());
        assert!(!f.session.is_muted());
        assert!(f.session.local_tracks().is_empty());
        assert!(f.registry.participants().is_empty());
        assert!(f.engine.created_tracks().iter().all(|t| t.is_closed()));
        assert_eq!(f.engine.leave_calls(), 1);
        assert!(hub.members("room").is_empty());
    }

    #[tokio::test]
    async fn concurrent_deactivations_leave_once() {
        let hub = LoopbackMediaHub::new();
        let f = fixture(&hub, "111111");
        f.session.activate().await.unwrap();

        tokio::join!(f.session.deactivate(), f.session.deactivate());
        assert_eq!(f.engine.leave_calls(), 1);
    }

    #[tokio::test]
    async fn join_failure_aborts_without_leaving() {
        let hub = LoopbackMediaHub::new();
        let f = fixture(&hub, "111111");
        f.engine.faults.fail_join.store(true, Ordering::Release);

        let err = f.session.activate().await.unwrap_err();
        assert!(matches!(err, ActivationError::Join(_)));
        assert!(!f.session.is_active());
        assert_eq!(f.engine.leave_calls(), 0);
        assert!(f.registry.participants().is_empty());
    }

    #[tokio::test]
    async fn track_failure_after_join_leaves_the_room() {
        let hub = LoopbackMediaHub::new();
        let f = fixture(&hub, "111111");
        f.engine.faults.fail_create_tracks.store(true, Ordering::Release);

        let err = f.session.activate().await.unwrap_err();
        assert!(matches!(err, ActivationError::AcquireTracks(_)));
        assert!(!f.session.is_active());
        assert!(f.session.local_tracks().is_empty());
        assert_eq!(f.engine.leave_calls(), 1);
        assert!(!f.engine.is_joined());
        assert!(hub.members("room").is_empty());
    }

    #[tokio::test]
    async fn publish_failure_closes_tracks_and_leaves() {
        let hub = LoopbackMediaHub::new();
        let f = fixture(&hub, "111111");
        f.engine.faults.fail_publish.store(true, Ordering::Release);

        let err = f.session.activate().await.unwrap_err();
        assert!(matches!(err, ActivationError::Publish(_)));
        assert!(f.engine.created_tracks().iter().all(|t| t.is_closed()));
        assert!(f.registry.participants().is_empty());
        assert_eq!(f.engine.leave_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn leave_during_join_cancels_and_unwinds() {
        let hub = LoopbackMediaHub::new();
        let f = fixture(&hub, "111111");
        f.engine.set_join_delay(Duration::from_secs(10));

        let session = f.session.clone();
        let activation = tokio::spawn(async move { session.activate().await });
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(f.session.is_active());

        f.session.deactivate().await;

        assert_eq!(activation.await.unwrap(), Err(ActivationError::Cancelled));
        assert!(!f.session.is_active());
        assert!(f.engine.created_tracks().is_empty());
        assert!(f.registry.participants().is_empty());
        // The join was in flight, so it is left.
        assert_eq!(f.engine.leave_calls(), 1);
    }

    #[tokio::test]
    async fn deactivation_between_begin_and_run_skips_every_step() {
        let hub = LoopbackMediaHub::new();
        let f = fixture(&hub, "111111");

        let pending = f.session.begin().unwrap();
        assert!(f.session.is_active());
        f.session.deactivate().await;

        assert_eq!(f.session.run(pending).await, Err(ActivationError::Cancelled));
        assert!(!f.session.is_active());
        assert_eq!(f.engine.join_calls(), 0);
        assert_eq!(f.engine.leave_calls(), 0);
        assert!(f.engine.created_tracks().is_empty());
        assert!(hub.members("room").is_empty());
    }

    #[tokio::test]
    async fn ending_a_stale_episode_keeps_the_current_one() {
        let hub = LoopbackMediaHub::new();
        let f = fixture(&hub, "111111");

        let first = f.session.begin().unwrap();
        let stale = first.episode_id();
        f.session.run(first).await.unwrap();
        f.session.deactivate().await;
        f.session.activate().await.unwrap();

        f.session.end_episode(stale).await;
        assert!(f.session.is_active());
        assert_eq!(f.session.local_tracks().len(), 2);
        assert_eq!(f.engine.leave_calls(), 1);
    }

    #[tokio::test]
    async fn leave_failure_still_ends_the_session() {
        let hub = LoopbackMediaHub::new();
        let f = fixture(&hub, "111111");
        f.session.activate().await.unwrap();
        f.engine.faults.fail_leave.store(true, Ordering::Release);

        f.session.deactivate().await;

        assert!(!f.session.is_active());
        assert!(f.registry.participants().is_empty());
        assert!(f.engine.created_tracks().iter().all(|t| t.is_closed()));
        assert_eq!(f.engine.leave_calls(), 1);
    }

    #[tokio::test]
    async fn remote_publications_populate_the_registry() {
        let hub = LoopbackMediaHub::new();
        let a = fixture(&hub, "111111");
        let b = fixture(&hub, "222222");

        a.session.activate().await.unwrap();
        b.session.activate().await.unwrap();

        for _ in 0..100 {
            if a.registry.get(&"222222".into()).is_some_and(|p| p.video_track.is_some() && p.audio_track.is_some()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let remote = a.registry.get(&"222222".into()).unwrap();
        assert!(remote.audio_track.is_some());
        assert!(remote.video_track.is_some());
        assert!(b.registry.contains(&"111111".into()));

        b.session.deactivate().await;
        for _ in 0..100 {
            if !a.registry.contains(&"222222".into()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!a.registry.contains(&"222222".into()));
        assert!(a.registry.contains(&"111111".into()));
    }

    async fn wait_for_remote(
        registry: &InMemoryParticipantRegistry,
        id: &str,
        ready: impl Fn(&Participant) -> bool,
    ) -> Participant {
        for _ in 0..100 {
            if let Some(p) = registry.get(&id.into()).filter(|p| ready(p)) {
                return p;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("remote participant {id} never became ready");
    }

    #[tokio::test]
    async fn audio_subscribe_failure_does_not_block_video() {
        let hub = LoopbackMediaHub::new();
        let a = fixture(&hub, "111111");
        let b = fixture(&hub, "222222");
        a.engine.faults.fail_subscribe_audio.store(true, Ordering::Release);

        a.session.activate().await.unwrap();
        b.session.activate().await.unwrap();

        // Audio is announced before video, so by the time video attached the
        // audio subscription has already failed.
        let remote = wait_for_remote(&a.registry, "222222", |p| p.video_track.is_some()).await;
        assert!(remote.audio_track.is_none());
    }

    #[tokio::test]
    async fn audio_only_publisher_is_registered_without_video() {
        let hub = LoopbackMediaHub::new();
        let a = fixture(&hub, "111111");
        a.session.activate().await.unwrap();

        let remote = hub.engine();
        remote
            .join(&EngineConfig::new("app", "room", ""), &PeerId::from("333333"))
            .await
            .unwrap();
        let audio: Vec<SharedTrack> = remote
            .create_local_tracks()
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.kind() == MediaKind::Audio)
            .collect();
        remote.publish(&audio).await.unwrap();

        let entry = wait_for_remote(&a.registry, "333333", |p| p.audio_track.is_some()).await;
        assert!(entry.video_track.is_none());
        assert_eq!(a.session.participants().len(), 2);
    }
}
