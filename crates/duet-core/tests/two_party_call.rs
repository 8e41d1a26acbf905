//! Two contexts sharing one in-memory bus and one loopback media hub.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use duet_core::adapters::bus::codec::JsonSignalCodec;
use duet_core::adapters::bus::memory::InMemorySignalHub;
use duet_core::adapters::events::LogAppEvents;
use duet_core::adapters::media::loopback::{LoopbackMediaEngine, LoopbackMediaHub};
use duet_core::adapters::registry::InMemoryParticipantRegistry;
use duet_core::application::call_controller::{CallController, CallHandle};
use duet_core::application::ports::MediaTrack;
use duet_core::application::session_lifecycle::SessionLifecycleManager;
use duet_core::config::EngineConfig;
use duet_core::domain::call::{CallState, GlarePolicy};
use duet_core::domain::identity::PeerId;
use duet_core::error::{ActivationError, CallError};

struct Context {
    handle: CallHandle,
    engine: Arc<LoopbackMediaEngine>,
    session: Arc<SessionLifecycleManager>,
}

struct World {
    bus: Arc<InMemorySignalHub>,
    media: Arc<LoopbackMediaHub>,
}

impl World {
    fn new() -> Self {
        Self {
            bus: InMemorySignalHub::new(),
            media: LoopbackMediaHub::new(),
        }
    }

    fn context(&self, id: &str, policy: GlarePolicy) -> Context {
        let engine = self.media.engine();
        let session = Arc::new(SessionLifecycleManager::new(
            engine.clone(),
            Arc::new(InMemoryParticipantRegistry::new()),
            Arc::new(LogAppEvents),
            EngineConfig::new("app", "duet", ""),
            PeerId::from(id),
        ));
        let handle = CallController::new(
            policy,
            self.bus.attach(),
            Arc::new(JsonSignalCodec),
            session.clone(),
            Arc::new(LogAppEvents),
        )
        .spawn()
        .unwrap();
        Context {
            handle,
            engine,
            session,
        }
    }
}

async fn wait_for_state(handle: &CallHandle, expected: CallState) {
    let mut rx = handle.watch_state();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == expected))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {expected}"))
        .unwrap();
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting until {what}");
}

fn ids(handle: &CallHandle) -> Vec<String> {
    let mut ids: Vec<String> = handle
        .participants()
        .into_iter()
        .map(|p| p.id.to_string())
        .collect();
    ids.sort();
    ids
}

async fn connect(a: &Context, b: &Context) {
    let b_id = b.handle.local_id().to_string();
    a.handle.call(&b_id).await.unwrap();
    wait_for_state(&b.handle, CallState::IncomingRinging(a.handle.local_id().clone())).await;
    b.handle.accept().await.unwrap();
    wait_for_state(&a.handle, CallState::Connected(b.handle.local_id().clone())).await;
}

#[tokio::test]
async fn call_accept_and_leave_end_to_end() {
    let world = World::new();
    let a = world.context("111111", GlarePolicy::default());
    let b = world.context("222222", GlarePolicy::default());

    connect(&a, &b).await;
    assert_eq!(b.handle.state().await.unwrap(), CallState::Connected("111111".into()));

    wait_until("A sees both participants", || {
        ids(&a.handle) == ["111111", "222222"]
            && a.handle
                .participants()
                .iter()
                .all(|p| p.audio_track.is_some() && p.video_track.is_some())
    })
    .await;
    wait_until("B sees both participants", || ids(&b.handle) == ["111111", "222222"]).await;

    a.handle.leave().await.unwrap();

    assert_eq!(a.handle.state().await.unwrap(), CallState::Idle);
    assert!(a.session.local_tracks().is_empty());
    assert!(a.handle.participants().is_empty());
    assert!(a.engine.created_tracks().iter().all(|t| t.is_closed()));
    assert_eq!(a.engine.leave_calls(), 1);

    wait_until("B drops A", || !ids(&b.handle).contains(&"111111".to_owned())).await;
    // B stays connected until its user leaves.
    assert_eq!(b.handle.state().await.unwrap(), CallState::Connected("111111".into()));
}

#[tokio::test]
async fn leave_issued_together_with_accept_leaves_no_media_behind() {
    let world = World::new();
    let a = world.context("111111", GlarePolicy::default());
    let b = world.context("222222", GlarePolicy::default());

    a.handle.call("222222").await.unwrap();
    wait_for_state(&b.handle, CallState::IncomingRinging("111111".into())).await;

    let (accepted, left) = tokio::join!(b.handle.accept(), b.handle.leave());
    assert!(matches!(
        accepted,
        Err(CallError::Activation(ActivationError::Cancelled))
    ));
    left.unwrap();

    assert_eq!(b.handle.state().await.unwrap(), CallState::Idle);
    assert!(!b.session.is_active());
    assert!(b.session.local_tracks().is_empty());
    assert!(b.handle.participants().is_empty());
    assert!(b.engine.created_tracks().iter().all(|t| t.is_closed()));

    // A got the CallStart and joins; B must not linger in the room.
    wait_for_state(&a.handle, CallState::Connected("222222".into())).await;
    wait_until("A is alone in the room", || {
        world.media.members("duet") == [PeerId::from("111111")]
    })
    .await;
}

#[tokio::test]
async fn join_then_capture_failure_aborts_to_idle() {
    let world = World::new();
    let a = world.context("111111", GlarePolicy::default());
    let b = world.context("222222", GlarePolicy::default());
    b.engine.faults.fail_create_tracks.store(true, Ordering::Release);

    a.handle.call("222222").await.unwrap();
    wait_for_state(&b.handle, CallState::IncomingRinging("111111".into())).await;

    let err = b.handle.accept().await.unwrap_err();
    assert!(matches!(err, CallError::Activation(ActivationError::AcquireTracks(_))));

    assert_eq!(b.handle.state().await.unwrap(), CallState::Idle);
    assert!(b.session.local_tracks().is_empty());
    assert!(!b.session.is_active());
    assert_eq!(b.engine.leave_calls(), 1);
    assert!(!world.media.members("duet").contains(&"222222".into()));
}

#[tokio::test]
async fn caller_side_activation_failure_goes_idle() {
    let world = World::new();
    let a = world.context("111111", GlarePolicy::default());
    let b = world.context("222222", GlarePolicy::default());
    a.engine.faults.fail_join.store(true, Ordering::Release);

    a.handle.call("222222").await.unwrap();
    wait_for_state(&b.handle, CallState::IncomingRinging("111111".into())).await;
    b.handle.accept().await.unwrap();

    wait_for_state(&a.handle, CallState::Idle).await;
    assert!(!a.session.is_active());
    assert_eq!(a.engine.leave_calls(), 0);
}

#[tokio::test]
async fn double_leave_leaves_the_room_once() {
    let world = World::new();
    let a = world.context("111111", GlarePolicy::default());
    let b = world.context("222222", GlarePolicy::default());
    connect(&a, &b).await;

    let (first, second) = tokio::join!(a.handle.leave(), a.handle.leave());
    first.unwrap();
    second.unwrap();

    assert_eq!(a.engine.leave_calls(), 1);
    assert!(a.handle.participants().is_empty());
    assert_eq!(a.handle.state().await.unwrap(), CallState::Idle);
}

#[tokio::test]
async fn mute_toggles_local_audio_only() {
    let world = World::new();
    let a = world.context("111111", GlarePolicy::default());
    let b = world.context("222222", GlarePolicy::default());
    connect(&a, &b).await;
    wait_until("A is active", || a.session.is_active() && !a.session.local_tracks().is_empty()).await;

    assert!(a.handle.toggle_mute().await.unwrap());
    let mic = a.engine.created_tracks()[0].clone();
    assert!(!mic.is_enabled());
    assert!(!a.handle.toggle_mute().await.unwrap());
    assert!(mic.is_enabled());
}

#[tokio::test]
async fn glare_lower_id_keeps_the_initiator_role() {
    let world = World::new();
    let a = world.context("111111", GlarePolicy::LowerIdInitiates);
    let b = world.context("222222", GlarePolicy::LowerIdInitiates);

    // Both commands are queued before either controller runs.
    let (ra, rb) = tokio::join!(a.handle.call("222222"), b.handle.call("111111"));
    ra.unwrap();
    rb.unwrap();

    wait_for_state(&b.handle, CallState::IncomingRinging("111111".into())).await;
    assert_eq!(a.handle.state().await.unwrap(), CallState::OutgoingRinging("222222".into()));

    b.handle.accept().await.unwrap();
    wait_for_state(&a.handle, CallState::Connected("222222".into())).await;
    assert_eq!(b.handle.state().await.unwrap(), CallState::Connected("111111".into()));
}

#[tokio::test]
async fn glare_accept_race_leaves_both_ringing() {
    let world = World::new();
    let a = world.context("111111", GlarePolicy::AcceptRace);
    let b = world.context("222222", GlarePolicy::AcceptRace);

    let (ra, rb) = tokio::join!(a.handle.call("222222"), b.handle.call("111111"));
    ra.unwrap();
    rb.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(a.handle.state().await.unwrap(), CallState::OutgoingRinging("222222".into()));
    assert_eq!(b.handle.state().await.unwrap(), CallState::OutgoingRinging("111111".into()));

    // Either user giving up recovers; a fresh call then works.
    a.handle.leave().await.unwrap();
    b.handle.leave().await.unwrap();
    connect(&a, &b).await;
}

#[tokio::test]
async fn third_context_is_not_disturbed() {
    let world = World::new();
    let a = world.context("111111", GlarePolicy::default());
    let b = world.context("222222", GlarePolicy::default());
    let c = world.context("333333", GlarePolicy::default());

    connect(&a, &b).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(c.handle.state().await.unwrap(), CallState::Idle);
    assert_eq!(c.engine.join_calls(), 0);
}
