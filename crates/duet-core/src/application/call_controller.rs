//! Call controller: the per-context actor that owns the call state.
//!
//! User commands, decoded bus messages and activation completions all go
//! through one mailbox and are handled strictly in arrival order. Activation
//! runs in its own task so a Leave can be handled while it is in flight.

use std::future::Future;
use std::ops::ControlFlow;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::call::{CallState, GlarePolicy};
use crate::domain::identity::PeerId;
use crate::domain::signal::{BusNotification, SignalKey, SignalMsg};
use crate::error::{ActivationError, CallError};

use super::call_signaling::{CallSignaling, SignalingEffect};
use super::ports::{AppEvents, Participant, SignalBus, SignalCodec};
use super::session_lifecycle::SessionLifecycleManager;

type Reply = oneshot::Sender<Result<(), CallError>>;

enum Command {
    Call { target: String, reply: Reply },
    Accept { reply: Reply },
    Reject { reply: Reply },
    Leave { reply: Reply },
    ToggleMute { reply: oneshot::Sender<bool> },
    State { reply: oneshot::Sender<CallState> },
    Shutdown { reply: oneshot::Sender<()> },
}

enum Event {
    Command(Command),
    Bus(SignalMsg),
    ActivationFinished {
        episode: u64,
        result: Result<(), ActivationError>,
        reply: Option<Reply>,
    },
}

pub struct CallController {
    signaling: CallSignaling,
    bus: Arc<dyn SignalBus>,
    codec: Arc<dyn SignalCodec>,
    session: Arc<SessionLifecycleManager>,
    app_events: Arc<dyn AppEvents>,
    /// Episode whose activation the controller started.
    active: Option<u64>,
    last_state: CallState,
    state_tx: watch::Sender<CallState>,
}

impl CallController {
    pub fn new(
        policy: GlarePolicy,
        bus: Arc<dyn SignalBus>,
        codec: Arc<dyn SignalCodec>,
        session: Arc<SessionLifecycleManager>,
        app_events: Arc<dyn AppEvents>,
    ) -> Self {
        let (state_tx, _) = watch::channel(CallState::Idle);
        Self {
            signaling: CallSignaling::new(session.local_id().clone(), policy),
            bus,
            codec,
            session,
            app_events,
            active: None,
            last_state: CallState::Idle,
            state_tx,
        }
    }

    /// Start the actor and its bus pump. Fails if the bus notification
    /// stream was already taken.
    pub fn spawn(self) -> anyhow::Result<CallHandle> {
        let notifications = self.bus.notifications()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let pump = tokio::spawn(pump_bus(
            notifications,
            Arc::clone(&self.codec),
            tx.downgrade(),
        ));

        let handle = CallHandle {
            local_id: self.signaling.local_id().clone(),
            tx: tx.clone(),
            state: self.state_tx.subscribe(),
            session: Arc::clone(&self.session),
        };
        info!(peer_id = %handle.local_id, "Call controller started");
        tokio::spawn(self.run(rx, tx.downgrade(), pump));
        Ok(handle)
    }

    async fn run(
        mut self,
        mut mailbox: mpsc::UnboundedReceiver<Event>,
        mailbox_tx: mpsc::WeakUnboundedSender<Event>,
        pump: JoinHandle<()>,
    ) {
        while let Some(event) = mailbox.recv().await {
            match event {
                Event::Command(cmd) => {
                    if self.on_command(cmd, &mailbox_tx).await.is_break() {
                        break;
                    }
                }
                Event::Bus(msg) => {
                    let effects = self.signaling.on_signal(msg);
                    let mut reply = None;
                    if let Err(e) = self.execute(effects, &mut reply, &mailbox_tx).await {
                        self.report(&e).await;
                    }
                }
                Event::ActivationFinished {
                    episode,
                    result,
                    reply,
                } => self.on_activation_finished(episode, result, reply).await,
            }
            self.sync_state().await;
        }

        // Every handle is gone (or shutdown was requested).
        pump.abort();
        self.shutdown().await;
        debug!("Call controller stopped");
    }

    async fn on_command(
        &mut self,
        cmd: Command,
        mailbox_tx: &mpsc::WeakUnboundedSender<Event>,
    ) -> ControlFlow<()> {
        let now_ms = Utc::now().timestamp_millis();
        match cmd {
            Command::Call { target, reply } => {
                let mut reply = Some(reply);
                let result = match self.signaling.call(&target, now_ms) {
                    Ok(effects) => self.execute(effects, &mut reply, mailbox_tx).await,
                    Err(e) => Err(e),
                };
                self.finish(reply, result).await;
            }
            Command::Accept { reply } => {
                let effects = self.signaling.accept(now_ms);
                let mut reply = Some(reply);
                let result = self.execute(effects, &mut reply, mailbox_tx).await;
                self.finish(reply, result).await;
            }
            Command::Reject { reply } => {
                let effects = self.signaling.reject();
                let mut reply = Some(reply);
                let result = self.execute(effects, &mut reply, mailbox_tx).await;
                self.finish(reply, result).await;
            }
            Command::Leave { reply } => {
                let effects = self.signaling.leave();
                let mut reply = Some(reply);
                let result = self.execute(effects, &mut reply, mailbox_tx).await;
                self.finish(reply, result).await;
            }
            Command::ToggleMute { reply } => {
                let muted = self.session.toggle_mute().await;
                let _ = reply.send(muted);
            }
            Command::State { reply } => {
                let _ = reply.send(self.signaling.state().clone());
            }
            Command::Shutdown { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Carry out transition effects in order. Activation takes `reply` along
    /// and answers it when it completes.
    async fn execute(
        &mut self,
        effects: Vec<SignalingEffect>,
        reply: &mut Option<Reply>,
        mailbox_tx: &mpsc::WeakUnboundedSender<Event>,
    ) -> Result<(), CallError> {
        for effect in effects {
            match effect {
                SignalingEffect::Publish(msg) => {
                    if let Err(e) = self.publish(&msg).await {
                        warn!(key = %msg.key(), "Signaling write failed: {e:#}");
                        self.signaling.force_idle();
                        return Err(CallError::Bus(format!("{e:#}")));
                    }
                }
                SignalingEffect::Activate { peer } => {
                    // Registered before the task starts, so a Leave queued
                    // behind this event always finds the episode to cancel.
                    let Some(pending) = self.session.begin() else {
                        continue;
                    };
                    let episode = pending.episode_id();
                    self.active = Some(episode);
                    info!(%peer, episode, "Starting media session");

                    let session = Arc::clone(&self.session);
                    let tx = mailbox_tx.clone();
                    let reply = reply.take();
                    tokio::spawn(async move {
                        let result = session.run(pending).await;
                        if let Some(tx) = tx.upgrade() {
                            let _ = tx.send(Event::ActivationFinished {
                                episode,
                                result,
                                reply,
                            });
                        }
                    });
                }
                SignalingEffect::Deactivate => {
                    self.active = None;
                    self.session.deactivate().await;
                }
            }
        }
        Ok(())
    }

    async fn publish(&self, msg: &SignalMsg) -> anyhow::Result<()> {
        let payload = self.codec.encode(msg)?;
        self.bus.write(msg.key(), payload).await?;
        debug!(key = %msg.key(), "Signaling message written");
        Ok(())
    }

    async fn on_activation_finished(
        &mut self,
        episode: u64,
        result: Result<(), ActivationError>,
        reply: Option<Reply>,
    ) {
        let result = match result {
            Ok(()) if self.active == Some(episode) => Ok(()),
            Ok(()) => {
                // The call ended while the last step was finishing.
                warn!(episode, "Media session came up after the call ended; releasing it");
                self.session.end_episode(episode).await;
                Err(CallError::Activation(ActivationError::Cancelled))
            }
            Err(e) => {
                if self.active == Some(episode) && e != ActivationError::Cancelled {
                    self.active = None;
                    self.signaling.force_idle();
                }
                Err(CallError::from(e))
            }
        };
        self.finish(reply, result).await;
    }

    /// Answer the user action, or report the error when nobody is waiting.
    async fn finish(&mut self, reply: Option<Reply>, result: Result<(), CallError>) {
        self.sync_state().await;
        match reply {
            Some(reply) => {
                let _ = reply.send(result);
            }
            None => {
                if let Err(e) = result {
                    self.report(&e).await;
                }
            }
        }
    }

    async fn report(&self, error: &CallError) {
        if matches!(error, CallError::Activation(ActivationError::Cancelled)) {
            return;
        }
        warn!("{error}");
        self.app_events.emit_error(&error.to_string()).await;
    }

    async fn sync_state(&mut self) {
        let state = self.signaling.state();
        if *state == self.last_state {
            return;
        }
        self.last_state = state.clone();
        self.state_tx.send_replace(state.clone());
        self.app_events.emit_call_state(state).await;
    }

    async fn shutdown(&mut self) {
        // Leave yields at most a Deactivate, which is done right here.
        let _ = self.signaling.leave();
        self.active = None;
        self.session.deactivate().await;
        self.sync_state().await;
    }
}

/// Decode bus notifications into mailbox events.
async fn pump_bus(
    mut notifications: mpsc::UnboundedReceiver<BusNotification>,
    codec: Arc<dyn SignalCodec>,
    mailbox: mpsc::WeakUnboundedSender<Event>,
) {
    while let Some(notification) = notifications.recv().await {
        let Some(msg) = decode_notification(codec.as_ref(), notification) else {
            continue;
        };
        let Some(tx) = mailbox.upgrade() else {
            break;
        };
        if tx.send(Event::Bus(msg)).is_err() {
            break;
        }
    }
    debug!("Signaling bus pump stopped");
}

fn decode_notification(codec: &dyn SignalCodec, notification: BusNotification) -> Option<SignalMsg> {
    let key = match SignalKey::from_str(&notification.key) {
        Ok(key) => key,
        Err(e) => {
            debug!("{e}; ignored");
            return None;
        }
    };
    let Some(raw) = notification.new_value else {
        debug!(%key, "Bus key removed; ignored");
        return None;
    };
    match codec.decode(key, &raw) {
        Ok(msg) => Some(msg),
        Err(e) => {
            warn!(%key, "Undecodable signaling payload: {e:#}");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable front door to a running [`CallController`]. The controller
/// shuts down once every handle is dropped.
#[derive(Clone)]
pub struct CallHandle {
    local_id: PeerId,
    tx: mpsc::UnboundedSender<Event>,
    state: watch::Receiver<CallState>,
    session: Arc<SessionLifecycleManager>,
}

impl CallHandle {
    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    pub fn call(&self, target: &str) -> impl Future<Output = Result<(), CallError>> + Send + 'static {
        let target = target.to_owned();
        let reply = self.request(|reply| Command::Call { target, reply });
        async move { reply.await? }
    }

    /// Accept the ringing call; resolves once the media session is up.
    pub fn accept(&self) -> impl Future<Output = Result<(), CallError>> + Send + 'static {
        let reply = self.request(|reply| Command::Accept { reply });
        async move { reply.await? }
    }

    pub fn reject(&self) -> impl Future<Output = Result<(), CallError>> + Send + 'static {
        let reply = self.request(|reply| Command::Reject { reply });
        async move { reply.await? }
    }

    pub fn leave(&self) -> impl Future<Output = Result<(), CallError>> + Send + 'static {
        let reply = self.request(|reply| Command::Leave { reply });
        async move { reply.await? }
    }

    /// Returns the resulting mute state.
    pub fn toggle_mute(&self) -> impl Future<Output = Result<bool, CallError>> + Send + 'static {
        self.request(|reply| Command::ToggleMute { reply })
    }

    /// Call state after every event queued before this one was handled.
    pub fn state(&self) -> impl Future<Output = Result<CallState, CallError>> + Send + 'static {
        self.request(|reply| Command::State { reply })
    }

    /// Follow call state changes.
    pub fn watch_state(&self) -> watch::Receiver<CallState> {
        self.state.clone()
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.session.participants()
    }

    pub fn is_muted(&self) -> bool {
        self.session.is_muted()
    }

    /// Leave any call, release media and stop the controller.
    pub fn shutdown(&self) -> impl Future<Output = Result<(), CallError>> + Send + 'static {
        self.request(|reply| Command::Shutdown { reply })
    }

    /// Queue the command now; the returned future only waits for the reply.
    /// Commands are therefore ordered by call, not by first poll.
    fn request<T: Send + 'static>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> impl Future<Output = Result<T, CallError>> + Send + 'static {
        let (reply_tx, reply_rx) = oneshot::channel();
        let queued = self.tx.send(Event::Command(make(reply_tx))).is_ok();
        async move {
            if !queued {
                return Err(CallError::ControllerClosed);
            }
            reply_rx.await.map_err(|_| CallError::ControllerClosed)
        }
    }
}
