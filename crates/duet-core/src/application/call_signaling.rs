//! Call signaling state machine.
//!
//! Pure and synchronous: every input returns the effects the caller must
//! carry out (bus writes, session activation). It never touches media.

use tracing::{debug, info, trace, warn};

use crate::domain::call::{CallState, GlarePolicy};
use crate::domain::identity::PeerId;
use crate::domain::signal::{CallRequest, CallStart, SignalMsg};
use crate::error::CallError;

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEffect {
    /// Write this message to the signaling bus.
    Publish(SignalMsg),
    /// Start the media session with `peer`.
    Activate { peer: PeerId },
    /// Tear the media session down.
    Deactivate,
}

pub struct CallSignaling {
    local_id: PeerId,
    state: CallState,
    policy: GlarePolicy,
}

impl CallSignaling {
    pub fn new(local_id: PeerId, policy: GlarePolicy) -> Self {
        Self {
            local_id,
            state: CallState::Idle,
            policy,
        }
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    pub fn state(&self) -> &CallState {
        &self.state
    }

    // -----------------------------------------------------------------------
    // User actions
    // -----------------------------------------------------------------------

    /// Ring `target`. Fails without side effects on a blank id or when busy.
    pub fn call(&mut self, target: &str, now_ms: i64) -> Result<Vec<SignalingEffect>, CallError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(CallError::EmptyTarget);
        }
        if !self.state.is_idle() {
            return Err(CallError::Busy(self.state.clone()));
        }

        let target = PeerId::from(target);
        info!(%target, "Placing call");
        self.state = CallState::OutgoingRinging(target.clone());
        Ok(vec![SignalingEffect::Publish(SignalMsg::CallRequest(
            CallRequest {
                sender_id: self.local_id.clone(),
                target_id: target,
                timestamp: now_ms,
            },
        ))])
    }

    /// Accept the ringing call. No-op unless `IncomingRinging`.
    pub fn accept(&mut self, now_ms: i64) -> Vec<SignalingEffect> {
        let CallState::IncomingRinging(caller) = &self.state else {
            debug!(state = %self.state, "Accept ignored");
            return Vec::new();
        };
        let caller = caller.clone();
        info!(%caller, "Accepting call");
        self.state = CallState::Connected(caller.clone());
        vec![
            SignalingEffect::Publish(SignalMsg::CallStart(CallStart {
                receiver_id: self.local_id.clone(),
                caller_id: caller.clone(),
                timestamp: now_ms,
            })),
            SignalingEffect::Activate { peer: caller },
        ]
    }

    /// Decline the ringing call. No-op unless `IncomingRinging`.
    pub fn reject(&mut self) -> Vec<SignalingEffect> {
        if let CallState::IncomingRinging(caller) = &self.state {
            info!(%caller, "Rejecting call");
            self.state = CallState::Idle;
        } else {
            debug!(state = %self.state, "Reject ignored");
        }
        Vec::new()
    }

    /// Hang up (connected), give up (outgoing) or decline (incoming).
    pub fn leave(&mut self) -> Vec<SignalingEffect> {
        match std::mem::take(&mut self.state) {
            CallState::Connected(peer) => {
                info!(%peer, "Leaving call");
                vec![SignalingEffect::Deactivate]
            }
            CallState::OutgoingRinging(target) => {
                info!(%target, "Cancelling outgoing call");
                Vec::new()
            }
            CallState::IncomingRinging(caller) => {
                info!(%caller, "Declining incoming call");
                Vec::new()
            }
            CallState::Idle => Vec::new(),
        }
    }

    /// Drop back to `Idle` without effects, after a failure elsewhere.
    pub fn force_idle(&mut self) {
        if !self.state.is_idle() {
            warn!(state = %self.state, "Forcing call state to idle");
        }
        self.state = CallState::Idle;
    }

    // -----------------------------------------------------------------------
    // Bus input
    // -----------------------------------------------------------------------

    pub fn on_signal(&mut self, msg: SignalMsg) -> Vec<SignalingEffect> {
        match msg {
            SignalMsg::CallRequest(req) => self.on_call_request(req),
            SignalMsg::CallStart(start) => self.on_call_start(start),
        }
    }

    fn on_call_request(&mut self, req: CallRequest) -> Vec<SignalingEffect> {
        if req.target_id != self.local_id {
            trace!(target = %req.target_id, "CallRequest not for us");
            return Vec::new();
        }

        match &self.state {
            CallState::Idle => {
                info!(caller = %req.sender_id, "Incoming call");
                self.state = CallState::IncomingRinging(req.sender_id);
            }
            CallState::OutgoingRinging(target) if *target == req.sender_id => {
                self.resolve_glare(req.sender_id);
            }
            other => {
                debug!(state = %other, caller = %req.sender_id, "CallRequest ignored while busy");
            }
        }
        Vec::new()
    }

    fn resolve_glare(&mut self, other: PeerId) {
        match self.policy {
            GlarePolicy::AcceptRace => {
                warn!(%other, "Both sides are calling each other; leaving it unresolved");
            }
            GlarePolicy::LowerIdInitiates if self.local_id < other => {
                info!(%other, "Crossing call; keeping the initiator role");
            }
            GlarePolicy::LowerIdInitiates => {
                info!(%other, "Crossing call; yielding initiator role");
                self.state = CallState::IncomingRinging(other);
            }
        }
    }

    fn on_call_start(&mut self, start: CallStart) -> Vec<SignalingEffect> {
        let Some(peer) = start.counterpart_of(&self.local_id).cloned() else {
            trace!("CallStart not for us");
            return Vec::new();
        };

        let CallState::OutgoingRinging(target) = &self.state else {
            debug!(state = %self.state, %peer, "CallStart ignored");
            return Vec::new();
        };
        if *target != peer {
            warn!(%target, %peer, "CallStart names a different peer than the one we rang");
        }

        info!(%peer, "Call accepted by peer");
        self.state = CallState::Connected(peer.clone());
        vec![SignalingEffect::Activate { peer }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    fn machine(id: &str) -> CallSignaling {
        CallSignaling::new(PeerId::from(id), GlarePolicy::LowerIdInitiates)
    }

    fn request(sender: &str, target: &str) -> SignalMsg {
        SignalMsg::CallRequest(CallRequest {
            sender_id: sender.into(),
            target_id: target.into(),
            timestamp: NOW,
        })
    }

    fn start(receiver: &str, caller: &str) -> SignalMsg {
        SignalMsg::CallStart(CallStart {
            receiver_id: receiver.into(),
            caller_id: caller.into(),
            timestamp: NOW,
        })
    }

    #[test]
    fn call_publishes_one_request_and_rings() {
        for target in ["222222", "x", "some peer"] {
            let mut m = machine("111111");
            let effects = m.call(target, NOW).unwrap();
            assert_eq!(
                effects,
                vec![SignalingEffect::Publish(request("111111", target))]
            );
            assert_eq!(m.state(), &CallState::OutgoingRinging(target.into()));
        }
    }

    #[test]
    fn blank_target_is_rejected_without_transition() {
        for target in ["", "  ", "\t"] {
            let mut m = machine("111111");
            assert!(matches!(m.call(target, NOW), Err(CallError::EmptyTarget)));
            assert_eq!(m.state(), &CallState::Idle);
        }
    }

    #[test]
    fn call_while_busy_fails() {
        let mut m = machine("111111");
        m.call("222222", NOW).unwrap();
        assert!(matches!(m.call("333333", NOW), Err(CallError::Busy(_))));
        assert_eq!(m.state(), &CallState::OutgoingRinging("222222".into()));
    }

    #[test]
    fn request_for_us_rings_and_others_are_ignored() {
        let mut m = machine("222222");
        assert!(m.on_signal(request("111111", "333333")).is_empty());
        assert_eq!(m.state(), &CallState::Idle);

        assert!(m.on_signal(request("111111", "222222")).is_empty());
        assert_eq!(m.state(), &CallState::IncomingRinging("111111".into()));
    }

    #[test]
    fn accept_publishes_start_and_activates() {
        let mut m = machine("222222");
        m.on_signal(request("111111", "222222"));

        let effects = m.accept(NOW);
        assert_eq!(
            effects,
            vec![
                SignalingEffect::Publish(start("222222", "111111")),
                SignalingEffect::Activate {
                    peer: "111111".into()
                },
            ]
        );
        assert_eq!(m.state(), &CallState::Connected("111111".into()));
    }

    #[test]
    fn reject_returns_to_idle_silently() {
        let mut m = machine("222222");
        m.on_signal(request("111111", "222222"));
        assert!(m.reject().is_empty());
        assert_eq!(m.state(), &CallState::Idle);
    }

    #[test]
    fn accept_and_reject_are_noops_outside_incoming() {
        let mut m = machine("111111");
        assert!(m.accept(NOW).is_empty());
        assert!(m.reject().is_empty());
        assert_eq!(m.state(), &CallState::Idle);

        m.call("222222", NOW).unwrap();
        assert!(m.accept(NOW).is_empty());
        assert!(m.reject().is_empty());
        assert_eq!(m.state(), &CallState::OutgoingRinging("222222".into()));
    }

    #[test]
    fn call_start_connects_caller_from_either_field() {
        let mut m = machine("111111");
        m.call("222222", NOW).unwrap();
        let effects = m.on_signal(start("222222", "111111"));
        assert_eq!(
            effects,
            vec![SignalingEffect::Activate {
                peer: "222222".into()
            }]
        );
        assert_eq!(m.state(), &CallState::Connected("222222".into()));

        let mut m = machine("111111");
        m.call("222222", NOW).unwrap();
        m.on_signal(start("111111", "222222"));
        assert_eq!(m.state(), &CallState::Connected("222222".into()));
    }

    #[test]
    fn call_start_for_someone_else_is_ignored() {
        let mut m = machine("111111");
        m.call("222222", NOW).unwrap();
        assert!(m.on_signal(start("222222", "333333")).is_empty());
        assert_eq!(m.state(), &CallState::OutgoingRinging("222222".into()));
    }

    #[test]
    fn call_start_while_idle_is_ignored() {
        let mut m = machine("111111");
        assert!(m.on_signal(start("222222", "111111")).is_empty());
        assert_eq!(m.state(), &CallState::Idle);
    }

    #[test]
    fn stale_request_while_connected_is_ignored() {
        let mut m = machine("222222");
        m.on_signal(request("111111", "222222"));
        m.accept(NOW);
        assert!(m.on_signal(request("333333", "222222")).is_empty());
        assert_eq!(m.state(), &CallState::Connected("111111".into()));
    }

    #[test]
    fn leave_from_each_state() {
        let mut m = machine("222222");
        m.on_signal(request("111111", "222222"));
        m.accept(NOW);
        assert_eq!(m.leave(), vec![SignalingEffect::Deactivate]);
        assert_eq!(m.state(), &CallState::Idle);

        assert!(m.leave().is_empty());

        m.call("333333", NOW).unwrap();
        assert!(m.leave().is_empty());
        assert_eq!(m.state(), &CallState::Idle);

        m.on_signal(request("111111", "222222"));
        assert!(m.leave().is_empty());
        assert_eq!(m.state(), &CallState::Idle);
    }

    #[test]
    fn glare_lower_id_keeps_initiator_role() {
        let mut low = machine("111111");
        let mut high = machine("222222");
        low.call("222222", NOW).unwrap();
        high.call("111111", NOW).unwrap();

        // Each side sees the other's crossing request.
        low.on_signal(request("222222", "111111"));
        high.on_signal(request("111111", "222222"));

        assert_eq!(low.state(), &CallState::OutgoingRinging("222222".into()));
        assert_eq!(high.state(), &CallState::IncomingRinging("111111".into()));

        // The yielding side accepts; the initiator connects on the CallStart.
        let effects = high.accept(NOW);
        let SignalingEffect::Publish(call_start) = effects[0].clone() else {
            panic!("expected a CallStart publish");
        };
        low.on_signal(call_start);
        assert_eq!(low.state(), &CallState::Connected("222222".into()));
        assert_eq!(high.state(), &CallState::Connected("111111".into()));
    }

    #[test]
    fn glare_accept_race_leaves_both_ringing() {
        let mut a = CallSignaling::new("111111".into(), GlarePolicy::AcceptRace);
        let mut b = CallSignaling::new("222222".into(), GlarePolicy::AcceptRace);
        a.call("222222", NOW).unwrap();
        b.call("111111", NOW).unwrap();

        assert!(a.on_signal(request("222222", "111111")).is_empty());
        assert!(b.on_signal(request("111111", "222222")).is_empty());

        assert_eq!(a.state(), &CallState::OutgoingRinging("222222".into()));
        assert_eq!(b.state(), &CallState::OutgoingRinging("111111".into()));
        assert!(a.accept(NOW).is_empty());
        assert!(b.accept(NOW).is_empty());
    }

    #[test]
    fn request_from_unrelated_peer_while_ringing_is_ignored() {
        let mut m = machine("222222");
        m.call("333333", NOW).unwrap();
        m.on_signal(request("111111", "222222"));
        assert_eq!(m.state(), &CallState::OutgoingRinging("333333".into()));
    }

    #[test]
    fn force_idle_clears_any_state() {
        let mut m = machine("222222");
        m.on_signal(request("111111", "222222"));
        m.accept(NOW);
        m.force_idle();
        assert_eq!(m.state(), &CallState::Idle);
    }
}
