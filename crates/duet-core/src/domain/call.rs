//! Per-context call progress.

use std::fmt;
use std::str::FromStr;

use super::identity::PeerId;

/// Where this context's call negotiation stands. Exactly one per context.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CallState {
    #[default]
    Idle,
    /// We sent a `CallRequest` to this peer and wait for a `CallStart`.
    OutgoingRinging(PeerId),
    /// This peer asked to call us; waiting on the local user.
    IncomingRinging(PeerId),
    Connected(PeerId),
}

impl CallState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::OutgoingRinging(p) => write!(f, "calling {p}"),
            Self::IncomingRinging(p) => write!(f, "incoming call from {p}"),
            Self::Connected(p) => write!(f, "connected to {p}"),
        }
    }
}

/// How a context reacts when the peer it is ringing rings it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GlarePolicy {
    /// The lexicographically smaller id keeps the initiator role; the other
    /// side drops its own request and rings as the callee.
    #[default]
    LowerIdInitiates,
    /// No resolution: the crossing request is ignored and both sides keep
    /// ringing until a user gives up.
    AcceptRace,
}

impl FromStr for GlarePolicy {
    type Err = UnknownGlarePolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lower-id-initiates" => Ok(Self::LowerIdInitiates),
            "accept-race" => Ok(Self::AcceptRace),
            other => Err(UnknownGlarePolicy(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown glare policy '{0}'")]
pub struct UnknownGlarePolicy(pub String);
