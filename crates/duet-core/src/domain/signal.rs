//! Signaling messages carried on the bus.
//!
//! Pure data: no I/O. The bus keeps one value per [`SignalKey`], so a newer
//! message of the same kind replaces the older one.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::identity::PeerId;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Bus key a message kind is stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKey {
    CallRequest,
    StartCall,
}

impl SignalKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CallRequest => "call-request",
            Self::StartCall => "start-call",
        }
    }
}

impl fmt::Display for SignalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalKey {
    type Err = UnknownSignalKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "call-request" => Ok(Self::CallRequest),
            "start-call" => Ok(Self::StartCall),
            other => Err(UnknownSignalKey(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown signal key: {0}")]
pub struct UnknownSignalKey(pub String);

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Intent to start a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    pub sender_id: PeerId,
    pub target_id: PeerId,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// A call was accepted. Either field may name either party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStart {
    pub receiver_id: PeerId,
    pub caller_id: PeerId,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl CallStart {
    /// The party that is not `local`, if `local` is named at all.
    pub fn counterpart_of(&self, local: &PeerId) -> Option<&PeerId> {
        if &self.receiver_id == local && &self.caller_id != local {
            Some(&self.caller_id)
        } else if &self.caller_id == local && &self.receiver_id != local {
            Some(&self.receiver_id)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalMsg {
    CallRequest(CallRequest),
    CallStart(CallStart),
}

impl SignalMsg {
    pub fn key(&self) -> SignalKey {
        match self {
            Self::CallRequest(_) => SignalKey::CallRequest,
            Self::CallStart(_) => SignalKey::StartCall,
        }
    }
}

// ---------------------------------------------------------------------------
// Bus notification
// ---------------------------------------------------------------------------

/// A change observed on the bus, written by some other context.
///
/// `key` stays a raw string: contexts share the bus with writers that use
/// keys this crate does not know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusNotification {
    pub key: String,
    pub new_value: Option<String>,
    pub previous_value: Option<String>,
}
