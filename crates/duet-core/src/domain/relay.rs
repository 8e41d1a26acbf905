//! Relay wire messages (QUIC control stream, CBOR encoded).
//!
//! One connection carries both the signaling bus and the media room protocol.
//! Pure data: no I/O.

use serde::{Deserialize, Serialize};

use super::identity::PeerId;
use super::media::MediaKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayMsg {
    /// First frame on a new control stream.
    Hello {
        client_version: String,
    },

    // -- Signaling bus --
    /// Client overwrites `key`. `None` removes it.
    BusWrite {
        key: String,
        value: Option<String>,
    },
    /// Server tells every other connection that `key` changed.
    BusChanged {
        key: String,
        new_value: Option<String>,
        previous_value: Option<String>,
    },

    // -- Media room requests (answered with Reply) --
    JoinRoom {
        request_id: u32,
        app_id: String,
        channel: String,
        token: String,
        peer_id: PeerId,
    },
    Publish {
        request_id: u32,
        kinds: Vec<MediaKind>,
    },
    Subscribe {
        request_id: u32,
        peer_id: PeerId,
        kind: MediaKind,
    },
    LeaveRoom {
        request_id: u32,
    },
    Reply {
        request_id: u32,
        error: Option<String>,
    },

    // -- Media room notifications --
    UserPublished {
        peer_id: PeerId,
        kind: MediaKind,
    },
    UserLeft {
        peer_id: PeerId,
    },
}

impl RelayMsg {
    pub fn request_id(&self) -> Option<u32> {
        match self {
            Self::JoinRoom { request_id, .. }
            | Self::Publish { request_id, .. }
            | Self::Subscribe { request_id, .. }
            | Self::LeaveRoom { request_id }
            | Self::Reply { request_id, .. } => Some(*request_id),
            _ => None,
        }
    }
}
