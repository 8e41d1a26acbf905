//! Media value types shared by the session manager and engine adapters.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::identity::PeerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// Notification raised by the media engine for a remote user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// `user` published a track of `kind`; it can now be subscribed to.
    UserPublished { user: PeerId, kind: MediaKind },
    UserLeft { user: PeerId },
}

/// Render target a participant's video is played into.
pub fn video_container(peer_id: &PeerId) -> String {
    format!("video-container-{peer_id}")
}
