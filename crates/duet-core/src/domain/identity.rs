//! Domain identifiers.
//!
//! These are **pure data**: no I/O, no framework dependencies.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Ephemeral identity of one client context.
///
/// Opaque to the signaling layer; ordering is lexicographic and only matters
/// for the glare tie-break.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A random six-digit numeric id, the shape browser clients hand out on start.
    pub fn random() -> Self {
        Self(rand::random_range(100_000u32..1_000_000).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl PartialEq<str> for PeerId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for PeerId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

// Browser clients have written ids both as strings and as bare numbers.
impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PeerIdVisitor;

        impl Visitor<'_> for PeerIdVisitor {
            type Value = PeerId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a peer id string or integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<PeerId, E> {
                Ok(PeerId::new(v))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<PeerId, E> {
                Ok(PeerId(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<PeerId, E> {
                Ok(PeerId(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<PeerId, E> {
                Ok(PeerId(v.to_string()))
            }
        }

        deserializer.deserialize_any(PeerIdVisitor)
    }
}

/// Name of the media room both parties join once connected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelName(pub String);

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
