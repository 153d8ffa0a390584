//! Peer identity.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Stable, opaque identifier of a session participant.
///
/// On the wire a peer reference is the bare identifier as 8 little-endian bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl PeerId {
    /// Width of a peer reference on the wire.
    pub const WIRE_SIZE: usize = 8;
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<u64> for PeerId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A participant in the session.
///
/// Two peers are equal iff their identifiers match; the display name and
/// locality flag do not take part in comparisons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    /// Stable identifier.
    pub id: PeerId,
    /// Human-readable display name.
    pub name: String,
    /// Whether this peer is the local process.
    pub is_local: bool,
}

impl Peer {
    /// Describe the local participant.
    pub fn local(id: PeerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            is_local: true,
        }
    }

    /// Describe a remote participant.
    pub fn remote(id: PeerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            is_local: false,
        }
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Peer {}

impl Hash for Peer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.id, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_peer_equality_ignores_name() {
        let a = Peer::remote(PeerId(7), "alice");
        let b = Peer::local(PeerId(7), "renamed");
        assert_eq!(a, b);
        assert_ne!(a, Peer::remote(PeerId(8), "alice"));
    }

    #[test]
    fn test_peer_hash_follows_id() {
        let mut set = HashSet::new();
        set.insert(Peer::remote(PeerId(1), "one"));
        set.insert(Peer::remote(PeerId(1), "uno"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_peer_id_display_is_fixed_width() {
        assert_eq!(PeerId(0xabc).to_string(), "0000000000000abc");
    }
}
