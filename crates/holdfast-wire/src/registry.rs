//! Peer directory: every peer the session has had contact with.
//!
//! Each [`PeerEntry`] owns the [`PeerEventChannel`] for traffic to that peer.
//! Entries are created on first contact and never removed while the session
//! is live; a peer whose connection failed is only marked disconnected.
//! The directory belongs to a single session and is mutated only from its
//! processing step, so it carries no locking of its own.

use crate::channel::PeerEventChannel;
use chrono::{DateTime, Utc};
use holdfast_types::peer::{Peer, PeerId};
use std::collections::HashMap;
use tracing::{info, warn};

/// Connection state of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Packets are exchanged normally.
    Connected,
    /// The peer sent malformed data or the transport gave up on it;
    /// inbound packets are dropped and nothing is flushed to it.
    Disconnected,
}

/// A single known peer.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub peer: Peer,
    pub state: PeerState,
    /// When the peer was first seen.
    pub first_seen: DateTime<Utc>,
    /// Outgoing events and inbound sequencing for this peer.
    pub channel: PeerEventChannel,
}

/// Directory of all peers known to one session, including the local one.
#[derive(Debug, Clone)]
pub struct PeerDirectory {
    local: PeerId,
    recent_capacity: usize,
    peers: HashMap<PeerId, PeerEntry>,
}

impl PeerDirectory {
    /// Create a directory containing only the local peer.
    pub fn new(local: Peer, recent_capacity: usize) -> Self {
        let local_id = local.id;
        let mut directory = Self {
            local: local_id,
            recent_capacity,
            peers: HashMap::new(),
        };
        directory.insert(local);
        directory
    }

    fn insert(&mut self, peer: Peer) -> &mut PeerEntry {
        let id = peer.id;
        let channel = PeerEventChannel::new(self.local, id, self.recent_capacity);
        self.peers.entry(id).or_insert(PeerEntry {
            peer,
            state: PeerState::Connected,
            first_seen: Utc::now(),
            channel,
        })
    }

    pub fn local_id(&self) -> PeerId {
        self.local
    }

    /// Register a peer, or refresh the display name of a known one.
    pub fn add_peer(&mut self, peer: Peer) {
        if let Some(entry) = self.peers.get_mut(&peer.id) {
            entry.peer.name = peer.name;
            return;
        }
        info!(peer = %peer.id, name = %peer.name, "Peer added to directory");
        self.insert(peer);
    }

    /// The entry for `id`, created with a placeholder name on first contact.
    pub fn ensure(&mut self, id: PeerId) -> &mut PeerEntry {
        if !self.peers.contains_key(&id) {
            info!(peer = %id, "First contact with unknown peer");
        }
        let (local, capacity) = (self.local, self.recent_capacity);
        self.peers.entry(id).or_insert_with(|| PeerEntry {
            peer: Peer::remote(id, id.to_string()),
            state: PeerState::Connected,
            first_seen: Utc::now(),
            channel: PeerEventChannel::new(local, id, capacity),
        })
    }

    /// Channel carrying events to `id`.
    pub fn channel_mut(&mut self, id: PeerId) -> &mut PeerEventChannel {
        &mut self.ensure(id).channel
    }

    pub fn get_peer(&self, id: PeerId) -> Option<&PeerEntry> {
        self.peers.get(&id)
    }

    pub fn get_peer_mut(&mut self, id: PeerId) -> Option<&mut PeerEntry> {
        self.peers.get_mut(&id)
    }

    /// Display name, falling back to the identifier.
    pub fn name_of(&self, id: PeerId) -> String {
        self.peers
            .get(&id)
            .map(|entry| entry.peer.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    pub fn mark_disconnected(&mut self, id: PeerId) {
        if let Some(entry) = self.peers.get_mut(&id) {
            if entry.state != PeerState::Disconnected {
                warn!(peer = %id, "Peer marked disconnected");
            }
            entry.state = PeerState::Disconnected;
        }
    }

    pub fn mark_connected(&mut self, id: PeerId) {
        if let Some(entry) = self.peers.get_mut(&id) {
            entry.state = PeerState::Connected;
        }
    }

    pub fn is_connected(&self, id: PeerId) -> bool {
        self.peers
            .get(&id)
            .is_some_and(|entry| entry.state == PeerState::Connected)
    }

    /// Ids of connected remote peers, sorted for deterministic iteration.
    pub fn connected_remotes(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self
            .peers
            .values()
            .filter(|entry| entry.peer.id != self.local && entry.state == PeerState::Connected)
            .map(|entry| entry.peer.id)
            .collect();
        ids.sort();
        ids
    }

    pub fn all_peers(&self) -> impl Iterator<Item = &PeerEntry> {
        self.peers.values()
    }

    /// Number of connected peers, the local one included.
    pub fn connected_count(&self) -> usize {
        self.peers
            .values()
            .filter(|entry| entry.state == PeerState::Connected)
            .count()
    }

    pub fn total_count(&self) -> usize {
        self.peers.len()
    }
}
