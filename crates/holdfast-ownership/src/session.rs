//! The per-participant session context.
//!
//! One [`Session`] owns everything the local peer knows: the peer directory
//! (and through it one event channel per peer), the resource arena, the
//! subscription registry and the successor policy. All protocol state is
//! mutated from [`Session::tick`] or from the caller's lifecycle calls on
//! the same thread; nothing here blocks or locks.

use crate::error::{OwnershipError, OwnershipResult};
use crate::policy::{self, TransferPolicy};
use crate::resource::{
    OwnershipRole, PendingKind, ResourceBehavior, ResourceId, ResourceNode,
};
use crate::subscription::SubscriptionRegistry;
use crate::tree::ResourceTree;
use holdfast_types::config::ProtocolConfig;
use holdfast_types::net::PacketChannel;
use holdfast_types::peer::{Peer, PeerId};
use holdfast_wire::{
    decode_packet, encode_packet, Event, EventId, EventKind, InboundPacket, PacketTransport,
    PeerDirectory, ResourcePath,
};
use tracing::{debug, error, trace, warn};

/// Something the caller may want to react to. Failed and timed out
/// requests are never retried here; these notices are where a retry policy
/// hooks in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// Leased or subscribed; state is usable locally.
    Available { resource: ResourcePath },
    /// Released or unsubscribed.
    Unavailable { resource: ResourcePath },
    OwnerChanged {
        resource: ResourcePath,
        owner: Option<PeerId>,
    },
    RequestFailed { resource: ResourcePath },
    ReleaseFailed { resource: ResourcePath },
    /// The appointed owner refused to take over the subscribers.
    TransferFailed { resource: ResourcePath, peer: PeerId },
    /// No result arrived within `request_timeout_ticks`; the pending request
    /// was abandoned.
    RequestTimedOut {
        resource: ResourcePath,
        kind: PendingKind,
    },
}

/// Counters and defects from one [`Session::tick`].
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub tick: u64,
    pub packets_in: usize,
    pub packets_out: usize,
    /// Inbound packets discarded (malformed, or from a disconnected peer).
    pub packets_dropped: usize,
    pub events_processed: usize,
    /// Local invariant violations hit while handling events.
    pub defects: Vec<OwnershipError>,
}

/// Protocol context of one local participant.
pub struct Session {
    pub(crate) local: PeerId,
    pub(crate) config: ProtocolConfig,
    pub(crate) peers: PeerDirectory,
    pub(crate) tree: ResourceTree,
    pub(crate) subscriptions: SubscriptionRegistry,
    pub(crate) policy: Box<dyn TransferPolicy>,
    pub(crate) tick: u64,
    pub(crate) notices: Vec<SessionNotice>,
}

impl Session {
    pub fn new(local: PeerId, config: ProtocolConfig) -> Self {
        let peers = PeerDirectory::new(
            Peer::local(local, config.local_name.clone()),
            config.recent_ack_capacity,
        );
        let policy = policy::from_kind(config.transfer_policy);
        debug!(peer = %local, name = %config.local_name, "Session created");
        Self {
            local,
            config,
            peers,
            tree: ResourceTree::new(),
            subscriptions: SubscriptionRegistry::new(),
            policy,
            tick: 0,
            notices: Vec::new(),
        }
    }

    /// Replace the configured successor policy.
    pub fn with_transfer_policy(mut self, policy: impl TransferPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn local(&self) -> PeerId {
        self.local
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn peers(&self) -> &PeerDirectory {
        &self.peers
    }

    pub fn tree(&self) -> &ResourceTree {
        &self.tree
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    /// Number of ticks run so far.
    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn add_peer(&mut self, peer: Peer) {
        self.peers.add_peer(peer);
    }

    /// Add a top-level resource whose owner (if any) is already known, e.g.
    /// from matchmaking.
    pub fn add_root(
        &mut self,
        behavior: Box<dyn ResourceBehavior>,
        owner: Option<PeerId>,
    ) -> OwnershipResult<ResourceId> {
        let id = self.tree.insert(None, behavior)?;
        self.tree.node_mut(id)?.owner = owner;
        Ok(id)
    }

    /// Add a top-level resource owned and immediately usable here.
    pub fn host_root(&mut self, behavior: Box<dyn ResourceBehavior>) -> OwnershipResult<ResourceId> {
        let id = self.add_root(behavior, Some(self.local))?;
        self.available(id)?;
        Ok(id)
    }

    pub fn node(&self, id: ResourceId) -> OwnershipResult<&ResourceNode> {
        Ok(self.tree.node(id)?)
    }

    pub fn resolve(&self, path: &ResourcePath) -> Option<ResourceId> {
        self.tree.resolve(path)
    }

    pub fn path_of(&self, id: ResourceId) -> ResourcePath {
        self.tree.path_of(id)
    }

    pub fn role(&self, id: ResourceId) -> Option<OwnershipRole> {
        self.tree.get(id).map(|node| node.role(self.local))
    }

    pub fn is_free(&self, id: ResourceId) -> bool {
        self.tree.get(id).is_some_and(ResourceNode::is_free)
    }

    pub fn is_owner(&self, id: ResourceId) -> bool {
        self.tree.get(id).is_some_and(|node| node.owner == Some(self.local))
    }

    /// Whether the local peer owns the super resource of `id`.
    pub fn is_super(&self, id: ResourceId) -> bool {
        self.parent_owner(id) == Some(self.local)
    }

    pub fn is_pending(&self, id: ResourceId) -> bool {
        self.tree.get(id).is_some_and(ResourceNode::is_pending)
    }

    /// No subresource of `id` is available.
    pub fn can_release(&self, id: ResourceId) -> bool {
        self.tree.get(id).is_some_and(|node| {
            node.children
                .iter()
                .all(|child| !self.tree.get(*child).is_some_and(ResourceNode::is_available))
        })
    }

    pub(crate) fn parent_owner(&self, id: ResourceId) -> Option<PeerId> {
        self.tree
            .get(id)
            .and_then(|node| node.parent)
            .and_then(|parent| self.tree.get(parent))
            .and_then(|parent| parent.owner)
    }

    /// Drain the notices queued since the last call.
    pub fn take_notices(&mut self) -> Vec<SessionNotice> {
        std::mem::take(&mut self.notices)
    }

    /// Events queued for `peer` and not yet acknowledged, oldest first.
    pub fn outgoing_to(&self, peer: PeerId) -> Vec<Event> {
        self.peers
            .get_peer(peer)
            .map(|entry| entry.channel.drain_for_send().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn queue_event(&mut self, to: PeerId, kind: EventKind) -> EventId {
        self.peers.channel_mut(to).enqueue(kind)
    }

    pub(crate) fn notify(&mut self, notice: SessionNotice) {
        trace!(peer = %self.local, ?notice, "Session notice");
        self.notices.push(notice);
    }

    /// Run one processing step: receive, process, loop back, expire and
    /// flush.
    pub fn tick(&mut self, transport: &mut dyn PacketTransport) -> TickReport {
        self.tick += 1;
        let mut report = TickReport {
            tick: self.tick,
            ..TickReport::default()
        };

        for packet in transport.poll_inbound(PacketChannel::GameInfo) {
            report.packets_in += 1;
            self.receive_packet(packet, &mut report);
        }
        self.pump_loopback(&mut report);
        self.expire_pending();
        self.flush(transport, &mut report);

        if !report.defects.is_empty() {
            error!(
                peer = %self.local,
                tick = self.tick,
                defects = report.defects.len(),
                "Tick finished with defects"
            );
        }
        report
    }

    fn receive_packet(&mut self, packet: InboundPacket, report: &mut TickReport) {
        let from = packet.from;
        if from == self.local {
            warn!(peer = %from, "Dropping packet the transport addressed from ourselves");
            report.packets_dropped += 1;
            return;
        }
        self.peers.ensure(from);
        if !self.peers.is_connected(from) {
            trace!(peer = %from, "Dropping packet from disconnected peer");
            report.packets_dropped += 1;
            return;
        }

        let decoded = match decode_packet(&packet.payload, from, self.local) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(peer = %from, error = %err, "Malformed packet");
                self.peers.mark_disconnected(from);
                report.packets_dropped += 1;
                return;
            }
        };

        let channel = self.peers.channel_mut(from);
        channel.acknowledge(decoded.ack);
        let accepted: Vec<Event> = decoded
            .events
            .into_iter()
            .filter(|event| channel.accept_inbound(event.id))
            .collect();
        for event in accepted {
            self.dispatch(event, report);
        }
    }

    /// Process events the local peer addressed to itself. Each round
    /// retires what the previous round handled, so results raised by
    /// self-requests correlate exactly like remote ones.
    fn pump_loopback(&mut self, report: &mut TickReport) {
        let local = self.local;
        for _ in 0..self.config.max_loopback_rounds {
            let channel = self.peers.channel_mut(local);
            let handled = channel.last_event_from_remote();
            channel.acknowledge(handled);
            let fresh: Vec<Event> = channel.drain_for_send().cloned().collect();
            let accepted: Vec<Event> = fresh
                .into_iter()
                .filter(|event| channel.accept_inbound(event.id))
                .collect();
            if accepted.is_empty() {
                return;
            }
            for event in accepted {
                self.dispatch(event, report);
            }
        }
        let channel = self.peers.channel_mut(local);
        let handled = channel.last_event_from_remote();
        channel.acknowledge(handled);
        if channel.pending_len() > 0 {
            warn!(
                peer = %local,
                remaining = channel.pending_len(),
                "Loopback round limit reached, deferring to next tick"
            );
        }
    }

    fn dispatch(&mut self, event: Event, report: &mut TickReport) {
        report.events_processed += 1;
        trace!(
            peer = %self.local,
            from = %event.from,
            event_id = %event.id,
            kind = event.kind.name(),
            "Handling event"
        );
        if let Err(err) = self.handle_event(&event) {
            if err.is_defect() {
                error!(
                    peer = %self.local,
                    from = %event.from,
                    event_id = %event.id,
                    kind = event.kind.name(),
                    resource = %event.kind.resource(),
                    error = %err,
                    "Invariant violated while handling event"
                );
                report.defects.push(err);
            } else {
                warn!(
                    peer = %self.local,
                    from = %event.from,
                    event_id = %event.id,
                    kind = event.kind.name(),
                    resource = %event.kind.resource(),
                    error = %err,
                    "Could not handle event"
                );
            }
        }
    }

    fn expire_pending(&mut self) {
        let Some(timeout) = self.config.request_timeout_ticks else {
            return;
        };
        let now = self.tick;
        for id in self.tree.ids() {
            let Some(node) = self.tree.get_mut(id) else {
                continue;
            };
            let Some(pending) = node.pending else {
                continue;
            };
            if now.saturating_sub(pending.issued_tick) < timeout {
                continue;
            }
            node.pending = None;
            let resource = self.tree.path_of(id);
            warn!(
                peer = %self.local,
                resource = %resource,
                kind = %pending.kind,
                event_id = %pending.event_id,
                to = %pending.to,
                "Pending request timed out"
            );
            self.notify(SessionNotice::RequestTimedOut {
                resource,
                kind: pending.kind,
            });
        }
    }

    fn flush(&mut self, transport: &mut dyn PacketTransport, report: &mut TickReport) {
        let delivery = self.config.event_delivery;
        for peer in self.peers.connected_remotes() {
            let channel = self.peers.channel_mut(peer);
            if !channel.wants_flush() {
                continue;
            }
            let payload = encode_packet(channel.last_event_from_remote(), channel.drain_for_send());
            match transport.send(peer, &payload, delivery, PacketChannel::GameInfo) {
                Ok(()) => {
                    channel.mark_flushed();
                    report.packets_out += 1;
                }
                Err(err) => {
                    warn!(peer = %peer, error = %err, "Send failed");
                    self.peers.mark_disconnected(peer);
                }
            }
        }
    }
}
