//! Per-peer event channel: ordered outgoing queue with cumulative
//! acknowledgment.
//!
//! Events stay in the outgoing queue (and are re-sent every tick) until the
//! remote acknowledges an id newer-or-equal to theirs. The newest retired
//! events are kept in a bounded buffer until the next acknowledgment so that
//! results arriving alongside the ack can be correlated with the request they
//! answer.

use crate::message::{Event, EventId, EventKind};
use holdfast_types::error::{HoldfastError, HoldfastResult};
use holdfast_types::peer::PeerId;
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Outgoing queue and inbound sequence tracking for one remote peer.
#[derive(Debug, Clone)]
pub struct PeerEventChannel {
    local: PeerId,
    remote: PeerId,
    outgoing: VecDeque<Event>,
    recently_acked: VecDeque<Event>,
    recent_capacity: usize,
    next_outgoing_event: EventId,
    last_ack_from_remote: EventId,
    last_event_from_remote: EventId,
    needs_ack: bool,
}

impl PeerEventChannel {
    /// Create a channel for traffic from `local` to `remote` that keeps at
    /// most `recent_capacity` (at least one) retired events per
    /// acknowledgment.
    pub fn new(local: PeerId, remote: PeerId, recent_capacity: usize) -> Self {
        let recent_capacity = recent_capacity.max(1);
        Self {
            local,
            remote,
            outgoing: VecDeque::with_capacity(recent_capacity),
            recently_acked: VecDeque::with_capacity(recent_capacity),
            recent_capacity,
            next_outgoing_event: EventId::FIRST,
            last_ack_from_remote: EventId::NONE,
            last_event_from_remote: EventId::NONE,
            needs_ack: false,
        }
    }

    /// Start numbering outgoing events at `first` instead of 1.
    pub fn with_next_event_id(mut self, first: EventId) -> Self {
        self.next_outgoing_event = first;
        self.last_ack_from_remote = EventId(first.0.wrapping_sub(1));
        self
    }

    pub fn remote(&self) -> PeerId {
        self.remote
    }

    /// Assign the next id, stamp the envelope and append to the queue.
    pub fn enqueue(&mut self, kind: EventKind) -> EventId {
        let id = self.next_outgoing_event;
        debug!(
            event_id = %id,
            to = %self.remote,
            kind = kind.name(),
            resource = %kind.resource(),
            "Queued event"
        );
        self.next_outgoing_event = id.next();
        self.outgoing.push_back(Event {
            id,
            from: self.local,
            to: self.remote,
            kind,
        });
        id
    }

    /// Events awaiting acknowledgment, oldest first. Nothing is dequeued.
    pub fn drain_for_send(&self) -> impl Iterator<Item = &Event> + '_ {
        self.outgoing.iter()
    }

    /// Apply a cumulative acknowledgment from the remote.
    ///
    /// The recently-acknowledged buffer is replaced by the newest events this
    /// ack retires, up to the channel's capacity. Repeating an ack leaves it
    /// empty.
    pub fn acknowledge(&mut self, last_ack: EventId) {
        self.recently_acked.clear();
        self.last_ack_from_remote = last_ack;
        let mut retired = 0usize;
        while let Some(front) = self.outgoing.front() {
            if !last_ack.is_newer_or_equal(front.id) {
                break;
            }
            if let Some(event) = self.outgoing.pop_front() {
                retired += 1;
                if self.recently_acked.len() == self.recent_capacity {
                    self.recently_acked.pop_front();
                }
                self.recently_acked.push_back(event);
            }
        }
        if retired > self.recently_acked.len() {
            debug!(
                to = %self.remote,
                ack = %last_ack,
                retired,
                kept = self.recently_acked.len(),
                "Recently acknowledged buffer full, oldest retired events forgotten"
            );
        } else if retired > 0 {
            trace!(
                to = %self.remote,
                ack = %last_ack,
                retired,
                "Events acknowledged"
            );
        }
    }

    /// Look up an event retired by the most recent acknowledgment.
    pub fn find_recently_acked(&self, id: EventId) -> HoldfastResult<&Event> {
        self.recently_acked
            .iter()
            .find(|event| event.id == id)
            .ok_or_else(|| {
                HoldfastError::NotFound(format!(
                    "event {id} to {} is not among the recently acknowledged",
                    self.remote
                ))
            })
    }

    /// Events kept from the most recent acknowledgment, in id order.
    pub fn recently_acked(&self) -> &VecDeque<Event> {
        &self.recently_acked
    }

    /// Record an inbound event id. Returns `false` for anything that is not
    /// the immediate successor of the last accepted id (duplicates and
    /// copies from stale packets).
    pub fn accept_inbound(&mut self, id: EventId) -> bool {
        if id != self.last_event_from_remote.next() {
            return false;
        }
        self.last_event_from_remote = id;
        self.needs_ack = true;
        true
    }

    /// Whether a packet should go out this tick.
    pub fn wants_flush(&self) -> bool {
        self.needs_ack || !self.outgoing.is_empty()
    }

    /// Note that the current ack has been sent.
    pub fn mark_flushed(&mut self) {
        self.needs_ack = false;
    }

    pub fn pending_len(&self) -> usize {
        self.outgoing.len()
    }

    pub fn next_outgoing_event(&self) -> EventId {
        self.next_outgoing_event
    }

    pub fn last_ack_from_remote(&self) -> EventId {
        self.last_ack_from_remote
    }

    pub fn last_event_from_remote(&self) -> EventId {
        self.last_event_from_remote
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ResourcePath;

    fn request() -> EventKind {
        EventKind::ResourceRequest {
            resource: ResourcePath::root("lobby"),
        }
    }

    fn channel_with(n: usize) -> PeerEventChannel {
        let mut channel = PeerEventChannel::new(PeerId(1), PeerId(2), 16);
        for _ in 0..n {
            channel.enqueue(request());
        }
        channel
    }

    fn ids<'a>(events: impl IntoIterator<Item = &'a Event>) -> Vec<u64> {
        events.into_iter().map(|e| e.id.0).collect()
    }

    #[test]
    fn test_enqueue_assigns_gapless_ids_from_one() {
        let channel = channel_with(3);
        assert_eq!(ids(channel.drain_for_send()), vec![1, 2, 3]);
        let first = channel.drain_for_send().next().unwrap();
        assert_eq!(first.from, PeerId(1));
        assert_eq!(first.to, PeerId(2));
        assert_eq!(channel.next_outgoing_event(), EventId(4));
    }

    #[test]
    fn test_drain_does_not_dequeue() {
        let channel = channel_with(2);
        assert_eq!(channel.drain_for_send().count(), 2);
        assert_eq!(channel.drain_for_send().count(), 2);
    }

    #[test]
    fn test_cumulative_ack_retires_prefix() {
        let mut channel = channel_with(4);
        channel.acknowledge(EventId(3));
        assert_eq!(ids(channel.recently_acked()), vec![1, 2, 3]);
        assert_eq!(ids(channel.drain_for_send()), vec![4]);
        assert_eq!(channel.last_ack_from_remote(), EventId(3));

        // Repeating the same ack is a no-op that empties the buffer.
        channel.acknowledge(EventId(3));
        assert!(channel.recently_acked().is_empty());
        assert_eq!(ids(channel.drain_for_send()), vec![4]);
    }

    #[test]
    fn test_ack_of_nothing_retires_nothing() {
        let mut channel = channel_with(2);
        channel.acknowledge(EventId::NONE);
        assert!(channel.recently_acked().is_empty());
        assert_eq!(channel.pending_len(), 2);
    }

    #[test]
    fn test_find_recently_acked_after_buffer_replaced() {
        let mut channel = channel_with(3);
        channel.acknowledge(EventId(2));
        assert_eq!(channel.find_recently_acked(EventId(2)).unwrap().id, EventId(2));

        channel.acknowledge(EventId(3));
        assert!(matches!(
            channel.find_recently_acked(EventId(2)),
            Err(HoldfastError::NotFound(_))
        ));
        assert!(channel.find_recently_acked(EventId(3)).is_ok());
    }

    #[test]
    fn test_ack_across_counter_wraparound() {
        let mut channel = PeerEventChannel::new(PeerId(1), PeerId(2), 16)
            .with_next_event_id(EventId(u64::MAX - 1));
        for _ in 0..4 {
            channel.enqueue(request());
        }
        assert_eq!(ids(channel.drain_for_send()), vec![u64::MAX - 1, u64::MAX, 1, 2]);

        channel.acknowledge(EventId(1));
        assert_eq!(ids(channel.recently_acked()), vec![u64::MAX - 1, u64::MAX, 1]);
        assert_eq!(ids(channel.drain_for_send()), vec![2]);
    }

    #[test]
    fn test_recent_buffer_keeps_newest_up_to_capacity() {
        let mut channel = PeerEventChannel::new(PeerId(1), PeerId(2), 2);
        for _ in 0..4 {
            channel.enqueue(request());
        }
        channel.acknowledge(EventId(4));
        assert_eq!(ids(channel.recently_acked()), vec![3, 4]);
        assert_eq!(channel.pending_len(), 0);
        assert!(matches!(
            channel.find_recently_acked(EventId(1)),
            Err(HoldfastError::NotFound(_))
        ));
        assert!(channel.find_recently_acked(EventId(4)).is_ok());
    }

    #[test]
    fn test_zero_recent_capacity_still_keeps_one() {
        let mut channel = PeerEventChannel::new(PeerId(1), PeerId(2), 0);
        channel.enqueue(request());
        channel.enqueue(request());
        channel.acknowledge(EventId(2));
        assert_eq!(ids(channel.recently_acked()), vec![2]);
    }

    #[test]
    fn test_accept_inbound_is_gapless() {
        let mut channel = channel_with(0);
        assert!(!channel.wants_flush());
        assert!(channel.accept_inbound(EventId(1)));
        assert!(!channel.accept_inbound(EventId(1)));
        assert!(!channel.accept_inbound(EventId(3)));
        assert!(channel.accept_inbound(EventId(2)));
        assert_eq!(channel.last_event_from_remote(), EventId(2));
        assert!(channel.wants_flush());
        channel.mark_flushed();
        assert!(!channel.wants_flush());
    }
}
