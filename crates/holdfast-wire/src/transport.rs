//! Packet transport boundary.
//!
//! The protocol only needs to hand a payload to an addressed peer with a
//! delivery hint, and to pick up whatever arrived since the last tick.
//! [`MemoryHub`] is an in-process implementation over tokio unbounded
//! channels. Its senders are `Send + Clone`, so socket I/O running on other
//! threads or tasks can feed packets in; they are only ever consumed from
//! the session's single processing step.

use holdfast_types::error::{HoldfastError, HoldfastResult};
use holdfast_types::net::{DeliveryClass, PacketChannel};
use holdfast_types::peer::PeerId;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};

/// A payload received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPacket {
    pub from: PeerId,
    pub channel: PacketChannel,
    pub payload: Vec<u8>,
}

/// Send/receive of tagged byte payloads per peer.
pub trait PacketTransport {
    /// Hand `payload` to the transport for delivery to `to`.
    fn send(
        &mut self,
        to: PeerId,
        payload: &[u8],
        delivery: DeliveryClass,
        channel: PacketChannel,
    ) -> HoldfastResult<()>;

    /// Everything received on `channel` since the last poll. Never blocks.
    fn poll_inbound(&mut self, channel: PacketChannel) -> Vec<InboundPacket>;
}

#[derive(Debug, Default)]
struct HubState {
    endpoints: HashMap<PeerId, UnboundedSender<InboundPacket>>,
    /// Peers whose inbound unreliable traffic is dropped.
    lossy: HashSet<PeerId>,
    dropped: u64,
}

/// Shared switchboard connecting in-process endpoints.
#[derive(Debug, Clone, Default)]
pub struct MemoryHub {
    state: Arc<RwLock<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an endpoint for `peer`, replacing any previous one.
    pub fn endpoint(&self, peer: PeerId) -> MemoryTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.endpoints.insert(peer, tx);
        MemoryTransport {
            local: peer,
            hub: self.clone(),
            inbound: rx,
            parked: HashMap::new(),
        }
    }

    /// Sender delivering into `peer`'s endpoint, for producers on other tasks.
    pub fn sender_for(&self, peer: PeerId) -> Option<UnboundedSender<InboundPacket>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.endpoints.get(&peer).cloned()
    }

    /// Drop (or stop dropping) unreliable packets addressed to `peer`.
    pub fn set_lossy(&self, peer: PeerId, lossy: bool) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if lossy {
            state.lossy.insert(peer);
        } else {
            state.lossy.remove(&peer);
        }
    }

    /// Unreliable packets dropped so far.
    pub fn dropped_count(&self) -> u64 {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.dropped
    }

    fn deliver(
        &self,
        from: PeerId,
        to: PeerId,
        payload: &[u8],
        delivery: DeliveryClass,
        channel: PacketChannel,
    ) -> HoldfastResult<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if delivery == DeliveryClass::Unreliable && state.lossy.contains(&to) {
            state.dropped += 1;
            trace!(from = %from, to = %to, "Dropped unreliable packet");
            return Ok(());
        }
        let sender = state
            .endpoints
            .get(&to)
            .ok_or_else(|| HoldfastError::Transport(format!("no endpoint for peer {to}")))?;
        sender
            .send(InboundPacket {
                from,
                channel,
                payload: payload.to_vec(),
            })
            .map_err(|_| HoldfastError::Transport(format!("endpoint for peer {to} is closed")))
    }
}

/// One peer's attachment to a [`MemoryHub`].
#[derive(Debug)]
pub struct MemoryTransport {
    local: PeerId,
    hub: MemoryHub,
    inbound: UnboundedReceiver<InboundPacket>,
    /// Packets already pulled off the queue for channels not yet polled.
    parked: HashMap<PacketChannel, VecDeque<InboundPacket>>,
}

impl MemoryTransport {
    pub fn local(&self) -> PeerId {
        self.local
    }

    pub fn hub(&self) -> &MemoryHub {
        &self.hub
    }
}

impl PacketTransport for MemoryTransport {
    fn send(
        &mut self,
        to: PeerId,
        payload: &[u8],
        delivery: DeliveryClass,
        channel: PacketChannel,
    ) -> HoldfastResult<()> {
        trace!(from = %self.local, to = %to, bytes = payload.len(), "Sending packet");
        self.hub.deliver(self.local, to, payload, delivery, channel)
    }

    fn poll_inbound(&mut self, channel: PacketChannel) -> Vec<InboundPacket> {
        loop {
            match self.inbound.try_recv() {
                Ok(packet) => self
                    .parked
                    .entry(packet.channel)
                    .or_default()
                    .push_back(packet),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!(peer = %self.local, "Inbound queue closed");
                    break;
                }
            }
        }
        self.parked
            .remove(&channel)
            .map(Vec::from)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_and_poll_by_channel() {
        let hub = MemoryHub::new();
        let mut a = hub.endpoint(PeerId(1));
        let mut b = hub.endpoint(PeerId(2));

        a.send(PeerId(2), b"game", DeliveryClass::Reliable, PacketChannel::GameInfo)
            .unwrap();
        a.send(PeerId(2), b"meta", DeliveryClass::Reliable, PacketChannel::PlayerInfo)
            .unwrap();

        let game = b.poll_inbound(PacketChannel::GameInfo);
        assert_eq!(game.len(), 1);
        assert_eq!(game[0].from, PeerId(1));
        assert_eq!(game[0].payload, b"game");

        assert!(b.poll_inbound(PacketChannel::GameInfo).is_empty());
        let meta = b.poll_inbound(PacketChannel::PlayerInfo);
        assert_eq!(meta[0].payload, b"meta");
    }

    #[test]
    fn test_unknown_peer_is_transport_error() {
        let hub = MemoryHub::new();
        let mut a = hub.endpoint(PeerId(1));
        let err = a
            .send(PeerId(5), b"x", DeliveryClass::Reliable, PacketChannel::GameInfo)
            .unwrap_err();
        assert!(matches!(err, HoldfastError::Transport(_)));
    }

    #[test]
    fn test_lossy_drops_only_unreliable() {
        let hub = MemoryHub::new();
        let mut a = hub.endpoint(PeerId(1));
        let mut b = hub.endpoint(PeerId(2));
        hub.set_lossy(PeerId(2), true);

        a.send(PeerId(2), b"u", DeliveryClass::Unreliable, PacketChannel::GameInfo)
            .unwrap();
        a.send(PeerId(2), b"r", DeliveryClass::Reliable, PacketChannel::GameInfo)
            .unwrap();

        let got = b.poll_inbound(PacketChannel::GameInfo);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].payload, b"r");
        assert_eq!(hub.dropped_count(), 1);
    }

    #[tokio::test]
    async fn test_packets_from_other_tasks_are_polled_in_order() {
        let hub = MemoryHub::new();
        let mut b = hub.endpoint(PeerId(2));
        let sender = hub.sender_for(PeerId(2)).unwrap();

        let producer = tokio::spawn(async move {
            for i in 0..3u8 {
                sender
                    .send(InboundPacket {
                        from: PeerId(7),
                        channel: PacketChannel::GameInfo,
                        payload: vec![i],
                    })
                    .unwrap();
            }
        });
        producer.await.unwrap();

        let payloads: Vec<Vec<u8>> = b
            .poll_inbound(PacketChannel::GameInfo)
            .into_iter()
            .map(|p| p.payload)
            .collect();
        assert_eq!(payloads, vec![vec![0], vec![1], vec![2]]);
    }
}
