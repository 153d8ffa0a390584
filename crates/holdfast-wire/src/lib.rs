//! Holdfast wire protocol: the plumbing the ownership protocol rides on.
//!
//! Events travel between peers in per-tick packets over an abstract
//! datagram transport. Every event carries a per-sender sequence number;
//! receivers acknowledge cumulatively and senders re-send anything not yet
//! acknowledged.
//!
//! ## Architecture
//!
//! - **codec**: VLQ integers, peer references, strings and resource paths
//! - **message**: the closed set of protocol events and packet framing
//! - **channel**: per-peer outgoing queue with cumulative acknowledgment
//! - **registry**: the peer directory, owning one channel per peer
//! - **transport**: the `PacketTransport` boundary and an in-memory hub

pub mod channel;
pub mod codec;
pub mod message;
pub mod registry;
pub mod transport;

pub use channel::PeerEventChannel;
pub use codec::{WireError, WireReader, WireWriter};
pub use message::{
    decode_packet, encode_packet, Event, EventId, EventKind, Packet, ReleaseOutcome,
    RequestOutcome, ResourcePath, TransferOutcome,
};
pub use registry::{PeerDirectory, PeerEntry, PeerState};
pub use transport::{InboundPacket, MemoryHub, MemoryTransport, PacketTransport};
