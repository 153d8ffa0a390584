//! Protocol events and packet framing.
//!
//! A packet carries the sender's cumulative acknowledgment followed by every
//! event it has not yet seen acknowledged:
//!
//! ```text
//! varint ack | varint count | count × (tag u8 | varint event_id | body)
//! ```
//!
//! `from`/`to` are not encoded; they come from the transport envelope.

use crate::codec::{WireError, WireReader, WireWriter};
use holdfast_types::peer::PeerId;

/// Per-sender event sequence number. Ids start at 1; 0 means "nothing".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventId(pub u64);

impl EventId {
    /// The "no event yet" marker.
    pub const NONE: EventId = EventId(0);
    /// First id handed out by a fresh channel.
    pub const FIRST: EventId = EventId(1);

    /// The id following this one. Skips [`EventId::NONE`] on wraparound.
    pub fn next(self) -> EventId {
        match self.0.wrapping_add(1) {
            0 => EventId::FIRST,
            n => EventId(n),
        }
    }

    /// Whether `self` is newer than or equal to `other`, tolerating counter
    /// wraparound: the signed difference over the full 64-bit width decides.
    pub fn is_newer_or_equal(self, other: EventId) -> bool {
        (self.0.wrapping_sub(other.0) as i64) >= 0
    }

    /// Strictly newer under the same wraparound rule.
    pub fn is_newer(self, other: EventId) -> bool {
        self != other && self.is_newer_or_equal(other)
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of a resource: identifiers from the root down to the resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ResourcePath(pub Vec<String>);

impl ResourcePath {
    pub fn root(identifier: impl Into<String>) -> Self {
        Self(vec![identifier.into()])
    }

    /// Path of the child named `identifier`.
    pub fn child(&self, identifier: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(identifier.into());
        Self(segments)
    }

    /// Path of the parent, if this is not a root.
    pub fn parent(&self) -> Option<ResourcePath> {
        match self.0.len() {
            0 | 1 => None,
            n => Some(Self(self.0[..n - 1].to_vec())),
        }
    }

    /// Last segment.
    pub fn identifier(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    fn write(&self, w: &mut WireWriter) {
        w.write_varint(self.0.len() as u64);
        for segment in &self.0 {
            w.write_string(segment);
        }
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        let count = r.read_varint()?;
        // Every segment needs at least its length byte.
        if count > r.remaining() as u64 {
            return Err(WireError::UnexpectedEndOfStream);
        }
        (0..count)
            .map(|_| r.read_string())
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

impl std::fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// Answer to a [`EventKind::ResourceRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Ownership of a free resource was granted to the requester.
    Leased,
    /// The requester now receives the owner's state.
    Subscribed,
    Error,
}

/// Answer to a [`EventKind::ReleaseRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Ownership was returned to the super owner.
    Released,
    /// The requester's subscription was dropped.
    Unsubscribed,
    Error,
}

/// Answer to a [`EventKind::TransferRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Ok,
    Error,
}

/// The closed set of protocol messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Ask for ownership or a subscription.
    ResourceRequest { resource: ResourcePath },
    /// Give up ownership (listing current subscribers) or a subscription.
    ReleaseRequest {
        resource: ResourcePath,
        subscribers: Vec<PeerId>,
    },
    /// Tell a newly appointed owner which subscribers to take over.
    TransferRequest {
        resource: ResourcePath,
        subscribers: Vec<PeerId>,
    },
    /// The owner of a subresource changed.
    NewOwner {
        resource: ResourcePath,
        owner: Option<PeerId>,
    },
    /// Ownership of every subresource of an active resource.
    LeaseState {
        resource: ResourcePath,
        leases: Vec<(String, Option<PeerId>)>,
    },
    RequestResult {
        request: EventId,
        resource: ResourcePath,
        outcome: RequestOutcome,
    },
    ReleaseResult {
        request: EventId,
        resource: ResourcePath,
        outcome: ReleaseOutcome,
    },
    TransferResult {
        request: EventId,
        resource: ResourcePath,
        outcome: TransferOutcome,
    },
}

impl EventKind {
    const RESOURCE_REQUEST: u8 = 0x01;
    const RELEASE_REQUEST: u8 = 0x02;
    const TRANSFER_REQUEST: u8 = 0x03;
    const NEW_OWNER: u8 = 0x04;
    const LEASE_STATE: u8 = 0x05;
    const REQUEST_RESULT: u8 = 0x10;
    const RELEASE_RESULT: u8 = 0x11;
    const TRANSFER_RESULT: u8 = 0x12;

    /// The resource this event is about.
    pub fn resource(&self) -> &ResourcePath {
        match self {
            EventKind::ResourceRequest { resource }
            | EventKind::ReleaseRequest { resource, .. }
            | EventKind::TransferRequest { resource, .. }
            | EventKind::NewOwner { resource, .. }
            | EventKind::LeaseState { resource, .. }
            | EventKind::RequestResult { resource, .. }
            | EventKind::ReleaseResult { resource, .. }
            | EventKind::TransferResult { resource, .. } => resource,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::ResourceRequest { .. } => "resource_request",
            EventKind::ReleaseRequest { .. } => "release_request",
            EventKind::TransferRequest { .. } => "transfer_request",
            EventKind::NewOwner { .. } => "new_owner",
            EventKind::LeaseState { .. } => "lease_state",
            EventKind::RequestResult { .. } => "request_result",
            EventKind::ReleaseResult { .. } => "release_result",
            EventKind::TransferResult { .. } => "transfer_result",
        }
    }

    fn tag(&self) -> u8 {
        match self {
            EventKind::ResourceRequest { .. } => Self::RESOURCE_REQUEST,
            EventKind::ReleaseRequest { .. } => Self::RELEASE_REQUEST,
            EventKind::TransferRequest { .. } => Self::TRANSFER_REQUEST,
            EventKind::NewOwner { .. } => Self::NEW_OWNER,
            EventKind::LeaseState { .. } => Self::LEASE_STATE,
            EventKind::RequestResult { .. } => Self::REQUEST_RESULT,
            EventKind::ReleaseResult { .. } => Self::RELEASE_RESULT,
            EventKind::TransferResult { .. } => Self::TRANSFER_RESULT,
        }
    }

    fn write_body(&self, w: &mut WireWriter) {
        match self {
            EventKind::ResourceRequest { resource } => resource.write(w),
            EventKind::ReleaseRequest {
                resource,
                subscribers,
            }
            | EventKind::TransferRequest {
                resource,
                subscribers,
            } => {
                resource.write(w);
                w.write_peers(subscribers);
            }
            EventKind::NewOwner { resource, owner } => {
                resource.write(w);
                w.write_optional_peer(*owner);
            }
            EventKind::LeaseState { resource, leases } => {
                resource.write(w);
                w.write_varint(leases.len() as u64);
                for (identifier, owner) in leases {
                    w.write_string(identifier);
                    w.write_optional_peer(*owner);
                }
            }
            EventKind::RequestResult {
                request,
                resource,
                outcome,
            } => {
                w.write_varint(request.0);
                resource.write(w);
                w.write_u8(match outcome {
                    RequestOutcome::Leased => 0,
                    RequestOutcome::Subscribed => 1,
                    RequestOutcome::Error => 2,
                });
            }
            EventKind::ReleaseResult {
                request,
                resource,
                outcome,
            } => {
                w.write_varint(request.0);
                resource.write(w);
                w.write_u8(match outcome {
                    ReleaseOutcome::Released => 0,
                    ReleaseOutcome::Unsubscribed => 1,
                    ReleaseOutcome::Error => 2,
                });
            }
            EventKind::TransferResult {
                request,
                resource,
                outcome,
            } => {
                w.write_varint(request.0);
                resource.write(w);
                w.write_u8(match outcome {
                    TransferOutcome::Ok => 0,
                    TransferOutcome::Error => 1,
                });
            }
        }
    }

    fn read(tag: u8, r: &mut WireReader<'_>) -> Result<Self, WireError> {
        let kind = match tag {
            Self::RESOURCE_REQUEST => EventKind::ResourceRequest {
                resource: ResourcePath::read(r)?,
            },
            Self::RELEASE_REQUEST => EventKind::ReleaseRequest {
                resource: ResourcePath::read(r)?,
                subscribers: r.read_peers()?,
            },
            Self::TRANSFER_REQUEST => EventKind::TransferRequest {
                resource: ResourcePath::read(r)?,
                subscribers: r.read_peers()?,
            },
            Self::NEW_OWNER => EventKind::NewOwner {
                resource: ResourcePath::read(r)?,
                owner: r.read_optional_peer()?,
            },
            Self::LEASE_STATE => {
                let resource = ResourcePath::read(r)?;
                let count = r.read_varint()?;
                // Each lease is at least a length byte and a presence byte.
                if count.saturating_mul(2) > r.remaining() as u64 {
                    return Err(WireError::UnexpectedEndOfStream);
                }
                let mut leases = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    leases.push((r.read_string()?, r.read_optional_peer()?));
                }
                EventKind::LeaseState { resource, leases }
            }
            Self::REQUEST_RESULT => {
                let request = EventId(r.read_varint()?);
                let resource = ResourcePath::read(r)?;
                let outcome = match r.read_u8()? {
                    0 => RequestOutcome::Leased,
                    1 => RequestOutcome::Subscribed,
                    2 => RequestOutcome::Error,
                    value => {
                        return Err(WireError::UnknownTag {
                            what: "request outcome",
                            value,
                        })
                    }
                };
                EventKind::RequestResult {
                    request,
                    resource,
                    outcome,
                }
            }
            Self::RELEASE_RESULT => {
                let request = EventId(r.read_varint()?);
                let resource = ResourcePath::read(r)?;
                let outcome = match r.read_u8()? {
                    0 => ReleaseOutcome::Released,
                    1 => ReleaseOutcome::Unsubscribed,
                    2 => ReleaseOutcome::Error,
                    value => {
                        return Err(WireError::UnknownTag {
                            what: "release outcome",
                            value,
                        })
                    }
                };
                EventKind::ReleaseResult {
                    request,
                    resource,
                    outcome,
                }
            }
            Self::TRANSFER_RESULT => {
                let request = EventId(r.read_varint()?);
                let resource = ResourcePath::read(r)?;
                let outcome = match r.read_u8()? {
                    0 => TransferOutcome::Ok,
                    1 => TransferOutcome::Error,
                    value => {
                        return Err(WireError::UnknownTag {
                            what: "transfer outcome",
                            value,
                        })
                    }
                };
                EventKind::TransferResult {
                    request,
                    resource,
                    outcome,
                }
            }
            value => {
                return Err(WireError::UnknownTag {
                    what: "event",
                    value,
                })
            }
        };
        Ok(kind)
    }
}

/// A protocol message with its envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Sequence number assigned by the sender's channel at enqueue time.
    pub id: EventId,
    pub from: PeerId,
    pub to: PeerId,
    pub kind: EventKind,
}

/// Everything one peer sends another in a single tick.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    /// Highest event id the sender has accepted from the receiver.
    pub ack: EventId,
    pub events: Vec<Event>,
}

/// Encode a packet for the transport.
pub fn encode_packet<'a>(ack: EventId, events: impl IntoIterator<Item = &'a Event>) -> Vec<u8> {
    let events: Vec<&Event> = events.into_iter().collect();
    let mut w = WireWriter::new();
    w.write_varint(ack.0);
    w.write_varint(events.len() as u64);
    for event in events {
        w.write_u8(event.kind.tag());
        w.write_varint(event.id.0);
        event.kind.write_body(&mut w);
    }
    w.into_bytes()
}

/// Decode a packet received from `from`, stamping every event's envelope.
pub fn decode_packet(payload: &[u8], from: PeerId, to: PeerId) -> Result<Packet, WireError> {
    let mut r = WireReader::new(payload);
    let ack = EventId(r.read_varint()?);
    let count = r.read_varint()?;
    // An event is at least a tag, an id and a path count.
    if count.saturating_mul(3) > r.remaining() as u64 {
        return Err(WireError::UnexpectedEndOfStream);
    }
    let mut events = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let tag = r.read_u8()?;
        let id = EventId(r.read_varint()?);
        let kind = EventKind::read(tag, &mut r)?;
        events.push(Event { id, from, to, kind });
    }
    if !r.is_exhausted() {
        return Err(WireError::TrailingBytes(r.remaining()));
    }
    Ok(Packet { ack, events })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: PeerId = PeerId(1);
    const BOB: PeerId = PeerId(2);

    fn room() -> ResourcePath {
        ResourcePath::root("lobby").child("SU").child("SU_A01")
    }

    fn event(id: u64, kind: EventKind) -> Event {
        Event {
            id: EventId(id),
            from: ALICE,
            to: BOB,
            kind,
        }
    }

    #[test]
    fn test_newer_or_equal_plain() {
        assert!(EventId(5).is_newer_or_equal(EventId(5)));
        assert!(EventId(6).is_newer_or_equal(EventId(5)));
        assert!(!EventId(4).is_newer_or_equal(EventId(5)));
        assert!(!EventId::NONE.is_newer_or_equal(EventId::FIRST));
    }

    #[test]
    fn test_newer_or_equal_across_wraparound() {
        let before = EventId(u64::MAX - 1);
        let after = before.next().next();
        assert_eq!(after, EventId(1));
        assert!(after.is_newer_or_equal(before));
        assert!(after.is_newer(before));
        assert!(!before.is_newer_or_equal(after));
    }

    #[test]
    fn test_next_skips_none() {
        assert_eq!(EventId(u64::MAX).next(), EventId::FIRST);
        assert_eq!(EventId::NONE.next(), EventId::FIRST);
    }

    #[test]
    fn test_path_navigation() {
        let path = room();
        assert_eq!(path.to_string(), "lobby/SU/SU_A01");
        assert_eq!(path.identifier(), Some("SU_A01"));
        assert_eq!(path.parent(), Some(ResourcePath::root("lobby").child("SU")));
        assert_eq!(ResourcePath::root("lobby").parent(), None);
    }

    #[test]
    fn test_packet_with_every_event_kind() {
        let events = vec![
            event(1, EventKind::ResourceRequest { resource: room() }),
            event(
                2,
                EventKind::ReleaseRequest {
                    resource: room(),
                    subscribers: vec![BOB, PeerId(3)],
                },
            ),
            event(
                3,
                EventKind::TransferRequest {
                    resource: room(),
                    subscribers: vec![],
                },
            ),
            event(
                4,
                EventKind::NewOwner {
                    resource: room(),
                    owner: None,
                },
            ),
            event(
                5,
                EventKind::LeaseState {
                    resource: ResourcePath::root("lobby"),
                    leases: vec![("SU".into(), Some(ALICE)), ("HI".into(), None)],
                },
            ),
            event(
                6,
                EventKind::RequestResult {
                    request: EventId(9),
                    resource: room(),
                    outcome: RequestOutcome::Subscribed,
                },
            ),
            event(
                7,
                EventKind::ReleaseResult {
                    request: EventId(10),
                    resource: room(),
                    outcome: ReleaseOutcome::Unsubscribed,
                },
            ),
            event(
                8,
                EventKind::TransferResult {
                    request: EventId(11),
                    resource: room(),
                    outcome: TransferOutcome::Error,
                },
            ),
        ];
        let bytes = encode_packet(EventId(42), &events);
        let packet = decode_packet(&bytes, ALICE, BOB).unwrap();
        assert_eq!(packet.ack, EventId(42));
        assert_eq!(packet.events, events);
    }

    #[test]
    fn test_event_starts_with_tag() {
        let bytes = encode_packet(
            EventId::NONE,
            &[event(1, EventKind::ResourceRequest { resource: room() })],
        );
        // ack 0, count 1, then the event tag.
        assert_eq!(&bytes[..3], &[0x80, 0x81, 0x01]);
    }

    #[test]
    fn test_decode_stamps_envelope_from_transport() {
        let bytes = encode_packet(
            EventId::NONE,
            &[event(3, EventKind::ResourceRequest { resource: room() })],
        );
        let packet = decode_packet(&bytes, PeerId(77), PeerId(88)).unwrap();
        assert_eq!(packet.events[0].from, PeerId(77));
        assert_eq!(packet.events[0].to, PeerId(88));
    }

    #[test]
    fn test_truncated_packet_is_end_of_stream() {
        let bytes = encode_packet(
            EventId(1),
            &[event(1, EventKind::ResourceRequest { resource: room() })],
        );
        let err = decode_packet(&bytes[..bytes.len() - 2], ALICE, BOB).unwrap_err();
        assert_eq!(err, WireError::UnexpectedEndOfStream);
    }

    #[test]
    fn test_unknown_tag_and_trailing_bytes() {
        let err = decode_packet(&[0x80, 0x81, 0x7e, 0x81, 0x80], ALICE, BOB).unwrap_err();
        assert_eq!(
            err,
            WireError::UnknownTag {
                what: "event",
                value: 0x7e
            }
        );

        let mut bytes = encode_packet(EventId(1), &[]);
        bytes.push(0);
        assert_eq!(
            decode_packet(&bytes, ALICE, BOB).unwrap_err(),
            WireError::TrailingBytes(1)
        );
    }
}
