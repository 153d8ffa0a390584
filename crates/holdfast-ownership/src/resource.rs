//! Resources: nodes of the ownership tree.
//!
//! Local usability is a single [`Presence`] value rather than independent
//! flags, so "active but not available" cannot be represented. The
//! ownership role is derived from the owner field and the local peer id,
//! which makes free / owned-here / owned-elsewhere exhaustive and exclusive.

use holdfast_types::peer::PeerId;
use holdfast_wire::EventId;

/// Arena key of a resource within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) u32);

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Local usability of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Presence {
    /// Neither leased nor subscribed.
    #[default]
    Unavailable,
    /// Leased or subscribed; state is usable but not materialized.
    Available,
    /// Available and its local game state is live.
    Active,
}

impl Presence {
    pub fn is_available(self) -> bool {
        !matches!(self, Presence::Unavailable)
    }

    pub fn is_active(self) -> bool {
        matches!(self, Presence::Active)
    }
}

/// Who owns a resource, from the local peer's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipRole {
    Free,
    /// The local peer.
    Owner,
    /// Another peer.
    Foreign(PeerId),
}

/// Which handshake a pending request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    Request,
    Release,
    Transfer,
}

impl std::fmt::Display for PendingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PendingKind::Request => "request",
            PendingKind::Release => "release",
            PendingKind::Transfer => "transfer",
        })
    }
}

/// The single in-flight protocol request of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    pub kind: PendingKind,
    /// Id of the request event in the channel to `to`.
    pub event_id: EventId,
    pub to: PeerId,
    /// Session tick at which it was sent.
    pub issued_tick: u64,
}

/// Game-specific side of a resource.
///
/// The protocol never looks inside a resource; it only asks for its name and
/// tells it when to materialize or tear down its local state.
pub trait ResourceBehavior: Send {
    /// Stable name, unique among siblings. Used for logging and addressing.
    fn identifier(&self) -> &str;

    /// Materialize local state. Returns the subresources that exist under
    /// this resource now that it is loaded.
    fn on_activate(&mut self) -> Vec<Box<dyn ResourceBehavior>>;

    /// Tear down local state. Subresources are discarded afterwards.
    fn on_deactivate(&mut self) {}
}

/// A resource with a fixed set of named subresources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticResource {
    identifier: String,
    children: Vec<StaticResource>,
}

impl StaticResource {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: StaticResource) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = StaticResource>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn boxed(self) -> Box<dyn ResourceBehavior> {
        Box::new(self)
    }
}

impl ResourceBehavior for StaticResource {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn on_activate(&mut self) -> Vec<Box<dyn ResourceBehavior>> {
        self.children.iter().cloned().map(StaticResource::boxed).collect()
    }
}

/// Protocol state of one resource plus its game-specific behavior.
pub struct ResourceNode {
    pub(crate) behavior: Box<dyn ResourceBehavior>,
    pub(crate) identifier: String,
    pub(crate) parent: Option<ResourceId>,
    pub(crate) children: Vec<ResourceId>,
    pub(crate) owner: Option<PeerId>,
    pub(crate) presence: Presence,
    pub(crate) pending: Option<PendingRequest>,
    pub(crate) deactivate_on_release: bool,
    pub(crate) release_when_possible: bool,
    /// Subresource ownership received before this resource was active.
    pub(crate) incoming_lease: Vec<(String, Option<PeerId>)>,
}

impl ResourceNode {
    pub(crate) fn new(behavior: Box<dyn ResourceBehavior>, parent: Option<ResourceId>) -> Self {
        let identifier = behavior.identifier().to_string();
        Self {
            behavior,
            identifier,
            parent,
            children: Vec::new(),
            owner: None,
            presence: Presence::Unavailable,
            pending: None,
            deactivate_on_release: false,
            release_when_possible: false,
            incoming_lease: Vec::new(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The super resource.
    pub fn parent(&self) -> Option<ResourceId> {
        self.parent
    }

    pub fn children(&self) -> &[ResourceId] {
        &self.children
    }

    pub fn owner(&self) -> Option<PeerId> {
        self.owner
    }

    pub fn presence(&self) -> Presence {
        self.presence
    }

    pub fn pending(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }

    pub fn is_free(&self) -> bool {
        self.owner.is_none()
    }

    pub fn is_available(&self) -> bool {
        self.presence.is_available()
    }

    pub fn is_active(&self) -> bool {
        self.presence.is_active()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn deactivate_on_release(&self) -> bool {
        self.deactivate_on_release
    }

    pub fn release_when_possible(&self) -> bool {
        self.release_when_possible
    }

    /// Role of `local` with respect to this resource.
    pub fn role(&self, local: PeerId) -> OwnershipRole {
        match self.owner {
            None => OwnershipRole::Free,
            Some(owner) if owner == local => OwnershipRole::Owner,
            Some(owner) => OwnershipRole::Foreign(owner),
        }
    }
}

impl std::fmt::Debug for ResourceNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceNode")
            .field("identifier", &self.identifier)
            .field("owner", &self.owner)
            .field("presence", &self.presence)
            .field("pending", &self.pending)
            .field("children", &self.children.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_active_implies_available() {
        assert!(Presence::Active.is_available());
        assert!(Presence::Available.is_available());
        assert!(!Presence::Unavailable.is_available());
        assert!(!Presence::Available.is_active());
    }

    #[test]
    fn test_role_is_exhaustive_and_exclusive() {
        let mut node = ResourceNode::new(StaticResource::new("lobby").boxed(), None);
        let me = PeerId(1);
        assert_eq!(node.role(me), OwnershipRole::Free);
        assert!(node.is_free());

        node.owner = Some(me);
        assert_eq!(node.role(me), OwnershipRole::Owner);
        assert!(!node.is_free());

        node.owner = Some(PeerId(2));
        assert_eq!(node.role(me), OwnershipRole::Foreign(PeerId(2)));
    }

    #[test]
    fn test_static_resource_activation_yields_children() {
        let mut world = StaticResource::new("SU")
            .with_children(["SU_A01", "SU_A02"].map(StaticResource::new));
        let children = world.on_activate();
        let names: Vec<&str> = children.iter().map(|c| c.identifier()).collect();
        assert_eq!(names, vec!["SU_A01", "SU_A02"]);
        // Activating again yields fresh children.
        assert_eq!(world.on_activate().len(), 2);
    }
}
