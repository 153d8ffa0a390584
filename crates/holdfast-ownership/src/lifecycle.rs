//! Caller-driven transitions of a resource and the local state changes the
//! protocol applies when results come back.

use crate::error::OwnershipResult;
use crate::resource::{PendingKind, PendingRequest, Presence, ResourceId};
use crate::session::{Session, SessionNotice};
use holdfast_types::error::HoldfastError;
use holdfast_types::peer::PeerId;
use holdfast_wire::{EventId, EventKind};
use tracing::{debug, warn};

impl Session {
    /// Ask for ownership of `id`, or a subscription to it.
    ///
    /// The request goes to the current owner, or to the owner of the super
    /// resource when `id` is free or already leased to this peer. Fails with
    /// `NotRequestable` when neither has an owner.
    pub fn request(&mut self, id: ResourceId) -> OwnershipResult<()> {
        let resource = self.tree.path_of(id);
        let node = self.tree.node(id)?;
        if node.is_pending() {
            return Err(HoldfastError::invalid_state(&resource, "a request is already pending").into());
        }
        if node.is_active() {
            return Err(HoldfastError::invalid_state(&resource, "already active").into());
        }
        if node.is_available() {
            return Err(HoldfastError::invalid_state(&resource, "already available").into());
        }
        let owner = node.owner.filter(|owner| *owner != self.local);
        let target = match owner.or_else(|| self.parent_owner(id)) {
            Some(target) => target,
            None => return Err(HoldfastError::NotRequestable(resource.to_string()).into()),
        };

        let event_id = self.queue_event(
            target,
            EventKind::ResourceRequest {
                resource: resource.clone(),
            },
        );
        self.set_pending(id, PendingKind::Request, event_id, target)?;
        debug!(peer = %self.local, resource = %resource, to = %target, "Requested resource");
        Ok(())
    }

    /// Give up ownership of `id` (handing its subscribers to the super
    /// owner) or drop the local subscription to it.
    pub fn release(&mut self, id: ResourceId) -> OwnershipResult<()> {
        let resource = self.tree.path_of(id);
        let can_release = self.can_release(id);
        let parent_owner = self.parent_owner(id);
        let node = self.tree.node(id)?;
        if node.is_pending() {
            return Err(HoldfastError::invalid_state(&resource, "a request is already pending").into());
        }
        if !node.is_available() {
            return Err(HoldfastError::invalid_state(&resource, "not available").into());
        }
        if node.is_active() && !node.deactivate_on_release {
            return Err(HoldfastError::invalid_state(
                &resource,
                "active and not marked to deactivate on release",
            )
            .into());
        }
        if !can_release {
            return Err(HoldfastError::invalid_state(&resource, "a subresource is still available").into());
        }

        let (target, subscribers) = match node.owner {
            Some(owner) if owner == self.local => match parent_owner {
                Some(super_owner) => (super_owner, self.subscriptions.subscribers_of(id)),
                None => {
                    return Err(HoldfastError::invalid_state(&resource, "no super owner to return it to").into())
                }
            },
            Some(owner) => (owner, Vec::new()),
            None => return Err(HoldfastError::invalid_state(&resource, "free").into()),
        };

        let event_id = self.queue_event(
            target,
            EventKind::ReleaseRequest {
                resource: resource.clone(),
                subscribers,
            },
        );
        self.set_pending(id, PendingKind::Release, event_id, target)?;
        debug!(peer = %self.local, resource = %resource, to = %target, "Releasing resource");
        Ok(())
    }

    /// Release `id` and everything under it, children first. Whatever cannot
    /// be released yet is marked and released once its last available
    /// subresource goes away.
    pub fn fully_release(&mut self, id: ResourceId) -> OwnershipResult<()> {
        self.tree.node_mut(id)?.deactivate_on_release = true;
        let children = self.tree.node(id)?.children.clone();
        for child in children {
            let node = self.tree.node(child)?;
            if node.is_available() && !node.is_pending() {
                self.fully_release(child)?;
            }
        }

        if self.can_release(id) {
            self.release(id)
        } else {
            debug!(peer = %self.local, resource = %self.tree.path_of(id), "Release deferred");
            self.tree.node_mut(id)?.release_when_possible = true;
            Ok(())
        }
    }

    pub fn set_deactivate_on_release(&mut self, id: ResourceId, enabled: bool) -> OwnershipResult<()> {
        self.tree.node_mut(id)?.deactivate_on_release = enabled;
        Ok(())
    }

    /// The local game state for `id` has loaded. Materializes its
    /// subresources and brings their ownership up to date.
    pub fn activate(&mut self, id: ResourceId) -> OwnershipResult<()> {
        let resource = self.tree.path_of(id);
        let local = self.local;
        let node = self.tree.node_mut(id)?;
        if node.is_active() {
            return Err(HoldfastError::invalid_state(&resource, "already active").into());
        }
        if !node.is_available() {
            return Err(HoldfastError::invalid_state(&resource, "not available").into());
        }
        if node
            .pending
            .is_some_and(|pending| pending.kind == PendingKind::Release)
        {
            return Err(HoldfastError::invalid_state(&resource, "release in progress").into());
        }

        let children = node.behavior.on_activate();
        let is_owner = node.owner == Some(local);
        let inserted = children
            .into_iter()
            .try_for_each(|child| self.tree.insert(Some(id), child).map(|_| ()));
        if let Err(err) = inserted {
            self.tree.remove_children(id);
            self.tree.node_mut(id)?.behavior.on_deactivate();
            warn!(peer = %local, resource = %resource, error = %err, "Activation rolled back");
            return Err(err.into());
        }
        let node = self.tree.node_mut(id)?;
        node.presence = Presence::Active;
        let lease = std::mem::take(&mut node.incoming_lease);

        if is_owner {
            for peer in self.subscriptions.subscribers_of(id) {
                self.send_lease_state(id, peer)?;
            }
        } else if !lease.is_empty() {
            self.apply_lease(id, lease)?;
        }
        debug!(peer = %local, resource = %resource, "Activated");
        Ok(())
    }

    /// The local game state for `id` has been torn down. Subresources are
    /// discarded.
    pub fn deactivate(&mut self, id: ResourceId) -> OwnershipResult<()> {
        let resource = self.tree.path_of(id);
        let node = self.tree.node(id)?;
        if !node.is_active() {
            return Err(HoldfastError::invalid_state(&resource, "not active").into());
        }
        if node
            .children
            .iter()
            .any(|child| self.tree.get(*child).is_some_and(|c| c.is_active()))
        {
            return Err(HoldfastError::invalid_state(&resource, "a subresource is still active").into());
        }

        self.tree.node_mut(id)?.behavior.on_deactivate();
        for child in self.tree.remove_children(id) {
            let dropped = self.subscriptions.remove_resource(child);
            if !dropped.is_empty() {
                debug!(resource = %child, count = dropped.len(), "Dropped subscriptions of discarded subresource");
            }
        }
        self.tree.node_mut(id)?.presence = Presence::Available;
        debug!(peer = %self.local, resource = %resource, "Deactivated");
        Ok(())
    }

    pub(crate) fn available(&mut self, id: ResourceId) -> OwnershipResult<()> {
        let resource = self.tree.path_of(id);
        if self.subscriptions.count_for(id) > 0 {
            return Err(HoldfastError::invalid_state(&resource, "stale subscriptions").into());
        }
        let node = self.tree.node_mut(id)?;
        if node.is_available() {
            return Err(HoldfastError::invalid_state(&resource, "already available").into());
        }
        node.presence = Presence::Available;
        debug!(peer = %self.local, resource = %resource, "Available");
        self.notify(SessionNotice::Available { resource });
        Ok(())
    }

    pub(crate) fn unavailable(&mut self, id: ResourceId) -> OwnershipResult<()> {
        let resource = self.tree.path_of(id);
        let can_release = self.can_release(id);
        let node = self.tree.node(id)?;
        if !node.is_available() {
            return Err(HoldfastError::invalid_state(&resource, "not available").into());
        }
        if !can_release {
            return Err(HoldfastError::invalid_state(&resource, "a subresource is still available").into());
        }
        if self.subscriptions.count_for(id) > 0 {
            return Err(HoldfastError::invalid_state(&resource, "subscribers must be removed first").into());
        }
        if node.is_active() {
            if !node.deactivate_on_release {
                return Err(HoldfastError::invalid_state(&resource, "still active").into());
            }
            self.deactivate(id)?;
        }

        let node = self.tree.node_mut(id)?;
        node.presence = Presence::Unavailable;
        node.deactivate_on_release = false;
        let parent = node.parent;
        debug!(peer = %self.local, resource = %resource, "Unavailable");
        self.notify(SessionNotice::Unavailable { resource });

        if let Some(parent) = parent {
            let ready = self.tree.get(parent).is_some_and(|node| {
                node.release_when_possible && !node.is_pending()
            }) && self.can_release(parent);
            if ready {
                self.tree.node_mut(parent)?.release_when_possible = false;
                self.release(parent)?;
            }
        }
        Ok(())
    }

    /// Record a new owner for `id`. When the local peer owns the super
    /// resource, every subscriber of the super resource is told.
    pub(crate) fn set_owner(&mut self, id: ResourceId, owner: Option<PeerId>) -> OwnershipResult<()> {
        let node = self.tree.node_mut(id)?;
        let previous = std::mem::replace(&mut node.owner, owner);
        if previous == owner {
            return Ok(());
        }
        let parent = node.parent;
        let resource = self.tree.path_of(id);
        debug!(
            peer = %self.local,
            resource = %resource,
            previous = ?previous,
            owner = ?owner,
            "Owner changed"
        );

        if let Some(parent) = parent {
            if self.is_owner(parent) {
                for subscriber in self.subscriptions.subscribers_of(parent) {
                    self.queue_event(
                        subscriber,
                        EventKind::NewOwner {
                            resource: resource.clone(),
                            owner,
                        },
                    );
                }
            }
        }
        self.notify(SessionNotice::OwnerChanged { resource, owner });
        Ok(())
    }

    /// Register `peer` as a subscriber of `id`, pushing the current lease
    /// state when the resource is live.
    pub(crate) fn subscribed(&mut self, id: ResourceId, peer: PeerId) -> OwnershipResult<()> {
        let node = self.tree.node(id)?;
        let (owner, active) = (node.owner, node.is_active());
        if !node.is_available() {
            return Err(HoldfastError::invalid_state(self.tree.path_of(id), "not available").into());
        }
        self.subscriptions
            .add(id, peer, owner)
            .map_err(|err| match err {
                HoldfastError::SelfSubscription { peer, .. } => HoldfastError::SelfSubscription {
                    resource: self.tree.path_of(id).to_string(),
                    peer,
                },
                other => other,
            })?;
        debug!(peer = %self.local, resource = %self.tree.path_of(id), subscriber = %peer, "Subscribed");
        if active {
            self.send_lease_state(id, peer)?;
        }
        Ok(())
    }

    pub(crate) fn send_lease_state(&mut self, id: ResourceId, peer: PeerId) -> OwnershipResult<()> {
        let node = self.tree.node(id)?;
        let leases = node
            .children
            .iter()
            .filter_map(|child| self.tree.get(*child))
            .map(|child| (child.identifier.clone(), child.owner))
            .collect();
        let resource = self.tree.path_of(id);
        self.queue_event(peer, EventKind::LeaseState { resource, leases });
        Ok(())
    }

    /// Apply subresource owners received from the owner of `id`.
    pub(crate) fn apply_lease(
        &mut self,
        id: ResourceId,
        leases: Vec<(String, Option<PeerId>)>,
    ) -> OwnershipResult<()> {
        for (identifier, owner) in leases {
            match self.tree.child_named(id, &identifier) {
                Some(child) => self.set_owner(child, owner)?,
                None => debug!(
                    resource = %self.tree.path_of(id),
                    subresource = %identifier,
                    "Lease for unknown subresource"
                ),
            }
        }
        Ok(())
    }

    fn set_pending(
        &mut self,
        id: ResourceId,
        kind: PendingKind,
        event_id: EventId,
        to: PeerId,
    ) -> OwnershipResult<()> {
        let issued_tick = self.tick;
        self.tree.node_mut(id)?.pending = Some(PendingRequest {
            kind,
            event_id,
            to,
            issued_tick,
        });
        Ok(())
    }
}
