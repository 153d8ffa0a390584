//! Subscription registry: which peers observe which resources.
//!
//! A subscription is a registry entry, not an owning relationship. Handles
//! are issued in increasing order, so iterating a resource's subscribers
//! yields them in registration order.

use crate::resource::ResourceId;
use holdfast_types::error::{HoldfastError, HoldfastResult};
use holdfast_types::peer::PeerId;
use std::collections::{BTreeMap, HashMap};

/// Handle of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// A peer observing a resource it does not own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub resource: ResourceId,
    pub peer: PeerId,
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    by_id: BTreeMap<SubscriptionId, Subscription>,
    index: HashMap<(ResourceId, PeerId), SubscriptionId>,
    next_id: u64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `peer` to `resource`. Subscribing twice returns the
    /// existing handle; the resource's owner cannot subscribe.
    pub fn add(
        &mut self,
        resource: ResourceId,
        peer: PeerId,
        owner: Option<PeerId>,
    ) -> HoldfastResult<SubscriptionId> {
        if owner == Some(peer) {
            return Err(HoldfastError::SelfSubscription {
                resource: resource.to_string(),
                peer: peer.to_string(),
            });
        }
        if let Some(existing) = self.index.get(&(resource, peer)) {
            return Ok(*existing);
        }
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.by_id.insert(id, Subscription { id, resource, peer });
        self.index.insert((resource, peer), id);
        Ok(id)
    }

    pub fn remove(&mut self, handle: SubscriptionId) -> HoldfastResult<Subscription> {
        let subscription = self
            .by_id
            .remove(&handle)
            .ok_or_else(|| HoldfastError::NotFound(format!("subscription {}", handle.0)))?;
        self.index
            .remove(&(subscription.resource, subscription.peer));
        Ok(subscription)
    }

    pub fn find(&self, resource: ResourceId, peer: PeerId) -> HoldfastResult<SubscriptionId> {
        self.index.get(&(resource, peer)).copied().ok_or_else(|| {
            HoldfastError::NotFound(format!("subscription of {peer} to resource {resource}"))
        })
    }

    pub fn get(&self, handle: SubscriptionId) -> Option<&Subscription> {
        self.by_id.get(&handle)
    }

    /// Subscribers of `resource` in registration order.
    pub fn subscribers_of(&self, resource: ResourceId) -> Vec<PeerId> {
        self.by_id
            .values()
            .filter(|sub| sub.resource == resource)
            .map(|sub| sub.peer)
            .collect()
    }

    pub fn count_for(&self, resource: ResourceId) -> usize {
        self.by_id
            .values()
            .filter(|sub| sub.resource == resource)
            .count()
    }

    /// Drop every subscription to `resource`, returning them.
    pub fn remove_resource(&mut self, resource: ResourceId) -> Vec<Subscription> {
        let handles: Vec<SubscriptionId> = self
            .by_id
            .values()
            .filter(|sub| sub.resource == resource)
            .map(|sub| sub.id)
            .collect();
        handles
            .into_iter()
            .filter_map(|handle| self.remove(handle).ok())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOM: ResourceId = ResourceId(4);
    const OTHER: ResourceId = ResourceId(5);

    #[test]
    fn test_add_find_remove() {
        let mut registry = SubscriptionRegistry::new();
        let handle = registry.add(ROOM, PeerId(2), Some(PeerId(1))).unwrap();
        assert_eq!(registry.find(ROOM, PeerId(2)).unwrap(), handle);

        let removed = registry.remove(handle).unwrap();
        assert_eq!(removed.peer, PeerId(2));
        assert!(registry.is_empty());
        assert!(matches!(
            registry.find(ROOM, PeerId(2)),
            Err(HoldfastError::NotFound(_))
        ));
    }

    #[test]
    fn test_owner_cannot_subscribe() {
        let mut registry = SubscriptionRegistry::new();
        let err = registry.add(ROOM, PeerId(1), Some(PeerId(1))).unwrap_err();
        assert!(matches!(err, HoldfastError::SelfSubscription { .. }));
    }

    #[test]
    fn test_remove_missing_is_not_found() {
        let mut registry = SubscriptionRegistry::new();
        let handle = registry.add(ROOM, PeerId(2), None).unwrap();
        registry.remove(handle).unwrap();
        assert!(matches!(
            registry.remove(handle),
            Err(HoldfastError::NotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_add_returns_existing_handle() {
        let mut registry = SubscriptionRegistry::new();
        let first = registry.add(ROOM, PeerId(2), None).unwrap();
        let second = registry.add(ROOM, PeerId(2), None).unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_subscribers_in_registration_order() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(ROOM, PeerId(9), None).unwrap();
        registry.add(OTHER, PeerId(3), None).unwrap();
        registry.add(ROOM, PeerId(2), None).unwrap();
        assert_eq!(registry.subscribers_of(ROOM), vec![PeerId(9), PeerId(2)]);
        assert_eq!(registry.count_for(OTHER), 1);

        let dropped = registry.remove_resource(ROOM);
        assert_eq!(dropped.len(), 2);
        assert_eq!(registry.count_for(ROOM), 0);
        assert_eq!(registry.len(), 1);
    }
}
