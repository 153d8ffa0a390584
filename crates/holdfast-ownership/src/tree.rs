//! Arena holding the resource tree of one session.
//!
//! Children are owned by the arena and listed by id in their parent; the
//! upward link is a plain [`ResourceId`], never a shared pointer.

use crate::resource::{ResourceBehavior, ResourceId, ResourceNode};
use holdfast_types::error::{HoldfastError, HoldfastResult};
use holdfast_wire::ResourcePath;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct ResourceTree {
    nodes: HashMap<ResourceId, ResourceNode>,
    roots: Vec<ResourceId>,
    next_id: u32,
}

impl ResourceTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a resource under `parent` (or as a root). Identifiers must be
    /// unique among siblings.
    pub fn insert(
        &mut self,
        parent: Option<ResourceId>,
        behavior: Box<dyn ResourceBehavior>,
    ) -> HoldfastResult<ResourceId> {
        let identifier = behavior.identifier();
        let siblings = match parent {
            Some(parent_id) => &self.node(parent_id)?.children,
            None => &self.roots,
        };
        if siblings
            .iter()
            .any(|sibling| self.nodes[sibling].identifier == identifier)
        {
            let path = match parent {
                Some(parent_id) => self.path_of(parent_id).child(identifier),
                None => ResourcePath::root(identifier),
            };
            return Err(HoldfastError::invalid_state(
                path,
                "identifier already used by a sibling",
            ));
        }

        let id = ResourceId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, ResourceNode::new(behavior, parent));
        match parent {
            Some(parent_id) => self.node_mut(parent_id)?.children.push(id),
            None => self.roots.push(id),
        }
        Ok(id)
    }

    pub fn get(&self, id: ResourceId) -> Option<&ResourceNode> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: ResourceId) -> Option<&mut ResourceNode> {
        self.nodes.get_mut(&id)
    }

    pub fn node(&self, id: ResourceId) -> HoldfastResult<&ResourceNode> {
        self.nodes
            .get(&id)
            .ok_or_else(|| HoldfastError::NotFound(format!("resource {id}")))
    }

    pub fn node_mut(&mut self, id: ResourceId) -> HoldfastResult<&mut ResourceNode> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| HoldfastError::NotFound(format!("resource {id}")))
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Discard every descendant of `id`. Returns the removed ids.
    pub fn remove_children(&mut self, id: ResourceId) -> Vec<ResourceId> {
        let mut stack = match self.nodes.get_mut(&id) {
            Some(node) => std::mem::take(&mut node.children),
            None => return Vec::new(),
        };
        let mut removed = Vec::new();
        while let Some(child) = stack.pop() {
            if let Some(node) = self.nodes.remove(&child) {
                stack.extend(node.children);
                removed.push(child);
            }
        }
        removed
    }

    /// Identifiers from the root down to `id`.
    pub fn path_of(&self, id: ResourceId) -> ResourcePath {
        let mut segments = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            match self.nodes.get(&current) {
                Some(node) => {
                    segments.push(node.identifier.clone());
                    cursor = node.parent;
                }
                None => break,
            }
        }
        segments.reverse();
        ResourcePath(segments)
    }

    /// Find the resource addressed by `path`.
    pub fn resolve(&self, path: &ResourcePath) -> Option<ResourceId> {
        let (first, rest) = path.segments().split_first()?;
        let mut current = *self
            .roots
            .iter()
            .find(|root| self.nodes[*root].identifier == *first)?;
        for segment in rest {
            current = self.child_named(current, segment)?;
        }
        Some(current)
    }

    pub fn child_named(&self, parent: ResourceId, identifier: &str) -> Option<ResourceId> {
        self.nodes
            .get(&parent)?
            .children
            .iter()
            .copied()
            .find(|child| self.nodes[child].identifier == identifier)
    }

    pub fn roots(&self) -> &[ResourceId] {
        &self.roots
    }

    /// All resources in creation order.
    pub fn ids(&self) -> Vec<ResourceId> {
        let mut ids: Vec<ResourceId> = self.nodes.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::StaticResource;

    fn tree_with_rooms() -> (ResourceTree, ResourceId, ResourceId, ResourceId) {
        let mut tree = ResourceTree::new();
        let lobby = tree.insert(None, StaticResource::new("lobby").boxed()).unwrap();
        let world = tree
            .insert(Some(lobby), StaticResource::new("SU").boxed())
            .unwrap();
        let room = tree
            .insert(Some(world), StaticResource::new("SU_A01").boxed())
            .unwrap();
        (tree, lobby, world, room)
    }

    #[test]
    fn test_path_and_resolve() {
        let (tree, lobby, world, room) = tree_with_rooms();
        let path = tree.path_of(room);
        assert_eq!(path.to_string(), "lobby/SU/SU_A01");
        assert_eq!(tree.resolve(&path), Some(room));
        assert_eq!(tree.resolve(&ResourcePath::root("lobby")), Some(lobby));
        assert_eq!(tree.child_named(lobby, "SU"), Some(world));
        assert_eq!(tree.resolve(&ResourcePath::root("lobby").child("HI")), None);
        assert_eq!(tree.resolve(&ResourcePath::default()), None);
    }

    #[test]
    fn test_duplicate_sibling_rejected() {
        let (mut tree, lobby, _, _) = tree_with_rooms();
        let err = tree
            .insert(Some(lobby), StaticResource::new("SU").boxed())
            .unwrap_err();
        assert!(matches!(err, HoldfastError::InvalidState { .. }));
        // Same name elsewhere in the tree is fine.
        assert!(tree
            .insert(None, StaticResource::new("SU").boxed())
            .is_ok());
    }

    #[test]
    fn test_remove_children_drops_whole_subtree() {
        let (mut tree, lobby, world, room) = tree_with_rooms();
        let mut removed = tree.remove_children(lobby);
        removed.sort();
        assert_eq!(removed, vec![world, room]);
        assert_eq!(tree.len(), 1);
        assert!(tree.node(lobby).unwrap().children().is_empty());
        assert!(!tree.contains(room));
    }

    #[test]
    fn test_parent_links() {
        let (tree, lobby, world, room) = tree_with_rooms();
        assert_eq!(tree.node(room).unwrap().parent(), Some(world));
        assert_eq!(tree.node(world).unwrap().parent(), Some(lobby));
        assert_eq!(tree.node(lobby).unwrap().parent(), None);
        assert_eq!(tree.roots(), &[lobby]);
    }
}
