//! # Component tree
//!
//! Arena of typed components. Each component wraps exactly one markup element
//! (its peer) and keeps a back-reference to its parent.
//!
//! ```text
//! ComponentId ─→ Slot { kind, peer: NodeId, parent, children: lazy }
//! ```
//!
//! The peer is a plain slot: repointing it after a copy-on-write edit does not
//! change the component's identity.
//!
//! Ids are never reused. A removed component keeps its slot so a stale handle
//! is still recognized, but once the markup arena is compacted its peer is
//! released and only its kind and parent link remain.

use crate::errors::{ModelError, ModelResult};
use crate::namespace::{ForeignContext, PrefixCache};
use docsync_markup::{NodeId, NodeUpdater};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(pub u32);

impl ComponentId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

#[derive(Debug)]
pub(crate) struct Slot<K> {
    pub kind: K,
    pub peer: NodeId,
    pub parent: Option<ComponentId>,
    /// `None` until first populated
    pub children: Option<Vec<ComponentId>>,
    /// Set once the component was removed from its parent
    pub removed: bool,
    /// Removed and its peer dropped by a compaction
    pub released: bool,
    pub prefix_cache: RefCell<Option<PrefixCache>>,
}

pub struct ComponentTree<K> {
    slots: Vec<Slot<K>>,
    root: Option<ComponentId>,
    foreign: Option<Rc<dyn ForeignContext>>,
}

impl<K> ComponentTree<K> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            root: None,
            foreign: None,
        }
    }

    pub fn root(&self) -> Option<ComponentId> {
        self.root
    }

    pub(crate) fn set_root(&mut self, root: Option<ComponentId>) {
        self.root = root;
    }

    pub fn foreign(&self) -> Option<&Rc<dyn ForeignContext>> {
        self.foreign.as_ref()
    }

    pub(crate) fn set_foreign(&mut self, foreign: Option<Rc<dyn ForeignContext>>) {
        self.foreign = foreign;
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn create(&mut self, kind: K, peer: NodeId) -> ComponentId {
        let id = ComponentId(self.slots.len() as u32);
        self.slots.push(Slot {
            kind,
            peer,
            parent: None,
            children: None,
            removed: false,
            released: false,
            prefix_cache: RefCell::new(None),
        });
        id
    }

    pub(crate) fn slot(&self, id: ComponentId) -> ModelResult<&Slot<K>> {
        self.slots
            .get(id.index())
            .ok_or(ModelError::ComponentNotFound(id))
    }

    pub(crate) fn slot_mut(&mut self, id: ComponentId) -> ModelResult<&mut Slot<K>> {
        self.slots
            .get_mut(id.index())
            .ok_or(ModelError::ComponentNotFound(id))
    }

    pub fn kind(&self, id: ComponentId) -> ModelResult<&K> {
        Ok(&self.slot(id)?.kind)
    }

    pub fn peer(&self, id: ComponentId) -> ModelResult<NodeId> {
        let slot = self.slot(id)?;
        if slot.released {
            return Err(ModelError::StaleComponent(id));
        }
        Ok(slot.peer)
    }

    pub fn parent(&self, id: ComponentId) -> ModelResult<Option<ComponentId>> {
        Ok(self.slot(id)?.parent)
    }

    /// Cached children, without populating
    pub fn cached_children(&self, id: ComponentId) -> ModelResult<Option<&[ComponentId]>> {
        Ok(self.slot(id)?.children.as_deref())
    }

    pub fn is_populated(&self, id: ComponentId) -> bool {
        self.slot(id).is_ok_and(|s| s.children.is_some())
    }

    pub fn is_removed(&self, id: ComponentId) -> bool {
        self.slot(id).map_or(true, |s| s.removed)
    }

    /// Components from the top of the parent chain down to `id`
    pub fn ancestors(&self, id: ComponentId) -> ModelResult<Vec<ComponentId>> {
        let mut chain = vec![id];
        let mut current = id;
        while let Some(parent) = self.slot(current)?.parent {
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        Ok(chain)
    }

    pub fn depth(&self, id: ComponentId) -> usize {
        self.ancestors(id).map_or(0, |chain| chain.len())
    }

    /// Parent links lead to the current root; an embedded root also needs its
    /// foreign parent to be in its own model
    pub fn is_in_document_model(&self, id: ComponentId) -> bool {
        let Ok(chain) = self.ancestors(id) else {
            return false;
        };
        if chain.iter().any(|c| self.is_removed(*c)) || Some(chain[0]) != self.root {
            return false;
        }
        match &self.foreign {
            Some(foreign) => foreign.is_in_document_model(),
            None => true,
        }
    }

    pub(crate) fn set_children(&mut self, id: ComponentId, children: Vec<ComponentId>) -> ModelResult<()> {
        for child in &children {
            self.slot_mut(*child)?.parent = Some(id);
        }
        self.slot_mut(id)?.children = Some(children);
        Ok(())
    }

    pub(crate) fn append_child_quietly(&mut self, parent: ComponentId, child: ComponentId) -> ModelResult<usize> {
        let index = self.cached_children(parent)?.map_or(0, <[_]>::len);
        self.insert_at_index_quietly(parent, index, child)
    }

    /// Insert into the cached child list only. Returns the index used.
    pub(crate) fn insert_at_index_quietly(
        &mut self,
        parent: ComponentId,
        index: usize,
        child: ComponentId,
    ) -> ModelResult<usize> {
        self.slot(child)?;
        let children = self.slot_mut(parent)?.children.get_or_insert_with(Vec::new);
        let index = index.min(children.len());
        children.insert(index, child);
        self.slot_mut(child)?.parent = Some(parent);
        Ok(index)
    }

    /// Take out of the cached child list, keeping the child attached to
    /// `parent`. Returns the former index.
    pub(crate) fn take_child_quietly(&mut self, parent: ComponentId, child: ComponentId) -> ModelResult<Option<usize>> {
        let Some(children) = self.slot_mut(parent)?.children.as_mut() else {
            return Ok(None);
        };
        let index = children.iter().position(|c| *c == child);
        if let Some(index) = index {
            children.remove(index);
        }
        Ok(index)
    }

    /// Remove from the cached child list and detach the child's subtree.
    /// Returns the former index.
    pub(crate) fn remove_child_quietly(
        &mut self,
        parent: ComponentId,
        child: ComponentId,
    ) -> ModelResult<Option<usize>> {
        let Some(children) = self.slot_mut(parent)?.children.as_mut() else {
            return Ok(None);
        };
        let Some(index) = children.iter().position(|c| *c == child) else {
            return Ok(None);
        };
        children.remove(index);
        self.slot_mut(child)?.parent = None;
        self.mark_removed(child)?;
        Ok(Some(index))
    }

    pub(crate) fn mark_removed(&mut self, id: ComponentId) -> ModelResult<()> {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let slot = self.slot_mut(current)?;
            slot.removed = true;
            if let Some(children) = &slot.children {
                stack.extend(children.iter().copied());
            }
        }
        Ok(())
    }

    /// Detach every component, e.g. before the tree is rebuilt
    pub(crate) fn discard(&mut self) -> Option<ComponentId> {
        for slot in &mut self.slots {
            slot.removed = true;
        }
        self.root.take()
    }

    /// Peers of the components that are not removed, detached ones included
    pub(crate) fn live_peers(&self) -> Vec<NodeId> {
        self.slots
            .iter()
            .filter(|s| !s.removed)
            .map(|s| s.peer)
            .collect()
    }

    /// Renumber peers after the markup arena was compacted. Removed
    /// components whose peer did not survive are released.
    pub(crate) fn remap_peers(&mut self, map: &HashMap<NodeId, NodeId>) {
        let mut released = 0;
        for slot in self.slots.iter_mut().filter(|s| !s.released) {
            match map.get(&slot.peer) {
                Some(new) => slot.peer = *new,
                None => {
                    slot.removed = true;
                    slot.released = true;
                    slot.children = None;
                    slot.prefix_cache.get_mut().take();
                    released += 1;
                }
            }
        }
        debug!(released, "remapped component peers");
    }

    pub fn update_reference(&mut self, id: ComponentId, node: NodeId) -> ModelResult<()> {
        self.slot_mut(id)?.peer = node;
        Ok(())
    }

    /// Repoint `id` and its ancestors to `path` (document element first).
    pub fn update_reference_path(&mut self, id: ComponentId, path: &[NodeId]) -> ModelResult<()> {
        let chain = self.ancestors(id)?;
        if chain.len() != path.len() {
            return Err(ModelError::path_invariant(format!(
                "{} has {} ancestors but the path has {} elements",
                id,
                chain.len(),
                path.len()
            )));
        }
        for (component, node) in chain.iter().zip(path) {
            self.update_reference(*component, *node)?;
        }
        Ok(())
    }

    /// Repoint every component whose peer is a key of `replaced`
    pub(crate) fn sweep(&mut self, replaced: &HashMap<NodeId, NodeId>) {
        if replaced.is_empty() {
            return;
        }
        for slot in self.slots.iter_mut().filter(|s| !s.removed) {
            if let Some(new) = replaced.get(&slot.peer) {
                slot.peer = *new;
            }
        }
    }
}

impl<K> Default for ComponentTree<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Repoints components after a caller mutation of the markup tree
pub(crate) struct TreeUpdater<'a, K> {
    pub tree: &'a mut ComponentTree<K>,
}

impl<K> NodeUpdater for TreeUpdater<'_, K> {
    fn update_reference(&mut self, old: NodeId, new: NodeId) {
        if old == new {
            return;
        }
        for slot in self.tree.slots.iter_mut().filter(|s| !s.removed && s.peer == old) {
            slot.peer = new;
        }
    }

    fn update_path(&mut self, old_path: &[NodeId], new_path: &[NodeId]) {
        let replaced: HashMap<NodeId, NodeId> = old_path
            .iter()
            .zip(new_path)
            .filter(|(old, new)| old != new)
            .map(|(old, new)| (*old, *new))
            .collect();
        self.tree.sweep(&replaced);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> (ComponentTree<&'static str>, ComponentId, ComponentId, ComponentId) {
        let mut tree = ComponentTree::new();
        let root = tree.create("root", NodeId(1));
        let a = tree.create("a", NodeId(2));
        let b = tree.create("b", NodeId(3));
        tree.set_root(Some(root));
        tree.set_children(root, vec![a]).unwrap();
        tree.set_children(a, vec![b]).unwrap();
        (tree, root, a, b)
    }

    #[test]
    fn test_attachment_follows_parent_links() {
        let (mut tree, root, a, b) = tree();
        assert!(tree.is_in_document_model(b));
        assert_eq!(tree.ancestors(b).unwrap(), vec![root, a, b]);

        assert_eq!(tree.remove_child_quietly(root, a).unwrap(), Some(0));
        assert!(!tree.is_in_document_model(a));
        assert!(tree.is_removed(b));
        assert_eq!(tree.remove_child_quietly(root, a).unwrap(), None);
    }

    #[test]
    fn test_quiet_insert_clamps_index() {
        let (mut tree, root, a, _) = tree();
        let c = tree.create("c", NodeId(4));
        assert_eq!(tree.insert_at_index_quietly(root, 10, c).unwrap(), 1);
        assert_eq!(tree.cached_children(root).unwrap(), Some(&[a, c][..]));
        assert_eq!(tree.parent(c).unwrap(), Some(root));
    }

    #[test]
    fn test_update_reference_path_checks_length() {
        let (mut tree, _, a, b) = tree();
        tree.update_reference_path(b, &[NodeId(10), NodeId(20), NodeId(30)])
            .unwrap();
        assert_eq!(tree.peer(a).unwrap(), NodeId(20));

        let err = tree.update_reference_path(b, &[NodeId(10)]).unwrap_err();
        assert!(matches!(err, ModelError::PathInvariant(_)));
    }

    #[test]
    fn test_tree_updater_skips_removed_components() {
        let (mut tree, root, a, _) = tree();
        let stale = tree.create("a", NodeId(2));
        tree.mark_removed(stale).unwrap();

        let mut updater = TreeUpdater { tree: &mut tree };
        updater.update_reference(NodeId(2), NodeId(12));
        assert_eq!(tree.peer(a).unwrap(), NodeId(12));
        assert_eq!(tree.peer(stale).unwrap(), NodeId(2));
        assert_eq!(tree.peer(root).unwrap(), NodeId(1));
    }

    #[test]
    fn test_remap_releases_dropped_peers() {
        let (mut tree, root, a, b) = tree();
        tree.remove_child_quietly(a, b).unwrap();
        assert_eq!(tree.live_peers(), vec![NodeId(1), NodeId(2)]);

        let map = HashMap::from([(NodeId(1), NodeId(0)), (NodeId(2), NodeId(1))]);
        tree.remap_peers(&map);
        assert_eq!(tree.peer(root).unwrap(), NodeId(0));
        assert_eq!(tree.peer(a).unwrap(), NodeId(1));
        assert!(matches!(tree.peer(b), Err(ModelError::StaleComponent(id)) if id == b));
        assert!(tree.is_removed(b));
    }

    #[test]
    fn test_tree_updater_repoints_paths() {
        let (mut tree, root, a, b) = tree();
        let mut updater = TreeUpdater { tree: &mut tree };
        updater.update_path(
            &[NodeId(0), NodeId(1), NodeId(2)],
            &[NodeId(7), NodeId(8), NodeId(9)],
        );
        assert_eq!(tree.peer(root).unwrap(), NodeId(8));
        assert_eq!(tree.peer(a).unwrap(), NodeId(9));
        assert_eq!(tree.peer(b).unwrap(), NodeId(3));
    }
}
