use crate::change_info::{ChangeInfo, ChangedNode};
use crate::component::ComponentId;
use docsync_markup::{MarkupDocument, Node, NodeId};
use std::collections::{BTreeMap, BTreeSet};

/// Edits planned for one target component during a sync
#[derive(Debug, Clone)]
pub struct SyncUnit {
    pub target: ComponentId,
    pub infos: Vec<ChangeInfo>,
    pub to_add: Vec<ComponentId>,
    pub to_remove: Vec<ComponentId>,
    /// Attached children whose peer changed position, with the new peer
    pub to_move: Vec<(ComponentId, NodeId)>,
    /// Attribute values before the change, keyed by name
    pub removed_attributes: BTreeMap<String, Option<String>>,
    /// Attribute values after the change, keyed by name
    pub added_attributes: BTreeMap<String, Option<String>>,
    pub component_changed: bool,
    /// Local names of touched non-domain child elements
    pub non_domain_tags: BTreeSet<String>,
}

impl SyncUnit {
    pub fn new(target: ComponentId) -> Self {
        Self {
            target,
            infos: Vec::new(),
            to_add: Vec::new(),
            to_remove: Vec::new(),
            to_move: Vec::new(),
            removed_attributes: BTreeMap::new(),
            added_attributes: BTreeMap::new(),
            component_changed: false,
            non_domain_tags: BTreeSet::new(),
        }
    }

    pub fn add_info(&mut self, info: ChangeInfo) {
        if !self.infos.contains(&info) {
            self.infos.push(info);
        }
    }

    /// Queue `child` for insertion unless a component for the same peer is queued
    pub fn add_to_add(&mut self, child: ComponentId, peer_of: &dyn Fn(ComponentId) -> Option<NodeId>) {
        let peer = peer_of(child);
        if !self.to_add.iter().any(|c| *c == child || (peer.is_some() && peer_of(*c) == peer)) {
            self.to_add.push(child);
        }
    }

    pub fn add_to_remove(&mut self, child: ComponentId) {
        if !self.to_remove.contains(&child) {
            self.to_remove.push(child);
        }
    }

    pub fn add_to_move(&mut self, child: ComponentId, node: NodeId) {
        if !self.to_move.iter().any(|(c, _)| *c == child) {
            self.to_move.push((child, node));
        }
    }

    pub fn record_attribute(&mut self, name: &str, old: Option<String>, new: Option<String>) {
        self.removed_attributes.insert(name.to_string(), old);
        self.added_attributes.insert(name.to_string(), new);
    }

    /// Union of two units for the same target
    pub fn merge(&mut self, other: SyncUnit, peer_of: &dyn Fn(ComponentId) -> Option<NodeId>) {
        debug_assert_eq!(self.target, other.target);
        for info in other.infos {
            self.add_info(info);
        }
        for child in other.to_add {
            self.add_to_add(child, peer_of);
        }
        for child in other.to_remove {
            self.add_to_remove(child);
        }
        for (child, node) in other.to_move {
            self.add_to_move(child, node);
        }
        self.removed_attributes.extend(other.removed_attributes);
        self.added_attributes.extend(other.added_attributes);
        self.component_changed |= other.component_changed;
        self.non_domain_tags.extend(other.non_domain_tags);
    }

    /// Attribute names whose value differs before and after
    pub fn changed_attributes(&self) -> Vec<(&str, Option<&str>, Option<&str>)> {
        let names: BTreeSet<&String> = self
            .removed_attributes
            .keys()
            .chain(self.added_attributes.keys())
            .collect();
        names
            .into_iter()
            .filter_map(|name| {
                let old = self.removed_attributes.get(name).and_then(|v| v.as_deref());
                let new = self.added_attributes.get(name).and_then(|v| v.as_deref());
                (old != new).then_some((name.as_str(), old, new))
            })
            .collect()
    }

    /// Every change is an added or removed whitespace-only text node
    pub fn has_whitespace_change_only(&self, doc: &MarkupDocument) -> bool {
        !self.infos.is_empty()
            && self.to_add.is_empty()
            && self.to_remove.is_empty()
            && self.to_move.is_empty()
            && self.removed_attributes.is_empty()
            && self.added_attributes.is_empty()
            && self.non_domain_tags.is_empty()
            && self.infos.iter().all(|info| match &info.changed {
                ChangedNode::Node(id) => doc.get(*id).is_some_and(Node::is_whitespace_text),
                ChangedNode::Attribute { .. } => false,
            })
    }
}
