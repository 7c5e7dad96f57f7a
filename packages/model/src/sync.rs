//! # Reconciliation
//!
//! Turns the changes of a markup merge into component tree updates.
//!
//! ```text
//! MarkupChange ──classify──→ ChangeInfo ──build──→ SyncUnit (one per target)
//!                                                       │ sorted root to leaf
//!                                                       ▼
//!                          repoint, property events, removals, moves and additions
//! ```
//!
//! Components keep pointing at the old node versions until their unit is
//! applied, so attribute and content snapshots can be taken from both sides.
//! A failing change or unit is logged and skipped; the rest of the batch
//! still applies.

use crate::change_info::{ChangeInfo, ChangedNode};
use crate::component::ComponentId;
use crate::errors::{ModelError, ModelResult};
use crate::events::{ComponentEvent, PropertyValue};
use crate::factory::ComponentFactory;
use crate::model::DocumentModel;
use crate::sync_unit::SyncUnit;
use docsync_markup::{serialize_node, ChangeKind, ElementRef, MarkupDocument, MergeOutcome, NodeId};
use std::collections::HashMap;
use tracing::{debug, instrument};

impl<F: ComponentFactory> DocumentModel<F> {
    /// Apply a merge outcome to the component tree. Returns the number of
    /// units applied.
    #[instrument(skip_all, fields(changes = outcome.changes.len()))]
    pub(crate) fn apply_changes(&mut self, outcome: MergeOutcome) -> usize {
        let units = match self.build_units(&outcome) {
            Ok(units) => units,
            Err(err) => {
                debug!(error = %err, "cannot build sync units");
                Vec::new()
            }
        };
        let applied = self.apply_units(units);
        self.tree.sweep(&outcome.replaced);
        applied
    }

    /// Apply `units` in order. A unit whose target was detached by an earlier
    /// unit is skipped; a failing unit is dropped.
    fn apply_units(&mut self, units: Vec<SyncUnit>) -> usize {
        let mut applied = 0;
        for unit in units {
            let target = unit.target;
            match self.apply_unit(unit) {
                Ok(true) => applied += 1,
                Ok(false) => debug!(%target, "skipped unit for detached component"),
                Err(err) => debug!(%target, error = %err, "dropping sync unit"),
            }
        }
        applied
    }

    fn build_units(&mut self, outcome: &MergeOutcome) -> ModelResult<Vec<SyncUnit>> {
        let mut units: Vec<SyncUnit> = Vec::new();
        let mut by_target: HashMap<ComponentId, usize> = HashMap::new();
        if self.tree.root().is_none() {
            return Ok(units);
        }

        for change in &outcome.changes {
            let info = match ChangeInfo::classify(self.document()?, change, &self.domain) {
                Ok(info) => info,
                Err(err) => {
                    debug!(error = %err, "skipping unclassifiable change");
                    continue;
                }
            };
            let unit = match self.build_unit(info) {
                Ok(unit) => unit,
                Err(err) => {
                    debug!(error = %err, "skipping change");
                    continue;
                }
            };

            let peer_of = |c: ComponentId| self.tree.peer(c).ok();
            match by_target.get(&unit.target) {
                Some(&index) => units[index].merge(unit, &peer_of),
                None => {
                    by_target.insert(unit.target, units.len());
                    units.push(unit);
                }
            }
        }

        units.sort_by_key(|unit| self.tree.depth(unit.target));
        Ok(units)
    }

    fn build_unit(&mut self, mut info: ChangeInfo) -> ModelResult<SyncUnit> {
        let target = loop {
            if let Some(target) = self.resolve_path(&info.root_to_parent) {
                break target;
            }
            info.mark_parent_as_changed()?;
        };
        let mut unit = SyncUnit::new(target);
        let populated = self.tree.is_populated(target);

        if info.domain_element {
            let node = info
                .changed
                .node()
                .ok_or_else(|| ModelError::path_invariant("domain change without a node"))?;
            match info.kind {
                ChangeKind::Added if populated => {
                    if let Some(child) = self.precreate_child(target, node)? {
                        let peer_of = |c: ComponentId| self.tree.peer(c).ok();
                        unit.add_to_add(child, &peer_of);
                        unit.add_info(info);
                        return Ok(unit);
                    }
                    info.mark_non_domain_child_as_changed()?;
                }
                ChangeKind::Removed if populated => {
                    if let Some(child) = self.find_removed_child(target, node, &info)? {
                        unit.add_to_remove(child);
                        unit.add_info(info);
                        return Ok(unit);
                    }
                    debug!(%target, %node, "no component for removed element");
                    info.mark_non_domain_child_as_changed()?;
                }
                ChangeKind::Moved if populated => {
                    if let Some(child) = self.find_moved_child(target, node)? {
                        unit.add_to_move(child, node);
                        unit.add_info(info);
                        return Ok(unit);
                    }
                    info.mark_non_domain_child_as_changed()?;
                }
                ChangeKind::Added | ChangeKind::Removed | ChangeKind::Moved => {
                    // picked up when the children are first populated
                    unit.add_info(info);
                    return Ok(unit);
                }
                ChangeKind::Modified => info.mark_non_domain_child_as_changed()?,
            }
        }

        unit.component_changed = true;
        let doc = self.document()?;
        match &info.changed {
            ChangedNode::Attribute { element, name } => {
                let old_peer = self.tree.peer(target)?;
                let old = doc.element(old_peer)?.attribute(name).map(str::to_string);
                let new = doc.element(*element)?.attribute(name).map(str::to_string);
                unit.record_attribute(name, old, new);
            }
            ChangedNode::Node(node) => {
                if let Ok(element) = doc.element(*node) {
                    unit.non_domain_tags.insert(element.local_name.clone());
                }
            }
        }
        unit.add_info(info);
        Ok(unit)
    }

    /// Unattached component for a new domain element, if the factory accepts it
    fn precreate_child(&mut self, target: ComponentId, node: NodeId) -> ModelResult<Option<ComponentId>> {
        let Some(qname) = self.scope()?.element_qname(Some(target), node, false) else {
            return Ok(None);
        };
        let parent_kind = self.tree.kind(target)?;
        match self.factory.create(Some(parent_kind), &qname) {
            Some(kind) => Ok(Some(self.tree.create(kind, node))),
            None => Ok(None),
        }
    }

    /// Child of `target` wrapping the removed `node`: same node, then same
    /// logical node, then an element the identity rules consider the same
    fn find_removed_child(
        &self,
        target: ComponentId,
        node: NodeId,
        info: &ChangeInfo,
    ) -> ModelResult<Option<ComponentId>> {
        let doc = self.document()?;
        let children: Vec<(ComponentId, NodeId)> = self
            .tree
            .cached_children(target)?
            .unwrap_or(&[])
            .iter()
            .filter_map(|c| Some((*c, self.tree.peer(*c).ok()?)))
            .collect();

        if let Some((child, _)) = children.iter().find(|(_, peer)| *peer == node) {
            return Ok(Some(*child));
        }
        if let Some((child, _)) = children.iter().find(|(_, peer)| doc.is_equivalent(*peer, node)) {
            return Ok(Some(*child));
        }

        let removed = ElementRef::new(doc, &info.changed_context);
        let parent_context = &info.changed_context[..info.changed_context.len().saturating_sub(1)];
        let found = children.iter().find(|(_, peer)| {
            let mut context = parent_context.to_vec();
            context.push(*peer);
            self.identity
                .compare_element(&removed, &ElementRef::new(doc, &context), false)
        });
        Ok(found.map(|(child, _)| *child))
    }

    /// Cached child of `target` wrapping a version of the moved `node`
    fn find_moved_child(&self, target: ComponentId, node: NodeId) -> ModelResult<Option<ComponentId>> {
        let doc = self.document()?;
        let found = self
            .tree
            .cached_children(target)?
            .unwrap_or(&[])
            .iter()
            .copied()
            .find(|c| self.tree.peer(*c).is_ok_and(|peer| doc.is_equivalent(peer, node)));
        Ok(found)
    }

    /// Returns `false` when the target is no longer attached
    fn apply_unit(&mut self, unit: SyncUnit) -> ModelResult<bool> {
        let target = unit.target;
        if !self.tree.is_in_document_model(target) {
            return Ok(false);
        }
        let old_peer = self.tree.peer(target)?;
        if let Some(info) = unit.infos.first() {
            self.tree.update_reference_path(target, &info.root_to_parent)?;
        }
        let new_peer = self.tree.peer(target)?;

        if unit.component_changed {
            self.fire_property_events(&unit, old_peer, new_peer)?;
        }
        if !self.tree.is_populated(target) {
            return Ok(true);
        }

        for child in &unit.to_remove {
            if let Some(index) = self.tree.remove_child_quietly(target, *child)? {
                self.emit(ComponentEvent::ChildRemoved {
                    parent: target,
                    child: *child,
                    index,
                });
            }
        }

        // moved and added children go in by document position, so every
        // earlier sibling is already in place when an index is computed
        let mut placements: Vec<(ComponentId, NodeId, Option<usize>)> = Vec::new();
        for (child, node) in &unit.to_move {
            if let Some(from) = self.tree.take_child_quietly(target, *child)? {
                placements.push((*child, *node, Some(from)));
            }
        }
        for child in &unit.to_add {
            placements.push((*child, self.tree.peer(*child)?, None));
        }
        let doc = self.document()?;
        let siblings = doc.children(new_peer);
        placements.sort_by_key(|(_, node, _)| siblings.iter().position(|s| s == node));

        for (child, node, from) in placements {
            let index = self.domain_sibling_index(target, node)?;
            let index = self.tree.insert_at_index_quietly(target, index, child)?;
            self.emit(match from {
                Some(from) => ComponentEvent::ChildMoved {
                    parent: target,
                    child,
                    from,
                    to: index,
                },
                None => ComponentEvent::ChildAdded {
                    parent: target,
                    child,
                    index,
                },
            });
        }
        Ok(true)
    }

    fn fire_property_events(&mut self, unit: &SyncUnit, old_peer: NodeId, new_peer: NodeId) -> ModelResult<()> {
        let target = unit.target;
        let doc = self.document()?;
        let whitespace_only = unit.has_whitespace_change_only(doc);
        let kind = self.tree.kind(target)?;

        let mut events = Vec::new();
        if !whitespace_only {
            events.push(ComponentEvent::ValueChanged { component: target });
        }
        for (name, old, new) in unit.changed_attributes() {
            let ty = self.factory.attribute_type(kind, name);
            events.push(ComponentEvent::PropertyChanged {
                component: target,
                property: name.to_string(),
                old: ty.coerce_opt(old),
                new: ty.coerce_opt(new),
            });
        }
        if !whitespace_only {
            let old_text = doc.text_content(old_peer);
            let new_text = doc.text_content(new_peer);
            if old_text != new_text {
                events.push(ComponentEvent::PropertyChanged {
                    component: target,
                    property: "textContent".to_string(),
                    old: Some(PropertyValue::Text(old_text)),
                    new: Some(PropertyValue::Text(new_text)),
                });
            }
        }
        for tag in &unit.non_domain_tags {
            let old = fragments(doc, old_peer, tag);
            let new = fragments(doc, new_peer, tag);
            if old != new {
                events.push(ComponentEvent::PropertyChanged {
                    component: target,
                    property: tag.clone(),
                    old: Some(PropertyValue::Fragments(old)),
                    new: Some(PropertyValue::Fragments(new)),
                });
            }
        }

        for event in events {
            self.emit(event);
        }
        Ok(())
    }

    /// Number of element siblings before `child_peer` that the factory
    /// accepts below `target`
    fn domain_sibling_index(&self, target: ComponentId, child_peer: NodeId) -> ModelResult<usize> {
        let doc = self.document()?;
        let scope = self.scope()?;
        let parent_peer = self.tree.peer(target)?;
        let parent_kind = self.tree.kind(target)?;

        let index = doc
            .child_elements(parent_peer)
            .take_while(|el| *el != child_peer)
            .filter(|el| {
                scope
                    .element_qname(Some(target), *el, false)
                    .is_some_and(|qname| self.factory.create(Some(parent_kind), &qname).is_some())
            })
            .count();
        Ok(index)
    }
}

/// Serialized child elements of `parent` with local name `tag`
fn fragments(doc: &MarkupDocument, parent: NodeId, tag: &str) -> Vec<String> {
    doc.child_elements(parent)
        .filter(|el| doc.element(*el).is_ok_and(|data| data.local_name == tag))
        .map(|el| serialize_node(doc, el))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change_info::ChangedNode;
    use crate::factory::QNameFactory;
    use docsync_markup::MarkupAccess;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Events = Rc<RefCell<Vec<ComponentEvent>>>;

    fn model(text: &str) -> (DocumentModel<QNameFactory>, Events) {
        let mut model = DocumentModel::from_text(text, QNameFactory::any());
        let events: Events = Rc::default();
        let sink = events.clone();
        model.add_listener(move |event: &ComponentEvent| sink.borrow_mut().push(event.clone()));
        (model, events)
    }

    fn attribute_info(root_to_parent: Vec<NodeId>, name: &str) -> ChangeInfo {
        let element = *root_to_parent.last().unwrap();
        ChangeInfo {
            parent: element,
            changed: ChangedNode::Attribute {
                element,
                name: name.to_string(),
            },
            kind: ChangeKind::Modified,
            domain_element: false,
            changed_context: root_to_parent.clone(),
            root_to_parent,
            other_non_domain_nodes: Vec::new(),
        }
    }

    fn attribute_unit(target: ComponentId, info: ChangeInfo, name: &str) -> SyncUnit {
        let mut unit = SyncUnit::new(target);
        unit.component_changed = true;
        unit.record_attribute(name, None, Some("1".to_string()));
        unit.add_info(info);
        unit
    }

    #[test]
    fn test_failing_unit_is_dropped_rest_applies() {
        let (mut model, events) = model("<r><a><b/></a></r>");
        let root = model.root().unwrap();
        let a = model.children(root).unwrap()[0];
        let b = model.children(a).unwrap()[0];
        let (r_peer, a_peer) = (model.peer(root).unwrap(), model.peer(a).unwrap());

        // b sits two levels below the root, the path names only the root
        let broken = attribute_unit(b, attribute_info(vec![r_peer], "v"), "v");
        let err = model.apply_unit(broken.clone()).unwrap_err();
        assert!(matches!(err, ModelError::PathInvariant(_)));

        let valid = attribute_unit(a, attribute_info(vec![r_peer, a_peer], "v"), "v");
        assert_eq!(model.apply_units(vec![broken, valid]), 1);
        assert_eq!(
            *events.borrow(),
            vec![
                ComponentEvent::ValueChanged { component: a },
                ComponentEvent::PropertyChanged {
                    component: a,
                    property: "v".to_string(),
                    old: None,
                    new: Some(PropertyValue::Text("1".to_string())),
                },
            ]
        );
    }

    #[test]
    fn test_removed_child_found_by_identifying_attribute() {
        let (mut model, _) = model(r#"<r><s name="x"/><s name="y"/></r>"#);
        let root = model.root().unwrap();
        let children = model.children(root).unwrap();
        let r_peer = model.peer(root).unwrap();

        let access = model.access.as_deref_mut().unwrap();
        let same = access.parse_fragment(r#"<s name="y"/>"#).unwrap()[0];
        let other = access.parse_fragment(r#"<s name="z"/>"#).unwrap()[0];
        assert!(!model.document().unwrap().is_equivalent(model.peer(children[1]).unwrap(), same));

        let removed = |node: NodeId| ChangeInfo {
            parent: r_peer,
            changed: ChangedNode::Node(node),
            kind: ChangeKind::Removed,
            domain_element: true,
            root_to_parent: vec![r_peer],
            other_non_domain_nodes: Vec::new(),
            changed_context: vec![r_peer, node],
        };
        assert_eq!(
            model.find_removed_child(root, same, &removed(same)).unwrap(),
            Some(children[1])
        );
        assert_eq!(model.find_removed_child(root, other, &removed(other)).unwrap(), None);
    }

    #[test]
    fn test_unit_below_removed_ancestor_is_skipped() {
        let (mut model, events) = model("<r><a><b/></a></r>");
        let root = model.root().unwrap();
        let a = model.children(root).unwrap()[0];
        let b = model.children(a).unwrap()[0];
        let (r_peer, a_peer, b_peer) = (
            model.peer(root).unwrap(),
            model.peer(a).unwrap(),
            model.peer(b).unwrap(),
        );

        let mut removal = SyncUnit::new(root);
        removal.add_to_remove(a);
        removal.add_info(ChangeInfo {
            parent: r_peer,
            changed: ChangedNode::Node(a_peer),
            kind: ChangeKind::Removed,
            domain_element: true,
            root_to_parent: vec![r_peer],
            other_non_domain_nodes: Vec::new(),
            changed_context: vec![r_peer, a_peer],
        });
        let below = attribute_unit(b, attribute_info(vec![r_peer, a_peer, b_peer], "v"), "v");

        assert_eq!(model.apply_units(vec![removal, below]), 1);
        assert_eq!(
            *events.borrow(),
            vec![ComponentEvent::ChildRemoved {
                parent: root,
                child: a,
                index: 0,
            }]
        );
        assert!(!model.is_in_document_model(b));
    }
}
