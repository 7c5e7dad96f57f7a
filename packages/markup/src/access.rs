//! Markup access: the only way the component layer touches the markup tree.
//!
//! Every mutating call performs the edit, then reports the old and new path of
//! the edited node to a [`NodeUpdater`] so wrappers holding replaced node
//! versions can be repointed.

use crate::document::{MarkupDocument, MarkupEdit};
use crate::error::{MarkupError, MarkupResult};
use crate::identity::ElementIdentity;
use crate::merge::{merge_subtree, MergeOutcome};
use crate::node::{Node, NodeId, NodeKind};
use crate::parser::{parse_fragment_into, parse_into};
use crate::serializer::{node_spans, serialize, serialize_children};
use std::collections::HashMap;

/// Receives node replacements performed by a markup edit
pub trait NodeUpdater {
    fn update_reference(&mut self, old: NodeId, new: NodeId);

    /// `old_path` and `new_path` run from the document node to the edited
    /// node and have the same length
    fn update_path(&mut self, old_path: &[NodeId], new_path: &[NodeId]);
}

/// Updater for callers that hold no node references
pub struct NoopUpdater;

impl NodeUpdater for NoopUpdater {
    fn update_reference(&mut self, _old: NodeId, _new: NodeId) {}
    fn update_path(&mut self, _old_path: &[NodeId], _new_path: &[NodeId]) {}
}

pub trait MarkupAccess {
    fn document(&self) -> &MarkupDocument;

    fn create_element(&mut self, namespace: Option<&str>, qualified_name: &str) -> MarkupResult<NodeId>;
    fn create_text(&mut self, text: &str) -> MarkupResult<NodeId>;

    /// Returns the new id of `element`
    fn set_attribute(
        &mut self,
        element: NodeId,
        name: &str,
        value: &str,
        updater: &mut dyn NodeUpdater,
    ) -> MarkupResult<NodeId>;
    fn remove_attribute(&mut self, element: NodeId, name: &str, updater: &mut dyn NodeUpdater) -> MarkupResult<NodeId>;

    /// Child operations return the new id of `parent`
    fn append_child(&mut self, parent: NodeId, child: NodeId, updater: &mut dyn NodeUpdater) -> MarkupResult<NodeId>;
    fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: NodeId,
        updater: &mut dyn NodeUpdater,
    ) -> MarkupResult<NodeId>;
    fn remove_child(&mut self, parent: NodeId, child: NodeId, updater: &mut dyn NodeUpdater) -> MarkupResult<NodeId>;
    fn remove_children(
        &mut self,
        parent: NodeId,
        children: &[NodeId],
        updater: &mut dyn NodeUpdater,
    ) -> MarkupResult<NodeId>;
    fn replace_child(
        &mut self,
        parent: NodeId,
        old: NodeId,
        new: NodeId,
        updater: &mut dyn NodeUpdater,
    ) -> MarkupResult<NodeId>;
    /// Replace the text children of `element` with a single text node
    fn set_text(&mut self, element: NodeId, text: &str, updater: &mut dyn NodeUpdater) -> MarkupResult<NodeId>;
    fn set_prefix(
        &mut self,
        element: NodeId,
        prefix: Option<&str>,
        updater: &mut dyn NodeUpdater,
    ) -> MarkupResult<NodeId>;

    /// Offset of `node` in the canonical serialization
    fn find_position(&self, node: NodeId) -> Option<usize>;
    /// Innermost element whose serialization covers `offset`
    fn containing_element(&self, offset: usize) -> Option<NodeId>;
    fn duplicate(&mut self, node: NodeId) -> MarkupResult<NodeId>;
    /// Detached copy of `element` carrying `children` instead of its own
    fn shallow_copy_with_children(&mut self, element: NodeId, children: Vec<NodeId>) -> MarkupResult<NodeId>;
    fn xml_fragment(&self, element: NodeId) -> MarkupResult<String>;
    fn parse_fragment(&mut self, text: &str) -> MarkupResult<Vec<NodeId>>;
    fn serialize(&self) -> String;

    fn merge_subtree(
        &mut self,
        target: NodeId,
        replacement: NodeId,
        identity: &ElementIdentity,
    ) -> MarkupResult<MergeOutcome>;
    /// Parse `text` and merge it into the live tree
    fn reload(&mut self, text: &str, identity: &ElementIdentity) -> MarkupResult<MergeOutcome>;
    /// Merge an earlier root version back into the live tree
    fn restore(&mut self, root_version: NodeId, identity: &ElementIdentity) -> MarkupResult<MergeOutcome>;
    fn take_edits(&mut self) -> Vec<MarkupEdit>;
    /// Drop unreachable node versions, see [`MarkupDocument::compact`]
    fn compact(&mut self, keep: &[NodeId]) -> HashMap<NodeId, NodeId>;
}

fn report(
    updater: &mut dyn NodeUpdater,
    target: NodeId,
    paths: Option<(Vec<NodeId>, Vec<NodeId>)>,
) -> NodeId {
    match paths {
        Some((old_path, new_path)) => {
            let new = new_path.last().copied().unwrap_or(target);
            updater.update_path(&old_path, &new_path);
            new
        }
        None => {
            updater.update_reference(target, target);
            target
        }
    }
}

impl MarkupDocument {
    fn ensure_detached(&self, child: NodeId) -> MarkupResult<()> {
        self.node(child)?;
        if self.contains(child) {
            return Err(MarkupError::AlreadyAttached(child));
        }
        Ok(())
    }

    fn child_index(&self, parent: NodeId, child: NodeId) -> MarkupResult<usize> {
        self.children(parent)
            .iter()
            .position(|c| *c == child)
            .ok_or(MarkupError::NotAChild { parent, child })
    }

    fn edit_children<F>(&mut self, parent: NodeId, updater: &mut dyn NodeUpdater, edit: F) -> MarkupResult<NodeId>
    where
        F: FnOnce(&mut Vec<NodeId>),
    {
        let paths = self.rewrite(parent, |node| {
            let children = node.children_mut().ok_or(MarkupError::NotAnElement(parent))?;
            edit(children);
            Ok(())
        })?;
        Ok(report(updater, parent, paths))
    }
}

impl MarkupAccess for MarkupDocument {
    fn document(&self) -> &MarkupDocument {
        self
    }

    fn create_element(&mut self, namespace: Option<&str>, qualified_name: &str) -> MarkupResult<NodeId> {
        MarkupDocument::create_element(self, namespace, qualified_name)
    }

    fn create_text(&mut self, text: &str) -> MarkupResult<NodeId> {
        Ok(MarkupDocument::create_text(self, text))
    }

    fn set_attribute(
        &mut self,
        element: NodeId,
        name: &str,
        value: &str,
        updater: &mut dyn NodeUpdater,
    ) -> MarkupResult<NodeId> {
        if name.is_empty() {
            return Err(MarkupError::InvalidName(name.to_string()));
        }
        let paths = self.rewrite(element, |node| {
            let data = node.as_element_mut().ok_or(MarkupError::NotAnElement(element))?;
            data.set_attribute(name, value);
            Ok(())
        })?;
        Ok(report(updater, element, paths))
    }

    fn remove_attribute(&mut self, element: NodeId, name: &str, updater: &mut dyn NodeUpdater) -> MarkupResult<NodeId> {
        let paths = self.rewrite(element, |node| {
            let data = node.as_element_mut().ok_or(MarkupError::NotAnElement(element))?;
            data.remove_attribute(name);
            Ok(())
        })?;
        Ok(report(updater, element, paths))
    }

    fn append_child(&mut self, parent: NodeId, child: NodeId, updater: &mut dyn NodeUpdater) -> MarkupResult<NodeId> {
        self.ensure_detached(child)?;
        self.edit_children(parent, updater, |children| children.push(child))
    }

    fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: NodeId,
        updater: &mut dyn NodeUpdater,
    ) -> MarkupResult<NodeId> {
        self.ensure_detached(child)?;
        let index = self.child_index(parent, reference)?;
        self.edit_children(parent, updater, |children| children.insert(index, child))
    }

    fn remove_child(&mut self, parent: NodeId, child: NodeId, updater: &mut dyn NodeUpdater) -> MarkupResult<NodeId> {
        let index = self.child_index(parent, child)?;
        self.edit_children(parent, updater, |children| {
            children.remove(index);
        })
    }

    fn remove_children(
        &mut self,
        parent: NodeId,
        children: &[NodeId],
        updater: &mut dyn NodeUpdater,
    ) -> MarkupResult<NodeId> {
        for child in children {
            self.child_index(parent, *child)?;
        }
        self.edit_children(parent, updater, |list| {
            list.retain(|c| !children.contains(c));
        })
    }

    fn replace_child(
        &mut self,
        parent: NodeId,
        old: NodeId,
        new: NodeId,
        updater: &mut dyn NodeUpdater,
    ) -> MarkupResult<NodeId> {
        self.ensure_detached(new)?;
        let index = self.child_index(parent, old)?;
        self.edit_children(parent, updater, |children| children[index] = new)
    }

    fn set_text(&mut self, element: NodeId, text: &str, updater: &mut dyn NodeUpdater) -> MarkupResult<NodeId> {
        self.element(element)?;
        let text_node = (!text.is_empty()).then(|| MarkupDocument::create_text(self, text));
        let texts: Vec<NodeId> = self
            .children(element)
            .iter()
            .copied()
            .filter(|c| self.get(*c).and_then(Node::text).is_some())
            .collect();
        let first = self
            .children(element)
            .iter()
            .position(|c| texts.contains(c));

        self.edit_children(element, updater, |children| {
            let at = first.unwrap_or(children.len());
            children.retain(|c| !texts.contains(c));
            if let Some(node) = text_node {
                children.insert(at.min(children.len()), node);
            }
        })
    }

    fn set_prefix(
        &mut self,
        element: NodeId,
        prefix: Option<&str>,
        updater: &mut dyn NodeUpdater,
    ) -> MarkupResult<NodeId> {
        if prefix == Some("") {
            return Err(MarkupError::InvalidName(String::new()));
        }
        let paths = self.rewrite(element, |node| {
            let data = node.as_element_mut().ok_or(MarkupError::NotAnElement(element))?;
            data.prefix = prefix.map(str::to_string);
            Ok(())
        })?;
        Ok(report(updater, element, paths))
    }

    fn find_position(&self, node: NodeId) -> Option<usize> {
        node_spans(self).get(&node).map(|span| span.start)
    }

    fn containing_element(&self, offset: usize) -> Option<NodeId> {
        let spans = node_spans(self);
        let mut current = self.document_element()?;
        if !spans.get(&current)?.contains(offset) {
            return None;
        }
        while let Some(child) = self
            .child_elements(current)
            .find(|c| spans.get(c).is_some_and(|s| s.contains(offset)))
        {
            current = child;
        }
        Some(current)
    }

    fn duplicate(&mut self, node: NodeId) -> MarkupResult<NodeId> {
        MarkupDocument::duplicate(self, node)
    }

    fn shallow_copy_with_children(&mut self, element: NodeId, children: Vec<NodeId>) -> MarkupResult<NodeId> {
        MarkupDocument::shallow_copy_with_children(self, element, children)
    }

    fn xml_fragment(&self, element: NodeId) -> MarkupResult<String> {
        self.element(element)?;
        Ok(serialize_children(self, element))
    }

    fn parse_fragment(&mut self, text: &str) -> MarkupResult<Vec<NodeId>> {
        parse_fragment_into(self, text)
    }

    fn serialize(&self) -> String {
        serialize(self)
    }

    fn merge_subtree(
        &mut self,
        target: NodeId,
        replacement: NodeId,
        identity: &ElementIdentity,
    ) -> MarkupResult<MergeOutcome> {
        merge_subtree(self, target, replacement, identity)
    }

    fn reload(&mut self, text: &str, identity: &ElementIdentity) -> MarkupResult<MergeOutcome> {
        let replacement = parse_into(self, text)?;
        let root = self.root();
        merge_subtree(self, root, replacement, identity)
    }

    fn restore(&mut self, root_version: NodeId, identity: &ElementIdentity) -> MarkupResult<MergeOutcome> {
        if !matches!(self.node(root_version)?.kind, NodeKind::Document { .. }) {
            return Err(MarkupError::NotAnElement(root_version));
        }
        let root = self.root();
        merge_subtree(self, root, root_version, identity)
    }

    fn take_edits(&mut self) -> Vec<MarkupEdit> {
        MarkupDocument::take_edits(self)
    }

    fn compact(&mut self, keep: &[NodeId]) -> HashMap<NodeId, NodeId> {
        MarkupDocument::compact(self, keep)
    }
}

/// Markup access over a document that must not be edited.
///
/// Reads, detached node creation and reloads from text are allowed; every
/// edit of the tree fails with [`MarkupError::Unsupported`].
pub struct ReadOnlyMarkup {
    inner: MarkupDocument,
}

impl ReadOnlyMarkup {
    pub fn new(inner: MarkupDocument) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> MarkupDocument {
        self.inner
    }
}

impl MarkupAccess for ReadOnlyMarkup {
    fn document(&self) -> &MarkupDocument {
        &self.inner
    }

    fn create_element(&mut self, namespace: Option<&str>, qualified_name: &str) -> MarkupResult<NodeId> {
        self.inner.create_element(namespace, qualified_name)
    }

    fn create_text(&mut self, text: &str) -> MarkupResult<NodeId> {
        Ok(self.inner.create_text(text))
    }

    fn set_attribute(&mut self, _: NodeId, _: &str, _: &str, _: &mut dyn NodeUpdater) -> MarkupResult<NodeId> {
        Err(MarkupError::Unsupported("set_attribute"))
    }

    fn remove_attribute(&mut self, _: NodeId, _: &str, _: &mut dyn NodeUpdater) -> MarkupResult<NodeId> {
        Err(MarkupError::Unsupported("remove_attribute"))
    }

    fn append_child(&mut self, _: NodeId, _: NodeId, _: &mut dyn NodeUpdater) -> MarkupResult<NodeId> {
        Err(MarkupError::Unsupported("append_child"))
    }

    fn insert_before(&mut self, _: NodeId, _: NodeId, _: NodeId, _: &mut dyn NodeUpdater) -> MarkupResult<NodeId> {
        Err(MarkupError::Unsupported("insert_before"))
    }

    fn remove_child(&mut self, _: NodeId, _: NodeId, _: &mut dyn NodeUpdater) -> MarkupResult<NodeId> {
        Err(MarkupError::Unsupported("remove_child"))
    }

    fn remove_children(&mut self, _: NodeId, _: &[NodeId], _: &mut dyn NodeUpdater) -> MarkupResult<NodeId> {
        Err(MarkupError::Unsupported("remove_children"))
    }

    fn replace_child(&mut self, _: NodeId, _: NodeId, _: NodeId, _: &mut dyn NodeUpdater) -> MarkupResult<NodeId> {
        Err(MarkupError::Unsupported("replace_child"))
    }

    fn set_text(&mut self, _: NodeId, _: &str, _: &mut dyn NodeUpdater) -> MarkupResult<NodeId> {
        Err(MarkupError::Unsupported("set_text"))
    }

    fn set_prefix(&mut self, _: NodeId, _: Option<&str>, _: &mut dyn NodeUpdater) -> MarkupResult<NodeId> {
        Err(MarkupError::Unsupported("set_prefix"))
    }

    fn find_position(&self, node: NodeId) -> Option<usize> {
        self.inner.find_position(node)
    }

    fn containing_element(&self, offset: usize) -> Option<NodeId> {
        self.inner.containing_element(offset)
    }

    fn duplicate(&mut self, node: NodeId) -> MarkupResult<NodeId> {
        self.inner.duplicate(node)
    }

    fn shallow_copy_with_children(&mut self, element: NodeId, children: Vec<NodeId>) -> MarkupResult<NodeId> {
        self.inner.shallow_copy_with_children(element, children)
    }

    fn xml_fragment(&self, element: NodeId) -> MarkupResult<String> {
        self.inner.xml_fragment(element)
    }

    fn parse_fragment(&mut self, text: &str) -> MarkupResult<Vec<NodeId>> {
        self.inner.parse_fragment(text)
    }

    fn serialize(&self) -> String {
        serialize(&self.inner)
    }

    fn merge_subtree(&mut self, _: NodeId, _: NodeId, _: &ElementIdentity) -> MarkupResult<MergeOutcome> {
        Err(MarkupError::Unsupported("merge_subtree"))
    }

    fn reload(&mut self, text: &str, identity: &ElementIdentity) -> MarkupResult<MergeOutcome> {
        self.inner.reload(text, identity)
    }

    fn restore(&mut self, root_version: NodeId, identity: &ElementIdentity) -> MarkupResult<MergeOutcome> {
        self.inner.restore(root_version, identity)
    }

    fn take_edits(&mut self) -> Vec<MarkupEdit> {
        self.inner.take_edits()
    }

    fn compact(&mut self, keep: &[NodeId]) -> HashMap<NodeId, NodeId> {
        self.inner.compact(keep)
    }
}
