//! # Markup Document
//!
//! Arena-backed markup tree. Node versions live in the arena until
//! [`MarkupDocument::compact`] drops the ones that are no longer reachable;
//! the current tree is whatever is reachable from [`MarkupDocument::root`].
//!
//! ## Edit modes
//!
//! ```text
//! CopyOnWrite:  edit(X) → X' + copies of every ancestor → new root version
//! InPlace:      edit(X) → X mutated, ids unchanged
//! ```
//!
//! Nodes that are not reachable from the current root (freshly created
//! elements, parsed fragments) are always edited in place.

use crate::error::{MarkupError, MarkupResult};
use crate::node::{
    split_qualified, ElementData, LogicalId, Node, NodeId, NodeKind, QName, XML_NAMESPACE,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EditMode {
    #[default]
    CopyOnWrite,
    InPlace,
}

/// One committed change of the live tree, as a pair of root versions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkupEdit {
    pub before: NodeId,
    pub after: NodeId,
}

#[derive(Debug, Clone)]
pub struct MarkupDocument {
    nodes: Vec<Node>,
    root: NodeId,
    next_logical: u32,
    mode: EditMode,
    revision: u64,
    edits: Vec<MarkupEdit>,
}

impl MarkupDocument {
    /// Create an empty document (a document node without children)
    pub fn new(mode: EditMode) -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            next_logical: 0,
            mode,
            revision: 0,
            edits: Vec::new(),
        };
        doc.root = doc.alloc_fresh(NodeKind::Document {
            children: Vec::new(),
        });
        doc
    }

    /// Parse `text` into a new document
    pub fn parse(text: &str, mode: EditMode) -> MarkupResult<Self> {
        let mut doc = Self::new(mode);
        let root = crate::parser::parse_into(&mut doc, text)?;
        doc.root = root;
        Ok(doc)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn mode(&self) -> EditMode {
        self.mode
    }

    /// Incremented on every edit, including edits of detached nodes
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Drain the committed edits recorded since the last call
    pub fn take_edits(&mut self) -> Vec<MarkupEdit> {
        std::mem::take(&mut self.edits)
    }

    /// First element child of the current document node
    pub fn document_element(&self) -> Option<NodeId> {
        self.document_element_of(self.root)
    }

    pub fn document_element_of(&self, document: NodeId) -> Option<NodeId> {
        self.children(document)
            .iter()
            .copied()
            .find(|id| self.get(*id).is_some_and(Node::is_element))
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn node(&self, id: NodeId) -> MarkupResult<&Node> {
        self.get(id).ok_or(MarkupError::NodeNotFound(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> MarkupResult<&mut Node> {
        self.nodes
            .get_mut(id.index())
            .ok_or(MarkupError::NodeNotFound(id))
    }

    pub fn element(&self, id: NodeId) -> MarkupResult<&ElementData> {
        self.node(id)?
            .as_element()
            .ok_or(MarkupError::NotAnElement(id))
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(Node::is_element)
    }

    pub fn logical_id(&self, id: NodeId) -> Option<LogicalId> {
        self.get(id).map(|n| n.logical)
    }

    /// Two node versions of the same logical node
    pub fn is_equivalent(&self, a: NodeId, b: NodeId) -> bool {
        a == b
            || matches!(
                (self.logical_id(a), self.logical_id(b)),
                (Some(x), Some(y)) if x == y
            )
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map(Node::children).unwrap_or(&[])
    }

    pub fn child_elements(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id)
            .iter()
            .copied()
            .filter(move |c| self.is_element(*c))
    }

    /// Concatenated character data of the direct text children
    pub fn text_content(&self, id: NodeId) -> String {
        self.children(id)
            .iter()
            .filter_map(|c| self.get(*c).and_then(Node::text))
            .collect()
    }

    /// Elements of the subtree rooted at `id`, in document order
    pub fn descendant_elements(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if self.is_element(current) {
                out.push(current);
            }
            stack.extend(self.children(current).iter().rev().copied());
        }
        out
    }

    /// Path from the current document node to `target`, both inclusive
    pub fn path_to(&self, target: NodeId) -> Option<Vec<NodeId>> {
        self.path_from(self.root, target)
    }

    /// Path from `start` to `target`, both inclusive
    pub fn path_from(&self, start: NodeId, target: NodeId) -> Option<Vec<NodeId>> {
        let mut path = vec![start];
        if start == target {
            return Some(path);
        }
        // next child to visit, per entry of `path`
        let mut cursors = vec![0usize];
        while let (Some(&current), Some(cursor)) = (path.last(), cursors.last_mut()) {
            match self.children(current).get(*cursor) {
                Some(&child) => {
                    *cursor += 1;
                    path.push(child);
                    if child == target {
                        return Some(path);
                    }
                    cursors.push(0);
                }
                None => {
                    path.pop();
                    cursors.pop();
                }
            }
        }
        None
    }

    /// Reachable from the current root
    pub fn contains(&self, id: NodeId) -> bool {
        self.path_to(id).is_some()
    }

    /// Resolve `prefix` against the declarations on `context`, innermost first.
    ///
    /// `context` is a root-first element path; non-element entries are skipped.
    pub fn lookup_namespace_uri(&self, prefix: Option<&str>, context: &[NodeId]) -> Option<String> {
        if prefix == Some("xml") {
            return Some(XML_NAMESPACE.to_string());
        }
        context
            .iter()
            .rev()
            .filter_map(|id| self.get(*id).and_then(Node::as_element))
            .find_map(|el| el.declared_namespace(prefix))
            .filter(|uri| !uri.is_empty())
            .map(str::to_string)
    }

    /// Prefix bound to `uri` in `context` that no inner declaration shadows
    pub fn lookup_prefix(&self, uri: &str, context: &[NodeId]) -> Option<String> {
        for id in context.iter().rev() {
            let Some(el) = self.get(*id).and_then(Node::as_element) else {
                continue;
            };
            for (prefix, declared) in el.namespace_declarations() {
                let Some(prefix) = prefix else { continue };
                if declared == uri
                    && self.lookup_namespace_uri(Some(prefix), context).as_deref() == Some(uri)
                {
                    return Some(prefix.to_string());
                }
            }
        }
        None
    }

    /// Namespace URI of the last element of `context`
    pub fn namespace_of(&self, context: &[NodeId]) -> Option<String> {
        let id = *context.last()?;
        let el = self.get(id)?.as_element()?;
        self.lookup_namespace_uri(el.prefix.as_deref(), context)
            .or_else(|| el.namespace_hint.clone())
    }

    /// Expanded name of the last element of `context`
    pub fn qname_of(&self, context: &[NodeId]) -> MarkupResult<QName> {
        let id = *context
            .last()
            .ok_or_else(|| MarkupError::InvalidName("empty path".to_string()))?;
        let el = self.element(id)?;
        Ok(QName {
            namespace: self.namespace_of(context),
            local: el.local_name.clone(),
        })
    }

    /// Expanded name of `id` resolved in the current tree
    pub fn qname(&self, id: NodeId) -> MarkupResult<QName> {
        match self.path_to(id) {
            Some(path) => self.qname_of(&path),
            None => self.qname_of(&[id]),
        }
    }

    /// Create a detached element
    pub fn create_element(&mut self, namespace: Option<&str>, qualified_name: &str) -> MarkupResult<NodeId> {
        let (prefix, local) = split_qualified(qualified_name);
        if local.is_empty() || prefix == Some("") {
            return Err(MarkupError::InvalidName(qualified_name.to_string()));
        }
        let mut data = ElementData::new(qualified_name);
        data.namespace_hint = namespace.map(str::to_string);
        Ok(self.alloc_fresh(NodeKind::Element(data)))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc_fresh(NodeKind::Text(text.to_string()))
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.alloc_fresh(NodeKind::Comment(text.to_string()))
    }

    /// Detached element with the attributes of `element` and the given children
    pub fn shallow_copy_with_children(
        &mut self,
        element: NodeId,
        children: Vec<NodeId>,
    ) -> MarkupResult<NodeId> {
        let mut data = self.element(element)?.clone();
        data.children = children;
        Ok(self.alloc_fresh(NodeKind::Element(data)))
    }

    /// Deep copy of a subtree with fresh logical ids, detached
    pub fn duplicate(&mut self, id: NodeId) -> MarkupResult<NodeId> {
        struct Pending {
            node: Node,
            next: usize,
            copies: Vec<NodeId>,
        }

        let mut stack = vec![Pending {
            node: self.node(id)?.clone(),
            next: 0,
            copies: Vec::new(),
        }];
        while let Some(top) = stack.last_mut() {
            if let Some(&child) = top.node.children().get(top.next) {
                top.next += 1;
                let node = self.node(child)?.clone();
                stack.push(Pending {
                    node,
                    next: 0,
                    copies: Vec::new(),
                });
                continue;
            }

            let Some(Pending { mut node, copies, .. }) = stack.pop() else {
                break;
            };
            if let Some(slot) = node.children_mut() {
                *slot = copies;
            }
            node.logical = self.fresh_logical();
            let copy = self.alloc(node);
            match stack.last_mut() {
                Some(parent) => parent.copies.push(copy),
                None => return Ok(copy),
            }
        }
        Err(MarkupError::NodeNotFound(id))
    }

    /// Number of node versions held by the arena
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Drop every node version not reachable from the current root or from
    /// one of `keep`, renumbering the survivors in their original order.
    ///
    /// Returns the old id to new id map of the survivors. Ids that are not in
    /// the map are gone. Recorded edits whose versions did not survive are
    /// discarded.
    pub fn compact(&mut self, keep: &[NodeId]) -> HashMap<NodeId, NodeId> {
        let mut live = vec![false; self.nodes.len()];
        let mut stack: Vec<NodeId> = keep.to_vec();
        stack.push(self.root);
        while let Some(id) = stack.pop() {
            match live.get_mut(id.index()) {
                Some(seen) if !*seen => *seen = true,
                _ => continue,
            }
            stack.extend(self.children(id).iter().copied());
        }

        let mut remap = HashMap::new();
        for (index, _) in live.iter().enumerate().filter(|(_, seen)| **seen) {
            let new = NodeId(remap.len() as u32);
            remap.insert(NodeId(index as u32), new);
        }
        let before = self.nodes.len();
        let nodes = std::mem::take(&mut self.nodes);
        self.nodes = nodes
            .into_iter()
            .zip(&live)
            .filter(|(_, seen)| **seen)
            .map(|(mut node, _)| {
                if let Some(children) = node.children_mut() {
                    for child in children.iter_mut() {
                        *child = remap[&*child];
                    }
                }
                node
            })
            .collect();
        self.root = remap[&self.root];
        self.edits = self
            .edits
            .iter()
            .filter_map(|edit| {
                Some(MarkupEdit {
                    before: *remap.get(&edit.before)?,
                    after: *remap.get(&edit.after)?,
                })
            })
            .collect();
        self.revision += 1;
        debug!(before, after = self.nodes.len(), "arena compacted");
        remap
    }

    pub(crate) fn fresh_logical(&mut self) -> LogicalId {
        let id = LogicalId(self.next_logical);
        self.next_logical += 1;
        id
    }

    pub(crate) fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub(crate) fn alloc_fresh(&mut self, kind: NodeKind) -> NodeId {
        let logical = self.fresh_logical();
        self.alloc(Node { logical, kind })
    }

    /// Apply `edit` to `target`.
    ///
    /// Returns the old and new paths from the document node to the edited
    /// node. Detached nodes are edited in place and yield `None`.
    pub(crate) fn rewrite<F>(
        &mut self,
        target: NodeId,
        edit: F,
    ) -> MarkupResult<Option<(Vec<NodeId>, Vec<NodeId>)>>
    where
        F: FnOnce(&mut Node) -> MarkupResult<()>,
    {
        let Some(path) = self.path_to(target) else {
            edit(self.node_mut(target)?)?;
            self.revision += 1;
            return Ok(None);
        };

        let before = self.root;
        let new_path = match self.mode {
            EditMode::InPlace => {
                edit(self.node_mut(target)?)?;
                path.clone()
            }
            EditMode::CopyOnWrite => {
                let mut copy = self.node(target)?.clone();
                edit(&mut copy)?;
                let replacement = self.alloc(copy);
                self.replace_in_ancestors(&path, replacement)?
            }
        };
        self.commit_root(before, new_path[0]);
        Ok(Some((path, new_path)))
    }

    /// Copy every ancestor on `path` so that it points at `replacement`
    /// instead of the last node of `path`. Returns the new path.
    pub(crate) fn replace_in_ancestors(
        &mut self,
        path: &[NodeId],
        replacement: NodeId,
    ) -> MarkupResult<Vec<NodeId>> {
        let mut new_path = vec![replacement];
        let mut current = replacement;
        for window in path.windows(2).rev() {
            let (ancestor, old_child) = (window[0], window[1]);
            let mut copy = self.node(ancestor)?.clone();
            if let Some(children) = copy.children_mut() {
                for child in children.iter_mut().filter(|c| **c == old_child) {
                    *child = current;
                }
            }
            current = self.alloc(copy);
            new_path.push(current);
        }
        new_path.reverse();
        Ok(new_path)
    }

    /// Put `replacement` where the last node of `path` was, following the
    /// edit mode. Returns the new path.
    pub(crate) fn splice(&mut self, path: &[NodeId], replacement: NodeId) -> MarkupResult<Vec<NodeId>> {
        match (self.mode, path) {
            (EditMode::InPlace, [.., parent, old_child]) => {
                let (parent, old_child) = (*parent, *old_child);
                if let Some(children) = self.node_mut(parent)?.children_mut() {
                    for child in children.iter_mut().filter(|c| **c == old_child) {
                        *child = replacement;
                    }
                }
                let mut new_path = path[..path.len() - 1].to_vec();
                new_path.push(replacement);
                Ok(new_path)
            }
            _ => self.replace_in_ancestors(path, replacement),
        }
    }

    pub(crate) fn commit_root(&mut self, before: NodeId, after: NodeId) {
        self.root = after;
        self.revision += 1;
        self.edits.push(MarkupEdit { before, after });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MarkupDocument {
        MarkupDocument::parse(
            r#"<root xmlns="http://x" xmlns:a="http://a"><a:item name="one"/><item/></root>"#,
            EditMode::CopyOnWrite,
        )
        .unwrap()
    }

    #[test]
    fn test_path_and_qnames() {
        let doc = sample();
        let root = doc.document_element().unwrap();
        let children: Vec<_> = doc.child_elements(root).collect();
        assert_eq!(children.len(), 2);

        let path = doc.path_to(children[0]).unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path[0], doc.root());

        assert_eq!(doc.qname(children[0]).unwrap(), QName::new("http://a", "item"));
        assert_eq!(doc.qname(children[1]).unwrap(), QName::new("http://x", "item"));
    }

    #[test]
    fn test_lookup_prefix_respects_shadowing() {
        let doc = MarkupDocument::parse(
            r#"<r xmlns:p="http://one"><c xmlns:p="http://two"/></r>"#,
            EditMode::CopyOnWrite,
        )
        .unwrap();
        let r = doc.document_element().unwrap();
        let c = doc.child_elements(r).next().unwrap();
        let path = doc.path_to(c).unwrap();

        assert_eq!(doc.lookup_prefix("http://two", &path), Some("p".to_string()));
        assert_eq!(doc.lookup_prefix("http://one", &path), None);
        assert_eq!(
            doc.lookup_namespace_uri(Some("xml"), &path).as_deref(),
            Some(XML_NAMESPACE)
        );
    }

    #[test]
    fn test_duplicate_gets_fresh_identity() {
        let mut doc = sample();
        let root = doc.document_element().unwrap();
        let copy = doc.duplicate(root).unwrap();

        assert!(!doc.is_equivalent(root, copy));
        assert!(!doc.contains(copy));
        assert_eq!(doc.descendant_elements(copy).len(), 3);
    }

    #[test]
    fn test_compact_keeps_reachable_versions() {
        let mut doc = sample();
        let first_root = doc.root();
        let root = doc.document_element().unwrap();
        let detached = doc.create_element(None, "loose").unwrap();
        let garbage = doc.create_element(None, "garbage").unwrap();
        let item = doc.child_elements(root).next().unwrap();
        crate::MarkupAccess::set_attribute(&mut doc, item, "name", "two", &mut crate::NoopUpdater).unwrap();
        let count = doc.node_count();

        let remap = doc.compact(&[first_root, detached]);
        assert!(doc.node_count() < count);
        assert!(!remap.contains_key(&garbage));
        let detached = remap[&detached];
        assert_eq!(doc.element(detached).unwrap().local_name, "loose");
        assert!(!doc.contains(detached));

        let root = doc.document_element().unwrap();
        let item = doc.child_elements(root).next().unwrap();
        assert_eq!(doc.element(item).unwrap().attribute("name"), Some("two"));
        let old_root = remap[&first_root];
        let old_item = doc.child_elements(doc.document_element_of(old_root).unwrap()).next().unwrap();
        assert_eq!(doc.element(old_item).unwrap().attribute("name"), Some("one"));
        assert!(doc.is_equivalent(item, old_item));
    }

    #[test]
    fn test_deep_nesting_uses_no_recursion() {
        let depth = 20_000;
        let text = format!("{}{}", "<a>".repeat(depth), "</a>".repeat(depth));
        let mut doc = MarkupDocument::parse(&text, EditMode::CopyOnWrite).unwrap();

        let mut innermost = doc.document_element().unwrap();
        while let Some(child) = doc.child_elements(innermost).next() {
            innermost = child;
        }
        assert_eq!(doc.path_to(innermost).unwrap().len(), depth + 1);

        let copy = doc.duplicate(doc.document_element().unwrap()).unwrap();
        assert_eq!(doc.descendant_elements(copy).len(), depth);
    }

    #[test]
    fn test_create_element_rejects_empty_names() {
        let mut doc = MarkupDocument::new(EditMode::CopyOnWrite);
        assert!(doc.create_element(None, "").is_err());
        assert!(doc.create_element(None, ":item").is_err());
        let el = doc.create_element(Some("http://x"), "x:item").unwrap();
        assert_eq!(doc.qname(el).unwrap(), QName::new("http://x", "item"));
    }
}
