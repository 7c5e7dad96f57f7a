//! # Change classification
//!
//! Turns one markup change path into a [`ChangeInfo`]: the nearest element
//! that owns the change, the changed node itself, and whether that node is a
//! domain element.
//!
//! ```text
//! /web-app/servlet/description/#text      (domain: web-app, servlet)
//!          ^parent  ^changed    ^other non-domain
//! ```

use crate::errors::{ModelError, ModelResult};
use docsync_markup::{ChangeKind, MarkupChange, MarkupDocument, NodeId, QName};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangedNode {
    Node(NodeId),
    Attribute { element: NodeId, name: String },
}

impl ChangedNode {
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::Node(id) => Some(*id),
            Self::Attribute { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeInfo {
    /// Nearest element above the changed node
    pub parent: NodeId,
    pub changed: ChangedNode,
    pub kind: ChangeKind,
    /// The changed node is an element of the domain model
    pub domain_element: bool,
    /// Document element down to `parent`, both inclusive
    pub root_to_parent: Vec<NodeId>,
    /// Nodes below the changed node on the change path, shallowest first
    pub other_non_domain_nodes: Vec<NodeId>,
    /// Namespace context of the changed node (document element first)
    pub changed_context: Vec<NodeId>,
}

/// Path entry: a node, or the attribute trailing an attribute change
#[derive(Clone)]
enum Entry<'a> {
    Node(NodeId),
    Attribute(&'a str),
}

impl ChangeInfo {
    /// Classify `change` against the set of domain element names.
    ///
    /// With an empty `domain` set the leaf is the changed node and it counts
    /// as a domain element when it is an element.
    pub fn classify(doc: &MarkupDocument, change: &MarkupChange, domain: &HashSet<QName>) -> ModelResult<Self> {
        let (path, context) = match (change.path.split_first(), change.ns_context.split_first()) {
            (Some((first, path)), Some((_, context))) if doc.get(*first).is_some_and(|n| n.is_document()) => {
                (path, context)
            }
            _ => (&change.path[..], &change.ns_context[..]),
        };
        if path.len() != context.len() {
            return Err(ModelError::path_invariant("change path and namespace context differ in length"));
        }

        let mut entries: Vec<Entry<'_>> = path.iter().map(|id| Entry::Node(*id)).collect();
        if let Some(name) = change.attribute.as_deref() {
            entries.push(Entry::Attribute(name));
        }
        if entries.len() < 2 {
            return Err(ModelError::path_invariant(format!(
                "change path has {} entries below the document node",
                entries.len()
            )));
        }

        let is_domain = |index: usize| -> bool {
            match entries[index] {
                Entry::Attribute(_) => false,
                Entry::Node(id) => {
                    if !doc.is_element(id) {
                        return false;
                    }
                    if domain.is_empty() {
                        return true;
                    }
                    doc.qname_of(&context[..=index])
                        .is_ok_and(|qname| domain.contains(&qname))
                }
            }
        };

        let leaf = entries.len() - 1;
        let changed_index = if domain.is_empty() {
            leaf
        } else {
            (0..entries.len()).find(|i| !is_domain(*i)).unwrap_or(leaf)
        };
        if changed_index == 0 {
            return Err(ModelError::path_invariant("document element is not a domain element"));
        }
        let domain_element = is_domain(changed_index);

        let changed = match entries[changed_index] {
            Entry::Node(id) => ChangedNode::Node(id),
            Entry::Attribute(name) => ChangedNode::Attribute {
                element: path[changed_index - 1],
                name: name.to_string(),
            },
        };
        // a change below the changed node modifies it
        let kind = if changed_index == leaf {
            change.kind
        } else {
            ChangeKind::Modified
        };
        let other_non_domain_nodes = path.iter().skip(changed_index + 1).copied().collect();
        let changed_context = context[..changed_index.min(context.len() - 1) + 1].to_vec();

        Ok(Self {
            parent: path[changed_index - 1],
            changed,
            kind,
            domain_element,
            root_to_parent: path[..changed_index].to_vec(),
            other_non_domain_nodes,
            changed_context,
        })
    }

    /// Make the parent the changed node: a non-domain modification of the
    /// grandparent
    pub fn mark_parent_as_changed(&mut self) -> ModelResult<()> {
        if self.root_to_parent.len() < 2 {
            return Err(ModelError::path_invariant("cannot rotate above the document element"));
        }
        if let ChangedNode::Node(id) = self.changed {
            self.other_non_domain_nodes.insert(0, id);
        }
        self.changed = ChangedNode::Node(self.parent);
        self.root_to_parent.pop();
        self.parent = *self
            .root_to_parent
            .last()
            .ok_or_else(|| ModelError::path_invariant("empty parent path"))?;
        self.changed_context = self.root_to_parent.clone();
        self.changed_context.push(self.changed.node().unwrap_or(self.parent));
        self.kind = ChangeKind::Modified;
        self.domain_element = false;
        Ok(())
    }

    /// Treat a domain element change as an incidental change of its parent
    pub fn mark_non_domain_child_as_changed(&mut self) -> ModelResult<()> {
        if self.root_to_parent.is_empty() {
            return Err(ModelError::path_invariant("change has no parent"));
        }
        self.domain_element = false;
        Ok(())
    }

    pub fn is_attribute_change(&self) -> bool {
        matches!(self.changed, ChangedNode::Attribute { .. })
    }
}
