//! Namespace lookups along the component chain.
//!
//! The slow path walks from a component's own peer up through its parents;
//! the optimized path keeps, per component, the in-scope bindings computed at
//! a given markup revision. Both answer the same.

use crate::component::{ComponentId, ComponentTree};
use docsync_markup::{MarkupDocument, Node, NodeId, QName, XML_NAMESPACE};
use std::rc::Rc;

/// Namespace scope of a foreign parent, used by embedded roots
pub trait ForeignContext {
    fn lookup_namespace_uri(&self, prefix: Option<&str>) -> Option<String>;
    fn lookup_prefix(&self, uri: &str) -> Option<String>;
    fn is_in_document_model(&self) -> bool;
}

type Bindings = Rc<Vec<(Option<String>, String)>>;

/// In-scope bindings of one component, innermost first, without shadowed entries
#[derive(Debug, Clone)]
pub(crate) struct PrefixCache {
    revision: u64,
    bindings: Bindings,
}

pub(crate) struct NamespaceScope<'a, K> {
    pub doc: &'a MarkupDocument,
    pub tree: &'a ComponentTree<K>,
    pub optimized: bool,
}

impl<'a, K> NamespaceScope<'a, K> {
    pub fn new(doc: &'a MarkupDocument, tree: &'a ComponentTree<K>, optimized: bool) -> Self {
        Self {
            doc,
            tree,
            optimized,
        }
    }

    pub fn lookup_namespace_uri(&self, id: ComponentId, prefix: Option<&str>) -> Option<String> {
        if prefix == Some("xml") {
            return Some(XML_NAMESPACE.to_string());
        }
        let local = if self.optimized {
            self.bindings(id)
                .iter()
                .find(|(p, _)| p.as_deref() == prefix)
                .map(|(_, uri)| uri.clone())
        } else {
            self.walk_declarations(id, prefix)
        };
        match local {
            Some(uri) => (!uri.is_empty()).then_some(uri),
            None => self
                .foreign_of(id)
                .and_then(|f| f.lookup_namespace_uri(prefix)),
        }
    }

    pub fn lookup_prefix(&self, id: ComponentId, uri: &str) -> Option<String> {
        let local = if self.optimized {
            self.bindings(id)
                .iter()
                .find_map(|(p, u)| p.as_ref().filter(|_| u == uri).cloned())
        } else {
            self.walk_prefixes(id, uri)
        };
        local.or_else(|| {
            let prefix = self.foreign_of(id)?.lookup_prefix(uri)?;
            // a local declaration of the same prefix shadows the foreign one
            self.walk_declarations(id, Some(&prefix))
                .is_none()
                .then_some(prefix)
        })
    }

    /// Namespace of a component's own element
    pub fn component_namespace(&self, id: ComponentId) -> Option<String> {
        let peer = self.tree.peer(id).ok()?;
        let parent = self.tree.parent(id).ok()?;
        self.element_namespace(parent, peer, Some(id) == self.tree.root())
    }

    pub fn component_qname(&self, id: ComponentId) -> Option<QName> {
        let peer = self.tree.peer(id).ok()?;
        let element = self.doc.get(peer)?.as_element()?;
        Some(QName {
            namespace: self.component_namespace(id),
            local: element.local_name.clone(),
        })
    }

    /// Namespace of `element` placed below `parent`, or at the top when
    /// `parent` is `None` (`at_root` then enables the foreign scope)
    pub fn element_namespace(&self, parent: Option<ComponentId>, element: NodeId, at_root: bool) -> Option<String> {
        let el = self.doc.get(element)?.as_element()?;
        let prefix = el.prefix.as_deref();
        if prefix == Some("xml") {
            return Some(XML_NAMESPACE.to_string());
        }
        if let Some(uri) = el.declared_namespace(prefix) {
            return (!uri.is_empty()).then(|| uri.to_string());
        }
        // created elements keep the namespace they were created with
        if let Some(hint) = &el.namespace_hint {
            return Some(hint.clone());
        }
        match parent {
            Some(parent) => self.lookup_namespace_uri(parent, prefix),
            None if at_root => self
                .tree
                .foreign()
                .and_then(|f| f.lookup_namespace_uri(prefix)),
            None => None,
        }
    }

    pub fn element_qname(&self, parent: Option<ComponentId>, element: NodeId, at_root: bool) -> Option<QName> {
        let el = self.doc.get(element)?.as_element()?;
        Some(QName {
            namespace: self.element_namespace(parent, element, at_root),
            local: el.local_name.clone(),
        })
    }

    fn foreign_of(&self, id: ComponentId) -> Option<&Rc<dyn ForeignContext>> {
        let top = self.tree.ancestors(id).ok()?.first().copied();
        if top.is_some() && top == self.tree.root() {
            self.tree.foreign()
        } else {
            None
        }
    }

    fn chain(&self, id: ComponentId) -> impl Iterator<Item = NodeId> + '_ {
        let mut current = Some(id);
        std::iter::from_fn(move || {
            let id = current?;
            current = self.tree.parent(id).ok()?;
            self.tree.peer(id).ok()
        })
    }

    fn walk_declarations(&self, id: ComponentId, prefix: Option<&str>) -> Option<String> {
        self.chain(id)
            .filter_map(|peer| self.doc.get(peer).and_then(Node::as_element))
            .find_map(|el| el.declared_namespace(prefix).map(str::to_string))
    }

    fn walk_prefixes(&self, id: ComponentId, uri: &str) -> Option<String> {
        for peer in self.chain(id) {
            let Some(el) = self.doc.get(peer).and_then(Node::as_element) else {
                continue;
            };
            for (prefix, declared) in el.namespace_declarations() {
                let Some(prefix) = prefix else { continue };
                if declared == uri && self.walk_declarations(id, Some(prefix)).as_deref() == Some(uri) {
                    return Some(prefix.to_string());
                }
            }
        }
        None
    }

    fn bindings(&self, id: ComponentId) -> Bindings {
        let revision = self.doc.revision();
        let Ok(slot) = self.tree.slot(id) else {
            return Bindings::default();
        };
        if let Some(cache) = slot.prefix_cache.borrow().as_ref() {
            if cache.revision == revision {
                return cache.bindings.clone();
            }
        }

        let mut bindings: Vec<(Option<String>, String)> = Vec::new();
        let peer = self.tree.peer(id).ok();
        if let Some(el) = peer.and_then(|peer| self.doc.get(peer)).and_then(Node::as_element) {
            for (prefix, uri) in el.namespace_declarations() {
                if !bindings.iter().any(|(p, _)| p.as_deref() == prefix) {
                    bindings.push((prefix.map(str::to_string), uri.to_string()));
                }
            }
        }
        if let Some(parent) = slot.parent {
            for (prefix, uri) in self.bindings(parent).iter() {
                if !bindings.iter().any(|(p, _)| p == prefix) {
                    bindings.push((prefix.clone(), uri.clone()));
                }
            }
        }

        let bindings = Rc::new(bindings);
        *slot.prefix_cache.borrow_mut() = Some(PrefixCache {
            revision,
            bindings: bindings.clone(),
        });
        bindings
    }
}
