//! # Document Model
//!
//! Owns the component tree, the markup access object and the text buffer, and
//! keeps the three consistent.
//!
//! ```text
//!   caller ──set_attribute/add_child──→ MarkupAccess ──NodeUpdater──→ ComponentTree
//!      │                                     │
//!      └──end_transaction────────────────────┴──serialize──→ TextBuffer
//!
//!   TextBuffer ──text_changed──→ DirtyTracker
//!   sync() ──reload──→ MergeOutcome ──apply_changes──→ ComponentTree + events
//! ```
//!
//! The markup access object is created lazily from the buffer text the first
//! time the model is used.

use crate::buffer::{StringBuffer, SubscriptionId, TextBuffer};
use crate::component::{ComponentId, ComponentTree, TreeUpdater};
use crate::config::ModelConfig;
use crate::dirty::DirtyTracker;
use crate::errors::{ModelError, ModelResult};
use crate::events::{ComponentEvent, ComponentListener, PropertyValue};
use crate::factory::ComponentFactory;
use crate::namespace::{ForeignContext, NamespaceScope};
use crate::undo_stack::UndoStack;
use docsync_markup::{
    ElementIdentity, MarkupAccess, MarkupDocument, MarkupError, NodeId, QName, ReadOnlyMarkup,
};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModelState {
    /// The component tree reflects the last synced text
    Valid,
    /// The last synced text could not be parsed; the tree is unchanged
    NotWellFormed,
    /// Not initialized yet, or the last sync failed before completing
    NotSynced,
}

pub type SharedModel<F> = Rc<RefCell<DocumentModel<F>>>;

pub struct DocumentModel<F: ComponentFactory> {
    pub(crate) config: ModelConfig,
    pub(crate) factory: F,
    pub(crate) domain: HashSet<QName>,
    pub(crate) identity: ElementIdentity,
    buffer: Arc<dyn TextBuffer>,
    /// Registration of `dirty` with the buffer, undone on drop
    subscription: SubscriptionId,
    pub(crate) access: Option<Box<dyn MarkupAccess>>,
    pub(crate) tree: ComponentTree<F::Kind>,
    dirty: Arc<DirtyTracker>,
    state: ModelState,
    last_error: Option<String>,
    synced_text: Option<String>,
    in_transaction: bool,
    undo: UndoStack,
    in_undo_redo: bool,
    /// Arena size right after the last compaction
    compacted_size: usize,
    listeners: Vec<Box<dyn ComponentListener>>,
}

pub(crate) fn not_initialized() -> ModelError {
    ModelError::invalid_state("markup access is not initialized")
}

impl<F: ComponentFactory> DocumentModel<F> {
    pub fn new(buffer: Arc<dyn TextBuffer>, factory: F, config: ModelConfig) -> Self {
        let dirty = Arc::new(DirtyTracker::new());
        let subscription = buffer.subscribe(dirty.clone());
        Self {
            domain: factory.domain_qnames(),
            identity: ElementIdentity::with_attributes(config.identifying_attributes.clone()),
            undo: UndoStack::with_max_levels(config.undo_levels),
            config,
            factory,
            buffer,
            subscription,
            access: None,
            tree: ComponentTree::new(),
            dirty,
            state: ModelState::NotSynced,
            last_error: None,
            synced_text: None,
            in_transaction: false,
            in_undo_redo: false,
            compacted_size: 0,
            listeners: Vec::new(),
        }
    }

    /// Model over an in-memory buffer holding `text`, with the default config
    pub fn from_text(text: &str, factory: F) -> Self {
        Self::new(Arc::new(StringBuffer::new(text)), factory, ModelConfig::default())
    }

    pub fn into_shared(self) -> SharedModel<F> {
        Rc::new(RefCell::new(self))
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn buffer(&self) -> &Arc<dyn TextBuffer> {
        &self.buffer
    }

    pub fn tree(&self) -> &ComponentTree<F::Kind> {
        &self.tree
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.is_dirty()
    }

    pub fn dirty_since(&self) -> Option<Instant> {
        self.dirty.dirty_since()
    }

    pub fn identity(&self) -> &ElementIdentity {
        &self.identity
    }

    pub fn document(&self) -> ModelResult<&MarkupDocument> {
        self.access
            .as_deref()
            .map(|access| access.document())
            .ok_or_else(not_initialized)
    }

    pub fn add_listener(&mut self, listener: impl ComponentListener + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Use `foreign` for namespace and attachment lookups above the root.
    /// Call before the root component is first requested.
    pub fn embed_in(&mut self, foreign: Rc<dyn ForeignContext>) {
        self.tree.set_foreign(Some(foreign));
    }

    fn ensure_init(&mut self) {
        if self.access.is_some() {
            return;
        }
        let text = self.buffer.text();
        let doc = match MarkupDocument::parse(&text, self.config.edit_mode) {
            Ok(doc) => {
                self.state = ModelState::Valid;
                self.last_error = None;
                doc
            }
            Err(err) => {
                warn!(error = %err, "document text is not well formed");
                self.state = ModelState::NotWellFormed;
                self.last_error = Some(err.to_string());
                MarkupDocument::new(self.config.edit_mode)
            }
        };
        self.access = Some(if self.config.read_only {
            Box::new(ReadOnlyMarkup::new(doc))
        } else {
            Box::new(doc)
        });
        self.synced_text = Some(text);
        self.dirty.attach();
    }

    fn not_well_formed(&self) -> ModelError {
        ModelError::NotWellFormed(
            self.last_error
                .clone()
                .unwrap_or_else(|| "no document element".to_string()),
        )
    }

    pub(crate) fn scope(&self) -> ModelResult<NamespaceScope<'_, F::Kind>> {
        Ok(NamespaceScope::new(
            self.document()?,
            &self.tree,
            self.config.optimized_prefix_lookup,
        ))
    }

    /// Root component, created on first use
    pub fn root(&mut self) -> ModelResult<ComponentId> {
        self.ensure_init();
        match self.tree.root() {
            Some(root) => Ok(root),
            None => self.create_root(),
        }
    }

    fn create_root(&mut self) -> ModelResult<ComponentId> {
        let doc = self.document()?;
        let Some(element) = doc.document_element() else {
            return Err(self.not_well_formed());
        };
        let qname = self
            .scope()?
            .element_qname(None, element, true)
            .ok_or(MarkupError::NotAnElement(element))?;
        let kind = self
            .factory
            .create(None, &qname)
            .ok_or(ModelError::UnknownElement(qname))?;
        let root = self.tree.create(kind, element);
        self.tree.set_root(Some(root));
        debug!(%root, "created root component");
        Ok(root)
    }

    pub fn kind(&self, id: ComponentId) -> ModelResult<&F::Kind> {
        self.tree.kind(id)
    }

    pub fn peer(&self, id: ComponentId) -> ModelResult<NodeId> {
        self.tree.peer(id)
    }

    pub fn parent(&self, id: ComponentId) -> ModelResult<Option<ComponentId>> {
        self.tree.parent(id)
    }

    pub fn is_in_document_model(&self, id: ComponentId) -> bool {
        self.tree.is_in_document_model(id)
    }

    /// Child components, populated from the markup on first access
    pub fn children(&mut self, id: ComponentId) -> ModelResult<Vec<ComponentId>> {
        self.populate(id)?;
        Ok(self
            .tree
            .cached_children(id)?
            .map(<[_]>::to_vec)
            .unwrap_or_default())
    }

    /// Children of `id` whose kind satisfies `pred`
    pub fn children_where(
        &mut self,
        id: ComponentId,
        pred: impl Fn(&F::Kind) -> bool,
    ) -> ModelResult<Vec<ComponentId>> {
        let children = self.children(id)?;
        Ok(children
            .into_iter()
            .filter(|c| self.tree.kind(*c).is_ok_and(&pred))
            .collect())
    }

    pub(crate) fn populate(&mut self, id: ComponentId) -> ModelResult<()> {
        if self.tree.is_populated(id) {
            return Ok(());
        }
        let doc = self.document()?;
        let peer = self.tree.peer(id)?;
        let parent_kind = self.tree.kind(id)?.clone();
        let scope = self.scope()?;
        let found: Vec<(F::Kind, NodeId)> = doc
            .child_elements(peer)
            .filter_map(|element| {
                let qname = scope.element_qname(Some(id), element, false)?;
                let kind = self.factory.create(Some(&parent_kind), &qname)?;
                Some((kind, element))
            })
            .collect();

        let children = found
            .into_iter()
            .map(|(kind, element)| self.tree.create(kind, element))
            .collect();
        self.tree.set_children(id, children)
    }

    pub fn qname(&self, id: ComponentId) -> ModelResult<QName> {
        self.scope()?
            .component_qname(id)
            .ok_or(ModelError::ComponentNotFound(id))
    }

    pub fn attribute(&self, id: ComponentId, name: &str) -> ModelResult<Option<String>> {
        let element = self.document()?.element(self.tree.peer(id)?)?;
        Ok(element.attribute(name).map(str::to_string))
    }

    /// Attribute value coerced through its declared type
    pub fn typed_attribute(&self, id: ComponentId, name: &str) -> ModelResult<Option<PropertyValue>> {
        let raw = self.attribute(id, name)?;
        let ty = self.factory.attribute_type(self.tree.kind(id)?, name);
        Ok(ty.coerce_opt(raw.as_deref()))
    }

    /// Set (or with `None` remove) an attribute, firing `PropertyChanged`
    /// named `property` when the value changes
    pub fn set_attribute(
        &mut self,
        id: ComponentId,
        property: &str,
        name: &str,
        value: Option<&str>,
    ) -> ModelResult<()> {
        self.verify_write(id)?;
        let old = self.attribute(id, name)?;
        if old.as_deref() == value {
            return Ok(());
        }
        let peer = self.tree.peer(id)?;
        let access = self.access.as_deref_mut().ok_or_else(not_initialized)?;
        let mut updater = TreeUpdater { tree: &mut self.tree };
        match value {
            Some(value) => access.set_attribute(peer, name, value, &mut updater)?,
            None => access.remove_attribute(peer, name, &mut updater)?,
        };

        let ty = self.factory.attribute_type(self.tree.kind(id)?, name);
        self.emit(ComponentEvent::PropertyChanged {
            component: id,
            property: property.to_string(),
            old: ty.coerce_opt(old.as_deref()),
            new: ty.coerce_opt(value),
        });
        Ok(())
    }

    /// Direct text content of the component's element
    pub fn text(&self, id: ComponentId) -> ModelResult<String> {
        Ok(self.document()?.text_content(self.tree.peer(id)?))
    }

    pub fn set_text(&mut self, id: ComponentId, text: &str) -> ModelResult<()> {
        self.verify_write(id)?;
        let old = self.text(id)?;
        if old == text {
            return Ok(());
        }
        let peer = self.tree.peer(id)?;
        let access = self.access.as_deref_mut().ok_or_else(not_initialized)?;
        access.set_text(peer, text, &mut TreeUpdater { tree: &mut self.tree })?;
        self.emit(ComponentEvent::PropertyChanged {
            component: id,
            property: "textContent".to_string(),
            old: Some(PropertyValue::Text(old)),
            new: Some(PropertyValue::Text(text.to_string())),
        });
        Ok(())
    }

    /// Detached element for a component to be created with [`Self::create_component`]
    pub fn create_element(&mut self, namespace: Option<&str>, qualified_name: &str) -> ModelResult<NodeId> {
        self.ensure_init();
        let access = self.access.as_deref_mut().ok_or_else(not_initialized)?;
        Ok(access.create_element(namespace, qualified_name)?)
    }

    /// Detached component wrapping `element`, typed as a child of `parent`
    pub fn create_component(&mut self, parent: Option<ComponentId>, element: NodeId) -> ModelResult<ComponentId> {
        let parent_kind = parent.map(|p| self.tree.kind(p).cloned()).transpose()?;
        let qname = self
            .scope()?
            .element_qname(parent, element, parent.is_none())
            .ok_or(MarkupError::NotAnElement(element))?;
        let kind = self
            .factory
            .create(parent_kind.as_ref(), &qname)
            .ok_or(ModelError::UnknownElement(qname))?;
        Ok(self.tree.create(kind, element))
    }

    /// Create the element and its detached component in one step
    pub fn new_component(
        &mut self,
        parent: Option<ComponentId>,
        namespace: Option<&str>,
        qualified_name: &str,
    ) -> ModelResult<ComponentId> {
        let element = self.create_element(namespace, qualified_name)?;
        self.create_component(parent, element)
    }

    /// Attach a detached `child` below `parent`, before the child currently at
    /// `index` or last. Returns the index used.
    pub fn add_child(&mut self, parent: ComponentId, child: ComponentId, index: Option<usize>) -> ModelResult<usize> {
        self.verify_write(parent)?;
        let slot = self.tree.slot(child)?;
        if slot.removed {
            return Err(ModelError::StaleComponent(child));
        }
        if slot.parent.is_some() || self.tree.root() == Some(child) {
            return Err(ModelError::invalid_state(format!("{child} already has a parent")));
        }
        self.populate(parent)?;
        self.fix_prefixes(parent, child)?;

        let siblings = self.tree.cached_children(parent)?.unwrap_or(&[]).to_vec();
        let reference = match index {
            Some(i) if i < siblings.len() => Some((i, self.tree.peer(siblings[i])?)),
            _ => None,
        };
        let parent_peer = self.tree.peer(parent)?;
        let child_peer = self.tree.peer(child)?;
        let access = self.access.as_deref_mut().ok_or_else(not_initialized)?;
        let mut updater = TreeUpdater { tree: &mut self.tree };
        let index = match reference {
            Some((i, reference)) => {
                access.insert_before(parent_peer, child_peer, reference, &mut updater)?;
                self.tree.insert_at_index_quietly(parent, i, child)?
            }
            None => {
                access.append_child(parent_peer, child_peer, &mut updater)?;
                self.tree.append_child_quietly(parent, child)?
            }
        };
        self.emit(ComponentEvent::ChildAdded { parent, child, index });
        Ok(index)
    }

    pub fn remove_child(&mut self, parent: ComponentId, child: ComponentId) -> ModelResult<()> {
        self.verify_write(parent)?;
        self.populate(parent)?;
        let index = self
            .tree
            .cached_children(parent)?
            .and_then(|children| children.iter().position(|c| *c == child))
            .ok_or_else(|| ModelError::invalid_state(format!("{child} is not a child of {parent}")))?;
        let parent_peer = self.tree.peer(parent)?;
        let child_peer = self.tree.peer(child)?;
        let access = self.access.as_deref_mut().ok_or_else(not_initialized)?;
        access.remove_child(parent_peer, child_peer, &mut TreeUpdater { tree: &mut self.tree })?;

        self.tree.remove_child_quietly(parent, child)?;
        self.emit(ComponentEvent::ChildRemoved { parent, child, index });
        Ok(())
    }

    /// Make every element of `child`'s subtree resolve to its namespace once
    /// attached below `parent`
    fn fix_prefixes(&mut self, parent: ComponentId, child: ComponentId) -> ModelResult<()> {
        let child_peer = self.tree.peer(child)?;
        let doc = self.document()?;
        let namespaces: Vec<(NodeId, Option<String>)> = doc
            .descendant_elements(child_peer)
            .into_iter()
            .map(|el| {
                let namespace = doc
                    .path_from(child_peer, el)
                    .and_then(|path| doc.namespace_of(&path));
                (el, namespace)
            })
            .collect();
        let attach_namespace = self.scope()?.component_namespace(parent);
        let attach_prefix = doc.element(self.tree.peer(parent)?)?.prefix.clone();
        let default_namespace = doc
            .document_element()
            .and_then(|root| doc.get(root)?.as_element()?.declared_namespace(None))
            .filter(|uri| !uri.is_empty())
            .map(str::to_string);
        let live = self.tree.is_in_document_model(parent);

        for (element, namespace) in namespaces {
            let Some(uri) = namespace else { continue };
            if attach_namespace.as_deref() == Some(uri.as_str()) {
                self.set_element_prefix(element, attach_prefix.as_deref())?;
                continue;
            }
            if default_namespace.as_deref() == Some(uri.as_str()) {
                self.set_element_prefix(element, None)?;
                continue;
            }

            let doc = self.document()?;
            let data = doc.element(element)?;
            let requested = data.prefix.clone();
            // a prefix the element declares itself stays where it is
            if requested
                .as_deref()
                .is_some_and(|p| data.declared_namespace(Some(p)) == Some(uri.as_str()))
            {
                continue;
            }
            let subtree_path = doc.path_from(child_peer, element).unwrap_or_default();
            let in_scope = doc
                .lookup_prefix(&uri, &subtree_path)
                .or_else(|| self.scope().ok()?.lookup_prefix(parent, &uri));

            let prefix = match in_scope {
                Some(prefix) => prefix,
                None => match self.allocate_prefix(parent, &subtree_path, requested.as_deref())? {
                    Some(prefix) => {
                        self.declare_prefix(live, element, &prefix, &uri)?;
                        prefix
                    }
                    None => {
                        warn!(
                            namespace = %uri,
                            attempts = self.config.max_prefix_attempts,
                            "no free namespace prefix"
                        );
                        continue;
                    }
                },
            };
            self.set_element_prefix(element, Some(&prefix))?;
        }
        Ok(())
    }

    /// First prefix of `base`, `base1`, `base2`, ... unbound both at the
    /// attachment point and inside the subtree
    fn allocate_prefix(
        &self,
        parent: ComponentId,
        subtree_path: &[NodeId],
        requested: Option<&str>,
    ) -> ModelResult<Option<String>> {
        let doc = self.document()?;
        let scope = self.scope()?;
        let base = requested.unwrap_or(self.config.default_prefix.as_str());
        let found = (0..self.config.max_prefix_attempts)
            .map(|attempt| match attempt {
                0 => base.to_string(),
                n => format!("{base}{n}"),
            })
            .find(|candidate| {
                candidate != "xml"
                    && scope.lookup_namespace_uri(parent, Some(candidate.as_str())).is_none()
                    && doc.lookup_namespace_uri(Some(candidate.as_str()), subtree_path).is_none()
            });
        Ok(found)
    }

    /// Declare `prefix` on the document element for a live attachment point,
    /// otherwise on `element` itself
    fn declare_prefix(&mut self, live: bool, element: NodeId, prefix: &str, uri: &str) -> ModelResult<()> {
        let target = if live {
            self.document()?
                .document_element()
                .ok_or_else(|| ModelError::invalid_state("document has no element"))?
        } else {
            element
        };
        debug!(prefix, uri, local = !live, "declaring namespace prefix");
        let access = self.access.as_deref_mut().ok_or_else(not_initialized)?;
        access.set_attribute(
            target,
            &format!("xmlns:{prefix}"),
            uri,
            &mut TreeUpdater { tree: &mut self.tree },
        )?;
        Ok(())
    }

    fn set_element_prefix(&mut self, element: NodeId, prefix: Option<&str>) -> ModelResult<()> {
        if self.document()?.element(element)?.prefix.as_deref() == prefix {
            return Ok(());
        }
        let access = self.access.as_deref_mut().ok_or_else(not_initialized)?;
        access.set_prefix(element, prefix, &mut TreeUpdater { tree: &mut self.tree })?;
        Ok(())
    }

    /// Serialized children of the component's element
    pub fn xml_fragment(&self, id: ComponentId) -> ModelResult<String> {
        let access = self.access.as_deref().ok_or_else(not_initialized)?;
        Ok(access.xml_fragment(self.tree.peer(id)?)?)
    }

    /// Replace the children of the component's element with the parsed
    /// `text`. Unchanged children keep their components; on a parse error
    /// nothing changes.
    pub fn set_xml_fragment(&mut self, id: ComponentId, text: &str) -> ModelResult<()> {
        self.verify_write(id)?;
        let peer = self.tree.peer(id)?;
        let access = self.access.as_deref_mut().ok_or_else(not_initialized)?;
        let nodes = access
            .parse_fragment(text)
            .map_err(ModelError::malformed_fragment)?;
        let replacement = access.shallow_copy_with_children(peer, nodes)?;
        let outcome = access.merge_subtree(peer, replacement, &self.identity)?;
        self.apply_changes(outcome);
        Ok(())
    }

    /// Component whose peer is (a version of) `element`, populating on the way
    pub fn find_component(&mut self, element: NodeId) -> ModelResult<Option<ComponentId>> {
        self.ensure_init();
        let Some(path) = self.document()?.path_to(element) else {
            return Ok(None);
        };
        self.find_component_by_path(&path)
    }

    /// Follow `path` (document node or document element first) down the
    /// component tree, populating on the way
    pub fn find_component_by_path(&mut self, path: &[NodeId]) -> ModelResult<Option<ComponentId>> {
        let root = self.root()?;
        let doc = self.document()?;
        let path = match path.split_first() {
            Some((first, rest)) if doc.get(*first).is_some_and(|n| n.is_document()) => rest,
            _ => path,
        };
        let Some((first, rest)) = path.split_first() else {
            return Ok(None);
        };
        if !doc.is_equivalent(self.tree.peer(root)?, *first) {
            return Ok(None);
        }

        let mut current = root;
        for node in rest {
            let children = self.children(current)?;
            let doc = self.document()?;
            let next = children.into_iter().find(|c| {
                self.tree
                    .peer(*c)
                    .is_ok_and(|peer| doc.is_equivalent(peer, *node))
            });
            match next {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Like [`Self::find_component_by_path`], but only through children that
    /// are already populated
    pub(crate) fn resolve_path(&self, path: &[NodeId]) -> Option<ComponentId> {
        let doc = self.document().ok()?;
        let root = self.tree.root()?;
        let (first, rest) = path.split_first()?;
        if !doc.is_equivalent(self.tree.peer(root).ok()?, *first) {
            return None;
        }
        let mut current = root;
        for node in rest {
            current = self
                .tree
                .cached_children(current)
                .ok()??
                .iter()
                .copied()
                .find(|c| {
                    self.tree
                        .peer(*c)
                        .is_ok_and(|peer| peer == *node || doc.is_equivalent(peer, *node))
                })?;
        }
        Some(current)
    }

    /// Innermost component whose element covers `offset` in the serialized
    /// document, or the root
    pub fn find_component_at(&mut self, offset: usize) -> ModelResult<ComponentId> {
        let root = self.root()?;
        let access = self.access.as_deref().ok_or_else(not_initialized)?;
        let Some(element) = access.containing_element(offset) else {
            return Ok(root);
        };
        let Some(mut path) = access.document().path_to(element) else {
            return Ok(root);
        };
        while path.len() > 1 {
            if let Some(found) = self.find_component_by_path(&path)? {
                return Ok(found);
            }
            path.pop();
        }
        Ok(root)
    }

    /// Offset of the component's element in the serialized document
    pub fn find_position(&self, id: ComponentId) -> ModelResult<Option<usize>> {
        let access = self.access.as_deref().ok_or_else(not_initialized)?;
        Ok(access.find_position(self.tree.peer(id)?))
    }

    pub fn lookup_namespace_uri(&self, id: ComponentId, prefix: Option<&str>) -> ModelResult<Option<String>> {
        Ok(self.scope()?.lookup_namespace_uri(id, prefix))
    }

    pub fn lookup_prefix(&self, id: ComponentId, uri: &str) -> ModelResult<Option<String>> {
        Ok(self.scope()?.lookup_prefix(id, uri))
    }

    /// Fail unless `id` may be mutated now
    pub fn verify_write(&self, id: ComponentId) -> ModelResult<()> {
        if self.config.read_only {
            return Err(ModelError::ReadOnly);
        }
        if !self.in_transaction {
            return Err(ModelError::NotInTransaction);
        }
        if self.tree.slot(id)?.removed {
            return Err(ModelError::StaleComponent(id));
        }
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Open a write transaction; pending text changes are synced first
    pub fn begin_transaction(&mut self) -> ModelResult<()> {
        if self.in_transaction {
            return Err(ModelError::TransactionInProgress);
        }
        if self.config.read_only {
            return Err(ModelError::ReadOnly);
        }
        self.sync()?;
        if self.state == ModelState::NotWellFormed {
            return Err(self.not_well_formed());
        }
        let root = self.document()?.root();
        self.undo.begin_batch(root);
        self.in_transaction = true;
        Ok(())
    }

    pub fn set_transaction_description(&mut self, description: impl Into<String>) {
        self.undo.set_batch_description(description);
    }

    /// Close the transaction and write the markup back to the buffer
    pub fn end_transaction(&mut self) -> ModelResult<()> {
        if !self.in_transaction {
            return Err(ModelError::NotInTransaction);
        }
        self.in_transaction = false;
        self.flush()?;
        let root = self.document()?.root();
        self.undo.end_batch(root);
        self.compact_markup();
        Ok(())
    }

    /// Close the transaction and return the tree to the last synced text
    pub fn rollback_transaction(&mut self) -> ModelResult<()> {
        if !self.in_transaction {
            return Err(ModelError::NotInTransaction);
        }
        self.in_transaction = false;
        self.undo.abandon_batch();
        let text = self.synced_text.clone().unwrap_or_default();
        let access = self.access.as_deref_mut().ok_or_else(not_initialized)?;
        let outcome = access.reload(&text, &self.identity)?;
        access.take_edits();
        if outcome.root_replaced {
            self.replace_root()?;
        } else {
            self.apply_changes(outcome);
        }
        self.compact_markup();
        Ok(())
    }

    /// Drop markup versions that neither a component nor the undo history
    /// can reach, once the arena has grown well past its last compacted size
    fn compact_markup(&mut self) {
        if self.in_transaction {
            return;
        }
        let Some(access) = self.access.as_deref_mut() else {
            return;
        };
        let size = access.document().node_count();
        if size <= 2 * self.compacted_size + self.config.compaction_slack {
            return;
        }
        let mut keep = self.tree.live_peers();
        keep.extend(self.undo.root_versions());
        let map = access.compact(&keep);
        self.tree.remap_peers(&map);
        self.undo.remap(&map);
        self.compacted_size = map.len();
        debug!(before = size, after = self.compacted_size, "compacted markup arena");
    }

    /// Write the serialized markup to the buffer if anything was edited
    fn flush(&mut self) -> ModelResult<()> {
        let access = self.access.as_deref_mut().ok_or_else(not_initialized)?;
        if access.take_edits().is_empty() {
            return Ok(());
        }
        let text = access.serialize();
        if self.buffer.text() != text {
            self.buffer.set_text(&text);
        }
        self.synced_text = Some(text);
        self.dirty.clear();
        Ok(())
    }

    /// Reconcile the component tree with the current buffer text
    #[instrument(skip(self), fields(state = ?self.state))]
    pub fn sync(&mut self) -> ModelResult<()> {
        if self.in_transaction {
            return Err(ModelError::TransactionInProgress);
        }
        if self.access.is_none() {
            self.ensure_init();
            return Ok(());
        }
        let text = self.buffer.text();
        if self.synced_text.as_deref() == Some(text.as_str()) && self.state != ModelState::NotSynced {
            self.dirty.clear();
            return Ok(());
        }

        let access = self.access.as_deref_mut().ok_or_else(not_initialized)?;
        let outcome = match access.reload(&text, &self.identity) {
            Ok(outcome) => outcome,
            Err(err @ MarkupError::Parse { .. }) => {
                warn!(error = %err, "document text is not well formed, keeping the current tree");
                self.state = ModelState::NotWellFormed;
                self.last_error = Some(err.to_string());
                self.synced_text = Some(text);
                self.dirty.clear();
                return Ok(());
            }
            Err(err) => {
                self.state = ModelState::NotSynced;
                return Err(err.into());
            }
        };
        access.take_edits();
        self.synced_text = Some(text);
        self.dirty.clear();
        self.state = ModelState::Valid;
        self.last_error = None;
        if !self.in_undo_redo {
            self.undo.clear();
        }

        let changes = outcome.changes.len();
        if outcome.root_replaced {
            self.replace_root()?;
            info!("document element replaced, component tree rebuilt");
        } else {
            let units = self.apply_changes(outcome);
            info!(changes, units, "synced document model");
        }
        self.compact_markup();
        Ok(())
    }

    /// Swap in a new root component after the document element was replaced
    fn replace_root(&mut self) -> ModelResult<()> {
        let old = self.tree.discard();
        if self.document()?.document_element().is_none() {
            return Ok(());
        }
        let new = self.create_root()?;
        self.emit(ComponentEvent::RootReplaced { old, new });
        Ok(())
    }

    /// Discard the component tree and rebuild it from the buffer text
    #[instrument(skip(self))]
    pub fn rebuild(&mut self) -> ModelResult<()> {
        if self.in_transaction {
            return Err(ModelError::TransactionInProgress);
        }
        self.access = None;
        self.undo.clear();
        self.compacted_size = 0;
        self.ensure_init();
        if self.state == ModelState::NotWellFormed {
            self.tree.discard();
            return Ok(());
        }
        self.replace_root()
    }

    pub fn can_undo(&self) -> bool {
        self.undo.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.undo.can_redo()
    }

    pub fn undo_stack(&self) -> &UndoStack {
        &self.undo
    }

    /// Undo the last transaction. Returns `false` when there is none.
    pub fn undo(&mut self) -> ModelResult<bool> {
        self.check_undo_redo()?;
        match self.undo.undo() {
            Some(batch) => self.restore_version(batch.before).map(|_| true),
            None => Ok(false),
        }
    }

    pub fn redo(&mut self) -> ModelResult<bool> {
        self.check_undo_redo()?;
        match self.undo.redo() {
            Some(batch) => self.restore_version(batch.after).map(|_| true),
            None => Ok(false),
        }
    }

    fn check_undo_redo(&mut self) -> ModelResult<()> {
        if self.in_transaction {
            return Err(ModelError::TransactionInProgress);
        }
        if self.config.read_only {
            return Err(ModelError::ReadOnly);
        }
        self.sync()
    }

    fn restore_version(&mut self, version: NodeId) -> ModelResult<()> {
        self.prepare_for_undo_redo();
        let access = self.access.as_deref_mut().ok_or_else(not_initialized)?;
        let outcome = access.restore(version, &self.identity)?;
        if outcome.root_replaced {
            self.replace_root()?;
        } else {
            self.apply_changes(outcome);
        }
        self.flush()?;
        self.finish_undo_redo()?;
        self.compact_markup();
        Ok(())
    }

    /// Bracket an undo or redo that rewrites the buffer; keeps the undo
    /// history when the text changes
    pub fn prepare_for_undo_redo(&mut self) {
        self.in_undo_redo = true;
    }

    pub fn finish_undo_redo(&mut self) -> ModelResult<()> {
        let result = self.sync();
        self.in_undo_redo = false;
        result
    }

    /// Deliver `event` to the listeners if its subject is attached
    pub(crate) fn emit(&mut self, event: ComponentEvent) {
        if let Some(subject) = event.subject() {
            if !self.tree.is_in_document_model(subject) {
                debug!(%subject, "dropping event for detached component");
                return;
            }
        }
        for listener in &mut self.listeners {
            listener.on_event(&event);
        }
    }
}

impl<F: ComponentFactory> Drop for DocumentModel<F> {
    fn drop(&mut self) {
        self.buffer.unsubscribe(self.subscription);
    }
}

/// Foreign context of a model embedded below a component of another model
pub struct ForeignAnchor<F: ComponentFactory> {
    model: Weak<RefCell<DocumentModel<F>>>,
    component: ComponentId,
}

impl<F: ComponentFactory> ForeignAnchor<F> {
    pub fn new(model: &SharedModel<F>, component: ComponentId) -> Self {
        Self {
            model: Rc::downgrade(model),
            component,
        }
    }

    pub fn component(&self) -> ComponentId {
        self.component
    }
}

impl<F: ComponentFactory> ForeignContext for ForeignAnchor<F> {
    fn lookup_namespace_uri(&self, prefix: Option<&str>) -> Option<String> {
        let model = self.model.upgrade()?;
        let model = model.try_borrow().ok()?;
        let uri = model.lookup_namespace_uri(self.component, prefix).ok()?;
        uri
    }

    fn lookup_prefix(&self, uri: &str) -> Option<String> {
        let model = self.model.upgrade()?;
        let model = model.try_borrow().ok()?;
        let prefix = model.lookup_prefix(self.component, uri).ok()?;
        prefix
    }

    fn is_in_document_model(&self) -> bool {
        let Some(model) = self.model.upgrade() else {
            return false;
        };
        // a host model in the middle of an update still holds the anchor
        let attached = match model.try_borrow() {
            Ok(model) => model.is_in_document_model(self.component),
            Err(_) => true,
        };
        attached
    }
}
