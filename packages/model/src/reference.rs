//! # Named references
//!
//! A component attribute that names another component, e.g.
//! `<servlet-mapping servlet="j:Dispatcher">` pointing at the servlet whose
//! `name` attribute is `Dispatcher` in the namespace bound to `j`.
//!
//! The qualified name and the serialized form are cached. [`NamedReference::refresh`]
//! drops both caches; they are recomputed on next use.

use crate::component::ComponentId;
use crate::errors::ModelResult;
use crate::factory::ComponentFactory;
use crate::locator::ModelLocator;
use crate::model::{DocumentModel, SharedModel};
use docsync_markup::{split_qualified, QName};
use std::collections::VecDeque;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    /// Reference text as found in the markup
    Text(String),
    /// Reference created for a known component
    Component(ComponentId),
}

#[derive(Debug, Clone)]
pub struct NamedReference<K> {
    referencing: ComponentId,
    target_kind: K,
    source: Source,
    qname: Option<QName>,
    serialized: Option<String>,
}

/// Outcome of resolving a reference across models
pub enum ResolvedReference<F: ComponentFactory> {
    Local(ComponentId),
    External {
        model: SharedModel<F>,
        component: ComponentId,
    },
    Broken,
}

impl<F: ComponentFactory> ResolvedReference<F> {
    pub fn is_broken(&self) -> bool {
        matches!(self, Self::Broken)
    }
}

impl<K: Clone + PartialEq> NamedReference<K> {
    /// Reference parsed from `text` (`local` or `prefix:local`)
    pub fn from_text(referencing: ComponentId, target_kind: K, text: impl Into<String>) -> Self {
        Self {
            referencing,
            target_kind,
            source: Source::Text(text.into()),
            qname: None,
            serialized: None,
        }
    }

    /// Reference to a known `target`
    pub fn for_component(referencing: ComponentId, target_kind: K, target: ComponentId) -> Self {
        Self {
            referencing,
            target_kind,
            source: Source::Component(target),
            qname: None,
            serialized: None,
        }
    }

    pub fn referencing(&self) -> ComponentId {
        self.referencing
    }

    pub fn target_kind(&self) -> &K {
        &self.target_kind
    }

    /// Drop the cached qualified name and serialization
    pub fn refresh(&mut self) {
        self.qname = None;
        self.serialized = None;
    }

    pub fn is_cached(&self) -> bool {
        self.qname.is_some() || self.serialized.is_some()
    }

    /// Qualified name of the referenced component
    pub fn qname<F>(&mut self, model: &DocumentModel<F>) -> ModelResult<QName>
    where
        F: ComponentFactory<Kind = K>,
    {
        if let Some(qname) = &self.qname {
            return Ok(qname.clone());
        }
        let qname = match &self.source {
            Source::Text(text) => {
                let (prefix, local) = split_qualified(text);
                QName {
                    namespace: model.lookup_namespace_uri(self.referencing, prefix)?,
                    local: local.to_string(),
                }
            }
            Source::Component(target) => {
                let name_attribute = model.factory().name_attribute(model.kind(*target)?);
                QName {
                    namespace: model.qname(*target)?.namespace,
                    local: model
                        .attribute(*target, name_attribute)?
                        .unwrap_or_default(),
                }
            }
        };
        self.qname = Some(qname.clone());
        Ok(qname)
    }

    /// Text to store in the referencing attribute
    pub fn serialize<F>(&mut self, model: &DocumentModel<F>) -> ModelResult<String>
    where
        F: ComponentFactory<Kind = K>,
    {
        if let Some(serialized) = &self.serialized {
            return Ok(serialized.clone());
        }
        let text = match &self.source {
            Source::Text(text) => Some(text.clone()),
            Source::Component(_) => None,
        };
        let serialized = match text {
            Some(text) => text,
            None => {
                let qname = self.qname(model)?;
                let default = model.lookup_namespace_uri(self.referencing, None)?;
                match &qname.namespace {
                    Some(ns) if default.as_deref() != Some(ns.as_str()) => {
                        match model.lookup_prefix(self.referencing, ns)? {
                            Some(prefix) => format!("{}:{}", prefix, qname.local),
                            None => qname.local.clone(),
                        }
                    }
                    _ => qname.local.clone(),
                }
            }
        };
        self.serialized = Some(serialized.clone());
        Ok(serialized)
    }

    /// Referenced component in `model`, or `None` when the reference is broken
    pub fn get<F>(&mut self, model: &mut DocumentModel<F>) -> ModelResult<Option<ComponentId>>
    where
        F: ComponentFactory<Kind = K>,
    {
        if let Source::Component(target) = self.source {
            return Ok(model.is_in_document_model(target).then_some(target));
        }
        let qname = self.qname(model)?;
        model.find_named(&self.target_kind, &qname)
    }

    pub fn is_broken<F>(&mut self, model: &mut DocumentModel<F>) -> bool
    where
        F: ComponentFactory<Kind = K>,
    {
        !matches!(self.get(model), Ok(Some(_)))
    }

    /// Resolve in `model` first, then in the model `locator` finds for `hint`
    pub fn resolve_with<F>(
        &mut self,
        model: &mut DocumentModel<F>,
        locator: &dyn ModelLocator<F>,
        hint: &str,
    ) -> ResolvedReference<F>
    where
        F: ComponentFactory<Kind = K>,
    {
        if let Ok(Some(local)) = self.get(model) {
            return ResolvedReference::Local(local);
        }
        let Ok(qname) = self.qname(model) else {
            return ResolvedReference::Broken;
        };
        let external = match locator.locate(hint) {
            Ok(external) => external,
            Err(err) => {
                debug!(hint, error = %err, "cannot locate referenced model");
                return ResolvedReference::Broken;
            }
        };
        let found = match external.try_borrow_mut() {
            Ok(mut other) => other.find_named(&self.target_kind, &qname),
            Err(_) => return ResolvedReference::Broken,
        };
        match found {
            Ok(Some(component)) => ResolvedReference::External {
                model: external,
                component,
            },
            _ => ResolvedReference::Broken,
        }
    }
}

impl<F: ComponentFactory> DocumentModel<F> {
    /// First component of `kind` whose name attribute and namespace match
    /// `qname`, searching breadth first from the root
    pub fn find_named(&mut self, kind: &F::Kind, qname: &QName) -> ModelResult<Option<ComponentId>> {
        let root = self.root()?;
        let mut queue = VecDeque::from([root]);
        while let Some(current) = queue.pop_front() {
            if self.kind(current)? == kind && self.matches_name(current, qname)? {
                return Ok(Some(current));
            }
            queue.extend(self.children(current)?);
        }
        Ok(None)
    }

    fn matches_name(&self, id: ComponentId, qname: &QName) -> ModelResult<bool> {
        let name_attribute = self.factory.name_attribute(self.kind(id)?);
        if self.attribute(id, name_attribute)?.as_deref() != Some(qname.local.as_str()) {
            return Ok(false);
        }
        Ok(self.qname(id)?.namespace == qname.namespace)
    }
}
