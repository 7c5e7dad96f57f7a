//! Locating other models by a location hint.

use crate::errors::{ModelError, ModelResult};
use crate::factory::ComponentFactory;
use crate::model::SharedModel;
use std::collections::HashMap;
use std::rc::Rc;

/// Resolves a location hint (a file name, a namespace, a catalog key) to a model
pub trait ModelLocator<F: ComponentFactory> {
    fn locate(&self, hint: &str) -> ModelResult<SharedModel<F>>;
}

/// Fixed table of models keyed by location hint
pub struct Catalog<F: ComponentFactory> {
    models: HashMap<String, SharedModel<F>>,
}

impl<F: ComponentFactory> Catalog<F> {
    pub fn new() -> Self {
        Self {
            models: HashMap::new(),
        }
    }

    pub fn register(&mut self, hint: impl Into<String>, model: SharedModel<F>) {
        self.models.insert(hint.into(), model);
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl<F: ComponentFactory> Default for Catalog<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ComponentFactory> ModelLocator<F> for Catalog<F> {
    fn locate(&self, hint: &str) -> ModelResult<SharedModel<F>> {
        self.models
            .get(hint)
            .map(Rc::clone)
            .ok_or_else(|| ModelError::CannotResolve {
                hint: hint.to_string(),
            })
    }
}
