//! Error types for the document model

use crate::component::ComponentId;
use docsync_markup::{MarkupError, NodeId, QName};
use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Markup error: {0}")]
    Markup(#[from] MarkupError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Component {0} is no longer part of the model")]
    StaleComponent(ComponentId),

    #[error("Component not found: {0}")]
    ComponentNotFound(ComponentId),

    #[error("No transaction in progress")]
    NotInTransaction,

    #[error("A transaction is already in progress")]
    TransactionInProgress,

    #[error("Model is read-only")]
    ReadOnly,

    #[error("Document text is not well formed: {0}")]
    NotWellFormed(String),

    #[error("Invalid model state: {0}")]
    InvalidState(String),

    #[error("Malformed fragment: {0}")]
    MalformedFragment(std::io::Error),

    #[error("Path invariant violated: {0}")]
    PathInvariant(String),

    #[error("Cannot resolve model for {hint}")]
    CannotResolve { hint: String },

    #[error("No component type for element {0}")]
    UnknownElement(QName),

    #[error("Element {0} has no component")]
    NoComponentFor(NodeId),

    #[error("Invalid expression {expr}: {message}")]
    InvalidXPath { expr: String, message: String },

    #[error("Range {offset}+{len} is outside the buffer")]
    InvalidRange { offset: usize, len: usize },
}

impl ModelError {
    pub fn path_invariant(message: impl Into<String>) -> Self {
        Self::PathInvariant(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub(crate) fn malformed_fragment(source: MarkupError) -> Self {
        Self::MalformedFragment(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            source.to_string(),
        ))
    }
}
