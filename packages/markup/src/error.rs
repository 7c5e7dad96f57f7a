use crate::node::NodeId;
use thiserror::Error;

pub type MarkupResult<T> = Result<T, MarkupError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarkupError {
    #[error("Parse error at {pos}: {message}")]
    Parse { pos: usize, message: String },

    #[error("Operation not supported by this markup backend: {0}")]
    Unsupported(&'static str),

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Node is not an element: {0}")]
    NotAnElement(NodeId),

    #[error("Node {child} is not a child of {parent}")]
    NotAChild { parent: NodeId, child: NodeId },

    #[error("Node {0} is already attached to the document")]
    AlreadyAttached(NodeId),

    #[error("Invalid name: {0}")]
    InvalidName(String),
}

impl MarkupError {
    pub fn parse(pos: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            pos,
            message: message.into(),
        }
    }

    pub fn is_parse_error(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }
}
