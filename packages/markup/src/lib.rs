//! # Docsync Markup
//!
//! Mutable markup tree that mirrors a text buffer.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ parser: text → nodes (quick-xml)            │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ document: arena of node versions            │
//! │  - copy-on-write or in-place edits          │
//! │  - logical ids shared by node versions      │
//! │  - edit log of root versions                │
//! └─────────────────────────────────────────────┘
//!          ↓                          ↓
//! ┌──────────────────────┐  ┌──────────────────────┐
//! │ access: edits with   │  │ merge: replacement   │
//! │ NodeUpdater callback │  │ tree → change paths  │
//! └──────────────────────┘  └──────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ serializer: nodes → canonical text + spans  │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use docsync_markup::{EditMode, ElementIdentity, MarkupAccess, MarkupDocument, NoopUpdater};
//!
//! let mut doc = MarkupDocument::parse("<r><a/></r>", EditMode::CopyOnWrite)?;
//! let root = doc.document_element().unwrap();
//! doc.set_attribute(root, "version", "2", &mut NoopUpdater)?;
//!
//! // Text edited elsewhere: merge it back, keeping unchanged nodes
//! let outcome = doc.reload("<r version=\"2\"><a/><b/></r>", &ElementIdentity::new())?;
//! assert_eq!(outcome.changes.len(), 1);
//! ```

mod access;
mod document;
mod error;
mod identity;
mod merge;
mod node;
mod parser;
mod serializer;

pub use access::{MarkupAccess, NodeUpdater, NoopUpdater, ReadOnlyMarkup};
pub use document::{EditMode, MarkupDocument, MarkupEdit};
pub use error::{MarkupError, MarkupResult};
pub use identity::{ElementIdentity, ElementRef};
pub use merge::{merge_subtree, subtree_equal, ChangeKind, MarkupChange, MergeOutcome};
pub use node::{
    split_qualified, Attribute, ElementData, LogicalId, Node, NodeId, NodeKind, QName,
    XMLNS_NAMESPACE, XML_NAMESPACE,
};
pub use parser::{parse_fragment_into, parse_into};
pub use serializer::{node_spans, serialize, serialize_children, serialize_node, NodeSpan, Serializer};
