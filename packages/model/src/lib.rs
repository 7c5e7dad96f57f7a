//! # Docsync Model
//!
//! Typed component tree kept in sync with a markup tree and its text buffer.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ buffer: text + change notifications         │
//! └─────────────────────────────────────────────┘
//!            ↓ dirty                ↑ flush
//! ┌─────────────────────────────────────────────┐
//! │ markup: MarkupDocument (docsync-markup)     │
//! │  - reload merges text edits into the tree   │
//! │  - edits through MarkupAccess               │
//! └─────────────────────────────────────────────┘
//!            ↓ MergeOutcome          ↑ TreeUpdater
//! ┌─────────────────────────────────────────────┐
//! │ model: DocumentModel                        │
//! │  - lazy component population                │
//! │  - reconciliation into sync units           │
//! │  - transactions, undo/redo                  │
//! │  - events to listeners                      │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **Text is source of truth**: the markup and component trees are views
//! 2. **Identity survives reparse**: unchanged elements keep their components
//! 3. **Lazy children**: a component's children exist once someone asks
//! 4. **Writes need a transaction**: outside one, mutations are rejected
//!
//! ## Usage
//!
//! ```rust,ignore
//! use docsync_model::{DocumentModel, QNameFactory};
//!
//! let mut model = DocumentModel::from_text("<r><a/></r>", QNameFactory::any());
//! let root = model.root()?;
//!
//! model.begin_transaction()?;
//! model.set_attribute(root, "version", "version", Some("2"))?;
//! model.end_transaction()?;
//!
//! assert_eq!(model.buffer().text(), "<r version=\"2\"><a/></r>");
//! ```

mod attributes;
mod buffer;
mod change_info;
mod component;
mod config;
mod dirty;
mod errors;
mod events;
mod factory;
mod locator;
mod model;
mod namespace;
mod reference;
mod sync;
mod sync_unit;
mod undo_stack;
mod xpath;

pub use attributes::AttrType;
pub use buffer::{StringBuffer, SubscriptionId, TextBuffer};
pub use change_info::{ChangeInfo, ChangedNode};
pub use component::{ComponentId, ComponentTree};
pub use config::{ModelConfig, DEFAULT_CONFIG_NAME};
pub use dirty::{DirtyTracker, TextChangeListener};
pub use errors::{ModelError, ModelResult};
pub use events::{ComponentEvent, ComponentListener, PropertyValue};
pub use factory::{ComponentFactory, QNameFactory};
pub use locator::{Catalog, ModelLocator};
pub use model::{DocumentModel, ForeignAnchor, ModelState, SharedModel};
pub use namespace::ForeignContext;
pub use reference::{NamedReference, ResolvedReference};
pub use sync_unit::SyncUnit;
pub use undo_stack::{EditBatch, UndoStack};
pub use xpath::{parse_steps, Step};

// Re-export the markup layer for factories and callers
pub use docsync_markup;
