//! # Undo/Redo Stack
//!
//! Tracks transaction history as pairs of markup root versions.
//!
//! ## Design
//!
//! - A transaction opens a batch with the root version it started from
//! - Ending the transaction closes the batch with the resulting root version
//! - Undo hands back the batch so the model can restore `before`
//! - Redo hands it back again so the model can restore `after`
//! - New batches clear the redo stack
//!
//! Root versions stay valid only while the markup document keeps old versions
//! around, i.e. in copy-on-write mode. When the markup arena is compacted the
//! model keeps every version listed by [`UndoStack::root_versions`] and
//! renumbers the batches with [`UndoStack::remap`].

use docsync_markup::NodeId;
use std::collections::HashMap;

/// One transaction, as the root versions around it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditBatch {
    pub before: NodeId,
    pub after: NodeId,
    pub description: Option<String>,
}

#[derive(Debug)]
pub struct UndoStack {
    /// Applied batches (most recent last)
    undo_stack: Vec<EditBatch>,

    /// Undone batches (most recent last)
    redo_stack: Vec<EditBatch>,

    /// Maximum number of undo levels (0 = unlimited)
    max_levels: usize,

    /// Batch of the transaction in progress
    current_batch: Option<EditBatch>,
}

impl UndoStack {
    /// Create a new undo stack with default max levels (100)
    pub fn new() -> Self {
        Self::with_max_levels(100)
    }

    pub fn with_max_levels(max_levels: usize) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            max_levels,
            current_batch: None,
        }
    }

    /// Start a batch at root version `before`
    pub fn begin_batch(&mut self, before: NodeId) {
        self.current_batch = Some(EditBatch {
            before,
            after: before,
            description: None,
        });
    }

    /// Close the current batch at root version `after`. Batches that changed
    /// nothing are dropped.
    pub fn end_batch(&mut self, after: NodeId) {
        if let Some(mut batch) = self.current_batch.take() {
            if batch.before != after {
                batch.after = after;
                self.push_batch(batch);
            }
        }
    }

    /// Drop the current batch without recording it
    pub fn abandon_batch(&mut self) {
        self.current_batch = None;
    }

    pub fn set_batch_description(&mut self, description: impl Into<String>) {
        if let Some(batch) = &mut self.current_batch {
            batch.description = Some(description.into());
        }
    }

    fn push_batch(&mut self, batch: EditBatch) {
        self.undo_stack.push(batch);

        if self.max_levels > 0 && self.undo_stack.len() > self.max_levels {
            self.undo_stack.remove(0);
        }

        self.redo_stack.clear();
    }

    /// Pop the most recent batch onto the redo stack
    pub fn undo(&mut self) -> Option<EditBatch> {
        let batch = self.undo_stack.pop()?;
        self.redo_stack.push(batch.clone());
        Some(batch)
    }

    /// Pop the most recently undone batch back onto the undo stack
    pub fn redo(&mut self) -> Option<EditBatch> {
        let batch = self.redo_stack.pop()?;
        self.undo_stack.push(batch.clone());
        Some(batch)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_levels(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_levels(&self) -> usize {
        self.redo_stack.len()
    }

    /// Clear all undo/redo history
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.current_batch = None;
    }

    /// Every root version a batch may still restore
    pub fn root_versions(&self) -> Vec<NodeId> {
        self.undo_stack
            .iter()
            .chain(&self.redo_stack)
            .chain(&self.current_batch)
            .flat_map(|batch| [batch.before, batch.after])
            .collect()
    }

    /// Renumber root versions after a compaction. Batches with a version
    /// that did not survive are dropped.
    pub(crate) fn remap(&mut self, map: &HashMap<NodeId, NodeId>) {
        let renumber = |batch: &mut EditBatch| -> bool {
            match (map.get(&batch.before), map.get(&batch.after)) {
                (Some(before), Some(after)) => {
                    batch.before = *before;
                    batch.after = *after;
                    true
                }
                _ => false,
            }
        };
        self.undo_stack.retain_mut(renumber);
        self.redo_stack.retain_mut(renumber);
        if let Some(batch) = &mut self.current_batch {
            if !renumber(batch) {
                self.current_batch = None;
            }
        }
    }

    pub fn undo_description(&self) -> Option<&str> {
        self.undo_stack
            .last()
            .and_then(|batch| batch.description.as_deref())
    }

    pub fn redo_description(&self) -> Option<&str> {
        self.redo_stack
            .last()
            .and_then(|batch| batch.description.as_deref())
    }
}

impl Default for UndoStack {
    fn default() -> Self {
        Self::new()
    }
}
