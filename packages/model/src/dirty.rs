//! # Dirty tracking
//!
//! Records when the text buffer last diverged from the markup tree.
//! Notifications may arrive from any thread, and may arrive before the model
//! has initialized its markup access. Those early notifications are kept as
//! pending and replayed by [`DirtyTracker::attach`].
//!
//! ```text
//! text_changed ──→ pending (not attached)  ──attach()──→ dirty_since
//!              └─→ dirty_since (attached)
//! ```

use parking_lot::Mutex;
use std::time::Instant;

/// Receives change notifications from a text buffer
pub trait TextChangeListener: Send + Sync {
    fn text_changed(&self);
}

#[derive(Debug, Default)]
struct DirtyState {
    attached: bool,
    pending: Option<Instant>,
    dirty_since: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct DirtyTracker {
    state: Mutex<DirtyState>,
}

impl DirtyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the text as changed at `at`. The earliest timestamp wins.
    pub fn mark_dirty_at(&self, at: Instant) {
        let mut state = self.state.lock();
        let slot = if state.attached {
            &mut state.dirty_since
        } else {
            &mut state.pending
        };
        *slot = Some(slot.map_or(at, |earlier| earlier.min(at)));
    }

    pub fn mark_dirty(&self) {
        self.mark_dirty_at(Instant::now());
    }

    /// Start tracking for an initialized model, replaying early notifications
    pub fn attach(&self) {
        let mut state = self.state.lock();
        state.attached = true;
        if let Some(pending) = state.pending.take() {
            state.dirty_since = Some(state.dirty_since.map_or(pending, |d| d.min(pending)));
        }
    }

    pub fn is_attached(&self) -> bool {
        self.state.lock().attached
    }

    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty_since.is_some()
    }

    pub fn dirty_since(&self) -> Option<Instant> {
        self.state.lock().dirty_since
    }

    /// Forget the recorded change, e.g. after the model flushed or synced
    pub fn clear(&self) {
        self.state.lock().dirty_since = None;
    }
}

impl TextChangeListener for DirtyTracker {
    fn text_changed(&self) {
        self.mark_dirty();
    }
}
