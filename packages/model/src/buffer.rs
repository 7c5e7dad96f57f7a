//! Text buffer abstraction and an in-memory implementation.

use crate::dirty::TextChangeListener;
use crate::errors::{ModelError, ModelResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Handle returned by [`TextBuffer::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

/// Live text a model is the structured view of
pub trait TextBuffer: Send + Sync {
    fn text(&self) -> String;

    /// Replace `len` bytes at `offset` with `text`
    fn replace(&self, offset: usize, len: usize, text: &str) -> ModelResult<()>;

    fn set_text(&self, text: &str);

    fn subscribe(&self, listener: Arc<dyn TextChangeListener>) -> SubscriptionId;

    /// Stop notifying the listener. Returns `false` for an unknown id.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

#[derive(Default)]
struct Listeners {
    next: u64,
    entries: Vec<(SubscriptionId, Arc<dyn TextChangeListener>)>,
}

/// Shared in-memory buffer; clones see the same text
#[derive(Clone, Default)]
pub struct StringBuffer {
    text: Arc<Mutex<String>>,
    listeners: Arc<Mutex<Listeners>>,
}

impl StringBuffer {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Arc::new(Mutex::new(text.into())),
            listeners: Arc::default(),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().entries.len()
    }

    fn notify(&self) {
        // listeners run without either lock held
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .entries
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener.text_changed();
        }
    }
}

impl TextBuffer for StringBuffer {
    fn text(&self) -> String {
        self.text.lock().clone()
    }

    fn replace(&self, offset: usize, len: usize, text: &str) -> ModelResult<()> {
        {
            let mut current = self.text.lock();
            let end = offset
                .checked_add(len)
                .filter(|end| *end <= current.len())
                .ok_or(ModelError::InvalidRange { offset, len })?;
            if !current.is_char_boundary(offset) || !current.is_char_boundary(end) {
                return Err(ModelError::InvalidRange { offset, len });
            }
            current.replace_range(offset..end, text);
        }
        self.notify();
        Ok(())
    }

    fn set_text(&self, text: &str) {
        *self.text.lock() = text.to_string();
        self.notify();
    }

    fn subscribe(&self, listener: Arc<dyn TextChangeListener>) -> SubscriptionId {
        let mut listeners = self.listeners.lock();
        let id = SubscriptionId(listeners.next);
        listeners.next += 1;
        listeners.entries.push((id, listener));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.entries.len();
        listeners.entries.retain(|(entry, _)| *entry != id);
        listeners.entries.len() != before
    }
}

impl std::fmt::Debug for StringBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StringBuffer")
            .field("text", &*self.text.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dirty::DirtyTracker;

    #[test]
    fn test_replace_and_notify() {
        let buffer = StringBuffer::new("<a/>");
        let tracker = Arc::new(DirtyTracker::new());
        tracker.attach();
        buffer.subscribe(tracker.clone());

        buffer.replace(1, 1, "b").unwrap();
        assert_eq!(buffer.text(), "<b/>");
        assert!(tracker.is_dirty());
    }

    #[test]
    fn test_unsubscribed_listener_is_not_notified() {
        let buffer = StringBuffer::new("<a/>");
        let tracker = Arc::new(DirtyTracker::new());
        tracker.attach();
        let id = buffer.subscribe(tracker.clone());
        assert_eq!(buffer.listener_count(), 1);

        assert!(buffer.unsubscribe(id));
        assert!(!buffer.unsubscribe(id));
        assert_eq!(buffer.listener_count(), 0);
        assert_eq!(Arc::strong_count(&tracker), 1);

        buffer.set_text("<b/>");
        assert!(!tracker.is_dirty());
    }

    #[test]
    fn test_replace_out_of_range() {
        let buffer = StringBuffer::new("abc");
        assert!(matches!(
            buffer.replace(2, 5, "x"),
            Err(ModelError::InvalidRange { offset: 2, len: 5 })
        ));
        assert_eq!(buffer.text(), "abc");
    }

    #[test]
    fn test_clones_share_text() {
        let buffer = StringBuffer::new("");
        let other = buffer.clone();
        other.set_text("<r/>");
        assert_eq!(buffer.text(), "<r/>");
    }
}
