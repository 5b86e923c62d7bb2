//! Overlay Stack - Ordered Registry of Open Overlays
//!
//! The stack records which overlays are open, in the order they were opened.
//! The last entry is the focused overlay.
//!
//! # Architecture
//!
//! ```text
//!                  OverlayRegistrar (shared, cloneable)
//!                 ┌────────────────────────────────────┐
//!                 │ Mutex<OverlayStack>                │──── snapshot ───▶ EventChannel
//!                 │   [ users, user:eyJ…, confirm ]    │                   (listeners)
//!                 │                          ▲ focused │
//!                 └────────────────────────────────────┘
//! ```
//!
//! `OverlayStack` is the plain data structure. `OverlayRegistrar` wraps it
//! for shared use and publishes a [`StackSnapshot`] after every mutation.
//! The lock is released before listeners run, so a listener may mutate the
//! registrar again; it only ever sees complete snapshots.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::events::{EventChannel, ListenerId};
use crate::identity::OverlayId;

/// Immutable copy of the stack taken right after a mutation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackSnapshot {
    ids: Arc<[OverlayId]>,
}

impl StackSnapshot {
    /// Ordered identifiers, bottom first
    #[must_use]
    pub fn ids(&self) -> &[OverlayId] {
        &self.ids
    }

    /// The focused (topmost) identifier
    #[must_use]
    pub fn focused(&self) -> Option<&OverlayId> {
        self.ids.last()
    }

    /// Number of open overlays
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether no overlay is open
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Position of an identifier in the stack
    #[must_use]
    pub fn index_of(&self, id: &OverlayId) -> Option<usize> {
        self.ids.iter().position(|i| i == id)
    }
}

/// Ordered, duplicate-free list of open overlay identifiers
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OverlayStack {
    ids: Vec<OverlayId>,
}

impl OverlayStack {
    /// Create an empty stack
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an identifier if absent. Returns false (and leaves the order
    /// untouched) when it is already present.
    pub fn register(&mut self, id: OverlayId) -> bool {
        if self.contains(&id) {
            return false;
        }
        self.ids.push(id);
        true
    }

    /// Remove an identifier. Returns false if it was not a member.
    pub fn unregister(&mut self, id: &OverlayId) -> bool {
        let before = self.ids.len();
        self.ids.retain(|i| i != id);
        self.ids.len() != before
    }

    /// The focused (last) identifier
    #[must_use]
    pub fn focused_id(&self) -> Option<&OverlayId> {
        self.ids.last()
    }

    /// Number of registered identifiers
    #[must_use]
    pub fn size(&self) -> usize {
        self.ids.len()
    }

    /// Whether the stack is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether an identifier is registered
    #[must_use]
    pub fn contains(&self, id: &OverlayId) -> bool {
        self.ids.iter().any(|i| i == id)
    }

    /// Position of an identifier
    #[must_use]
    pub fn index_of(&self, id: &OverlayId) -> Option<usize> {
        self.ids.iter().position(|i| i == id)
    }

    /// Ordered identifiers, bottom first
    #[must_use]
    pub fn ids(&self) -> &[OverlayId] {
        &self.ids
    }

    /// Copy the current contents into a snapshot
    #[must_use]
    pub fn snapshot(&self) -> StackSnapshot {
        StackSnapshot {
            ids: self.ids.clone().into(),
        }
    }
}

/// Shared stack that announces every change
///
/// Clones share the same stack and listener set.
#[derive(Clone, Default)]
pub struct OverlayRegistrar {
    stack: Arc<Mutex<OverlayStack>>,
    changes: EventChannel<StackSnapshot>,
}

impl OverlayRegistrar {
    /// Create an empty registrar
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an identifier if absent; emits on change
    pub fn register(&self, id: OverlayId) -> bool {
        let snapshot = {
            let mut stack = self.stack.lock();
            if !stack.register(id.clone()) {
                return false;
            }
            stack.snapshot()
        };
        tracing::debug!(overlay_id = %id, size = snapshot.len(), "Overlay registered");
        self.changes.emit(&snapshot);
        true
    }

    /// Remove an identifier; emits on change
    pub fn unregister(&self, id: &OverlayId) -> bool {
        let snapshot = {
            let mut stack = self.stack.lock();
            if !stack.unregister(id) {
                return false;
            }
            stack.snapshot()
        };
        tracing::debug!(overlay_id = %id, size = snapshot.len(), "Overlay unregistered");
        self.changes.emit(&snapshot);
        true
    }

    /// The focused (topmost) identifier
    #[must_use]
    pub fn focused_id(&self) -> Option<OverlayId> {
        self.stack.lock().focused_id().cloned()
    }

    /// Number of registered identifiers
    #[must_use]
    pub fn size(&self) -> usize {
        self.stack.lock().size()
    }

    /// Whether an identifier is registered
    #[must_use]
    pub fn contains(&self, id: &OverlayId) -> bool {
        self.stack.lock().contains(id)
    }

    /// Current contents
    #[must_use]
    pub fn snapshot(&self) -> StackSnapshot {
        self.stack.lock().snapshot()
    }

    /// Listen for stack changes
    pub fn on_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&StackSnapshot) + Send + Sync + 'static,
    {
        self.changes.subscribe(listener)
    }

    /// Listen for stack changes ahead of (or after) other listeners
    pub fn on_change_with_priority<F>(&self, priority: i32, listener: F) -> ListenerId
    where
        F: Fn(&StackSnapshot) + Send + Sync + 'static,
    {
        self.changes.subscribe_with_priority(priority, listener)
    }

    /// Stop listening
    pub fn off_change(&self, id: ListenerId) -> bool {
        self.changes.unsubscribe(id)
    }
}

impl fmt::Debug for OverlayRegistrar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlayRegistrar")
            .field("stack", &self.stack.lock().ids())
            .field("listeners", &self.changes.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> OverlayId {
        OverlayId::from_typename(name).unwrap()
    }

    #[test]
    fn test_register_twice_keeps_order() {
        let mut stack = OverlayStack::new();
        assert!(stack.register(id("a")));
        assert!(stack.register(id("b")));
        assert!(!stack.register(id("a")));

        assert_eq!(stack.size(), 2);
        assert_eq!(stack.ids(), &[id("a"), id("b")]);
        assert_eq!(stack.focused_id(), Some(&id("b")));
    }

    #[test]
    fn test_unregister_non_member_is_noop() {
        let mut stack = OverlayStack::new();
        stack.register(id("a"));
        assert!(!stack.unregister(&id("zzz")));
        assert_eq!(stack.ids(), &[id("a")]);
    }

    #[test]
    fn test_focus_follows_last_registered_member() {
        let mut stack = OverlayStack::new();
        assert_eq!(stack.focused_id(), None);

        stack.register(id("a"));
        stack.register(id("b"));
        stack.register(id("c"));
        stack.unregister(&id("b"));
        assert_eq!(stack.focused_id(), Some(&id("c")));

        stack.unregister(&id("c"));
        assert_eq!(stack.focused_id(), Some(&id("a")));
        assert_eq!(stack.index_of(&id("a")), Some(0));

        stack.unregister(&id("a"));
        assert_eq!(stack.focused_id(), None);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_registrar_emits_only_on_change() {
        let registrar = OverlayRegistrar::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        registrar.on_change(move |snap| seen_clone.lock().push(snap.len()));

        registrar.register(id("a"));
        registrar.register(id("a"));
        registrar.register(id("b"));
        registrar.unregister(&id("missing"));
        registrar.unregister(&id("a"));

        assert_eq!(*seen.lock(), vec![1, 2, 1]);
    }

    #[test]
    fn test_listener_can_mutate_during_dispatch() {
        let registrar = OverlayRegistrar::new();
        let inner = registrar.clone();
        let snapshots = Arc::new(Mutex::new(Vec::new()));
        let snapshots_clone = Arc::clone(&snapshots);

        registrar.on_change(move |snap| {
            snapshots_clone.lock().push(snap.clone());
            // Pushing "child" whenever "parent" becomes focused
            if snap.focused() == Some(&id("parent")) {
                inner.register(id("child"));
            }
        });

        registrar.register(id("parent"));

        let snapshots = snapshots.lock();
        assert_eq!(snapshots.len(), 2);
        // The first snapshot is not affected by the nested mutation
        assert_eq!(snapshots[0].ids(), &[id("parent")]);
        assert_eq!(snapshots[1].ids(), &[id("parent"), id("child")]);
        assert_eq!(registrar.focused_id(), Some(id("child")));
    }
}
