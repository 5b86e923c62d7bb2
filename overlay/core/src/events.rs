//! Event Channel
//!
//! A small multi-listener publish/subscribe primitive used by the overlay
//! stack and the client runtime to announce changes.
//!
//! # Ordering
//!
//! Listeners run in descending priority. Listeners with equal priority run
//! in the order they subscribed.
//!
//! # Re-entrancy
//!
//! The listener list is copied before dispatch, so a listener may subscribe,
//! unsubscribe or emit on the same channel without deadlocking. Changes made
//! during a dispatch take effect from the next `emit`.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Identifier returned by [`EventChannel::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Listener<T> {
    id: ListenerId,
    priority: i32,
    callback: Callback<T>,
}

impl<T> Clone for Listener<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            priority: self.priority,
            callback: Arc::clone(&self.callback),
        }
    }
}

struct ChannelInner<T> {
    listeners: Vec<Listener<T>>,
    next_id: u64,
}

/// Priority-ordered publish/subscribe channel
///
/// Cloning yields another handle to the same listener set.
pub struct EventChannel<T> {
    inner: Arc<Mutex<ChannelInner<T>>>,
}

impl<T> Clone for EventChannel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for EventChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventChannel<T> {
    /// Create a channel with no listeners
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ChannelInner {
                listeners: Vec::new(),
                next_id: 1,
            })),
        }
    }

    /// Subscribe with the default priority (0)
    pub fn subscribe<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.subscribe_with_priority(0, callback)
    }

    /// Subscribe with an explicit priority; higher runs first
    pub fn subscribe_with_priority<F>(&self, priority: i32, callback: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        let id = ListenerId(inner.next_id);
        inner.next_id += 1;

        // Insert after every listener with priority >= ours to keep ties stable
        let position = inner
            .listeners
            .iter()
            .position(|l| l.priority < priority)
            .unwrap_or(inner.listeners.len());
        inner.listeners.insert(
            position,
            Listener {
                id,
                priority,
                callback: Arc::new(callback),
            },
        );
        id
    }

    /// Remove a listener. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|l| l.id != id);
        inner.listeners.len() != before
    }

    /// Deliver an event to every listener. Returns how many were called.
    pub fn emit(&self, event: &T) -> usize {
        let listeners: Vec<Listener<T>> = self.inner.lock().listeners.clone();
        for listener in &listeners {
            (listener.callback)(event);
        }
        listeners.len()
    }

    /// Number of subscribed listeners
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// Drop every listener
    pub fn clear(&self) {
        self.inner.lock().listeners.clear();
    }
}

impl<T> fmt::Debug for EventChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChannel")
            .field("listener_count", &self.listener_count())
            .finish()
    }
}
