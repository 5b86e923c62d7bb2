//! Server Overlay Session
//!
//! Per-overlay cache of the last render: which page component it was
//! rendered on, its config, and its full prop map. A refocus answers "all
//! current props" from here without running expensive props again.
//!
//! An entry is replaced as a whole on every render (last write wins), evicted
//! when its overlay closes, and dropped once its TTL has passed.

use std::fmt;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::config::ServerConfig;
use crate::identity::OverlayId;
use crate::instance::OverlayConfig;

/// Cached render of one overlay
#[derive(Clone, Debug, PartialEq)]
pub struct SessionEntry {
    /// Host page component the overlay was rendered on
    pub component: String,
    /// Config of the last render
    pub config: OverlayConfig,
    /// Full prop map (unscoped keys)
    pub props: Map<String, Value>,
}

/// Per-overlay key-value store
pub trait SessionStore: Send + Sync {
    /// Cached entry, unless missing or expired
    fn get(&self, id: &OverlayId) -> Option<SessionEntry>;

    /// Replace the entry of an overlay
    fn put(&self, id: &OverlayId, entry: SessionEntry);

    /// Drop the entry of an overlay; returns whether one existed
    fn evict(&self, id: &OverlayId) -> bool;

    /// Whether the overlay has been rendered before
    fn is_initialized(&self, id: &OverlayId) -> bool {
        self.get(id).is_some()
    }

    /// Drop every expired entry; returns how many were dropped
    fn purge_expired(&self) -> usize;
}

#[derive(Clone, Debug)]
struct Stored {
    entry: SessionEntry,
    written_at: Instant,
}

/// In-process [`SessionStore`] with TTL and a size cap
pub struct InMemorySessionStore {
    entries: DashMap<OverlayId, Stored>,
    ttl: Duration,
    max_entries: usize,
}

impl InMemorySessionStore {
    /// Create a store
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Create a store from server settings
    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.session_ttl, config.max_session_entries)
    }

    /// Number of stored entries, expired ones included
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_expired(&self, stored: &Stored) -> bool {
        stored.written_at.elapsed() >= self.ttl
    }

    /// Drop the oldest entries until the store fits its cap
    fn enforce_cap(&self) {
        while self.entries.len() > self.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|item| item.value().written_at)
                .map(|item| item.key().clone());
            let Some(id) = oldest else { break };
            self.entries.remove(&id);
            tracing::debug!(overlay_id = %id, "Evicted oldest overlay session");
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, id: &OverlayId) -> Option<SessionEntry> {
        let stored = self.entries.get(id)?;
        if self.is_expired(&stored) {
            drop(stored);
            self.entries.remove(id);
            tracing::debug!(overlay_id = %id, "Overlay session expired");
            return None;
        }
        Some(stored.entry.clone())
    }

    fn put(&self, id: &OverlayId, entry: SessionEntry) {
        self.entries.insert(
            id.clone(),
            Stored {
                entry,
                written_at: Instant::now(),
            },
        );
        self.enforce_cap();
    }

    fn evict(&self, id: &OverlayId) -> bool {
        let existed = self.entries.remove(id).is_some();
        if existed {
            tracing::info!(overlay_id = %id, "Overlay session evicted");
        }
        existed
    }

    fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, stored| stored.written_at.elapsed() < self.ttl);
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            tracing::info!(purged = purged, "Purged expired overlay sessions");
        }
        purged
    }
}

impl fmt::Debug for InMemorySessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemorySessionStore")
            .field("entries", &self.entries.len())
            .field("ttl", &self.ttl)
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(name: &str) -> OverlayId {
        OverlayId::from_typename(name).unwrap()
    }

    fn entry(title: &str) -> SessionEntry {
        SessionEntry {
            component: "Users/Index".into(),
            config: OverlayConfig::default(),
            props: json!({"title": title}).as_object().cloned().unwrap(),
        }
    }

    #[test]
    fn test_put_get_evict() {
        let store = InMemorySessionStore::default();
        assert!(!store.is_initialized(&id("a")));

        store.put(&id("a"), entry("first"));
        store.put(&id("a"), entry("second"));
        assert_eq!(store.get(&id("a")), Some(entry("second")));
        assert!(store.is_initialized(&id("a")));

        assert!(store.evict(&id("a")));
        assert!(!store.evict(&id("a")));
        assert_eq!(store.get(&id("a")), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let store = InMemorySessionStore::new(Duration::from_secs(60), 10);
        store.put(&id("a"), entry("a"));
        tokio::time::advance(Duration::from_secs(30)).await;
        store.put(&id("b"), entry("b"));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(store.get(&id("a")), None);
        assert!(store.get(&id("b")).is_some());

        store.put(&id("c"), entry("c"));
        tokio::time::advance(Duration::from_secs(45)).await;
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oldest_entry_evicted_on_overflow() {
        let store = InMemorySessionStore::new(Duration::from_secs(60), 2);
        store.put(&id("a"), entry("a"));
        tokio::time::advance(Duration::from_millis(5)).await;
        store.put(&id("b"), entry("b"));
        tokio::time::advance(Duration::from_millis(5)).await;
        store.put(&id("c"), entry("c"));

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&id("a")), None);
        assert!(store.get(&id("c")).is_some());
    }
}
