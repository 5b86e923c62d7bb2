//! Overlay Props
//!
//! The prop map a handler returns, and the rules for which of its entries a
//! given request actually sends.
//!
//! Entries are plain values, lazily computed values (only evaluated when a
//! request asks for them), or deferred values (left out of the opening
//! response and fetched by the client right after). Inclusion is decided by
//! these markers and by the request, never by the values themselves.

use std::fmt;

use indexmap::IndexMap;
use serde_json::{Map, Value};

type Compute = Box<dyn FnOnce() -> Value + Send>;

/// How a prop value is produced
pub enum PropValue {
    /// Already computed
    Plain(Value),
    /// Computed only when requested
    Lazy(Compute),
    /// Left out of the opening response; requested by the client afterwards
    Deferred(Compute),
}

impl PropValue {
    fn is_plain(&self) -> bool {
        matches!(self, Self::Plain(_))
    }

    fn evaluate(self) -> Value {
        match self {
            Self::Plain(value) => value,
            Self::Lazy(compute) | Self::Deferred(compute) => compute(),
        }
    }
}

impl fmt::Debug for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(value) => f.debug_tuple("Plain").field(value).finish(),
            Self::Lazy(_) => f.write_str("Lazy(..)"),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// One prop entry
#[derive(Debug)]
pub struct PropEntry {
    /// The value or how to compute it
    pub value: PropValue,
    /// Sent with every response for this overlay
    pub always: bool,
}

/// Which entries a request asks for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Selection<'a> {
    /// Every plain value
    Opening,
    /// Only these keys
    Partial(&'a [String]),
    /// Everything already known: cached values plus fresh plain ones
    Everything,
}

/// Outcome of [`Props::resolve`]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedProps {
    /// Declared keys in handler order
    pub keys: Vec<String>,
    /// Values sent with this response (unscoped keys)
    pub included: Map<String, Value>,
    /// Full prop map to cache for later refocus
    pub persisted: Map<String, Value>,
    /// Deferred keys the client should request after opening
    pub deferred: Vec<String>,
}

/// Ordered prop map returned by a handler
#[derive(Debug, Default)]
pub struct Props {
    entries: IndexMap<String, PropEntry>,
    refreshed: Vec<String>,
    close_requested: bool,
}

impl Props {
    /// Create an empty prop map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plain value
    #[must_use]
    pub fn plain(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, PropValue::Plain(value.into()), false);
        self
    }

    /// Add a plain value sent with every response
    #[must_use]
    pub fn always(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, PropValue::Plain(value.into()), true);
        self
    }

    /// Add a value computed only when requested
    #[must_use]
    pub fn lazy<F>(mut self, key: impl Into<String>, compute: F) -> Self
    where
        F: FnOnce() -> Value + Send + 'static,
    {
        self.insert(key, PropValue::Lazy(Box::new(compute)), false);
        self
    }

    /// Add a value the client fetches after the overlay opened
    #[must_use]
    pub fn deferred<F>(mut self, key: impl Into<String>, compute: F) -> Self
    where
        F: FnOnce() -> Value + Send + 'static,
    {
        self.insert(key, PropValue::Deferred(Box::new(compute)), false);
        self
    }

    /// Insert or replace an entry
    pub fn insert(&mut self, key: impl Into<String>, value: PropValue, always: bool) {
        self.entries.insert(key.into(), PropEntry { value, always });
    }

    /// Send this key with the current response whatever was requested
    pub fn refresh(&mut self, key: impl Into<String>) {
        let key = key.into();
        if !self.refreshed.contains(&key) {
            self.refreshed.push(key);
        }
    }

    /// Ask the client to close the overlay
    pub fn request_close(&mut self) {
        self.close_requested = true;
    }

    /// Whether the handler asked the client to close the overlay
    #[must_use]
    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    /// Declared keys in order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Whether a key is declared
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of declared keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no key is declared
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decide what this request sends and what gets cached
    ///
    /// `cache` is the prop map stored by the previous render, if any. It is
    /// ignored when opening.
    #[must_use]
    pub fn resolve(self, selection: Selection<'_>, cache: Option<&Map<String, Value>>) -> ResolvedProps {
        let mut resolved = ResolvedProps {
            keys: self.entries.keys().cloned().collect(),
            ..ResolvedProps::default()
        };

        if let (Some(cache), false) = (cache, selection == Selection::Opening) {
            resolved.persisted = cache.clone();
            if selection == Selection::Everything {
                resolved.included = cache
                    .iter()
                    .filter(|(key, _)| self.entries.contains_key(*key))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
            }
        }

        for (key, entry) in self.entries {
            let requested = match selection {
                Selection::Opening | Selection::Everything => entry.value.is_plain(),
                Selection::Partial(keys) => keys.contains(&key),
            };
            let include = requested || entry.always || self.refreshed.contains(&key);

            if !include {
                if selection == Selection::Opening && matches!(entry.value, PropValue::Deferred(_)) {
                    resolved.deferred.push(key);
                }
                continue;
            }

            let value = entry.value.evaluate();
            resolved.persisted.insert(key.clone(), value.clone());
            resolved.included.insert(key, value);
        }

        tracing::debug!(
            selection = ?selection,
            included = resolved.included.len(),
            deferred = resolved.deferred.len(),
            "Selected overlay props"
        );
        resolved
    }
}
