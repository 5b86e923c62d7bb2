//! Navigator Abstraction
//!
//! The page-transition transport is external. The runtime only needs a way
//! to turn a [`Visit`] into a [`Page`], resolving or failing exactly once.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::protocol::{headers, HeaderMap, Lifecycle, Page};

/// Transport failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NavigationError {
    /// The request never produced a response
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a non-success status
    #[error("server responded with status {status}: {message}")]
    Status {
        /// Status code
        status: u16,
        /// Response message
        message: String,
    },
}

/// HTTP method of a visit
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Method {
    /// GET
    #[default]
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        })
    }
}

/// An outgoing navigation
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Visit {
    /// Target URL
    pub url: String,
    /// HTTP method
    pub method: Method,
    /// Extra request headers
    pub headers: HeaderMap,
    /// Request body
    pub data: Option<Value>,
    /// Partial reload keys (empty = everything)
    pub only: Vec<String>,
    /// Keep the scroll position
    pub preserve_scroll: bool,
    /// Keep local component state
    pub preserve_state: bool,
    /// Replace the history entry instead of pushing
    pub replace: bool,
    /// Overlay transition this visit performs
    pub lifecycle: Option<Lifecycle>,
}

impl Visit {
    /// A GET visit
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// A POST visit with a JSON body
    pub fn post(url: impl Into<String>, data: Value) -> Self {
        Self {
            url: url.into(),
            method: Method::Post,
            data: Some(data),
            ..Default::default()
        }
    }

    /// Restrict the response to these keys
    #[must_use]
    pub fn only<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Add a header
    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Tag the visit with an overlay transition
    #[must_use]
    pub fn lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    /// Replace the current history entry
    #[must_use]
    pub fn replace(mut self, replace: bool) -> Self {
        self.replace = replace;
        self
    }

    /// Whether the caller restricted the fetched props
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.only.is_empty()
    }

    /// Headers as they go on the wire, with the partial set folded in
    #[must_use]
    pub fn wire_headers(&self, page_component: &str) -> HeaderMap {
        let mut wire = self.headers.clone();
        if self.is_partial() {
            wire.insert(headers::PARTIAL_DATA, self.only.join(","));
            wire.insert(headers::PARTIAL_COMPONENT, page_component);
        }
        wire
    }
}

/// The page-transition transport
///
/// Implementations perform the request and return the decoded page. A
/// non-success response must be reported as [`NavigationError::Status`].
#[async_trait]
pub trait Navigator: Send + Sync {
    /// Perform a navigation
    async fn navigate(&self, visit: Visit) -> Result<Page, NavigationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visit_builders() {
        let visit = Visit::get("/users").only(["a", "b"]).replace(true);
        assert_eq!(visit.method, Method::Get);
        assert!(visit.is_partial());
        assert!(visit.replace);
        assert_eq!(visit.only, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_wire_headers_carry_partial_set() {
        let visit = Visit::get("/users").only(["a", "b"]);
        let wire = visit.wire_headers("Users/Index");
        assert_eq!(wire.get(headers::PARTIAL_DATA), Some("a,b"));
        assert_eq!(wire.get(headers::PARTIAL_COMPONENT), Some("Users/Index"));

        let full = Visit::get("/users").wire_headers("Users/Index");
        assert!(!full.contains(headers::PARTIAL_DATA));
    }
}
