//! Overlay Wire Protocol
//!
//! Everything that crosses the network: request header names, the page
//! payload returned by the server, the `overlay` envelope inside it, and
//! the URL rules both sides agree on.
//!
//! # Request headers
//!
//! | Header | Meaning |
//! |---|---|
//! | `Overlay-Protocol` | `"true"` marks the request as overlay-scoped |
//! | `Overlay-Id` | focused overlay at request time |
//! | `Overlay-Index` | its position in the client stack |
//! | `Overlay-Stack` | comma-joined ordered list of open overlay ids |
//! | `Overlay-Root-Url` | URL of the page beneath all overlays |
//! | `Overlay-Previous-Url` | URL to restore when the root-most overlay closes |
//! | `Overlay-Page-Component` | host page component name |
//! | `Overlay-Opening-Id` / `Overlay-Closing-Id` | present only during that transition |
//! | `Overlay-Action` | server action to run before rendering |
//! | `Partial-Data` / `Partial-Component` | ordinary partial reload set |
//!
//! The target overlay of a request is always the `overlay` query parameter.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::{form_urlencoded, Position, Url};

use crate::identity::OverlayId;
use crate::instance::{Size, Variant};

/// Header names
pub mod headers {
    /// Marks a request as overlay-scoped
    pub const PROTOCOL: &str = "Overlay-Protocol";
    /// Focused overlay id
    pub const ID: &str = "Overlay-Id";
    /// Focused overlay position in the stack
    pub const INDEX: &str = "Overlay-Index";
    /// Comma-joined stack
    pub const STACK: &str = "Overlay-Stack";
    /// URL beneath all overlays
    pub const ROOT_URL: &str = "Overlay-Root-Url";
    /// URL to restore when the root-most overlay closes
    pub const PREVIOUS_URL: &str = "Overlay-Previous-Url";
    /// Host page component
    pub const PAGE_COMPONENT: &str = "Overlay-Page-Component";
    /// Overlay being opened by this request
    pub const OPENING_ID: &str = "Overlay-Opening-Id";
    /// Overlay being closed by this request
    pub const CLOSING_ID: &str = "Overlay-Closing-Id";
    /// Server action name
    pub const ACTION: &str = "Overlay-Action";
    /// Partial reload keys (comma-joined)
    pub const PARTIAL_DATA: &str = "Partial-Data";
    /// Component the partial reload applies to
    pub const PARTIAL_COMPONENT: &str = "Partial-Component";
}

/// Query parameter reflecting the focused overlay
pub const QUERY_PARAM: &str = "overlay";

/// Partial key that matches no prop ("fetch nothing")
pub const NOTHING_PARTIAL: &str = "__overlay_none__";

/// Separator used by the `Overlay-Stack` and `Partial-Data` headers
pub const LIST_SEPARATOR: char = ',';

/// Case-insensitive header map
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderMap(BTreeMap<String, String>);

impl HeaderMap {
    /// Create an empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a header
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Header value, if present
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Header value trimmed, treating blank values as absent
    #[must_use]
    pub fn get_non_empty(&self, name: &str) -> Option<&str> {
        self.get(name).map(str::trim).filter(|v| !v.is_empty())
    }

    /// Remove a header
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(&name.to_ascii_lowercase())
    }

    /// Whether a header is present
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    /// Iterate over (lowercased name, value) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of headers
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k.as_ref(), v);
        }
        map
    }
}

/// Overlay metadata block added to a page response
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayEnvelope {
    /// Overlay identifier
    pub id: OverlayId,
    /// Handler typename
    #[serde(rename = "type")]
    pub typename: String,
    /// Modal or drawer
    pub variant: Variant,
    /// Size on the scale
    pub size: Size,
    /// Ordered prop keys of the overlay
    pub props: Vec<String>,
    /// Server asks the client to close the overlay
    #[serde(default)]
    pub close_requested: bool,
    /// Deferred prop keys the client should fetch after opening
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deferred: Vec<String>,
}

/// A page payload as returned by the server
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    /// Host page component name
    pub component: String,
    /// Flat prop map; overlay props are namespaced by overlay id
    #[serde(default)]
    pub props: Map<String, Value>,
    /// URL of the response
    pub url: String,
    /// Asset version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Overlay envelope, if the response renders an overlay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay: Option<OverlayEnvelope>,
}

impl Page {
    /// Create a page without props
    pub fn new(component: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            props: Map::new(),
            url: url.into(),
            version: None,
            overlay: None,
        }
    }

    /// Add a prop
    #[must_use]
    pub fn with_prop(mut self, key: impl Into<String>, value: Value) -> Self {
        self.props.insert(key.into(), value);
        self
    }

    /// Props that belong to an overlay, with the namespace stripped
    #[must_use]
    pub fn overlay_props(&self, id: &OverlayId) -> Map<String, Value> {
        self.props
            .iter()
            .filter_map(|(k, v)| id.unscope(k).map(|key| (key.to_string(), v.clone())))
            .collect()
    }
}

/// Lifecycle transition a client navigation carries
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// The navigation opens this overlay
    Opening(OverlayId),
    /// The navigation closes this overlay
    Closing(OverlayId),
}

// ============================================================================
// URL helpers
// ============================================================================

const RELATIVE_BASE: &str = "http://relative.invalid";

/// Parse an absolute or root-relative URL, remembering which it was
fn parse_url(raw: &str) -> Option<(Url, bool)> {
    if let Ok(url) = Url::parse(raw) {
        return Some((url, false));
    }
    let base = Url::parse(RELATIVE_BASE).ok()?;
    base.join(raw).ok().map(|url| (url, true))
}

fn render_url(url: &Url, relative: bool) -> String {
    if relative {
        url[Position::BeforePath..].to_string()
    } else {
        url.to_string()
    }
}

/// Read a query parameter from a URL
#[must_use]
pub fn query_param(raw: &str, key: &str) -> Option<String> {
    let (url, _) = parse_url(raw)?;
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// Set (or with `None`, remove) a query parameter, keeping the others
///
/// The value is written verbatim; callers pass URL-safe values such as
/// overlay identifiers.
#[must_use]
pub fn with_query_param(raw: &str, key: &str, value: Option<&str>) -> String {
    let Some((mut url, relative)) = parse_url(raw) else {
        return raw.to_string();
    };

    let mut segments: Vec<String> = url
        .query()
        .unwrap_or_default()
        .split('&')
        .filter(|segment| !segment.is_empty())
        .filter(|segment| {
            form_urlencoded::parse(segment.as_bytes())
                .next()
                .map_or(true, |(k, _)| k != key)
        })
        .map(str::to_string)
        .collect();
    if let Some(value) = value {
        segments.push(format!("{key}={value}"));
    }

    if segments.is_empty() {
        url.set_query(None);
    } else {
        url.set_query(Some(&segments.join("&")));
    }
    render_url(&url, relative)
}

/// The overlay a URL points at, if it carries a well-formed `overlay` param
#[must_use]
pub fn overlay_in_url(raw: &str) -> Option<OverlayId> {
    query_param(raw, QUERY_PARAM).and_then(|v| OverlayId::parse(&v).ok())
}

/// URL with the `overlay` parameter pointing at `id`
#[must_use]
pub fn url_with_overlay(raw: &str, id: &OverlayId) -> String {
    with_query_param(raw, QUERY_PARAM, Some(id.as_str()))
}

/// URL with the `overlay` parameter removed
#[must_use]
pub fn url_without_overlay(raw: &str) -> String {
    with_query_param(raw, QUERY_PARAM, None)
}

/// Where the browser goes when the overlay at `index` closes
///
/// The root-most overlay (index 0) closes to the URL recorded before it
/// opened, with the `overlay` parameter removed. An overlay at `k > 0`
/// closes to the root URL focused on `stack[k - 1]`.
#[must_use]
pub fn resolve_close_url(
    stack: &[OverlayId],
    index: usize,
    previous_url: &str,
    root_url: &str,
) -> String {
    match index.checked_sub(1).and_then(|parent| stack.get(parent)) {
        Some(parent) => url_with_overlay(root_url, parent),
        None => url_without_overlay(previous_url),
    }
}

/// Join identifiers for the `Overlay-Stack` header
#[must_use]
pub fn join_stack(stack: &[OverlayId]) -> String {
    stack
        .iter()
        .map(OverlayId::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

/// Split a comma-joined header into trimmed, non-empty items
#[must_use]
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(LIST_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn id(name: &str) -> OverlayId {
        OverlayId::from_typename(name).unwrap()
    }

    #[test]
    fn test_headers_are_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert(headers::ID, "a");
        assert_eq!(headers.get("overlay-id"), Some("a"));
        assert_eq!(headers.get("OVERLAY-ID"), Some("a"));
        headers.insert("overlay-index", "  ");
        assert_eq!(headers.get_non_empty(headers::INDEX), None);
    }

    #[test]
    fn test_query_param_round_trip() {
        let url = "/users?page=2";
        let with = url_with_overlay(url, &id("profile-editor"));
        assert_eq!(with, "/users?page=2&overlay=profile-editor");
        assert_eq!(query_param(&with, "overlay").as_deref(), Some("profile-editor"));
        assert_eq!(url_without_overlay(&with), "/users?page=2");
        assert_eq!(url_without_overlay("/users?overlay=x"), "/users");
    }

    #[test]
    fn test_overlay_param_is_replaced_not_duplicated() {
        let url = "https://app.test/users?overlay=a&q=1#top";
        assert_eq!(
            url_with_overlay(url, &id("b")),
            "https://app.test/users?q=1&overlay=b#top"
        );
    }

    #[test]
    fn test_encoded_identifier_survives_url() {
        let target = OverlayId::parse("profile-editor:eyJpZCI6N30").unwrap();
        let url = url_with_overlay("/users", &target);
        assert_eq!(url, "/users?overlay=profile-editor:eyJpZCI6N30");
        assert_eq!(overlay_in_url(&url), Some(target));
    }

    #[test]
    fn test_close_url_resolution() {
        let stack = vec![id("a"), id("b"), id("c")];
        assert_eq!(
            resolve_close_url(&stack, 0, "/users?page=2&overlay=a", "/users?page=2"),
            "/users?page=2"
        );
        assert_eq!(
            resolve_close_url(&stack, 2, "/ignored", "/users?page=2"),
            "/users?page=2&overlay=b"
        );
        assert_eq!(
            resolve_close_url(&stack, 1, "/ignored", "/users"),
            "/users?overlay=a"
        );
    }

    #[test]
    fn test_envelope_wire_format() {
        let envelope = OverlayEnvelope {
            id: id("confirm"),
            typename: "confirm".into(),
            variant: Variant::Modal,
            size: Size::Md,
            props: vec!["title".into()],
            close_requested: false,
            deferred: Vec::new(),
        };
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({
                "id": "confirm",
                "type": "confirm",
                "variant": "modal",
                "size": "md",
                "props": ["title"],
                "closeRequested": false,
            })
        );
    }

    #[test]
    fn test_page_overlay_props() {
        let target = id("confirm");
        let page = Page::new("Users/Index", "/users")
            .with_prop("users", json!([]))
            .with_prop(target.scoped_key("title"), json!("Sure?"));
        assert_eq!(
            Value::Object(page.overlay_props(&target)),
            json!({"title": "Sure?"})
        );
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(" a, ,b ,"), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(join_stack(&[id("a"), id("b")]), "a,b");
    }
}
