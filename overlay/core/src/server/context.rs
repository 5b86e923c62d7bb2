//! Server Overlay Context
//!
//! Rebuilds, from one incoming request, which overlay is being rendered and
//! in which lifecycle phase.
//!
//! # Phases
//!
//! ```text
//!   Overlay-Closing-Id present                 ──▶ Closing  (parent refocus)
//!   Overlay-Opening-Id == ?overlay             ──▶ Opening
//!   ?overlay without the protocol headers      ──▶ Opening  (cold load)
//!   anything else                              ──▶ Active
//! ```
//!
//! Parsing never fails. Protocol headers that cannot be read are dropped
//! with a warning and the request is handled as if it came from a client
//! that does not speak the protocol.

use serde::Serialize;
use serde_json::Value;

use crate::client::{Method, Visit};
use crate::identity::{OverlayArgs, OverlayId};
use crate::protocol::{
    headers, query_param, resolve_close_url, split_list, url_without_overlay, HeaderMap,
    QUERY_PARAM,
};

/// An incoming request as the server sees it
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OverlayRequest {
    /// Request URL (absolute or root-relative)
    pub url: String,
    /// HTTP method
    pub method: Method,
    /// Request headers
    pub headers: HeaderMap,
    /// JSON body
    pub body: Option<Value>,
}

impl OverlayRequest {
    /// A GET request without headers
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Add a header
    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// The request a client visit puts on the wire
    #[must_use]
    pub fn from_visit(visit: &Visit) -> Self {
        let page_component = visit
            .headers
            .get(headers::PAGE_COMPONENT)
            .unwrap_or_default();
        Self {
            url: visit.url.clone(),
            method: visit.method,
            headers: visit.wire_headers(page_component),
            body: visit.data.clone(),
        }
    }
}

/// Lifecycle phase of an overlay request
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// The overlay is being opened (or loaded cold from a URL)
    Opening,
    /// An overlay is being closed; the target, if any, is its parent
    Closing,
    /// Refresh, refocus, action, or an ordinary request
    #[default]
    Active,
}

/// Ordinary partial reload set
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialReload {
    /// Component the reload applies to
    pub component: Option<String>,
    /// Requested keys, in request order
    pub keys: Vec<String>,
}

/// Overlay-related facts about one request
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayContext {
    /// Request URL
    pub url: String,
    /// Overlay to render (the `overlay` query parameter)
    pub target: Option<OverlayId>,
    /// Typename of the target
    pub typename: Option<String>,
    /// Decoded arguments of the target
    pub args: OverlayArgs,
    /// Lifecycle phase
    pub phase: Phase,
    /// Whether the client sent readable protocol headers
    pub protocol: bool,
    /// Overlay focused on the client when the request left
    pub focused_id: Option<OverlayId>,
    /// Its position in the client stack
    pub index: Option<usize>,
    /// Client stack, bottom first
    pub stack: Vec<OverlayId>,
    /// URL beneath all overlays
    pub root_url: Option<String>,
    /// URL to restore when the root-most overlay closes
    pub previous_url: Option<String>,
    /// Host page component
    pub page_component: Option<String>,
    /// Overlay being closed by this request
    pub closing_id: Option<OverlayId>,
    /// Partial reload set, if any
    pub partial: Option<PartialReload>,
    /// Server action to run
    pub action: Option<String>,
    /// Action payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Protocol headers that parsed cleanly
struct ProtocolHeaders {
    focused_id: OverlayId,
    index: Option<usize>,
    stack: Vec<OverlayId>,
    opening_id: Option<OverlayId>,
    closing_id: Option<OverlayId>,
}

fn parse_protocol(headers: &HeaderMap) -> Result<Option<ProtocolHeaders>, String> {
    let marked = headers
        .get_non_empty(headers::PROTOCOL)
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));
    if !marked {
        return Ok(None);
    }

    let parse_id = |name: &str| -> Result<Option<OverlayId>, String> {
        headers
            .get_non_empty(name)
            .map(|raw| OverlayId::parse(raw).map_err(|e| format!("{name}: {e}")))
            .transpose()
    };

    let focused_id = parse_id(headers::ID)?.ok_or_else(|| format!("{} missing", headers::ID))?;
    let index = headers
        .get_non_empty(headers::INDEX)
        .map(|raw| {
            raw.parse::<usize>()
                .map_err(|e| format!("{}: {e}", headers::INDEX))
        })
        .transpose()?;
    let stack = headers
        .get(headers::STACK)
        .map(split_list)
        .unwrap_or_default()
        .iter()
        .map(|raw| OverlayId::parse(raw).map_err(|e| format!("{}: {e}", headers::STACK)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(ProtocolHeaders {
        focused_id,
        index,
        stack,
        opening_id: parse_id(headers::OPENING_ID)?,
        closing_id: parse_id(headers::CLOSING_ID)?,
    }))
}

impl OverlayContext {
    /// Read the overlay context of a request
    #[must_use]
    pub fn from_request(request: &OverlayRequest) -> Self {
        let headers = &request.headers;

        let target = query_param(&request.url, QUERY_PARAM).and_then(|raw| {
            OverlayId::parse(&raw)
                .map_err(|e| {
                    tracing::warn!(overlay_id = %raw, error = %e, "Ignoring malformed overlay parameter");
                })
                .ok()
        });
        let identity = target.as_ref().and_then(|id| id.identity().ok());

        let protocol = parse_protocol(headers).unwrap_or_else(|reason| {
            tracing::warn!(reason = %reason, url = %request.url, "Ignoring malformed overlay headers");
            None
        });

        let phase = match (&protocol, &target) {
            (Some(p), _) if p.closing_id.is_some() => Phase::Closing,
            (Some(p), Some(target)) if p.opening_id.as_ref() == Some(target) => Phase::Opening,
            (None, Some(_)) => Phase::Opening,
            _ => Phase::Active,
        };

        let partial = headers.get(headers::PARTIAL_DATA).map(|raw| PartialReload {
            component: headers
                .get_non_empty(headers::PARTIAL_COMPONENT)
                .map(str::to_string),
            keys: split_list(raw),
        });

        let text = |name: &str| headers.get_non_empty(name).map(str::to_string);
        let is_protocol = protocol.is_some();
        let (root_url, previous_url, page_component) = if is_protocol {
            (
                text(headers::ROOT_URL),
                text(headers::PREVIOUS_URL),
                text(headers::PAGE_COMPONENT),
            )
        } else {
            (None, None, None)
        };

        let ctx = Self {
            url: request.url.clone(),
            typename: identity.as_ref().map(|i| i.typename.clone()),
            args: identity.map(|i| i.args).unwrap_or_default(),
            target,
            phase,
            protocol: is_protocol,
            focused_id: protocol.as_ref().map(|p| p.focused_id.clone()),
            index: protocol.as_ref().and_then(|p| p.index),
            stack: protocol.as_ref().map(|p| p.stack.clone()).unwrap_or_default(),
            root_url,
            previous_url,
            page_component,
            closing_id: protocol.and_then(|p| p.closing_id),
            partial,
            action: text(headers::ACTION),
            body: request.body.clone(),
        };

        tracing::debug!(
            url = %ctx.url,
            target = ?ctx.target.as_ref().map(OverlayId::as_str),
            phase = ?ctx.phase,
            protocol = ctx.protocol,
            "Parsed overlay context"
        );
        ctx
    }

    /// Whether the request renders an overlay
    #[must_use]
    pub fn is_overlay_request(&self) -> bool {
        self.target.is_some()
    }

    /// Whether the client's stack already holds the target
    #[must_use]
    pub fn client_has_target(&self) -> bool {
        self.target
            .as_ref()
            .is_some_and(|target| self.stack.contains(target))
    }

    /// Partial keys requested for the target, with any namespace removed
    #[must_use]
    pub fn requested_keys(&self) -> Option<Vec<String>> {
        let partial = self.partial.as_ref()?;
        Some(
            partial
                .keys
                .iter()
                .map(|key| {
                    self.target
                        .as_ref()
                        .and_then(|target| target.unscope(key))
                        .unwrap_or(key)
                        .to_string()
                })
                .collect(),
        )
    }

    /// Where the client goes when the focused overlay closes
    ///
    /// `None` outside an overlay context.
    #[must_use]
    pub fn close_url(&self) -> Option<String> {
        let id = self.focused_id.as_ref().or(self.target.as_ref())?;
        let root_url = self
            .root_url
            .clone()
            .unwrap_or_else(|| url_without_overlay(&self.url));
        let previous_url = self.previous_url.as_deref().unwrap_or(&root_url);

        Some(match self.stack.iter().position(|i| i == id) {
            Some(index) => resolve_close_url(&self.stack, index, previous_url, &root_url),
            None => url_without_overlay(previous_url),
        })
    }
}
