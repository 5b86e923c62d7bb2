//! Response Assembler
//!
//! Folds a rendered overlay into the host page: every overlay prop is
//! namespaced with the overlay id before it joins the flat prop map, and
//! the `overlay` envelope describes the overlay to the client.

use serde_json::{Map, Value};

use crate::identity::OverlayId;
use crate::instance::OverlayConfig;
use crate::protocol::{OverlayEnvelope, Page};

/// Result of rendering one overlay
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedOverlay {
    /// Overlay identifier
    pub id: OverlayId,
    /// Config, including the declared prop keys
    pub config: OverlayConfig,
    /// Props sent with this response (unscoped keys)
    pub props: Map<String, Value>,
    /// Ask the client to close the overlay
    pub close_requested: bool,
    /// Deferred keys for the client to fetch
    pub deferred: Vec<String>,
}

/// Merges host page and overlay into one response
#[derive(Clone, Copy, Debug, Default)]
pub struct ResponseAssembler;

impl ResponseAssembler {
    /// Create an assembler
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Add an overlay to a page
    #[must_use]
    pub fn assemble(&self, mut page: Page, overlay: RenderedOverlay) -> Page {
        let RenderedOverlay {
            id,
            config,
            props,
            close_requested,
            deferred,
        } = overlay;

        // Drop anything the host page put under this overlay's namespace
        page.props.retain(|key, _| id.unscope(key).is_none());
        for (key, value) in props {
            page.props.insert(id.scoped_key(&key), value);
        }

        page.overlay = Some(OverlayEnvelope {
            typename: id.typename().to_string(),
            variant: config.variant,
            size: config.size,
            props: config.declared_prop_keys,
            close_requested,
            deferred,
            id,
        });
        page
    }
}
