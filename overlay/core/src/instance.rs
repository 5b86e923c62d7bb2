//! Overlay Instance Types
//!
//! Per-overlay lifecycle state kept by the client runtime.
//!
//! ```text
//!   closed ──open()──▶ opening ──ok──▶ open ──close()──▶ closing ──ok──▶ closed
//!     ▲                   │                                 │
//!     └───────err─────────┘               open ◀────err─────┘
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identity::OverlayId;

/// Lifecycle status of an overlay
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayStatus {
    /// Not shown (initial and terminal state)
    #[default]
    Closed,
    /// Open requested, waiting for the server
    Opening,
    /// Shown
    Open,
    /// Close requested, waiting for the server and the minimum duration
    Closing,
}

impl OverlayStatus {
    /// Whether an overlay with this status belongs in the stack
    #[must_use]
    pub fn is_stacked(&self) -> bool {
        !matches!(self, Self::Closed)
    }

    /// Lowercase label
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::Open => "open",
            Self::Closing => "closing",
        }
    }
}

impl std::fmt::Display for OverlayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Presentation variant
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Centered dialog
    #[default]
    Modal,
    /// Edge-anchored panel
    Drawer,
}

/// Presentation size scale
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Size {
    /// Small
    #[serde(rename = "sm")]
    Sm,
    /// Medium
    #[serde(rename = "md")]
    Md,
    /// Large
    #[default]
    #[serde(rename = "lg")]
    Lg,
    /// Extra large
    #[serde(rename = "xl")]
    Xl,
    /// 2x extra large
    #[serde(rename = "2xl")]
    TwoXl,
    /// 3x extra large
    #[serde(rename = "3xl")]
    ThreeXl,
    /// 4x extra large
    #[serde(rename = "4xl")]
    FourXl,
    /// 5x extra large
    #[serde(rename = "5xl")]
    FiveXl,
    /// Fills the viewport
    #[serde(rename = "full")]
    Full,
}

/// Overlay presentation config plus the prop keys it declared
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayConfig {
    /// Modal or drawer
    pub variant: Variant,
    /// Size on the scale
    pub size: Size,
    /// Ordered prop keys the handler declared
    #[serde(default)]
    pub declared_prop_keys: Vec<String>,
}

impl OverlayConfig {
    /// Create a config with no declared props
    #[must_use]
    pub fn new(variant: Variant, size: Size) -> Self {
        Self {
            variant,
            size,
            declared_prop_keys: Vec::new(),
        }
    }
}

/// Client-side state of one overlay
#[derive(Clone, Debug, PartialEq)]
pub struct OverlayInstance {
    /// Identifier
    pub id: OverlayId,
    /// Lifecycle status
    pub status: OverlayStatus,
    /// Last config received from the server
    pub config: OverlayConfig,
    /// Last props received from the server (unscoped keys)
    pub props: Map<String, Value>,
    /// Whether this overlay is the top of the stack
    pub focused: bool,
    /// Overlay that was focused when this one opened
    pub parent_id: Option<OverlayId>,
    /// Browser URL before this overlay opened
    pub previous_url: String,
    /// Keep the instance after it closes
    pub persist: bool,
    /// A server close request was already acted on
    pub close_requested_seen: bool,
    /// A server close request is waiting for the overlay to be open
    pub pending_close: bool,
}

impl OverlayInstance {
    /// Create a closed instance
    #[must_use]
    pub fn new(id: OverlayId, previous_url: impl Into<String>) -> Self {
        Self {
            id,
            status: OverlayStatus::Closed,
            config: OverlayConfig::default(),
            props: Map::new(),
            focused: false,
            parent_id: None,
            previous_url: previous_url.into(),
            persist: false,
            close_requested_seen: false,
            pending_close: false,
        }
    }

    /// Whether the status is one of the given statuses
    #[must_use]
    pub fn has_status(&self, statuses: &[OverlayStatus]) -> bool {
        statuses.contains(&self.status)
    }

    /// Merge props into the cached set; keys not present are kept
    pub fn merge_props(&mut self, props: Map<String, Value>) {
        for (key, value) in props {
            self.props.insert(key, value);
        }
    }
}

/// Published when an overlay changes status or focus
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusChange {
    /// Lifecycle status changed
    Status {
        /// Overlay
        id: OverlayId,
        /// Previous status
        from: OverlayStatus,
        /// New status
        to: OverlayStatus,
    },
    /// Overlay became the top of the stack
    Focused {
        /// Overlay
        id: OverlayId,
    },
    /// Overlay stopped being the top of the stack
    Blurred {
        /// Overlay
        id: OverlayId,
    },
}

impl StatusChange {
    /// The overlay this change concerns
    #[must_use]
    pub fn id(&self) -> &OverlayId {
        match self {
            Self::Status { id, .. } | Self::Focused { id } | Self::Blurred { id } => id,
        }
    }
}
