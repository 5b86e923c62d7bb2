//! Client Side
//!
//! The runtime that owns overlay instances in one page session, the hooks it
//! wraps around every navigation, and the transport abstraction it drives.

pub mod interceptor;
pub mod navigator;
pub mod runtime;
mod state;

use thiserror::Error;

use crate::identity::{IdentityError, OverlayId};

pub use interceptor::{InterceptorContext, NavigationInterceptor};
pub use navigator::{Method, NavigationError, Navigator, Visit};
pub use runtime::{OpenOptions, OpenTarget, OverlayHandle, OverlayRuntime};

/// Errors surfaced by client operations
#[derive(Debug, Error)]
pub enum OverlayError {
    /// The navigation failed; the overlay was reverted
    #[error("navigation failed: {0}")]
    NavigationFailed(#[from] NavigationError),

    /// The response did not render the overlay that was opened
    #[error("server did not render overlay {id}")]
    Rejected {
        /// Overlay that was being opened
        id: OverlayId,
    },

    /// The overlay identifier could not be decoded
    #[error("malformed overlay identifier: {0}")]
    MalformedIdentifier(#[from] IdentityError),

    /// Opening another overlay would exceed the configured depth
    #[error("overlay stack is full (max {max})")]
    StackFull {
        /// Configured maximum depth
        max: usize,
    },
}
