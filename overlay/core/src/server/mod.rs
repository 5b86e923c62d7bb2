//! Server Side
//!
//! Turns an incoming request plus the host page into the response the
//! client expects.
//!
//! # Architecture
//!
//! ```text
//!   OverlayRequest
//!        │ OverlayContext::from_request
//!        ▼
//!   OverlayContext ──(closing id)──▶ SessionStore::evict
//!        │ no target: host page unchanged
//!        ▼
//!   InterceptorChain ──▶ HandlerRegistry::build ──▶ action? ──▶ props()
//!                                                                  │
//!        ┌──────────────── Props::resolve (cache from session) ◀───┘
//!        ▼
//!   SessionStore::put ──▶ ResponseAssembler::assemble ──▶ Page
//! ```

pub mod assembler;
pub mod context;
pub mod handler;
pub mod interceptor;
pub mod props;
pub mod session;

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::config::ServerConfig;
use crate::identity::OverlayId;
use crate::protocol::Page;

pub use assembler::{RenderedOverlay, ResponseAssembler};
pub use context::{OverlayContext, OverlayRequest, PartialReload, Phase};
pub use handler::{
    ActionMap, ActionOutcome, HandlerError, HandlerRegistry, OverlayHandler, RegistryError,
};
pub use interceptor::{Interceptor, InterceptorChain, Next};
pub use props::{PropEntry, PropValue, Props, ResolvedProps, Selection};
pub use session::{InMemorySessionStore, SessionEntry, SessionStore};

/// Errors surfaced while handling an overlay request
#[derive(Debug, Error)]
pub enum ServerError {
    /// No handler is registered for the overlay's typename
    #[error("no overlay handler registered for type {typename}")]
    HandlerNotRegistered {
        /// Requested typename
        typename: String,
    },

    /// The handler has no action with this name
    #[error("overlay type {typename} has no action {action}")]
    ActionNotFound {
        /// Overlay typename
        typename: String,
        /// Requested action
        action: String,
    },

    /// The handler failed
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// An interceptor refused the request
    #[error("request denied: {reason}")]
    Denied {
        /// Why the request was refused
        reason: String,
    },
}

impl ServerError {
    /// HTTP status to answer with
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::HandlerNotRegistered { .. }
            | Self::ActionNotFound { .. }
            | Self::Handler(HandlerError::InvalidArguments(_)) => 404,
            Self::Handler(HandlerError::Failed(_)) => 500,
            Self::Denied { .. } => 403,
        }
    }
}

/// Server-side overlay protocol endpoint
pub struct OverlayServer {
    /// Typename to handler lookup
    registry: HandlerRegistry,
    /// Per-overlay render cache
    sessions: Arc<dyn SessionStore>,
    /// Wraps rendering
    interceptors: InterceptorChain,
    /// Builds the response
    assembler: ResponseAssembler,
}

impl OverlayServer {
    /// Create a server with its own in-memory session store
    #[must_use]
    pub fn new(registry: HandlerRegistry, config: &ServerConfig) -> Self {
        Self::with_sessions(registry, Arc::new(InMemorySessionStore::from_config(config)))
    }

    /// Create a server on top of a session store
    #[must_use]
    pub fn with_sessions(registry: HandlerRegistry, sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            registry,
            sessions,
            interceptors: InterceptorChain::new(),
            assembler: ResponseAssembler::new(),
        }
    }

    /// Append an interceptor around overlay rendering
    #[must_use]
    pub fn with_interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// The session store
    #[must_use]
    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    /// Handle a request rendered on top of `page`
    ///
    /// Requests without an overlay target return the page unchanged (after
    /// applying any close effect they carry).
    ///
    /// # Errors
    ///
    /// Returns a [`ServerError`]; see [`ServerError::status`] for the
    /// matching HTTP status.
    pub fn handle(&self, request: &OverlayRequest, page: Page) -> Result<Page, ServerError> {
        let ctx = OverlayContext::from_request(request);

        if let Some(closing) = &ctx.closing_id {
            self.sessions.evict(closing);
        }
        if !ctx.is_overlay_request() {
            return Ok(page);
        }

        self.interceptors.run(&ctx, |ctx| self.render(ctx, page))
    }

    fn render(&self, ctx: &OverlayContext, page: Page) -> Result<Page, ServerError> {
        let (Some(target), Some(typename)) = (&ctx.target, &ctx.typename) else {
            return Ok(page);
        };

        let handler = self
            .registry
            .build(typename, &ctx.args)
            .ok_or_else(|| ServerError::HandlerNotRegistered {
                typename: typename.clone(),
            })??;

        let outcome = match &ctx.action {
            Some(action) => {
                let payload = ctx.body.clone().unwrap_or(Value::Null);
                let outcome = handler
                    .actions()
                    .run(action, ctx, &payload)
                    .ok_or_else(|| ServerError::ActionNotFound {
                        typename: typename.clone(),
                        action: action.clone(),
                    })??;
                tracing::info!(overlay_id = %target, action = %action, "Ran overlay action");
                outcome
            }
            None => ActionOutcome::default(),
        };

        let mut config = handler.config(ctx);
        let mut props = handler.props(ctx)?;
        for key in &outcome.refresh {
            props.refresh(key.clone());
        }
        let close_requested = outcome.close_requested || props.close_requested();

        let cache = match ctx.phase {
            Phase::Opening => None,
            Phase::Active | Phase::Closing => self.sessions.get(target),
        };
        let requested = ctx.requested_keys();
        let selection = self.select(ctx, target, cache.is_some(), requested.as_deref());
        let resolved = props.resolve(selection, cache.as_ref().map(|entry| &entry.props));

        config.declared_prop_keys = resolved.keys;
        self.sessions.put(
            target,
            SessionEntry {
                component: page.component.clone(),
                config: config.clone(),
                props: resolved.persisted,
            },
        );

        tracing::debug!(
            overlay_id = %target,
            phase = ?ctx.phase,
            included = resolved.included.len(),
            close_requested = close_requested,
            "Rendered overlay"
        );

        Ok(self.assembler.assemble(
            page,
            RenderedOverlay {
                id: target.clone(),
                config,
                props: resolved.included,
                close_requested,
                deferred: resolved.deferred,
            },
        ))
    }

    fn select<'a>(
        &self,
        ctx: &OverlayContext,
        target: &OverlayId,
        cached: bool,
        requested: Option<&'a [String]>,
    ) -> Selection<'a> {
        if ctx.phase == Phase::Opening {
            return Selection::Opening;
        }
        if !cached {
            tracing::debug!(overlay_id = %target, "No cached session, rendering as opening");
            return Selection::Opening;
        }
        if !ctx.client_has_target() {
            return Selection::Everything;
        }
        match requested {
            Some(keys) => Selection::Partial(keys),
            None => Selection::Everything,
        }
    }
}

impl std::fmt::Debug for OverlayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayServer")
            .field("registry", &self.registry)
            .field("interceptors", &self.interceptors)
            .finish()
    }
}
