//! Request Interceptors
//!
//! An ordered list of interceptors wraps overlay rendering. Each one gets
//! the request's [`OverlayContext`] and a [`Next`] continuation; it may
//! refuse the request, pass it on, or adjust the page that comes back.
//!
//! ```text
//!   chain: [auth, audit]
//!
//!   auth.intercept(ctx, next) ──▶ audit.intercept(ctx, next) ──▶ render(ctx)
//! ```

use std::fmt;
use std::sync::Arc;

use crate::protocol::Page;

use super::context::OverlayContext;
use super::ServerError;

type Terminal<'a> = Box<dyn FnOnce(&OverlayContext) -> Result<Page, ServerError> + 'a>;

/// The rest of the chain
pub struct Next<'a> {
    remaining: &'a [Arc<dyn Interceptor>],
    terminal: Terminal<'a>,
}

impl<'a> Next<'a> {
    /// Continue with the next interceptor, or render when none is left
    ///
    /// # Errors
    ///
    /// Whatever the remaining interceptors or the renderer return.
    pub fn run(self, ctx: &OverlayContext) -> Result<Page, ServerError> {
        match self.remaining.split_first() {
            Some((first, rest)) => first.intercept(
                ctx,
                Next {
                    remaining: rest,
                    terminal: self.terminal,
                },
            ),
            None => (self.terminal)(ctx),
        }
    }
}

/// Wraps overlay rendering
pub trait Interceptor: Send + Sync {
    /// Handle a request; call `next.run(ctx)` to continue
    ///
    /// # Errors
    ///
    /// Return [`ServerError::Denied`] to refuse the request.
    fn intercept(&self, ctx: &OverlayContext, next: Next<'_>) -> Result<Page, ServerError>;
}

impl<F> Interceptor for F
where
    F: Fn(&OverlayContext, Next<'_>) -> Result<Page, ServerError> + Send + Sync,
{
    fn intercept(&self, ctx: &OverlayContext, next: Next<'_>) -> Result<Page, ServerError> {
        self(ctx, next)
    }
}

/// Ordered interceptor list, applied first to last
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    /// Create an empty chain
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interceptor
    pub fn push(&mut self, interceptor: impl Interceptor + 'static) {
        self.interceptors.push(Arc::new(interceptor));
    }

    /// Number of interceptors
    #[must_use]
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Whether the chain is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Run the chain around `render`
    ///
    /// # Errors
    ///
    /// Whatever an interceptor or `render` returns.
    pub fn run<'a, F>(&'a self, ctx: &OverlayContext, render: F) -> Result<Page, ServerError>
    where
        F: FnOnce(&OverlayContext) -> Result<Page, ServerError> + 'a,
    {
        Next {
            remaining: &self.interceptors,
            terminal: Box::new(render),
        }
        .run(ctx)
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("len", &self.interceptors.len())
            .finish()
    }
}
