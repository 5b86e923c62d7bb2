//! Overlay Runtime
//!
//! The client-side owner of every overlay instance for one page session.
//!
//! # Design Philosophy
//!
//! The runtime is one explicit context object, created at startup and
//! cloned into whatever needs it. There are no globals: two runtimes in the
//! same process (or the same test binary) never see each other.
//!
//! # Architecture
//!
//! ```text
//!   open()/close()/visit()
//!          │
//!          ▼
//!   ┌──────────────┐  before   ┌─────────────┐  navigate  ┌───────────┐
//!   │ ClientState  │ ────────▶ │ Interceptor │ ─────────▶ │ Navigator │
//!   │ (instances)  │ ◀──────── │             │ ◀───────── │           │
//!   └──────────────┘  after    └─────────────┘    Page    └───────────┘
//!          │
//!          ├──▶ OverlayRegistrar (stack)  ──▶ Focused / Blurred
//!          └──▶ EventChannel<StatusChange>
//! ```
//!
//! # Locking
//!
//! State lives behind a mutex that is never held across an `.await`, nor
//! while listeners run. Every operation collects its [`StatusChange`]s
//! under the lock and publishes them after releasing it. After each
//! suspension point the operation re-reads the overlay's status and drops
//! its effect if another operation moved the overlay on in the meantime.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::config::ClientConfig;
use crate::events::{EventChannel, ListenerId};
use crate::identity::{OverlayArgs, OverlayId, OverlayIdentity};
use crate::instance::{OverlayConfig, OverlayInstance, OverlayStatus, StatusChange};
use crate::protocol::{
    query_param, resolve_close_url, url_with_overlay, url_without_overlay, Lifecycle, Page,
    QUERY_PARAM,
};
use crate::stack::{OverlayRegistrar, StackSnapshot};

use super::interceptor::{InterceptorContext, NavigationInterceptor, Reconciled};
use super::navigator::{NavigationError, Navigator, Visit};
use super::state::ClientState;
use super::OverlayError;

// ============================================================================
// Open parameters
// ============================================================================

/// What to open: an identifier, an identity, or a raw identifier string
#[derive(Clone, Debug, PartialEq)]
pub enum OpenTarget {
    /// A canonical identifier
    Id(OverlayId),
    /// Typename plus arguments
    Identity(OverlayIdentity),
    /// An identifier (or bare typename) that still has to be parsed
    Raw(String),
}

impl OpenTarget {
    fn resolve(self) -> Result<OverlayId, OverlayError> {
        Ok(match self {
            Self::Id(id) => id,
            Self::Identity(identity) => identity.to_id()?,
            Self::Raw(raw) => OverlayId::parse(&raw)?,
        })
    }
}

impl From<OverlayId> for OpenTarget {
    fn from(id: OverlayId) -> Self {
        Self::Id(id)
    }
}

impl From<&OverlayId> for OpenTarget {
    fn from(id: &OverlayId) -> Self {
        Self::Id(id.clone())
    }
}

impl From<OverlayIdentity> for OpenTarget {
    fn from(identity: OverlayIdentity) -> Self {
        Self::Identity(identity)
    }
}

impl From<&str> for OpenTarget {
    fn from(raw: &str) -> Self {
        Self::Raw(raw.to_string())
    }
}

impl From<String> for OpenTarget {
    fn from(raw: String) -> Self {
        Self::Raw(raw)
    }
}

impl From<(&str, OverlayArgs)> for OpenTarget {
    fn from((typename, args): (&str, OverlayArgs)) -> Self {
        Self::Identity(OverlayIdentity::with_args(typename, args))
    }
}

/// Options for [`OverlayRuntime::open`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// Keep the instance, with its cached props, after it closes
    pub persist: bool,
}

// ============================================================================
// Runtime
// ============================================================================

/// Stack listener priority of the instance focus flags
const FOCUS_SYNC_PRIORITY: i32 = 100;

struct RuntimeInner {
    /// Page-transition transport
    navigator: Arc<dyn Navigator>,
    /// Client settings
    config: ClientConfig,
    /// Header and reconciliation hooks
    interceptor: NavigationInterceptor,
    /// Stack of open overlays
    registrar: OverlayRegistrar,
    /// Instances, host page, root URL
    state: Mutex<ClientState>,
    /// Status and focus changes
    changes: EventChannel<StatusChange>,
}

/// Client-side overlay coordinator
///
/// Cloning yields another handle to the same runtime.
#[derive(Clone)]
pub struct OverlayRuntime {
    inner: Arc<RuntimeInner>,
}

impl OverlayRuntime {
    /// Create a runtime on top of a navigator
    pub fn new(navigator: Arc<dyn Navigator>, config: ClientConfig) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<RuntimeInner>| {
            let registrar = OverlayRegistrar::new();
            let changes = EventChannel::new();

            // Instance focus flags follow the stack before anyone hears of it
            let weak = weak.clone();
            registrar.on_change_with_priority(FOCUS_SYNC_PRIORITY, move |snapshot: &StackSnapshot| {
                if let Some(inner) = weak.upgrade() {
                    inner.state.lock().set_focus(snapshot.focused());
                }
            });

            let focus_changes = changes.clone();
            let last_focused: Mutex<Option<OverlayId>> = Mutex::new(None);
            registrar.on_change(move |snapshot: &StackSnapshot| {
                let focused = snapshot.focused().cloned();
                let previous = std::mem::replace(&mut *last_focused.lock(), focused.clone());
                if previous == focused {
                    return;
                }
                if let Some(id) = previous {
                    focus_changes.emit(&StatusChange::Blurred { id });
                }
                if let Some(id) = focused {
                    focus_changes.emit(&StatusChange::Focused { id });
                }
            });

            RuntimeInner {
                navigator,
                config,
                interceptor: NavigationInterceptor::new(),
                registrar,
                state: Mutex::new(ClientState::new(Page::default())),
                changes,
            }
        });

        Self { inner }
    }

    /// Apply the initial page of the session
    ///
    /// An overlay envelope in the page creates an open instance. A URL
    /// naming an overlay without an envelope opens that overlay.
    ///
    /// # Errors
    ///
    /// Returns an error if the auto-open navigation fails.
    pub async fn boot(&self, page: Page) -> Result<(), OverlayError> {
        let reconciled = {
            let mut state = self.inner.state.lock();
            state.page = Page::new(page.component.clone(), url_without_overlay(&page.url));
            let stack = self.inner.registrar.snapshot();
            self.inner
                .interceptor
                .after(&mut state, &stack, &Visit::get(page.url.clone()), &page)
        };
        self.apply(reconciled);
        tracing::info!(url = %page.url, component = %page.component, "Booted overlay runtime");

        if page.overlay.is_none() {
            if let Some(raw) = query_param(&page.url, QUERY_PARAM) {
                match OverlayId::parse(&raw) {
                    Ok(id) => {
                        self.inner.state.lock().page.url = url_without_overlay(&page.url);
                        self.open(id, OpenOptions::default()).await?;
                    }
                    Err(e) => {
                        tracing::warn!(overlay_id = %raw, error = %e, "Ignoring malformed overlay in URL");
                    }
                }
            }
        }

        self.flush_pending_closes().await;
        Ok(())
    }

    /// Open an overlay on top of the stack
    ///
    /// A no-op returning the existing handle when the overlay is not closed.
    ///
    /// # Errors
    ///
    /// - [`OverlayError::MalformedIdentifier`] for an unparsable target
    /// - [`OverlayError::StackFull`] when the stack is at its maximum depth
    /// - [`OverlayError::NavigationFailed`] when the request fails; the
    ///   overlay is closed again
    /// - [`OverlayError::Rejected`] when the response does not render it
    pub async fn open(
        &self,
        target: impl Into<OpenTarget>,
        options: OpenOptions,
    ) -> Result<OverlayHandle, OverlayError> {
        let id = target.into().resolve()?;

        let mut events = Vec::new();
        let url = {
            let mut state = self.inner.state.lock();
            if state.status(&id) != OverlayStatus::Closed {
                tracing::debug!(overlay_id = %id, status = %state.status(&id), "Open ignored");
                return Ok(self.handle(id));
            }

            let max = self.inner.config.max_stack_depth;
            if self.inner.registrar.size() >= max {
                tracing::warn!(overlay_id = %id, max = max, "Overlay stack is full");
                return Err(OverlayError::StackFull { max });
            }

            let previous_url = state.page.url.clone();
            let root_url = state
                .root_url
                .clone()
                .unwrap_or_else(|| url_without_overlay(&previous_url));
            let parent_id = self.inner.registrar.focused_id();

            let instance = state
                .instances
                .entry(id.clone())
                .or_insert_with(|| OverlayInstance::new(id.clone(), previous_url.clone()));
            instance.previous_url = previous_url;
            instance.parent_id = parent_id;
            instance.persist = options.persist;
            instance.close_requested_seen = false;
            instance.pending_close = false;
            state.transition(&id, OverlayStatus::Opening, &mut events);

            url_with_overlay(&root_url, &id)
        };
        self.publish(&events);
        self.inner.registrar.register(id.clone());
        tracing::info!(overlay_id = %id, url = %url, "Opening overlay");

        let visit = Visit::get(url).lifecycle(Lifecycle::Opening(id.clone()));
        match self.dispatch(visit).await {
            Ok(page) => {
                let mut events = Vec::new();
                let rendered = page.overlay.as_ref().filter(|envelope| envelope.id == id);
                let (outcome, deferred) = {
                    let mut state = self.inner.state.lock();
                    if state.status(&id) != OverlayStatus::Opening {
                        (None, Vec::new())
                    } else if let Some(envelope) = rendered {
                        state.transition(&id, OverlayStatus::Open, &mut events);
                        (Some(true), envelope.deferred.clone())
                    } else {
                        state.finish(&id, &mut events);
                        (Some(false), Vec::new())
                    }
                };
                self.publish(&events);

                match outcome {
                    None => {
                        tracing::warn!(overlay_id = %id, "Discarding stale open response");
                        return Ok(self.handle(id));
                    }
                    Some(false) => {
                        self.inner.registrar.unregister(&id);
                        tracing::warn!(overlay_id = %id, "Response did not render the overlay");
                        return Err(OverlayError::Rejected { id });
                    }
                    Some(true) => tracing::info!(overlay_id = %id, "Overlay opened"),
                }

                if !deferred.is_empty() {
                    if let Err(e) = self.reload(&id, deferred).await {
                        tracing::warn!(overlay_id = %id, error = %e, "Deferred props reload failed");
                    }
                }
                self.flush_pending_closes().await;
                Ok(self.handle(id))
            }
            Err(e) => {
                let mut events = Vec::new();
                let reverted = {
                    let mut state = self.inner.state.lock();
                    state.status(&id) == OverlayStatus::Opening && state.finish(&id, &mut events)
                };
                self.publish(&events);
                if reverted {
                    self.inner.registrar.unregister(&id);
                }
                tracing::warn!(overlay_id = %id, error = %e, "Failed to open overlay");
                Err(e.into())
            }
        }
    }

    /// Close an overlay
    ///
    /// A no-op unless the overlay is open. The focused overlay navigates to
    /// its close URL and stays `Closing` for at least the configured
    /// minimum duration. A background overlay closes locally after one
    /// scheduling tick.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::NavigationFailed`] if the close navigation
    /// fails; the overlay is open again.
    pub async fn close(&self, id: &OverlayId) -> Result<(), OverlayError> {
        let stack = self.inner.registrar.snapshot();
        let focused = stack.focused() == Some(id);

        let mut events = Vec::new();
        let url = {
            let mut state = self.inner.state.lock();
            if state.status(id) != OverlayStatus::Open {
                tracing::debug!(overlay_id = %id, status = %state.status(id), "Close ignored");
                return Ok(());
            }
            state.transition(id, OverlayStatus::Closing, &mut events);

            if focused {
                let index = stack.len() - 1;
                let previous_url = state
                    .root_previous_url(stack.ids().first())
                    .unwrap_or_default()
                    .to_string();
                let root_url = state
                    .root_url
                    .clone()
                    .unwrap_or_else(|| url_without_overlay(&state.page.url));
                Some(resolve_close_url(stack.ids(), index, &previous_url, &root_url))
            } else {
                None
            }
        };
        self.publish(&events);

        let Some(url) = url else {
            tokio::task::yield_now().await;
            self.finish_closing(id);
            return Ok(());
        };

        tracing::info!(overlay_id = %id, url = %url, "Closing overlay");
        let started = Instant::now();
        let visit = Visit::get(url).lifecycle(Lifecycle::Closing(id.clone()));
        match self.dispatch(visit).await {
            Ok(_) => {
                let floor = self.inner.config.min_close_duration;
                let elapsed = started.elapsed();
                if elapsed < floor {
                    tokio::time::sleep(floor - elapsed).await;
                }
                self.finish_closing(id);
                Ok(())
            }
            Err(e) => {
                let mut events = Vec::new();
                {
                    let mut state = self.inner.state.lock();
                    if state.status(id) == OverlayStatus::Closing {
                        state.transition(id, OverlayStatus::Open, &mut events);
                    }
                }
                self.publish(&events);
                tracing::warn!(overlay_id = %id, error = %e, "Failed to close overlay");
                Err(e.into())
            }
        }
    }

    /// Refresh some props of the focused overlay
    ///
    /// Does nothing unless the overlay is open and focused.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::NavigationFailed`] if the request fails.
    pub async fn reload<I, S>(&self, id: &OverlayId, only: I) -> Result<(), OverlayError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let url = {
            let state = self.inner.state.lock();
            if state.status(id) != OverlayStatus::Open
                || self.inner.registrar.focused_id().as_ref() != Some(id)
            {
                tracing::debug!(overlay_id = %id, "Reload ignored for unfocused overlay");
                return Ok(());
            }
            let root_url = state
                .root_url
                .clone()
                .unwrap_or_else(|| url_without_overlay(&state.page.url));
            url_with_overlay(&root_url, id)
        };

        self.dispatch(Visit::get(url).only(only)).await?;
        self.flush_pending_closes().await;
        Ok(())
    }

    /// Perform an ordinary navigation
    ///
    /// While an overlay is open the visit is scoped to it. A response
    /// without an overlay envelope closes every remaining overlay locally.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::NavigationFailed`] if the request fails.
    pub async fn visit(&self, visit: Visit) -> Result<Page, OverlayError> {
        let page = self.dispatch(visit).await?;
        self.flush_pending_closes().await;
        Ok(page)
    }

    /// Follow a browser history change
    ///
    /// # Errors
    ///
    /// Returns an error if an overlay that is not yet open has to be opened
    /// and that fails.
    pub async fn sync_location(&self, url: &str) -> Result<(), OverlayError> {
        let stack = self.inner.registrar.snapshot();
        self.inner.state.lock().page.url = url.to_string();

        let Some(raw) = query_param(url, QUERY_PARAM) else {
            tracing::debug!(url = %url, "History left overlay context");
            self.close_locally(stack.ids());
            self.inner.state.lock().root_url = None;
            return Ok(());
        };
        let id = match OverlayId::parse(&raw) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(overlay_id = %raw, error = %e, "Ignoring malformed overlay in history");
                return Ok(());
            }
        };

        match stack.index_of(&id) {
            Some(index) if index + 1 == stack.len() => Ok(()),
            Some(index) => {
                self.close_locally(&stack.ids()[index + 1..]);
                Ok(())
            }
            None => self.open(id, OpenOptions::default()).await.map(|_| ()),
        }
    }

    /// Handle for an overlay
    #[must_use]
    pub fn handle(&self, id: OverlayId) -> OverlayHandle {
        OverlayHandle {
            id,
            runtime: self.clone(),
        }
    }

    /// Snapshot of an overlay instance
    #[must_use]
    pub fn instance(&self, id: &OverlayId) -> Option<OverlayInstance> {
        self.inner.state.lock().instances.get(id).cloned()
    }

    /// Current status of an overlay (`Closed` when unknown)
    #[must_use]
    pub fn status(&self, id: &OverlayId) -> OverlayStatus {
        self.inner.state.lock().status(id)
    }

    /// Current stack
    #[must_use]
    pub fn stack(&self) -> StackSnapshot {
        self.inner.registrar.snapshot()
    }

    /// The stack registrar, for stack-change listeners
    #[must_use]
    pub fn registrar(&self) -> &OverlayRegistrar {
        &self.inner.registrar
    }

    /// URL beneath all overlays, while any overlay context exists
    #[must_use]
    pub fn root_url(&self) -> Option<String> {
        self.inner.state.lock().root_url.clone()
    }

    /// Host page as last received
    #[must_use]
    pub fn page(&self) -> Page {
        self.inner.state.lock().page.clone()
    }

    /// Listen for status and focus changes of every overlay
    pub fn on_status_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&StatusChange) + Send + Sync + 'static,
    {
        self.inner.changes.subscribe(listener)
    }

    /// Stop listening
    pub fn off_status_change(&self, id: ListenerId) -> bool {
        self.inner.changes.unsubscribe(id)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Run a visit through the interceptor and the navigator
    async fn dispatch(&self, mut visit: Visit) -> Result<Page, NavigationError> {
        {
            let stack = self.inner.registrar.snapshot();
            let state = self.inner.state.lock();
            let ctx = InterceptorContext {
                stack: &stack,
                root_url: state.root_url.as_deref(),
                previous_url: state.root_previous_url(stack.ids().first()),
                page_component: &state.page.component,
            };
            self.inner.interceptor.before(&mut visit, &ctx);
        }

        let page = self.inner.navigator.navigate(visit.clone()).await?;

        let reconciled = {
            let stack = self.inner.registrar.snapshot();
            let mut state = self.inner.state.lock();
            self.inner.interceptor.after(&mut state, &stack, &visit, &page)
        };
        self.apply(reconciled);
        Ok(page)
    }

    fn apply(&self, reconciled: Reconciled) {
        self.publish(&reconciled.events);
        for id in &reconciled.unregister {
            self.inner.registrar.unregister(id);
        }
        for id in reconciled.register {
            self.inner.registrar.register(id);
        }
    }

    fn publish(&self, events: &[StatusChange]) {
        for event in events {
            self.inner.changes.emit(event);
        }
    }

    /// Complete a close unless another operation got there first
    fn finish_closing(&self, id: &OverlayId) {
        let mut events = Vec::new();
        let finished = {
            let mut state = self.inner.state.lock();
            state.status(id) == OverlayStatus::Closing && state.finish(id, &mut events)
        };
        self.publish(&events);
        if finished {
            self.inner.registrar.unregister(id);
            tracing::info!(overlay_id = %id, "Overlay closed");
        } else {
            tracing::warn!(overlay_id = %id, "Discarding stale close completion");
        }
    }

    /// Close overlays without a navigation, topmost first
    fn close_locally(&self, ids: &[OverlayId]) {
        for id in ids.iter().rev() {
            let mut events = Vec::new();
            let finished = self.inner.state.lock().finish(id, &mut events);
            self.publish(&events);
            self.inner.registrar.unregister(id);
            if finished {
                tracing::info!(overlay_id = %id, "Overlay closed by history");
            }
        }
    }

    /// Act on server close requests that arrived while overlays were busy
    async fn flush_pending_closes(&self) {
        let pending: Vec<OverlayId> = {
            let mut state = self.inner.state.lock();
            state
                .instances
                .values_mut()
                .filter(|i| i.pending_close && i.status == OverlayStatus::Open)
                .map(|i| {
                    i.pending_close = false;
                    i.id.clone()
                })
                .collect()
        };

        for id in pending {
            tracing::info!(overlay_id = %id, "Closing overlay on server request");
            if let Err(e) = self.close(&id).await {
                tracing::warn!(overlay_id = %id, error = %e, "Server-requested close failed");
            }
        }
    }
}

impl fmt::Debug for OverlayRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlayRuntime")
            .field("config", &self.inner.config)
            .field("stack", &self.inner.registrar.snapshot().ids())
            .field("listeners", &self.inner.changes.listener_count())
            .finish()
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Caller-facing handle to one overlay
#[derive(Clone, Debug)]
pub struct OverlayHandle {
    id: OverlayId,
    runtime: OverlayRuntime,
}

impl OverlayHandle {
    /// Overlay identifier
    #[must_use]
    pub fn id(&self) -> &OverlayId {
        &self.id
    }

    /// Current status
    #[must_use]
    pub fn state(&self) -> OverlayStatus {
        self.runtime.status(&self.id)
    }

    /// Last props received (empty once the instance is gone)
    #[must_use]
    pub fn props(&self) -> Map<String, Value> {
        self.runtime
            .instance(&self.id)
            .map(|i| i.props)
            .unwrap_or_default()
    }

    /// Last config received
    #[must_use]
    pub fn config(&self) -> Option<OverlayConfig> {
        self.runtime.instance(&self.id).map(|i| i.config)
    }

    /// Full instance snapshot
    #[must_use]
    pub fn instance(&self) -> Option<OverlayInstance> {
        self.runtime.instance(&self.id)
    }

    /// Whether this overlay is the top of the stack
    #[must_use]
    pub fn is_focused(&self) -> bool {
        self.runtime.stack().focused() == Some(&self.id)
    }

    /// Close the overlay
    ///
    /// # Errors
    ///
    /// See [`OverlayRuntime::close`].
    pub async fn close(&self) -> Result<(), OverlayError> {
        self.runtime.close(&self.id).await
    }

    /// Refresh some props
    ///
    /// # Errors
    ///
    /// See [`OverlayRuntime::reload`].
    pub async fn reload<I, S>(&self, only: I) -> Result<(), OverlayError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runtime.reload(&self.id, only).await
    }

    /// Listen for changes of this overlay only
    pub fn on_status_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&StatusChange) + Send + Sync + 'static,
    {
        let id = self.id.clone();
        self.runtime.on_status_change(move |change| {
            if change.id() == &id {
                listener(change);
            }
        })
    }

    /// Stop listening
    pub fn off_status_change(&self, id: ListenerId) -> bool {
        self.runtime.off_status_change(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{Size, Variant};
    use crate::protocol::{headers, overlay_in_url, OverlayEnvelope, NOTHING_PARTIAL};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    type Responder = Box<dyn Fn(&Visit) -> Result<Page, NavigationError> + Send + Sync>;

    struct MockNavigator {
        visits: Mutex<Vec<Visit>>,
        delay: Duration,
        opening_delay: Duration,
        respond: Responder,
    }

    impl MockNavigator {
        fn new(
            delay: Duration,
            respond: impl Fn(&Visit) -> Result<Page, NavigationError> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                visits: Mutex::new(Vec::new()),
                delay,
                opening_delay: delay,
                respond: Box::new(respond),
            })
        }

        fn echo(delay: Duration) -> Arc<Self> {
            Self::new(delay, |visit| Ok(echo_page(visit, false)))
        }

        /// Opens take `delay`, every other visit answers at once
        fn slow_opens(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                visits: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
                opening_delay: delay,
                respond: Box::new(|visit| Ok(echo_page(visit, false))),
            })
        }

        fn visits(&self) -> Vec<Visit> {
            self.visits.lock().clone()
        }

        fn closing_visits(&self) -> usize {
            self.visits
                .lock()
                .iter()
                .filter(|v| matches!(v.lifecycle, Some(Lifecycle::Closing(_))))
                .count()
        }
    }

    #[async_trait]
    impl Navigator for MockNavigator {
        async fn navigate(&self, visit: Visit) -> Result<Page, NavigationError> {
            self.visits.lock().push(visit.clone());
            let delay = match visit.lifecycle {
                Some(Lifecycle::Opening(_)) => self.opening_delay,
                _ => self.delay,
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            (self.respond)(&visit)
        }
    }

    /// Renders the overlay named in the URL; props only on open
    fn echo_page(visit: &Visit, close_requested: bool) -> Page {
        let mut page = Page::new("Users/Index", visit.url.clone());
        if let Some(id) = overlay_in_url(&visit.url) {
            if matches!(visit.lifecycle, Some(Lifecycle::Opening(_))) {
                page.props
                    .insert(id.scoped_key("title"), json!(format!("{id} title")));
            }
            page.overlay = Some(OverlayEnvelope {
                id: id.clone(),
                typename: id.typename().to_string(),
                variant: Variant::Modal,
                size: Size::Md,
                props: vec!["title".into()],
                close_requested,
                deferred: Vec::new(),
            });
        }
        page
    }

    fn id(name: &str) -> OverlayId {
        OverlayId::from_typename(name).unwrap()
    }

    async fn booted(navigator: Arc<MockNavigator>) -> OverlayRuntime {
        let runtime = OverlayRuntime::new(navigator, ClientConfig::default());
        runtime
            .boot(Page::new("Users/Index", "/users?page=2"))
            .await
            .unwrap();
        runtime
    }

    #[tokio::test]
    async fn test_open_then_nested_open_then_close_restores_focus() {
        let navigator = MockNavigator::echo(Duration::ZERO);
        let runtime = booted(Arc::clone(&navigator)).await;

        let a = runtime.open("a", OpenOptions::default()).await.unwrap();
        assert_eq!(a.state(), OverlayStatus::Open);
        assert!(a.is_focused());
        let a_props = a.props();
        assert_eq!(Value::Object(a_props.clone()), json!({"title": "a title"}));

        let b = runtime.open("b", OpenOptions::default()).await.unwrap();
        assert!(b.is_focused());
        assert!(!a.is_focused());
        assert_eq!(b.instance().unwrap().parent_id, Some(id("a")));

        b.close().await.unwrap();
        assert_eq!(b.state(), OverlayStatus::Closed);
        assert!(a.is_focused());
        assert_eq!(a.props(), a_props);
        assert_eq!(runtime.stack().ids(), &[id("a")]);
    }

    #[tokio::test]
    async fn test_open_request_carries_protocol() {
        let navigator = MockNavigator::echo(Duration::ZERO);
        let runtime = booted(Arc::clone(&navigator)).await;

        runtime.open("a", OpenOptions::default()).await.unwrap();
        let visit = navigator.visits().pop().unwrap();
        assert_eq!(visit.url, "/users?page=2&overlay=a");
        assert_eq!(visit.headers.get(headers::OPENING_ID), Some("a"));
        assert_eq!(visit.headers.get(headers::INDEX), Some("0"));
        assert_eq!(visit.headers.get(headers::PREVIOUS_URL), Some("/users?page=2"));
        assert_eq!(visit.only, vec![NOTHING_PARTIAL.to_string()]);
        assert_eq!(runtime.root_url().as_deref(), Some("/users?page=2"));
    }

    #[tokio::test]
    async fn test_close_urls_follow_stack_position() {
        let navigator = MockNavigator::echo(Duration::ZERO);
        let runtime = booted(Arc::clone(&navigator)).await;
        let a = runtime.open("a", OpenOptions::default()).await.unwrap();
        let b = runtime.open("b", OpenOptions::default()).await.unwrap();

        b.close().await.unwrap();
        let visit = navigator.visits().pop().unwrap();
        assert_eq!(visit.url, "/users?page=2&overlay=a");
        assert_eq!(visit.headers.get(headers::CLOSING_ID), Some("b"));
        assert_eq!(visit.headers.get(headers::STACK), Some("a,b"));

        a.close().await.unwrap();
        let visit = navigator.visits().pop().unwrap();
        assert_eq!(visit.url, "/users?page=2");
        assert!(visit.only.is_empty());
        assert!(runtime.stack().is_empty());
        assert_eq!(runtime.root_url(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_waits_for_minimum_duration() {
        let navigator = MockNavigator::echo(Duration::from_millis(10));
        let runtime = booted(navigator).await;
        let a = runtime.open("a", OpenOptions::default()).await.unwrap();

        let started = Instant::now();
        a.close().await.unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(240), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(260), "{elapsed:?}");
        assert_eq!(a.state(), OverlayStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_close_is_not_delayed_further() {
        let navigator = MockNavigator::echo(Duration::from_millis(300));
        let runtime = booted(navigator).await;
        let a = runtime.open("a", OpenOptions::default()).await.unwrap();

        let started = Instant::now();
        a.close().await.unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(310), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_close_navigates_once() {
        let navigator = MockNavigator::echo(Duration::from_millis(10));
        let runtime = booted(Arc::clone(&navigator)).await;
        let a = runtime.open("a", OpenOptions::default()).await.unwrap();

        let (first, second) = tokio::join!(a.close(), a.close());
        first.unwrap();
        second.unwrap();
        assert_eq!(navigator.closing_visits(), 1);
        assert_eq!(a.state(), OverlayStatus::Closed);
    }

    #[tokio::test]
    async fn test_failed_open_ends_closed() {
        let navigator = MockNavigator::new(Duration::ZERO, |visit| match visit.lifecycle {
            Some(Lifecycle::Opening(_)) => Err(NavigationError::Status {
                status: 500,
                message: "boom".into(),
            }),
            _ => Ok(echo_page(visit, false)),
        });
        let runtime = booted(navigator).await;

        let err = runtime.open("a", OpenOptions::default()).await.unwrap_err();
        assert!(matches!(err, OverlayError::NavigationFailed(_)));
        assert_eq!(runtime.status(&id("a")), OverlayStatus::Closed);
        assert!(runtime.stack().is_empty());
    }

    #[tokio::test]
    async fn test_failed_close_reverts_to_open() {
        let navigator = MockNavigator::new(Duration::ZERO, |visit| match visit.lifecycle {
            Some(Lifecycle::Closing(_)) => Err(NavigationError::Transport("offline".into())),
            _ => Ok(echo_page(visit, false)),
        });
        let runtime = booted(navigator).await;
        let a = runtime.open("a", OpenOptions::default()).await.unwrap();

        assert!(a.close().await.is_err());
        assert_eq!(a.state(), OverlayStatus::Open);
        assert_eq!(runtime.stack().ids(), &[id("a")]);
    }

    #[tokio::test]
    async fn test_unfocused_close_is_local() {
        let navigator = MockNavigator::echo(Duration::ZERO);
        let runtime = booted(Arc::clone(&navigator)).await;
        let a = runtime.open("a", OpenOptions::default()).await.unwrap();
        runtime.open("b", OpenOptions::default()).await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        a.on_status_change(move |change| seen_clone.lock().push(change.clone()));

        a.close().await.unwrap();
        assert_eq!(navigator.closing_visits(), 0);
        assert_eq!(runtime.stack().ids(), &[id("b")]);
        assert_eq!(
            *seen.lock(),
            vec![
                StatusChange::Status {
                    id: id("a"),
                    from: OverlayStatus::Open,
                    to: OverlayStatus::Closing,
                },
                StatusChange::Status {
                    id: id("a"),
                    from: OverlayStatus::Closing,
                    to: OverlayStatus::Closed,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_close_request_closes_exactly_once() {
        // First close attempt fails, so the overlay stays open while later
        // responses keep asking for a close.
        let closes = Arc::new(AtomicUsize::new(0));
        let closes_clone = Arc::clone(&closes);
        let navigator = MockNavigator::new(Duration::ZERO, move |visit| {
            if matches!(visit.lifecycle, Some(Lifecycle::Closing(_))) {
                closes_clone.fetch_add(1, Ordering::SeqCst);
                return Err(NavigationError::Transport("offline".into()));
            }
            Ok(echo_page(visit, true))
        });
        let runtime = booted(Arc::clone(&navigator)).await;

        let a = runtime.open("a", OpenOptions::default()).await.unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(a.state(), OverlayStatus::Open);

        a.reload(["title"]).await.unwrap();
        a.reload(["title"]).await.unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_focus_changes_are_published() {
        let navigator = MockNavigator::echo(Duration::ZERO);
        let runtime = booted(navigator).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        runtime.on_status_change(move |change| {
            if !matches!(change, StatusChange::Status { .. }) {
                seen_clone.lock().push(change.clone());
            }
        });

        runtime.open("a", OpenOptions::default()).await.unwrap();
        let b = runtime.open("b", OpenOptions::default()).await.unwrap();
        b.close().await.unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                StatusChange::Focused { id: id("a") },
                StatusChange::Blurred { id: id("a") },
                StatusChange::Focused { id: id("b") },
                StatusChange::Blurred { id: id("b") },
                StatusChange::Focused { id: id("a") },
            ]
        );
    }

    #[tokio::test]
    async fn test_open_is_ignored_unless_closed() {
        let navigator = MockNavigator::echo(Duration::ZERO);
        let runtime = booted(Arc::clone(&navigator)).await;
        runtime.open("a", OpenOptions::default()).await.unwrap();
        runtime.open("a", OpenOptions::default()).await.unwrap();
        assert_eq!(navigator.visits().len(), 1);
        assert_eq!(runtime.stack().len(), 1);
    }

    #[tokio::test]
    async fn test_open_with_arguments_encodes_identity() {
        let navigator = MockNavigator::echo(Duration::ZERO);
        let runtime = booted(Arc::clone(&navigator)).await;
        let args = json!({"id": 7}).as_object().cloned().unwrap();
        let handle = runtime
            .open(("profile-editor", args), OpenOptions::default())
            .await
            .unwrap();
        assert_eq!(handle.id().as_str(), "profile-editor:eyJpZCI6N30");
    }

    #[tokio::test]
    async fn test_stack_depth_is_enforced() {
        let navigator = MockNavigator::echo(Duration::ZERO);
        let config = ClientConfig {
            max_stack_depth: 1,
            ..ClientConfig::default()
        };
        let runtime = OverlayRuntime::new(navigator, config);
        runtime.boot(Page::new("Home", "/")).await.unwrap();
        runtime.open("a", OpenOptions::default()).await.unwrap();
        let err = runtime.open("b", OpenOptions::default()).await.unwrap_err();
        assert!(matches!(err, OverlayError::StackFull { max: 1 }));
    }

    #[tokio::test]
    async fn test_persisted_instance_survives_close() {
        let navigator = MockNavigator::echo(Duration::ZERO);
        let runtime = booted(navigator).await;
        let a = runtime
            .open("a", OpenOptions { persist: true })
            .await
            .unwrap();
        a.close().await.unwrap();
        let instance = a.instance().unwrap();
        assert_eq!(instance.status, OverlayStatus::Closed);
        assert_eq!(Value::Object(instance.props), json!({"title": "a title"}));
    }

    #[tokio::test]
    async fn test_history_sync() {
        let navigator = MockNavigator::echo(Duration::ZERO);
        let runtime = booted(Arc::clone(&navigator)).await;
        runtime.open("a", OpenOptions::default()).await.unwrap();
        runtime.open("b", OpenOptions::default()).await.unwrap();

        // Back to a: b closes without a request
        runtime.sync_location("/users?page=2&overlay=a").await.unwrap();
        assert_eq!(runtime.stack().ids(), &[id("a")]);
        assert_eq!(navigator.visits().len(), 2);

        // Forward to b: it opens again
        runtime.sync_location("/users?page=2&overlay=b").await.unwrap();
        assert_eq!(runtime.stack().ids(), &[id("a"), id("b")]);

        // Back past every overlay
        runtime.sync_location("/users?page=2").await.unwrap();
        assert!(runtime.stack().is_empty());
        assert_eq!(runtime.root_url(), None);
    }

    #[tokio::test]
    async fn test_boot_with_overlay_in_url_opens_it() {
        let navigator = MockNavigator::echo(Duration::ZERO);
        let runtime = OverlayRuntime::new(navigator, ClientConfig::default());
        runtime
            .boot(Page::new("Users/Index", "/users?overlay=a"))
            .await
            .unwrap();
        assert_eq!(runtime.status(&id("a")), OverlayStatus::Open);
        assert_eq!(runtime.instance(&id("a")).unwrap().previous_url, "/users");
    }

    #[tokio::test]
    async fn test_ordinary_visit_leaves_overlays() {
        let navigator = MockNavigator::echo(Duration::ZERO);
        let runtime = booted(navigator).await;
        runtime.open("a", OpenOptions::default()).await.unwrap();

        runtime.visit(Visit::get("/settings")).await.unwrap();
        assert!(runtime.stack().is_empty());
        assert_eq!(runtime.status(&id("a")), OverlayStatus::Closed);
        assert_eq!(runtime.page().url, "/settings");
    }

    fn closed_events(seen: &Mutex<Vec<StatusChange>>) -> usize {
        seen.lock()
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    StatusChange::Status {
                        to: OverlayStatus::Closed,
                        ..
                    }
                )
            })
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_sync_overtakes_pending_open() {
        let navigator = MockNavigator::echo(Duration::from_millis(50));
        let runtime = booted(navigator).await;

        let (opened, synced) = tokio::join!(runtime.open("a", OpenOptions::default()), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            runtime.sync_location("/users?page=2").await
        });
        opened.unwrap();
        synced.unwrap();

        assert_eq!(runtime.status(&id("a")), OverlayStatus::Closed);
        assert!(runtime.instance(&id("a")).is_none());
        assert!(runtime.stack().is_empty());
        assert_eq!(runtime.root_url(), None);
        assert_eq!(runtime.page().url, "/users?page=2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_response_after_navigation_away_is_dropped() {
        let navigator = MockNavigator::slow_opens(Duration::from_millis(50));
        let runtime = booted(Arc::clone(&navigator)).await;

        let (opened, visited) = tokio::join!(runtime.open("a", OpenOptions::default()), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            runtime.visit(Visit::get("/settings")).await
        });
        opened.unwrap();
        visited.unwrap();

        assert_eq!(navigator.visits().len(), 2);
        assert_eq!(runtime.status(&id("a")), OverlayStatus::Closed);
        assert!(runtime.stack().is_empty());
        assert_eq!(runtime.root_url(), None);
        assert_eq!(runtime.page().url, "/settings");
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_completion_after_history_sync_is_dropped() {
        let navigator = MockNavigator::echo(Duration::from_millis(50));
        let runtime = booted(navigator).await;
        let a = runtime.open("a", OpenOptions::default()).await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        a.on_status_change(move |change| seen_clone.lock().push(change.clone()));

        let (closed, synced) = tokio::join!(a.close(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            runtime.sync_location("/users?page=2").await
        });
        closed.unwrap();
        synced.unwrap();

        assert_eq!(a.state(), OverlayStatus::Closed);
        assert!(runtime.stack().is_empty());
        assert_eq!(runtime.root_url(), None);
        assert_eq!(runtime.page().url, "/users?page=2");
        assert_eq!(closed_events(&seen), 1);
    }

    #[tokio::test]
    async fn test_navigation_to_another_page_replaces_host_props() {
        let navigator = MockNavigator::new(Duration::ZERO, |visit| {
            if visit.url.starts_with("/settings") {
                return Ok(Page::new("Settings", visit.url.clone()).with_prop("tab", json!("profile")));
            }
            Ok(echo_page(visit, false))
        });
        let runtime = OverlayRuntime::new(navigator, ClientConfig::default());
        runtime
            .boot(Page::new("Users/Index", "/users").with_prop("users", json!([1])))
            .await
            .unwrap();
        runtime.open("a", OpenOptions::default()).await.unwrap();
        assert_eq!(runtime.page().props.get("users"), Some(&json!([1])));

        runtime.visit(Visit::get("/settings")).await.unwrap();
        let page = runtime.page();
        assert_eq!(page.component, "Settings");
        assert_eq!(Value::Object(page.props), json!({"tab": "profile"}));
    }

    #[tokio::test]
    async fn test_instance_focus_flag_follows_stack() {
        let navigator = MockNavigator::echo(Duration::ZERO);
        let runtime = booted(navigator).await;

        let focus_seen = Arc::new(Mutex::new(Vec::new()));
        let focus_seen_clone = Arc::clone(&focus_seen);
        let observer = runtime.clone();
        runtime.on_status_change(move |change| {
            if let StatusChange::Focused { id } = change {
                let flagged = observer.instance(id).is_some_and(|i| i.focused);
                focus_seen_clone.lock().push(flagged);
            }
        });

        let a = runtime.open("a", OpenOptions::default()).await.unwrap();
        assert!(a.instance().unwrap().focused);

        let b = runtime.open("b", OpenOptions::default()).await.unwrap();
        assert!(!a.instance().unwrap().focused);
        assert!(b.instance().unwrap().focused);

        b.close().await.unwrap();
        assert!(a.instance().unwrap().focused);
        assert_eq!(*focus_seen.lock(), vec![true, true, true]);
    }
}
