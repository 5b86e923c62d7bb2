//! Navigation Interceptor
//!
//! Hooks that run around every navigation the runtime performs.
//!
//! - [`NavigationInterceptor::before`] scopes an outgoing visit to the
//!   focused overlay: protocol headers, the "fetch nothing" partial set,
//!   scroll preservation.
//! - [`NavigationInterceptor::after`] reconciles a successful response:
//!   applies the overlay envelope to its instance (creating it for
//!   server-initiated overlays) or, when no envelope came back, drops the
//!   tracked root URL. Responses to an open or close that another
//!   operation already overtook are dropped whole.

use serde_json::Map;

use crate::identity::OverlayId;
use crate::instance::{OverlayConfig, OverlayInstance, OverlayStatus, StatusChange};
use crate::protocol::{
    headers, join_stack, url_without_overlay, Lifecycle, Page, NOTHING_PARTIAL,
};
use crate::stack::StackSnapshot;

use super::navigator::Visit;
use super::state::ClientState;

/// What the interceptor needs to know about the client when a visit leaves
#[derive(Clone, Copy, Debug)]
pub struct InterceptorContext<'a> {
    /// Current stack
    pub stack: &'a StackSnapshot,
    /// Tracked root URL
    pub root_url: Option<&'a str>,
    /// URL recorded when the root-most overlay opened
    pub previous_url: Option<&'a str>,
    /// Host page component
    pub page_component: &'a str,
}

/// Stack and status effects produced by [`NavigationInterceptor::after`]
#[derive(Debug, Default)]
pub(crate) struct Reconciled {
    /// Overlays the server opened that must join the stack
    pub register: Vec<OverlayId>,
    /// Overlays closed locally that must leave the stack
    pub unregister: Vec<OverlayId>,
    /// Status changes to publish
    pub events: Vec<StatusChange>,
}

/// Header augmentation and response reconciliation
#[derive(Clone, Copy, Debug, Default)]
pub struct NavigationInterceptor;

impl NavigationInterceptor {
    /// Create an interceptor
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Scope an outgoing visit to the focused overlay
    ///
    /// Returns false (leaving the visit untouched) when no overlay is open.
    pub fn before(&self, visit: &mut Visit, ctx: &InterceptorContext<'_>) -> bool {
        let Some(focused) = ctx.stack.focused() else {
            return false;
        };
        let index = ctx.stack.len() - 1;

        visit.headers.insert(headers::PROTOCOL, "true");
        visit.headers.insert(headers::ID, focused.as_str());
        visit.headers.insert(headers::INDEX, index.to_string());
        visit
            .headers
            .insert(headers::STACK, join_stack(ctx.stack.ids()));
        if let Some(root_url) = ctx.root_url {
            visit.headers.insert(headers::ROOT_URL, root_url);
        }
        if let Some(previous_url) = ctx.previous_url {
            visit.headers.insert(headers::PREVIOUS_URL, previous_url);
        }
        visit
            .headers
            .insert(headers::PAGE_COMPONENT, ctx.page_component);

        let closing_at_root = match &visit.lifecycle {
            Some(Lifecycle::Opening(id)) => {
                visit.headers.insert(headers::OPENING_ID, id.as_str());
                false
            }
            Some(Lifecycle::Closing(id)) => {
                visit.headers.insert(headers::CLOSING_ID, id.as_str());
                ctx.stack.index_of(id) == Some(0)
            }
            None => false,
        };

        // Overlay props travel in the envelope, not the ordinary partial set
        if !visit.is_partial() && !closing_at_root {
            visit.only = vec![NOTHING_PARTIAL.to_string()];
        }
        visit.preserve_scroll = true;
        visit.preserve_state = true;

        tracing::debug!(
            overlay_id = %focused,
            index = index,
            url = %visit.url,
            closing_at_root = closing_at_root,
            "Scoped navigation to focused overlay"
        );
        true
    }

    /// Reconcile a successful response with client state
    pub(crate) fn after(
        &self,
        state: &mut ClientState,
        stack: &StackSnapshot,
        visit: &Visit,
        page: &Page,
    ) -> Reconciled {
        let mut out = Reconciled::default();

        // The open or close that issued this visit was superseded
        if let Some(lifecycle) = &visit.lifecycle {
            let (id, expected) = match lifecycle {
                Lifecycle::Opening(id) => (id, OverlayStatus::Opening),
                Lifecycle::Closing(id) => (id, OverlayStatus::Closing),
            };
            if state.status(id) != expected {
                tracing::debug!(overlay_id = %id, status = %state.status(id), "Ignoring superseded response");
                return out;
            }
        }

        let previous_url = state.page.url.clone();

        // Host page: overlay-scoped keys belong to the instance, not the page
        let host_props: Map<_, _> = page
            .props
            .iter()
            .filter(|(key, _)| {
                page.overlay
                    .as_ref()
                    .map_or(true, |envelope| envelope.id.unscope(key).is_none())
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        // Partial responses only refine the page they were asked of
        if visit.is_partial() && page.component == state.page.component {
            state.page.props.extend(host_props);
        } else {
            state.page.props = host_props;
        }
        state.page.component.clone_from(&page.component);
        state.page.url.clone_from(&page.url);
        state.page.version.clone_from(&page.version);

        let Some(envelope) = &page.overlay else {
            state.root_url = None;
            if visit.lifecycle.is_none() {
                self.leave_overlay_context(state, &mut out);
            }
            return out;
        };

        if state.root_url.is_none() {
            state.root_url = Some(url_without_overlay(&page.url));
        }

        let instance = state
            .instances
            .entry(envelope.id.clone())
            .or_insert_with(|| OverlayInstance::new(envelope.id.clone(), previous_url.clone()));

        if instance.status == OverlayStatus::Closed {
            instance.previous_url = previous_url;
            instance.parent_id = stack.focused().cloned();
            instance.status = OverlayStatus::Open;
            instance.close_requested_seen = false;
            instance.pending_close = false;
            out.events.push(StatusChange::Status {
                id: envelope.id.clone(),
                from: OverlayStatus::Closed,
                to: OverlayStatus::Open,
            });
            out.register.push(envelope.id.clone());
            tracing::info!(overlay_id = %envelope.id, "Server-initiated overlay opened");
        }

        instance.config = OverlayConfig {
            variant: envelope.variant,
            size: envelope.size,
            declared_prop_keys: envelope.props.clone(),
        };
        instance.merge_props(page.overlay_props(&envelope.id));

        if envelope.close_requested && !instance.close_requested_seen {
            instance.close_requested_seen = true;
            instance.pending_close = true;
            tracing::debug!(overlay_id = %envelope.id, "Server requested close");
        }

        out
    }

    /// An ordinary navigation left every overlay behind: close them locally
    fn leave_overlay_context(&self, state: &mut ClientState, out: &mut Reconciled) {
        let stale: Vec<OverlayId> = state
            .instances
            .values()
            .filter(|i| i.has_status(&[OverlayStatus::Opening, OverlayStatus::Open]))
            .map(|i| i.id.clone())
            .collect();

        for id in stale {
            if state.finish(&id, &mut out.events) {
                tracing::info!(overlay_id = %id, "Overlay closed by navigation");
                out.unregister.push(id);
            }
        }
    }
}
