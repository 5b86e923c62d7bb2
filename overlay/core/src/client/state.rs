//! Client State
//!
//! Mutable state owned by one [`OverlayRuntime`](super::OverlayRuntime):
//! overlay instances keyed by id, the host page, and the tracked root URL.

use std::collections::HashMap;

use crate::identity::OverlayId;
use crate::instance::{OverlayInstance, OverlayStatus, StatusChange};
use crate::protocol::Page;

/// Runtime state guarded by the runtime's mutex
#[derive(Debug, Default)]
pub(crate) struct ClientState {
    /// Instances by id
    pub instances: HashMap<OverlayId, OverlayInstance>,
    /// URL of the page beneath all overlays, while any overlay context exists
    pub root_url: Option<String>,
    /// Host page as last received (overlay envelope stripped)
    pub page: Page,
}

impl ClientState {
    pub fn new(page: Page) -> Self {
        Self {
            instances: HashMap::new(),
            root_url: None,
            page,
        }
    }

    /// Current status of an overlay (`Closed` when unknown)
    pub fn status(&self, id: &OverlayId) -> OverlayStatus {
        self.instances
            .get(id)
            .map_or(OverlayStatus::Closed, |i| i.status)
    }

    /// Move an instance to a new status, recording the change
    ///
    /// Returns false when the instance is unknown or already in `to`.
    pub fn transition(
        &mut self,
        id: &OverlayId,
        to: OverlayStatus,
        events: &mut Vec<StatusChange>,
    ) -> bool {
        let Some(instance) = self.instances.get_mut(id) else {
            return false;
        };
        let from = instance.status;
        if from == to {
            return false;
        }
        instance.status = to;
        events.push(StatusChange::Status {
            id: id.clone(),
            from,
            to,
        });
        true
    }

    /// Mark an instance closed and drop it unless it persists
    pub fn finish(&mut self, id: &OverlayId, events: &mut Vec<StatusChange>) -> bool {
        if !self.transition(id, OverlayStatus::Closed, events) {
            return false;
        }
        let persist = self.instances.get(id).is_some_and(|i| i.persist);
        if persist {
            if let Some(instance) = self.instances.get_mut(id) {
                instance.pending_close = false;
            }
        } else {
            self.instances.remove(id);
        }
        true
    }

    /// Flag the focused instance and clear the flag everywhere else
    pub fn set_focus(&mut self, focused: Option<&OverlayId>) {
        for instance in self.instances.values_mut() {
            instance.focused = focused == Some(&instance.id);
        }
    }

    /// `previous_url` of the root-most overlay
    pub fn root_previous_url(&self, root_id: Option<&OverlayId>) -> Option<&str> {
        root_id
            .and_then(|id| self.instances.get(id))
            .map(|i| i.previous_url.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> OverlayId {
        OverlayId::from_typename(name).unwrap()
    }

    #[test]
    fn test_transition_records_change() {
        let mut state = ClientState::default();
        state
            .instances
            .insert(id("a"), OverlayInstance::new(id("a"), "/"));

        let mut events = Vec::new();
        assert!(state.transition(&id("a"), OverlayStatus::Opening, &mut events));
        assert!(!state.transition(&id("a"), OverlayStatus::Opening, &mut events));
        assert!(!state.transition(&id("zz"), OverlayStatus::Open, &mut events));
        assert_eq!(events.len(), 1);
        assert_eq!(state.status(&id("a")), OverlayStatus::Opening);
    }

    #[test]
    fn test_finish_drops_unless_persisted() {
        let mut state = ClientState::default();
        let mut kept = OverlayInstance::new(id("kept"), "/");
        kept.status = OverlayStatus::Closing;
        kept.persist = true;
        let mut dropped = OverlayInstance::new(id("dropped"), "/");
        dropped.status = OverlayStatus::Closing;
        state.instances.insert(id("kept"), kept);
        state.instances.insert(id("dropped"), dropped);

        let mut events = Vec::new();
        assert!(state.finish(&id("kept"), &mut events));
        assert!(state.finish(&id("dropped"), &mut events));

        assert_eq!(state.status(&id("kept")), OverlayStatus::Closed);
        assert!(state.instances.contains_key(&id("kept")));
        assert!(!state.instances.contains_key(&id("dropped")));
    }

    #[test]
    fn test_set_focus_moves_the_flag() {
        let mut state = ClientState::default();
        state
            .instances
            .insert(id("a"), OverlayInstance::new(id("a"), "/"));
        state
            .instances
            .insert(id("b"), OverlayInstance::new(id("b"), "/"));

        state.set_focus(Some(&id("b")));
        assert!(!state.instances[&id("a")].focused);
        assert!(state.instances[&id("b")].focused);

        state.set_focus(Some(&id("a")));
        assert!(state.instances[&id("a")].focused);
        assert!(!state.instances[&id("b")].focused);

        state.set_focus(None);
        assert!(state.instances.values().all(|i| !i.focused));
    }
}
