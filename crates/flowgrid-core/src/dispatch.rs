//! Patch-driven change dispatch.
//!
//! After each store commit the [`Dispatcher`] walks the patch, resolves each
//! op path to its owning field, refreshes that field's cache, and reports
//! which registered listeners need notifying. Listeners are opaque
//! [`ListenerId`]s routed by the caller, so removing one never leaves a
//! dangling callback behind.

use std::collections::{HashMap, HashSet};

use crate::component::{ComponentId, ComponentTree};
use crate::gesture::Timestamp;
use crate::patch::Patch;
use crate::path::Path;
use crate::store::Store;

/// Handle for one registered listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u32);

/// What one refresh pass found: the fields whose caches changed and the
/// listeners to notify. Listener order is unspecified (the registry is a
/// set); the reported order here is sorted only to be deterministic.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    /// Fields affected by the patch, in first-seen order.
    pub changed_fields: Vec<ComponentId>,
    /// Listeners with at least one affected field, deduplicated.
    pub notify: Vec<ListenerId>,
}

/// The field-change listener registry and per-batch changed sets.
#[derive(Debug, Default)]
pub struct Dispatcher {
    next_listener: u32,
    listeners_by_field: HashMap<ComponentId, HashSet<ListenerId>>,
    /// Field id → sub-paths affected during the current action batch.
    changed_paths: HashMap<ComponentId, Vec<Path>>,
    /// Changed fields plus all their ancestors, for coarse invalidation.
    changed_component_ids: HashSet<ComponentId>,
    /// `(path, commit time)` for every savable-action change in the open
    /// gesture; cleared on gesture commit.
    gesture_changed_paths: Vec<(Path, Timestamp)>,
}

impl Dispatcher {
    /// An empty registry.
    pub fn new() -> Self {
        Dispatcher::default()
    }

    /// Allocates a listener handle.
    pub fn add_listener(&mut self) -> ListenerId {
        self.next_listener += 1;
        ListenerId(self.next_listener)
    }

    /// Subscribes `listener` to changes of `field`.
    pub fn listen(&mut self, listener: ListenerId, field: ComponentId) {
        self.listeners_by_field
            .entry(field)
            .or_default()
            .insert(listener);
    }

    /// Removes `listener` from every field's set.
    pub fn unlisten_all(&mut self, listener: ListenerId) {
        for listeners in self.listeners_by_field.values_mut() {
            listeners.remove(&listener);
        }
        self.listeners_by_field.retain(|_, l| !l.is_empty());
    }

    /// Walks `patch`, refreshes affected field caches, and returns who to
    /// notify.
    ///
    /// With `add_to_gesture` (savable actions, not history navigation) the
    /// affected paths are also appended to the gesture-changed journal.
    pub fn refresh_changed(
        &mut self,
        tree: &mut ComponentTree,
        store: &Store,
        patch: &Patch,
        add_to_gesture: bool,
        now: Timestamp,
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        let mut seen_fields: HashSet<ComponentId> = HashSet::new();

        for (path, _op) in patch.ops() {
            let Some(field) = tree.find_field_for(path) else {
                tracing::debug!(%path, "patch op has no owning field");
                continue;
            };
            self.changed_paths
                .entry(field)
                .or_default()
                .push(path.clone());
            self.changed_component_ids.insert(field);
            for ancestor in tree.ancestors(field) {
                self.changed_component_ids.insert(ancestor);
            }
            if add_to_gesture {
                self.gesture_changed_paths.push((path.clone(), now));
            }
            if seen_fields.insert(field) {
                outcome.changed_fields.push(field);
            }
        }

        let mut notify: HashSet<ListenerId> = HashSet::new();
        for field in &outcome.changed_fields {
            tree.refresh_field(*field, store);
            if let Some(listeners) = self.listeners_by_field.get(field) {
                notify.extend(listeners.iter().copied());
            }
        }
        outcome.notify = notify.into_iter().collect();
        outcome.notify.sort_unstable();
        outcome
    }

    /// True if `field` changed during the current batch.
    pub fn is_changed(&self, field: ComponentId) -> bool {
        self.changed_paths.contains_key(&field)
    }

    /// Sub-paths affected for `field` during the current batch.
    pub fn changed_paths(&self, field: ComponentId) -> &[Path] {
        self.changed_paths.get(&field).map_or(&[], Vec::as_slice)
    }

    /// True if `component` (field or ancestor) changed during the batch.
    pub fn is_component_changed(&self, component: ComponentId) -> bool {
        self.changed_component_ids.contains(&component)
    }

    /// Clears the per-batch changed sets. Call at end of each action batch.
    pub fn clear_changed(&mut self) {
        self.changed_paths.clear();
        self.changed_component_ids.clear();
    }

    /// Takes the gesture-changed journal, clearing it.
    pub fn take_gesture_changed(&mut self) -> Vec<(Path, Timestamp)> {
        std::mem::take(&mut self.gesture_changed_paths)
    }
}
