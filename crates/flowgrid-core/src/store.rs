//! The persistent store and its transient mutation view.
//!
//! [`Store`] is an immutable mapping from [`Path`] to [`Primitive`] backed by
//! a hash array mapped trie, so snapshots share structure and cloning is
//! O(1). All mutation goes through a [`TransientStore`] opened on the owning
//! [`AppStore`]; committing the transient produces the [`Patch`] describing
//! exactly what changed.

use im::HashMap;

use crate::patch::{Patch, PatchOp};
use crate::path::{Path, PathId};
use crate::primitive::Primitive;

/// An immutable snapshot of all stored state.
///
/// Keys are interned path ids; the full [`Path`] rides along with each value
/// so diffing can report complete paths without a reverse index.
#[derive(Clone, Default)]
pub struct Store {
    map: HashMap<PathId, (Path, Primitive)>,
}

impl Store {
    /// The empty store.
    pub fn new() -> Self {
        Store::default()
    }

    /// Reads the value at `path`.
    pub fn get(&self, path: &Path) -> Option<&Primitive> {
        self.map.get(&path.id()).map(|(_, v)| v)
    }

    /// True if a value is stored at `path`.
    pub fn contains(&self, path: &Path) -> bool {
        self.map.contains_key(&path.id())
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterates all `(path, value)` entries in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&Path, &Primitive)> {
        self.map.values().map(|(p, v)| (p, v))
    }

    /// Number of entries whose path is a strict descendant of `prefix`.
    ///
    /// Used when reconstructing dynamic child sets on project load.
    pub fn count_at(&self, prefix: &Path) -> usize {
        self.map
            .values()
            .filter(|(p, _)| p.starts_with(prefix) && p.len() > prefix.len())
            .count()
    }

    /// Computes the patch that transforms `self` into `after`.
    ///
    /// Applying the result to `self` yields `after` exactly.
    pub fn diff(&self, after: &Store) -> Patch {
        let mut ops = Vec::new();
        for (id, (path, old)) in &self.map {
            match after.map.get(id) {
                None => ops.push((path.clone(), PatchOp::Remove { old: old.clone() })),
                Some((_, new)) if new != old => ops.push((
                    path.clone(),
                    PatchOp::Replace {
                        value: new.clone(),
                        old: old.clone(),
                    },
                )),
                Some(_) => {}
            }
        }
        for (id, (path, new)) in &after.map {
            if !self.map.contains_key(id) {
                ops.push((
                    path.clone(),
                    PatchOp::Add {
                        value: new.clone(),
                    },
                ));
            }
        }
        // Deterministic op order keeps gesture merging and tests stable.
        ops.sort_by(|(a, _), (b, _)| a.cmp(b));
        Patch::new(Path::root(), ops)
    }

    fn insert(&mut self, path: Path, value: Primitive) {
        self.map.insert(path.id(), (path, value));
    }

    fn remove(&mut self, path: &Path) {
        self.map.remove(&path.id());
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("len", &self.len()).finish()
    }
}

impl PartialEq for Store {
    fn eq(&self, other: &Self) -> bool {
        self.map == other.map
    }
}

/// A mutably-viewed store.
///
/// Opened from [`AppStore::begin_transient`]; set/erase are O(log N) thanks
/// to the trie's in-place mutation of uniquely-owned nodes. Freezing back to
/// a [`Store`] is O(1).
pub struct TransientStore {
    base: Store,
    work: Store,
}

impl TransientStore {
    fn new(base: Store) -> Self {
        let work = base.clone();
        TransientStore { base, work }
    }

    /// Reads the value at `path`, seeing uncommitted writes.
    pub fn get(&self, path: &Path) -> Option<&Primitive> {
        self.work.get(path)
    }

    /// Writes `value` at `path`.
    pub fn set(&mut self, path: Path, value: impl Into<Primitive>) {
        self.work.insert(path, value.into());
    }

    /// Removes the value at `path`, if any.
    pub fn erase(&mut self, path: &Path) {
        self.work.remove(path);
    }

    /// Freezes the current contents into an immutable snapshot.
    ///
    /// Later mutations of this transient do not affect the returned store.
    pub fn persistent(&self) -> Store {
        self.work.clone()
    }

    /// The patch from the transient's base to its current contents.
    pub fn pending_patch(&self) -> Patch {
        self.base.diff(&self.work)
    }
}

/// The application's store plus its transient protocol.
///
/// Exactly one transient may be open at a time; opening a second, or
/// mutating without one, is a store fault and panics (these are bugs in the
/// caller, not recoverable conditions).
#[derive(Default)]
pub struct AppStore {
    current: Store,
    transient: Option<TransientStore>,
}

impl AppStore {
    /// A store containing nothing, with no transient open.
    pub fn new() -> Self {
        AppStore::default()
    }

    /// The latest committed snapshot.
    pub fn snapshot(&self) -> &Store {
        &self.current
    }

    /// Reads through the open transient when one exists, else the snapshot.
    pub fn get(&self, path: &Path) -> Option<&Primitive> {
        match &self.transient {
            Some(t) => t.get(path),
            None => self.current.get(path),
        }
    }

    /// True if a transient is currently open.
    pub fn in_transient(&self) -> bool {
        self.transient.is_some()
    }

    /// Opens the transient.
    ///
    /// # Panics
    ///
    /// Panics if a transient is already open (store fault).
    pub fn begin_transient(&mut self) {
        assert!(
            self.transient.is_none(),
            "store fault: begin_transient with a transient already open"
        );
        self.transient = Some(TransientStore::new(self.current.clone()));
    }

    /// Closes the transient.
    ///
    /// With `commit` the changes become the new snapshot and the resulting
    /// patch is returned; without it the changes are discarded and the patch
    /// is empty.
    ///
    /// # Panics
    ///
    /// Panics if no transient is open (store fault).
    pub fn end_transient(&mut self, commit: bool) -> Patch {
        let transient = self
            .transient
            .take()
            .expect("store fault: end_transient without an open transient");
        if !commit {
            return Patch::empty();
        }
        let patch = transient.pending_patch();
        self.current = transient.persistent();
        patch
    }

    /// Commits the open transient and immediately reopens it.
    ///
    /// This is the per-action commit used by the main-loop drain: the
    /// transient stays open across a whole action batch while each savable
    /// action observes its own patch.
    ///
    /// # Panics
    ///
    /// Panics if no transient is open (store fault).
    pub fn checked_commit(&mut self) -> Patch {
        let patch = self.end_transient(true);
        self.begin_transient();
        patch
    }

    /// Writes `value` at `path` through the open transient.
    ///
    /// # Panics
    ///
    /// Panics if no transient is open (store fault).
    pub fn set(&mut self, path: Path, value: impl Into<Primitive>) {
        self.transient
            .as_mut()
            .expect("store fault: set without an open transient")
            .set(path, value);
    }

    /// Erases the value at `path` through the open transient.
    ///
    /// # Panics
    ///
    /// Panics if no transient is open (store fault).
    pub fn erase(&mut self, path: &Path) {
        self.transient
            .as_mut()
            .expect("store fault: erase without an open transient")
            .erase(path);
    }

    /// Replaces the snapshot wholesale, discarding any open transient.
    ///
    /// This is how history navigation re-publishes an older snapshot as the
    /// current store; the caller reopens a transient afterwards if an action
    /// batch is in progress.
    pub fn publish(&mut self, store: Store) {
        self.transient = None;
        self.current = store;
    }
}
