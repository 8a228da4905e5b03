//! Path-scoped store patches and their composition algebra.
//!
//! A [`Patch`] is an ordered collection of `(Path, PatchOp)` pairs plus a
//! base path for locality. Patches are produced by store diffs and composed
//! when merging consecutive `ApplyPatch` actions within a gesture.

use serde::{Deserialize, Serialize};

use crate::path::Path;
use crate::primitive::Primitive;
use crate::store::Store;

/// One operation against a single path.
///
/// `Remove` and `Replace` carry the overwritten value so a patch is
/// invertible and composition can detect cancellation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PatchOp {
    /// Insert a value at a previously-absent path.
    Add {
        /// The inserted value.
        value: Primitive,
    },
    /// Remove the value at a path.
    Remove {
        /// The value that was removed.
        old: Primitive,
    },
    /// Overwrite the value at a path.
    Replace {
        /// The new value.
        value: Primitive,
        /// The value that was overwritten.
        old: Primitive,
    },
}

/// An ordered set of patch ops with at most one op per path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    base: Path,
    ops: Vec<(Path, PatchOp)>,
}

impl Patch {
    /// A patch over the given ops, scoped under `base`.
    pub fn new(base: Path, ops: Vec<(Path, PatchOp)>) -> Self {
        Patch { base, ops }
    }

    /// The empty patch.
    pub fn empty() -> Self {
        Patch {
            base: Path::root(),
            ops: Vec::new(),
        }
    }

    /// The base path shared by this patch's ops.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// The ops in order.
    pub fn ops(&self) -> &[(Path, PatchOp)] {
        &self.ops
    }

    /// True if the patch contains no ops.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Applies every op to `store`, returning the patched snapshot.
    ///
    /// Removing an absent path or adding over a present one indicates a
    /// corrupt patch; both are bugs and fail debug assertions.
    pub fn apply_to(&self, store: &Store) -> Store {
        // Route through a throwaway transient so Store keeps its mutators
        // private.
        let mut shadow = crate::store::AppStore::new();
        shadow.publish(store.clone());
        shadow.begin_transient();
        for (path, op) in &self.ops {
            match op {
                PatchOp::Add { value } => {
                    debug_assert!(
                        shadow.get(path).is_none(),
                        "patch conflict: Add over existing value at {path}"
                    );
                    shadow.set(path.clone(), value.clone());
                }
                PatchOp::Remove { .. } => {
                    debug_assert!(
                        shadow.get(path).is_some(),
                        "patch conflict: Remove of absent value at {path}"
                    );
                    shadow.erase(path);
                }
                PatchOp::Replace { value, .. } => {
                    shadow.set(path.clone(), value.clone());
                }
            }
        }
        shadow.end_transient(true);
        shadow.snapshot().clone()
    }

    /// The patch that undoes this one.
    pub fn inverted(&self) -> Patch {
        let ops = self
            .ops
            .iter()
            .rev()
            .map(|(path, op)| {
                let inverse = match op {
                    PatchOp::Add { value } => PatchOp::Remove { old: value.clone() },
                    PatchOp::Remove { old } => PatchOp::Add { value: old.clone() },
                    PatchOp::Replace { value, old } => PatchOp::Replace {
                        value: old.clone(),
                        old: value.clone(),
                    },
                };
                (path.clone(), inverse)
            })
            .collect();
        Patch::new(self.base.clone(), ops)
    }

    /// Composes two chronologically consecutive patches into one.
    ///
    /// Per-path rules (older op then newer op):
    ///
    /// - `Add` then `Remove` cancel out.
    /// - `Add` then `Add`/`Replace` with an equal value cancel to the plain
    ///   `Add`; with a different value the result is `Add(new)`.
    /// - `Remove` then `Add`/`Replace` restoring the removed value cancel
    ///   out; otherwise the result is `Replace(new, removed-old)`.
    /// - `Remove` then `Remove` keeps the older `Remove`.
    /// - `Replace` then `Add`/`Replace` keeps the original old value.
    /// - `Replace` then `Remove` becomes `Remove(original-old)`.
    ///
    /// Strictly, some of these pairings cannot arise from well-formed
    /// consecutive diffs; composition stays lax so that folding a whole
    /// gesture only ever looks at neighbors.
    pub fn merge(&self, newer: &Patch) -> Patch {
        let mut merged: Vec<(Path, PatchOp)> = self.ops.clone();
        for (path, op) in &newer.ops {
            let Some(slot) = merged.iter().position(|(p, _)| p == path) else {
                merged.push((path.clone(), op.clone()));
                continue;
            };
            let older = merged[slot].1.clone();
            match compose_ops(&older, op) {
                Some(combined) => merged[slot].1 = combined,
                None => {
                    merged.remove(slot);
                }
            }
        }
        Patch::new(self.base.clone(), merged)
    }
}

/// Composes two ops at the same path; `None` means they cancel out.
fn compose_ops(older: &PatchOp, newer: &PatchOp) -> Option<PatchOp> {
    match older {
        PatchOp::Add { value: added } => match newer {
            PatchOp::Remove { .. } => None,
            PatchOp::Add { value } | PatchOp::Replace { value, .. } => {
                if value == added {
                    None
                } else {
                    Some(PatchOp::Add {
                        value: value.clone(),
                    })
                }
            }
        },
        PatchOp::Remove { old } => match newer {
            PatchOp::Add { value } | PatchOp::Replace { value, .. } => {
                if value == old {
                    None
                } else {
                    Some(PatchOp::Replace {
                        value: value.clone(),
                        old: old.clone(),
                    })
                }
            }
            PatchOp::Remove { .. } => Some(PatchOp::Remove { old: old.clone() }),
        },
        PatchOp::Replace { old, .. } => match newer {
            PatchOp::Add { value } | PatchOp::Replace { value, .. } => Some(PatchOp::Replace {
                value: value.clone(),
                old: old.clone(),
            }),
            PatchOp::Remove { .. } => Some(PatchOp::Remove { old: old.clone() }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    fn add(path: &str, v: u32) -> Patch {
        Patch::new(
            Path::root(),
            vec![(p(path), PatchOp::Add { value: v.into() })],
        )
    }

    #[test]
    fn merge_with_empty_is_identity() {
        let patch = add("/x", 1);
        assert_eq!(patch.merge(&Patch::empty()), patch);
        assert_eq!(Patch::empty().merge(&patch).ops(), patch.ops());
    }

    #[test]
    fn add_then_remove_cancels() {
        let a = add("/x", 1);
        let b = Patch::new(
            Path::root(),
            vec![(p("/x"), PatchOp::Remove { old: 1u32.into() })],
        );
        assert!(a.merge(&b).is_empty());
    }

    #[test]
    fn add_then_replace_keeps_add() {
        let a = add("/x", 1);
        let b = Patch::new(
            Path::root(),
            vec![(
                p("/x"),
                PatchOp::Replace {
                    value: 2u32.into(),
                    old: 1u32.into(),
                },
            )],
        );
        assert_eq!(
            a.merge(&b).ops(),
            &[(p("/x"), PatchOp::Add { value: 2u32.into() })]
        );
    }

    #[test]
    fn remove_then_restore_cancels() {
        let a = Patch::new(
            Path::root(),
            vec![(p("/x"), PatchOp::Remove { old: 5u32.into() })],
        );
        let b = add("/x", 5);
        assert!(a.merge(&b).is_empty());

        let c = add("/x", 6);
        assert_eq!(
            a.merge(&c).ops(),
            &[(
                p("/x"),
                PatchOp::Replace {
                    value: 6u32.into(),
                    old: 5u32.into(),
                }
            )]
        );
    }

    #[test]
    fn replace_chains_preserve_original_old() {
        let a = Patch::new(
            Path::root(),
            vec![(
                p("/x"),
                PatchOp::Replace {
                    value: 2u32.into(),
                    old: 1u32.into(),
                },
            )],
        );
        let b = Patch::new(
            Path::root(),
            vec![(
                p("/x"),
                PatchOp::Replace {
                    value: 3u32.into(),
                    old: 2u32.into(),
                },
            )],
        );
        assert_eq!(
            a.merge(&b).ops(),
            &[(
                p("/x"),
                PatchOp::Replace {
                    value: 3u32.into(),
                    old: 1u32.into(),
                }
            )]
        );

        let remove = Patch::new(
            Path::root(),
            vec![(p("/x"), PatchOp::Remove { old: 2u32.into() })],
        );
        assert_eq!(
            a.merge(&remove).ops(),
            &[(p("/x"), PatchOp::Remove { old: 1u32.into() })]
        );
    }

    #[test]
    fn invert_round_trips() {
        let mut store = crate::store::AppStore::new();
        store.begin_transient();
        store.set(p("/a"), 1u32);
        store.set(p("/b"), 2u32);
        store.end_transient(true);
        let before = store.snapshot().clone();

        store.begin_transient();
        store.set(p("/a"), 9u32);
        store.erase(&p("/b"));
        store.set(p("/c"), 3u32);
        let patch = store.end_transient(true);
        let after = store.snapshot().clone();

        assert_eq!(patch.apply_to(&before), after);
        assert_eq!(patch.inverted().apply_to(&after), before);
    }
}
