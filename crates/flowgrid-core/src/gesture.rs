//! Gestures: grouping and merging of consecutive savable actions.
//!
//! Actions applied in close temporal proximity are collected into a gesture
//! and committed to the history as one atomic undo unit. Before commit the
//! gesture is compressed: consecutive actions on the same logical target are
//! coalesced, and pairs that cancel (two toggles of the same path) drop out
//! entirely.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::action::{Action, BufferOp, PrimitiveAction};

/// Wall-clock instant in milliseconds since the Unix epoch.
///
/// Wall time is recorded for display and for `.fla` ordering only; gesture
/// timeout decisions use a monotonic clock held by the main loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// The current wall-clock time.
    pub fn now() -> Self {
        Timestamp(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
                .unwrap_or(0),
        )
    }
}

/// An action paired with the wall-clock time it was queued.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionMoment {
    /// The queued action.
    pub action: Action,
    /// When it entered the queue.
    pub queued_at: Timestamp,
}

/// An ordered sequence of savable action moments committed as one undo unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gesture {
    /// The (already merged) actions, oldest first.
    #[serde(rename = "Actions")]
    pub actions: Vec<ActionMoment>,
    /// When the gesture was committed.
    #[serde(rename = "CommitTime")]
    pub committed_at: Timestamp,
}

/// Outcome of attempting to merge two chronologically consecutive actions.
enum MergeOutcome {
    /// `b` absorbed `a`; carry the combined action forward.
    Merged(Action),
    /// The pair is a no-op (e.g. two toggles of one path); drop both.
    Cancel,
    /// The actions are unrelated; keep both.
    Incompatible,
}

/// Tries to merge consecutive savable actions `a` then `b`.
///
/// Only pairings decidable from two neighbors are handled; an idempotent
/// cycle spread over more than two actions (say, incrementing modulo N) is
/// not detected.
fn merge_pair(a: &Action, b: &Action) -> MergeOutcome {
    use MergeOutcome::{Cancel, Incompatible, Merged};

    match (a, b) {
        (
            Action::Primitive(PrimitiveAction::Set { path: pa, .. }),
            Action::Primitive(PrimitiveAction::Set { path: pb, .. }),
        ) if pa == pb => Merged(b.clone()),

        (
            Action::Primitive(PrimitiveAction::SetMany { values: va }),
            Action::Primitive(PrimitiveAction::SetMany { values: vb }),
        ) => {
            let mut values = va.clone();
            values.extend(vb.iter().cloned());
            Merged(Action::Primitive(PrimitiveAction::SetMany { values }))
        }

        (
            Action::Primitive(PrimitiveAction::Toggle { path: pa }),
            Action::Primitive(PrimitiveAction::Toggle { path: pb }),
        ) => {
            if pa == pb {
                Cancel
            } else {
                Incompatible
            }
        }

        (
            Action::Primitive(PrimitiveAction::ApplyPatch { patch: a }),
            Action::Primitive(PrimitiveAction::ApplyPatch { patch: b }),
        ) => {
            // Patches scoped to different bases are likely semantically
            // distinct; keep them separate.
            let merged = a.merge(b);
            if merged.is_empty() {
                Cancel
            } else if a.base() == b.base() {
                Merged(Action::Primitive(PrimitiveAction::ApplyPatch {
                    patch: merged,
                }))
            } else {
                Incompatible
            }
        }

        (
            Action::Faust(crate::action::FaustAction::SetCode { dsp: da, .. }),
            Action::Faust(crate::action::FaustAction::SetCode { dsp: db, .. }),
        ) if da == db => Merged(b.clone()),

        (Action::Buffer(ba), Action::Buffer(bb))
            if ba.buffer == bb.buffer
                && matches!(ba.op, BufferOp::SetText { .. })
                && matches!(bb.op, BufferOp::SetText { .. }) =>
        {
            Merged(b.clone())
        }

        _ => Incompatible,
    }
}

/// True if `b` would coalesce with a directly preceding `a` (merge or
/// cancel). The queue drain uses this to decide whether a toggle-like
/// action extends the open gesture or closes it first: two toggles of one
/// path must stay together so they can cancel, while a toggle after an
/// unrelated edit starts its own undo unit.
pub fn can_coalesce(a: &Action, b: &Action) -> bool {
    !matches!(merge_pair(a, b), MergeOutcome::Incompatible)
}

/// Compresses a gesture's action list.
///
/// Walks the list carrying an `active` moment which is either an original
/// action or the result of merging a run of consecutive actions. Cancelling
/// pairs contribute nothing; merged runs keep the latest queue time.
pub fn merge_gesture(actions: &[ActionMoment]) -> Vec<ActionMoment> {
    let mut merged: Vec<ActionMoment> = Vec::new();
    let mut active: Option<ActionMoment> = None;

    for moment in actions {
        let Some(current) = active.take() else {
            active = Some(moment.clone());
            continue;
        };
        match merge_pair(&current.action, &moment.action) {
            MergeOutcome::Merged(action) => {
                active = Some(ActionMoment {
                    action,
                    queued_at: moment.queued_at,
                });
            }
            MergeOutcome::Cancel => {
                // Both actions drop; start fresh with the next one.
            }
            MergeOutcome::Incompatible => {
                merged.push(current);
                active = Some(moment.clone());
            }
        }
    }
    if let Some(last) = active {
        merged.push(last);
    }
    merged
}
