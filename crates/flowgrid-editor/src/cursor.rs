//! Cursor positions and the multi-cursor normalization rules.

use serde::{Deserialize, Serialize};

/// A position addressed as (line index, char index).
///
/// The char index counts Unicode scalar values, not bytes: a multi-byte
/// UTF-8 sequence is one char. Conversion to byte offsets happens against a
/// concrete line's contents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LineChar {
    /// Zero-based line index.
    pub line: usize,
    /// Zero-based char index within the line.
    pub ch: usize,
}

impl LineChar {
    /// Convenience constructor.
    pub fn new(line: usize, ch: usize) -> Self {
        LineChar { line, ch }
    }
}

/// A cursor: an anchor (`start`) and an active end (`end`).
///
/// The two coordinates reflect interaction order, so `start` may lie after
/// `end` when the user selected backwards; use [`Cursor::min`]/[`Cursor::max`]
/// for the ordered range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// The selection anchor.
    pub start: LineChar,
    /// The moving end (where the caret is drawn).
    pub end: LineChar,
}

impl Cursor {
    /// A collapsed cursor at `at`.
    pub fn at(at: LineChar) -> Self {
        Cursor { start: at, end: at }
    }

    /// A cursor selecting from `start` to `end`.
    pub fn span(start: LineChar, end: LineChar) -> Self {
        Cursor { start, end }
    }

    /// The earlier endpoint.
    pub fn min(&self) -> LineChar {
        self.start.min(self.end)
    }

    /// The later endpoint.
    pub fn max(&self) -> LineChar {
        self.start.max(self.end)
    }

    /// True if the cursor selects a non-empty range.
    pub fn has_selection(&self) -> bool {
        self.start != self.end
    }

    /// Collapses the selection to `at`, keeping direction state simple.
    pub fn collapse_to(&mut self, at: LineChar) {
        self.start = at;
        self.end = at;
    }
}

/// Sorts cursors by selection start and merges overlapping or touching
/// ranges.
///
/// Returns the adjusted index of the cursor previously at
/// `last_added_index`, tracked through the sort and merge by endpoint
/// equality so "the most recently added cursor" survives normalization.
pub fn sort_and_merge(cursors: &mut Vec<Cursor>, last_added_index: usize) -> usize {
    if cursors.is_empty() {
        return 0;
    }
    let last_added = cursors
        .get(last_added_index)
        .copied()
        .unwrap_or(cursors[0]);

    cursors.sort_by_key(|c| (c.min(), c.max()));

    let mut merged: Vec<Cursor> = Vec::with_capacity(cursors.len());
    for cursor in cursors.iter().copied() {
        match merged.last_mut() {
            Some(prev) if cursor.min() <= prev.max() => {
                // Overlapping or touching ranges combine; preserve the
                // later cursor's interaction direction.
                let min = prev.min();
                let max = prev.max().max(cursor.max());
                *prev = if cursor.end >= cursor.start {
                    Cursor::span(min, max)
                } else {
                    Cursor::span(max, min)
                };
            }
            _ => merged.push(cursor),
        }
    }
    *cursors = merged;

    cursors
        .iter()
        .position(|c| c.start == last_added.start && c.end == last_added.end)
        .or_else(|| {
            cursors
                .iter()
                .position(|c| c.min() <= last_added.min() && last_added.max() <= c.max())
        })
        .unwrap_or(0)
}
