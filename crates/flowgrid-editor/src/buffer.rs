//! The multi-cursor text buffer.
//!
//! Lines live in a persistent vector, so the undo history is a list of O(1)
//! snapshots sharing untouched lines. Every text mutation appends an [`Edit`]
//! record in byte coordinates to a journal that the syntax tree consumes.
//!
//! Multi-cursor edits are applied bottom-up (greatest document position
//! first): an edit never shifts the not-yet-processed cursors above it, and
//! already-placed cursors below are shifted through each edit as it lands.

use im::Vector;

use crate::cursor::{Cursor, LineChar, sort_and_merge};

/// Width of one tab stop, in columns.
const TAB_SIZE: usize = 4;

/// Single-line comment prefix of the buffer's language (Faust).
const COMMENT_PREFIX: &str = "//";

/// Undo history depth. Snapshots are cheap but not free.
const MAX_UNDO: usize = 256;

/// One journaled text change, in byte coordinates.
///
/// The bytes now occupying `start_byte..new_end_byte` replaced the bytes
/// that occupied `start_byte..old_end_byte` before the edit. Coordinates are
/// sequential: each record is expressed against the buffer as it stood when
/// that individual edit applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edit {
    /// First changed byte.
    pub start_byte: usize,
    /// One past the last replaced byte, pre-edit.
    pub old_end_byte: usize,
    /// One past the last inserted byte, post-edit.
    pub new_end_byte: usize,
}

/// The restorable portion of the buffer: lines plus cursor state.
#[derive(Clone, Debug, PartialEq)]
struct BufferValue {
    lines: Vector<String>,
    cursors: Vec<Cursor>,
    last_added: usize,
}

impl BufferValue {
    fn empty() -> Self {
        BufferValue {
            lines: Vector::unit(String::new()),
            cursors: vec![Cursor::default()],
            last_added: 0,
        }
    }
}

/// One undo step: the buffer state on either side of a mutation.
#[derive(Clone, Debug)]
struct UndoRecord {
    before: BufferValue,
    after: BufferValue,
}

/// A multi-cursor editor over UTF-8 text.
#[derive(Debug)]
pub struct TextBuffer {
    value: BufferValue,
    /// Journal of edits since the last [`TextBuffer::take_edits`].
    edits: Vec<Edit>,
    records: Vec<UndoRecord>,
    /// Number of records currently applied; `records[undo_index..]` is the
    /// redo tail.
    undo_index: usize,
}

impl Default for TextBuffer {
    fn default() -> Self {
        TextBuffer::new("")
    }
}

impl TextBuffer {
    /// A buffer holding `text`, with one cursor at the origin.
    pub fn new(text: &str) -> Self {
        let mut value = BufferValue::empty();
        value.lines = split_lines(text);
        TextBuffer {
            value,
            edits: Vec::new(),
            records: Vec::new(),
            undo_index: 0,
        }
    }

    // --- Reads ---

    /// The whole text, lines joined with `\n`.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for (i, line) in self.value.lines.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(line);
        }
        out
    }

    /// Number of lines (at least 1).
    pub fn line_count(&self) -> usize {
        self.value.lines.len()
    }

    /// One line's contents, without terminator.
    pub fn line(&self, index: usize) -> Option<&str> {
        self.value.lines.get(index).map(String::as_str)
    }

    /// The current cursors, sorted and non-overlapping.
    pub fn cursors(&self) -> &[Cursor] {
        &self.value.cursors
    }

    /// Index into [`Self::cursors`] of the most recently added cursor.
    pub fn last_added_cursor(&self) -> usize {
        self.value.last_added
    }

    /// Total byte length of the text (terminators counted as one byte).
    pub fn byte_len(&self) -> usize {
        let line_bytes: usize = self.value.lines.iter().map(String::len).sum();
        line_bytes + self.value.lines.len().saturating_sub(1)
    }

    /// Absolute byte offset of a position.
    pub fn byte_offset(&self, at: LineChar) -> usize {
        let mut offset = 0;
        for line in self.value.lines.iter().take(at.line) {
            offset += line.len() + 1;
        }
        let line = self.value.lines.get(at.line).map_or("", String::as_str);
        offset + byte_in_line(line, at.ch)
    }

    /// Takes the journaled edits, clearing the journal.
    pub fn take_edits(&mut self) -> Vec<Edit> {
        std::mem::take(&mut self.edits)
    }

    /// The selected text of `cursor`.
    pub fn selection_text(&self, cursor: &Cursor) -> String {
        self.range_text(cursor.min(), cursor.max())
    }

    fn range_text(&self, min: LineChar, max: LineChar) -> String {
        if min == max {
            return String::new();
        }
        if min.line == max.line {
            let line = &self.value.lines[min.line];
            return line[byte_in_line(line, min.ch)..byte_in_line(line, max.ch)].to_owned();
        }
        let mut out = String::new();
        let first = &self.value.lines[min.line];
        out.push_str(&first[byte_in_line(first, min.ch)..]);
        for line in self.value.lines.iter().take(max.line).skip(min.line + 1) {
            out.push('\n');
            out.push_str(line);
        }
        out.push('\n');
        let last = &self.value.lines[max.line];
        out.push_str(&last[..byte_in_line(last, max.ch)]);
        out
    }

    // --- Whole-text replacement ---

    /// Replaces the entire text, resetting cursors to the origin.
    ///
    /// No-ops (journal included) when `text` already matches.
    pub fn set_text(&mut self, text: &str) {
        if self.text() == text {
            return;
        }
        self.with_undo(|buf| {
            let old_len = buf.byte_len();
            buf.value.lines = split_lines(text);
            buf.value.cursors = vec![Cursor::default()];
            buf.value.last_added = 0;
            buf.edits.push(Edit {
                start_byte: 0,
                old_end_byte: old_len,
                new_end_byte: buf.byte_len(),
            });
        });
    }

    // --- Cursor movement ---

    /// Moves every cursor one char left (or collapses its selection).
    pub fn move_left(&mut self, select: bool) {
        self.move_each(select, |buf, c| {
            if !select && c.has_selection() {
                c.min()
            } else {
                buf.prev_char(c.end)
            }
        });
    }

    /// Moves every cursor one char right (or collapses its selection).
    pub fn move_right(&mut self, select: bool) {
        self.move_each(select, |buf, c| {
            if !select && c.has_selection() {
                c.max()
            } else {
                buf.next_char(c.end)
            }
        });
    }

    /// Moves every cursor to the previous word boundary.
    pub fn move_word_left(&mut self, select: bool) {
        self.move_each(select, |buf, c| buf.word_boundary_left(c.end));
    }

    /// Moves every cursor to the next word boundary.
    pub fn move_word_right(&mut self, select: bool) {
        self.move_each(select, |buf, c| buf.word_boundary_right(c.end));
    }

    /// Moves every cursor up `lines` lines, clamping the char index.
    pub fn move_up(&mut self, lines: usize, select: bool) {
        self.move_each(select, |buf, c| {
            let line = c.end.line.saturating_sub(lines);
            buf.clamp(LineChar::new(line, c.end.ch))
        });
    }

    /// Moves every cursor down `lines` lines, clamping the char index.
    pub fn move_down(&mut self, lines: usize, select: bool) {
        self.move_each(select, |buf, c| {
            let line = (c.end.line + lines).min(buf.value.lines.len() - 1);
            buf.clamp(LineChar::new(line, c.end.ch))
        });
    }

    /// Moves every cursor to the start of its line.
    pub fn move_line_start(&mut self, select: bool) {
        self.move_each(select, |_, c| LineChar::new(c.end.line, 0));
    }

    /// Moves every cursor to the end of its line.
    pub fn move_line_end(&mut self, select: bool) {
        self.move_each(select, |buf, c| {
            LineChar::new(c.end.line, char_count(&buf.value.lines[c.end.line]))
        });
    }

    /// Moves every cursor to the document start.
    pub fn move_top(&mut self, select: bool) {
        self.move_each(select, |_, _| LineChar::new(0, 0));
    }

    /// Moves every cursor to the document end.
    pub fn move_bottom(&mut self, select: bool) {
        self.move_each(select, |buf, _| buf.end_of_document());
    }

    /// Collapses to a single cursor at `at` (clamped into the document).
    pub fn set_cursor(&mut self, at: LineChar) {
        let at = self.clamp(at);
        self.value.cursors = vec![Cursor::at(at)];
        self.value.last_added = 0;
    }

    /// Adds a cursor at `at`, making it the most recently added.
    pub fn add_cursor_at(&mut self, at: LineChar) {
        let at = self.clamp(at);
        self.value.cursors.push(Cursor::at(at));
        self.value.last_added = self.value.cursors.len() - 1;
        self.normalize_cursors();
    }

    /// Selects the entire buffer with a single cursor.
    pub fn select_all(&mut self) {
        let end = self.end_of_document();
        self.value.cursors = vec![Cursor::span(LineChar::new(0, 0), end)];
        self.value.last_added = 0;
    }

    /// Adds a cursor selecting the next occurrence of the current selection.
    ///
    /// With no selection, the word under the last-added cursor is selected
    /// first. The search wraps around the document end.
    pub fn add_cursor_next_occurrence(&mut self) {
        let last = self.value.cursors[self.value.last_added];
        if !last.has_selection() {
            let (start, end) = self.word_around(last.end);
            self.value.cursors[self.value.last_added] = Cursor::span(start, end);
            self.normalize_cursors();
            return;
        }
        let needle = self.selection_text(&last);
        if needle.is_empty() || needle.contains('\n') {
            return;
        }
        if let Some((start, end)) = self.find_next(&needle, last.max()) {
            self.value.cursors.push(Cursor::span(start, end));
            self.value.last_added = self.value.cursors.len() - 1;
            self.normalize_cursors();
        }
    }

    /// Moves each cursor to the bracket matching the one at (or just before)
    /// it, if any.
    pub fn match_bracket(&mut self) {
        self.move_each(false, |buf, c| buf.matching_bracket(c.end).unwrap_or(c.end));
    }

    // --- Edits ---

    /// Inserts `text` at every cursor, replacing selections.
    pub fn insert(&mut self, text: &str) {
        self.with_undo(|buf| {
            buf.edit_each(|_, _| Some(text.to_owned()));
        });
    }

    /// Deletes each selection; with none, deletes one char backward or
    /// forward.
    pub fn delete(&mut self, forward: bool) {
        self.with_undo(|buf| {
            let expanded: Vec<Cursor> = buf
                .value
                .cursors
                .iter()
                .map(|c| {
                    if c.has_selection() {
                        *c
                    } else if forward {
                        Cursor::span(c.min(), buf.next_char(c.min()))
                    } else {
                        Cursor::span(buf.prev_char(c.min()), c.min())
                    }
                })
                .collect();
            buf.value.cursors = expanded;
            buf.normalize_cursors();
            buf.edit_each(|_, _| Some(String::new()));
        });
    }

    /// Inserts a newline at every cursor, indenting to the deeper of the
    /// current and next lines' leading whitespace.
    pub fn enter(&mut self) {
        self.with_undo(|buf| {
            buf.edit_each(|b, ctx| {
                let line = ctx.cursor.min().line;
                let current = leading_whitespace(&b.value.lines[line]);
                let next = b
                    .value
                    .lines
                    .get(line + 1)
                    .map(|l| leading_whitespace(l))
                    .unwrap_or_default();
                let indent = if next.len() > current.len() { next } else { current };
                Some(format!("\n{indent}"))
            });
        });
    }

    /// Pastes clipboard text.
    ///
    /// When the clipboard holds exactly as many lines as there are cursors
    /// (and more than one), each cursor receives its corresponding line;
    /// otherwise every cursor receives the full text.
    pub fn paste(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let clip_lines: Vec<String> = text.split('\n').map(str::to_owned).collect();
        let per_cursor =
            self.value.cursors.len() > 1 && clip_lines.len() == self.value.cursors.len();
        let full = text.to_owned();
        self.with_undo(|buf| {
            buf.edit_each(|_, ctx| {
                if per_cursor {
                    Some(clip_lines[ctx.cursor_index].clone())
                } else {
                    Some(full.clone())
                }
            });
        });
    }

    /// Indents (or dedents) every line covered by a cursor by one tab stop.
    pub fn indent(&mut self, dedent: bool) {
        self.with_undo(|buf| {
            for line_index in buf.covered_lines() {
                if dedent {
                    buf.dedent_line(line_index);
                } else {
                    buf.splice_in_line(line_index, 0, 0, &" ".repeat(TAB_SIZE));
                }
            }
            buf.normalize_cursors();
        });
    }

    /// Inserts or strips the line-comment prefix on every covered line.
    ///
    /// Strips only when every covered non-blank line already starts with the
    /// prefix; otherwise comments all of them.
    pub fn toggle_line_comment(&mut self) {
        self.with_undo(|buf| {
            let line_set = buf.covered_lines();
            let all_commented = line_set.iter().all(|&i| {
                let trimmed = buf.value.lines[i].trim_start();
                trimmed.is_empty() || trimmed.starts_with(COMMENT_PREFIX)
            });
            for line_index in line_set {
                let line = buf.value.lines[line_index].clone();
                let trimmed = line.trim_start();
                if trimmed.is_empty() {
                    continue;
                }
                let ws_chars = char_count(&line) - char_count(trimmed);
                if all_commented {
                    let after = trimmed.strip_prefix(COMMENT_PREFIX).unwrap_or(trimmed);
                    let after = after.strip_prefix(' ').unwrap_or(after);
                    let strip_chars = char_count(trimmed) - char_count(after);
                    buf.splice_in_line(line_index, ws_chars, ws_chars + strip_chars, "");
                } else {
                    buf.splice_in_line(line_index, ws_chars, ws_chars, "// ");
                }
            }
            buf.normalize_cursors();
        });
    }

    /// Moves every line covered by a cursor up or down by one line.
    ///
    /// No-ops when any covered line would fall off either end.
    pub fn move_lines(&mut self, up: bool) {
        let line_set = self.covered_lines();
        if line_set.is_empty()
            || (up && line_set[0] == 0)
            || (!up && *line_set.last().unwrap() == self.value.lines.len() - 1)
        {
            return;
        }
        self.with_undo(|buf| {
            let old_len = buf.byte_len();
            if up {
                for &i in &line_set {
                    buf.value.lines.swap(i - 1, i);
                }
            } else {
                for &i in line_set.iter().rev() {
                    buf.value.lines.swap(i, i + 1);
                }
            }
            let delta = if up { -1isize } else { 1 };
            for cursor in &mut buf.value.cursors {
                cursor.start.line = cursor.start.line.wrapping_add_signed(delta);
                cursor.end.line = cursor.end.line.wrapping_add_signed(delta);
            }
            // Line swaps reorder whole regions; journal one document-wide
            // edit rather than many single-byte ones.
            buf.edits.push(Edit {
                start_byte: 0,
                old_end_byte: old_len,
                new_end_byte: buf.byte_len(),
            });
            buf.normalize_cursors();
        });
    }

    // --- Buffer-local undo ---

    /// True if an undo step is available.
    pub fn can_undo(&self) -> bool {
        self.undo_index > 0
    }

    /// True if a redo step is available.
    pub fn can_redo(&self) -> bool {
        self.undo_index < self.records.len()
    }

    /// Steps the buffer back one recorded state.
    pub fn undo(&mut self) {
        if !self.can_undo() {
            return;
        }
        self.undo_index -= 1;
        let restored = self.records[self.undo_index].before.clone();
        self.restore(restored);
    }

    /// Steps the buffer forward one recorded state.
    pub fn redo(&mut self) {
        if !self.can_redo() {
            return;
        }
        let restored = self.records[self.undo_index].after.clone();
        self.undo_index += 1;
        self.restore(restored);
    }

    fn restore(&mut self, value: BufferValue) {
        let lines_changed = value.lines != self.value.lines;
        let old_len = self.byte_len();
        self.value = value;
        if lines_changed {
            self.edits.push(Edit {
                start_byte: 0,
                old_end_byte: old_len,
                new_end_byte: self.byte_len(),
            });
        }
    }

    // --- Internals ---

    /// Runs a mutation, recording before/after states as one undo step.
    ///
    /// Mutations that end up changing nothing leave no record behind.
    fn with_undo(&mut self, mutate: impl FnOnce(&mut Self)) {
        let before = self.value.clone();
        mutate(self);
        if self.value == before {
            return;
        }
        self.records.truncate(self.undo_index);
        self.records.push(UndoRecord {
            before,
            after: self.value.clone(),
        });
        if self.records.len() > MAX_UNDO {
            self.records.remove(0);
        }
        self.undo_index = self.records.len();
    }

    fn end_of_document(&self) -> LineChar {
        let line = self.value.lines.len() - 1;
        LineChar::new(line, char_count(&self.value.lines[line]))
    }

    fn clamp(&self, at: LineChar) -> LineChar {
        let line = at.line.min(self.value.lines.len() - 1);
        let ch = at.ch.min(char_count(&self.value.lines[line]));
        LineChar::new(line, ch)
    }

    fn prev_char(&self, at: LineChar) -> LineChar {
        if at.ch > 0 {
            LineChar::new(at.line, at.ch - 1)
        } else if at.line > 0 {
            LineChar::new(at.line - 1, char_count(&self.value.lines[at.line - 1]))
        } else {
            at
        }
    }

    fn next_char(&self, at: LineChar) -> LineChar {
        if at.ch < char_count(&self.value.lines[at.line]) {
            LineChar::new(at.line, at.ch + 1)
        } else if at.line + 1 < self.value.lines.len() {
            LineChar::new(at.line + 1, 0)
        } else {
            at
        }
    }

    /// Class of the char to the right of `at` (line ends read as space).
    fn char_class_after(&self, at: LineChar) -> CharClass {
        self.char_at(at).map_or(CharClass::Space, classify)
    }

    fn char_at(&self, at: LineChar) -> Option<char> {
        self.value.lines.get(at.line)?.chars().nth(at.ch)
    }

    /// Previous position where the char-class run changes.
    fn word_boundary_left(&self, at: LineChar) -> LineChar {
        let mut pos = self.prev_char(at);
        if pos == at {
            return at;
        }
        let class = self.char_class_after(pos);
        while pos.ch > 0 {
            let prev = self.prev_char(pos);
            if self.char_class_after(prev) != class {
                break;
            }
            pos = prev;
        }
        pos
    }

    /// Next position where the char-class run changes.
    fn word_boundary_right(&self, at: LineChar) -> LineChar {
        let mut pos = at;
        if self.next_char(pos) == pos {
            return at;
        }
        let class = self.char_class_after(pos);
        loop {
            let next = self.next_char(pos);
            if next == pos {
                break;
            }
            pos = next;
            if pos.ch == 0 || self.char_class_after(pos) != class {
                break;
            }
        }
        pos
    }

    /// The word (alphanumeric run) surrounding `at` on its line.
    fn word_around(&self, at: LineChar) -> (LineChar, LineChar) {
        let line = &self.value.lines[at.line];
        let chars: Vec<char> = line.chars().collect();
        let mut start = at.ch.min(chars.len());
        let mut end = start;
        while start > 0 && classify(chars[start - 1]) == CharClass::Word {
            start -= 1;
        }
        while end < chars.len() && classify(chars[end]) == CharClass::Word {
            end += 1;
        }
        (LineChar::new(at.line, start), LineChar::new(at.line, end))
    }

    /// Finds the next occurrence of `needle` at or after `from`, wrapping at
    /// the document end.
    fn find_next(&self, needle: &str, from: LineChar) -> Option<(LineChar, LineChar)> {
        let line_count = self.value.lines.len();
        let needle_chars = char_count(needle);
        for step in 0..=line_count {
            let line_index = (from.line + step) % line_count;
            let line = &self.value.lines[line_index];
            let start_ch = if step == 0 { from.ch } else { 0 };
            let start_byte = byte_in_line(line, start_ch);
            if let Some(found) = line[start_byte..].find(needle) {
                let found_ch = char_count(&line[..start_byte + found]);
                let start = LineChar::new(line_index, found_ch);
                // The wrapped revisit of the starting line must not re-find
                // the occurrence the search began from.
                if step == line_count && start >= from {
                    return None;
                }
                return Some((start, LineChar::new(line_index, found_ch + needle_chars)));
            }
        }
        None
    }

    fn matching_bracket(&self, at: LineChar) -> Option<LineChar> {
        const PAIRS: [(char, char); 3] = [('(', ')'), ('[', ']'), ('{', '}')];
        let is_bracket = |c: char| PAIRS.iter().any(|&(o, cl)| c == o || c == cl);
        let (pos, ch) = match self.char_at(at) {
            Some(c) if is_bracket(c) => (at, c),
            _ => {
                let prev = self.prev_char(at);
                let c = self.char_at(prev).filter(|c| is_bracket(*c))?;
                (prev, c)
            }
        };
        let (open, close, forward) = PAIRS.iter().find_map(|&(o, c)| {
            if ch == o {
                Some((o, c, true))
            } else if ch == c {
                Some((o, c, false))
            } else {
                None
            }
        })?;
        let mut depth = 0i32;
        let mut cursor = pos;
        loop {
            if let Some(c) = self.char_at(cursor) {
                if c == open {
                    depth += if forward { 1 } else { -1 };
                } else if c == close {
                    depth += if forward { -1 } else { 1 };
                }
                if depth == 0 {
                    return Some(cursor);
                }
            }
            let next = if forward {
                self.next_char(cursor)
            } else {
                self.prev_char(cursor)
            };
            if next == cursor {
                return None;
            }
            cursor = next;
        }
    }

    /// Sorted, deduplicated indices of every line covered by a cursor.
    fn covered_lines(&self) -> Vec<usize> {
        let mut lines: Vec<usize> = self
            .value
            .cursors
            .iter()
            .flat_map(|c| c.min().line..=c.max().line)
            .collect();
        lines.sort_unstable();
        lines.dedup();
        lines
    }

    fn dedent_line(&mut self, line_index: usize) {
        let line = &self.value.lines[line_index];
        let remove = if line.starts_with('\t') {
            1
        } else {
            line.chars().take(TAB_SIZE).take_while(|c| *c == ' ').count()
        };
        if remove > 0 {
            self.splice_in_line(line_index, 0, remove, "");
        }
    }

    /// Single-line replacement that also shifts cursor chars on that line.
    fn splice_in_line(&mut self, line: usize, start_ch: usize, end_ch: usize, text: &str) {
        self.splice(
            LineChar::new(line, start_ch),
            LineChar::new(line, end_ch),
            text,
        );
        let removed = end_ch - start_ch;
        let inserted = char_count(text);
        for cursor in &mut self.value.cursors {
            for point in [&mut cursor.start, &mut cursor.end] {
                if point.line == line && point.ch >= start_ch {
                    point.ch = point.ch.saturating_sub(removed).saturating_add(inserted);
                }
            }
        }
    }

    fn move_each(&mut self, select: bool, target: impl Fn(&TextBuffer, &Cursor) -> LineChar) {
        let mut cursors = self.value.cursors.clone();
        for cursor in &mut cursors {
            let to = target(self, cursor);
            if select {
                cursor.end = to;
            } else {
                cursor.collapse_to(to);
            }
        }
        self.value.cursors = cursors;
        self.normalize_cursors();
    }

    fn normalize_cursors(&mut self) {
        self.value.last_added = sort_and_merge(&mut self.value.cursors, self.value.last_added);
    }

    /// Applies one replacement per cursor, bottom-up, journaling each edit
    /// and re-normalizing cursors afterwards. The closure may return `None`
    /// to skip a cursor.
    fn edit_each(&mut self, replacement: impl Fn(&TextBuffer, &EditContext) -> Option<String>) {
        let mut order: Vec<usize> = (0..self.value.cursors.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(self.value.cursors[i].min()));

        for i in order {
            let cursor = self.value.cursors[i];
            let ctx = EditContext {
                cursor_index: i,
                cursor,
            };
            let Some(text) = replacement(self, &ctx) else {
                continue;
            };
            let end = self.splice_tracked(cursor.min(), cursor.max(), &text, i);
            self.value.cursors[i] = Cursor::at(end);
        }
        self.normalize_cursors();
    }

    /// Replaces `min..max` with `text`, shifting all other cursors at or
    /// after `max`; returns the end position of the inserted text.
    fn splice_tracked(
        &mut self,
        min: LineChar,
        max: LineChar,
        text: &str,
        editing: usize,
    ) -> LineChar {
        let end = self.splice(min, max, text);
        let line_delta = end.line as isize - max.line as isize;
        for (i, cursor) in self.value.cursors.iter_mut().enumerate() {
            if i == editing {
                continue;
            }
            for point in [&mut cursor.start, &mut cursor.end] {
                if *point < max {
                    continue;
                }
                if point.line == max.line {
                    point.ch = end.ch + (point.ch - max.ch);
                    point.line = end.line;
                } else {
                    point.line = point.line.wrapping_add_signed(line_delta);
                }
            }
        }
        end
    }

    /// The raw replacement primitive: rewrites lines and journals the edit.
    fn splice(&mut self, min: LineChar, max: LineChar, text: &str) -> LineChar {
        if min == max && text.is_empty() {
            return min;
        }
        let start_byte = self.byte_offset(min);
        let old_end_byte = self.byte_offset(max);

        let first = &self.value.lines[min.line];
        let prefix = first[..byte_in_line(first, min.ch)].to_owned();
        let last = &self.value.lines[max.line];
        let suffix = last[byte_in_line(last, max.ch)..].to_owned();

        let combined = format!("{prefix}{text}{suffix}");

        // Rebuild the affected slice of the persistent vector.
        let mut middle_and_tail = self.value.lines.split_off(min.line);
        let tail = middle_and_tail.split_off(max.line - min.line + 1);
        for segment in combined.split('\n') {
            self.value.lines.push_back(segment.to_owned());
        }
        self.value.lines.append(tail);

        let end = match text.rfind('\n') {
            Some(last_newline) => LineChar::new(
                min.line + text.matches('\n').count(),
                char_count(&text[last_newline + 1..]),
            ),
            None => LineChar::new(min.line, min.ch + char_count(text)),
        };

        self.edits.push(Edit {
            start_byte,
            old_end_byte,
            new_end_byte: start_byte + text.len(),
        });
        end
    }
}

/// Context handed to per-cursor replacement closures.
struct EditContext {
    cursor_index: usize,
    cursor: Cursor,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Word,
    Space,
    Other,
}

fn classify(c: char) -> CharClass {
    if c.is_alphanumeric() || c == '_' {
        CharClass::Word
    } else if c.is_whitespace() {
        CharClass::Space
    } else {
        CharClass::Other
    }
}

fn char_count(s: &str) -> usize {
    s.chars().count()
}

/// Byte offset of the `ch`-th char in `line` (clamped to the line end).
fn byte_in_line(line: &str, ch: usize) -> usize {
    line.char_indices()
        .nth(ch)
        .map_or(line.len(), |(byte, _)| byte)
}

fn leading_whitespace(line: &str) -> String {
    line.chars()
        .take_while(|c| *c == ' ' || *c == '\t')
        .collect()
}

fn split_lines(text: &str) -> Vector<String> {
    let lines: Vector<String> = text.split('\n').map(str::to_owned).collect();
    if lines.is_empty() {
        Vector::unit(String::new())
    } else {
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lc(line: usize, ch: usize) -> LineChar {
        LineChar::new(line, ch)
    }

    fn buffer_with_cursors(text: &str, cursors: &[Cursor]) -> TextBuffer {
        let mut buf = TextBuffer::new(text);
        buf.value.cursors = cursors.to_vec();
        buf.value.last_added = cursors.len() - 1;
        buf.normalize_cursors();
        buf
    }

    #[test]
    fn insert_at_single_cursor() {
        let mut buf = TextBuffer::new("hello");
        buf.move_line_end(false);
        buf.insert(", world");
        assert_eq!(buf.text(), "hello, world");
        assert_eq!(buf.cursors(), &[Cursor::at(lc(0, 12))]);
    }

    #[test]
    fn insert_replaces_selection() {
        let mut buf = buffer_with_cursors("hello", &[Cursor::span(lc(0, 0), lc(0, 5))]);
        buf.insert("bye");
        assert_eq!(buf.text(), "bye");
    }

    #[test]
    fn multi_cursor_insert_same_line() {
        let cursors = [Cursor::at(lc(0, 1)), Cursor::at(lc(0, 3))];
        let mut buf = buffer_with_cursors("abcd", &cursors);
        buf.insert("X");
        assert_eq!(buf.text(), "aXbcXd");
        assert_eq!(buf.cursors(), &[Cursor::at(lc(0, 2)), Cursor::at(lc(0, 5))]);
    }

    #[test]
    fn backspace_joins_lines() {
        let mut buf = buffer_with_cursors("ab\ncd", &[Cursor::at(lc(1, 0))]);
        buf.delete(false);
        assert_eq!(buf.text(), "abcd");
        assert_eq!(buf.cursors(), &[Cursor::at(lc(0, 2))]);
    }

    #[test]
    fn forward_delete() {
        let mut buf = buffer_with_cursors("ab", &[Cursor::at(lc(0, 0))]);
        buf.delete(true);
        assert_eq!(buf.text(), "b");
    }

    #[test]
    fn delete_at_document_start_is_a_no_op() {
        let mut buf = TextBuffer::new("ab");
        buf.delete(false);
        assert_eq!(buf.text(), "ab");
        assert!(!buf.can_undo());
        assert!(buf.take_edits().is_empty());
    }

    #[test]
    fn enter_auto_indents_to_deeper_neighbor() {
        let mut buf = buffer_with_cursors("fn x\n    body", &[Cursor::at(lc(0, 4))]);
        buf.enter();
        assert_eq!(buf.text(), "fn x\n    \n    body");
        assert_eq!(buf.cursors(), &[Cursor::at(lc(1, 4))]);
    }

    #[test]
    fn paste_line_per_cursor_when_counts_match() {
        let cursors = [Cursor::at(lc(0, 3)), Cursor::at(lc(1, 3))];
        let mut buf = buffer_with_cursors("foo\nbar", &cursors);
        buf.paste("X\nY");
        assert_eq!(buf.text(), "fooX\nbarY");
    }

    #[test]
    fn paste_full_text_when_counts_differ() {
        let cursors = [Cursor::at(lc(0, 3)), Cursor::at(lc(1, 3))];
        let mut buf = buffer_with_cursors("foo\nbar", &cursors);
        buf.paste("Z");
        assert_eq!(buf.text(), "fooZ\nbarZ");
    }

    #[test]
    fn paste_multiline_to_single_cursor() {
        let mut buf = buffer_with_cursors("ab", &[Cursor::at(lc(0, 1))]);
        buf.paste("1\n2");
        assert_eq!(buf.text(), "a1\n2b");
        assert_eq!(buf.cursors(), &[Cursor::at(lc(1, 1))]);
    }

    #[test]
    fn edits_journal_byte_bookkeeping() {
        let mut buf = TextBuffer::new("hello");
        buf.move_line_end(false);
        buf.insert("!");
        let edits = buf.take_edits();
        assert_eq!(
            edits,
            vec![Edit {
                start_byte: 5,
                old_end_byte: 5,
                new_end_byte: 6,
            }]
        );
        assert!(buf.take_edits().is_empty());
    }

    #[test]
    fn multi_cursor_edits_journal_bottom_up() {
        let cursors = [Cursor::at(lc(0, 1)), Cursor::at(lc(1, 1))];
        let mut buf = buffer_with_cursors("ab\ncd", &cursors);
        buf.insert("X");
        let edits = buf.take_edits();
        // The bottom cursor edits first, so its byte offsets are pre-shift.
        assert_eq!(
            edits,
            vec![
                Edit {
                    start_byte: 4,
                    old_end_byte: 4,
                    new_end_byte: 5,
                },
                Edit {
                    start_byte: 1,
                    old_end_byte: 1,
                    new_end_byte: 2,
                },
            ]
        );
        assert_eq!(buf.text(), "aXb\ncXd");
    }

    #[test]
    fn overlapping_cursors_merge() {
        let cursors = [Cursor::at(lc(0, 2)), Cursor::span(lc(0, 2), lc(0, 4))];
        let buf = buffer_with_cursors("abcdef", &cursors);
        assert_eq!(buf.cursors().len(), 1);
    }

    #[test]
    fn word_movement() {
        let mut buf = TextBuffer::new("foo bar_baz  qux");
        buf.move_word_right(false);
        assert_eq!(buf.cursors()[0].end, lc(0, 3));
        buf.move_word_right(false);
        assert_eq!(buf.cursors()[0].end, lc(0, 4));
        buf.move_word_right(false);
        assert_eq!(buf.cursors()[0].end, lc(0, 11));
        buf.move_word_left(false);
        assert_eq!(buf.cursors()[0].end, lc(0, 4));
    }

    #[test]
    fn select_all_spans_document() {
        let mut buf = TextBuffer::new("one two one");
        buf.select_all();
        assert_eq!(buf.cursors(), &[Cursor::span(lc(0, 0), lc(0, 11))]);
    }

    #[test]
    fn next_occurrence_adds_cursor() {
        let mut buf = buffer_with_cursors("one two one", &[Cursor::span(lc(0, 0), lc(0, 3))]);
        buf.add_cursor_next_occurrence();
        assert_eq!(buf.cursors().len(), 2);
        assert_eq!(buf.cursors()[1], Cursor::span(lc(0, 8), lc(0, 11)));
        assert_eq!(buf.last_added_cursor(), 1);
    }

    #[test]
    fn next_occurrence_wraps_around() {
        let mut buf =
            buffer_with_cursors("one\ntwo\none more", &[Cursor::span(lc(2, 0), lc(2, 3))]);
        buf.add_cursor_next_occurrence();
        assert_eq!(buf.cursors().len(), 2);
        assert_eq!(buf.cursors()[0], Cursor::span(lc(0, 0), lc(0, 3)));
    }

    #[test]
    fn next_occurrence_selects_word_first() {
        let mut buf = buffer_with_cursors("alpha beta", &[Cursor::at(lc(0, 2))]);
        buf.add_cursor_next_occurrence();
        assert_eq!(buf.cursors(), &[Cursor::span(lc(0, 0), lc(0, 5))]);
    }

    #[test]
    fn bracket_matching() {
        let mut buf = buffer_with_cursors("f(a, (b))", &[Cursor::at(lc(0, 1))]);
        buf.match_bracket();
        assert_eq!(buf.cursors()[0].end, lc(0, 8));
        buf.match_bracket();
        assert_eq!(buf.cursors()[0].end, lc(0, 1));
    }

    #[test]
    fn indent_and_dedent() {
        let cursors = [Cursor::span(lc(0, 0), lc(1, 2))];
        let mut buf = buffer_with_cursors("aa\nbb\ncc", &cursors);
        buf.indent(false);
        assert_eq!(buf.text(), "    aa\n    bb\ncc");
        buf.indent(true);
        assert_eq!(buf.text(), "aa\nbb\ncc");
    }

    #[test]
    fn toggle_line_comment_round_trip() {
        let cursors = [Cursor::span(lc(0, 0), lc(1, 0))];
        let mut buf = buffer_with_cursors("process = _;\n  x = 1;", &cursors);
        buf.toggle_line_comment();
        assert_eq!(buf.text(), "// process = _;\n  // x = 1;");
        buf.toggle_line_comment();
        assert_eq!(buf.text(), "process = _;\n  x = 1;");
    }

    #[test]
    fn move_lines_up_and_down() {
        let mut buf = buffer_with_cursors("a\nb\nc", &[Cursor::at(lc(1, 0))]);
        buf.move_lines(true);
        assert_eq!(buf.text(), "b\na\nc");
        assert_eq!(buf.cursors()[0].end, lc(0, 0));
        buf.move_lines(false);
        assert_eq!(buf.text(), "a\nb\nc");

        // Clamped at the edges.
        let mut top = buffer_with_cursors("a\nb", &[Cursor::at(lc(0, 0))]);
        top.move_lines(true);
        assert_eq!(top.text(), "a\nb");
        assert!(!top.can_undo());
    }

    #[test]
    fn undo_redo_round_trip() {
        let mut buf = TextBuffer::new("start");
        buf.move_line_end(false);
        buf.insert("!");
        assert_eq!(buf.text(), "start!");
        assert!(buf.can_undo());

        buf.undo();
        assert_eq!(buf.text(), "start");
        assert!(buf.can_redo());

        buf.redo();
        assert_eq!(buf.text(), "start!");
        assert!(!buf.can_redo());
    }

    #[test]
    fn undo_restores_cursors() {
        let cursors = [Cursor::at(lc(0, 1)), Cursor::at(lc(0, 3))];
        let mut buf = buffer_with_cursors("abcd", &cursors);
        buf.insert("X");
        buf.undo();
        assert_eq!(buf.text(), "abcd");
        assert_eq!(buf.cursors(), &cursors);
    }

    #[test]
    fn new_edit_truncates_redo_tail() {
        let mut buf = TextBuffer::new("a");
        buf.move_line_end(false);
        buf.insert("b");
        buf.undo();
        buf.insert("c");
        assert_eq!(buf.text(), "ca");
        assert!(!buf.can_redo());
    }

    #[test]
    fn set_text_resets_cursors_and_journals() {
        let mut buf = TextBuffer::new("old text");
        buf.set_text("new");
        assert_eq!(buf.text(), "new");
        assert_eq!(buf.cursors(), &[Cursor::default()]);
        let edits = buf.take_edits();
        assert_eq!(
            edits,
            vec![Edit {
                start_byte: 0,
                old_end_byte: 8,
                new_end_byte: 3,
            }]
        );
        // Setting identical text journals nothing.
        buf.set_text("new");
        assert!(buf.take_edits().is_empty());
    }

    #[test]
    fn utf8_positions_count_chars_not_bytes() {
        let mut buf = buffer_with_cursors("aéb", &[Cursor::at(lc(0, 2))]);
        buf.insert("ø");
        assert_eq!(buf.text(), "aéøb");
        // Byte offset of char 2 is 3 (é is two bytes).
        let edits = buf.take_edits();
        assert_eq!(edits[0].start_byte, 3);
        assert_eq!(edits[0].new_end_byte, 5);
    }

    #[test]
    fn edit_byte_accounting_sums_to_length_change() {
        // The journal's per-edit deltas must add up to the total byte-length
        // change, and every edit's pre-edit range must be well-formed.
        let cursors = [Cursor::at(lc(0, 2)), Cursor::at(lc(1, 1))];
        let mut buf = buffer_with_cursors("abcd\nefgh", &cursors);
        let before_len = buf.byte_len();
        buf.insert("XY");
        buf.delete(false);
        let after_len = buf.byte_len();

        let edits = buf.take_edits();
        let delta: isize = edits
            .iter()
            .map(|e| e.new_end_byte as isize - e.old_end_byte as isize)
            .sum();
        assert_eq!(before_len as isize + delta, after_len as isize);
        for edit in edits {
            assert!(edit.start_byte <= edit.old_end_byte);
            assert!(edit.start_byte <= edit.new_end_byte);
        }
    }
}
