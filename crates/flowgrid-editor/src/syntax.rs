//! Incremental syntax highlighting for Faust source buffers.
//!
//! The tree is a per-line lexer with carried state: each line records the
//! lexer state it starts in (normal text or inside a block comment), its
//! styled spans, and the state it ends in. Re-parsing after an edit re-lexes
//! only from the first damaged line until the carried state re-converges
//! with the previous parse, so single-line edits touch one or two lines.
//!
//! Consumers read absolute [`StyledSpan`]s, the changed byte range of the
//! last parse, or walk a [`TransitionIter`] in lockstep with rendered bytes.

use std::ops::Range;

use crate::buffer::Edit;

/// Capture classes produced by the lexer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Style {
    /// Anything unclassified, including whitespace.
    Default,
    /// Language keywords (`process`, `import`, `with`, ...).
    Keyword,
    /// Identifiers.
    Identifier,
    /// Numeric literals.
    Number,
    /// Operators, including the composition operators `:`, `,`, `<:`, `:>`.
    Operator,
    /// Brackets and delimiters.
    Punct,
    /// String literals.
    Str,
    /// Line and block comments.
    Comment,
}

/// One styled byte range in absolute document coordinates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StyledSpan {
    /// Absolute byte range.
    pub range: Range<usize>,
    /// Capture class.
    pub style: Style,
}

const KEYWORDS: &[&str] = &[
    "process",
    "import",
    "declare",
    "with",
    "letrec",
    "environment",
    "library",
    "component",
    "ffunction",
    "fconstant",
    "fvariable",
    "case",
    "seq",
    "par",
    "sum",
    "prod",
];

/// Lexer state carried across line boundaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
enum LexState {
    #[default]
    Normal,
    InBlockComment,
}

/// One lexed line: spans in line-relative bytes plus the carried-out state.
#[derive(Clone, Debug, PartialEq)]
struct LineLex {
    spans: Vec<(Range<usize>, Style)>,
    end_state: LexState,
}

/// The incremental syntax tree for one buffer.
#[derive(Debug, Default)]
pub struct SyntaxTree {
    lines: Vec<LineLex>,
    /// Absolute start byte of each line (parallel to `lines`).
    line_starts: Vec<usize>,
    /// Byte range affected by the most recent parse.
    changed: Option<Range<usize>>,
}

impl SyntaxTree {
    /// An empty tree; call [`Self::parse`] to populate it.
    pub fn new() -> Self {
        SyntaxTree::default()
    }

    /// Parses `text` from scratch.
    pub fn parse(&mut self, text: &str) {
        self.line_starts = line_starts(text);
        self.lines.clear();
        let mut state = LexState::Normal;
        for line in text.split('\n') {
            let lex = lex_line(line, state);
            state = lex.end_state;
            self.lines.push(lex);
        }
        self.changed = Some(0..text.len());
    }

    /// Applies a buffer's edit journal and re-parses incrementally.
    ///
    /// Each edit shifts the retained lines' bookkeeping; the damaged line
    /// range is then re-lexed until the carried state converges with the
    /// previous parse. With no prior parse this falls back to a full parse.
    pub fn apply_edits(&mut self, text: &str, edits: &[Edit]) {
        if edits.is_empty() {
            self.changed = None;
            return;
        }
        if self.lines.is_empty() {
            self.parse(text);
            return;
        }

        // Map each edit's range into final-text coordinates: a later edit
        // at or before an earlier one shifts that earlier range by its byte
        // delta. The union of the mapped ranges bounds the damage; being
        // generous only costs re-lexed lines, never correctness.
        let mut damage_start = usize::MAX;
        let mut damage_end = 0usize;
        for (index, edit) in edits.iter().enumerate() {
            let shift: isize = edits[index + 1..]
                .iter()
                .filter(|later| later.start_byte <= edit.start_byte)
                .map(|later| later.new_end_byte as isize - later.old_end_byte as isize)
                .sum();
            let mapped_start = (edit.start_byte as isize + shift).max(0) as usize;
            let mapped_end = (edit.new_end_byte as isize + shift).max(0) as usize;
            damage_start = damage_start.min(mapped_start.min(edit.start_byte));
            damage_end = damage_end.max(mapped_end.max(mapped_start));
        }
        let damage_start = damage_start.min(text.len());
        let damage_end = damage_end.min(text.len());

        let new_starts = line_starts(text);
        let new_lines: Vec<&str> = text.split('\n').collect();
        let first_damaged = line_of(&new_starts, damage_start);
        let last_damaged = line_of(&new_starts, damage_end);
        let line_delta = new_lines.len() as isize - self.lines.len() as isize;

        // State entering the first damaged line comes from the retained
        // prefix, which is unchanged by construction.
        let mut state = if first_damaged == 0 {
            LexState::Normal
        } else {
            self.lines[first_damaged - 1].end_state
        };

        let mut relexed: Vec<LineLex> = Vec::new();
        let mut converged_at = new_lines.len();
        for (index, line) in new_lines.iter().enumerate().skip(first_damaged) {
            let lex = lex_line(line, state);
            state = lex.end_state;
            relexed.push(lex);
            if index >= last_damaged {
                // Past the damage: stop as soon as the carried state matches
                // what the old parse had flowing into the next line.
                let old_index = index as isize - line_delta;
                if old_index >= 0
                    && (old_index as usize) < self.lines.len()
                    && self.lines[old_index as usize].end_state == state
                {
                    converged_at = index + 1;
                    break;
                }
            }
        }

        // Stitch: retained prefix + relexed window + shifted retained tail.
        let mut lines = Vec::with_capacity(new_lines.len());
        lines.extend_from_slice(&self.lines[..first_damaged]);
        lines.extend(relexed.iter().cloned());
        if converged_at < new_lines.len() {
            let old_resume = (converged_at as isize - line_delta) as usize;
            lines.extend_from_slice(&self.lines[old_resume..]);
        }
        debug_assert_eq!(lines.len(), new_lines.len());

        let changed_to = if converged_at >= new_lines.len() {
            text.len()
        } else {
            new_starts[converged_at].saturating_sub(1).max(damage_end)
        };
        self.lines = lines;
        self.line_starts = new_starts;
        self.changed = Some(damage_start..changed_to);
    }

    /// The byte range affected by the most recent parse, if any.
    pub fn changed_range(&self) -> Option<Range<usize>> {
        self.changed.clone()
    }

    /// All non-default styled spans in absolute byte coordinates.
    pub fn styled_ranges(&self) -> Vec<StyledSpan> {
        let mut out = Vec::new();
        for (line_index, lex) in self.lines.iter().enumerate() {
            let base = self.line_starts[line_index];
            for (range, style) in &lex.spans {
                out.push(StyledSpan {
                    range: base + range.start..base + range.end,
                    style: *style,
                });
            }
        }
        out
    }

    /// A transition iterator over the current spans.
    pub fn transitions(&self) -> TransitionIter {
        TransitionIter {
            spans: self.styled_ranges(),
            index: 0,
        }
    }
}

/// Walks styled spans in byte order, yielding the style in effect at each
/// queried position. The renderer advances this in lockstep with the bytes
/// it draws; queries must be non-decreasing.
#[derive(Debug)]
pub struct TransitionIter {
    spans: Vec<StyledSpan>,
    index: usize,
}

impl TransitionIter {
    /// The style in effect at absolute byte `at`.
    pub fn advance_to(&mut self, at: usize) -> Style {
        while self.index < self.spans.len() && self.spans[self.index].range.end <= at {
            self.index += 1;
        }
        match self.spans.get(self.index) {
            Some(span) if span.range.contains(&at) => span.style,
            _ => Style::Default,
        }
    }
}

/// Absolute start byte of every line in `text`.
fn line_starts(text: &str) -> Vec<usize> {
    let mut starts = vec![0];
    for (i, b) in text.bytes().enumerate() {
        if b == b'\n' {
            starts.push(i + 1);
        }
    }
    starts
}

/// Index of the line containing absolute byte `at`.
fn line_of(starts: &[usize], at: usize) -> usize {
    match starts.binary_search(&at) {
        Ok(i) => i,
        Err(i) => i - 1,
    }
}

/// Lexes one line given the state carried in from the previous line.
fn lex_line(line: &str, start_state: LexState) -> LineLex {
    let bytes = line.as_bytes();
    let mut spans: Vec<(Range<usize>, Style)> = Vec::new();
    let mut state = start_state;
    let mut i = 0;

    while i < bytes.len() {
        if state == LexState::InBlockComment {
            match line[i..].find("*/") {
                Some(end) => {
                    spans.push((i..i + end + 2, Style::Comment));
                    i += end + 2;
                    state = LexState::Normal;
                }
                None => {
                    spans.push((i..bytes.len(), Style::Comment));
                    i = bytes.len();
                }
            }
            continue;
        }

        let rest = &line[i..];
        let c = rest.chars().next().expect("i < len");

        if rest.starts_with("//") {
            spans.push((i..bytes.len(), Style::Comment));
            break;
        }
        if rest.starts_with("/*") {
            state = LexState::InBlockComment;
            // Loop re-enters the block-comment arm to find the terminator.
            continue;
        }
        if c == '"' {
            let mut len = 1;
            let mut escaped = false;
            let mut closed = false;
            for sc in rest[1..].chars() {
                len += sc.len_utf8();
                if escaped {
                    escaped = false;
                } else if sc == '\\' {
                    escaped = true;
                } else if sc == '"' {
                    closed = true;
                    break;
                }
            }
            let _ = closed; // Unterminated strings style to end of line.
            spans.push((i..i + len, Style::Str));
            i += len;
            continue;
        }
        if c.is_ascii_digit() {
            let len = rest
                .find(|ch: char| !(ch.is_ascii_digit() || ch == '.' || ch == 'e' || ch == 'E'))
                .unwrap_or(rest.len());
            spans.push((i..i + len, Style::Number));
            i += len;
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let len = rest
                .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
                .unwrap_or(rest.len());
            let word = &rest[..len];
            let style = if word == "_" {
                Style::Operator
            } else if KEYWORDS.contains(&word) {
                Style::Keyword
            } else {
                Style::Identifier
            };
            spans.push((i..i + len, style));
            i += len;
            continue;
        }
        if matches!(c, '(' | ')' | '[' | ']' | '{' | '}' | ';') {
            spans.push((i..i + 1, Style::Punct));
            i += 1;
            continue;
        }
        if rest.starts_with("<:") || rest.starts_with(":>") {
            spans.push((i..i + 2, Style::Operator));
            i += 2;
            continue;
        }
        if matches!(
            c,
            ':' | ',' | '~' | '+' | '-' | '*' | '/' | '%' | '^' | '@' | '\'' | '!' | '=' | '<'
                | '>' | '|' | '&'
        ) {
            spans.push((i..i + 1, Style::Operator));
            i += 1;
            continue;
        }
        // Whitespace and anything else is default-styled (no span).
        i += c.len_utf8();
    }

    LineLex {
        spans,
        end_state: state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::TextBuffer;

    fn styles_of(tree: &SyntaxTree, text: &str) -> Vec<(String, Style)> {
        tree.styled_ranges()
            .into_iter()
            .map(|s| (text[s.range.clone()].to_owned(), s.style))
            .collect()
    }

    #[test]
    fn lexes_the_identity_process() {
        let text = "process = _;";
        let mut tree = SyntaxTree::new();
        tree.parse(text);
        assert_eq!(
            styles_of(&tree, text),
            vec![
                ("process".to_owned(), Style::Keyword),
                ("=".to_owned(), Style::Operator),
                ("_".to_owned(), Style::Operator),
                (";".to_owned(), Style::Punct),
            ]
        );
    }

    #[test]
    fn lexes_numbers_strings_and_comments() {
        let text = "x = 0.5; // gain\ny = \"str\";";
        let mut tree = SyntaxTree::new();
        tree.parse(text);
        let styles = styles_of(&tree, text);
        assert!(styles.contains(&("0.5".to_owned(), Style::Number)));
        assert!(styles.contains(&("// gain".to_owned(), Style::Comment)));
        assert!(styles.contains(&("\"str\"".to_owned(), Style::Str)));
    }

    #[test]
    fn block_comment_state_carries_across_lines() {
        let text = "a /* start\nstill comment\nend */ b";
        let mut tree = SyntaxTree::new();
        tree.parse(text);
        let styles = styles_of(&tree, text);
        assert!(styles.contains(&("still comment".to_owned(), Style::Comment)));
        assert!(styles.contains(&("b".to_owned(), Style::Identifier)));
    }

    #[test]
    fn composition_operators_lex_as_units() {
        let text = "process = _ <: _,_ :> _;";
        let mut tree = SyntaxTree::new();
        tree.parse(text);
        let styles = styles_of(&tree, text);
        assert!(styles.contains(&("<:".to_owned(), Style::Operator)));
        assert!(styles.contains(&(":>".to_owned(), Style::Operator)));
    }

    #[test]
    fn incremental_edit_relexes_damaged_line_only() {
        let text = "aaa\nbbb\nccc";
        let mut tree = SyntaxTree::new();
        tree.parse(text);

        let mut buf = TextBuffer::new(text);
        buf.move_down(1, false);
        buf.insert("x");
        let new_text = buf.text();
        let edits = buf.take_edits();
        tree.apply_edits(&new_text, &edits);

        let changed = tree.changed_range().unwrap();
        // Damage stays within the middle line.
        assert!(changed.start >= 4);
        assert!(changed.end <= 8);
        let styles = styles_of(&tree, &new_text);
        assert!(styles.contains(&("xbbb".to_owned(), Style::Identifier)));
        assert!(styles.contains(&("ccc".to_owned(), Style::Identifier)));
    }

    #[test]
    fn incremental_edit_opening_block_comment_cascades() {
        let text = "aaa\nbbb";
        let mut tree = SyntaxTree::new();
        tree.parse(text);

        let mut buf = TextBuffer::new(text);
        buf.insert("/* ");
        let new_text = buf.text();
        tree.apply_edits(&new_text, &buf.take_edits());

        let styles = styles_of(&tree, &new_text);
        // The comment now swallows both lines.
        assert!(styles.iter().all(|(_, s)| *s == Style::Comment));
    }

    #[test]
    fn edits_that_change_line_count_stitch_correctly() {
        let text = "one\ntwo\nthree";
        let mut tree = SyntaxTree::new();
        tree.parse(text);

        let mut buf = TextBuffer::new(text);
        buf.move_line_end(false);
        buf.enter();
        let new_text = buf.text();
        tree.apply_edits(&new_text, &buf.take_edits());

        let styles = styles_of(&tree, &new_text);
        assert!(styles.contains(&("two".to_owned(), Style::Identifier)));
        assert!(styles.contains(&("three".to_owned(), Style::Identifier)));
    }

    #[test]
    fn transition_iterator_tracks_styles() {
        let text = "a 1";
        let mut tree = SyntaxTree::new();
        tree.parse(text);
        let mut iter = tree.transitions();
        assert_eq!(iter.advance_to(0), Style::Identifier);
        assert_eq!(iter.advance_to(1), Style::Default);
        assert_eq!(iter.advance_to(2), Style::Number);
    }

    #[test]
    fn incremental_matches_full_reparse_after_multi_cursor_edit() {
        let text = "ab ab";
        let mut tree = SyntaxTree::new();
        tree.parse(text);

        let mut buf = TextBuffer::new(text);
        buf.add_cursor_next_occurrence(); // select the word under the cursor
        buf.add_cursor_next_occurrence(); // add its next occurrence
        buf.insert("num");
        let new_text = buf.text();
        assert_eq!(new_text, "num num");
        tree.apply_edits(&new_text, &buf.take_edits());

        let mut full = SyntaxTree::new();
        full.parse(&new_text);
        assert_eq!(tree.styled_ranges(), full.styled_ranges());
    }
}
