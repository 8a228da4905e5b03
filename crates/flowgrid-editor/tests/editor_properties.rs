//! Property-based tests for the text buffer's structural invariants.

use proptest::prelude::*;

use flowgrid_editor::{Cursor, LineChar, SyntaxTree, TextBuffer};

/// A small arbitrary document.
fn arb_text() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z (){};=_]{0,12}", 1..6).prop_map(|lines| lines.join("\n"))
}

/// Arbitrary edit scripts over a buffer.
#[derive(Clone, Debug)]
enum Op {
    Insert(String),
    Delete { forward: bool },
    Enter,
    MoveRight { select: bool },
    MoveDown { select: bool },
    MoveWordRight,
    AddCursor,
    Paste(String),
    Undo,
    Redo,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        "[a-z;() ]{1,5}".prop_map(Op::Insert),
        any::<bool>().prop_map(|forward| Op::Delete { forward }),
        Just(Op::Enter),
        any::<bool>().prop_map(|select| Op::MoveRight { select }),
        any::<bool>().prop_map(|select| Op::MoveDown { select }),
        Just(Op::MoveWordRight),
        Just(Op::AddCursor),
        "[a-z\n]{1,6}".prop_map(Op::Paste),
        Just(Op::Undo),
        Just(Op::Redo),
    ]
}

fn apply(buf: &mut TextBuffer, op: &Op) {
    match op {
        Op::Insert(text) => buf.insert(text),
        Op::Delete { forward } => buf.delete(*forward),
        Op::Enter => buf.enter(),
        Op::MoveRight { select } => buf.move_right(*select),
        Op::MoveDown { select } => buf.move_down(1, *select),
        Op::MoveWordRight => buf.move_word_right(false),
        Op::AddCursor => buf.add_cursor_next_occurrence(),
        Op::Paste(text) => buf.paste(text),
        Op::Undo => buf.undo(),
        Op::Redo => buf.redo(),
    }
}

/// Cursors must be sorted by selection start with no overlapping ranges.
fn assert_cursor_invariants(cursors: &[Cursor]) {
    for pair in cursors.windows(2) {
        assert!(
            pair[0].min() <= pair[1].min(),
            "cursors out of order: {pair:?}"
        );
        assert!(
            pair[0].max() <= pair[1].min(),
            "cursors overlap: {pair:?}"
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(192))]

    /// After any operation sequence, cursors are sorted and non-overlapping,
    /// and every cursor endpoint addresses a valid position.
    #[test]
    fn cursors_stay_sorted_and_merged(
        text in arb_text(),
        ops in prop::collection::vec(arb_op(), 1..24),
    ) {
        let mut buf = TextBuffer::new(&text);
        for op in &ops {
            apply(&mut buf, op);
            assert_cursor_invariants(buf.cursors());
            for cursor in buf.cursors() {
                for point in [cursor.start, cursor.end] {
                    prop_assert!(point.line < buf.line_count());
                    let line = buf.line(point.line).unwrap();
                    prop_assert!(point.ch <= line.chars().count());
                }
            }
        }
    }

    /// The edit journal's byte deltas always sum to the buffer's total byte
    /// length change.
    #[test]
    fn journal_accounts_for_length_changes(
        text in arb_text(),
        ops in prop::collection::vec(arb_op(), 1..16),
    ) {
        let mut buf = TextBuffer::new(&text);
        let initial = buf.byte_len() as isize;
        for op in &ops {
            apply(&mut buf, op);
        }
        let delta: isize = buf
            .take_edits()
            .iter()
            .map(|e| e.new_end_byte as isize - e.old_end_byte as isize)
            .sum();
        prop_assert_eq!(initial + delta, buf.byte_len() as isize);
    }

    /// Incrementally re-parsing after any edit script yields exactly the
    /// spans of a from-scratch parse.
    #[test]
    fn incremental_parse_matches_full_parse(
        text in arb_text(),
        ops in prop::collection::vec(arb_op(), 1..16),
    ) {
        let mut buf = TextBuffer::new(&text);
        let mut tree = SyntaxTree::new();
        tree.parse(&text);

        for op in &ops {
            apply(&mut buf, op);
            let current = buf.text();
            tree.apply_edits(&current, &buf.take_edits());

            let mut fresh = SyntaxTree::new();
            fresh.parse(&current);
            prop_assert_eq!(tree.styled_ranges(), fresh.styled_ranges());
        }
    }

    /// Undo then redo returns the buffer to the same text and cursors.
    #[test]
    fn undo_redo_symmetry(
        text in arb_text(),
        ops in prop::collection::vec(arb_op(), 1..12),
    ) {
        let mut buf = TextBuffer::new(&text);
        for op in &ops {
            apply(&mut buf, op);
        }
        let text_before = buf.text();
        let cursors_before = buf.cursors().to_vec();
        if buf.can_undo() {
            buf.undo();
            buf.redo();
            prop_assert_eq!(buf.text(), text_before);
            prop_assert_eq!(buf.cursors(), cursors_before.as_slice());
        }
    }
}

#[test]
fn multi_cursor_paste_scenario() {
    // Two lines, a cursor at the end of each; a two-line clipboard pastes
    // line-per-cursor, anything else pastes wholesale.
    let mut buf = TextBuffer::new("foo\nbar");
    buf.set_cursor(LineChar::new(0, 3));
    buf.add_cursor_at(LineChar::new(1, 3));
    assert_eq!(buf.cursors().len(), 2);

    buf.paste("X\nY");
    assert_eq!(buf.text(), "fooX\nbarY");

    let mut buf = TextBuffer::new("foo\nbar");
    buf.set_cursor(LineChar::new(0, 3));
    buf.add_cursor_at(LineChar::new(1, 3));
    buf.paste("Z");
    assert_eq!(buf.text(), "fooZ\nbarZ");
}

#[test]
fn last_added_cursor_survives_normalization() {
    let mut buf = TextBuffer::new("one two one");
    buf.add_cursor_next_occurrence();
    buf.add_cursor_next_occurrence();
    let last = buf.last_added_cursor();
    assert_eq!(buf.cursors().len(), 2);
    // The most recently added cursor is the second occurrence, which sorts
    // after the first.
    assert_eq!(last, 1);
    assert_eq!(
        buf.cursors()[last],
        Cursor::span(LineChar::new(0, 8), LineChar::new(0, 11))
    );
}
