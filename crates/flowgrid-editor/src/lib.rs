//! Multi-cursor text editing for FlowGrid's DSP source buffers.
//!
//! The [`TextBuffer`] holds lines in a persistent vector, so undo snapshots
//! share every untouched line. Edits are journaled as byte-range records
//! (`{start_byte, old_end_byte, new_end_byte}`) which drive the incremental
//! [`SyntaxTree`]; the same text feeds the DSP compilation pipeline.
//!
//! # Invariants
//!
//! - After any operation, cursors are sorted by selection start and merged
//!   when their ranges overlap or touch.
//! - For every journaled edit, the bytes now in `start..new_end` replace the
//!   bytes formerly in `start..old_end`.
//! - The syntax tree's styled spans always tile the buffer text without
//!   overlap.

pub mod buffer;
pub mod cursor;
pub mod syntax;

pub use buffer::{Edit, TextBuffer};
pub use cursor::{Cursor, LineChar};
pub use syntax::{Style, StyledSpan, SyntaxTree, TransitionIter};
