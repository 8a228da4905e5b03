//! The action taxonomy.
//!
//! Every mutation intent in the application is one [`Action`] variant.
//! Actions are grouped by the subsystem they target; the top-level enum
//! flattens the groups for queueing and serialization. Actions that modify
//! the store are *savable* and participate in gestures and the `.fla`
//! action-format log; actions with only side effects are not.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::patch::Patch;
use crate::path::Path;
use crate::primitive::Primitive;

/// Project-level intents: history navigation, file open/save, dialogs.
///
/// None of these are savable; they navigate or persist state rather than
/// producing it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ProjectAction {
    /// Step the history cursor back one record.
    Undo,
    /// Step the history cursor forward one record.
    Redo,
    /// Jump the history cursor to an absolute record index.
    SetHistoryIndex {
        /// Target record index.
        index: u32,
    },
    /// Load a project file (`.fls` or `.fla`, chosen by extension).
    Open {
        /// File to load.
        path: PathBuf,
    },
    /// Load the canonical empty project.
    OpenEmpty,
    /// Load `.flowgrid/default.fla` when it exists, else the empty project.
    OpenDefault,
    /// Save the project to an explicit path.
    Save {
        /// Destination file.
        path: PathBuf,
    },
    /// Save to the current project path. Rewritten to [`Self::ShowSaveDialog`]
    /// at the queue boundary when no current path exists.
    SaveCurrent,
    /// Overwrite `.flowgrid/default.fla` with the current action log.
    SaveDefault,
    /// Open the file-open dialog.
    ShowOpenDialog,
    /// Open the file-save dialog.
    ShowSaveDialog,
}

/// File-dialog intents. `Select` is toggle-like: it force-commits the open
/// gesture so dialog-driven changes land as their own undo unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FileDialogAction {
    /// The user picked a file.
    Select {
        /// The chosen file.
        path: PathBuf,
    },
    /// The user dismissed the dialog.
    Cancel,
}

/// Store-value intents addressed by path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PrimitiveAction {
    /// Write one value.
    Set {
        /// Target field path.
        path: Path,
        /// Value to store.
        value: Primitive,
    },
    /// Write several values as one action.
    SetMany {
        /// `(path, value)` pairs, applied in order.
        values: Vec<(Path, Primitive)>,
    },
    /// Flip a boolean value. Toggle-like (force-commits the gesture).
    Toggle {
        /// Target field path; must hold a `Bool`.
        path: Path,
    },
    /// Apply a precomputed patch.
    ApplyPatch {
        /// The patch to apply.
        patch: Patch,
    },
}

/// Audio-graph intents. Node arguments are component ids.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GraphAction {
    /// Create a node of the named kind (`"waveform"`, `"passthrough"`, ...).
    CreateNode {
        /// Node-kind tag.
        kind: String,
    },
    /// Delete a node and every connection touching it.
    DeleteNode {
        /// Component id of the node.
        node: u32,
    },
    /// Add a directed connection.
    Connect {
        /// Source node component id.
        source: u32,
        /// Destination node component id.
        dest: u32,
    },
    /// Remove a directed connection.
    Disconnect {
        /// Source node component id.
        source: u32,
        /// Destination node component id.
        dest: u32,
    },
    /// Flip a directed connection. Toggle-like (force-commits the gesture).
    ToggleConnection {
        /// Source node component id.
        source: u32,
        /// Destination node component id.
        dest: u32,
    },
    /// Change the graph's client sample rate.
    SetSampleRate {
        /// New rate in Hz.
        rate: u32,
    },
    /// Select a device by name for a device node (empty selects the default).
    SetDeviceName {
        /// Component id of the device node.
        node: u32,
        /// Backend device name.
        name: String,
    },
}

/// Faust subsystem intents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FaustAction {
    /// Create a DSP slot (with its code buffer).
    CreateDsp,
    /// Delete a DSP slot.
    DeleteDsp {
        /// Component id of the slot.
        dsp: u32,
    },
    /// Replace a slot's source code, triggering recompilation.
    SetCode {
        /// Component id of the slot.
        dsp: u32,
        /// New Faust source text.
        code: String,
    },
}

/// A single text-buffer operation.
///
/// Cursor-only operations leave the text untouched and are therefore not
/// savable; everything else rewrites the buffer's stored text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum BufferOp {
    /// Replace the whole text.
    SetText {
        /// New buffer contents.
        text: String,
    },
    /// Insert text at every cursor, replacing selections.
    Insert {
        /// Text to insert.
        text: String,
    },
    /// Delete the selection, or one char backward/forward when empty.
    Delete {
        /// True deletes forward (Delete key), false backward (Backspace).
        forward: bool,
    },
    /// Insert a newline with auto-indent.
    Enter,
    /// Indent (or dedent with `shift`) the selected lines by one tab width.
    Indent {
        /// True dedents.
        shift: bool,
    },
    /// Move the lines covered by any cursor up or down by one.
    MoveLines {
        /// True moves up.
        up: bool,
    },
    /// Insert or strip the language line-comment prefix on selected lines.
    ToggleLineComment,
    /// Paste clipboard text, line-per-cursor when counts match.
    Paste {
        /// Clipboard contents.
        text: String,
    },
    /// Move every cursor.
    MoveCursor {
        /// Where to move.
        target: CursorTarget,
        /// True extends the selection instead of collapsing it.
        select: bool,
    },
    /// Select the entire buffer with a single cursor.
    SelectAll,
    /// Add a cursor at the next occurrence of the current selection.
    AddCursorNextOccurrence,
    /// Move each cursor to the bracket matching the one under it.
    MatchBracket,
    /// Step the buffer-local undo stack back.
    Undo,
    /// Step the buffer-local undo stack forward.
    Redo,
}

impl BufferOp {
    /// True if applying this op can change the buffer's text.
    pub fn modifies_text(&self) -> bool {
        !matches!(
            self,
            BufferOp::MoveCursor { .. }
                | BufferOp::SelectAll
                | BufferOp::AddCursorNextOccurrence
                | BufferOp::MatchBracket
        )
    }
}

/// Cursor-movement targets for [`BufferOp::MoveCursor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CursorTarget {
    /// One char left.
    Left,
    /// One char right.
    Right,
    /// Previous word boundary.
    WordLeft,
    /// Next word boundary.
    WordRight,
    /// Up by `lines`.
    Up {
        /// Line count (1 for arrow keys, page size for paging).
        lines: u32,
    },
    /// Down by `lines`.
    Down {
        /// Line count (1 for arrow keys, page size for paging).
        lines: u32,
    },
    /// Start of the current line.
    LineStart,
    /// End of the current line.
    LineEnd,
    /// Start of the document.
    Top,
    /// End of the document.
    Bottom,
}

/// A text-buffer intent: one op against one buffer component.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BufferAction {
    /// Component id of the buffer.
    pub buffer: u32,
    /// The operation.
    pub op: BufferOp,
}

/// The flattened action union dispatched by the main loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Action {
    /// Project-level intents.
    Project(ProjectAction),
    /// File-dialog intents.
    FileDialog(FileDialogAction),
    /// Store-value intents.
    Primitive(PrimitiveAction),
    /// Audio-graph intents.
    Graph(GraphAction),
    /// Faust intents.
    Faust(FaustAction),
    /// Text-buffer intents.
    Buffer(BufferAction),
}

impl Action {
    /// True if applying this action mutates the store (and therefore belongs
    /// in a gesture and the `.fla` action log).
    pub fn is_savable(&self) -> bool {
        match self {
            Action::Project(_) | Action::FileDialog(_) => false,
            Action::Primitive(_) | Action::Graph(_) | Action::Faust(_) => true,
            Action::Buffer(a) => a.op.modifies_text(),
        }
    }

    /// True for actions that force-commit the open gesture immediately.
    ///
    /// Without this, performing two toggles in a row would compress into
    /// nothing when the gesture is merged.
    pub fn is_toggle_like(&self) -> bool {
        matches!(
            self,
            Action::Primitive(PrimitiveAction::Toggle { .. })
                | Action::Graph(GraphAction::ToggleConnection { .. })
                | Action::FileDialog(FileDialogAction::Select { .. })
        )
    }

    /// Short description of the action's target, for logs and errors.
    pub fn describe(&self) -> String {
        match self {
            Action::Project(a) => format!("project: {a:?}"),
            Action::FileDialog(a) => format!("file dialog: {a:?}"),
            Action::Primitive(PrimitiveAction::Set { path, .. }) => format!("set {path}"),
            Action::Primitive(PrimitiveAction::SetMany { values }) => {
                format!("set {} values", values.len())
            }
            Action::Primitive(PrimitiveAction::Toggle { path }) => format!("toggle {path}"),
            Action::Primitive(PrimitiveAction::ApplyPatch { patch }) => {
                format!("apply patch of {} ops", patch.ops().len())
            }
            Action::Graph(a) => format!("graph: {a:?}"),
            Action::Faust(FaustAction::SetCode { dsp, .. }) => {
                format!("faust: set code on {dsp:#010x}")
            }
            Action::Faust(a) => format!("faust: {a:?}"),
            Action::Buffer(a) => format!("buffer {:#010x}: {:?}", a.buffer, a.op),
        }
    }
}

impl From<ProjectAction> for Action {
    fn from(a: ProjectAction) -> Self {
        Action::Project(a)
    }
}

impl From<FileDialogAction> for Action {
    fn from(a: FileDialogAction) -> Self {
        Action::FileDialog(a)
    }
}

impl From<PrimitiveAction> for Action {
    fn from(a: PrimitiveAction) -> Self {
        Action::Primitive(a)
    }
}

impl From<GraphAction> for Action {
    fn from(a: GraphAction) -> Self {
        Action::Graph(a)
    }
}

impl From<FaustAction> for Action {
    fn from(a: FaustAction) -> Self {
        Action::Faust(a)
    }
}

impl From<BufferAction> for Action {
    fn from(a: BufferAction) -> Self {
        Action::Buffer(a)
    }
}
