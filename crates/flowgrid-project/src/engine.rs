//! The application engine: queue drain, gesture lifecycle, and subsystem
//! wiring.
//!
//! All state changes funnel through one path: an [`Action`] is dequeued on
//! the main loop, applied against the store's open transient, committed to
//! a [`Patch`], and dispatched. Subsystems never mutate themselves directly
//! in response to user input; they *reconcile* against the store whenever
//! the dispatcher reports their backing fields changed. Undo, redo, and
//! project loads therefore replay through exactly the same code path as
//! live edits.
//!
//! Store layout:
//!
//! | Path | Contents |
//! |------|----------|
//! | `/audio/graph/sample-rate` | client sample rate override |
//! | `/audio/graph/nodes/<n>` | node kind tag, one child per node |
//! | `/audio/graph/connections/<src>/<dst>` | `true` per directed edge |
//! | `/audio/graph/device-names/<node>` | requested device name |
//! | `/audio/graph/next-node-index` | container counter |
//! | `/audio/faust/dsps/<n>` | Faust source, one child per DSP slot |
//! | `/audio/faust/next-dsp-index` | container counter |
//! | `/project/settings/gesture-duration-sec` | gesture timeout |

use std::collections::{HashMap, HashSet};
use std::path::{Path as FsPath, PathBuf};
use std::time::Instant;

use flowgrid_audio::{AudioGraph, DeviceBackend, NodeId, NodeKind};
use flowgrid_core::{
    Action, ActionMoment, ActionProducer, ActionQueue, AppStore, BufferOp, ComponentId,
    ComponentTree, CursorTarget, Dispatcher, FaustAction, FileDialogAction, Gesture, GraphAction,
    History, ListenerId, Patch, PatchOp, Path, PrimitiveAction, ProjectAction, Store, Timestamp,
    can_coalesce, merge_gesture,
};
use flowgrid_core::{CoreError, Primitive};
use flowgrid_editor::{LineChar, SyntaxTree, TextBuffer};
use flowgrid_faust::{DspEvent, DspEventKind, FaustDspHost, SubsetCompiler};

use crate::error::Result;
use crate::format::{ActionDocument, Preferences, ProjectFormat, StateDocument};
use crate::paths;

/// Source installed in a freshly created DSP slot.
const DEFAULT_FAUST_CODE: &str = "process = _;";

/// Fallback gesture window when the settings field is unset.
const DEFAULT_GESTURE_DURATION_SEC: f32 = 0.5;

/// One DSP slot's editing state: the multi-cursor buffer over its source
/// plus the incremental syntax tree fed by the buffer's edit journal.
struct DspEditor {
    buffer: TextBuffer,
    syntax: SyntaxTree,
}

impl DspEditor {
    fn new(code: &str) -> Self {
        let buffer = TextBuffer::new(code);
        let mut syntax = SyntaxTree::new();
        syntax.parse(code);
        DspEditor { buffer, syntax }
    }
}

/// Which file dialog is pending.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DialogMode {
    Open,
    Save,
}

/// Well-known field ids and paths resolved once at construction.
struct Wiring {
    sample_rate_path: Path,
    nodes_path: Path,
    connections_path: Path,
    muted_path: Path,
    device_names_path: Path,
    next_node_index_path: Path,
    dsps_path: Path,
    next_dsp_index_path: Path,
    gesture_duration_path: Path,
    gesture_duration_field: ComponentId,
    graph_listener: ListenerId,
    faust_listener: ListenerId,
}

/// The application engine.
pub struct Engine {
    store: AppStore,
    history: History,
    tree: ComponentTree,
    dispatcher: Dispatcher,
    queue: ActionQueue,
    graph: AudioGraph,
    faust: FaustDspHost,
    editors: HashMap<u32, DspEditor>,
    wiring: Wiring,

    active_gesture: Vec<ActionMoment>,
    last_savable_at: Option<Instant>,
    /// True while the user is mid-drag on a widget; blocks the timeout
    /// commit so a slow drag stays one gesture.
    is_gesturing: bool,

    current_project_path: Option<PathBuf>,
    project_has_changes: bool,
    pending_dialog: Option<DialogMode>,
    preferences: Preferences,
}

impl Engine {
    /// Builds the engine over the given audio backend and opens the empty
    /// project.
    pub fn new(backend: Box<dyn DeviceBackend>) -> Self {
        let mut tree = ComponentTree::new();
        let audio = tree.add_component(tree.root(), "audio", "Audio");
        let graph_component = tree.add_component(audio, "graph", "Graph");
        let sample_rate =
            tree.add_field(graph_component, "sample-rate", "Sample rate", 0u32);
        let nodes = tree.add_field(graph_component, "nodes", "Nodes", 0u32);
        let connections = tree.add_field(graph_component, "connections", "Connections", 0u32);
        let muted = tree.add_field(graph_component, "muted", "Muted", 0u32);
        let device_names =
            tree.add_field(graph_component, "device-names", "Device names", 0u32);
        tree.add_field(graph_component, "next-node-index", "Next node index", 0u32);
        let faust_component = tree.add_component(audio, "faust", "Faust");
        let dsps = tree.add_field(faust_component, "dsps", "DSPs", 0u32);
        tree.add_field(faust_component, "next-dsp-index", "Next DSP index", 0u32);
        let project = tree.add_component(tree.root(), "project", "Project");
        let settings = tree.add_component(project, "settings", "Settings");
        let gesture_duration_field = tree.add_field(
            settings,
            "gesture-duration-sec",
            "Gesture duration (s)",
            DEFAULT_GESTURE_DURATION_SEC,
        );

        let mut dispatcher = Dispatcher::new();
        let graph_listener = dispatcher.add_listener();
        for field in [sample_rate, nodes, connections, muted, device_names] {
            dispatcher.listen(graph_listener, field);
        }
        let faust_listener = dispatcher.add_listener();
        dispatcher.listen(faust_listener, dsps);

        let path_of = |id: ComponentId| tree.path_of(id).expect("registered above").clone();
        let wiring = Wiring {
            sample_rate_path: path_of(sample_rate),
            nodes_path: path_of(nodes),
            connections_path: path_of(connections),
            muted_path: path_of(muted),
            device_names_path: path_of(device_names),
            next_node_index_path: Path::parse("/audio/graph/next-node-index")
                .expect("static path"),
            dsps_path: path_of(dsps),
            next_dsp_index_path: Path::parse("/audio/faust/next-dsp-index")
                .expect("static path"),
            gesture_duration_path: path_of(gesture_duration_field),
            gesture_duration_field,
            graph_listener,
            faust_listener,
        };

        let endpoint = NodeId(graph_component.0);
        let graph = AudioGraph::new(backend, endpoint);
        let sample_rate = graph.sample_rate();

        let mut faust = FaustDspHost::new(Box::new(SubsetCompiler::new()), sample_rate);
        // One library include pointing at the bundled .lib directory; the
        // graph's sample type is f32, so no `-double`.
        faust.set_compiler_args(vec![format!(
            "-I{}",
            paths::internal_dir().join("lib").display()
        )]);

        let mut store = AppStore::new();
        store.begin_transient();

        let mut engine = Engine {
            history: History::new(Store::new()),
            store,
            tree,
            dispatcher,
            queue: ActionQueue::new(),
            graph,
            faust,
            editors: HashMap::new(),
            wiring,
            active_gesture: Vec::new(),
            last_savable_at: None,
            is_gesturing: false,
            current_project_path: None,
            project_has_changes: false,
            pending_dialog: None,
            preferences: Preferences::read(&paths::preferences_path()).unwrap_or_default(),
        };
        engine.open_empty();
        engine
    }

    // --- Accessors ---

    /// The latest committed store snapshot.
    pub fn store(&self) -> &Store {
        self.store.snapshot()
    }

    /// Number of committed gestures (excluding the initial record).
    pub fn gesture_count(&self) -> usize {
        self.history.len() - 1
    }

    /// The history cursor.
    pub fn history_index(&self) -> usize {
        self.history.index()
    }

    /// The gesture currently committed at the cursor, if any.
    pub fn current_gesture(&self) -> Option<&Gesture> {
        if self.history.index() == 0 {
            None
        } else {
            Some(&self.history.current().gesture)
        }
    }

    /// The audio graph.
    pub fn graph(&self) -> &AudioGraph {
        &self.graph
    }

    /// Mutable audio graph access (device start/stop).
    pub fn graph_mut(&mut self) -> &mut AudioGraph {
        &mut self.graph
    }

    /// The Faust host.
    pub fn faust(&self) -> &FaustDspHost {
        &self.faust
    }

    /// A DSP slot's buffer text.
    pub fn editor_text(&self, dsp: u32) -> Option<String> {
        self.editors.get(&dsp).map(|e| e.buffer.text())
    }

    /// A DSP slot's cursors.
    pub fn editor_cursors(&self, dsp: u32) -> Option<&[flowgrid_editor::Cursor]> {
        self.editors.get(&dsp).map(|e| e.buffer.cursors())
    }

    /// A DSP slot's current styled spans.
    pub fn editor_styles(&self, dsp: u32) -> Option<Vec<flowgrid_editor::StyledSpan>> {
        self.editors.get(&dsp).map(|e| e.syntax.styled_ranges())
    }

    /// Ids of live DSP slots, in unspecified order.
    pub fn dsp_ids(&self) -> Vec<u32> {
        self.faust.dsp_ids().collect()
    }

    /// The path of the currently open project file, if any.
    pub fn current_project_path(&self) -> Option<&FsPath> {
        self.current_project_path.as_deref()
    }

    /// True if uncommitted-to-disk changes exist.
    pub fn has_changes(&self) -> bool {
        self.project_has_changes
    }

    /// Recently opened project files, most recent first.
    pub fn recently_opened(&self) -> &[PathBuf] {
        &self.preferences.recently_opened
    }

    /// Marks a user interaction (widget drag) in progress or done; the
    /// gesture timeout only fires while no interaction is in progress.
    pub fn set_gesturing(&mut self, gesturing: bool) {
        self.is_gesturing = gesturing;
    }

    /// A thread-safe producer feeding this engine's queue.
    pub fn producer(&self) -> ActionProducer {
        self.queue.producer()
    }

    /// Enqueues one action (convenience over [`Self::producer`]).
    pub fn queue_action(&self, action: impl Into<Action>) {
        self.queue.producer().queue(action);
    }

    // --- Launch ---

    /// Launch sequence: rewrite the canonical empty project, then load the
    /// default project if one exists.
    pub fn launch(&mut self) -> Result<()> {
        paths::ensure_internal_dir()?;
        StateDocument::from_store(self.store.snapshot()).write(&paths::empty_project_path())?;
        let default = paths::default_project_path();
        if default.exists() {
            self.open_project(&default)?;
        }
        Ok(())
    }

    // --- Queue drain ---

    /// Drains the queue, applying each action, then commits the open
    /// gesture when forced or timed out.
    pub fn run_queued(&mut self, force_commit: bool) {
        let drained = self.queue.drain();
        let had_pending = !self.active_gesture.is_empty();
        let mut force = force_commit;

        for mut moment in drained {
            if !self.can_apply(&moment.action) {
                tracing::debug!(action = %moment.action.describe(), "dropping inapplicable action");
                continue;
            }
            // Saving the current project with no current path means asking
            // where to save.
            if matches!(moment.action, Action::Project(ProjectAction::SaveCurrent))
                && self.current_project_path.is_none()
            {
                moment.action = Action::Project(ProjectAction::ShowSaveDialog);
            }
            if moment.action.is_toggle_like() {
                force = true;
                // A toggle unrelated to the open gesture becomes its own
                // undo unit; a coalescing one (its own inverse) must stay
                // so the pair can cancel.
                if let Some(last) = self.active_gesture.last()
                    && !can_coalesce(&last.action, &moment.action)
                {
                    self.commit_gesture();
                }
            }

            match &moment.action {
                Action::Project(action) => {
                    let action = action.clone();
                    self.apply_project(action);
                    continue;
                }
                Action::FileDialog(action) => {
                    let action = action.clone();
                    self.apply_dialog(action);
                    continue;
                }
                _ => {}
            }

            if let Err(err) = self.apply(&moment.action) {
                tracing::warn!(action = %moment.action.describe(), error = %err, "action failed; dropped");
                continue;
            }
            if moment.action.is_savable() {
                self.commit_action(moment);
            }
            self.dispatcher.clear_changed();
        }

        let timed_out = self
            .last_savable_at
            .is_some_and(|at| at.elapsed().as_secs_f32() >= self.gesture_duration_sec());
        if force || (!self.is_gesturing && had_pending && timed_out) {
            self.commit_gesture();
        }
    }

    fn commit_action(&mut self, moment: ActionMoment) {
        let patch = self.store.checked_commit();
        if patch.is_empty() {
            return;
        }
        let outcome = self.dispatcher.refresh_changed(
            &mut self.tree,
            self.store.snapshot(),
            &patch,
            true,
            moment.queued_at,
        );
        self.route(&outcome.notify);
        self.active_gesture.push(moment);
        self.project_has_changes = true;
        self.last_savable_at = Some(Instant::now());
    }

    fn gesture_duration_sec(&self) -> f32 {
        self.store
            .get(&self.wiring.gesture_duration_path)
            .and_then(Primitive::as_f32)
            .or_else(|| {
                self.tree
                    .field_value(self.wiring.gesture_duration_field)
                    .and_then(Primitive::as_f32)
            })
            .unwrap_or(DEFAULT_GESTURE_DURATION_SEC)
    }

    /// Merges and commits the open gesture onto the history.
    pub fn commit_gesture(&mut self) {
        self.dispatcher.take_gesture_changed();
        if self.active_gesture.is_empty() {
            return;
        }
        let merged = merge_gesture(&self.active_gesture);
        self.active_gesture.clear();
        if merged.is_empty() {
            return;
        }
        tracing::debug!(actions = merged.len(), "committing gesture");
        self.history.add_gesture(
            self.store.snapshot().clone(),
            Gesture {
                actions: merged,
                committed_at: Timestamp::now(),
            },
        );
    }

    // --- Applicability ---

    /// True if `action` can be applied in the current state.
    pub fn can_apply(&self, action: &Action) -> bool {
        match action {
            Action::Project(ProjectAction::Undo) => {
                !self.active_gesture.is_empty() || self.history.can_undo()
            }
            Action::Project(ProjectAction::Redo) => self.history.can_redo(),
            Action::Project(ProjectAction::SetHistoryIndex { index }) => {
                (*index as usize) < self.history.len()
            }
            Action::Project(_) => true,
            Action::FileDialog(FileDialogAction::Select { .. } | FileDialogAction::Cancel) => {
                self.pending_dialog.is_some()
            }
            Action::Primitive(PrimitiveAction::Toggle { path }) => self
                .store
                .get(path)
                .is_some_and(|v| v.as_bool().is_some()),
            Action::Primitive(_) => true,
            Action::Graph(GraphAction::DeleteNode { node }) => {
                self.graph.node(NodeId(*node)).is_some()
            }
            Action::Graph(
                GraphAction::Connect { source, dest }
                | GraphAction::Disconnect { source, dest }
                | GraphAction::ToggleConnection { source, dest },
            ) => {
                self.graph.node(NodeId(*source)).is_some()
                    && self.graph.node(NodeId(*dest)).is_some()
            }
            Action::Graph(GraphAction::SetDeviceName { node, .. }) => {
                self.graph.node(NodeId(*node)).is_some()
            }
            Action::Graph(_) => true,
            Action::Faust(FaustAction::DeleteDsp { dsp } | FaustAction::SetCode { dsp, .. }) => {
                self.faust.code(*dsp).is_some()
            }
            Action::Faust(FaustAction::CreateDsp) => true,
            Action::Buffer(a) => self.editors.contains_key(&a.buffer),
        }
    }

    // --- Application ---

    /// Applies one savable action against the open transient.
    fn apply(&mut self, action: &Action) -> std::result::Result<(), CoreError> {
        match action {
            Action::Primitive(action) => self.apply_primitive(action),
            Action::Graph(action) => self.apply_graph(action),
            Action::Faust(action) => self.apply_faust(action),
            Action::Buffer(action) => self.apply_buffer(action.buffer, &action.op),
            Action::Project(_) | Action::FileDialog(_) => Err(CoreError::UnsupportedAction(
                "project actions are handled by the drain loop".to_owned(),
            )),
        }
    }

    fn apply_primitive(&mut self, action: &PrimitiveAction) -> std::result::Result<(), CoreError> {
        match action {
            PrimitiveAction::Set { path, value } => {
                self.store.set(path.clone(), value.clone());
                Ok(())
            }
            PrimitiveAction::SetMany { values } => {
                for (path, value) in values {
                    self.store.set(path.clone(), value.clone());
                }
                Ok(())
            }
            PrimitiveAction::Toggle { path } => {
                let flipped = self
                    .store
                    .get(path)
                    .and_then(Primitive::toggled)
                    .ok_or_else(|| CoreError::NotFound(path.clone()))?;
                self.store.set(path.clone(), flipped);
                Ok(())
            }
            PrimitiveAction::ApplyPatch { patch } => {
                self.apply_patch_ops(patch);
                Ok(())
            }
        }
    }

    fn apply_patch_ops(&mut self, patch: &Patch) {
        for (path, op) in patch.ops() {
            match op {
                PatchOp::Add { value } | PatchOp::Replace { value, .. } => {
                    self.store.set(path.clone(), value.clone());
                }
                PatchOp::Remove { .. } => self.store.erase(path),
            }
        }
    }

    fn apply_graph(&mut self, action: &GraphAction) -> std::result::Result<(), CoreError> {
        match action {
            GraphAction::CreateNode { kind } => {
                parse_node_kind(kind)
                    .ok_or_else(|| CoreError::ActionInvalid(format!("unknown node kind '{kind}'")))?;
                let index = self.bump_counter(&self.wiring.next_node_index_path.clone());
                let path = self.wiring.nodes_path.child(index.to_string());
                self.store.set(path, kind.as_str());
                Ok(())
            }
            GraphAction::DeleteNode { node } => {
                let node_path = self
                    .child_with_id(&self.wiring.nodes_path, *node)
                    .ok_or_else(|| CoreError::ActionInvalid(format!("no node {node:#010x}")))?;
                self.store.erase(&node_path);
                // Drop stored connections and device names touching it.
                let stale: Vec<Path> = self
                    .store_children(&self.wiring.connections_path)
                    .into_iter()
                    .map(|(path, _)| path)
                    .filter(|path| {
                        connection_of(&self.wiring.connections_path, path)
                            .is_some_and(|(s, d)| s == *node || d == *node)
                    })
                    .collect();
                for path in stale {
                    self.store.erase(&path);
                }
                if let Some(name_path) = self.child_with_id(&self.wiring.device_names_path, *node)
                {
                    self.store.erase(&name_path);
                }
                Ok(())
            }
            GraphAction::Connect { source, dest } => {
                let path = self.connection_path(*source, *dest);
                self.store.set(path, true);
                Ok(())
            }
            GraphAction::Disconnect { source, dest } => {
                let path = self.connection_path(*source, *dest);
                self.store.erase(&path);
                Ok(())
            }
            GraphAction::ToggleConnection { source, dest } => {
                let path = self.connection_path(*source, *dest);
                if self.store.get(&path).is_some() {
                    self.store.erase(&path);
                } else {
                    self.store.set(path, true);
                }
                Ok(())
            }
            GraphAction::SetSampleRate { rate } => {
                self.store
                    .set(self.wiring.sample_rate_path.clone(), *rate);
                Ok(())
            }
            GraphAction::SetDeviceName { node, name } => {
                let path = self
                    .wiring
                    .device_names_path
                    .child(node.to_string());
                if name.is_empty() {
                    self.store.erase(&path);
                } else {
                    self.store.set(path, name.as_str());
                }
                Ok(())
            }
        }
    }

    fn apply_faust(&mut self, action: &FaustAction) -> std::result::Result<(), CoreError> {
        match action {
            FaustAction::CreateDsp => {
                let index = self.bump_counter(&self.wiring.next_dsp_index_path.clone());
                let path = self.wiring.dsps_path.child(index.to_string());
                self.store.set(path, DEFAULT_FAUST_CODE);
                Ok(())
            }
            FaustAction::DeleteDsp { dsp } => {
                let path = self
                    .child_with_id(&self.wiring.dsps_path, *dsp)
                    .ok_or_else(|| CoreError::ActionInvalid(format!("no dsp {dsp:#010x}")))?;
                self.store.erase(&path);
                Ok(())
            }
            FaustAction::SetCode { dsp, code } => {
                let path = self
                    .child_with_id(&self.wiring.dsps_path, *dsp)
                    .ok_or_else(|| CoreError::ActionInvalid(format!("no dsp {dsp:#010x}")))?;
                self.store.set(path, code.as_str());
                Ok(())
            }
        }
    }

    fn apply_buffer(
        &mut self,
        buffer_id: u32,
        op: &BufferOp,
    ) -> std::result::Result<(), CoreError> {
        let buffer = &mut self
            .editors
            .get_mut(&buffer_id)
            .ok_or(CoreError::ComponentNotFound(buffer_id))?
            .buffer;
        match op {
            BufferOp::SetText { text } => buffer.set_text(text),
            BufferOp::Insert { text } => buffer.insert(text),
            BufferOp::Delete { forward } => buffer.delete(*forward),
            BufferOp::Enter => buffer.enter(),
            BufferOp::Indent { shift } => buffer.indent(*shift),
            BufferOp::MoveLines { up } => buffer.move_lines(*up),
            BufferOp::ToggleLineComment => buffer.toggle_line_comment(),
            BufferOp::Paste { text } => buffer.paste(text),
            BufferOp::SelectAll => buffer.select_all(),
            BufferOp::AddCursorNextOccurrence => buffer.add_cursor_next_occurrence(),
            BufferOp::MatchBracket => buffer.match_bracket(),
            BufferOp::Undo => buffer.undo(),
            BufferOp::Redo => buffer.redo(),
            BufferOp::MoveCursor { target, select } => match target {
                CursorTarget::Left => buffer.move_left(*select),
                CursorTarget::Right => buffer.move_right(*select),
                CursorTarget::WordLeft => buffer.move_word_left(*select),
                CursorTarget::WordRight => buffer.move_word_right(*select),
                CursorTarget::Up { lines } => buffer.move_up(*lines as usize, *select),
                CursorTarget::Down { lines } => buffer.move_down(*lines as usize, *select),
                CursorTarget::LineStart => buffer.move_line_start(*select),
                CursorTarget::LineEnd => buffer.move_line_end(*select),
                CursorTarget::Top => buffer.move_top(*select),
                CursorTarget::Bottom => buffer.move_bottom(*select),
            },
        }
        if op.modifies_text() {
            let text = self
                .editors
                .get(&buffer_id)
                .expect("looked up above")
                .buffer
                .text();
            let dsp_path = self
                .child_with_id(&self.wiring.dsps_path, buffer_id)
                .ok_or(CoreError::ComponentNotFound(buffer_id))?;
            self.store.set(dsp_path, text);
        }
        Ok(())
    }

    /// Places an extra cursor in a DSP buffer (UI multi-cursor clicks are
    /// not actions: they carry no undo semantics).
    pub fn add_editor_cursor(&mut self, dsp: u32, line: usize, ch: usize) {
        if let Some(editor) = self.editors.get_mut(&dsp) {
            editor.buffer.add_cursor_at(LineChar::new(line, ch));
        }
    }

    /// Collapses a DSP buffer to a single cursor.
    pub fn set_editor_cursor(&mut self, dsp: u32, line: usize, ch: usize) {
        if let Some(editor) = self.editors.get_mut(&dsp) {
            editor.buffer.set_cursor(LineChar::new(line, ch));
        }
    }

    // --- Project actions ---

    fn apply_project(&mut self, action: ProjectAction) {
        match action {
            ProjectAction::Undo => {
                // A pending gesture is committed first, so one undo reverts
                // exactly the in-flight edits.
                if !self.active_gesture.is_empty() {
                    self.commit_gesture();
                }
                if self.history.can_undo() {
                    self.set_history_index(self.history.index() - 1);
                }
            }
            ProjectAction::Redo => {
                if self.history.can_redo() {
                    self.set_history_index(self.history.index() + 1);
                }
            }
            ProjectAction::SetHistoryIndex { index } => {
                if !self.active_gesture.is_empty() {
                    self.commit_gesture();
                }
                self.set_history_index(index as usize);
            }
            ProjectAction::OpenEmpty => self.open_empty(),
            ProjectAction::OpenDefault => {
                let default = paths::default_project_path();
                if default.exists() {
                    if let Err(err) = self.open_project(&default) {
                        tracing::error!(error = %err, "failed to open default project");
                    }
                } else {
                    self.open_empty();
                }
            }
            ProjectAction::Open { path } => {
                if let Err(err) = self.open_project(&path) {
                    tracing::error!(path = %path.display(), error = %err, "failed to open project");
                }
            }
            ProjectAction::Save { path } => {
                if let Err(err) = self.save_project(&path) {
                    tracing::error!(path = %path.display(), error = %err, "failed to save project");
                }
            }
            ProjectAction::SaveCurrent => {
                if let Some(path) = self.current_project_path.clone()
                    && let Err(err) = self.save_project(&path)
                {
                    tracing::error!(path = %path.display(), error = %err, "failed to save project");
                }
            }
            ProjectAction::SaveDefault => {
                if let Err(err) = paths::ensure_internal_dir()
                    .and_then(|_| self.save_project(&paths::default_project_path()))
                {
                    tracing::error!(error = %err, "failed to save default project");
                }
            }
            ProjectAction::ShowOpenDialog => self.pending_dialog = Some(DialogMode::Open),
            ProjectAction::ShowSaveDialog => self.pending_dialog = Some(DialogMode::Save),
        }
    }

    fn apply_dialog(&mut self, action: FileDialogAction) {
        match (self.pending_dialog.take(), action) {
            (Some(DialogMode::Open), FileDialogAction::Select { path }) => {
                if let Err(err) = self.open_project(&path) {
                    tracing::error!(path = %path.display(), error = %err, "failed to open project");
                }
            }
            (Some(DialogMode::Save), FileDialogAction::Select { path }) => {
                if let Err(err) = self.save_project(&path) {
                    tracing::error!(path = %path.display(), error = %err, "failed to save project");
                }
            }
            (_, FileDialogAction::Cancel) | (None, _) => {}
        }
    }

    // --- History navigation ---

    /// Moves the history cursor and republishes that record's snapshot.
    fn set_history_index(&mut self, index: usize) {
        self.dispatcher.take_gesture_changed();
        self.active_gesture.clear();
        let before = self.store.snapshot().clone();
        let Some(snapshot) = self.history.set_index(index) else {
            return;
        };
        let snapshot = snapshot.clone();
        let patch = before.diff(&snapshot);
        self.store.publish(snapshot);
        self.store.begin_transient();
        if !patch.is_empty() {
            let outcome = self.dispatcher.refresh_changed(
                &mut self.tree,
                self.store.snapshot(),
                &patch,
                false,
                Timestamp::now(),
            );
            self.route(&outcome.notify);
            self.dispatcher.clear_changed();
        }
        tracing::debug!(index, "history cursor moved");
    }

    // --- Dispatch routing ---

    fn route(&mut self, notify: &[ListenerId]) {
        // The Faust host first: its events may add or remove graph nodes
        // that the graph reconciliation then wires up.
        if notify.contains(&self.wiring.faust_listener) {
            self.reconcile_faust();
        }
        if notify.contains(&self.wiring.graph_listener) {
            self.reconcile_graph();
        }
    }

    /// Aligns the Faust host and the editors with the stored DSP slots.
    fn reconcile_faust(&mut self) {
        let stored: Vec<(u32, String)> = self
            .store_children(&self.wiring.dsps_path)
            .into_iter()
            .filter_map(|(path, value)| {
                value.as_str().map(|code| (path.id().raw(), code.to_owned()))
            })
            .collect();
        let stored_ids: HashSet<u32> = stored.iter().map(|(id, _)| *id).collect();

        let mut events: Vec<DspEvent> = Vec::new();
        for (id, code) in &stored {
            let existing = self.faust.code(*id).map(str::to_owned);
            match existing {
                None => {
                    events.extend(self.faust.create_dsp(*id, code.clone()));
                    self.editors.insert(*id, DspEditor::new(code));
                }
                Some(existing) if existing != *code => {
                    events.extend(self.faust.set_code(*id, code.clone()));
                    let editor = self
                        .editors
                        .entry(*id)
                        .or_insert_with(|| DspEditor::new(""));
                    if editor.buffer.text() != *code {
                        editor.buffer.set_text(code);
                    }
                    let text = editor.buffer.text();
                    let edits = editor.buffer.take_edits();
                    editor.syntax.apply_edits(&text, &edits);
                }
                Some(_) => {
                    // Code unchanged; still drain any buffer-journal edits
                    // into the syntax tree (cursor-only ops journal none).
                    if let Some(editor) = self.editors.get_mut(id) {
                        let text = editor.buffer.text();
                        let edits = editor.buffer.take_edits();
                        editor.syntax.apply_edits(&text, &edits);
                    }
                }
            }
        }
        let live: Vec<u32> = self.faust.dsp_ids().collect();
        for id in live {
            if !stored_ids.contains(&id) {
                events.extend(self.faust.delete_dsp(id));
                self.editors.remove(&id);
            }
        }
        self.route_dsp_events(&events);
    }

    fn route_dsp_events(&mut self, events: &[DspEvent]) {
        for event in events {
            match event.kind {
                DspEventKind::Added | DspEventKind::Changed => {
                    if let Some(factory) = self.faust.factory(event.dsp_id) {
                        if let Err(err) =
                            self.graph
                                .upsert_faust_node(NodeId(event.dsp_id), "Faust", factory)
                        {
                            tracing::warn!(dsp = event.dsp_id, error = %err, "faust node update failed");
                        }
                    }
                }
                DspEventKind::Removed => {
                    if self.graph.node(NodeId(event.dsp_id)).is_some()
                        && let Err(err) = self.graph.delete_node(NodeId(event.dsp_id))
                    {
                        tracing::warn!(dsp = event.dsp_id, error = %err, "faust node removal failed");
                    }
                }
            }
        }
    }

    /// Aligns the audio graph with the stored node and connection sets.
    fn reconcile_graph(&mut self) {
        // Sample rate.
        if let Some(rate) = self
            .store
            .get(&self.wiring.sample_rate_path)
            .and_then(Primitive::as_u32)
            && rate != 0
            && rate != self.graph.sample_rate()
        {
            self.graph.set_sample_rate(rate);
            let events = self.faust.on_sample_rate_changed(rate);
            self.route_dsp_events(&events);
        }

        // Nodes.
        let stored: Vec<(u32, String)> = self
            .store_children(&self.wiring.nodes_path)
            .into_iter()
            .filter_map(|(path, value)| {
                value.as_str().map(|kind| (path.id().raw(), kind.to_owned()))
            })
            .collect();
        let stored_ids: HashSet<u32> = stored.iter().map(|(id, _)| *id).collect();
        for (id, kind) in &stored {
            if self.graph.node(NodeId(*id)).is_none() {
                let Some(kind) = parse_node_kind(kind) else {
                    tracing::warn!(node = *id, kind, "unknown stored node kind");
                    continue;
                };
                if let Err(err) = self.graph.create_node(NodeId(*id), kind, kind_name(kind)) {
                    // Device failures exclude the node; the graph keeps
                    // operating with the rest.
                    tracing::warn!(node = *id, error = %err, "node creation failed");
                }
            }
        }
        let live: Vec<NodeId> = self
            .graph
            .nodes()
            .iter()
            .filter(|n| n.kind != NodeKind::Faust)
            .map(|n| n.id)
            .collect();
        for id in live {
            if !stored_ids.contains(&id.0)
                && let Err(err) = self.graph.delete_node(id)
            {
                tracing::warn!(node = id.0, error = %err, "node removal failed");
            }
        }

        // Connections.
        let desired: HashSet<(NodeId, NodeId)> = self
            .store_children(&self.wiring.connections_path)
            .into_iter()
            .filter_map(|(path, _)| connection_of(&self.wiring.connections_path, &path))
            .map(|(s, d)| (NodeId(s), NodeId(d)))
            .collect();
        let endpoint = self.graph.endpoint();
        let current: HashSet<(NodeId, NodeId)> = self
            .graph
            .connections()
            .filter(|(_, dest)| *dest != endpoint)
            .collect();
        for (source, dest) in desired.difference(&current) {
            if let Err(err) = self.graph.connect(*source, *dest) {
                tracing::warn!(source = source.0, dest = dest.0, error = %err, "stored connection rejected");
            }
        }
        for (source, dest) in current.difference(&desired) {
            let _ = self.graph.disconnect(*source, *dest);
        }

        // Mute flags.
        let muted: HashMap<u32, bool> = self
            .store_children(&self.wiring.muted_path)
            .into_iter()
            .filter_map(|(path, value)| {
                let id: u32 = path.last()?.parse().ok()?;
                Some((id, value.as_bool()?))
            })
            .collect();
        let mute_updates: Vec<(NodeId, bool)> = self
            .graph
            .nodes()
            .iter()
            .map(|n| (n.id, muted.get(&n.id.0).copied().unwrap_or(false)))
            .filter(|(id, wanted)| {
                self.graph.node(*id).is_some_and(|n| n.muted != *wanted)
            })
            .collect();
        for (id, wanted) in mute_updates {
            let _ = self.graph.set_muted(id, wanted);
        }

        // Device names.
        for (path, value) in self.store_children(&self.wiring.device_names_path) {
            let Some(name) = value.as_str() else { continue };
            let Some(id) = path.last().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            let differs = self
                .graph
                .node(NodeId(id))
                .is_some_and(|n| n.device_name.as_deref() != Some(name));
            if differs && let Err(err) = self
                .graph
                .set_device_name(NodeId(id), Some(name.to_owned()))
            {
                tracing::warn!(node = id, error = %err, "device selection failed");
            }
        }
    }

    // --- Project files ---

    /// Resets to the canonical empty project: default device nodes, a muted
    /// external input wired to the primary output, and a cleared history.
    pub fn open_empty(&mut self) {
        // Tear down live subsystems.
        let dsps: Vec<u32> = self.faust.dsp_ids().collect();
        for id in dsps {
            let events = self.faust.delete_dsp(id);
            self.route_dsp_events(&events);
        }
        self.editors.clear();
        let nodes: Vec<NodeId> = self.graph.nodes().iter().map(|n| n.id).collect();
        for id in nodes {
            let _ = self.graph.delete_node(id);
        }

        self.store.publish(Store::new());
        self.store.begin_transient();

        // Seed the default topology through the normal action path so the
        // store, the tree caches, and the graph stay in lockstep.
        self.active_gesture.clear();
        self.dispatcher.take_gesture_changed();
        self.seed_empty_project();

        self.tree.refresh_all(self.store.snapshot());
        self.history = History::new(self.store.snapshot().clone());
        self.active_gesture.clear();
        self.last_savable_at = None;
        self.current_project_path = None;
        self.project_has_changes = false;
        tracing::info!("opened empty project");
    }

    /// Commits the open transient and routes the resulting dispatch, off
    /// the gesture path (seeding, loads, replays).
    fn commit_and_route(&mut self, queued_at: Timestamp) {
        let patch = self.store.checked_commit();
        if patch.is_empty() {
            return;
        }
        let outcome = self.dispatcher.refresh_changed(
            &mut self.tree,
            self.store.snapshot(),
            &patch,
            false,
            queued_at,
        );
        self.route(&outcome.notify);
        self.dispatcher.clear_changed();
    }

    fn seed_empty_project(&mut self) {
        let seeds: Vec<Action> = vec![
            GraphAction::CreateNode {
                kind: "input-device".to_owned(),
            }
            .into(),
            GraphAction::CreateNode {
                kind: "output-device".to_owned(),
            }
            .into(),
            GraphAction::CreateNode {
                kind: "waveform".to_owned(),
            }
            .into(),
        ];
        for action in seeds {
            if let Err(err) = self.apply(&action) {
                tracing::warn!(error = %err, "seeding empty project");
            }
            self.commit_and_route(Timestamp::now());
        }
        // External input muted by default, wired to the primary output.
        let input = self
            .graph
            .nodes()
            .iter()
            .find(|n| n.kind == NodeKind::InputDevice)
            .map(|n| n.id);
        let output = self.graph.primary_output();
        let mut seeds: Vec<Action> = Vec::new();
        if let Some(input) = input {
            seeds.push(
                PrimitiveAction::Set {
                    path: self.wiring.muted_path.child(input.0.to_string()),
                    value: Primitive::Bool(true),
                }
                .into(),
            );
        }
        if let (Some(input), Some(output)) = (input, output) {
            seeds.push(
                GraphAction::Connect {
                    source: input.0,
                    dest: output.0,
                }
                .into(),
            );
        }
        for action in seeds {
            if self.apply(&action).is_ok() {
                self.commit_and_route(Timestamp::now());
            }
        }
    }

    /// Loads a project file, chosen by extension.
    pub fn open_project(&mut self, path: &FsPath) -> Result<()> {
        match ProjectFormat::of(path)? {
            ProjectFormat::State => {
                let document = StateDocument::read(path)?;
                self.load_state(&document)?;
            }
            ProjectFormat::Action => {
                let document = ActionDocument::read(path)?;
                self.load_actions(&document);
            }
        }
        if path != paths::empty_project_path() && path != paths::default_project_path() {
            self.current_project_path = Some(path.to_owned());
            self.preferences.record_opened(path);
            let _ = self.preferences.write(&paths::preferences_path());
        }
        self.project_has_changes = false;
        tracing::info!(path = %path.display(), "opened project");
        Ok(())
    }

    /// Applies a `.fls` document: auxiliary container counters first, then
    /// remaining leaves in path order, then a full cache refresh; history
    /// is cleared.
    fn load_state(&mut self, document: &StateDocument) -> Result<()> {
        // Parse before tearing anything down so a malformed file leaves the
        // current project intact (history untouched on failure).
        let entries = document.paths()?;

        self.store.publish(Store::new());
        self.store.begin_transient();
        let is_aux = |path: &Path| {
            *path == self.wiring.next_node_index_path || *path == self.wiring.next_dsp_index_path
        };
        // Container auxiliary fields first, then remaining leaves in path
        // order.
        for (path, value) in entries.iter().filter(|(p, _)| is_aux(p)) {
            self.store.set(path.clone(), value.clone());
        }
        for (path, value) in entries.iter().filter(|(p, _)| !is_aux(p)) {
            self.store.set(path.clone(), value.clone());
        }
        self.commit_and_route(Timestamp::now());

        // The dispatch above only covers fields present in the file; a
        // file with *fewer* entries than the live session must still tear
        // the extras down.
        self.reconcile_faust();
        self.reconcile_graph();
        self.tree.refresh_all(self.store.snapshot());
        self.history = History::new(self.store.snapshot().clone());
        self.active_gesture.clear();
        self.last_savable_at = None;
        Ok(())
    }

    /// Replays a `.fla` document over the empty project, appending each
    /// gesture to the history, then restores the saved cursor.
    fn load_actions(&mut self, document: &ActionDocument) {
        self.open_empty();
        for gesture in &document.gestures {
            for moment in &gesture.actions {
                if !self.can_apply(&moment.action) {
                    tracing::warn!(action = %moment.action.describe(), "skipping unreplayable action");
                    continue;
                }
                if let Err(err) = self.apply(&moment.action) {
                    tracing::warn!(action = %moment.action.describe(), error = %err, "replay failed");
                    continue;
                }
                self.commit_and_route(moment.queued_at);
            }
            self.history
                .add_gesture(self.store.snapshot().clone(), gesture.clone());
        }
        self.set_history_index(document.index as usize);
    }

    /// Saves the project to `path`, format chosen by extension. Any open
    /// gesture commits first so the file reflects what the user sees.
    pub fn save_project(&mut self, path: &FsPath) -> Result<()> {
        self.commit_gesture();
        match ProjectFormat::of(path)? {
            ProjectFormat::State => {
                StateDocument::from_store(self.store.snapshot()).write(path)?;
            }
            ProjectFormat::Action => {
                let document = ActionDocument {
                    index: self.history.index() as u32,
                    gestures: self.history.gestures().map(|r| r.gesture.clone()).collect(),
                };
                document.write(path)?;
            }
        }
        if path != paths::empty_project_path() && path != paths::default_project_path() {
            self.current_project_path = Some(path.to_owned());
            self.preferences.record_opened(path);
            let _ = self.preferences.write(&paths::preferences_path());
        }
        self.project_has_changes = false;
        tracing::info!(path = %path.display(), "saved project");
        Ok(())
    }

    // --- Store helpers ---

    /// Reads and increments a stored counter field.
    fn bump_counter(&mut self, path: &Path) -> u32 {
        let current = self
            .store
            .get(path)
            .and_then(Primitive::as_u32)
            .unwrap_or(0);
        self.store.set(path.clone(), current + 1);
        current
    }

    /// All stored children under `prefix`, sorted by path.
    fn store_children(&self, prefix: &Path) -> Vec<(Path, Primitive)> {
        let mut children: Vec<(Path, Primitive)> = self
            .store
            .snapshot()
            .iter()
            .filter(|(path, _)| path.starts_with(prefix) && path.len() > prefix.len())
            .map(|(path, value)| (path.clone(), value.clone()))
            .collect();
        // The open transient may hold uncommitted writes; prefer its view.
        for (path, value) in &mut children {
            if let Some(current) = self.store.get(path) {
                *value = current.clone();
            }
        }
        children.sort_by(|(a, _), (b, _)| a.cmp(b));
        children
    }

    /// The child of `prefix` whose path id equals `id`.
    fn child_with_id(&self, prefix: &Path, id: u32) -> Option<Path> {
        self.store
            .snapshot()
            .iter()
            .map(|(path, _)| path)
            .find(|path| {
                path.starts_with(prefix) && path.len() > prefix.len() && path.id().raw() == id
            })
            .cloned()
    }

    fn connection_path(&self, source: u32, dest: u32) -> Path {
        self.wiring
            .connections_path
            .child(source.to_string())
            .child(dest.to_string())
    }
}

/// Extracts `(source, dest)` node ids from a stored connection path. The
/// two trailing segments carry the node component ids in decimal.
fn connection_of(prefix: &Path, path: &Path) -> Option<(u32, u32)> {
    if !path.starts_with(prefix) || path.len() != prefix.len() + 2 {
        return None;
    }
    let mut tail = path.segments().skip(prefix.len());
    let source: u32 = tail.next()?.parse().ok()?;
    let dest: u32 = tail.next()?.parse().ok()?;
    Some((source, dest))
}

fn parse_node_kind(kind: &str) -> Option<NodeKind> {
    match kind {
        "input-device" => Some(NodeKind::InputDevice),
        "output-device" => Some(NodeKind::OutputDevice),
        "waveform" => Some(NodeKind::Waveform),
        "passthrough" => Some(NodeKind::Passthrough),
        _ => None,
    }
}

fn kind_name(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::InputDevice => "Input device",
        NodeKind::OutputDevice => "Output device",
        NodeKind::Faust => "Faust",
        NodeKind::Waveform => "Waveform",
        NodeKind::Passthrough => "Passthrough",
    }
}
