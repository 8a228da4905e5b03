//! End-to-end scenarios: actions through the queue, gestures through the
//! history, and the full change-notification chain down to the audio graph
//! and editors.

use std::sync::OnceLock;

use flowgrid_audio::{MockBackend, NodeId, NodeKind};
use flowgrid_core::{
    BufferAction, BufferOp, FaustAction, GraphAction, Path, Primitive, PrimitiveAction,
    ProjectAction,
};
use flowgrid_project::Engine;

/// Points `.flowgrid` at a per-run temp dir so tests never touch the real
/// home directory.
fn isolate_home() {
    static HOME: OnceLock<tempfile::TempDir> = OnceLock::new();
    let dir = HOME.get_or_init(|| tempfile::TempDir::new().expect("temp home"));
    flowgrid_project::paths::override_base_dir(dir.path());
}

fn engine() -> Engine {
    isolate_home();
    Engine::new(Box::new(MockBackend::stereo_defaults()))
}

fn p(pointer: &str) -> Path {
    Path::parse(pointer).unwrap()
}

fn find_node(engine: &Engine, kind: NodeKind) -> NodeId {
    engine
        .graph()
        .nodes()
        .iter()
        .find(|n| n.kind == kind)
        .map(|n| n.id)
        .expect("node of requested kind")
}

#[test]
fn set_toggle_undo_scenario() {
    let mut engine = engine();
    engine.queue_action(PrimitiveAction::Set {
        path: p("/audio/muted"),
        value: Primitive::Bool(true),
    });
    engine.queue_action(PrimitiveAction::Toggle {
        path: p("/audio/muted"),
    });
    engine.run_queued(true);

    // The toggle force-committed into its own gesture.
    assert_eq!(engine.gesture_count(), 2);
    assert_eq!(
        engine.store().get(&p("/audio/muted")),
        Some(&Primitive::Bool(false))
    );

    engine.queue_action(ProjectAction::Undo);
    engine.run_queued(false);
    assert_eq!(
        engine.store().get(&p("/audio/muted")),
        Some(&Primitive::Bool(true))
    );

    engine.queue_action(ProjectAction::Undo);
    engine.run_queued(false);
    assert_eq!(engine.store().get(&p("/audio/muted")), None);
}

#[test]
fn consecutive_sets_merge_into_one_gesture() {
    let mut engine = engine();
    for value in [1u32, 2, 3] {
        engine.queue_action(PrimitiveAction::Set {
            path: p("/x"),
            value: Primitive::UInt(value),
        });
    }
    engine.run_queued(true);

    assert_eq!(engine.gesture_count(), 1);
    let gesture = engine.current_gesture().unwrap();
    assert_eq!(gesture.actions.len(), 1);
    assert_eq!(
        gesture.actions[0].action,
        PrimitiveAction::Set {
            path: p("/x"),
            value: Primitive::UInt(3),
        }
        .into()
    );
    assert_eq!(engine.store().get(&p("/x")), Some(&Primitive::UInt(3)));
}

#[test]
fn double_toggle_cancels_to_an_empty_gesture() {
    let mut engine = engine();
    engine.queue_action(PrimitiveAction::Set {
        path: p("/a"),
        value: Primitive::Bool(true),
    });
    engine.run_queued(true);
    assert_eq!(engine.gesture_count(), 1);

    engine.queue_action(PrimitiveAction::Toggle { path: p("/a") });
    engine.queue_action(PrimitiveAction::Toggle { path: p("/a") });
    engine.run_queued(true);

    // The pair cancelled; no record was pushed and the value is unchanged.
    assert_eq!(engine.gesture_count(), 1);
    assert_eq!(engine.store().get(&p("/a")), Some(&Primitive::Bool(true)));
}

#[test]
fn undo_redo_round_trips_bit_equally() {
    let mut engine = engine();
    engine.queue_action(PrimitiveAction::Set {
        path: p("/y"),
        value: Primitive::Str("hello".into()),
    });
    engine.run_queued(true);
    let after = engine.store().clone();

    engine.queue_action(ProjectAction::Undo);
    engine.run_queued(false);
    assert_eq!(engine.store().get(&p("/y")), None);

    engine.queue_action(ProjectAction::Redo);
    engine.run_queued(false);
    assert_eq!(engine.store(), &after);
}

#[test]
fn graph_fan_out_inserts_splitter() {
    let mut engine = engine();
    let waveform = find_node(&engine, NodeKind::Waveform);
    let primary = engine.graph().primary_output().unwrap();

    engine.queue_action(GraphAction::CreateNode {
        kind: "output-device".to_owned(),
    });
    engine.run_queued(true);
    let secondary = engine
        .graph()
        .nodes()
        .iter()
        .find(|n| n.kind == NodeKind::OutputDevice && n.id != primary)
        .map(|n| n.id)
        .unwrap();

    engine.queue_action(GraphAction::Connect {
        source: waveform.0,
        dest: primary.0,
    });
    engine.queue_action(GraphAction::Connect {
        source: waveform.0,
        dest: secondary.0,
    });
    engine.run_queued(true);

    assert_eq!(engine.graph().splitter_ways(waveform), 2);
    assert!(engine.graph().node(waveform).unwrap().is_active);
    assert!(engine.graph().node(secondary).unwrap().is_active);

    // Undoing the second connection drops the splitter again.
    engine.queue_action(ProjectAction::Undo);
    engine.run_queued(false);
    assert_eq!(engine.graph().splitter_ways(waveform), 0);
}

#[test]
fn dsp_hot_swap_scenario() {
    let mut engine = engine();
    engine.queue_action(FaustAction::CreateDsp);
    engine.run_queued(true);

    let dsp = engine.dsp_ids()[0];
    engine.queue_action(FaustAction::SetCode {
        dsp,
        code: "process = _;".to_owned(),
    });
    engine.run_queued(true);

    let node = engine.graph().node(NodeId(dsp)).expect("faust node");
    assert_eq!(node.input_channel_count(0), 1);
    assert_eq!(node.output_channel_count(0), 1);

    let primary = engine.graph().primary_output().unwrap();
    engine.queue_action(GraphAction::Connect {
        source: dsp,
        dest: primary.0,
    });
    engine.run_queued(true);

    let ids_before: Vec<u32> = engine.graph().nodes().iter().map(|n| n.id.0).collect();

    engine.queue_action(FaustAction::SetCode {
        dsp,
        code: "process = _,_;".to_owned(),
    });
    engine.run_queued(true);

    let node = engine.graph().node(NodeId(dsp)).expect("faust node survives");
    assert_eq!(node.output_channel_count(0), 2);
    assert!(engine.graph().is_connected(NodeId(dsp), primary));
    let ids_after: Vec<u32> = engine.graph().nodes().iter().map(|n| n.id.0).collect();
    assert_eq!(ids_before, ids_after);
}

#[test]
fn dsp_compile_error_lands_in_log_and_removes_node() {
    let mut engine = engine();
    engine.queue_action(FaustAction::CreateDsp);
    engine.run_queued(true);
    let dsp = engine.dsp_ids()[0];
    assert!(engine.graph().node(NodeId(dsp)).is_some());

    engine.queue_action(FaustAction::SetCode {
        dsp,
        code: "process = broken".to_owned(),
    });
    engine.run_queued(true);

    assert!(engine.faust().error(dsp).is_some());
    assert!(engine.graph().node(NodeId(dsp)).is_none());

    // Undo restores the old code, recompiles, and reinserts the node.
    engine.queue_action(ProjectAction::Undo);
    engine.run_queued(false);
    assert!(engine.faust().error(dsp).is_none());
    assert!(engine.graph().node(NodeId(dsp)).is_some());
}

#[test]
fn multi_cursor_paste_scenario() {
    let mut engine = engine();
    engine.queue_action(FaustAction::CreateDsp);
    engine.run_queued(true);
    let dsp = engine.dsp_ids()[0];

    engine.queue_action(BufferAction {
        buffer: dsp,
        op: BufferOp::SetText {
            text: "foo\nbar".to_owned(),
        },
    });
    engine.run_queued(true);

    engine.set_editor_cursor(dsp, 0, 3);
    engine.add_editor_cursor(dsp, 1, 3);
    engine.queue_action(BufferAction {
        buffer: dsp,
        op: BufferOp::Paste {
            text: "X\nY".to_owned(),
        },
    });
    engine.run_queued(true);
    assert_eq!(engine.editor_text(dsp).unwrap(), "fooX\nbarY");

    engine.queue_action(BufferAction {
        buffer: dsp,
        op: BufferOp::SetText {
            text: "foo\nbar".to_owned(),
        },
    });
    engine.run_queued(true);
    engine.set_editor_cursor(dsp, 0, 3);
    engine.add_editor_cursor(dsp, 1, 3);
    engine.queue_action(BufferAction {
        buffer: dsp,
        op: BufferOp::Paste {
            text: "Z".to_owned(),
        },
    });
    engine.run_queued(true);
    assert_eq!(engine.editor_text(dsp).unwrap(), "fooZ\nbarZ");
}

#[test]
fn editor_edits_feed_syntax_and_compiler() {
    let mut engine = engine();
    engine.queue_action(FaustAction::CreateDsp);
    engine.run_queued(true);
    let dsp = engine.dsp_ids()[0];

    // The default slot compiles and highlights.
    assert!(engine.faust().error(dsp).is_none());
    let styles = engine.editor_styles(dsp).unwrap();
    assert!(!styles.is_empty());

    // Append a gain stage through buffer edits.
    engine.queue_action(BufferAction {
        buffer: dsp,
        op: BufferOp::SetText {
            text: "process = _ * 0.5;".to_owned(),
        },
    });
    engine.run_queued(true);
    assert!(engine.faust().error(dsp).is_none());
    let dsp_state = engine.faust().dsp(dsp).unwrap();
    assert_eq!(dsp_state.num_outputs(), 1);
    assert_eq!(engine.faust().code(dsp).unwrap(), "process = _ * 0.5;");
}

#[test]
fn sample_rate_change_reaches_graph_and_dsps() {
    let mut engine = engine();
    engine.queue_action(FaustAction::CreateDsp);
    engine.run_queued(true);
    let dsp = engine.dsp_ids()[0];
    assert_eq!(engine.faust().dsp(dsp).unwrap().sample_rate(), 48_000);

    engine.queue_action(GraphAction::SetSampleRate { rate: 44_100 });
    engine.run_queued(true);
    assert_eq!(engine.graph().sample_rate(), 44_100);
    assert_eq!(engine.faust().dsp(dsp).unwrap().sample_rate(), 44_100);
}

#[test]
fn state_round_trip_restores_values_and_clears_history() {
    let mut engine = engine();
    engine.queue_action(PrimitiveAction::Set {
        path: p("/custom/value"),
        value: Primitive::Float(2.5),
    });
    engine.queue_action(FaustAction::CreateDsp);
    engine.run_queued(true);
    let dsp_count = engine.dsp_ids().len();

    let dir = tempfile::TempDir::new().unwrap();
    let file = dir.path().join("session.fls");
    engine.save_project(&file).unwrap();

    // Mutate away from the saved state.
    engine.queue_action(PrimitiveAction::Set {
        path: p("/custom/value"),
        value: Primitive::Float(9.0),
    });
    engine.run_queued(true);

    engine.open_project(&file).unwrap();
    assert_eq!(
        engine.store().get(&p("/custom/value")),
        Some(&Primitive::Float(2.5))
    );
    assert_eq!(engine.dsp_ids().len(), dsp_count);
    assert_eq!(engine.gesture_count(), 0);
    assert_eq!(engine.current_project_path(), Some(file.as_path()));
}

#[test]
fn action_round_trip_replays_gestures_and_index() {
    let mut engine = engine();
    engine.queue_action(PrimitiveAction::Set {
        path: p("/v"),
        value: Primitive::UInt(1),
    });
    engine.run_queued(true);
    engine.queue_action(PrimitiveAction::Set {
        path: p("/v"),
        value: Primitive::UInt(2),
    });
    engine.run_queued(true);
    assert_eq!(engine.gesture_count(), 2);

    // Park the cursor mid-history and save the log.
    engine.queue_action(ProjectAction::Undo);
    engine.run_queued(false);
    let dir = tempfile::TempDir::new().unwrap();
    let file = dir.path().join("session.fla");
    engine.save_project(&file).unwrap();

    let mut fresh = Engine::new(Box::new(MockBackend::stereo_defaults()));
    fresh.open_project(&file).unwrap();
    assert_eq!(fresh.gesture_count(), 2);
    assert_eq!(fresh.history_index(), 1);
    assert_eq!(fresh.store().get(&p("/v")), Some(&Primitive::UInt(1)));

    fresh.queue_action(ProjectAction::Redo);
    fresh.run_queued(false);
    assert_eq!(fresh.store().get(&p("/v")), Some(&Primitive::UInt(2)));
}

#[test]
fn save_current_without_path_opens_the_save_dialog() {
    let mut engine = engine();
    engine.queue_action(PrimitiveAction::Set {
        path: p("/x"),
        value: Primitive::UInt(1),
    });
    engine.run_queued(true);

    // No current path: SaveCurrent rewrites to the dialog, then selecting a
    // file completes the save.
    engine.queue_action(ProjectAction::SaveCurrent);
    engine.run_queued(false);
    assert!(engine.current_project_path().is_none());

    let dir = tempfile::TempDir::new().unwrap();
    let file = dir.path().join("picked.fls");
    engine.queue_action(flowgrid_core::FileDialogAction::Select { path: file.clone() });
    engine.run_queued(false);
    assert!(file.exists());
    assert_eq!(engine.current_project_path(), Some(file.as_path()));
    assert!(engine
        .recently_opened()
        .iter()
        .any(|recent| recent == &file));
}

#[test]
fn empty_project_seeds_default_topology() {
    let engine = engine();
    let kinds: Vec<NodeKind> = engine.graph().nodes().iter().map(|n| n.kind).collect();
    assert!(kinds.contains(&NodeKind::InputDevice));
    assert!(kinds.contains(&NodeKind::OutputDevice));
    assert!(kinds.contains(&NodeKind::Waveform));

    // The external input is muted by default and wired to the primary
    // output.
    let input = find_node(&engine, NodeKind::InputDevice);
    let primary = engine.graph().primary_output().unwrap();
    assert!(engine.graph().node(input).unwrap().muted);
    assert!(engine.graph().is_connected(input, primary));
    assert_eq!(engine.gesture_count(), 0);
}

#[test]
fn node_ids_are_stable_across_save_and_load() {
    let mut engine = engine();
    engine.queue_action(GraphAction::CreateNode {
        kind: "passthrough".to_owned(),
    });
    engine.run_queued(true);
    let mut ids: Vec<u32> = engine.graph().nodes().iter().map(|n| n.id.0).collect();
    ids.sort_unstable();

    let dir = tempfile::TempDir::new().unwrap();
    let file = dir.path().join("stable.fls");
    engine.save_project(&file).unwrap();
    engine.open_project(&file).unwrap();

    let mut reloaded: Vec<u32> = engine.graph().nodes().iter().map(|n| n.id.0).collect();
    reloaded.sort_unstable();
    assert_eq!(ids, reloaded);
}
