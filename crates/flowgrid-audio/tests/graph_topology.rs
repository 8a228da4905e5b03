//! Topology-compilation and device-lifecycle tests against the mock
//! backend.

use flowgrid_audio::{
    AudioGraph, MockBackend, NodeId, NodeKind, PRIORITIZED_SAMPLE_RATES,
};
use flowgrid_faust::{BoxCompiler, SubsetCompiler};
use proptest::prelude::*;
use std::sync::Arc;

const ENDPOINT: NodeId = NodeId(1);

fn graph() -> (AudioGraph, MockBackend) {
    let backend = MockBackend::stereo_defaults();
    let graph = AudioGraph::new(Box::new(backend.clone()), ENDPOINT);
    (graph, backend)
}

fn faust_factory(code: &str) -> Arc<flowgrid_faust::DspFactory> {
    let compiler = SubsetCompiler::new();
    let desc = compiler.compile_boxes("test", code, &[]).unwrap();
    Arc::new(compiler.compile_factory("test", &desc, &[], 0).unwrap())
}

#[test]
fn default_sample_rate_prefers_the_priority_list() {
    let (graph, _backend) = graph();
    // The mock devices are native at 48 kHz, the list's first entry.
    assert_eq!(graph.sample_rate(), PRIORITIZED_SAMPLE_RATES[0]);
    assert!(graph.is_native_sample_rate(44_100));
    assert!(!graph.is_native_sample_rate(96_000) || graph.nodes().is_empty());
}

#[test]
fn primary_output_always_feeds_the_endpoint() {
    let (mut graph, _backend) = graph();
    graph.create_node(NodeId(10), NodeKind::OutputDevice, "out").unwrap();
    assert_eq!(graph.primary_output(), Some(NodeId(10)));
    assert!(graph.is_connected(NodeId(10), ENDPOINT));
    assert!(graph.node(NodeId(10)).unwrap().is_active);
}

#[test]
fn secondary_output_connects_only_when_fed() {
    let (mut graph, _backend) = graph();
    graph.create_node(NodeId(10), NodeKind::OutputDevice, "primary").unwrap();
    graph.create_node(NodeId(11), NodeKind::OutputDevice, "secondary").unwrap();
    assert!(!graph.is_connected(NodeId(11), ENDPOINT));
    assert!(!graph.node(NodeId(11)).unwrap().is_active);

    graph.create_node(NodeId(12), NodeKind::Waveform, "osc").unwrap();
    graph.connect(NodeId(12), NodeId(11)).unwrap();
    assert!(graph.is_connected(NodeId(11), ENDPOINT));
    assert!(graph.node(NodeId(11)).unwrap().is_active);
    assert!(graph.node(NodeId(12)).unwrap().is_active);

    graph.disconnect(NodeId(12), NodeId(11)).unwrap();
    assert!(!graph.is_connected(NodeId(11), ENDPOINT));
    assert!(!graph.node(NodeId(12)).unwrap().is_active);
}

#[test]
fn activity_follows_reachability() {
    let (mut graph, _backend) = graph();
    graph.create_node(NodeId(10), NodeKind::OutputDevice, "out").unwrap();
    graph.create_node(NodeId(20), NodeKind::Waveform, "a").unwrap();
    graph.create_node(NodeId(21), NodeKind::Passthrough, "b").unwrap();

    // a → b but b reaches nothing: both inactive.
    graph.connect(NodeId(20), NodeId(21)).unwrap();
    assert!(!graph.node(NodeId(20)).unwrap().is_active);
    assert!(!graph.node(NodeId(21)).unwrap().is_active);

    // b → out: the whole chain becomes active.
    graph.connect(NodeId(21), NodeId(10)).unwrap();
    assert!(graph.node(NodeId(20)).unwrap().is_active);
    assert!(graph.node(NodeId(21)).unwrap().is_active);
}

#[test]
fn fan_out_inserts_one_splitter_with_matching_ways() {
    let (mut graph, _backend) = graph();
    graph.create_node(NodeId(10), NodeKind::OutputDevice, "b").unwrap();
    graph.create_node(NodeId(11), NodeKind::OutputDevice, "c").unwrap();
    graph.create_node(NodeId(20), NodeKind::Waveform, "a").unwrap();

    graph.connect(NodeId(20), NodeId(10)).unwrap();
    assert_eq!(graph.splitter_ways(NodeId(20)), 0);

    graph.connect(NodeId(20), NodeId(11)).unwrap();
    assert_eq!(graph.splitter_ways(NodeId(20)), 2);

    // Dropping back to one destination destroys the splitter.
    graph.disconnect(NodeId(20), NodeId(11)).unwrap();
    assert_eq!(graph.splitter_ways(NodeId(20)), 0);
}

#[test]
fn connection_rules_reject_device_violations() {
    let (mut graph, _backend) = graph();
    graph.create_node(NodeId(10), NodeKind::OutputDevice, "out").unwrap();
    graph.create_node(NodeId(11), NodeKind::InputDevice, "in").unwrap();
    graph.create_node(NodeId(20), NodeKind::Waveform, "osc").unwrap();

    // Into an input device: forbidden.
    assert!(graph.connect(NodeId(20), NodeId(11)).is_err());
    // Out of an output device: forbidden.
    assert!(graph.connect(NodeId(10), NodeId(20)).is_err());
    // Self loop: forbidden.
    assert!(graph.connect(NodeId(20), NodeId(20)).is_err());
    // Input device → output device: allowed.
    graph.connect(NodeId(11), NodeId(10)).unwrap();
}

#[test]
fn pumped_graph_renders_oscillator_to_endpoint() {
    let (mut graph, _backend) = graph();
    graph.create_node(NodeId(10), NodeKind::OutputDevice, "out").unwrap();
    graph.create_node(NodeId(20), NodeKind::Waveform, "osc").unwrap();
    graph
        .set_waveform(
            NodeId(20),
            flowgrid_audio::WaveformSettings {
                shape: flowgrid_audio::WaveShape::Square,
                freq: 0.0,
                amp: 0.5,
            },
        )
        .unwrap();
    graph.connect(NodeId(20), NodeId(10)).unwrap();

    let mut out = [0.0f32; 8];
    graph.pump(&mut out, 4, 2);
    assert_eq!(out, [0.5; 8]);
}

#[test]
fn muted_node_renders_silence() {
    let (mut graph, _backend) = graph();
    graph.create_node(NodeId(10), NodeKind::OutputDevice, "out").unwrap();
    graph.create_node(NodeId(20), NodeKind::Waveform, "osc").unwrap();
    graph
        .set_waveform(
            NodeId(20),
            flowgrid_audio::WaveformSettings {
                shape: flowgrid_audio::WaveShape::Square,
                freq: 0.0,
                amp: 1.0,
            },
        )
        .unwrap();
    graph.connect(NodeId(20), NodeId(10)).unwrap();
    graph.set_muted(NodeId(20), true).unwrap();

    let mut out = [9.0f32; 4];
    graph.pump(&mut out, 4, 1);
    assert_eq!(out, [0.0; 4]);

    graph.set_muted(NodeId(20), false).unwrap();
    graph.pump(&mut out, 4, 1);
    assert_eq!(out, [1.0; 4]);
}

#[test]
fn faust_hot_swap_preserves_node_and_connections() {
    let (mut graph, _backend) = graph();
    graph.create_node(NodeId(10), NodeKind::OutputDevice, "out").unwrap();

    let faust = NodeId(30);
    graph
        .upsert_faust_node(faust, "dsp", faust_factory("process = _;"))
        .unwrap();
    {
        let node = graph.node(faust).unwrap();
        assert_eq!(node.input_channel_count(0), 1);
        assert_eq!(node.output_channel_count(0), 1);
    }
    graph.connect(faust, NodeId(10)).unwrap();
    assert!(graph.node(faust).unwrap().is_active);

    // Recompile to a stereo version: same node id, same connection, new
    // channel counts.
    graph
        .upsert_faust_node(faust, "dsp", faust_factory("process = _ <: _,_;"))
        .unwrap();
    let node = graph.node(faust).unwrap();
    assert_eq!(node.output_channel_count(0), 2);
    assert!(graph.is_connected(faust, NodeId(10)));
    assert!(graph.node(faust).unwrap().is_active);
}

#[test]
fn faust_fan_out_gets_a_splitter_after_recompile() {
    let (mut graph, _backend) = graph();
    graph.create_node(NodeId(10), NodeKind::OutputDevice, "b").unwrap();
    graph.create_node(NodeId(11), NodeKind::OutputDevice, "c").unwrap();

    let faust = NodeId(30);
    graph
        .upsert_faust_node(faust, "dsp", faust_factory("process = _;"))
        .unwrap();
    graph.connect(faust, NodeId(10)).unwrap();
    graph.connect(faust, NodeId(11)).unwrap();
    assert_eq!(graph.splitter_ways(faust), 2);

    graph
        .upsert_faust_node(faust, "dsp", faust_factory("process = _ <: _,_;"))
        .unwrap();
    assert_eq!(graph.splitter_ways(faust), 2);
    assert!(graph.is_connected(faust, NodeId(10)));
    assert!(graph.is_connected(faust, NodeId(11)));
}

#[test]
fn inactive_secondary_output_callback_writes_silence() {
    let (mut graph, backend) = graph();
    graph.create_node(NodeId(10), NodeKind::OutputDevice, "primary").unwrap();
    graph.create_node(NodeId(11), NodeKind::OutputDevice, "secondary").unwrap();
    graph.create_node(NodeId(20), NodeKind::Waveform, "osc").unwrap();
    graph
        .set_waveform(
            NodeId(20),
            flowgrid_audio::WaveformSettings {
                shape: flowgrid_audio::WaveShape::Square,
                freq: 0.0,
                amp: 0.5,
            },
        )
        .unwrap();
    graph.connect(NodeId(20), NodeId(10)).unwrap();

    graph.start().unwrap();
    assert!(graph.is_started());

    // Three live streams: primary out, secondary out, input capture... the
    // mock backend exposes only what start() opened.
    let rendered = backend.pump_output(4);
    assert_eq!(rendered.len(), 2);
    // The secondary (inactive) buffer is entirely zero; the primary
    // carries the oscillator.
    let silent = rendered
        .iter()
        .filter(|buffer| buffer.iter().all(|s| *s == 0.0))
        .count();
    assert_eq!(silent, 1);
    let audible = rendered
        .iter()
        .find(|buffer| buffer.iter().any(|s| *s != 0.0))
        .expect("primary output should render the oscillator");
    assert!(audible.iter().all(|s| (*s - 0.5).abs() < 1e-6));

    graph.stop();
    assert!(!graph.is_started());
    assert_eq!(backend.live_stream_count(), 0);

    // The reclaimed render side still works.
    let mut out = [0.0f32; 2];
    graph.pump(&mut out, 1, 2);
    assert_eq!(out, [0.5, 0.5]);
}

#[test]
fn failed_device_is_skipped_and_the_graph_continues() {
    let mut backend = MockBackend::stereo_defaults();
    backend.fail_device("mock-in");
    let mut graph = AudioGraph::new(Box::new(backend.clone()), ENDPOINT);
    graph.create_node(NodeId(10), NodeKind::OutputDevice, "out").unwrap();
    graph.create_node(NodeId(11), NodeKind::InputDevice, "in").unwrap();
    graph.set_device_name(NodeId(11), Some("mock-in".to_owned())).unwrap();
    graph.connect(NodeId(11), NodeId(10)).unwrap();

    // The input stream fails; start still succeeds with the output alone.
    graph.start().unwrap();
    assert_eq!(backend.live_stream_count(), 1);
}

#[test]
fn delete_node_cleans_connections_and_splitters() {
    let (mut graph, _backend) = graph();
    graph.create_node(NodeId(10), NodeKind::OutputDevice, "b").unwrap();
    graph.create_node(NodeId(11), NodeKind::OutputDevice, "c").unwrap();
    graph.create_node(NodeId(20), NodeKind::Waveform, "a").unwrap();
    graph.connect(NodeId(20), NodeId(10)).unwrap();
    graph.connect(NodeId(20), NodeId(11)).unwrap();
    assert_eq!(graph.splitter_ways(NodeId(20)), 2);

    graph.delete_node(NodeId(20)).unwrap();
    assert!(graph.node(NodeId(20)).is_none());
    assert!(graph.connections().all(|(s, d)| s != NodeId(20) && d != NodeId(20)));
    assert!(graph.delete_node(NodeId(20)).is_err());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(96))]

    /// After `update_connections`, every node's active flag equals
    /// reachability of the endpoint in the user connection set plus the
    /// managed primary-output edge, and splitter fan-out matches each
    /// active source's destination count.
    #[test]
    fn active_flags_match_reachability(
        edges in prop::collection::vec((0usize..6, 0usize..7), 0..16),
    ) {
        let (mut graph, _backend) = graph();
        graph.create_node(NodeId(10), NodeKind::OutputDevice, "out").unwrap();

        // Six passthrough nodes; destination index 6 denotes the output
        // device.
        let nodes: Vec<NodeId> = (0..6).map(|i| NodeId(100 + i)).collect();
        for id in &nodes {
            graph.create_node(*id, NodeKind::Passthrough, "p").unwrap();
        }
        let dest_of = |index: usize| if index == 6 { NodeId(10) } else { nodes[index] };

        let mut desired: Vec<(NodeId, NodeId)> = Vec::new();
        for (source, dest) in edges {
            let (source, dest) = (nodes[source], dest_of(dest));
            if source != dest
                && !desired.contains(&(source, dest))
                && graph.connect(source, dest).is_ok()
            {
                desired.push((source, dest));
            }
        }

        // Independent reachability oracle over the same edge set, with the
        // managed edge from the fed-or-primary output device.
        let endpoint = graph.endpoint();
        let mut oracle = desired.clone();
        oracle.push((NodeId(10), endpoint));
        let reaches = |from: NodeId| {
            let mut stack = vec![from];
            let mut seen = std::collections::HashSet::new();
            while let Some(current) = stack.pop() {
                if current == endpoint {
                    return true;
                }
                for (s, d) in &oracle {
                    if *s == current && seen.insert(*d) {
                        stack.push(*d);
                    }
                }
            }
            false
        };

        for id in nodes.iter().chain([NodeId(10)].iter()) {
            let node = graph.node(*id).unwrap();
            prop_assert_eq!(
                node.is_active,
                reaches(*id),
                "node {} activity mismatch",
                id.0
            );
        }

        // Fan-out: an active source with N>1 destinations owns an N-way
        // splitter; otherwise none.
        for source in nodes.iter().chain([NodeId(10)].iter()) {
            let count = desired.iter().filter(|(s, _)| s == source).count()
                + usize::from(*source == NodeId(10));
            let ways = graph.splitter_ways(*source);
            if graph.node(*source).unwrap().is_active && count > 1 {
                prop_assert_eq!(ways, count);
            } else {
                prop_assert_eq!(ways, 0);
            }
        }
    }
}
