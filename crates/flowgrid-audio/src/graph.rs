//! The logical audio graph: node set, directed connections, topology
//! compilation, and device lifecycle.
//!
//! The graph owns the main-loop side of everything audible. Topology lives
//! here as nodes plus a directed adjacency set; `update_connections`
//! lowers it into the flat render edge table, creating monitor/gain
//! wrappers and fan-out splitters as needed, and publishes the result to
//! the render side over the command channel.
//!
//! Before streaming starts the [`mix::RenderHost`] lives in the graph and
//! can be pumped manually; `start` moves it into the primary output
//! device's callback, and `stop` rebuilds it locally by republishing every
//! unit from logical state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::Sender;
use ringbuf::traits::Consumer;

use flowgrid_faust::DspFactory;

use crate::device::{
    DeviceBackend, DeviceFormat, DeviceInfo, SampleFormat, StreamConfig, StreamHandle,
    find_device, negotiate_format,
};
use crate::error::{AudioError, Result};
use crate::mix::{RenderCommand, RenderEdge, RenderHost, RenderUnit, UnitId, WaveShape};
use crate::node::{AudioGraphNode, NodeId, NodeKind};
use crate::ring::duplex_ring;

/// Sample rates in preference order for `default_sample_rate`.
pub const PRIORITIZED_SAMPLE_RATES: [u32; 14] = [
    48_000, 44_100, 96_000, 88_200, 32_000, 24_000, 22_050, 176_400, 192_000, 16_000, 11_025,
    8_000, 352_800, 384_000,
];

/// Oscillator settings for a waveform node.
#[derive(Clone, Copy, Debug)]
pub struct WaveformSettings {
    /// Shape.
    pub shape: WaveShape,
    /// Frequency in Hz.
    pub freq: f32,
    /// Peak amplitude.
    pub amp: f32,
}

impl Default for WaveformSettings {
    fn default() -> Self {
        WaveformSettings {
            shape: WaveShape::Sine,
            freq: 440.0,
            amp: 1.0,
        }
    }
}

/// Negotiated device binding for a device node.
#[derive(Clone, Debug)]
struct DeviceBinding {
    info: DeviceInfo,
    native: DeviceFormat,
    resampling: bool,
}

/// The audio graph.
pub struct AudioGraph {
    /// Nodes in creation order; the first `OutputDevice` is primary.
    nodes: Vec<AudioGraphNode>,
    /// Directed adjacency: (source node, destination node or endpoint).
    connections: HashSet<(NodeId, NodeId)>,
    /// The graph's own id, used as the endpoint in `connections`.
    endpoint: NodeId,
    sample_rate: u32,
    backend: Box<dyn DeviceBackend>,

    render: Option<RenderHost>,
    render_tx: Sender<RenderCommand>,
    next_unit: u32,

    bindings: HashMap<NodeId, DeviceBinding>,
    waveforms: HashMap<NodeId, WaveformSettings>,
    faust_factories: HashMap<NodeId, Arc<DspFactory>>,
    /// Activity flags shared with secondary output device callbacks.
    shared_active: HashMap<NodeId, Arc<AtomicBool>>,

    streams: Vec<StreamHandle>,
    started: bool,
}

impl AudioGraph {
    /// An empty graph whose endpoint carries `endpoint` as its id.
    ///
    /// The client sample rate starts at the backend-negotiated default.
    pub fn new(backend: Box<dyn DeviceBackend>, endpoint: NodeId) -> Self {
        let (render, render_tx) = RenderHost::new(0);
        let mut graph = AudioGraph {
            nodes: Vec::new(),
            connections: HashSet::new(),
            endpoint,
            sample_rate: 0,
            backend,
            render: Some(render),
            render_tx,
            next_unit: 1,
            bindings: HashMap::new(),
            waveforms: HashMap::new(),
            faust_factories: HashMap::new(),
            shared_active: HashMap::new(),
            streams: Vec::new(),
            started: false,
        };
        graph.set_sample_rate(graph.default_sample_rate());
        graph
    }

    // --- Reads ---

    /// The graph's client sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The endpoint's id.
    pub fn endpoint(&self) -> NodeId {
        self.endpoint
    }

    /// All nodes in creation order.
    pub fn nodes(&self) -> &[AudioGraphNode] {
        &self.nodes
    }

    /// Looks up a node.
    pub fn node(&self, id: NodeId) -> Option<&AudioGraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The directed connection set (including managed endpoint edges).
    pub fn connections(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.connections.iter().copied()
    }

    /// True if `source → dest` is connected.
    pub fn is_connected(&self, source: NodeId, dest: NodeId) -> bool {
        self.connections.contains(&(source, dest))
    }

    /// The primary output device node, if any.
    pub fn primary_output(&self) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|n| n.kind == NodeKind::OutputDevice)
            .map(|n| n.id)
    }

    /// Number of splitter output buses currently realized for `source`
    /// (0 when no splitter exists).
    pub fn splitter_ways(&self, source: NodeId) -> usize {
        self.node(source)
            .and_then(|n| n.splitter)
            .map_or(0, |(_, ways)| ways)
    }

    /// True if streaming is running.
    pub fn is_started(&self) -> bool {
        self.started
    }

    // --- Node lifecycle ---

    /// Creates a node of `kind`.
    ///
    /// Device kinds enumerate and bind a physical device immediately; a
    /// device failure surfaces as [`AudioError::Device`] and leaves the
    /// graph unchanged.
    pub fn create_node(&mut self, id: NodeId, kind: NodeKind, name: &str) -> Result<()> {
        if self.node(id).is_some() {
            return Err(AudioError::InvalidConnection(format!(
                "node {} already exists",
                id.0
            )));
        }
        let unit = self.alloc_unit();
        let node = match kind {
            NodeKind::InputDevice => {
                let binding = self.bind_device(kind, None)?;
                let channels = binding.native.channels as usize;
                // The capture unit starts with a detached ring; the live
                // ring arrives when streaming starts.
                let (_, consumer) = duplex_ring(binding.native.sample_rate, self.sample_rate, channels);
                self.send(RenderCommand::AddUnit {
                    id: unit,
                    unit: RenderUnit::Capture { channels, consumer },
                });
                let mut node = AudioGraphNode::new(id, kind, name, unit, 0, channels);
                node.device_name = None;
                self.bindings.insert(id, binding);
                node
            }
            NodeKind::OutputDevice => {
                let binding = self.bind_device(kind, None)?;
                self.send(RenderCommand::AddUnit {
                    id: unit,
                    unit: RenderUnit::Passthrough { channels: 1 },
                });
                self.bindings.insert(id, binding);
                self.shared_active
                    .insert(id, Arc::new(AtomicBool::new(false)));
                AudioGraphNode::new(id, kind, name, unit, 1, 1)
            }
            NodeKind::Waveform => {
                let settings = WaveformSettings::default();
                self.send(RenderCommand::AddUnit {
                    id: unit,
                    unit: RenderUnit::Waveform {
                        shape: settings.shape,
                        freq: settings.freq,
                        amp: settings.amp,
                        phase: 0.0,
                    },
                });
                self.waveforms.insert(id, settings);
                AudioGraphNode::new(id, kind, name, unit, 0, 1)
            }
            NodeKind::Passthrough => {
                self.send(RenderCommand::AddUnit {
                    id: unit,
                    unit: RenderUnit::Passthrough { channels: 1 },
                });
                AudioGraphNode::new(id, kind, name, unit, 1, 1)
            }
            NodeKind::Faust => {
                // Faust nodes are created through `upsert_faust_node` so
                // channel counts come from the compiled box.
                return Err(AudioError::InvalidConnection(
                    "faust nodes are created by the dsp host listener".to_owned(),
                ));
            }
        };
        tracing::info!(node = id.0, ?kind, "created audio graph node");
        self.nodes.push(node);
        self.rebuild_output_device_units();
        self.update_connections();
        Ok(())
    }

    /// Creates or re-wires the Faust node for a freshly compiled DSP.
    ///
    /// On a fresh compile of an existing node only the channel counts and
    /// the render instance change; connections and node id survive.
    pub fn upsert_faust_node(
        &mut self,
        id: NodeId,
        name: &str,
        factory: Arc<DspFactory>,
    ) -> Result<()> {
        let inputs = factory.desc().inputs;
        let outputs = factory.desc().outputs;
        let mut instance = factory.create_instance();
        instance.init(self.sample_rate);

        match self.nodes.iter_mut().find(|n| n.id == id) {
            Some(node) => {
                node.input_channels = inputs;
                node.output_channels = outputs;
                let unit = node.unit;
                self.send(RenderCommand::ReplaceFaust {
                    id: unit,
                    dsp: Some(Box::new(instance)),
                });
            }
            None => {
                let unit = self.alloc_unit();
                self.send(RenderCommand::AddUnit {
                    id: unit,
                    unit: RenderUnit::Faust {
                        inputs,
                        outputs,
                        dsp: Some(Box::new(instance)),
                    },
                });
                self.nodes
                    .push(AudioGraphNode::new(id, NodeKind::Faust, name, unit, inputs, outputs));
            }
        }
        self.faust_factories.insert(id, Arc::clone(&factory));
        tracing::info!(node = id.0, inputs, outputs, "faust node updated");
        self.update_connections();
        Ok(())
    }

    /// Deletes a node, its wrapper units, and every connection touching it.
    pub fn delete_node(&mut self, id: NodeId) -> Result<()> {
        let index = self
            .nodes
            .iter()
            .position(|n| n.id == id)
            .ok_or(AudioError::NodeNotFound(id.0))?;
        let node = self.nodes.remove(index);
        for unit in [
            Some(node.unit),
            node.in_gainer,
            node.in_monitor,
            node.out_gainer,
            node.out_monitor,
            node.splitter.map(|(u, _)| u),
        ]
        .into_iter()
        .flatten()
        {
            self.send(RenderCommand::RemoveUnit { id: unit });
        }
        self.connections
            .retain(|(source, dest)| *source != id && *dest != id);
        self.bindings.remove(&id);
        self.waveforms.remove(&id);
        self.faust_factories.remove(&id);
        self.shared_active.remove(&id);
        tracing::info!(node = id.0, "deleted audio graph node");
        self.rebuild_output_device_units();
        self.update_connections();
        Ok(())
    }

    // --- Connection mutations ---

    /// Adds `source → dest`.
    pub fn connect(&mut self, source: NodeId, dest: NodeId) -> Result<()> {
        self.check_connection(source, dest)?;
        self.connections.insert((source, dest));
        self.update_connections();
        Ok(())
    }

    /// Removes `source → dest`.
    pub fn disconnect(&mut self, source: NodeId, dest: NodeId) -> Result<()> {
        self.connections.remove(&(source, dest));
        self.update_connections();
        Ok(())
    }

    /// Flips `source → dest`.
    pub fn toggle_connection(&mut self, source: NodeId, dest: NodeId) -> Result<()> {
        if self.connections.contains(&(source, dest)) {
            self.disconnect(source, dest)
        } else {
            self.connect(source, dest)
        }
    }

    fn check_connection(&self, source: NodeId, dest: NodeId) -> Result<()> {
        let source_node = self
            .node(source)
            .ok_or(AudioError::NodeNotFound(source.0))?;
        let dest_node = self.node(dest).ok_or(AudioError::NodeNotFound(dest.0))?;
        if source == dest {
            return Err(AudioError::InvalidConnection(
                "a node cannot feed itself".to_owned(),
            ));
        }
        if !source_node.can_connect_output() {
            return Err(AudioError::InvalidConnection(format!(
                "node {} does not expose a connectable output",
                source.0
            )));
        }
        if !dest_node.can_connect_input() {
            return Err(AudioError::InvalidConnection(format!(
                "node {} does not expose a connectable input",
                dest.0
            )));
        }
        Ok(())
    }

    // --- Node settings ---

    /// Sets a node's mute flag.
    pub fn set_muted(&mut self, id: NodeId, muted: bool) -> Result<()> {
        self.with_node(id, |node| node.muted = muted)?;
        self.update_connections();
        Ok(())
    }

    /// Sets a node's output level.
    pub fn set_output_level(&mut self, id: NodeId, level: f32) -> Result<()> {
        self.with_node(id, |node| node.output_level = level)?;
        self.update_connections();
        Ok(())
    }

    /// Sets a node's input level.
    pub fn set_input_level(&mut self, id: NodeId, level: f32) -> Result<()> {
        self.with_node(id, |node| node.input_level = level)?;
        self.update_connections();
        Ok(())
    }

    /// Enables or disables a node's input/output monitors.
    pub fn set_monitor(&mut self, id: NodeId, input: bool, output: bool) -> Result<()> {
        self.with_node(id, |node| {
            node.monitor_input = input;
            node.monitor_output = output;
        })?;
        self.update_connections();
        Ok(())
    }

    /// Re-binds a device node to the named device (empty or `None` selects
    /// the default), restarting streams when running.
    pub fn set_device_name(&mut self, id: NodeId, name: Option<String>) -> Result<()> {
        let kind = self
            .node(id)
            .map(|n| n.kind)
            .ok_or(AudioError::NodeNotFound(id.0))?;
        if !matches!(kind, NodeKind::InputDevice | NodeKind::OutputDevice) {
            return Err(AudioError::InvalidConnection(format!(
                "node {} is not a device node",
                id.0
            )));
        }
        let requested = name.filter(|n| !n.is_empty());
        let binding = self.bind_device(kind, requested.as_deref())?;
        self.with_node(id, |n| n.device_name = requested)?;
        self.bindings.insert(id, binding);
        if self.started {
            self.stop();
            self.start()?;
        }
        Ok(())
    }

    /// Updates a waveform node's oscillator settings.
    pub fn set_waveform(&mut self, id: NodeId, settings: WaveformSettings) -> Result<()> {
        let unit = self
            .node(id)
            .filter(|n| n.kind == NodeKind::Waveform)
            .map(|n| n.unit)
            .ok_or(AudioError::NodeNotFound(id.0))?;
        self.waveforms.insert(id, settings);
        self.send(RenderCommand::SetWaveform {
            id: unit,
            shape: settings.shape,
            freq: settings.freq,
            amp: settings.amp,
        });
        Ok(())
    }

    fn with_node(&mut self, id: NodeId, apply: impl FnOnce(&mut AudioGraphNode)) -> Result<()> {
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or(AudioError::NodeNotFound(id.0))?;
        apply(node);
        Ok(())
    }

    // --- Sample-rate negotiation ---

    /// True iff every device node reports `sample_rate` as native.
    pub fn is_native_sample_rate(&self, sample_rate: u32) -> bool {
        self.bindings
            .values()
            .all(|b| b.info.is_native_sample_rate(sample_rate))
    }

    /// The highest-priority rate native to every device, with fallbacks.
    pub fn default_sample_rate(&self) -> u32 {
        for rate in PRIORITIZED_SAMPLE_RATES {
            if self.is_native_sample_rate(rate) && !self.bindings.is_empty() {
                return rate;
            }
        }
        // No shared native rate: prefer any output device's native rate,
        // then any input device's.
        for kind in [NodeKind::OutputDevice, NodeKind::InputDevice] {
            for rate in PRIORITIZED_SAMPLE_RATES {
                let native_somewhere = self.nodes.iter().any(|n| {
                    n.kind == kind
                        && self
                            .bindings
                            .get(&n.id)
                            .is_some_and(|b| b.info.is_native_sample_rate(rate))
                });
                if native_somewhere {
                    return rate;
                }
            }
        }
        // No devices at all (or none with usable formats): fall back to the
        // backend's enumeration-independent preference.
        if self.bindings.is_empty() {
            if let Ok(devices) = self.backend.list_output_devices()
                && let Ok(default) = find_device(&devices, None)
            {
                for rate in PRIORITIZED_SAMPLE_RATES {
                    if default.is_native_sample_rate(rate) {
                        return rate;
                    }
                }
            }
        }
        PRIORITIZED_SAMPLE_RATES[0]
    }

    /// Changes the client sample rate, re-binding devices and notifying the
    /// render side.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        self.send(RenderCommand::SetSampleRate { rate: sample_rate });
        let was_started = self.started;
        if was_started {
            self.stop();
            if let Err(err) = self.start() {
                tracing::warn!(error = %err, "restart after sample-rate change failed");
            }
        }
    }

    // --- Streaming ---

    /// Starts device streams.
    ///
    /// The primary output device's callback takes ownership of the render
    /// host and pulls the endpoint; secondary outputs read their
    /// passthrough rings; input devices capture into their duplex rings. A
    /// failing device is skipped with a warning and the graph continues
    /// with the remaining nodes.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        let primary = self.primary_output().ok_or(AudioError::NoDevice)?;

        // Input devices first: their capture units must hold live rings
        // before the render host moves away.
        let input_nodes: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::InputDevice)
            .map(|n| n.id)
            .collect();
        for id in input_nodes {
            if let Err(err) = self.start_input_device(id) {
                tracing::warn!(node = id.0, error = %err, "input device failed; continuing without it");
            }
        }

        // Secondary outputs next, for the same reason: their tap units need
        // live rings.
        let secondary: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::OutputDevice && n.id != primary)
            .map(|n| n.id)
            .collect();
        for id in secondary {
            if let Err(err) = self.start_secondary_output(id) {
                tracing::warn!(node = id.0, error = %err, "secondary output failed; continuing without it");
            }
        }

        self.start_primary_output(primary)?;
        self.started = true;
        tracing::info!(sample_rate = self.sample_rate, "audio graph started");
        Ok(())
    }

    fn stream_config(&self, id: NodeId) -> StreamConfig {
        let binding = self.bindings.get(&id);
        StreamConfig {
            format: binding.map_or(
                DeviceFormat {
                    sample_format: SampleFormat::F32,
                    channels: 2,
                    sample_rate: self.sample_rate,
                },
                |b| b.native,
            ),
            buffer_frames: 512,
            device_name: self.node(id).and_then(|n| n.device_name.clone()),
        }
    }

    fn start_input_device(&mut self, id: NodeId) -> Result<()> {
        let config = self.stream_config(id);
        let channels = config.format.channels as usize;
        let (mut producer, consumer) = duplex_ring(
            config.format.sample_rate,
            self.sample_rate,
            channels,
        );
        let stream = self.backend.build_input_stream(
            &config,
            Box::new(move |samples: &[f32]| {
                use ringbuf::traits::Producer;
                // Overruns drop the newest samples; the capture unit
                // renders silence through underruns on the other side.
                let _ = producer.push_slice(samples);
            }),
        )?;
        let unit = self.node(id).expect("caller verified").unit;
        self.send(RenderCommand::AddUnit {
            id: unit,
            unit: RenderUnit::Capture { channels, consumer },
        });
        self.streams.push(stream);
        Ok(())
    }

    fn start_secondary_output(&mut self, id: NodeId) -> Result<()> {
        let config = self.stream_config(id);
        let (producer, mut consumer) = duplex_ring(
            config.format.sample_rate,
            self.sample_rate,
            1,
        );
        let active = Arc::clone(
            self.shared_active
                .get(&id)
                .expect("output nodes always carry an activity flag"),
        );
        let channels = config.format.channels as usize;
        let stream = self.backend.build_output_stream(
            &config,
            Box::new(move |buffer: &mut [f32]| {
                if !active.load(Ordering::Relaxed) {
                    // Inactive secondary outputs must emit pure silence.
                    buffer.fill(0.0);
                    return;
                }
                let frames = buffer.len() / channels.max(1);
                for frame in 0..frames {
                    let sample = consumer.try_pop().unwrap_or(0.0);
                    for ch in 0..channels {
                        buffer[frame * channels + ch] = sample;
                    }
                }
            }),
        )?;
        let unit = self.node(id).expect("caller verified").unit;
        self.send(RenderCommand::AddUnit {
            id: unit,
            unit: RenderUnit::Tap {
                channels: 1,
                producer,
            },
        });
        self.streams.push(stream);
        Ok(())
    }

    fn start_primary_output(&mut self, id: NodeId) -> Result<()> {
        let config = self.stream_config(id);
        let channels = config.format.channels as usize;
        let mut host = self
            .render
            .take()
            .expect("render host present while stopped");
        let stream = self.backend.build_output_stream(
            &config,
            Box::new(move |buffer: &mut [f32]| {
                let frames = buffer.len() / channels.max(1);
                host.render(buffer, frames, channels);
            }),
        );
        match stream {
            Ok(stream) => {
                self.streams.push(stream);
                Ok(())
            }
            Err(err) => {
                // The closure owning the host is gone with the failed
                // stream; rebuild locally so the graph stays operable.
                self.rebuild_render_host();
                Err(err)
            }
        }
    }

    /// Stops all device streams and reclaims the render side.
    pub fn stop(&mut self) {
        if !self.started && self.streams.is_empty() {
            return;
        }
        self.streams.clear();
        self.started = false;
        self.rebuild_render_host();
        tracing::info!("audio graph stopped");
    }

    /// Pulls one block manually. Only valid while not streaming (tests and
    /// offline pumping).
    pub fn pump(&mut self, out: &mut [f32], frames: usize, channels: usize) {
        if let Some(render) = self.render.as_mut() {
            render.render(out, frames, channels);
        }
    }

    fn rebuild_render_host(&mut self) {
        let (host, tx) = RenderHost::new(self.sample_rate);
        self.render = Some(host);
        self.render_tx = tx;
        self.republish_units();
        self.update_connections();
    }

    /// Re-creates every render unit from logical state (fresh channel after
    /// a stream teardown).
    fn republish_units(&mut self) {
        let nodes: Vec<(NodeId, UnitId, NodeKind, usize, usize)> = self
            .nodes
            .iter()
            .map(|n| (n.id, n.unit, n.kind, n.input_channels, n.output_channels))
            .collect();
        for (id, unit, kind, _ins, outs) in nodes {
            let core = match kind {
                NodeKind::InputDevice => {
                    let rate = self
                        .bindings
                        .get(&id)
                        .map_or(self.sample_rate, |b| b.native.sample_rate);
                    let (_, consumer) = duplex_ring(rate, self.sample_rate, outs);
                    RenderUnit::Capture {
                        channels: outs,
                        consumer,
                    }
                }
                NodeKind::OutputDevice | NodeKind::Passthrough => {
                    RenderUnit::Passthrough { channels: 1 }
                }
                NodeKind::Waveform => {
                    let settings = self.waveforms.get(&id).copied().unwrap_or_default();
                    RenderUnit::Waveform {
                        shape: settings.shape,
                        freq: settings.freq,
                        amp: settings.amp,
                        phase: 0.0,
                    }
                }
                NodeKind::Faust => {
                    let dsp = self.faust_factories.get(&id).map(|factory| {
                        let mut instance = factory.create_instance();
                        instance.init(self.sample_rate);
                        Box::new(instance)
                    });
                    RenderUnit::Faust {
                        inputs: self.node(id).map_or(0, |n| n.input_channels),
                        outputs: outs,
                        dsp,
                    }
                }
            };
            self.send(RenderCommand::AddUnit { id: unit, unit: core });
        }
        // Wrapper and splitter units are re-created by the next
        // `update_connections`; forget the stale ids first.
        for node in &mut self.nodes {
            node.in_gainer = None;
            node.in_monitor = None;
            node.out_gainer = None;
            node.out_monitor = None;
            node.splitter = None;
        }
    }

    // --- Topology compilation ---

    /// Lowers the logical topology into the render edge table.
    ///
    /// Runs after any change to the node set, the connection set, or any
    /// node's reported bus counts.
    pub fn update_connections(&mut self) {
        let endpoint = self.endpoint;

        // 1. Output devices feed the endpoint iff primary or fed by at
        //    least one source. This is the only step that edits
        //    `connections`.
        let primary = self.primary_output();
        let output_devices: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::OutputDevice)
            .map(|n| n.id)
            .collect();
        for id in output_devices {
            let fed = self
                .connections
                .iter()
                .any(|(_, dest)| *dest == id);
            if Some(id) == primary || fed {
                self.connections.insert((id, endpoint));
            } else {
                self.connections.remove(&(id, endpoint));
            }
        }

        // 2. A node is active iff a directed path reaches the endpoint.
        let ids: Vec<NodeId> = self.nodes.iter().map(|n| n.id).collect();
        for id in ids {
            let active = self.has_path(id, endpoint);
            self.with_node(id, |n| n.is_active = active)
                .expect("node listed above");
            if let Some(flag) = self.shared_active.get(&id) {
                flag.store(active, Ordering::Relaxed);
            }
        }

        // 3-4. Wrappers. (Detaching is implicit: the edge table is rebuilt
        //      from scratch below.)
        let indices: Vec<usize> = (0..self.nodes.len()).collect();
        for index in indices {
            self.sync_wrappers(index);
        }

        // 5. Fan-out, with splitters where a source feeds >1 destination.
        let mut edges: Vec<RenderEdge> = Vec::new();
        for index in 0..self.nodes.len() {
            let node = &self.nodes[index];
            if !node.is_active {
                continue;
            }
            // Intra-node chains.
            let mut chain_in: Vec<UnitId> = Vec::new();
            chain_in.extend(node.in_gainer);
            chain_in.extend(node.in_monitor);
            chain_in.push(node.unit);
            for pair in chain_in.windows(2) {
                edges.push(RenderEdge {
                    source: pair[0],
                    source_bus: 0,
                    dest: pair[1],
                });
            }
            let mut chain_out: Vec<UnitId> = vec![node.unit];
            chain_out.extend(node.out_gainer);
            chain_out.extend(node.out_monitor);
            for pair in chain_out.windows(2) {
                edges.push(RenderEdge {
                    source: pair[0],
                    source_bus: 0,
                    dest: pair[1],
                });
            }
        }

        let actives: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|n| n.is_active && n.output_bus_count() > 0)
            .map(|n| n.id)
            .collect();
        for source in actives {
            let mut dests: Vec<NodeId> = self
                .connections
                .iter()
                .filter(|(s, _)| *s == source)
                .map(|(_, d)| *d)
                .collect();
            dests.sort();
            let count = dests.len();
            let source_node = self.node(source).expect("listed above");
            let source_unit = source_node.output_unit();
            let source_channels = source_node.output_channels;

            if count <= 1 {
                self.destroy_splitter(source);
                if let Some(dest) = dests.first() {
                    edges.push(RenderEdge {
                        source: source_unit,
                        source_bus: 0,
                        dest: self.dest_input_unit(*dest),
                    });
                }
                continue;
            }

            let splitter = self.ensure_splitter(source, count, source_channels);
            edges.push(RenderEdge {
                source: source_unit,
                source_bus: 0,
                dest: splitter,
            });
            for (bus, dest) in dests.iter().enumerate() {
                edges.push(RenderEdge {
                    source: splitter,
                    source_bus: bus as u32,
                    dest: self.dest_input_unit(*dest),
                });
            }
        }

        self.send(RenderCommand::SetEdges { edges });
    }

    /// True iff a directed path exists from `from` to `to`.
    pub fn has_path(&self, from: NodeId, to: NodeId) -> bool {
        if from == to {
            return true;
        }
        let mut stack = vec![from];
        let mut seen: HashSet<NodeId> = HashSet::new();
        while let Some(current) = stack.pop() {
            for (source, dest) in &self.connections {
                if *source == current {
                    if *dest == to {
                        return true;
                    }
                    if seen.insert(*dest) {
                        stack.push(*dest);
                    }
                }
            }
        }
        false
    }

    fn dest_input_unit(&self, dest: NodeId) -> UnitId {
        if dest == self.endpoint {
            UnitId::ENDPOINT
        } else {
            self.node(dest).map_or(UnitId::ENDPOINT, |n| n.input_unit())
        }
    }

    /// Creates/destroys/updates one node's gain and monitor wrappers.
    fn sync_wrappers(&mut self, index: usize) {
        let (id, ins, outs) = {
            let node = &self.nodes[index];
            (node.id, node.input_channels, node.output_channels)
        };

        // Input gainer.
        let wants = self.nodes[index].wants_in_gainer() && ins > 0;
        if wants && self.nodes[index].in_gainer.is_none() {
            let unit = self.alloc_unit();
            self.send(RenderCommand::AddUnit {
                id: unit,
                unit: RenderUnit::Gain {
                    channels: ins,
                    gain: 1.0,
                },
            });
            self.nodes[index].in_gainer = Some(unit);
        } else if !wants && let Some(unit) = self.nodes[index].in_gainer.take() {
            self.send(RenderCommand::RemoveUnit { id: unit });
        }
        if let Some(unit) = self.nodes[index].in_gainer {
            let gain = self.nodes[index].input_level;
            self.send(RenderCommand::SetGain { id: unit, gain });
        }

        // Input monitor.
        let wants = self.nodes[index].monitor_input && ins > 0;
        if wants && self.nodes[index].in_monitor.is_none() {
            let unit = self.alloc_unit();
            let peak = Arc::clone(&self.nodes[index].in_peak);
            self.send(RenderCommand::AddUnit {
                id: unit,
                unit: RenderUnit::Monitor {
                    channels: ins,
                    peak,
                },
            });
            self.nodes[index].in_monitor = Some(unit);
        } else if !wants && let Some(unit) = self.nodes[index].in_monitor.take() {
            self.send(RenderCommand::RemoveUnit { id: unit });
        }

        // Output gainer.
        let wants = self.nodes[index].wants_out_gainer() && outs > 0;
        if wants && self.nodes[index].out_gainer.is_none() {
            let unit = self.alloc_unit();
            self.send(RenderCommand::AddUnit {
                id: unit,
                unit: RenderUnit::Gain {
                    channels: outs,
                    gain: 1.0,
                },
            });
            self.nodes[index].out_gainer = Some(unit);
        } else if !wants && let Some(unit) = self.nodes[index].out_gainer.take() {
            self.send(RenderCommand::RemoveUnit { id: unit });
        }
        if let Some(unit) = self.nodes[index].out_gainer {
            let gain = self.nodes[index].effective_output_gain();
            self.send(RenderCommand::SetGain { id: unit, gain });
        }

        // Output monitor.
        let wants = self.nodes[index].monitor_output && outs > 0;
        if wants && self.nodes[index].out_monitor.is_none() {
            let unit = self.alloc_unit();
            let peak = Arc::clone(&self.nodes[index].out_peak);
            self.send(RenderCommand::AddUnit {
                id: unit,
                unit: RenderUnit::Monitor {
                    channels: outs,
                    peak,
                },
            });
            self.nodes[index].out_monitor = Some(unit);
        } else if !wants && let Some(unit) = self.nodes[index].out_monitor.take() {
            self.send(RenderCommand::RemoveUnit { id: unit });
        }
    }

    fn ensure_splitter(&mut self, source: NodeId, ways: usize, channels: usize) -> UnitId {
        let current = self.node(source).and_then(|n| n.splitter);
        if let Some((unit, current_ways)) = current {
            if current_ways == ways {
                return unit;
            }
            self.send(RenderCommand::RemoveUnit { id: unit });
        }
        let unit = self.alloc_unit();
        self.send(RenderCommand::AddUnit {
            id: unit,
            unit: RenderUnit::Splitter { channels, ways },
        });
        self.with_node(source, |n| n.splitter = Some((unit, ways)))
            .expect("source exists");
        unit
    }

    fn destroy_splitter(&mut self, source: NodeId) {
        let mut removed = None;
        let _ = self.with_node(source, |n| removed = n.splitter.take());
        if let Some((unit, _)) = removed {
            self.send(RenderCommand::RemoveUnit { id: unit });
        }
    }

    /// Swaps the primary/secondary realization of output-device nodes when
    /// primacy changes (the primary is always the first-created one).
    fn rebuild_output_device_units(&mut self) {
        let primary = self.primary_output();
        let outputs: Vec<(NodeId, UnitId)> = self
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::OutputDevice)
            .map(|n| (n.id, n.unit))
            .collect();
        for (id, unit) in outputs {
            if Some(id) == primary || !self.started {
                // Streaming re-creates tap units; while stopped everything
                // is a plain passthrough.
                self.send(RenderCommand::AddUnit {
                    id: unit,
                    unit: RenderUnit::Passthrough { channels: 1 },
                });
            }
        }
    }

    // --- Internals ---

    fn bind_device(&mut self, kind: NodeKind, name: Option<&str>) -> Result<DeviceBinding> {
        let devices = match kind {
            NodeKind::InputDevice => self.backend.list_input_devices()?,
            _ => self.backend.list_output_devices()?,
        };
        let info = find_device(&devices, name)?.clone();
        let requested = DeviceFormat {
            sample_format: SampleFormat::F32,
            channels: if kind == NodeKind::InputDevice { 1 } else { 2 },
            sample_rate: self.sample_rate.max(PRIORITIZED_SAMPLE_RATES[0]),
        };
        let (native, resampling) = negotiate_format(&info, &requested);
        if resampling {
            tracing::debug!(device = %info.name, native = native.sample_rate, client = self.sample_rate, "device resampling enabled");
        }
        Ok(DeviceBinding {
            info,
            native,
            resampling,
        })
    }

    fn alloc_unit(&mut self) -> UnitId {
        let id = UnitId(self.next_unit);
        self.next_unit += 1;
        id
    }

    fn send(&mut self, command: RenderCommand) {
        // The receiver only disappears mid-teardown.
        let _ = self.render_tx.send(command);
    }
}

impl std::fmt::Debug for AudioGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioGraph")
            .field("nodes", &self.nodes.len())
            .field("connections", &self.connections.len())
            .field("sample_rate", &self.sample_rate)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}
