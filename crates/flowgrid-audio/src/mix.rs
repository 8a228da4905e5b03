//! The render-side mix graph executed by the audio callback.
//!
//! Units are primitive processors with stable ids and planar per-bus output
//! buffers. The logical graph publishes topology as a flat edge table plus
//! unit add/remove commands; [`RenderHost::render`] drains pending commands
//! at the top of each block, then pulls the endpoint.
//!
//! Evaluation walks inbound edges depth-first from the endpoint. Fan-in is
//! mixed by summation. A unit reached twice within one block (a feedback
//! loop in the user's connection matrix) contributes its previous block's
//! output, which breaks the cycle with one block of latency instead of
//! recursing forever.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crossbeam_channel::{Receiver, Sender, unbounded};
use ringbuf::HeapCons;
use ringbuf::HeapProd;
use ringbuf::traits::{Consumer, Producer};

use flowgrid_faust::FaustDsp;

/// Stable identifier of a render unit.
///
/// Id 0 is the graph endpoint: it is never stored in the unit table and is
/// only valid as an edge destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub u32);

impl UnitId {
    /// The graph endpoint pseudo-unit.
    pub const ENDPOINT: UnitId = UnitId(0);
}

/// Oscillator shapes for the waveform unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaveShape {
    /// Sine wave.
    Sine,
    /// Square wave.
    Square,
    /// Rising sawtooth.
    Saw,
    /// Triangle wave.
    Triangle,
}

/// A primitive processor.
pub enum RenderUnit {
    /// Copies input to output unchanged.
    Passthrough {
        /// Channel count.
        channels: usize,
    },
    /// Scales input by a gain factor.
    Gain {
        /// Channel count.
        channels: usize,
        /// Linear gain.
        gain: f32,
    },
    /// Passes input through while publishing the block's peak magnitude.
    Monitor {
        /// Channel count.
        channels: usize,
        /// Peak of the last block, stored as f32 bits.
        peak: Arc<AtomicU32>,
    },
    /// Duplicates one input bus across `ways` output buses.
    Splitter {
        /// Channel count per bus.
        channels: usize,
        /// Number of output buses.
        ways: usize,
    },
    /// A free-running oscillator.
    Waveform {
        /// Shape.
        shape: WaveShape,
        /// Frequency in Hz.
        freq: f32,
        /// Peak amplitude.
        amp: f32,
        /// Phase in [0, 1).
        phase: f32,
    },
    /// Runs a Faust DSP instance; silent while no instance is installed.
    Faust {
        /// Input channel count (kept while `dsp` is absent).
        inputs: usize,
        /// Output channel count (kept while `dsp` is absent).
        outputs: usize,
        /// The executing instance.
        dsp: Option<Box<FaustDsp>>,
    },
    /// Reads frames captured by an input device from its ring buffer.
    Capture {
        /// Channel count.
        channels: usize,
        /// Consumer half of the device's duplex ring (interleaved samples).
        consumer: HeapCons<f32>,
    },
    /// Copies input to output while feeding a secondary output device's
    /// passthrough ring.
    Tap {
        /// Channel count.
        channels: usize,
        /// Producer half of the device's passthrough ring (interleaved).
        producer: HeapProd<f32>,
    },
}

impl RenderUnit {
    fn input_channels(&self) -> usize {
        match self {
            RenderUnit::Passthrough { channels }
            | RenderUnit::Gain { channels, .. }
            | RenderUnit::Monitor { channels, .. }
            | RenderUnit::Splitter { channels, .. }
            | RenderUnit::Tap { channels, .. } => *channels,
            RenderUnit::Waveform { .. } | RenderUnit::Capture { .. } => 0,
            RenderUnit::Faust { inputs, .. } => *inputs,
        }
    }

    fn output_buses(&self) -> usize {
        match self {
            RenderUnit::Splitter { ways, .. } => *ways,
            _ => 1,
        }
    }

    fn output_channels(&self) -> usize {
        match self {
            RenderUnit::Passthrough { channels }
            | RenderUnit::Gain { channels, .. }
            | RenderUnit::Monitor { channels, .. }
            | RenderUnit::Splitter { channels, .. }
            | RenderUnit::Tap { channels, .. }
            | RenderUnit::Capture { channels, .. } => *channels,
            RenderUnit::Waveform { .. } => 1,
            RenderUnit::Faust { outputs, .. } => *outputs,
        }
    }
}

impl std::fmt::Debug for RenderUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RenderUnit::Passthrough { .. } => "Passthrough",
            RenderUnit::Gain { .. } => "Gain",
            RenderUnit::Monitor { .. } => "Monitor",
            RenderUnit::Splitter { .. } => "Splitter",
            RenderUnit::Waveform { .. } => "Waveform",
            RenderUnit::Faust { .. } => "Faust",
            RenderUnit::Capture { .. } => "Capture",
            RenderUnit::Tap { .. } => "Tap",
        };
        f.write_str(name)
    }
}

/// One attached bus: `source`'s `source_bus` feeds `dest`'s input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderEdge {
    /// Feeding unit.
    pub source: UnitId,
    /// Output bus of the feeding unit.
    pub source_bus: u32,
    /// Fed unit ([`UnitId::ENDPOINT`] for the graph endpoint).
    pub dest: UnitId,
}

/// Topology updates shipped from the logical graph to the render side.
pub enum RenderCommand {
    /// Install a unit.
    AddUnit {
        /// The unit's id.
        id: UnitId,
        /// The unit itself.
        unit: RenderUnit,
    },
    /// Remove a unit (and implicitly every edge naming it).
    RemoveUnit {
        /// The unit's id.
        id: UnitId,
    },
    /// Replace the whole edge table.
    SetEdges {
        /// The new attachment set.
        edges: Vec<RenderEdge>,
    },
    /// Update a gain unit's factor.
    SetGain {
        /// Target unit.
        id: UnitId,
        /// New linear gain.
        gain: f32,
    },
    /// Update a waveform unit's oscillator settings.
    SetWaveform {
        /// Target unit.
        id: UnitId,
        /// New shape.
        shape: WaveShape,
        /// New frequency in Hz.
        freq: f32,
        /// New amplitude.
        amp: f32,
    },
    /// Swap a Faust unit's instance (None silences it).
    ReplaceFaust {
        /// Target unit.
        id: UnitId,
        /// The initialized instance, or None.
        dsp: Option<Box<FaustDsp>>,
    },
    /// Change the render sample rate.
    SetSampleRate {
        /// New rate in Hz.
        rate: u32,
    },
}

#[derive(Debug)]
struct UnitState {
    unit: RenderUnit,
    /// Planar output per bus: `outs[bus][channel * frames + frame]`.
    outs: Vec<Vec<f32>>,
    /// Planar fan-in mix buffer.
    in_buf: Vec<f32>,
}

/// The flat unit table plus the edge set, evaluated per block.
#[derive(Debug)]
pub struct RenderGraph {
    units: HashMap<u32, UnitState>,
    edges: Vec<RenderEdge>,
    /// dest id → [(source id, source bus)], derived from `edges`.
    inbound: HashMap<u32, Vec<(u32, u32)>>,
    /// Cached evaluation order (postorder from the endpoint) and the
    /// endpoint's direct feeders. Rebuilt only after topology commands, so
    /// steady-state blocks never allocate.
    order: Vec<u32>,
    endpoint_feeders: Vec<(u32, u32)>,
    order_dirty: bool,
    sample_rate: u32,
    /// Buffer capacity in frames; grows on demand at block boundaries.
    block_capacity: usize,
}

impl RenderGraph {
    /// An empty graph at `sample_rate`.
    pub fn new(sample_rate: u32) -> Self {
        RenderGraph {
            units: HashMap::new(),
            edges: Vec::new(),
            inbound: HashMap::new(),
            order: Vec::new(),
            endpoint_feeders: Vec::new(),
            order_dirty: true,
            sample_rate,
            block_capacity: 0,
        }
    }

    /// The current sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of installed units.
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Applies one command.
    pub fn apply(&mut self, command: RenderCommand) {
        match command {
            RenderCommand::AddUnit { id, unit } => {
                debug_assert_ne!(id, UnitId::ENDPOINT, "endpoint is not a real unit");
                let buses = unit.output_buses();
                let channels = unit.output_channels();
                let state = UnitState {
                    in_buf: vec![0.0; unit.input_channels() * self.block_capacity],
                    outs: vec![vec![0.0; channels * self.block_capacity]; buses],
                    unit,
                };
                self.units.insert(id.0, state);
                self.order_dirty = true;
            }
            RenderCommand::RemoveUnit { id } => {
                self.units.remove(&id.0);
                self.edges.retain(|e| e.source != id && e.dest != id);
                self.rebuild_inbound();
            }
            RenderCommand::SetEdges { edges } => {
                self.edges = edges;
                self.rebuild_inbound();
            }
            RenderCommand::SetGain { id, gain } => {
                if let Some(state) = self.units.get_mut(&id.0)
                    && let RenderUnit::Gain { gain: slot, .. } = &mut state.unit
                {
                    *slot = gain;
                }
            }
            RenderCommand::SetWaveform {
                id,
                shape,
                freq,
                amp,
            } => {
                if let Some(state) = self.units.get_mut(&id.0)
                    && let RenderUnit::Waveform {
                        shape: s,
                        freq: f,
                        amp: a,
                        ..
                    } = &mut state.unit
                {
                    *s = shape;
                    *f = freq;
                    *a = amp;
                }
            }
            RenderCommand::ReplaceFaust { id, dsp } => {
                if let Some(state) = self.units.get_mut(&id.0)
                    && let RenderUnit::Faust {
                        inputs,
                        outputs,
                        dsp: slot,
                    } = &mut state.unit
                {
                    if let Some(instance) = &dsp {
                        *inputs = instance.num_inputs();
                        *outputs = instance.num_outputs();
                    }
                    *slot = dsp;
                    // Channel counts may have changed; resize this unit's
                    // buffers to match.
                    let (ins, chs, buses) = (
                        state.unit.input_channels(),
                        state.unit.output_channels(),
                        state.unit.output_buses(),
                    );
                    state.in_buf = vec![0.0; ins * self.block_capacity];
                    state.outs = vec![vec![0.0; chs * self.block_capacity]; buses];
                }
            }
            RenderCommand::SetSampleRate { rate } => {
                self.sample_rate = rate;
            }
        }
    }

    fn rebuild_inbound(&mut self) {
        self.inbound.clear();
        for edge in &self.edges {
            self.inbound
                .entry(edge.dest.0)
                .or_default()
                .push((edge.source.0, edge.source_bus));
        }
        self.order_dirty = true;
    }

    /// Recomputes the cached evaluation order.
    fn rebuild_order(&mut self) {
        self.endpoint_feeders = self
            .inbound
            .get(&UnitId::ENDPOINT.0)
            .cloned()
            .unwrap_or_default();
        let mut order = Vec::with_capacity(self.units.len());
        let mut visit_state: HashMap<u32, u8> = HashMap::with_capacity(self.units.len());
        let roots: Vec<u32> = self.endpoint_feeders.iter().map(|(id, _)| *id).collect();
        for root in roots {
            self.postorder(root, &mut visit_state, &mut order);
        }
        self.order = order;
        self.order_dirty = false;
    }

    /// Grows per-unit buffers when the host block size exceeds capacity.
    fn ensure_capacity(&mut self, frames: usize) {
        if frames <= self.block_capacity {
            return;
        }
        self.block_capacity = frames;
        for state in self.units.values_mut() {
            state
                .in_buf
                .resize(state.unit.input_channels() * frames, 0.0);
            let channels = state.unit.output_channels();
            for out in &mut state.outs {
                out.resize(channels * frames, 0.0);
            }
        }
    }

    /// Pulls `frames` frames from the endpoint into an interleaved buffer
    /// with `out_channels` channels.
    pub fn read_endpoint(&mut self, out: &mut [f32], frames: usize, out_channels: usize) {
        self.ensure_capacity(frames);
        if self.order_dirty {
            self.rebuild_order();
        }

        // Evaluate in cached postorder; a unit inside a feedback loop was
        // ordered before its in-cycle feeder and therefore reads that
        // feeder's previous block, breaking the cycle.
        let order = std::mem::take(&mut self.order);
        for id in &order {
            self.eval_unit(*id, frames);
        }
        self.order = order;

        // Mix the endpoint's feeders into the interleaved output buffer.
        out[..frames * out_channels].fill(0.0);
        let feeders = std::mem::take(&mut self.endpoint_feeders);
        for (source, bus) in feeders.iter().copied() {
            let Some(source_state) = self.units.get(&source) else {
                continue;
            };
            let Some(source_out) = source_state.outs.get(bus as usize) else {
                continue;
            };
            let source_channels = source_state.unit.output_channels();
            if source_channels == 0 {
                continue;
            }
            for frame in 0..frames {
                for ch in 0..out_channels {
                    // Mono sources spread across all output channels;
                    // multi-channel sources map channel-for-channel.
                    let src_ch = if source_channels == 1 { 0 } else { ch };
                    if src_ch < source_channels {
                        out[frame * out_channels + ch] += source_out[src_ch * frames + frame];
                    }
                }
            }
        }
        self.endpoint_feeders = feeders;
    }

    fn postorder(&self, id: u32, state: &mut HashMap<u32, u8>, order: &mut Vec<u32>) {
        if state.contains_key(&id) {
            // Done, or in progress (a cycle): either way, do not descend.
            return;
        }
        state.insert(id, 1);
        if let Some(feeders) = self.inbound.get(&id) {
            for (source, _) in feeders.clone() {
                self.postorder(source, state, order);
            }
        }
        state.insert(id, 2);
        if self.units.contains_key(&id) {
            order.push(id);
        }
    }

    fn eval_unit(&mut self, id: u32, frames: usize) {
        // Mix fan-in into the unit's input buffer.
        let Some(unit_state) = self.units.get(&id) else {
            return;
        };
        let in_channels = unit_state.unit.input_channels();
        let mut in_buf = std::mem::take(&mut self.units.get_mut(&id).expect("checked").in_buf);
        in_buf[..in_channels * frames].fill(0.0);

        if let Some(feeders) = self.inbound.get(&id) {
            for (source, bus) in feeders {
                let Some(source_state) = self.units.get(source) else {
                    continue;
                };
                let Some(source_out) = source_state.outs.get(*bus as usize) else {
                    continue;
                };
                let source_channels = source_state.unit.output_channels();
                let shared = in_channels.min(source_channels);
                for ch in 0..shared {
                    let src = &source_out[ch * frames..(ch + 1) * frames];
                    let dst = &mut in_buf[ch * frames..(ch + 1) * frames];
                    for (d, s) in dst.iter_mut().zip(src) {
                        *d += *s;
                    }
                }
                // A mono source feeds every input channel.
                if source_channels == 1 {
                    for ch in 1..in_channels {
                        let dst = &mut in_buf[ch * frames..(ch + 1) * frames];
                        for (d, s) in dst.iter_mut().zip(&source_out[..frames]) {
                            *d += *s;
                        }
                    }
                }
            }
        }

        let sample_rate = self.sample_rate;
        let unit_state = self.units.get_mut(&id).expect("checked");
        let mut outs = std::mem::take(&mut unit_state.outs);
        process_unit(&mut unit_state.unit, &in_buf, &mut outs, frames, sample_rate);
        let unit_state = self.units.get_mut(&id).expect("checked");
        unit_state.outs = outs;
        unit_state.in_buf = in_buf;
    }
}

/// Runs one unit for one block.
fn process_unit(
    unit: &mut RenderUnit,
    input: &[f32],
    outs: &mut [Vec<f32>],
    frames: usize,
    sample_rate: u32,
) {
    match unit {
        RenderUnit::Passthrough { channels } => {
            outs[0][..*channels * frames].copy_from_slice(&input[..*channels * frames]);
        }
        RenderUnit::Gain { channels, gain } => {
            for (dst, src) in outs[0][..*channels * frames]
                .iter_mut()
                .zip(&input[..*channels * frames])
            {
                *dst = *src * *gain;
            }
        }
        RenderUnit::Monitor { channels, peak } => {
            let samples = &input[..*channels * frames];
            outs[0][..samples.len()].copy_from_slice(samples);
            let block_peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
            peak.store(block_peak.to_bits(), Ordering::Relaxed);
        }
        RenderUnit::Splitter { channels, .. } => {
            let samples = &input[..*channels * frames];
            for out in outs.iter_mut() {
                out[..samples.len()].copy_from_slice(samples);
            }
        }
        RenderUnit::Waveform {
            shape,
            freq,
            amp,
            phase,
        } => {
            let step = *freq / sample_rate.max(1) as f32;
            for slot in outs[0][..frames].iter_mut() {
                let p = *phase;
                *slot = *amp
                    * match shape {
                        WaveShape::Sine => (p * std::f32::consts::TAU).sin(),
                        WaveShape::Square => {
                            if p < 0.5 {
                                1.0
                            } else {
                                -1.0
                            }
                        }
                        WaveShape::Saw => 2.0 * p - 1.0,
                        WaveShape::Triangle => 1.0 - 4.0 * (p - 0.5).abs(),
                    };
                *phase = (p + step).fract();
            }
        }
        RenderUnit::Faust {
            outputs: out_channels,
            dsp,
            ..
        } => {
            match dsp {
                Some(instance) => instance.compute_planar(frames, input, &mut outs[0]),
                // A swapped-out DSP renders silence.
                None => outs[0][..*out_channels * frames].fill(0.0),
            }
        }
        RenderUnit::Capture { channels, consumer } => {
            // Pop interleaved frames; underruns render as silence.
            let out = &mut outs[0];
            out[..*channels * frames].fill(0.0);
            for frame in 0..frames {
                for ch in 0..*channels {
                    match consumer.try_pop() {
                        Some(sample) => out[ch * frames + frame] = sample,
                        None => return,
                    }
                }
            }
        }
        RenderUnit::Tap { channels, producer } => {
            let samples = &input[..*channels * frames];
            outs[0][..samples.len()].copy_from_slice(samples);
            // Feed the secondary device's passthrough ring, interleaved.
            for frame in 0..frames {
                for ch in 0..*channels {
                    // A full ring drops the oldest data on the device side;
                    // dropping here keeps the callback wait-free.
                    let _ = producer.try_push(samples[ch * frames + frame]);
                }
            }
        }
    }
}

/// The render graph plus its command inbox; lives inside the primary output
/// device's callback (or the manual pump in headless/test runs).
pub struct RenderHost {
    graph: RenderGraph,
    rx: Receiver<RenderCommand>,
}

impl RenderHost {
    /// A host with a fresh command channel; returns the sender half.
    pub fn new(sample_rate: u32) -> (Self, Sender<RenderCommand>) {
        let (tx, rx) = unbounded();
        (
            RenderHost {
                graph: RenderGraph::new(sample_rate),
                rx,
            },
            tx,
        )
    }

    /// Direct access to the graph (tests and the manual pump).
    pub fn graph_mut(&mut self) -> &mut RenderGraph {
        &mut self.graph
    }

    /// Installs pending commands, then pulls one block from the endpoint.
    pub fn render(&mut self, out: &mut [f32], frames: usize, out_channels: usize) {
        while let Ok(command) = self.rx.try_recv() {
            self.graph.apply(command);
        }
        self.graph.read_endpoint(out, frames, out_channels);
    }
}

impl std::fmt::Debug for RenderHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderHost")
            .field("units", &self.graph.unit_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbuf::HeapRb;
    use ringbuf::traits::Split;

    fn edge(source: u32, bus: u32, dest: u32) -> RenderEdge {
        RenderEdge {
            source: UnitId(source),
            source_bus: bus,
            dest: UnitId(dest),
        }
    }

    #[test]
    fn waveform_through_gain_reaches_endpoint() {
        let mut graph = RenderGraph::new(8);
        graph.apply(RenderCommand::AddUnit {
            id: UnitId(1),
            unit: RenderUnit::Waveform {
                shape: WaveShape::Square,
                freq: 2.0,
                amp: 1.0,
                phase: 0.0,
            },
        });
        graph.apply(RenderCommand::AddUnit {
            id: UnitId(2),
            unit: RenderUnit::Gain {
                channels: 1,
                gain: 0.5,
            },
        });
        graph.apply(RenderCommand::SetEdges {
            edges: vec![edge(1, 0, 2), edge(2, 0, 0)],
        });

        let mut out = [0.0f32; 4];
        graph.read_endpoint(&mut out, 4, 1);
        // Square at freq 2 / SR 8: two samples high, two low, scaled 0.5.
        assert_eq!(out, [0.5, 0.5, -0.5, -0.5]);
    }

    #[test]
    fn fan_in_sums_at_destination() {
        let mut graph = RenderGraph::new(48_000);
        for id in [1, 2] {
            graph.apply(RenderCommand::AddUnit {
                id: UnitId(id),
                unit: RenderUnit::Waveform {
                    shape: WaveShape::Square,
                    freq: 0.0,
                    amp: 0.25,
                    phase: 0.0,
                },
            });
        }
        graph.apply(RenderCommand::SetEdges {
            edges: vec![edge(1, 0, 0), edge(2, 0, 0)],
        });
        let mut out = [0.0f32; 2];
        graph.read_endpoint(&mut out, 2, 1);
        assert_eq!(out, [0.5, 0.5]);
    }

    #[test]
    fn splitter_duplicates_across_buses() {
        let mut graph = RenderGraph::new(48_000);
        graph.apply(RenderCommand::AddUnit {
            id: UnitId(1),
            unit: RenderUnit::Waveform {
                shape: WaveShape::Square,
                freq: 0.0,
                amp: 1.0,
                phase: 0.0,
            },
        });
        graph.apply(RenderCommand::AddUnit {
            id: UnitId(2),
            unit: RenderUnit::Splitter {
                channels: 1,
                ways: 2,
            },
        });
        graph.apply(RenderCommand::AddUnit {
            id: UnitId(3),
            unit: RenderUnit::Gain {
                channels: 1,
                gain: 1.0,
            },
        });
        graph.apply(RenderCommand::AddUnit {
            id: UnitId(4),
            unit: RenderUnit::Gain {
                channels: 1,
                gain: 0.5,
            },
        });
        graph.apply(RenderCommand::SetEdges {
            edges: vec![
                edge(1, 0, 2),
                edge(2, 0, 3),
                edge(2, 1, 4),
                edge(3, 0, 0),
                edge(4, 0, 0),
            ],
        });
        let mut out = [0.0f32; 1];
        graph.read_endpoint(&mut out, 1, 1);
        assert_eq!(out, [1.5]);
    }

    #[test]
    fn faust_unit_silences_without_instance_and_runs_with_one() {
        use flowgrid_faust::{BoxCompiler, SubsetCompiler};

        let mut graph = RenderGraph::new(48_000);
        graph.apply(RenderCommand::AddUnit {
            id: UnitId(1),
            unit: RenderUnit::Waveform {
                shape: WaveShape::Square,
                freq: 0.0,
                amp: 1.0,
                phase: 0.0,
            },
        });
        graph.apply(RenderCommand::AddUnit {
            id: UnitId(2),
            unit: RenderUnit::Faust {
                inputs: 1,
                outputs: 1,
                dsp: None,
            },
        });
        graph.apply(RenderCommand::SetEdges {
            edges: vec![edge(1, 0, 2), edge(2, 0, 0)],
        });

        let mut out = [1.0f32; 2];
        graph.read_endpoint(&mut out, 2, 1);
        assert_eq!(out, [0.0, 0.0]);

        let compiler = SubsetCompiler::new();
        let desc = compiler
            .compile_boxes("t", "process = _ * 0.5;", &[])
            .unwrap();
        let factory =
            std::sync::Arc::new(compiler.compile_factory("t", &desc, &[], 0).unwrap());
        let mut dsp = factory.create_instance();
        dsp.init(48_000);
        graph.apply(RenderCommand::ReplaceFaust {
            id: UnitId(2),
            dsp: Some(Box::new(dsp)),
        });
        graph.read_endpoint(&mut out, 2, 1);
        assert_eq!(out, [0.5, 0.5]);
    }

    #[test]
    fn capture_reads_ring_and_underruns_to_silence() {
        let ring = HeapRb::<f32>::new(8);
        let (mut producer, consumer) = ring.split();
        producer.try_push(0.25).unwrap();
        producer.try_push(0.5).unwrap();

        let mut graph = RenderGraph::new(48_000);
        graph.apply(RenderCommand::AddUnit {
            id: UnitId(1),
            unit: RenderUnit::Capture {
                channels: 1,
                consumer,
            },
        });
        graph.apply(RenderCommand::SetEdges {
            edges: vec![edge(1, 0, 0)],
        });

        let mut out = [9.0f32; 4];
        graph.read_endpoint(&mut out, 4, 1);
        assert_eq!(out, [0.25, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn tap_feeds_secondary_ring() {
        let ring = HeapRb::<f32>::new(8);
        let (producer, mut consumer) = ring.split();

        let mut graph = RenderGraph::new(48_000);
        graph.apply(RenderCommand::AddUnit {
            id: UnitId(1),
            unit: RenderUnit::Waveform {
                shape: WaveShape::Square,
                freq: 0.0,
                amp: 0.75,
                phase: 0.0,
            },
        });
        graph.apply(RenderCommand::AddUnit {
            id: UnitId(2),
            unit: RenderUnit::Tap {
                channels: 1,
                producer,
            },
        });
        graph.apply(RenderCommand::SetEdges {
            edges: vec![edge(1, 0, 2), edge(2, 0, 0)],
        });

        let mut out = [0.0f32; 2];
        graph.read_endpoint(&mut out, 2, 1);
        assert_eq!(out, [0.75, 0.75]);
        assert_eq!(consumer.try_pop(), Some(0.75));
        assert_eq!(consumer.try_pop(), Some(0.75));
        assert_eq!(consumer.try_pop(), None);
    }

    #[test]
    fn connection_cycles_resolve_with_one_block_delay() {
        let mut graph = RenderGraph::new(48_000);
        graph.apply(RenderCommand::AddUnit {
            id: UnitId(1),
            unit: RenderUnit::Gain {
                channels: 1,
                gain: 1.0,
            },
        });
        graph.apply(RenderCommand::AddUnit {
            id: UnitId(2),
            unit: RenderUnit::Gain {
                channels: 1,
                gain: 1.0,
            },
        });
        // 1 → 2 → 1 plus 2 → endpoint: must terminate and stay silent.
        graph.apply(RenderCommand::SetEdges {
            edges: vec![edge(1, 0, 2), edge(2, 0, 1), edge(2, 0, 0)],
        });
        let mut out = [1.0f32; 2];
        graph.read_endpoint(&mut out, 2, 1);
        assert_eq!(out, [0.0, 0.0]);
    }

    #[test]
    fn host_applies_commands_at_block_start() {
        let (mut host, tx) = RenderHost::new(48_000);
        tx.send(RenderCommand::AddUnit {
            id: UnitId(1),
            unit: RenderUnit::Waveform {
                shape: WaveShape::Square,
                freq: 0.0,
                amp: 1.0,
                phase: 0.0,
            },
        })
        .unwrap();
        tx.send(RenderCommand::SetEdges {
            edges: vec![edge(1, 0, 0)],
        })
        .unwrap();

        let mut out = [0.0f32; 2];
        host.render(&mut out, 1, 2);
        assert_eq!(out, [1.0, 1.0]);
    }

    #[test]
    fn stereo_endpoint_interleaves() {
        let mut graph = RenderGraph::new(48_000);
        graph.apply(RenderCommand::AddUnit {
            id: UnitId(1),
            unit: RenderUnit::Waveform {
                shape: WaveShape::Square,
                freq: 0.0,
                amp: 0.5,
                phase: 0.0,
            },
        });
        graph.apply(RenderCommand::SetEdges {
            edges: vec![edge(1, 0, 0)],
        });
        let mut out = [0.0f32; 4];
        graph.read_endpoint(&mut out, 2, 2);
        // Mono source spread to both channels of both frames.
        assert_eq!(out, [0.5, 0.5, 0.5, 0.5]);
    }
}
