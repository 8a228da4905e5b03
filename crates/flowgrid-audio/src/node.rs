//! Logical audio-graph nodes.
//!
//! A node is the main-loop-side view of one processor: its kind, its stored
//! field mirrors (mute, level, monitor flags), its derived activity flag,
//! and the ids of the render units realizing it. A node may be realized by
//! several units: gain and monitor wrappers sit around the core unit, and a
//! fan-out splitter appears when the node feeds more than one destination.

use std::sync::Arc;
use std::sync::atomic::AtomicU32;

use crate::mix::UnitId;

/// Stable identifier of a logical node (the owning component's id).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// The fixed node kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// Reads captured frames from a physical input device.
    InputDevice,
    /// Feeds a physical output device. The first created is primary.
    OutputDevice,
    /// Runs the current Faust DSP.
    Faust,
    /// A free-running oscillator.
    Waveform,
    /// Copies input to output; the extension-point kind.
    Passthrough,
}

/// One logical node.
#[derive(Debug)]
pub struct AudioGraphNode {
    /// Node id.
    pub id: NodeId,
    /// Node kind.
    pub kind: NodeKind,
    /// Display name.
    pub name: String,

    /// Mute flag; realized as zero gain on the output wrapper.
    pub muted: bool,
    /// Linear output level.
    pub output_level: f32,
    /// Linear input level.
    pub input_level: f32,
    /// Capture input peaks for display.
    pub monitor_input: bool,
    /// Capture output peaks for display.
    pub monitor_output: bool,

    /// True iff a directed path exists from this node to the graph
    /// endpoint. Derived by topology compilation.
    pub is_active: bool,

    /// Channels per input bus.
    pub(crate) input_channels: usize,
    /// Channels per output bus.
    pub(crate) output_channels: usize,

    /// The core render unit.
    pub(crate) unit: UnitId,
    /// Input gain wrapper, present while `input_level != 1`.
    pub(crate) in_gainer: Option<UnitId>,
    /// Input monitor wrapper, present while `monitor_input`.
    pub(crate) in_monitor: Option<UnitId>,
    /// Output gain wrapper, present while muted or `output_level != 1`.
    pub(crate) out_gainer: Option<UnitId>,
    /// Output monitor wrapper, present while `monitor_output`.
    pub(crate) out_monitor: Option<UnitId>,
    /// Fan-out splitter, present while this node feeds >1 destination.
    pub(crate) splitter: Option<(UnitId, usize)>,

    /// Peak magnitude of the last monitored input block (f32 bits).
    pub in_peak: Arc<AtomicU32>,
    /// Peak magnitude of the last monitored output block (f32 bits).
    pub out_peak: Arc<AtomicU32>,

    /// Requested device name for device nodes (`None` selects the default).
    pub device_name: Option<String>,
}

impl AudioGraphNode {
    /// A node of `kind` realized by core unit `unit`.
    pub(crate) fn new(
        id: NodeId,
        kind: NodeKind,
        name: impl Into<String>,
        unit: UnitId,
        input_channels: usize,
        output_channels: usize,
    ) -> Self {
        AudioGraphNode {
            id,
            kind,
            name: name.into(),
            muted: false,
            output_level: 1.0,
            input_level: 1.0,
            monitor_input: false,
            monitor_output: false,
            is_active: false,
            input_channels,
            output_channels,
            unit,
            in_gainer: None,
            in_monitor: None,
            out_gainer: None,
            out_monitor: None,
            splitter: None,
            in_peak: Arc::new(AtomicU32::new(0)),
            out_peak: Arc::new(AtomicU32::new(0)),
            device_name: None,
        }
    }

    /// Number of input buses (0 or 1 for every fixed kind).
    pub fn input_bus_count(&self) -> u32 {
        u32::from(self.input_channels > 0)
    }

    /// Number of output buses.
    pub fn output_bus_count(&self) -> u32 {
        u32::from(self.output_channels > 0)
    }

    /// Channels of input bus `bus`.
    pub fn input_channel_count(&self, bus: u32) -> u32 {
        if bus < self.input_bus_count() {
            self.input_channels as u32
        } else {
            0
        }
    }

    /// Channels of output bus `bus`.
    pub fn output_channel_count(&self, bus: u32) -> u32 {
        if bus < self.output_bus_count() {
            self.output_channels as u32
        } else {
            0
        }
    }

    /// Whether users may change this node's inbound connections.
    ///
    /// Input devices source from hardware, not the graph.
    pub fn allow_input_connection_change(&self) -> bool {
        self.kind != NodeKind::InputDevice
    }

    /// Whether users may change this node's outbound connections.
    ///
    /// Output devices are fixed to the graph endpoint.
    pub fn allow_output_connection_change(&self) -> bool {
        self.kind != NodeKind::OutputDevice
    }

    /// True if this node accepts a user-drawn inbound connection.
    pub fn can_connect_input(&self) -> bool {
        self.allow_input_connection_change() && self.input_bus_count() > 0
    }

    /// True if this node accepts a user-drawn outbound connection.
    pub fn can_connect_output(&self) -> bool {
        self.allow_output_connection_change() && self.output_bus_count() > 0
    }

    /// The render unit receiving this node's inbound edges (the head of the
    /// input wrapper chain).
    pub(crate) fn input_unit(&self) -> UnitId {
        self.in_gainer
            .or(self.in_monitor)
            .unwrap_or(self.unit)
    }

    /// The render unit producing this node's outbound frames (the tail of
    /// the output wrapper chain).
    pub(crate) fn output_unit(&self) -> UnitId {
        self.out_monitor
            .or(self.out_gainer)
            .unwrap_or(self.unit)
    }

    /// The gain the output wrapper should apply.
    pub(crate) fn effective_output_gain(&self) -> f32 {
        if self.muted { 0.0 } else { self.output_level }
    }

    /// Whether the output gain wrapper is needed at all.
    pub(crate) fn wants_out_gainer(&self) -> bool {
        self.muted || (self.output_level - 1.0).abs() > f32::EPSILON
    }

    /// Whether the input gain wrapper is needed.
    pub(crate) fn wants_in_gainer(&self) -> bool {
        (self.input_level - 1.0).abs() > f32::EPSILON
    }
}
