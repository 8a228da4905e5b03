//! The FlowGrid audio graph engine.
//!
//! Two layers cooperate here, split the way the mutation and audio threads
//! are split:
//!
//! - [`graph::AudioGraph`] — the logical layer owned by the main loop: node
//!   set, directed connections, topology compilation (activity flags,
//!   monitor/gain wrappers, fan-out splitters), device lifecycle, and
//!   sample-rate negotiation.
//! - [`mix::RenderGraph`] — the primitive layer the audio callback executes:
//!   flat units with attached buses, pulled from the graph endpoint once per
//!   block. The logical layer publishes changes as [`mix::RenderCommand`]s
//!   over a channel; the callback installs them at block boundaries, so the
//!   audio thread never observes a half-built topology.
//!
//! Devices sit behind the [`device::DeviceBackend`] trait; the default
//! implementation wraps cpal (feature `cpal-backend`), and a deterministic
//! mock drives tests.

pub mod device;
pub mod error;
pub mod graph;
pub mod mix;
pub mod node;
pub mod ring;

#[cfg(feature = "cpal-backend")]
pub mod cpal_backend;

pub use device::{DeviceBackend, DeviceFormat, DeviceInfo, MockBackend, StreamHandle};
pub use error::{AudioError, Result};
pub use graph::{AudioGraph, PRIORITIZED_SAMPLE_RATES, WaveformSettings};
pub use mix::{RenderCommand, RenderEdge, RenderGraph, RenderHost, RenderUnit, UnitId, WaveShape};
pub use node::{NodeId, NodeKind};
