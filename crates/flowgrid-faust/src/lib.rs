//! Faust DSP hosting for FlowGrid.
//!
//! Turns source text into an executing DSP and keeps a stable handle that
//! the audio graph's Faust node can call from the audio thread:
//!
//! - [`BoxDesc`] — the purely-structural box descriptor a compile produces,
//!   from which channel counts and the parameter UI model derive
//! - [`BoxCompiler`] — the compiler seam; [`SubsetCompiler`] is the built-in
//!   implementation covering the Faust core calculus (`_`, `!`, numbers,
//!   arithmetic, `,` `:` `<:` `:>` `~`, and the UI primitives)
//! - [`DspFactory`] / [`FaustDsp`] — the factory/instance split; instances
//!   obey `{init(sample_rate), compute(frames, inputs, outputs)}`
//! - [`FaustDspHost`] — the slot lifecycle (code change, recompile, error
//!   capture) with listener events the owner routes to the audio graph
//!
//! Compilation and lifecycle transitions happen on the main loop; the audio
//! thread only ever sees fully-initialized instances handed over at block
//! boundaries.

pub mod boxes;
pub mod compiler;
pub mod dsp;
pub mod host;

pub use boxes::{BoxDesc, BoxExpr, DspParam, ParamKind};
pub use compiler::{BoxCompiler, CompileError, SubsetCompiler};
pub use dsp::{DspFactory, FaustDsp};
pub use host::{DspEvent, DspEventKind, FaustDspHost};
