//! The FlowGrid project engine.
//!
//! [`Engine`] owns every subsystem — the store with its history, the
//! component tree and change dispatcher, the audio graph, the Faust host,
//! and the per-DSP text editors — and wires the application's data flow:
//! queued actions mutate the store through a transient, each commit's patch
//! drives the dispatcher, and the dispatcher's notifications fan out to the
//! subsystems that rebuild themselves from stored state.
//!
//! The same crate owns the project file formats: `.fls` state documents
//! (JSON-Pointer path → primitive), `.fla` indexed gesture logs, and the
//! `.flp` preferences file, all under the `.flowgrid` internal directory.

pub mod engine;
pub mod error;
pub mod format;
pub mod paths;

pub use engine::Engine;
pub use error::{ProjectError, Result};
pub use format::{ActionDocument, Preferences, ProjectFormat, StateDocument};
