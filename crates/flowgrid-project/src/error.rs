//! Error types for project persistence and engine operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from project load/save and engine wiring.
#[derive(Debug, Error)]
pub enum ProjectError {
    /// Failed to read a project or preferences file.
    #[error("failed to read '{path}': {source}")]
    ReadFile {
        /// File that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a project or preferences file.
    #[error("failed to write '{path}': {source}")]
    WriteFile {
        /// File that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A project file did not parse as its format.
    #[error("malformed project file '{path}': {source}")]
    Parse {
        /// The offending file.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The file extension names no known project format.
    #[error("unknown project extension on '{0}'")]
    UnknownFormat(PathBuf),

    /// A stored path failed to parse.
    #[error(transparent)]
    Core(#[from] flowgrid_core::CoreError),

    /// The audio layer failed.
    #[error(transparent)]
    Audio(#[from] flowgrid_audio::AudioError),
}

/// Convenience result type for project operations.
pub type Result<T> = std::result::Result<T, ProjectError>;
