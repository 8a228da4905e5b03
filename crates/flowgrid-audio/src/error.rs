//! Error types for graph and device operations.

use thiserror::Error;

/// Errors from the audio layer.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Device enumeration, initialization, or stream start failed. The
    /// graph continues operating without the device.
    #[error("audio device error: {0}")]
    Device(String),

    /// No device matched the requested name.
    #[error("no audio device matching '{0}'")]
    DeviceNotFound(String),

    /// No device of the required direction exists at all.
    #[error("no audio device available")]
    NoDevice,

    /// A graph operation referenced a node that does not exist. At the
    /// topology boundary this indicates a bug in the caller.
    #[error("no graph node with id {0}")]
    NodeNotFound(u32),

    /// The operation is not valid for this node kind (for example,
    /// connecting into an input device).
    #[error("invalid connection: {0}")]
    InvalidConnection(String),
}

/// Convenience result type for audio operations.
pub type Result<T> = std::result::Result<T, AudioError>;
