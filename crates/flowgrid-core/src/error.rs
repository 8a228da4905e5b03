//! Error types for store and action operations.

use thiserror::Error;

use crate::path::Path;

/// Errors that can occur while applying actions or resolving paths.
///
/// Transient misuse (`StoreFault`) and impossible patch compositions
/// (`PatchConflict`) indicate bugs rather than recoverable conditions and
/// panic at the site of misuse instead of appearing here.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The action cannot be applied in the current state. Logged and dropped
    /// at the action boundary; the open gesture is left intact.
    #[error("action cannot be applied: {0}")]
    ActionInvalid(String),

    /// No value is stored at the given path.
    #[error("no value stored at '{0}'")]
    NotFound(Path),

    /// No component with the given id exists.
    #[error("no component with id {0:#010x}")]
    ComponentNotFound(u32),

    /// The dispatch table has no handler for this action in this context.
    #[error("unsupported action: {0}")]
    UnsupportedAction(String),

    /// A path string could not be parsed as a JSON-Pointer-style path.
    #[error("malformed path '{0}'")]
    MalformedPath(String),
}

/// Convenience result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
