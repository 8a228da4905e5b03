//! The `.flowgrid` internal directory and its well-known files.
//!
//! The internal directory lives under the user's home directory (falling
//! back to the working directory when no home is known). It holds the
//! canonical empty project, the optional default project replayed at
//! startup, and the preferences file.

use std::path::PathBuf;
use std::sync::OnceLock;

use crate::error::{ProjectError, Result};

/// Directory name of the internal dir.
const INTERNAL_DIR: &str = ".flowgrid";

/// Process-wide base-directory override (first call wins).
static BASE_OVERRIDE: OnceLock<PathBuf> = OnceLock::new();

/// Overrides the directory hosting `.flowgrid` for this process. The first
/// call wins; later calls are ignored. Used by scripted runs and tests.
pub fn override_base_dir(base: impl Into<PathBuf>) {
    let _ = BASE_OVERRIDE.set(base.into());
}

/// Extension of state-format projects.
pub const STATE_EXTENSION: &str = "fls";

/// Extension of action-format projects.
pub const ACTION_EXTENSION: &str = "fla";

/// Extension of Faust source files.
pub const FAUST_DSP_EXTENSION: &str = "dsp";

/// The internal directory path.
///
/// Resolution order: the process override, the `FLOWGRID_HOME` environment
/// variable, then the user's home directory.
pub fn internal_dir() -> PathBuf {
    if let Some(base) = BASE_OVERRIDE.get() {
        return base.join(INTERNAL_DIR);
    }
    if let Some(base) = std::env::var_os("FLOWGRID_HOME") {
        return PathBuf::from(base).join(INTERNAL_DIR);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(INTERNAL_DIR)
}

/// `.flowgrid/empty.fls` — rewritten on every launch.
pub fn empty_project_path() -> PathBuf {
    internal_dir().join(format!("empty.{STATE_EXTENSION}"))
}

/// `.flowgrid/default.fla` — loaded at startup when present.
pub fn default_project_path() -> PathBuf {
    internal_dir().join(format!("default.{ACTION_EXTENSION}"))
}

/// `.flowgrid/Preferences.flp`.
pub fn preferences_path() -> PathBuf {
    internal_dir().join("Preferences.flp")
}

/// Creates the internal directory if missing.
pub fn ensure_internal_dir() -> Result<PathBuf> {
    let dir = internal_dir();
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|source| ProjectError::WriteFile {
            path: dir.clone(),
            source,
        })?;
    }
    Ok(dir)
}
