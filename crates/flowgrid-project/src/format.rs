//! The project file formats.
//!
//! Two formats, chosen by extension:
//!
//! - **State** (`.fls`): a JSON object mapping JSON-Pointer path strings to
//!   primitive values, one entry per stored leaf, keys sorted.
//! - **Action** (`.fla`): an indexed gesture log — `{"Index": n,
//!   "Gestures": [{"Actions": [...], "CommitTime": ms}, ...]}` — replayed
//!   over the empty project on load.
//!
//! Preferences (`.flp`) hold the recently-opened list.

use std::collections::BTreeMap;
use std::path::{Path as FsPath, PathBuf};

use serde::{Deserialize, Serialize};

use flowgrid_core::{Gesture, Path, Primitive, Store};

use crate::error::{ProjectError, Result};
use crate::paths::{ACTION_EXTENSION, STATE_EXTENSION};

/// Which on-disk format a project file uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProjectFormat {
    /// `.fls` — a snapshot of every stored value.
    State,
    /// `.fla` — the gesture log that reproduces the project.
    Action,
}

impl ProjectFormat {
    /// Determines the format from a file's extension.
    pub fn of(path: &FsPath) -> Result<ProjectFormat> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(STATE_EXTENSION) => Ok(ProjectFormat::State),
            Some(ACTION_EXTENSION) => Ok(ProjectFormat::Action),
            _ => Err(ProjectError::UnknownFormat(path.to_owned())),
        }
    }
}

/// The `.fls` document: sorted path pointer → primitive.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateDocument {
    /// One entry per stored leaf. `BTreeMap` keeps keys sorted so saved
    /// files are diffable.
    pub entries: BTreeMap<String, Primitive>,
}

impl StateDocument {
    /// Captures a store snapshot.
    pub fn from_store(store: &Store) -> StateDocument {
        let entries = store
            .iter()
            .map(|(path, value)| (path.pointer(), value.clone()))
            .collect();
        StateDocument { entries }
    }

    /// The entries as parsed paths, in path order.
    pub fn paths(&self) -> Result<Vec<(Path, Primitive)>> {
        self.entries
            .iter()
            .map(|(pointer, value)| Ok((Path::parse(pointer)?, value.clone())))
            .collect()
    }

    /// Reads a document from disk.
    pub fn read(path: &FsPath) -> Result<StateDocument> {
        let text = std::fs::read_to_string(path).map_err(|source| ProjectError::ReadFile {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ProjectError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Writes the document to disk as pretty JSON.
    pub fn write(&self, path: &FsPath) -> Result<()> {
        let text = serde_json::to_string_pretty(self).expect("state documents always serialize");
        std::fs::write(path, text).map_err(|source| ProjectError::WriteFile {
            path: path.to_owned(),
            source,
        })
    }
}

/// The `.fla` document: history index plus the gesture log.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionDocument {
    /// The history cursor to restore after replay.
    #[serde(rename = "Index")]
    pub index: u32,
    /// Committed gestures, oldest first.
    #[serde(rename = "Gestures")]
    pub gestures: Vec<Gesture>,
}

impl ActionDocument {
    /// Reads a document from disk.
    pub fn read(path: &FsPath) -> Result<ActionDocument> {
        let text = std::fs::read_to_string(path).map_err(|source| ProjectError::ReadFile {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ProjectError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Writes the document to disk as pretty JSON.
    pub fn write(&self, path: &FsPath) -> Result<()> {
        let text = serde_json::to_string_pretty(self).expect("action documents always serialize");
        std::fs::write(path, text).map_err(|source| ProjectError::WriteFile {
            path: path.to_owned(),
            source,
        })
    }
}

/// The `.flp` preferences document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    /// Most recent first, deduplicated, capped.
    #[serde(rename = "RecentlyOpenedPaths")]
    pub recently_opened: Vec<PathBuf>,
}

/// Maximum length of the recently-opened list.
const MAX_RECENT: usize = 10;

impl Preferences {
    /// Reads preferences, yielding defaults when the file is absent.
    pub fn read(path: &FsPath) -> Result<Preferences> {
        if !path.exists() {
            return Ok(Preferences::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ProjectError::ReadFile {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ProjectError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Writes preferences to disk.
    pub fn write(&self, path: &FsPath) -> Result<()> {
        let text = serde_json::to_string_pretty(self).expect("preferences always serialize");
        std::fs::write(path, text).map_err(|source| ProjectError::WriteFile {
            path: path.to_owned(),
            source,
        })
    }

    /// Moves `opened` to the front of the list.
    pub fn record_opened(&mut self, opened: &FsPath) {
        self.recently_opened.retain(|p| p != opened);
        self.recently_opened.insert(0, opened.to_owned());
        self.recently_opened.truncate(MAX_RECENT);
    }
}
