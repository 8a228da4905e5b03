//! State store and action machinery for the FlowGrid audio workstation.
//!
//! This crate is the single source of truth for all persistent application
//! state. It provides:
//!
//! - **Paths and primitives**: [`Path`] addresses, [`Primitive`] values
//! - **Persistent store**: [`Store`] (structural sharing) and
//!   [`TransientStore`] batch mutation, with [`Patch`] diffing
//! - **Actions and history**: the [`Action`] taxonomy, gesture grouping and
//!   merging, and the undo/redo [`History`]
//! - **Components and dispatch**: the [`ComponentTree`] arena with its field
//!   registry, and the patch-driven [`Dispatcher`] listener fan-out
//!
//! # Architecture
//!
//! State flows one way: user intents become [`Action`]s, actions are queued
//! through an [`ActionQueue`] and drained on the main loop, savable actions
//! mutate the store through an open transient, and each commit produces a
//! [`Patch`]. The [`Dispatcher`] walks the patch, refreshes the cached value
//! of every affected field in the [`ComponentTree`], and reports which
//! registered listeners must be notified. Consecutive savable actions are
//! grouped into [`Gesture`]s which land in the [`History`] as atomic undo
//! units.
//!
//! The store is conceptually single-writer: all writes happen on the main
//! loop. Because snapshots share structure, readers may hold arbitrary-age
//! [`Store`] values without coordination.

pub mod action;
pub mod component;
pub mod dispatch;
pub mod error;
pub mod gesture;
pub mod history;
pub mod patch;
pub mod path;
pub mod primitive;
pub mod queue;
pub mod store;

pub use action::{
    Action, BufferAction, BufferOp, CursorTarget, FaustAction, FileDialogAction, GraphAction,
    PrimitiveAction, ProjectAction,
};
pub use component::{ComponentId, ComponentTree};
pub use dispatch::{DispatchOutcome, Dispatcher, ListenerId};
pub use error::{CoreError, Result};
pub use gesture::{ActionMoment, Gesture, Timestamp, can_coalesce, merge_gesture};
pub use history::{History, Record};
pub use patch::{Patch, PatchOp};
pub use path::{Path, PathId};
pub use primitive::Primitive;
pub use queue::{ActionProducer, ActionQueue};
pub use store::{AppStore, Store, TransientStore};
