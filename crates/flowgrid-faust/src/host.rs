//! The DSP slot lifecycle and listener fan-out.
//!
//! A slot owns `(code, factory, dsp, box, error)` for one Faust program.
//! The host runs the compile pipeline on every code change, create, delete,
//! or sample-rate change, and reports what happened as [`DspEvent`]s that
//! the owner routes to its listeners (the audio graph is always one: it
//! inserts, removes, or re-wires its Faust node in response).
//!
//! Invariants, checked in debug builds after every transition: the factory
//! and dsp are either both present or both absent, and an error never
//! coexists with a dsp.

use std::collections::HashMap;
use std::sync::Arc;

use crate::boxes::BoxDesc;
use crate::compiler::{BoxCompiler, CompileError};
use crate::dsp::{DspFactory, FaustDsp};

/// What happened to a slot, from a listener's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DspEventKind {
    /// A runnable DSP now exists where none did.
    Added,
    /// The slot's DSP is gone.
    Removed,
    /// Reserved: the DSP object survived but its configuration changed.
    /// Emitted only for sample-rate re-inits, where instance identity is
    /// preserved; code changes always produce a Removed/Added pair.
    Changed,
}

/// One listener notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DspEvent {
    /// The slot's id (the owning component's id).
    pub dsp_id: u32,
    /// What happened.
    pub kind: DspEventKind,
}

/// One DSP slot: source code and everything compiled from it.
#[derive(Debug, Default)]
struct DspSlot {
    code: String,
    box_desc: Option<BoxDesc>,
    factory: Option<Arc<DspFactory>>,
    dsp: Option<FaustDsp>,
    error: Option<String>,
}

impl DspSlot {
    fn check_invariants(&self) {
        debug_assert_eq!(
            self.factory.is_some(),
            self.dsp.is_some(),
            "slot invariant: factory and dsp must be present together"
        );
        debug_assert!(
            !(self.error.is_some() && self.dsp.is_some()),
            "slot invariant: error and dsp may not coexist"
        );
    }
}

/// Owns every DSP slot and drives the compile pipeline.
pub struct FaustDspHost {
    compiler: Box<dyn BoxCompiler>,
    slots: HashMap<u32, DspSlot>,
    sample_rate: u32,
    /// Extra compiler flags (library include path, `-double`).
    args: Vec<String>,
    opt_level: i32,
}

impl FaustDspHost {
    /// A host compiling with `compiler` at `sample_rate`.
    pub fn new(compiler: Box<dyn BoxCompiler>, sample_rate: u32) -> Self {
        FaustDspHost {
            compiler,
            slots: HashMap::new(),
            sample_rate,
            args: Vec::new(),
            opt_level: -1,
        }
    }

    /// Sets the compiler argument list used for subsequent compiles.
    pub fn set_compiler_args(&mut self, args: Vec<String>) {
        self.args = args;
    }

    /// Ids of all live slots, in unspecified order.
    pub fn dsp_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots.keys().copied()
    }

    /// The slot's current source code.
    pub fn code(&self, dsp_id: u32) -> Option<&str> {
        self.slots.get(&dsp_id).map(|s| s.code.as_str())
    }

    /// The slot's error-log entry, if the last compile failed.
    pub fn error(&self, dsp_id: u32) -> Option<&str> {
        self.slots.get(&dsp_id).and_then(|s| s.error.as_deref())
    }

    /// The slot's box descriptor, if compiled.
    pub fn box_desc(&self, dsp_id: u32) -> Option<&BoxDesc> {
        self.slots.get(&dsp_id).and_then(|s| s.box_desc.as_ref())
    }

    /// The slot's factory, shareable with the audio graph for spawning
    /// render-side instances.
    pub fn factory(&self, dsp_id: u32) -> Option<Arc<DspFactory>> {
        self.slots.get(&dsp_id).and_then(|s| s.factory.clone())
    }

    /// The slot's own instance (the one backing the parameter UI model).
    pub fn dsp(&self, dsp_id: u32) -> Option<&FaustDsp> {
        self.slots.get(&dsp_id).and_then(|s| s.dsp.as_ref())
    }

    /// Mutable access to the slot's instance, for parameter writes.
    pub fn dsp_mut(&mut self, dsp_id: u32) -> Option<&mut FaustDsp> {
        self.slots.get_mut(&dsp_id).and_then(|s| s.dsp.as_mut())
    }

    /// Creates a slot and compiles its initial code.
    pub fn create_dsp(&mut self, dsp_id: u32, code: impl Into<String>) -> Vec<DspEvent> {
        let code = code.into();
        tracing::info!(dsp_id, bytes = code.len(), "creating faust dsp slot");
        self.slots.insert(
            dsp_id,
            DspSlot {
                code,
                ..DspSlot::default()
            },
        );
        self.update_slot(dsp_id)
    }

    /// Destroys a slot, releasing factory and instance.
    pub fn delete_dsp(&mut self, dsp_id: u32) -> Vec<DspEvent> {
        let Some(slot) = self.slots.remove(&dsp_id) else {
            return Vec::new();
        };
        tracing::info!(dsp_id, "deleting faust dsp slot");
        if slot.dsp.is_some() {
            vec![DspEvent {
                dsp_id,
                kind: DspEventKind::Removed,
            }]
        } else {
            Vec::new()
        }
    }

    /// Replaces a slot's source code and recompiles.
    pub fn set_code(&mut self, dsp_id: u32, code: impl Into<String>) -> Vec<DspEvent> {
        let Some(slot) = self.slots.get_mut(&dsp_id) else {
            return Vec::new();
        };
        slot.code = code.into();
        self.update_slot(dsp_id)
    }

    /// Re-initializes every live instance at the new rate.
    pub fn on_sample_rate_changed(&mut self, sample_rate: u32) -> Vec<DspEvent> {
        self.sample_rate = sample_rate;
        let mut events = Vec::new();
        for (id, slot) in &mut self.slots {
            if let Some(dsp) = slot.dsp.as_mut() {
                dsp.init(sample_rate);
                events.push(DspEvent {
                    dsp_id: *id,
                    kind: DspEventKind::Changed,
                });
            }
        }
        events
    }

    /// The compile pipeline: uninit, boxes, factory, instance, init.
    fn update_slot(&mut self, dsp_id: u32) -> Vec<DspEvent> {
        let Some(slot) = self.slots.get_mut(&dsp_id) else {
            return Vec::new();
        };
        let mut events = Vec::new();

        // 1. Uninit: drop instance and factory before any recompile so the
        //    old program is fully released first.
        if slot.dsp.take().is_some() {
            events.push(DspEvent {
                dsp_id,
                kind: DspEventKind::Removed,
            });
        }
        slot.factory = None;
        slot.box_desc = None;
        slot.error = None;

        // 2-4. Boxes, factory, instance.
        let label = format!("flowgrid-{dsp_id:08x}");
        let compiled = self
            .compiler
            .compile_boxes(&label, &slot.code, &self.args)
            .and_then(|desc| {
                let factory =
                    self.compiler
                        .compile_factory(&label, &desc, &self.args, self.opt_level)?;
                Ok((desc, Arc::new(factory)))
            });

        match compiled {
            Ok((desc, factory)) => {
                // 5. Init the instance and publish.
                let mut dsp = factory.create_instance();
                dsp.init(self.sample_rate);
                tracing::info!(
                    dsp_id,
                    inputs = desc.inputs,
                    outputs = desc.outputs,
                    params = desc.params.len(),
                    "faust dsp compiled"
                );
                slot.box_desc = Some(desc);
                slot.factory = Some(factory);
                slot.dsp = Some(dsp);
                events.push(DspEvent {
                    dsp_id,
                    kind: DspEventKind::Added,
                });
            }
            Err(err) => {
                // 6. Publish the error message to the log slot. An empty
                //    message would leave the failure invisible.
                let message = match err {
                    CompileError::NoResult => "compiler returned no result".to_owned(),
                    other => other.to_string(),
                };
                tracing::warn!(dsp_id, error = %message, "faust dsp compile failed");
                slot.error = Some(message);
            }
        }
        slot.check_invariants();
        events
    }
}

impl std::fmt::Debug for FaustDspHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaustDspHost")
            .field("slots", &self.slots.len())
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::SubsetCompiler;

    fn host() -> FaustDspHost {
        FaustDspHost::new(Box::new(SubsetCompiler::new()), 48_000)
    }

    #[test]
    fn create_compiles_and_notifies_added() {
        let mut host = host();
        let events = host.create_dsp(1, "process = _;");
        assert_eq!(
            events,
            vec![DspEvent {
                dsp_id: 1,
                kind: DspEventKind::Added,
            }]
        );
        assert!(host.error(1).is_none());
        let dsp = host.dsp(1).unwrap();
        assert_eq!((dsp.num_inputs(), dsp.num_outputs()), (1, 1));
        assert_eq!(dsp.sample_rate(), 48_000);
    }

    #[test]
    fn code_change_is_removed_then_added() {
        let mut host = host();
        host.create_dsp(1, "process = _;");
        let events = host.set_code(1, "process = _,_;");
        assert_eq!(
            events,
            vec![
                DspEvent {
                    dsp_id: 1,
                    kind: DspEventKind::Removed,
                },
                DspEvent {
                    dsp_id: 1,
                    kind: DspEventKind::Added,
                },
            ]
        );
        assert_eq!(host.dsp(1).unwrap().num_outputs(), 2);
    }

    #[test]
    fn compile_failure_lands_in_error_slot() {
        let mut host = host();
        let events = host.create_dsp(1, "process = nonsense;");
        assert!(events.is_empty());
        assert!(host.dsp(1).is_none());
        assert!(host.factory(1).is_none());
        let error = host.error(1).unwrap();
        assert!(error.contains("nonsense"), "unexpected error: {error}");
    }

    #[test]
    fn fixing_bad_code_recovers() {
        let mut host = host();
        host.create_dsp(1, "process = nonsense;");
        let events = host.set_code(1, "process = _;");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, DspEventKind::Added);
        assert!(host.error(1).is_none());
    }

    #[test]
    fn breaking_good_code_removes_the_dsp() {
        let mut host = host();
        host.create_dsp(1, "process = _;");
        let events = host.set_code(1, "process = ;");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, DspEventKind::Removed);
        assert!(host.dsp(1).is_none());
        assert!(host.error(1).is_some());
    }

    #[test]
    fn delete_notifies_removed() {
        let mut host = host();
        host.create_dsp(1, "process = _;");
        let events = host.delete_dsp(1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, DspEventKind::Removed);
        assert!(host.dsp(1).is_none());
        assert!(host.code(1).is_none());
    }

    #[test]
    fn sample_rate_change_reinits_and_notifies_changed() {
        let mut host = host();
        host.create_dsp(1, "process = _;");
        let events = host.on_sample_rate_changed(44_100);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, DspEventKind::Changed);
        assert_eq!(host.dsp(1).unwrap().sample_rate(), 44_100);
    }

    #[test]
    fn render_instances_come_from_the_shared_factory() {
        let mut host = host();
        host.create_dsp(1, "process = _ * 0.5;");
        let factory = host.factory(1).unwrap();
        let mut render = factory.create_instance();
        render.init(48_000);
        assert_eq!(render.num_inputs(), 1);
    }
}
