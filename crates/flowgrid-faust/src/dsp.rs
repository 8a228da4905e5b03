//! Executable DSP instances.
//!
//! A [`DspFactory`] is the runnable form of a compiled box; it stamps out
//! [`FaustDsp`] instances obeying `{init(sample_rate), compute(frames,
//! inputs, outputs)}`. Instances pre-allocate every buffer they touch at
//! construction, so `compute` never allocates on the audio thread.

use crate::boxes::{BinOp, BoxDesc, BoxExpr, DspParam};

/// The runnable form of a compiled box descriptor.
///
/// Factories are immutable and cheap to share; each
/// [`create_instance`](Self::create_instance) call builds an independent
/// instance with its own state, which is how the host's slot and the audio
/// graph's render side each get their own copy of the same DSP.
#[derive(Debug)]
pub struct DspFactory {
    label: String,
    desc: BoxDesc,
}

impl DspFactory {
    /// Wraps a box descriptor as a factory.
    pub fn new(label: impl Into<String>, desc: BoxDesc) -> Self {
        DspFactory {
            label: label.into(),
            desc,
        }
    }

    /// The diagram label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The descriptor this factory was built from.
    pub fn desc(&self) -> &BoxDesc {
        &self.desc
    }

    /// Stamps out a fresh, uninitialized instance.
    pub fn create_instance(&self) -> FaustDsp {
        FaustDsp {
            tree: EvalTree::build(&self.desc.expr),
            params: self.desc.params.iter().map(|p| p.init).collect(),
            param_info: self.desc.params.clone(),
            inputs: self.desc.inputs,
            outputs: self.desc.outputs,
            sample_rate: 0,
            in_frame: vec![0.0; self.desc.inputs],
        }
    }
}

/// One executable DSP instance.
#[derive(Debug)]
pub struct FaustDsp {
    tree: EvalTree,
    params: Vec<f32>,
    param_info: Vec<DspParam>,
    inputs: usize,
    outputs: usize,
    sample_rate: u32,
    in_frame: Vec<f32>,
}

impl FaustDsp {
    /// Number of input channels.
    pub fn num_inputs(&self) -> usize {
        self.inputs
    }

    /// Number of output channels.
    pub fn num_outputs(&self) -> usize {
        self.outputs
    }

    /// The sample rate passed to [`Self::init`] (0 before init).
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The parameter UI model.
    pub fn params(&self) -> &[DspParam] {
        &self.param_info
    }

    /// Reads a parameter's current value.
    pub fn param_value(&self, index: usize) -> Option<f32> {
        self.params.get(index).copied()
    }

    /// Writes a parameter, clamped into its declared range.
    pub fn set_param(&mut self, index: usize, value: f32) {
        if let (Some(slot), Some(info)) = (self.params.get_mut(index), self.param_info.get(index))
        {
            *slot = value.clamp(info.min, info.max);
        }
    }

    /// Initializes instance state for `sample_rate`, zeroing all memory.
    pub fn init(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        self.tree.reset();
    }

    /// Processes `frames` samples.
    ///
    /// `inputs` must hold [`Self::num_inputs`] channel slices and `outputs`
    /// [`Self::num_outputs`], each at least `frames` long. Called from the
    /// audio thread; allocation-free.
    pub fn compute(&mut self, frames: usize, inputs: &[&[f32]], outputs: &mut [&mut [f32]]) {
        debug_assert_eq!(inputs.len(), self.inputs);
        debug_assert_eq!(outputs.len(), self.outputs);
        for frame in 0..frames {
            for (slot, channel) in self.in_frame.iter_mut().zip(inputs.iter()) {
                *slot = channel[frame];
            }
            self.tree.tick(&self.in_frame, &self.params);
            for (channel, value) in outputs.iter_mut().zip(self.tree.out.iter()) {
                channel[frame] = *value;
            }
        }
    }

    /// Like [`Self::compute`], over single planar buffers laid out as
    /// `[channel][frame]` (`channel * frames + frame`). Lets callers with
    /// contiguous channel storage avoid building slice tables per block.
    pub fn compute_planar(&mut self, frames: usize, input: &[f32], output: &mut [f32]) {
        debug_assert!(input.len() >= self.inputs * frames);
        debug_assert!(output.len() >= self.outputs * frames);
        for frame in 0..frames {
            for ch in 0..self.inputs {
                self.in_frame[ch] = input[ch * frames + frame];
            }
            self.tree.tick(&self.in_frame, &self.params);
            for (ch, value) in self.tree.out.iter().enumerate() {
                output[ch * frames + frame] = *value;
            }
        }
    }
}

/// One node of the evaluation tree, with per-node state and scratch space.
#[derive(Debug)]
enum EvalNode {
    Wire,
    Cut,
    Const(f32),
    Param(usize),
    Binary {
        op: BinOp,
        left: Box<EvalTree>,
        right: Box<EvalTree>,
    },
    Par {
        left: Box<EvalTree>,
        right: Box<EvalTree>,
    },
    Seq {
        left: Box<EvalTree>,
        right: Box<EvalTree>,
    },
    Split {
        left: Box<EvalTree>,
        right: Box<EvalTree>,
        fan: Vec<f32>,
    },
    Merge {
        left: Box<EvalTree>,
        right: Box<EvalTree>,
        folded: Vec<f32>,
    },
    Rec {
        left: Box<EvalTree>,
        right: Box<EvalTree>,
        /// Previous frame's left outputs (the feedback path).
        prev: Vec<f32>,
        /// Assembled left input: fed-back samples then external inputs.
        fed: Vec<f32>,
    },
    Delay1 {
        inner: Box<EvalTree>,
        mem: f32,
    },
}

/// A node plus its output frame buffer.
#[derive(Debug)]
struct EvalTree {
    node: EvalNode,
    out: Vec<f32>,
}

impl EvalTree {
    fn build(expr: &BoxExpr) -> EvalTree {
        let outs = expr.outputs();
        let node = match expr {
            BoxExpr::Wire => EvalNode::Wire,
            BoxExpr::Cut => EvalNode::Cut,
            BoxExpr::Number(v) => EvalNode::Const(*v),
            BoxExpr::Param(i) => EvalNode::Param(*i),
            BoxExpr::Binary(op, l, r) => EvalNode::Binary {
                op: *op,
                left: Box::new(EvalTree::build(l)),
                right: Box::new(EvalTree::build(r)),
            },
            BoxExpr::Par(l, r) => EvalNode::Par {
                left: Box::new(EvalTree::build(l)),
                right: Box::new(EvalTree::build(r)),
            },
            BoxExpr::Seq(l, r) => EvalNode::Seq {
                left: Box::new(EvalTree::build(l)),
                right: Box::new(EvalTree::build(r)),
            },
            BoxExpr::Split(l, r) => EvalNode::Split {
                fan: vec![0.0; r.inputs()],
                left: Box::new(EvalTree::build(l)),
                right: Box::new(EvalTree::build(r)),
            },
            BoxExpr::Merge(l, r) => EvalNode::Merge {
                folded: vec![0.0; r.inputs()],
                left: Box::new(EvalTree::build(l)),
                right: Box::new(EvalTree::build(r)),
            },
            BoxExpr::Rec(l, r) => EvalNode::Rec {
                prev: vec![0.0; l.outputs()],
                fed: vec![0.0; l.inputs()],
                left: Box::new(EvalTree::build(l)),
                right: Box::new(EvalTree::build(r)),
            },
            BoxExpr::Delay1(inner) => EvalNode::Delay1 {
                inner: Box::new(EvalTree::build(inner)),
                mem: 0.0,
            },
        };
        EvalTree {
            node,
            out: vec![0.0; outs],
        }
    }

    /// Zeroes all delay and feedback memory.
    fn reset(&mut self) {
        match &mut self.node {
            EvalNode::Wire | EvalNode::Cut | EvalNode::Const(_) | EvalNode::Param(_) => {}
            EvalNode::Binary { left, right, .. }
            | EvalNode::Par { left, right }
            | EvalNode::Seq { left, right } => {
                left.reset();
                right.reset();
            }
            EvalNode::Split { left, right, fan } => {
                fan.fill(0.0);
                left.reset();
                right.reset();
            }
            EvalNode::Merge {
                left,
                right,
                folded,
            } => {
                folded.fill(0.0);
                left.reset();
                right.reset();
            }
            EvalNode::Rec {
                left,
                right,
                prev,
                fed,
            } => {
                prev.fill(0.0);
                fed.fill(0.0);
                left.reset();
                right.reset();
            }
            EvalNode::Delay1 { inner, mem } => {
                *mem = 0.0;
                inner.reset();
            }
        }
        self.out.fill(0.0);
    }

    /// Evaluates one frame: reads `input`, writes `self.out`.
    fn tick(&mut self, input: &[f32], params: &[f32]) {
        match &mut self.node {
            EvalNode::Wire => self.out[0] = input[0],
            EvalNode::Cut => {}
            EvalNode::Const(v) => self.out[0] = *v,
            EvalNode::Param(i) => self.out[0] = params.get(*i).copied().unwrap_or(0.0),
            EvalNode::Binary { op, left, right } => {
                let split = left_inputs(left);
                left.tick(&input[..split], params);
                right.tick(&input[split..], params);
                let (a, b) = (left.out[0], right.out[0]);
                self.out[0] = match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                    BinOp::Rem => a % b,
                };
            }
            EvalNode::Par { left, right } => {
                let split = left_inputs(left);
                left.tick(&input[..split], params);
                right.tick(&input[split..], params);
                let left_outs = left.out.len();
                self.out[..left_outs].copy_from_slice(&left.out);
                self.out[left_outs..].copy_from_slice(&right.out);
            }
            EvalNode::Seq { left, right } => {
                left.tick(input, params);
                right.tick(&left.out, params);
                self.out.copy_from_slice(&right.out);
            }
            EvalNode::Split { left, right, fan } => {
                left.tick(input, params);
                for (i, slot) in fan.iter_mut().enumerate() {
                    *slot = left.out[i % left.out.len()];
                }
                right.tick(fan, params);
                self.out.copy_from_slice(&right.out);
            }
            EvalNode::Merge {
                left,
                right,
                folded,
            } => {
                left.tick(input, params);
                folded.fill(0.0);
                let buckets = folded.len();
                for (i, value) in left.out.iter().enumerate() {
                    folded[i % buckets] += value;
                }
                right.tick(folded, params);
                self.out.copy_from_slice(&right.out);
            }
            EvalNode::Rec {
                left,
                right,
                prev,
                fed,
            } => {
                // The feedback branch reads the previous frame's left
                // outputs; its outputs feed the left's first inputs.
                right.tick(&prev[..right_inputs(right)], params);
                let fed_count = right.out.len();
                fed[..fed_count].copy_from_slice(&right.out);
                fed[fed_count..].copy_from_slice(input);
                left.tick(fed, params);
                prev.copy_from_slice(&left.out);
                self.out.copy_from_slice(&left.out);
            }
            EvalNode::Delay1 { inner, mem } => {
                inner.tick(input, params);
                self.out[0] = *mem;
                *mem = inner.out[0];
            }
        }
    }
}

/// Input arity of a built subtree.
fn left_inputs(tree: &EvalTree) -> usize {
    tree_inputs(tree)
}

fn right_inputs(tree: &EvalTree) -> usize {
    tree_inputs(tree)
}

fn tree_inputs(tree: &EvalTree) -> usize {
    match &tree.node {
        EvalNode::Wire | EvalNode::Cut => 1,
        EvalNode::Const(_) | EvalNode::Param(_) => 0,
        EvalNode::Binary { left, right, .. } | EvalNode::Par { left, right } => {
            tree_inputs(left) + tree_inputs(right)
        }
        EvalNode::Seq { left, .. }
        | EvalNode::Split { left, .. }
        | EvalNode::Merge { left, .. } => tree_inputs(left),
        EvalNode::Rec { left, right, .. } => tree_inputs(left) - right.out.len(),
        EvalNode::Delay1 { inner, .. } => tree_inputs(inner),
    }
}
