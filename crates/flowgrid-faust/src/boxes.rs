//! The box algebra: structural DSP descriptions and their channel counts.
//!
//! A box is a purely-structural description of a signal processor. Channel
//! counts derive from the algebra alone, which is what lets the audio graph
//! size a Faust node's buses before any instance exists.

use crate::compiler::CompileError;

/// Binary arithmetic over two single-output boxes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Remainder.
    Rem,
}

/// Which UI primitive a parameter came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    /// `hslider(...)`.
    HSlider,
    /// `vslider(...)`.
    VSlider,
    /// `nentry(...)`.
    NumEntry,
    /// `button(...)`; value is 0 or 1.
    Button,
    /// `checkbox(...)`; value is 0 or 1.
    Checkbox,
}

/// One entry of the parameter UI model derived from a box.
#[derive(Clone, Debug, PartialEq)]
pub struct DspParam {
    /// UI label.
    pub label: String,
    /// Primitive kind.
    pub kind: ParamKind,
    /// Initial value.
    pub init: f32,
    /// Minimum value.
    pub min: f32,
    /// Maximum value.
    pub max: f32,
    /// Step size (0 for buttons/checkboxes).
    pub step: f32,
}

/// A box expression.
///
/// Composition operators follow the Faust core calculus; every constructor
/// function checks the algebra's channel-count side conditions.
#[derive(Clone, Debug, PartialEq)]
pub enum BoxExpr {
    /// `_` — one input wired straight to one output.
    Wire,
    /// `!` — one input, discarded.
    Cut,
    /// A numeric constant; no inputs, one output.
    Number(f32),
    /// A UI parameter; no inputs, one output. The payload is an index into
    /// the descriptor's parameter list.
    Param(usize),
    /// Pointwise arithmetic of two single-output boxes.
    Binary(BinOp, Box<BoxExpr>, Box<BoxExpr>),
    /// `a , b` — parallel composition.
    Par(Box<BoxExpr>, Box<BoxExpr>),
    /// `a : b` — sequential composition.
    Seq(Box<BoxExpr>, Box<BoxExpr>),
    /// `a <: b` — split composition.
    Split(Box<BoxExpr>, Box<BoxExpr>),
    /// `a :> b` — merge composition.
    Merge(Box<BoxExpr>, Box<BoxExpr>),
    /// `a ~ b` — recursive composition with one-sample feedback.
    Rec(Box<BoxExpr>, Box<BoxExpr>),
    /// `a'` — one-sample delay of a single-output box.
    Delay1(Box<BoxExpr>),
}

impl BoxExpr {
    /// Number of input channels.
    pub fn inputs(&self) -> usize {
        match self {
            BoxExpr::Wire | BoxExpr::Cut => 1,
            BoxExpr::Number(_) | BoxExpr::Param(_) => 0,
            BoxExpr::Binary(_, l, r) => l.inputs() + r.inputs(),
            BoxExpr::Par(l, r) => l.inputs() + r.inputs(),
            BoxExpr::Seq(l, _) | BoxExpr::Split(l, _) | BoxExpr::Merge(l, _) => l.inputs(),
            BoxExpr::Rec(l, r) => l.inputs() - r.outputs(),
            BoxExpr::Delay1(inner) => inner.inputs(),
        }
    }

    /// Number of output channels.
    pub fn outputs(&self) -> usize {
        match self {
            BoxExpr::Wire => 1,
            BoxExpr::Cut => 0,
            BoxExpr::Number(_) | BoxExpr::Param(_) => 1,
            BoxExpr::Binary(..) => 1,
            BoxExpr::Par(l, r) => l.outputs() + r.outputs(),
            BoxExpr::Seq(_, r) | BoxExpr::Split(_, r) | BoxExpr::Merge(_, r) => r.outputs(),
            BoxExpr::Rec(l, _) => l.outputs(),
            BoxExpr::Delay1(_) => 1,
        }
    }

    /// `a , b`.
    pub fn par(a: BoxExpr, b: BoxExpr) -> BoxExpr {
        BoxExpr::Par(Box::new(a), Box::new(b))
    }

    /// `a : b`; fails unless `outputs(a) == inputs(b)`.
    pub fn seq(a: BoxExpr, b: BoxExpr) -> Result<BoxExpr, CompileError> {
        if a.outputs() != b.inputs() {
            return Err(CompileError::BoxRule(format!(
                "sequential composition mismatch: left has {} outputs, right expects {} inputs",
                a.outputs(),
                b.inputs()
            )));
        }
        Ok(BoxExpr::Seq(Box::new(a), Box::new(b)))
    }

    /// `a <: b`; fails unless `inputs(b)` is a nonzero multiple of
    /// `outputs(a)`.
    pub fn split(a: BoxExpr, b: BoxExpr) -> Result<BoxExpr, CompileError> {
        let (outs, ins) = (a.outputs(), b.inputs());
        if outs == 0 || ins == 0 || ins % outs != 0 {
            return Err(CompileError::BoxRule(format!(
                "split composition mismatch: left has {outs} outputs, right expects {ins} inputs"
            )));
        }
        Ok(BoxExpr::Split(Box::new(a), Box::new(b)))
    }

    /// `a :> b`; fails unless `outputs(a)` is a nonzero multiple of
    /// `inputs(b)`.
    pub fn merge(a: BoxExpr, b: BoxExpr) -> Result<BoxExpr, CompileError> {
        let (outs, ins) = (a.outputs(), b.inputs());
        if outs == 0 || ins == 0 || outs % ins != 0 {
            return Err(CompileError::BoxRule(format!(
                "merge composition mismatch: left has {outs} outputs, right expects {ins} inputs"
            )));
        }
        Ok(BoxExpr::Merge(Box::new(a), Box::new(b)))
    }

    /// `a ~ b`; fails unless `outputs(a) >= inputs(b)` and
    /// `inputs(a) >= outputs(b)`.
    pub fn rec(a: BoxExpr, b: BoxExpr) -> Result<BoxExpr, CompileError> {
        if a.outputs() < b.inputs() || a.inputs() < b.outputs() {
            return Err(CompileError::BoxRule(format!(
                "recursive composition mismatch: ({} in, {} out) ~ ({} in, {} out)",
                a.inputs(),
                a.outputs(),
                b.inputs(),
                b.outputs()
            )));
        }
        Ok(BoxExpr::Rec(Box::new(a), Box::new(b)))
    }

    /// Pointwise arithmetic; fails unless both sides have one output.
    pub fn binary(op: BinOp, a: BoxExpr, b: BoxExpr) -> Result<BoxExpr, CompileError> {
        if a.outputs() != 1 || b.outputs() != 1 {
            return Err(CompileError::BoxRule(format!(
                "arithmetic requires single-output operands (got {} and {})",
                a.outputs(),
                b.outputs()
            )));
        }
        Ok(BoxExpr::Binary(op, Box::new(a), Box::new(b)))
    }

    /// `a'`; fails unless `a` has exactly one output.
    pub fn delay1(a: BoxExpr) -> Result<BoxExpr, CompileError> {
        if a.outputs() != 1 {
            return Err(CompileError::BoxRule(format!(
                "one-sample delay requires a single-output operand (got {})",
                a.outputs()
            )));
        }
        Ok(BoxExpr::Delay1(Box::new(a)))
    }
}

/// The result of compiling source to boxes: the expression, its channel
/// counts, and the parameter UI model encountered while building it.
#[derive(Clone, Debug, PartialEq)]
pub struct BoxDesc {
    /// Diagram label (the name the compiler was invoked with).
    pub label: String,
    /// The process expression.
    pub expr: BoxExpr,
    /// Input channel count.
    pub inputs: usize,
    /// Output channel count.
    pub outputs: usize,
    /// Parameters, indexed by [`BoxExpr::Param`] payloads.
    pub params: Vec<DspParam>,
}

impl BoxDesc {
    /// Builds a descriptor, deriving channel counts from the expression.
    pub fn new(label: impl Into<String>, expr: BoxExpr, params: Vec<DspParam>) -> Self {
        let inputs = expr.inputs();
        let outputs = expr.outputs();
        BoxDesc {
            label: label.into(),
            expr,
            inputs,
            outputs,
            params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_and_cut_counts() {
        assert_eq!((BoxExpr::Wire.inputs(), BoxExpr::Wire.outputs()), (1, 1));
        assert_eq!((BoxExpr::Cut.inputs(), BoxExpr::Cut.outputs()), (1, 0));
    }

    #[test]
    fn par_adds_counts() {
        let e = BoxExpr::par(BoxExpr::Wire, BoxExpr::Wire);
        assert_eq!((e.inputs(), e.outputs()), (2, 2));
    }

    #[test]
    fn seq_checks_arity() {
        let ok = BoxExpr::seq(BoxExpr::Wire, BoxExpr::Wire).unwrap();
        assert_eq!((ok.inputs(), ok.outputs()), (1, 1));
        assert!(BoxExpr::seq(BoxExpr::par(BoxExpr::Wire, BoxExpr::Wire), BoxExpr::Wire).is_err());
    }

    #[test]
    fn split_duplicates_outputs() {
        // _ <: _,_ has 1 input and 2 outputs.
        let e = BoxExpr::split(BoxExpr::Wire, BoxExpr::par(BoxExpr::Wire, BoxExpr::Wire)).unwrap();
        assert_eq!((e.inputs(), e.outputs()), (1, 2));
    }

    #[test]
    fn merge_folds_outputs() {
        // _,_ :> _ has 2 inputs and 1 output.
        let e = BoxExpr::merge(BoxExpr::par(BoxExpr::Wire, BoxExpr::Wire), BoxExpr::Wire).unwrap();
        assert_eq!((e.inputs(), e.outputs()), (2, 1));
    }

    #[test]
    fn rec_consumes_fed_back_inputs() {
        // (_ + _) ~ _ : the adder's left input is fed back, leaving 1 free.
        let adder = BoxExpr::binary(BinOp::Add, BoxExpr::Wire, BoxExpr::Wire).unwrap();
        let e = BoxExpr::rec(adder, BoxExpr::Wire).unwrap();
        assert_eq!((e.inputs(), e.outputs()), (1, 1));
    }

    #[test]
    fn arithmetic_needs_single_outputs() {
        let stereo = BoxExpr::par(BoxExpr::Wire, BoxExpr::Wire);
        assert!(BoxExpr::binary(BinOp::Mul, stereo, BoxExpr::Number(0.5)).is_err());
    }
}
