//! Narrow interfaces to the numeric kernels and the shape-inference rules.
//!
//! Constant folding and linear-operator fusion execute single operators through
//! [`NumericBackend::execute`]; everything else in the optimizer only needs descriptors.

mod eval;
pub mod shape_inference;

use thiserror::Error;

use crate::ir::{Argument, ConstantTensor, Op};

pub use eval::evaluate;
pub use shape_inference::{DefaultShapeInference, ShapeInference};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{op} is not implemented: {reason}")]
    Unimplemented { op: Op, reason: String },
    #[error("invalid argument for {op}: {message}")]
    InvalidArgument { op: Op, message: String },
    #[error("backend execution failure: {message}")]
    Execution { message: String },
}

impl BackendError {
    pub fn unimplemented(op: Op, reason: impl Into<String>) -> Self {
        BackendError::Unimplemented {
            op,
            reason: reason.into(),
        }
    }

    pub fn invalid_argument(op: Op, message: impl Into<String>) -> Self {
        BackendError::InvalidArgument {
            op,
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        BackendError::Execution {
            message: message.into(),
        }
    }
}

/// Convenience alias for results returned by backend routines.
pub type BackendResult<T> = Result<T, BackendError>;

/// Executes one operator on concrete tensors.
pub trait NumericBackend: Send + Sync {
    /// Human-readable backend identifier.
    fn name(&self) -> &str;

    /// Runs `op` on `inputs`.
    ///
    /// `args` is the operator's full argument list; its node references correspond, in
    /// flattening order, to `inputs`. Multi-result operators return one tensor per result.
    fn execute(
        &self,
        op: Op,
        inputs: &[ConstantTensor],
        args: &[Argument],
    ) -> BackendResult<Vec<ConstantTensor>>;
}

/// Positional view over an operator's arguments with node references resolved to inputs.
pub struct OpArgs<'a> {
    op: Op,
    inputs: &'a [ConstantTensor],
    args: &'a [Argument],
}

impl<'a> OpArgs<'a> {
    pub fn new(op: Op, inputs: &'a [ConstantTensor], args: &'a [Argument]) -> Self {
        Self { op, inputs, args }
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    fn get(&self, index: usize) -> BackendResult<&'a Argument> {
        self.args.get(index).ok_or_else(|| {
            BackendError::invalid_argument(self.op, format!("missing argument #{index}"))
        })
    }

    fn input_offset(&self, index: usize) -> usize {
        self.args[..index.min(self.args.len())]
            .iter()
            .map(Argument::node_count)
            .sum()
    }

    fn mismatch(&self, index: usize, expected: &str) -> BackendError {
        BackendError::invalid_argument(
            self.op,
            format!("argument #{index} should be {expected}, got {:?}", self.args.get(index)),
        )
    }

    /// Tensor bound to the node reference at `index`.
    pub fn tensor(&self, index: usize) -> BackendResult<&'a ConstantTensor> {
        match self.get(index)? {
            Argument::Node(_) => self
                .inputs
                .get(self.input_offset(index))
                .ok_or_else(|| self.mismatch(index, "a bound input tensor")),
            _ => Err(self.mismatch(index, "a node")),
        }
    }

    /// Tensor bound to an optional node reference.
    pub fn optional_tensor(&self, index: usize) -> BackendResult<Option<&'a ConstantTensor>> {
        match self.args.get(index) {
            None | Some(Argument::None) => Ok(None),
            Some(_) => self.tensor(index).map(Some),
        }
    }

    /// Tensors bound to a variadic node list at `index`.
    pub fn tensors(&self, index: usize) -> BackendResult<&'a [ConstantTensor]> {
        match self.get(index)? {
            Argument::Nodes(ids) => {
                let start = self.input_offset(index);
                self.inputs
                    .get(start..start + ids.len())
                    .ok_or_else(|| self.mismatch(index, "bound input tensors"))
            }
            _ => Err(self.mismatch(index, "a node list")),
        }
    }

    pub fn int(&self, index: usize) -> BackendResult<i64> {
        self.get(index)?
            .as_int()
            .ok_or_else(|| self.mismatch(index, "an integer"))
    }

    pub fn float(&self, index: usize) -> BackendResult<f64> {
        self.get(index)?
            .as_float()
            .ok_or_else(|| self.mismatch(index, "a float"))
    }

    pub fn boolean(&self, index: usize) -> BackendResult<bool> {
        self.get(index)?
            .as_bool()
            .ok_or_else(|| self.mismatch(index, "a bool"))
    }

    pub fn string(&self, index: usize) -> BackendResult<&'a str> {
        self.get(index)?
            .as_str()
            .ok_or_else(|| self.mismatch(index, "a string"))
    }

    pub fn ints(&self, index: usize) -> BackendResult<&'a [i64]> {
        self.get(index)?
            .as_ints()
            .ok_or_else(|| self.mismatch(index, "an integer list"))
    }

    pub fn optional_string(&self, index: usize) -> BackendResult<Option<&'a str>> {
        match self.args.get(index) {
            None | Some(Argument::None) => Ok(None),
            Some(_) => self.string(index).map(Some),
        }
    }

    pub fn optional_int(&self, index: usize) -> BackendResult<Option<i64>> {
        match self.args.get(index) {
            None | Some(Argument::None) => Ok(None),
            Some(_) => self.int(index).map(Some),
        }
    }
}
