use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! define_ops {
    ($($variant:ident => $name:literal,)*) => {
        /// Operator mnemonics understood by the IR.
        ///
        /// Operator parameters are not stored here; they travel as literal [`Argument`]s in
        /// the owning node's argument list, laid out per operator:
        ///
        /// | op | arguments |
        /// |----|-----------|
        /// | unary elementwise | `[x]` |
        /// | binary elementwise | `[a, b]` |
        /// | `ScalarMad` | `[x, Float scale, Float bias]` |
        /// | `ScaleBias` | `[x, scale, bias]` (per channel on axis 1) |
        /// | `Clip` | `[x, Float min, Float max]` |
        /// | `Softmax` | `[x, Int axis]` |
        /// | `Dense` | `[x, weight (K x N), bias or None, Str activation]` |
        /// | `MatMul` | `[a, b]` |
        /// | `Conv` | `[x, weight (OIHW), bias or None, Ints strides, Ints pads, Ints dilations, Int group, Str activation]` |
        /// | `MaxPool`, `AveragePool` | `[x, Ints kernel, Ints strides, Ints pads]` |
        /// | `Transpose` | `[x, Ints perm]` |
        /// | `Reshape` | `[x, shape, Bool allow_zero]` |
        /// | `Expand`, `Tile` | `[x, shape or repeats]` |
        /// | `Concat` | `[Nodes inputs, Int axis]` |
        /// | `Squeeze`, `Unsqueeze` | `[x, Ints axes]` |
        /// | `Split` | `[x, Int axis, Ints sizes]` |
        /// | `Extract` | `[tuple, Int index]` |
        /// | `Gather` | `[x, indices, Int axis]` |
        /// | `Select` | `[x, Int axis, Int index]` |
        /// | `Narrow` | `[x, Int axis, Int start, Int length]` |
        /// | `Shape` | `[x]` |
        /// | `Cast` | `[x, Str dtype]` |
        /// | `CastLike` | `[x, like]` |
        /// | reductions | `[x, Ints axes, Bool keepdims]` |
        /// | `BatchNormalization` | `[x, gamma, beta, mean, var, Float epsilon]` |
        /// | `RandomUniform` | `[Ints shape, Float low, Float high, Int seed or None]` |
        /// | `RandomNormal` | `[Ints shape, Float mean, Float std, Int seed or None]` |
        ///
        /// [`Argument`]: crate::ir::Argument
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum Op {
            $($variant,)*
        }

        impl Op {
            pub const ALL: &'static [Op] = &[$(Op::$variant,)*];

            pub fn name(self) -> &'static str {
                match self {
                    $(Op::$variant => $name,)*
                }
            }

            pub fn from_name(name: &str) -> Option<Op> {
                match name {
                    $($name => Some(Op::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

define_ops! {
    Identity => "identity",
    Relu => "relu",
    Sigmoid => "sigmoid",
    Tanh => "tanh",
    Exp => "exp",
    Log => "log",
    Sqrt => "sqrt",
    Rsqrt => "rsqrt",
    Reciprocal => "reciprocal",
    Square => "square",
    Neg => "neg",
    Abs => "abs",
    Swish => "swish",
    Not => "not",
    Add => "add",
    Sub => "sub",
    Mul => "mul",
    Div => "div",
    Pow => "pow",
    Max => "max",
    Min => "min",
    Equal => "equal",
    NotEqual => "not_equal",
    Less => "less",
    Greater => "greater",
    And => "and",
    Or => "or",
    ScalarMad => "scalar_mad",
    ScaleBias => "scale_bias",
    Clip => "clip",
    Softmax => "softmax",
    Dense => "dense",
    MatMul => "matmul",
    Conv => "conv",
    MaxPool => "max_pool",
    AveragePool => "average_pool",
    Transpose => "transpose",
    Reshape => "reshape",
    Expand => "expand",
    Tile => "tile",
    Concat => "concat",
    Squeeze => "squeeze",
    Unsqueeze => "unsqueeze",
    Split => "split",
    Extract => "extract",
    Gather => "gather",
    Select => "select",
    Narrow => "narrow",
    Shape => "shape",
    Cast => "cast",
    CastLike => "cast_like",
    ReduceSum => "reduce_sum",
    ReduceMean => "reduce_mean",
    ReduceMax => "reduce_max",
    ReduceMin => "reduce_min",
    ReduceProd => "reduce_prod",
    ReduceL1 => "reduce_l1",
    ReduceL2 => "reduce_l2",
    ReduceSumSquare => "reduce_sum_square",
    ReduceLogSum => "reduce_log_sum",
    ReduceLogSumExp => "reduce_log_sum_exp",
    BatchNormalization => "batch_normalization",
    RandomUniform => "random_uniform",
    RandomNormal => "random_normal",
}

impl Op {
    pub fn is_unary_elementwise(self) -> bool {
        matches!(
            self,
            Op::Identity
                | Op::Relu
                | Op::Sigmoid
                | Op::Tanh
                | Op::Exp
                | Op::Log
                | Op::Sqrt
                | Op::Rsqrt
                | Op::Reciprocal
                | Op::Square
                | Op::Neg
                | Op::Abs
                | Op::Swish
                | Op::Not
        )
    }

    pub fn is_binary_elementwise(self) -> bool {
        matches!(
            self,
            Op::Add
                | Op::Sub
                | Op::Mul
                | Op::Div
                | Op::Pow
                | Op::Max
                | Op::Min
                | Op::Equal
                | Op::NotEqual
                | Op::Less
                | Op::Greater
                | Op::And
                | Op::Or
        )
    }

    /// Binary operators whose operands may be swapped freely.
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            Op::Add | Op::Mul | Op::Max | Op::Min | Op::Equal | Op::NotEqual | Op::And | Op::Or
        )
    }

    /// Binary operators producing a boolean result.
    pub fn is_predicate(self) -> bool {
        matches!(
            self,
            Op::Equal | Op::NotEqual | Op::Less | Op::Greater | Op::And | Op::Or | Op::Not
        )
    }

    pub fn is_reduction(self) -> bool {
        matches!(
            self,
            Op::ReduceSum
                | Op::ReduceMean
                | Op::ReduceMax
                | Op::ReduceMin
                | Op::ReduceProd
                | Op::ReduceL1
                | Op::ReduceL2
                | Op::ReduceSumSquare
                | Op::ReduceLogSum
                | Op::ReduceLogSumExp
        )
    }

    /// Reductions that return one of the reduced values unchanged when the reduced extent is 1.
    pub fn reduction_passes_values_through(self) -> bool {
        matches!(
            self,
            Op::ReduceSum | Op::ReduceMean | Op::ReduceMax | Op::ReduceMin | Op::ReduceProd
        )
    }

    pub fn is_random(self) -> bool {
        matches!(self, Op::RandomUniform | Op::RandomNormal)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
