//! Algebraic identity contraction: per-operator rules that rewrite an operation into a
//! strictly cheaper equivalent once descriptors or constants prove it redundant.

use crate::backend::NumericBackend;
use crate::driver::{apply_rewrites_greedily, GreedyConfig, NodeRewrite, RewriteSet};
use crate::ir::{Argument, ConstantTensor, DType, Dim, Graph, NodeId, Op};
use crate::optimizer::{GraphPass, OptimizeContext, PassResult};

use super::util::{constant_before, forward, is_float, replace_with_op, scalar_constant, Evaluator};

fn normalize_axis(axis: i64, rank: usize) -> Option<usize> {
    let rank = rank as i64;
    let axis = if axis < 0 { axis + rank } else { axis };
    (0..rank).contains(&axis).then_some(axis as usize)
}

fn operand(graph: &Graph, node: NodeId, index: usize) -> Option<NodeId> {
    graph.operand(node, index)
}

/// Single-input concatenation.
pub struct EliminateSingleConcat;

impl NodeRewrite for EliminateSingleConcat {
    fn name(&self) -> &'static str {
        "eliminate-single-concat"
    }

    fn root_ops(&self) -> &'static [Op] {
        &[Op::Concat]
    }

    fn match_and_rewrite(&self, graph: &mut Graph, node: NodeId, _: &dyn NumericBackend) -> bool {
        let Some(&[input]) = graph.arg(node, 0).and_then(Argument::as_nodes) else {
            return false;
        };
        forward(graph, node, input)
    }
}

/// `concat(x, x, ..., x)` becomes a tile along the concatenation axis.
pub struct RepeatedConcatToTile;

impl NodeRewrite for RepeatedConcatToTile {
    fn name(&self) -> &'static str {
        "repeated-concat-to-tile"
    }

    fn root_ops(&self) -> &'static [Op] {
        &[Op::Concat]
    }

    fn match_and_rewrite(&self, graph: &mut Graph, node: NodeId, _: &dyn NumericBackend) -> bool {
        let Some(inputs) = graph.arg(node, 0).and_then(Argument::as_nodes) else {
            return false;
        };
        if inputs.len() < 2 || inputs.iter().any(|i| *i != inputs[0]) {
            return false;
        }
        let (input, count) = (inputs[0], inputs.len());
        let Some(rank) = graph.descriptor(input).rank() else {
            return false;
        };
        let Some(axis) = graph
            .arg(node, 1)
            .and_then(Argument::as_int)
            .and_then(|a| normalize_axis(a, rank))
        else {
            return false;
        };
        let mut repeats = vec![1i64; rank];
        repeats[axis] = count as i64;
        let repeats = constant_before(graph, node, "tile_repeats", ConstantTensor::from_i64(vec![rank], repeats));
        replace_with_op(graph, node, Op::Tile, vec![Argument::Node(input), Argument::Node(repeats)]);
        true
    }
}

/// Transpose whose permutation keeps every axis in place, also when indices are written
/// with a rank offset (`i + rank` or `i - rank`).
pub struct EliminateIdentityTranspose;

impl NodeRewrite for EliminateIdentityTranspose {
    fn name(&self) -> &'static str {
        "eliminate-identity-transpose"
    }

    fn root_ops(&self) -> &'static [Op] {
        &[Op::Transpose]
    }

    fn match_and_rewrite(&self, graph: &mut Graph, node: NodeId, _: &dyn NumericBackend) -> bool {
        let (Some(input), Some(perm)) = (operand(graph, node, 0), graph.arg(node, 1).and_then(Argument::as_ints)) else {
            return false;
        };
        let rank = perm.len() as i64;
        let identity = perm
            .iter()
            .enumerate()
            .all(|(i, p)| rank > 0 && p.rem_euclid(rank) == i as i64);
        if !identity {
            return false;
        }
        forward(graph, node, input)
    }
}

/// Reshape whose result has exactly the input's dimensions.
pub struct EliminateIdentityReshape;

impl NodeRewrite for EliminateIdentityReshape {
    fn name(&self) -> &'static str {
        "eliminate-identity-reshape"
    }

    fn root_ops(&self) -> &'static [Op] {
        &[Op::Reshape]
    }

    fn match_and_rewrite(&self, graph: &mut Graph, node: NodeId, _: &dyn NumericBackend) -> bool {
        let Some(input) = operand(graph, node, 0) else {
            return false;
        };
        let (Some(before), Some(after)) = (
            graph.descriptor(input).shape.dims(),
            graph.descriptor(node).shape.dims(),
        ) else {
            return false;
        };
        let unchanged = before.len() == after.len() && before.iter().zip(after).all(|(a, b)| a.same_as(*b));
        if !unchanged {
            return false;
        }
        forward(graph, node, input)
    }
}

/// Expand that keeps the element count: identity for equal shapes, a reshape across ranks.
pub struct SimplifyExpand;

impl NodeRewrite for SimplifyExpand {
    fn name(&self) -> &'static str {
        "simplify-expand"
    }

    fn root_ops(&self) -> &'static [Op] {
        &[Op::Expand]
    }

    fn match_and_rewrite(&self, graph: &mut Graph, node: NodeId, _: &dyn NumericBackend) -> bool {
        let Some(input) = operand(graph, node, 0) else {
            return false;
        };
        let (Some(before), Some(after)) = (
            graph.descriptor(input).static_shape(),
            graph.descriptor(node).static_shape(),
        ) else {
            return false;
        };
        if before.iter().product::<usize>() != after.iter().product::<usize>() {
            return false;
        }
        if before == after {
            return forward(graph, node, input);
        }
        if before.len() == after.len() {
            return false;
        }
        let dims: Vec<i64> = after.iter().map(|d| *d as i64).collect();
        let shape = constant_before(graph, node, "reshape_shape", ConstantTensor::from_i64(vec![dims.len()], dims));
        replace_with_op(
            graph,
            node,
            Op::Reshape,
            vec![Argument::Node(input), Argument::Node(shape), Argument::Bool(true)],
        );
        true
    }
}

/// `scalar_mad(x, 1, 0)`.
pub struct EliminateUnitScalarMad;

impl NodeRewrite for EliminateUnitScalarMad {
    fn name(&self) -> &'static str {
        "eliminate-unit-scalar-mad"
    }

    fn root_ops(&self) -> &'static [Op] {
        &[Op::ScalarMad]
    }

    fn match_and_rewrite(&self, graph: &mut Graph, node: NodeId, _: &dyn NumericBackend) -> bool {
        let Some(input) = operand(graph, node, 0) else {
            return false;
        };
        let scale = graph.arg(node, 1).and_then(Argument::as_float);
        let bias = graph.arg(node, 2).and_then(Argument::as_float);
        if scale != Some(1.0) || bias != Some(0.0) {
            return false;
        }
        forward(graph, node, input)
    }
}

/// Tile with every repeat equal to one.
pub struct EliminateUnitTile;

impl NodeRewrite for EliminateUnitTile {
    fn name(&self) -> &'static str {
        "eliminate-unit-tile"
    }

    fn root_ops(&self) -> &'static [Op] {
        &[Op::Tile]
    }

    fn match_and_rewrite(&self, graph: &mut Graph, node: NodeId, _: &dyn NumericBackend) -> bool {
        let (Some(input), Some(repeats)) = (operand(graph, node, 0), operand(graph, node, 1)) else {
            return false;
        };
        match graph.descriptor(repeats).known_ints() {
            Some(values) if values.iter().all(|r| *r == 1) => forward(graph, node, input),
            _ => false,
        }
    }
}

/// Reductions over axes that already have extent one.
///
/// Only reductions that hand a lone element back unchanged qualify; the norm, square and
/// log families transform even a single value.
pub struct ContractUnitReduction;

impl NodeRewrite for ContractUnitReduction {
    fn name(&self) -> &'static str {
        "contract-unit-reduction"
    }

    fn root_ops(&self) -> &'static [Op] {
        &[Op::ReduceSum, Op::ReduceMean, Op::ReduceMax, Op::ReduceMin, Op::ReduceProd]
    }

    fn match_and_rewrite(&self, graph: &mut Graph, node: NodeId, _: &dyn NumericBackend) -> bool {
        let Some(op) = graph.op(node) else {
            return false;
        };
        if !op.reduction_passes_values_through() {
            return false;
        }
        let Some(input) = operand(graph, node, 0) else {
            return false;
        };
        let Some(dims) = graph.descriptor(input).shape.dims().map(<[Dim]>::to_vec) else {
            return false;
        };
        let Some(axes) = graph.arg(node, 1).and_then(Argument::as_ints) else {
            return false;
        };
        if axes.is_empty() {
            return false;
        }
        let Some(axes) = axes
            .iter()
            .map(|a| normalize_axis(*a, dims.len()))
            .collect::<Option<Vec<_>>>()
        else {
            return false;
        };
        if axes.iter().any(|a| dims[*a] != Dim::Static(1)) {
            return false;
        }
        let keepdims = graph.arg(node, 2).and_then(Argument::as_bool).unwrap_or(true);
        if keepdims {
            return forward(graph, node, input);
        }
        let axes = axes.into_iter().map(|a| a as i64).collect();
        replace_with_op(graph, node, Op::Squeeze, vec![Argument::Node(input), Argument::Ints(axes)]);
        true
    }
}

/// Cast to the type the value already has.
pub struct EliminateRedundantCast;

impl NodeRewrite for EliminateRedundantCast {
    fn name(&self) -> &'static str {
        "eliminate-redundant-cast"
    }

    fn root_ops(&self) -> &'static [Op] {
        &[Op::Cast]
    }

    fn match_and_rewrite(&self, graph: &mut Graph, node: NodeId, _: &dyn NumericBackend) -> bool {
        let Some(input) = operand(graph, node, 0) else {
            return false;
        };
        let target = graph.arg(node, 1).and_then(Argument::as_str).and_then(DType::parse);
        match (graph.descriptor(input).dtype, target) {
            (Some(have), Some(want)) if have == want => forward(graph, node, input),
            _ => false,
        }
    }
}

/// CastLike resolved against the reference operand's known type.
pub struct ResolveCastLike;

impl NodeRewrite for ResolveCastLike {
    fn name(&self) -> &'static str {
        "resolve-cast-like"
    }

    fn root_ops(&self) -> &'static [Op] {
        &[Op::CastLike]
    }

    fn match_and_rewrite(&self, graph: &mut Graph, node: NodeId, _: &dyn NumericBackend) -> bool {
        let (Some(input), Some(like)) = (operand(graph, node, 0), operand(graph, node, 1)) else {
            return false;
        };
        match (graph.descriptor(input).dtype, graph.descriptor(like).dtype) {
            (Some(have), Some(want)) if have == want => forward(graph, node, input),
            (_, Some(want)) => {
                replace_with_op(graph, node, Op::Cast, vec![Argument::Node(input), Argument::str(want.name())]);
                true
            }
            _ => false,
        }
    }
}

/// Gather of one constant index becomes a select (scalar index) or a length-one narrow.
pub struct GatherToSlice;

impl NodeRewrite for GatherToSlice {
    fn name(&self) -> &'static str {
        "gather-to-slice"
    }

    fn root_ops(&self) -> &'static [Op] {
        &[Op::Gather]
    }

    fn match_and_rewrite(&self, graph: &mut Graph, node: NodeId, _: &dyn NumericBackend) -> bool {
        let (Some(input), Some(indices)) = (operand(graph, node, 0), operand(graph, node, 1)) else {
            return false;
        };
        let Some(index_value) = graph.constant_value(indices) else {
            return false;
        };
        let index_rank = index_value.rank();
        let Some(index) = index_value
            .to_i64_vec()
            .filter(|v| v.len() == 1)
            .map(|v| v[0])
        else {
            return false;
        };
        if index_rank > 1 {
            return false;
        }
        let Some(rank) = graph.descriptor(input).rank() else {
            return false;
        };
        let Some(axis) = graph
            .arg(node, 2)
            .and_then(Argument::as_int)
            .and_then(|a| normalize_axis(a, rank))
        else {
            return false;
        };
        let index = if index < 0 {
            match graph.descriptor(input).shape.dim(axis) {
                Dim::Static(extent) => index + extent as i64,
                _ => return false,
            }
        } else {
            index
        };
        if index < 0 {
            return false;
        }
        let axis = axis as i64;
        let (op, args) = if index_rank == 0 {
            (
                Op::Select,
                vec![Argument::Node(input), Argument::Int(axis), Argument::Int(index)],
            )
        } else {
            (
                Op::Narrow,
                vec![
                    Argument::Node(input),
                    Argument::Int(axis),
                    Argument::Int(index),
                    Argument::Int(1),
                ],
            )
        };
        replace_with_op(graph, node, op, args);
        true
    }
}

/// Pow with a static scalar exponent of -1, -0.5, 0.5, 1 or 2.
pub struct StrengthReducePow;

impl NodeRewrite for StrengthReducePow {
    fn name(&self) -> &'static str {
        "strength-reduce-pow"
    }

    fn root_ops(&self) -> &'static [Op] {
        &[Op::Pow]
    }

    fn match_and_rewrite(&self, graph: &mut Graph, node: NodeId, _: &dyn NumericBackend) -> bool {
        let (Some(base), Some(exponent)) = (operand(graph, node, 0), operand(graph, node, 1)) else {
            return false;
        };
        let Some(value) = graph.constant_value(exponent) else {
            return false;
        };
        let Some(rank) = graph.descriptor(base).rank() else {
            return false;
        };
        if value.len() != 1 || value.rank() > rank {
            return false;
        }
        let Some(e) = value.scalar_value() else {
            return false;
        };
        let replacement = if value.dtype().is_float() {
            match e {
                e if e == -1.0 => Some(Op::Reciprocal),
                e if e == -0.5 => Some(Op::Rsqrt),
                e if e == 0.5 => Some(Op::Sqrt),
                e if e == 1.0 => None,
                e if e == 2.0 => Some(Op::Square),
                _ => return false,
            }
        } else {
            match e as i64 {
                -1 => Some(Op::Reciprocal),
                1 => None,
                2 => Some(Op::Square),
                _ => return false,
            }
        };
        match replacement {
            None => forward(graph, node, base),
            Some(op) => {
                replace_with_op(graph, node, op, vec![Argument::Node(base)]);
                true
            }
        }
    }
}

/// Add, sub, mul or div against a single-element constant becomes one scalar multiply-add.
pub struct BinaryToScalarMad;

impl NodeRewrite for BinaryToScalarMad {
    fn name(&self) -> &'static str {
        "binary-to-scalar-mad"
    }

    fn root_ops(&self) -> &'static [Op] {
        &[Op::Add, Op::Sub, Op::Mul, Op::Div]
    }

    fn match_and_rewrite(&self, graph: &mut Graph, node: NodeId, _: &dyn NumericBackend) -> bool {
        let (Some(op), Some(lhs), Some(rhs)) = (graph.op(node), operand(graph, node, 0), operand(graph, node, 1)) else {
            return false;
        };
        let (lhs_const, rhs_const) = (graph.is_constant(lhs), graph.is_constant(rhs));
        if lhs_const == rhs_const {
            return false;
        }
        let (input, constant, constant_on_left) = if rhs_const { (lhs, rhs, false) } else { (rhs, lhs, true) };
        if !is_float(graph, input) {
            return false;
        }
        let Some(rank) = graph.descriptor(input).rank() else {
            return false;
        };
        let Some(c) = scalar_constant(graph, constant, rank) else {
            return false;
        };
        let (scale, bias) = match (op, constant_on_left) {
            (Op::Add, _) => (1.0, c),
            (Op::Sub, false) => (1.0, -c),
            (Op::Sub, true) => (-1.0, c),
            (Op::Mul, _) => (c, 0.0),
            (Op::Div, false) if c != 0.0 => (1.0 / c, 0.0),
            _ => return false,
        };
        replace_with_op(
            graph,
            node,
            Op::ScalarMad,
            vec![Argument::Node(input), Argument::Float(scale), Argument::Float(bias)],
        );
        true
    }
}

/// Batch normalization with constant statistics becomes one per-channel scale and bias.
pub struct BatchNormToScaleBias;

impl NodeRewrite for BatchNormToScaleBias {
    fn name(&self) -> &'static str {
        "batch-norm-to-scale-bias"
    }

    fn root_ops(&self) -> &'static [Op] {
        &[Op::BatchNormalization]
    }

    fn match_and_rewrite(&self, graph: &mut Graph, node: NodeId, backend: &dyn NumericBackend) -> bool {
        let Some(input) = operand(graph, node, 0) else {
            return false;
        };
        let params: Option<Vec<ConstantTensor>> = (1..=4)
            .map(|i| operand(graph, node, i).and_then(|p| graph.constant_value(p)).cloned())
            .collect();
        let Some(params) = params else {
            return false;
        };
        let Some(epsilon) = graph.arg(node, 5).and_then(Argument::as_float) else {
            return false;
        };
        let [gamma, beta, mean, var] = params.as_slice() else {
            return false;
        };
        let eval = Evaluator::new(backend);
        let combined = (|| {
            let var_eps = eval.scalar_mad(var, 1.0, epsilon)?;
            let std = eval.unary(Op::Sqrt, &var_eps)?;
            let scale = eval.binary(Op::Div, gamma, &std)?;
            let shifted = eval.binary(Op::Mul, mean, &scale)?;
            let bias = eval.binary(Op::Sub, beta, &shifted)?;
            Some((scale, bias))
        })();
        let Some((scale, bias)) = combined else {
            return false;
        };
        let scale = constant_before(graph, node, "bn_scale", scale);
        let bias = constant_before(graph, node, "bn_bias", bias);
        replace_with_op(
            graph,
            node,
            Op::ScaleBias,
            vec![Argument::Node(input), Argument::Node(scale), Argument::Node(bias)],
        );
        true
    }
}

/// Every contraction rule, in the order the driver tries them.
pub fn contraction_rules() -> RewriteSet {
    RewriteSet::new(vec![
        Box::new(EliminateSingleConcat),
        Box::new(RepeatedConcatToTile),
        Box::new(EliminateIdentityTranspose),
        Box::new(EliminateIdentityReshape),
        Box::new(SimplifyExpand),
        Box::new(EliminateUnitScalarMad),
        Box::new(EliminateUnitTile),
        Box::new(ContractUnitReduction),
        Box::new(EliminateRedundantCast),
        Box::new(ResolveCastLike),
        Box::new(GatherToSlice),
        Box::new(StrengthReducePow),
        Box::new(BinaryToScalarMad),
        Box::new(BatchNormToScaleBias),
    ])
}

#[derive(Default)]
pub struct ContractionPass;

impl ContractionPass {
    const NAME: &'static str = "contraction";
}

impl GraphPass for ContractionPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut Graph, cx: &mut OptimizeContext) -> PassResult {
        let rules = contraction_rules();
        let cfg = GreedyConfig {
            max_iterations: cx.config().rewrite_max_iters,
            enable_dce: true,
        };
        let stats = apply_rewrites_greedily(graph, &rules, cx.backend(), &cfg);
        PassResult {
            changed: stats.applied > 0 || stats.dce_removed > 0,
            iterations: stats.iterations,
            rewrites_applied: stats.applied,
            erased_nodes: stats.dce_removed,
        }
    }
}
