//! Linear-operator fusion.
//!
//! Elementwise affine maps (`scalar_mad`, `scale_bias`, and add/sub/mul/div against one
//! constant) are all read as `y = scale * x + bias` with scalar or broadcast tensor
//! coefficients. Two chained maps compose to one, and an affine map next to a dense or
//! convolution layer folds into that layer's weight and bias. New constants are computed
//! eagerly through the numeric backend.

use std::collections::VecDeque;

use crate::backend::NumericBackend;
use crate::ir::{Argument, ConstantTensor, DType, Dim, Graph, InsertPoint, NodeId, NodeKind, Op};
use crate::optimizer::{GraphPass, OptimizeContext, PassResult};

use super::util::{constant_before, is_float, Evaluator};

#[derive(Debug, Clone)]
enum Coef {
    Scalar(f64),
    /// Broadcasts against the operand without changing its shape.
    Tensor(ConstantTensor),
}

impl Coef {
    fn is_scalar(&self, value: f64) -> bool {
        matches!(self, Coef::Scalar(v) if *v == value)
    }
}

#[derive(Debug, Clone)]
struct Affine {
    input: NodeId,
    scale: Coef,
    bias: Coef,
}

#[derive(Debug, Clone)]
struct Layer {
    input: NodeId,
    weight: ConstantTensor,
    bias: Option<ConstantTensor>,
}

#[derive(Debug, Clone)]
enum Linear {
    Affine(Affine),
    Dense(Layer),
    Conv(Layer),
}

impl Linear {
    fn input(&self) -> NodeId {
        match self {
            Linear::Affine(a) => a.input,
            Linear::Dense(l) | Linear::Conv(l) => l.input,
        }
    }
}

fn is_linear_op(op: Op) -> bool {
    matches!(
        op,
        Op::ScalarMad | Op::ScaleBias | Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Dense | Op::Conv
    )
}

struct Fuser<'a> {
    eval: Evaluator<'a>,
}

impl<'a> Fuser<'a> {
    fn new(backend: &'a dyn NumericBackend) -> Self {
        Self {
            eval: Evaluator::new(backend),
        }
    }

    /// Constant operand usable as an elementwise coefficient of `input`.
    fn coefficient(&self, graph: &Graph, input: NodeId, constant: NodeId) -> Option<Coef> {
        let value = graph.constant_value(constant)?;
        let descriptor = graph.descriptor(input);
        let rank = descriptor.rank()?;
        if descriptor.dtype != Some(value.dtype()) || value.rank() > rank {
            return None;
        }
        if value.len() == 1 {
            return value.scalar_value().map(Coef::Scalar);
        }
        let dims = descriptor.shape.dims()?;
        let offset = rank - value.rank();
        let fits = value
            .shape()
            .iter()
            .enumerate()
            .all(|(i, extent)| *extent == 1 || dims[offset + i] == Dim::Static(*extent));
        fits.then(|| Coef::Tensor(value.clone()))
    }

    fn classify(&self, graph: &Graph, node: NodeId) -> Option<Linear> {
        let NodeKind::Operation { op, args } = graph.kind(node) else {
            return None;
        };
        let node_at = |i: usize| args.get(i).and_then(Argument::as_node);
        match op {
            Op::ScalarMad => {
                let input = node_at(0)?;
                is_float(graph, input).then_some(())?;
                Some(Linear::Affine(Affine {
                    input,
                    scale: Coef::Scalar(args.get(1)?.as_float()?),
                    bias: Coef::Scalar(args.get(2)?.as_float()?),
                }))
            }
            Op::Add | Op::Sub | Op::Mul | Op::Div => {
                let (lhs, rhs) = (node_at(0)?, node_at(1)?);
                let (input, constant, constant_first) = match (graph.is_constant(lhs), graph.is_constant(rhs)) {
                    (false, true) => (lhs, rhs, false),
                    (true, false) => (rhs, lhs, true),
                    _ => return None,
                };
                if !is_float(graph, input) {
                    return None;
                }
                let c = self.coefficient(graph, input, constant)?;
                let (scale, bias) = match (op, constant_first) {
                    (Op::Add, _) => (Coef::Scalar(1.0), c),
                    (Op::Sub, false) => (Coef::Scalar(1.0), self.mul(&Coef::Scalar(-1.0), &c)?),
                    (Op::Sub, true) => (Coef::Scalar(-1.0), c),
                    (Op::Mul, _) => (c, Coef::Scalar(0.0)),
                    (Op::Div, false) => (self.reciprocal(&c)?, Coef::Scalar(0.0)),
                    _ => return None,
                };
                Some(Linear::Affine(Affine { input, scale, bias }))
            }
            Op::ScaleBias => {
                let input = node_at(0)?;
                let rank = graph.descriptor(input).rank()?;
                if rank < 2 || !is_float(graph, input) {
                    return None;
                }
                let channel = |i: usize| -> Option<Coef> {
                    let value = graph.constant_value(node_at(i)?)?;
                    if value.rank() != 1 || graph.descriptor(input).dtype != Some(value.dtype()) {
                        return None;
                    }
                    let mut shape = vec![1; rank];
                    shape[1] = value.len();
                    Some(Coef::Tensor(value.reshaped(shape)))
                };
                Some(Linear::Affine(Affine {
                    input,
                    scale: channel(1)?,
                    bias: channel(2)?,
                }))
            }
            Op::Dense | Op::Conv => {
                let input = node_at(0)?;
                let weight = graph.constant_value(node_at(1)?)?.clone();
                if !weight.dtype().is_float() || graph.descriptor(input).dtype != Some(weight.dtype()) {
                    return None;
                }
                let bias = match args.get(2)? {
                    Argument::None => None,
                    Argument::Node(b) => Some(graph.constant_value(*b)?.clone()),
                    _ => return None,
                };
                let layer = Layer { input, weight, bias };
                Some(if *op == Op::Dense {
                    Linear::Dense(layer)
                } else {
                    Linear::Conv(layer)
                })
            }
            _ => None,
        }
    }

    fn mul(&self, a: &Coef, b: &Coef) -> Option<Coef> {
        Some(match (a, b) {
            (Coef::Scalar(x), Coef::Scalar(y)) => Coef::Scalar(x * y),
            (Coef::Scalar(s), Coef::Tensor(t)) | (Coef::Tensor(t), Coef::Scalar(s)) => {
                Coef::Tensor(self.eval.scalar_mad(t, *s, 0.0)?)
            }
            (Coef::Tensor(x), Coef::Tensor(y)) => Coef::Tensor(self.eval.binary(Op::Mul, x, y)?),
        })
    }

    fn add(&self, a: &Coef, b: &Coef) -> Option<Coef> {
        Some(match (a, b) {
            (Coef::Scalar(x), Coef::Scalar(y)) => Coef::Scalar(x + y),
            (Coef::Scalar(s), Coef::Tensor(t)) | (Coef::Tensor(t), Coef::Scalar(s)) => {
                Coef::Tensor(self.eval.scalar_mad(t, 1.0, *s)?)
            }
            (Coef::Tensor(x), Coef::Tensor(y)) => Coef::Tensor(self.eval.binary(Op::Add, x, y)?),
        })
    }

    fn reciprocal(&self, c: &Coef) -> Option<Coef> {
        match c {
            Coef::Scalar(v) if *v != 0.0 => Some(Coef::Scalar(1.0 / v)),
            Coef::Scalar(_) => None,
            Coef::Tensor(t) => {
                if t.to_f64_vec().iter().any(|v| *v == 0.0) {
                    return None;
                }
                Some(Coef::Tensor(self.eval.unary(Op::Reciprocal, t)?))
            }
        }
    }

    /// `outer(inner(x))` for two elementwise maps.
    fn compose(&self, inner: &Affine, outer: &Affine) -> Option<(Coef, Coef)> {
        let scale = self.mul(&outer.scale, &inner.scale)?;
        let scaled_bias = self.mul(&outer.scale, &inner.bias)?;
        let bias = self.add(&scaled_bias, &outer.bias)?;
        Some((scale, bias))
    }

    /// Reads `coef` as a vector of `extent` values along `axis` of a rank-`rank` operand.
    fn axis_vector(coef: &Coef, rank: usize, axis: usize, extent: usize) -> Option<Coef> {
        match coef {
            Coef::Scalar(v) => Some(Coef::Scalar(*v)),
            Coef::Tensor(t) => {
                let offset = rank.checked_sub(t.rank())?;
                let along_axis = t.shape().iter().enumerate().all(|(i, d)| {
                    if offset + i == axis {
                        *d == extent
                    } else {
                        *d == 1
                    }
                });
                (along_axis && t.len() == extent).then(|| Coef::Tensor(t.reshaped(vec![extent])))
            }
        }
    }

    fn to_vector(coef: &Coef, dtype: DType, extent: usize) -> ConstantTensor {
        match coef {
            Coef::Scalar(v) => ConstantTensor::full(dtype, vec![extent], *v),
            Coef::Tensor(t) => t.clone(),
        }
    }

    /// Multiplies `weight` by a per-index vector along `axis`.
    fn scale_weight(&self, weight: &ConstantTensor, coef: &Coef, axis: usize) -> Option<ConstantTensor> {
        match coef {
            Coef::Scalar(s) => self.eval.scalar_mad(weight, *s, 0.0),
            Coef::Tensor(v) => {
                let mut shape = vec![1; weight.rank()];
                shape[axis] = v.len();
                self.eval.binary(Op::Mul, weight, &v.reshaped(shape))
            }
        }
    }

    /// `scale * bias + shift` over an optional layer bias, `None` when it stays zero.
    fn shifted_bias(
        &self,
        bias: Option<&ConstantTensor>,
        scale: &Coef,
        shift: &Coef,
        dtype: DType,
        extent: usize,
    ) -> Option<Option<ConstantTensor>> {
        let base = match bias {
            Some(b) => Coef::Tensor(b.clone()),
            None => Coef::Scalar(0.0),
        };
        let combined = self.add(&self.mul(scale, &base)?, shift)?;
        if bias.is_none() && combined.is_scalar(0.0) {
            return Some(None);
        }
        Some(Some(Self::to_vector(&combined, dtype, extent)))
    }

    /// Projects a `[K]` vector through a `K x N` weight.
    fn project(&self, vector: &ConstantTensor, weight: &ConstantTensor) -> Option<ConstantTensor> {
        let n = *weight.shape().get(1)?;
        let row = vector.reshaped(vec![1, vector.len()]);
        Some(self.eval.binary(Op::MatMul, &row, weight)?.reshaped(vec![n]))
    }
}

enum Fused {
    Affine { scale: Coef, bias: Coef },
    Layer { op: Op, weight: ConstantTensor, bias: Option<ConstantTensor> },
}

fn activation(graph: &Graph, node: NodeId, op: Op) -> Option<&str> {
    let index = if op == Op::Dense { 3 } else { 7 };
    graph.arg(node, index).and_then(Argument::as_str)
}

/// Fusion pass over chains of linear operators.
#[derive(Default)]
pub struct LinearFusionPass;

impl LinearFusionPass {
    const NAME: &'static str = "linear-fusion";

    fn plan(
        fuser: &Fuser,
        graph: &Graph,
        producer: NodeId,
        inner: &Linear,
        outer: &Linear,
    ) -> Option<Fused> {
        let dtype = graph.descriptor(inner.input()).dtype?;
        match (inner, outer) {
            (Linear::Affine(p), Linear::Affine(c)) => {
                let (scale, bias) = fuser.compose(p, c)?;
                Some(Fused::Affine { scale, bias })
            }
            (Linear::Conv(p), Linear::Affine(c)) => {
                if activation(graph, producer, Op::Conv) != Some("none") {
                    return None;
                }
                let channels = *p.weight.shape().first()?;
                let rank = graph.descriptor(producer).rank()?;
                let scale = Fuser::axis_vector(&c.scale, rank, 1, channels)?;
                let shift = Fuser::axis_vector(&c.bias, rank, 1, channels)?;
                let weight = fuser.scale_weight(&p.weight, &scale, 0)?;
                let bias = fuser.shifted_bias(p.bias.as_ref(), &scale, &shift, dtype, channels)?;
                Some(Fused::Layer { op: Op::Conv, weight, bias })
            }
            (Linear::Affine(p), Linear::Conv(c)) => {
                let Coef::Scalar(s) = p.scale else {
                    return None;
                };
                if !p.bias.is_scalar(0.0) {
                    return None;
                }
                let weight = fuser.scale_weight(&c.weight, &Coef::Scalar(s), 0)?;
                Some(Fused::Layer {
                    op: Op::Conv,
                    weight,
                    bias: c.bias.clone(),
                })
            }
            (Linear::Dense(p), Linear::Dense(c)) => {
                if activation(graph, producer, Op::Dense) != Some("none") {
                    return None;
                }
                let weight = fuser.eval.binary(Op::MatMul, &p.weight, &c.weight)?;
                let bias = match (&p.bias, &c.bias) {
                    (None, b) => b.clone(),
                    (Some(b1), None) => Some(fuser.project(b1, &c.weight)?),
                    (Some(b1), Some(b2)) => {
                        let projected = fuser.project(b1, &c.weight)?;
                        Some(fuser.eval.binary(Op::Add, &projected, b2)?)
                    }
                };
                Some(Fused::Layer { op: Op::Dense, weight, bias })
            }
            (Linear::Dense(p), Linear::Affine(c)) => {
                if activation(graph, producer, Op::Dense) != Some("none") {
                    return None;
                }
                let n = *p.weight.shape().get(1)?;
                let rank = graph.descriptor(producer).rank()?;
                let scale = Fuser::axis_vector(&c.scale, rank, rank.checked_sub(1)?, n)?;
                let shift = Fuser::axis_vector(&c.bias, rank, rank - 1, n)?;
                let weight = fuser.scale_weight(&p.weight, &scale, 1)?;
                let bias = fuser.shifted_bias(p.bias.as_ref(), &scale, &shift, dtype, n)?;
                Some(Fused::Layer { op: Op::Dense, weight, bias })
            }
            (Linear::Affine(p), Linear::Dense(c)) => {
                let k = *c.weight.shape().first()?;
                let rank = graph.descriptor(producer).rank()?;
                let scale = Fuser::axis_vector(&p.scale, rank, rank.checked_sub(1)?, k)?;
                let shift = Fuser::axis_vector(&p.bias, rank, rank - 1, k)?;
                let weight = fuser.scale_weight(&c.weight, &scale, 0)?;
                let bias = if shift.is_scalar(0.0) {
                    c.bias.clone()
                } else {
                    let projected = fuser.project(&Fuser::to_vector(&shift, dtype, k), &c.weight)?;
                    match &c.bias {
                        Some(b) => Some(fuser.eval.binary(Op::Add, &projected, b)?),
                        None => Some(projected),
                    }
                };
                Some(Fused::Layer { op: Op::Dense, weight, bias })
            }
            _ => None,
        }
    }

    /// Emits the cheapest single operation equivalent to `scale * x + bias`.
    fn emit_affine(graph: &mut Graph, anchor: NodeId, input: NodeId, scale: Coef, bias: Coef) -> Option<NodeId> {
        let x = Argument::Node(input);
        let (op, args) = match (&scale, &bias) {
            (Coef::Scalar(s), Coef::Scalar(b)) => (Op::ScalarMad, vec![x, Argument::Float(*s), Argument::Float(*b)]),
            (Coef::Scalar(s), Coef::Tensor(k)) if *s == 1.0 => {
                let k = constant_before(graph, anchor, "fused_bias", k.clone());
                (Op::Add, vec![x, Argument::Node(k)])
            }
            (Coef::Scalar(s), Coef::Tensor(k)) if *s == -1.0 => {
                let k = constant_before(graph, anchor, "fused_bias", k.clone());
                (Op::Sub, vec![Argument::Node(k), x])
            }
            (Coef::Tensor(m), Coef::Scalar(b)) if *b == 0.0 => {
                let m = constant_before(graph, anchor, "fused_scale", m.clone());
                (Op::Mul, vec![x, Argument::Node(m)])
            }
            _ => {
                let descriptor = graph.descriptor(input);
                let rank = descriptor.rank()?;
                let dtype = descriptor.dtype?;
                let channels = descriptor.shape.dim(1).as_static()?;
                if rank < 2 {
                    return None;
                }
                let scale = Fuser::axis_vector(&scale, rank, 1, channels)?;
                let bias = Fuser::axis_vector(&bias, rank, 1, channels)?;
                let scale = constant_before(graph, anchor, "fused_scale", Fuser::to_vector(&scale, dtype, channels));
                let bias = constant_before(graph, anchor, "fused_bias", Fuser::to_vector(&bias, dtype, channels));
                (Op::ScaleBias, vec![x, Argument::Node(scale), Argument::Node(bias)])
            }
        };
        Some(graph.with_insertion(InsertPoint::Before(anchor), |g| g.create_operation(op, args)))
    }

    fn emit_layer(
        graph: &mut Graph,
        op: Op,
        layer_node: NodeId,
        anchor: NodeId,
        input: NodeId,
        weight: ConstantTensor,
        bias: Option<ConstantTensor>,
    ) -> NodeId {
        let weight = constant_before(graph, anchor, "fused_weight", weight);
        let bias = match bias {
            Some(b) => Argument::Node(constant_before(graph, anchor, "fused_bias", b)),
            None => Argument::None,
        };
        let mut args = graph.args(layer_node).to_vec();
        args[0] = Argument::Node(input);
        args[1] = Argument::Node(weight);
        args[2] = bias;
        graph.with_insertion(InsertPoint::Before(anchor), |g| g.create_operation(op, args))
    }

    /// Fuses `producer` into its single consumer, returning the replacement node.
    fn try_fuse(fuser: &Fuser, graph: &mut Graph, producer: NodeId) -> Option<NodeId> {
        let consumer = graph.single_user(producer)?;
        let (producer_op, consumer_op) = (graph.op(producer)?, graph.op(consumer)?);
        if !is_linear_op(producer_op) || !is_linear_op(consumer_op) {
            return None;
        }
        let outer = fuser.classify(graph, consumer)?;
        if outer.input() != producer {
            return None;
        }
        let inner = fuser.classify(graph, producer)?;
        let input = inner.input();
        let fused = Self::plan(fuser, graph, producer, &inner, &outer)?;

        let replacement = match fused {
            Fused::Affine { scale, bias } => Self::emit_affine(graph, consumer, input, scale, bias)?,
            Fused::Layer { op, weight, bias } => {
                // the surviving layer keeps its own hyper-parameters and activation
                let layer_node = if consumer_op == op { consumer } else { producer };
                Self::emit_layer(graph, op, layer_node, consumer, input, weight, bias)
            }
        };

        let orphans: Vec<NodeId> = graph
            .node(consumer)
            .operands()
            .into_iter()
            .chain(graph.node(producer).operands())
            .filter(|n| graph.is_constant(*n))
            .collect();
        graph.replace_all_uses_with(consumer, replacement);
        graph.erase(consumer);
        graph.erase(producer);
        for constant in orphans {
            if graph.is_live(constant) && graph.users(constant).is_empty() {
                graph.erase(constant);
            }
        }
        log::debug!("fused {producer_op} {producer} into {consumer_op} {consumer} as {replacement}");
        Some(replacement)
    }
}

impl GraphPass for LinearFusionPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut Graph, cx: &mut OptimizeContext) -> PassResult {
        let fuser = Fuser::new(cx.backend());
        let mut worklist: VecDeque<NodeId> = graph.order().iter().copied().collect();
        let mut fused = 0usize;
        let mut visits = 0usize;

        while let Some(node) = worklist.pop_front() {
            visits += 1;
            if !graph.is_live(node) || graph.op(node).map_or(true, |op| !is_linear_op(op)) {
                continue;
            }
            let upstream = graph.operand(node, 0);
            if let Some(replacement) = Self::try_fuse(&fuser, graph, node) {
                fused += 1;
                worklist.push_back(replacement);
                if let Some(upstream) = upstream.filter(|u| graph.is_live(*u)) {
                    worklist.push_back(upstream);
                }
            }
        }

        let erased = graph.eliminate_dead_code();
        PassResult {
            changed: fused > 0 || erased > 0,
            iterations: visits,
            rewrites_applied: fused,
            erased_nodes: fused + erased,
        }
    }
}
