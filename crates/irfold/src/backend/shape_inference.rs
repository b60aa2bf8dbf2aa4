//! Per-operator descriptor rules: result type, partial shape and, for small integer
//! tensors, partial element values.

use crate::ir::{Argument, DType, Dim, Op, PartialElement, PartialShape, PartialTensor};

/// Computes result descriptors of an operator from its operand descriptors.
pub trait ShapeInference: Send + Sync {
    /// `inputs` holds the descriptors of the node references in `args`, in flattening
    /// order. Multi-result operators return one descriptor per result.
    fn infer(&self, op: Op, inputs: &[&PartialTensor], args: &[Argument]) -> Vec<PartialTensor>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultShapeInference;

struct Operands<'a> {
    inputs: &'a [&'a PartialTensor],
    args: &'a [Argument],
}

impl<'a> Operands<'a> {
    fn offset(&self, index: usize) -> usize {
        self.args[..index.min(self.args.len())]
            .iter()
            .map(Argument::node_count)
            .sum()
    }

    fn node(&self, index: usize) -> Option<&'a PartialTensor> {
        match self.args.get(index)? {
            Argument::Node(_) => self.inputs.get(self.offset(index)).copied(),
            _ => None,
        }
    }

    fn nodes(&self, index: usize) -> Option<&'a [&'a PartialTensor]> {
        match self.args.get(index)? {
            Argument::Nodes(ids) => {
                let start = self.offset(index);
                self.inputs.get(start..start + ids.len())
            }
            _ => None,
        }
    }

    fn int(&self, index: usize) -> Option<i64> {
        self.args.get(index)?.as_int()
    }

    fn ints(&self, index: usize) -> Option<&'a [i64]> {
        self.args.get(index)?.as_ints()
    }

    fn string(&self, index: usize) -> Option<&'a str> {
        self.args.get(index)?.as_str()
    }

    fn boolean(&self, index: usize) -> Option<bool> {
        self.args.get(index)?.as_bool()
    }
}

fn normalize_axis(axis: i64, rank: usize) -> Option<usize> {
    let rank = rank as i64;
    let axis = if axis < 0 { axis + rank } else { axis };
    (0..rank).contains(&axis).then_some(axis as usize)
}

/// Broadcasts two dimensions under numpy rules; provably invalid pairs yield `Unknown`.
fn broadcast_dim(a: Dim, b: Dim) -> Dim {
    match (a, b) {
        (Dim::Static(1), other) | (other, Dim::Static(1)) => other,
        (Dim::Static(x), Dim::Static(y)) if x == y => a,
        (Dim::Static(_), Dim::Static(_)) => Dim::Unknown,
        (Dim::Symbolic(x), Dim::Symbolic(y)) if x == y => a,
        (Dim::Static(_), _) => a,
        (_, Dim::Static(_)) => b,
        _ => Dim::Unknown,
    }
}

pub(crate) fn broadcast_shapes(a: &PartialShape, b: &PartialShape) -> PartialShape {
    let (Some(lhs), Some(rhs)) = (a.dims(), b.dims()) else {
        return PartialShape::unknown();
    };
    let rank = lhs.len().max(rhs.len());
    let mut dims = Vec::with_capacity(rank);
    for i in 0..rank {
        let l = if i + lhs.len() >= rank { lhs[i + lhs.len() - rank] } else { Dim::Static(1) };
        let r = if i + rhs.len() >= rank { rhs[i + rhs.len() - rank] } else { Dim::Static(1) };
        dims.push(broadcast_dim(l, r));
    }
    PartialShape::from_dims(dims)
}

fn same_as(input: &PartialTensor) -> PartialTensor {
    PartialTensor::new(input.dtype, input.shape.clone())
}

fn elementwise_partial(op: Op, a: &[PartialElement], b: &[PartialElement]) -> Option<Vec<PartialElement>> {
    let len = match (a.len(), b.len()) {
        (x, y) if x == y => x,
        (1, y) => y,
        (x, 1) => x,
        _ => return None,
    };
    let pick = |v: &[PartialElement], i: usize| if v.len() == 1 { v[0] } else { v[i] };
    let combine = |x: PartialElement, y: PartialElement| -> PartialElement {
        use PartialElement::{Known, Symbolic};
        match (op, x, y) {
            (Op::Add, Known(p), Known(q)) => Known(p.wrapping_add(q)),
            (Op::Sub, Known(p), Known(q)) => Known(p.wrapping_sub(q)),
            (Op::Mul, Known(p), Known(q)) => Known(p.wrapping_mul(q)),
            (Op::Div, Known(p), Known(q)) if q != 0 => Known(p / q),
            (Op::Max, Known(p), Known(q)) => Known(p.max(q)),
            (Op::Min, Known(p), Known(q)) => Known(p.min(q)),
            (Op::Add | Op::Sub, s @ Symbolic(_), Known(0)) => s,
            (Op::Add, Known(0), s @ Symbolic(_)) => s,
            (Op::Mul | Op::Div, s @ Symbolic(_), Known(1)) => s,
            (Op::Mul, Known(1), s @ Symbolic(_)) => s,
            _ => PartialElement::Unknown,
        }
    };
    Some((0..len).map(|i| combine(pick(a, i), pick(b, i))).collect())
}

/// Output extent of a sliding window along one spatial axis.
fn window_extent(input: Dim, kernel: usize, stride: usize, pad: usize, dilation: usize) -> Dim {
    let Dim::Static(input) = input else {
        return Dim::Unknown;
    };
    let effective = dilation * (kernel.saturating_sub(1)) + 1;
    let padded = input + pad;
    if stride == 0 || padded < effective {
        return Dim::Unknown;
    }
    Dim::Static((padded - effective) / stride + 1)
}

fn to_usizes(values: &[i64]) -> Option<Vec<usize>> {
    values.iter().map(|v| usize::try_from(*v).ok()).collect()
}

fn infer_spatial(
    x: &PartialTensor,
    channels: Dim,
    kernel: &[usize],
    strides: &[usize],
    pads: &[usize],
    dilations: &[usize],
) -> PartialTensor {
    let spatial = kernel.len();
    let Some(dims) = x.shape.dims() else {
        return PartialTensor::new(x.dtype, PartialShape::unknown());
    };
    if dims.len() != spatial + 2 || strides.len() != spatial || pads.len() != 2 * spatial {
        return PartialTensor::new(x.dtype, PartialShape::with_rank(spatial + 2));
    }
    let mut out = vec![dims[0], channels];
    for axis in 0..spatial {
        let dilation = dilations.get(axis).copied().unwrap_or(1);
        out.push(window_extent(
            dims[axis + 2],
            kernel[axis],
            strides[axis],
            pads[axis] + pads[axis + spatial],
            dilation,
        ));
    }
    PartialTensor::new(x.dtype, PartialShape::from_dims(out))
}

fn infer_reshape(ops: &Operands) -> PartialTensor {
    let Some(x) = ops.node(0) else {
        return PartialTensor::unknown();
    };
    let Some(target) = ops.node(1) else {
        return PartialTensor::new(x.dtype, PartialShape::unknown());
    };
    let allow_zero = ops.boolean(2).unwrap_or(false);
    let requested: Option<Vec<PartialElement>> = match (&target.elements, target.known_ints()) {
        (_, Some(values)) => Some(values.into_iter().map(PartialElement::Known).collect()),
        (Some(elements), None) => Some(elements.clone()),
        (None, None) => None,
    };
    let Some(requested) = requested else {
        let rank = target.static_shape().and_then(|s| s.first().copied());
        let shape = rank.map_or_else(PartialShape::unknown, PartialShape::with_rank);
        return PartialTensor::new(x.dtype, shape);
    };
    let mut dims = Vec::with_capacity(requested.len());
    let mut infer_at = None;
    for (i, element) in requested.iter().enumerate() {
        match element {
            PartialElement::Known(0) if !allow_zero => dims.push(x.shape.dim(i)),
            PartialElement::Known(-1) => {
                infer_at = Some(i);
                dims.push(Dim::Unknown);
            }
            other => dims.push(other.to_dim()),
        }
    }
    if let (Some(at), Some(total)) = (infer_at, x.shape.element_count()) {
        let known: Option<Vec<usize>> = dims
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != at)
            .map(|(_, d)| d.as_static())
            .collect();
        if let Some(known) = known {
            let product: usize = known.iter().product();
            if product > 0 && total % product == 0 {
                dims[at] = Dim::Static(total / product);
            }
        }
    }
    let rank = dims.len();
    let mut out = PartialTensor::new(x.dtype, PartialShape::from_dims(dims));
    if rank <= 1 {
        if let Some(elements) = &x.elements {
            out = out.with_elements(elements.clone());
        }
    }
    out
}

fn infer_concat(ops: &Operands) -> PartialTensor {
    let Some(parts) = ops.nodes(0) else {
        return PartialTensor::unknown();
    };
    let dtype = parts.iter().find_map(|p| p.dtype);
    let Some(rank) = parts.iter().find_map(|p| p.rank()) else {
        return PartialTensor::new(dtype, PartialShape::unknown());
    };
    let Some(axis) = ops.int(1).and_then(|a| normalize_axis(a, rank)) else {
        return PartialTensor::new(dtype, PartialShape::with_rank(rank));
    };
    let mut dims = vec![Dim::Unknown; rank];
    let mut total = Some(0usize);
    for part in parts {
        for (i, dim) in dims.iter_mut().enumerate() {
            if i == axis {
                continue;
            }
            if *dim == Dim::Unknown {
                *dim = part.shape.dim(i);
            }
        }
        total = match (total, part.shape.dim(axis)) {
            (Some(acc), Dim::Static(v)) => Some(acc + v),
            _ => None,
        };
    }
    dims[axis] = total.map_or(Dim::Unknown, Dim::Static);
    let mut out = PartialTensor::new(dtype, PartialShape::from_dims(dims));
    if rank == 1 {
        let elements: Option<Vec<PartialElement>> = parts
            .iter()
            .map(|p| p.elements.clone())
            .collect::<Option<Vec<_>>>()
            .map(|chunks| chunks.concat());
        if let Some(elements) = elements {
            out = out.with_elements(elements);
        }
    }
    out
}

fn infer_reduction(ops: &Operands) -> PartialTensor {
    let Some(x) = ops.node(0) else {
        return PartialTensor::unknown();
    };
    let keepdims = ops.boolean(2).unwrap_or(true);
    let Some(dims) = x.shape.dims() else {
        return PartialTensor::new(x.dtype, PartialShape::unknown());
    };
    let axes = ops.ints(1).unwrap_or(&[]);
    let mut reduced = vec![axes.is_empty(); dims.len()];
    for axis in axes {
        match normalize_axis(*axis, dims.len()) {
            Some(a) => reduced[a] = true,
            None => return PartialTensor::new(x.dtype, PartialShape::unknown()),
        }
    }
    let out: Vec<Dim> = dims
        .iter()
        .zip(&reduced)
        .filter_map(|(d, r)| match (*r, keepdims) {
            (true, true) => Some(Dim::Static(1)),
            (true, false) => None,
            (false, _) => Some(*d),
        })
        .collect();
    PartialTensor::new(x.dtype, PartialShape::from_dims(out))
}

fn infer_gather(ops: &Operands) -> PartialTensor {
    let (Some(x), Some(indices)) = (ops.node(0), ops.node(1)) else {
        return PartialTensor::unknown();
    };
    let (Some(dims), Some(index_dims)) = (x.shape.dims(), indices.shape.dims()) else {
        return PartialTensor::new(x.dtype, PartialShape::unknown());
    };
    let Some(axis) = ops.int(2).and_then(|a| normalize_axis(a, dims.len())) else {
        return PartialTensor::new(x.dtype, PartialShape::unknown());
    };
    let mut out = dims[..axis].to_vec();
    out.extend_from_slice(index_dims);
    out.extend_from_slice(&dims[axis + 1..]);
    let rank = out.len();
    let mut desc = PartialTensor::new(x.dtype, PartialShape::from_dims(out));
    if let (Some(elements), Some(picks), true) = (&x.elements, indices.known_ints(), rank <= 1) {
        let len = elements.len() as i64;
        let gathered: Option<Vec<PartialElement>> = picks
            .iter()
            .map(|&i| {
                let i = if i < 0 { i + len } else { i };
                elements.get(usize::try_from(i).ok()?).copied()
            })
            .collect();
        if let Some(gathered) = gathered {
            desc = desc.with_elements(gathered);
        }
    }
    desc
}

fn infer_slice_like(op: Op, ops: &Operands) -> PartialTensor {
    let Some(x) = ops.node(0) else {
        return PartialTensor::unknown();
    };
    let Some(dims) = x.shape.dims() else {
        return PartialTensor::new(x.dtype, PartialShape::unknown());
    };
    let Some(axis) = ops.int(1).and_then(|a| normalize_axis(a, dims.len())) else {
        return PartialTensor::new(x.dtype, PartialShape::unknown());
    };
    let mut out = dims.to_vec();
    let mut elements = None;
    match op {
        Op::Select => {
            out.remove(axis);
            if let (Some(all), Some(index)) = (&x.elements, ops.int(2)) {
                let index = if index < 0 { index + all.len() as i64 } else { index };
                elements = usize::try_from(index)
                    .ok()
                    .and_then(|i| all.get(i))
                    .map(|e| vec![*e]);
            }
        }
        _ => {
            let (start, len) = (ops.int(2).unwrap_or(0), ops.int(3).unwrap_or(0));
            out[axis] = usize::try_from(len).map_or(Dim::Unknown, Dim::Static);
            if let (Some(all), Ok(start), Ok(len)) =
                (&x.elements, usize::try_from(start), usize::try_from(len))
            {
                elements = all.get(start..start + len).map(<[_]>::to_vec);
            }
        }
    }
    let desc = PartialTensor::new(x.dtype, PartialShape::from_dims(out));
    match elements {
        Some(elements) => desc.with_elements(elements),
        None => desc,
    }
}

fn infer_squeeze(op: Op, ops: &Operands) -> PartialTensor {
    let Some(x) = ops.node(0) else {
        return PartialTensor::unknown();
    };
    let Some(dims) = x.shape.dims() else {
        return PartialTensor::new(x.dtype, PartialShape::unknown());
    };
    let axes = ops.ints(1).unwrap_or(&[]);
    let out: Vec<Dim> = if op == Op::Squeeze {
        if axes.is_empty() {
            if dims.iter().any(|d| d.as_static().is_none()) {
                return PartialTensor::new(x.dtype, PartialShape::unknown());
            }
            dims.iter().copied().filter(|d| *d != Dim::Static(1)).collect()
        } else {
            let Some(drop) = axes
                .iter()
                .map(|a| normalize_axis(*a, dims.len()))
                .collect::<Option<Vec<_>>>()
            else {
                return PartialTensor::new(x.dtype, PartialShape::unknown());
            };
            dims.iter()
                .enumerate()
                .filter(|(i, _)| !drop.contains(i))
                .map(|(_, d)| *d)
                .collect()
        }
    } else {
        let rank = dims.len() + axes.len();
        let Some(insert) = axes
            .iter()
            .map(|a| normalize_axis(*a, rank))
            .collect::<Option<Vec<_>>>()
        else {
            return PartialTensor::new(x.dtype, PartialShape::unknown());
        };
        let mut source = dims.iter();
        (0..rank)
            .map(|i| {
                if insert.contains(&i) {
                    Dim::Static(1)
                } else {
                    source.next().copied().unwrap_or(Dim::Unknown)
                }
            })
            .collect()
    };
    let rank = out.len();
    let desc = PartialTensor::new(x.dtype, PartialShape::from_dims(out));
    match (&x.elements, rank <= 1) {
        (Some(elements), true) => desc.with_elements(elements.clone()),
        _ => desc,
    }
}

fn infer_matmul(ops: &Operands) -> PartialTensor {
    let (Some(a), Some(b)) = (ops.node(0), ops.node(1)) else {
        return PartialTensor::unknown();
    };
    let (Some(ad), Some(bd)) = (a.shape.dims(), b.shape.dims()) else {
        return PartialTensor::new(a.dtype, PartialShape::unknown());
    };
    if ad.len() < 2 || bd.len() < 2 {
        return PartialTensor::new(a.dtype, PartialShape::unknown());
    }
    let batch = broadcast_shapes(
        &PartialShape::from_dims(ad[..ad.len() - 2].to_vec()),
        &PartialShape::from_dims(bd[..bd.len() - 2].to_vec()),
    );
    let mut dims = batch.dims().map(<[_]>::to_vec).unwrap_or_default();
    dims.push(ad[ad.len() - 2]);
    dims.push(bd[bd.len() - 1]);
    PartialTensor::new(a.dtype, PartialShape::from_dims(dims))
}

fn infer_split(ops: &Operands) -> Vec<PartialTensor> {
    let Some(x) = ops.node(0) else {
        return vec![PartialTensor::unknown()];
    };
    let sizes = ops.ints(2).unwrap_or(&[]);
    let dims = x.shape.dims();
    let axis = dims.and_then(|d| ops.int(1).and_then(|a| normalize_axis(a, d.len())));
    sizes
        .iter()
        .map(|&size| match (dims, axis) {
            (Some(dims), Some(axis)) => {
                let mut out = dims.to_vec();
                out[axis] = usize::try_from(size).map_or(Dim::Unknown, Dim::Static);
                PartialTensor::new(x.dtype, PartialShape::from_dims(out))
            }
            _ => PartialTensor::new(x.dtype, PartialShape::unknown()),
        })
        .collect()
}

impl ShapeInference for DefaultShapeInference {
    fn infer(&self, op: Op, inputs: &[&PartialTensor], args: &[Argument]) -> Vec<PartialTensor> {
        let ops = Operands { inputs, args };
        let first = ops.node(0);
        let desc = match op {
            Op::Identity => first.cloned().unwrap_or_default(),
            Op::Neg => {
                let Some(x) = first else {
                    return vec![PartialTensor::unknown()];
                };
                let desc = same_as(x);
                match &x.elements {
                    Some(elements) => desc.with_elements(
                        elements
                            .iter()
                            .map(|e| match e {
                                PartialElement::Known(v) => PartialElement::Known(v.wrapping_neg()),
                                _ => PartialElement::Unknown,
                            })
                            .collect(),
                    ),
                    None => desc,
                }
            }
            Op::Not => first.map_or_else(PartialTensor::unknown, |x| {
                PartialTensor::new(Some(DType::Bool), x.shape.clone())
            }),
            Op::Relu
            | Op::Sigmoid
            | Op::Tanh
            | Op::Exp
            | Op::Log
            | Op::Sqrt
            | Op::Rsqrt
            | Op::Reciprocal
            | Op::Square
            | Op::Abs
            | Op::Swish
            | Op::ScalarMad
            | Op::ScaleBias
            | Op::Clip
            | Op::Softmax
            | Op::BatchNormalization => first.map_or_else(PartialTensor::unknown, same_as),
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
            | Op::Or => {
                let (Some(a), Some(b)) = (first, ops.node(1)) else {
                    return vec![PartialTensor::unknown()];
                };
                let dtype = if op.is_predicate() {
                    Some(DType::Bool)
                } else {
                    a.dtype.or(b.dtype)
                };
                let desc = PartialTensor::new(dtype, broadcast_shapes(&a.shape, &b.shape));
                let partial = match (&a.elements, &b.elements) {
                    (Some(x), Some(y)) if desc.rank().is_some_and(|r| r <= 1) => {
                        elementwise_partial(op, x, y)
                    }
                    _ => None,
                };
                match partial {
                    Some(elements) => desc.with_elements(elements),
                    None => desc,
                }
            }
            Op::Dense => {
                let (Some(x), Some(w)) = (first, ops.node(1)) else {
                    return vec![PartialTensor::unknown()];
                };
                match x.shape.dims() {
                    Some(dims) if !dims.is_empty() => {
                        let mut out = dims[..dims.len() - 1].to_vec();
                        out.push(w.shape.dim(1));
                        PartialTensor::new(x.dtype, PartialShape::from_dims(out))
                    }
                    _ => PartialTensor::new(x.dtype, PartialShape::unknown()),
                }
            }
            Op::MatMul => infer_matmul(&ops),
            Op::Conv => {
                let (Some(x), Some(w)) = (first, ops.node(1)) else {
                    return vec![PartialTensor::unknown()];
                };
                let kernel = w
                    .static_shape()
                    .filter(|s| s.len() >= 3)
                    .map(|s| s[2..].to_vec());
                let strides = ops.ints(3).and_then(to_usizes);
                let pads = ops.ints(4).and_then(to_usizes);
                let dilations = ops.ints(5).and_then(to_usizes);
                match (kernel, strides, pads, dilations) {
                    (Some(k), Some(s), Some(p), Some(d)) => {
                        infer_spatial(x, w.shape.dim(0), &k, &s, &p, &d)
                    }
                    _ => PartialTensor::new(x.dtype, PartialShape::unknown()),
                }
            }
            Op::MaxPool | Op::AveragePool => {
                let Some(x) = first else {
                    return vec![PartialTensor::unknown()];
                };
                let kernel = ops.ints(1).and_then(to_usizes);
                let strides = ops.ints(2).and_then(to_usizes);
                let pads = ops.ints(3).and_then(to_usizes);
                match (kernel, strides, pads) {
                    (Some(k), Some(s), Some(p)) => {
                        let ones = vec![1; k.len()];
                        infer_spatial(x, x.shape.dim(1), &k, &s, &p, &ones)
                    }
                    _ => PartialTensor::new(x.dtype, PartialShape::unknown()),
                }
            }
            Op::Transpose => {
                let Some(x) = first else {
                    return vec![PartialTensor::unknown()];
                };
                let perm = ops
                    .ints(1)
                    .and_then(crate::layout::Permutation::from_i64s);
                match (x.shape.dims(), perm) {
                    (Some(dims), Some(perm)) if perm.rank() == dims.len() => {
                        let desc = PartialTensor::new(x.dtype, PartialShape::from_dims(perm.apply(dims)));
                        match (&x.elements, dims.len() <= 1) {
                            (Some(elements), true) => desc.with_elements(elements.clone()),
                            _ => desc,
                        }
                    }
                    _ => PartialTensor::new(x.dtype, PartialShape::unknown()),
                }
            }
            Op::Reshape => infer_reshape(&ops),
            Op::Expand => {
                let (Some(x), Some(target)) = (first, ops.node(1)) else {
                    return vec![PartialTensor::unknown()];
                };
                let target_shape = match (&target.elements, target.known_ints()) {
                    (_, Some(values)) => Some(PartialShape::from_dims(
                        values.iter().map(|v| PartialElement::Known(*v).to_dim()).collect(),
                    )),
                    (Some(elements), None) => Some(PartialShape::from_dims(
                        elements.iter().map(|e| e.to_dim()).collect(),
                    )),
                    (None, None) => None,
                };
                match target_shape {
                    Some(shape) => PartialTensor::new(x.dtype, broadcast_shapes(&x.shape, &shape)),
                    None => PartialTensor::new(x.dtype, PartialShape::unknown()),
                }
            }
            Op::Tile => {
                let (Some(x), Some(repeats)) = (first, ops.node(1)) else {
                    return vec![PartialTensor::unknown()];
                };
                match (x.shape.dims(), repeats.known_ints()) {
                    (Some(dims), Some(reps)) if reps.len() == dims.len() => {
                        let out = dims
                            .iter()
                            .zip(&reps)
                            .map(|(d, r)| match (d, *r) {
                                (_, 1) => *d,
                                (Dim::Static(v), r) if r >= 0 => Dim::Static(v * r as usize),
                                _ => Dim::Unknown,
                            })
                            .collect();
                        PartialTensor::new(x.dtype, PartialShape::from_dims(out))
                    }
                    (Some(dims), _) => PartialTensor::new(x.dtype, PartialShape::with_rank(dims.len())),
                    _ => PartialTensor::new(x.dtype, PartialShape::unknown()),
                }
            }
            Op::Concat => infer_concat(&ops),
            Op::Squeeze | Op::Unsqueeze => infer_squeeze(op, &ops),
            Op::Split => return infer_split(&ops),
            Op::Extract => PartialTensor::unknown(),
            Op::Gather => infer_gather(&ops),
            Op::Select | Op::Narrow => infer_slice_like(op, &ops),
            Op::Shape => {
                let Some(x) = first else {
                    return vec![PartialTensor::unknown()];
                };
                match x.shape.dims() {
                    Some(dims) => PartialTensor::with_static(DType::I64, &[dims.len()])
                        .with_elements(dims.iter().map(|d| PartialElement::from_dim(*d)).collect()),
                    None => PartialTensor::new(Some(DType::I64), PartialShape::with_rank(1)),
                }
            }
            Op::Cast => {
                let Some(x) = first else {
                    return vec![PartialTensor::unknown()];
                };
                let dtype = ops.string(1).and_then(DType::parse);
                let desc = PartialTensor::new(dtype, x.shape.clone());
                match (&x.elements, dtype) {
                    (Some(elements), Some(d)) if d.is_integer() && x.dtype.is_some_and(DType::is_integer) => {
                        desc.with_elements(elements.clone())
                    }
                    _ => desc,
                }
            }
            Op::CastLike => {
                let (Some(x), Some(like)) = (first, ops.node(1)) else {
                    return vec![PartialTensor::unknown()];
                };
                PartialTensor::new(like.dtype, x.shape.clone())
            }
            Op::ReduceSum
            | Op::ReduceMean
            | Op::ReduceMax
            | Op::ReduceMin
            | Op::ReduceProd
            | Op::ReduceL1
            | Op::ReduceL2
            | Op::ReduceSumSquare
            | Op::ReduceLogSum
            | Op::ReduceLogSumExp => infer_reduction(&ops),
            Op::RandomUniform | Op::RandomNormal => match ops.ints(0).and_then(to_usizes) {
                Some(shape) => PartialTensor::with_static(DType::F32, &shape),
                None => PartialTensor::new(Some(DType::F32), PartialShape::unknown()),
            },
        };
        vec![desc]
    }
}
