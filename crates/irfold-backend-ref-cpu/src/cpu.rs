use irfold::{
    Argument, BackendError, BackendResult, ConstantTensor, DType, NumericBackend, Op, OpArgs,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Reference implementation of [`NumericBackend`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RefCpuBackend;

impl RefCpuBackend {
    pub fn new() -> Self {
        Self
    }
}

impl NumericBackend for RefCpuBackend {
    fn name(&self) -> &str {
        "ref-cpu"
    }

    fn execute(
        &self,
        op: Op,
        inputs: &[ConstantTensor],
        args: &[Argument],
    ) -> BackendResult<Vec<ConstantTensor>> {
        log::trace!("ref-cpu: {op} on {} inputs", inputs.len());
        let args = OpArgs::new(op, inputs, args);
        if op == Op::Split {
            return op_split(&args);
        }
        execute_operation(&args).map(|out| vec![out])
    }
}

/// Widened working copy of a tensor.
#[derive(Debug, Clone)]
struct Buffer {
    dtype: DType,
    shape: Vec<usize>,
    values: Vec<f64>,
}

impl Buffer {
    fn new(dtype: DType, shape: Vec<usize>, values: Vec<f64>) -> Self {
        Self { dtype, shape, values }
    }

    fn of(tensor: &ConstantTensor) -> Self {
        Self::new(tensor.dtype(), tensor.shape().to_vec(), tensor.to_f64_vec())
    }

    fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self::new(self.dtype, self.shape.clone(), self.values.iter().map(|v| f(*v)).collect())
    }

    fn into_tensor(self) -> ConstantTensor {
        ConstantTensor::from_f64(self.dtype, self.shape, &self.values)
    }
}

fn execute_operation(args: &OpArgs) -> BackendResult<ConstantTensor> {
    let op = args.op();
    let out = match op {
        Op::Identity => return Ok(args.tensor(0)?.clone()),
        _ if op.is_unary_elementwise() => op_unary(op, Buffer::of(args.tensor(0)?))?,
        _ if op.is_binary_elementwise() => {
            op_binary(op, &Buffer::of(args.tensor(0)?), &Buffer::of(args.tensor(1)?))?
        }
        _ if op.is_reduction() => op_reduce(args)?,
        Op::ScalarMad => {
            let (scale, bias) = (args.float(1)?, args.float(2)?);
            Buffer::of(args.tensor(0)?).map(|v| v * scale + bias)
        }
        Op::ScaleBias => op_scale_bias(args)?,
        Op::Clip => {
            let (low, high) = (args.float(1)?, args.float(2)?);
            Buffer::of(args.tensor(0)?).map(|v| v.max(low).min(high))
        }
        Op::Softmax => op_softmax(args)?,
        Op::Dense => op_dense(args)?,
        Op::MatMul => op_matmul(op, &Buffer::of(args.tensor(0)?), &Buffer::of(args.tensor(1)?))?,
        Op::Conv => op_conv(args)?,
        Op::MaxPool | Op::AveragePool => op_pool(args)?,
        Op::Transpose => op_transpose(args)?,
        Op::Reshape => op_reshape(args)?,
        Op::Expand => op_expand(args)?,
        Op::Tile => op_tile(args)?,
        Op::Concat => op_concat(args)?,
        Op::Squeeze | Op::Unsqueeze => op_squeeze(args)?,
        Op::Gather => op_gather(args)?,
        Op::Select | Op::Narrow => op_slice(args)?,
        Op::Shape => {
            let x = args.tensor(0)?;
            let dims = x.shape().iter().map(|d| *d as f64).collect();
            Buffer::new(DType::I64, vec![x.rank()], dims)
        }
        Op::Cast => {
            let name = args.string(1)?;
            let dtype = DType::parse(name)
                .ok_or_else(|| BackendError::invalid_argument(op, format!("unknown dtype {name:?}")))?;
            return Ok(args.tensor(0)?.cast(dtype));
        }
        Op::CastLike => return Ok(args.tensor(0)?.cast(args.tensor(1)?.dtype())),
        Op::BatchNormalization => op_batch_norm(args)?,
        Op::RandomUniform | Op::RandomNormal => op_random(args)?,
        Op::Extract => {
            return Err(BackendError::unimplemented(
                op,
                "tuple elements are resolved by the caller",
            ))
        }
        _ => return Err(BackendError::unimplemented(op, "no reference kernel")),
    };
    Ok(out.into_tensor())
}

fn compute_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; dims.len()];
    let mut acc = 1usize;
    for (i, dim) in dims.iter().enumerate().rev() {
        strides[i] = acc;
        acc *= *dim;
    }
    strides
}

fn unravel_index(mut index: usize, dims: &[usize]) -> Vec<usize> {
    let mut coords = vec![0; dims.len()];
    for (i, dim) in dims.iter().enumerate().rev() {
        coords[i] = index % *dim;
        index /= *dim;
    }
    coords
}

fn normalize_axis(op: Op, axis: i64, rank: usize) -> BackendResult<usize> {
    let resolved = if axis < 0 { axis + rank as i64 } else { axis };
    usize::try_from(resolved)
        .ok()
        .filter(|a| *a < rank)
        .ok_or_else(|| BackendError::invalid_argument(op, format!("axis {axis} out of range for rank {rank}")))
}

fn to_usizes(op: Op, values: &[i64]) -> BackendResult<Vec<usize>> {
    values
        .iter()
        .map(|v| {
            usize::try_from(*v)
                .map_err(|_| BackendError::invalid_argument(op, format!("negative extent {v}")))
        })
        .collect()
}

fn int_values(op: Op, tensor: &ConstantTensor) -> BackendResult<Vec<i64>> {
    tensor
        .to_i64_vec()
        .ok_or_else(|| BackendError::invalid_argument(op, "expected an integer tensor"))
}

fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}

fn activation(op: Op, args: &OpArgs, index: usize) -> BackendResult<fn(f64) -> f64> {
    let name = match args.optional_string(index)? {
        Some(name) => name,
        None => "none",
    };
    let f: fn(f64) -> f64 = match name {
        "none" | "" => |v| v,
        "relu" => |v| v.max(0.0),
        "relu6" => |v| v.max(0.0).min(6.0),
        "tanh" => f64::tanh,
        "sigmoid" => sigmoid,
        other => {
            return Err(BackendError::unimplemented(
                op,
                format!("activation {other:?}"),
            ))
        }
    };
    Ok(f)
}

fn op_unary(op: Op, x: Buffer) -> BackendResult<Buffer> {
    let f: fn(f64) -> f64 = match op {
        Op::Relu => |v| v.max(0.0),
        Op::Sigmoid => sigmoid,
        Op::Tanh => f64::tanh,
        Op::Exp => f64::exp,
        Op::Log => f64::ln,
        Op::Sqrt => f64::sqrt,
        Op::Rsqrt => |v| 1.0 / v.sqrt(),
        Op::Reciprocal => |v| 1.0 / v,
        Op::Square => |v| v * v,
        Op::Neg => |v| -v,
        Op::Abs => f64::abs,
        Op::Swish => |v| v * sigmoid(v),
        Op::Not => {
            let mut out = x.map(|v| if v == 0.0 { 1.0 } else { 0.0 });
            out.dtype = DType::Bool;
            return Ok(out);
        }
        _ => return Err(BackendError::unimplemented(op, "not a unary operator")),
    };
    Ok(x.map(f))
}

fn broadcast_shape(op: Op, a: &[usize], b: &[usize]) -> BackendResult<Vec<usize>> {
    let rank = a.len().max(b.len());
    let at = |shape: &[usize], i: usize| {
        let offset = rank - shape.len();
        if i < offset {
            1
        } else {
            shape[i - offset]
        }
    };
    (0..rank)
        .map(|i| match (at(a, i), at(b, i)) {
            (x, y) if x == y => Ok(x),
            (1, y) => Ok(y),
            (x, 1) => Ok(x),
            (x, y) => Err(BackendError::invalid_argument(
                op,
                format!("cannot broadcast {a:?} with {b:?} (axis {i}: {x} vs {y})"),
            )),
        })
        .collect()
}

/// Values of `x` laid out over the larger `shape` it broadcasts to.
fn broadcast_values(x: &Buffer, shape: &[usize]) -> Vec<f64> {
    if x.shape == shape {
        return x.values.clone();
    }
    let strides = compute_strides(&x.shape);
    let skip = shape.len() - x.shape.len();
    let total: usize = shape.iter().product();
    (0..total)
        .map(|idx| {
            let coord = unravel_index(idx, shape);
            let offset: usize = x
                .shape
                .iter()
                .zip(&strides)
                .zip(&coord[skip..])
                .map(|((dim, stride), c)| if *dim == 1 { 0 } else { c * stride })
                .sum();
            x.values[offset]
        })
        .collect()
}

fn op_binary(op: Op, a: &Buffer, b: &Buffer) -> BackendResult<Buffer> {
    let shape = broadcast_shape(op, &a.shape, &b.shape)?;
    let lhs = broadcast_values(a, &shape);
    let rhs = broadcast_values(b, &shape);
    let integer = a.dtype.is_integer();
    let truth = |c: bool| if c { 1.0 } else { 0.0 };
    let values = lhs
        .iter()
        .zip(&rhs)
        .map(|(&x, &y)| {
            Ok(match op {
                Op::Add => x + y,
                Op::Sub => x - y,
                Op::Mul => x * y,
                Op::Div if integer => {
                    if y == 0.0 {
                        return Err(BackendError::execution("integer division by zero"));
                    }
                    (x / y).trunc()
                }
                Op::Div => x / y,
                Op::Pow => x.powf(y),
                Op::Max => x.max(y),
                Op::Min => x.min(y),
                Op::Equal => truth(x == y),
                Op::NotEqual => truth(x != y),
                Op::Less => truth(x < y),
                Op::Greater => truth(x > y),
                Op::And => truth(x != 0.0 && y != 0.0),
                Op::Or => truth(x != 0.0 || y != 0.0),
                _ => return Err(BackendError::unimplemented(op, "not a binary operator")),
            })
        })
        .collect::<BackendResult<Vec<_>>>()?;
    let dtype = if op.is_predicate() { DType::Bool } else { a.dtype };
    Ok(Buffer::new(dtype, shape, values))
}

/// Per-channel coefficients for a tensor whose channels run along axis 1.
fn channel_values(op: Op, tensor: &ConstantTensor, channels: usize) -> BackendResult<Vec<f64>> {
    let values = tensor.to_f64_vec();
    match values.len() {
        1 => Ok(vec![values[0]; channels]),
        n if n == channels => Ok(values),
        n => Err(BackendError::invalid_argument(
            op,
            format!("expected {channels} per-channel values, got {n}"),
        )),
    }
}

/// Applies `f(value, channel)` to every element of an `[N, C, ...]` tensor.
fn per_channel(op: Op, x: &Buffer, f: impl Fn(f64, usize) -> f64) -> BackendResult<Buffer> {
    if x.shape.len() < 2 {
        return Err(BackendError::invalid_argument(op, "expected a tensor with a channel axis"));
    }
    let channels = x.shape[1];
    let inner: usize = x.shape[2..].iter().product();
    let values = x
        .values
        .iter()
        .enumerate()
        .map(|(idx, v)| f(*v, (idx / inner.max(1)) % channels.max(1)))
        .collect();
    Ok(Buffer::new(x.dtype, x.shape.clone(), values))
}

fn op_scale_bias(args: &OpArgs) -> BackendResult<Buffer> {
    let op = args.op();
    let x = Buffer::of(args.tensor(0)?);
    if x.shape.len() < 2 {
        return Err(BackendError::invalid_argument(op, "expected a tensor with a channel axis"));
    }
    let channels = x.shape[1];
    let scale = channel_values(op, args.tensor(1)?, channels)?;
    let bias = channel_values(op, args.tensor(2)?, channels)?;
    per_channel(op, &x, |v, c| v * scale[c] + bias[c])
}

fn op_batch_norm(args: &OpArgs) -> BackendResult<Buffer> {
    let op = args.op();
    let x = Buffer::of(args.tensor(0)?);
    if x.shape.len() < 2 {
        return Err(BackendError::invalid_argument(op, "expected a tensor with a channel axis"));
    }
    let channels = x.shape[1];
    let gamma = channel_values(op, args.tensor(1)?, channels)?;
    let beta = channel_values(op, args.tensor(2)?, channels)?;
    let mean = channel_values(op, args.tensor(3)?, channels)?;
    let var = channel_values(op, args.tensor(4)?, channels)?;
    let epsilon = args.float(5)?;
    per_channel(op, &x, |v, c| (v - mean[c]) / (var[c] + epsilon).sqrt() * gamma[c] + beta[c])
}

fn op_softmax(args: &OpArgs) -> BackendResult<Buffer> {
    let op = args.op();
    let mut x = Buffer::of(args.tensor(0)?);
    let axis = normalize_axis(op, args.int(1)?, x.shape.len())?;
    let outer: usize = x.shape[..axis].iter().product();
    let len = x.shape[axis];
    let inner: usize = x.shape[axis + 1..].iter().product();
    for o in 0..outer {
        for i in 0..inner {
            let at = |a: usize| (o * len + a) * inner + i;
            let max = (0..len).map(|a| x.values[at(a)]).fold(f64::NEG_INFINITY, f64::max);
            let sum: f64 = (0..len).map(|a| (x.values[at(a)] - max).exp()).sum();
            for a in 0..len {
                let slot = &mut x.values[at(a)];
                *slot = (*slot - max).exp() / sum;
            }
        }
    }
    Ok(x)
}

fn op_dense(args: &OpArgs) -> BackendResult<Buffer> {
    let op = args.op();
    let x = Buffer::of(args.tensor(0)?);
    let w = Buffer::of(args.tensor(1)?);
    let bias = args.optional_tensor(2)?.map(ConstantTensor::to_f64_vec);
    let act = activation(op, args, 3)?;
    let (Some(&k), [wk, n]) = (x.shape.last(), w.shape.as_slice()) else {
        return Err(BackendError::invalid_argument(op, "expected [.., K] input and [K, N] weight"));
    };
    if k != *wk {
        return Err(BackendError::invalid_argument(
            op,
            format!("input depth {k} does not match weight rows {wk}"),
        ));
    }
    let n = *n;
    if bias.as_ref().is_some_and(|b| b.len() != n) {
        return Err(BackendError::invalid_argument(op, "bias length differs from weight columns"));
    }
    let rows = x.values.len() / k.max(1);
    let mut values = vec![0.0; rows * n];
    for r in 0..rows {
        for j in 0..n {
            let mut acc = bias.as_ref().map_or(0.0, |b| b[j]);
            for i in 0..k {
                acc += x.values[r * k + i] * w.values[i * n + j];
            }
            values[r * n + j] = act(acc);
        }
    }
    let mut shape = x.shape.clone();
    if let Some(last) = shape.last_mut() {
        *last = n;
    }
    Ok(Buffer::new(x.dtype, shape, values))
}

fn op_matmul(op: Op, a: &Buffer, b: &Buffer) -> BackendResult<Buffer> {
    let (ar, br) = (a.shape.len(), b.shape.len());
    if ar < 2 || br < 2 {
        return Err(BackendError::invalid_argument(op, "matmul operands need rank >= 2"));
    }
    let (m, k) = (a.shape[ar - 2], a.shape[ar - 1]);
    let (kb, n) = (b.shape[br - 2], b.shape[br - 1]);
    if k != kb {
        return Err(BackendError::invalid_argument(
            op,
            format!("contracting dims differ: {k} vs {kb}"),
        ));
    }
    let batch = broadcast_shape(op, &a.shape[..ar - 2], &b.shape[..br - 2])?;
    let mut a_shape = batch.clone();
    a_shape.extend([m, k]);
    let mut b_shape = batch.clone();
    b_shape.extend([k, n]);
    let lhs = broadcast_values(&widen(a, batch.len() + 2), &a_shape);
    let rhs = broadcast_values(&widen(b, batch.len() + 2), &b_shape);
    let batches: usize = batch.iter().product();
    let mut values = vec![0.0; batches * m * n];
    for bi in 0..batches {
        let (la, lb, lo) = (bi * m * k, bi * k * n, bi * m * n);
        for i in 0..m {
            for j in 0..n {
                values[lo + i * n + j] = (0..k).map(|p| lhs[la + i * k + p] * rhs[lb + p * n + j]).sum();
            }
        }
    }
    let mut shape = batch;
    shape.extend([m, n]);
    Ok(Buffer::new(a.dtype, shape, values))
}

/// Same values with leading unit axes added up to `rank`.
fn widen(x: &Buffer, rank: usize) -> Buffer {
    let mut shape = vec![1; rank.saturating_sub(x.shape.len())];
    shape.extend_from_slice(&x.shape);
    Buffer::new(x.dtype, shape, x.values.clone())
}

/// Sliding-window geometry shared by convolution and pooling over `[N, C, spatial...]`.
struct Window {
    kernel: Vec<usize>,
    strides: Vec<usize>,
    pads: Vec<usize>,
    dilations: Vec<usize>,
}

impl Window {
    fn output_dims(&self, op: Op, input: &[usize]) -> BackendResult<Vec<usize>> {
        let spatial = self.kernel.len();
        if input.len() != spatial + 2
            || self.strides.len() != spatial
            || self.pads.len() != 2 * spatial
            || self.dilations.len() != spatial
        {
            return Err(BackendError::invalid_argument(
                op,
                format!("window parameters do not match input {input:?}"),
            ));
        }
        (0..spatial)
            .map(|axis| {
                let padded = input[axis + 2] + self.pads[axis] + self.pads[axis + spatial];
                let extent = self.dilations[axis] * (self.kernel[axis].max(1) - 1) + 1;
                if padded < extent || self.strides[axis] == 0 {
                    return Err(BackendError::invalid_argument(op, "window exceeds padded input"));
                }
                Ok((padded - extent) / self.strides[axis] + 1)
            })
            .collect()
    }

    /// Input coordinates covered by the window at `out`, skipping padding.
    fn taps(&self, out: &[usize], input: &[usize]) -> Vec<(usize, Vec<usize>)> {
        let total: usize = self.kernel.iter().product();
        let mut taps = Vec::with_capacity(total);
        for tap in 0..total {
            let offsets = unravel_index(tap, &self.kernel);
            let position: Option<Vec<usize>> = offsets
                .iter()
                .enumerate()
                .map(|(axis, k)| {
                    let pos = (out[axis] * self.strides[axis] + k * self.dilations[axis]) as i64
                        - self.pads[axis] as i64;
                    usize::try_from(pos).ok().filter(|p| *p < input[axis])
                })
                .collect();
            if let Some(position) = position {
                taps.push((tap, position));
            }
        }
        taps
    }
}

fn spatial_offset(position: &[usize], strides: &[usize]) -> usize {
    position.iter().zip(strides).map(|(p, s)| p * s).sum()
}

fn op_conv(args: &OpArgs) -> BackendResult<Buffer> {
    let op = args.op();
    let x = Buffer::of(args.tensor(0)?);
    let w = Buffer::of(args.tensor(1)?);
    let bias = args.optional_tensor(2)?.map(ConstantTensor::to_f64_vec);
    let window = Window {
        kernel: w.shape.get(2..).unwrap_or_default().to_vec(),
        strides: to_usizes(op, args.ints(3)?)?,
        pads: to_usizes(op, args.ints(4)?)?,
        dilations: to_usizes(op, args.ints(5)?)?,
    };
    let group = usize::try_from(args.int(6)?)
        .ok()
        .filter(|g| *g > 0)
        .ok_or_else(|| BackendError::invalid_argument(op, "group must be positive"))?;
    let act = activation(op, args, 7)?;

    let spatial = window.output_dims(op, &x.shape)?;
    let (batch, in_channels) = (x.shape[0], x.shape[1]);
    let out_channels = w.shape[0];
    let group_in = w.shape[1];
    if in_channels != group_in * group || out_channels % group != 0 {
        return Err(BackendError::invalid_argument(
            op,
            format!("{in_channels} input channels do not split into {group} groups of {group_in}"),
        ));
    }
    if bias.as_ref().is_some_and(|b| b.len() != out_channels) {
        return Err(BackendError::invalid_argument(op, "bias length differs from output channels"));
    }
    let group_out = out_channels / group;
    let in_spatial = &x.shape[2..];
    let x_strides = compute_strides(&x.shape);
    let w_strides = compute_strides(&w.shape);

    let mut shape = vec![batch, out_channels];
    shape.extend_from_slice(&spatial);
    let total: usize = shape.iter().product();
    let mut values = Vec::with_capacity(total);
    for idx in 0..total {
        let coord = unravel_index(idx, &shape);
        let (n, o) = (coord[0], coord[1]);
        let first_in = (o / group_out) * group_in;
        let mut acc = bias.as_ref().map_or(0.0, |b| b[o]);
        for (tap, position) in window.taps(&coord[2..], in_spatial) {
            let base = n * x_strides[0] + spatial_offset(&position, &x_strides[2..]);
            for ci in 0..group_in {
                let xi = base + (first_in + ci) * x_strides[1];
                let wi = o * w_strides[0] + ci * w_strides[1] + tap;
                acc += x.values[xi] * w.values[wi];
            }
        }
        values.push(act(acc));
    }
    Ok(Buffer::new(x.dtype, shape, values))
}

fn op_pool(args: &OpArgs) -> BackendResult<Buffer> {
    let op = args.op();
    let x = Buffer::of(args.tensor(0)?);
    let kernel = to_usizes(op, args.ints(1)?)?;
    let window = Window {
        dilations: vec![1; kernel.len()],
        kernel,
        strides: to_usizes(op, args.ints(2)?)?,
        pads: to_usizes(op, args.ints(3)?)?,
    };
    let spatial = window.output_dims(op, &x.shape)?;
    let x_strides = compute_strides(&x.shape);
    let mut shape = x.shape[..2].to_vec();
    shape.extend_from_slice(&spatial);
    let total: usize = shape.iter().product();
    let mut values = Vec::with_capacity(total);
    for idx in 0..total {
        let coord = unravel_index(idx, &shape);
        let base = coord[0] * x_strides[0] + coord[1] * x_strides[1];
        let taps: Vec<f64> = window
            .taps(&coord[2..], &x.shape[2..])
            .into_iter()
            .map(|(_, position)| x.values[base + spatial_offset(&position, &x_strides[2..])])
            .collect();
        let value = match op {
            Op::MaxPool => taps.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            _ if taps.is_empty() => 0.0,
            _ => taps.iter().sum::<f64>() / taps.len() as f64,
        };
        values.push(value);
    }
    Ok(Buffer::new(x.dtype, shape, values))
}

fn op_transpose(args: &OpArgs) -> BackendResult<Buffer> {
    let op = args.op();
    let x = Buffer::of(args.tensor(0)?);
    let perm = to_usizes(op, args.ints(1)?)?;
    let mut seen = vec![false; perm.len()];
    for &axis in &perm {
        match seen.get_mut(axis) {
            Some(slot) if !*slot => *slot = true,
            _ => return Err(BackendError::invalid_argument(op, format!("invalid permutation {perm:?}"))),
        }
    }
    if perm.len() != x.shape.len() {
        return Err(BackendError::execution("transpose rank mismatch"));
    }
    let out_dims: Vec<usize> = perm.iter().map(|&p| x.shape[p]).collect();
    let input_strides = compute_strides(&x.shape);
    let values = (0..x.values.len())
        .map(|idx| {
            let out_coord = unravel_index(idx, &out_dims);
            let in_index: usize = out_coord
                .iter()
                .enumerate()
                .map(|(out_axis, c)| c * input_strides[perm[out_axis]])
                .sum();
            x.values[in_index]
        })
        .collect();
    Ok(Buffer::new(x.dtype, out_dims, values))
}

fn op_reshape(args: &OpArgs) -> BackendResult<Buffer> {
    let op = args.op();
    let mut x = Buffer::of(args.tensor(0)?);
    let requested = int_values(op, args.tensor(1)?)?;
    let allow_zero = args.len() > 2 && args.boolean(2)?;
    let mut dims = Vec::with_capacity(requested.len());
    let mut infer_at = None;
    for (i, &value) in requested.iter().enumerate() {
        match value {
            0 if !allow_zero => dims.push(*x.shape.get(i).ok_or_else(|| {
                BackendError::invalid_argument(op, format!("no input dim to copy at {i}"))
            })?),
            -1 if infer_at.is_none() => {
                infer_at = Some(i);
                dims.push(1);
            }
            v => dims.push(usize::try_from(v).map_err(|_| {
                BackendError::invalid_argument(op, format!("invalid target extent {v}"))
            })?),
        }
    }
    let total = x.values.len();
    if let Some(at) = infer_at {
        let known: usize = dims.iter().product();
        if known == 0 || total % known != 0 {
            return Err(BackendError::invalid_argument(
                op,
                format!("cannot infer a dimension of {requested:?} for {total} elements"),
            ));
        }
        dims[at] = total / known;
    }
    if dims.iter().product::<usize>() != total {
        return Err(BackendError::invalid_argument(
            op,
            format!("shape {dims:?} does not hold {total} elements"),
        ));
    }
    x.shape = dims;
    Ok(x)
}

fn op_expand(args: &OpArgs) -> BackendResult<Buffer> {
    let op = args.op();
    let x = Buffer::of(args.tensor(0)?);
    let target = to_usizes(op, &int_values(op, args.tensor(1)?)?)?;
    let shape = broadcast_shape(op, &x.shape, &target)?;
    let values = broadcast_values(&widen(&x, shape.len()), &shape);
    Ok(Buffer::new(x.dtype, shape, values))
}

fn op_tile(args: &OpArgs) -> BackendResult<Buffer> {
    let op = args.op();
    let x = Buffer::of(args.tensor(0)?);
    let repeats = to_usizes(op, &int_values(op, args.tensor(1)?)?)?;
    if repeats.len() != x.shape.len() {
        return Err(BackendError::invalid_argument(op, "one repeat count per axis expected"));
    }
    let shape: Vec<usize> = x.shape.iter().zip(&repeats).map(|(d, r)| d * r).collect();
    let strides = compute_strides(&x.shape);
    let total: usize = shape.iter().product();
    let values = (0..total)
        .map(|idx| {
            let coord = unravel_index(idx, &shape);
            let offset: usize = coord
                .iter()
                .zip(&x.shape)
                .zip(&strides)
                .map(|((c, d), s)| (c % d) * s)
                .sum();
            x.values[offset]
        })
        .collect();
    Ok(Buffer::new(x.dtype, shape, values))
}

fn op_concat(args: &OpArgs) -> BackendResult<Buffer> {
    let op = args.op();
    let parts: Vec<Buffer> = args.tensors(0)?.iter().map(Buffer::of).collect();
    let Some(first) = parts.first() else {
        return Err(BackendError::invalid_argument(op, "nothing to concatenate"));
    };
    let rank = first.shape.len();
    let axis = normalize_axis(op, args.int(1)?, rank)?;
    for part in &parts {
        let compatible = part.shape.len() == rank
            && part.shape.iter().enumerate().all(|(i, d)| i == axis || *d == first.shape[i]);
        if !compatible {
            return Err(BackendError::invalid_argument(
                op,
                format!("cannot concatenate {:?} with {:?} on axis {axis}", first.shape, part.shape),
            ));
        }
    }
    let outer: usize = first.shape[..axis].iter().product();
    let mut shape = first.shape.clone();
    shape[axis] = parts.iter().map(|p| p.shape[axis]).sum();
    let mut values = Vec::with_capacity(shape.iter().product());
    for o in 0..outer {
        for part in &parts {
            let chunk: usize = part.shape[axis..].iter().product();
            values.extend_from_slice(&part.values[o * chunk..(o + 1) * chunk]);
        }
    }
    Ok(Buffer::new(first.dtype, shape, values))
}

fn op_squeeze(args: &OpArgs) -> BackendResult<Buffer> {
    let op = args.op();
    let mut x = Buffer::of(args.tensor(0)?);
    let axes: &[i64] = if args.len() > 1 { args.ints(1)? } else { &[] };
    x.shape = if op == Op::Squeeze {
        if axes.is_empty() {
            x.shape.iter().copied().filter(|d| *d != 1).collect()
        } else {
            let drop = axes
                .iter()
                .map(|a| normalize_axis(op, *a, x.shape.len()))
                .collect::<BackendResult<Vec<_>>>()?;
            if drop.iter().any(|a| x.shape[*a] != 1) {
                return Err(BackendError::invalid_argument(op, "squeezed axes must have extent 1"));
            }
            x.shape
                .iter()
                .enumerate()
                .filter(|(i, _)| !drop.contains(i))
                .map(|(_, d)| *d)
                .collect()
        }
    } else {
        let rank = x.shape.len() + axes.len();
        let insert = axes
            .iter()
            .map(|a| normalize_axis(op, *a, rank))
            .collect::<BackendResult<Vec<_>>>()?;
        let mut source = x.shape.iter();
        (0..rank)
            .map(|i| if insert.contains(&i) { 1 } else { source.next().copied().unwrap_or(1) })
            .collect()
    };
    Ok(x)
}

fn op_split(args: &OpArgs) -> BackendResult<Vec<ConstantTensor>> {
    let op = args.op();
    let x = Buffer::of(args.tensor(0)?);
    let axis = normalize_axis(op, args.int(1)?, x.shape.len())?;
    let sizes = to_usizes(op, args.ints(2)?)?;
    if sizes.iter().sum::<usize>() != x.shape[axis] {
        return Err(BackendError::invalid_argument(
            op,
            format!("split sizes {sizes:?} do not cover extent {}", x.shape[axis]),
        ));
    }
    let mut start = 0;
    let mut outputs = Vec::with_capacity(sizes.len());
    for size in sizes {
        outputs.push(narrow(&x, axis, start, size).into_tensor());
        start += size;
    }
    Ok(outputs)
}

fn narrow(x: &Buffer, axis: usize, start: usize, len: usize) -> Buffer {
    let outer: usize = x.shape[..axis].iter().product();
    let inner: usize = x.shape[axis + 1..].iter().product();
    let extent = x.shape[axis];
    let mut values = Vec::with_capacity(outer * len * inner);
    for o in 0..outer {
        let from = (o * extent + start) * inner;
        values.extend_from_slice(&x.values[from..from + len * inner]);
    }
    let mut shape = x.shape.clone();
    shape[axis] = len;
    Buffer::new(x.dtype, shape, values)
}

fn op_slice(args: &OpArgs) -> BackendResult<Buffer> {
    let op = args.op();
    let x = Buffer::of(args.tensor(0)?);
    let axis = normalize_axis(op, args.int(1)?, x.shape.len())?;
    let extent = x.shape[axis];
    if op == Op::Select {
        let index = normalize_axis(op, args.int(2)?, extent)?;
        let mut out = narrow(&x, axis, index, 1);
        out.shape.remove(axis);
        return Ok(out);
    }
    let start = usize::try_from(args.int(2)?).ok();
    let len = usize::try_from(args.int(3)?).ok();
    match (start, len) {
        (Some(start), Some(len)) if start + len <= extent => Ok(narrow(&x, axis, start, len)),
        _ => Err(BackendError::invalid_argument(
            op,
            format!("window [{}, +{}) outside extent {extent}", args.int(2)?, args.int(3)?),
        )),
    }
}

fn op_gather(args: &OpArgs) -> BackendResult<Buffer> {
    let op = args.op();
    let x = Buffer::of(args.tensor(0)?);
    let indices = args.tensor(1)?;
    let picks = int_values(op, indices)?;
    let axis = normalize_axis(op, args.int(2)?, x.shape.len())?;
    let extent = x.shape[axis];
    let picks = picks
        .iter()
        .map(|i| normalize_axis(op, *i, extent))
        .collect::<BackendResult<Vec<_>>>()?;
    let mut parts = Vec::with_capacity(picks.len());
    for pick in picks {
        parts.push(narrow(&x, axis, pick, 1));
    }
    let outer: usize = x.shape[..axis].iter().product();
    let inner: usize = x.shape[axis + 1..].iter().product();
    let mut values = Vec::with_capacity(outer * parts.len() * inner);
    for o in 0..outer {
        for part in &parts {
            values.extend_from_slice(&part.values[o * inner..(o + 1) * inner]);
        }
    }
    let mut shape = x.shape[..axis].to_vec();
    shape.extend_from_slice(indices.shape());
    shape.extend_from_slice(&x.shape[axis + 1..]);
    Ok(Buffer::new(x.dtype, shape, values))
}

fn op_reduce(args: &OpArgs) -> BackendResult<Buffer> {
    let op = args.op();
    let x = Buffer::of(args.tensor(0)?);
    let rank = x.shape.len();
    let axes: &[i64] = if args.len() > 1 { args.ints(1)? } else { &[] };
    let keepdims = args.len() <= 2 || args.boolean(2)?;
    let mut reduced = vec![axes.is_empty(); rank];
    for axis in axes {
        reduced[normalize_axis(op, *axis, rank)?] = true;
    }
    let kept: Vec<usize> = x
        .shape
        .iter()
        .zip(&reduced)
        .map(|(d, r)| if *r { 1 } else { *d })
        .collect();
    let kept_strides = compute_strides(&kept);
    let mut groups = vec![Vec::new(); kept.iter().product()];
    for (idx, value) in x.values.iter().enumerate() {
        let coord = unravel_index(idx, &x.shape);
        let slot: usize = coord
            .iter()
            .zip(&reduced)
            .zip(&kept_strides)
            .map(|((c, r), s)| if *r { 0 } else { c * s })
            .sum();
        groups[slot].push(*value);
    }
    let values = groups.iter().map(|g| reduce_group(op, g)).collect();
    let shape = if keepdims {
        kept
    } else {
        x.shape
            .iter()
            .zip(&reduced)
            .filter(|(_, r)| !**r)
            .map(|(d, _)| *d)
            .collect()
    };
    Ok(Buffer::new(x.dtype, shape, values))
}

fn reduce_group(op: Op, group: &[f64]) -> f64 {
    let sum = |f: fn(f64) -> f64| group.iter().map(|v| f(*v)).sum::<f64>();
    match op {
        Op::ReduceMean => sum(|v| v) / group.len().max(1) as f64,
        Op::ReduceMax => group.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Op::ReduceMin => group.iter().copied().fold(f64::INFINITY, f64::min),
        Op::ReduceProd => group.iter().product(),
        Op::ReduceL1 => sum(f64::abs),
        Op::ReduceL2 => sum(|v| v * v).sqrt(),
        Op::ReduceSumSquare => sum(|v| v * v),
        Op::ReduceLogSum => sum(|v| v).ln(),
        Op::ReduceLogSumExp => {
            let max = group.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if max.is_infinite() {
                return max;
            }
            max + group.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
        }
        _ => sum(|v| v),
    }
}

fn op_random(args: &OpArgs) -> BackendResult<Buffer> {
    let op = args.op();
    let shape = to_usizes(op, args.ints(0)?)?;
    let (a, b) = (args.float(1)?, args.float(2)?);
    let mut rng = match args.optional_int(3)? {
        Some(seed) => StdRng::seed_from_u64(seed as u64),
        None => StdRng::from_entropy(),
    };
    let total: usize = shape.iter().product();
    let values = (0..total)
        .map(|_| match op {
            Op::RandomUniform => a + (b - a) * rng.gen::<f64>(),
            _ => {
                let u1: f64 = 1.0 - rng.gen::<f64>();
                let u2: f64 = rng.gen::<f64>();
                a + b * (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
            }
        })
        .collect();
    Ok(Buffer::new(DType::F32, shape, values))
}
