use serde_json::Value;

use crate::ir::{Argument, ConstantTensor, Dim, NodeId, Op};
use crate::layout::{get_canonical_value, DeferredValue, Permutation};

use super::{ImportError, ImportResult, Importer, OperatorRecord, Severity};

/// `NHWC -> NCHW`: the node layout of every spatial operator's activations.
const CHANNELS_FIRST: [usize; 4] = [0, 3, 1, 2];
/// `[1, H, W, C*M] -> [C*M, 1, H, W]` for depthwise filters.
const DEPTHWISE_FILTER: [usize; 4] = [3, 0, 1, 2];
const SWAP: [usize; 2] = [1, 0];

fn fixed(axes: &[usize]) -> Permutation {
    Permutation::from_slice(axes).expect("literal permutations are valid")
}

fn channels_first() -> Permutation {
    fixed(&CHANNELS_FIRST)
}

fn normalize_axis(record: &OperatorRecord, axis: i64, rank: usize) -> ImportResult<usize> {
    let signed_rank = rank as i64;
    let normalized = if axis < 0 { axis + signed_rank } else { axis };
    if (0..signed_rank).contains(&normalized) {
        Ok(normalized as usize)
    } else {
        Err(ImportError::unsupported_parameter(
            &record.opcode,
            "axis",
            format!("{axis} is out of range for rank {rank}"),
        ))
    }
}

fn unary_op(opcode: &str) -> Option<Op> {
    Some(match opcode {
        "RELU" => Op::Relu,
        "LOGISTIC" => Op::Sigmoid,
        "TANH" => Op::Tanh,
        "EXP" => Op::Exp,
        "LOG" => Op::Log,
        "SQRT" => Op::Sqrt,
        "RSQRT" => Op::Rsqrt,
        "SQUARE" => Op::Square,
        "NEG" => Op::Neg,
        "ABS" => Op::Abs,
        "LOGICAL_NOT" => Op::Not,
        _ => return None,
    })
}

fn binary_op(opcode: &str) -> Option<Op> {
    Some(match opcode {
        "ADD" => Op::Add,
        "SUB" => Op::Sub,
        "MUL" => Op::Mul,
        "DIV" => Op::Div,
        "POW" => Op::Pow,
        "MAXIMUM" => Op::Max,
        "MINIMUM" => Op::Min,
        "EQUAL" => Op::Equal,
        "NOT_EQUAL" => Op::NotEqual,
        "LESS" => Op::Less,
        "GREATER" => Op::Greater,
        "LOGICAL_AND" => Op::And,
        "LOGICAL_OR" => Op::Or,
        _ => return None,
    })
}

/// Reduction opcodes; boolean reductions are lowered to min/max followed by a `[0, 1]` clip.
fn reduce_op(opcode: &str) -> Option<(Op, bool)> {
    Some(match opcode {
        "SUM" => (Op::ReduceSum, false),
        "MEAN" => (Op::ReduceMean, false),
        "REDUCE_MAX" => (Op::ReduceMax, false),
        "REDUCE_MIN" => (Op::ReduceMin, false),
        "REDUCE_PROD" => (Op::ReduceProd, false),
        "REDUCE_ANY" => (Op::ReduceMax, true),
        "REDUCE_ALL" => (Op::ReduceMin, true),
        _ => return None,
    })
}

impl<'m> Importer<'m> {
    pub(crate) fn import_operator(&mut self, record: &OperatorRecord) -> ImportResult<()> {
        let opcode = record.opcode.as_str();
        if let Some(op) = unary_op(opcode) {
            let x = self.input(record, 0)?;
            let y = self.unary(op, vec![], x);
            return self.define(record, 0, y);
        }
        if let Some(op) = binary_op(opcode) {
            let (a, b) = (self.input(record, 0)?, self.input(record, 1)?);
            let y = self.broadcast_binary(op, a, b);
            let y = self.fused_activation(record, y)?;
            return self.define(record, 0, y);
        }
        if let Some((op, boolean)) = reduce_op(opcode) {
            return self.import_reduction(record, op, boolean);
        }
        match opcode {
            "RELU6" | "RELU_N1_TO_1" => {
                let x = self.input(record, 0)?;
                let (low, high) = if opcode == "RELU6" { (0.0, 6.0) } else { (-1.0, 1.0) };
                let y = self.unary(Op::Clip, vec![Argument::Float(low), Argument::Float(high)], x);
                self.define(record, 0, y)
            }
            "CAST" => {
                let x = self.input(record, 0)?;
                let name = record.outputs.first().map(String::as_str).unwrap_or_default();
                let target = self.tensor_info(name)?.dtype;
                let y = self.unary(Op::Cast, vec![Argument::str(target.name())], x);
                self.define(record, 0, y)
            }
            "DEQUANTIZE" => {
                self.warn(opcode, Severity::Info, "dequantize imported as identity");
                let x = self.input(record, 0)?;
                let y = self.unary(Op::Identity, vec![], x);
                self.define(record, 0, y)
            }
            "QUANTIZE" => {
                self.warn(opcode, Severity::Error, "quantized tensors are not supported");
                let x = self.input(record, 0)?;
                let y = self.unary(Op::Identity, vec![], x);
                self.define(record, 0, y)
            }
            "CONCATENATION" => self.import_concat(record),
            "TRANSPOSE" => self.import_transpose(record),
            "CONV_2D" | "DEPTHWISE_CONV_2D" => self.import_conv(record),
            "MAX_POOL_2D" | "AVERAGE_POOL_2D" => self.import_pool(record),
            "FULLY_CONNECTED" => self.import_fully_connected(record),
            "SOFTMAX" => self.import_softmax(record),
            _ => self.import_canonical(record),
        }
    }

    // ----- operands and parameters --------------------------------------------------------

    fn input(&mut self, record: &OperatorRecord, index: usize) -> ImportResult<DeferredValue> {
        self.optional_input(record, index)?.ok_or_else(|| ImportError::MissingInput {
            opcode: record.opcode.clone(),
            index,
        })
    }

    fn optional_input(&mut self, record: &OperatorRecord, index: usize) -> ImportResult<Option<DeferredValue>> {
        match record.inputs.get(index) {
            Some(Some(name)) if !name.is_empty() => self.lookup(name).map(Some),
            _ => Ok(None),
        }
    }

    fn canonical_input(&mut self, record: &OperatorRecord, index: usize) -> ImportResult<NodeId> {
        let value = self.input(record, index)?;
        Ok(self.canonical(&value))
    }

    /// Integer contents of a constant operand.
    fn constant_ints(&self, record: &OperatorRecord, index: usize) -> ImportResult<Vec<i64>> {
        let name = match record.inputs.get(index) {
            Some(Some(name)) => name,
            _ => {
                return Err(ImportError::MissingInput {
                    opcode: record.opcode.clone(),
                    index,
                })
            }
        };
        let info = self.tensor_info(name)?;
        info.data
            .as_ref()
            .map(|values| values.iter().map(|v| *v as i64).collect())
            .ok_or_else(|| ImportError::unsupported_parameter(&record.opcode, name, "must be a constant tensor"))
    }

    fn param<'r>(record: &'r OperatorRecord, key: &str) -> Option<&'r Value> {
        record.params.get(key)
    }

    fn param_i64(record: &OperatorRecord, key: &str, default: i64) -> ImportResult<i64> {
        match Self::param(record, key) {
            None => Ok(default),
            Some(value) => value
                .as_i64()
                .ok_or_else(|| ImportError::unsupported_parameter(&record.opcode, key, format!("expected an integer, found {value}"))),
        }
    }

    fn param_f64(record: &OperatorRecord, key: &str, default: f64) -> ImportResult<f64> {
        match Self::param(record, key) {
            None => Ok(default),
            Some(value) => value
                .as_f64()
                .ok_or_else(|| ImportError::unsupported_parameter(&record.opcode, key, format!("expected a number, found {value}"))),
        }
    }

    fn param_bool(record: &OperatorRecord, key: &str, default: bool) -> ImportResult<bool> {
        match Self::param(record, key) {
            None => Ok(default),
            Some(value) => value
                .as_bool()
                .ok_or_else(|| ImportError::unsupported_parameter(&record.opcode, key, format!("expected a boolean, found {value}"))),
        }
    }

    fn param_str<'r>(record: &'r OperatorRecord, key: &str, default: &'r str) -> ImportResult<&'r str> {
        match Self::param(record, key) {
            None => Ok(default),
            Some(value) => value
                .as_str()
                .ok_or_else(|| ImportError::unsupported_parameter(&record.opcode, key, format!("expected a string, found {value}"))),
        }
    }

    fn param_ints(record: &OperatorRecord, key: &str) -> ImportResult<Option<Vec<i64>>> {
        let Some(value) = Self::param(record, key) else {
            return Ok(None);
        };
        value
            .as_array()
            .and_then(|items| items.iter().map(Value::as_i64).collect::<Option<Vec<_>>>())
            .map(Some)
            .ok_or_else(|| ImportError::unsupported_parameter(&record.opcode, key, format!("expected integers, found {value}")))
    }

    // ----- propagation rules --------------------------------------------------------------

    /// Elementwise unary operators commute with any transpose.
    fn unary(&mut self, op: Op, literals: Vec<Argument>, x: DeferredValue) -> DeferredValue {
        let mut args = vec![Argument::Node(x.node)];
        args.extend(literals);
        let node = self.graph.create_operation(op, args);
        DeferredValue::new(node, x.permutation, false)
    }

    fn fused_activation(&mut self, record: &OperatorRecord, value: DeferredValue) -> ImportResult<DeferredValue> {
        let name = Self::param_str(record, "fused_activation_function", "NONE")?;
        Ok(match name {
            "NONE" => value,
            "RELU" => self.unary(Op::Relu, vec![], value),
            "RELU6" => self.unary(Op::Clip, vec![Argument::Float(0.0), Argument::Float(6.0)], value),
            "RELU_N1_TO_1" => self.unary(Op::Clip, vec![Argument::Float(-1.0), Argument::Float(1.0)], value),
            "TANH" => self.unary(Op::Tanh, vec![], value),
            other => {
                return Err(ImportError::unsupported_parameter(
                    &record.opcode,
                    "fused_activation_function",
                    format!("{other} is not supported"),
                ))
            }
        })
    }

    /// Re-expresses a canonical constant of rank at most `permutation.rank()` in the
    /// permuted layout, unsqueezing leading axes first.
    fn permute_constant(&mut self, constant: DeferredValue, permutation: &Permutation) -> DeferredValue {
        let rank = permutation.rank();
        let mut node = constant.node;
        let missing = rank.saturating_sub(constant.rank());
        if missing > 0 {
            let axes = (0..missing as i64).collect();
            node = self
                .graph
                .create_operation(Op::Unsqueeze, vec![Argument::Node(node), Argument::Ints(axes)]);
        }
        let widened = DeferredValue::canonical(node, rank, true);
        let node = get_canonical_value(&mut self.graph, &widened, permutation);
        DeferredValue::new(node, *permutation, true)
    }

    fn broadcast_binary(&mut self, op: Op, a: DeferredValue, b: DeferredValue) -> DeferredValue {
        let (a, b, permutation) = match (a.is_constant, b.is_constant) {
            (false, false) if a.permutation == b.permutation => (a, b, a.permutation),
            (false, true) if !a.is_canonical() && b.rank() <= a.rank() && b.is_canonical() => {
                let b = self.permute_constant(b, &a.permutation);
                (a, b, a.permutation)
            }
            (true, false) if !b.is_canonical() && a.rank() <= b.rank() && a.is_canonical() => {
                let a = self.permute_constant(a, &b.permutation);
                (a, b, b.permutation)
            }
            _ => {
                let rank = a.rank().max(b.rank());
                let a = DeferredValue::canonical(self.canonical(&a), a.rank(), a.is_constant);
                let b = DeferredValue::canonical(self.canonical(&b), b.rank(), b.is_constant);
                (a, b, Permutation::identity(rank))
            }
        };
        let node = self
            .graph
            .create_operation(op, vec![Argument::Node(a.node), Argument::Node(b.node)]);
        DeferredValue::new(node, permutation, a.is_constant && b.is_constant)
    }

    fn import_reduction(&mut self, record: &OperatorRecord, op: Op, boolean: bool) -> ImportResult<()> {
        let x = self.input(record, 0)?;
        let axes = self.constant_ints(record, 1)?;
        let keepdims = Self::param_bool(record, "keep_dims", false)?;
        let rank = x.rank();
        let axes = axes
            .iter()
            .map(|a| normalize_axis(record, *a, rank))
            .collect::<ImportResult<Vec<_>>>()?;

        let (source, axes, permutation) = if keepdims {
            let remapped = axes.iter().map(|a| x.permutation.remap_axis(*a) as i64).collect();
            (x.node, remapped, x.permutation)
        } else {
            let node = self.canonical(&x);
            let out_rank = rank.saturating_sub(axes.len());
            (node, axes.iter().map(|a| *a as i64).collect(), Permutation::identity(out_rank))
        };
        let mut node = self.graph.create_operation(
            op,
            vec![Argument::Node(source), Argument::Ints(axes), Argument::Bool(keepdims)],
        );
        if boolean {
            node = self.graph.create_operation(
                Op::Clip,
                vec![Argument::Node(node), Argument::Float(0.0), Argument::Float(1.0)],
            );
        }
        self.define(record, 0, DeferredValue::new(node, permutation, false))
    }

    fn import_concat(&mut self, record: &OperatorRecord) -> ImportResult<()> {
        let values = (0..record.inputs.len())
            .map(|i| self.input(record, i))
            .collect::<ImportResult<Vec<_>>>()?;
        let Some(first) = values.first() else {
            return Err(ImportError::MissingInput {
                opcode: record.opcode.clone(),
                index: 0,
            });
        };
        let rank = first.rank();
        let axis = normalize_axis(record, Self::param_i64(record, "axis", 0)?, rank)?;

        let mut permutations = values.iter().filter(|v| !v.is_constant).map(|v| v.permutation);
        let shared = permutations
            .next()
            .filter(|p| !p.is_identity() && permutations.all(|q| q == *p));
        let constants_fit = values
            .iter()
            .all(|v| !v.is_constant || (v.is_canonical() && v.rank() == rank));

        let (nodes, permutation, axis) = match shared {
            Some(permutation) if constants_fit => {
                let mut nodes = Vec::with_capacity(values.len());
                for value in &values {
                    let node = if value.is_constant {
                        self.permute_constant(*value, &permutation).node
                    } else {
                        value.node
                    };
                    nodes.push(node);
                }
                (nodes, permutation, permutation.remap_axis(axis))
            }
            _ => {
                let nodes = values.iter().map(|v| self.canonical(v)).collect();
                (nodes, Permutation::identity(rank), axis)
            }
        };
        let node = self
            .graph
            .create_operation(Op::Concat, vec![Argument::Nodes(nodes), Argument::Int(axis as i64)]);
        let y = DeferredValue::new(node, permutation, false);
        let y = self.fused_activation(record, y)?;
        self.define(record, 0, y)
    }

    fn import_transpose(&mut self, record: &OperatorRecord) -> ImportResult<()> {
        let x = self.input(record, 0)?;
        let perm = self.constant_ints(record, 1)?;
        let requested = Permutation::from_i64s(&perm)
            .filter(|p| p.rank() == x.rank())
            .ok_or_else(|| ImportError::unsupported_parameter(&record.opcode, "perm", format!("{perm:?} is not a permutation of rank {}", x.rank())))?;
        let node = get_canonical_value(&mut self.graph, &x, &requested);
        let value = DeferredValue::canonical(node, requested.rank(), x.is_constant);
        self.define(record, 0, value)
    }

    // ----- layout-bound operators ---------------------------------------------------------

    fn spatial_extents(&self, record: &OperatorRecord, input: NodeId) -> ImportResult<[usize; 2]> {
        let shape = &self.graph.descriptor(input).shape;
        match (shape.rank(), shape.dim(2), shape.dim(3)) {
            (Some(4), Dim::Static(h), Dim::Static(w)) => Ok([h, w]),
            _ => Err(ImportError::unsupported_parameter(
                &record.opcode,
                "padding",
                "SAME padding needs static spatial extents",
            )),
        }
    }

    /// Pads as `[top, left, bottom, right]`.
    fn padding(
        &self,
        record: &OperatorRecord,
        input: NodeId,
        kernel: [usize; 2],
        strides: [usize; 2],
        dilations: [usize; 2],
    ) -> ImportResult<Vec<i64>> {
        match Self::param_str(record, "padding", "VALID")? {
            "VALID" => Ok(vec![0; 4]),
            "SAME" => {
                let extents = self.spatial_extents(record, input)?;
                let mut begin = [0i64; 2];
                let mut end = [0i64; 2];
                for axis in 0..2 {
                    let out = extents[axis].div_ceil(strides[axis]);
                    let effective = kernel[axis].saturating_sub(1) * dilations[axis] + 1;
                    let needed = ((out.max(1) - 1) * strides[axis] + effective).saturating_sub(extents[axis]) as i64;
                    begin[axis] = needed / 2;
                    end[axis] = needed - needed / 2;
                }
                Ok(vec![begin[0], begin[1], end[0], end[1]])
            }
            other => Err(ImportError::unsupported_parameter(
                &record.opcode,
                "padding",
                format!("{other} is not supported"),
            )),
        }
    }

    fn pair(record: &OperatorRecord, first: &str, second: &str) -> ImportResult<[usize; 2]> {
        let a = Self::param_i64(record, first, 1)?;
        let b = Self::param_i64(record, second, 1)?;
        if a < 1 || b < 1 {
            return Err(ImportError::unsupported_parameter(
                &record.opcode,
                first,
                format!("{first}={a}, {second}={b} must be positive"),
            ));
        }
        Ok([a as usize, b as usize])
    }

    /// Activation a convolution can carry itself; anything else is emitted after it.
    fn layer_activation(record: &OperatorRecord) -> ImportResult<Option<&'static str>> {
        Ok(match Self::param_str(record, "fused_activation_function", "NONE")? {
            "NONE" => Some("none"),
            "RELU" => Some("relu"),
            "RELU6" => Some("relu6"),
            _ => None,
        })
    }

    fn import_conv(&mut self, record: &OperatorRecord) -> ImportResult<()> {
        let depthwise = record.opcode == "DEPTHWISE_CONV_2D";
        let x = self.input(record, 0)?;
        if x.rank() != 4 {
            return Err(ImportError::unsupported_parameter(&record.opcode, "input", "expected a rank-4 NHWC tensor"));
        }
        let filter = self.input(record, 1)?;
        if filter.rank() != 4 {
            return Err(ImportError::unsupported_parameter(&record.opcode, "filter", "expected a rank-4 filter"));
        }
        let bias = self.optional_input(record, 2)?;

        let input = get_canonical_value(&mut self.graph, &x, &channels_first());
        // OHWI -> OIHW
        let filter_perm = fixed(if depthwise { &DEPTHWISE_FILTER } else { &CHANNELS_FIRST });
        let weight = get_canonical_value(&mut self.graph, &filter, &filter_perm);
        let bias = match bias {
            Some(b) => Argument::Node(self.canonical(&b)),
            None => Argument::None,
        };

        let kernel = match self.graph.descriptor(weight).static_shape() {
            Some(shape) if shape.len() == 4 => [shape[2], shape[3]],
            _ => {
                return Err(ImportError::unsupported_parameter(&record.opcode, "filter", "needs a static rank-4 shape"));
            }
        };
        let strides = Self::pair(record, "stride_h", "stride_w")?;
        let dilations = Self::pair(record, "dilation_h_factor", "dilation_w_factor")?;
        let pads = self.padding(record, input, kernel, strides, dilations)?;
        let group = if depthwise {
            match self.graph.descriptor(input).shape.dim(1) {
                Dim::Static(c) => c as i64,
                _ => {
                    return Err(ImportError::unsupported_parameter(&record.opcode, "input", "depthwise convolution needs a static channel count"));
                }
            }
        } else {
            1
        };
        let activation = Self::layer_activation(record)?;

        let node = self.graph.create_operation(
            Op::Conv,
            vec![
                Argument::Node(input),
                Argument::Node(weight),
                bias,
                Argument::Ints(strides.iter().map(|s| *s as i64).collect()),
                Argument::Ints(pads),
                Argument::Ints(dilations.iter().map(|d| *d as i64).collect()),
                Argument::Int(group),
                Argument::str(activation.unwrap_or("none")),
            ],
        );
        let y = DeferredValue::new(node, channels_first(), false);
        let y = match activation {
            Some(_) => y,
            None => self.fused_activation(record, y)?,
        };
        self.define(record, 0, y)
    }

    fn import_pool(&mut self, record: &OperatorRecord) -> ImportResult<()> {
        let op = if record.opcode == "MAX_POOL_2D" {
            Op::MaxPool
        } else {
            Op::AveragePool
        };
        let x = self.input(record, 0)?;
        if x.rank() != 4 {
            return Err(ImportError::unsupported_parameter(&record.opcode, "input", "expected a rank-4 NHWC tensor"));
        }
        let input = get_canonical_value(&mut self.graph, &x, &channels_first());
        let kernel = Self::pair(record, "filter_height", "filter_width")?;
        let strides = Self::pair(record, "stride_h", "stride_w")?;
        let pads = self.padding(record, input, kernel, strides, [1, 1])?;
        let to_ints = |v: [usize; 2]| Argument::Ints(v.iter().map(|x| *x as i64).collect());
        let node = self.graph.create_operation(
            op,
            vec![Argument::Node(input), to_ints(kernel), to_ints(strides), Argument::Ints(pads)],
        );
        let y = DeferredValue::new(node, channels_first(), false);
        let y = self.fused_activation(record, y)?;
        self.define(record, 0, y)
    }

    fn import_fully_connected(&mut self, record: &OperatorRecord) -> ImportResult<()> {
        let mut input = self.canonical_input(record, 0)?;
        let weights = self.input(record, 1)?;
        if weights.rank() != 2 {
            return Err(ImportError::unsupported_parameter(&record.opcode, "weights", "expected a rank-2 [N, K] matrix"));
        }
        let bias = self.optional_input(record, 2)?;
        let keep_num_dims = Self::param_bool(record, "keep_num_dims", false)?;

        // [N, K] -> [K, N]
        let weight = get_canonical_value(&mut self.graph, &weights, &fixed(&SWAP));
        let depth = self.graph.descriptor(weight).shape.dim(0);
        let rank = self.graph.descriptor(input).rank();
        if !keep_num_dims && rank != Some(2) {
            let Dim::Static(depth) = depth else {
                return Err(ImportError::unsupported_parameter(&record.opcode, "weights", "needs a static input depth"));
            };
            let shape = self
                .graph
                .add_constant("fc_shape", ConstantTensor::from_i64(vec![2], vec![-1, depth as i64]));
            input = self.graph.create_operation(
                Op::Reshape,
                vec![Argument::Node(input), Argument::Node(shape), Argument::Bool(false)],
            );
        }
        let bias = match bias {
            Some(b) => Argument::Node(self.canonical(&b)),
            None => Argument::None,
        };
        let activation = Self::layer_activation(record)?;
        let node = self.graph.create_operation(
            Op::Dense,
            vec![
                Argument::Node(input),
                Argument::Node(weight),
                bias,
                Argument::str(activation.unwrap_or("none")),
            ],
        );
        let y = self.canonical_value(node, false);
        let y = match activation {
            Some(_) => y,
            None => self.fused_activation(record, y)?,
        };
        self.define(record, 0, y)
    }

    fn import_softmax(&mut self, record: &OperatorRecord) -> ImportResult<()> {
        let mut input = self.canonical_input(record, 0)?;
        let beta = Self::param_f64(record, "beta", 1.0)?;
        if beta != 1.0 {
            input = self.graph.create_operation(
                Op::ScalarMad,
                vec![Argument::Node(input), Argument::Float(beta), Argument::Float(0.0)],
            );
        }
        let node = self
            .graph
            .create_operation(Op::Softmax, vec![Argument::Node(input), Argument::Int(-1)]);
        let y = self.canonical_value(node, false);
        self.define(record, 0, y)
    }

    /// Operators without a layout rule: every operand is brought to the model's layout.
    fn import_canonical(&mut self, record: &OperatorRecord) -> ImportResult<()> {
        let opcode = record.opcode.as_str();
        let node = match opcode {
            "RESHAPE" => {
                let x = self.canonical_input(record, 0)?;
                let shape = match self.optional_input(record, 1)? {
                    Some(shape) => self.canonical(&shape),
                    None => {
                        let dims = Self::param_ints(record, "new_shape")?
                            .ok_or_else(|| ImportError::MissingInput { opcode: record.opcode.clone(), index: 1 })?;
                        self.graph
                            .add_constant("reshape_shape", ConstantTensor::from_i64(vec![dims.len()], dims))
                    }
                };
                self.graph.create_operation(
                    Op::Reshape,
                    vec![Argument::Node(x), Argument::Node(shape), Argument::Bool(false)],
                )
            }
            "BATCH_MATMUL" => {
                let a = self.canonical_input(record, 0)?;
                let b = self.canonical_input(record, 1)?;
                self.graph
                    .create_operation(Op::MatMul, vec![Argument::Node(a), Argument::Node(b)])
            }
            "SQUEEZE" => {
                let x = self.canonical_input(record, 0)?;
                let axes = Self::param_ints(record, "squeeze_dims")?.unwrap_or_default();
                self.graph
                    .create_operation(Op::Squeeze, vec![Argument::Node(x), Argument::Ints(axes)])
            }
            "EXPAND_DIMS" => {
                let x = self.canonical_input(record, 0)?;
                let axes = self.constant_ints(record, 1)?;
                self.graph
                    .create_operation(Op::Unsqueeze, vec![Argument::Node(x), Argument::Ints(axes)])
            }
            "GATHER" => {
                let x = self.canonical_input(record, 0)?;
                let indices = self.canonical_input(record, 1)?;
                let axis = Self::param_i64(record, "axis", 0)?;
                self.graph.create_operation(
                    Op::Gather,
                    vec![Argument::Node(x), Argument::Node(indices), Argument::Int(axis)],
                )
            }
            "SHAPE" => {
                let x = self.canonical_input(record, 0)?;
                self.graph.create_operation(Op::Shape, vec![Argument::Node(x)])
            }
            "TILE" | "BROADCAST_TO" => {
                let op = if opcode == "TILE" { Op::Tile } else { Op::Expand };
                let x = self.canonical_input(record, 0)?;
                let arg = self.canonical_input(record, 1)?;
                self.graph
                    .create_operation(op, vec![Argument::Node(x), Argument::Node(arg)])
            }
            "SPLIT" => return self.import_split(record),
            _ => {
                return Err(ImportError::UnsupportedOperator {
                    opcode: record.opcode.clone(),
                    reason: "no translation into the graph IR".to_string(),
                })
            }
        };
        let y = self.canonical_value(node, false);
        self.define(record, 0, y)
    }

    /// `SPLIT(axis, x)` into equal parts, one `extract` per result.
    fn import_split(&mut self, record: &OperatorRecord) -> ImportResult<()> {
        let axis = self.constant_ints(record, 0)?;
        let x = self.canonical_input(record, 1)?;
        let parts = Self::param_i64(record, "num_splits", record.outputs.len() as i64)?;
        let rank = self.graph.descriptor(x).rank().unwrap_or(0);
        let axis = normalize_axis(record, axis.first().copied().unwrap_or(0), rank)?;
        let extent = match self.graph.descriptor(x).shape.dim(axis) {
            Dim::Static(extent) if parts > 0 && extent % parts as usize == 0 => extent,
            _ => {
                return Err(ImportError::unsupported_parameter(
                    &record.opcode,
                    "num_splits",
                    format!("{parts} parts need a static, divisible axis"),
                ))
            }
        };
        let size = (extent / parts as usize) as i64;
        let tuple = self.graph.create_operation(
            Op::Split,
            vec![
                Argument::Node(x),
                Argument::Int(axis as i64),
                Argument::Ints(vec![size; parts as usize]),
            ],
        );
        for index in 0..record.outputs.len().min(parts as usize) {
            let part = self
                .graph
                .create_operation(Op::Extract, vec![Argument::Node(tuple), Argument::Int(index as i64)]);
            let value = self.canonical_value(part, false);
            self.define(record, index, value)?;
        }
        Ok(())
    }
}
