use crate::backend::NumericBackend;
use crate::ir::{Argument, ConstantTensor, DType, Graph, InsertPoint, NodeId, Op};

/// Whether `op` draws fresh randomness on every execution.
pub(crate) fn is_seedless_random(op: Op, args: &[Argument]) -> bool {
    op.is_random() && args.get(3).map_or(true, Argument::is_none)
}

/// Redirects every use of `node` to `source` and erases `node`.
pub(crate) fn forward(graph: &mut Graph, node: NodeId, source: NodeId) -> bool {
    graph.replace_all_uses_with(node, source);
    if graph.users(node).is_empty() {
        graph.erase(node);
    }
    true
}

/// Replaces `node` by a new operation created right before it.
pub(crate) fn replace_with_op(graph: &mut Graph, node: NodeId, op: Op, args: Vec<Argument>) -> NodeId {
    let new = graph.with_insertion(InsertPoint::Before(node), |g| g.create_operation(op, args));
    forward(graph, node, new);
    new
}

pub(crate) fn constant_before(graph: &mut Graph, anchor: NodeId, hint: &str, tensor: ConstantTensor) -> NodeId {
    graph.with_insertion(InsertPoint::Before(anchor), |g| g.add_constant(hint, tensor))
}

pub(crate) fn is_float(graph: &Graph, node: NodeId) -> bool {
    graph.descriptor(node).dtype.is_some_and(DType::is_float)
}

/// Scalar held by a single-element float Constant whose rank does not exceed `max_rank`.
pub(crate) fn scalar_constant(graph: &Graph, node: NodeId, max_rank: usize) -> Option<f64> {
    let value = graph.constant_value(node)?;
    if value.rank() > max_rank || !value.dtype().is_float() {
        return None;
    }
    value.scalar_value()
}

/// Runs single-result operators on concrete tensors while combining fused constants.
pub(crate) struct Evaluator<'a> {
    backend: &'a dyn NumericBackend,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(backend: &'a dyn NumericBackend) -> Self {
        Self { backend }
    }

    pub(crate) fn run(&self, op: Op, inputs: &[&ConstantTensor], literals: &[Argument]) -> Option<ConstantTensor> {
        let mut args: Vec<Argument> = (0..inputs.len())
            .map(|i| Argument::Node(NodeId(i as u32)))
            .collect();
        args.extend_from_slice(literals);
        let owned: Vec<ConstantTensor> = inputs.iter().map(|t| (*t).clone()).collect();
        match self.backend.execute(op, &owned, &args) {
            Ok(mut outputs) if !outputs.is_empty() => Some(outputs.swap_remove(0)),
            Ok(_) => None,
            Err(err) => {
                log::debug!("{} could not evaluate {op}: {err}", self.backend.name());
                None
            }
        }
    }

    pub(crate) fn binary(&self, op: Op, a: &ConstantTensor, b: &ConstantTensor) -> Option<ConstantTensor> {
        self.run(op, &[a, b], &[])
    }

    pub(crate) fn unary(&self, op: Op, a: &ConstantTensor) -> Option<ConstantTensor> {
        self.run(op, &[a], &[])
    }

    pub(crate) fn scalar_mad(&self, a: &ConstantTensor, scale: f64, bias: f64) -> Option<ConstantTensor> {
        self.run(Op::ScalarMad, &[a], &[Argument::Float(scale), Argument::Float(bias)])
    }
}
