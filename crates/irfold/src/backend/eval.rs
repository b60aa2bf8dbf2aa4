use std::collections::{BTreeMap, HashMap};

use anyhow::{anyhow, bail, Context, Result};

use crate::ir::{Argument, ConstantTensor, Graph, NodeId, NodeKind, Op};

use super::NumericBackend;

/// Runs `graph` node by node through `backend`, returning the exported results in order.
///
/// Every graph input must be present in `feeds`.
pub fn evaluate(
    graph: &Graph,
    backend: &dyn NumericBackend,
    feeds: &BTreeMap<String, ConstantTensor>,
) -> Result<Vec<(String, ConstantTensor)>> {
    let mut values: HashMap<NodeId, Vec<ConstantTensor>> = HashMap::new();
    for &id in graph.order() {
        match graph.kind(id) {
            NodeKind::Input { name } => {
                let value = feeds
                    .get(name)
                    .ok_or_else(|| anyhow!("no feed provided for input {name:?}"))?;
                values.insert(id, vec![value.clone()]);
            }
            NodeKind::Constant { name } => {
                let value = graph
                    .constant_value(id)
                    .ok_or_else(|| anyhow!("constant {id} names missing attribute {name:?}"))?;
                values.insert(id, vec![value.clone()]);
            }
            NodeKind::Operation { op: Op::Extract, args } => {
                let tuple = args.first().and_then(Argument::as_node);
                let index = args.get(1).and_then(Argument::as_int);
                let (Some(tuple), Some(index)) = (tuple, index) else {
                    bail!("malformed extract at {id}");
                };
                let element = values
                    .get(&tuple)
                    .and_then(|outs| outs.get(index as usize))
                    .cloned()
                    .ok_or_else(|| anyhow!("extract {id} reads missing element {index} of {tuple}"))?;
                values.insert(id, vec![element]);
            }
            NodeKind::Operation { op, args } => {
                let inputs = Argument::flatten(args)
                    .into_iter()
                    .map(|operand| {
                        values
                            .get(&operand)
                            .and_then(|outs| outs.first())
                            .cloned()
                            .ok_or_else(|| anyhow!("{id} reads {operand} before it was computed"))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let outputs = backend
                    .execute(*op, &inputs, args)
                    .with_context(|| format!("executing {op} at {id} on {}", backend.name()))?;
                values.insert(id, outputs);
            }
            NodeKind::Output { results } => {
                return results
                    .iter()
                    .map(|(name, result)| {
                        let value = values
                            .get(result)
                            .and_then(|outs| outs.first())
                            .cloned()
                            .ok_or_else(|| anyhow!("output {name:?} was never computed"))?;
                        Ok((name.clone(), value))
                    })
                    .collect();
            }
        }
    }
    bail!("graph has no output node")
}
