use std::collections::HashMap;

use crate::hashing::StructuralKey;
use crate::ir::{Argument, ConstantTensor, Graph, InsertPoint, NodeId, NodeKind, Op, PartialTensor};
use crate::optimizer::{GraphPass, OptimizeContext, PassResult};

use super::util::is_seedless_random;

/// Replaces every computable operation by a Constant holding its result.
///
/// Operations whose operands are all known run through the numeric backend; the rest get
/// their descriptors recomputed, and become foldable when the descriptor turns out fully
/// known (for example `shape` of a statically shaped input).
#[derive(Default)]
pub struct ConstantFoldingPass;

impl ConstantFoldingPass {
    const NAME: &'static str = "constant-folding";
}

fn lookup(graph: &Graph, folded: &HashMap<NodeId, Vec<ConstantTensor>>, id: NodeId) -> Option<ConstantTensor> {
    if let Some(value) = graph.constant_value(id) {
        return Some(value.clone());
    }
    folded.get(&id).and_then(|outs| outs.first()).cloned()
}

impl GraphPass for ConstantFoldingPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut Graph, cx: &mut OptimizeContext) -> PassResult {
        let mut folded: HashMap<NodeId, Vec<ConstantTensor>> = HashMap::new();
        let order = graph.order().to_vec();
        let limit = cx.config().fold_max_elements;

        for &id in &order {
            let NodeKind::Operation { op, args } = graph.kind(id) else {
                continue;
            };
            let (op, args) = (*op, args.clone());
            if is_seedless_random(op, &args) {
                continue;
            }

            if op == Op::Extract {
                let tuple = args.first().and_then(Argument::as_node);
                let index = args.get(1).and_then(Argument::as_int);
                if let (Some(tuple), Some(index)) = (tuple, index) {
                    let element = folded
                        .get(&tuple)
                        .and_then(|outs| outs.get(index as usize))
                        .cloned();
                    if let Some(element) = element {
                        graph.set_descriptor(id, PartialTensor::from_constant(&element));
                        folded.insert(id, vec![element]);
                    }
                }
                continue;
            }

            let operands = Argument::flatten(&args);
            let values: Option<Vec<ConstantTensor>> =
                operands.iter().map(|o| lookup(graph, &folded, *o)).collect();
            let within_limit = graph
                .descriptor(id)
                .shape
                .element_count()
                .map_or(true, |count| count <= limit);

            if let (Some(values), true) = (values, within_limit) {
                let key = StructuralKey::of(&(op, &args))
                    .map(|k| k.fingerprint)
                    .unwrap_or_default();
                if !cx.is_failed_fold_key(key) {
                    match cx.backend().execute(op, &values, &args) {
                        Ok(outputs) if !outputs.is_empty() => {
                            let descriptors = outputs.iter().map(PartialTensor::from_constant).collect();
                            graph.set_descriptors(id, descriptors);
                            folded.insert(id, outputs);
                            continue;
                        }
                        Ok(_) => {}
                        Err(err) => {
                            log::debug!("leaving {op} at {id} unfolded: {err}");
                            cx.record_failed_fold_key(key);
                        }
                    }
                }
            }

            let descriptors = {
                let owned: Vec<PartialTensor> = operands
                    .iter()
                    .map(|o| match folded.get(o).and_then(|outs| outs.first()) {
                        Some(value) => PartialTensor::from_constant(value),
                        None => graph.descriptor(*o).clone(),
                    })
                    .collect();
                let refs: Vec<&PartialTensor> = owned.iter().collect();
                cx.inference().infer(op, &refs, &args)
            };
            if descriptors.is_empty() {
                continue;
            }
            let value = (descriptors.len() == 1)
                .then(|| descriptors[0].value.clone())
                .flatten();
            graph.set_descriptors(id, descriptors);
            if let Some(value) = value {
                folded.insert(id, vec![value]);
            }
        }

        let mut replaced = 0;
        for &id in &order {
            if !graph.is_live(id) || graph.users(id).is_empty() {
                continue;
            }
            let Some(op) = graph.op(id) else {
                continue;
            };
            if op == Op::Split {
                continue;
            }
            let Some(value) = folded.get(&id).and_then(|outs| outs.first()).cloned() else {
                continue;
            };
            let constant = graph.with_insertion(InsertPoint::Before(id), |g| g.add_constant("folded", value));
            graph.replace_all_uses_with(id, constant);
            graph.erase(id);
            log::debug!("folded {op} at {id} into {constant}");
            replaced += 1;
        }

        let erased = graph.eliminate_dead_code();
        PassResult {
            changed: replaced > 0 || erased > 0,
            iterations: 1,
            rewrites_applied: replaced,
            erased_nodes: replaced + erased,
        }
    }
}
