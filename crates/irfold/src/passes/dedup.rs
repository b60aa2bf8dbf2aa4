use std::collections::HashMap;

use crate::hashing::StructuralKey;
use crate::ir::{Argument, Graph, NodeId, NodeKind, Op};
use crate::optimizer::{GraphPass, OptimizeContext, PassResult};

use super::util::is_seedless_random;

/// Merges structurally identical operations and equal integer constants.
///
/// Buckets are keyed by fingerprint and every candidate is compared in full before it is
/// merged. All redirections are applied together once the scan is complete.
#[derive(Default)]
pub struct DuplicateEliminationPass;

impl DuplicateEliminationPass {
    const NAME: &'static str = "dedup";
}

fn resolve(remap: &HashMap<NodeId, NodeId>, mut id: NodeId) -> NodeId {
    while let Some(next) = remap.get(&id) {
        id = *next;
    }
    id
}

fn canonical_constants(graph: &Graph, order: &[NodeId], remap: &mut HashMap<NodeId, NodeId>) {
    let mut buckets: HashMap<u64, Vec<NodeId>> = HashMap::new();
    for &id in order {
        let Some(value) = graph.constant_value(id) else {
            continue;
        };
        if value.dtype().is_float() {
            continue;
        }
        let Ok(key) = StructuralKey::of(value) else {
            continue;
        };
        let bucket = buckets.entry(key.fingerprint).or_default();
        match bucket.iter().find(|c| graph.constant_value(**c) == Some(value)) {
            Some(&survivor) => {
                remap.insert(id, survivor);
            }
            None => bucket.push(id),
        }
    }
}

fn canonical_operations(graph: &Graph, order: &[NodeId], remap: &mut HashMap<NodeId, NodeId>) {
    let mut buckets: HashMap<u64, Vec<(NodeId, Op, Vec<Argument>)>> = HashMap::new();
    for &id in order {
        let NodeKind::Operation { op, args } = graph.kind(id) else {
            continue;
        };
        if is_seedless_random(*op, args) {
            continue;
        }
        let mut remapped = args.clone();
        for arg in remapped.iter_mut() {
            arg.map_nodes(&mut |n| resolve(remap, n));
        }
        let Ok(key) = StructuralKey::of(&(op, &remapped)) else {
            continue;
        };
        let bucket = buckets.entry(key.fingerprint).or_default();
        let survivor = bucket
            .iter()
            .find(|(_, other_op, other_args)| other_op == op && *other_args == remapped)
            .map(|(survivor, _, _)| *survivor);
        match survivor {
            Some(survivor) => {
                remap.insert(id, survivor);
            }
            None => bucket.push((id, *op, remapped)),
        }
    }
}

impl GraphPass for DuplicateEliminationPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut Graph, _cx: &mut OptimizeContext) -> PassResult {
        let order = graph.order().to_vec();
        let mut remap = HashMap::new();
        canonical_constants(graph, &order, &mut remap);
        canonical_operations(graph, &order, &mut remap);
        if remap.is_empty() {
            return PassResult::unchanged();
        }

        let duplicates: Vec<NodeId> = order.iter().copied().filter(|id| remap.contains_key(id)).collect();
        for &duplicate in &duplicates {
            let survivor = resolve(&remap, duplicate);
            log::debug!("{duplicate} duplicates {survivor}");
            graph.replace_all_uses_with(duplicate, survivor);
        }
        let mut erased = 0;
        for &duplicate in duplicates.iter().rev() {
            if graph.users(duplicate).is_empty() {
                graph.erase(duplicate);
                erased += 1;
            }
        }
        graph.prune_attributes();

        PassResult {
            changed: true,
            iterations: 1,
            rewrites_applied: duplicates.len(),
            erased_nodes: erased,
        }
    }
}
