use std::collections::HashSet;

use crate::ir::{Graph, NodeId, NodeKind};
use crate::optimizer::{GraphPass, OptimizeContext, PassResult};

/// Mark-and-sweep from the Output node, followed by attribute pruning.
///
/// Inputs always survive; they are the graph's signature.
#[derive(Default)]
pub struct DeadCodeEliminationPass;

impl DeadCodeEliminationPass {
    const NAME: &'static str = "dce";
}

impl GraphPass for DeadCodeEliminationPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut Graph, _cx: &mut OptimizeContext) -> PassResult {
        let mut worklist: Vec<NodeId> = vec![graph.output_node()];
        let mut live: HashSet<NodeId> = HashSet::with_capacity(graph.live_count());
        while let Some(node) = worklist.pop() {
            if !live.insert(node) {
                continue;
            }
            worklist.extend(graph.node(node).operands());
        }

        let mut removed = 0;
        for id in graph.order().to_vec().into_iter().rev() {
            if live.contains(&id) || matches!(graph.kind(id), NodeKind::Input { .. }) {
                continue;
            }
            // every user of a dead node is dead and sits later in the order
            graph.erase(id);
            removed += 1;
        }
        let pruned = graph.prune_attributes();

        PassResult {
            changed: removed > 0 || pruned > 0,
            iterations: 0,
            rewrites_applied: 0,
            erased_nodes: removed,
        }
    }
}
