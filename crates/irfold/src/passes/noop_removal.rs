use std::collections::HashSet;

use crate::ir::{Argument, Graph, InsertPoint, NodeId, Op};
use crate::optimizer::{GraphPass, OptimizeContext, PassResult};

/// Bypasses `identity` operations and gives every exported result its own producer.
///
/// Operation users of an identity read its source directly. In the Output, the first result
/// computed by a node exports that node; every further result computed by the same node,
/// and every result that would export a graph input, exports a dedicated `identity` copy.
#[derive(Default)]
pub struct NoOpRemovalPass;

impl NoOpRemovalPass {
    const NAME: &'static str = "noop-removal";
}

fn identity_source(graph: &Graph, node: NodeId) -> Option<NodeId> {
    (graph.op(node)? == Op::Identity)
        .then(|| graph.operand(node, 0))
        .flatten()
}

fn bypass_identities(graph: &mut Graph) -> usize {
    let output = graph.output_node();
    let mut redirected = 0;
    for id in graph.order().to_vec() {
        if !graph.is_live(id) {
            continue;
        }
        let Some(source) = identity_source(graph, id) else {
            continue;
        };
        let users: Vec<NodeId> = graph.users(id).iter().copied().filter(|u| *u != output).collect();
        for user in users {
            let mut args = graph.args(user).to_vec();
            for arg in args.iter_mut() {
                arg.map_nodes(&mut |n| if n == id { source } else { n });
            }
            graph.set_args(user, args);
            redirected += 1;
        }
    }
    redirected
}

fn separate_outputs(graph: &mut Graph) -> usize {
    let mut claimed: HashSet<NodeId> = HashSet::new();
    let mut copies: HashSet<NodeId> = HashSet::new();
    let mut edits = 0;
    for index in 0..graph.outputs().len() {
        let result = graph.outputs()[index].1;
        let base = identity_source(graph, result).unwrap_or(result);
        let needs_copy = graph.is_input(base) || claimed.contains(&base);
        claimed.insert(base);

        if !needs_copy {
            if result != base {
                graph.set_output_result(index, base);
                edits += 1;
            }
            continue;
        }
        if result != base && copies.insert(result) {
            continue;
        }
        let copy = graph.with_insertion(InsertPoint::End, |g| {
            g.create_operation(Op::Identity, vec![Argument::Node(base)])
        });
        copies.insert(copy);
        graph.set_output_result(index, copy);
        edits += 1;
    }
    edits
}

impl GraphPass for NoOpRemovalPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut Graph, _cx: &mut OptimizeContext) -> PassResult {
        let redirected = bypass_identities(graph);
        let edits = separate_outputs(graph);
        let erased = if redirected + edits > 0 {
            graph.eliminate_dead_code()
        } else {
            0
        };
        PassResult {
            changed: redirected + edits + erased > 0,
            iterations: 1,
            rewrites_applied: redirected + edits,
            erased_nodes: erased,
        }
    }
}
