use crate::ir::{Argument, Graph, InsertPoint, NodeId, Op};
use crate::layout::Permutation;
use crate::optimizer::{GraphPass, OptimizeContext, PassResult};

/// Collapses chains of transposes into a single transpose.
#[derive(Default)]
pub struct TransposeChainPass;

impl TransposeChainPass {
    const NAME: &'static str = "transpose-chain";
}

fn transpose_parts(graph: &Graph, node: NodeId) -> Option<(NodeId, Permutation)> {
    if graph.op(node)? != Op::Transpose {
        return None;
    }
    let input = graph.operand(node, 0)?;
    let perm = Permutation::from_i64s(graph.arg(node, 1)?.as_ints()?)?;
    Some((input, perm))
}

impl GraphPass for TransposeChainPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut Graph, _cx: &mut OptimizeContext) -> PassResult {
        let order = graph.order().to_vec();
        let mut collapsed = 0usize;
        let mut erased = 0usize;

        for &outer in order.iter().rev() {
            if !graph.is_live(outer) {
                continue;
            }
            let Some((mut source, outer_perm)) = transpose_parts(graph, outer) else {
                continue;
            };

            // outermost first
            let mut chain = vec![(outer, outer_perm)];
            while let Some((input, perm)) = transpose_parts(graph, source) {
                if perm.rank() != chain[0].1.rank() {
                    break;
                }
                chain.push((source, perm));
                source = input;
            }
            if chain.len() < 2 {
                continue;
            }

            let mut combined = Permutation::identity(outer_perm.rank());
            for (_, perm) in chain.iter().rev() {
                combined = combined.compose(perm);
            }

            let replacement = graph.with_insertion(InsertPoint::Before(outer), |g| {
                g.create_operation(
                    Op::Transpose,
                    vec![Argument::Node(source), Argument::Ints(combined.to_i64s())],
                )
            });
            graph.replace_all_uses_with(outer, replacement);
            log::debug!(
                "collapsed {} transposes ending at {outer} into {replacement} with {combined:?}",
                chain.len()
            );
            for (member, _) in &chain {
                if !graph.users(*member).is_empty() {
                    break;
                }
                graph.erase(*member);
                erased += 1;
            }
            collapsed += 1;
        }

        PassResult {
            changed: collapsed > 0,
            iterations: 1,
            rewrites_applied: collapsed,
            erased_nodes: erased,
        }
    }
}
