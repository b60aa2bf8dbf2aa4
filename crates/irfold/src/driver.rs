//! Worklist engine behind the contraction pass: every live operation is offered to the
//! contraction rules anchored at its op until a full sweep fires nothing.

use std::collections::{HashMap, VecDeque};

use crate::backend::NumericBackend;
use crate::ir::{Graph, NodeId, Op};

/// One contraction rule, such as `x * 1 -> x` or a reshape of a reshape.
pub trait NodeRewrite: Send + Sync {
    fn name(&self) -> &'static str;

    /// Ops whose nodes the rule inspects.
    fn root_ops(&self) -> &'static [Op];

    /// Returns `true` after splicing a simpler equivalent in place of `node`; returns
    /// `false` with the graph untouched when the rule does not apply.
    fn match_and_rewrite(&self, graph: &mut Graph, node: NodeId, backend: &dyn NumericBackend) -> bool;
}

/// Contraction rules in priority order; the first rule that fires on a node wins.
#[derive(Default)]
pub struct RewriteSet {
    rules: Vec<Box<dyn NodeRewrite>>,
}

impl RewriteSet {
    pub fn new(rules: Vec<Box<dyn NodeRewrite>>) -> Self {
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn matching(&self, op: Op) -> impl Iterator<Item = (usize, &dyn NodeRewrite)> {
        self.rules
            .iter()
            .enumerate()
            .filter(move |(_, rule)| rule.root_ops().contains(&op))
            .map(|(idx, rule)| (idx, rule.as_ref()))
    }
}

/// Bounds on one sweep: a cap on fired rules and whether unreachable nodes are
/// swept afterwards.
#[derive(Debug, Clone)]
pub struct GreedyConfig {
    pub max_iterations: usize,
    pub enable_dce: bool,
}

impl Default for GreedyConfig {
    fn default() -> Self {
        Self {
            max_iterations: usize::MAX,
            enable_dce: true,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GreedyRewriteStats {
    pub iterations: usize,
    pub applied: usize,
    pub dce_removed: usize,
}

/// Offers each live operation to the rules anchored at its op, restarting from the
/// graph order after every successful contraction.
///
/// A (rule, node) pair that did not fire is skipped until `Graph::version` reports that
/// the node's arguments changed.
pub fn apply_rewrites_greedily(
    graph: &mut Graph,
    rules: &RewriteSet,
    backend: &dyn NumericBackend,
    cfg: &GreedyConfig,
) -> GreedyRewriteStats {
    if rules.is_empty() {
        return GreedyRewriteStats::default();
    }

    let mut worklist = VecDeque::new();
    seed_worklist(graph, &mut worklist);

    let mut failure_cache: HashMap<(usize, NodeId), u32> = HashMap::new();
    let mut stats = GreedyRewriteStats::default();

    while let Some(node) = worklist.pop_front() {
        if stats.iterations >= cfg.max_iterations {
            break;
        }
        if !graph.is_live(node) {
            continue;
        }
        let Some(op) = graph.op(node) else {
            continue;
        };
        let version = graph.version(node);

        for (idx, rule) in rules.matching(op) {
            if failure_cache.get(&(idx, node)).copied() == Some(version) {
                continue;
            }
            if rule.match_and_rewrite(graph, node, backend) {
                log::debug!("rewrite {} fired at {node} ({op})", rule.name());
                stats.applied += 1;
                stats.iterations = stats.iterations.saturating_add(1);
                failure_cache.retain(|(_, cached), _| *cached != node);
                seed_worklist(graph, &mut worklist);
                break;
            }
            failure_cache.insert((idx, node), version);
        }
    }

    if cfg.enable_dce {
        stats.dce_removed = graph.eliminate_dead_code();
    }

    stats
}

fn seed_worklist(graph: &Graph, worklist: &mut VecDeque<NodeId>) {
    worklist.clear();
    worklist.extend(graph.order().iter().copied());
}
