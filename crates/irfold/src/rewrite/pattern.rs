use std::collections::BTreeMap;

use crate::ir::{Argument, Graph, InsertPoint, NodeId, NodeKind, Op};

/// Bindings from pattern nodes to the live nodes they matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    bindings: BTreeMap<NodeId, NodeId>,
    root: NodeId,
}

impl PatternMatch {
    /// Live node matched by the pattern's result operation.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Live node bound to `pattern_node`.
    pub fn get(&self, pattern_node: NodeId) -> Option<NodeId> {
        self.bindings.get(&pattern_node).copied()
    }

    pub fn bindings(&self) -> &BTreeMap<NodeId, NodeId> {
        &self.bindings
    }

    /// Live node bound to the placeholder called `name`.
    pub fn placeholder(&self, pattern: &Graph, name: &str) -> Option<NodeId> {
        let input = pattern
            .inputs()
            .iter()
            .copied()
            .find(|id| pattern.name(*id) == Some(name))?;
        self.get(input)
    }
}

/// Per-attempt match context; forked for each commutative operand order.
#[derive(Debug, Clone, Default)]
struct MatchState {
    bindings: BTreeMap<NodeId, NodeId>,
}

impl MatchState {
    fn bind(mut self, pattern_node: NodeId, live: NodeId) -> Self {
        self.bindings.insert(pattern_node, live);
        self
    }
}

fn pattern_root(pattern: &Graph) -> NodeId {
    let outputs = pattern.outputs();
    assert_eq!(
        outputs.len(),
        1,
        "a pattern must export exactly one result, found {}",
        outputs.len()
    );
    let root = outputs[0].1;
    assert!(
        pattern.op(root).is_some(),
        "a pattern result must be an operation, found {:?}",
        pattern.kind(root)
    );
    root
}

/// Aligns `pattern`'s result operation with `anchor`.
///
/// Literal arguments must be equal, placeholders bind on first use and must match the same
/// live node afterwards, and nested operations recurse. Commutative binary operators try
/// both operand orders; there is no other backtracking.
pub fn match_pattern(graph: &Graph, pattern: &Graph, anchor: NodeId) -> Option<PatternMatch> {
    let root = pattern_root(pattern);
    let state = match_node(graph, pattern, root, anchor, MatchState::default())?;
    Some(PatternMatch {
        bindings: state.bindings,
        root: anchor,
    })
}

fn match_node(
    graph: &Graph,
    pattern: &Graph,
    pnode: NodeId,
    live: NodeId,
    state: MatchState,
) -> Option<MatchState> {
    if !graph.is_live(live) {
        return None;
    }
    if let Some(bound) = state.bindings.get(&pnode) {
        return (*bound == live).then_some(state);
    }
    match pattern.kind(pnode) {
        NodeKind::Input { .. } => Some(state.bind(pnode, live)),
        NodeKind::Constant { .. } => {
            let expected = pattern.constant_value(pnode)?;
            let actual = graph.constant_value(live)?;
            (expected == actual).then(|| state.bind(pnode, live))
        }
        NodeKind::Operation { op, args } => {
            if graph.op(live) != Some(*op) {
                return None;
            }
            let live_args = graph.args(live);
            if live_args.len() != args.len() {
                return None;
            }
            let state = state.bind(pnode, live);
            if is_commutative_pair(*op, args) {
                let direct = match_args(graph, pattern, args, live_args, state.clone());
                if direct.is_some() {
                    return direct;
                }
                let swapped = [live_args[1].clone(), live_args[0].clone()];
                return match_args(graph, pattern, args, &swapped, state);
            }
            match_args(graph, pattern, args, live_args, state)
        }
        NodeKind::Output { .. } => panic!("pattern output {pnode} cannot be matched"),
    }
}

fn is_commutative_pair(op: Op, args: &[Argument]) -> bool {
    op.is_commutative()
        && args.len() == 2
        && args.iter().all(|a| matches!(a, Argument::Node(_)))
}

fn match_args(
    graph: &Graph,
    pattern: &Graph,
    pattern_args: &[Argument],
    live_args: &[Argument],
    state: MatchState,
) -> Option<MatchState> {
    pattern_args
        .iter()
        .zip(live_args)
        .try_fold(state, |state, (p, l)| match_arg(graph, pattern, p, l, state))
}

fn match_arg(
    graph: &Graph,
    pattern: &Graph,
    pattern_arg: &Argument,
    live_arg: &Argument,
    state: MatchState,
) -> Option<MatchState> {
    match (pattern_arg, live_arg) {
        (Argument::Node(p), Argument::Node(l)) => match_node(graph, pattern, *p, *l, state),
        (Argument::Nodes(ps), Argument::Nodes(ls)) => {
            if ps.len() != ls.len() {
                return None;
            }
            ps.iter()
                .zip(ls)
                .try_fold(state, |state, (p, l)| match_node(graph, pattern, *p, *l, state))
        }
        (Argument::List(ps), Argument::List(ls)) => {
            if ps.len() != ls.len() {
                return None;
            }
            match_args(graph, pattern, ps, ls, state)
        }
        (p, l) if p.node_count() == 0 && l.node_count() == 0 => (p == l).then_some(state),
        _ => None,
    }
}

/// Copies `replacement` into `graph` before the matched root and redirects the root's uses
/// to the replacement result. Only the root is erased; other matched nodes are left for
/// dead-code elimination.
///
/// Replacement inputs are resolved by name against `pattern`'s placeholders.
pub fn splice_replacement(
    graph: &mut Graph,
    pattern: &Graph,
    matched: &PatternMatch,
    replacement: &Graph,
) -> NodeId {
    let root = matched.root();
    let mut mapping: BTreeMap<NodeId, NodeId> = BTreeMap::new();
    let mut result = None;
    graph.with_insertion(InsertPoint::Before(root), |g| {
        for &id in replacement.order() {
            match replacement.kind(id) {
                NodeKind::Input { name } => {
                    let bound = matched.placeholder(pattern, name).unwrap_or_else(|| {
                        panic!("replacement input {name:?} has no bound pattern placeholder")
                    });
                    mapping.insert(id, bound);
                }
                NodeKind::Constant { name } => {
                    let tensor = replacement
                        .constant_value(id)
                        .unwrap_or_else(|| panic!("replacement constant {name:?} has no value"))
                        .clone();
                    mapping.insert(id, g.add_constant(name, tensor));
                }
                NodeKind::Operation { op, args } => {
                    let mut args = args.clone();
                    for arg in args.iter_mut() {
                        arg.map_nodes(&mut |n| mapping[&n]);
                    }
                    mapping.insert(id, g.create_operation(*op, args));
                }
                NodeKind::Output { results } => {
                    assert_eq!(results.len(), 1, "a replacement must export exactly one result");
                    result = Some(mapping[&results[0].1]);
                }
            }
        }
    });
    let result = result.expect("replacement graph always has an output node");
    graph.replace_all_uses_with(root, result);
    if result != root && graph.users(root).is_empty() {
        graph.erase(root);
    }
    result
}

/// Rewrites every match of `pattern` with the graph produced by `build`.
///
/// `build` receives the match, the matched root and the pattern; returning `None` skips the
/// site. Returns the number of sites rewritten.
pub fn replace_pattern<F>(graph: &mut Graph, pattern: &Graph, mut build: F) -> usize
where
    F: FnMut(&PatternMatch, NodeId, &Graph) -> Option<Graph>,
{
    let root_op = pattern
        .op(pattern_root(pattern))
        .expect("pattern root is an operation");
    let candidates: Vec<NodeId> = graph.find_nodes(root_op).collect();
    let mut rewritten = 0;
    for candidate in candidates {
        if !graph.is_live(candidate) {
            continue;
        }
        let Some(matched) = match_pattern(graph, pattern, candidate) else {
            continue;
        };
        let Some(replacement) = build(&matched, candidate, pattern) else {
            continue;
        };
        let result = splice_replacement(graph, pattern, &matched, &replacement);
        log::debug!("pattern rewrite at {candidate} -> {result}");
        rewritten += 1;
    }
    rewritten
}
