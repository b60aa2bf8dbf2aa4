use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::shape_inference::{DefaultShapeInference, ShapeInference};

use super::argument::Argument;
use super::attributes::AttributeTable;
use super::descriptor::PartialTensor;
use super::op::Op;
use super::tensor::ConstantTensor;

/// Stable handle of a node inside its [`Graph`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Input { name: String },
    Constant { name: String },
    Operation { op: Op, args: Vec<Argument> },
    Output { results: Vec<(String, NodeId)> },
}

#[derive(Debug, Clone)]
pub struct Node {
    kind: NodeKind,
    erased: bool,
    users: BTreeSet<NodeId>,
    outputs: Vec<PartialTensor>,
    version: u32,
}

impl Node {
    fn new(kind: NodeKind, descriptor: PartialTensor) -> Self {
        Self {
            kind,
            erased: false,
            users: BTreeSet::new(),
            outputs: vec![descriptor],
            version: 0,
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_erased(&self) -> bool {
        self.erased
    }

    pub fn users(&self) -> &BTreeSet<NodeId> {
        &self.users
    }

    /// Descriptor of the first (usually only) result.
    pub fn descriptor(&self) -> &PartialTensor {
        &self.outputs[0]
    }

    /// Descriptors of every result; multi-result operations expose one per element.
    pub fn descriptors(&self) -> &[PartialTensor] {
        &self.outputs
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn op(&self) -> Option<Op> {
        match &self.kind {
            NodeKind::Operation { op, .. } => Some(*op),
            _ => None,
        }
    }

    pub fn args(&self) -> &[Argument] {
        match &self.kind {
            NodeKind::Operation { args, .. } => args,
            _ => &[],
        }
    }

    /// Nodes referenced by this node, including Output results.
    pub fn operands(&self) -> Vec<NodeId> {
        match &self.kind {
            NodeKind::Operation { args, .. } => Argument::flatten(args),
            NodeKind::Output { results } => results.iter().map(|(_, id)| *id).collect(),
            NodeKind::Input { .. } | NodeKind::Constant { .. } => Vec::new(),
        }
    }
}

/// Where newly created nodes are spliced into the topological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPoint {
    /// Immediately before the Output node.
    End,
    Before(NodeId),
    /// After the anchor; the point advances past each node created there.
    After(NodeId),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("{node} references {operand}, which is not defined before it")]
    UseBeforeDefinition { node: NodeId, operand: NodeId },
    #[error("{node} references erased node {operand}")]
    ErasedReference { node: NodeId, operand: NodeId },
    #[error("{node} lists {user} as a user but {user} does not reference it")]
    DanglingUser { node: NodeId, user: NodeId },
    #[error("{node} references {operand} but is missing from its user set")]
    MissingUser { node: NodeId, operand: NodeId },
    #[error("output node is not last in topological order")]
    OutputNotLast,
    #[error("erased node {0} is still listed in the topological order")]
    ErasedInOrder(NodeId),
    #[error("constant {node} names missing attribute {name:?}")]
    MissingAttribute { node: NodeId, name: String },
}

/// Topologically ordered dataflow graph with def-use tracking.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<Node>,
    order: Vec<NodeId>,
    inputs: Vec<NodeId>,
    output: NodeId,
    cursor: InsertPoint,
    attributes: AttributeTable,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        let output = NodeId(0);
        Self {
            nodes: vec![Node::new(
                NodeKind::Output {
                    results: Vec::new(),
                },
                PartialTensor::unknown(),
            )],
            order: vec![output],
            inputs: Vec::new(),
            output,
            cursor: InsertPoint::End,
            attributes: AttributeTable::new(),
        }
    }

    // ----- cursor -------------------------------------------------------------------------

    pub fn insert_before(&mut self, anchor: NodeId) {
        self.cursor = InsertPoint::Before(anchor);
    }

    pub fn insert_after(&mut self, anchor: NodeId) {
        self.cursor = InsertPoint::After(anchor);
    }

    pub fn reset_cursor(&mut self) {
        self.cursor = InsertPoint::End;
    }

    pub fn cursor(&self) -> InsertPoint {
        self.cursor
    }

    /// Runs `build` with the cursor at `point`, restoring the previous cursor afterwards.
    pub fn with_insertion<R>(&mut self, point: InsertPoint, build: impl FnOnce(&mut Self) -> R) -> R {
        let saved = self.cursor;
        self.cursor = point;
        let result = build(self);
        self.cursor = saved;
        result
    }

    // ----- construction -------------------------------------------------------------------

    /// Declares a graph parameter. Inputs always precede every other node.
    pub fn add_input(&mut self, name: impl Into<String>, descriptor: PartialTensor) -> NodeId {
        let id = self.allocate(NodeKind::Input { name: name.into() }, descriptor);
        let pos = self
            .order
            .iter()
            .rposition(|n| matches!(self.nodes[n.index()].kind, NodeKind::Input { .. }))
            .map_or(0, |p| p + 1);
        self.order.insert(pos, id);
        self.inputs.push(id);
        id
    }

    /// Stores `tensor` in the attribute table under a unique name and references it.
    pub fn add_constant(&mut self, hint: &str, tensor: ConstantTensor) -> NodeId {
        let descriptor = PartialTensor::from_constant(&tensor);
        let name = self.attributes.insert_unique(hint, tensor);
        let id = self.allocate(NodeKind::Constant { name }, descriptor);
        self.splice(id);
        id
    }

    /// Creates an operation at the cursor and registers it as a user of its operands.
    pub fn create_operation(&mut self, op: Op, args: Vec<Argument>) -> NodeId {
        let descriptors = self.infer_with(&DefaultShapeInference, op, &args);
        let operands = Argument::flatten(&args);
        for operand in &operands {
            assert!(
                self.is_live(*operand),
                "{op} cannot reference erased or unknown node {operand}"
            );
        }
        let id = self.allocate(NodeKind::Operation { op, args }, PartialTensor::unknown());
        self.nodes[id.index()].outputs = descriptors;
        for operand in operands {
            self.nodes[operand.index()].users.insert(id);
        }
        self.splice(id);
        id
    }

    pub fn set_outputs(&mut self, results: Vec<(String, NodeId)>) {
        let output = self.output;
        for old in self.node(output).operands() {
            self.nodes[old.index()].users.remove(&output);
        }
        for (_, id) in &results {
            assert!(self.is_live(*id), "output cannot reference erased node {id}");
            self.nodes[id.index()].users.insert(output);
        }
        let node = &mut self.nodes[output.index()];
        node.kind = NodeKind::Output { results };
        node.version = node.version.wrapping_add(1);
    }

    /// Points the `index`-th exported result at `node`.
    pub fn set_output_result(&mut self, index: usize, node: NodeId) {
        let mut results = self.outputs().to_vec();
        results[index].1 = node;
        self.set_outputs(results);
    }

    // ----- queries ------------------------------------------------------------------------

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        self.nodes.get(id.index()).is_some_and(|n| !n.erased)
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    pub fn op(&self, id: NodeId) -> Option<Op> {
        self.nodes[id.index()].op()
    }

    pub fn args(&self, id: NodeId) -> &[Argument] {
        self.nodes[id.index()].args()
    }

    pub fn arg(&self, id: NodeId, index: usize) -> Option<&Argument> {
        self.args(id).get(index)
    }

    /// Node referenced by the `index`-th argument, if that argument is a single node.
    pub fn operand(&self, id: NodeId, index: usize) -> Option<NodeId> {
        self.arg(id, index).and_then(Argument::as_node)
    }

    pub fn users(&self, id: NodeId) -> &BTreeSet<NodeId> {
        &self.nodes[id.index()].users
    }

    /// The only consumer of `id`, unless that consumer is the Output node.
    pub fn single_user(&self, id: NodeId) -> Option<NodeId> {
        let users = self.users(id);
        if users.len() != 1 {
            return None;
        }
        let user = users.iter().next().copied()?;
        (user != self.output).then_some(user)
    }

    pub fn descriptor(&self, id: NodeId) -> &PartialTensor {
        self.nodes[id.index()].descriptor()
    }

    pub fn set_descriptor(&mut self, id: NodeId, descriptor: PartialTensor) {
        self.nodes[id.index()].outputs = vec![descriptor];
    }

    pub fn set_descriptors(&mut self, id: NodeId, descriptors: Vec<PartialTensor>) {
        assert!(!descriptors.is_empty(), "a node needs at least one descriptor");
        self.nodes[id.index()].outputs = descriptors;
    }

    pub fn version(&self, id: NodeId) -> u32 {
        self.nodes[id.index()].version
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id.index()].kind {
            NodeKind::Input { name } | NodeKind::Constant { name } => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn is_input(&self, id: NodeId) -> bool {
        matches!(self.nodes[id.index()].kind, NodeKind::Input { .. })
    }

    pub fn is_constant(&self, id: NodeId) -> bool {
        matches!(self.nodes[id.index()].kind, NodeKind::Constant { .. })
    }

    /// Tensor behind a Constant node.
    pub fn constant_value(&self, id: NodeId) -> Option<&ConstantTensor> {
        match &self.nodes[id.index()].kind {
            NodeKind::Constant { name } => self.attributes.get(name),
            _ => None,
        }
    }

    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    pub fn output_node(&self) -> NodeId {
        self.output
    }

    pub fn outputs(&self) -> &[(String, NodeId)] {
        match &self.nodes[self.output.index()].kind {
            NodeKind::Output { results } => results,
            _ => unreachable!("output handle always names the Output node"),
        }
    }

    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    pub fn position(&self, id: NodeId) -> Option<usize> {
        self.order.iter().position(|n| *n == id)
    }

    /// Number of live nodes, Output included.
    pub fn live_count(&self) -> usize {
        self.order.len()
    }

    pub fn operation_count(&self) -> usize {
        self.order
            .iter()
            .filter(|id| self.nodes[id.index()].op().is_some())
            .count()
    }

    /// Live operations with the given mnemonic, in topological order.
    pub fn find_nodes(&self, op: Op) -> impl Iterator<Item = NodeId> + '_ {
        self.order
            .iter()
            .copied()
            .filter(move |id| self.nodes[id.index()].op() == Some(op))
    }

    pub fn attributes(&self) -> &AttributeTable {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut AttributeTable {
        &mut self.attributes
    }

    // ----- mutation -----------------------------------------------------------------------

    /// Replaces an operation's argument list, re-registering users and refreshing its
    /// descriptor.
    pub fn set_args(&mut self, id: NodeId, args: Vec<Argument>) {
        let op = self
            .op(id)
            .unwrap_or_else(|| panic!("set_args on non-operation node {id}"));
        let old: BTreeSet<NodeId> = Argument::flatten(self.args(id)).into_iter().collect();
        let new: BTreeSet<NodeId> = Argument::flatten(&args).into_iter().collect();
        for operand in old.difference(&new) {
            self.nodes[operand.index()].users.remove(&id);
        }
        for operand in new.difference(&old) {
            assert!(self.is_live(*operand), "{id} cannot reference erased node {operand}");
            self.nodes[operand.index()].users.insert(id);
        }
        let descriptors = self.infer_with(&DefaultShapeInference, op, &args);
        let node = &mut self.nodes[id.index()];
        node.kind = NodeKind::Operation { op, args };
        node.outputs = descriptors;
        node.version = node.version.wrapping_add(1);
    }

    /// Redirects every use of `old` to `new`, returning the number of users rewritten.
    ///
    /// `new` itself keeps referencing `old` when it is one of its users. `old` is not erased.
    pub fn replace_all_uses_with(&mut self, old: NodeId, new: NodeId) -> usize {
        if old == new {
            return 0;
        }
        let users: Vec<NodeId> = self.users(old).iter().copied().collect();
        let mut rewritten = 0;
        for user in users {
            if user == new {
                continue;
            }
            let node = &mut self.nodes[user.index()];
            match &mut node.kind {
                NodeKind::Operation { args, .. } => {
                    for arg in args.iter_mut() {
                        arg.map_nodes(&mut |id| if id == old { new } else { id });
                    }
                }
                NodeKind::Output { results } => {
                    for (_, id) in results.iter_mut() {
                        if *id == old {
                            *id = new;
                        }
                    }
                }
                NodeKind::Input { .. } | NodeKind::Constant { .. } => {
                    unreachable!("{user} has no operands but is registered as a user of {old}")
                }
            }
            node.version = node.version.wrapping_add(1);
            self.nodes[old.index()].users.remove(&user);
            self.nodes[new.index()].users.insert(user);
            rewritten += 1;
        }
        rewritten
    }

    /// Removes a node without users and discharges its own user registrations.
    ///
    /// # Panics
    ///
    /// Panics when the node still has users or is the Output node.
    pub fn erase(&mut self, id: NodeId) {
        assert!(id != self.output, "the output node cannot be erased");
        assert!(self.is_live(id), "{id} is already erased");
        let users = &self.nodes[id.index()].users;
        if !users.is_empty() {
            panic!("attempting to erase {id} which still has users {users:?}");
        }
        for operand in self.node(id).operands() {
            self.nodes[operand.index()].users.remove(&id);
        }
        if let Some(pos) = self.position(id) {
            self.order.remove(pos);
        }
        self.inputs.retain(|n| *n != id);
        let node = &mut self.nodes[id.index()];
        node.erased = true;
        node.version = node.version.wrapping_add(1);
        if let InsertPoint::Before(anchor) | InsertPoint::After(anchor) = self.cursor {
            if anchor == id {
                self.cursor = InsertPoint::End;
            }
        }
    }

    /// Erases unused nodes until none remain, then prunes the attribute table.
    ///
    /// Inputs are kept: they are the graph's signature even when unused.
    pub fn eliminate_dead_code(&mut self) -> usize {
        let mut removed = 0;
        loop {
            let mut removed_in_sweep = 0;
            for id in self.order.clone().into_iter().rev() {
                let node = &self.nodes[id.index()];
                let removable = matches!(
                    node.kind,
                    NodeKind::Operation { .. } | NodeKind::Constant { .. }
                );
                if removable && node.users.is_empty() {
                    self.erase(id);
                    removed_in_sweep += 1;
                }
            }
            if removed_in_sweep == 0 {
                break;
            }
            removed += removed_in_sweep;
        }
        self.prune_attributes();
        removed
    }

    /// Drops attribute entries that no live Constant node references.
    pub fn prune_attributes(&mut self) -> usize {
        let live: BTreeSet<String> = self
            .order
            .iter()
            .filter_map(|id| match &self.nodes[id.index()].kind {
                NodeKind::Constant { name } => Some(name.clone()),
                _ => None,
            })
            .collect();
        self.attributes.retain_names(&live)
    }

    /// Applies `f` to every referenced constant tensor, refreshing the descriptors of the
    /// Constant nodes whose tensor `f` reports as changed.
    pub fn map_constants(&mut self, mut f: impl FnMut(&str, &mut ConstantTensor) -> bool) -> usize {
        let mut changed = BTreeSet::new();
        for (name, tensor) in self.attributes.iter_mut() {
            if f(name, tensor) {
                changed.insert(name.to_string());
            }
        }
        if changed.is_empty() {
            return 0;
        }
        for id in self.order.clone() {
            let NodeKind::Constant { name } = &self.nodes[id.index()].kind else {
                continue;
            };
            if !changed.contains(name) {
                continue;
            }
            if let Some(tensor) = self.attributes.get(name) {
                let descriptor = PartialTensor::from_constant(tensor);
                let node = &mut self.nodes[id.index()];
                node.outputs = vec![descriptor];
                node.version = node.version.wrapping_add(1);
            }
        }
        changed.len()
    }

    /// Recomputes every operation's descriptor in topological order.
    pub fn refresh_descriptors(&mut self, inference: &dyn ShapeInference) {
        for id in self.order.clone() {
            let Some(op) = self.op(id) else {
                continue;
            };
            let descriptors = self.infer_with(inference, op, self.args(id));
            self.nodes[id.index()].outputs = descriptors;
        }
    }

    /// Descriptors `op` would produce for `args`, using the current operand descriptors.
    pub fn infer_with(
        &self,
        inference: &dyn ShapeInference,
        op: Op,
        args: &[Argument],
    ) -> Vec<PartialTensor> {
        if op == Op::Extract {
            let tuple = args.first().and_then(Argument::as_node);
            let index = args.get(1).and_then(Argument::as_int);
            if let (Some(tuple), Some(index)) = (tuple, index) {
                if let Some(desc) = usize::try_from(index)
                    .ok()
                    .and_then(|i| self.nodes[tuple.index()].outputs.get(i))
                {
                    return vec![desc.clone()];
                }
            }
            return vec![PartialTensor::unknown()];
        }
        let operands = Argument::flatten(args);
        let inputs: Vec<&PartialTensor> = operands
            .iter()
            .map(|id| self.nodes[id.index()].descriptor())
            .collect();
        let mut outputs = inference.infer(op, &inputs, args);
        if outputs.is_empty() {
            outputs.push(PartialTensor::unknown());
        }
        outputs
    }

    /// Checks topological order and def-use bookkeeping.
    pub fn verify(&self) -> Result<(), GraphError> {
        if self.order.last() != Some(&self.output) {
            return Err(GraphError::OutputNotLast);
        }
        let mut defined = BTreeSet::new();
        for &id in &self.order {
            let node = &self.nodes[id.index()];
            if node.erased {
                return Err(GraphError::ErasedInOrder(id));
            }
            for operand in node.operands() {
                if !self.is_live(operand) {
                    return Err(GraphError::ErasedReference { node: id, operand });
                }
                if !defined.contains(&operand) {
                    return Err(GraphError::UseBeforeDefinition { node: id, operand });
                }
                if !self.nodes[operand.index()].users.contains(&id) {
                    return Err(GraphError::MissingUser { node: id, operand });
                }
            }
            for &user in &node.users {
                if !self.is_live(user) || !self.nodes[user.index()].operands().contains(&id) {
                    return Err(GraphError::DanglingUser { node: id, user });
                }
            }
            if let NodeKind::Constant { name } = &node.kind {
                if !self.attributes.contains(name) {
                    return Err(GraphError::MissingAttribute {
                        node: id,
                        name: name.clone(),
                    });
                }
            }
            defined.insert(id);
        }
        Ok(())
    }

    // ----- internals ----------------------------------------------------------------------

    fn allocate(&mut self, kind: NodeKind, descriptor: PartialTensor) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).expect("node arena exceeds u32 handles"));
        self.nodes.push(Node::new(kind, descriptor));
        id
    }

    fn splice(&mut self, id: NodeId) {
        let pos = match self.cursor {
            InsertPoint::End => self.order.len() - 1,
            InsertPoint::Before(anchor) => self
                .position(anchor)
                .unwrap_or_else(|| panic!("insertion anchor {anchor} is not live")),
            InsertPoint::After(anchor) => {
                let pos = self
                    .position(anchor)
                    .unwrap_or_else(|| panic!("insertion anchor {anchor} is not live"));
                assert!(anchor != self.output, "cannot insert after the output node");
                self.cursor = InsertPoint::After(id);
                pos + 1
            }
        };
        self.order.insert(pos, id);
    }
}
