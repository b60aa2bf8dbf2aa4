use crate::ir::{Argument, Graph, NodeId, Op};

use super::permutation::Permutation;

/// A value whose node holds `Transpose(canonical, permutation)` rather than the canonical
/// tensor itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredValue {
    pub node: NodeId,
    pub permutation: Permutation,
    /// Constants re-transpose for free once constant folding runs.
    pub is_constant: bool,
}

impl DeferredValue {
    pub fn new(node: NodeId, permutation: Permutation, is_constant: bool) -> Self {
        Self {
            node,
            permutation,
            is_constant,
        }
    }

    /// A value already in canonical layout.
    pub fn canonical(node: NodeId, rank: usize, is_constant: bool) -> Self {
        Self::new(node, Permutation::identity(rank), is_constant)
    }

    pub fn is_canonical(&self) -> bool {
        self.permutation.is_identity()
    }

    pub fn rank(&self) -> usize {
        self.permutation.rank()
    }
}

/// Returns a node holding the canonical tensor transposed by `required`.
///
/// Emits at most one Transpose; when the held and the required layouts agree the underlying
/// node is returned unchanged.
pub fn get_canonical_value(graph: &mut Graph, value: &DeferredValue, required: &Permutation) -> NodeId {
    let composed = if value.permutation.is_identity() {
        *required
    } else if required.is_identity() {
        value.permutation.inverse()
    } else {
        value.permutation.inverse().compose(required)
    };
    if composed.is_identity() {
        return value.node;
    }
    log::trace!(
        "materializing transpose {:?} of {} (held {:?}, required {:?})",
        composed,
        value.node,
        value.permutation,
        required
    );
    graph.create_operation(
        Op::Transpose,
        vec![Argument::Node(value.node), Argument::Ints(composed.to_i64s())],
    )
}
