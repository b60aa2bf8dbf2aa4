use serde::{Deserialize, Serialize};

use super::graph::NodeId;

/// One entry of an operation's argument list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Argument {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Node(NodeId),
    Nodes(Vec<NodeId>),
    List(Vec<Argument>),
    /// Absent optional operand.
    None,
}

impl Argument {
    pub fn str(value: impl Into<String>) -> Self {
        Argument::Str(value.into())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Argument::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float view; integer literals widen.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Argument::Float(v) => Some(*v),
            Argument::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Argument::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Argument::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            Argument::Ints(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn as_floats(&self) -> Option<&[f64]> {
        match self {
            Argument::Floats(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Argument::Node(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_nodes(&self) -> Option<&[NodeId]> {
        match self {
            Argument::Nodes(ids) => Some(ids.as_slice()),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Argument::None)
    }

    /// Appends every node reference held by this argument in flattening order.
    pub fn collect_nodes(&self, out: &mut Vec<NodeId>) {
        match self {
            Argument::Node(id) => out.push(*id),
            Argument::Nodes(ids) => out.extend_from_slice(ids),
            Argument::List(items) => {
                for item in items {
                    item.collect_nodes(out);
                }
            }
            _ => {}
        }
    }

    /// Number of node references held by this argument.
    pub fn node_count(&self) -> usize {
        match self {
            Argument::Node(_) => 1,
            Argument::Nodes(ids) => ids.len(),
            Argument::List(items) => items.iter().map(Argument::node_count).sum(),
            _ => 0,
        }
    }

    /// Rewrites every node reference in place.
    pub fn map_nodes(&mut self, f: &mut impl FnMut(NodeId) -> NodeId) {
        match self {
            Argument::Node(id) => *id = f(*id),
            Argument::Nodes(ids) => {
                for id in ids.iter_mut() {
                    *id = f(*id);
                }
            }
            Argument::List(items) => {
                for item in items.iter_mut() {
                    item.map_nodes(f);
                }
            }
            _ => {}
        }
    }

    /// Node references of an argument list in flattening order.
    pub fn flatten(args: &[Argument]) -> Vec<NodeId> {
        let mut out = Vec::new();
        for arg in args {
            arg.collect_nodes(&mut out);
        }
        out
    }

    pub fn references(&self, node: NodeId) -> bool {
        match self {
            Argument::Node(id) => *id == node,
            Argument::Nodes(ids) => ids.contains(&node),
            Argument::List(items) => items.iter().any(|item| item.references(node)),
            _ => false,
        }
    }
}
