use crate::ir::{Argument, Graph, NodeId, Op, PartialTensor};

/// A pattern together with the single-operator graph that replaces it.
#[derive(Debug, Clone)]
pub struct BuiltinPattern {
    pub name: &'static str,
    pub pattern: Graph,
    pub replacement: Graph,
}

fn unary(g: &mut Graph, op: Op, x: NodeId) -> NodeId {
    g.create_operation(op, vec![Argument::Node(x)])
}

fn binary(g: &mut Graph, op: Op, a: NodeId, b: NodeId) -> NodeId {
    g.create_operation(op, vec![Argument::Node(a), Argument::Node(b)])
}

fn finish(mut g: Graph, result: NodeId) -> Graph {
    g.set_outputs(vec![("out".to_string(), result)]);
    g
}

fn one_placeholder(build: impl FnOnce(&mut Graph, NodeId) -> NodeId) -> Graph {
    let mut g = Graph::new();
    let x = g.add_input("x", PartialTensor::unknown());
    let result = build(&mut g, x);
    finish(g, result)
}

fn two_placeholders(build: impl FnOnce(&mut Graph, NodeId, NodeId) -> NodeId) -> Graph {
    let mut g = Graph::new();
    let x = g.add_input("x", PartialTensor::unknown());
    let y = g.add_input("y", PartialTensor::unknown());
    let result = build(&mut g, x, y);
    finish(g, result)
}

/// Algebraic subgraphs that collapse into one dedicated operator.
pub fn builtin_patterns() -> Vec<BuiltinPattern> {
    vec![
        BuiltinPattern {
            name: "reciprocal_sqrt_to_rsqrt",
            pattern: one_placeholder(|g, x| {
                let s = unary(g, Op::Sqrt, x);
                unary(g, Op::Reciprocal, s)
            }),
            replacement: one_placeholder(|g, x| unary(g, Op::Rsqrt, x)),
        },
        BuiltinPattern {
            name: "not_equal",
            pattern: two_placeholders(|g, x, y| {
                let eq = binary(g, Op::Equal, x, y);
                unary(g, Op::Not, eq)
            }),
            replacement: two_placeholders(|g, x, y| binary(g, Op::NotEqual, x, y)),
        },
        BuiltinPattern {
            name: "mul_sigmoid_to_swish",
            pattern: one_placeholder(|g, x| {
                let s = unary(g, Op::Sigmoid, x);
                binary(g, Op::Mul, x, s)
            }),
            replacement: one_placeholder(|g, x| unary(g, Op::Swish, x)),
        },
        BuiltinPattern {
            name: "mul_self_to_square",
            pattern: one_placeholder(|g, x| binary(g, Op::Mul, x, x)),
            replacement: one_placeholder(|g, x| unary(g, Op::Square, x)),
        },
    ]
}
