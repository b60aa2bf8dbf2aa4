mod support;

use std::collections::BTreeSet;

use irfold::{Argument, ConstantTensor, DType, Graph, GraphError, InsertPoint, NodeKind, Op};
use support::{constant, input, op};

#[test]
fn users_follow_argument_changes() {
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[2, 3]);
    let y = input(&mut graph, "y", &[2, 3]);
    let sum = op(&mut graph, Op::Add, &[x, y]);
    graph.set_outputs(vec![("sum".into(), sum)]);

    assert!(graph.users(x).contains(&sum));
    assert!(graph.users(y).contains(&sum));
    assert_eq!(graph.users(sum).len(), 1);
    assert_eq!(graph.single_user(sum), None, "the output node is not a single user");

    graph.set_args(sum, vec![Argument::Node(x), Argument::Node(x)]);
    assert!(graph.users(y).is_empty());
    assert_eq!(graph.users(x).iter().copied().collect::<Vec<_>>(), vec![sum]);
    assert_eq!(graph.version(sum), 1);
    graph.verify().expect("valid graph");
}

#[test]
fn create_operation_infers_descriptor() {
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[4, 1, 3]);
    let y = input(&mut graph, "y", &[5, 1]);
    let sum = op(&mut graph, Op::Add, &[x, y]);
    let desc = graph.descriptor(sum);
    assert_eq!(desc.dtype, Some(DType::F32));
    assert_eq!(desc.static_shape(), Some(vec![4, 5, 3]));
}

#[test]
fn replace_all_uses_redirects_operations_and_outputs() {
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[3]);
    let relu = op(&mut graph, Op::Relu, &[x]);
    let neg = op(&mut graph, Op::Neg, &[relu]);
    graph.set_outputs(vec![("neg".into(), neg), ("relu".into(), relu)]);

    let tanh = graph.with_insertion(InsertPoint::Before(relu), |g| op(g, Op::Tanh, &[x]));
    assert_eq!(graph.replace_all_uses_with(relu, tanh), 2);
    assert!(graph.users(relu).is_empty());
    assert_eq!(graph.operand(neg, 0), Some(tanh));
    assert_eq!(graph.outputs()[1].1, tanh);

    graph.erase(relu);
    assert!(!graph.is_live(relu));
    assert!(!graph.users(x).contains(&relu));
    graph.verify().expect("valid graph");
}

#[test]
fn replace_all_uses_keeps_the_replacement_reading_the_old_value() {
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[3]);
    let relu = op(&mut graph, Op::Relu, &[x]);
    let neg = op(&mut graph, Op::Neg, &[relu]);
    graph.set_outputs(vec![("out".into(), relu)]);

    assert_eq!(graph.replace_all_uses_with(relu, neg), 1);
    assert_eq!(graph.operand(neg, 0), Some(relu));
    assert_eq!(graph.outputs()[0].1, neg);
    graph.verify().expect("valid graph");
}

#[test]
#[should_panic(expected = "still has users")]
fn erasing_a_used_node_panics() {
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[3]);
    let relu = op(&mut graph, Op::Relu, &[x]);
    graph.set_outputs(vec![("out".into(), relu)]);
    graph.erase(relu);
}

#[test]
fn inputs_stay_ahead_of_other_nodes() {
    let mut graph = Graph::new();
    let a = input(&mut graph, "a", &[2]);
    let c = constant(&mut graph, "c", &[2], vec![1.0, 2.0]);
    let b = input(&mut graph, "b", &[2]);
    assert_eq!(graph.order()[..3], [a, b, c]);
    assert_eq!(graph.inputs(), &[a, b]);
    assert_eq!(graph.order().last(), Some(&graph.output_node()));
}

#[test]
fn cursor_controls_where_nodes_land() {
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[3]);
    let last = op(&mut graph, Op::Relu, &[x]);

    graph.insert_after(x);
    let first = op(&mut graph, Op::Neg, &[x]);
    let second = op(&mut graph, Op::Abs, &[first]);
    assert_eq!(graph.cursor(), InsertPoint::After(second));

    graph.insert_before(last);
    let before_last = op(&mut graph, Op::Exp, &[x]);
    graph.reset_cursor();
    let tail = op(&mut graph, Op::Tanh, &[last]);

    assert_eq!(graph.order()[..6], [x, first, second, before_last, last, tail]);
    graph.verify().expect("valid graph");
}

#[test]
fn with_insertion_restores_cursor() {
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[3]);
    graph.insert_after(x);
    graph.with_insertion(InsertPoint::End, |g| op(g, Op::Relu, &[x]));
    assert_eq!(graph.cursor(), InsertPoint::After(x));
}

#[test]
fn dead_code_elimination_keeps_inputs_and_prunes_attributes() {
    let mut graph = Graph::new();
    let unused = input(&mut graph, "unused", &[2]);
    let y = input(&mut graph, "y", &[2]);
    let c = constant(&mut graph, "c", &[2], vec![1.0, 2.0]);
    let dead = op(&mut graph, Op::Add, &[c, c]);
    let live = op(&mut graph, Op::Relu, &[y]);
    graph.set_outputs(vec![("out".into(), live)]);
    assert_eq!(graph.attributes().len(), 1);

    assert_eq!(graph.eliminate_dead_code(), 2);
    assert!(graph.is_live(unused));
    assert!(!graph.is_live(dead));
    assert!(!graph.is_live(c));
    assert!(graph.attributes().is_empty());
    assert_eq!(graph.inputs().len(), 2);
    graph.verify().expect("valid graph");
}

#[test]
fn verify_reports_missing_attribute() {
    let mut graph = Graph::new();
    let c = constant(&mut graph, "weights", &[1], vec![1.0]);
    graph.set_outputs(vec![("out".into(), c)]);
    graph.attributes_mut().retain_names(&BTreeSet::new());
    assert!(matches!(
        graph.verify(),
        Err(GraphError::MissingAttribute { node, .. }) if node == c
    ));
}

#[test]
fn attribute_names_are_unique() {
    let mut graph = Graph::new();
    let a = constant(&mut graph, "w", &[1], vec![1.0]);
    let b = constant(&mut graph, "w", &[1], vec![2.0]);
    assert_ne!(graph.name(a), graph.name(b));
    assert_eq!(graph.constant_value(b).map(ConstantTensor::to_f64_vec), Some(vec![2.0]));
}

#[test]
fn find_nodes_walks_topological_order() {
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[3]);
    let late = op(&mut graph, Op::Relu, &[x]);
    let early = graph.with_insertion(InsertPoint::Before(late), |g| op(g, Op::Relu, &[x]));
    let found: Vec<_> = graph.find_nodes(Op::Relu).collect();
    assert_eq!(found, vec![early, late]);
    assert_eq!(graph.operation_count(), 2);
}

#[test]
fn text_dump_lists_every_live_node() {
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[2, 3]);
    let perm = graph.create_operation(Op::Transpose, vec![Argument::Node(x), Argument::Ints(vec![1, 0])]);
    graph.set_outputs(vec![("y".into(), perm)]);
    let text = graph.to_text();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "%1 = input \"x\" : f32[2,3]");
    assert_eq!(lines[1], "%2 = transpose(%1, [1, 0]) : f32[3,2]");
    assert_eq!(lines[2], "return y=%2");
    assert_eq!(graph.to_string(), text);
}

#[test]
fn output_node_has_no_operation_kind() {
    let graph = Graph::new();
    assert!(matches!(graph.kind(graph.output_node()), NodeKind::Output { results } if results.is_empty()));
    assert_eq!(graph.live_count(), 1);
}
