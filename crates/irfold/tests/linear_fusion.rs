mod support;

use irfold::passes::LinearFusionPass;
use irfold::{Argument, Graph, NodeId, Op};
use rand::rngs::StdRng;
use rand::SeedableRng;
use support::{constant, count, input, op, random_values, run_pass, run_pass_preserving, scalar};

fn conv(graph: &mut Graph, x: NodeId, weight: NodeId, bias: Option<NodeId>, activation: &str) -> NodeId {
    graph.create_operation(
        Op::Conv,
        vec![
            Argument::Node(x),
            Argument::Node(weight),
            bias.map_or(Argument::None, Argument::Node),
            Argument::Ints(vec![1, 1]),
            Argument::Ints(vec![1, 1, 1, 1]),
            Argument::Ints(vec![1, 1]),
            Argument::Int(1),
            Argument::str(activation),
        ],
    )
}

fn dense(graph: &mut Graph, x: NodeId, weight: NodeId, bias: Option<NodeId>, activation: &str) -> NodeId {
    graph.create_operation(
        Op::Dense,
        vec![
            Argument::Node(x),
            Argument::Node(weight),
            bias.map_or(Argument::None, Argument::Node),
            Argument::str(activation),
        ],
    )
}

fn random_constant(graph: &mut Graph, rng: &mut StdRng, hint: &str, dims: &[usize]) -> NodeId {
    let values = random_values(rng, dims.iter().product());
    constant(graph, hint, dims, values)
}

#[test]
fn scalar_affine_chain_becomes_one_scalar_mad() {
    let mut rng = StdRng::seed_from_u64(1);
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[3]);
    let two = scalar(&mut graph, 2.0);
    let three = scalar(&mut graph, 3.0);
    let one = scalar(&mut graph, 1.0);
    let doubled = op(&mut graph, Op::Mul, &[x, two]);
    let shifted = op(&mut graph, Op::Add, &[doubled, three]);
    let unit = op(&mut graph, Op::Mul, &[shifted, one]);
    graph.set_outputs(vec![("out".into(), unit)]);

    let result = run_pass_preserving(&LinearFusionPass, &mut graph, &mut rng);
    assert_eq!(result.rewrites_applied, 2);
    assert_eq!(count(&graph, Op::Mul), 0);
    assert_eq!(count(&graph, Op::Add), 0);
    let mad = graph.outputs()[0].1;
    assert_eq!(graph.op(mad), Some(Op::ScalarMad));
    assert_eq!(graph.operand(mad, 0), Some(x));
    assert_eq!(graph.arg(mad, 1).and_then(Argument::as_float), Some(2.0));
    assert_eq!(graph.arg(mad, 2).and_then(Argument::as_float), Some(3.0));
    assert!(graph.attributes().is_empty(), "coefficients were literals");
}

#[test]
fn affine_maps_around_conv_fold_into_its_weights() {
    let mut rng = StdRng::seed_from_u64(2);
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[1, 2, 5, 5]);
    let half = scalar(&mut graph, 0.5);
    let weight = random_constant(&mut graph, &mut rng, "w", &[3, 2, 3, 3]);
    let bias = random_constant(&mut graph, &mut rng, "b", &[3]);
    let scale = constant(&mut graph, "scale", &[3], vec![2.0, -1.0, 0.5]);
    let shift = constant(&mut graph, "shift", &[3], vec![0.1, 0.2, 0.3]);

    let pre = op(&mut graph, Op::Mul, &[x, half]);
    let layer = conv(&mut graph, pre, weight, Some(bias), "none");
    let post = op(&mut graph, Op::ScaleBias, &[layer, scale, shift]);
    graph.set_outputs(vec![("out".into(), post)]);

    run_pass_preserving(&LinearFusionPass, &mut graph, &mut rng);
    assert_eq!(count(&graph, Op::Conv), 1);
    assert_eq!(count(&graph, Op::Mul), 0);
    assert_eq!(count(&graph, Op::ScaleBias), 0);
    let fused = graph.outputs()[0].1;
    assert_eq!(graph.operand(fused, 0), Some(x));
}

#[test]
fn activated_conv_keeps_its_affine_consumer() {
    let mut rng = StdRng::seed_from_u64(3);
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[1, 2, 4, 4]);
    let weight = random_constant(&mut graph, &mut rng, "w", &[3, 2, 3, 3]);
    let scale = constant(&mut graph, "scale", &[3], vec![2.0, -1.0, 0.5]);
    let shift = constant(&mut graph, "shift", &[3], vec![0.0, 0.0, 1.0]);
    let layer = conv(&mut graph, x, weight, None, "relu");
    let post = op(&mut graph, Op::ScaleBias, &[layer, scale, shift]);
    graph.set_outputs(vec![("out".into(), post)]);

    let result = run_pass(&LinearFusionPass, &mut graph);
    assert!(!result.changed);
    assert_eq!(count(&graph, Op::ScaleBias), 1);
}

#[test]
fn consecutive_dense_layers_merge() {
    let mut rng = StdRng::seed_from_u64(4);
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[2, 4]);
    let w1 = random_constant(&mut graph, &mut rng, "w1", &[4, 3]);
    let b1 = random_constant(&mut graph, &mut rng, "b1", &[3]);
    let w2 = random_constant(&mut graph, &mut rng, "w2", &[3, 5]);
    let b2 = random_constant(&mut graph, &mut rng, "b2", &[5]);
    let first = dense(&mut graph, x, w1, Some(b1), "none");
    let second = dense(&mut graph, first, w2, Some(b2), "relu");
    graph.set_outputs(vec![("out".into(), second)]);

    run_pass_preserving(&LinearFusionPass, &mut graph, &mut rng);
    let layers: Vec<NodeId> = graph.find_nodes(Op::Dense).collect();
    assert_eq!(layers.len(), 1);
    assert_eq!(graph.operand(layers[0], 0), Some(x));
    assert_eq!(graph.arg(layers[0], 3).and_then(Argument::as_str), Some("relu"));
    let weight = graph.operand(layers[0], 1).and_then(|w| graph.constant_value(w));
    assert_eq!(weight.map(|w| w.shape().to_vec()), Some(vec![4, 5]));
}

#[test]
fn activated_dense_is_not_merged() {
    let mut rng = StdRng::seed_from_u64(5);
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[2, 4]);
    let w1 = random_constant(&mut graph, &mut rng, "w1", &[4, 3]);
    let w2 = random_constant(&mut graph, &mut rng, "w2", &[3, 5]);
    let first = dense(&mut graph, x, w1, None, "tanh");
    let second = dense(&mut graph, first, w2, None, "none");
    graph.set_outputs(vec![("out".into(), second)]);

    assert!(!run_pass(&LinearFusionPass, &mut graph).changed);
    assert_eq!(count(&graph, Op::Dense), 2);
}

#[test]
fn vector_shift_folds_into_following_dense() {
    let mut rng = StdRng::seed_from_u64(6);
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[3, 4]);
    let shift = random_constant(&mut graph, &mut rng, "shift", &[4]);
    let w = random_constant(&mut graph, &mut rng, "w", &[4, 2]);
    let shifted = op(&mut graph, Op::Add, &[x, shift]);
    let layer = dense(&mut graph, shifted, w, None, "none");
    let scale = constant(&mut graph, "scale", &[2], vec![3.0, -0.5]);
    let scaled = op(&mut graph, Op::Mul, &[layer, scale]);
    graph.set_outputs(vec![("out".into(), scaled)]);

    run_pass_preserving(&LinearFusionPass, &mut graph, &mut rng);
    assert_eq!(count(&graph, Op::Dense), 1);
    assert_eq!(count(&graph, Op::Add), 0);
    assert_eq!(count(&graph, Op::Mul), 0);
}

#[test]
fn shared_producers_are_not_fused() {
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[3]);
    let two = scalar(&mut graph, 2.0);
    let three = scalar(&mut graph, 3.0);
    let doubled = op(&mut graph, Op::Mul, &[x, two]);
    let shifted = op(&mut graph, Op::Add, &[doubled, three]);
    graph.set_outputs(vec![("a".into(), shifted), ("b".into(), doubled)]);

    assert!(!run_pass(&LinearFusionPass, &mut graph).changed);
    assert_eq!(count(&graph, Op::Mul), 1);
    assert_eq!(count(&graph, Op::Add), 1);
}

#[test]
fn fusion_is_idempotent() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[2, 4]);
    let w1 = random_constant(&mut graph, &mut rng, "w1", &[4, 4]);
    let w2 = random_constant(&mut graph, &mut rng, "w2", &[4, 4]);
    let first = dense(&mut graph, x, w1, None, "none");
    let second = dense(&mut graph, first, w2, None, "none");
    graph.set_outputs(vec![("out".into(), second)]);

    assert!(run_pass(&LinearFusionPass, &mut graph).changed);
    let text = graph.to_text();
    assert!(!run_pass(&LinearFusionPass, &mut graph).changed);
    assert_eq!(graph.to_text(), text);
}
