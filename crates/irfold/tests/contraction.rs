mod support;

use irfold::passes::ContractionPass;
use irfold::{Argument, ConstantTensor, DType, Graph, NodeId, Op, PassResult};
use rand::rngs::StdRng;
use rand::SeedableRng;
use support::{constant, count, input, op, run_pass, run_pass_preserving, scalar};

fn contract(graph: &mut Graph, seed: u64) -> PassResult {
    let mut rng = StdRng::seed_from_u64(seed);
    run_pass_preserving(&ContractionPass, graph, &mut rng)
}

fn ints(graph: &mut Graph, values: &[i64]) -> NodeId {
    graph.add_constant("ints", ConstantTensor::from_i64(vec![values.len()], values.to_vec()))
}

fn finish(graph: &mut Graph, result: NodeId) -> NodeId {
    let relu = op(graph, Op::Relu, &[result]);
    graph.set_outputs(vec![("out".into(), relu)]);
    relu
}

#[test]
fn single_input_concat_is_forwarded() {
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[2, 3]);
    let concat = graph.create_operation(Op::Concat, vec![Argument::Nodes(vec![x]), Argument::Int(1)]);
    let relu = finish(&mut graph, concat);

    assert!(contract(&mut graph, 1).changed);
    assert_eq!(count(&graph, Op::Concat), 0);
    assert_eq!(graph.operand(relu, 0), Some(x));
}

#[test]
fn repeated_concat_becomes_tile() {
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[2, 3]);
    let concat = graph.create_operation(Op::Concat, vec![Argument::Nodes(vec![x, x, x]), Argument::Int(-1)]);
    finish(&mut graph, concat);

    contract(&mut graph, 2);
    assert_eq!(count(&graph, Op::Concat), 0);
    let tile = graph.find_nodes(Op::Tile).next().expect("tile created");
    assert_eq!(graph.descriptor(tile).static_shape(), Some(vec![2, 9]));
}

#[test]
fn identity_transposes_are_removed() {
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[2, 3, 4]);
    let plain = graph.create_operation(Op::Transpose, vec![Argument::Node(x), Argument::Ints(vec![0, 1, 2])]);
    let offset = graph.create_operation(Op::Transpose, vec![Argument::Node(plain), Argument::Ints(vec![-3, -2, -1])]);
    let real = graph.create_operation(Op::Transpose, vec![Argument::Node(offset), Argument::Ints(vec![2, 0, 1])]);
    finish(&mut graph, real);

    contract(&mut graph, 3);
    assert_eq!(count(&graph, Op::Transpose), 1);
    assert_eq!(graph.operand(real, 0), Some(x));
}

#[test]
fn identity_reshape_is_removed() {
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[2, 3]);
    let same = ints(&mut graph, &[2, 3]);
    let other = ints(&mut graph, &[3, 2]);
    let identity = graph.create_operation(
        Op::Reshape,
        vec![Argument::Node(x), Argument::Node(same), Argument::Bool(false)],
    );
    let real = graph.create_operation(
        Op::Reshape,
        vec![Argument::Node(identity), Argument::Node(other), Argument::Bool(false)],
    );
    finish(&mut graph, real);

    contract(&mut graph, 4);
    assert_eq!(count(&graph, Op::Reshape), 1);
    assert_eq!(graph.operand(real, 0), Some(x));
}

#[test]
fn expand_without_growth_simplifies() {
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[3]);
    let y = input(&mut graph, "y", &[2, 3]);
    let same = ints(&mut graph, &[3]);
    let lifted = ints(&mut graph, &[1, 3]);
    let grow = ints(&mut graph, &[2, 3]);
    let identity = graph.create_operation(Op::Expand, vec![Argument::Node(x), Argument::Node(same)]);
    let rank_change = graph.create_operation(Op::Expand, vec![Argument::Node(identity), Argument::Node(lifted)]);
    let broadcast = graph.create_operation(Op::Expand, vec![Argument::Node(rank_change), Argument::Node(grow)]);
    let sum = op(&mut graph, Op::Add, &[broadcast, y]);
    finish(&mut graph, sum);

    contract(&mut graph, 5);
    assert_eq!(count(&graph, Op::Expand), 1, "the broadcasting expand stays");
    assert_eq!(count(&graph, Op::Reshape), 1);
}

#[test]
fn unit_scalar_mad_and_tile_are_removed() {
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[2, 2]);
    let mad = graph.create_operation(
        Op::ScalarMad,
        vec![Argument::Node(x), Argument::Float(1.0), Argument::Float(0.0)],
    );
    let repeats = ints(&mut graph, &[1, 1]);
    let tile = graph.create_operation(Op::Tile, vec![Argument::Node(mad), Argument::Node(repeats)]);
    let relu = finish(&mut graph, tile);

    contract(&mut graph, 6);
    assert_eq!(count(&graph, Op::ScalarMad), 0);
    assert_eq!(count(&graph, Op::Tile), 0);
    assert_eq!(graph.operand(relu, 0), Some(x));
}

#[test]
fn reductions_over_unit_axes_contract() {
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[2, 1, 3]);
    let kept = graph.create_operation(
        Op::ReduceMax,
        vec![Argument::Node(x), Argument::Ints(vec![1]), Argument::Bool(true)],
    );
    let dropped = graph.create_operation(
        Op::ReduceSum,
        vec![Argument::Node(x), Argument::Ints(vec![-2]), Argument::Bool(false)],
    );
    let norm = graph.create_operation(
        Op::ReduceL2,
        vec![Argument::Node(x), Argument::Ints(vec![1]), Argument::Bool(true)],
    );
    graph.set_outputs(vec![
        ("kept".into(), kept),
        ("dropped".into(), dropped),
        ("norm".into(), norm),
    ]);

    contract(&mut graph, 7);
    assert_eq!(count(&graph, Op::ReduceMax), 0);
    assert_eq!(count(&graph, Op::ReduceSum), 0);
    assert_eq!(count(&graph, Op::Squeeze), 1);
    assert_eq!(count(&graph, Op::ReduceL2), 1, "norms change single values");
    assert_eq!(graph.outputs()[0].1, x);
}

#[test]
fn casts_resolve_against_known_types() {
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[4]);
    let like_f32 = constant(&mut graph, "like_f32", &[1], vec![0.0]);
    let like_i64 = graph.add_constant("like_i64", ConstantTensor::from_i64(vec![1], vec![0]));
    let same = graph.create_operation(Op::Cast, vec![Argument::Node(x), Argument::str("f32")]);
    let same_like = graph.create_operation(Op::CastLike, vec![Argument::Node(same), Argument::Node(like_f32)]);
    let to_int = graph.create_operation(Op::CastLike, vec![Argument::Node(same_like), Argument::Node(like_i64)]);
    graph.set_outputs(vec![("out".into(), to_int)]);

    contract(&mut graph, 8);
    assert_eq!(count(&graph, Op::CastLike), 0);
    let cast: Vec<NodeId> = graph.find_nodes(Op::Cast).collect();
    assert_eq!(cast.len(), 1);
    assert_eq!(graph.operand(cast[0], 0), Some(x));
    assert_eq!(graph.descriptor(cast[0]).dtype, Some(DType::I64));
}

#[test]
fn gather_of_one_index_becomes_slice() {
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[4, 3]);
    let scalar_index = graph.add_constant("i", ConstantTensor::scalar_i64(2));
    let vector_index = graph.add_constant("j", ConstantTensor::from_i64(vec![1], vec![-1]));
    let select = graph.create_operation(
        Op::Gather,
        vec![Argument::Node(x), Argument::Node(scalar_index), Argument::Int(0)],
    );
    let narrow = graph.create_operation(
        Op::Gather,
        vec![Argument::Node(x), Argument::Node(vector_index), Argument::Int(0)],
    );
    graph.set_outputs(vec![("row".into(), select), ("last".into(), narrow)]);

    contract(&mut graph, 9);
    assert_eq!(count(&graph, Op::Gather), 0);
    let narrow = graph.find_nodes(Op::Narrow).next().expect("narrow created");
    assert_eq!(graph.arg(narrow, 2).and_then(Argument::as_int), Some(3));
    assert_eq!(count(&graph, Op::Select), 1);
}

#[test]
fn small_integer_powers_are_strength_reduced() {
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[5]);
    let base = op(&mut graph, Op::Abs, &[x]);
    let two = scalar(&mut graph, 2.0);
    let half = scalar(&mut graph, 0.5);
    let three = scalar(&mut graph, 3.0);
    let squared = op(&mut graph, Op::Pow, &[base, two]);
    let root = op(&mut graph, Op::Pow, &[base, half]);
    let cubed = op(&mut graph, Op::Pow, &[base, three]);
    graph.set_outputs(vec![
        ("squared".into(), squared),
        ("root".into(), root),
        ("cubed".into(), cubed),
    ]);

    contract(&mut graph, 10);
    assert_eq!(count(&graph, Op::Square), 1);
    assert_eq!(count(&graph, Op::Sqrt), 1);
    assert_eq!(count(&graph, Op::Pow), 1);
}

#[test]
fn binary_ops_with_scalars_become_scalar_mad() {
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[3]);
    let one = scalar(&mut graph, 1.0);
    let zero = scalar(&mut graph, 0.0);
    let flipped = op(&mut graph, Op::Sub, &[one, x]);
    let by_zero = op(&mut graph, Op::Div, &[x, zero]);
    graph.set_outputs(vec![("flipped".into(), flipped), ("by_zero".into(), by_zero)]);

    run_pass(&ContractionPass, &mut graph);
    let mad = graph.find_nodes(Op::ScalarMad).next().expect("sub became scalar_mad");
    assert_eq!(graph.arg(mad, 1).and_then(Argument::as_float), Some(-1.0));
    assert_eq!(graph.arg(mad, 2).and_then(Argument::as_float), Some(1.0));
    assert_eq!(count(&graph, Op::Div), 1, "division by zero is kept");
}

#[test]
fn batch_norm_with_constant_statistics_becomes_scale_bias() {
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[2, 3, 2, 2]);
    let gamma = constant(&mut graph, "gamma", &[3], vec![1.0, 0.5, -2.0]);
    let beta = constant(&mut graph, "beta", &[3], vec![0.0, 0.25, 1.0]);
    let mean = constant(&mut graph, "mean", &[3], vec![0.1, -0.2, 0.3]);
    let var = constant(&mut graph, "var", &[3], vec![1.0, 0.25, 4.0]);
    let bn = graph.create_operation(
        Op::BatchNormalization,
        vec![
            Argument::Node(x),
            Argument::Node(gamma),
            Argument::Node(beta),
            Argument::Node(mean),
            Argument::Node(var),
            Argument::Float(1e-5),
        ],
    );
    finish(&mut graph, bn);

    contract(&mut graph, 11);
    assert_eq!(count(&graph, Op::BatchNormalization), 0);
    assert_eq!(count(&graph, Op::ScaleBias), 1);
}

#[test]
fn contraction_is_idempotent() {
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[2, 3]);
    let two = scalar(&mut graph, 2.0);
    let mul = op(&mut graph, Op::Mul, &[x, two]);
    finish(&mut graph, mul);

    assert!(run_pass(&ContractionPass, &mut graph).changed);
    assert!(!run_pass(&ContractionPass, &mut graph).changed);
}
