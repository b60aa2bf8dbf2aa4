mod support;

use std::sync::Arc;

use irfold::passes::{ContractionPass, DeadCodeEliminationPass, NoOpRemovalPass};
use irfold::pipeline::{PipelineBuilder, PipelineOptimizer};
use irfold::{
    import_model, import_model_with, optimize, Graph, ImportOptions, Op, OptimizeConfig,
    OptimizeContext, TensorData,
};
use irfold_backend_ref_cpu::RefCpuBackend;
use rand::rngs::StdRng;
use rand::SeedableRng;
use support::{assert_all_close, constant, count, input, load_model, op, random_feeds, run, scalar};

fn optimize_preserving(graph: &mut Graph, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let feeds = random_feeds(graph, &mut rng);
    let before = run(graph, &feeds);
    let result = optimize(graph, &RefCpuBackend::new(), OptimizeConfig::default());
    assert!(result.changed);
    graph.verify().expect("optimized graph verifies");
    assert_all_close(&before, &run(graph, &feeds), 1e-5);
}

#[test]
fn conv_chain_optimizes_to_the_same_graph_in_both_layout_modes() {
    let description = load_model("conv_chain.json");
    for defer_layouts in [true, false] {
        let mut graph = import_model_with(&description, ImportOptions { defer_layouts })
            .expect("import")
            .graph;
        optimize_preserving(&mut graph, 21);
        assert_eq!(count(&graph, Op::Transpose), 2, "defer_layouts={defer_layouts}\n{graph}");
        assert_eq!(count(&graph, Op::Conv), 2);
        let convs: Vec<_> = graph.find_nodes(Op::Conv).collect();
        assert_eq!(graph.operand(convs[1], 0), Some(convs[0]));
    }
}

#[test]
fn classifier_keeps_only_the_layout_boundaries() {
    let mut graph = import_model(&load_model("classifier.json")).expect("import").graph;
    optimize_preserving(&mut graph, 22);
    assert_eq!(count(&graph, Op::Transpose), 2, "{graph}");
    for id in graph.find_nodes(Op::Transpose) {
        let source = graph.operand(id, 0).expect("transpose has an operand");
        assert!(graph.constant_value(source).is_none(), "constant transposes fold");
    }
}

#[test]
fn second_run_is_a_no_op() {
    let mut graph = import_model(&load_model("classifier.json")).expect("import").graph;
    let backend = RefCpuBackend::new();
    optimize(&mut graph, &backend, OptimizeConfig::default());
    let text = graph.to_text();
    optimize(&mut graph, &backend, OptimizeConfig::default());
    assert_eq!(graph.to_text(), text);
}

#[test]
fn constant_arithmetic_and_scalar_chains_collapse() {
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[4]);
    let a = constant(&mut graph, "a", &[4], vec![1.0, 2.0, 3.0, 4.0]);
    let b = constant(&mut graph, "b", &[4], vec![0.5, 0.5, 0.5, 0.5]);
    let folded = op(&mut graph, Op::Mul, &[a, b]);
    let shifted = op(&mut graph, Op::Add, &[x, folded]);
    let two = scalar(&mut graph, 2.0);
    let one = scalar(&mut graph, 1.0);
    let doubled = op(&mut graph, Op::Mul, &[shifted, two]);
    let plus_one = op(&mut graph, Op::Add, &[doubled, one]);
    let ident = op(&mut graph, Op::Identity, &[plus_one]);
    graph.set_outputs(vec![("out".into(), ident)]);

    optimize_preserving(&mut graph, 23);
    assert_eq!(count(&graph, Op::Identity), 0);
    assert_eq!(count(&graph, Op::ScalarMad), 1);
    assert_eq!(count(&graph, Op::Add), 1);
    assert_eq!(count(&graph, Op::Mul), 0);
    assert_eq!(graph.attributes().len(), 1);
}

#[test]
fn denormal_flush_is_opt_in() {
    let build = || {
        let mut graph = Graph::new();
        let x = input(&mut graph, "x", &[2]);
        let tiny = constant(&mut graph, "tiny", &[2], vec![1e-40, 1.0]);
        let sum = op(&mut graph, Op::Add, &[x, tiny]);
        graph.set_outputs(vec![("out".into(), sum)]);
        graph
    };
    let constant_values = |graph: &Graph| {
        let sum = graph.outputs()[0].1;
        let tiny = graph.operand(sum, 1).expect("add keeps its constant");
        match graph.constant_value(tiny).map(|t| t.data().clone()) {
            Some(TensorData::F32(values)) => values,
            other => panic!("unexpected constant {other:?}"),
        }
    };
    let backend = RefCpuBackend::new();

    let mut kept = build();
    optimize(&mut kept, &backend, OptimizeConfig::default());
    assert_eq!(constant_values(&kept), vec![1e-40, 1.0]);

    let mut flushed = build();
    let config = OptimizeConfig {
        flush_denormals: true,
        ..OptimizeConfig::default()
    };
    optimize(&mut flushed, &backend, config);
    assert_eq!(constant_values(&flushed), vec![0.0, 1.0]);
}

#[test]
fn custom_pipelines_run_their_steps_in_order() {
    let mut graph = Graph::new();
    let x = input(&mut graph, "x", &[3]);
    let one = scalar(&mut graph, 1.0);
    let unit = op(&mut graph, Op::Mul, &[x, one]);
    let ident = op(&mut graph, Op::Identity, &[unit]);
    let relu = op(&mut graph, Op::Relu, &[ident]);
    let unused = op(&mut graph, Op::Exp, &[x]);
    graph.set_outputs(vec![("out".into(), relu)]);

    let mut builder = PipelineBuilder::new();
    builder.pass(Arc::new(NoOpRemovalPass));
    builder.fixed_point(3, |p| p.pass(Arc::new(ContractionPass)));
    builder.pass(Arc::new(DeadCodeEliminationPass));
    let pipeline = PipelineOptimizer::from_steps(builder.finish(), false);

    let backend = RefCpuBackend::new();
    let mut cx = OptimizeContext::new(&backend, OptimizeConfig::default());
    let result = pipeline.optimize(&mut graph, &mut cx);
    assert!(result.changed);
    assert!(!graph.is_live(unused));
    assert!(!graph.is_live(ident));
    assert_eq!(graph.operand(relu, 0), Some(x));
    assert!(graph.attributes().is_empty());

    let again = pipeline.optimize(&mut graph, &mut cx);
    assert!(!again.changed);
}
