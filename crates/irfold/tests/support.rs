#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use irfold::{
    evaluate, Argument, ConstantTensor, DType, Graph, GraphPass, ModelDescription, NodeId, Op,
    OptimizeConfig, OptimizeContext, PartialTensor, PassResult,
};
use irfold_backend_ref_cpu::RefCpuBackend;
use rand::rngs::StdRng;
use rand::Rng;

pub fn input(graph: &mut Graph, name: &str, dims: &[usize]) -> NodeId {
    graph.add_input(name, PartialTensor::with_static(DType::F32, dims))
}

pub fn constant(graph: &mut Graph, hint: &str, dims: &[usize], values: Vec<f32>) -> NodeId {
    graph.add_constant(hint, ConstantTensor::from_f32(dims.to_vec(), values))
}

pub fn scalar(graph: &mut Graph, value: f32) -> NodeId {
    graph.add_constant("scalar", ConstantTensor::scalar_f32(value))
}

pub fn op(graph: &mut Graph, op: Op, operands: &[NodeId]) -> NodeId {
    let args = operands.iter().map(|id| Argument::Node(*id)).collect();
    graph.create_operation(op, args)
}

pub fn random_values(rng: &mut StdRng, len: usize) -> Vec<f32> {
    (0..len).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

pub fn random_tensor(rng: &mut StdRng, dims: &[usize]) -> ConstantTensor {
    let len = dims.iter().product();
    ConstantTensor::from_f32(dims.to_vec(), random_values(rng, len))
}

/// Random f32 feeds for every statically shaped graph input.
pub fn random_feeds(graph: &Graph, rng: &mut StdRng) -> BTreeMap<String, ConstantTensor> {
    graph
        .inputs()
        .iter()
        .map(|&id| {
            let name = graph.name(id).expect("inputs are named").to_string();
            let dims = graph
                .descriptor(id)
                .static_shape()
                .unwrap_or_else(|| panic!("input {name} needs a static shape"));
            (name, random_tensor(rng, &dims))
        })
        .collect()
}

pub fn run(graph: &Graph, feeds: &BTreeMap<String, ConstantTensor>) -> Vec<ConstantTensor> {
    evaluate(graph, &RefCpuBackend::new(), feeds)
        .unwrap_or_else(|err| panic!("evaluation failed: {err:#}\n{graph}"))
        .into_iter()
        .map(|(_, tensor)| tensor)
        .collect()
}

pub fn assert_close(expected: &ConstantTensor, actual: &ConstantTensor, tol: f64) {
    assert_eq!(expected.shape(), actual.shape(), "shape mismatch");
    assert_eq!(expected.dtype(), actual.dtype(), "dtype mismatch");
    for (i, (e, a)) in expected
        .to_f64_vec()
        .into_iter()
        .zip(actual.to_f64_vec())
        .enumerate()
    {
        let bound = tol * (1.0 + e.abs());
        assert!(
            (e - a).abs() <= bound,
            "element {i}: expected {e}, got {a} (tol {bound})"
        );
    }
}

pub fn assert_all_close(expected: &[ConstantTensor], actual: &[ConstantTensor], tol: f64) {
    assert_eq!(expected.len(), actual.len(), "result count mismatch");
    for (e, a) in expected.iter().zip(actual) {
        assert_close(e, a, tol);
    }
}

pub fn count(graph: &Graph, op: Op) -> usize {
    graph.find_nodes(op).count()
}

pub fn run_pass(pass: &dyn GraphPass, graph: &mut Graph) -> PassResult {
    let backend = RefCpuBackend::new();
    let mut cx = OptimizeContext::new(&backend, OptimizeConfig::default());
    let result = pass.run(graph, &mut cx);
    if let Err(err) = graph.verify() {
        panic!("{} left an invalid graph: {err}\n{graph}", pass.name());
    }
    result
}

/// Runs `pass` and checks that evaluation results are unchanged on random feeds.
pub fn run_pass_preserving(pass: &dyn GraphPass, graph: &mut Graph, rng: &mut StdRng) -> PassResult {
    let feeds = random_feeds(graph, rng);
    let before = run(graph, &feeds);
    let result = run_pass(pass, graph);
    let after = run(graph, &feeds);
    assert_all_close(&before, &after, 1e-5);
    result
}

pub fn load_model(fixture: &str) -> ModelDescription {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(fixture);
    let text = fs::read_to_string(&path).unwrap_or_else(|e| panic!("cannot read {path:?}: {e}"));
    ModelDescription::from_json(&text).unwrap_or_else(|e| panic!("cannot parse {path:?}: {e}"))
}
