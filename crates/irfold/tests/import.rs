mod support;

use irfold::import::ImportStage;
use irfold::{
    import_model, import_model_with, Argument, ImportError, ImportOptions, ModelDescription, NodeId,
    Op, Severity,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use support::{count, load_model, random_feeds, run};

fn parse(text: &str) -> ModelDescription {
    ModelDescription::from_json(text).expect("inline model parses")
}

const RELU_MODEL: &str = r#"{
  "tensors": [
    {"name": "x", "dtype": "f32", "shape": [2, 3]},
    {"name": "bias", "dtype": "f32", "shape": [3], "data": [0.5, -1.0, 2.0]},
    {"name": "y", "dtype": "f32", "shape": [2, 3]}
  ],
  "inputs": ["x"],
  "outputs": ["y"],
  "operators": [
    {"opcode": "ADD", "inputs": ["x", "bias"], "outputs": ["y"], "params": {"fused_activation_function": "RELU"}}
  ]
}"#;

#[test]
fn elementwise_model_imports_and_evaluates() {
    let imported = import_model(&parse(RELU_MODEL)).expect("import");
    assert!(imported.warnings.is_empty());
    let graph = &imported.graph;
    assert_eq!(graph.inputs().len(), 1);
    assert_eq!(graph.outputs()[0].0, "y");
    assert_eq!(count(graph, Op::Add), 1);
    assert_eq!(count(graph, Op::Relu), 1);
    assert_eq!(graph.attributes().len(), 1);

    let feeds = [(
        "x".to_string(),
        irfold::ConstantTensor::from_f32(vec![2, 3], vec![1.0, 1.0, 1.0, -1.0, -1.0, -1.0]),
    )]
    .into_iter()
    .collect();
    let out = run(graph, &feeds);
    assert_eq!(out[0].to_f64_vec(), vec![1.5, 0.0, 3.0, 0.0, 0.0, 1.0]);
}

#[test]
fn description_survives_a_json_round_trip() {
    let description = load_model("classifier.json");
    let text = description.to_json().expect("serializes");
    let again = ModelDescription::from_json(&text).expect("parses");
    assert_eq!(again.operators.len(), description.operators.len());
    assert_eq!(
        again.tensor("head/weights").and_then(|t| t.static_shape()),
        Some(vec![5, 16])
    );
}

#[test]
fn unknown_opcode_is_rejected() {
    let text = RELU_MODEL.replace("\"ADD\"", "\"LSTM\"");
    let err = import_model(&parse(&text)).expect_err("LSTM has no translation");
    assert!(matches!(err, ImportError::UnsupportedOperator { ref opcode, .. } if opcode == "LSTM"));
    assert_eq!(err.opcode(), Some("LSTM"));
}

#[test]
fn quantize_escalates_after_the_operator_stage() {
    let text = RELU_MODEL.replace("\"ADD\", \"inputs\": [\"x\", \"bias\"]", "\"QUANTIZE\", \"inputs\": [\"x\"]");
    let err = import_model(&parse(&text)).expect_err("quantize is an error-severity warning");
    match err {
        ImportError::Warnings { stage, warnings } => {
            assert_eq!(stage, ImportStage::Operators);
            assert_eq!(warnings.len(), 1);
            assert_eq!(warnings[0].op, "QUANTIZE");
            assert_eq!(warnings[0].severity, Severity::Error);
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn dequantize_is_an_identity_with_an_info_note() {
    let text = RELU_MODEL.replace("\"ADD\", \"inputs\": [\"x\", \"bias\"]", "\"DEQUANTIZE\", \"inputs\": [\"x\"]");
    let imported = import_model(&parse(&text)).expect("dequantize imports");
    assert_eq!(imported.warnings.len(), 1);
    assert_eq!(imported.warnings[0].severity, Severity::Info);
    assert_eq!(count(&imported.graph, Op::Identity), 1);
}

#[test]
fn forwarded_inputs_and_input_data_are_reported() {
    let text = r#"{
      "tensors": [{"name": "x", "dtype": "f32", "shape": [2], "data": [1.0, 2.0]}],
      "inputs": ["x"],
      "outputs": ["x"],
      "operators": []
    }"#;
    let imported = import_model(&parse(text)).expect("import");
    let severities: Vec<Severity> = imported.warnings.iter().map(|w| w.severity).collect();
    assert_eq!(severities, vec![Severity::Warning, Severity::Info]);
    let (_, out) = &imported.graph.outputs()[0];
    assert!(imported.graph.is_input(*out));
}

#[test]
fn dangling_operand_names_are_reported() {
    let text = RELU_MODEL.replace("[\"x\", \"bias\"]", "[\"x\", \"missing\"]");
    let err = import_model(&parse(&text)).expect_err("operand is not declared");
    assert!(matches!(err, ImportError::UnknownTensor { ref name } if name == "missing"));
}

#[test]
fn constant_data_must_match_its_shape() {
    let text = RELU_MODEL.replace("[0.5, -1.0, 2.0]", "[0.5, -1.0]");
    let err = import_model(&parse(&text)).expect_err("two values for three elements");
    assert!(matches!(err, ImportError::MalformedTensor { ref name, .. } if name == "bias"));
}

#[test]
fn symbolic_extents_share_one_symbol_per_name() {
    let text = r#"{
      "tensors": [
        {"name": "a", "dtype": "f32", "shape": ["batch", 4]},
        {"name": "b", "dtype": "f32", "shape": ["batch", 4]},
        {"name": "c", "dtype": "f32", "shape": ["batch", 4]}
      ],
      "inputs": ["a", "b"],
      "outputs": ["c"],
      "operators": [{"opcode": "MUL", "inputs": ["a", "b"], "outputs": ["c"]}]
    }"#;
    let imported = import_model(&parse(text)).expect("import");
    let graph = &imported.graph;
    let a = graph.descriptor(graph.inputs()[0]).shape.dim(0);
    let b = graph.descriptor(graph.inputs()[1]).shape.dim(0);
    assert_eq!(a, b);
    assert_eq!(a.as_static(), None);
    let mul = graph.outputs()[0].1;
    assert_eq!(graph.descriptor(mul).shape.dim(0), a);
}

#[test]
fn convolutions_keep_their_activations_channel_first() {
    let imported = import_model(&load_model("conv_chain.json")).expect("import");
    let graph = &imported.graph;
    let convs: Vec<NodeId> = graph.find_nodes(Op::Conv).collect();
    assert_eq!(convs.len(), 2);
    let (first, second) = (convs[0], convs[1]);
    assert_eq!(graph.operand(second, 0), Some(first), "no transpose between the layers");
    assert_eq!(graph.arg(first, 7).and_then(Argument::as_str), Some("relu"));
    assert_eq!(graph.arg(first, 4).and_then(Argument::as_ints), Some(&[1, 1, 1, 1][..]));
    assert!(matches!(graph.arg(second, 2), Some(Argument::None)));
    assert_eq!(graph.descriptor(first).static_shape(), Some(vec![1, 4, 5, 5]));

    let out = graph.outputs()[0].1;
    assert_eq!(graph.op(out), Some(Op::Transpose));
    assert_eq!(graph.descriptor(out).static_shape(), Some(vec![1, 3, 3, 2]));
}

#[test]
fn eager_layouts_transpose_back_after_every_convolution() {
    let description = load_model("conv_chain.json");
    let deferred = import_model(&description).expect("deferred import").graph;
    let eager = import_model_with(&description, ImportOptions { defer_layouts: false })
        .expect("eager import")
        .graph;
    let activation_transposes = |graph: &irfold::Graph| {
        graph
            .find_nodes(Op::Transpose)
            .filter(|id| graph.operand(*id, 0).is_some_and(|src| graph.constant_value(src).is_none()))
            .count()
    };
    assert_eq!(activation_transposes(&deferred), 2);
    assert_eq!(activation_transposes(&eager), 4);
}

#[test]
fn split_produces_one_extract_per_result() {
    let text = r#"{
      "tensors": [
        {"name": "axis", "dtype": "i32", "shape": [1], "data": [-1]},
        {"name": "x", "dtype": "f32", "shape": [2, 6]},
        {"name": "p0", "dtype": "f32", "shape": [2, 2]},
        {"name": "p1", "dtype": "f32", "shape": [2, 2]},
        {"name": "p2", "dtype": "f32", "shape": [2, 2]}
      ],
      "inputs": ["x"],
      "outputs": ["p2", "p0"],
      "operators": [
        {"opcode": "SPLIT", "inputs": ["axis", "x"], "outputs": ["p0", "p1", "p2"], "params": {"num_splits": 3}}
      ]
    }"#;
    let imported = import_model(&parse(text)).expect("import");
    let graph = &imported.graph;
    assert_eq!(count(graph, Op::Split), 1);
    assert_eq!(count(graph, Op::Extract), 3);

    let mut rng = StdRng::seed_from_u64(5);
    let feeds = random_feeds(graph, &mut rng);
    let x = feeds["x"].to_f64_vec();
    let out = run(graph, &feeds);
    assert_eq!(out[0].shape(), &[2, 2]);
    assert_eq!(out[0].to_f64_vec(), vec![x[4], x[5], x[10], x[11]]);
    assert_eq!(out[1].to_f64_vec(), vec![x[0], x[1], x[6], x[7]]);
}

#[test]
fn uneven_split_is_rejected() {
    let text = r#"{
      "tensors": [
        {"name": "axis", "dtype": "i32", "shape": [1], "data": [1]},
        {"name": "x", "dtype": "f32", "shape": [2, 5]},
        {"name": "p0", "dtype": "f32", "shape": [2, 2]},
        {"name": "p1", "dtype": "f32", "shape": [2, 2]}
      ],
      "inputs": ["x"],
      "outputs": ["p0"],
      "operators": [
        {"opcode": "SPLIT", "inputs": ["axis", "x"], "outputs": ["p0", "p1"], "params": {"num_splits": 2}}
      ]
    }"#;
    let err = import_model(&parse(text)).expect_err("5 is not divisible by 2");
    assert!(matches!(err, ImportError::UnsupportedParameter { ref param, .. } if param == "num_splits"));
}

#[test]
fn reshape_accepts_a_shape_parameter() {
    let text = r#"{
      "tensors": [
        {"name": "x", "dtype": "f32", "shape": [2, 3, 4]},
        {"name": "y", "dtype": "f32", "shape": [6, 4]}
      ],
      "inputs": ["x"],
      "outputs": ["y"],
      "operators": [
        {"opcode": "RESHAPE", "inputs": ["x"], "outputs": ["y"], "params": {"new_shape": [-1, 4]}}
      ]
    }"#;
    let imported = import_model(&parse(text)).expect("import");
    let out = imported.graph.outputs()[0].1;
    assert_eq!(imported.graph.op(out), Some(Op::Reshape));
    assert_eq!(imported.graph.descriptor(out).static_shape(), Some(vec![6, 4]));
}

#[test]
fn cast_takes_its_target_from_the_result_tensor() {
    let text = r#"{
      "tensors": [
        {"name": "x", "dtype": "f32", "shape": [3]},
        {"name": "y", "dtype": "i64", "shape": [3]}
      ],
      "inputs": ["x"],
      "outputs": ["y"],
      "operators": [{"opcode": "CAST", "inputs": ["x"], "outputs": ["y"]}]
    }"#;
    let imported = import_model(&parse(text)).expect("import");
    let out = imported.graph.outputs()[0].1;
    assert_eq!(imported.graph.arg(out, 1).and_then(Argument::as_str), Some("i64"));
    assert_eq!(imported.graph.descriptor(out).dtype, Some(irfold::DType::I64));
}

#[test]
fn tensors_beyond_the_permutation_rank_are_rejected() {
    let text = r#"{
      "tensors": [
        {"name": "x", "dtype": "f32", "shape": [1, 1, 1, 1, 1, 1, 1, 1, 2]},
        {"name": "y", "dtype": "f32", "shape": [1, 1, 1, 1, 1, 1, 1, 1, 2]}
      ],
      "inputs": ["x"],
      "outputs": ["y"],
      "operators": [{"opcode": "RELU", "inputs": ["x"], "outputs": ["y"]}]
    }"#;
    let err = import_model(&parse(text)).expect_err("rank 9 has no layout permutation");
    assert!(matches!(err, ImportError::MalformedTensor { ref name, .. } if name == "x"), "{err}");

    let constant = RELU_MODEL.replace(
        r#"{"name": "bias", "dtype": "f32", "shape": [3], "data": [0.5, -1.0, 2.0]}"#,
        r#"{"name": "bias", "dtype": "f32", "shape": [1, 1, 1, 1, 1, 1, 1, 1, 3], "data": [0.5, -1.0, 2.0]}"#,
    );
    let err = import_model(&parse(&constant)).expect_err("rank 9 constant");
    assert!(matches!(err, ImportError::MalformedTensor { ref name, .. } if name == "bias"), "{err}");
}
