mod support;

use std::collections::BTreeMap;

use irfold::import::{DimSpec, OperatorRecord, TensorInfo};
use irfold::{import_model, import_model_with, Argument, DType, ImportOptions, ModelDescription, Op};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use support::{assert_all_close, count, load_model, random_feeds, run};

fn compare_layout_modes(fixture: &str, seed: u64) -> (usize, usize) {
    assert_layout_modes_agree(&load_model(fixture), seed)
}

fn assert_layout_modes_agree(description: &ModelDescription, seed: u64) -> (usize, usize) {
    let deferred = import_model(description).expect("deferred import").graph;
    let eager = import_model_with(description, ImportOptions { defer_layouts: false })
        .expect("eager import")
        .graph;

    let mut rng = StdRng::seed_from_u64(seed);
    let feeds = random_feeds(&deferred, &mut rng);
    assert_all_close(&run(&eager, &feeds), &run(&deferred, &feeds), 1e-6);
    (count(&deferred, Op::Transpose), count(&eager, Op::Transpose))
}

#[test]
fn conv_chain_matches_eager_layouts() {
    let (deferred, eager) = compare_layout_modes("conv_chain.json", 11);
    assert!(deferred < eager, "deferred {deferred} vs eager {eager}");
}

#[test]
fn classifier_matches_eager_layouts() {
    let (deferred, eager) = compare_layout_modes("classifier.json", 12);
    assert!(deferred < eager, "deferred {deferred} vs eager {eager}");
}

#[test]
fn constant_operands_follow_the_deferred_layout() {
    let imported = import_model(&load_model("classifier.json")).expect("import");
    let graph = &imported.graph;
    let add = graph.find_nodes(Op::Add).next().expect("shift add");
    let conv = graph.operand(add, 0).expect("add has operands");
    assert_eq!(graph.op(conv), Some(Op::Conv));
    let shift = graph.operand(add, 1).expect("add has operands");
    assert_eq!(graph.op(shift), Some(Op::Transpose));
    assert_eq!(graph.descriptor(shift).static_shape(), Some(vec![1, 8, 1, 1]));
}

#[test]
fn concatenation_axis_is_remapped_into_the_node_layout() {
    let imported = import_model(&load_model("classifier.json")).expect("import");
    let graph = &imported.graph;
    let concat = graph.find_nodes(Op::Concat).next().expect("concat");
    assert_eq!(graph.arg(concat, 1).and_then(irfold::Argument::as_int), Some(1));
    assert_eq!(graph.descriptor(concat).static_shape(), Some(vec![1, 16, 2, 2]));
}

/// Builds a random NHWC model: a convolution followed by a chain of layout-sensitive operators.
struct ChainBuilder {
    rng: StdRng,
    tensors: Vec<TensorInfo>,
    operators: Vec<OperatorRecord>,
    current: String,
    shape: Vec<usize>,
    next_id: usize,
}

impl ChainBuilder {
    fn new(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let shape = vec![1, rng.gen_range(2..=4), rng.gen_range(2..=4), rng.gen_range(1..=3)];
        let mut builder = Self {
            rng,
            tensors: Vec::new(),
            operators: Vec::new(),
            current: "x".to_string(),
            shape: shape.clone(),
            next_id: 0,
        };
        builder.declare("x", DType::F32, &shape, None);
        builder
    }

    fn declare(&mut self, name: &str, dtype: DType, dims: &[usize], data: Option<Vec<f64>>) {
        self.tensors.push(TensorInfo {
            name: name.to_string(),
            dtype,
            shape: dims.iter().map(|d| DimSpec::Static(*d)).collect(),
            data,
        });
    }

    fn fresh(&mut self, hint: &str) -> String {
        self.next_id += 1;
        format!("{hint}{}", self.next_id)
    }

    fn weights(&mut self, hint: &str, dims: &[usize]) -> String {
        let name = self.fresh(hint);
        let len: usize = dims.iter().product();
        let values = (0..len).map(|_| self.rng.gen_range(-1.0..1.0)).collect();
        self.declare(&name, DType::F32, dims, Some(values));
        name
    }

    fn ints(&mut self, hint: &str, values: &[usize]) -> String {
        let name = self.fresh(hint);
        let data = values.iter().map(|v| *v as f64).collect();
        self.declare(&name, DType::I32, &[values.len()], Some(data));
        name
    }

    fn push(&mut self, opcode: &str, inputs: Vec<Option<String>>, params: Value, shape: Vec<usize>) {
        let output = self.fresh("t");
        let params = match params {
            Value::Object(map) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        };
        self.operators.push(OperatorRecord {
            opcode: opcode.to_string(),
            inputs,
            outputs: vec![output.clone()],
            params,
        });
        self.current = output;
        self.shape = shape;
    }

    fn conv(&mut self) {
        let kernel = *[1, 3].choose(&mut self.rng).unwrap_or(&1);
        let (channels, out_channels) = (self.shape[3], self.rng.gen_range(1..=4));
        let filter = self.weights("filter", &[out_channels, kernel, kernel, channels]);
        let bias = self.rng.gen_bool(0.5).then(|| self.weights("bias", &[out_channels]));
        let shape = vec![1, self.shape[1], self.shape[2], out_channels];
        let x = self.current.clone();
        self.push(
            "CONV_2D",
            vec![Some(x), Some(filter), bias],
            json!({"padding": "SAME", "stride_h": 1, "stride_w": 1}),
            shape,
        );
    }

    fn unary(&mut self) {
        let opcode = *["RELU", "LOGISTIC", "TANH", "ABS", "NEG"].choose(&mut self.rng).unwrap_or(&"RELU");
        let (x, shape) = (self.current.clone(), self.shape.clone());
        self.push(opcode, vec![Some(x)], json!({}), shape);
    }

    /// Binary operator against a constant broadcast over the trailing axes.
    fn binary(&mut self) {
        let opcode = *["ADD", "SUB", "MUL", "MAXIMUM"].choose(&mut self.rng).unwrap_or(&"ADD");
        let rank = self.shape.len();
        let constant_rank = self.rng.gen_range(1..=rank);
        let dims: Vec<usize> = self.shape[rank - constant_rank..]
            .iter()
            .map(|d| if self.rng.gen_bool(0.5) { *d } else { 1 })
            .collect();
        let constant = self.weights("c", &dims);
        let x = self.current.clone();
        let inputs = if self.rng.gen_bool(0.5) {
            vec![Some(x), Some(constant)]
        } else {
            vec![Some(constant), Some(x)]
        };
        let shape = self.shape.clone();
        self.push(opcode, inputs, json!({}), shape);
    }

    fn reduction(&mut self) {
        let opcode = *["SUM", "MEAN", "REDUCE_MAX"].choose(&mut self.rng).unwrap_or(&"SUM");
        let rank = self.shape.len();
        let keep_dims = rank == 1 || self.rng.gen_bool(0.7);
        let limit = if keep_dims { rank } else { rank - 1 };
        let mut axes: Vec<usize> = (0..rank).collect();
        axes.shuffle(&mut self.rng);
        axes.truncate(self.rng.gen_range(1..=limit));
        axes.sort_unstable();
        let axes_name = self.ints("axes", &axes);
        let shape = if keep_dims {
            self.shape
                .iter()
                .enumerate()
                .map(|(i, d)| if axes.contains(&i) { 1 } else { *d })
                .collect()
        } else {
            self.shape
                .iter()
                .enumerate()
                .filter(|(i, _)| !axes.contains(i))
                .map(|(_, d)| *d)
                .collect()
        };
        let x = self.current.clone();
        self.push(opcode, vec![Some(x), Some(axes_name)], json!({"keep_dims": keep_dims}), shape);
    }

    fn concatenation(&mut self) {
        let axis = self.rng.gen_range(0..self.shape.len());
        let mut constant_shape = self.shape.clone();
        constant_shape[axis] = self.rng.gen_range(1..=2);
        let constant = self.weights("c", &constant_shape);
        let x = self.current.clone();
        let mut inputs = vec![Some(x.clone()), Some(constant)];
        if self.rng.gen_bool(0.3) {
            inputs.push(Some(x));
        }
        inputs.shuffle(&mut self.rng);
        let mut shape = self.shape.clone();
        shape[axis] = inputs
            .iter()
            .map(|name| if name.as_deref() == Some(self.current.as_str()) { self.shape[axis] } else { constant_shape[axis] })
            .sum();
        let axis = if self.rng.gen_bool(0.5) { axis as i64 } else { axis as i64 - self.shape.len() as i64 };
        self.push("CONCATENATION", inputs, json!({"axis": axis}), shape);
    }

    fn transpose(&mut self) {
        let mut perm: Vec<usize> = (0..self.shape.len()).collect();
        perm.shuffle(&mut self.rng);
        let shape = perm.iter().map(|p| self.shape[*p]).collect();
        let perm_name = self.ints("perm", &perm);
        let x = self.current.clone();
        self.push("TRANSPOSE", vec![Some(x), Some(perm_name)], json!({}), shape);
    }

    fn finish(mut self) -> ModelDescription {
        let output = self.current.clone();
        let shape = self.shape.clone();
        self.declare(&output, DType::F32, &shape, None);
        ModelDescription {
            tensors: self.tensors,
            inputs: vec!["x".to_string()],
            outputs: vec![output],
            operators: self.operators,
        }
    }
}

fn random_chain(seed: u64) -> ModelDescription {
    let mut builder = ChainBuilder::new(seed);
    builder.conv();
    let steps = builder.rng.gen_range(3..=6);
    for _ in 0..steps {
        match builder.rng.gen_range(0..5) {
            0 => builder.unary(),
            1 => builder.binary(),
            2 => builder.reduction(),
            3 => builder.concatenation(),
            _ => builder.transpose(),
        }
    }
    builder.finish()
}

#[test]
fn random_operator_chains_match_eager_layouts() {
    for seed in 0..64 {
        let description = random_chain(seed);
        assert_layout_modes_agree(&description, 1000 + seed);
    }
}

#[test]
fn reduction_then_transpose_composes_into_one_permutation() {
    let mut builder = ChainBuilder::new(3);
    builder.shape = vec![1, 3, 3, 2];
    builder.tensors.clear();
    builder.declare("x", DType::F32, &[1, 3, 3, 2], None);
    let filter = builder.weights("filter", &[4, 1, 1, 2]);
    builder.push(
        "CONV_2D",
        vec![Some("x".to_string()), Some(filter), None],
        json!({"padding": "VALID"}),
        vec![1, 3, 3, 4],
    );
    let axes = builder.ints("axes", &[2]);
    let x = builder.current.clone();
    builder.push("SUM", vec![Some(x), Some(axes)], json!({"keep_dims": true}), vec![1, 3, 1, 4]);
    let perm = builder.ints("perm", &[0, 2, 1, 3]);
    let x = builder.current.clone();
    builder.push("TRANSPOSE", vec![Some(x), Some(perm)], json!({}), vec![1, 1, 3, 4]);
    let bias = builder.weights("c", &[3, 1, 4]);
    let x = builder.current.clone();
    builder.push("ADD", vec![Some(x), Some(bias)], json!({}), vec![1, 1, 3, 4]);
    let description = builder.finish();

    assert_layout_modes_agree(&description, 4);
    let graph = import_model(&description).expect("import").graph;
    let sum = graph.find_nodes(Op::ReduceSum).next().expect("sum");
    assert_eq!(graph.arg(sum, 1).and_then(Argument::as_ints), Some(&[3][..]));
    assert_eq!(graph.descriptor(sum).static_shape(), Some(vec![1, 4, 3, 1]));
    let transpose = graph
        .find_nodes(Op::Transpose)
        .find(|id| graph.operand(*id, 0) == Some(sum))
        .expect("transpose of the reduction");
    assert_eq!(graph.arg(transpose, 1).and_then(Argument::as_ints), Some(&[0, 3, 2, 1][..]));
}
