use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ir::DType;

/// One dimension of a declared tensor: a fixed extent or a named symbolic extent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DimSpec {
    Static(usize),
    Symbolic(String),
}

/// Tensor metadata, with the embedded element values of weights and other constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorInfo {
    pub name: String,
    pub dtype: DType,
    pub shape: Vec<DimSpec>,
    #[serde(default)]
    pub data: Option<Vec<f64>>,
}

impl TensorInfo {
    pub fn static_shape(&self) -> Option<Vec<usize>> {
        self.shape
            .iter()
            .map(|d| match d {
                DimSpec::Static(v) => Some(*v),
                DimSpec::Symbolic(_) => None,
            })
            .collect()
    }
}

/// A decoded operator: its opcode, operand and result tensor names, and parameters.
///
/// A `null` operand marks an absent optional input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorRecord {
    pub opcode: String,
    pub inputs: Vec<Option<String>>,
    pub outputs: Vec<String>,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

/// Decoded model handed over by the file parser.
///
/// Spatial operators follow the channel-last convention (`NHWC` activations, `OHWI`
/// convolution filters, `[1, H, W, C]` depthwise filters, `[N, K]` dense weights).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelDescription {
    pub tensors: Vec<TensorInfo>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub operators: Vec<OperatorRecord>,
}

impl ModelDescription {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn tensor(&self, name: &str) -> Option<&TensorInfo> {
        self.tensors.iter().find(|t| t.name == name)
    }
}
