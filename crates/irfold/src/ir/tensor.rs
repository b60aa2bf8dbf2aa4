use std::num::FpCategory;

use half::f16;
use serde::{Deserialize, Serialize};

use super::dtype::DType;

/// Typed element storage of a [`ConstantTensor`], laid out row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TensorData {
    F32(Vec<f32>),
    F16(Vec<f16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    Bool(Vec<bool>),
}

impl TensorData {
    pub fn dtype(&self) -> DType {
        match self {
            TensorData::F32(_) => DType::F32,
            TensorData::F16(_) => DType::F16,
            TensorData::I32(_) => DType::I32,
            TensorData::I64(_) => DType::I64,
            TensorData::Bool(_) => DType::Bool,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(v) => v.len(),
            TensorData::F16(v) => v.len(),
            TensorData::I32(v) => v.len(),
            TensorData::I64(v) => v.len(),
            TensorData::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fully materialized tensor value held by the attribute table and produced by backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantTensor {
    shape: Vec<usize>,
    data: TensorData,
}

impl ConstantTensor {
    /// Builds a tensor, panicking when the storage length disagrees with the shape.
    pub fn new(shape: Vec<usize>, data: TensorData) -> Self {
        let expected: usize = shape.iter().product();
        assert_eq!(
            expected,
            data.len(),
            "tensor storage holds {} elements but shape {:?} needs {}",
            data.len(),
            shape,
            expected
        );
        Self { shape, data }
    }

    pub fn from_f32(shape: Vec<usize>, values: Vec<f32>) -> Self {
        Self::new(shape, TensorData::F32(values))
    }

    pub fn from_i64(shape: Vec<usize>, values: Vec<i64>) -> Self {
        Self::new(shape, TensorData::I64(values))
    }

    pub fn from_bool(shape: Vec<usize>, values: Vec<bool>) -> Self {
        Self::new(shape, TensorData::Bool(values))
    }

    pub fn scalar_f32(value: f32) -> Self {
        Self::from_f32(Vec::new(), vec![value])
    }

    pub fn scalar_i64(value: i64) -> Self {
        Self::from_i64(Vec::new(), vec![value])
    }

    /// Converts `values` into storage of the requested element type.
    pub fn from_f64(dtype: DType, shape: Vec<usize>, values: &[f64]) -> Self {
        let data = match dtype {
            DType::F32 => TensorData::F32(values.iter().map(|v| *v as f32).collect()),
            DType::F16 => TensorData::F16(values.iter().map(|v| f16::from_f64(*v)).collect()),
            DType::I32 => TensorData::I32(values.iter().map(|v| *v as i32).collect()),
            DType::I64 => TensorData::I64(values.iter().map(|v| *v as i64).collect()),
            DType::Bool => TensorData::Bool(values.iter().map(|v| *v != 0.0).collect()),
        };
        Self::new(shape, data)
    }

    /// Filled tensor of the given type.
    pub fn full(dtype: DType, shape: Vec<usize>, value: f64) -> Self {
        let len: usize = shape.iter().product();
        Self::from_f64(dtype, shape, &vec![value; len])
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut TensorData {
        &mut self.data
    }

    pub fn into_parts(self) -> (Vec<usize>, TensorData) {
        (self.shape, self.data)
    }

    /// Same storage under a new shape with an equal element count.
    pub fn reshaped(&self, shape: Vec<usize>) -> Self {
        Self::new(shape, self.data.clone())
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        match &self.data {
            TensorData::F32(v) => v.iter().map(|x| f64::from(*x)).collect(),
            TensorData::F16(v) => v.iter().map(|x| x.to_f64()).collect(),
            TensorData::I32(v) => v.iter().map(|x| f64::from(*x)).collect(),
            TensorData::I64(v) => v.iter().map(|x| *x as f64).collect(),
            TensorData::Bool(v) => v.iter().map(|x| if *x { 1.0 } else { 0.0 }).collect(),
        }
    }

    /// Integer view of integer and boolean tensors.
    pub fn to_i64_vec(&self) -> Option<Vec<i64>> {
        match &self.data {
            TensorData::I32(v) => Some(v.iter().map(|x| i64::from(*x)).collect()),
            TensorData::I64(v) => Some(v.clone()),
            TensorData::Bool(v) => Some(v.iter().map(|x| i64::from(*x)).collect()),
            TensorData::F32(_) | TensorData::F16(_) => None,
        }
    }

    /// Value of a single-element tensor of any rank.
    pub fn scalar_value(&self) -> Option<f64> {
        if self.len() != 1 {
            return None;
        }
        self.to_f64_vec().first().copied()
    }

    pub fn cast(&self, dtype: DType) -> Self {
        if dtype == self.dtype() {
            return self.clone();
        }
        match (&self.data, dtype) {
            (TensorData::I32(v), DType::I64) => {
                Self::from_i64(self.shape.clone(), v.iter().map(|x| i64::from(*x)).collect())
            }
            _ => Self::from_f64(dtype, self.shape.clone(), &self.to_f64_vec()),
        }
    }

    /// Zeroes subnormal floating-point elements in place, returning how many were flushed.
    pub fn flush_denormals(&mut self) -> usize {
        let mut flushed = 0;
        match &mut self.data {
            TensorData::F32(values) => {
                for value in values.iter_mut() {
                    if value.classify() == FpCategory::Subnormal {
                        *value = 0.0;
                        flushed += 1;
                    }
                }
            }
            TensorData::F16(values) => {
                for value in values.iter_mut() {
                    if value.classify() == FpCategory::Subnormal {
                        *value = f16::ZERO;
                        flushed += 1;
                    }
                }
            }
            TensorData::I32(_) | TensorData::I64(_) | TensorData::Bool(_) => {}
        }
        flushed
    }
}
