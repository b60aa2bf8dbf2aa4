use serde::{Deserialize, Serialize};

use super::dtype::DType;
use super::tensor::ConstantTensor;

/// Name of a symbolic dimension; equal symbols denote equal extents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DimSymbol(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dim {
    Unknown,
    Symbolic(DimSymbol),
    Static(usize),
}

impl Dim {
    pub fn as_static(self) -> Option<usize> {
        match self {
            Dim::Static(v) => Some(v),
            _ => None,
        }
    }

    /// Whether two dimensions are provably equal.
    pub fn same_as(self, other: Dim) -> bool {
        match (self, other) {
            (Dim::Static(a), Dim::Static(b)) => a == b,
            (Dim::Symbolic(a), Dim::Symbolic(b)) => a == b,
            _ => false,
        }
    }
}

/// Shape whose rank and extents may be partially unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PartialShape {
    dims: Option<Vec<Dim>>,
}

impl PartialShape {
    pub fn unknown() -> Self {
        Self { dims: None }
    }

    pub fn from_dims(dims: Vec<Dim>) -> Self {
        Self { dims: Some(dims) }
    }

    pub fn from_static(dims: &[usize]) -> Self {
        Self::from_dims(dims.iter().map(|d| Dim::Static(*d)).collect())
    }

    /// Known rank with every extent unknown.
    pub fn with_rank(rank: usize) -> Self {
        Self::from_dims(vec![Dim::Unknown; rank])
    }

    pub fn dims(&self) -> Option<&[Dim]> {
        self.dims.as_deref()
    }

    pub fn rank(&self) -> Option<usize> {
        self.dims.as_ref().map(Vec::len)
    }

    pub fn dim(&self, axis: usize) -> Dim {
        self.dims
            .as_ref()
            .and_then(|dims| dims.get(axis).copied())
            .unwrap_or(Dim::Unknown)
    }

    pub fn to_static(&self) -> Option<Vec<usize>> {
        self.dims.as_ref()?.iter().map(|d| d.as_static()).collect()
    }

    pub fn element_count(&self) -> Option<usize> {
        self.to_static().map(|dims| dims.iter().product())
    }
}

/// Element-wise partial knowledge of a small integer tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartialElement {
    Unknown,
    Symbolic(DimSymbol),
    Known(i64),
}

impl PartialElement {
    pub fn known(self) -> Option<i64> {
        match self {
            PartialElement::Known(v) => Some(v),
            _ => None,
        }
    }

    pub fn from_dim(dim: Dim) -> Self {
        match dim {
            Dim::Static(v) => PartialElement::Known(v as i64),
            Dim::Symbolic(sym) => PartialElement::Symbolic(sym),
            Dim::Unknown => PartialElement::Unknown,
        }
    }

    pub fn to_dim(self) -> Dim {
        match self {
            PartialElement::Known(v) if v >= 0 => Dim::Static(v as usize),
            PartialElement::Symbolic(sym) => Dim::Symbolic(sym),
            _ => Dim::Unknown,
        }
    }
}

/// Static knowledge about a node's result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PartialTensor {
    pub dtype: Option<DType>,
    pub shape: PartialShape,
    /// Partial element values, only tracked for small rank-0/1 integer tensors.
    pub elements: Option<Vec<PartialElement>>,
    pub value: Option<ConstantTensor>,
}

impl PartialTensor {
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn new(dtype: Option<DType>, shape: PartialShape) -> Self {
        Self {
            dtype,
            shape,
            elements: None,
            value: None,
        }
    }

    pub fn with_static(dtype: DType, dims: &[usize]) -> Self {
        Self::new(Some(dtype), PartialShape::from_static(dims))
    }

    /// Descriptor of a fully known value; integer values also expose their elements.
    pub fn from_constant(value: &ConstantTensor) -> Self {
        let elements = match value.to_i64_vec() {
            Some(values) if value.rank() <= 1 => {
                Some(values.into_iter().map(PartialElement::Known).collect())
            }
            _ => None,
        };
        Self {
            dtype: Some(value.dtype()),
            shape: PartialShape::from_static(value.shape()),
            elements,
            value: Some(value.clone()),
        }
    }

    /// Attaches partial elements; a fully known integer vector also yields a value.
    pub fn with_elements(mut self, elements: Vec<PartialElement>) -> Self {
        let known: Option<Vec<i64>> = elements.iter().map(|e| e.known()).collect();
        if let (Some(values), Some(dims)) = (known, self.shape.to_static()) {
            if dims.iter().product::<usize>() == values.len() {
                let tensor = match self.dtype {
                    Some(DType::I32) => ConstantTensor::from_f64(
                        DType::I32,
                        dims,
                        &values.iter().map(|v| *v as f64).collect::<Vec<_>>(),
                    ),
                    _ => ConstantTensor::from_i64(dims, values),
                };
                self.value = Some(tensor);
            }
        }
        self.elements = Some(elements);
        self
    }

    pub fn rank(&self) -> Option<usize> {
        self.shape.rank()
    }

    pub fn static_shape(&self) -> Option<Vec<usize>> {
        self.shape.to_static()
    }

    pub fn is_constant(&self) -> bool {
        self.value.is_some()
    }

    /// Known integer contents, from the value or from fully known elements.
    pub fn known_ints(&self) -> Option<Vec<i64>> {
        if let Some(value) = &self.value {
            return value.to_i64_vec();
        }
        self.elements
            .as_ref()?
            .iter()
            .map(|e| e.known())
            .collect()
    }
}
