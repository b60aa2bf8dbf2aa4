//! Graph intermediate representation.

mod argument;
mod attributes;
mod descriptor;
mod dtype;
mod graph;
mod op;
mod tensor;
mod text;

pub use argument::Argument;
pub use attributes::AttributeTable;
pub use descriptor::{Dim, DimSymbol, PartialElement, PartialShape, PartialTensor};
pub use dtype::DType;
pub use graph::{Graph, GraphError, InsertPoint, Node, NodeId, NodeKind};
pub use op::Op;
pub use tensor::{ConstantTensor, TensorData};
