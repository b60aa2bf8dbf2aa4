//! Dataflow graph IR for imported neural-network models, together with the rewrite
//! machinery that shrinks it before execution: a subgraph pattern rewriter, a deferred
//! layout-permutation algebra used by the importer, and a pipeline of optimization passes.

pub mod backend;
pub mod driver;
mod env;
pub mod hashing;
pub mod import;
pub mod ir;
pub mod layout;
pub mod optimizer;
pub mod passes;
pub mod pipeline;
pub mod rewrite;

pub use backend::{evaluate, BackendError, BackendResult, NumericBackend, OpArgs};
pub use import::{
    import_model, import_model_with, ImportError, ImportOptions, ImportWarning, ImportedModel,
    ModelDescription, Severity,
};
pub use ir::{
    Argument, AttributeTable, ConstantTensor, DType, Dim, Graph, GraphError, InsertPoint, Node,
    NodeId, NodeKind, Op, PartialShape, PartialTensor, TensorData,
};
pub use layout::{DeferredValue, Permutation};
pub use optimizer::{optimize, GraphPass, OptimizeConfig, OptimizeContext, PassResult};
