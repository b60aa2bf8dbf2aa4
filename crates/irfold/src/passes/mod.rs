//! Optimization passes over a [`Graph`](crate::ir::Graph).

mod constant_folding;
mod contraction;
mod dce;
mod dedup;
mod denormal;
mod linear_fusion;
mod noop_removal;
mod pattern_rewrite;
mod transpose_chain;
mod util;

pub use constant_folding::ConstantFoldingPass;
pub use contraction::{contraction_rules, ContractionPass};
pub use dce::DeadCodeEliminationPass;
pub use dedup::DuplicateEliminationPass;
pub use denormal::DenormalFlushPass;
pub use linear_fusion::LinearFusionPass;
pub use noop_removal::NoOpRemovalPass;
pub use pattern_rewrite::PatternRewritePass;
pub use transpose_chain::TransposeChainPass;

pub use crate::optimizer::{GraphPass, PassResult};
