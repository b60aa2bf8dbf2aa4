//! Pass infrastructure: the context-aware pass trait, run statistics and the one-call
//! entry point that runs the default pipeline.

mod context;

use crate::backend::NumericBackend;
use crate::ir::Graph;
use crate::pipeline::PipelineOptimizer;

pub use context::{OptimizeConfig, OptimizeContext};

/// Result returned by a [`GraphPass`] after it runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassResult {
    /// Whether the pass changed the graph.
    pub changed: bool,
    /// Number of rewrite iterations executed while applying the pass.
    pub iterations: usize,
    /// Total number of rewrites applied by the pass.
    pub rewrites_applied: usize,
    /// Nodes removed by the pass (typically via dead-code elimination).
    pub erased_nodes: usize,
}

impl PassResult {
    /// Merges two run results, accumulating statistics.
    pub fn merge(self, other: PassResult) -> PassResult {
        PassResult {
            changed: self.changed || other.changed,
            iterations: self.iterations + other.iterations,
            rewrites_applied: self.rewrites_applied + other.rewrites_applied,
            erased_nodes: self.erased_nodes + other.erased_nodes,
        }
    }

    pub fn unchanged() -> Self {
        Self::default()
    }
}

/// Canonical interface implemented by optimization passes.
pub trait GraphPass: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, graph: &mut Graph, cx: &mut OptimizeContext) -> PassResult;
}

/// Runs the default pipeline over `graph`.
pub fn optimize(graph: &mut Graph, backend: &dyn NumericBackend, config: OptimizeConfig) -> PassResult {
    let optimizer = PipelineOptimizer::new(&config);
    let mut cx = OptimizeContext::new(backend, config);
    optimizer.optimize(graph, &mut cx)
}
