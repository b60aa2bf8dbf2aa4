use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::ir::Graph;
use crate::optimizer::{GraphPass, OptimizeConfig, OptimizeContext, PassResult};
use crate::passes::{
    ConstantFoldingPass, ContractionPass, DeadCodeEliminationPass, DenormalFlushPass,
    DuplicateEliminationPass, LinearFusionPass, NoOpRemovalPass, PatternRewritePass,
    TransposeChainPass,
};

/// One entry of a pass schedule. `FixedPoint` repeats its steps until a round changes
/// nothing or `max_iters` rounds ran.
pub enum Step {
    Pass(Arc<dyn GraphPass>),
    FixedPoint { max_iters: usize, steps: Vec<Step> },
}

/// Assembles a pass schedule for `PipelineOptimizer::from_steps`.
pub struct PipelineBuilder {
    steps: Vec<Step>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn pass(&mut self, pass: Arc<dyn GraphPass>) {
        self.steps.push(Step::Pass(pass));
    }

    pub fn fixed_point<F>(&mut self, max_iters: usize, build: F)
    where
        F: FnOnce(&mut PipelineBuilder),
    {
        let mut inner = PipelineBuilder::new();
        build(&mut inner);
        self.steps.push(Step::FixedPoint {
            max_iters: max_iters.max(1),
            steps: inner.steps,
        });
    }

    pub fn finish(self) -> Vec<Step> {
        self.steps
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a pass schedule over a graph. `new` builds the default schedule: identity and
/// dead-node cleanup, the built-in patterns and a first constant fold, then contraction,
/// transpose chains and linear fusion to a fixed point, then a second fold, duplicate
/// merging and a closing cleanup.
pub struct PipelineOptimizer {
    steps: Vec<Step>,
    log_stats: bool,
    run_counter: AtomicUsize,
}

impl PipelineOptimizer {
    pub fn new(cfg: &OptimizeConfig) -> Self {
        let mut builder = PipelineBuilder::new();

        builder.pass(Arc::new(NoOpRemovalPass));
        builder.pass(Arc::new(DeadCodeEliminationPass));
        builder.pass(Arc::new(PatternRewritePass::default()));
        builder.pass(Arc::new(ConstantFoldingPass));

        builder.fixed_point(cfg.fixed_point_max_iters, |p| {
            p.pass(Arc::new(ContractionPass));
            p.pass(Arc::new(TransposeChainPass));
            p.pass(Arc::new(LinearFusionPass));
        });

        builder.pass(Arc::new(ConstantFoldingPass));
        builder.pass(Arc::new(DuplicateEliminationPass));
        builder.pass(Arc::new(ContractionPass));
        builder.pass(Arc::new(NoOpRemovalPass));
        builder.pass(Arc::new(DeadCodeEliminationPass));

        if cfg.flush_denormals {
            builder.pass(Arc::new(DenormalFlushPass));
        }

        Self::from_steps(builder.finish(), cfg.pass_stats)
    }

    /// Schedule of caller-chosen passes; `log_stats` logs every pass result at info level.
    pub fn from_steps(steps: Vec<Step>, log_stats: bool) -> Self {
        Self {
            steps,
            log_stats,
            run_counter: AtomicUsize::new(0),
        }
    }

    pub fn optimize(&self, graph: &mut Graph, cx: &mut OptimizeContext) -> PassResult {
        let run_id = self.run_counter.fetch_add(1, Ordering::Relaxed);
        let mut result = PassResult::default();
        run_steps(&self.steps, graph, cx, run_id, &mut result, self.log_stats);
        if self.log_stats {
            log::info!(
                "optimizer run {run_id}: changed={} rewrites={} erased={} live={}",
                result.changed,
                result.rewrites_applied,
                result.erased_nodes,
                graph.live_count()
            );
        }
        result
    }
}

fn run_steps(
    steps: &[Step],
    graph: &mut Graph,
    cx: &mut OptimizeContext,
    run_id: usize,
    totals: &mut PassResult,
    log_stats: bool,
) -> bool {
    let mut changed_any = false;
    for step in steps {
        match step {
            Step::Pass(pass) => {
                let stats = pass.run(graph, cx);
                changed_any |= stats.changed;
                *totals = totals.merge(stats);
                if log_stats {
                    log::info!(
                        "run {run_id} pass {}: changed={} iterations={} rewrites={} erased={} live={}",
                        pass.name(),
                        stats.changed,
                        stats.iterations,
                        stats.rewrites_applied,
                        stats.erased_nodes,
                        graph.live_count()
                    );
                }
                if stats.changed {
                    log::trace!("after {}:\n{}", pass.name(), graph);
                }
                debug_assert!(
                    graph.verify().is_ok(),
                    "{} left an invalid graph: {:?}",
                    pass.name(),
                    graph.verify()
                );
            }
            Step::FixedPoint { max_iters, steps } => {
                let mut iter = 0usize;
                loop {
                    if iter >= *max_iters {
                        break;
                    }
                    iter += 1;
                    let mut local = PassResult::default();
                    let changed = run_steps(steps, graph, cx, run_id, &mut local, log_stats);
                    *totals = totals.merge(local);
                    changed_any |= changed;
                    if !changed {
                        break;
                    }
                }
            }
        }
    }
    changed_any
}
