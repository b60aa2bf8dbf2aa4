use std::collections::HashSet;

use crate::backend::{DefaultShapeInference, NumericBackend, ShapeInference};

#[derive(Debug, Clone)]
pub struct OptimizeConfig {
    /// Upper bound on rounds of each fixed-point group in the pipeline.
    pub fixed_point_max_iters: usize,
    /// Upper bound on rewrites applied by one greedy driver run.
    pub rewrite_max_iters: usize,
    /// Append the denormal flush pass to the pipeline.
    pub flush_denormals: bool,
    /// Log each pass result at info level.
    pub pass_stats: bool,
    /// Constant folding skips results with more elements than this.
    pub fold_max_elements: usize,
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        Self {
            fixed_point_max_iters: 4,
            rewrite_max_iters: usize::MAX,
            flush_denormals: false,
            pass_stats: false,
            fold_max_elements: 1 << 24,
        }
    }
}

impl OptimizeConfig {
    /// Defaults overridden by the `IRFOLD_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            fixed_point_max_iters: crate::env::fixed_point_iters_override()
                .unwrap_or(defaults.fixed_point_max_iters),
            flush_denormals: crate::env::flush_denormals_override()
                .unwrap_or(defaults.flush_denormals),
            pass_stats: crate::env::pass_stats_enabled(),
            fold_max_elements: crate::env::fold_max_elements_override()
                .unwrap_or(defaults.fold_max_elements),
            ..defaults
        }
    }
}

pub struct OptimizeContext<'a> {
    backend: &'a dyn NumericBackend,
    inference: Box<dyn ShapeInference + 'a>,
    cfg: OptimizeConfig,
    failed_fold_keys: HashSet<u64>,
}

impl<'a> OptimizeContext<'a> {
    pub fn new(backend: &'a dyn NumericBackend, cfg: OptimizeConfig) -> Self {
        Self {
            backend,
            inference: Box::new(DefaultShapeInference),
            cfg,
            failed_fold_keys: HashSet::new(),
        }
    }

    /// Replaces the shape-inference rules used by partial evaluation.
    pub fn with_inference(mut self, inference: impl ShapeInference + 'a) -> Self {
        self.inference = Box::new(inference);
        self
    }

    pub fn backend(&self) -> &'a dyn NumericBackend {
        self.backend
    }

    pub fn inference(&self) -> &dyn ShapeInference {
        self.inference.as_ref()
    }

    pub fn config(&self) -> &OptimizeConfig {
        &self.cfg
    }

    /// Whether folding an operator with this fingerprint already failed in this run.
    pub fn is_failed_fold_key(&self, key: u64) -> bool {
        self.failed_fold_keys.contains(&key)
    }

    pub fn record_failed_fold_key(&mut self, key: u64) {
        self.failed_fold_keys.insert(key);
    }
}
