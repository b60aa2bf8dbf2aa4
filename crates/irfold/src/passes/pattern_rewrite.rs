use crate::ir::Graph;
use crate::optimizer::{GraphPass, OptimizeContext, PassResult};
use crate::rewrite::{builtin_patterns, replace_pattern, BuiltinPattern};

/// Replaces each occurrence of a pattern subgraph by its fixed replacement.
pub struct PatternRewritePass {
    patterns: Vec<BuiltinPattern>,
}

impl PatternRewritePass {
    const NAME: &'static str = "pattern-rewrite";

    pub fn new(patterns: Vec<BuiltinPattern>) -> Self {
        Self { patterns }
    }

    pub fn patterns(&self) -> &[BuiltinPattern] {
        &self.patterns
    }
}

impl Default for PatternRewritePass {
    fn default() -> Self {
        Self::new(builtin_patterns())
    }
}

impl GraphPass for PatternRewritePass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut Graph, _cx: &mut OptimizeContext) -> PassResult {
        let mut rewritten = 0;
        for builtin in &self.patterns {
            let count = replace_pattern(graph, &builtin.pattern, |_, _, _| Some(builtin.replacement.clone()));
            if count > 0 {
                log::debug!("{} rewrote {count} sites", builtin.name);
            }
            rewritten += count;
        }
        let erased = if rewritten > 0 { graph.eliminate_dead_code() } else { 0 };
        PassResult {
            changed: rewritten > 0,
            iterations: 1,
            rewrites_applied: rewritten,
            erased_nodes: rewritten + erased,
        }
    }
}
