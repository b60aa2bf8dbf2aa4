use crate::ir::Graph;
use crate::optimizer::{GraphPass, OptimizeContext, PassResult};

/// Zeroes subnormal elements of every floating-point constant in place.
#[derive(Default)]
pub struct DenormalFlushPass;

impl DenormalFlushPass {
    const NAME: &'static str = "denormal-flush";
}

impl GraphPass for DenormalFlushPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut Graph, _cx: &mut OptimizeContext) -> PassResult {
        let mut flushed = 0usize;
        let tensors = graph.map_constants(|name, tensor| {
            let count = tensor.flush_denormals();
            if count > 0 {
                log::debug!("flushed {count} denormal values in {name}");
            }
            flushed += count;
            count > 0
        });
        PassResult {
            changed: tensors > 0,
            iterations: 1,
            rewrites_applied: flushed,
            erased_nodes: 0,
        }
    }
}
