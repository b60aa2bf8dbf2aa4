//! Axis permutations and the deferred-transpose values the importer threads through
//! operators whose source layout differs from the IR's.

mod deferred;
mod permutation;

pub use deferred::{get_canonical_value, DeferredValue};
pub use permutation::{Permutation, MAX_RANK};
