//! Straightforward CPU kernels for every irfold operator.
//!
//! Values are widened to `f64` for computation and narrowed back to the operator's result
//! type, which keeps the kernels short at the cost of speed. Meant for constant folding
//! during tests and for checking optimized graphs against their unoptimized originals.

pub mod cpu;

pub use cpu::RefCpuBackend;
