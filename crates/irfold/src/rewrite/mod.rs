//! Subgraph pattern rewriting: patterns and replacements are themselves small graphs whose
//! Input nodes act as placeholders.

mod builtin;
mod pattern;

pub use builtin::{builtin_patterns, BuiltinPattern};
pub use pattern::{match_pattern, replace_pattern, splice_replacement, PatternMatch};
