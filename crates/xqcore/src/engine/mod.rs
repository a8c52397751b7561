//! Run-time side of the engine: errors, contexts, functions, collations and the
//! evaluator.

pub mod calculator;
pub mod collation;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod runtime;
