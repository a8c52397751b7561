//! Pluggable optimizer strategy.
//!
//! The compiler asks the strategy whether a filter predicate can be answered from an
//! index and, if so, lets it replace the filter. [`BaselineOptimizer`] never does.

use core::fmt;

use crate::compiler::ir::{ExprArena, ExprId};
use crate::engine::error::Error;
use crate::engine::runtime::StaticContext;

/// Shape of an indexable predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Indexability {
    No,
    /// `expr = value`, where `expr` depends on the context item and `value` does not.
    ExprEqValue,
    /// `value = expr`.
    ValueEqExpr,
}

pub trait Optimizer: Send + Sync + fmt::Debug {
    fn is_indexable_filter(&self, arena: &ExprArena, predicate: ExprId) -> Indexability;

    /// Replacement for `filter`, or `None` to keep it. Only called when
    /// [`Optimizer::is_indexable_filter`] did not answer [`Indexability::No`].
    fn try_indexed_filter(
        &self,
        arena: &mut ExprArena,
        filter: ExprId,
        side: Indexability,
        ctx: &StaticContext,
    ) -> Result<Option<ExprId>, Error>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BaselineOptimizer;

impl Optimizer for BaselineOptimizer {
    fn is_indexable_filter(&self, _arena: &ExprArena, _predicate: ExprId) -> Indexability {
        Indexability::No
    }

    fn try_indexed_filter(
        &self,
        _arena: &mut ExprArena,
        _filter: ExprId,
        _side: Indexability,
        _ctx: &StaticContext,
    ) -> Result<Option<ExprId>, Error> {
        Ok(None)
    }
}
