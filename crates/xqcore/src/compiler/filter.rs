//! Predicate classification and filter rewrites.
//!
//! Rewrites are tried in a fixed order and the first one that applies wins:
//! constant predicates, literal positions, position ranges, `last()`, comparisons of
//! `position()` with a focus-independent number, independent numeric predicates,
//! splitting a conjunction, the pluggable optimizer, and finally hoisting of
//! focus-independent subexpressions out of the predicate.

use crate::compiler::ir::{
    ArithOp, BooleanOp, ComparisonOp, ExprId, ExprKind, FilterFlags,
};
use crate::compiler::optimizer::Indexability;
use crate::compiler::promotion;
use crate::compiler::properties::Dependencies;
use crate::compiler::visitor::{CResult, ExpressionVisitor};
use crate::engine::calculator::{CalculatorRegistry, CalculatorSlot};
use crate::engine::evaluator::convert::effective_boolean_value;
use crate::model::NoNode;
use crate::types::{AtomicType, Cardinality, ItemType, Relationship};
use crate::xdm::{XdmAtomicValue, XdmItem};

pub(crate) fn classify(v: &ExpressionVisitor<'_>, predicate: ExprId) -> FilterFlags {
    let th = v.ctx.type_hierarchy();
    let t = v.item_type(predicate);
    let props = v.arena.properties(predicate);
    let deps = props.dependencies;
    FilterFlags {
        positional: th.relationship(&t, &ItemType::NUMERIC) != Relationship::Disjoint
            || deps.intersects(Dependencies::POSITION | Dependencies::LAST),
        singleton_boolean: props.cardinality == Cardinality::EXACTLY_ONE && t == ItemType::BOOLEAN,
        independent_numeric: t != ItemType::Empty
            && th.is_subtype(&t, &ItemType::NUMERIC)
            && !props.cardinality.allows_many()
            && !deps.intersects(Dependencies::CONTEXT_ITEM | Dependencies::POSITION),
    }
}

/// Recomputes the flags of filter `id` from its current predicate.
pub(crate) fn reclassify(v: &mut ExpressionVisitor<'_>, id: ExprId) -> CResult<()> {
    let ExprKind::Filter { base, predicate, flags } = *v.arena.kind(id) else {
        return Ok(());
    };
    let fresh = classify(v, predicate);
    if fresh != flags {
        v.arena.replace_kind(id, ExprKind::Filter { base, predicate, flags: fresh })?;
    }
    Ok(())
}

/// A single number that does not change from one item to the next.
fn is_focus_free_number(v: &ExpressionVisitor<'_>, id: ExprId) -> bool {
    v.arena.cardinality(id) == Cardinality::EXACTLY_ONE
        && !v.arena.dependencies(id).intersects(Dependencies::FOCUS)
        && v.ctx.type_hierarchy().is_subtype(&v.item_type(id), &ItemType::NUMERIC)
}

pub(crate) fn optimize(v: &mut ExpressionVisitor<'_>, id: ExprId) -> CResult<ExprId> {
    reclassify(v, id)?;
    let ExprKind::Filter { base, predicate, flags } = *v.arena.kind(id) else {
        return Ok(id);
    };

    if let Some(out) = literal_predicate(v, id, base, predicate) {
        return Ok(out);
    }
    if let Some(out) = positional_rewrite(v, id, base, predicate)? {
        return Ok(out);
    }
    if flags.independent_numeric && !v.arena.dependencies(predicate).intersects(Dependencies::FOCUS) {
        let out = v.alloc_like(ExprKind::Subscript { base, index: predicate }, id);
        v.trace(out, "Filter with an independent numeric predicate rewritten as subscript");
        return Ok(out);
    }
    if let Some(out) = split_conjunction(v, id, base, predicate)? {
        return Ok(out);
    }

    let optimizer = std::sync::Arc::clone(&v.ctx.optimizer);
    let side = optimizer.is_indexable_filter(&*v.arena, predicate);
    if side != Indexability::No
        && let Some(out) = optimizer.try_indexed_filter(v.arena, id, side, v.ctx)?
    {
        v.trace(out, "Filter replaced by indexed access");
        return Ok(out);
    }

    if v.arena.is_literal(base) {
        let folded = v.try_fold(id);
        if folded != id {
            return Ok(folded);
        }
    }
    promotion::promote(v, id)
}

/// Rules for a literal predicate: constant truth value or a literal position.
fn literal_predicate(v: &mut ExpressionVisitor<'_>, id: ExprId, base: ExprId, predicate: ExprId) -> Option<ExprId> {
    let values = v.arena.literal(predicate)?;
    if let [n] = values
        && n.is_numeric()
    {
        return Some(match n.as_whole_number() {
            Some(1) => {
                let out = v.alloc_like(ExprKind::FirstItem(base), id);
                v.trace(out, "Rewrote filter as first-item");
                out
            }
            Some(k) if k >= 2 => {
                let out = v.alloc_like(ExprKind::Subscript { base, index: predicate }, id);
                v.trace(out, "Rewrote filter as subscript");
                out
            }
            _ => {
                let out = v.empty_like(id);
                v.trace(out, "Filter with a position that selects nothing removed");
                out
            }
        });
    }
    let items: Vec<XdmItem<NoNode>> = values.iter().cloned().map(XdmItem::Atomic).collect();
    match effective_boolean_value(&items) {
        Ok(true) => {
            v.trace(base, "Redundant filter removed");
            Some(base)
        }
        Ok(false) => {
            let out = v.empty_like(id);
            v.trace(out, "Filter with a false predicate removed");
            Some(out)
        }
        // the error belongs to run time
        Err(_) => None,
    }
}

/// Rewrites predicates that select by position into windowing operators.
fn positional_rewrite(
    v: &mut ExpressionVisitor<'_>,
    id: ExprId,
    base: ExprId,
    predicate: ExprId,
) -> CResult<Option<ExprId>> {
    match v.arena.kind(predicate).clone() {
        ExprKind::Last => {
            let out = v.alloc_like(ExprKind::LastItem(base), id);
            v.trace(out, "Rewrote filter as last-item");
            Ok(Some(out))
        }
        ExprKind::IntegerRangeTest { value, min, max } if matches!(v.arena.kind(value), ExprKind::Position) => {
            if v.arena.dependencies(min).intersects(Dependencies::FOCUS) {
                return Ok(None);
            }
            if matches!(v.arena.kind(max), ExprKind::Last) {
                let out = v.alloc_like(ExprKind::TailFrom { base, start: min }, id);
                v.trace(out, "Rewrote filter as tail");
                return Ok(Some(out));
            }
            if v.arena.dependencies(max).intersects(Dependencies::FOCUS) {
                return Ok(None);
            }
            let out = v.alloc_like(ExprKind::Slice { base, low: min, high: max }, id);
            v.trace(out, "Rewrote filter as slice");
            Ok(Some(out))
        }
        ExprKind::ValueComparison { op, lhs, rhs, .. } | ExprKind::GeneralComparison { op, lhs, rhs, .. } => {
            let is_position = |x: ExprId| matches!(v.arena.kind(x), ExprKind::Position);
            let (op, n) = if is_position(lhs) && is_focus_free_number(v, rhs) {
                (op, rhs)
            } else if is_position(rhs) && is_focus_free_number(v, lhs) {
                (op.inverse(), lhs)
            } else {
                return Ok(None);
            };
            position_comparison(v, id, base, op, n)
        }
        _ => Ok(None),
    }
}

fn position_comparison(
    v: &mut ExpressionVisitor<'_>,
    id: ExprId,
    base: ExprId,
    op: ComparisonOp,
    n: ExprId,
) -> CResult<Option<ExprId>> {
    let integer = v.ctx.type_hierarchy().is_subtype(&v.item_type(n), &ItemType::INTEGER);
    let kind = match op {
        ComparisonOp::Eq => ExprKind::Subscript { base, index: n },
        ComparisonOp::Le => ExprKind::Slice { base, low: one(v, id), high: n },
        ComparisonOp::Ge => ExprKind::TailFrom { base, start: n },
        ComparisonOp::Lt if integer => {
            let high = offset(v, n, ArithOp::Minus)?;
            ExprKind::Slice { base, low: one(v, id), high }
        }
        ComparisonOp::Gt if integer => ExprKind::TailFrom { base, start: offset(v, n, ArithOp::Plus)? },
        _ => return Ok(None),
    };
    let out = v.alloc_like(kind, id);
    v.trace(out, "Rewrote positional filter as windowing operator");
    Ok(Some(out))
}

fn one(v: &mut ExpressionVisitor<'_>, like: ExprId) -> ExprId {
    v.alloc_like(ExprKind::Literal(vec![XdmAtomicValue::Integer(1)]), like)
}

/// `n + 1` or `n - 1` for an integer `n`, folded when `n` is a literal. A bound that leaves
/// the integer range is computed as a double, so the window stays empty or unbounded
/// instead of overflowing.
#[allow(clippy::cast_precision_loss)]
fn offset(v: &mut ExpressionVisitor<'_>, n: ExprId, op: ArithOp) -> CResult<ExprId> {
    if let Some(XdmAtomicValue::Integer(i)) = v.arena.single_literal(n) {
        let i = *i;
        let shifted = match op {
            ArithOp::Plus => i.checked_add(1).map_or(XdmAtomicValue::Double(i as f64 + 1.0), XdmAtomicValue::Integer),
            _ => i.checked_sub(1).map_or(XdmAtomicValue::Double(i as f64 - 1.0), XdmAtomicValue::Integer),
        };
        return Ok(v.alloc_like(ExprKind::Literal(vec![shifted]), n));
    }
    let rhs = v.alloc_like(ExprKind::Literal(vec![XdmAtomicValue::Double(1.0)]), n);
    let calculator = CalculatorRegistry::global()
        .lookup(op, AtomicType::Integer, AtomicType::Double)
        .map_or(CalculatorSlot::Deferred, CalculatorSlot::Resolved);
    Ok(v.alloc_like(ExprKind::Arithmetic { op, lhs: n, rhs, calculator }, n))
}

/// `E[A and B]` where only `A` reads the position becomes `E[A][B]`.
fn split_conjunction(
    v: &mut ExpressionVisitor<'_>,
    id: ExprId,
    base: ExprId,
    predicate: ExprId,
) -> CResult<Option<ExprId>> {
    let ExprKind::Boolean { op: BooleanOp::And, lhs, rhs } = *v.arena.kind(predicate) else {
        return Ok(None);
    };
    let boolean = |x: ExprId| {
        v.arena.cardinality(x) == Cardinality::EXACTLY_ONE && v.item_type(x) == ItemType::BOOLEAN
    };
    if !boolean(lhs) || !boolean(rhs) {
        return Ok(None);
    }
    let positional = |x: ExprId| v.arena.dependencies(x).intersects(Dependencies::POSITION | Dependencies::LAST);
    let (first, second) = match (positional(lhs), positional(rhs)) {
        (true, false) => (lhs, rhs),
        (false, true) => (rhs, lhs),
        _ => return Ok(None),
    };
    let inner = v.alloc_like(ExprKind::Filter { base, predicate: first, flags: FilterFlags::default() }, id);
    let inner_opt = optimize(v, inner)?;
    let outer = v.alloc_like(ExprKind::Filter { base: inner_opt, predicate: second, flags: FilterFlags::default() }, id);
    v.trace(outer, "Composite filter split");
    optimize(v, outer).map(Some)
}
