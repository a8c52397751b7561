//! Type checking and rewrites for general and value comparisons.

use crate::compiler::ir::{ComparisonCardinality, ComparisonOp, ExprId, ExprKind, RoleLocator};
use crate::compiler::type_checker::static_type_check;
use crate::compiler::visitor::{CResult, ExpressionVisitor};
use crate::engine::error::Error;
use crate::engine::evaluator::comparison::comparable_types;
use crate::engine::functions::{max_ignoring_nan, min_ignoring_nan};
use crate::types::{AtomicType, Cardinality, ItemType, SequenceType};
use crate::xdm::XdmAtomicValue;

fn check_operands(
    v: &mut ExpressionVisitor<'_>,
    id: ExprId,
    symbol: &str,
    operands: [ExprId; 2],
    required: SequenceType,
) -> CResult<[ExprId; 2]> {
    let mut out = operands;
    for (i, operand) in out.iter_mut().enumerate() {
        let checked = static_type_check(v, *operand, required, &RoleLocator::operand(symbol, i))?;
        v.replace_child(id, *operand, checked)?;
        *operand = checked;
    }
    Ok(out)
}

/// Rejects two single operands whose types can never be compared.
fn check_comparable(
    v: &ExpressionVisitor<'_>,
    id: ExprId,
    symbol: &str,
    operands: [ExprId; 2],
    untyped_as_string: bool,
) -> CResult<()> {
    if operands.iter().any(|o| v.arena.cardinality(*o) != Cardinality::EXACTLY_ONE) {
        return Ok(());
    }
    let th = v.ctx.type_hierarchy();
    let prim = |o: ExprId| match th.primitive_of(&v.item_type(o)) {
        ItemType::Atomic(AtomicType::UntypedAtomic) if untyped_as_string => Some(AtomicType::String),
        ItemType::Atomic(t) => Some(t),
        _ => None,
    };
    if let (Some(a), Some(b)) = (prim(operands[0]), prim(operands[1]))
        && !comparable_types(a, b)
    {
        return Err(Error::type_error(format!("cannot compare {a} with {b} using '{symbol}'"))
            .make_static()
            .maybe_set_location(v.arena.location(id)));
    }
    Ok(())
}

pub(crate) fn type_check_general(
    v: &mut ExpressionVisitor<'_>,
    id: ExprId,
    op: ComparisonOp,
    lhs: ExprId,
    rhs: ExprId,
) -> CResult<ExprId> {
    let symbol = op.general_symbol();
    let required = SequenceType::atomic(AtomicType::AnyAtomic, Cardinality::ZERO_OR_MORE);
    let operands = check_operands(v, id, symbol, [lhs, rhs], required)?;
    if operands.iter().any(|o| v.arena.is_empty_literal(*o)) {
        return Ok(v.alloc_like(ExprKind::Literal(vec![XdmAtomicValue::Boolean(false)]), id));
    }
    check_comparable(v, id, symbol, operands, false)?;
    Ok(v.try_fold(id))
}

pub(crate) fn type_check_value(
    v: &mut ExpressionVisitor<'_>,
    id: ExprId,
    op: ComparisonOp,
    lhs: ExprId,
    rhs: ExprId,
    result_when_empty: Option<bool>,
    convert_untyped: bool,
) -> CResult<ExprId> {
    let symbol = op.value_symbol();
    let operands = check_operands(v, id, symbol, [lhs, rhs], SequenceType::optional(AtomicType::AnyAtomic))?;
    if operands.iter().any(|o| v.arena.is_empty_literal(*o)) {
        let values = result_when_empty.map(XdmAtomicValue::Boolean).into_iter().collect();
        return Ok(v.alloc_like(ExprKind::Literal(values), id));
    }
    check_comparable(v, id, symbol, operands, !convert_untyped)?;
    Ok(v.try_fold(id))
}

fn is_zero(v: &ExpressionVisitor<'_>, id: ExprId) -> bool {
    v.arena.single_literal(id).is_some_and(|x| x.is_numeric() && x.as_whole_number() == Some(0))
}

fn count_argument(v: &ExpressionVisitor<'_>, id: ExprId) -> Option<ExprId> {
    match v.arena.kind(id) {
        ExprKind::FunctionCall { name, args, .. } if name.is_fn("count") && args.len() == 1 => Some(args[0]),
        _ => None,
    }
}

/// `count(E) = 0` becomes `empty(E)`; `count(E) != 0` and `count(E) > 0` become `exists(E)`.
fn count_rewrite(
    v: &mut ExpressionVisitor<'_>,
    id: ExprId,
    op: ComparisonOp,
    lhs: ExprId,
    rhs: ExprId,
) -> CResult<Option<ExprId>> {
    let (op, counted) = if is_zero(v, rhs) {
        (op, count_argument(v, lhs))
    } else if is_zero(v, lhs) {
        (op.inverse(), count_argument(v, rhs))
    } else {
        return Ok(None);
    };
    let Some(seq) = counted else {
        return Ok(None);
    };
    let function = match op {
        ComparisonOp::Eq => "empty",
        ComparisonOp::Ne | ComparisonOp::Gt => "exists",
        _ => return Ok(None),
    };
    let call = v.try_call(function, vec![seq], id)?;
    if let Some(call) = call {
        v.trace(call, &format!("Comparison with count() replaced by fn:{function}"));
    }
    Ok(call)
}

pub(crate) fn optimize_general(v: &mut ExpressionVisitor<'_>, id: ExprId) -> CResult<ExprId> {
    let ExprKind::GeneralComparison { op, lhs, rhs, collation, .. } = v.arena.kind(id).clone() else {
        return Ok(id);
    };
    if let Some(out) = count_rewrite(v, id, op, lhs, rhs)? {
        return Ok(v.try_fold(out));
    }

    if op == ComparisonOp::Eq {
        let th = v.th();
        for (range, value) in [(lhs, rhs), (rhs, lhs)] {
            if let ExprKind::Range { start, end } = *v.arena.kind(range)
                && th.is_subtype(&v.item_type(value), &ItemType::NUMERIC)
            {
                let test = v.alloc_like(ExprKind::IntegerRangeTest { value, min: start, max: end }, id);
                v.trace(test, "Comparison with a range replaced by an integer range test");
                return Ok(v.try_fold(test));
            }
        }
    }

    let single_l = !v.arena.cardinality(lhs).allows_many();
    let single_r = !v.arena.cardinality(rhs).allows_many();
    if single_l && single_r {
        let vc = ExprKind::ValueComparison {
            op,
            lhs,
            rhs,
            result_when_empty: Some(false),
            convert_untyped: true,
            collation,
        };
        let out = v.alloc_like(vc, id);
        v.trace(out, "General comparison reduced to value comparison");
        return Ok(v.try_fold(out));
    }
    if single_r || single_l {
        let (op, lhs, rhs) = if single_r { (op, lhs, rhs) } else { (op.inverse(), rhs, lhs) };
        v.arena.replace_kind(
            id,
            ExprKind::GeneralComparison { op, lhs, rhs, mode: ComparisonCardinality::ManyToOne, collation },
        )?;
        v.trace(id, "General comparison evaluated against a single value");
        return Ok(v.try_fold(id));
    }

    // with untyped values on both sides the comparison type is only known per pair
    if op.is_ordering() {
        let th = v.th();
        if (th.is_subtype(&v.item_type(lhs), &ItemType::NUMERIC) || th.is_subtype(&v.item_type(rhs), &ItemType::NUMERIC))
            && let Some(out) = extremum_rewrite(v, id, op, lhs, rhs, collation)?
        {
            return Ok(out);
        }
    }
    Ok(v.try_fold(id))
}

/// `A < B` holds for some pair exactly when `min(A) < max(B)`; likewise `max(A) > min(B)`.
/// NaN never takes part in a true ordering, so the extremes skip it, and an empty side
/// makes the comparison false.
fn extremum_rewrite(
    v: &mut ExpressionVisitor<'_>,
    id: ExprId,
    op: ComparisonOp,
    lhs: ExprId,
    rhs: ExprId,
    collation: Option<String>,
) -> CResult<Option<ExprId>> {
    let (left_fn, right_fn) = match op {
        ComparisonOp::Lt | ComparisonOp::Le => (min_ignoring_nan(), max_ignoring_nan()),
        _ => (max_ignoring_nan(), min_ignoring_nan()),
    };
    if v.ctx.functions.resolve(&left_fn, 1).is_err() || v.ctx.functions.resolve(&right_fn, 1).is_err() {
        return Ok(None);
    }
    let (Some(a), Some(b)) =
        (v.try_call_named(&left_fn, vec![lhs], lhs)?, v.try_call_named(&right_fn, vec![rhs], rhs)?)
    else {
        return Ok(None);
    };
    let vc = ExprKind::ValueComparison {
        op,
        lhs: a,
        rhs: b,
        result_when_empty: Some(false),
        convert_untyped: true,
        collation,
    };
    let out = v.alloc_like(vc, id);
    v.trace(out, &format!("General comparison rewritten as {left_fn}/{right_fn} comparison"));
    Ok(Some(v.try_fold(out)))
}

pub(crate) fn optimize_value(v: &mut ExpressionVisitor<'_>, id: ExprId) -> CResult<ExprId> {
    if let ExprKind::ValueComparison { op, lhs, rhs, .. } = *v.arena.kind(id)
        && let Some(out) = count_rewrite(v, id, op, lhs, rhs)?
    {
        return Ok(v.try_fold(out));
    }
    Ok(v.try_fold(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::ExprArena;
    use crate::engine::runtime::StaticContext;
    use crate::xdm::ExpandedName;

    fn lit(a: &mut ExprArena, v: XdmAtomicValue) -> ExprId {
        a.alloc(ExprKind::Literal(vec![v]))
    }

    #[test]
    fn count_equals_zero_becomes_empty() {
        let mut a = ExprArena::new();
        let ctx = StaticContext::default();
        let dot = a.alloc(ExprKind::ContextItem { item_type: ItemType::AnyItem });
        let count = a.alloc(ExprKind::FunctionCall { name: ExpandedName::fn_name("count"), args: vec![dot], signature: None });
        let zero = lit(&mut a, XdmAtomicValue::Integer(0));
        let cmp = a.alloc(ExprKind::GeneralComparison {
            op: ComparisonOp::Eq,
            lhs: zero,
            rhs: count,
            mode: ComparisonCardinality::ManyToMany,
            collation: None,
        });
        let mut v = ExpressionVisitor::new(&mut a, &ctx);
        let out = optimize_general(&mut v, cmp).unwrap();
        let ExprKind::FunctionCall { name, args, .. } = a.kind(out) else { panic!("expected a call") };
        assert!(name.is_fn("empty"));
        assert_eq!(args.as_slice(), &[dot]);
    }

    #[test]
    fn incomparable_singletons_are_rejected() {
        let mut a = ExprArena::new();
        let ctx = StaticContext::default();
        let l = lit(&mut a, XdmAtomicValue::Boolean(true));
        let r = lit(&mut a, XdmAtomicValue::Integer(1));
        let cmp = a.alloc(ExprKind::ValueComparison {
            op: ComparisonOp::Eq,
            lhs: l,
            rhs: r,
            result_when_empty: None,
            convert_untyped: false,
            collation: None,
        });
        let mut v = ExpressionVisitor::new(&mut a, &ctx);
        let err = type_check_value(&mut v, cmp, ComparisonOp::Eq, l, r, None, false).unwrap_err();
        assert!(err.is_static());
    }
}
