//! Type checking of binary arithmetic: operand conversion and calculator selection.

use tracing::debug;

use crate::compiler::ir::{ArithOp, ConversionMode, ExprId, ExprKind, RoleLocator};
use crate::compiler::type_checker::static_type_check;
use crate::compiler::visitor::{CResult, ExpressionVisitor};
use crate::engine::calculator::{CalculatorRegistry, CalculatorSlot};
use crate::engine::error::Error;
use crate::engine::evaluator::evaluate_constant;
use crate::types::{AtomicType, Cardinality, ItemType, Relationship, SequenceType};

/// An atomic type specific enough to pick a calculator.
fn concrete(t: ItemType) -> Option<AtomicType> {
    match t {
        ItemType::Atomic(AtomicType::AnyAtomic | AtomicType::Numeric | AtomicType::UntypedAtomic) => None,
        ItemType::Atomic(a) => Some(a),
        _ => None,
    }
}

pub(crate) fn type_check(
    v: &mut ExpressionVisitor<'_>,
    id: ExprId,
    op: ArithOp,
    lhs: ExprId,
    rhs: ExprId,
) -> CResult<ExprId> {
    let mut operands = [lhs, rhs];
    for (i, operand) in operands.iter_mut().enumerate() {
        let role = RoleLocator::operand(op.symbol(), i);
        let checked = static_type_check(v, *operand, SequenceType::optional(AtomicType::AnyAtomic), &role)?;
        v.replace_child(id, *operand, checked)?;
        *operand = checked;
    }

    if let Some(empty) = operands.iter().position(|o| v.arena.is_empty_literal(*o)) {
        let other = v.item_type(operands[1 - empty]);
        if other.is_atomic()
            && other != ItemType::UNTYPED
            && v.th().relationship(&other, &ItemType::NUMERIC) == Relationship::Disjoint
        {
            v.warn(id, format!("operator '{}' is not defined for {other}; the operand can only be empty", op.symbol()));
        }
        return Ok(v.empty_like(id));
    }

    let types = [v.item_type(operands[0]), v.item_type(operands[1])];
    for i in 0..2 {
        let other = types[1 - i];
        let numeric_other = other == ItemType::UNTYPED || v.th().is_subtype(&other, &ItemType::NUMERIC);
        if types[i] == ItemType::UNTYPED && numeric_other {
            let convert = ExprKind::UntypedConvert {
                operand: operands[i],
                target: AtomicType::Double,
                mode: ConversionMode::All,
            };
            let mut converted = v.alloc_like(convert, operands[i]);
            if v.arena.is_literal(operands[i]) {
                let values = evaluate_constant(&*v.arena, converted, v.ctx)
                    .map_err(|e| e.make_static().maybe_set_location(v.arena.location(id)))?;
                converted = v.alloc_like(ExprKind::Literal(values), converted);
            }
            v.replace_child(id, operands[i], converted)?;
            operands[i] = converted;
        }
    }

    let th = v.th();
    let left = concrete(th.primitive_of(&v.item_type(operands[0])));
    let right = concrete(th.primitive_of(&v.item_type(operands[1])));
    let calculator = match (left, right) {
        (Some(l), Some(r)) => match CalculatorRegistry::global().lookup(op, l, r) {
            Some(calc) => CalculatorSlot::Resolved(calc),
            None => {
                let may_be_empty = [operands[0], operands[1]].iter().any(|o| v.arena.cardinality(*o).allows_zero());
                if !may_be_empty {
                    return Err(Error::type_error(format!(
                        "arithmetic operator '{}' is not defined for {l} and {r}",
                        op.symbol()
                    ))
                    .make_static()
                    .maybe_set_location(v.arena.location(id)));
                }
                v.warn(id, format!("arithmetic operator '{}' is not defined for {l} and {r}", op.symbol()));
                CalculatorSlot::Deferred
            }
        },
        _ => CalculatorSlot::Deferred,
    };
    debug!(node = %id, op = op.symbol(), ?calculator, "arithmetic calculator selected");
    v.arena.replace_kind(id, ExprKind::Arithmetic { op, lhs: operands[0], rhs: operands[1], calculator })?;
    Ok(v.try_fold(id))
}

/// Operands of XPath 1.0 arithmetic become `number(first(x))` unless already a single double.
pub(crate) fn type_check_legacy(
    v: &mut ExpressionVisitor<'_>,
    id: ExprId,
    lhs: ExprId,
    rhs: ExprId,
) -> CResult<ExprId> {
    for operand in [lhs, rhs] {
        if v.item_type(operand) == ItemType::DOUBLE && v.arena.cardinality(operand) == Cardinality::EXACTLY_ONE {
            continue;
        }
        let mut x = operand;
        if v.arena.cardinality(x).allows_many() {
            x = v.alloc_like(ExprKind::FirstItem(x), operand);
        }
        let coerced = v.try_call("number", vec![x], operand)?.unwrap_or(x);
        v.replace_child(id, operand, coerced)?;
    }
    Ok(v.try_fold(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::ExprArena;
    use crate::engine::error::ErrorCode;
    use crate::engine::runtime::StaticContext;
    use crate::xdm::XdmAtomicValue;

    fn arith(a: &mut ExprArena, op: ArithOp, l: XdmAtomicValue, r: ExprKind) -> ExprId {
        let lhs = a.alloc(ExprKind::Literal(vec![l]));
        let rhs = a.alloc(r);
        a.alloc(ExprKind::Arithmetic { op, lhs, rhs, calculator: CalculatorSlot::Deferred })
    }

    #[test]
    fn integer_operands_resolve_a_calculator() {
        let mut a = ExprArena::new();
        let ctx = StaticContext::default();
        let id = arith(&mut a, ArithOp::Times, XdmAtomicValue::Integer(2), ExprKind::Position);
        let (lhs, rhs) = (a.kind(id).children()[0], a.kind(id).children()[1]);
        let mut v = ExpressionVisitor::new(&mut a, &ctx);
        let out = type_check(&mut v, id, ArithOp::Times, lhs, rhs).unwrap();
        let ExprKind::Arithmetic { calculator: CalculatorSlot::Resolved(calc), .. } = a.kind(out) else {
            panic!("expected a resolved calculator")
        };
        assert_eq!(calc.result, AtomicType::Integer);
    }

    #[test]
    fn string_operand_is_a_static_error() {
        let mut a = ExprArena::new();
        let ctx = StaticContext::default();
        let id = arith(
            &mut a,
            ArithOp::Plus,
            XdmAtomicValue::Integer(1),
            ExprKind::Literal(vec![XdmAtomicValue::String("abc".into())]),
        );
        let (lhs, rhs) = (a.kind(id).children()[0], a.kind(id).children()[1]);
        let mut v = ExpressionVisitor::new(&mut a, &ctx);
        let err = type_check(&mut v, id, ArithOp::Plus, lhs, rhs).unwrap_err();
        assert!(err.is_static());
        assert_eq!(err.code_enum(), ErrorCode::XPTY0004);
    }
}
