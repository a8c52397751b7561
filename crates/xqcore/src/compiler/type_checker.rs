//! Reconciles the static type of a supplied expression with the type its consumer requires.
//!
//! Conversions (atomization, untyped casts, numeric promotion) are inserted first; run-time
//! guards only when the result still cannot be proven to fit. A static error is raised only
//! when no value could ever pass.

use crate::compiler::ir::{ConversionMode, ExprId, ExprKind, RoleLocator};
use crate::compiler::properties::SpecialProperties;
use crate::compiler::visitor::{CResult, ExpressionVisitor};
use crate::engine::evaluator::evaluate_constant;
use crate::types::{AtomicType, Cardinality, ItemType, Relationship, SequenceType};

/// Checks `supplied` against `required`, applying the implicit conversions of function
/// and operator calls.
pub(crate) fn static_type_check(
    v: &mut ExpressionVisitor<'_>,
    supplied: ExprId,
    required: SequenceType,
    role: &RoleLocator,
) -> CResult<ExprId> {
    if required == SequenceType::ANY {
        return Ok(supplied);
    }
    let mut exp = supplied;
    if v.ctx.backwards_compatible && !required.cardinality.allows_many() {
        exp = legacy_coercions(v, exp, required)?;
    }
    if let ItemType::Atomic(target) = required.item {
        exp = atomic_conversions(v, exp, target, role)?;
    }
    finish(v, exp, required, role)
}

/// Like [`static_type_check`] but without implicit conversions, as for declared variable types.
pub(crate) fn strict_type_check(
    v: &mut ExpressionVisitor<'_>,
    supplied: ExprId,
    required: SequenceType,
    role: &RoleLocator,
) -> CResult<ExprId> {
    if required == SequenceType::ANY {
        return Ok(supplied);
    }
    finish(v, supplied, required, role)
}

/// XPath 1.0 rules: take the first item, then `string()` or `number()` it.
fn legacy_coercions(v: &mut ExpressionVisitor<'_>, supplied: ExprId, required: SequenceType) -> CResult<ExprId> {
    let mut exp = supplied;
    if v.arena.cardinality(exp).allows_many() {
        exp = v.alloc_like(ExprKind::FirstItem(exp), supplied);
    }
    let th = v.th();
    let t = v.item_type(exp);
    if required.item == ItemType::STRING && !th.is_subtype(&t, &ItemType::STRING) {
        if let Some(call) = v.try_call("string", vec![exp], supplied)? {
            exp = call;
        }
    } else if th.is_subtype(&required.item, &ItemType::NUMERIC)
        && !th.is_subtype(&t, &ItemType::NUMERIC)
        && let Some(call) = v.try_call("number", vec![exp], supplied)?
    {
        exp = call;
    }
    Ok(exp)
}

fn atomic_conversions(
    v: &mut ExpressionVisitor<'_>,
    supplied: ExprId,
    target: AtomicType,
    role: &RoleLocator,
) -> CResult<ExprId> {
    let th = v.th();
    let mut exp = supplied;
    let t = v.item_type(exp);
    if !t.is_atomic() && t != ItemType::Empty && !v.arena.is_empty_literal(exp) {
        exp = v.alloc_like(ExprKind::Atomize(exp), supplied);
    }

    if !matches!(target, AtomicType::AnyAtomic | AtomicType::UntypedAtomic) {
        let t = v.item_type(exp);
        let mode = if t == ItemType::UNTYPED {
            Some(ConversionMode::All)
        } else if th.relationship(&t, &ItemType::UNTYPED) != Relationship::Disjoint
            && !v.arena.special(exp).contains(SpecialProperties::NOT_UNTYPED_ATOMIC)
        {
            Some(ConversionMode::Selective)
        } else {
            None
        };
        if let Some(mode) = mode {
            let cast_to = if target == AtomicType::Numeric { AtomicType::Double } else { target };
            exp = v.alloc_like(ExprKind::UntypedConvert { operand: exp, target: cast_to, mode }, supplied);
            exp = fold_conversion(v, exp)?;
        }
    }

    if matches!(target, AtomicType::Double | AtomicType::Float) {
        let t = v.item_type(exp);
        let promotable = t != ItemType::Atomic(target)
            && t != ItemType::Empty
            && th.relationship(&t, &ItemType::NUMERIC) != Relationship::Disjoint
            && !(target == AtomicType::Float && t == ItemType::DOUBLE);
        if promotable {
            exp = v.alloc_like(ExprKind::NumericPromote { operand: exp, target, role: role.clone() }, supplied);
            exp = fold_conversion(v, exp)?;
        }
    }
    Ok(exp)
}

/// Folds a conversion applied to a literal; a value that cannot convert is a static error.
fn fold_conversion(v: &mut ExpressionVisitor<'_>, conversion: ExprId) -> CResult<ExprId> {
    let operand = v.arena.kind(conversion).children()[0];
    if !v.arena.is_literal(operand) {
        return Ok(conversion);
    }
    match evaluate_constant(&*v.arena, conversion, v.ctx) {
        Ok(values) => Ok(v.alloc_like(ExprKind::Literal(values), conversion)),
        Err(e) => Err(e.make_static().maybe_set_location(v.arena.location(conversion))),
    }
}

fn finish(v: &mut ExpressionVisitor<'_>, exp: ExprId, required: SequenceType, role: &RoleLocator) -> CResult<ExprId> {
    let th = v.th();
    let t = v.item_type(exp);
    let card = v.arena.cardinality(exp);
    let item_ok = th.is_subtype(&t, &required.item)
        || (t == ItemType::Atomic(AtomicType::AnyUri) && required.item == ItemType::STRING);
    let card_ok = required.cardinality.subsumes(card);
    if item_ok && card_ok {
        return Ok(exp);
    }
    let loc = v.arena.location(exp);

    if !item_ok && th.relationship(&t, &required.item) == Relationship::Disjoint {
        if card.allows_zero() && required.cardinality.allows_zero() {
            v.warn(
                exp,
                format!(
                    "the only value of type {t} that can pass as the {} is the empty sequence",
                    role.message()
                ),
            );
        } else {
            return Err(role.item_type_error(&required.item, &t).make_static().maybe_set_location(loc));
        }
    }

    if let Some(values) = v.arena.literal(exp) {
        check_literal(v, values.len(), values.iter().map(|x| ItemType::Atomic(x.type_of())).collect(), required, role)
            .map_err(|e| e.make_static().maybe_set_location(loc))?;
        return Ok(exp);
    }

    let mut out = exp;
    if !item_ok {
        out = v.alloc_like(ExprKind::ItemCheck { operand: out, required: required.item, role: role.clone() }, exp);
    }
    if !card_ok {
        if !card.overlaps(required.cardinality) {
            let what = if card == Cardinality::EMPTY { "an empty sequence" } else { "a sequence of this length" };
            return Err(role.cardinality_error(what).make_static().maybe_set_location(loc));
        }
        out = v.alloc_like(
            ExprKind::CardinalityCheck { operand: out, required: required.cardinality, role: role.clone() },
            exp,
        );
    }
    Ok(out)
}

fn check_literal(
    v: &ExpressionVisitor<'_>,
    len: usize,
    types: Vec<ItemType>,
    required: SequenceType,
    role: &RoleLocator,
) -> CResult<()> {
    let th = v.ctx.type_hierarchy();
    if let Some(bad) = types.iter().find(|t| {
        !th.is_subtype(t, &required.item)
            && !(**t == ItemType::Atomic(AtomicType::AnyUri) && required.item == ItemType::STRING)
    }) {
        return Err(role.item_type_error(&required.item, bad));
    }
    let allowed = match len {
        0 => required.cardinality.allows_zero(),
        1 => required.cardinality.subsumes(Cardinality::EXACTLY_ONE),
        _ => required.cardinality.allows_many(),
    };
    if !allowed {
        let what = match len {
            0 => "an empty sequence".to_string(),
            n => format!("a sequence of {n} items"),
        };
        return Err(role.cardinality_error(&what));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::ExprArena;
    use crate::engine::error::ErrorCode;
    use crate::engine::runtime::{StaticContext, StaticContextBuilder};
    use crate::xdm::XdmAtomicValue;

    fn check(arena: &mut ExprArena, ctx: &StaticContext, id: ExprId, required: SequenceType) -> CResult<ExprId> {
        let mut v = ExpressionVisitor::new(arena, ctx);
        static_type_check(&mut v, id, required, &RoleLocator::operand("+", 0))
    }

    #[test]
    fn any_type_is_a_fast_path() {
        let mut a = ExprArena::new();
        let ctx = StaticContext::default();
        let dot = a.alloc(ExprKind::ContextItem { item_type: ItemType::AnyItem });
        assert_eq!(check(&mut a, &ctx, dot, SequenceType::ANY).unwrap(), dot);
    }

    #[test]
    fn untyped_literal_is_converted_at_compile_time() {
        let mut a = ExprArena::new();
        let ctx = StaticContext::default();
        let lit = a.alloc(ExprKind::Literal(vec![XdmAtomicValue::UntypedAtomic("3".into())]));
        let out = check(&mut a, &ctx, lit, SequenceType::optional(AtomicType::Double)).unwrap();
        assert_eq!(a.literal(out), Some(&[XdmAtomicValue::Double(3.0)][..]));
    }

    #[test]
    fn bad_untyped_literal_keeps_cast_code() {
        let mut a = ExprArena::new();
        let ctx = StaticContext::default();
        let lit = a.alloc(ExprKind::Literal(vec![XdmAtomicValue::UntypedAtomic("x".into())]));
        let err = check(&mut a, &ctx, lit, SequenceType::optional(AtomicType::Double)).unwrap_err();
        assert!(err.is_static());
        assert_eq!(err.code_enum(), ErrorCode::FORG0001);
    }

    #[test]
    fn node_operand_is_atomized_and_converted() {
        let mut a = ExprArena::new();
        let ctx = StaticContext::default();
        let dot = a.alloc(ExprKind::ContextItem { item_type: ItemType::AnyNode });
        let out = check(&mut a, &ctx, dot, SequenceType::single(AtomicType::Double)).unwrap();
        let ExprKind::UntypedConvert { operand, target, mode } = a.kind(out) else { panic!("expected a conversion") };
        assert_eq!((*target, *mode), (AtomicType::Double, ConversionMode::All));
        assert!(matches!(a.kind(*operand), ExprKind::Atomize(_)));
    }

    #[test]
    fn integer_is_promoted_to_double() {
        let mut a = ExprArena::new();
        let ctx = StaticContextBuilder::new().with_context_item_type(Some(ItemType::INTEGER)).build();
        let dot = a.alloc(ExprKind::ContextItem { item_type: ItemType::INTEGER });
        let out = check(&mut a, &ctx, dot, SequenceType::single(AtomicType::Double)).unwrap();
        assert!(matches!(a.kind(out), ExprKind::NumericPromote { target: AtomicType::Double, .. }));
    }

    #[test]
    fn disjoint_types_are_static_errors() {
        let mut a = ExprArena::new();
        let ctx = StaticContext::default();
        let lit = a.alloc(ExprKind::Literal(vec![XdmAtomicValue::String("abc".into())]));
        let err = check(&mut a, &ctx, lit, SequenceType::optional(AtomicType::Numeric)).unwrap_err();
        assert!(err.is_static());
        assert_eq!(err.code_enum(), ErrorCode::XPTY0004);
    }

    #[test]
    fn legacy_mode_takes_first_item_and_numbers_it() {
        let mut a = ExprArena::new();
        let ctx = StaticContextBuilder::new().with_backwards_compatible(true).build();
        let dot = a.alloc(ExprKind::ContextItem { item_type: ItemType::AnyNode });
        let seq = a.alloc(ExprKind::Sequence(vec![dot]));
        let two = a.alloc(ExprKind::Literal(vec![XdmAtomicValue::String("2".into())]));
        let many = a.alloc(ExprKind::Sequence(vec![seq, two]));
        let out = check(&mut a, &ctx, many, SequenceType::optional(AtomicType::Double)).unwrap();
        let ExprKind::FunctionCall { name, args, .. } = a.kind(out) else { panic!("expected fn:number") };
        assert!(name.is_fn("number"));
        let ExprKind::Atomize(first) = a.kind(args[0]) else { panic!("expected atomization of the argument") };
        assert!(matches!(a.kind(*first), ExprKind::FirstItem(_)));
    }
}
