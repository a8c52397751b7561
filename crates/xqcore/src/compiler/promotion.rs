//! Hoists focus-independent subexpressions of a filter predicate into `let` bindings
//! around the filter, so they are evaluated once instead of once per item.
//!
//! Bindings are lazy: a hoisted expression that no item ever reaches is never evaluated.

use crate::compiler::filter;
use crate::compiler::ir::{ExprId, ExprKind, VarBinding};
use crate::compiler::properties::{Dependencies, SpecialProperties};
use crate::compiler::visitor::{CResult, ExpressionVisitor};
use crate::consts::PROMOTED_NS;
use crate::xdm::ExpandedName;

pub(crate) fn promote(v: &mut ExpressionVisitor<'_>, filter_id: ExprId) -> CResult<ExprId> {
    let ExprKind::Filter { predicate, .. } = *v.arena.kind(filter_id) else {
        return Ok(filter_id);
    };
    let inner_slots: Vec<usize> = v
        .arena
        .descendants_or_self(predicate)
        .into_iter()
        .filter_map(|d| match v.arena.kind(d) {
            ExprKind::Let { slot, .. } => *slot,
            _ => None,
        })
        .collect();
    let mut candidates = Vec::new();
    collect(v, predicate, true, &inner_slots, &mut candidates);
    if candidates.is_empty() {
        return Ok(filter_id);
    }

    let mut out = filter_id;
    for candidate in candidates {
        let Some(parent) = v.arena.parent(candidate) else {
            continue;
        };
        let slot = v.arena.allocate_slot();
        let static_type = v.static_type(candidate);
        let name = ExpandedName::new(Some(PROMOTED_NS.to_string()), format!("p{slot}"));
        let var = v.alloc_like(
            ExprKind::VarRef { name: name.clone(), binding: VarBinding::Local { slot, static_type } },
            candidate,
        );
        v.replace_child(parent, candidate, var)?;
        out = v.alloc_like(
            ExprKind::Let { name, slot: Some(slot), declared: None, binding: candidate, action: out },
            filter_id,
        );
        v.trace(candidate, "Subexpression promoted out of filter");
    }
    filter::reclassify(v, filter_id)?;
    Ok(out)
}

fn hoistable(v: &ExpressionVisitor<'_>, id: ExprId, inner_slots: &[usize]) -> bool {
    let props = v.arena.properties(id);
    if props.dependencies.intersects(Dependencies::FOCUS) || !props.special.contains(SpecialProperties::NON_CREATIVE)
    {
        return false;
    }
    if inner_slots.is_empty() || !props.dependencies.contains(Dependencies::LOCAL_VARIABLES) {
        return true;
    }
    !v.arena.descendants_or_self(id).into_iter().any(|d| {
        matches!(v.arena.kind(d), ExprKind::VarRef { binding: VarBinding::Local { slot, .. }, .. }
            if inner_slots.contains(slot))
    })
}

/// Collects the maximal hoistable subtrees below `id`.
fn collect(v: &ExpressionVisitor<'_>, id: ExprId, is_root: bool, inner_slots: &[usize], out: &mut Vec<ExprId>) {
    match v.arena.kind(id) {
        ExprKind::Literal(_) | ExprKind::VarRef { .. } => return,
        _ if !is_root && hoistable(v, id, inner_slots) => {
            out.push(id);
            return;
        }
        // a nested predicate has its own focus
        ExprKind::Filter { base, .. } => {
            collect(v, *base, false, inner_slots, out);
            return;
        }
        _ => {}
    }
    for child in v.arena.kind(id).children() {
        collect(v, child, false, inner_slots, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{ArithOp, ComparisonOp, ExprArena, FilterFlags};
    use crate::engine::calculator::CalculatorSlot;
    use crate::engine::runtime::StaticContext;
    use crate::types::{ItemType, SequenceType};
    use crate::xdm::XdmAtomicValue;

    #[test]
    fn external_variable_arithmetic_is_hoisted() {
        let mut a = ExprArena::new();
        let ctx = StaticContext::default();
        let base = a.alloc(ExprKind::ContextItem { item_type: ItemType::AnyItem });
        let dot = a.alloc(ExprKind::ContextItem { item_type: ItemType::AnyItem });
        let x = a.alloc(ExprKind::VarRef {
            name: ExpandedName::local("x"),
            binding: VarBinding::External { slot: 0, declared: SequenceType::ANY },
        });
        let one = a.alloc(ExprKind::Literal(vec![XdmAtomicValue::Integer(1)]));
        let sum = a.alloc(ExprKind::Arithmetic { op: ArithOp::Plus, lhs: x, rhs: one, calculator: CalculatorSlot::Deferred });
        let cmp = a.alloc(ExprKind::ValueComparison {
            op: ComparisonOp::Eq,
            lhs: dot,
            rhs: sum,
            result_when_empty: None,
            convert_untyped: false,
            collation: None,
        });
        let f = a.alloc(ExprKind::Filter { base, predicate: cmp, flags: FilterFlags::default() });
        let mut v = ExpressionVisitor::new(&mut a, &ctx);
        let out = promote(&mut v, f).unwrap();
        let ExprKind::Let { binding, action, .. } = a.kind(out) else { panic!("expected a let") };
        assert_eq!((*binding, *action), (sum, f));
        let ExprKind::ValueComparison { rhs, .. } = a.kind(cmp) else { unreachable!() };
        assert!(matches!(a.kind(*rhs), ExprKind::VarRef { binding: VarBinding::Local { .. }, .. }));
    }
}
