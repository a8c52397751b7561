use core::fmt;

use super::{AtomicType, ItemType};

/// How two item types relate, read as "`a` ... `b`".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relationship {
    Same,
    /// Every instance of `b` is an instance of `a`.
    Subsumes,
    /// Every instance of `a` is an instance of `b`.
    SubsumedBy,
    Overlaps,
    Disjoint,
}

/// Subtype oracle consulted by the type checker and the rewrites.
pub trait TypeHierarchy: Send + Sync + fmt::Debug {
    fn relationship(&self, a: &ItemType, b: &ItemType) -> Relationship;

    fn is_subtype(&self, a: &ItemType, b: &ItemType) -> bool {
        matches!(self.relationship(a, b), Relationship::Same | Relationship::SubsumedBy)
    }

    fn common_supertype(&self, a: &ItemType, b: &ItemType) -> ItemType;

    /// The primitive type used to select a calculator or comparer. `xs:integer` counts
    /// as primitive here so that integer arithmetic stays exact.
    fn primitive_of(&self, t: &ItemType) -> ItemType;
}

/// Hierarchy of the built-in types. The lattice is a tree, so two types are either
/// related by subsumption or disjoint; only custom hierarchies report `Overlaps`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinTypeHierarchy;

fn parent_of(t: ItemType) -> Option<ItemType> {
    match t {
        ItemType::AnyItem => None,
        ItemType::AnyNode | ItemType::Atomic(AtomicType::AnyAtomic) => Some(ItemType::AnyItem),
        ItemType::Node(_) => Some(ItemType::AnyNode),
        ItemType::Atomic(AtomicType::Integer) => Some(ItemType::Atomic(AtomicType::Decimal)),
        ItemType::Atomic(AtomicType::Decimal | AtomicType::Float | AtomicType::Double) => Some(ItemType::NUMERIC),
        ItemType::Atomic(_) => Some(ItemType::ANY_ATOMIC),
        ItemType::Empty => None,
    }
}

fn ancestors_or_self(t: ItemType) -> Vec<ItemType> {
    let mut out = vec![t];
    let mut cur = t;
    while let Some(p) = parent_of(cur) {
        out.push(p);
        cur = p;
    }
    out
}

impl TypeHierarchy for BuiltinTypeHierarchy {
    fn relationship(&self, a: &ItemType, b: &ItemType) -> Relationship {
        if a == b {
            return Relationship::Same;
        }
        match (a, b) {
            (ItemType::Empty, _) => return Relationship::SubsumedBy,
            (_, ItemType::Empty) => return Relationship::Subsumes,
            _ => {}
        }
        if ancestors_or_self(*b).contains(a) {
            Relationship::Subsumes
        } else if ancestors_or_self(*a).contains(b) {
            Relationship::SubsumedBy
        } else {
            Relationship::Disjoint
        }
    }

    fn common_supertype(&self, a: &ItemType, b: &ItemType) -> ItemType {
        match (a, b) {
            (ItemType::Empty, other) | (other, ItemType::Empty) => return *other,
            _ => {}
        }
        let chain_b = ancestors_or_self(*b);
        ancestors_or_self(*a).into_iter().find(|t| chain_b.contains(t)).unwrap_or(ItemType::AnyItem)
    }

    fn primitive_of(&self, t: &ItemType) -> ItemType {
        match t {
            ItemType::Atomic(at) => ItemType::Atomic(*at),
            ItemType::Node(_) | ItemType::AnyNode => ItemType::AnyNode,
            other => *other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ItemType::NUMERIC, ItemType::INTEGER, Relationship::Subsumes)]
    #[case(ItemType::INTEGER, ItemType::DOUBLE, Relationship::Disjoint)]
    #[case(ItemType::INTEGER, ItemType::ANY_ATOMIC, Relationship::SubsumedBy)]
    #[case(ItemType::Empty, ItemType::STRING, Relationship::SubsumedBy)]
    #[case(ItemType::UNTYPED, ItemType::STRING, Relationship::Disjoint)]
    #[case(ItemType::AnyItem, ItemType::AnyNode, Relationship::Subsumes)]
    fn builtin_relationships(#[case] a: ItemType, #[case] b: ItemType, #[case] expected: Relationship) {
        assert_eq!(BuiltinTypeHierarchy.relationship(&a, &b), expected);
    }

    #[rstest]
    fn common_supertype_of_numerics() {
        let th = BuiltinTypeHierarchy;
        assert_eq!(th.common_supertype(&ItemType::INTEGER, &ItemType::DOUBLE), ItemType::NUMERIC);
        assert_eq!(
            th.common_supertype(&ItemType::INTEGER, &ItemType::Atomic(AtomicType::Decimal)),
            ItemType::Atomic(AtomicType::Decimal)
        );
        assert_eq!(th.common_supertype(&ItemType::STRING, &ItemType::AnyNode), ItemType::AnyItem);
    }
}
