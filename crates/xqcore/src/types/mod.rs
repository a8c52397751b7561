//! Static type vocabulary: item types, cardinalities and sequence types.

use core::fmt;

use crate::model::NodeKind;

pub mod hierarchy;

pub use hierarchy::{BuiltinTypeHierarchy, Relationship, TypeHierarchy};

/// Built-in atomic types known to the type checker.
///
/// `Numeric` is the abstract union of the four numeric primitives and only appears in
/// static types; no value has it as its dynamic type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AtomicType {
    AnyAtomic,
    Numeric,
    Double,
    Float,
    Decimal,
    Integer,
    String,
    AnyUri,
    Boolean,
    UntypedAtomic,
    QName,
}

impl AtomicType {
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            AtomicType::Numeric | AtomicType::Double | AtomicType::Float | AtomicType::Decimal | AtomicType::Integer
        )
    }

    pub fn local_name(self) -> &'static str {
        match self {
            AtomicType::AnyAtomic => "anyAtomicType",
            AtomicType::Numeric => "numeric",
            AtomicType::Double => "double",
            AtomicType::Float => "float",
            AtomicType::Decimal => "decimal",
            AtomicType::Integer => "integer",
            AtomicType::String => "string",
            AtomicType::AnyUri => "anyURI",
            AtomicType::Boolean => "boolean",
            AtomicType::UntypedAtomic => "untypedAtomic",
            AtomicType::QName => "QName",
        }
    }
}

impl fmt::Display for AtomicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "xs:{}", self.local_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemType {
    /// `item()`
    AnyItem,
    /// `node()`
    AnyNode,
    Node(NodeKind),
    Atomic(AtomicType),
    /// Item type of the empty sequence; it has no instances and is a subtype of everything.
    Empty,
}

impl ItemType {
    pub const ANY_ATOMIC: ItemType = ItemType::Atomic(AtomicType::AnyAtomic);
    pub const BOOLEAN: ItemType = ItemType::Atomic(AtomicType::Boolean);
    pub const INTEGER: ItemType = ItemType::Atomic(AtomicType::Integer);
    pub const DOUBLE: ItemType = ItemType::Atomic(AtomicType::Double);
    pub const NUMERIC: ItemType = ItemType::Atomic(AtomicType::Numeric);
    pub const STRING: ItemType = ItemType::Atomic(AtomicType::String);
    pub const UNTYPED: ItemType = ItemType::Atomic(AtomicType::UntypedAtomic);

    pub fn is_atomic(self) -> bool {
        matches!(self, ItemType::Atomic(_))
    }

    pub fn as_atomic(self) -> Option<AtomicType> {
        match self {
            ItemType::Atomic(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_node(self) -> bool {
        matches!(self, ItemType::AnyNode | ItemType::Node(_))
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemType::AnyItem => f.write_str("item()"),
            ItemType::AnyNode => f.write_str("node()"),
            ItemType::Node(k) => write!(f, "{}()", k.test_name()),
            ItemType::Atomic(t) => write!(f, "{t}"),
            ItemType::Empty => f.write_str("empty-sequence()"),
        }
    }
}

/// Set of allowed sequence lengths, encoded as the three bits {0, 1, many}.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cardinality(u8);

impl Cardinality {
    const ZERO: u8 = 1;
    const ONE: u8 = 2;
    const MANY: u8 = 4;

    pub const EMPTY: Cardinality = Cardinality(Self::ZERO);
    pub const EXACTLY_ONE: Cardinality = Cardinality(Self::ONE);
    pub const ZERO_OR_ONE: Cardinality = Cardinality(Self::ZERO | Self::ONE);
    pub const ONE_OR_MORE: Cardinality = Cardinality(Self::ONE | Self::MANY);
    pub const ZERO_OR_MORE: Cardinality = Cardinality(Self::ZERO | Self::ONE | Self::MANY);

    pub fn bits(self) -> u8 {
        self.0
    }

    /// Rebuilds a cardinality from [`Cardinality::bits`]; unknown bits are dropped and an
    /// empty set widens to `ZERO_OR_MORE`.
    pub fn from_bits(bits: u8) -> Self {
        let b = bits & (Self::ZERO | Self::ONE | Self::MANY);
        if b == 0 { Self::ZERO_OR_MORE } else { Self(b) }
    }

    pub fn allows_zero(self) -> bool {
        self.0 & Self::ZERO != 0
    }

    pub fn allows_many(self) -> bool {
        self.0 & Self::MANY != 0
    }

    pub fn is_empty_only(self) -> bool {
        self == Self::EMPTY
    }

    /// True when every length allowed by `other` is allowed by `self`.
    pub fn subsumes(self, other: Cardinality) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub fn union(self, other: Cardinality) -> Cardinality {
        Cardinality(self.0 | other.0)
    }

    /// True when some length is allowed by both.
    pub fn overlaps(self, other: Cardinality) -> bool {
        self.0 & other.0 != 0
    }

    /// Intersection; disjoint inputs fall back to `self`.
    #[must_use]
    pub fn intersect(self, other: Cardinality) -> Cardinality {
        let b = self.0 & other.0;
        if b == 0 { self } else { Cardinality(b) }
    }

    /// Cardinality of the concatenation of two sequences.
    #[must_use]
    pub fn sum(self, other: Cardinality) -> Cardinality {
        let mut bits = 0u8;
        if self.allows_zero() && other.allows_zero() {
            bits |= Self::ZERO;
        }
        let self_nonzero = self.0 & (Self::ONE | Self::MANY) != 0;
        let other_nonzero = other.0 & (Self::ONE | Self::MANY) != 0;
        if self_nonzero || other_nonzero {
            bits |= Self::ONE;
        }
        if self.allows_many() || other.allows_many() || (self_nonzero && other_nonzero) {
            bits |= Self::MANY;
        }
        Cardinality::from_bits(bits)
    }

    /// Same cardinality with the empty sequence additionally allowed.
    #[must_use]
    pub fn with_zero(self) -> Cardinality {
        Cardinality(self.0 | Self::ZERO)
    }

    pub fn occurrence_indicator(self) -> &'static str {
        match self.0 {
            x if x == Self::ONE => "",
            x if x == Self::ZERO | Self::ONE => "?",
            x if x == Self::ONE | Self::MANY => "+",
            x if x == Self::ZERO => "(empty)",
            _ => "*",
        }
    }
}

impl fmt::Debug for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.0 {
            x if x == Self::ZERO => "EMPTY",
            x if x == Self::ONE => "EXACTLY_ONE",
            x if x == Self::ZERO | Self::ONE => "ZERO_OR_ONE",
            x if x == Self::ONE | Self::MANY => "ONE_OR_MORE",
            x if x == Self::ZERO | Self::ONE | Self::MANY => "ZERO_OR_MORE",
            _ => "OTHER",
        };
        write!(f, "Cardinality({name})")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SequenceType {
    pub item: ItemType,
    pub cardinality: Cardinality,
}

impl SequenceType {
    pub const ANY: SequenceType = SequenceType::new(ItemType::AnyItem, Cardinality::ZERO_OR_MORE);
    pub const EMPTY: SequenceType = SequenceType::new(ItemType::Empty, Cardinality::EMPTY);

    pub const fn new(item: ItemType, cardinality: Cardinality) -> Self {
        Self { item, cardinality }
    }

    pub const fn atomic(t: AtomicType, cardinality: Cardinality) -> Self {
        Self::new(ItemType::Atomic(t), cardinality)
    }

    pub const fn single(t: AtomicType) -> Self {
        Self::atomic(t, Cardinality::EXACTLY_ONE)
    }

    pub const fn optional(t: AtomicType) -> Self {
        Self::atomic(t, Cardinality::ZERO_OR_ONE)
    }
}

impl fmt::Display for SequenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cardinality == Cardinality::EMPTY {
            return f.write_str("empty-sequence()");
        }
        write!(f, "{}{}", self.item, self.cardinality.occurrence_indicator())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cardinality_sum() {
        assert_eq!(Cardinality::EXACTLY_ONE.sum(Cardinality::EXACTLY_ONE), Cardinality::ONE_OR_MORE);
        assert_eq!(Cardinality::EMPTY.sum(Cardinality::EXACTLY_ONE), Cardinality::EXACTLY_ONE);
        assert_eq!(Cardinality::EMPTY.sum(Cardinality::EMPTY), Cardinality::EMPTY);
        assert_eq!(Cardinality::ZERO_OR_ONE.sum(Cardinality::ZERO_OR_ONE), Cardinality::ZERO_OR_MORE);
    }

    #[test]
    fn cardinality_subsumes() {
        assert!(Cardinality::ZERO_OR_MORE.subsumes(Cardinality::EXACTLY_ONE));
        assert!(Cardinality::ZERO_OR_ONE.subsumes(Cardinality::EMPTY));
        assert!(!Cardinality::EXACTLY_ONE.subsumes(Cardinality::ZERO_OR_ONE));
        assert!(!Cardinality::ONE_OR_MORE.subsumes(Cardinality::EMPTY));
    }

    #[test]
    fn sequence_type_display() {
        assert_eq!(SequenceType::optional(AtomicType::Double).to_string(), "xs:double?");
        assert_eq!(SequenceType::ANY.to_string(), "item()*");
        assert_eq!(SequenceType::EMPTY.to_string(), "empty-sequence()");
    }
}
