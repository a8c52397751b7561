//! Static properties of expressions: cardinality, dependencies, special flags and item type.
//!
//! The first three are cached per node in a single atomic word tagged with the arena
//! generation, so a lookup after any rewrite recomputes instead of returning stale data.

use std::sync::atomic::Ordering;

use bitflags::bitflags;

use crate::compiler::ir::{ExprArena, ExprId, ExprKind, VarBinding};
use crate::engine::calculator::CalculatorSlot;
use crate::types::{AtomicType, Cardinality, ItemType, TypeHierarchy};

bitflags! {
    /// Parts of the dynamic context an expression reads.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Dependencies: u16 {
        const CONTEXT_ITEM = 1 << 0;
        const POSITION = 1 << 1;
        const LAST = 1 << 2;
        const LOCAL_VARIABLES = 1 << 3;
        const EXTERNAL_VARIABLES = 1 << 4;
        const FOCUS = Self::CONTEXT_ITEM.bits() | Self::POSITION.bits() | Self::LAST.bits();
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SpecialProperties: u8 {
        /// Evaluation never constructs new nodes, so it may be hoisted or shared.
        const NON_CREATIVE = 1 << 0;
        /// No item of the result is `xs:untypedAtomic`.
        const NOT_UNTYPED_ATOMIC = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticProperties {
    pub cardinality: Cardinality,
    pub dependencies: Dependencies,
    pub special: SpecialProperties,
}

impl StaticProperties {
    fn pack(self) -> u32 {
        u32::from(self.cardinality.bits())
            | (u32::from(self.dependencies.bits()) << 8)
            | (u32::from(self.special.bits()) << 24)
    }

    fn unpack(word: u32) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        Self {
            cardinality: Cardinality::from_bits((word & 0xff) as u8),
            dependencies: Dependencies::from_bits_truncate(((word >> 8) & 0xffff) as u16),
            special: SpecialProperties::from_bits_truncate((word >> 24) as u8),
        }
    }
}

impl ExprArena {
    pub fn properties(&self, id: ExprId) -> StaticProperties {
        let node = self.node(id);
        let cached = node.props.load(Ordering::Acquire);
        #[allow(clippy::cast_possible_truncation)]
        if (cached >> 32) as u32 == self.generation() {
            return StaticProperties::unpack(cached as u32);
        }
        let props = self.compute_properties(id);
        let word = (u64::from(self.generation()) << 32) | u64::from(props.pack());
        node.props.store(word, Ordering::Release);
        props
    }

    pub fn cardinality(&self, id: ExprId) -> Cardinality {
        self.properties(id).cardinality
    }

    pub fn dependencies(&self, id: ExprId) -> Dependencies {
        self.properties(id).dependencies
    }

    pub fn special(&self, id: ExprId) -> SpecialProperties {
        self.properties(id).special
    }

    fn compute_properties(&self, id: ExprId) -> StaticProperties {
        StaticProperties {
            cardinality: self.compute_cardinality(id),
            dependencies: self.compute_dependencies(id),
            special: self.compute_special(id),
        }
    }

    fn compute_cardinality(&self, id: ExprId) -> Cardinality {
        use ExprKind::*;
        match self.kind(id) {
            Literal(v) => match v.len() {
                0 => Cardinality::EMPTY,
                1 => Cardinality::EXACTLY_ONE,
                _ => Cardinality::ONE_OR_MORE,
            },
            ContextItem { .. } | Position | Last => Cardinality::EXACTLY_ONE,
            VarRef { binding, .. } => match binding {
                VarBinding::Unresolved => Cardinality::ZERO_OR_MORE,
                VarBinding::External { declared: t, .. } | VarBinding::Local { static_type: t, .. } => t.cardinality,
            },
            Sequence(items) => {
                items.iter().fold(Cardinality::EMPTY, |acc, c| acc.sum(self.cardinality(*c)))
            }
            Range { .. } => Cardinality::ZERO_OR_MORE,
            Arithmetic { lhs, rhs, .. } | LegacyArithmetic { lhs, rhs, .. } => {
                let exact = self.cardinality(*lhs) == Cardinality::EXACTLY_ONE
                    && self.cardinality(*rhs) == Cardinality::EXACTLY_ONE;
                if exact { Cardinality::EXACTLY_ONE } else { Cardinality::ZERO_OR_ONE }
            }
            Unary { operand, .. } | Negate(operand) => {
                if self.cardinality(*operand) == Cardinality::EXACTLY_ONE {
                    Cardinality::EXACTLY_ONE
                } else {
                    Cardinality::ZERO_OR_ONE
                }
            }
            Boolean { .. } | GeneralComparison { .. } | IntegerRangeTest { .. } => Cardinality::EXACTLY_ONE,
            ValueComparison { lhs, rhs, result_when_empty, .. } => {
                let exact = result_when_empty.is_some()
                    || (self.cardinality(*lhs) == Cardinality::EXACTLY_ONE
                        && self.cardinality(*rhs) == Cardinality::EXACTLY_ONE);
                if exact { Cardinality::EXACTLY_ONE } else { Cardinality::ZERO_OR_ONE }
            }
            IdentityComparison { .. } | Subscript { .. } => Cardinality::ZERO_OR_ONE,
            Filter { base, predicate, flags } => self.filter_cardinality(*base, *predicate, *flags),
            FirstItem(base) | LastItem(base) => {
                if self.cardinality(*base).allows_zero() {
                    Cardinality::ZERO_OR_ONE
                } else {
                    Cardinality::EXACTLY_ONE
                }
            }
            TailFrom { base, .. } | Slice { base, .. } => self.cardinality(*base).with_zero(),
            Atomize(operand) | UntypedConvert { operand, .. } | NumericPromote { operand, .. } => {
                self.cardinality(*operand)
            }
            ItemCheck { operand, .. } => self.cardinality(*operand),
            CardinalityCheck { operand, required, .. } => self.cardinality(*operand).intersect(*required),
            Let { action, .. } => self.cardinality(*action),
            FunctionCall { signature, .. } => {
                signature.as_ref().map_or(Cardinality::ZERO_OR_MORE, |s| s.result.cardinality)
            }
        }
    }

    fn filter_cardinality(
        &self,
        base: ExprId,
        predicate: ExprId,
        flags: crate::compiler::ir::FilterFlags,
    ) -> Cardinality {
        let base_card = self.cardinality(base);
        if let Some(v) = self.single_literal(predicate)
            && v.is_numeric()
        {
            return if v.as_whole_number() == Some(1) && !base_card.allows_zero() {
                Cardinality::EXACTLY_ONE
            } else {
                Cardinality::ZERO_OR_ONE
            };
        }
        if flags.independent_numeric || !base_card.allows_many() {
            Cardinality::ZERO_OR_ONE
        } else {
            Cardinality::ZERO_OR_MORE
        }
    }

    fn compute_dependencies(&self, id: ExprId) -> Dependencies {
        use ExprKind::*;
        let kind = self.kind(id);
        let intrinsic = match kind {
            ContextItem { .. } => Dependencies::CONTEXT_ITEM,
            Position => Dependencies::POSITION,
            Last => Dependencies::LAST,
            VarRef { binding: VarBinding::External { .. }, .. } => Dependencies::EXTERNAL_VARIABLES,
            VarRef { .. } => Dependencies::LOCAL_VARIABLES,
            FunctionCall { signature: Some(sig), .. } => sig.dependencies,
            _ => Dependencies::empty(),
        };
        match kind {
            // the predicate's focus is the filter's own items
            Filter { base, predicate, .. } => {
                intrinsic | self.dependencies(*base) | (self.dependencies(*predicate) - Dependencies::FOCUS)
            }
            _ => kind.children().iter().fold(intrinsic, |acc, c| acc | self.dependencies(*c)),
        }
    }

    fn compute_special(&self, id: ExprId) -> SpecialProperties {
        use ExprKind::*;
        let kind = self.kind(id);
        let creative = matches!(kind, FunctionCall { signature: Some(sig), .. } if sig.creative)
            || kind.children().iter().any(|c| !self.special(*c).contains(SpecialProperties::NON_CREATIVE));
        let mut out = if creative { SpecialProperties::empty() } else { SpecialProperties::NON_CREATIVE };
        let typed = match kind {
            Literal(values) => !values.iter().any(|v| matches!(v, crate::xdm::XdmAtomicValue::UntypedAtomic(_))),
            Position
            | Last
            | Range { .. }
            | Arithmetic { .. }
            | LegacyArithmetic { .. }
            | Unary { .. }
            | Negate(_)
            | Boolean { .. }
            | GeneralComparison { .. }
            | ValueComparison { .. }
            | IdentityComparison { .. }
            | IntegerRangeTest { .. }
            | UntypedConvert { .. }
            | NumericPromote { .. } => true,
            FirstItem(b) | LastItem(b) | Filter { base: b, .. } | Subscript { base: b, .. } | TailFrom { base: b, .. }
            | Slice { base: b, .. } => self.special(*b).contains(SpecialProperties::NOT_UNTYPED_ATOMIC),
            ItemCheck { operand, required, .. } => {
                self.special(*operand).contains(SpecialProperties::NOT_UNTYPED_ATOMIC)
                    || matches!(required, ItemType::Atomic(t) if *t != AtomicType::AnyAtomic && *t != AtomicType::UntypedAtomic)
            }
            CardinalityCheck { operand, .. } => self.special(*operand).contains(SpecialProperties::NOT_UNTYPED_ATOMIC),
            Let { action, .. } => self.special(*action).contains(SpecialProperties::NOT_UNTYPED_ATOMIC),
            Sequence(items) => items.iter().all(|c| self.special(*c).contains(SpecialProperties::NOT_UNTYPED_ATOMIC)),
            _ => false,
        };
        if typed {
            out |= SpecialProperties::NOT_UNTYPED_ATOMIC;
        }
        out
    }

    /// Static item type of `id`. Not cached: it is cheap and depends on the hierarchy in use.
    pub fn item_type(&self, id: ExprId, th: &dyn TypeHierarchy) -> ItemType {
        use ExprKind::*;
        match self.kind(id) {
            Literal(values) => values
                .iter()
                .map(|v| ItemType::Atomic(v.type_of()))
                .reduce(|a, b| th.common_supertype(&a, &b))
                .unwrap_or(ItemType::Empty),
            ContextItem { item_type } => *item_type,
            Position | Last | Range { .. } => ItemType::INTEGER,
            VarRef { binding, .. } => match binding {
                VarBinding::Unresolved => ItemType::AnyItem,
                VarBinding::External { declared: t, .. } | VarBinding::Local { static_type: t, .. } => t.item,
            },
            Sequence(items) => items
                .iter()
                .filter(|c| !self.is_empty_literal(**c))
                .map(|c| self.item_type(*c, th))
                .reduce(|a, b| th.common_supertype(&a, &b))
                .unwrap_or(ItemType::Empty),
            Arithmetic { calculator: CalculatorSlot::Resolved(calc), .. } => ItemType::Atomic(calc.result),
            Arithmetic { lhs, rhs, .. } => {
                let l = self.item_type(*lhs, th);
                let r = self.item_type(*rhs, th);
                if th.is_subtype(&l, &ItemType::NUMERIC) && th.is_subtype(&r, &ItemType::NUMERIC) {
                    ItemType::NUMERIC
                } else {
                    ItemType::ANY_ATOMIC
                }
            }
            LegacyArithmetic { .. } => ItemType::DOUBLE,
            Unary { operand, .. } | Negate(operand) => {
                let t = self.item_type(*operand, th);
                if th.is_subtype(&t, &ItemType::NUMERIC) { t } else { ItemType::NUMERIC }
            }
            Boolean { .. }
            | GeneralComparison { .. }
            | ValueComparison { .. }
            | IdentityComparison { .. }
            | IntegerRangeTest { .. } => ItemType::BOOLEAN,
            Filter { base, .. }
            | FirstItem(base)
            | LastItem(base)
            | Subscript { base, .. }
            | TailFrom { base, .. }
            | Slice { base, .. } => self.item_type(*base, th),
            Atomize(operand) => match self.item_type(*operand, th) {
                t @ (ItemType::Atomic(_) | ItemType::Empty) => t,
                ItemType::Node(crate::model::NodeKind::Comment | crate::model::NodeKind::ProcessingInstruction) => {
                    ItemType::STRING
                }
                ItemType::Node(_) | ItemType::AnyNode => ItemType::UNTYPED,
                ItemType::AnyItem => ItemType::ANY_ATOMIC,
            },
            UntypedConvert { operand, target, mode } => match mode {
                crate::compiler::ir::ConversionMode::All => ItemType::Atomic(*target),
                crate::compiler::ir::ConversionMode::Selective => {
                    let t = self.item_type(*operand, th);
                    if t == ItemType::UNTYPED {
                        ItemType::Atomic(*target)
                    } else {
                        th.common_supertype(&t, &ItemType::Atomic(*target))
                    }
                }
            },
            NumericPromote { target, .. } => ItemType::Atomic(*target),
            ItemCheck { operand, required, .. } => {
                let t = self.item_type(*operand, th);
                if th.is_subtype(&t, required) { t } else { *required }
            }
            CardinalityCheck { operand, .. } => self.item_type(*operand, th),
            Let { action, .. } => self.item_type(*action, th),
            FunctionCall { signature, .. } => signature.as_ref().map_or(ItemType::AnyItem, |s| s.result.item),
        }
    }
}
