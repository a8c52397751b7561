//! Fluent construction of expression trees, for front-ends and tests.
//!
//! ```
//! use xqcore::compiler::builder::ExprBuilder;
//!
//! let mut b = ExprBuilder::new();
//! let base = b.sequence(vec![]);
//! let one = b.integer(1);
//! let root = b.filter(base, one);
//! let (arena, root) = b.finish(root);
//! assert_eq!(arena.len(), 3);
//! # let _ = root;
//! ```

use rust_decimal::Decimal;

use crate::compiler::ir::{
    ArithOp, BooleanOp, ComparisonCardinality, ComparisonOp, ExprArena, ExprId, ExprKind, FilterFlags, IdentityOp,
    Location, VarBinding,
};
use crate::engine::calculator::CalculatorSlot;
use crate::types::{ItemType, SequenceType};
use crate::xdm::{ExpandedName, XdmAtomicValue};

/// Allocates nodes into an [`ExprArena`], stamping each with the current location.
#[derive(Debug, Default)]
pub struct ExprBuilder {
    arena: ExprArena,
    location: Location,
}

impl ExprBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Location given to nodes built from now on.
    pub fn at(&mut self, line: u32, column: u32) -> &mut Self {
        self.location = Location::new(line, column);
        self
    }

    pub fn arena(&self) -> &ExprArena {
        &self.arena
    }

    pub fn finish(self, root: ExprId) -> (ExprArena, ExprId) {
        (self.arena, root)
    }

    pub fn node(&mut self, kind: ExprKind) -> ExprId {
        self.arena.alloc_at(kind, self.location)
    }

    pub fn literal(&mut self, values: Vec<XdmAtomicValue>) -> ExprId {
        self.node(ExprKind::Literal(values))
    }

    pub fn integer(&mut self, v: i64) -> ExprId {
        self.literal(vec![XdmAtomicValue::Integer(v)])
    }

    pub fn decimal(&mut self, v: Decimal) -> ExprId {
        self.literal(vec![XdmAtomicValue::Decimal(v)])
    }

    pub fn double(&mut self, v: f64) -> ExprId {
        self.literal(vec![XdmAtomicValue::Double(v)])
    }

    pub fn string(&mut self, v: &str) -> ExprId {
        self.literal(vec![XdmAtomicValue::String(v.to_string())])
    }

    pub fn boolean(&mut self, v: bool) -> ExprId {
        self.literal(vec![XdmAtomicValue::Boolean(v)])
    }

    pub fn untyped(&mut self, v: &str) -> ExprId {
        self.literal(vec![XdmAtomicValue::UntypedAtomic(v.to_string())])
    }

    /// The empty sequence `()`.
    pub fn empty(&mut self) -> ExprId {
        self.literal(Vec::new())
    }

    pub fn context_item(&mut self) -> ExprId {
        self.node(ExprKind::ContextItem { item_type: ItemType::AnyItem })
    }

    pub fn position(&mut self) -> ExprId {
        self.node(ExprKind::Position)
    }

    pub fn last(&mut self) -> ExprId {
        self.node(ExprKind::Last)
    }

    /// Reference to a variable, resolved against `let` scopes and the static context
    /// during type checking.
    pub fn var(&mut self, name: impl Into<ExpandedName>) -> ExprId {
        self.node(ExprKind::VarRef { name: name.into(), binding: VarBinding::Unresolved })
    }

    pub fn sequence(&mut self, items: Vec<ExprId>) -> ExprId {
        self.node(ExprKind::Sequence(items))
    }

    pub fn range(&mut self, start: ExprId, end: ExprId) -> ExprId {
        self.node(ExprKind::Range { start, end })
    }

    pub fn arith(&mut self, op: ArithOp, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.node(ExprKind::Arithmetic { op, lhs, rhs, calculator: CalculatorSlot::Deferred })
    }

    pub fn legacy_arith(&mut self, op: ArithOp, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.node(ExprKind::LegacyArithmetic { op, lhs, rhs })
    }

    pub fn negate(&mut self, operand: ExprId) -> ExprId {
        self.node(ExprKind::Negate(operand))
    }

    pub fn general_cmp(&mut self, op: ComparisonOp, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.node(ExprKind::GeneralComparison {
            op,
            lhs,
            rhs,
            mode: ComparisonCardinality::ManyToMany,
            collation: None,
        })
    }

    /// Value comparison yielding `()` when an operand is empty.
    pub fn value_cmp(&mut self, op: ComparisonOp, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.node(ExprKind::ValueComparison {
            op,
            lhs,
            rhs,
            result_when_empty: None,
            convert_untyped: false,
            collation: None,
        })
    }

    pub fn identity_cmp(&mut self, op: IdentityOp, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.node(ExprKind::IdentityComparison { op, lhs, rhs })
    }

    pub fn and(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.node(ExprKind::Boolean { op: BooleanOp::And, lhs, rhs })
    }

    pub fn or(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.node(ExprKind::Boolean { op: BooleanOp::Or, lhs, rhs })
    }

    pub fn filter(&mut self, base: ExprId, predicate: ExprId) -> ExprId {
        self.node(ExprKind::Filter { base, predicate, flags: FilterFlags::default() })
    }

    /// Call of a function in the default function namespace.
    pub fn call(&mut self, local: &str, args: Vec<ExprId>) -> ExprId {
        self.call_named(ExpandedName::fn_name(local), args)
    }

    pub fn call_named(&mut self, name: ExpandedName, args: Vec<ExprId>) -> ExprId {
        self.node(ExprKind::FunctionCall { name, args, signature: None })
    }

    /// `let $name as declared := binding return action`.
    pub fn let_in(
        &mut self,
        name: impl Into<ExpandedName>,
        declared: Option<SequenceType>,
        binding: ExprId,
        action: ExprId,
    ) -> ExprId {
        self.node(ExprKind::Let { name: name.into(), slot: None, declared, binding, action })
    }
}
