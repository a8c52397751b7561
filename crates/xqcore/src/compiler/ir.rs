//! Expression tree: an arena of nodes addressed by [`ExprId`].
//!
//! Every node stores its parent id, its source location and a generation-tagged cache of
//! its static properties (see `properties.rs`). Any structural change bumps the arena
//! generation, which invalidates every cached property at once.

use core::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::{SmallVec, smallvec};

use crate::engine::calculator::CalculatorSlot;
use crate::engine::error::{Error, ErrorCode};
use crate::engine::runtime::FunctionSignature;
use crate::types::{AtomicType, Cardinality, ItemType, SequenceType};
use crate::xdm::{ExpandedName, XdmAtomicValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub(crate) u32);

impl ExprId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub const UNKNOWN: Location = Location { line: 0, column: 0 };

    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    pub fn is_unknown(&self) -> bool {
        self.line == 0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Plus,
    Minus,
    Times,
    Div,
    IDiv,
    Mod,
}

impl ArithOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ArithOp::Plus => "+",
            ArithOp::Minus => "-",
            ArithOp::Times => "*",
            ArithOp::Div => "div",
            ArithOp::IDiv => "idiv",
            ArithOp::Mod => "mod",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    pub fn general_symbol(self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Ne => "!=",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
        }
    }

    pub fn value_symbol(self) -> &'static str {
        match self {
            ComparisonOp::Eq => "eq",
            ComparisonOp::Ne => "ne",
            ComparisonOp::Lt => "lt",
            ComparisonOp::Le => "le",
            ComparisonOp::Gt => "gt",
            ComparisonOp::Ge => "ge",
        }
    }

    /// Operator to use when the operands are swapped: `a < b` is `b > a`.
    #[must_use]
    pub fn inverse(self) -> Self {
        match self {
            ComparisonOp::Lt => ComparisonOp::Gt,
            ComparisonOp::Le => ComparisonOp::Ge,
            ComparisonOp::Gt => ComparisonOp::Lt,
            ComparisonOp::Ge => ComparisonOp::Le,
            other => other,
        }
    }

    pub fn is_ordering(self) -> bool {
        !matches!(self, ComparisonOp::Eq | ComparisonOp::Ne)
    }

    pub fn test(self, ord: core::cmp::Ordering) -> bool {
        match self {
            ComparisonOp::Eq => ord.is_eq(),
            ComparisonOp::Ne => ord.is_ne(),
            ComparisonOp::Lt => ord.is_lt(),
            ComparisonOp::Le => ord.is_le(),
            ComparisonOp::Gt => ord.is_gt(),
            ComparisonOp::Ge => ord.is_ge(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityOp {
    Is,
    Precedes,
    Follows,
}

impl IdentityOp {
    pub fn symbol(self) -> &'static str {
        match self {
            IdentityOp::Is => "is",
            IdentityOp::Precedes => "<<",
            IdentityOp::Follows => ">>",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BooleanOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Plus,
    Minus,
}

/// Which items an untyped-atomic converter touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionMode {
    /// Every item is known to be `xs:untypedAtomic`.
    All,
    /// Only untyped items are converted; others pass through.
    Selective,
}

/// Evaluation strategy of a general comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonCardinality {
    ManyToMany,
    /// Left side may be many, right side is a single value.
    ManyToOne,
}

/// Names the operand being checked so that a failure can say which one it was.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoleKind {
    Operand { operator: String },
    FunctionArgument { function: ExpandedName },
    Variable { name: ExpandedName },
    Predicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoleLocator {
    pub kind: RoleKind,
    /// Zero-based operand or argument index.
    pub index: usize,
    pub code: ErrorCode,
}

fn ordinal(i: usize) -> String {
    match i {
        0 => "first".to_string(),
        1 => "second".to_string(),
        2 => "third".to_string(),
        n => format!("{}th", n + 1),
    }
}

impl RoleLocator {
    pub fn operand(operator: impl Into<String>, index: usize) -> Self {
        Self { kind: RoleKind::Operand { operator: operator.into() }, index, code: ErrorCode::XPTY0004 }
    }

    pub fn argument(function: ExpandedName, index: usize) -> Self {
        Self { kind: RoleKind::FunctionArgument { function }, index, code: ErrorCode::XPTY0004 }
    }

    pub fn variable(name: ExpandedName) -> Self {
        Self { kind: RoleKind::Variable { name }, index: 0, code: ErrorCode::XPTY0004 }
    }

    pub fn predicate() -> Self {
        Self { kind: RoleKind::Predicate, index: 0, code: ErrorCode::FORG0006 }
    }

    #[must_use]
    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.code = code;
        self
    }

    /// Error for a value whose length the role does not allow.
    /// `what` describes the value, e.g. "an empty sequence".
    pub fn cardinality_error(&self, what: &str) -> Error {
        Error::from_code(self.code, format!("{what} is not allowed as the {}", self.message()))
    }

    pub fn item_type_error(&self, required: &ItemType, supplied: &ItemType) -> Error {
        Error::from_code(
            ErrorCode::XPTY0004,
            format!("required item type of the {} is {required}; supplied value has item type {supplied}", self.message()),
        )
    }

    /// Human readable description, e.g. "first operand of '+'".
    pub fn message(&self) -> String {
        match &self.kind {
            RoleKind::Operand { operator } => format!("{} operand of '{}'", ordinal(self.index), operator),
            RoleKind::FunctionArgument { function } => {
                format!("{} argument of {}()", ordinal(self.index), function)
            }
            RoleKind::Variable { name } => format!("value of variable ${name}"),
            RoleKind::Predicate => "filter predicate".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FilterFlags {
    /// The predicate may depend on position() or last(), or may yield a number.
    pub positional: bool,
    /// The predicate always yields exactly one boolean.
    pub singleton_boolean: bool,
    /// The predicate is a single number that does not depend on the focus.
    pub independent_numeric: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarBinding {
    Unresolved,
    External { slot: usize, declared: SequenceType },
    Local { slot: usize, static_type: SequenceType },
}

impl VarBinding {
    pub fn slot(&self) -> Option<usize> {
        match self {
            VarBinding::Unresolved => None,
            VarBinding::External { slot, .. } | VarBinding::Local { slot, .. } => Some(*slot),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(Vec<XdmAtomicValue>),
    ContextItem { item_type: ItemType },
    Position,
    Last,
    VarRef { name: ExpandedName, binding: VarBinding },
    Sequence(Vec<ExprId>),
    Range { start: ExprId, end: ExprId },
    Arithmetic { op: ArithOp, lhs: ExprId, rhs: ExprId, calculator: CalculatorSlot },
    /// Arithmetic under backwards-compatible rules: operands are forced to `xs:double`.
    LegacyArithmetic { op: ArithOp, lhs: ExprId, rhs: ExprId },
    Unary { op: UnaryOp, operand: ExprId },
    Negate(ExprId),
    Boolean { op: BooleanOp, lhs: ExprId, rhs: ExprId },
    GeneralComparison { op: ComparisonOp, lhs: ExprId, rhs: ExprId, mode: ComparisonCardinality, collation: Option<String> },
    ValueComparison {
        op: ComparisonOp,
        lhs: ExprId,
        rhs: ExprId,
        /// Result when either operand is empty; `None` yields the empty sequence.
        result_when_empty: Option<bool>,
        /// Compare untyped operands the way a general comparison does.
        convert_untyped: bool,
        collation: Option<String>,
    },
    IdentityComparison { op: IdentityOp, lhs: ExprId, rhs: ExprId },
    IntegerRangeTest { value: ExprId, min: ExprId, max: ExprId },
    Filter { base: ExprId, predicate: ExprId, flags: FilterFlags },
    FirstItem(ExprId),
    LastItem(ExprId),
    /// `base[index]` where `index` is a single focus-independent number.
    Subscript { base: ExprId, index: ExprId },
    /// Items of `base` from 1-based position `start` onwards.
    TailFrom { base: ExprId, start: ExprId },
    /// Items of `base` at 1-based positions `low..=high`.
    Slice { base: ExprId, low: ExprId, high: ExprId },
    Atomize(ExprId),
    UntypedConvert { operand: ExprId, target: AtomicType, mode: ConversionMode },
    NumericPromote { operand: ExprId, target: AtomicType, role: RoleLocator },
    ItemCheck { operand: ExprId, required: ItemType, role: RoleLocator },
    CardinalityCheck { operand: ExprId, required: Cardinality, role: RoleLocator },
    Let { name: ExpandedName, slot: Option<usize>, declared: Option<SequenceType>, binding: ExprId, action: ExprId },
    FunctionCall { name: ExpandedName, args: Vec<ExprId>, signature: Option<Arc<FunctionSignature>> },
}

impl ExprKind {
    /// Direct children in evaluation order.
    pub fn children(&self) -> SmallVec<[ExprId; 4]> {
        use ExprKind::*;
        match self {
            Literal(_) | ContextItem { .. } | Position | Last | VarRef { .. } => SmallVec::new(),
            Sequence(items) => items.iter().copied().collect(),
            FunctionCall { args, .. } => args.iter().copied().collect(),
            Range { start: a, end: b }
            | Arithmetic { lhs: a, rhs: b, .. }
            | LegacyArithmetic { lhs: a, rhs: b, .. }
            | Boolean { lhs: a, rhs: b, .. }
            | GeneralComparison { lhs: a, rhs: b, .. }
            | ValueComparison { lhs: a, rhs: b, .. }
            | IdentityComparison { lhs: a, rhs: b, .. }
            | Filter { base: a, predicate: b, .. }
            | Subscript { base: a, index: b }
            | TailFrom { base: a, start: b }
            | Let { binding: a, action: b, .. } => smallvec![*a, *b],
            IntegerRangeTest { value: a, min: b, max: c } | Slice { base: a, low: b, high: c } => smallvec![*a, *b, *c],
            Unary { operand: a, .. }
            | Negate(a)
            | FirstItem(a)
            | LastItem(a)
            | Atomize(a)
            | UntypedConvert { operand: a, .. }
            | NumericPromote { operand: a, .. }
            | ItemCheck { operand: a, .. }
            | CardinalityCheck { operand: a, .. } => smallvec![*a],
        }
    }

    pub fn children_mut(&mut self) -> SmallVec<[&mut ExprId; 4]> {
        use ExprKind::*;
        match self {
            Literal(_) | ContextItem { .. } | Position | Last | VarRef { .. } => SmallVec::new(),
            Sequence(items) => items.iter_mut().collect(),
            FunctionCall { args, .. } => args.iter_mut().collect(),
            Range { start: a, end: b }
            | Arithmetic { lhs: a, rhs: b, .. }
            | LegacyArithmetic { lhs: a, rhs: b, .. }
            | Boolean { lhs: a, rhs: b, .. }
            | GeneralComparison { lhs: a, rhs: b, .. }
            | ValueComparison { lhs: a, rhs: b, .. }
            | IdentityComparison { lhs: a, rhs: b, .. }
            | Filter { base: a, predicate: b, .. }
            | Subscript { base: a, index: b }
            | TailFrom { base: a, start: b }
            | Let { binding: a, action: b, .. } => smallvec![a, b],
            IntegerRangeTest { value: a, min: b, max: c } | Slice { base: a, low: b, high: c } => smallvec![a, b, c],
            Unary { operand: a, .. }
            | Negate(a)
            | FirstItem(a)
            | LastItem(a)
            | Atomize(a)
            | UntypedConvert { operand: a, .. }
            | NumericPromote { operand: a, .. }
            | ItemCheck { operand: a, .. }
            | CardinalityCheck { operand: a, .. } => smallvec![a],
        }
    }

    pub fn display_name(&self) -> &'static str {
        use ExprKind::*;
        match self {
            Literal(_) => "literal",
            ContextItem { .. } => "dot",
            Position => "position",
            Last => "last",
            VarRef { .. } => "varRef",
            Sequence(_) => "sequence",
            Range { .. } => "range",
            Arithmetic { .. } => "arith",
            LegacyArithmetic { .. } => "arith10",
            Unary { .. } => "unary",
            Negate(_) => "negate",
            Boolean { op: BooleanOp::And, .. } => "and",
            Boolean { op: BooleanOp::Or, .. } => "or",
            GeneralComparison { .. } => "gc",
            ValueComparison { .. } => "vc",
            IdentityComparison { .. } => "identity",
            IntegerRangeTest { .. } => "intRangeTest",
            Filter { .. } => "filter",
            FirstItem(_) => "first",
            LastItem(_) => "lastItem",
            Subscript { .. } => "subscript",
            TailFrom { .. } => "tail",
            Slice { .. } => "slice",
            Atomize(_) => "data",
            UntypedConvert { .. } => "convertUntyped",
            NumericPromote { .. } => "promote",
            ItemCheck { .. } => "treatAs",
            CardinalityCheck { .. } => "checkCardinality",
            Let { .. } => "let",
            FunctionCall { .. } => "call",
        }
    }
}

pub struct ExprNode {
    pub(crate) kind: ExprKind,
    pub(crate) parent: Option<ExprId>,
    pub(crate) location: Location,
    /// High 32 bits: arena generation the value was computed for; low 32 bits: packed properties.
    pub(crate) props: AtomicU64,
}

impl Clone for ExprNode {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            parent: self.parent,
            location: self.location,
            props: AtomicU64::new(self.props.load(Ordering::Relaxed)),
        }
    }
}

impl fmt::Debug for ExprNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExprNode")
            .field("kind", &self.kind)
            .field("parent", &self.parent)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct ExprArena {
    nodes: Vec<ExprNode>,
    generation: u32,
    slots: usize,
}

impl Default for ExprArena {
    fn default() -> Self {
        Self { nodes: Vec::new(), generation: 1, slots: 0 }
    }
}

impl ExprArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    fn bump(&mut self) {
        self.generation = self.generation.wrapping_add(1).max(1);
    }

    pub fn alloc(&mut self, kind: ExprKind) -> ExprId {
        self.alloc_at(kind, Location::UNKNOWN)
    }

    pub fn alloc_at(&mut self, kind: ExprKind, location: Location) -> ExprId {
        let id = ExprId(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX));
        for child in kind.children() {
            self.nodes[child.index()].parent = Some(id);
        }
        self.nodes.push(ExprNode { kind, parent: None, location, props: AtomicU64::new(0) });
        self.bump();
        id
    }

    pub(crate) fn node(&self, id: ExprId) -> &ExprNode {
        &self.nodes[id.index()]
    }

    pub fn kind(&self, id: ExprId) -> &ExprKind {
        &self.nodes[id.index()].kind
    }

    /// Replaces the node's payload in place, re-parenting the new children.
    pub fn replace_kind(&mut self, id: ExprId, kind: ExprKind) -> Result<(), Error> {
        for child in kind.children() {
            self.check_acyclic(id, child)?;
        }
        for child in kind.children() {
            self.nodes[child.index()].parent = Some(id);
        }
        self.nodes[id.index()].kind = kind;
        self.bump();
        Ok(())
    }

    /// Swaps child `old` of `parent` for `new`.
    pub fn set_child(&mut self, parent: ExprId, old: ExprId, new: ExprId) -> Result<(), Error> {
        if old == new {
            return Ok(());
        }
        self.check_acyclic(parent, new)?;
        let mut found = false;
        for slot in self.nodes[parent.index()].kind.children_mut() {
            if *slot == old {
                *slot = new;
                found = true;
                break;
            }
        }
        if !found {
            return Err(Error::internal(format!("{old} is not a child of {parent}")));
        }
        self.nodes[new.index()].parent = Some(parent);
        self.bump();
        Ok(())
    }

    /// Rejects attaching `child` below `parent` when `child` is `parent` or one of its ancestors.
    fn check_acyclic(&self, parent: ExprId, child: ExprId) -> Result<(), Error> {
        let mut cur = Some(parent);
        let mut steps = 0usize;
        while let Some(id) = cur {
            if id == child {
                return Err(Error::internal(format!("attaching {child} below {parent} would create a cycle")));
            }
            steps += 1;
            if steps > self.nodes.len() {
                return Err(Error::internal(format!("parent chain of {parent} does not terminate")));
            }
            cur = self.nodes[id.index()].parent;
        }
        Ok(())
    }

    pub fn parent(&self, id: ExprId) -> Option<ExprId> {
        self.nodes[id.index()].parent
    }

    pub(crate) fn set_parent(&mut self, id: ExprId, parent: Option<ExprId>) {
        self.nodes[id.index()].parent = parent;
    }

    pub fn location(&self, id: ExprId) -> Location {
        self.nodes[id.index()].location
    }

    pub fn set_location(&mut self, id: ExprId, location: Location) {
        self.nodes[id.index()].location = location;
    }

    pub fn allocate_slot(&mut self) -> usize {
        self.slots += 1;
        self.slots - 1
    }

    pub fn slot_count(&self) -> usize {
        self.slots
    }

    pub fn literal(&self, id: ExprId) -> Option<&[XdmAtomicValue]> {
        match self.kind(id) {
            ExprKind::Literal(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_literal(&self, id: ExprId) -> bool {
        matches!(self.kind(id), ExprKind::Literal(_))
    }

    pub fn is_empty_literal(&self, id: ExprId) -> bool {
        matches!(self.kind(id), ExprKind::Literal(v) if v.is_empty())
    }

    pub fn single_literal(&self, id: ExprId) -> Option<&XdmAtomicValue> {
        match self.kind(id) {
            ExprKind::Literal(v) if v.len() == 1 => v.first(),
            _ => None,
        }
    }

    /// Copies the subtree rooted at `root` into a fresh arena.
    pub fn extract(&self, root: ExprId) -> (ExprArena, ExprId) {
        let mut dst = ExprArena { slots: self.slots, ..ExprArena::default() };
        let id = self.copy_into(root, &mut dst);
        (dst, id)
    }

    fn copy_into(&self, id: ExprId, dst: &mut ExprArena) -> ExprId {
        let mut kind = self.kind(id).clone();
        for slot in kind.children_mut() {
            *slot = self.copy_into(*slot, dst);
        }
        dst.alloc_at(kind, self.location(id))
    }

    /// Ids of every node reachable from `root`, parents before children.
    pub fn descendants_or_self(&self, root: ExprId) -> Vec<ExprId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            out.push(id);
            let children = self.kind(id).children();
            stack.extend(children.into_iter().rev());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(a: &mut ExprArena, v: i64) -> ExprId {
        a.alloc(ExprKind::Literal(vec![XdmAtomicValue::Integer(v)]))
    }

    #[test]
    fn alloc_sets_parent_links() {
        let mut a = ExprArena::new();
        let l = int(&mut a, 1);
        let r = int(&mut a, 2);
        let seq = a.alloc(ExprKind::Sequence(vec![l, r]));
        assert_eq!(a.parent(l), Some(seq));
        assert_eq!(a.parent(r), Some(seq));
        assert_eq!(a.parent(seq), None);
    }

    #[test]
    fn set_child_rejects_cycles() {
        let mut a = ExprArena::new();
        let l = int(&mut a, 1);
        let inner = a.alloc(ExprKind::Sequence(vec![l]));
        let outer = a.alloc(ExprKind::Sequence(vec![inner]));
        let err = a.set_child(inner, l, outer).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::Internal);
    }

    #[test]
    fn generation_moves_on_every_change() {
        let mut a = ExprArena::new();
        let g0 = a.generation();
        let l = int(&mut a, 1);
        let g1 = a.generation();
        assert_ne!(g0, g1);
        let r = int(&mut a, 2);
        let seq = a.alloc(ExprKind::Sequence(vec![l]));
        let g2 = a.generation();
        a.set_child(seq, l, r).unwrap();
        assert_ne!(g2, a.generation());
    }

    #[test]
    fn extract_copies_subtree() {
        let mut a = ExprArena::new();
        let l = int(&mut a, 1);
        let r = int(&mut a, 2);
        let seq = a.alloc(ExprKind::Sequence(vec![l, r]));
        let (b, root) = a.extract(seq);
        assert_eq!(b.len(), 3);
        assert_eq!(b.kind(root).children().len(), 2);
    }
}
