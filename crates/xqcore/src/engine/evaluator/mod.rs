//! Lazy evaluation of a compiled expression tree.
//!
//! [`EvalContext`] is cheap to clone: the tree, the dynamic context and the bound external
//! variables sit behind one `Rc`, while the focus and the local variable frame are
//! persistent `Rc` chains. Nested evaluations (filter predicates, `let` bodies) derive a
//! new context instead of mutating the current one, so nothing has to be restored on
//! error paths.
//!
//! Every node can be evaluated three ways: [`EvalContext::iterate`] (a pull cursor),
//! [`EvalContext::evaluate_item`] (at most one item) and [`EvalContext::process`] (push
//! into a [`SequenceSink`]). Each kind implements whichever is natural and derives the
//! others.

use std::cell::{OnceCell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, OnceLock};

use crate::compiler::ir::{
    ArithOp, BooleanOp, ComparisonCardinality, ComparisonOp, ConversionMode, ExprArena, ExprId, ExprKind, FilterFlags,
    IdentityOp, RoleLocator, UnaryOp, VarBinding,
};
use crate::compiler::properties::Dependencies;
use crate::engine::calculator::{CalculatorRegistry, CalculatorSlot};
use crate::engine::collation::{Collation, CollationRegistry};
use crate::engine::error::{ContextSnapshot, Error, ErrorCode};
use crate::engine::functions::default_function_registry;
use crate::engine::runtime::{CallCtx, DynamicContext, FunctionRegistry, StaticContext};
use crate::model::{NoNode, XdmNode};
use crate::types::{AtomicType, Cardinality, ItemType, SequenceType, TypeHierarchy};
use crate::xdm::{
    EmptyCursor, ExpandedName, Grounded, SequenceCursor, SingletonCursor, XdmAtomicValue, XdmItem, XdmSequence,
};

pub(crate) mod comparison;
pub mod convert;
pub(crate) mod cursors;
pub(crate) mod numeric;

use comparison::compare_atomic;
use convert::{
    atomize_one, convert_if_untyped, dynamic_item_type, ebv_atomic, ebv_cursor, ebv_too_long, item_matches, to_number,
};
use cursors::{
    AtomizeCursor, CardinalityCheckCursor, ConcatCursor, FilterCursor, MapCursor, PredicateMode, RangeCursor,
};

/// Receiver for push-mode evaluation.
pub trait SequenceSink<N> {
    fn append(&mut self, item: XdmItem<N>) -> Result<(), Error>;
}

impl<N> SequenceSink<N> for Vec<XdmItem<N>> {
    fn append(&mut self, item: XdmItem<N>) -> Result<(), Error> {
        self.push(item);
        Ok(())
    }
}

/// Size of the sequence a focus ranges over, computed on first request.
pub(crate) struct LastPosition<N> {
    value: OnceCell<usize>,
    source: RefCell<Option<Box<dyn SequenceCursor<N>>>>,
}

impl<N> LastPosition<N> {
    pub(crate) fn known(n: usize) -> Rc<Self> {
        let value = OnceCell::new();
        let _ = value.set(n);
        Rc::new(Self { value, source: RefCell::new(None) })
    }

    /// Counted from `cursor` (a fork positioned at the start) when first needed.
    pub(crate) fn lazy(cursor: Box<dyn SequenceCursor<N>>) -> Rc<Self> {
        Rc::new(Self { value: OnceCell::new(), source: RefCell::new(Some(cursor)) })
    }

    /// For predicates that never ask for `last()`.
    pub(crate) fn unknown() -> Rc<Self> {
        Rc::new(Self { value: OnceCell::new(), source: RefCell::new(None) })
    }

    pub(crate) fn get(&self) -> Result<usize, Error> {
        if let Some(n) = self.value.get() {
            return Ok(*n);
        }
        let mut source = self.source.borrow_mut();
        let Some(cursor) = source.as_mut() else {
            return Err(Error::internal("size of the focus was requested but is not available"));
        };
        let n = cursor.last_position()?;
        *source = None;
        let _ = self.value.set(n);
        Ok(n)
    }

    fn peek(&self) -> Option<usize> {
        self.value.get().copied()
    }
}

pub(crate) struct Focus<N> {
    pub(crate) item: XdmItem<N>,
    pub(crate) position: usize,
    pub(crate) last: Rc<LastPosition<N>>,
}

/// A local variable; its value is computed on first reference.
struct LocalBinding<N> {
    slot: usize,
    expr: ExprId,
    scope: EvalContext<N>,
    value: OnceCell<Grounded<N>>,
    next: Option<Rc<LocalBinding<N>>>,
}

impl<N: XdmNode> LocalBinding<N> {
    fn force(&self) -> Result<Grounded<N>, Error> {
        if let Some(v) = self.value.get() {
            return Ok(v.clone());
        }
        let v = self.scope.materialize_grounded(self.expr)?;
        let _ = self.value.set(v.clone());
        Ok(v)
    }
}

struct Shared<N> {
    arena: Arc<ExprArena>,
    dynamic: DynamicContext<N>,
    hierarchy: Arc<dyn TypeHierarchy>,
    collation: Arc<dyn Collation>,
    externals: Vec<Option<Grounded<N>>>,
}

/// State one evaluation runs against: the expression tree, the dynamic context, the
/// current focus and the local variable frame.
pub struct EvalContext<N> {
    shared: Rc<Shared<N>>,
    focus: Option<Rc<Focus<N>>>,
    locals: Option<Rc<LocalBinding<N>>>,
}

impl<N> Clone for EvalContext<N> {
    fn clone(&self) -> Self {
        Self { shared: Rc::clone(&self.shared), focus: self.focus.clone(), locals: self.locals.clone() }
    }
}

fn cardinality_of_len(n: usize) -> Cardinality {
    match n {
        0 => Cardinality::EMPTY,
        1 => Cardinality::EXACTLY_ONE,
        _ => Cardinality::ONE_OR_MORE,
    }
}

fn empty_cursor<N: 'static>() -> Box<dyn SequenceCursor<N>> {
    Box::new(EmptyCursor::new())
}

fn optional_cursor<N: Clone + 'static>(item: Option<XdmItem<N>>) -> Box<dyn SequenceCursor<N>> {
    match item {
        Some(item) => Box::new(SingletonCursor::new(item)),
        None => empty_cursor(),
    }
}

fn boolean<N>(b: bool) -> Option<XdmItem<N>> {
    Some(XdmItem::Atomic(XdmAtomicValue::Boolean(b)))
}

fn expect_atomic<N>(item: XdmItem<N>) -> Result<XdmAtomicValue, Error> {
    match item {
        XdmItem::Atomic(a) => Ok(a),
        XdmItem::Node(_) => Err(Error::internal("atomized sequence yielded a node")),
    }
}

/// Converts a numeric position to a 1-based index, rounding up or down. `None` means
/// the position selects nothing.
fn to_index(x: f64, round_up: bool) -> Option<usize> {
    let r = if round_up { x.ceil() } else { x.floor() };
    if r.is_nan() {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    if r >= usize::MAX as f64 {
        return if round_up { None } else { Some(usize::MAX) };
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Some(if r < 1.0 { 0 } else { r as usize })
}

/// 1-based index denoted by a single numeric predicate value, if it selects anything.
fn whole_position(v: &XdmAtomicValue) -> Option<usize> {
    let n = v.as_whole_number()?;
    usize::try_from(n).ok().filter(|n| *n >= 1)
}

fn single<N>(mut cursor: Box<dyn SequenceCursor<N>>) -> Result<Option<XdmItem<N>>, Error> {
    let Some(first) = cursor.next_item().transpose()? else {
        return Ok(None);
    };
    if cursor.next_item().transpose()?.is_some() {
        cursor.close();
        return Err(Error::type_error("a sequence of more than one item is not allowed here"));
    }
    Ok(Some(first))
}

impl<N: XdmNode> EvalContext<N> {
    pub(crate) fn new(
        arena: Arc<ExprArena>,
        dynamic: &DynamicContext<N>,
        hierarchy: Arc<dyn TypeHierarchy>,
        default_collation: Option<&str>,
        externals: &[(ExpandedName, SequenceType)],
    ) -> Result<Self, Error> {
        let mut bound = Vec::with_capacity(externals.len());
        for (name, declared) in externals {
            let Some(value) = dynamic.variables.get(name) else {
                bound.push(None);
                continue;
            };
            let role = RoleLocator::variable(name.clone());
            if !declared.cardinality.subsumes(cardinality_of_len(value.len())) {
                return Err(role.cardinality_error(&format!("a sequence of {} items", value.len())));
            }
            if let Some(bad) = value.iter().find(|i| !item_matches(*i, &declared.item, hierarchy.as_ref())) {
                return Err(role.item_type_error(&declared.item, &dynamic_item_type(bad)));
            }
            bound.push(Some(Grounded::from_vec(value.clone())));
        }
        let collation = dynamic.collation(default_collation)?;
        let focus = dynamic.context_item.clone().map(|item| {
            Rc::new(Focus { item, position: 1, last: LastPosition::known(1) })
        });
        let dynamic = DynamicContext {
            context_item: dynamic.context_item.clone(),
            variables: HashMap::new(),
            functions: Arc::clone(&dynamic.functions),
            collations: Arc::clone(&dynamic.collations),
        };
        let shared = Shared { arena, dynamic, hierarchy, collation, externals: bound };
        Ok(Self { shared: Rc::new(shared), focus, locals: None })
    }

    pub(crate) fn arena(&self) -> &ExprArena {
        &self.shared.arena
    }

    pub(crate) fn with_focus(&self, focus: Focus<N>) -> Self {
        Self { shared: Rc::clone(&self.shared), focus: Some(Rc::new(focus)), locals: self.locals.clone() }
    }

    fn bind_local(&self, slot: usize, expr: ExprId) -> Self {
        let binding =
            LocalBinding { slot, expr, scope: self.clone(), value: OnceCell::new(), next: self.locals.clone() };
        Self { shared: Rc::clone(&self.shared), focus: self.focus.clone(), locals: Some(Rc::new(binding)) }
    }

    fn focus(&self) -> Result<&Focus<N>, Error> {
        self.focus.as_deref().ok_or_else(|| Error::from_code(ErrorCode::XPDY0002, "the context item is absent"))
    }

    pub fn context_item(&self) -> Result<XdmItem<N>, Error> {
        Ok(self.focus()?.item.clone())
    }

    pub fn position(&self) -> Result<usize, Error> {
        Ok(self.focus()?.position)
    }

    /// Size of the current focus. Computed on first request.
    pub fn last(&self) -> Result<usize, Error> {
        self.focus()?.last.get()
    }

    /// Value of a local (`let`) variable by slot.
    pub fn local_variable(&self, slot: usize) -> Result<Grounded<N>, Error> {
        let mut cur = self.locals.as_deref();
        while let Some(binding) = cur {
            if binding.slot == slot {
                return binding.force();
            }
            cur = binding.next.as_deref();
        }
        Err(Error::internal(format!("local variable slot {slot} is not bound")))
    }

    /// Value of an external variable by the slot it was declared with.
    pub fn external_variable(&self, slot: usize) -> Option<Grounded<N>> {
        self.shared.externals.get(slot).and_then(Option::clone)
    }

    fn snapshot(&self) -> ContextSnapshot {
        match self.focus.as_deref() {
            None => ContextSnapshot::default(),
            Some(f) => {
                ContextSnapshot { item: Some(f.item.to_string()), position: Some(f.position), last: f.last.peek() }
            }
        }
    }

    fn annotate(&self, id: ExprId, e: Error) -> Error {
        e.maybe_set_location(self.arena().location(id)).maybe_set_context(|| self.snapshot())
    }

    fn collation(&self, uri: Option<&str>) -> Result<Arc<dyn Collation>, Error> {
        match uri {
            None => Ok(Arc::clone(&self.shared.collation)),
            Some(u) => self.shared.dynamic.collations.resolve(Some(u)),
        }
    }

    /// Lazily evaluates `id`.
    pub fn iterate(&self, id: ExprId) -> Result<Box<dyn SequenceCursor<N>>, Error> {
        self.iterate_inner(id).map_err(|e| self.annotate(id, e))
    }

    /// Evaluates an expression that yields at most one item.
    pub fn evaluate_item(&self, id: ExprId) -> Result<Option<XdmItem<N>>, Error> {
        self.evaluate_item_inner(id).map_err(|e| self.annotate(id, e))
    }

    pub fn materialize(&self, id: ExprId) -> Result<XdmSequence<N>, Error> {
        Ok(self.materialize_grounded(id)?.to_vec())
    }

    pub(crate) fn materialize_grounded(&self, id: ExprId) -> Result<Grounded<N>, Error> {
        let mut cursor = self.iterate(id)?;
        if let Some(g) = cursor.grounded() {
            return Ok(g);
        }
        let mut out = Vec::new();
        while let Some(item) = cursor.next_item() {
            out.push(item.map_err(|e| self.annotate(id, e))?);
        }
        Ok(Grounded::from_vec(out))
    }

    pub fn effective_boolean_value(&self, id: ExprId) -> Result<bool, Error> {
        let mut cursor = self.iterate(id)?;
        ebv_cursor(cursor.as_mut()).map_err(|e| self.annotate(id, e))
    }

    /// Pushes the result of `id` into `sink` without building a cursor where possible.
    pub fn process(&self, id: ExprId, sink: &mut dyn SequenceSink<N>) -> Result<(), Error> {
        match self.arena().kind(id) {
            ExprKind::Sequence(items) => {
                for child in items {
                    self.process(*child, sink)?;
                }
                Ok(())
            }
            ExprKind::Let { slot: Some(slot), binding, action, .. } => {
                self.bind_local(*slot, *binding).process(*action, sink)
            }
            kind if produces_single_item(kind) => match self.evaluate_item(id)? {
                Some(item) => sink.append(item),
                None => Ok(()),
            },
            _ => {
                let mut cursor = self.iterate(id)?;
                while let Some(item) = cursor.next_item() {
                    sink.append(item.map_err(|e| self.annotate(id, e))?)?;
                }
                Ok(())
            }
        }
    }

    /// Predicate test of a positional filter: a single number selects by position, any
    /// other value by its effective boolean value.
    pub(crate) fn predicate_matches(&self, predicate: ExprId, position: usize) -> Result<bool, Error> {
        let mut cursor = self.iterate(predicate)?;
        let Some(first) = cursor.next_item().transpose()? else {
            return Ok(false);
        };
        let XdmItem::Atomic(v) = first else {
            cursor.close();
            return Ok(true);
        };
        if cursor.next_item().transpose()?.is_some() {
            return Err(self.annotate(predicate, ebv_too_long()));
        }
        match numeric::classify(&v) {
            #[allow(clippy::cast_precision_loss)]
            Some(n) => Ok(n.to_f64() == position as f64),
            None => ebv_atomic(&v),
        }
    }

    fn iterate_inner(&self, id: ExprId) -> Result<Box<dyn SequenceCursor<N>>, Error> {
        use ExprKind::*;
        let kind = self.arena().kind(id);
        match kind {
            Literal(values) => {
                Ok(Grounded::from_vec(values.iter().cloned().map(XdmItem::Atomic).collect()).cursor())
            }
            VarRef { name, binding } => Ok(self.variable_value(name, binding)?.cursor()),
            Sequence(items) => match items.as_slice() {
                [] => Ok(empty_cursor()),
                [only] => self.iterate(*only),
                _ => Ok(Box::new(ConcatCursor::new(self.clone(), Rc::from(items.as_slice())))),
            },
            Range { start, end } => {
                let (Some(s), Some(e)) = (self.integer_operand(*start)?, self.integer_operand(*end)?) else {
                    return Ok(empty_cursor());
                };
                Ok(Box::new(RangeCursor::new(s, e)))
            }
            Filter { base, predicate, flags } => self.filter(*base, *predicate, *flags),
            TailFrom { base, start } => match self.number_operand(*start)?.and_then(|x| to_index(x, true)) {
                Some(n) => Ok(cursors::tail(self.iterate(*base)?, n)),
                None => Ok(empty_cursor()),
            },
            Slice { base, low, high } => {
                let low = self.number_operand(*low)?.and_then(|x| to_index(x, true));
                let high = self.number_operand(*high)?.and_then(|x| to_index(x, false));
                match (low, high) {
                    (Some(l), Some(h)) => Ok(cursors::slice(self.iterate(*base)?, l, h)),
                    _ => Ok(empty_cursor()),
                }
            }
            Atomize(operand) => Ok(Box::new(AtomizeCursor::new(self.iterate(*operand)?))),
            UntypedConvert { operand, target, mode } => {
                let target = *target;
                let mode = *mode;
                let f = Rc::new(move |item: XdmItem<N>| match item {
                    XdmItem::Atomic(XdmAtomicValue::UntypedAtomic(s)) => {
                        convert::cast_untyped(&s, target).map(XdmItem::Atomic)
                    }
                    other if mode == ConversionMode::Selective => Ok(other),
                    other => Err(Error::type_error(format!(
                        "expected xs:untypedAtomic, found {}",
                        dynamic_item_type(&other)
                    ))),
                });
                Ok(Box::new(MapCursor::new(self.iterate(*operand)?, f)))
            }
            NumericPromote { operand, target, role } => {
                let target = *target;
                let role = role.clone();
                let f = Rc::new(move |item: XdmItem<N>| {
                    let supplied = dynamic_item_type(&item);
                    match item {
                        XdmItem::Atomic(v) if v.type_of() == target => Ok(XdmItem::Atomic(v)),
                        XdmItem::Atomic(v) => numeric::promote(&v, target)
                            .map(XdmItem::Atomic)
                            .ok_or_else(|| role.item_type_error(&ItemType::Atomic(target), &supplied)),
                        XdmItem::Node(_) => Err(role.item_type_error(&ItemType::Atomic(target), &supplied)),
                    }
                });
                Ok(Box::new(MapCursor::new(self.iterate(*operand)?, f)))
            }
            ItemCheck { operand, required, role } => {
                let required = *required;
                let role = role.clone();
                let th = Arc::clone(&self.shared.hierarchy);
                let f = Rc::new(move |item: XdmItem<N>| {
                    if item_matches(&item, &required, th.as_ref()) {
                        Ok(item)
                    } else {
                        Err(role.item_type_error(&required, &dynamic_item_type(&item)))
                    }
                });
                Ok(Box::new(MapCursor::new(self.iterate(*operand)?, f)))
            }
            CardinalityCheck { operand, required, role } => {
                Ok(Box::new(CardinalityCheckCursor::new(self.iterate(*operand)?, *required, Rc::new(role.clone()))))
            }
            Let { slot, binding, action, name, .. } => {
                let slot = slot.ok_or_else(|| Error::internal(format!("let ${name} was never assigned a slot")))?;
                self.bind_local(slot, *binding).iterate(*action)
            }
            FunctionCall { name, args, .. } => self.call(name, args),
            ContextItem { .. }
            | Position
            | Last
            | Arithmetic { .. }
            | LegacyArithmetic { .. }
            | Unary { .. }
            | Negate(_)
            | Boolean { .. }
            | GeneralComparison { .. }
            | ValueComparison { .. }
            | IdentityComparison { .. }
            | IntegerRangeTest { .. }
            | FirstItem(_)
            | LastItem(_)
            | Subscript { .. } => Ok(optional_cursor(self.evaluate_item_inner(id)?)),
        }
    }

    fn evaluate_item_inner(&self, id: ExprId) -> Result<Option<XdmItem<N>>, Error> {
        use ExprKind::*;
        let kind = self.arena().kind(id);
        match kind {
            Literal(values) if values.len() <= 1 => Ok(values.first().cloned().map(XdmItem::Atomic)),
            ContextItem { .. } => Ok(Some(self.context_item()?)),
            Position => Ok(Some(XdmItem::Atomic(XdmAtomicValue::Integer(usize_to_i64(self.position()?))))),
            Last => Ok(Some(XdmItem::Atomic(XdmAtomicValue::Integer(usize_to_i64(self.last()?))))),
            Arithmetic { op, lhs, rhs, calculator } => self.arithmetic(*op, *lhs, *rhs, calculator),
            LegacyArithmetic { op, lhs, rhs } => {
                let a = self.atomic_operand(*lhs)?.map_or(f64::NAN, |v| to_number(&v));
                let b = self.atomic_operand(*rhs)?.map_or(f64::NAN, |v| to_number(&v));
                let r = numeric::arithmetic(*op, &XdmAtomicValue::Double(a), &XdmAtomicValue::Double(b))?;
                Ok(Some(XdmItem::Atomic(r)))
            }
            Unary { op: UnaryOp::Plus, operand } => Ok(self.numeric_value(*operand)?.map(XdmItem::Atomic)),
            Unary { op: UnaryOp::Minus, operand } | Negate(operand) => match self.numeric_value(*operand)? {
                Some(v) => Ok(Some(XdmItem::Atomic(numeric::negate(&v)?))),
                None => Ok(None),
            },
            Boolean { op, lhs, rhs } => {
                let l = self.effective_boolean_value(*lhs)?;
                let r = match op {
                    BooleanOp::And => l && self.effective_boolean_value(*rhs)?,
                    BooleanOp::Or => l || self.effective_boolean_value(*rhs)?,
                };
                Ok(boolean(r))
            }
            GeneralComparison { op, lhs, rhs, mode, collation } => {
                Ok(boolean(self.general_comparison(*op, *lhs, *rhs, *mode, collation.as_deref())?))
            }
            ValueComparison { op, lhs, rhs, result_when_empty, convert_untyped, collation } => {
                let Some(a) = self.atomic_operand(*lhs)? else {
                    return Ok(result_when_empty.and_then(boolean));
                };
                let Some(b) = self.atomic_operand(*rhs)? else {
                    return Ok(result_when_empty.and_then(boolean));
                };
                let coll = self.collation(collation.as_deref())?;
                Ok(boolean(compare_atomic(&a, *op, &b, coll.as_ref(), *convert_untyped)?))
            }
            IdentityComparison { op, lhs, rhs } => self.identity(*op, *lhs, *rhs),
            IntegerRangeTest { value, min, max } => self.integer_range_test(*value, *min, *max),
            FirstItem(base) => {
                let mut cursor = self.iterate(*base)?;
                let first = cursor.next_item().transpose()?;
                cursor.close();
                Ok(first)
            }
            LastItem(base) => {
                let mut cursor = self.iterate(*base)?;
                if let Some(g) = cursor.grounded() {
                    return Ok(g.len().checked_sub(1).and_then(|i| g.get(i)).cloned());
                }
                let mut last = None;
                while let Some(item) = cursor.next_item() {
                    last = Some(item?);
                }
                Ok(last)
            }
            Subscript { base, index } => {
                let Some(v) = self.atomic_operand(*index)? else {
                    return Ok(None);
                };
                let v = convert_if_untyped(v, AtomicType::Double)?;
                let Some(n) = whole_position(&v) else {
                    return Ok(None);
                };
                let mut cursor = cursors::tail(self.iterate(*base)?, n);
                let item = cursor.next_item().transpose()?;
                cursor.close();
                Ok(item)
            }
            Literal(_)
            | VarRef { .. }
            | Sequence(_)
            | Range { .. }
            | Filter { .. }
            | TailFrom { .. }
            | Slice { .. }
            | Atomize(_)
            | UntypedConvert { .. }
            | NumericPromote { .. }
            | ItemCheck { .. }
            | CardinalityCheck { .. }
            | Let { .. }
            | FunctionCall { .. } => single(self.iterate_inner(id)?),
        }
    }

    fn variable_value(&self, name: &ExpandedName, binding: &VarBinding) -> Result<Grounded<N>, Error> {
        match binding {
            VarBinding::External { slot, .. } => self.external_variable(*slot).ok_or_else(|| {
                Error::from_code(ErrorCode::XPDY0002, format!("no value was supplied for variable ${name}"))
            }),
            VarBinding::Local { slot, .. } => self.local_variable(*slot),
            VarBinding::Unresolved => {
                Err(Error::static_error(ErrorCode::XPST0008, format!("variable ${name} is not declared")))
            }
        }
    }

    /// Operand atomized to at most one value.
    fn atomic_operand(&self, id: ExprId) -> Result<Option<XdmAtomicValue>, Error> {
        match self.evaluate_item(id)? {
            None => Ok(None),
            Some(item) => atomize_one(item),
        }
    }

    fn numeric_value(&self, id: ExprId) -> Result<Option<XdmAtomicValue>, Error> {
        let Some(v) = self.atomic_operand(id)? else {
            return Ok(None);
        };
        let v = convert_if_untyped(v, AtomicType::Double)?;
        if v.is_numeric() {
            Ok(Some(v))
        } else {
            Err(Error::type_error(format!("a numeric value was expected, found {}", v.type_of())))
        }
    }

    fn number_operand(&self, id: ExprId) -> Result<Option<f64>, Error> {
        Ok(self.numeric_value(id)?.and_then(|v| numeric::classify(&v)).map(numeric::NumKind::to_f64))
    }

    fn integer_operand(&self, id: ExprId) -> Result<Option<i64>, Error> {
        match self.atomic_operand(id)? {
            None => Ok(None),
            Some(XdmAtomicValue::Integer(i)) => Ok(Some(i)),
            Some(other) => {
                Err(Error::type_error(format!("range bounds must be xs:integer, found {}", other.type_of())))
            }
        }
    }

    fn arithmetic(
        &self,
        op: ArithOp,
        lhs: ExprId,
        rhs: ExprId,
        calculator: &CalculatorSlot,
    ) -> Result<Option<XdmItem<N>>, Error> {
        let Some(a) = self.atomic_operand(lhs)? else {
            return Ok(None);
        };
        let Some(b) = self.atomic_operand(rhs)? else {
            return Ok(None);
        };
        let v = match calculator {
            CalculatorSlot::Resolved(calc) => calc.compute(&a, &b)?,
            CalculatorSlot::Deferred => {
                let a = convert_if_untyped(a, AtomicType::Double)?;
                let b = convert_if_untyped(b, AtomicType::Double)?;
                CalculatorRegistry::global().resolve_dynamic(op, &a, &b)?.compute(&a, &b)?
            }
        };
        Ok(Some(XdmItem::Atomic(v)))
    }

    fn general_comparison(
        &self,
        op: ComparisonOp,
        lhs: ExprId,
        rhs: ExprId,
        mode: ComparisonCardinality,
        collation: Option<&str>,
    ) -> Result<bool, Error> {
        let coll = self.collation(collation)?;
        match mode {
            ComparisonCardinality::ManyToOne => {
                let Some(b) = self.atomic_operand(rhs)? else {
                    return Ok(false);
                };
                let mut left = AtomizeCursor::new(self.iterate(lhs)?);
                while let Some(item) = left.next_item() {
                    let a = expect_atomic(item?)?;
                    if compare_atomic(&a, op, &b, coll.as_ref(), true)? {
                        left.close();
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            ComparisonCardinality::ManyToMany => {
                let right = AtomizeCursor::new(self.iterate(rhs)?);
                let mut values = Vec::new();
                for item in crate::xdm::XdmSequenceStream::new(Box::new(right)) {
                    values.push(item?);
                }
                if values.is_empty() {
                    return Ok(false);
                }
                let right = Grounded::from_vec(values).cursor();
                let mut left = AtomizeCursor::new(self.iterate(lhs)?);
                while let Some(item) = left.next_item() {
                    let a = expect_atomic(item?)?;
                    let mut candidates = right.fork();
                    while let Some(b) = candidates.next_item() {
                        if compare_atomic(&a, op, &expect_atomic(b?)?, coll.as_ref(), true)? {
                            left.close();
                            return Ok(true);
                        }
                    }
                }
                Ok(false)
            }
        }
    }

    fn identity(&self, op: IdentityOp, lhs: ExprId, rhs: ExprId) -> Result<Option<XdmItem<N>>, Error> {
        let Some(a) = self.evaluate_item(lhs)? else {
            return Ok(None);
        };
        let Some(b) = self.evaluate_item(rhs)? else {
            return Ok(None);
        };
        let (XdmItem::Node(a), XdmItem::Node(b)) = (&a, &b) else {
            return Err(Error::type_error(format!(
                "operands of '{}' must be nodes, found {} and {}",
                op.symbol(),
                dynamic_item_type(&a),
                dynamic_item_type(&b)
            )));
        };
        let r = match op {
            IdentityOp::Is => a == b,
            IdentityOp::Precedes => a.compare_document_order(b)?.is_lt(),
            IdentityOp::Follows => a.compare_document_order(b)?.is_gt(),
        };
        Ok(boolean(r))
    }

    fn integer_range_test(&self, value: ExprId, min: ExprId, max: ExprId) -> Result<Option<XdmItem<N>>, Error> {
        let (Some(lo), Some(hi)) = (self.number_operand(min)?, self.number_operand(max)?) else {
            return Ok(boolean(false));
        };
        let mut values = AtomizeCursor::new(self.iterate(value)?);
        while let Some(item) = values.next_item() {
            let v = convert_if_untyped(expect_atomic(item?)?, AtomicType::Double)?;
            let Some(n) = numeric::classify(&v) else {
                return Err(Error::type_error(format!("cannot compare {} with xs:integer", v.type_of())));
            };
            let x = n.to_f64();
            if x.fract() == 0.0 && x >= lo && x <= hi {
                values.close();
                return Ok(boolean(true));
            }
        }
        Ok(boolean(false))
    }

    fn filter(&self, base: ExprId, predicate: ExprId, flags: FilterFlags) -> Result<Box<dyn SequenceCursor<N>>, Error> {
        let arena = self.arena();
        if let Some(values) = arena.literal(predicate) {
            return match values {
                [v] if v.is_numeric() => self.select_position(base, v),
                _ => {
                    let items: Vec<XdmItem<N>> = values.iter().cloned().map(XdmItem::Atomic).collect();
                    if convert::effective_boolean_value(&items)? { self.iterate(base) } else { Ok(empty_cursor()) }
                }
            };
        }
        if !arena.dependencies(predicate).intersects(Dependencies::FOCUS) {
            let value = self.materialize(predicate)?;
            return match value.as_slice() {
                [XdmItem::Atomic(v)] if v.is_numeric() => self.select_position(base, v),
                other => {
                    if convert::effective_boolean_value(other)? {
                        self.iterate(base)
                    } else {
                        Ok(empty_cursor())
                    }
                }
            };
        }
        let mode = if flags.positional { PredicateMode::Positional } else { PredicateMode::Boolean };
        Ok(Box::new(FilterCursor::new(self.clone(), predicate, mode, self.iterate(base)?)))
    }

    fn select_position(&self, base: ExprId, v: &XdmAtomicValue) -> Result<Box<dyn SequenceCursor<N>>, Error> {
        match whole_position(v) {
            Some(n) => Ok(cursors::slice(self.iterate(base)?, n, n)),
            None => Ok(empty_cursor()),
        }
    }

    fn call(&self, name: &ExpandedName, args: &[ExprId]) -> Result<Box<dyn SequenceCursor<N>>, Error> {
        let f = self.shared.dynamic.functions.resolve(name, args.len()).map_err(|e| e.into_error(args.len()))?;
        let values = args.iter().map(|a| self.materialize(*a)).collect::<Result<Vec<_>, _>>()?;
        let ctx = CallCtx { dyn_ctx: &self.shared.dynamic, default_collation: Arc::clone(&self.shared.collation) };
        Ok(Grounded::from_vec(f(&ctx, &values)?).cursor())
    }
}

fn usize_to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Kinds whose natural evaluation is [`EvalContext::evaluate_item`].
fn produces_single_item(kind: &ExprKind) -> bool {
    use ExprKind::*;
    matches!(
        kind,
        ContextItem { .. }
            | Position
            | Last
            | Arithmetic { .. }
            | LegacyArithmetic { .. }
            | Unary { .. }
            | Negate(_)
            | Boolean { .. }
            | GeneralComparison { .. }
            | ValueComparison { .. }
            | IdentityComparison { .. }
            | IntegerRangeTest { .. }
            | FirstItem(_)
            | LastItem(_)
            | Subscript { .. }
    )
}

fn constant_functions() -> Arc<FunctionRegistry<NoNode>> {
    static REGISTRY: OnceLock<Arc<FunctionRegistry<NoNode>>> = OnceLock::new();
    Arc::clone(REGISTRY.get_or_init(|| Arc::new(default_function_registry::<NoNode>())))
}

fn constant_collations() -> Arc<CollationRegistry> {
    static REGISTRY: OnceLock<Arc<CollationRegistry>> = OnceLock::new();
    Arc::clone(REGISTRY.get_or_init(|| Arc::new(CollationRegistry::default())))
}

/// Evaluates a subtree that depends on nothing but its own literals, as done when
/// folding at compile time.
pub(crate) fn evaluate_constant(arena: &ExprArena, root: ExprId, ctx: &StaticContext) -> Result<Vec<XdmAtomicValue>, Error> {
    let (sub, id) = arena.extract(root);
    let dynamic = DynamicContext::<NoNode> {
        context_item: None,
        variables: HashMap::new(),
        functions: constant_functions(),
        collations: constant_collations(),
    };
    let eval = EvalContext::new(
        Arc::new(sub),
        &dynamic,
        Arc::clone(&ctx.type_hierarchy),
        ctx.default_collation.as_deref(),
        &[],
    )?;
    eval.materialize(id)?
        .into_iter()
        .map(|item| match item {
            XdmItem::Atomic(a) => Ok(a),
            XdmItem::Node(n) => match n {},
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xdm::CursorProperties;
    use rstest::rstest;

    fn lit(a: &mut ExprArena, values: Vec<XdmAtomicValue>) -> ExprId {
        a.alloc(ExprKind::Literal(values))
    }

    fn ints(a: &mut ExprArena, values: &[i64]) -> ExprId {
        lit(a, values.iter().map(|i| XdmAtomicValue::Integer(*i)).collect())
    }

    fn eval(arena: ExprArena, root: ExprId) -> Result<Vec<XdmAtomicValue>, Error> {
        evaluate_constant(&arena, root, &StaticContext::default())
    }

    #[test]
    fn sequence_concatenates_lazily() {
        let mut a = ExprArena::new();
        let l = ints(&mut a, &[1, 2]);
        let e = lit(&mut a, vec![]);
        let r = ints(&mut a, &[3]);
        let seq = a.alloc(ExprKind::Sequence(vec![l, e, r]));
        let out = eval(a, seq).unwrap();
        assert_eq!(out, vec![XdmAtomicValue::Integer(1), XdmAtomicValue::Integer(2), XdmAtomicValue::Integer(3)]);
    }

    #[rstest]
    #[case(2.0, 4.0, vec![2, 3, 4])]
    #[case(2.5, 4.5, vec![3, 4])]
    #[case(0.0, 1.0, vec![1])]
    #[case(f64::NAN, 3.0, vec![])]
    fn slice_rounds_its_bounds(#[case] low: f64, #[case] high: f64, #[case] expected: Vec<i64>) {
        let mut a = ExprArena::new();
        let base = ints(&mut a, &[1, 2, 3, 4, 5]);
        let lo = lit(&mut a, vec![XdmAtomicValue::Double(low)]);
        let hi = lit(&mut a, vec![XdmAtomicValue::Double(high)]);
        let s = a.alloc(ExprKind::Slice { base, low: lo, high: hi });
        let expected: Vec<XdmAtomicValue> = expected.into_iter().map(XdmAtomicValue::Integer).collect();
        assert_eq!(eval(a, s).unwrap(), expected);
    }

    #[test]
    fn let_binding_is_lazy() {
        let mut a = ExprArena::new();
        // 1 idiv 0 would fail if it were ever evaluated
        let one = ints(&mut a, &[1]);
        let zero = ints(&mut a, &[0]);
        let boom = a.alloc(ExprKind::Arithmetic {
            op: ArithOp::IDiv,
            lhs: one,
            rhs: zero,
            calculator: CalculatorSlot::Deferred,
        });
        let body = ints(&mut a, &[7]);
        let slot = a.allocate_slot();
        let l = a.alloc(ExprKind::Let {
            name: ExpandedName::local("unused"),
            slot: Some(slot),
            declared: None,
            binding: boom,
            action: body,
        });
        assert_eq!(eval(a, l).unwrap(), vec![XdmAtomicValue::Integer(7)]);
    }

    #[test]
    fn context_item_absent_is_xpdy0002() {
        let mut a = ExprArena::new();
        let dot = a.alloc(ExprKind::ContextItem { item_type: ItemType::AnyItem });
        let err = eval(a, dot).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPDY0002);
    }

    #[test]
    fn errors_carry_the_innermost_location() {
        let mut a = ExprArena::new();
        let one = ints(&mut a, &[1]);
        let zero = ints(&mut a, &[0]);
        let div = a.alloc_at(
            ExprKind::Arithmetic { op: ArithOp::Div, lhs: one, rhs: zero, calculator: CalculatorSlot::Deferred },
            crate::compiler::ir::Location::new(1, 5),
        );
        let outer = ints(&mut a, &[2]);
        let seq = a.alloc_at(ExprKind::Sequence(vec![outer, div]), crate::compiler::ir::Location::new(1, 1));
        let err = eval(a, seq).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::FOAR0001);
        assert_eq!(err.location, Some(crate::compiler::ir::Location::new(1, 5)));
    }

    #[test]
    fn ranges_are_lazy_and_sized() {
        let mut a = ExprArena::new();
        let s = ints(&mut a, &[1]);
        let e = ints(&mut a, &[1_000_000_000]);
        let r = a.alloc(ExprKind::Range { start: s, end: e });
        let dynamic = DynamicContext::<NoNode>::default();
        let ctx = EvalContext::new(
            Arc::new(a),
            &dynamic,
            Arc::new(crate::types::BuiltinTypeHierarchy),
            None,
            &[],
        )
        .unwrap();
        let mut c = ctx.iterate(r).unwrap();
        assert!(c.properties().contains(CursorProperties::LAST_POSITION_FINDER));
        assert_eq!(c.last_position().unwrap(), 1_000_000_000);
        assert!(c.next_item().is_some());
    }
}
