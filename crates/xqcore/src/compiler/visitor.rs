//! The three compile passes over an [`ExprArena`].
//!
//! Each pass takes a node id and returns the id of its replacement (possibly the same
//! node). The caller performs the single point of replacement with
//! [`ExprArena::set_child`], so an early error return never leaves a half-rewritten
//! parent behind.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::compiler::ir::{ExprArena, ExprId, ExprKind, RoleLocator, UnaryOp, VarBinding};
use crate::compiler::properties::SpecialProperties;
use crate::compiler::type_checker::{static_type_check, strict_type_check};
use crate::compiler::{arithmetic, comparison, explain, filter};
use crate::consts::FNS;
use crate::engine::error::{Error, ErrorCode, Warning};
use crate::engine::evaluator::evaluate_constant;
use crate::engine::runtime::{FunctionSignature, StaticContext};
use crate::types::{AtomicType, Cardinality, ItemType, SequenceType, TypeHierarchy};
use crate::xdm::ExpandedName;

pub(crate) type CResult<T> = Result<T, Error>;

struct Scope {
    name: ExpandedName,
    slot: usize,
    static_type: SequenceType,
}

pub(crate) struct ExpressionVisitor<'a> {
    pub(crate) arena: &'a mut ExprArena,
    pub(crate) ctx: &'a StaticContext,
    warnings: Vec<Warning>,
    scopes: Vec<Scope>,
}

impl<'a> ExpressionVisitor<'a> {
    pub(crate) fn new(arena: &'a mut ExprArena, ctx: &'a StaticContext) -> Self {
        Self { arena, ctx, warnings: Vec::new(), scopes: Vec::new() }
    }

    pub(crate) fn into_warnings(self) -> Vec<Warning> {
        self.warnings
    }

    pub(crate) fn th(&self) -> Arc<dyn TypeHierarchy> {
        Arc::clone(&self.ctx.type_hierarchy)
    }

    pub(crate) fn item_type(&self, id: ExprId) -> ItemType {
        self.arena.item_type(id, self.ctx.type_hierarchy())
    }

    pub(crate) fn static_type(&self, id: ExprId) -> SequenceType {
        SequenceType::new(self.item_type(id), self.arena.cardinality(id))
    }

    /// Allocates a node at the source location of `like`.
    pub(crate) fn alloc_like(&mut self, kind: ExprKind, like: ExprId) -> ExprId {
        let loc = self.arena.location(like);
        self.arena.alloc_at(kind, loc)
    }

    pub(crate) fn empty_like(&mut self, like: ExprId) -> ExprId {
        self.alloc_like(ExprKind::Literal(Vec::new()), like)
    }

    pub(crate) fn replace_child(&mut self, parent: ExprId, old: ExprId, new: ExprId) -> CResult<()> {
        if old != new && self.arena.location(new).is_unknown() {
            let loc = self.arena.location(old);
            self.arena.set_location(new, loc);
        }
        self.arena.set_child(parent, old, new)
    }

    pub(crate) fn warn(&mut self, id: ExprId, message: impl Into<String>) {
        let w = Warning { message: message.into(), location: self.arena.location(id) };
        warn!(node = %id, "{}", w.message);
        self.warnings.push(w);
    }

    /// Logs an optimizer decision about `id`.
    pub(crate) fn trace(&self, id: ExprId, message: &str) {
        if self.ctx.trace_optimizer {
            debug!(
                node = %id,
                kind = self.arena.kind(id).display_name(),
                expr = %explain::explain(&*self.arena, id),
                "{message}"
            );
        }
    }

    /// Builds a call to `sig`, type-checking the arguments against its parameters.
    pub(crate) fn call(&mut self, sig: Arc<FunctionSignature>, args: Vec<ExprId>, like: ExprId) -> CResult<ExprId> {
        let mut checked = Vec::with_capacity(args.len());
        for (i, (arg, param)) in args.into_iter().zip(sig.params.iter()).enumerate() {
            let role = RoleLocator::argument(sig.name.clone(), i);
            checked.push(static_type_check(self, arg, *param, &role)?);
        }
        let call = ExprKind::FunctionCall { name: sig.name.clone(), args: checked, signature: Some(sig) };
        Ok(self.alloc_like(call, like))
    }

    /// Calls `fn:{local}` if the resolver knows it.
    pub(crate) fn try_call(&mut self, local: &str, args: Vec<ExprId>, like: ExprId) -> CResult<Option<ExprId>> {
        self.try_call_named(&ExpandedName::fn_name(local), args, like)
    }

    pub(crate) fn try_call_named(
        &mut self,
        name: &ExpandedName,
        args: Vec<ExprId>,
        like: ExprId,
    ) -> CResult<Option<ExprId>> {
        match self.ctx.functions.resolve(name, args.len()) {
            Ok(sig) => self.call(sig, args, like).map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Replaces a constant subtree by its value. Failures are left for run time.
    pub(crate) fn try_fold(&mut self, id: ExprId) -> ExprId {
        if self.arena.is_literal(id) {
            return id;
        }
        let props = self.arena.properties(id);
        if !props.dependencies.is_empty() || !props.special.contains(SpecialProperties::NON_CREATIVE) {
            return id;
        }
        if props.cardinality.allows_many() && !matches!(self.arena.kind(id), ExprKind::Filter { .. }) {
            return id;
        }
        let opaque = self.arena.descendants_or_self(id).into_iter().any(|d| {
            matches!(self.arena.kind(d), ExprKind::FunctionCall { signature, .. }
                if !signature.as_ref().is_some_and(|s| s.foldable))
        });
        if opaque {
            return id;
        }
        match evaluate_constant(&*self.arena, id, self.ctx) {
            Ok(values) => {
                let lit = self.alloc_like(ExprKind::Literal(values), id);
                self.trace(lit, "Expression evaluated at compile time");
                lit
            }
            Err(e) => {
                trace!(node = %id, error = %e, "early evaluation failed; deferred to run time");
                id
            }
        }
    }

    fn visit_children(&mut self, id: ExprId, mut f: impl FnMut(&mut Self, ExprId) -> CResult<ExprId>) -> CResult<()> {
        for child in self.arena.kind(id).children() {
            let new = f(self, child)?;
            self.replace_child(id, child, new)?;
        }
        Ok(())
    }

    // ---- simplify ----

    pub(crate) fn simplify(&mut self, id: ExprId) -> CResult<ExprId> {
        self.visit_children(id, Self::simplify)?;
        let kind = self.arena.kind(id).clone();
        match kind {
            ExprKind::Sequence(items) => self.simplify_sequence(id, &items),
            ExprKind::Filter { base, .. } if self.arena.is_empty_literal(base) => Ok(base),
            ExprKind::Range { start, end } if self.arena.is_empty_literal(start) || self.arena.is_empty_literal(end) => {
                Ok(self.empty_like(id))
            }
            ExprKind::Arithmetic { op, lhs, rhs, .. } if self.ctx.backwards_compatible => {
                self.arena.replace_kind(id, ExprKind::LegacyArithmetic { op, lhs, rhs })?;
                Ok(id)
            }
            ExprKind::FunctionCall { name, args, .. } if args.len() == 1 && name.ns_uri.as_deref() == Some(FNS) => {
                let (required, code) = match name.local.as_str() {
                    "zero-or-one" => (Cardinality::ZERO_OR_ONE, ErrorCode::FORG0003),
                    "one-or-more" => (Cardinality::ONE_OR_MORE, ErrorCode::FORG0004),
                    "exactly-one" => (Cardinality::EXACTLY_ONE, ErrorCode::FORG0005),
                    _ => return Ok(id),
                };
                let role = RoleLocator::argument(name, 0).with_code(code);
                Ok(self.alloc_like(ExprKind::CardinalityCheck { operand: args[0], required, role }, id))
            }
            _ => Ok(id),
        }
    }

    /// Flattens nested sequences, drops empty members and merges adjacent literals.
    fn simplify_sequence(&mut self, id: ExprId, items: &[ExprId]) -> CResult<ExprId> {
        let mut flat = Vec::with_capacity(items.len());
        let mut stack: Vec<ExprId> = items.iter().rev().copied().collect();
        while let Some(item) = stack.pop() {
            match self.arena.kind(item) {
                ExprKind::Sequence(inner) => stack.extend(inner.iter().rev().copied()),
                ExprKind::Literal(v) if v.is_empty() => {}
                _ => flat.push(item),
            }
        }
        let mut merged: Vec<ExprId> = Vec::with_capacity(flat.len());
        for item in flat {
            if let Some(prev) = merged.last().copied()
                && let (Some(a), Some(b)) = (self.arena.literal(prev), self.arena.literal(item))
            {
                let values = a.iter().chain(b).cloned().collect();
                let lit = self.alloc_like(ExprKind::Literal(values), prev);
                if let Some(last) = merged.last_mut() {
                    *last = lit;
                }
                continue;
            }
            merged.push(item);
        }
        match merged.as_slice() {
            [] => Ok(self.empty_like(id)),
            [only] => Ok(*only),
            _ if merged.as_slice() == items => Ok(id),
            _ => Ok(self.alloc_like(ExprKind::Sequence(merged), id)),
        }
    }

    // ---- typeCheck ----

    pub(crate) fn type_check(&mut self, id: ExprId, context_item: Option<ItemType>) -> CResult<ExprId> {
        let kind = self.arena.kind(id).clone();
        match kind {
            ExprKind::Literal(_) => Ok(id),
            ExprKind::ContextItem { item_type } => {
                let Some(t) = context_item else {
                    return Err(absent_focus("the context item"));
                };
                if t != item_type {
                    self.arena.replace_kind(id, ExprKind::ContextItem { item_type: t })?;
                }
                Ok(id)
            }
            ExprKind::Position | ExprKind::Last => {
                if context_item.is_none() {
                    return Err(absent_focus(if matches!(kind, ExprKind::Position) { "position()" } else { "last()" }));
                }
                Ok(id)
            }
            ExprKind::VarRef { name, binding } => {
                let resolved = self.resolve_variable(&name)?;
                if resolved != binding {
                    self.arena.replace_kind(id, ExprKind::VarRef { name, binding: resolved })?;
                }
                Ok(id)
            }
            ExprKind::Filter { base, predicate, .. } => {
                let new_base = self.type_check(base, context_item)?;
                self.replace_child(id, base, new_base)?;
                let inner = Some(self.item_type(new_base));
                let new_pred = self.type_check(predicate, inner)?;
                self.replace_child(id, predicate, new_pred)?;
                filter::reclassify(self, id)?;
                Ok(id)
            }
            ExprKind::Let { name, slot, declared, binding, action } => {
                let new_binding = self.type_check(binding, context_item)?;
                self.replace_child(id, binding, new_binding)?;
                let mut binding = new_binding;
                if let Some(t) = declared {
                    let checked = strict_type_check(self, binding, t, &RoleLocator::variable(name.clone()))?;
                    self.replace_child(id, binding, checked)?;
                    binding = checked;
                }
                let slot = match slot {
                    Some(s) => s,
                    None => {
                        let s = self.arena.allocate_slot();
                        self.arena.replace_kind(
                            id,
                            ExprKind::Let { name: name.clone(), slot: Some(s), declared, binding, action },
                        )?;
                        s
                    }
                };
                let static_type = declared.unwrap_or_else(|| self.static_type(binding));
                self.scopes.push(Scope { name, slot, static_type });
                let new_action = self.type_check(action, context_item);
                self.scopes.pop();
                let new_action = new_action?;
                self.replace_child(id, action, new_action)?;
                Ok(id)
            }
            _ => {
                self.visit_children(id, |v, c| v.type_check(c, context_item))?;
                self.type_check_node(id)
            }
        }
    }

    fn resolve_variable(&self, name: &ExpandedName) -> CResult<VarBinding> {
        if let Some(scope) = self.scopes.iter().rev().find(|s| s.name == *name) {
            return Ok(VarBinding::Local { slot: scope.slot, static_type: scope.static_type });
        }
        if let Some((slot, declared)) = self.ctx.variable(name) {
            return Ok(VarBinding::External { slot, declared });
        }
        Err(Error::static_error(ErrorCode::XPST0008, format!("variable ${name} is not declared")))
    }

    /// Kind-specific part of type checking; children are already checked.
    fn type_check_node(&mut self, id: ExprId) -> CResult<ExprId> {
        let kind = self.arena.kind(id).clone();
        match kind {
            ExprKind::Range { start, end } => {
                for (i, operand) in [start, end].into_iter().enumerate() {
                    let role = RoleLocator::operand("to", i);
                    let checked = static_type_check(self, operand, SequenceType::optional(AtomicType::Integer), &role)?;
                    self.replace_child(id, operand, checked)?;
                }
                Ok(id)
            }
            ExprKind::Arithmetic { op, lhs, rhs, .. } => arithmetic::type_check(self, id, op, lhs, rhs),
            ExprKind::LegacyArithmetic { lhs, rhs, .. } => arithmetic::type_check_legacy(self, id, lhs, rhs),
            ExprKind::Unary { op, operand } => {
                let checked = self.check_numeric_operand(id, operand, if op == UnaryOp::Plus { "+" } else { "-" })?;
                let out = match op {
                    UnaryOp::Plus => checked,
                    UnaryOp::Minus => self.alloc_like(ExprKind::Negate(checked), id),
                };
                Ok(self.try_fold(out))
            }
            ExprKind::Negate(operand) => {
                self.check_numeric_operand(id, operand, "-")?;
                Ok(self.try_fold(id))
            }
            ExprKind::Boolean { .. } => Ok(self.try_fold(id)),
            ExprKind::GeneralComparison { op, lhs, rhs, .. } => comparison::type_check_general(self, id, op, lhs, rhs),
            ExprKind::ValueComparison { op, lhs, rhs, result_when_empty, convert_untyped, .. } => {
                comparison::type_check_value(self, id, op, lhs, rhs, result_when_empty, convert_untyped)
            }
            ExprKind::IdentityComparison { op, lhs, rhs } => {
                for (i, operand) in [lhs, rhs].into_iter().enumerate() {
                    let role = RoleLocator::operand(op.symbol(), i);
                    let required = SequenceType::new(ItemType::AnyNode, Cardinality::ZERO_OR_ONE);
                    let checked = static_type_check(self, operand, required, &role)?;
                    self.replace_child(id, operand, checked)?;
                }
                Ok(id)
            }
            ExprKind::FunctionCall { name, args, .. } => {
                let sig =
                    self.ctx.functions.resolve(&name, args.len()).map_err(|e| e.into_error(args.len()))?;
                let mut checked = Vec::with_capacity(args.len());
                for (i, (arg, param)) in args.iter().zip(sig.params.iter()).enumerate() {
                    let role = RoleLocator::argument(name.clone(), i);
                    checked.push(static_type_check(self, *arg, *param, &role)?);
                }
                self.arena.replace_kind(id, ExprKind::FunctionCall { name, args: checked, signature: Some(sig) })?;
                Ok(self.try_fold(id))
            }
            ExprKind::CardinalityCheck { operand, required, .. } => {
                if required.subsumes(self.arena.cardinality(operand)) { Ok(operand) } else { Ok(id) }
            }
            ExprKind::ItemCheck { operand, required, .. } => {
                let t = self.item_type(operand);
                if self.ctx.type_hierarchy().is_subtype(&t, &required) { Ok(operand) } else { Ok(id) }
            }
            _ => Ok(id),
        }
    }

    fn check_numeric_operand(&mut self, parent: ExprId, operand: ExprId, symbol: &str) -> CResult<ExprId> {
        let role = RoleLocator::operand(symbol, 0);
        let checked = static_type_check(self, operand, SequenceType::optional(AtomicType::Numeric), &role)?;
        self.replace_child(parent, operand, checked)?;
        Ok(checked)
    }

    // ---- optimize ----

    pub(crate) fn optimize(&mut self, id: ExprId) -> CResult<ExprId> {
        self.visit_children(id, Self::optimize)?;
        let kind = self.arena.kind(id).clone();
        match kind {
            ExprKind::Filter { .. } => filter::optimize(self, id),
            ExprKind::GeneralComparison { .. } => comparison::optimize_general(self, id),
            ExprKind::ValueComparison { .. } => comparison::optimize_value(self, id),
            ExprKind::FunctionCall { name, args, .. } if name.is_fn("not") => {
                if let [inner] = args.as_slice()
                    && let ExprKind::FunctionCall { name: inner_name, args: inner_args, .. } = self.arena.kind(*inner)
                    && inner_name.is_fn("not")
                    && let [x] = inner_args.as_slice()
                {
                    let x = *x;
                    if let Some(call) = self.try_call("boolean", vec![x], id)? {
                        self.trace(call, "Double negation replaced by fn:boolean");
                        return Ok(self.try_fold(call));
                    }
                }
                Ok(self.try_fold(id))
            }
            ExprKind::Boolean { .. }
            | ExprKind::Arithmetic { .. }
            | ExprKind::LegacyArithmetic { .. }
            | ExprKind::Negate(_)
            | ExprKind::IntegerRangeTest { .. }
            | ExprKind::FunctionCall { .. } => Ok(self.try_fold(id)),
            _ => Ok(id),
        }
    }
}

fn absent_focus(what: &str) -> Error {
    Error::static_error(ErrorCode::XPDY0002, format!("{what} is absent: no context item is supplied"))
}
