//! Deterministic one-line rendering of an expression tree.

use core::fmt;

use itertools::Itertools;

use crate::compiler::ir::{BooleanOp, ConversionMode, ExprArena, ExprId, ExprKind, UnaryOp};

/// Display adapter for the subtree rooted at `root`.
pub struct Explain<'a> {
    arena: &'a ExprArena,
    root: ExprId,
}

impl<'a> Explain<'a> {
    pub fn new(arena: &'a ExprArena, root: ExprId) -> Self {
        Self { arena, root }
    }

    fn child(&self, id: ExprId) -> Explain<'a> {
        Explain { arena: self.arena, root: id }
    }

    fn list(&self, f: &mut fmt::Formatter<'_>, ids: &[ExprId]) -> fmt::Result {
        write!(f, "{}", ids.iter().map(|id| self.child(*id)).format(", "))
    }
}

pub fn explain(arena: &ExprArena, root: ExprId) -> String {
    Explain::new(arena, root).to_string()
}

impl fmt::Display for Explain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ExprKind::*;
        let c = |id: &ExprId| self.child(*id);
        match self.arena.kind(self.root) {
            Literal(values) => match values.as_slice() {
                [] => f.write_str("()"),
                [v] => write!(f, "{v}"),
                many => write!(f, "({})", many.iter().format(", ")),
            },
            ContextItem { .. } => f.write_str("."),
            Position => f.write_str("position()"),
            Last => f.write_str("last()"),
            VarRef { name, .. } => write!(f, "${name}"),
            Sequence(items) => {
                f.write_str("(")?;
                self.list(f, items)?;
                f.write_str(")")
            }
            Range { start, end } => write!(f, "({} to {})", c(start), c(end)),
            Arithmetic { op, lhs, rhs, .. } => write!(f, "({} {} {})", c(lhs), op.symbol(), c(rhs)),
            LegacyArithmetic { op, lhs, rhs } => write!(f, "compat({} {} {})", c(lhs), op.symbol(), c(rhs)),
            Unary { op, operand } => {
                let sign = if *op == UnaryOp::Plus { "+" } else { "-" };
                write!(f, "{sign}({})", c(operand))
            }
            Negate(operand) => write!(f, "-({})", c(operand)),
            Boolean { op, lhs, rhs } => {
                let word = if *op == BooleanOp::And { "and" } else { "or" };
                write!(f, "({} {word} {})", c(lhs), c(rhs))
            }
            GeneralComparison { op, lhs, rhs, .. } => write!(f, "({} {} {})", c(lhs), op.general_symbol(), c(rhs)),
            ValueComparison { op, lhs, rhs, .. } => write!(f, "({} {} {})", c(lhs), op.value_symbol(), c(rhs)),
            IdentityComparison { op, lhs, rhs } => write!(f, "({} {} {})", c(lhs), op.symbol(), c(rhs)),
            IntegerRangeTest { value, min, max } => {
                write!(f, "intRangeTest({}, {}, {})", c(value), c(min), c(max))
            }
            Filter { base, predicate, .. } => write!(f, "{}[{}]", c(base), c(predicate)),
            FirstItem(base) => write!(f, "first({})", c(base)),
            LastItem(base) => write!(f, "last-item({})", c(base)),
            Subscript { base, index } => write!(f, "subscript({}, {})", c(base), c(index)),
            TailFrom { base, start } => write!(f, "tail({}, {})", c(base), c(start)),
            Slice { base, low, high } => write!(f, "slice({}, {}, {})", c(base), c(low), c(high)),
            Atomize(operand) => write!(f, "data({})", c(operand)),
            UntypedConvert { operand, target, mode } => match mode {
                ConversionMode::All => write!(f, "convertUntyped({} as {target})", c(operand)),
                ConversionMode::Selective => write!(f, "convertUntyped?({} as {target})", c(operand)),
            },
            NumericPromote { operand, target, .. } => write!(f, "promote({} as {target})", c(operand)),
            ItemCheck { operand, required, .. } => write!(f, "treat({} as {required})", c(operand)),
            CardinalityCheck { operand, required, .. } => {
                let indicator = match required.occurrence_indicator() {
                    "" => "1",
                    other => other,
                };
                write!(f, "checkCardinality({}, {indicator})", c(operand))
            }
            Let { name, binding, action, .. } => write!(f, "let ${name} := {} return {}", c(binding), c(action)),
            FunctionCall { name, args, .. } => {
                write!(f, "{name}(")?;
                self.list(f, args)?;
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::FilterFlags;
    use crate::types::ItemType;
    use crate::xdm::XdmAtomicValue;

    #[test]
    fn renders_filters_and_literals() {
        let mut a = ExprArena::new();
        let dot = a.alloc(ExprKind::ContextItem { item_type: ItemType::AnyItem });
        let pos = a.alloc(ExprKind::Literal(vec![XdmAtomicValue::Integer(2)]));
        let f = a.alloc(ExprKind::Filter { base: dot, predicate: pos, flags: FilterFlags::default() });
        let seq = a.alloc(ExprKind::Literal(vec![XdmAtomicValue::Integer(1), XdmAtomicValue::String("a".into())]));
        let all = a.alloc(ExprKind::Sequence(vec![f, seq]));
        assert_eq!(explain(&a, all), "(.[2], (1, \"a\"))");
    }
}
