//! Registry of arithmetic calculators keyed by operator and primitive operand types.
//!
//! Resolved once at compile time when both operand types are known; otherwise the
//! expression carries [`CalculatorSlot::Deferred`] and resolves from the runtime
//! values on every call.

use core::fmt;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::compiler::ir::ArithOp;
use crate::engine::error::Error;
use crate::engine::evaluator::numeric;
use crate::types::AtomicType;
use crate::xdm::XdmAtomicValue;

pub type CalcFn = fn(&XdmAtomicValue, &XdmAtomicValue) -> Result<XdmAtomicValue, Error>;

#[derive(Clone, Copy)]
pub struct Calculator {
    pub op: ArithOp,
    pub left: AtomicType,
    pub right: AtomicType,
    pub result: AtomicType,
    func: CalcFn,
}

impl Calculator {
    pub fn compute(&self, a: &XdmAtomicValue, b: &XdmAtomicValue) -> Result<XdmAtomicValue, Error> {
        (self.func)(a, b)
    }
}

impl fmt::Debug for Calculator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Calculator({} {} {} -> {})", self.left, self.op.symbol(), self.right, self.result)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum CalculatorSlot {
    Resolved(Calculator),
    /// Operand types unknown at compile time.
    Deferred,
}

fn plus(a: &XdmAtomicValue, b: &XdmAtomicValue) -> Result<XdmAtomicValue, Error> {
    numeric::arithmetic(ArithOp::Plus, a, b)
}
fn minus(a: &XdmAtomicValue, b: &XdmAtomicValue) -> Result<XdmAtomicValue, Error> {
    numeric::arithmetic(ArithOp::Minus, a, b)
}
fn times(a: &XdmAtomicValue, b: &XdmAtomicValue) -> Result<XdmAtomicValue, Error> {
    numeric::arithmetic(ArithOp::Times, a, b)
}
fn div(a: &XdmAtomicValue, b: &XdmAtomicValue) -> Result<XdmAtomicValue, Error> {
    numeric::arithmetic(ArithOp::Div, a, b)
}
fn idiv(a: &XdmAtomicValue, b: &XdmAtomicValue) -> Result<XdmAtomicValue, Error> {
    numeric::arithmetic(ArithOp::IDiv, a, b)
}
fn modulo(a: &XdmAtomicValue, b: &XdmAtomicValue) -> Result<XdmAtomicValue, Error> {
    numeric::arithmetic(ArithOp::Mod, a, b)
}

const NUMERIC_PRIMITIVES: [AtomicType; 4] =
    [AtomicType::Integer, AtomicType::Decimal, AtomicType::Float, AtomicType::Double];

const OPS: [ArithOp; 6] = [ArithOp::Plus, ArithOp::Minus, ArithOp::Times, ArithOp::Div, ArithOp::IDiv, ArithOp::Mod];

fn rank(t: AtomicType) -> u8 {
    match t {
        AtomicType::Integer => 0,
        AtomicType::Decimal => 1,
        AtomicType::Float => 2,
        _ => 3,
    }
}

fn result_type(op: ArithOp, left: AtomicType, right: AtomicType) -> AtomicType {
    let promoted = if rank(left) >= rank(right) { left } else { right };
    match op {
        ArithOp::IDiv => AtomicType::Integer,
        ArithOp::Div if promoted == AtomicType::Integer => AtomicType::Decimal,
        _ => promoted,
    }
}

pub struct CalculatorRegistry {
    table: HashMap<(ArithOp, AtomicType, AtomicType), Calculator>,
}

static REGISTRY: OnceLock<CalculatorRegistry> = OnceLock::new();

impl CalculatorRegistry {
    fn build() -> Self {
        let mut table = HashMap::new();
        for op in OPS {
            let func: CalcFn = match op {
                ArithOp::Plus => plus,
                ArithOp::Minus => minus,
                ArithOp::Times => times,
                ArithOp::Div => div,
                ArithOp::IDiv => idiv,
                ArithOp::Mod => modulo,
            };
            for left in NUMERIC_PRIMITIVES {
                for right in NUMERIC_PRIMITIVES {
                    let result = result_type(op, left, right);
                    table.insert((op, left, right), Calculator { op, left, right, result, func });
                }
            }
        }
        Self { table }
    }

    pub fn global() -> &'static CalculatorRegistry {
        REGISTRY.get_or_init(Self::build)
    }

    pub fn lookup(&self, op: ArithOp, left: AtomicType, right: AtomicType) -> Option<Calculator> {
        self.table.get(&(op, left, right)).copied()
    }

    /// Resolves from the dynamic types of the operand values.
    pub fn resolve_dynamic(&self, op: ArithOp, a: &XdmAtomicValue, b: &XdmAtomicValue) -> Result<Calculator, Error> {
        self.lookup(op, a.type_of(), b.type_of()).ok_or_else(|| {
            Error::type_error(format!(
                "arithmetic operator '{}' is not defined for {} and {}",
                op.symbol(),
                a.type_of(),
                b.type_of()
            ))
        })
    }
}
