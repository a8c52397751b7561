//! Numeric classification, promotion and the arithmetic kernels behind the calculators.

use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

use crate::compiler::ir::ArithOp;
use crate::engine::error::{Error, ErrorCode};
use crate::types::AtomicType;
use crate::xdm::XdmAtomicValue;

/// Numeric classification carrying the value.
#[derive(Clone, Copy, Debug)]
pub(crate) enum NumKind {
    Int(i64),
    Dec(Decimal),
    Float(f32),
    Double(f64),
}

impl NumKind {
    pub(crate) fn to_f64(self) -> f64 {
        match self {
            NumKind::Int(i) => i as f64,
            NumKind::Dec(d) => d.to_f64().unwrap_or(f64::NAN),
            NumKind::Float(f) => f64::from(f),
            NumKind::Double(d) => d,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn to_f32(self) -> f32 {
        match self {
            NumKind::Int(i) => i as f32,
            NumKind::Dec(d) => d.to_f32().unwrap_or(f32::NAN),
            NumKind::Float(f) => f,
            NumKind::Double(d) => d as f32,
        }
    }
}

pub(crate) fn classify(v: &XdmAtomicValue) -> Option<NumKind> {
    match v {
        XdmAtomicValue::Integer(i) => Some(NumKind::Int(*i)),
        XdmAtomicValue::Decimal(d) => Some(NumKind::Dec(*d)),
        XdmAtomicValue::Float(f) => Some(NumKind::Float(*f)),
        XdmAtomicValue::Double(d) => Some(NumKind::Double(*d)),
        _ => None,
    }
}

/// Promotes two numbers to their common type (integer < decimal < float < double).
pub(crate) fn unify_numeric(a: NumKind, b: NumKind) -> (NumKind, NumKind) {
    use NumKind::*;
    match (a, b) {
        (Double(x), y) => (Double(x), Double(y.to_f64())),
        (y, Double(x)) => (Double(y.to_f64()), Double(x)),
        (Float(x), y) => (Float(x), Float(y.to_f32())),
        (y, Float(x)) => (Float(y.to_f32()), Float(x)),
        (Dec(x), Dec(y)) => (Dec(x), Dec(y)),
        (Dec(x), Int(y)) => (Dec(x), Dec(Decimal::from(y))),
        (Int(x), Dec(y)) => (Dec(Decimal::from(x)), Dec(y)),
        (Int(x), Int(y)) => (Int(x), Int(y)),
    }
}

/// Numeric type promotion (`xs:integer` / `xs:decimal` / `xs:float` to `xs:float` or `xs:double`).
/// Returns `None` when the value cannot be promoted to `target`.
pub(crate) fn promote(v: &XdmAtomicValue, target: AtomicType) -> Option<XdmAtomicValue> {
    let n = classify(v)?;
    match (target, n) {
        (AtomicType::Double, _) => Some(XdmAtomicValue::Double(n.to_f64())),
        (AtomicType::Float, NumKind::Double(_)) => None,
        (AtomicType::Float, _) => Some(XdmAtomicValue::Float(n.to_f32())),
        _ => Some(v.clone()),
    }
}

fn overflow(op: ArithOp) -> Error {
    Error::from_code(ErrorCode::FOAR0002, format!("numeric overflow in '{}'", op.symbol()))
}

fn div_zero() -> Error {
    Error::from_code(ErrorCode::FOAR0001, "division by zero")
}

pub(crate) fn arithmetic(op: ArithOp, a: &XdmAtomicValue, b: &XdmAtomicValue) -> Result<XdmAtomicValue, Error> {
    let (Some(ca), Some(cb)) = (classify(a), classify(b)) else {
        return Err(Error::type_error(format!(
            "arithmetic operator '{}' is not defined for {} and {}",
            op.symbol(),
            a.type_of(),
            b.type_of()
        )));
    };
    match unify_numeric(ca, cb) {
        (NumKind::Int(x), NumKind::Int(y)) => integer_arith(op, x, y),
        (NumKind::Dec(x), NumKind::Dec(y)) => decimal_arith(op, x, y),
        (NumKind::Float(x), NumKind::Float(y)) => {
            if op == ArithOp::IDiv {
                return float_idiv(f64::from(x), f64::from(y));
            }
            let r = double_kernel(op, f64::from(x), f64::from(y));
            #[allow(clippy::cast_possible_truncation)]
            Ok(XdmAtomicValue::Float(r as f32))
        }
        (x, y) => {
            let (x, y) = (x.to_f64(), y.to_f64());
            if op == ArithOp::IDiv {
                return float_idiv(x, y);
            }
            Ok(XdmAtomicValue::Double(double_kernel(op, x, y)))
        }
    }
}

fn integer_arith(op: ArithOp, x: i64, y: i64) -> Result<XdmAtomicValue, Error> {
    let r = match op {
        ArithOp::Plus => x.checked_add(y),
        ArithOp::Minus => x.checked_sub(y),
        ArithOp::Times => x.checked_mul(y),
        ArithOp::Div => {
            if y == 0 {
                return Err(div_zero());
            }
            let q = Decimal::from(x).checked_div(Decimal::from(y)).ok_or_else(|| overflow(op))?;
            return Ok(XdmAtomicValue::Decimal(q.normalize()));
        }
        ArithOp::IDiv => {
            if y == 0 {
                return Err(div_zero());
            }
            x.checked_div(y)
        }
        ArithOp::Mod => {
            if y == 0 {
                return Err(div_zero());
            }
            if y == -1 { Some(0) } else { x.checked_rem(y) }
        }
    };
    r.map(XdmAtomicValue::Integer).ok_or_else(|| overflow(op))
}

fn decimal_arith(op: ArithOp, x: Decimal, y: Decimal) -> Result<XdmAtomicValue, Error> {
    if matches!(op, ArithOp::Div | ArithOp::IDiv | ArithOp::Mod) && y.is_zero() {
        return Err(div_zero());
    }
    let r = match op {
        ArithOp::Plus => x.checked_add(y),
        ArithOp::Minus => x.checked_sub(y),
        ArithOp::Times => x.checked_mul(y),
        ArithOp::Div => x.checked_div(y),
        ArithOp::Mod => x.checked_rem(y),
        ArithOp::IDiv => {
            let q = x.checked_div(y).ok_or_else(|| overflow(op))?.trunc();
            return q.to_i64().map(XdmAtomicValue::Integer).ok_or_else(|| overflow(op));
        }
    };
    r.map(|d| XdmAtomicValue::Decimal(d.normalize())).ok_or_else(|| overflow(op))
}

fn double_kernel(op: ArithOp, x: f64, y: f64) -> f64 {
    match op {
        ArithOp::Plus => x + y,
        ArithOp::Minus => x - y,
        ArithOp::Times => x * y,
        ArithOp::Div => x / y,
        // truncating remainder: sign follows the dividend
        ArithOp::Mod => x % y,
        ArithOp::IDiv => (x / y).trunc(),
    }
}

fn float_idiv(x: f64, y: f64) -> Result<XdmAtomicValue, Error> {
    if y == 0.0 {
        return Err(div_zero());
    }
    if x.is_nan() || y.is_nan() || x.is_infinite() {
        return Err(overflow(ArithOp::IDiv));
    }
    let q = (x / y).trunc();
    Decimal::from_f64(q).and_then(|d| d.to_i64()).map(XdmAtomicValue::Integer).ok_or_else(|| overflow(ArithOp::IDiv))
}

pub(crate) fn negate(v: &XdmAtomicValue) -> Result<XdmAtomicValue, Error> {
    match v {
        XdmAtomicValue::Integer(i) => {
            i.checked_neg().map(XdmAtomicValue::Integer).ok_or_else(|| overflow(ArithOp::Minus))
        }
        XdmAtomicValue::Decimal(d) => Ok(XdmAtomicValue::Decimal(-*d)),
        XdmAtomicValue::Float(f) => Ok(XdmAtomicValue::Float(-*f)),
        XdmAtomicValue::Double(d) => Ok(XdmAtomicValue::Double(-*d)),
        other => Err(Error::type_error(format!("unary minus is not defined for {}", other.type_of()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ArithOp::Div, XdmAtomicValue::Integer(1), XdmAtomicValue::Integer(4), XdmAtomicValue::Decimal(Decimal::new(25, 2)))]
    #[case(ArithOp::IDiv, XdmAtomicValue::Integer(-7), XdmAtomicValue::Integer(2), XdmAtomicValue::Integer(-3))]
    #[case(ArithOp::Mod, XdmAtomicValue::Integer(-7), XdmAtomicValue::Integer(2), XdmAtomicValue::Integer(-1))]
    #[case(ArithOp::Plus, XdmAtomicValue::Integer(1), XdmAtomicValue::Double(0.5), XdmAtomicValue::Double(1.5))]
    #[case(ArithOp::Times, XdmAtomicValue::Float(2.0), XdmAtomicValue::Integer(3), XdmAtomicValue::Float(6.0))]
    fn kernels(#[case] op: ArithOp, #[case] a: XdmAtomicValue, #[case] b: XdmAtomicValue, #[case] expected: XdmAtomicValue) {
        assert_eq!(arithmetic(op, &a, &b).unwrap(), expected);
    }

    #[rstest]
    fn integer_overflow_is_foar0002() {
        let err = arithmetic(ArithOp::Plus, &XdmAtomicValue::Integer(i64::MAX), &XdmAtomicValue::Integer(1))
            .unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::FOAR0002);
    }

    #[rstest]
    fn double_division_by_zero_is_infinite() {
        let r = arithmetic(ArithOp::Div, &XdmAtomicValue::Double(1.0), &XdmAtomicValue::Integer(0)).unwrap();
        assert_eq!(r, XdmAtomicValue::Double(f64::INFINITY));
        let err = arithmetic(ArithOp::IDiv, &XdmAtomicValue::Double(1.0), &XdmAtomicValue::Integer(0)).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::FOAR0001);
    }
}
