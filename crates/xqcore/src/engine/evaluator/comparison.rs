//! Comparison of two atomic values under an operator and a collation.

use core::cmp::Ordering;

use crate::compiler::ir::ComparisonOp;
use crate::engine::collation::Collation;
use crate::engine::error::Error;
use crate::engine::evaluator::convert::cast_untyped;
use crate::engine::evaluator::numeric::{classify, unify_numeric, NumKind};
use crate::types::AtomicType;
use crate::xdm::XdmAtomicValue;

fn incomparable(a: &XdmAtomicValue, b: &XdmAtomicValue) -> Error {
    Error::type_error(format!("cannot compare {} with {}", a.type_of(), b.type_of()))
}

fn is_stringlike(v: &XdmAtomicValue) -> bool {
    matches!(v, XdmAtomicValue::String(_) | XdmAtomicValue::AnyUri(_) | XdmAtomicValue::UntypedAtomic(_))
}

fn string_of(v: &XdmAtomicValue) -> &str {
    match v {
        XdmAtomicValue::String(s) | XdmAtomicValue::AnyUri(s) | XdmAtomicValue::UntypedAtomic(s) => s,
        _ => "",
    }
}

/// Applies the untyped conversion rules of general comparisons:
/// untyped against numeric compares as `xs:double`, untyped against untyped or string
/// compares as string, untyped against any other type is cast to that type.
fn convert_pair(
    a: &XdmAtomicValue,
    b: &XdmAtomicValue,
) -> Result<(Option<XdmAtomicValue>, Option<XdmAtomicValue>), Error> {
    let target_for = |other: &XdmAtomicValue| match other.type_of() {
        t if t.is_numeric() => AtomicType::Double,
        AtomicType::UntypedAtomic | AtomicType::String | AtomicType::AnyUri => AtomicType::String,
        t => t,
    };
    let ca = match a {
        XdmAtomicValue::UntypedAtomic(s) if !matches!(b, XdmAtomicValue::UntypedAtomic(_)) => {
            Some(cast_untyped(s, target_for(b))?)
        }
        _ => None,
    };
    let cb = match b {
        XdmAtomicValue::UntypedAtomic(s) if !matches!(a, XdmAtomicValue::UntypedAtomic(_)) => {
            Some(cast_untyped(s, target_for(a))?)
        }
        _ => None,
    };
    Ok((ca, cb))
}

fn numeric_ordering(x: NumKind, y: NumKind) -> Option<Ordering> {
    match unify_numeric(x, y) {
        (NumKind::Int(a), NumKind::Int(b)) => Some(a.cmp(&b)),
        (NumKind::Dec(a), NumKind::Dec(b)) => Some(a.cmp(&b)),
        (NumKind::Float(a), NumKind::Float(b)) => a.partial_cmp(&b),
        (a, b) => a.to_f64().partial_cmp(&b.to_f64()),
    }
}

/// Ordering of two values of comparable types. `Ok(None)` means unordered (NaN).
pub(crate) fn value_ordering(
    a: &XdmAtomicValue,
    b: &XdmAtomicValue,
    collation: &dyn Collation,
) -> Result<Option<Ordering>, Error> {
    if let (Some(x), Some(y)) = (classify(a), classify(b)) {
        return Ok(numeric_ordering(x, y));
    }
    if is_stringlike(a) && is_stringlike(b) {
        return Ok(Some(collation.compare(string_of(a), string_of(b))));
    }
    match (a, b) {
        (XdmAtomicValue::Boolean(x), XdmAtomicValue::Boolean(y)) => Ok(Some(x.cmp(y))),
        _ => Err(incomparable(a, b)),
    }
}

/// Compares two atomic values.
///
/// With `convert_untyped` the general-comparison rules apply to untyped operands; without
/// it untyped values compare as strings. NaN makes every operator false except `ne`.
pub(crate) fn compare_atomic(
    a: &XdmAtomicValue,
    op: ComparisonOp,
    b: &XdmAtomicValue,
    collation: &dyn Collation,
    convert_untyped: bool,
) -> Result<bool, Error> {
    if convert_untyped {
        let (ca, cb) = convert_pair(a, b)?;
        if ca.is_some() || cb.is_some() {
            return compare_atomic(ca.as_ref().unwrap_or(a), op, cb.as_ref().unwrap_or(b), collation, false);
        }
    }
    if let (
        XdmAtomicValue::QName { ns_uri: na, local: la, .. },
        XdmAtomicValue::QName { ns_uri: nb, local: lb, .. },
    ) = (a, b)
    {
        let equal = na == nb && la == lb;
        return match op {
            ComparisonOp::Eq => Ok(equal),
            ComparisonOp::Ne => Ok(!equal),
            _ => Err(Error::type_error(format!("operator '{}' is not defined for xs:QName", op.value_symbol()))),
        };
    }
    Ok(match value_ordering(a, b, collation)? {
        None => op == ComparisonOp::Ne,
        Some(ord) => op.test(ord),
    })
}

/// Static counterpart of [`value_ordering`]: can values of these primitive types ever be
/// compared? Unknown types answer `true`.
pub(crate) fn comparable_types(a: AtomicType, b: AtomicType) -> bool {
    use AtomicType::*;
    let stringlike = |t: AtomicType| matches!(t, String | AnyUri | UntypedAtomic);
    match (a, b) {
        (AnyAtomic, _) | (_, AnyAtomic) | (UntypedAtomic, _) | (_, UntypedAtomic) => true,
        (x, y) if x.is_numeric() && y.is_numeric() => true,
        (x, y) if stringlike(x) && stringlike(y) => true,
        (x, y) => x == y,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::collation::{AsciiCaseCollation, CodepointCollation};
    use crate::engine::error::ErrorCode;
    use rstest::rstest;

    fn d(v: f64) -> XdmAtomicValue {
        XdmAtomicValue::Double(v)
    }

    #[rstest]
    #[case(ComparisonOp::Eq, false)]
    #[case(ComparisonOp::Ne, true)]
    #[case(ComparisonOp::Lt, false)]
    #[case(ComparisonOp::Le, false)]
    #[case(ComparisonOp::Gt, false)]
    #[case(ComparisonOp::Ge, false)]
    fn nan_is_unordered(#[case] op: ComparisonOp, #[case] expected: bool) {
        let r = compare_atomic(&d(f64::NAN), op, &XdmAtomicValue::Integer(1), &CodepointCollation, false).unwrap();
        assert_eq!(r, expected);
    }

    #[test]
    fn untyped_follows_the_other_operand() {
        let u = XdmAtomicValue::UntypedAtomic("10".into());
        let nine = XdmAtomicValue::Integer(9);
        assert!(compare_atomic(&u, ComparisonOp::Gt, &nine, &CodepointCollation, true).unwrap());
        // as strings "10" < "9"
        let s = XdmAtomicValue::String("9".into());
        assert!(compare_atomic(&u, ComparisonOp::Lt, &s, &CodepointCollation, true).unwrap());
        let err = compare_atomic(&XdmAtomicValue::UntypedAtomic("x".into()), ComparisonOp::Eq, &nine, &CodepointCollation, true)
            .unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::FORG0001);
    }

    #[test]
    fn collation_is_honoured() {
        let a = XdmAtomicValue::String("ABC".into());
        let b = XdmAtomicValue::String("abc".into());
        assert!(!compare_atomic(&a, ComparisonOp::Eq, &b, &CodepointCollation, false).unwrap());
        assert!(compare_atomic(&a, ComparisonOp::Eq, &b, &AsciiCaseCollation, false).unwrap());
    }

    #[test]
    fn qname_is_not_ordered() {
        let q = XdmAtomicValue::QName { ns_uri: None, prefix: None, local: "a".into() };
        assert!(compare_atomic(&q, ComparisonOp::Eq, &q, &CodepointCollation, false).unwrap());
        let err = compare_atomic(&q, ComparisonOp::Lt, &q, &CodepointCollation, false).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPTY0004);
    }

    #[test]
    fn mixed_types_are_type_errors() {
        let err =
            compare_atomic(&XdmAtomicValue::Integer(1), ComparisonOp::Eq, &XdmAtomicValue::String("1".into()), &CodepointCollation, false)
                .unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPTY0004);
        assert!(!comparable_types(AtomicType::Integer, AtomicType::String));
        assert!(comparable_types(AtomicType::AnyUri, AtomicType::String));
    }
}
