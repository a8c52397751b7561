//! Casting of untyped values, atomization and effective boolean value.

use core::str::FromStr;

use rust_decimal::Decimal;

use crate::engine::error::{Error, ErrorCode};
use crate::model::XdmNode;
use crate::types::{AtomicType, ItemType, TypeHierarchy};
use crate::xdm::{SequenceCursor, XdmAtomicValue, XdmItem};

fn invalid_cast(s: &str, target: AtomicType) -> Error {
    Error::from_code(ErrorCode::FORG0001, format!("cannot convert \"{s}\" to {target}"))
}

fn is_numeral(s: &str, allow_exponent: bool) -> bool {
    let body = s.strip_prefix(['+', '-']).unwrap_or(s);
    let (mantissa, exponent) = match body.find(['e', 'E']) {
        Some(i) if allow_exponent => (&body[..i], Some(&body[i + 1..])),
        Some(_) => return false,
        None => (body, None),
    };
    let mut digits = 0usize;
    let mut dots = 0usize;
    for c in mantissa.chars() {
        match c {
            '0'..='9' => digits += 1,
            '.' => dots += 1,
            _ => return false,
        }
    }
    if digits == 0 || dots > 1 {
        return false;
    }
    match exponent {
        None => true,
        Some(e) => {
            let e = e.strip_prefix(['+', '-']).unwrap_or(e);
            !e.is_empty() && e.chars().all(|c| c.is_ascii_digit())
        }
    }
}

fn parse_double(s: &str) -> Option<f64> {
    match s {
        "INF" | "+INF" => Some(f64::INFINITY),
        "-INF" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        _ if is_numeral(s, true) => s.parse::<f64>().ok(),
        _ => None,
    }
}

/// Casts the lexical form of an `xs:untypedAtomic` value to `target`.
pub(crate) fn cast_untyped(s: &str, target: AtomicType) -> Result<XdmAtomicValue, Error> {
    let trimmed = s.trim_matches(|c: char| matches!(c, ' ' | '\t' | '\n' | '\r'));
    match target {
        AtomicType::Double | AtomicType::Numeric => {
            parse_double(trimmed).map(XdmAtomicValue::Double).ok_or_else(|| invalid_cast(s, target))
        }
        #[allow(clippy::cast_possible_truncation)]
        AtomicType::Float => {
            parse_double(trimmed).map(|d| XdmAtomicValue::Float(d as f32)).ok_or_else(|| invalid_cast(s, target))
        }
        AtomicType::Decimal => {
            if !is_numeral(trimmed, false) {
                return Err(invalid_cast(s, target));
            }
            Decimal::from_str(trimmed.strip_prefix('+').unwrap_or(trimmed))
                .map(XdmAtomicValue::Decimal)
                .map_err(|_| invalid_cast(s, target))
        }
        AtomicType::Integer => {
            let body = trimmed.strip_prefix(['+', '-']).unwrap_or(trimmed);
            if body.is_empty() || !body.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid_cast(s, target));
            }
            trimmed
                .strip_prefix('+')
                .unwrap_or(trimmed)
                .parse::<i64>()
                .map(XdmAtomicValue::Integer)
                .map_err(|_| Error::from_code(ErrorCode::FOAR0002, format!("integer value out of range: {s}")))
        }
        AtomicType::Boolean => match trimmed {
            "true" | "1" => Ok(XdmAtomicValue::Boolean(true)),
            "false" | "0" => Ok(XdmAtomicValue::Boolean(false)),
            _ => Err(invalid_cast(s, target)),
        },
        AtomicType::String => Ok(XdmAtomicValue::String(s.to_string())),
        AtomicType::AnyUri => Ok(XdmAtomicValue::AnyUri(trimmed.to_string())),
        AtomicType::UntypedAtomic | AtomicType::AnyAtomic => Ok(XdmAtomicValue::UntypedAtomic(s.to_string())),
        AtomicType::QName => Err(invalid_cast(s, target)),
    }
}

/// Converts `v` if it is untyped; other values are returned unchanged.
pub(crate) fn convert_if_untyped(v: XdmAtomicValue, target: AtomicType) -> Result<XdmAtomicValue, Error> {
    match v {
        XdmAtomicValue::UntypedAtomic(s) => cast_untyped(&s, target),
        other => Ok(other),
    }
}

/// `fn:number` semantics: anything that does not convert cleanly is NaN.
pub(crate) fn to_number(v: &XdmAtomicValue) -> f64 {
    match v {
        XdmAtomicValue::Boolean(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        XdmAtomicValue::String(s) | XdmAtomicValue::UntypedAtomic(s) | XdmAtomicValue::AnyUri(s) => {
            parse_double(s.trim()).unwrap_or(f64::NAN)
        }
        XdmAtomicValue::QName { .. } => f64::NAN,
        numeric => super::numeric::classify(numeric).map_or(f64::NAN, |n| n.to_f64()),
    }
}

pub(crate) fn atomize_item<N: XdmNode>(item: XdmItem<N>) -> Vec<XdmAtomicValue> {
    match item {
        XdmItem::Atomic(a) => vec![a],
        XdmItem::Node(n) => n.typed_value(),
    }
}

/// Atomizes an item that must yield at most one value.
pub(crate) fn atomize_one<N: XdmNode>(item: XdmItem<N>) -> Result<Option<XdmAtomicValue>, Error> {
    match item {
        XdmItem::Atomic(a) => Ok(Some(a)),
        XdmItem::Node(n) => {
            let mut values = n.typed_value();
            if values.len() > 1 {
                return Err(Error::type_error(format!(
                    "atomizing a {} node yields {} values where one was expected",
                    n.kind().test_name(),
                    values.len()
                )));
            }
            Ok(values.pop())
        }
    }
}

pub(crate) fn dynamic_item_type<N: XdmNode>(item: &XdmItem<N>) -> ItemType {
    match item {
        XdmItem::Atomic(a) => ItemType::Atomic(a.type_of()),
        XdmItem::Node(n) => ItemType::Node(n.kind()),
    }
}

/// Instance-of test for a single item. `xs:anyURI` is accepted where `xs:string` is required.
pub(crate) fn item_matches<N: XdmNode>(item: &XdmItem<N>, required: &ItemType, th: &dyn TypeHierarchy) -> bool {
    let actual = dynamic_item_type(item);
    th.is_subtype(&actual, required)
        || (actual == ItemType::Atomic(AtomicType::AnyUri) && *required == ItemType::STRING)
}

pub(crate) fn ebv_atomic(v: &XdmAtomicValue) -> Result<bool, Error> {
    match v {
        XdmAtomicValue::Boolean(b) => Ok(*b),
        XdmAtomicValue::String(s) | XdmAtomicValue::AnyUri(s) | XdmAtomicValue::UntypedAtomic(s) => Ok(!s.is_empty()),
        XdmAtomicValue::Integer(i) => Ok(*i != 0),
        XdmAtomicValue::Decimal(d) => Ok(!d.is_zero()),
        XdmAtomicValue::Double(d) => Ok(*d != 0.0 && !d.is_nan()),
        XdmAtomicValue::Float(f) => Ok(*f != 0.0 && !f.is_nan()),
        XdmAtomicValue::QName { .. } => {
            Err(Error::from_code(ErrorCode::FORG0006, "effective boolean value is not defined for xs:QName"))
        }
    }
}

pub(crate) fn ebv_too_long() -> Error {
    Error::from_code(
        ErrorCode::FORG0006,
        "effective boolean value is not defined for a sequence of two or more items starting with an atomic value",
    )
}

/// Effective boolean value of a materialized sequence.
pub fn effective_boolean_value<N>(seq: &[XdmItem<N>]) -> Result<bool, Error> {
    match seq {
        [] => Ok(false),
        [XdmItem::Node(_), ..] => Ok(true),
        [XdmItem::Atomic(a)] => ebv_atomic(a),
        _ => Err(ebv_too_long()),
    }
}

/// Effective boolean value, pulling at most two items.
pub(crate) fn ebv_cursor<N>(cursor: &mut dyn SequenceCursor<N>) -> Result<bool, Error> {
    let first = match cursor.next_item() {
        None => return Ok(false),
        Some(item) => item?,
    };
    match first {
        XdmItem::Node(_) => {
            cursor.close();
            Ok(true)
        }
        XdmItem::Atomic(a) => {
            if cursor.next_item().transpose()?.is_some() {
                return Err(ebv_too_long());
            }
            ebv_atomic(&a)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NoNode;
    use rstest::rstest;

    #[rstest]
    #[case(" 3 ", AtomicType::Double, XdmAtomicValue::Double(3.0))]
    #[case("-INF", AtomicType::Double, XdmAtomicValue::Double(f64::NEG_INFINITY))]
    #[case("1.5e2", AtomicType::Double, XdmAtomicValue::Double(150.0))]
    #[case("+42", AtomicType::Integer, XdmAtomicValue::Integer(42))]
    #[case("2.50", AtomicType::Decimal, XdmAtomicValue::Decimal(Decimal::new(250, 2)))]
    #[case("1", AtomicType::Boolean, XdmAtomicValue::Boolean(true))]
    fn untyped_casts(#[case] input: &str, #[case] target: AtomicType, #[case] expected: XdmAtomicValue) {
        assert_eq!(cast_untyped(input, target).unwrap(), expected);
    }

    #[rstest]
    #[case("abc", AtomicType::Double)]
    #[case("inf", AtomicType::Double)]
    #[case("1e3", AtomicType::Decimal)]
    #[case("1.0", AtomicType::Integer)]
    #[case("yes", AtomicType::Boolean)]
    fn bad_casts_are_forg0001(#[case] input: &str, #[case] target: AtomicType) {
        assert_eq!(cast_untyped(input, target).unwrap_err().code_enum(), ErrorCode::FORG0001);
    }

    #[test]
    fn ebv_rules() {
        let seq: Vec<XdmItem<NoNode>> = vec![XdmItem::Atomic(XdmAtomicValue::Double(f64::NAN))];
        assert!(!effective_boolean_value(&seq).unwrap());
        let two: Vec<XdmItem<NoNode>> =
            vec![XdmAtomicValue::Integer(1).into(), XdmAtomicValue::Integer(2).into()];
        assert_eq!(effective_boolean_value(&two).unwrap_err().code_enum(), ErrorCode::FORG0006);
    }

    #[test]
    fn number_never_fails() {
        assert!(to_number(&XdmAtomicValue::String("x".into())).is_nan());
        assert_eq!(to_number(&XdmAtomicValue::Boolean(true)), 1.0);
        assert_eq!(to_number(&XdmAtomicValue::UntypedAtomic(" 12 ".into())), 12.0);
    }
}
