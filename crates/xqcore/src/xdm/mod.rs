use core::fmt;
use rust_decimal::Decimal;

use crate::consts::{FNS, XQCORE_FNS, XS};
use crate::types::AtomicType;

pub mod cursor;

pub use cursor::{
    CursorProperties, EmptyCursor, Grounded, SequenceCursor, SingletonCursor, VecCursor, XdmSequenceStream,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExpandedName {
    pub ns_uri: Option<String>,
    pub local: String,
}

impl ExpandedName {
    pub fn new(ns_uri: Option<String>, local: impl Into<String>) -> Self {
        Self { ns_uri, local: local.into() }
    }

    /// Name in the default function namespace.
    pub fn fn_name(local: impl Into<String>) -> Self {
        Self::new(Some(FNS.to_string()), local)
    }

    /// Name without a namespace (variables in tests and host code).
    pub fn local(local: impl Into<String>) -> Self {
        Self::new(None, local)
    }

    pub fn is_fn(&self, local: &str) -> bool {
        self.ns_uri.as_deref() == Some(FNS) && self.local == local
    }
}

impl From<&str> for ExpandedName {
    fn from(s: &str) -> Self {
        ExpandedName::local(s)
    }
}

impl fmt::Display for ExpandedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ns_uri.as_deref() {
            None => f.write_str(&self.local),
            Some(FNS) => write!(f, "fn:{}", self.local),
            Some(XS) => write!(f, "xs:{}", self.local),
            Some(XQCORE_FNS) => write!(f, "xqcore:{}", self.local),
            Some(ns) => write!(f, "Q{{{ns}}}{}", self.local),
        }
    }
}

/// The atomic values this engine manipulates.
///
/// Integers are kept as `i64` with overflow reported as `err:FOAR0002`; decimals use
/// `rust_decimal` so that `xs:integer div xs:integer` stays exact.
#[derive(Debug, Clone, PartialEq)]
pub enum XdmAtomicValue {
    Boolean(bool),
    String(String),
    Integer(i64),
    Decimal(Decimal),
    Double(f64),
    Float(f32),
    AnyUri(String),
    UntypedAtomic(String),
    QName {
        ns_uri: Option<String>,
        prefix: Option<String>,
        local: String,
    },
}

impl XdmAtomicValue {
    pub fn type_of(&self) -> AtomicType {
        match self {
            XdmAtomicValue::Boolean(_) => AtomicType::Boolean,
            XdmAtomicValue::String(_) => AtomicType::String,
            XdmAtomicValue::Integer(_) => AtomicType::Integer,
            XdmAtomicValue::Decimal(_) => AtomicType::Decimal,
            XdmAtomicValue::Double(_) => AtomicType::Double,
            XdmAtomicValue::Float(_) => AtomicType::Float,
            XdmAtomicValue::AnyUri(_) => AtomicType::AnyUri,
            XdmAtomicValue::UntypedAtomic(_) => AtomicType::UntypedAtomic,
            XdmAtomicValue::QName { .. } => AtomicType::QName,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            XdmAtomicValue::Integer(_) | XdmAtomicValue::Decimal(_) | XdmAtomicValue::Double(_) | XdmAtomicValue::Float(_)
        )
    }

    pub fn is_nan(&self) -> bool {
        match self {
            XdmAtomicValue::Double(d) => d.is_nan(),
            XdmAtomicValue::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    /// Canonical lexical form (the result of `fn:string`).
    pub fn string_value(&self) -> String {
        match self {
            XdmAtomicValue::Boolean(b) => b.to_string(),
            XdmAtomicValue::String(s) | XdmAtomicValue::AnyUri(s) | XdmAtomicValue::UntypedAtomic(s) => s.clone(),
            XdmAtomicValue::Integer(i) => i.to_string(),
            XdmAtomicValue::Decimal(d) => d.normalize().to_string(),
            XdmAtomicValue::Double(d) => format_double(*d),
            XdmAtomicValue::Float(f) => format_double(f64::from(*f)),
            XdmAtomicValue::QName { prefix, local, .. } => match prefix {
                Some(p) => format!("{p}:{local}"),
                None => local.clone(),
            },
        }
    }

    /// Numeric value as an integer position, if it denotes a whole number.
    pub fn as_whole_number(&self) -> Option<i64> {
        use rust_decimal::prelude::ToPrimitive;
        match self {
            XdmAtomicValue::Integer(i) => Some(*i),
            XdmAtomicValue::Decimal(d) if d.fract().is_zero() => d.to_i64(),
            #[allow(clippy::cast_possible_truncation)]
            XdmAtomicValue::Double(d) if d.is_finite() && d.fract() == 0.0 => Some(*d as i64),
            #[allow(clippy::cast_possible_truncation)]
            XdmAtomicValue::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }
}

fn format_double(d: f64) -> String {
    if d.is_nan() {
        "NaN".to_string()
    } else if d.is_infinite() {
        if d > 0.0 { "INF".to_string() } else { "-INF".to_string() }
    } else if d == 0.0 {
        if d.is_sign_negative() { "-0".to_string() } else { "0".to_string() }
    } else if d.fract() == 0.0 && d.abs() < 1e15 {
        format!("{d:.0}")
    } else {
        format!("{d}")
    }
}

/// Renders the value the way it would be written as a literal in an expression.
impl fmt::Display for XdmAtomicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XdmAtomicValue::Boolean(true) => f.write_str("true()"),
            XdmAtomicValue::Boolean(false) => f.write_str("false()"),
            XdmAtomicValue::String(s) => write!(f, "\"{}\"", s.replace('"', "\"\"")),
            XdmAtomicValue::Integer(i) => write!(f, "{i}"),
            XdmAtomicValue::Decimal(d) => {
                let s = d.normalize().to_string();
                if s.contains('.') { f.write_str(&s) } else { write!(f, "{s}.0") }
            }
            XdmAtomicValue::Double(d) if d.is_finite() => {
                let s = format!("{d:e}");
                f.write_str(&s)
            }
            XdmAtomicValue::Double(_) => write!(f, "xs:double(\"{}\")", self.string_value()),
            XdmAtomicValue::Float(_) => write!(f, "xs:float(\"{}\")", self.string_value()),
            XdmAtomicValue::AnyUri(s) => write!(f, "xs:anyURI(\"{s}\")"),
            XdmAtomicValue::UntypedAtomic(s) => write!(f, "xs:untypedAtomic(\"{s}\")"),
            XdmAtomicValue::QName { .. } => write!(f, "xs:QName(\"{}\")", self.string_value()),
        }
    }
}

pub type XdmSequence<N> = Vec<XdmItem<N>>;

pub type XdmItemResult<N> = Result<XdmItem<N>, crate::engine::error::Error>;

#[derive(Debug, Clone, PartialEq)]
pub enum XdmItem<N> {
    Node(N),
    Atomic(XdmAtomicValue),
}

impl<N> XdmItem<N> {
    pub fn as_atomic(&self) -> Option<&XdmAtomicValue> {
        match self {
            XdmItem::Atomic(a) => Some(a),
            XdmItem::Node(_) => None,
        }
    }

    pub fn is_node(&self) -> bool {
        matches!(self, XdmItem::Node(_))
    }
}

impl<N> From<XdmAtomicValue> for XdmItem<N> {
    fn from(a: XdmAtomicValue) -> Self {
        XdmItem::Atomic(a)
    }
}

impl<N> fmt::Display for XdmItem<N>
where
    N: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XdmItem::Node(n) => write!(f, "{n:?}"),
            XdmItem::Atomic(a) => write!(f, "{a}"),
        }
    }
}
