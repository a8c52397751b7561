//! The small function library the core itself relies on.
//!
//! [`CoreFunctionLibrary`] answers compile-time lookups (signatures); the runtime
//! implementations live in [`default_function_registry`]. Rewrites synthesize calls to
//! `fn:empty`, `fn:exists`, `fn:boolean`, `fn:string` and `fn:number` through whatever
//! resolver the static context carries, plus `xqcore:min-ignoring-nan` and
//! `xqcore:max-ignoring-nan`, which skip NaN instead of returning it.

use std::sync::{Arc, OnceLock};

use crate::consts::{FNS, XQCORE_FNS};
use crate::engine::error::{Error, ErrorCode};
use crate::engine::evaluator::comparison::value_ordering;
use crate::engine::evaluator::convert::{atomize_item, convert_if_untyped, effective_boolean_value, to_number};
use crate::engine::evaluator::numeric;
use crate::engine::runtime::{
    Arity, CallCtx, FunctionRegistry, FunctionResolver, FunctionSignature, ResolveError,
};
use crate::compiler::ir::ArithOp;
use crate::model::XdmNode;
use crate::types::{AtomicType, Cardinality, ItemType, SequenceType};
use crate::xdm::{ExpandedName, XdmAtomicValue, XdmItem, XdmSequence};

const ANY_ITEMS: SequenceType = SequenceType::ANY;
const OPT_ITEM: SequenceType = SequenceType::new(ItemType::AnyItem, Cardinality::ZERO_OR_ONE);
const ATOMICS: SequenceType = SequenceType::atomic(AtomicType::AnyAtomic, Cardinality::ZERO_OR_MORE);
const OPT_ATOMIC: SequenceType = SequenceType::optional(AtomicType::AnyAtomic);
const BOOLEAN: SequenceType = SequenceType::single(AtomicType::Boolean);

fn signatures() -> &'static [Arc<FunctionSignature>] {
    static TABLE: OnceLock<Vec<Arc<FunctionSignature>>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let sig = |name: &str, params: Vec<SequenceType>, result: SequenceType| {
            Arc::new(FunctionSignature::new(ExpandedName::fn_name(name), params, result))
        };
        vec![
            sig("true", vec![], BOOLEAN),
            sig("false", vec![], BOOLEAN),
            sig("not", vec![ANY_ITEMS], BOOLEAN),
            sig("boolean", vec![ANY_ITEMS], BOOLEAN),
            sig("count", vec![ANY_ITEMS], SequenceType::single(AtomicType::Integer)),
            sig("empty", vec![ANY_ITEMS], BOOLEAN),
            sig("exists", vec![ANY_ITEMS], BOOLEAN),
            sig("string", vec![OPT_ITEM], SequenceType::single(AtomicType::String)),
            sig("number", vec![OPT_ATOMIC], SequenceType::single(AtomicType::Double)),
            sig("data", vec![ANY_ITEMS], ATOMICS),
            sig("min", vec![ATOMICS], OPT_ATOMIC),
            sig("max", vec![ATOMICS], OPT_ATOMIC),
            sig("sum", vec![ATOMICS], SequenceType::single(AtomicType::AnyAtomic)),
            sig("zero-or-one", vec![ANY_ITEMS], OPT_ITEM),
            sig("one-or-more", vec![ANY_ITEMS], SequenceType::new(ItemType::AnyItem, Cardinality::ONE_OR_MORE)),
            sig("exactly-one", vec![ANY_ITEMS], SequenceType::new(ItemType::AnyItem, Cardinality::EXACTLY_ONE)),
            Arc::new(FunctionSignature::new(min_ignoring_nan(), vec![ATOMICS], OPT_ATOMIC)),
            Arc::new(FunctionSignature::new(max_ignoring_nan(), vec![ATOMICS], OPT_ATOMIC)),
        ]
    })
}

pub fn min_ignoring_nan() -> ExpandedName {
    ExpandedName::new(Some(XQCORE_FNS.to_string()), "min-ignoring-nan")
}

pub fn max_ignoring_nan() -> ExpandedName {
    ExpandedName::new(Some(XQCORE_FNS.to_string()), "max-ignoring-nan")
}

/// Resolver over the functions in [`default_function_registry`].
#[derive(Debug, Default, Clone, Copy)]
pub struct CoreFunctionLibrary;

impl FunctionResolver for CoreFunctionLibrary {
    fn resolve(&self, name: &ExpandedName, arity: Arity) -> Result<Arc<FunctionSignature>, ResolveError> {
        let overloads: Vec<&Arc<FunctionSignature>> = signatures().iter().filter(|s| &s.name == name).collect();
        if overloads.is_empty() {
            return Err(ResolveError::Unknown(name.clone()));
        }
        overloads.iter().find(|s| s.arity() == arity).map(|s| Arc::clone(s)).ok_or_else(|| {
            ResolveError::WrongArity { name: name.clone(), available: overloads.iter().map(|s| s.arity()).collect() }
        })
    }
}

fn boolean<N>(b: bool) -> Result<XdmSequence<N>, Error> {
    Ok(vec![XdmItem::Atomic(XdmAtomicValue::Boolean(b))])
}

fn atomize_all<N: XdmNode>(seq: &XdmSequence<N>) -> Vec<XdmAtomicValue> {
    seq.iter().cloned().flat_map(atomize_item).collect()
}

fn cardinality_error<N>(code: ErrorCode, function: &str, found: usize) -> Result<XdmSequence<N>, Error> {
    Err(Error::from_code(code, format!("fn:{function} called with a sequence of {found} items")))
}

fn extremum<N: XdmNode>(
    ctx: &CallCtx<N>,
    seq: &XdmSequence<N>,
    want: core::cmp::Ordering,
    ignore_nan: bool,
) -> Result<XdmSequence<N>, Error> {
    let mut best: Option<XdmAtomicValue> = None;
    for v in atomize_all(seq) {
        let v = convert_if_untyped(v, AtomicType::Double)?;
        if v.is_nan() {
            if ignore_nan {
                continue;
            }
            return Ok(vec![XdmItem::Atomic(v)]);
        }
        best = match best {
            None => Some(v),
            Some(b) => {
                let ord = value_ordering(&v, &b, ctx.default_collation.as_ref())
                    .map_err(|e| Error::from_code(ErrorCode::FORG0006, e.message))?;
                if ord == Some(want) { Some(v) } else { Some(b) }
            }
        };
    }
    Ok(best.map(XdmItem::Atomic).into_iter().collect())
}

fn sum<N: XdmNode>(seq: &XdmSequence<N>) -> Result<XdmSequence<N>, Error> {
    let mut total = XdmAtomicValue::Integer(0);
    for v in atomize_all(seq) {
        let v = convert_if_untyped(v, AtomicType::Double)?;
        if !v.is_numeric() {
            return Err(Error::from_code(ErrorCode::FORG0006, format!("fn:sum is not defined for {}", v.type_of())));
        }
        total = numeric::arithmetic(ArithOp::Plus, &total, &v)?;
    }
    Ok(vec![XdmItem::Atomic(total)])
}

fn string<N: XdmNode>(seq: &XdmSequence<N>) -> String {
    match seq.first() {
        None => String::new(),
        Some(XdmItem::Node(n)) => n.string_value(),
        Some(XdmItem::Atomic(a)) => a.string_value(),
    }
}

/// Runtime implementations of the functions known to [`CoreFunctionLibrary`].
pub fn default_function_registry<N: XdmNode>() -> FunctionRegistry<N> {
    let mut reg: FunctionRegistry<N> = FunctionRegistry::new();

    reg.register_ns(FNS, "true", 0, |_ctx, _args| boolean(true));
    reg.register_ns(FNS, "false", 0, |_ctx, _args| boolean(false));
    reg.register_ns(FNS, "not", 1, |_ctx, args| boolean(!effective_boolean_value(&args[0])?));
    reg.register_ns(FNS, "boolean", 1, |_ctx, args| boolean(effective_boolean_value(&args[0])?));
    reg.register_ns(FNS, "empty", 1, |_ctx, args| boolean(args[0].is_empty()));
    reg.register_ns(FNS, "exists", 1, |_ctx, args| boolean(!args[0].is_empty()));
    reg.register_ns(FNS, "count", 1, |_ctx, args| {
        let n = i64::try_from(args[0].len()).unwrap_or(i64::MAX);
        Ok(vec![XdmItem::Atomic(XdmAtomicValue::Integer(n))])
    });
    reg.register_ns(FNS, "string", 1, |_ctx, args| Ok(vec![XdmItem::Atomic(XdmAtomicValue::String(string(&args[0])))]));
    reg.register_ns(FNS, "number", 1, |_ctx, args| {
        let n = atomize_all(&args[0]).first().map_or(f64::NAN, to_number);
        Ok(vec![XdmItem::Atomic(XdmAtomicValue::Double(n))])
    });
    reg.register_ns(FNS, "data", 1, |_ctx, args| Ok(atomize_all(&args[0]).into_iter().map(XdmItem::Atomic).collect()));
    reg.register_ns(FNS, "min", 1, |ctx, args| extremum(ctx, &args[0], core::cmp::Ordering::Less, false));
    reg.register_ns(FNS, "max", 1, |ctx, args| extremum(ctx, &args[0], core::cmp::Ordering::Greater, false));
    reg.register_ns(XQCORE_FNS, "min-ignoring-nan", 1, |ctx, args| {
        extremum(ctx, &args[0], core::cmp::Ordering::Less, true)
    });
    reg.register_ns(XQCORE_FNS, "max-ignoring-nan", 1, |ctx, args| {
        extremum(ctx, &args[0], core::cmp::Ordering::Greater, true)
    });
    reg.register_ns(FNS, "sum", 1, |_ctx, args| sum(&args[0]));
    reg.register_ns(FNS, "zero-or-one", 1, |_ctx, args| match args[0].len() {
        0 | 1 => Ok(args[0].clone()),
        n => cardinality_error(ErrorCode::FORG0003, "zero-or-one", n),
    });
    reg.register_ns(FNS, "one-or-more", 1, |_ctx, args| match args[0].len() {
        0 => cardinality_error(ErrorCode::FORG0004, "one-or-more", 0),
        _ => Ok(args[0].clone()),
    });
    reg.register_ns(FNS, "exactly-one", 1, |_ctx, args| match args[0].len() {
        1 => Ok(args[0].clone()),
        n => cardinality_error(ErrorCode::FORG0005, "exactly-one", n),
    });
    reg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::runtime::DynamicContext;
    use crate::engine::collation::CodepointCollation;
    use crate::model::NoNode;
    use rstest::rstest;

    fn call(name: &str, args: Vec<XdmSequence<NoNode>>) -> Result<XdmSequence<NoNode>, Error> {
        call_named(&ExpandedName::fn_name(name), args)
    }

    fn call_named(name: &ExpandedName, args: Vec<XdmSequence<NoNode>>) -> Result<XdmSequence<NoNode>, Error> {
        let dyn_ctx = DynamicContext::<NoNode>::default();
        let ctx = CallCtx { dyn_ctx: &dyn_ctx, default_collation: Arc::new(CodepointCollation) };
        let f = dyn_ctx.functions.resolve(name, args.len()).ok().unwrap();
        f(&ctx, &args)
    }

    fn doubles(v: &[f64]) -> XdmSequence<NoNode> {
        v.iter().map(|d| XdmItem::Atomic(XdmAtomicValue::Double(*d))).collect()
    }

    fn ints(v: &[i64]) -> XdmSequence<NoNode> {
        v.iter().map(|i| XdmItem::Atomic(XdmAtomicValue::Integer(*i))).collect()
    }

    #[rstest]
    #[case("min", XdmAtomicValue::Integer(1))]
    #[case("max", XdmAtomicValue::Integer(7))]
    #[case("sum", XdmAtomicValue::Integer(11))]
    #[case("count", XdmAtomicValue::Integer(3))]
    fn aggregates(#[case] name: &str, #[case] expected: XdmAtomicValue) {
        assert_eq!(call(name, vec![ints(&[3, 1, 7])]).unwrap(), vec![XdmItem::Atomic(expected)]);
    }

    #[test]
    fn min_of_untyped_is_double() {
        let seq = vec![
            XdmItem::Atomic(XdmAtomicValue::UntypedAtomic("4".into())),
            XdmItem::Atomic(XdmAtomicValue::Integer(9)),
        ];
        assert_eq!(call("min", vec![seq]).unwrap(), vec![XdmItem::Atomic(XdmAtomicValue::Double(4.0))]);
    }

    #[test]
    fn plain_min_propagates_nan() {
        let out = call("min", vec![doubles(&[2.0, f64::NAN])]).unwrap();
        assert!(matches!(out.as_slice(), [XdmItem::Atomic(v)] if v.is_nan()));
    }

    #[rstest]
    #[case::min(min_ignoring_nan(), vec![3.0, f64::NAN, 1.0], Some(1.0))]
    #[case::max(max_ignoring_nan(), vec![f64::NAN, 3.0, 1.0], Some(3.0))]
    #[case::only_nan(min_ignoring_nan(), vec![f64::NAN], None)]
    #[case::empty(max_ignoring_nan(), vec![], None)]
    fn extremum_can_skip_nan(#[case] name: ExpandedName, #[case] input: Vec<f64>, #[case] expected: Option<f64>) {
        let out = call_named(&name, vec![doubles(&input)]).unwrap();
        assert_eq!(out, expected.map(|d| XdmItem::Atomic(XdmAtomicValue::Double(d))).into_iter().collect::<Vec<_>>());
    }

    #[test]
    fn exactly_one_reports_forg0005() {
        let err = call("exactly-one", vec![ints(&[1, 2])]).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::FORG0005);
    }

    #[test]
    fn resolver_reports_arity() {
        let err = CoreFunctionLibrary.resolve(&ExpandedName::fn_name("count"), 2).unwrap_err();
        assert!(matches!(err, ResolveError::WrongArity { available, .. } if available == vec![1]));
        assert!(matches!(
            CoreFunctionLibrary.resolve(&ExpandedName::fn_name("nope"), 0),
            Err(ResolveError::Unknown(_))
        ));
    }
}
