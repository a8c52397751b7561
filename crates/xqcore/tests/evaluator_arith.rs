use rstest::rstest;
use rust_decimal::Decimal;
use xqcore::{
    ArithOp, AtomicType, CompiledExpr, Compiler, DynamicContext, DynamicContextBuilder, ErrorCode, ExprBuilder,
    ExprId, Location, SequenceType, SimpleNode, StaticContext, StaticContextBuilder, XdmAtomicValue, XdmItem,
};

fn compile(b: ExprBuilder, root: ExprId, ctx: &StaticContext) -> CompiledExpr {
    let (arena, root) = b.finish(root);
    Compiler::compile(arena, root, ctx).expect("compile ok")
}

fn value(c: &CompiledExpr, dc: &DynamicContext<SimpleNode>) -> Option<XdmAtomicValue> {
    c.evaluate_item(dc).expect("eval ok").map(|i| match i {
        XdmItem::Atomic(a) => a,
        XdmItem::Node(n) => panic!("unexpected node {n:?}"),
    })
}

#[rstest]
fn untyped_operand_is_cast_to_double() {
    let mut b = ExprBuilder::new();
    let l = b.untyped("3");
    let r = b.integer(2);
    let sum = b.arith(ArithOp::Plus, l, r);
    let c = compile(b, sum, &StaticContext::default());
    assert!(c.arena().is_literal(c.root()));
    assert_eq!(value(&c, &DynamicContext::default()), Some(XdmAtomicValue::Double(5.0)));
}

#[rstest]
#[case(ArithOp::Div, 1, 4, XdmAtomicValue::Decimal(Decimal::new(25, 2)))]
#[case(ArithOp::IDiv, 7, 2, XdmAtomicValue::Integer(3))]
#[case(ArithOp::Mod, -7, 2, XdmAtomicValue::Integer(-1))]
#[case(ArithOp::Times, 6, 7, XdmAtomicValue::Integer(42))]
fn integer_arithmetic_is_exact(#[case] op: ArithOp, #[case] l: i64, #[case] r: i64, #[case] expected: XdmAtomicValue) {
    let mut b = ExprBuilder::new();
    let lhs = b.integer(l);
    let rhs = b.integer(r);
    let e = b.arith(op, lhs, rhs);
    let c = compile(b, e, &StaticContext::default());
    assert_eq!(value(&c, &DynamicContext::default()), Some(expected));
}

#[rstest]
fn string_operand_is_a_static_type_error() {
    let mut b = ExprBuilder::new();
    let l = b.integer(1);
    let r = b.string("abc");
    let sum = b.arith(ArithOp::Plus, l, r);
    let (arena, root) = b.finish(sum);
    let err = Compiler::compile(arena, root, &StaticContext::default()).expect_err("static error");
    assert_eq!(err.code_enum(), ErrorCode::XPTY0004);
    assert!(err.is_static());
}

#[rstest]
fn empty_operand_warns_and_yields_empty() {
    let mut b = ExprBuilder::new();
    let l = b.empty();
    let r = b.string("abc");
    let sum = b.arith(ArithOp::Plus, l, r);
    let c = compile(b, sum, &StaticContext::default());
    assert_eq!(c.warnings().len(), 1);
    assert_eq!(c.explain(), "()");
    assert_eq!(value(&c, &DynamicContext::default()), None);
}

#[rstest]
#[case::untyped(XdmAtomicValue::UntypedAtomic("4".into()), XdmAtomicValue::Double(5.0))]
#[case::integer(XdmAtomicValue::Integer(4), XdmAtomicValue::Integer(5))]
#[case::decimal(XdmAtomicValue::Decimal(Decimal::new(15, 1)), XdmAtomicValue::Decimal(Decimal::new(25, 1)))]
fn operand_of_unknown_type_resolves_at_run_time(#[case] x: XdmAtomicValue, #[case] expected: XdmAtomicValue) {
    let ctx =
        StaticContextBuilder::new().with_variable("x", SequenceType::optional(AtomicType::AnyAtomic)).build();
    let mut b = ExprBuilder::new();
    let v = b.var("x");
    let one = b.integer(1);
    let sum = b.arith(ArithOp::Plus, v, one);
    let c = compile(b, sum, &ctx);
    let dc = DynamicContextBuilder::<SimpleNode>::new().with_variable("x", vec![XdmItem::Atomic(x)]).build();
    assert_eq!(value(&c, &dc), Some(expected));
}

#[rstest]
fn overflow_in_constant_is_reported_at_run_time() {
    let mut b = ExprBuilder::new();
    let l = b.integer(i64::MAX);
    let r = b.integer(1);
    let sum = b.arith(ArithOp::Plus, l, r);
    let c = compile(b, sum, &StaticContext::default());
    let err = c.evaluate(&DynamicContext::<SimpleNode>::default()).expect_err("overflow");
    assert_eq!(err.code_enum(), ErrorCode::FOAR0002);
}

#[rstest]
fn division_by_zero_carries_its_location() {
    let ctx = StaticContextBuilder::new().with_variable("y", SequenceType::single(AtomicType::Integer)).build();
    let mut b = ExprBuilder::new();
    b.at(1, 1);
    let y = b.var("y");
    let zero = b.integer(0);
    b.at(2, 5);
    let div = b.arith(ArithOp::IDiv, y, zero);
    let c = compile(b, div, &ctx);
    let dc = DynamicContextBuilder::<SimpleNode>::new()
        .with_variable("y", vec![XdmItem::Atomic(XdmAtomicValue::Integer(1))])
        .build();
    let err = c.evaluate(&dc).expect_err("division by zero");
    assert_eq!(err.code_enum(), ErrorCode::FOAR0001);
    assert_eq!(err.location, Some(Location::new(2, 5)));
}

#[rstest]
#[case::numeric_string("3", Some(5.0))]
#[case::not_a_number("abc", None)]
fn backwards_compatible_arithmetic_uses_number(#[case] s: &str, #[case] expected: Option<f64>) {
    let ctx = StaticContextBuilder::new().with_backwards_compatible(true).build();
    let mut b = ExprBuilder::new();
    let l = b.string(s);
    let r = b.integer(2);
    let sum = b.arith(ArithOp::Plus, l, r);
    let c = compile(b, sum, &ctx);
    match (value(&c, &DynamicContext::default()), expected) {
        (Some(XdmAtomicValue::Double(d)), Some(e)) => assert_eq!(d, e),
        (Some(XdmAtomicValue::Double(d)), None) => assert!(d.is_nan()),
        (other, _) => panic!("expected a double, got {other:?}"),
    }
}
