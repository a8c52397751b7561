use rstest::rstest;
use xqcore::compiler::ir::FilterFlags;
use xqcore::{
    AtomicType, Cardinality, ComparisonOp, CompiledExpr, Compiler, DynamicContext, DynamicContextBuilder, Error,
    ErrorCode, ExprArena, ExprBuilder, ExprId, ExprKind, Indexability, ItemType, OptimizationLevel, Optimizer,
    SequenceType, SimpleNode, StaticContext, StaticContextBuilder, XdmAtomicValue, XdmItem,
};
use std::sync::Arc;
use xqcore::ArithOp;

fn compile(b: ExprBuilder, root: ExprId, ctx: &StaticContext) -> CompiledExpr {
    let (arena, root) = b.finish(root);
    Compiler::compile(arena, root, ctx).expect("compile ok")
}

fn compile_err(b: ExprBuilder, root: ExprId, ctx: &StaticContext) -> Error {
    let (arena, root) = b.finish(root);
    Compiler::compile(arena, root, ctx).expect_err("static error")
}

fn ints(values: &[i64]) -> Vec<XdmItem<SimpleNode>> {
    values.iter().map(|i| XdmItem::Atomic(XdmAtomicValue::Integer(*i))).collect()
}

fn one_to(b: &mut ExprBuilder, n: i64) -> ExprId {
    let s = b.integer(1);
    let e = b.integer(n);
    b.range(s, e)
}

#[rstest]
fn undeclared_variable_is_xpst0008() {
    let mut b = ExprBuilder::new();
    let v = b.var("nope");
    let err = compile_err(b, v, &StaticContext::default());
    assert_eq!(err.code_enum(), ErrorCode::XPST0008);
    assert!(err.is_static());
}

#[rstest]
fn unknown_function_is_xpst0017() {
    let mut b = ExprBuilder::new();
    let one = b.integer(1);
    let call = b.call("no-such-function", vec![one]);
    let err = compile_err(b, call, &StaticContext::default());
    assert_eq!(err.code_enum(), ErrorCode::XPST0017);
}

#[rstest]
fn context_item_without_focus_is_xpdy0002() {
    let ctx = StaticContextBuilder::new().with_context_item_type(None).build();
    let mut b = ExprBuilder::new();
    let dot = b.context_item();
    let err = compile_err(b, dot, &ctx);
    assert_eq!(err.code_enum(), ErrorCode::XPDY0002);
    assert!(err.is_static());
}

#[rstest]
fn declared_let_type_is_checked_statically() {
    let mut b = ExprBuilder::new();
    let one = b.integer(1);
    let body = b.var("a");
    let l = b.let_in("a", Some(SequenceType::single(AtomicType::String)), one, body);
    let err = compile_err(b, l, &StaticContext::default());
    assert_eq!(err.code_enum(), ErrorCode::XPTY0004);
    assert!(err.is_static());
}

#[rstest]
fn let_binding_is_never_evaluated_when_unused() {
    let mut b = ExprBuilder::new();
    let one = b.integer(1);
    let zero = b.integer(0);
    let boom = b.arith(ArithOp::IDiv, one, zero);
    let seven = b.integer(7);
    let l = b.let_in("unused", None, boom, seven);
    let c = compile(b, l, &StaticContext::default());
    assert_eq!(c.evaluate(&DynamicContext::<SimpleNode>::default()).expect("eval ok"), ints(&[7]));
}

#[rstest]
#[case::exactly_one("exactly-one", ErrorCode::FORG0005)]
#[case::zero_or_one("zero-or-one", ErrorCode::FORG0003)]
fn cardinality_functions_raise_their_own_code(#[case] function: &str, #[case] code: ErrorCode) {
    let ctx = StaticContextBuilder::new()
        .with_variable("s", SequenceType::atomic(AtomicType::Integer, Cardinality::ZERO_OR_MORE))
        .build();
    let mut b = ExprBuilder::new();
    let s = b.var("s");
    let call = b.call(function, vec![s]);
    let c = compile(b, call, &ctx);
    assert!(c.explain().starts_with("checkCardinality($s, "));

    let one = DynamicContextBuilder::<SimpleNode>::new().with_variable("s", ints(&[4])).build();
    assert_eq!(c.evaluate(&one).expect("eval ok"), ints(&[4]));
    let two = DynamicContextBuilder::<SimpleNode>::new().with_variable("s", ints(&[4, 5])).build();
    let err = c.evaluate(&two).expect_err("too many items");
    assert_eq!(err.code_enum(), code);
}

#[rstest]
fn satisfied_cardinality_guard_is_removed() {
    let mut b = ExprBuilder::new();
    let one = b.integer(1);
    let call = b.call("exactly-one", vec![one]);
    let c = compile(b, call, &StaticContext::default());
    assert_eq!(c.explain(), "1");
}

#[rstest]
fn double_negation_becomes_boolean() {
    let ctx = StaticContextBuilder::new().with_variable("b", SequenceType::ANY).build();
    let mut b = ExprBuilder::new();
    let v = b.var("b");
    let inner = b.call("not", vec![v]);
    let outer = b.call("not", vec![inner]);
    let c = compile(b, outer, &ctx);
    assert_eq!(c.explain(), "fn:boolean($b)");
}

fn promoted_filter(b: &mut ExprBuilder, base: ExprId, op: ArithOp) -> ExprId {
    let dot = b.context_item();
    let y = b.var("y");
    let k = b.integer(if op == ArithOp::IDiv { 0 } else { 1 });
    let rhs = b.arith(op, y, k);
    let pred = b.general_cmp(ComparisonOp::Eq, dot, rhs);
    b.filter(base, pred)
}

fn with_y() -> StaticContext {
    StaticContextBuilder::new()
        .with_variable("y", SequenceType::single(AtomicType::Integer))
        .with_variable("e", SequenceType::ANY)
        .build()
}

#[rstest]
fn focus_independent_subexpression_is_promoted() {
    let mut b = ExprBuilder::new();
    let base = one_to(&mut b, 5);
    let f = promoted_filter(&mut b, base, ArithOp::Plus);
    let c = compile(b, f, &with_y());
    assert_eq!(
        c.explain(),
        "let $Q{urn:xqcore:promoted}p0 := ($y + 1) return (1 to 5)[(. eq $Q{urn:xqcore:promoted}p0)]"
    );
    let dc = DynamicContextBuilder::<SimpleNode>::new().with_variable("y", ints(&[2])).build();
    assert_eq!(c.evaluate(&dc).expect("eval ok"), ints(&[3]));
}

#[rstest]
#[case::never_demanded(vec![], None)]
#[case::demanded(vec![1], Some(ErrorCode::FOAR0001))]
fn promoted_binding_is_lazy(#[case] e: Vec<i64>, #[case] expected: Option<ErrorCode>) {
    let mut b = ExprBuilder::new();
    let base = b.var("e");
    let f = promoted_filter(&mut b, base, ArithOp::IDiv);
    let c = compile(b, f, &with_y());
    let plan = c.explain();
    assert!(plan.starts_with("let $Q{urn:xqcore:promoted}p0 := "), "{plan}");
    assert!(plan.contains("($y idiv 0)"), "{plan}");
    let dc = DynamicContextBuilder::<SimpleNode>::new()
        .with_variable("y", ints(&[3]))
        .with_variable("e", ints(&e))
        .build();
    match expected {
        None => assert_eq!(c.evaluate(&dc).expect("eval ok"), ints(&[])),
        Some(code) => assert_eq!(c.evaluate(&dc).expect_err("division by zero").code_enum(), code),
    }
}

#[rstest]
fn optimization_can_be_switched_off() {
    let ctx = StaticContextBuilder::new().with_optimization(OptimizationLevel::None).build();
    let mut b = ExprBuilder::new();
    let base = one_to(&mut b, 10);
    let three = b.integer(3);
    let f = b.filter(base, three);
    let c = compile(b, f, &ctx);
    assert_eq!(c.explain(), "(1 to 10)[3]");
    assert_eq!(c.evaluate(&DynamicContext::<SimpleNode>::default()).expect("eval ok"), ints(&[3]));
}

#[rstest]
fn static_type_of_filter_with_first_position() {
    let mut b = ExprBuilder::new();
    let base = one_to(&mut b, 10);
    let one = b.integer(1);
    let f = b.filter(base, one);
    let c = compile(b, f, &StaticContext::default());
    assert_eq!(c.static_type(), SequenceType::new(ItemType::INTEGER, Cardinality::ZERO_OR_ONE));
}

#[derive(Debug)]
struct EverythingIndexed;

impl Optimizer for EverythingIndexed {
    fn is_indexable_filter(&self, arena: &ExprArena, predicate: ExprId) -> Indexability {
        match arena.kind(predicate) {
            ExprKind::ValueComparison { .. } => Indexability::ExprEqValue,
            _ => Indexability::No,
        }
    }

    fn try_indexed_filter(
        &self,
        arena: &mut ExprArena,
        _filter: ExprId,
        _side: Indexability,
        _ctx: &StaticContext,
    ) -> Result<Option<ExprId>, Error> {
        Ok(Some(arena.alloc(ExprKind::Literal(vec![XdmAtomicValue::String("indexed".into())]))))
    }
}

#[rstest]
fn pluggable_optimizer_can_replace_filters() {
    let ctx = StaticContextBuilder::new().with_optimizer(Arc::new(EverythingIndexed)).build();
    let mut b = ExprBuilder::new();
    let base = one_to(&mut b, 10);
    let dot = b.context_item();
    let three = b.integer(3);
    let pred = b.general_cmp(ComparisonOp::Eq, dot, three);
    let f = b.filter(base, pred);
    let c = compile(b, f, &ctx);
    assert_eq!(c.explain(), "\"indexed\"");
}

#[rstest]
fn filter_flags_default_to_unclassified() {
    assert_eq!(
        FilterFlags::default(),
        FilterFlags { positional: false, singleton_boolean: false, independent_numeric: false }
    );
}

#[rstest]
#[case::windowed(|b: &mut ExprBuilder| { let base = one_to(b, 10); let p = b.last(); b.filter(base, p) })]
#[case::promoted(|b: &mut ExprBuilder| { let base = one_to(b, 5); promoted_filter(b, base, ArithOp::Plus) })]
#[case::count(|b: &mut ExprBuilder| {
    let y = b.var("e");
    let count = b.call("count", vec![y]);
    let zero = b.integer(0);
    b.general_cmp(ComparisonOp::Eq, count, zero)
})]
fn compiling_twice_changes_nothing(#[case] build: fn(&mut ExprBuilder) -> ExprId) {
    let mut b = ExprBuilder::new();
    let root = build(&mut b);
    let c = compile(b, root, &with_y());
    let again = c.recompile().expect("recompile ok");
    assert_eq!(again.explain(), c.explain());
}
