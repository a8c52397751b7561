use rstest::rstest;
use xqcore::{
    ComparisonOp, CompiledExpr, Compiler, DynamicContext, DynamicContextBuilder, ExprBuilder, ExprId, SequenceType,
    SimpleNode, StaticContext, StaticContextBuilder, XdmAtomicValue, XdmItem,
};
use xqcore::{ArithOp, AtomicType, Cardinality, ExprKind};

type Pred = fn(&mut ExprBuilder) -> ExprId;

fn one_to_ten(b: &mut ExprBuilder) -> ExprId {
    let s = b.integer(1);
    let e = b.integer(10);
    b.range(s, e)
}

fn compile_filter(predicate: Pred, ctx: &StaticContext) -> CompiledExpr {
    let mut b = ExprBuilder::new();
    let base = one_to_ten(&mut b);
    let p = predicate(&mut b);
    let f = b.filter(base, p);
    let (arena, root) = b.finish(f);
    Compiler::compile(arena, root, ctx).expect("compile ok")
}

fn atoms(items: Vec<XdmItem<SimpleNode>>) -> Vec<i64> {
    items
        .into_iter()
        .map(|i| match i {
            XdmItem::Atomic(XdmAtomicValue::Integer(n)) => n,
            other => panic!("expected an integer, got {other:?}"),
        })
        .collect()
}

fn eval(c: &CompiledExpr) -> Vec<i64> {
    atoms(c.evaluate(&DynamicContext::<SimpleNode>::default()).expect("eval ok"))
}

#[rstest]
#[case::literal_position(|b: &mut ExprBuilder| b.integer(3), "subscript((1 to 10), 3)", vec![3])]
#[case::first(|b: &mut ExprBuilder| b.integer(1), "first((1 to 10))", vec![1])]
#[case::last(|b: &mut ExprBuilder| b.last(), "last-item((1 to 10))", vec![10])]
#[case::zero(|b: &mut ExprBuilder| b.integer(0), "()", vec![])]
#[case::true_predicate(|b: &mut ExprBuilder| b.boolean(true), "(1 to 10)", (1..=10).collect())]
#[case::position_lt(
    |b: &mut ExprBuilder| { let p = b.position(); let n = b.integer(4); b.general_cmp(ComparisonOp::Lt, p, n) },
    "slice((1 to 10), 1, 3)",
    vec![1, 2, 3]
)]
#[case::position_le(
    |b: &mut ExprBuilder| { let p = b.position(); let n = b.integer(2); b.general_cmp(ComparisonOp::Le, p, n) },
    "slice((1 to 10), 1, 2)",
    vec![1, 2]
)]
#[case::position_gt(
    |b: &mut ExprBuilder| { let p = b.position(); let n = b.integer(8); b.general_cmp(ComparisonOp::Gt, p, n) },
    "tail((1 to 10), 9)",
    vec![9, 10]
)]
#[case::position_ge(
    |b: &mut ExprBuilder| { let p = b.position(); let n = b.integer(8); b.value_cmp(ComparisonOp::Ge, p, n) },
    "tail((1 to 10), 8)",
    vec![8, 9, 10]
)]
#[case::position_eq(
    |b: &mut ExprBuilder| { let p = b.position(); let n = b.integer(4); b.general_cmp(ComparisonOp::Eq, p, n) },
    "subscript((1 to 10), 4)",
    vec![4]
)]
#[case::number_eq_position(
    |b: &mut ExprBuilder| { let n = b.integer(4); let p = b.position(); b.general_cmp(ComparisonOp::Eq, n, p) },
    "subscript((1 to 10), 4)",
    vec![4]
)]
#[case::position_in_range(
    |b: &mut ExprBuilder| {
        let p = b.position();
        let lo = b.integer(2);
        let hi = b.integer(4);
        let r = b.range(lo, hi);
        b.general_cmp(ComparisonOp::Eq, p, r)
    },
    "slice((1 to 10), 2, 4)",
    vec![2, 3, 4]
)]
#[case::position_to_last(
    |b: &mut ExprBuilder| {
        let p = b.position();
        let lo = b.integer(8);
        let hi = b.last();
        let r = b.range(lo, hi);
        b.general_cmp(ComparisonOp::Eq, p, r)
    },
    "tail((1 to 10), 8)",
    vec![8, 9, 10]
)]
fn positional_filters_become_windows(#[case] predicate: Pred, #[case] explain: &str, #[case] expected: Vec<i64>) {
    let c = compile_filter(predicate, &StaticContext::default());
    assert_eq!(c.explain(), explain);
    assert_eq!(eval(&c), expected);
}

#[rstest]
fn boolean_predicate_keeps_the_filter() {
    let c = compile_filter(
        |b| {
            let dot = b.context_item();
            let two = b.integer(2);
            let m = b.arith(ArithOp::Mod, dot, two);
            let zero = b.integer(0);
            b.general_cmp(ComparisonOp::Eq, m, zero)
        },
        &StaticContext::default(),
    );
    assert_eq!(c.explain(), "(1 to 10)[((. mod 2) eq 0)]");
    assert_eq!(eval(&c), vec![2, 4, 6, 8, 10]);
}

#[rstest]
fn positional_conjunct_is_split_off() {
    let c = compile_filter(
        |b| {
            let p = b.position();
            let five = b.integer(5);
            let window = b.general_cmp(ComparisonOp::Le, p, five);
            let dot = b.context_item();
            let two = b.integer(2);
            let m = b.arith(ArithOp::Mod, dot, two);
            let zero = b.integer(0);
            let even = b.general_cmp(ComparisonOp::Eq, m, zero);
            b.and(window, even)
        },
        &StaticContext::default(),
    );
    assert_eq!(c.explain(), "slice((1 to 10), 1, 5)[((. mod 2) eq 0)]");
    assert_eq!(eval(&c), vec![2, 4]);
}

#[rstest]
fn variable_index_becomes_subscript() {
    let ctx = StaticContextBuilder::new().with_variable("n", SequenceType::single(AtomicType::Integer)).build();
    let c = compile_filter(|b| b.var("n"), &ctx);
    assert_eq!(c.explain(), "subscript((1 to 10), $n)");
    let dc = DynamicContextBuilder::<SimpleNode>::new()
        .with_variable("n", vec![XdmItem::Atomic(XdmAtomicValue::Integer(5))])
        .build();
    assert_eq!(atoms(c.evaluate(&dc).expect("eval ok")), vec![5]);
}

#[rstest]
fn filter_over_literal_is_evaluated_at_compile_time() {
    let mut b = ExprBuilder::new();
    let items: Vec<ExprId> = (1..=3).map(|i| b.integer(i)).collect();
    let base = b.sequence(items);
    let dot = b.context_item();
    let one = b.integer(1);
    let pred = b.general_cmp(ComparisonOp::Gt, dot, one);
    let f = b.filter(base, pred);
    let (arena, root) = b.finish(f);
    let c = Compiler::compile(arena, root, &StaticContext::default()).expect("compile ok");
    assert_eq!(c.explain(), "(2, 3)");
    assert_eq!(eval(&c), vec![2, 3]);
}

#[rstest]
fn huge_ranges_are_filtered_lazily() {
    let mut b = ExprBuilder::new();
    let s = b.integer(1);
    let e = b.integer(1_000_000_000);
    let base = b.range(s, e);
    let dot = b.context_item();
    let two = b.integer(2);
    let m = b.arith(ArithOp::Mod, dot, two);
    let zero = b.integer(0);
    let pred = b.general_cmp(ComparisonOp::Eq, m, zero);
    let f = b.filter(base, pred);
    let (arena, root) = b.finish(f);
    let c = Compiler::compile(arena, root, &StaticContext::default()).expect("compile ok");
    let first: Vec<XdmItem<SimpleNode>> = c
        .evaluate_stream(&DynamicContext::<SimpleNode>::default())
        .expect("stream ok")
        .take(3)
        .collect::<Result<_, _>>()
        .expect("items ok");
    assert_eq!(atoms(first), vec![2, 4, 6]);
}

fn integers() -> StaticContext {
    StaticContextBuilder::new()
        .with_variable("e", SequenceType::atomic(AtomicType::Integer, Cardinality::ZERO_OR_MORE))
        .build()
}

#[rstest]
#[case::first(|b: &mut ExprBuilder| b.integer(1), "first($e)")]
#[case::last(|b: &mut ExprBuilder| b.last(), "last-item($e)")]
fn window_over_empty_sequence_is_empty(#[case] predicate: Pred, #[case] explain: &str) {
    let mut b = ExprBuilder::new();
    let base = b.var("e");
    let p = predicate(&mut b);
    let f = b.filter(base, p);
    let (arena, root) = b.finish(f);
    let c = Compiler::compile(arena, root, &integers()).expect("compile ok");
    assert_eq!(c.explain(), explain);
    assert!(matches!(c.arena().kind(c.root()), ExprKind::FirstItem(_) | ExprKind::LastItem(_)));

    let empty = DynamicContextBuilder::<SimpleNode>::new().with_variable("e", Vec::<XdmItem<SimpleNode>>::new()).build();
    assert_eq!(c.evaluate(&empty).expect("eval ok"), Vec::<XdmItem<SimpleNode>>::new());
    let three = DynamicContextBuilder::<SimpleNode>::new()
        .with_variable("e", (4..=6).map(|i| XdmItem::Atomic(XdmAtomicValue::Integer(i))).collect::<Vec<_>>())
        .build();
    assert_eq!(c.evaluate(&three).expect("eval ok").len(), 1);
}

#[rstest]
#[case::below_min(ComparisonOp::Lt, i64::MIN, vec![])]
#[case::below_max(ComparisonOp::Lt, i64::MAX, (1..=10).collect())]
#[case::above_max(ComparisonOp::Gt, i64::MAX, vec![])]
#[case::above_min(ComparisonOp::Gt, i64::MIN, (1..=10).collect())]
#[case::above_seven(ComparisonOp::Gt, 7, vec![8, 9, 10])]
fn position_bounds_at_the_integer_limits(#[case] op: ComparisonOp, #[case] n: i64, #[case] expected: Vec<i64>) {
    let ctx = StaticContextBuilder::new().with_variable("n", SequenceType::single(AtomicType::Integer)).build();
    let mut b = ExprBuilder::new();
    let base = one_to_ten(&mut b);
    let p = b.position();
    let var = b.var("n");
    let pred = b.general_cmp(op, p, var);
    let f = b.filter(base, pred);
    let (arena, root) = b.finish(f);
    let c = Compiler::compile(arena, root, &ctx).expect("compile ok");
    let plan = if op == ComparisonOp::Lt { "slice((1 to 10), 1, ($n - 1e0))" } else { "tail((1 to 10), ($n + 1e0))" };
    assert_eq!(c.explain(), plan);
    let dc = DynamicContextBuilder::<SimpleNode>::new()
        .with_variable("n", vec![XdmItem::Atomic(XdmAtomicValue::Integer(n))])
        .build();
    assert_eq!(atoms(c.evaluate(&dc).expect("eval ok")), expected);
}

#[rstest]
#[case::lt_min(|b: &mut ExprBuilder| { let p = b.position(); let n = b.integer(i64::MIN); b.general_cmp(ComparisonOp::Lt, p, n) }, vec![])]
#[case::gt_max(|b: &mut ExprBuilder| { let p = b.position(); let n = b.integer(i64::MAX); b.general_cmp(ComparisonOp::Gt, p, n) }, vec![])]
#[case::lt_max(|b: &mut ExprBuilder| { let p = b.position(); let n = b.integer(i64::MAX); b.general_cmp(ComparisonOp::Lt, p, n) }, (1..=10).collect())]
fn literal_position_bounds_at_the_integer_limits(#[case] predicate: Pred, #[case] expected: Vec<i64>) {
    let c = compile_filter(predicate, &StaticContext::default());
    assert!(matches!(c.arena().kind(c.root()), ExprKind::Slice { .. } | ExprKind::TailFrom { .. }), "{}", c.explain());
    assert_eq!(eval(&c), expected);
}
