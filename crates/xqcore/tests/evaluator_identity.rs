use rstest::rstest;
use xqcore::engine::evaluator::SequenceSink;
use xqcore::model::simple::{doc, elem};
use xqcore::{
    Cardinality, CompiledExpr, Compiler, DynamicContextBuilder, Error, ErrorCode, ExprBuilder, ExprId, IdentityOp,
    ItemType, SequenceType, SimpleNode, StaticContext, StaticContextBuilder, XdmAtomicValue, XdmItem, XdmNode,
};

fn compile(b: ExprBuilder, root: ExprId, ctx: &StaticContext) -> CompiledExpr {
    let (arena, root) = b.finish(root);
    Compiler::compile(arena, root, ctx).expect("compile ok")
}

fn siblings() -> (SimpleNode, SimpleNode) {
    let root = doc().child(elem("r").child(elem("a")).child(elem("b"))).build();
    let r = root.children()[0].clone();
    let kids = r.children();
    (kids[0].clone(), kids[1].clone())
}

fn node_var() -> SequenceType {
    SequenceType::new(ItemType::AnyNode, Cardinality::EXACTLY_ONE)
}

#[rstest]
fn context_node_is_itself() {
    let (a, _) = siblings();
    let mut b = ExprBuilder::new();
    let l = b.context_item();
    let r = b.context_item();
    let is = b.identity_cmp(IdentityOp::Is, l, r);
    let c = compile(b, is, &StaticContext::default());
    let dc = DynamicContextBuilder::new().with_context_node(a).build();
    assert_eq!(c.evaluate_item(&dc).expect("eval ok"), Some(XdmItem::Atomic(XdmAtomicValue::Boolean(true))));
}

#[rstest]
fn atomic_operand_is_a_static_type_error() {
    let mut b = ExprBuilder::new();
    let one = b.integer(1);
    let dot = b.context_item();
    let is = b.identity_cmp(IdentityOp::Is, one, dot);
    let (arena, root) = b.finish(is);
    let err = Compiler::compile(arena, root, &StaticContext::default()).expect_err("static error");
    assert_eq!(err.code_enum(), ErrorCode::XPTY0004);
    assert!(err.is_static());
}

#[rstest]
#[case::is(IdentityOp::Is, false)]
#[case::precedes(IdentityOp::Precedes, true)]
#[case::follows(IdentityOp::Follows, false)]
fn document_order_of_siblings(#[case] op: IdentityOp, #[case] expected: bool) {
    let (first, second) = siblings();
    let ctx = StaticContextBuilder::new().with_variable("a", node_var()).with_variable("b", node_var()).build();
    let mut b = ExprBuilder::new();
    let l = b.var("a");
    let r = b.var("b");
    let cmp = b.identity_cmp(op, l, r);
    let c = compile(b, cmp, &ctx);
    let dc = DynamicContextBuilder::new()
        .with_variable("a", vec![XdmItem::Node(first)])
        .with_variable("b", vec![XdmItem::Node(second)])
        .build();
    assert_eq!(c.evaluate_item(&dc).expect("eval ok"), Some(XdmItem::Atomic(XdmAtomicValue::Boolean(expected))));
}

#[derive(Default)]
struct Summing {
    total: i64,
    items: usize,
}

impl SequenceSink<SimpleNode> for Summing {
    fn append(&mut self, item: XdmItem<SimpleNode>) -> Result<(), Error> {
        if let XdmItem::Atomic(XdmAtomicValue::Integer(n)) = item {
            self.total += n;
        }
        self.items += 1;
        Ok(())
    }
}

#[rstest]
fn results_can_be_pushed_into_a_sink() {
    let mut b = ExprBuilder::new();
    let one = b.integer(1);
    let hundred = b.integer(100);
    let range = b.range(one, hundred);
    let c = compile(b, range, &StaticContext::default());
    let mut sink = Summing::default();
    c.process(&DynamicContextBuilder::<SimpleNode>::new().build(), &mut sink).expect("process ok");
    assert_eq!((sink.items, sink.total), (100, 5050));
}
