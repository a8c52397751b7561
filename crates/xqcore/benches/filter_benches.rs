use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use xqcore::{
    ArithOp, CompiledExpr, ComparisonOp, Compiler, DynamicContext, ExprBuilder, ExprId, OptimizationLevel,
    SimpleNode, StaticContextBuilder,
};

type Pred = fn(&mut ExprBuilder) -> ExprId;

fn predicates() -> Vec<(&'static str, Pred)> {
    vec![
        ("subscript", |b| b.integer(5_000)),
        ("last", |b| b.last()),
        ("position_lt", |b| {
            let p = b.position();
            let n = b.integer(100);
            b.general_cmp(ComparisonOp::Lt, p, n)
        }),
        ("even", |b| {
            let dot = b.context_item();
            let two = b.integer(2);
            let m = b.arith(ArithOp::Mod, dot, two);
            let zero = b.integer(0);
            b.general_cmp(ComparisonOp::Eq, m, zero)
        }),
    ]
}

fn compile(predicate: Pred, level: OptimizationLevel) -> CompiledExpr {
    let mut b = ExprBuilder::new();
    let s = b.integer(1);
    let e = b.integer(10_000);
    let base = b.range(s, e);
    let p = predicate(&mut b);
    let f = b.filter(base, p);
    let (arena, root) = b.finish(f);
    let ctx = StaticContextBuilder::new().with_optimization(level).build();
    Compiler::compile(arena, root, &ctx).expect("compile failure")
}

fn benchmark_compiler(c: &mut Criterion) {
    c.bench_function("compiler/compile_filters", |b| {
        b.iter(|| {
            for (_, p) in predicates() {
                black_box(compile(p, OptimizationLevel::Full));
            }
        })
    });
}

fn benchmark_filters(c: &mut Criterion) {
    let ctx = DynamicContext::<SimpleNode>::default();
    let mut group = c.benchmark_group("evaluator/filter");
    for (name, p) in predicates() {
        for (label, level) in [("optimized", OptimizationLevel::Full), ("plain", OptimizationLevel::None)] {
            let compiled = compile(p, level);
            group.bench_with_input(BenchmarkId::new(label, name), &compiled, |b, prog| {
                b.iter(|| {
                    let result = prog.evaluate(black_box(&ctx)).expect("eval failure");
                    black_box(result.len());
                });
            });
        }
    }
    group.finish();
}

criterion_group!(benches, benchmark_compiler, benchmark_filters);
criterion_main!(benches);
