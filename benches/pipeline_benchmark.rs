//! Pipeline benchmark: lazy versus eager execution of representative queries

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use deferq::ast::{BinaryOperator, Expr, Expression};
use deferq::{EngineConfig, QueryEngine, SchemePreference, Value};
use std::hint::black_box;

const SIZES: &[i64] = &[100, 10_000];

fn numbers(size: i64) -> Value {
    Value::list((0..size).map(Value::Int))
}

fn call(target: Expr, verb: &str, args: Vec<Expr>) -> Expr {
    Expression::method_call(target, verb, args)
}

/// `$numbers->where(fn ($n) => $n % 3 == 0)->select(fn ($n) => $n * 2)`
fn filter_project() -> Expr {
    let divisible = Expression::arrow(
        &["n"],
        Expression::binary(
            Expression::binary(
                Expression::variable("n"),
                BinaryOperator::Modulo,
                Expression::value(3),
            ),
            BinaryOperator::Equality,
            Expression::value(0),
        ),
    );
    let doubled = Expression::arrow(
        &["n"],
        Expression::binary(
            Expression::variable("n"),
            BinaryOperator::Multiply,
            Expression::value(2),
        ),
    );
    call(call(Expression::variable("numbers"), "where", vec![divisible]), "select", vec![doubled])
}

/// Benchmark a full scan, then a query that stops after a few elements
fn bench_schemes(c: &mut Criterion) {
    let queries = [
        ("filter_project", filter_project()),
        ("first_match", call(filter_project(), "first", vec![])),
        (
            "take_10",
            call(
                call(filter_project(), "take", vec![Expression::value(10)]),
                "count",
                vec![],
            ),
        ),
    ];

    for (name, query) in &queries {
        let mut group = c.benchmark_group(*name);
        for &size in SIZES {
            group.throughput(Throughput::Elements(size as u64));
            let configs = [("lazy", EngineConfig::lazy()), ("eager", EngineConfig::eager())];
            for (label, config) in configs {
                let engine = QueryEngine::new(config);
                let source = numbers(size);
                group.bench_with_input(BenchmarkId::new(label, size), &source, |b, source| {
                    b.iter(|| black_box(engine.execute_with(query, source.clone())))
                });
            }
        }
        group.finish();
    }
}

/// Benchmark query parsing and hashing alone
fn bench_build(c: &mut Criterion) {
    let engine = QueryEngine::new(EngineConfig {
        scheme: SchemePreference::Auto,
        ..EngineConfig::default()
    });
    let query = call(filter_project(), "count", vec![]);
    c.bench_function("build_and_hash", |b| b.iter(|| black_box(engine.hash(black_box(&query)))));
}

criterion_group!(benches, bench_schemes, bench_build);
criterion_main!(benches);
