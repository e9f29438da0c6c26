//! Compilation cache benchmarks.
//!
//! The process-wide caches hold materializers, include fetch headers,
//! key appenders, and row binders. These benchmarks compare cached
//! lookups against fresh construction and measure the include
//! second-pass at different batch sizes.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use relq_bench::fixtures::{detail_rows, mysql_context, order_rows};
use relq_core::{Materializer, MemoryCursor, QueryBuilder};
use relq_expr::Expr;

fn bench_materializer_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache/materializer");
    let ctx = mysql_context();
    let stmt = QueryBuilder::new(ctx).from("Order").unwrap().build().unwrap();

    group.bench_function("cached", |b| {
        b.iter(|| black_box(Materializer::cached("Order", &stmt.shape)));
    });
    group.bench_function("fresh", |b| {
        b.iter(|| black_box(Materializer::for_shape("Order", &stmt.shape)));
    });

    group.finish();
}

fn bench_include_fetch_sql(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache/include_fetch");

    for roots in [10usize, 100, 1000] {
        let mut q = QueryBuilder::new(mysql_context())
            .from("Order")
            .unwrap()
            .include_many_filtered(
                &Expr::param(0).member("Details"),
                &Expr::param(0).member("Qty").gt(0),
            )
            .unwrap();
        let stmt = q.build().unwrap();

        let reader = Materializer::for_shape("Order", &stmt.shape);
        let mut cursor = MemoryCursor::new(order_rows(roots));
        let materialized = reader.read_rows(&mut cursor).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(roots), &roots, |b, _| {
            b.iter(|| black_box(q.build_include_sql_many(&materialized).unwrap()));
        });
    }

    group.finish();
}

fn bench_include_bind(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache/include_bind");

    for roots in [10usize, 100] {
        let mut q = QueryBuilder::new(mysql_context())
            .from("Order")
            .unwrap()
            .include_many_filtered(
                &Expr::param(0).member("Details"),
                &Expr::param(0).member("Qty").gt(0),
            )
            .unwrap();
        let stmt = q.build().unwrap();

        let reader = Materializer::for_shape("Order", &stmt.shape);
        let mut cursor = MemoryCursor::new(order_rows(roots));
        let materialized = reader.read_rows(&mut cursor).unwrap();
        let details = detail_rows(roots);

        group.bench_with_input(BenchmarkId::from_parameter(roots), &roots, |b, _| {
            b.iter(|| {
                // Roots and cursor rebuild inside the iteration; the bind
                // dominates at these sizes.
                let mut batch = materialized.clone();
                let mut cursor = MemoryCursor::with_sets(vec![details.clone()]);
                q.set_include_values_many(&mut batch, &mut cursor).unwrap();
                black_box(batch.len())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_materializer_lookup,
    bench_include_fetch_sql,
    bench_include_bind
);
criterion_main!(benches);
