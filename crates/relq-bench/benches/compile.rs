//! Statement compilation benchmarks.
//!
//! Measures expression walking and statement assembly in isolation;
//! no SQL is ever executed.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use relq_bench::fixtures::{deep_filter, mysql_context};
use relq_core::{InsertBuilder, QueryBuilder};
use relq_expr::{Expr, Subquery};

fn bench_filter_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile/filter");

    for depth in [1usize, 4, 16, 64] {
        let ctx = mysql_context();
        let predicate = deep_filter(depth, 42);

        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| {
                let stmt = QueryBuilder::new(ctx.clone())
                    .from("Order")
                    .unwrap()
                    .filter(&predicate)
                    .unwrap()
                    .build()
                    .unwrap();
                black_box(stmt.sql)
            });
        });
    }

    group.finish();
}

fn bench_join_projection(c: &mut Criterion) {
    let ctx = mysql_context();
    let on = Expr::param(0)
        .member("BuyerId")
        .eq(Expr::param(1).member("Id"));
    let filter = Expr::param(1).member("Name").eq("Alice");
    let projection = Expr::object(vec![
        ("Id", Expr::param(0).member("Id")),
        ("Amount", Expr::param(0).member("Amount")),
        ("Buyer", Expr::param(1).member("Name")),
    ]);

    c.bench_function("compile/join_projection", |b| {
        b.iter(|| {
            let stmt = QueryBuilder::new(ctx.clone())
                .from("Order")
                .unwrap()
                .inner_join("User", &on)
                .unwrap()
                .filter(&filter)
                .unwrap()
                .select(&projection)
                .unwrap()
                .build()
                .unwrap();
            black_box((stmt.sql, stmt.params))
        });
    });
}

fn bench_grouped_page(c: &mut Criterion) {
    let ctx = mysql_context();
    let keys = Expr::param(0).member("BuyerId");
    let having = Expr::count().gt(3);
    let order = Expr::param(0).member("BuyerId");

    c.bench_function("compile/grouped_page", |b| {
        b.iter(|| {
            let stmt = QueryBuilder::new(ctx.clone())
                .from("Order")
                .unwrap()
                .group_by(&keys)
                .unwrap()
                .having(&having)
                .unwrap()
                .order_by(&order)
                .unwrap()
                .select_grouping()
                .unwrap()
                .page(2, 25)
                .unwrap()
                .build()
                .unwrap();
            black_box(stmt.sql)
        });
    });
}

fn bench_union_wrap(c: &mut Criterion) {
    let ctx = mysql_context();
    let branch = Subquery::from("Order").filter(Expr::param(0).member("Amount").lt(10));
    let order = Expr::param(0).member("Id");

    c.bench_function("compile/union_wrap", |b| {
        b.iter(|| {
            let stmt = QueryBuilder::new(ctx.clone())
                .from("Order")
                .unwrap()
                .filter(&Expr::param(0).member("Amount").gt(1_000))
                .unwrap()
                .union_all(branch.clone())
                .unwrap()
                .order_by(&order)
                .unwrap()
                .build()
                .unwrap();
            black_box(stmt.sql)
        });
    });
}

fn bench_insert_select(c: &mut Criterion) {
    let ctx = mysql_context();
    let filter = Expr::param(0).member("Amount").gt(100);
    let projection = Expr::object(vec![
        ("Id", Expr::param(0).member("Id")),
        ("BuyerId", Expr::param(0).member("BuyerId")),
        ("Amount", Expr::param(0).member("Amount")),
        ("Name", Expr::param(0).member("Name")),
    ]);

    c.bench_function("compile/insert_select", |b| {
        b.iter(|| {
            let stmt = InsertBuilder::new(ctx.clone(), "Order")
                .unwrap()
                .source("Order")
                .unwrap()
                .filter(&filter)
                .unwrap()
                .project(&projection)
                .unwrap()
                .build()
                .unwrap();
            black_box(stmt.sql)
        });
    });
}

criterion_group!(
    benches,
    bench_filter_depth,
    bench_join_projection,
    bench_grouped_page,
    bench_union_wrap,
    bench_insert_select
);
criterion_main!(benches);
