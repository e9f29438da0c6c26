//! Shared schema and expression fixtures for benchmarks.
//!
//! Generators are seeded so runs stay reproducible.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use relq_core::{EntityMap, MemberDef, MySqlDialect, QueryContext, ScalarType, SchemaCatalog};
use relq_expr::{Expr, Value};

/// A small sales schema: orders with a one-to-one buyer and a
/// one-to-many detail collection.
pub fn sales_schema() -> Arc<SchemaCatalog> {
    let order = EntityMap::new("Order", "sys_order")
        .with_member(MemberDef::new("Id", ScalarType::Int32).as_key())
        .with_member(MemberDef::new("BuyerId", ScalarType::Int32))
        .with_member(MemberDef::new("Amount", ScalarType::Float64))
        .with_member(MemberDef::new("Name", ScalarType::String))
        .with_member(MemberDef::one("Buyer", "User", "BuyerId"))
        .with_member(MemberDef::many("Details", "OrderDetail", "OrderId"));

    let detail = EntityMap::new("OrderDetail", "sys_order_detail")
        .with_member(MemberDef::new("Id", ScalarType::Int32).as_key())
        .with_member(MemberDef::new("OrderId", ScalarType::Int32))
        .with_member(MemberDef::new("Product", ScalarType::String))
        .with_member(MemberDef::new("Qty", ScalarType::Int32));

    let user = EntityMap::new("User", "sys_user")
        .with_member(MemberDef::new("Id", ScalarType::Int32).as_key())
        .with_member(MemberDef::new("Name", ScalarType::String));

    Arc::new(
        SchemaCatalog::new()
            .with_entity(order)
            .with_entity(detail)
            .with_entity(user),
    )
}

pub fn mysql_context() -> QueryContext {
    QueryContext::new(Arc::new(MySqlDialect), sales_schema())
}

/// A conjunction of `depth` randomized comparisons over one column.
pub fn deep_filter(depth: usize, seed: u64) -> Expr {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut expr = Expr::param(0).member("Amount").gt(rng.gen_range(0i32..100));
    for _ in 1..depth {
        expr = expr.and(
            Expr::param(0)
                .member("Amount")
                .lt(rng.gen_range(100i32..10_000)),
        );
    }
    expr
}

/// Flat order rows matching the default `Order` projection.
pub fn order_rows(count: usize) -> Vec<Vec<Value>> {
    (0..count)
        .map(|i| {
            vec![
                Value::Int32(i as i32),
                Value::Int32((i % 50) as i32),
                Value::Float64(i as f64 * 1.5),
                Value::String(format!("order-{i}")),
            ]
        })
        .collect()
}

/// Detail rows, two per order key.
pub fn detail_rows(order_count: usize) -> Vec<Vec<Value>> {
    let mut rows = Vec::with_capacity(order_count * 2);
    for i in 0..order_count {
        for j in 0..2 {
            rows.push(vec![
                Value::Int32((i * 2 + j) as i32),
                Value::Int32(i as i32),
                Value::String(format!("product-{j}")),
                Value::Int32(j as i32 + 1),
            ]);
        }
    }
    rows
}
