//! Smoke test against the public facade: build a statement, feed rows
//! through a cursor, and serialize the materialized record.

use std::sync::Arc;

use relq::expr::{Expr, Value};
use relq::{
    EntityMap, Materializer, MemberDef, MemoryCursor, MySqlDialect, QueryBuilder, QueryContext,
    ScalarType, SchemaCatalog,
};

fn catalog() -> Arc<SchemaCatalog> {
    Arc::new(
        SchemaCatalog::new().with_entity(
            EntityMap::new("Order", "sys_order")
                .with_member(MemberDef::new("Id", ScalarType::Int32).as_key())
                .with_member(MemberDef::new("Name", ScalarType::String))
                .with_member(MemberDef::new("Amount", ScalarType::Float64)),
        ),
    )
}

#[test]
fn test_build_materialize_serialize() {
    let ctx = QueryContext::new(Arc::new(MySqlDialect), catalog());
    let stmt = QueryBuilder::new(ctx)
        .from("Order")
        .unwrap()
        .filter(&Expr::param(0).member("Amount").gt(10))
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT Id,Name,Amount FROM sys_order WHERE Amount>10"
    );

    let reader = Materializer::for_shape("Order", &stmt.shape);
    let mut cursor = MemoryCursor::new(vec![vec![
        Value::Int32(1),
        Value::String("rope".into()),
        Value::Float64(12.5),
    ]]);
    let rows = reader.read_rows(&mut cursor).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].scalar("Name"), Some(&Value::String("rope".into())));

    // Records serialize as ordered maps; values keep their type tags.
    let json = serde_json::to_string(&rows[0]).unwrap();
    assert_eq!(
        json,
        r#"{"Id":{"Int32":1},"Name":{"String":"rope"},"Amount":{"Float64":12.5}}"#
    );
}
