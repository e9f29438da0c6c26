//! RELQ - an expression-tree-to-SQL query compiler.
//!
//! This crate is the public face of the workspace: it re-exports the
//! compiler from [`relq_core`] and the expression types from
//! [`relq_expr`]. RELQ turns captured expression trees into complete
//! SQL statements - SELECT with joins, grouping, pagination, unions,
//! and navigation includes, or INSERT ... SELECT projections - without
//! ever opening a connection itself. Callers execute the rendered
//! statements on their own driver and feed the rows back through a
//! [`RowCursor`] to materialize nested records.
//!
//! # Quick start
//!
//! ```
//! use std::sync::Arc;
//!
//! use relq::expr::Expr;
//! use relq::{
//!     EntityMap, MemberDef, MySqlDialect, QueryBuilder, QueryContext, ScalarType,
//!     SchemaCatalog,
//! };
//!
//! # fn main() -> relq::Result<()> {
//! let schema = Arc::new(
//!     SchemaCatalog::new().with_entity(
//!         EntityMap::new("Order", "sys_order")
//!             .with_member(MemberDef::new("Id", ScalarType::Int32).as_key())
//!             .with_member(MemberDef::new("Name", ScalarType::String))
//!             .with_member(MemberDef::new("Amount", ScalarType::Float64)),
//!     ),
//! );
//! let ctx = QueryContext::new(Arc::new(MySqlDialect), schema);
//!
//! let wanted = "rope";
//! let stmt = QueryBuilder::new(ctx)
//!     .from("Order")?
//!     .filter(&Expr::param(0).member("Amount").gt(100))?
//!     .filter(&Expr::param(0).member("Name").eq(wanted))?
//!     .build()?;
//!
//! // Integers inline; strings always bind.
//! assert_eq!(
//!     stmt.sql,
//!     "SELECT Id,Name,Amount FROM sys_order WHERE Amount>100 AND Name=@p0"
//! );
//! assert_eq!(stmt.params[0].name, "@p0");
//! # Ok(())
//! # }
//! ```
//!
//! The compiler itself lives in [`relq_core`]; see its module docs for
//! the schema, dialect, query, and row layers.

pub use relq_core::{dialect, error, query, row, schema};

pub use relq_core::{
    cache_snapshot, CacheSnapshot, CacheStats, Cardinality, Dialect, EntityMap, EntityRecord,
    Error, FieldKind, IncludeStatement, InsertBuilder, Materializer, MemberDef, MemoryCursor,
    MySqlDialect, NavigationDef, PostgresDialect, QueryBuilder, QueryContext, RecordValue,
    Result, ResultField, ResultShape, RowCursor, ScalarType, SchemaCatalog, SqlParam,
    SqlStatement, TableBinding, TableId,
};

/// Re-export the expression-tree types.
pub use relq_expr as expr;
