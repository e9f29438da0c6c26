//! RELQ Core - Expression compilation, statement assembly, and row
//! materialization.
//!
//! This crate turns captured expression trees into dialect-specific SQL.
//! It never talks to a database: callers hand the rendered statements to
//! their driver and hand the resulting rows back through a [`RowCursor`].
//!
//! The pieces compose in one direction:
//!
//! - [`schema`] declares entities, columns, keys, and navigations
//! - [`dialect`] isolates the SQL differences between backends
//! - [`query`] walks expression trees and assembles statements
//! - [`row`] materializes executed rows back into nested records

pub mod dialect;
pub mod error;
pub mod query;
pub mod row;
pub mod schema;

pub use dialect::{Dialect, MySqlDialect, PostgresDialect};
pub use error::{Error, Result};
pub use query::{
    cache_snapshot, CacheSnapshot, CacheStats, FieldKind, IncludeStatement, InsertBuilder,
    QueryBuilder, QueryContext, ResultField, ResultShape, SqlParam, SqlStatement, TableBinding,
    TableId,
};
pub use row::{EntityRecord, Materializer, MemoryCursor, RecordValue, RowCursor};
pub use schema::{Cardinality, EntityMap, MemberDef, NavigationDef, ScalarType, SchemaCatalog};

/// Re-export the expression-tree types.
pub use relq_expr as expr;
