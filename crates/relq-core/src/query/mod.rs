//! Statement assembly: the expression walker, the query and insert
//! builders, and the process-wide compilation caches.

mod builder;
pub(crate) mod cache;
pub(crate) mod field;
mod include;
mod insert;
mod segment;
mod table;
mod walker;

pub use builder::{QueryBuilder, SqlStatement};
pub use cache::{cache_snapshot, CacheSnapshot, CacheStats};
pub use field::{FieldKind, ResultField, ResultShape};
pub use include::IncludeStatement;
pub use insert::InsertBuilder;
pub use segment::SqlParam;
pub use table::{TableBinding, TableId};
pub use walker::QueryContext;
