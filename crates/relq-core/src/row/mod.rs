//! Result-set consumption: cursors, records, and materialization.

mod cursor;
mod materialize;
mod record;

pub use cursor::{MemoryCursor, RowCursor};
pub use materialize::Materializer;
pub use record::{EntityRecord, RecordValue};
