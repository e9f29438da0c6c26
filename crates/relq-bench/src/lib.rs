//! RELQ Benchmark Suite
//!
//! Criterion benchmarks for the statement compiler.
//!
//! # Benchmark Categories
//!
//! - **Compile**: expression walking and statement assembly at varying
//!   predicate depth, join count, and clause mix
//! - **Cache**: effectiveness of the process-wide compilation caches
//!   (materializers, include fetch headers, key appenders, binders)

pub mod fixtures;

pub use fixtures::{deep_filter, detail_rows, mysql_context, order_rows, sales_schema};
