//! Entity-to-table mapping metadata.
//!
//! The schema module answers one question for the compiler: given an entity
//! name and a member name, which table, column, type, and navigation does it
//! stand for.

mod catalog;
mod entity;
mod member;
mod types;

pub use catalog::SchemaCatalog;
pub use entity::EntityMap;
pub use member::{Cardinality, MemberDef, NavigationDef};
pub use types::ScalarType;
