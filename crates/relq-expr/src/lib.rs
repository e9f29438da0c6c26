//! RELQ expression-tree types.
//!
//! This crate defines the passive data types the RELQ compiler consumes:
//! runtime values, the captured expression AST, and replayable sub-query
//! descriptions. It contains no SQL knowledge of its own.
//!
//! # Modules
//!
//! - [`value`] - Runtime values for constants, parameters, and row cells
//! - [`expr`] - The expression AST and its builder methods
//! - [`subquery`] - Recorded sub-query chains, join kinds, sort directions
//!
//! # Building expressions
//!
//! Trees are built with method chains rather than constructed variant by
//! variant. Parameters are positional table roots:
//!
//! ```
//! use relq_expr::Expr;
//!
//! // (order, user) => order.BuyerId == user.Id && user.Age > 30
//! let predicate = Expr::param(0)
//!     .member("BuyerId")
//!     .eq(Expr::param(1).member("Id"))
//!     .and(Expr::param(1).member("Age").gt(30));
//! # let _ = predicate;
//! ```

pub mod expr;
pub mod subquery;
pub mod value;

// Re-export commonly used types at crate root
pub use expr::{BinaryOp, CallExpr, Expr, InList, Method, UnaryOp};
pub use subquery::{JoinKind, OrderDirection, QueryOp, Subquery};
pub use value::Value;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expr_value_interop() {
        let e: Expr = 42i32.into();
        assert_eq!(e.as_value(), Some(&Value::Int32(42)));

        let e: Expr = Subquery::from("Order").into();
        assert!(matches!(e, Expr::Subquery(_)));
    }
}
