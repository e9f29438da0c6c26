//! Expression tree types consumed by the SQL compiler.
//!
//! An [`Expr`] is a fully-captured description of a predicate, projection,
//! or computed column: caller state is already evaluated into [`Value`]
//! constants, table roots are positional [`Expr::Param`] references, and
//! everything else is structural. The compiler dispatches over the closed
//! variant set; there is no reflection and no late binding.

use serde::{Deserialize, Serialize};

use crate::subquery::Subquery;
use crate::value::Value;

/// A node in a captured expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Pre-evaluated constant from caller state.
    Value(Value),
    /// Positional reference to a bound table root (lambda parameter).
    Param(usize),
    /// Member access on a base expression.
    Member {
        /// The receiver.
        base: Box<Expr>,
        /// The member name, as declared on the entity.
        member: String,
    },
    /// Unary operation.
    Unary {
        /// The operator.
        op: UnaryOp,
        /// The operand.
        operand: Box<Expr>,
    },
    /// Binary operation (arithmetic, comparison, logical, coalesce).
    Binary {
        /// The operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Method call with an optional receiver.
    Call(CallExpr),
    /// Membership test against a collection or sub-query.
    In {
        /// The tested expression.
        target: Box<Expr>,
        /// The candidate set.
        list: InList,
        /// True for `NOT IN`.
        negated: bool,
    },
    /// Correlated existence test against another entity.
    Exists {
        /// The probed entity name.
        entity: String,
        /// Predicate over (outer params..., probed entity).
        predicate: Box<Expr>,
        /// True for `NOT EXISTS`.
        negated: bool,
    },
    /// Two-armed conditional (`CASE WHEN`).
    Conditional {
        /// The boolean test.
        test: Box<Expr>,
        /// Value when the test holds.
        if_true: Box<Expr>,
        /// Value when the test fails.
        if_false: Box<Expr>,
    },
    /// Constructor projection: named members in declaration order.
    Object(Vec<(String, Expr)>),
    /// Inline collection construction.
    Collection(Vec<Expr>),
    /// Indexer access, constant-folded by the compiler.
    Index {
        /// The indexed expression.
        base: Box<Expr>,
        /// Zero-based element index.
        index: usize,
    },
    /// Reference to the current grouping key set.
    Grouping,
    /// Embedded sub-query, replayed by the compiler.
    Subquery(Box<Subquery>),
}

/// A method call node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallExpr {
    /// The called method.
    pub method: Method,
    /// The receiver, when the method has one.
    pub target: Option<Box<Expr>>,
    /// Positional arguments.
    pub args: Vec<Expr>,
}

/// The candidate set of an [`Expr::In`] test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InList {
    /// Captured constant collection.
    Values(Vec<Value>),
    /// Inline expression list.
    Exprs(Vec<Expr>),
    /// Sub-query producing the candidate column.
    Query(Box<Subquery>),
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Logical negation.
    Not,
    /// Arithmetic negation.
    Neg,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    /// Addition, or string concatenation over text operands.
    Add,
    /// Subtraction, or date difference over timestamp operands.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Remainder.
    Rem,
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Logical AND.
    And,
    /// Logical OR.
    Or,
    /// Null coalescing.
    Coalesce,
}

impl BinaryOp {
    /// True for `And`/`Or`.
    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    /// True for the six comparison operators.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Lt | BinaryOp::Le
        )
    }

    /// True for the five arithmetic operators.
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem
        )
    }

    /// The operator that holds after swapping the two operands.
    ///
    /// Used when normalizing a comparison so its field-backed side renders
    /// first: `5 < x` becomes `x > 5`.
    pub fn mirrored(self) -> BinaryOp {
        match self {
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::Ge => BinaryOp::Le,
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::Le => BinaryOp::Ge,
            other => other,
        }
    }
}

/// The closed set of translatable methods.
///
/// Scalar functions are formatted by the active dialect; `Contains`,
/// `StartsWith`, and `EndsWith` are rewritten into LIKE patterns by the
/// compiler; `IsSome` is the nullable test; the rest are aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    /// Uppercase a string.
    ToUpper,
    /// Lowercase a string.
    ToLower,
    /// Trim both ends of a string.
    Trim,
    /// Trim the start of a string.
    TrimStart,
    /// Trim the end of a string.
    TrimEnd,
    /// Substring: zero-based start offset, optional length.
    Substring,
    /// Replace occurrences of one string with another.
    Replace,
    /// Absolute value.
    Abs,
    /// Round up.
    Ceiling,
    /// Round down.
    Floor,
    /// Round to nearest.
    Round,
    /// Substring containment, compiled to LIKE.
    Contains,
    /// Prefix test, compiled to LIKE.
    StartsWith,
    /// Suffix test, compiled to LIKE.
    EndsWith,
    /// Nullable presence test.
    IsSome,
    /// Row count. `COUNT(*)` without a target, `COUNT(x)` with one.
    Count,
    /// Distinct count of a column.
    CountDistinct,
    /// Sum aggregate.
    Sum,
    /// Average aggregate.
    Avg,
    /// Maximum aggregate.
    Max,
    /// Minimum aggregate.
    Min,
}

impl Method {
    /// The method name as written at call sites, for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Method::ToUpper => "to_upper",
            Method::ToLower => "to_lower",
            Method::Trim => "trim",
            Method::TrimStart => "trim_start",
            Method::TrimEnd => "trim_end",
            Method::Substring => "substring",
            Method::Replace => "replace",
            Method::Abs => "abs",
            Method::Ceiling => "ceiling",
            Method::Floor => "floor",
            Method::Round => "round",
            Method::Contains => "contains",
            Method::StartsWith => "starts_with",
            Method::EndsWith => "ends_with",
            Method::IsSome => "is_some",
            Method::Count => "count",
            Method::CountDistinct => "count_distinct",
            Method::Sum => "sum",
            Method::Avg => "avg",
            Method::Max => "max",
            Method::Min => "min",
        }
    }

    /// True for the aggregate methods.
    pub fn is_aggregate(self) -> bool {
        matches!(
            self,
            Method::Count
                | Method::CountDistinct
                | Method::Sum
                | Method::Avg
                | Method::Max
                | Method::Min
        )
    }
}

impl Expr {
    /// A constant expression from any convertible value.
    pub fn value(v: impl Into<Value>) -> Expr {
        Expr::Value(v.into())
    }

    /// The null constant.
    pub fn null() -> Expr {
        Expr::Value(Value::Null)
    }

    /// A table-root reference by lambda-parameter position.
    pub fn param(index: usize) -> Expr {
        Expr::Param(index)
    }

    /// Member access on this expression.
    pub fn member(self, member: impl Into<String>) -> Expr {
        Expr::Member {
            base: Box::new(self),
            member: member.into(),
        }
    }

    /// Indexer access on this expression.
    pub fn index(self, index: usize) -> Expr {
        Expr::Index {
            base: Box::new(self),
            index,
        }
    }

    fn binary(self, op: BinaryOp, right: impl Into<Expr>) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(right.into()),
        }
    }

    /// `self == other`.
    pub fn eq(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Eq, other)
    }

    /// `self != other`.
    pub fn ne(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Ne, other)
    }

    /// `self > other`.
    pub fn gt(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Gt, other)
    }

    /// `self >= other`.
    pub fn ge(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Ge, other)
    }

    /// `self < other`.
    pub fn lt(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Lt, other)
    }

    /// `self <= other`.
    pub fn le(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Le, other)
    }

    /// `self AND other`.
    pub fn and(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::And, other)
    }

    /// `self OR other`.
    pub fn or(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Or, other)
    }

    /// `self + other` (concatenation over text operands).
    pub fn add(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Add, other)
    }

    /// `self - other` (date difference over timestamp operands).
    pub fn sub(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Sub, other)
    }

    /// `self * other`.
    pub fn mul(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Mul, other)
    }

    /// `self / other`.
    pub fn div(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Div, other)
    }

    /// `self % other`.
    pub fn rem(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Rem, other)
    }

    /// `COALESCE(self, other)`.
    pub fn coalesce(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Coalesce, other)
    }

    /// Logical negation.
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
        }
    }

    /// Arithmetic negation.
    #[allow(clippy::should_implement_trait)]
    pub fn neg(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Neg,
            operand: Box::new(self),
        }
    }

    fn call(method: Method, target: Option<Expr>, args: Vec<Expr>) -> Expr {
        Expr::Call(CallExpr {
            method,
            target: target.map(Box::new),
            args,
        })
    }

    /// Nullable presence test on this expression.
    pub fn is_some(self) -> Expr {
        Expr::call(Method::IsSome, Some(self), Vec::new())
    }

    /// `self IN (values...)` over a captured collection.
    pub fn in_values<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Expr {
        Expr::In {
            target: Box::new(self),
            list: InList::Values(values.into_iter().map(Into::into).collect()),
            negated: false,
        }
    }

    /// `self IN (exprs...)` over an inline expression list.
    pub fn in_exprs(self, exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::In {
            target: Box::new(self),
            list: InList::Exprs(exprs.into_iter().collect()),
            negated: false,
        }
    }

    /// `self IN (SELECT ...)`.
    pub fn in_query(self, query: Subquery) -> Expr {
        Expr::In {
            target: Box::new(self),
            list: InList::Query(Box::new(query)),
            negated: false,
        }
    }

    /// Flip an `In` or `Exists` node to its negated form.
    ///
    /// Any other node is wrapped in a logical `Not` instead.
    pub fn negated(self) -> Expr {
        match self {
            Expr::In {
                target,
                list,
                negated,
            } => Expr::In {
                target,
                list,
                negated: !negated,
            },
            Expr::Exists {
                entity,
                predicate,
                negated,
            } => Expr::Exists {
                entity,
                predicate,
                negated: !negated,
            },
            other => other.not(),
        }
    }

    /// Correlated `EXISTS` over `entity`.
    ///
    /// Inside `predicate`, parameters 0..n refer to the outer statement's
    /// tables in order and parameter n refers to the probed entity.
    pub fn exists(entity: impl Into<String>, predicate: Expr) -> Expr {
        Expr::Exists {
            entity: entity.into(),
            predicate: Box::new(predicate),
            negated: false,
        }
    }

    /// `CASE WHEN test THEN if_true ELSE if_false END`.
    pub fn when(test: Expr, if_true: impl Into<Expr>, if_false: impl Into<Expr>) -> Expr {
        Expr::Conditional {
            test: Box::new(test),
            if_true: Box::new(if_true.into()),
            if_false: Box::new(if_false.into()),
        }
    }

    /// Constructor projection from `(member, expression)` pairs.
    pub fn object<N: Into<String>>(members: impl IntoIterator<Item = (N, Expr)>) -> Expr {
        Expr::Object(
            members
                .into_iter()
                .map(|(name, expr)| (name.into(), expr))
                .collect(),
        )
    }

    /// Reference to the current grouping key set.
    pub fn grouping() -> Expr {
        Expr::Grouping
    }

    /// `to_upper()` on this expression.
    pub fn to_upper(self) -> Expr {
        Expr::call(Method::ToUpper, Some(self), Vec::new())
    }

    /// `to_lower()` on this expression.
    pub fn to_lower(self) -> Expr {
        Expr::call(Method::ToLower, Some(self), Vec::new())
    }

    /// `trim()` on this expression.
    pub fn trim(self) -> Expr {
        Expr::call(Method::Trim, Some(self), Vec::new())
    }

    /// `trim_start()` on this expression.
    pub fn trim_start(self) -> Expr {
        Expr::call(Method::TrimStart, Some(self), Vec::new())
    }

    /// `trim_end()` on this expression.
    pub fn trim_end(self) -> Expr {
        Expr::call(Method::TrimEnd, Some(self), Vec::new())
    }

    /// `abs()` on this expression.
    pub fn abs(self) -> Expr {
        Expr::call(Method::Abs, Some(self), Vec::new())
    }

    /// `ceiling()` on this expression.
    pub fn ceiling(self) -> Expr {
        Expr::call(Method::Ceiling, Some(self), Vec::new())
    }

    /// `floor()` on this expression.
    pub fn floor(self) -> Expr {
        Expr::call(Method::Floor, Some(self), Vec::new())
    }

    /// `round()` on this expression, with optional digit arguments applied
    /// through [`Expr::round_to`].
    pub fn round(self) -> Expr {
        Expr::call(Method::Round, Some(self), Vec::new())
    }

    /// `round(digits)` on this expression.
    pub fn round_to(self, digits: impl Into<Expr>) -> Expr {
        Expr::call(Method::Round, Some(self), vec![digits.into()])
    }

    /// Substring with a zero-based start offset and length.
    pub fn substring(self, start: impl Into<Expr>, len: impl Into<Expr>) -> Expr {
        Expr::call(Method::Substring, Some(self), vec![start.into(), len.into()])
    }

    /// Replace occurrences of `from` with `to`.
    pub fn replace(self, from: impl Into<Expr>, to: impl Into<Expr>) -> Expr {
        Expr::call(Method::Replace, Some(self), vec![from.into(), to.into()])
    }

    /// Substring containment test, compiled to LIKE.
    pub fn contains(self, needle: impl Into<Expr>) -> Expr {
        Expr::call(Method::Contains, Some(self), vec![needle.into()])
    }

    /// Prefix test, compiled to LIKE.
    pub fn starts_with(self, prefix: impl Into<Expr>) -> Expr {
        Expr::call(Method::StartsWith, Some(self), vec![prefix.into()])
    }

    /// Suffix test, compiled to LIKE.
    pub fn ends_with(self, suffix: impl Into<Expr>) -> Expr {
        Expr::call(Method::EndsWith, Some(self), vec![suffix.into()])
    }

    /// `COUNT(*)`.
    pub fn count() -> Expr {
        Expr::call(Method::Count, None, Vec::new())
    }

    /// `COUNT(expr)`.
    pub fn count_of(expr: Expr) -> Expr {
        Expr::call(Method::Count, None, vec![expr])
    }

    /// `COUNT(DISTINCT expr)`.
    pub fn count_distinct(expr: Expr) -> Expr {
        Expr::call(Method::CountDistinct, None, vec![expr])
    }

    /// `SUM(expr)`.
    pub fn sum(expr: Expr) -> Expr {
        Expr::call(Method::Sum, None, vec![expr])
    }

    /// `AVG(expr)`.
    pub fn avg(expr: Expr) -> Expr {
        Expr::call(Method::Avg, None, vec![expr])
    }

    /// `MAX(expr)`.
    pub fn max(expr: Expr) -> Expr {
        Expr::call(Method::Max, None, vec![expr])
    }

    /// `MIN(expr)`.
    pub fn min(expr: Expr) -> Expr {
        Expr::call(Method::Min, None, vec![expr])
    }

    /// True when this node is a constant.
    pub fn is_value(&self) -> bool {
        matches!(self, Expr::Value(_))
    }

    /// The constant value of this node, when it is one.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Expr::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Value> for Expr {
    fn from(v: Value) -> Self {
        Expr::Value(v)
    }
}

impl From<bool> for Expr {
    fn from(v: bool) -> Self {
        Expr::Value(Value::Bool(v))
    }
}

impl From<i32> for Expr {
    fn from(v: i32) -> Self {
        Expr::Value(Value::Int32(v))
    }
}

impl From<i64> for Expr {
    fn from(v: i64) -> Self {
        Expr::Value(Value::Int64(v))
    }
}

impl From<f64> for Expr {
    fn from(v: f64) -> Self {
        Expr::Value(Value::Float64(v))
    }
}

impl From<&str> for Expr {
    fn from(v: &str) -> Self {
        Expr::Value(Value::String(v.to_string()))
    }
}

impl From<String> for Expr {
    fn from(v: String) -> Self {
        Expr::Value(Value::String(v))
    }
}

impl From<Subquery> for Expr {
    fn from(q: Subquery) -> Self {
        Expr::Subquery(Box::new(q))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_chains() {
        let e = Expr::param(0).member("Name").eq("Kevin");
        match e {
            Expr::Binary { op, left, right } => {
                assert_eq!(op, BinaryOp::Eq);
                assert!(matches!(*left, Expr::Member { .. }));
                assert_eq!(*right, Expr::Value(Value::String("Kevin".into())));
            }
            other => panic!("unexpected expression: {other:?}"),
        }
    }

    #[test]
    fn test_negated_flips_in_place() {
        let e = Expr::param(0).member("Id").in_values([1, 2, 3]).negated();
        assert!(matches!(e, Expr::In { negated: true, .. }));

        let e = Expr::exists("Order", Expr::param(1).member("Amount").gt(0)).negated();
        assert!(matches!(e, Expr::Exists { negated: true, .. }));

        // Non-negatable nodes wrap in a logical Not instead.
        let e = Expr::param(0).member("IsEnabled").negated();
        assert!(matches!(
            e,
            Expr::Unary {
                op: UnaryOp::Not,
                ..
            }
        ));
    }

    #[test]
    fn test_mirrored_operators() {
        assert_eq!(BinaryOp::Gt.mirrored(), BinaryOp::Lt);
        assert_eq!(BinaryOp::Ge.mirrored(), BinaryOp::Le);
        assert_eq!(BinaryOp::Eq.mirrored(), BinaryOp::Eq);
        assert_eq!(BinaryOp::Add.mirrored(), BinaryOp::Add);
    }

    #[test]
    fn test_operator_classes() {
        assert!(BinaryOp::And.is_logical());
        assert!(!BinaryOp::Eq.is_logical());
        assert!(BinaryOp::Le.is_comparison());
        assert!(BinaryOp::Rem.is_arithmetic());
        assert!(!BinaryOp::Coalesce.is_arithmetic());
    }

    #[test]
    fn test_object_projection() {
        let e = Expr::object([
            ("Id", Expr::param(0).member("Id")),
            ("Total", Expr::sum(Expr::param(0).member("Amount"))),
        ]);
        match e {
            Expr::Object(members) => {
                assert_eq!(members.len(), 2);
                assert_eq!(members[0].0, "Id");
                assert!(matches!(members[1].1, Expr::Call(_)));
            }
            other => panic!("unexpected expression: {other:?}"),
        }
    }
}
