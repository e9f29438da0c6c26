//! Replayable sub-query descriptions.
//!
//! A [`Subquery`] is not SQL: it records a fluent clause chain as data, in
//! source order, so the compiler can replay it against a fresh child
//! statement wherever the sub-query is embedded (scalar comparison, `IN`
//! source, named table, union branch).

use serde::{Deserialize, Serialize};

use crate::expr::Expr;

/// Join kinds supported by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    /// `INNER JOIN`.
    Inner,
    /// `LEFT JOIN`.
    Left,
    /// `RIGHT JOIN`.
    Right,
}

impl JoinKind {
    /// The SQL keyword pair for this join kind.
    pub fn keyword(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
        }
    }
}

/// Sort direction for `ORDER BY` keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDirection {
    /// Ascending order.
    Asc,
    /// Descending order.
    Desc,
}

impl Default for OrderDirection {
    fn default() -> Self {
        OrderDirection::Asc
    }
}

/// One recorded clause of a sub-query chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryOp {
    /// Add a root table.
    From(String),
    /// Join another entity with an ON predicate.
    Join(JoinKind, String, Expr),
    /// Conjunctive filter.
    Where(Expr),
    /// Grouping keys.
    GroupBy(Expr),
    /// Post-grouping filter.
    Having(Expr),
    /// Ordering key.
    OrderBy(OrderDirection, Expr),
    /// Projection.
    Select(Expr),
    /// Distinct row set.
    Distinct,
}

/// A recorded sub-query: clauses in source order, replayed on embed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Subquery {
    /// The recorded clauses.
    pub ops: Vec<QueryOp>,
}

impl Subquery {
    /// Start a sub-query over a root entity.
    pub fn from(entity: impl Into<String>) -> Subquery {
        Subquery {
            ops: vec![QueryOp::From(entity.into())],
        }
    }

    /// Add another root entity.
    pub fn also_from(mut self, entity: impl Into<String>) -> Subquery {
        self.ops.push(QueryOp::From(entity.into()));
        self
    }

    /// Join an entity. Inside `on`, parameters index the sub-query's own
    /// tables in registration order.
    pub fn join(mut self, kind: JoinKind, entity: impl Into<String>, on: Expr) -> Subquery {
        self.ops.push(QueryOp::Join(kind, entity.into(), on));
        self
    }

    /// Conjunctive filter clause.
    pub fn filter(mut self, predicate: Expr) -> Subquery {
        self.ops.push(QueryOp::Where(predicate));
        self
    }

    /// Grouping keys.
    pub fn group_by(mut self, keys: Expr) -> Subquery {
        self.ops.push(QueryOp::GroupBy(keys));
        self
    }

    /// Post-grouping filter.
    pub fn having(mut self, predicate: Expr) -> Subquery {
        self.ops.push(QueryOp::Having(predicate));
        self
    }

    /// Ascending order key.
    pub fn order_by(mut self, key: Expr) -> Subquery {
        self.ops.push(QueryOp::OrderBy(OrderDirection::Asc, key));
        self
    }

    /// Descending order key.
    pub fn order_by_desc(mut self, key: Expr) -> Subquery {
        self.ops.push(QueryOp::OrderBy(OrderDirection::Desc, key));
        self
    }

    /// Projection clause.
    pub fn select(mut self, projection: Expr) -> Subquery {
        self.ops.push(QueryOp::Select(projection));
        self
    }

    /// Request a distinct row set.
    pub fn distinct(mut self) -> Subquery {
        self.ops.push(QueryOp::Distinct);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ops_record_in_source_order() {
        let q = Subquery::from("Order")
            .filter(Expr::param(0).member("Amount").gt(100))
            .group_by(Expr::param(0).member("BuyerId"))
            .select(Expr::param(0).member("BuyerId"));

        let kinds: Vec<_> = q
            .ops
            .iter()
            .map(|op| match op {
                QueryOp::From(_) => "from",
                QueryOp::Where(_) => "where",
                QueryOp::GroupBy(_) => "group_by",
                QueryOp::Select(_) => "select",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["from", "where", "group_by", "select"]);
    }

    #[test]
    fn test_join_keywords() {
        assert_eq!(JoinKind::Inner.keyword(), "INNER JOIN");
        assert_eq!(JoinKind::Left.keyword(), "LEFT JOIN");
        assert_eq!(JoinKind::Right.keyword(), "RIGHT JOIN");
    }
}
