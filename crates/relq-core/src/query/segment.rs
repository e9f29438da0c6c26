//! Value segments: the intermediate result of visiting one expression node.

use relq_expr::Value;

use crate::schema::ScalarType;

use super::table::TableId;

/// A bound statement parameter.
///
/// `name` is the placeholder exactly as it appears in the SQL text
/// (`@p0`, `$1`, `@Name`).
#[derive(Debug, Clone, PartialEq)]
pub struct SqlParam {
    /// Placeholder text.
    pub name: String,
    /// Bound value.
    pub value: Value,
}

impl SqlParam {
    /// Create a parameter.
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Deferred operator kinds queued on a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredKind {
    /// Comparison against a target value.
    Equal,
    /// Logical negation.
    Not,
    /// Conjunction (reserved; the walker currently queues only Equal/Not).
    And,
    /// Disjunction (reserved).
    Or,
}

/// One deferred operation.
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredOp {
    /// The operation kind.
    pub kind: DeferredKind,
    /// The comparison target, for `Equal`.
    pub value: Option<Value>,
}

/// The visited form of one expression node.
///
/// A segment carries either a not-yet-rendered literal (`value`) or rendered
/// SQL text (`sql`), never both meaningfully at once; `render` in the walker
/// converts the former into the latter, applying the parameterization
/// policy. Boolean context is handled lazily through the `deferred` stack:
/// nullable tests and boolean folds queue operations here, and resolution
/// happens only when the segment lands in a condition position.
#[derive(Debug, Clone, Default)]
pub struct SqlSegment {
    /// Rendered SQL text, once known.
    pub sql: Option<String>,
    /// Unrendered literal constant.
    pub value: Option<Value>,
    /// True when a mapped column participates anywhere in this segment.
    pub has_field: bool,
    /// True once the segment was bound as a parameter.
    pub is_param: bool,
    /// True when the rendered text is a composed expression rather than a
    /// bare column reference.
    pub is_expression: bool,
    /// True when the rendered text is operator-joined at its top level and
    /// needs parentheses when embedded as an operand.
    pub infix: bool,
    /// True when the segment denotes a whole table binding.
    pub entity_ref: bool,
    /// Owning binding, for columns and entity references.
    pub table: Option<TableId>,
    /// Originating member name, for columns.
    pub member: Option<String>,
    /// Scalar type, when statically known.
    pub scalar: Option<ScalarType>,
    /// Whether the underlying column admits NULL.
    pub nullable: bool,
    /// Deferred boolean operations, LIFO.
    pub deferred: Vec<DeferredOp>,
}

impl SqlSegment {
    /// A literal constant segment.
    pub fn literal(value: Value) -> Self {
        let scalar = ScalarType::of_value(&value);
        Self {
            value: Some(value),
            scalar,
            ..Default::default()
        }
    }

    /// A bare column segment.
    pub fn column(
        sql: String,
        table: TableId,
        member: impl Into<String>,
        scalar: Option<ScalarType>,
        nullable: bool,
    ) -> Self {
        Self {
            sql: Some(sql),
            has_field: true,
            table: Some(table),
            member: Some(member.into()),
            scalar,
            nullable,
            ..Default::default()
        }
    }

    /// A composed expression segment.
    pub fn expression(sql: String, has_field: bool) -> Self {
        Self {
            sql: Some(sql),
            has_field,
            is_expression: true,
            ..Default::default()
        }
    }

    /// A whole-binding reference.
    pub fn entity(table: TableId) -> Self {
        Self {
            entity_ref: true,
            table: Some(table),
            ..Default::default()
        }
    }

    /// Set the scalar type.
    pub fn with_scalar(mut self, scalar: Option<ScalarType>) -> Self {
        self.scalar = scalar;
        self
    }

    /// Mark the rendered text as operator-joined.
    pub fn as_infix(mut self) -> Self {
        self.infix = true;
        self
    }

    /// Rendered text. Call only after the walker has rendered the segment.
    pub fn text(&self) -> &str {
        self.sql.as_deref().unwrap_or_default()
    }

    /// True when this is a column reference with nothing queued on it.
    pub fn is_bare_field(&self) -> bool {
        self.has_field && !self.is_expression && self.deferred.is_empty()
    }

    /// Queue a deferred negation.
    pub fn push_not(&mut self) {
        self.deferred.push(DeferredOp {
            kind: DeferredKind::Not,
            value: None,
        });
    }

    /// Queue a deferred comparison target.
    pub fn push_equal(&mut self, value: Value) {
        self.deferred.push(DeferredOp {
            kind: DeferredKind::Equal,
            value: Some(value),
        });
    }

    /// Resolve the deferred stack into a comparison target and polarity.
    ///
    /// Operations pop LIFO until the first `Equal`, which supplies the
    /// target (`Bool(true)` when the stack holds none); `Not`s count along
    /// the way, and an odd count flips the comparison. Returns
    /// `(target, flipped)` and leaves the stack empty.
    pub fn resolve_deferred(&mut self) -> (Value, bool) {
        let mut nots = 0usize;
        let mut target = None;
        while let Some(op) = self.deferred.pop() {
            match op.kind {
                DeferredKind::Not => nots += 1,
                DeferredKind::Equal => {
                    target = op.value;
                    break;
                }
                DeferredKind::And | DeferredKind::Or => {}
            }
        }
        self.deferred.clear();
        (target.unwrap_or(Value::Bool(true)), nots % 2 == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_defaults_to_true() {
        let mut seg = SqlSegment::column("a.IsEnabled".into(), 0, "IsEnabled", None, false);
        let (target, flipped) = seg.resolve_deferred();
        assert_eq!(target, Value::Bool(true));
        assert!(!flipped);
    }

    #[test]
    fn test_single_not_flips() {
        let mut seg = SqlSegment::column("a.IsEnabled".into(), 0, "IsEnabled", None, false);
        seg.push_not();
        let (target, flipped) = seg.resolve_deferred();
        assert_eq!(target, Value::Bool(true));
        assert!(flipped);
    }

    #[test]
    fn test_double_not_is_identity() {
        let mut seg = SqlSegment::column("a.IsEnabled".into(), 0, "IsEnabled", None, false);
        seg.push_not();
        seg.push_not();
        let (target, flipped) = seg.resolve_deferred();
        assert_eq!(target, Value::Bool(true));
        assert!(!flipped);
    }

    #[test]
    fn test_nullable_presence_resolution() {
        // is_some() queues Equal(Null) then Not: one Not above the target
        // reads back as IS NOT NULL.
        let mut seg = SqlSegment::column("a.Remark".into(), 0, "Remark", None, true);
        seg.push_equal(Value::Null);
        seg.push_not();
        let (target, flipped) = seg.resolve_deferred();
        assert_eq!(target, Value::Null);
        assert!(flipped);

        // A logical Not around is_some() lands back on IS NULL.
        let mut seg = SqlSegment::column("a.Remark".into(), 0, "Remark", None, true);
        seg.push_equal(Value::Null);
        seg.push_not();
        seg.push_not();
        let (target, flipped) = seg.resolve_deferred();
        assert_eq!(target, Value::Null);
        assert!(!flipped);
    }

    #[test]
    fn test_stack_drained_after_resolution() {
        let mut seg = SqlSegment::column("a.X".into(), 0, "X", None, false);
        seg.push_not();
        seg.push_equal(Value::Null);
        let _ = seg.resolve_deferred();
        assert!(seg.deferred.is_empty());
    }
}
