//! Result fields: the projected shape of a statement.

use std::hash::{Hash, Hasher};

use super::table::TableId;

/// What a result field stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// One output column.
    Scalar,
    /// A nested entity materialized from a run of columns.
    Entity,
    /// A named bundle of heterogeneous fields (projected object).
    Bundle,
}

/// One node of the projected result tree.
///
/// Scalar leaves carry the select-list text and an output ordinal; entity
/// and bundle nodes carry children. The tree doubles as the materialization
/// plan: ordinals are assigned depth-first by [`ResultShape::number_leaves`].
#[derive(Debug, Clone)]
pub struct ResultField {
    /// Node kind.
    pub kind: FieldKind,
    /// Select-list text, for leaves.
    pub sql: Option<String>,
    /// Child fields, for entity and bundle nodes.
    pub children: Vec<ResultField>,
    /// Source binding, when the node maps one.
    pub table: Option<TableId>,
    /// Mapped entity name, for entity nodes.
    pub entity: Option<String>,
    /// Originating member name, for bare column leaves.
    pub from_member: Option<String>,
    /// Name of the field on the materialized record.
    pub target_member: String,
    /// Output column position, for leaves.
    pub ordinal: usize,
    /// True for leaves backing a key member.
    pub key: bool,
    /// True when the select list must append `AS target`.
    pub aliased: bool,
}

impl ResultField {
    /// A scalar leaf.
    pub fn scalar(sql: String, target: impl Into<String>) -> Self {
        Self {
            kind: FieldKind::Scalar,
            sql: Some(sql),
            children: Vec::new(),
            table: None,
            entity: None,
            from_member: None,
            target_member: target.into(),
            ordinal: 0,
            key: false,
            aliased: false,
        }
    }

    /// An entity node.
    pub fn entity(target: impl Into<String>, table: TableId, children: Vec<ResultField>) -> Self {
        Self {
            kind: FieldKind::Entity,
            sql: None,
            children,
            table: Some(table),
            entity: None,
            from_member: None,
            target_member: target.into(),
            ordinal: 0,
            key: false,
            aliased: false,
        }
    }

    /// A bundle node.
    pub fn bundle(target: impl Into<String>, children: Vec<ResultField>) -> Self {
        Self {
            kind: FieldKind::Bundle,
            sql: None,
            children,
            table: None,
            entity: None,
            from_member: None,
            target_member: target.into(),
            ordinal: 0,
            key: false,
            aliased: false,
        }
    }

    /// Record the mapped entity name.
    pub fn of_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    /// Mark the leaf as backing a key member.
    pub fn as_key(mut self) -> Self {
        self.key = true;
        self
    }

    /// Record the originating member.
    pub fn from(mut self, member: impl Into<String>) -> Self {
        self.from_member = Some(member.into());
        self
    }

    /// Request an `AS` alias in the select list.
    pub fn with_alias(mut self) -> Self {
        self.aliased = true;
        self
    }

    fn hash_into<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.target_member.hash(state);
        self.from_member.hash(state);
        self.table.hash(state);
        self.entity.hash(state);
        self.key.hash(state);
        self.children.len().hash(state);
        for child in &self.children {
            child.hash_into(state);
        }
    }
}

/// The full projected shape of one statement.
#[derive(Debug, Clone, Default)]
pub struct ResultShape {
    /// Top-level fields.
    pub fields: Vec<ResultField>,
}

impl ResultShape {
    /// Build a shape and number its leaves.
    pub fn new(fields: Vec<ResultField>) -> Self {
        let mut shape = Self { fields };
        shape.number_leaves();
        shape
    }

    /// Assign output ordinals depth-first.
    pub fn number_leaves(&mut self) {
        fn walk(fields: &mut [ResultField], next: &mut usize) {
            for field in fields {
                if field.kind == FieldKind::Scalar {
                    field.ordinal = *next;
                    *next += 1;
                } else {
                    walk(&mut field.children, next);
                }
            }
        }
        let mut next = 0usize;
        walk(&mut self.fields, &mut next);
    }

    /// All scalar leaves, in output order.
    pub fn leaves(&self) -> Vec<&ResultField> {
        fn walk<'a>(fields: &'a [ResultField], out: &mut Vec<&'a ResultField>) {
            for field in fields {
                if field.kind == FieldKind::Scalar {
                    out.push(field);
                } else {
                    walk(&field.children, out);
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.fields, &mut out);
        out
    }

    /// Number of output columns.
    pub fn column_count(&self) -> usize {
        self.leaves().len()
    }

    /// Structural fingerprint, stable across identical shapes.
    ///
    /// Hashes node kinds, member names, binding indices, and nesting; the
    /// select-list text is deliberately excluded so two statements that
    /// project the same structure share one materialization plan.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.fields.len().hash(&mut hasher);
        for field in &self.fields {
            field.hash_into(&mut hasher);
        }
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ResultShape {
        ResultShape::new(vec![
            ResultField::entity(
                "Order",
                0,
                vec![
                    ResultField::scalar("a.Id".into(), "Id").from("Id").as_key(),
                    ResultField::scalar("a.Amount".into(), "Amount").from("Amount"),
                ],
            ),
            ResultField::scalar("b.Name".into(), "Name").from("Name"),
        ])
    }

    #[test]
    fn test_leaves_numbered_depth_first() {
        let shape = sample();
        let leaves = shape.leaves();
        assert_eq!(leaves.len(), 3);
        assert_eq!(leaves[0].ordinal, 0);
        assert_eq!(leaves[0].target_member, "Id");
        assert_eq!(leaves[2].ordinal, 2);
        assert_eq!(leaves[2].target_member, "Name");
    }

    #[test]
    fn test_fingerprint_ignores_sql_text() {
        let a = sample();
        let mut b = sample();
        for field in &mut b.fields {
            if let Some(sql) = &mut field.sql {
                *sql = sql.replace("b.", "t9.");
            }
        }
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_sees_structure() {
        let a = sample();
        let b = ResultShape::new(vec![ResultField::scalar("a.Id".into(), "Id").from("Id")]);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
