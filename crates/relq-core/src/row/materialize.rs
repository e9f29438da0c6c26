//! Materialization plans: projected shapes back into records.

use std::sync::Arc;

use relq_expr::Value;

use crate::error::Result;
use crate::query::cache::{self, READERS};
use crate::query::field::{FieldKind, ResultField, ResultShape};

use super::cursor::RowCursor;
use super::record::{EntityRecord, RecordValue};

/// A compiled reader turning cursor rows into records of one shape.
///
/// The plan mirrors the shape's nesting. Entity nodes carry probe
/// positions: when every probed column of a row is NULL (a LEFT JOIN
/// that found nothing), the node collapses to a null field instead of a
/// record of nulls. Probes prefer projected key columns and fall back
/// to every column of the node.
#[derive(Debug)]
pub struct Materializer {
    entity: String,
    plan: Vec<PlanNode>,
    columns: usize,
}

#[derive(Debug)]
enum PlanNode {
    Leaf {
        member: String,
        ordinal: usize,
    },
    Node {
        member: String,
        entity: String,
        children: Vec<PlanNode>,
        probe: Vec<usize>,
    },
}

impl Materializer {
    /// Compile a plan for a shape. `entity` names the produced records.
    pub fn for_shape(entity: impl Into<String>, shape: &ResultShape) -> Self {
        Self {
            entity: entity.into(),
            plan: build_nodes(&shape.fields),
            columns: shape.column_count(),
        }
    }

    /// Fetch or compile the shared plan for a shape.
    pub fn cached(entity: &str, shape: &ResultShape) -> Arc<Materializer> {
        let key = cache::fingerprint(|hasher| {
            use std::hash::Hash;
            entity.hash(hasher);
            shape.fingerprint().hash(hasher);
        });
        READERS.get_or_insert_with(key, || Arc::new(Self::for_shape(entity, shape)))
    }

    /// Columns each row is expected to carry.
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Materialize the cursor's current row.
    pub fn read_row(&self, cursor: &dyn RowCursor) -> Result<EntityRecord> {
        let mut record = EntityRecord::new(&self.entity);
        for node in &self.plan {
            let (member, value) = read_node(node, cursor)?;
            record.set(member, value);
        }
        Ok(record)
    }

    /// Materialize the remaining rows of the current result set.
    pub fn read_rows(&self, cursor: &mut dyn RowCursor) -> Result<Vec<EntityRecord>> {
        let mut rows = Vec::new();
        while cursor.advance()? {
            rows.push(self.read_row(cursor)?);
        }
        Ok(rows)
    }
}

fn read_node<'p>(node: &'p PlanNode, cursor: &dyn RowCursor) -> Result<(&'p str, RecordValue)> {
    match node {
        PlanNode::Leaf { member, ordinal } => {
            Ok((member, RecordValue::Scalar(cursor.value(*ordinal)?)))
        }
        PlanNode::Node {
            member,
            entity,
            children,
            probe,
        } => {
            let mut all_null = !probe.is_empty();
            for pos in probe {
                if !cursor.value(*pos)?.is_null() {
                    all_null = false;
                    break;
                }
            }
            if all_null {
                return Ok((member, RecordValue::Scalar(Value::Null)));
            }
            let mut record = EntityRecord::new(entity);
            for child in children {
                let (child_member, value) = read_node(child, cursor)?;
                record.set(child_member, value);
            }
            Ok((member, RecordValue::Record(record)))
        }
    }
}

fn build_nodes(fields: &[ResultField]) -> Vec<PlanNode> {
    fields
        .iter()
        .map(|field| match field.kind {
            FieldKind::Scalar => PlanNode::Leaf {
                member: field.target_member.clone(),
                ordinal: field.ordinal,
            },
            _ => PlanNode::Node {
                member: field.target_member.clone(),
                entity: field
                    .entity
                    .clone()
                    .unwrap_or_else(|| field.target_member.clone()),
                children: build_nodes(&field.children),
                // Computed bundles never collapse.
                probe: if field.kind == FieldKind::Entity {
                    probe_ordinals(&field.children)
                } else {
                    Vec::new()
                },
            },
        })
        .collect()
}

fn probe_ordinals(children: &[ResultField]) -> Vec<usize> {
    fn collect(fields: &[ResultField], keys_only: bool, out: &mut Vec<usize>) {
        for field in fields {
            match field.kind {
                FieldKind::Scalar if !keys_only || field.key => out.push(field.ordinal),
                FieldKind::Scalar => {}
                _ => collect(&field.children, keys_only, out),
            }
        }
    }
    let mut keys = Vec::new();
    collect(children, true, &mut keys);
    if !keys.is_empty() {
        return keys;
    }
    let mut all = Vec::new();
    collect(children, false, &mut all);
    all
}

#[cfg(test)]
mod tests {
    use super::super::cursor::MemoryCursor;
    use super::*;

    fn order_with_buyer() -> ResultShape {
        let mut id = ResultField::scalar("Id".into(), "Id");
        id.key = true;
        let name = ResultField::scalar("Name".into(), "Name");
        let mut buyer_id = ResultField::scalar("b.Id".into(), "Id");
        buyer_id.key = true;
        let buyer_name = ResultField::scalar("b.Name".into(), "Name");
        let buyer =
            ResultField::entity("Buyer", 1, vec![buyer_id, buyer_name]).of_entity("User");
        ResultShape::new(vec![id, name, buyer])
    }

    #[test]
    fn test_nested_record_from_row() {
        let plan = Materializer::for_shape("Order", &order_with_buyer());
        assert_eq!(plan.columns(), 4);
        let mut cursor = MemoryCursor::new(vec![vec![
            Value::Int32(1),
            Value::String("grain".into()),
            Value::Int32(9),
            Value::String("Ada".into()),
        ]]);
        assert!(cursor.advance().unwrap());
        let record = plan.read_row(&cursor).unwrap();
        assert_eq!(record.entity(), "Order");
        assert_eq!(record.scalar("Id"), Some(&Value::Int32(1)));
        assert_eq!(
            record.get_path("Buyer.Name").and_then(RecordValue::as_scalar),
            Some(&Value::String("Ada".into()))
        );
        match record.get("Buyer") {
            Some(RecordValue::Record(buyer)) => assert_eq!(buyer.entity(), "User"),
            other => panic!("expected nested record, got {other:?}"),
        }
    }

    #[test]
    fn test_unmatched_left_join_collapses_to_null() {
        let plan = Materializer::for_shape("Order", &order_with_buyer());
        let mut cursor = MemoryCursor::new(vec![vec![
            Value::Int32(1),
            Value::String("grain".into()),
            Value::Null,
            Value::Null,
        ]]);
        assert!(cursor.advance().unwrap());
        let record = plan.read_row(&cursor).unwrap();
        assert!(record.get("Buyer").is_some_and(RecordValue::is_null));
    }

    #[test]
    fn test_key_probe_beats_incidental_nulls() {
        // Buyer key present, name NULL: still a record.
        let plan = Materializer::for_shape("Order", &order_with_buyer());
        let mut cursor = MemoryCursor::new(vec![vec![
            Value::Int32(1),
            Value::Null,
            Value::Int32(9),
            Value::Null,
        ]]);
        assert!(cursor.advance().unwrap());
        let record = plan.read_row(&cursor).unwrap();
        assert!(matches!(record.get("Buyer"), Some(RecordValue::Record(_))));
    }

    #[test]
    fn test_read_rows_drains_the_set() {
        let plan = Materializer::for_shape(
            "Order",
            &ResultShape::new(vec![ResultField::scalar("Id".into(), "Id")]),
        );
        let mut cursor = MemoryCursor::new(vec![
            vec![Value::Int32(1)],
            vec![Value::Int32(2)],
            vec![Value::Int32(3)],
        ]);
        let rows = plan.read_rows(&mut cursor).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].scalar("Id"), Some(&Value::Int32(3)));
    }

    #[test]
    fn test_cached_plans_share() {
        let shape = order_with_buyer();
        let a = Materializer::cached("Order", &shape);
        let b = Materializer::cached("Order", &shape);
        assert!(Arc::ptr_eq(&a, &b));
    }
}
