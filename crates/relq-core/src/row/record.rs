//! Materialized records.

use relq_expr::Value;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// A field value inside a materialized record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    /// A scalar column value.
    Scalar(Value),
    /// A nested single record (joined entity or computed object).
    Record(EntityRecord),
    /// A related record set attached by an include fetch.
    Records(Vec<EntityRecord>),
}

impl RecordValue {
    /// The scalar inside, when this is one.
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            RecordValue::Scalar(v) => Some(v),
            _ => None,
        }
    }

    /// True for a `Scalar(Null)`.
    pub fn is_null(&self) -> bool {
        matches!(self, RecordValue::Scalar(Value::Null))
    }
}

/// An ordered, named record produced by materialization.
///
/// Field order follows the projected shape, so serialization and
/// iteration are deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    entity: String,
    fields: Vec<(String, RecordValue)>,
}

impl EntityRecord {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            fields: Vec::new(),
        }
    }

    /// The entity (or synthetic shape) name this record carries.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Set a field, replacing any previous value of the same name.
    pub fn set(&mut self, member: &str, value: RecordValue) {
        match self.fields.iter_mut().find(|(name, _)| name == member) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((member.to_string(), value)),
        }
    }

    pub fn get(&self, member: &str) -> Option<&RecordValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == member)
            .map(|(_, value)| value)
    }

    pub fn get_mut(&mut self, member: &str) -> Option<&mut RecordValue> {
        self.fields
            .iter_mut()
            .find(|(name, _)| name == member)
            .map(|(_, value)| value)
    }

    /// The scalar value of a field, when present and scalar.
    pub fn scalar(&self, member: &str) -> Option<&Value> {
        self.get(member).and_then(RecordValue::as_scalar)
    }

    /// Fields in projected order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &RecordValue)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    /// Walk a dotted member path through nested records.
    pub fn get_path(&self, path: &str) -> Option<&RecordValue> {
        let mut parts = path.split('.');
        let mut current = self.get(parts.next()?)?;
        for part in parts {
            match current {
                RecordValue::Record(record) => current = record.get(part)?,
                _ => return None,
            }
        }
        Some(current)
    }

    /// Set a field at a dotted member path. Every intermediate step must
    /// already be a record; returns whether the set landed.
    pub fn set_path(&mut self, path: &str, value: RecordValue) -> bool {
        match path.rsplit_once('.') {
            None => {
                self.set(path, value);
                true
            }
            Some((prefix, leaf)) => {
                let mut current = self;
                for part in prefix.split('.') {
                    match current.get_mut(part) {
                        Some(RecordValue::Record(record)) => current = record,
                        _ => return false,
                    }
                }
                current.set(leaf, value);
                true
            }
        }
    }
}

impl Serialize for EntityRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl Serialize for RecordValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RecordValue::Scalar(v) => v.serialize(serializer),
            RecordValue::Record(r) => r.serialize(serializer),
            RecordValue::Records(rs) => rs.serialize(serializer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> EntityRecord {
        let mut record = EntityRecord::new("Order");
        record.set("Id", RecordValue::Scalar(Value::Int32(7)));
        let mut buyer = EntityRecord::new("User");
        buyer.set("Name", RecordValue::Scalar(Value::String("Ada".into())));
        record.set("Buyer", RecordValue::Record(buyer));
        record
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut record = order();
        record.set("Id", RecordValue::Scalar(Value::Int32(8)));
        assert_eq!(record.len(), 2);
        assert_eq!(record.scalar("Id"), Some(&Value::Int32(8)));
        // Order preserved: Id stays first.
        assert_eq!(record.fields().next().unwrap().0, "Id");
    }

    #[test]
    fn test_path_access() {
        let mut record = order();
        assert_eq!(
            record.get_path("Buyer.Name").and_then(RecordValue::as_scalar),
            Some(&Value::String("Ada".into()))
        );
        assert!(record.set_path("Buyer.Age", RecordValue::Scalar(Value::Int32(36))));
        assert_eq!(
            record.get_path("Buyer.Age").and_then(RecordValue::as_scalar),
            Some(&Value::Int32(36))
        );
        // A scalar in the middle of the path refuses the set.
        assert!(!record.set_path("Id.Nested", RecordValue::Scalar(Value::Null)));
        assert!(record.get_path("Buyer.Missing").is_none());
    }

    #[test]
    fn test_serializes_as_ordered_map() {
        let json = serde_json::to_string(&order()).unwrap();
        assert!(json.starts_with("{\"Id\""));
        assert!(json.contains("\"Buyer\":{\"Name\""));
    }
}
