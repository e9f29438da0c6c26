//! Scalar column types.

use relq_expr::Value;

/// Scalar type of a mapped column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    /// Boolean.
    Bool,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 32-bit floating point.
    Float32,
    /// 64-bit floating point.
    Float64,
    /// UTF-8 string.
    String,
    /// Binary data.
    Bytes,
    /// Timestamp, microseconds since Unix epoch.
    Timestamp,
    /// UUID.
    Uuid,
}

impl ScalarType {
    /// The scalar type of a runtime value, when it has one.
    ///
    /// `Null` and `List` values carry no scalar type of their own.
    pub fn of_value(value: &Value) -> Option<ScalarType> {
        match value {
            Value::Null | Value::List(_) => None,
            Value::Bool(_) => Some(ScalarType::Bool),
            Value::Int32(_) => Some(ScalarType::Int32),
            Value::Int64(_) => Some(ScalarType::Int64),
            Value::Float32(_) => Some(ScalarType::Float32),
            Value::Float64(_) => Some(ScalarType::Float64),
            Value::String(_) => Some(ScalarType::String),
            Value::Bytes(_) => Some(ScalarType::Bytes),
            Value::Timestamp(_) => Some(ScalarType::Timestamp),
            Value::Uuid(_) => Some(ScalarType::Uuid),
        }
    }

    /// True for the four numeric types.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ScalarType::Int32 | ScalarType::Int64 | ScalarType::Float32 | ScalarType::Float64
        )
    }

    /// True for string columns.
    pub fn is_text(self) -> bool {
        matches!(self, ScalarType::String)
    }

    /// Display name used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            ScalarType::Bool => "bool",
            ScalarType::Int32 => "int32",
            ScalarType::Int64 => "int64",
            ScalarType::Float32 => "float32",
            ScalarType::Float64 => "float64",
            ScalarType::String => "string",
            ScalarType::Bytes => "bytes",
            ScalarType::Timestamp => "timestamp",
            ScalarType::Uuid => "uuid",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_of_value() {
        assert_eq!(
            ScalarType::of_value(&Value::String("x".into())),
            Some(ScalarType::String)
        );
        assert_eq!(ScalarType::of_value(&Value::Int64(1)), Some(ScalarType::Int64));
        assert_eq!(ScalarType::of_value(&Value::Null), None);
        assert_eq!(ScalarType::of_value(&Value::List(vec![])), None);
    }

    #[test]
    fn test_type_classes() {
        assert!(ScalarType::Float32.is_numeric());
        assert!(!ScalarType::String.is_numeric());
        assert!(ScalarType::String.is_text());
        assert!(!ScalarType::Bytes.is_text());
    }
}
