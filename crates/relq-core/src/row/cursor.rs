//! Row cursors over executed result sets.

use relq_expr::Value;

use crate::error::{Error, Result};

/// Positional access to the result sets of an executed statement.
///
/// A cursor starts before the first row of the first result set.
/// Implementations wrap whatever the database driver hands back; the
/// engine itself never executes anything.
pub trait RowCursor {
    /// Advance to the next row of the current result set.
    fn advance(&mut self) -> Result<bool>;

    /// The value at a zero-based column position of the current row.
    fn value(&self, pos: usize) -> Result<Value>;

    /// Advance to the next result set, false when there is none. The
    /// cursor lands before that set's first row.
    fn next_result(&mut self) -> Result<bool>;
}

/// An in-memory cursor over pre-collected rows.
#[derive(Debug, Default)]
pub struct MemoryCursor {
    sets: Vec<Vec<Vec<Value>>>,
    set: usize,
    row: Option<usize>,
}

impl MemoryCursor {
    /// A cursor over a single result set.
    pub fn new(rows: Vec<Vec<Value>>) -> Self {
        Self::with_sets(vec![rows])
    }

    /// A cursor over several result sets in order.
    pub fn with_sets(sets: Vec<Vec<Vec<Value>>>) -> Self {
        Self {
            sets,
            set: 0,
            row: None,
        }
    }
}

impl RowCursor for MemoryCursor {
    fn advance(&mut self) -> Result<bool> {
        let next = self.row.map_or(0, |row| row + 1);
        let within = self
            .sets
            .get(self.set)
            .is_some_and(|rows| next < rows.len());
        if within {
            self.row = Some(next);
        }
        Ok(within)
    }

    fn value(&self, pos: usize) -> Result<Value> {
        let row = self
            .row
            .ok_or_else(|| Error::cursor("cursor is not positioned on a row"))?;
        self.sets
            .get(self.set)
            .and_then(|rows| rows.get(row))
            .and_then(|columns| columns.get(pos))
            .cloned()
            .ok_or_else(|| Error::cursor(format!("no column at position {pos}")))
    }

    fn next_result(&mut self) -> Result<bool> {
        if self.set + 1 < self.sets.len() {
            self.set += 1;
            self.row = None;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iterates_rows_then_sets() {
        let mut cursor = MemoryCursor::with_sets(vec![
            vec![vec![Value::Int32(1)], vec![Value::Int32(2)]],
            vec![vec![Value::Int32(3)]],
        ]);
        assert!(cursor.advance().unwrap());
        assert_eq!(cursor.value(0).unwrap(), Value::Int32(1));
        assert!(cursor.advance().unwrap());
        assert_eq!(cursor.value(0).unwrap(), Value::Int32(2));
        assert!(!cursor.advance().unwrap());

        assert!(cursor.next_result().unwrap());
        assert!(cursor.advance().unwrap());
        assert_eq!(cursor.value(0).unwrap(), Value::Int32(3));
        assert!(!cursor.next_result().unwrap());
    }

    #[test]
    fn test_value_before_advance_is_an_error() {
        let cursor = MemoryCursor::new(vec![vec![Value::Int32(1)]]);
        assert!(cursor.value(0).is_err());
    }
}
