use std::fmt;

use crate::models::Value;

/// Identity of a stored record (its `db_id`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(i64);

impl RecordId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<RecordId> for Value {
    fn from(id: RecordId) -> Self {
        Value::Integer(id.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One row, as an ordered mapping of column name to value in the table's
/// full column order.
#[derive(Debug, Clone, PartialEq)]
pub struct Record(Vec<(&'static str, Value)>);

impl Record {
    pub(crate) fn new(values: Vec<(&'static str, Value)>) -> Self {
        Self(values)
    }

    /// Value of the named column, `None` if the table has no such column.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.iter().find(|(name, _)| *name == column).map(|(_, value)| value)
    }

    /// The record's identity, when the identity column was read.
    pub fn id(&self) -> Option<RecordId> {
        self.get("db_id").and_then(Value::as_i64).map(RecordId)
    }

    pub fn columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.iter().map(|(name, _)| *name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.0.iter().map(|(name, value)| (*name, value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl IntoIterator for Record {
    type Item = (&'static str, Value);
    type IntoIter = std::vec::IntoIter<(&'static str, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_lookup() {
        let record = Record::new(vec![("db_id", Value::Integer(7)), ("title_key", Value::Text("wolf".into()))]);
        assert_eq!(record.id(), Some(RecordId::new(7)));
        assert_eq!(record.get("title_key").and_then(Value::as_str), Some("wolf"));
        assert_eq!(record.get("nope"), None);
        assert_eq!(record.columns().collect::<Vec<_>>(), ["db_id", "title_key"]);
    }
}
