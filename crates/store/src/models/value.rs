use exn::ResultExt;
use sqlx::Row;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use time::UtcDateTime;

use crate::error::{ErrorKind, Result};
use crate::schema::{ColumnDef, ColumnKind};

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;


/// A single column value, as written to or read from a record table.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Bool(bool),
    Text(String),
    Timestamp(UtcDateTime),
    TextList(Vec<String>),
}

impl Value {
    /// The column kind this value can be stored in. `None` for
    /// [`Value::Null`], which fits any column.
    pub fn kind(&self) -> Option<ColumnKind> {
        match self {
            Self::Null => None,
            Self::Integer(_) => Some(ColumnKind::Integer),
            Self::Bool(_) => Some(ColumnKind::Bool),
            Self::Text(_) => Some(ColumnKind::Text),
            Self::Timestamp(_) => Some(ColumnKind::Timestamp),
            Self::TextList(_) => Some(ColumnKind::TextList),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<UtcDateTime> {
        match self {
            Self::Timestamp(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::TextList(value) => Some(value),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<UtcDateTime> for Value {
    fn from(value: UtcDateTime) -> Self {
        Self::Timestamp(value)
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Self::TextList(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Integer Unix nanoseconds, the on-disk form of timestamps. Covers
/// 1677-09-21 to 2262-04-11.
fn to_unix_nanos(value: UtcDateTime) -> Option<i64> {
    i64::try_from(value.unix_timestamp_nanos()).ok()
}

fn from_unix_nanos(nanos: i64) -> Option<UtcDateTime> {
    UtcDateTime::from_unix_timestamp_nanos(i128::from(nanos)).ok()
}

/// Bind one value as the next query parameter.
pub(crate) fn bind<'q>(query: SqliteQuery<'q>, value: &Value) -> Result<SqliteQuery<'q>> {
    Ok(match value {
        Value::Null => query.bind(None::<String>),
        Value::Integer(value) => query.bind(*value),
        Value::Bool(value) => query.bind(*value),
        Value::Text(value) => query.bind(value.clone()),
        Value::Timestamp(value) => {
            let nanos = to_unix_nanos(*value)
                .ok_or_else(|| exn::Exn::from(ErrorKind::invalid(format!("timestamp {value} out of range"))))?;
            query.bind(nanos)
        },
        Value::TextList(value) => {
            query.bind(serde_json::to_string(value).or_raise(|| ErrorKind::InvalidData("text list"))?)
        },
    })
}

/// Read one column of a row according to its declared kind.
pub(crate) fn decode(row: &SqliteRow, column: &ColumnDef) -> Result<Value> {
    let name = column.name;
    let invalid = || ErrorKind::InvalidData(name);
    let value = match column.kind {
        ColumnKind::Integer => row.try_get::<Option<i64>, _>(name).or_raise(invalid)?.into(),
        ColumnKind::Bool => row.try_get::<Option<bool>, _>(name).or_raise(invalid)?.into(),
        ColumnKind::Text => row.try_get::<Option<String>, _>(name).or_raise(invalid)?.into(),
        ColumnKind::Timestamp => match row.try_get::<Option<i64>, _>(name).or_raise(invalid)? {
            Some(nanos) => Value::Timestamp(from_unix_nanos(nanos).ok_or_else(|| exn::Exn::from(invalid()))?),
            None => Value::Null,
        },
        ColumnKind::TextList => match row.try_get::<Option<String>, _>(name).or_raise(invalid)? {
            Some(json) => Value::TextList(serde_json::from_str(&json).or_raise(invalid)?),
            None => Value::Null,
        },
    };
    Ok(value)
}
