//! Column layout of the embedded backend and conversions between JSON row
//! values and SQLite values.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::query::{Row, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ColumnKind {
    /// UUID stored as text
    Id,
    Text,
    /// Boolean stored as 0/1
    Bool,
    /// RFC-3339 UTC string with fixed microsecond precision
    Timestamp,
}

/// What an insert uses when the payload omits a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ColumnDefault {
    Required,
    Null,
    NewId,
    Now,
    Bool(bool),
    Text(&'static str),
}

#[derive(Debug)]
pub(crate) struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub default: ColumnDefault,
}

const fn col(name: &'static str, kind: ColumnKind, default: ColumnDefault) -> Column {
    Column {
        name,
        kind,
        default,
    }
}

#[derive(Debug)]
pub(crate) struct TableSchema {
    pub table: Table,
    pub columns: &'static [Column],
}

use ColumnDefault::{NewId, Now, Null, Required};
use ColumnKind::{Id, Timestamp};

static PROFILES: TableSchema = TableSchema {
    table: Table::Profiles,
    columns: &[
        col("id", Id, Required),
        col("username", ColumnKind::Text, Null),
        col("full_name", ColumnKind::Text, Null),
        col("avatar_url", ColumnKind::Text, Null),
        col("bio", ColumnKind::Text, Null),
        col("created_at", Timestamp, Now),
        col("updated_at", Timestamp, Now),
    ],
};

static MESSAGES: TableSchema = TableSchema {
    table: Table::Messages,
    columns: &[
        col("id", Id, NewId),
        col("sender_id", Id, Required),
        col("receiver_id", Id, Required),
        col("content", ColumnKind::Text, Required),
        col("created_at", Timestamp, Now),
        col("updated_at", Timestamp, Now),
        col("seen", ColumnKind::Bool, ColumnDefault::Bool(false)),
    ],
};

static FRIENDS: TableSchema = TableSchema {
    table: Table::Friends,
    columns: &[
        col("id", Id, NewId),
        col("requester_id", Id, Required),
        col("addressee_id", Id, Required),
        col("status", ColumnKind::Text, ColumnDefault::Text("pending")),
        col("created_at", Timestamp, Now),
        col("updated_at", Timestamp, Now),
    ],
};

static POSTS: TableSchema = TableSchema {
    table: Table::Posts,
    columns: &[
        col("id", Id, NewId),
        col("user_id", Id, Required),
        col("content", ColumnKind::Text, Required),
        col("image_url", ColumnKind::Text, Null),
        col("created_at", Timestamp, Now),
        col("updated_at", Timestamp, Now),
    ],
};

static LIKES: TableSchema = TableSchema {
    table: Table::Likes,
    columns: &[
        col("id", Id, NewId),
        col("post_id", Id, Required),
        col("user_id", Id, Required),
        col("created_at", Timestamp, Now),
    ],
};

static COMMENTS: TableSchema = TableSchema {
    table: Table::Comments,
    columns: &[
        col("id", Id, NewId),
        col("post_id", Id, Required),
        col("user_id", Id, Required),
        col("content", ColumnKind::Text, Required),
        col("created_at", Timestamp, Now),
        col("updated_at", Timestamp, Now),
    ],
};

pub(crate) fn schema_for(table: Table) -> &'static TableSchema {
    match table {
        Table::Profiles => &PROFILES,
        Table::Messages => &MESSAGES,
        Table::Friends => &FRIENDS,
        Table::Posts => &POSTS,
        Table::Likes => &LIKES,
        Table::Comments => &COMMENTS,
    }
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Result<&'static Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| StoreError::UnknownColumn {
                table: self.table.name(),
                column: name.to_string(),
            })
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| c.name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Value an insert uses for a column the payload left out.  Every
    /// `Now` column of one insert gets the same `now`.
    pub fn default_value(&self, column: &Column, now: DateTime<Utc>) -> Result<Value> {
        Ok(match column.default {
            Required => {
                return Err(StoreError::MissingColumn {
                    table: self.table.name(),
                    column: column.name.to_string(),
                })
            }
            Null => Value::Null,
            NewId => Value::String(Uuid::new_v4().to_string()),
            Now => Value::String(timestamp_string(now)),
            ColumnDefault::Bool(b) => Value::Bool(b),
            ColumnDefault::Text(s) => Value::String(s.to_string()),
        })
    }

    /// Decode one SQLite result row, selected with [`Self::column_list`].
    pub fn read_row(&self, row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
        let mut out = Row::new();
        for (idx, column) in self.columns.iter().enumerate() {
            let value = match column.kind {
                ColumnKind::Bool => {
                    let raw: Option<i64> = row.get(idx)?;
                    raw.map(|v| Value::Bool(v != 0)).unwrap_or(Value::Null)
                }
                Id | ColumnKind::Text | Timestamp => {
                    let raw: Option<String> = row.get(idx)?;
                    raw.map(Value::String).unwrap_or(Value::Null)
                }
            };
            out.insert(column.name.to_string(), value);
        }
        Ok(out)
    }
}

/// Canonical timestamp rendering.  Fixed width, so string order is time order.
pub fn timestamp_string(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Convert a JSON value into the SQLite representation of `column`.
pub(crate) fn to_sql_value(column: &Column, value: &Value) -> Result<SqlValue> {
    let invalid = |reason: &str| StoreError::InvalidValue {
        column: column.name.to_string(),
        reason: reason.to_string(),
    };

    if value.is_null() {
        return Ok(SqlValue::Null);
    }

    match column.kind {
        Id => {
            let s = value.as_str().ok_or_else(|| invalid("expected a UUID string"))?;
            let id = Uuid::parse_str(s).map_err(|_| invalid("malformed UUID"))?;
            Ok(SqlValue::Text(id.to_string()))
        }
        ColumnKind::Text => value
            .as_str()
            .map(|s| SqlValue::Text(s.to_string()))
            .ok_or_else(|| invalid("expected a string")),
        ColumnKind::Bool => match value {
            Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
            Value::Number(n) => match n.as_i64() {
                Some(0) => Ok(SqlValue::Integer(0)),
                Some(1) => Ok(SqlValue::Integer(1)),
                _ => Err(invalid("expected a boolean")),
            },
            _ => Err(invalid("expected a boolean")),
        },
        Timestamp => {
            let s = value
                .as_str()
                .ok_or_else(|| invalid("expected an RFC-3339 string"))?;
            let ts = DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc);
            Ok(SqlValue::Text(timestamp_string(ts)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timestamps_are_normalised() {
        let column = MESSAGES.column("created_at").unwrap();
        let value = to_sql_value(column, &json!("2024-05-01T12:00:00+02:00")).unwrap();
        assert_eq!(
            value,
            SqlValue::Text("2024-05-01T10:00:00.000000Z".to_string())
        );
    }

    #[test]
    fn booleans_become_integers() {
        let column = MESSAGES.column("seen").unwrap();
        assert_eq!(to_sql_value(column, &json!(true)).unwrap(), SqlValue::Integer(1));
        assert!(to_sql_value(column, &json!("yes")).is_err());
    }

    #[test]
    fn unknown_column_is_rejected() {
        assert!(matches!(
            MESSAGES.column("body"),
            Err(StoreError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn now_defaults_share_the_insert_instant() {
        let now = Utc::now();
        let created = MESSAGES.column("created_at").unwrap();
        let updated = MESSAGES.column("updated_at").unwrap();
        assert_eq!(
            MESSAGES.default_value(created, now).unwrap(),
            MESSAGES.default_value(updated, now).unwrap()
        );
        assert_eq!(
            MESSAGES.default_value(created, now).unwrap(),
            Value::String(timestamp_string(now))
        );
    }

    #[test]
    fn required_columns_have_no_default() {
        let column = MESSAGES.column("content").unwrap();
        assert!(matches!(
            MESSAGES.default_value(column, Utc::now()),
            Err(StoreError::MissingColumn { .. })
        ));
    }
}
