//! Generic row operations used by the embedded backend.
//!
//! Rows go in and out as JSON objects; [`crate::schema`] maps them onto the
//! SQLite columns.  Every statement is parameterised, column names are
//! checked against the table layout before they reach SQL.

use std::collections::HashMap;

use chrono::Utc;
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::query::{Embed, Filter, Row, Select, Table};
use crate::schema::{schema_for, timestamp_string, to_sql_value, TableSchema};

impl Database {
    /// Rows matching `query`, ordered and with embeds resolved.
    pub fn select_rows(&self, query: &Select) -> Result<Vec<Row>> {
        let schema = schema_for(query.table);
        let mut params = Vec::new();
        let mut sql = format!("SELECT {} FROM {}", schema.column_list(), schema.table.name());

        if let Some(filter) = &query.filter {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause(schema, filter, &mut params)?);
        }

        let mut order = Vec::with_capacity(query.order.len() + 1);
        for o in &query.order {
            let column = schema.column(&o.column)?;
            let dir = if o.ascending { "ASC" } else { "DESC" };
            order.push(format!("{} {dir}", column.name));
        }
        // Insertion order breaks ties.
        order.push("rowid ASC".to_string());
        sql.push_str(" ORDER BY ");
        sql.push_str(&order.join(", "));

        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut rows = self.query_rows(schema, &sql, &params)?;
        self.resolve_embeds(query.table, &mut rows, &query.embeds)?;
        Ok(rows)
    }

    /// Insert one row, filling defaults for omitted columns.  Returns the
    /// stored row without embeds.
    pub fn insert_row(&self, table: Table, mut row: Row) -> Result<Row> {
        let schema = schema_for(table);
        for key in row.keys() {
            schema.column(key)?;
        }

        let now = Utc::now();
        let mut names = Vec::with_capacity(schema.columns.len());
        let mut params = Vec::with_capacity(schema.columns.len());
        for column in schema.columns {
            let value = match row.remove(column.name) {
                Some(v) => v,
                None => schema.default_value(column, now)?,
            };
            names.push(column.name);
            params.push(to_sql_value(column, &value)?);
        }

        let id = match params.first() {
            Some(SqlValue::Text(id)) => id.clone(),
            _ => {
                return Err(StoreError::InvalidValue {
                    column: "id".to_string(),
                    reason: "row identity must not be null".to_string(),
                })
            }
        };

        let placeholders = vec!["?"; names.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            table.name(),
            names.join(", ")
        );
        self.conn().execute(&sql, params_from_iter(params.iter()))?;

        self.row_by_id(schema, &id)
    }

    /// Apply `patch` to every row matching `filter`.  `updated_at` is bumped
    /// unless the patch sets it.  Returns the rows as they are afterwards.
    pub fn update_rows(&self, table: Table, filter: &Filter, mut patch: Row) -> Result<Vec<Row>> {
        let schema = schema_for(table);
        let ids = self.matching_ids(schema, filter)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        if schema.has_column("updated_at") && !patch.contains_key("updated_at") {
            patch.insert(
                "updated_at".to_string(),
                Value::String(timestamp_string(Utc::now())),
            );
        }

        let mut sets = Vec::with_capacity(patch.len());
        let mut params = Vec::with_capacity(patch.len() + ids.len());
        for (key, value) in &patch {
            let column = schema.column(key)?;
            if column.name == "id" {
                return Err(StoreError::InvalidValue {
                    column: "id".to_string(),
                    reason: "row identity cannot be changed".to_string(),
                });
            }
            sets.push(format!("{} = ?", column.name));
            params.push(to_sql_value(column, value)?);
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE id IN ({placeholders})",
            table.name(),
            sets.join(", ")
        );
        params.extend(ids.iter().cloned().map(SqlValue::Text));
        self.conn().execute(&sql, params_from_iter(params.iter()))?;

        self.rows_by_ids(schema, &ids)
    }

    /// Delete every row matching `filter` and return them as they were.
    pub fn delete_rows(&self, table: Table, filter: &Filter) -> Result<Vec<Row>> {
        let schema = schema_for(table);
        let ids = self.matching_ids(schema, filter)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let removed = self.rows_by_ids(schema, &ids)?;
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("DELETE FROM {} WHERE id IN ({placeholders})", table.name());
        self.conn().execute(&sql, params_from_iter(ids.iter()))?;
        Ok(removed)
    }

    pub fn count_rows(&self, table: Table, filter: &Filter) -> Result<u64> {
        let schema = schema_for(table);
        let mut params = Vec::new();
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            table.name(),
            where_clause(schema, filter, &mut params)?
        );
        let count: i64 = self
            .conn()
            .query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Attach each embed to every row: the referenced profile as an object,
    /// or `null` when the foreign key is null or dangling.
    pub fn resolve_embeds(&self, table: Table, rows: &mut [Row], embeds: &[Embed]) -> Result<()> {
        if embeds.is_empty() || rows.is_empty() {
            return Ok(());
        }
        let schema = schema_for(table);
        let profiles = schema_for(Table::Profiles);
        let mut cache: HashMap<String, Value> = HashMap::new();

        for embed in embeds {
            schema.column(embed.foreign_key)?;
            for row in rows.iter_mut() {
                let resolved = match row.get(embed.foreign_key).and_then(Value::as_str) {
                    Some(id) => match cache.get(id) {
                        Some(hit) => hit.clone(),
                        None => {
                            let found = match self.row_by_id(profiles, id) {
                                Ok(profile) => Value::Object(profile),
                                Err(StoreError::NotFound) => Value::Null,
                                Err(e) => return Err(e),
                            };
                            cache.insert(id.to_string(), found.clone());
                            found
                        }
                    },
                    None => Value::Null,
                };
                row.insert(embed.alias.to_string(), resolved);
            }
        }
        Ok(())
    }

    fn query_rows(&self, schema: &TableSchema, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| schema.read_row(row))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn row_by_id(&self, schema: &TableSchema, id: &str) -> Result<Row> {
        self.rows_by_ids(schema, &[id.to_string()])?
            .into_iter()
            .next()
            .ok_or(StoreError::NotFound)
    }

    fn rows_by_ids(&self, schema: &TableSchema, ids: &[String]) -> Result<Vec<Row>> {
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM {} WHERE id IN ({placeholders}) ORDER BY rowid ASC",
            schema.column_list(),
            schema.table.name()
        );
        let params: Vec<SqlValue> = ids.iter().cloned().map(SqlValue::Text).collect();
        self.query_rows(schema, &sql, &params)
    }

    fn matching_ids(&self, schema: &TableSchema, filter: &Filter) -> Result<Vec<String>> {
        let mut params = Vec::new();
        let sql = format!(
            "SELECT id FROM {} WHERE {} ORDER BY rowid ASC",
            schema.table.name(),
            where_clause(schema, filter, &mut params)?
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let ids = stmt.query_map(params_from_iter(params.iter()), |row| row.get::<_, String>(0))?;

        let mut out = Vec::new();
        for id in ids {
            out.push(id?);
        }
        Ok(out)
    }
}

/// Render `filter` as a SQL boolean expression, pushing its parameters.
fn where_clause(schema: &TableSchema, filter: &Filter, params: &mut Vec<SqlValue>) -> Result<String> {
    Ok(match filter {
        Filter::Eq(name, value) => {
            let column = schema.column(name)?;
            if value.is_null() {
                format!("{} IS NULL", column.name)
            } else {
                params.push(to_sql_value(column, value)?);
                format!("{} = ?", column.name)
            }
        }
        Filter::In(name, values) => {
            let column = schema.column(name)?;
            if values.is_empty() {
                "0".to_string()
            } else {
                for value in values {
                    params.push(to_sql_value(column, value)?);
                }
                format!("{} IN ({})", column.name, vec!["?"; values.len()].join(", "))
            }
        }
        Filter::And(filters) => join(schema, filters, " AND ", "1", params)?,
        Filter::Or(filters) => join(schema, filters, " OR ", "0", params)?,
    })
}

fn join(
    schema: &TableSchema,
    filters: &[Filter],
    op: &str,
    empty: &str,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    if filters.is_empty() {
        return Ok(empty.to_string());
    }
    let parts = filters
        .iter()
        .map(|f| where_clause(schema, f, params))
        .collect::<Result<Vec<_>>>()?;
    Ok(format!("({})", parts.join(op)))
}
