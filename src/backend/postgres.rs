//! Postgres backend over sqlx.
//!
//! Reads come back as jsonb (`to_jsonb`) so every table shares the same
//! record shape as the document backend; writes go through
//! `jsonb_populate_record` so column types are resolved by the database.
//! Identifier names are validated before they are spliced into SQL; values
//! are always bound.

use crate::backend::{Record, StorageBackend};
use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use std::future::Future;
use std::time::Duration;

lazy_static! {
    static ref IDENTIFIER_RE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex");
}

pub struct PgBackend {
    pool: PgPool,
    timeout: Duration,
}

impl PgBackend {
    pub async fn connect(database_url: &str, timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(timeout)
            .connect(database_url)
            .await
            .map_err(|e| AssistantError::Execution(format!("Database connection failed: {}", e)))?;

        Ok(Self { pool, timeout })
    }

    async fn with_timeout<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(AssistantError::Execution(format!("Database error: {}", e))),
            Err(_) => Err(AssistantError::Timeout("database call timed out".to_string())),
        }
    }

    async fn columns(&self, entity: &str) -> Result<Vec<String>> {
        ensure_identifier(entity)?;
        let rows = self
            .with_timeout(
                sqlx::query(
                    "SELECT column_name::text AS name FROM information_schema.columns \
                     WHERE table_schema = 'public' AND table_name = $1",
                )
                .bind(entity)
                .fetch_all(&self.pool),
            )
            .await?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("name")
                    .map_err(|e| AssistantError::Execution(format!("Database error: {}", e)))
            })
            .collect()
    }
}

#[async_trait]
impl StorageBackend for PgBackend {
    async fn list_entities(&self) -> Result<Vec<String>> {
        let rows = self
            .with_timeout(
                sqlx::query(
                    "SELECT table_name::text AS name FROM information_schema.tables \
                     WHERE table_schema = 'public' AND table_type = 'BASE TABLE' \
                     ORDER BY table_name",
                )
                .fetch_all(&self.pool),
            )
            .await?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("name")
                    .map_err(|e| AssistantError::Execution(format!("Database error: {}", e)))
            })
            .collect()
    }

    async fn sample(&self, entity: &str) -> Result<Option<Record>> {
        ensure_identifier(entity)?;
        let sql = format!("SELECT to_jsonb(t) AS doc FROM {} t LIMIT 1", entity);
        let row = self
            .with_timeout(sqlx::query(&sql).fetch_optional(&self.pool))
            .await?;

        match row {
            Some(row) => Ok(Some(decode_doc(&row)?)),
            None => Ok(None),
        }
    }

    async fn find(&self, entity: &str, filter: &Record, limit: Option<i64>) -> Result<Vec<Record>> {
        ensure_identifier(entity)?;
        let (clauses, binds) = where_clauses(filter, 1)?;

        let mut sql = format!("SELECT to_jsonb(t) AS doc FROM {} t", entity);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit.max(0)));
        }

        let mut query = sqlx::query(&sql);
        for value in &binds {
            query = bind_scalar(query, value);
        }

        let rows = self.with_timeout(query.fetch_all(&self.pool)).await?;
        rows.iter().map(decode_doc).collect()
    }

    async fn insert(&self, entity: &str, record: Record) -> Result<Record> {
        ensure_identifier(entity)?;
        let sql = format!(
            "INSERT INTO {e} AS t SELECT * FROM jsonb_populate_record(NULL::{e}, $1) \
             RETURNING to_jsonb(t) AS doc",
            e = entity
        );

        let row = self
            .with_timeout(
                sqlx::query(&sql)
                    .bind(Value::Object(record))
                    .fetch_one(&self.pool),
            )
            .await?;
        decode_doc(&row)
    }

    async fn update_field(
        &self,
        entity: &str,
        filter: &Record,
        field: &str,
        value: Value,
    ) -> Result<u64> {
        ensure_identifier(entity)?;
        ensure_identifier(field)?;
        let columns = self.columns(entity).await?;
        if !columns.iter().any(|c| c == field) {
            return Err(AssistantError::SchemaMismatch(format!(
                "Unknown column `{}` on `{}`",
                field, entity
            )));
        }

        let (clauses, binds) = where_clauses(filter, 2)?;
        let mut sql = format!(
            "UPDATE {e} AS t SET {f} = r.{f} FROM jsonb_populate_record(NULL::{e}, $1) r",
            e = entity,
            f = field
        );
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        let patch = serde_json::json!({ field: value });
        let mut query = sqlx::query(&sql).bind(patch);
        for value in &binds {
            query = bind_scalar(query, value);
        }

        let result = self.with_timeout(query.execute(&self.pool)).await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, entity: &str, filter: &Record) -> Result<u64> {
        ensure_identifier(entity)?;
        let (clauses, binds) = where_clauses(filter, 1)?;
        if clauses.is_empty() {
            return Err(AssistantError::Execution(
                "Refusing to delete without a filter".to_string(),
            ));
        }

        let sql = format!(
            "DELETE FROM {} AS t WHERE {}",
            entity,
            clauses.join(" AND ")
        );
        let mut query = sqlx::query(&sql);
        for value in &binds {
            query = bind_scalar(query, value);
        }

        let result = self.with_timeout(query.execute(&self.pool)).await?;
        Ok(result.rows_affected())
    }
}

fn ensure_identifier(name: &str) -> Result<()> {
    if IDENTIFIER_RE.is_match(name) {
        Ok(())
    } else {
        Err(AssistantError::Execution(format!(
            "Invalid identifier `{}` for the SQL backend",
            name
        )))
    }
}

/// Build `WHERE` clauses for a scalar equality filter. Columns are cast so
/// text binds compare against dates and numerics without per-column type
/// lookups.
fn where_clauses(filter: &Record, first_placeholder: usize) -> Result<(Vec<String>, Vec<Value>)> {
    let mut clauses = Vec::new();
    let mut binds = Vec::new();

    for (index, (key, value)) in filter.iter().enumerate() {
        ensure_identifier(key)?;
        let placeholder = first_placeholder + index;
        match value {
            Value::String(_) => clauses.push(format!("t.{}::text = ${}", key, placeholder)),
            Value::Number(_) => clauses.push(format!("t.{}::float8 = ${}", key, placeholder)),
            Value::Bool(_) => clauses.push(format!("t.{} = ${}", key, placeholder)),
            _ => {
                return Err(AssistantError::Execution(format!(
                    "Filter operators are not supported by the SQL backend (key `{}`)",
                    key
                )))
            }
        }
        binds.push(value.clone());
    }

    Ok((clauses, binds))
}

fn bind_scalar<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::String(s) => query.bind(s.clone()),
        Value::Number(n) => query.bind(n.as_f64().unwrap_or(0.0)),
        Value::Bool(b) => query.bind(*b),
        _ => query,
    }
}

fn decode_doc(row: &sqlx::postgres::PgRow) -> Result<Record> {
    let doc: Value = row
        .try_get("doc")
        .map_err(|e| AssistantError::Execution(format!("Database error: {}", e)))?;
    match doc {
        Value::Object(record) => Ok(record),
        other => Err(AssistantError::Execution(format!(
            "Expected a JSON object row, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_validation() {
        assert!(ensure_identifier("recipes").is_ok());
        assert!(ensure_identifier("food_prices").is_ok());
        assert!(ensure_identifier("drop table; --").is_err());
        assert!(ensure_identifier("nutrition.protein_g").is_err());
        assert!(ensure_identifier("").is_err());
    }

    #[test]
    fn test_where_clauses_reject_operator_objects() {
        let filter: Record =
            serde_json::from_str(r#"{"calories": {"$lt": 500}}"#).unwrap();
        assert!(where_clauses(&filter, 1).is_err());
    }

    #[test]
    fn test_where_clauses_number_placeholders() {
        let filter: Record =
            serde_json::from_str(r#"{"market": "Nairobi", "price": 62.0}"#).unwrap();
        let (clauses, binds) = where_clauses(&filter, 2).unwrap();
        assert_eq!(clauses.len(), 2);
        assert_eq!(binds.len(), 2);
        assert!(clauses[0].contains("$2"));
        assert!(clauses[1].contains("$3"));
    }
}
