//! PostgreSQL Execution Engine
//!
//! Candidate queries are arbitrary SQL, so they run through the simple-query
//! protocol: every column comes back in text form and is converted to JSON
//! according to its declared type.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Number, Value};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Column, Decode, Executor, Postgres, Row, TypeInfo, ValueRef};
use tracing::debug;

use crate::config::EngineConfig;
use crate::db::connection::{init_lazy_pool, init_pool};
use crate::db::engine::{EngineConnection, QueryEngine};
use crate::db::result::TabularResult;
use crate::error::{EngineError, Result};
use crate::schema::ColumnInfo;

/// PostgreSQL engine backed by a shared pool.
pub struct PostgresEngine {
    pool: PgPool,
    schema: String,
}

impl PostgresEngine {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    /// Create the pool from configuration and wrap it.
    pub async fn connect_with_config(config: &EngineConfig) -> Result<Self> {
        let pool = init_pool(config).await?;
        Ok(Self::new(pool, config.db_schema.clone()))
    }

    /// Engine whose pool connects on first use, for callers that may never
    /// need the database (a fresh schema cache covers metadata commands).
    pub fn lazy_with_config(config: &EngineConfig) -> Result<Self> {
        let pool = init_lazy_pool(config)?;
        Ok(Self::new(pool, config.db_schema.clone()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl QueryEngine for PostgresEngine {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn connect(&self) -> Result<Box<dyn EngineConnection>> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PgEngineConnection {
            conn,
            schema: self.schema.clone(),
        }))
    }
}

/// Pooled connection; returned to the pool on drop.
pub struct PgEngineConnection {
    conn: PoolConnection<Postgres>,
    schema: String,
}

#[async_trait]
impl EngineConnection for PgEngineConnection {
    async fn run(&mut self, sql: &str) -> Result<TabularResult> {
        let start = Instant::now();
        let rows = (&mut *self.conn).fetch_all(sqlx::raw_sql(sql)).await?;

        let columns: Vec<String> = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let mut values = Vec::with_capacity(rows.len());
        for row in &rows {
            values.push(row_to_values(row)?);
        }

        let elapsed = start.elapsed().as_millis() as u64;
        debug!("postgres returned {} rows in {}ms", values.len(), elapsed);
        Ok(TabularResult::new(columns, values).with_execution_time(elapsed))
    }

    async fn list_tables(&mut self) -> Result<Vec<String>> {
        let tables = sqlx::query_scalar::<_, String>(
            r#"
            SELECT table_name::text
            FROM information_schema.tables
            WHERE table_schema = $1
              AND table_type IN ('BASE TABLE', 'VIEW')
            ORDER BY table_name
            "#,
        )
        .bind(&self.schema)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(tables)
    }

    async fn describe_table(&mut self, table: &str) -> Result<Vec<ColumnInfo>> {
        let rows = sqlx::query_as::<_, (String, String, bool)>(
            r#"
            SELECT column_name::text,
                   data_type::text,
                   (is_nullable = 'YES') AS nullable
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
            "#,
        )
        .bind(&self.schema)
        .bind(table)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, data_type, nullable)| ColumnInfo {
                name,
                data_type,
                nullable,
            })
            .collect())
    }
}

fn row_to_values(row: &PgRow) -> Result<Vec<Value>> {
    let mut values = Vec::with_capacity(row.len());

    for (idx, column) in row.columns().iter().enumerate() {
        let type_name = column.type_info().name().to_string();
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            values.push(Value::Null);
            continue;
        }

        let text = <String as Decode<'_, Postgres>>::decode(raw).map_err(|e| {
            EngineError::database(format!(
                "Failed to decode column '{}' ({}): {}",
                column.name(),
                type_name,
                e
            ))
        })?;
        values.push(text_to_json(&type_name, text));
    }

    Ok(values)
}

/// Convert a text-format cell to JSON by declared type name.
fn text_to_json(type_name: &str, text: String) -> Value {
    match type_name {
        "INT2" | "INT4" | "INT8" | "OID" => text
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or(Value::String(text)),
        "FLOAT4" | "FLOAT8" | "NUMERIC" | "MONEY" => {
            match text.parse::<f64>().ok().and_then(Number::from_f64) {
                Some(n) => Value::Number(n),
                None => Value::String(text),
            }
        }
        "BOOL" => Value::Bool(text == "t" || text == "true"),
        "JSON" | "JSONB" => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        _ => Value::String(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_to_json_by_type() {
        assert_eq!(text_to_json("INT8", "42".into()), Value::from(42));
        assert_eq!(text_to_json("NUMERIC", "146.41".into()), Value::from(146.41));
        assert_eq!(text_to_json("BOOL", "t".into()), Value::Bool(true));
        assert_eq!(text_to_json("TEXT", "Ada".into()), Value::String("Ada".into()));
        assert_eq!(
            text_to_json("FLOAT8", "NaN".into()),
            Value::String("NaN".into())
        );
    }
}
