//! Execution Engine Trait - the contract the coordinator and catalog rely on
//!
//! A [`QueryEngine`] hands out connections; a connection is owned by exactly
//! one caller and is released when dropped, on every exit path.

use async_trait::async_trait;

use crate::db::result::TabularResult;
use crate::error::Result;
use crate::schema::ColumnInfo;

#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Engine name used in logs (e.g. "postgres").
    fn name(&self) -> &str;

    /// Acquire a connection dedicated to the caller.
    async fn connect(&self) -> Result<Box<dyn EngineConnection>>;
}

#[async_trait]
pub trait EngineConnection: Send {
    /// Run a read-only query and return its rows.
    async fn run(&mut self, sql: &str) -> Result<TabularResult>;

    /// Names of all tables visible to the engine, in a stable order.
    async fn list_tables(&mut self) -> Result<Vec<String>>;

    /// Ordered column listing for one table.
    async fn describe_table(&mut self, table: &str) -> Result<Vec<ColumnInfo>>;
}
