//! Scripted in-memory engine shared by the integration tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bi_query_engine::{
    ColumnInfo, EngineConnection, EngineError, QueryEngine, Result, SchemaCatalog, TabularResult,
};
use serde_json::Value;

type Responder = dyn Fn(&str) -> Result<TabularResult> + Send + Sync;

/// Answers every query with a closure and counts connections.
pub struct ScriptedEngine {
    tables: Mutex<BTreeMap<String, Vec<ColumnInfo>>>,
    responder: Arc<Responder>,
    open: Arc<AtomicUsize>,
    connects: Arc<AtomicUsize>,
    executed: Arc<Mutex<Vec<String>>>,
    listing_fails: Arc<AtomicBool>,
}

impl ScriptedEngine {
    pub fn new<F>(tables: &[(&str, &[&str])], responder: F) -> Self
    where
        F: Fn(&str) -> Result<TabularResult> + Send + Sync + 'static,
    {
        let tables = tables
            .iter()
            .map(|(table, cols)| {
                (
                    table.to_string(),
                    cols.iter().map(|c| ColumnInfo::new(*c, "text", true)).collect(),
                )
            })
            .collect();

        Self {
            tables: Mutex::new(tables),
            responder: Arc::new(responder),
            open: Arc::new(AtomicUsize::new(0)),
            connects: Arc::new(AtomicUsize::new(0)),
            executed: Arc::new(Mutex::new(Vec::new())),
            listing_fails: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Catalog pre-loaded with this engine's tables.
    pub fn catalog(&self) -> Arc<SchemaCatalog> {
        let tables = self.tables.lock().unwrap().clone();
        Arc::new(SchemaCatalog::from_tables(tables, HashMap::new()))
    }

    pub fn set_tables(&self, tables: &[(&str, &[&str])]) {
        *self.tables.lock().unwrap() = tables
            .iter()
            .map(|(table, cols)| {
                (
                    table.to_string(),
                    cols.iter().map(|c| ColumnInfo::new(*c, "text", true)).collect(),
                )
            })
            .collect();
    }

    pub fn fail_listing(&self, fail: bool) {
        self.listing_fails.store(fail, Ordering::SeqCst);
    }

    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn connect(&self) -> Result<Box<dyn EngineConnection>> {
        self.open.fetch_add(1, Ordering::SeqCst);
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection {
            tables: self.tables.lock().unwrap().clone(),
            responder: Arc::clone(&self.responder),
            open: Arc::clone(&self.open),
            executed: Arc::clone(&self.executed),
            listing_fails: self.listing_fails.load(Ordering::SeqCst),
        }))
    }
}

struct ScriptedConnection {
    tables: BTreeMap<String, Vec<ColumnInfo>>,
    responder: Arc<Responder>,
    open: Arc<AtomicUsize>,
    executed: Arc<Mutex<Vec<String>>>,
    listing_fails: bool,
}

#[async_trait]
impl EngineConnection for ScriptedConnection {
    async fn run(&mut self, sql: &str) -> Result<TabularResult> {
        self.executed.lock().unwrap().push(sql.to_string());
        (self.responder)(sql)
    }

    async fn list_tables(&mut self) -> Result<Vec<String>> {
        if self.listing_fails {
            return Err(EngineError::Connectivity("connection refused".to_string()));
        }
        Ok(self.tables.keys().cloned().collect())
    }

    async fn describe_table(&mut self, table: &str) -> Result<Vec<ColumnInfo>> {
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| EngineError::database_with_code("42P01", format!("relation \"{}\" does not exist", table)))
    }
}

impl Drop for ScriptedConnection {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Single-column result with one row per value.
pub fn rows(column: &str, values: &[Value]) -> TabularResult {
    TabularResult::new(
        vec![column.to_string()],
        values.iter().map(|v| vec![v.clone()]).collect(),
    )
}

pub const SHOP: &[(&str, &[&str])] = &[
    ("orders", &["id", "total", "year"]),
    ("customers", &["id", "name"]),
];
