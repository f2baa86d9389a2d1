//! Schema Catalog
//!
//! Loads table/column metadata from the live engine and keeps it as an
//! `Arc<SchemaSnapshot>`. Readers clone the `Arc` and never observe a
//! partially built snapshot; a refresh swaps the whole reference.
//!
//! Successful engine loads are persisted to a cache file so a later process
//! can start from it without contacting the engine while it is fresh.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::db::QueryEngine;
use crate::error::{EngineError, Result};
use crate::schema::{ColumnInfo, SchemaSnapshot};
use crate::storage::{read_json, write_json_atomic};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadSource {
    Cache,
    Engine,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub source: LoadSource,
    pub table_count: usize,
    pub loaded_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SchemaCacheFile {
    cached_at: DateTime<Utc>,
    tables: BTreeMap<String, Vec<ColumnInfo>>,
}

pub struct SchemaCatalog {
    snapshot: RwLock<Arc<SchemaSnapshot>>,
    renames: HashMap<String, String>,
    cache_path: Option<PathBuf>,
    cache_ttl: chrono::Duration,
}

impl SchemaCatalog {
    /// Empty catalog without a cache file. Until something is loaded,
    /// validation fails closed.
    pub fn new(renames: HashMap<String, String>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(SchemaSnapshot::empty())),
            renames,
            cache_path: None,
            cache_ttl: chrono::Duration::hours(24),
        }
    }

    pub fn with_cache(mut self, path: impl Into<PathBuf>, ttl: chrono::Duration) -> Self {
        self.cache_path = Some(path.into());
        self.cache_ttl = ttl;
        self
    }

    /// Catalog seeded with a fixed table listing (demos and tests).
    pub fn from_tables(
        tables: BTreeMap<String, Vec<ColumnInfo>>,
        renames: HashMap<String, String>,
    ) -> Self {
        let catalog = Self::new(renames);
        catalog.install(tables, Utc::now());
        catalog
    }

    /// Current snapshot. Cheap: clones an `Arc`.
    pub fn snapshot(&self) -> Arc<SchemaSnapshot> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn renames(&self) -> &HashMap<String, String> {
        &self.renames
    }

    /// Use the cache file when it is younger than the freshness threshold,
    /// otherwise read the schema from the engine.
    pub async fn load(&self, engine: &dyn QueryEngine) -> Result<LoadReport> {
        match self.load_from_cache() {
            Ok(Some(report)) => return Ok(report),
            Ok(None) => {}
            Err(e) => warn!("Ignoring unreadable schema cache: {}", e),
        }
        self.refresh(engine).await
    }

    /// Read the schema from the engine and swap it in. On failure the
    /// current snapshot is left untouched.
    pub async fn refresh(&self, engine: &dyn QueryEngine) -> Result<LoadReport> {
        info!("Loading schema from {} engine...", engine.name());
        let tables = fetch_tables(engine).await.map_err(|e| {
            warn!("Schema load failed, keeping current snapshot: {}", e);
            e
        })?;

        let loaded_at = Utc::now();
        let table_count = tables.len();

        if let Some(path) = &self.cache_path {
            let cache = SchemaCacheFile {
                cached_at: loaded_at,
                tables: tables.clone(),
            };
            match write_json_atomic(path, &cache) {
                Ok(()) => debug!("Schema cache written to {}", path.display()),
                Err(e) => warn!("Failed to write schema cache {}: {}", path.display(), e),
            }
        }

        self.install(tables, loaded_at);
        info!("✅ Schema loaded: {} tables", table_count);

        Ok(LoadReport {
            source: LoadSource::Engine,
            table_count,
            loaded_at,
        })
    }

    /// Install the cached schema if the cache exists and is fresh.
    pub fn load_from_cache(&self) -> Result<Option<LoadReport>> {
        let Some(path) = &self.cache_path else {
            return Ok(None);
        };
        let Some(cache) = read_json::<SchemaCacheFile>(path)? else {
            return Ok(None);
        };

        let age = Utc::now() - cache.cached_at;
        if age < chrono::Duration::zero() {
            debug!("Schema cache is dated in the future ({}), ignoring it", cache.cached_at);
            return Ok(None);
        }
        if age > self.cache_ttl {
            debug!("Schema cache is stale ({}h old)", age.num_hours());
            return Ok(None);
        }
        if cache.tables.is_empty() {
            return Ok(None);
        }

        let table_count = cache.tables.len();
        self.install(cache.tables, cache.cached_at);
        info!("Schema loaded from cache: {} tables", table_count);

        Ok(Some(LoadReport {
            source: LoadSource::Cache,
            table_count,
            loaded_at: cache.cached_at,
        }))
    }

    fn install(&self, tables: BTreeMap<String, Vec<ColumnInfo>>, loaded_at: DateTime<Utc>) {
        let snapshot = Arc::new(SchemaSnapshot::new(tables, &self.renames, Some(loaded_at)));
        match self.snapshot.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.snapshot().table_exists(name)
    }

    pub fn columns(&self, table: &str) -> Vec<String> {
        self.snapshot().columns(table)
    }

    pub fn available_tables(&self) -> Vec<String> {
        self.snapshot().table_names()
    }

    pub fn resolve_table_fallback(&self, name: &str) -> Option<String> {
        self.snapshot().resolve_table_fallback(name)
    }
}

/// Read every table's column listing over one connection.
async fn fetch_tables(engine: &dyn QueryEngine) -> Result<BTreeMap<String, Vec<ColumnInfo>>> {
    let mut conn = engine.connect().await?;
    let names = conn.list_tables().await?;

    let mut tables = BTreeMap::new();
    for name in names {
        match conn.describe_table(&name).await {
            Ok(columns) => {
                tables.insert(name, columns);
            }
            Err(e @ EngineError::Connectivity(_)) => return Err(e),
            Err(e) => warn!("  Skipping table '{}': {}", name, e),
        }
    }

    Ok(tables)
}
