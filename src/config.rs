//! Engine configuration
//!
//! Every setting is read from `BIQ_*` environment variables (a `.env` file is
//! loaded first by the binary). Missing or unparsable values fall back to
//! the defaults below.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_SCHEMA: &str = "public";
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 500;
const DEFAULT_SCHEMA_CACHE_TTL_HOURS: i64 = 24;
const DEFAULT_HISTORY_CAPACITY: usize = 5;

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_opt(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_opt(key) {
        Some(v) => matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"),
        None => default,
    }
}

/// Parse `old=new,old2=new2` into a lower-cased rename map.
pub fn parse_rename_list(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (old, new) = pair.split_once('=')?;
            let (old, new) = (old.trim(), new.trim());
            if old.is_empty() || new.is_empty() {
                return None;
            }
            Some((old.to_lowercase(), new.to_string()))
        })
        .collect()
}

/// Where the deterministic growth calculator reads its figures from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GrowthSource {
    pub table: String,
    pub period_column: String,
    pub value_column: String,
}

impl Default for GrowthSource {
    fn default() -> Self {
        Self {
            table: "orders".to_string(),
            period_column: "year".to_string(),
            value_column: "total".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub database_url: Option<String>,
    pub db_schema: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    /// Server-side statement timeout; the only way to abandon a long query.
    pub statement_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub schema_cache_path: PathBuf,
    pub schema_cache_ttl_hours: i64,
    pub query_cache_path: PathBuf,
    pub last_result_path: PathBuf,
    pub history_capacity: usize,
    pub relationships_path: Option<PathBuf>,
    pub table_renames: HashMap<String, String>,
    pub strict_aliases: bool,
    pub growth: GrowthSource,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            db_schema: DEFAULT_SCHEMA.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
            statement_timeout_secs: DEFAULT_STATEMENT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            schema_cache_path: PathBuf::from(".cache/schema_cache.json"),
            schema_cache_ttl_hours: DEFAULT_SCHEMA_CACHE_TTL_HOURS,
            query_cache_path: PathBuf::from(".cache/query_cache.json"),
            last_result_path: PathBuf::from(".cache/last_result.json"),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            relationships_path: None,
            table_renames: HashMap::new(),
            strict_aliases: false,
            growth: GrowthSource::default(),
        }
    }
}

impl EngineConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let growth_defaults = GrowthSource::default();

        Self {
            database_url: env_opt("DATABASE_URL"),
            db_schema: env_or("BIQ_DB_SCHEMA", DEFAULT_SCHEMA),
            max_connections: env_parse("BIQ_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS),
            acquire_timeout_secs: env_parse(
                "BIQ_ACQUIRE_TIMEOUT_SECS",
                DEFAULT_ACQUIRE_TIMEOUT_SECS,
            ),
            statement_timeout_secs: env_parse(
                "BIQ_STATEMENT_TIMEOUT_SECS",
                DEFAULT_STATEMENT_TIMEOUT_SECS,
            ),
            max_retries: env_parse("BIQ_MAX_RETRIES", DEFAULT_MAX_RETRIES),
            retry_delay_ms: env_parse("BIQ_RETRY_DELAY_MS", DEFAULT_RETRY_DELAY_MS),
            schema_cache_path: env_opt("BIQ_SCHEMA_CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.schema_cache_path),
            schema_cache_ttl_hours: env_parse(
                "BIQ_SCHEMA_CACHE_TTL_HOURS",
                DEFAULT_SCHEMA_CACHE_TTL_HOURS,
            ),
            query_cache_path: env_opt("BIQ_QUERY_CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.query_cache_path),
            last_result_path: env_opt("BIQ_LAST_RESULT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.last_result_path),
            history_capacity: env_parse("BIQ_HISTORY_CAPACITY", DEFAULT_HISTORY_CAPACITY).max(1),
            relationships_path: env_opt("BIQ_RELATIONSHIPS_PATH").map(PathBuf::from),
            table_renames: env_opt("BIQ_TABLE_RENAMES")
                .map(|raw| parse_rename_list(&raw))
                .unwrap_or_default(),
            strict_aliases: env_bool("BIQ_STRICT_ALIASES", false),
            growth: GrowthSource {
                table: env_or("BIQ_GROWTH_TABLE", &growth_defaults.table),
                period_column: env_or("BIQ_GROWTH_PERIOD_COLUMN", &growth_defaults.period_column),
                value_column: env_or("BIQ_GROWTH_VALUE_COLUMN", &growth_defaults.value_column),
            },
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn schema_cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.schema_cache_ttl_hours)
    }
}
