//! Result Ledger
//!
//! One "last successful result" slot (overwritten, never accumulated) for
//! export tooling, plus a small most-recent-first history of answered
//! questions used as a cache. Both are optionally mirrored to JSON files.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::TabularResult;
use crate::error::Result;
use crate::storage::{read_json, write_json_atomic};

pub const DEFAULT_HISTORY_CAPACITY: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedQueryEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub question: String,
    pub query: String,
    pub result_summary: String,
    pub row_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastResult {
    pub recorded_at: DateTime<Utc>,
    pub query: String,
    pub result: TabularResult,
}

#[derive(Debug, Default)]
struct LedgerState {
    last: Option<LastResult>,
    /// most recent first
    history: VecDeque<CachedQueryEntry>,
}

pub struct ResultLedger {
    capacity: usize,
    state: Mutex<LedgerState>,
    query_cache_path: Option<PathBuf>,
    last_result_path: Option<PathBuf>,
}

impl ResultLedger {
    /// In-memory ledger keeping at most `capacity` history entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(LedgerState::default()),
            query_cache_path: None,
            last_result_path: None,
        }
    }

    /// Ledger mirrored to the given files. Existing files are loaded, so
    /// history survives restarts.
    pub fn with_persistence(
        capacity: usize,
        query_cache_path: impl Into<PathBuf>,
        last_result_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let query_cache_path = query_cache_path.into();
        let last_result_path = last_result_path.into();

        let mut history: VecDeque<CachedQueryEntry> =
            read_json::<Vec<CachedQueryEntry>>(&query_cache_path)?
                .unwrap_or_default()
                .into();
        history.truncate(capacity.max(1));
        let last = read_json::<LastResult>(&last_result_path)?;

        debug!(
            "Loaded {} cached queries from {}",
            history.len(),
            query_cache_path.display()
        );

        Ok(Self {
            capacity: capacity.max(1),
            state: Mutex::new(LedgerState { last, history }),
            query_cache_path: Some(query_cache_path),
            last_result_path: Some(last_result_path),
        })
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Remember a successful result: replaces the last-result slot and
    /// pushes a history entry, dropping any older entry for the same
    /// question and evicting the oldest beyond capacity.
    ///
    /// Files are written under the ledger lock so the newest state is always
    /// the one left on disk.
    pub fn record(&self, question: &str, query: &str, result: &TabularResult) {
        let now = Utc::now();
        let entry = CachedQueryEntry {
            id: Uuid::new_v4(),
            timestamp: now,
            question: question.to_string(),
            query: query.to_string(),
            result_summary: result.summary(),
            row_count: result.row_count,
        };
        let last = LastResult {
            recorded_at: now,
            query: query.to_string(),
            result: result.clone(),
        };

        let mut state = self.lock();
        state.history.retain(|e| e.question != question);
        state.history.push_front(entry);
        state.history.truncate(self.capacity);
        state.last = Some(last);

        if let Some(path) = &self.query_cache_path {
            persist(path, &state.history);
        }
        if let (Some(path), Some(last)) = (&self.last_result_path, &state.last) {
            persist(path, last);
        }
    }

    pub fn last_result(&self) -> Option<LastResult> {
        self.lock().last.clone()
    }

    /// History entries, most recent first.
    pub fn history(&self) -> Vec<CachedQueryEntry> {
        self.lock().history.iter().cloned().collect()
    }

    /// Most recent entry whose question matches exactly.
    pub fn lookup(&self, question: &str) -> Option<CachedQueryEntry> {
        self.lock()
            .history
            .iter()
            .find(|e| e.question == question)
            .cloned()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ResultLedger {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

fn persist<T: Serialize>(path: &Path, value: &T) {
    if let Err(e) = write_json_atomic(path, value) {
        warn!("Failed to write {}: {}", path.display(), e);
    }
}
