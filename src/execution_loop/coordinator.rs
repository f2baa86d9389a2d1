//! Execution Coordinator
//!
//! Bounded execution loop with error recovery, written as an explicit state
//! machine:
//!
//! ```text
//! PreValidate ──ok──▶ Execute ──rows──▶ Done(success)
//!      │                 │
//!      └──fatal──▶ Done  ├──unknown column──▶ Correct ──rewritten──▶ Execute
//!                        ├──connectivity────▶ (delay, reconnect) ──▶ Execute
//!                        └──syntax / unknown table / other──▶ Done(fatal)
//! ```
//!
//! The attempt counter lives in [`CandidateQuery`] and every transition back
//! to `Execute` increments it, so the loop always terminates.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::{EngineConnection, QueryEngine, TabularResult};
use crate::error::{EngineError, Result};
use crate::execution_loop::corrector::ErrorCorrector;
use crate::execution_loop::error_classifier::{extract_missing_table, ErrorClassifier, SqlErrorClass};
use crate::ledger::ResultLedger;
use crate::schema::SchemaCatalog;
use crate::validation::QueryValidator;

const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Why an execution ended without a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    EmptyQuery,
    Syntax,
    UnknownTable,
    UnknownColumn,
    Connectivity,
    Engine,
}

/// A query on its way through the loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateQuery {
    /// Text that will be sent to the engine next.
    pub text: String,
    pub original: String,
    pub corrected: Option<String>,
    pub correction_applied: bool,
    /// Retries consumed so far.
    pub attempts: u32,
}

impl CandidateQuery {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            original: text.clone(),
            text,
            corrected: None,
            correction_applied: false,
            attempts: 0,
        }
    }

    fn apply_correction(&mut self, corrected: String) {
        self.text = corrected.clone();
        self.corrected = Some(corrected);
        self.correction_applied = true;
    }
}

/// Everything the caller needs to present the outcome, including any
/// auto-correction that was applied on the way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub result: Option<TabularResult>,
    pub final_query: String,
    pub correction_applied: bool,
    pub original_query: String,
    pub message: String,
    pub row_count: usize,
    pub schema_validated: bool,
    pub failure: Option<FailureKind>,
    pub attempts: u32,
    pub corrections: Vec<String>,
}

impl ExecutionOutcome {
    /// Successful execution that produced no rows ("no data", not an error).
    pub fn is_empty_result(&self) -> bool {
        self.success && self.row_count == 0
    }
}

enum Step {
    PreValidate,
    Execute,
    Correct(String),
    Done(ExecutionOutcome),
}

/// Per-call state carried between steps.
struct Run {
    candidate: CandidateQuery,
    tried: HashSet<String>,
    corrections: Vec<String>,
    schema_validated: bool,
}

impl Run {
    fn new(query: &str) -> Self {
        Self {
            candidate: CandidateQuery::new(query.trim()),
            tried: HashSet::new(),
            corrections: Vec::new(),
            schema_validated: false,
        }
    }

    fn correct(&mut self, corrected: String, explanation: String) {
        self.candidate.apply_correction(corrected);
        self.corrections.push(explanation);
    }

    fn fatal(&self, kind: FailureKind, message: impl Into<String>) -> ExecutionOutcome {
        ExecutionOutcome {
            success: false,
            result: None,
            final_query: self.candidate.text.clone(),
            correction_applied: self.candidate.correction_applied,
            original_query: self.candidate.original.clone(),
            message: message.into(),
            row_count: 0,
            schema_validated: self.schema_validated,
            failure: Some(kind),
            attempts: self.candidate.attempts,
            corrections: self.corrections.clone(),
        }
    }

    fn succeeded(&self, result: TabularResult) -> ExecutionOutcome {
        let row_count = result.row_count;
        let mut message = if row_count == 0 {
            "Query returned no rows".to_string()
        } else {
            format!("Query returned {} row{}", row_count, if row_count == 1 { "" } else { "s" })
        };
        if self.candidate.correction_applied {
            message.push_str(&format!(" (auto-corrected: {})", self.corrections.join("; ")));
        }

        ExecutionOutcome {
            success: true,
            result: Some(result),
            final_query: self.candidate.text.clone(),
            correction_applied: self.candidate.correction_applied,
            original_query: self.candidate.original.clone(),
            message,
            row_count,
            schema_validated: self.schema_validated,
            failure: None,
            attempts: self.candidate.attempts,
            corrections: self.corrections.clone(),
        }
    }
}

pub struct ExecutionCoordinator {
    engine: Arc<dyn QueryEngine>,
    catalog: Arc<SchemaCatalog>,
    validator: QueryValidator,
    corrector: ErrorCorrector,
    error_classifier: ErrorClassifier,
    ledger: Option<Arc<ResultLedger>>,
    retry_delay: Duration,
}

impl ExecutionCoordinator {
    pub fn new(engine: Arc<dyn QueryEngine>, catalog: Arc<SchemaCatalog>) -> Self {
        Self {
            validator: QueryValidator::new(Arc::clone(&catalog)),
            corrector: ErrorCorrector::new(Arc::clone(&catalog)),
            engine,
            catalog,
            error_classifier: ErrorClassifier::new(),
            ledger: None,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Record successful non-empty results in `ledger`.
    pub fn with_ledger(mut self, ledger: Arc<ResultLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_strict_aliases(mut self, strict: bool) -> Self {
        self.validator = QueryValidator::new(Arc::clone(&self.catalog)).with_strict_aliases(strict);
        self
    }

    /// Execute `query`, repairing what can be repaired, with at most
    /// `max_retries` re-executions. Never fails: the outcome says what
    /// happened.
    pub async fn execute_with_retry(&self, query: &str, max_retries: u32) -> ExecutionOutcome {
        self.execute(None, query, max_retries).await
    }

    /// Same as [`execute_with_retry`](Self::execute_with_retry), recording
    /// the result in the ledger under `question`.
    pub async fn execute_for_question(
        &self,
        question: &str,
        query: &str,
        max_retries: u32,
    ) -> ExecutionOutcome {
        self.execute(Some(question), query, max_retries).await
    }

    async fn execute(&self, question: Option<&str>, query: &str, max_retries: u32) -> ExecutionOutcome {
        let mut run = Run::new(query);
        // Dropped on every return path, which hands the connection back.
        let mut conn: Option<Box<dyn EngineConnection>> = None;
        let mut step = Step::PreValidate;

        loop {
            step = match step {
                Step::PreValidate => self.pre_validate(&mut run),
                Step::Execute => self.execute_once(&mut run, &mut conn, max_retries).await,
                Step::Correct(error_message) => self.correct(&mut run, &error_message, max_retries),
                Step::Done(outcome) => {
                    if outcome.success && outcome.row_count > 0 {
                        self.record(question, &outcome);
                    }
                    return outcome;
                }
            };
        }
    }

    fn pre_validate(&self, run: &mut Run) -> Step {
        if run.candidate.text.is_empty() {
            return Step::Done(run.fatal(FailureKind::EmptyQuery, "Query is empty"));
        }

        let validation = self.validator.validate_against_schema(&run.candidate.text);
        if !validation.valid {
            let message = if self.catalog.snapshot().is_empty() {
                "Schema catalog is empty; cannot validate query".to_string()
            } else {
                format!(
                    "Unknown table(s): {}. Available tables: {}",
                    validation.missing_tables.join(", "),
                    self.catalog.available_tables().join(", ")
                )
            };
            return Step::Done(run.fatal(FailureKind::UnknownTable, message));
        }

        if let Some(rewritten) = validation.rewritten_query.clone() {
            let explanation = validation.describe_substitutions();
            info!("🔧 {}", explanation);
            run.correct(rewritten, explanation);
        }

        // Nothing has run yet, so there is no engine error to drive the
        // corrector: report the references instead of guessing.
        let report = self.validator.introspect(&run.candidate.text);
        if !report.invalid_qualified_columns.is_empty() {
            let columns = report.invalid_qualified_columns.join(", ");
            warn!("Unknown column reference(s) before execution: {}", columns);
            return Step::Done(run.fatal(
                FailureKind::UnknownColumn,
                format!("Unknown column reference(s): {}", columns),
            ));
        }

        run.schema_validated = true;
        Step::Execute
    }

    async fn execute_once(
        &self,
        run: &mut Run,
        conn: &mut Option<Box<dyn EngineConnection>>,
        max_retries: u32,
    ) -> Step {
        run.tried.insert(run.candidate.text.clone());
        info!(
            "Execution attempt {} of {}",
            run.candidate.attempts + 1,
            max_retries + 1
        );

        let started = Instant::now();
        let error = match self.run_on(conn, &run.candidate.text).await {
            Ok(result) => {
                let elapsed = started.elapsed().as_millis() as u64;
                info!("✅ Execution succeeded: {} rows in {}ms", result.row_count, elapsed);
                return Step::Done(run.succeeded(result.with_execution_time(elapsed)));
            }
            Err(e) => e,
        };

        match self.error_classifier.classify(&error) {
            SqlErrorClass::Connectivity => {
                // A broken connection is not reused.
                *conn = None;
                if run.candidate.attempts >= max_retries {
                    return Step::Done(run.fatal(
                        FailureKind::Connectivity,
                        format!(
                            "Could not reach the database after {} attempt(s): {}",
                            run.candidate.attempts + 1,
                            error
                        ),
                    ));
                }
                run.candidate.attempts += 1;
                warn!(
                    "Connectivity failure, retrying in {}ms: {}",
                    self.retry_delay.as_millis(),
                    error
                );
                tokio::time::sleep(self.retry_delay).await;
                Step::Execute
            }
            SqlErrorClass::Syntax => Step::Done(run.fatal(FailureKind::Syntax, error.to_string())),
            SqlErrorClass::UnknownTable => {
                let message = error.to_string();
                let table = extract_missing_table(&message).unwrap_or_else(|| "?".to_string());
                Step::Done(run.fatal(
                    FailureKind::UnknownTable,
                    format!(
                        "Table '{}' not found: {}. Available tables: {}",
                        table,
                        message,
                        self.catalog.available_tables().join(", ")
                    ),
                ))
            }
            SqlErrorClass::UnknownColumn => Step::Correct(error.to_string()),
            SqlErrorClass::Other(message) => Step::Done(run.fatal(FailureKind::Engine, message)),
        }
    }

    fn correct(&self, run: &mut Run, error_message: &str, max_retries: u32) -> Step {
        if run.candidate.attempts >= max_retries {
            return Step::Done(run.fatal(
                FailureKind::UnknownColumn,
                format!(
                    "Gave up after {} correction attempt(s): {}",
                    run.candidate.attempts, error_message
                ),
            ));
        }

        let fix = self.corrector.correct(&run.candidate.text, error_message);
        let corrected = match fix.corrected_query {
            Some(corrected) if fix.success => corrected,
            _ => {
                return Step::Done(run.fatal(
                    FailureKind::UnknownColumn,
                    format!("{} ({})", error_message, fix.explanation),
                ))
            }
        };

        if run.tried.contains(&corrected) {
            return Step::Done(run.fatal(
                FailureKind::UnknownColumn,
                format!("Correction repeats a query that already failed: {}", error_message),
            ));
        }

        info!("🔧 {}", fix.explanation);
        run.candidate.attempts += 1;
        run.correct(corrected, fix.explanation);
        Step::Execute
    }

    async fn run_on(
        &self,
        conn: &mut Option<Box<dyn EngineConnection>>,
        sql: &str,
    ) -> Result<TabularResult> {
        if conn.is_none() {
            *conn = Some(self.engine.connect().await?);
        }
        match conn.as_mut() {
            Some(c) => c.run(sql).await,
            None => Err(EngineError::Connectivity("no connection available".to_string())),
        }
    }

    fn record(&self, question: Option<&str>, outcome: &ExecutionOutcome) {
        let (Some(ledger), Some(result)) = (&self.ledger, &outcome.result) else {
            return;
        };
        let question = question.unwrap_or(&outcome.original_query);
        ledger.record(question, &outcome.final_query, result);
    }
}
