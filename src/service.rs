//! Query Service
//!
//! Facade the conversational layer, exporters and the CLI talk to. It owns
//! the schema catalog, relationship graph, coordinator, growth calculator and
//! ledger, and wires them to one engine.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::db::QueryEngine;
use crate::error::Result;
use crate::execution_loop::{ExecutionCoordinator, ExecutionOutcome};
use crate::financial::{detect_growth_question, FinancialResult, GrowthCalculator};
use crate::generator::{ConversationHistory, QueryGenerator};
use crate::ledger::ResultLedger;
use crate::schema::{LoadReport, Relationship, RelationshipEdge, RelationshipGraph, SchemaCatalog};
use crate::validation::{IntrospectionReport, QueryValidator, SchemaValidation};

/// How a question was answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Answer {
    Growth(FinancialResult),
    Query {
        outcome: ExecutionOutcome,
        /// The query came from the ledger instead of the generator.
        from_cache: bool,
    },
    GenerationFailed(String),
}

pub struct QueryService {
    engine: Arc<dyn QueryEngine>,
    catalog: Arc<SchemaCatalog>,
    graph: RwLock<Arc<RelationshipGraph>>,
    validator: QueryValidator,
    coordinator: Arc<ExecutionCoordinator>,
    calculator: GrowthCalculator,
    ledger: Arc<ResultLedger>,
    max_retries: u32,
}

impl QueryService {
    /// Service with persistent schema cache and ledger files as configured.
    pub fn from_config(
        engine: Arc<dyn QueryEngine>,
        config: &EngineConfig,
        edges: Vec<RelationshipEdge>,
    ) -> Result<Self> {
        let catalog = SchemaCatalog::new(config.table_renames.clone())
            .with_cache(&config.schema_cache_path, config.schema_cache_ttl());
        let ledger = ResultLedger::with_persistence(
            config.history_capacity,
            &config.query_cache_path,
            &config.last_result_path,
        )?;
        Ok(Self::new(engine, Arc::new(catalog), edges, Arc::new(ledger), config))
    }

    pub fn new(
        engine: Arc<dyn QueryEngine>,
        catalog: Arc<SchemaCatalog>,
        edges: Vec<RelationshipEdge>,
        ledger: Arc<ResultLedger>,
        config: &EngineConfig,
    ) -> Self {
        let coordinator = Arc::new(
            ExecutionCoordinator::new(Arc::clone(&engine), Arc::clone(&catalog))
                .with_ledger(Arc::clone(&ledger))
                .with_retry_delay(config.retry_delay())
                .with_strict_aliases(config.strict_aliases),
        );
        let calculator = GrowthCalculator::new(
            Arc::clone(&coordinator),
            Arc::clone(&catalog),
            config.growth.clone(),
            config.max_retries,
        );

        Self {
            validator: QueryValidator::new(Arc::clone(&catalog))
                .with_strict_aliases(config.strict_aliases),
            graph: RwLock::new(Arc::new(RelationshipGraph::new(edges))),
            engine,
            catalog,
            coordinator,
            calculator,
            ledger,
            max_retries: config.max_retries,
        }
    }

    pub fn catalog(&self) -> &Arc<SchemaCatalog> {
        &self.catalog
    }

    pub fn ledger(&self) -> &Arc<ResultLedger> {
        &self.ledger
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Load the schema (cache first) and rebuild the relationship graph.
    pub async fn load_schema(&self) -> Result<LoadReport> {
        let report = self.catalog.load(self.engine.as_ref()).await?;
        self.rebuild_graph();
        Ok(report)
    }

    /// Like [`load_schema`](Self::load_schema), but a failure only logs a
    /// warning and leaves whatever snapshot is installed, which may be empty
    /// (validation then fails closed).
    pub async fn prepare_schema(&self) -> Option<LoadReport> {
        match self.load_schema().await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Schema load failed, continuing with the current snapshot: {}", e);
                None
            }
        }
    }

    /// Re-read the schema from the engine. On failure the previous snapshot
    /// and graph stay in place.
    pub async fn refresh_schema(&self) -> Result<LoadReport> {
        let report = self.catalog.refresh(self.engine.as_ref()).await?;
        self.rebuild_graph();
        Ok(report)
    }

    fn graph(&self) -> Arc<RelationshipGraph> {
        match self.graph.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn rebuild_graph(&self) {
        let rebuilt = Arc::new(self.graph().rebuild(&self.catalog.snapshot()));
        match self.graph.write() {
            Ok(mut guard) => *guard = rebuilt,
            Err(poisoned) => *poisoned.into_inner() = rebuilt,
        }
    }

    pub async fn execute_with_retry(&self, query: &str, max_retries: u32) -> ExecutionOutcome {
        self.coordinator.execute_with_retry(query, max_retries).await
    }

    /// Execute and record the result in the ledger under `question`.
    pub async fn execute_for_question(
        &self,
        question: &str,
        query: &str,
        max_retries: u32,
    ) -> ExecutionOutcome {
        self.coordinator
            .execute_for_question(question, query, max_retries)
            .await
    }

    pub fn validate_against_schema(&self, query: &str) -> SchemaValidation {
        self.validator.validate_against_schema(query)
    }

    pub fn introspect(&self, query: &str) -> IntrospectionReport {
        self.validator.introspect(query)
    }

    pub async fn compute_growth(
        &self,
        start_period: i32,
        end_period: i32,
        forecast_periods: &[i32],
    ) -> FinancialResult {
        self.calculator
            .compute_growth(start_period, end_period, forecast_periods)
            .await
    }

    pub fn get_table_columns(&self, table: &str) -> Vec<String> {
        self.catalog.columns(table)
    }

    pub fn infer_relationships(&self, table: &str) -> Vec<Relationship> {
        self.graph().relationships_for(table)
    }

    pub fn build_join_clause(&self, from_table: &str, to_table: &str) -> String {
        self.graph().build_join_clause(from_table, to_table)
    }

    /// Answer a natural-language question: growth questions go to the
    /// calculator, repeated questions reuse the cached query, anything else
    /// is generated and executed.
    pub async fn answer(
        &self,
        question: &str,
        history: &ConversationHistory,
        generator: &dyn QueryGenerator,
    ) -> Answer {
        if let Some(request) = detect_growth_question(question) {
            info!(
                "📈 Growth question detected: {}→{} {:?}",
                request.start_period, request.end_period, request.forecast_periods
            );
            return Answer::Growth(
                self.compute_growth(
                    request.start_period,
                    request.end_period,
                    &request.forecast_periods,
                )
                .await,
            );
        }

        if let Some(cached) = self.ledger.lookup(question) {
            info!("Reusing cached query for question");
            let outcome = self
                .coordinator
                .execute_for_question(question, &cached.query, self.max_retries)
                .await;
            return Answer::Query {
                outcome,
                from_cache: true,
            };
        }

        let query = match generator.generate(question, &history.turns()).await {
            Ok(query) => query,
            Err(e) => {
                warn!("Query generation failed: {}", e);
                return Answer::GenerationFailed(e.to_string());
            }
        };

        let outcome = self
            .coordinator
            .execute_for_question(question, &query, self.max_retries)
            .await;
        Answer::Query {
            outcome,
            from_cache: false,
        }
    }
}
