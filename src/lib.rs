pub mod config;
pub mod db;
pub mod error;
pub mod execution_loop;
pub mod financial;
pub mod generator;
pub mod ledger;
pub mod schema;
pub mod service;
pub mod storage;
pub mod validation;

pub use config::{EngineConfig, GrowthSource};
pub use db::{EngineConnection, PostgresEngine, QueryEngine, TabularResult};
pub use error::{EngineError, Result};
pub use execution_loop::{
    CandidateQuery, CorrectionResult, ErrorClassifier, ErrorCorrector, ExecutionCoordinator,
    ExecutionOutcome, FailureKind, SqlErrorClass,
};
pub use financial::{
    detect_growth_question, FinancialFailure, FinancialResult, GrowthCalculator, GrowthRequest,
    Scenario, ScenarioForecast, ValidationReport,
};
pub use generator::{ConversationHistory, ConversationTurn, QueryGenerator};
pub use ledger::{CachedQueryEntry, LastResult, ResultLedger};
pub use schema::{
    ColumnInfo, JoinKind, LoadReport, LoadSource, Relationship, RelationshipEdge,
    RelationshipGraph, SchemaCatalog, SchemaSnapshot,
};
pub use service::{Answer, QueryService};
pub use validation::{IntrospectionReport, QueryValidator, SchemaValidation};
