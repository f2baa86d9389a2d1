//! Question routing through the service facade.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bi_query_engine::{
    Answer, ConversationHistory, ConversationTurn, EngineConfig, EngineError, QueryEngine,
    QueryGenerator, QueryService, Result, ResultLedger, TabularResult,
};
use common::{rows, ScriptedEngine, SHOP};
use serde_json::json;

struct CannedGenerator {
    query: Option<&'static str>,
    calls: AtomicUsize,
}

impl CannedGenerator {
    fn new(query: Option<&'static str>) -> Self {
        Self {
            query,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl QueryGenerator for CannedGenerator {
    async fn generate(&self, _question: &str, _history: &[ConversationTurn]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.query
            .map(str::to_string)
            .ok_or_else(|| EngineError::Config("no generator configured".to_string()))
    }
}

fn service(engine: &Arc<ScriptedEngine>) -> QueryService {
    let config = EngineConfig {
        retry_delay_ms: 1,
        ..EngineConfig::default()
    };
    let dyn_engine: Arc<dyn QueryEngine> = Arc::clone(engine) as Arc<dyn QueryEngine>;
    QueryService::new(
        dyn_engine,
        engine.catalog(),
        Vec::new(),
        Arc::new(ResultLedger::new(5)),
        &config,
    )
}

fn engine() -> Arc<ScriptedEngine> {
    Arc::new(ScriptedEngine::new(SHOP, |sql| {
        if sql.contains("period_totals") {
            let columns = ["start_value", "end_value", "start_rows", "end_rows", "growth_rate", "growth_fraction"];
            Ok(TabularResult::new(
                columns.iter().map(|c| c.to_string()).collect(),
                vec![vec![json!(100.0), json!(121.0), json!(2), json!(2), json!(21.0), json!(0.21)]],
            ))
        } else {
            Ok(rows("total", &[json!(42.0)]))
        }
    }))
}

#[tokio::test]
async fn test_growth_question_uses_calculator() {
    let engine = engine();
    let generator = CannedGenerator::new(Some("select 1"));
    let answer = service(&engine)
        .answer(
            "How much did revenue grow between 2023 and 2024?",
            &ConversationHistory::default(),
            &generator,
        )
        .await;

    let Answer::Growth(result) = answer else {
        panic!("expected a growth answer, got {:?}", answer);
    };
    assert!(result.success, "{}", result.message);
    assert_eq!((result.start_period, result.end_period), (2023, 2024));
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_repeated_question_reuses_cached_query() {
    let engine = engine();
    let service = service(&engine);
    let generator = CannedGenerator::new(Some("select sum(total) from orders"));
    let mut history = ConversationHistory::default();
    history.push("user", "total order value?");

    let first = service.answer("total order value?", &history, &generator).await;
    let second = service.answer("total order value?", &history, &generator).await;

    match (first, second) {
        (
            Answer::Query { outcome: a, from_cache: false },
            Answer::Query { outcome: b, from_cache: true },
        ) => {
            assert!(a.success && b.success);
            assert_eq!(a.final_query, b.final_query);
        }
        other => panic!("unexpected answers: {:?}", other),
    }
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    // The cache hit replaces the entry instead of adding a second one.
    assert_eq!(service.ledger().history().len(), 1);
}

#[tokio::test]
async fn test_generator_failure_is_reported() {
    let engine = engine();
    let generator = CannedGenerator::new(None);
    let answer = service(&engine)
        .answer("who bought the most?", &ConversationHistory::default(), &generator)
        .await;

    assert_eq!(
        answer,
        Answer::GenerationFailed("Configuration error: no generator configured".to_string())
    );
    assert!(engine.executed().is_empty());
}
