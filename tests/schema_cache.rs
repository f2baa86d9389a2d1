//! Schema loading, caching and refresh against the scripted engine.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bi_query_engine::{
    EngineConfig, JoinKind, LoadSource, QueryEngine, QueryService, RelationshipEdge, ResultLedger,
    SchemaCatalog,
};
use common::{rows, ScriptedEngine, SHOP};
use serde_json::json;

fn shop_engine() -> Arc<ScriptedEngine> {
    Arc::new(ScriptedEngine::new(SHOP, |_| Ok(rows("n", &[json!(1)]))))
}

#[tokio::test]
async fn test_engine_load_is_cached_for_the_next_process() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("schema_cache.json");
    let engine = shop_engine();

    let first = SchemaCatalog::new(HashMap::new()).with_cache(&path, chrono::Duration::hours(24));
    let report = first.load(engine.as_ref()).await.unwrap();
    assert_eq!(report.source, LoadSource::Engine);
    assert_eq!(report.table_count, 2);
    assert!(path.exists());

    // The engine is unreachable now, the fresh cache is enough.
    engine.fail_listing(true);
    let second = SchemaCatalog::new(HashMap::new()).with_cache(&path, chrono::Duration::hours(24));
    let report = second.load(engine.as_ref()).await.unwrap();
    assert_eq!(report.source, LoadSource::Cache);
    assert_eq!(second.columns("orders"), vec!["id", "total", "year"]);
    assert_eq!(engine.connect_count(), 1);
}

#[tokio::test]
async fn test_stale_cache_goes_back_to_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("schema_cache.json");
    let engine = shop_engine();

    let catalog = SchemaCatalog::new(HashMap::new()).with_cache(&path, chrono::Duration::zero());
    catalog.refresh(engine.as_ref()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let report = catalog.load(engine.as_ref()).await.unwrap();
    assert_eq!(report.source, LoadSource::Engine);
    assert_eq!(engine.connect_count(), 2);
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_snapshot() {
    let engine = shop_engine();
    let catalog = SchemaCatalog::new(HashMap::new());
    catalog.refresh(engine.as_ref()).await.unwrap();
    let before = catalog.snapshot();

    engine.set_tables(&[("invoices", &["id", "amount"])]);
    engine.fail_listing(true);
    assert!(catalog.refresh(engine.as_ref()).await.is_err());
    assert!(catalog.table_exists("orders"));
    assert!(!catalog.table_exists("invoices"));
    assert_eq!(engine.open_connections(), 0);

    engine.fail_listing(false);
    catalog.refresh(engine.as_ref()).await.unwrap();
    assert_eq!(catalog.available_tables(), vec!["invoices"]);

    // Readers holding the old snapshot still see it whole.
    assert!(before.table_exists("orders"));
    assert!(before.has_column("customers", "name"));
}

#[tokio::test]
async fn test_service_refresh_rebuilds_relationships() {
    let engine = shop_engine();
    let config = EngineConfig {
        retry_delay_ms: 1,
        ..EngineConfig::default()
    };
    let edges = vec![RelationshipEdge::parse("orders.id = customers.id", JoinKind::Left).unwrap()];
    let dyn_engine: Arc<dyn QueryEngine> = Arc::clone(&engine) as Arc<dyn QueryEngine>;
    let service = QueryService::new(
        dyn_engine,
        Arc::new(SchemaCatalog::new(HashMap::new())),
        edges,
        Arc::new(ResultLedger::new(5)),
        &config,
    );

    // Nothing loaded yet: validation fails closed.
    assert!(!service.validate_against_schema("select * from orders").valid);

    let report = service.refresh_schema().await.unwrap();
    assert_eq!(report.table_count, 2);
    assert!(service.validate_against_schema("select * from orders").valid);
    assert_eq!(service.get_table_columns("customers"), vec!["id", "name"]);
    assert_eq!(
        service.build_join_clause("orders", "customers"),
        "LEFT JOIN customers ON orders.id = customers.id"
    );
    assert_eq!(service.infer_relationships("customers")[0].target_table, "orders");
}

#[tokio::test]
async fn test_unreachable_engine_does_not_stop_the_service() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        retry_delay_ms: 1,
        schema_cache_path: dir.path().join("schema_cache.json"),
        query_cache_path: dir.path().join("query_cache.json"),
        last_result_path: dir.path().join("last_result.json"),
        ..EngineConfig::default()
    };

    // Nothing cached and nothing reachable: the service keeps going on an
    // empty snapshot, which fails closed.
    let engine = shop_engine();
    engine.fail_listing(true);
    let dyn_engine: Arc<dyn QueryEngine> = Arc::clone(&engine) as Arc<dyn QueryEngine>;
    let service = QueryService::from_config(dyn_engine, &config, Vec::new()).unwrap();
    assert!(service.prepare_schema().await.is_none());
    assert!(!service.validate_against_schema("select * from orders").valid);

    // Once a load has been cached, a later process needs no engine at all.
    engine.fail_listing(false);
    service.refresh_schema().await.unwrap();
    engine.fail_listing(true);

    let dyn_engine: Arc<dyn QueryEngine> = Arc::clone(&engine) as Arc<dyn QueryEngine>;
    let restarted = QueryService::from_config(dyn_engine, &config, Vec::new()).unwrap();
    let report = restarted.prepare_schema().await.unwrap();
    assert_eq!(report.source, LoadSource::Cache);
    assert_eq!(restarted.get_table_columns("orders"), vec!["id", "total", "year"]);
    assert!(restarted.introspect("select o.total from orders o").valid);
}
