//! Database connection management using sqlx

use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::info;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

pub type DbPool = PgPool;

fn pool_options(config: &EngineConfig) -> Result<(PgPoolOptions, PgConnectOptions)> {
    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| EngineError::Config("DATABASE_URL is not set".to_string()))?;

    // Pushed to the server as a session option so a runaway query is
    // cancelled by the engine itself.
    let statement_timeout = format!("{}s", config.statement_timeout_secs);
    let options = PgConnectOptions::from_str(url)?
        .options([("statement_timeout", statement_timeout.as_str())]);

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs));
    Ok((pool, options))
}

/// Initialize the database connection pool and check it with `SELECT 1`.
pub async fn init_pool(config: &EngineConfig) -> Result<PgPool> {
    let (pool_options, options) = pool_options(config)?;
    let pool = pool_options.connect_with(options).await?;

    // Test the connection
    sqlx::query("SELECT 1").execute(&pool).await?;

    info!(
        "Connected to PostgreSQL (max_connections={}, statement_timeout={}s)",
        config.max_connections, config.statement_timeout_secs
    );

    Ok(pool)
}

/// Pool that opens connections on first use. Only a missing or malformed
/// URL fails here.
pub fn init_lazy_pool(config: &EngineConfig) -> Result<PgPool> {
    let (pool_options, options) = pool_options(config)?;
    Ok(pool_options.connect_lazy_with(options))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lazy_pool_does_not_contact_the_server() {
        let config = EngineConfig {
            database_url: Some("postgres://biq@127.0.0.1:1/shop".to_string()),
            ..EngineConfig::default()
        };
        let pool = init_lazy_pool(&config).unwrap();
        assert_eq!(pool.size(), 0);

        let missing = EngineConfig::default();
        assert!(matches!(init_lazy_pool(&missing), Err(EngineError::Config(_))));
    }
}
