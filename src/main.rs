use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bi_query_engine::{
    EngineConfig, JoinKind, PostgresEngine, QueryEngine, QueryService, RelationshipEdge,
    RelationshipGraph,
};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "biq")]
#[command(about = "Validated, self-correcting SQL execution for BI questions")]
struct Args {
    /// JSON file with relationship declarations (overrides BIQ_RELATIONSHIPS_PATH)
    #[arg(long, global = true)]
    relationships: Option<PathBuf>,

    /// Extra relationship, e.g. "orders.customer_id = customers.id"
    #[arg(long = "relate", global = true)]
    relate: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a query with validation, correction and retries
    Run {
        query: String,
        /// Maximum re-executions (default: BIQ_MAX_RETRIES)
        #[arg(short, long)]
        max_retries: Option<u32>,
        /// Record the result under this question
        #[arg(long)]
        question: Option<String>,
    },
    /// Check table references and apply fallback table names
    Validate { query: String },
    /// List referenced tables and invalid qualified columns
    Introspect { query: String },
    /// Compound growth between two periods with scenario forecasts
    Growth {
        start: i32,
        end: i32,
        /// Forecast periods after END
        #[arg(short, long)]
        forecast: Vec<i32>,
    },
    /// Columns of a table
    Columns { table: String },
    /// Relationships declared for a table
    Relationships { table: String },
    /// Join fragment between two tables
    Join { from: String, to: String },
    /// Reload the schema from the database
    RefreshSchema,
    /// Recent successful questions
    History,
}

fn load_edges(args: &Args, config: &EngineConfig) -> Result<Vec<RelationshipEdge>> {
    let mut edges = match args.relationships.as_ref().or(config.relationships_path.as_ref()) {
        Some(path) => RelationshipGraph::load_edges(path)
            .with_context(|| format!("reading relationships from {}", path.display()))?,
        None => Vec::new(),
    };
    for declaration in &args.relate {
        edges.push(RelationshipEdge::parse(declaration, JoinKind::Inner)?);
    }
    Ok(edges)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = EngineConfig::from_env();
    let edges = load_edges(&args, &config)?;

    // Connections open on first use: metadata commands can run from a
    // fresh schema cache while the database is unreachable.
    let engine: Arc<dyn QueryEngine> = Arc::new(
        PostgresEngine::lazy_with_config(&config).context("configuring the database pool")?,
    );
    let service = QueryService::from_config(engine, &config, edges)?;

    if let Command::RefreshSchema = args.command {
        info!("📡 Reading schema from the database...");
        let report = service.refresh_schema().await?;
        println!("✅ Schema refreshed: {} tables", report.table_count);
        return Ok(());
    }

    if let Some(report) = service.prepare_schema().await {
        info!("Schema ready ({:?}, {} tables)", report.source, report.table_count);
    }

    match args.command {
        Command::Run {
            query,
            max_retries,
            question,
        } => {
            let max_retries = max_retries.unwrap_or(config.max_retries);
            let outcome = match question {
                Some(q) => service.execute_for_question(&q, &query, max_retries).await,
                None => service.execute_with_retry(&query, max_retries).await,
            };
            if !outcome.success {
                error!("❌ {}", outcome.message);
            }
            print_json(&outcome)?;
        }
        Command::Validate { query } => print_json(&service.validate_against_schema(&query))?,
        Command::Introspect { query } => print_json(&service.introspect(&query))?,
        Command::Growth {
            start,
            end,
            forecast,
        } => {
            let result = service.compute_growth(start, end, &forecast).await;
            if !result.success {
                error!("❌ {}", result.message);
            }
            print_json(&result)?;
        }
        Command::Columns { table } => {
            for column in service.get_table_columns(&table) {
                println!("{}", column);
            }
        }
        Command::Relationships { table } => print_json(&service.infer_relationships(&table))?,
        Command::Join { from, to } => {
            let clause = service.build_join_clause(&from, &to);
            if clause.is_empty() {
                println!("(no direct relationship between {} and {})", from, to);
            } else {
                println!("{}", clause);
            }
        }
        Command::History => print_json(&service.ledger().history())?,
        Command::RefreshSchema => {}
    }

    Ok(())
}
