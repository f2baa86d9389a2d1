//! Relational engine access
//!
//! The coordinator only talks to the [`QueryEngine`] seam; [`PostgresEngine`]
//! is the production implementation backed by a `sqlx` pool.

pub mod connection;
pub mod engine;
pub mod postgres;
pub mod result;

pub use connection::{init_lazy_pool, init_pool, DbPool};
pub use engine::{EngineConnection, QueryEngine};
pub use postgres::PostgresEngine;
pub use result::TabularResult;
