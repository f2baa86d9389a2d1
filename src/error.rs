use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Error reported by the relational engine. The message is kept verbatim
    /// because syntax errors are surfaced to callers unchanged.
    #[error("{message}")]
    Database {
        code: Option<String>,
        message: String,
    },

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    pub fn database(message: impl Into<String>) -> Self {
        EngineError::Database {
            code: None,
            message: message.into(),
        }
    }

    pub fn database_with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Database {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// SQLSTATE (or vendor) code attached to a database error, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            EngineError::Database { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => EngineError::Database {
                code: db_err.code().map(|c| c.into_owned()),
                message: db_err.message().to_string(),
            },
            sqlx::Error::Io(e) => EngineError::Connectivity(e.to_string()),
            sqlx::Error::Tls(e) => EngineError::Connectivity(e.to_string()),
            sqlx::Error::PoolTimedOut => {
                EngineError::Connectivity("timed out acquiring a connection".to_string())
            }
            sqlx::Error::PoolClosed => {
                EngineError::Connectivity("connection pool is closed".to_string())
            }
            sqlx::Error::WorkerCrashed => {
                EngineError::Connectivity("connection worker crashed".to_string())
            }
            sqlx::Error::Configuration(e) => EngineError::Config(e.to_string()),
            other => EngineError::database(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
