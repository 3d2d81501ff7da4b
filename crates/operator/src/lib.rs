pub mod config;
pub mod dispatch;
pub mod ingest;
pub mod metrics;
pub mod policy;
pub mod queue;
pub mod server;
pub mod store;
pub mod worker;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Unresolved parameter '{param}': alert has no key '{key}'")]
    UnresolvedParameter { param: String, key: String },
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Transient failure: {0}")]
    Transient(String),
    #[error("Permanent failure: {0}")]
    Permanent(String),
    #[error("Queue backend unavailable: {0}")]
    QueueUnavailable(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Whether the worker may retry the job after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::QueueUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
