mod config;
mod factory;
mod models;
mod postgres;
mod sqlite;

pub use config::{DatabaseConfig, DatabaseType};
pub use factory::create_store;
pub use models::*;
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::policy::Policy;

#[async_trait]
pub trait Store: Send + Sync {
    // Initialize database schema
    async fn init(&self) -> crate::Result<()>;

    // Policy operations (read-mostly; writes serve the seed path)
    async fn list_policies(&self) -> crate::Result<Vec<Policy>>;
    async fn count_policies(&self) -> crate::Result<i64>;
    async fn create_policy(&self, policy: NewPolicy) -> crate::Result<Policy>;

    // Job operations
    async fn save_job(&self, job: Job) -> crate::Result<()>;
    async fn get_job(&self, id: Uuid) -> crate::Result<Option<Job>>;
    async fn update_job_status(&self, id: Uuid, status: JobStatus) -> crate::Result<()>;
    async fn mark_job_running(&self, id: Uuid, started_at: DateTime<Utc>) -> crate::Result<()>;
    async fn mark_job_retrying(&self, id: Uuid, attempts: i32) -> crate::Result<()>;
    async fn complete_job(
        &self,
        id: Uuid,
        status: JobStatus,
        attempts: i32,
        result_summary: Option<String>,
        completed_at: DateTime<Utc>,
    ) -> crate::Result<()>;
    async fn list_jobs(&self, limit: i64, offset: i64) -> crate::Result<Vec<Job>>;

    // Job log operations (append-only audit trail)
    async fn append_job_log(&self, entry: JobLogEntry) -> crate::Result<()>;
    async fn list_job_logs(&self, limit: i64) -> crate::Result<Vec<JobLogEntry>>;
}
