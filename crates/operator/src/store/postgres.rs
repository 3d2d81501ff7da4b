use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, Pool, Postgres, Row};
use std::collections::HashMap;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    policy::Policy,
    store::{Job, JobLogEntry, JobStatus, NewPolicy, Store},
    Error, Result,
};

pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self> {
        info!("Connecting to PostgreSQL database");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(connection_string)
            .await
            .map_err(|e| {
                error!("Failed to connect to PostgreSQL: {}", e);
                Error::Sqlx(e)
            })?;

        Ok(Self { pool })
    }

    fn row_to_policy(r: &sqlx::postgres::PgRow) -> Result<Policy> {
        Ok(Policy {
            id: r.get("id"),
            name: r.get("name"),
            condition: serde_json::from_str(r.get("condition"))?,
            action: serde_json::from_str(r.get("action"))?,
            priority: r.get("priority"),
            created_at: r.get("created_at"),
        })
    }

    fn row_to_job(r: &sqlx::postgres::PgRow) -> Result<Job> {
        let resolved_params: HashMap<String, String> =
            serde_json::from_str(r.get("resolved_params"))?;
        Ok(Job {
            id: r.get::<String, _>("id").parse()?,
            policy_id: r.get("policy_id"),
            policy_name: r.get("policy_name"),
            tool: r.get("tool"),
            target_key: r.get("target_key"),
            resolved_params,
            alert_fingerprint: r.get("alert_fingerprint"),
            attempts: r.get("attempts"),
            max_attempts: r.get("max_attempts"),
            status: r.get::<String, _>("status").parse()?,
            result_summary: r.get("result_summary"),
            created_at: r.get("created_at"),
            started_at: r.get("started_at"),
            completed_at: r.get("completed_at"),
        })
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn init(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to run migrations: {}", e);
                Error::Migrate(e)
            })?;

        Ok(())
    }

    async fn list_policies(&self) -> Result<Vec<Policy>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, condition, action, priority, created_at
            FROM policies
            ORDER BY priority ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_policy).collect()
    }

    async fn count_policies(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM policies")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    async fn create_policy(&self, policy: NewPolicy) -> Result<Policy> {
        let condition_json = serde_json::to_string(&policy.condition)?;
        let action_json = serde_json::to_string(&policy.action)?;
        let created_at = Utc::now();

        let row = sqlx::query("SELECT COALESCE(MAX(id), 0) + 1 AS next_id FROM policies")
            .fetch_one(&self.pool)
            .await?;
        let id: i64 = row.get("next_id");

        sqlx::query(
            r#"
            INSERT INTO policies (id, name, condition, action, priority, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(&policy.name)
        .bind(condition_json)
        .bind(action_json)
        .bind(policy.priority)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(Policy {
            id,
            name: policy.name,
            condition: policy.condition,
            action: policy.action,
            priority: policy.priority,
            created_at,
        })
    }

    async fn save_job(&self, job: Job) -> Result<()> {
        debug!("Saving job: {}", job.id);

        let params_json = serde_json::to_string(&job.resolved_params)?;

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, policy_id, policy_name, tool, target_key, resolved_params,
                alert_fingerprint, attempts, max_attempts, status,
                result_summary, created_at, started_at, completed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(job.id.to_string())
        .bind(job.policy_id)
        .bind(&job.policy_name)
        .bind(&job.tool)
        .bind(&job.target_key)
        .bind(params_json)
        .bind(&job.alert_fingerprint)
        .bind(job.attempts)
        .bind(job.max_attempts)
        .bind(job.status.to_string())
        .bind(&job.result_summary)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query(
            r#"
            SELECT id, policy_id, policy_name, tool, target_key, resolved_params,
                   alert_fingerprint, attempts, max_attempts, status,
                   result_summary, created_at, started_at, completed_at
            FROM jobs
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn update_job_status(&self, id: Uuid, status: JobStatus) -> Result<()> {
        sqlx::query("UPDATE jobs SET status = $1 WHERE id = $2")
            .bind(status.to_string())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_job_running(&self, id: Uuid, started_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $1, started_at = COALESCE(started_at, $2)
            WHERE id = $3
            "#,
        )
        .bind(JobStatus::Running.to_string())
        .bind(started_at)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_job_retrying(&self, id: Uuid, attempts: i32) -> Result<()> {
        sqlx::query("UPDATE jobs SET status = $1, attempts = $2 WHERE id = $3")
            .bind(JobStatus::Retrying.to_string())
            .bind(attempts)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn complete_job(
        &self,
        id: Uuid,
        status: JobStatus,
        attempts: i32,
        result_summary: Option<String>,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $1, attempts = $2, result_summary = $3, completed_at = $4
            WHERE id = $5
            "#,
        )
        .bind(status.to_string())
        .bind(attempts)
        .bind(&result_summary)
        .bind(completed_at)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_jobs(&self, limit: i64, offset: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query(
            r#"
            SELECT id, policy_id, policy_name, tool, target_key, resolved_params,
                   alert_fingerprint, attempts, max_attempts, status,
                   result_summary, created_at, started_at, completed_at
            FROM jobs
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn append_job_log(&self, entry: JobLogEntry) -> Result<()> {
        debug!("Appending job log for job: {}", entry.job_id);

        sqlx::query(
            r#"
            INSERT INTO job_logs (id, job_id, action, target, status, result, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.job_id.to_string())
        .bind(&entry.action)
        .bind(&entry.target)
        .bind(&entry.status)
        .bind(&entry.result)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_job_logs(&self, limit: i64) -> Result<Vec<JobLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, job_id, action, target, status, result, created_at
            FROM job_logs
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                Ok(JobLogEntry {
                    id: r.get::<String, _>("id").parse()?,
                    job_id: r.get::<String, _>("job_id").parse()?,
                    action: r.get("action"),
                    target: r.get("target"),
                    status: r.get("status"),
                    result: r.get("result"),
                    created_at: r.get("created_at"),
                })
            })
            .collect()
    }
}
