//! Worker pool: concurrent consumers that claim jobs from the queue, invoke
//! the tool dispatcher, and persist outcomes.
//!
//! Per-job state machine:
//! `Pending -> Dispatched -> Running -> {Succeeded | Retrying -> Pending | FailedTerminal}`
//!
//! Workers share no mutable state beyond the queue and the dispatcher's lock
//! table; every job is mutated by exactly the worker that claimed it.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::WorkerConfig,
    dispatch::{DispatchError, ToolDispatcher},
    metrics,
    queue::{JobQueue, QueuedJob},
    store::{Job, JobLogEntry, JobStatus, Store},
    Result,
};

pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn Store>,
    dispatcher: Arc<ToolDispatcher>,
    config: WorkerConfig,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn Store>,
        dispatcher: Arc<ToolDispatcher>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            store,
            dispatcher,
            config,
        }
    }

    /// Starts the fixed-size pool. Each worker pulls independently from the
    /// shared queue.
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        info!(workers = self.config.count, "starting worker pool");
        (0..self.config.count)
            .map(|worker| {
                let pool = self.clone();
                tokio::spawn(async move { pool.run_worker(worker).await })
            })
            .collect()
    }

    async fn run_worker(self: Arc<Self>, worker: usize) {
        debug!(worker, "worker started");
        loop {
            match self.queue.dequeue().await {
                Ok(entry) => {
                    if let Err(e) = self.process(entry).await {
                        error!(worker, job_id = %entry.job_id, "job processing failed: {e}");
                    }
                }
                Err(e) => {
                    error!(worker, "dequeue failed: {e}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn process(&self, entry: QueuedJob) -> Result<()> {
        let Some(job) = self.store.get_job(entry.job_id).await? else {
            warn!(job_id = %entry.job_id, "queued job has no store record, dropping");
            return self.queue.ack(entry.job_id).await;
        };

        // At-least-once delivery can hand us a job that already settled.
        if job.is_terminal() {
            debug!(job_id = %job.id, status = %job.status, "stale redelivery of terminal job");
            return self.queue.ack(entry.job_id).await;
        }

        self.store
            .update_job_status(job.id, JobStatus::Dispatched)
            .await?;
        self.store.mark_job_running(job.id, Utc::now()).await?;

        match self
            .dispatcher
            .dispatch(&job.tool, &job.resolved_params, &job.target_key)
            .await
        {
            Ok(invocation) => {
                info!(job_id = %job.id, tool = %job.tool, target = %job.target_key, "job succeeded");
                metrics::JOBS_SUCCEEDED_TOTAL.inc();
                self.finish(
                    &job,
                    JobStatus::Succeeded,
                    job.attempts + 1,
                    Some(invocation.detail),
                    entry.job_id,
                )
                .await
            }
            Err(DispatchError::TargetBusy { target }) => {
                // Another remediation holds this target. Defer without
                // consuming an attempt.
                metrics::DISPATCHES_DEFERRED_TOTAL.inc();
                debug!(job_id = %job.id, %target, "target busy, deferring");
                self.store
                    .update_job_status(job.id, JobStatus::Pending)
                    .await?;
                self.queue.nack(entry.job_id, self.defer_delay()).await
            }
            Err(DispatchError::Transient(msg)) => {
                let attempts = job.attempts + 1;
                if attempts >= job.max_attempts {
                    warn!(job_id = %job.id, attempts, "transient failure at attempt limit: {msg}");
                    metrics::JOBS_FAILED_TOTAL.inc();
                    self.finish(
                        &job,
                        JobStatus::FailedTerminal,
                        attempts,
                        Some(format!("transient failure after {attempts} attempts: {msg}")),
                        entry.job_id,
                    )
                    .await
                } else {
                    let delay = backoff_delay(
                        self.config.backoff_base(),
                        self.config.backoff_cap(),
                        job.attempts,
                    );
                    warn!(
                        job_id = %job.id,
                        attempts,
                        retry_in = ?delay,
                        "transient failure, scheduling retry: {msg}"
                    );
                    metrics::JOB_RETRIES_TOTAL.inc();
                    self.store.mark_job_retrying(job.id, attempts).await?;
                    self.queue.nack(entry.job_id, delay).await
                }
            }
            Err(e @ DispatchError::UnknownTool(_)) => {
                // The capability never ran; no attempt consumed.
                error!(job_id = %job.id, "misconfigured policy: {e}");
                metrics::JOBS_FAILED_TOTAL.inc();
                self.finish(
                    &job,
                    JobStatus::FailedTerminal,
                    job.attempts,
                    Some(e.to_string()),
                    entry.job_id,
                )
                .await
            }
            Err(e @ DispatchError::Permanent(_)) => {
                warn!(job_id = %job.id, "permanent failure: {e}");
                metrics::JOBS_FAILED_TOTAL.inc();
                self.finish(
                    &job,
                    JobStatus::FailedTerminal,
                    job.attempts + 1,
                    Some(e.to_string()),
                    entry.job_id,
                )
                .await
            }
        }
    }

    /// Terminal transition: persist the outcome, write the audit record, ack
    /// the queue entry so it is never redelivered.
    async fn finish(
        &self,
        job: &Job,
        status: JobStatus,
        attempts: i32,
        result_summary: Option<String>,
        queue_id: Uuid,
    ) -> Result<()> {
        let now = Utc::now();
        self.store
            .complete_job(job.id, status, attempts, result_summary.clone(), now)
            .await?;
        self.store
            .append_job_log(JobLogEntry {
                id: Uuid::new_v4(),
                job_id: job.id,
                action: job.tool.clone(),
                target: job.target_key.clone(),
                status: status.to_string(),
                result: result_summary,
                created_at: now,
            })
            .await?;
        self.queue.ack(queue_id).await
    }

    fn defer_delay(&self) -> Duration {
        // Busy targets usually free up within one capability call; the
        // backoff base is a reasonable first re-check.
        self.config.backoff_base().max(Duration::from_millis(100))
    }
}

/// `base * 2^prior_attempts`, capped. `prior_attempts` is the number of
/// attempts already executed, so the first retry waits the base delay.
fn backoff_delay(base: Duration, cap: Duration, prior_attempts: i32) -> Duration {
    let exponent = prior_attempts.clamp(0, 16) as u32;
    base.saturating_mul(2u32.saturating_pow(exponent)).min(cap)
}
