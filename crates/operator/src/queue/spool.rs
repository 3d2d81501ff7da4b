use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::queue::{JobQueue, MemoryQueue, QueuedJob};
use crate::Result;

/// Durable local queue backend: an append-only JSONL journal of
/// enqueue/ack records, replayed at startup. Jobs that were in flight when
/// the process died were never acked, so they come back — at-least-once
/// across restarts, best-effort.
pub struct SpoolQueue {
    inner: MemoryQueue,
    journal: Mutex<fs::File>,
    path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum SpoolRecord {
    Enqueue { job: QueuedJob },
    Ack { job_id: Uuid },
}

impl SpoolQueue {
    pub async fn open(dir: &Path, visibility_timeout: Duration) -> Result<Self> {
        fs::create_dir_all(dir).await?;
        let path = dir.join("queue.jsonl");

        let pending = Self::replay(&path).await?;

        // Compact: rewrite the journal as just the surviving enqueues.
        let mut compacted = String::new();
        for job in &pending {
            compacted.push_str(&serde_json::to_string(&SpoolRecord::Enqueue { job: *job })?);
            compacted.push('\n');
        }
        fs::write(&path, compacted).await?;

        if !pending.is_empty() {
            info!(
                jobs = pending.len(),
                path = %path.display(),
                "recovered spooled jobs"
            );
        }

        // The journal is the capacity bound; the in-memory index is not.
        let inner = MemoryQueue::new(usize::MAX, visibility_timeout);
        for job in pending {
            inner.enqueue(job).await?;
        }

        let journal = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            inner,
            journal: Mutex::new(journal),
            path,
        })
    }

    /// Pending set = journaled enqueues minus journaled acks, in enqueue
    /// order. Corrupt lines are skipped, not fatal: a torn final write after
    /// a crash must not brick the queue.
    async fn replay(path: &Path) -> Result<Vec<QueuedJob>> {
        let raw = match fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut order: Vec<Uuid> = Vec::new();
        let mut jobs: HashMap<Uuid, QueuedJob> = HashMap::new();

        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SpoolRecord>(line) {
                Ok(SpoolRecord::Enqueue { job }) => {
                    if jobs.insert(job.job_id, job).is_none() {
                        order.push(job.job_id);
                    }
                }
                Ok(SpoolRecord::Ack { job_id }) => {
                    jobs.remove(&job_id);
                }
                Err(e) => {
                    warn!(path = %path.display(), "skipping corrupt spool record: {e}");
                }
            }
        }

        Ok(order.into_iter().filter_map(|id| jobs.remove(&id)).collect())
    }

    async fn append(&self, record: &SpoolRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut journal = self.journal.lock().await;
        journal.write_all(line.as_bytes()).await?;
        journal.flush().await?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl JobQueue for SpoolQueue {
    async fn enqueue(&self, job: QueuedJob) -> Result<()> {
        // Journal before exposing the job; a crash in between redelivers
        // rather than loses.
        self.append(&SpoolRecord::Enqueue { job }).await?;
        self.inner.enqueue(job).await
    }

    async fn dequeue(&self) -> Result<QueuedJob> {
        self.inner.dequeue().await
    }

    async fn ack(&self, job_id: Uuid) -> Result<()> {
        self.append(&SpoolRecord::Ack { job_id }).await?;
        self.inner.ack(job_id).await
    }

    async fn nack(&self, job_id: Uuid, delay: Duration) -> Result<()> {
        // Membership is unchanged by a nack; nothing to journal.
        self.inner.nack(job_id, delay).await
    }
}
