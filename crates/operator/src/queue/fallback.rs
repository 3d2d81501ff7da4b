use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::queue::{JobQueue, QueuedJob};
use crate::{Error, Result};

/// Degrade wrapper around a primary queue backend. When the primary refuses
/// an enqueue (`QueueBackendUnavailable`), the job lands in a local overflow
/// file instead and alert ingestion still succeeds. Overflowed jobs drain
/// back into the primary ahead of the next dequeue.
pub struct FallbackQueue {
    primary: Arc<dyn JobQueue>,
    overflow_path: PathBuf,
    overflow: Mutex<()>,
}

impl FallbackQueue {
    pub fn new(primary: Arc<dyn JobQueue>, overflow_path: PathBuf) -> Self {
        Self {
            primary,
            overflow_path,
            overflow: Mutex::new(()),
        }
    }

    async fn spill(&self, job: QueuedJob) -> Result<()> {
        let _guard = self.overflow.lock().await;

        if let Some(parent) = self.overflow_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(&job)?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.overflow_path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Re-enqueues spilled jobs into the primary. Jobs the primary still
    /// refuses stay in the overflow file for a later pass.
    async fn drain(&self) -> Result<()> {
        let _guard = self.overflow.lock().await;

        let raw = match fs::read_to_string(&self.overflow_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut remaining: Vec<QueuedJob> = Vec::new();
        let mut drained = 0usize;
        let mut primary_full = false;

        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let job: QueuedJob = match serde_json::from_str(line) {
                Ok(job) => job,
                Err(e) => {
                    warn!("skipping corrupt overflow record: {e}");
                    continue;
                }
            };

            if primary_full {
                remaining.push(job);
                continue;
            }
            match self.primary.enqueue(job).await {
                Ok(()) => drained += 1,
                Err(Error::QueueUnavailable(_)) => {
                    primary_full = true;
                    remaining.push(job);
                }
                Err(e) => return Err(e),
            }
        }

        if drained > 0 {
            info!(drained, "overflow jobs drained back into primary queue");
        }

        if remaining.is_empty() {
            match fs::remove_file(&self.overflow_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        } else {
            let mut contents = String::new();
            for job in &remaining {
                contents.push_str(&serde_json::to_string(job)?);
                contents.push('\n');
            }
            fs::write(&self.overflow_path, contents).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl JobQueue for FallbackQueue {
    async fn enqueue(&self, job: QueuedJob) -> Result<()> {
        match self.primary.enqueue(job).await {
            Ok(()) => Ok(()),
            Err(Error::QueueUnavailable(reason)) => {
                warn!(job_id = %job.job_id, %reason, "primary queue unavailable, spooling job");
                self.spill(job).await
            }
            Err(e) => Err(e),
        }
    }

    async fn dequeue(&self) -> Result<QueuedJob> {
        if let Err(e) = self.drain().await {
            warn!("overflow drain failed: {e}");
        }
        self.primary.dequeue().await
    }

    async fn ack(&self, job_id: Uuid) -> Result<()> {
        self.primary.ack(job_id).await
    }

    async fn nack(&self, job_id: Uuid, delay: Duration) -> Result<()> {
        self.primary.nack(job_id, delay).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;

    fn job(priority: i32) -> QueuedJob {
        QueuedJob {
            job_id: Uuid::new_v4(),
            priority,
        }
    }

    #[tokio::test]
    async fn full_primary_spills_and_drains() {
        let dir = tempfile::tempdir().unwrap();
        let primary = Arc::new(MemoryQueue::new(1, Duration::from_secs(60)));
        let queue = FallbackQueue::new(primary, dir.path().join("overflow.jsonl"));

        let first = job(10);
        let second = job(20);
        queue.enqueue(first).await.unwrap();
        // Primary is full; this one goes to the overflow file.
        queue.enqueue(second).await.unwrap();
        assert!(dir.path().join("overflow.jsonl").exists());

        // First dequeue frees a primary slot and drains the overflow.
        let a = queue.dequeue().await.unwrap();
        queue.ack(a.job_id).await.unwrap();
        let b = queue.dequeue().await.unwrap();
        queue.ack(b.job_id).await.unwrap();

        let mut seen = vec![a.job_id, b.job_id];
        seen.sort();
        let mut expected = vec![first.job_id, second.job_id];
        expected.sort();
        assert_eq!(seen, expected);
        assert!(!dir.path().join("overflow.jsonl").exists());
    }

    #[tokio::test]
    async fn healthy_primary_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let primary = Arc::new(MemoryQueue::new(16, Duration::from_secs(60)));
        let queue = FallbackQueue::new(primary, dir.path().join("overflow.jsonl"));

        let j = job(10);
        queue.enqueue(j).await.unwrap();
        assert!(!dir.path().join("overflow.jsonl").exists());
        assert_eq!(queue.dequeue().await.unwrap().job_id, j.job_id);
    }
}
