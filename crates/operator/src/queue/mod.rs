//! Durable, priority-aware job queue decoupling the alert ingestor from the
//! worker pool.
//!
//! Delivery is at-least-once: a dequeued entry that is never acked becomes
//! visible again after the visibility timeout. Ordering is priority first
//! (lower value dequeued first), FIFO within equal priority.

mod fallback;
mod memory;
mod spool;

pub use fallback::FallbackQueue;
pub use memory::MemoryQueue;
pub use spool::SpoolQueue;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::{QueueBackend, QueueConfig};

/// The queue-level view of a job: just enough to claim it and order it. The
/// full record (frozen params, attempts) lives in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub job_id: Uuid,
    pub priority: i32,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Makes the job available to workers.
    async fn enqueue(&self, job: QueuedJob) -> crate::Result<()>;

    /// Claims the next visible job, waiting until one is available. The
    /// entry stays invisible until acked, nacked, or its visibility timeout
    /// lapses.
    async fn dequeue(&self) -> crate::Result<QueuedJob>;

    /// Removes a claimed job permanently. No further redelivery.
    async fn ack(&self, job_id: Uuid) -> crate::Result<()>;

    /// Returns a claimed job to the queue, visible again after `delay`.
    async fn nack(&self, job_id: Uuid, delay: Duration) -> crate::Result<()>;
}

pub async fn create_queue(config: &QueueConfig) -> crate::Result<Arc<dyn JobQueue>> {
    match config.backend {
        QueueBackend::Memory => {
            let primary: Arc<dyn JobQueue> = Arc::new(MemoryQueue::new(
                config.capacity,
                config.visibility_timeout(),
            ));
            Ok(Arc::new(FallbackQueue::new(
                primary,
                config.dir.join("overflow.jsonl"),
            )))
        }
        QueueBackend::Spool => Ok(Arc::new(
            SpoolQueue::open(&config.dir, config.visibility_timeout()).await?,
        )),
    }
}
