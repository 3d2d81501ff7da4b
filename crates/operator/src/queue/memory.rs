use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use crate::queue::{JobQueue, QueuedJob};
use crate::{Error, Result};

/// In-memory queue backend. Bounded; when full, `enqueue` reports
/// `QueueUnavailable` so the caller can degrade to the spool.
pub struct MemoryQueue {
    state: Mutex<State>,
    notify: Notify,
    capacity: usize,
    visibility_timeout: Duration,
}

struct State {
    ready: BinaryHeap<ReadyEntry>,
    delayed: Vec<Delayed>,
    in_flight: HashMap<Uuid, InFlight>,
    next_seq: u64,
}

struct ReadyEntry {
    job: QueuedJob,
    seq: u64,
}

struct Delayed {
    job: QueuedJob,
    ready_at: Instant,
}

struct InFlight {
    job: QueuedJob,
    deadline: Instant,
}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        (self.job.priority, self.seq) == (other.job.priority, other.seq)
    }
}

impl Eq for ReadyEntry {}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// BinaryHeap is a max-heap; invert so the lowest (priority, seq) pops first.
impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.job.priority, other.seq).cmp(&(self.job.priority, self.seq))
    }
}

impl State {
    fn size(&self) -> usize {
        self.ready.len() + self.delayed.len() + self.in_flight.len()
    }

    fn push_ready(&mut self, job: QueuedJob) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.ready.push(ReadyEntry { job, seq });
    }

    /// Moves due delayed entries and visibility-expired in-flight entries
    /// back into the ready set. Expiry is the at-least-once redelivery path.
    fn promote(&mut self, now: Instant) {
        let mut i = 0;
        while i < self.delayed.len() {
            if self.delayed[i].ready_at <= now {
                let entry = self.delayed.swap_remove(i);
                self.push_ready(entry.job);
            } else {
                i += 1;
            }
        }

        let expired: Vec<Uuid> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(f) = self.in_flight.remove(&id) {
                debug!(job_id = %id, "visibility timeout lapsed, redelivering");
                self.push_ready(f.job);
            }
        }
    }

    /// The next instant at which promotion could make a job visible.
    fn next_wakeup(&self, now: Instant) -> Option<Duration> {
        let delayed = self.delayed.iter().map(|d| d.ready_at);
        let in_flight = self.in_flight.values().map(|f| f.deadline);
        delayed
            .chain(in_flight)
            .min()
            .map(|at| at.saturating_duration_since(now))
    }
}

impl MemoryQueue {
    pub fn new(capacity: usize, visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(State {
                ready: BinaryHeap::new(),
                delayed: Vec::new(),
                in_flight: HashMap::new(),
                next_seq: 0,
            }),
            notify: Notify::new(),
            capacity,
            visibility_timeout,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // Lock poisoning would require a panic while holding the guard; the
        // critical sections below cannot panic on valid state.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Jobs currently tracked in any stage (ready, delayed, or in flight).
    pub fn depth(&self) -> usize {
        self.lock().size()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, job: QueuedJob) -> Result<()> {
        {
            let mut state = self.lock();
            if state.size() >= self.capacity {
                return Err(Error::QueueUnavailable(format!(
                    "memory queue at capacity ({})",
                    self.capacity
                )));
            }
            state.push_ready(job);
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self) -> Result<QueuedJob> {
        loop {
            let wait = {
                let mut state = self.lock();
                let now = Instant::now();
                state.promote(now);

                if let Some(entry) = state.ready.pop() {
                    state.in_flight.insert(
                        entry.job.job_id,
                        InFlight {
                            job: entry.job,
                            deadline: now + self.visibility_timeout,
                        },
                    );
                    return Ok(entry.job);
                }
                state.next_wakeup(now)
            };

            match wait {
                Some(duration) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep(duration) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    async fn ack(&self, job_id: Uuid) -> Result<()> {
        let mut state = self.lock();
        if state.in_flight.remove(&job_id).is_none() {
            // Already redelivered and settled elsewhere; at-least-once makes
            // this benign.
            debug!(job_id = %job_id, "ack for unknown in-flight job, ignoring");
        }
        Ok(())
    }

    async fn nack(&self, job_id: Uuid, delay: Duration) -> Result<()> {
        {
            let mut state = self.lock();
            let Some(f) = state.in_flight.remove(&job_id) else {
                debug!(job_id = %job_id, "nack for unknown in-flight job, ignoring");
                return Ok(());
            };
            if delay.is_zero() {
                state.push_ready(f.job);
            } else {
                state.delayed.push(Delayed {
                    job: f.job,
                    ready_at: Instant::now() + delay,
                });
            }
        }
        // Wake a waiter so it recomputes its sleep against the new entry.
        self.notify.notify_one();
        Ok(())
    }
}
