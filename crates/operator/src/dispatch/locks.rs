use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

/// Advisory per-target locks guarding concurrent remediation of the same
/// infrastructure target. Entries carry a TTL so a crashed or leaked holder
/// cannot wedge a target forever; the TTL must exceed the capability call
/// timeout (enforced at config load).
#[derive(Clone)]
pub struct TargetLocks {
    ttl: Duration,
    table: Arc<Mutex<HashMap<String, Instant>>>,
}

impl TargetLocks {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            table: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Attempts to take the lock for `target`. Returns `None` when another
    /// holder's entry is still live; an expired entry is treated as free.
    pub fn try_acquire(&self, target: &str) -> Option<TargetLockGuard> {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        if let Some(&deadline) = table.get(target) {
            if deadline > now {
                return None;
            }
            warn!(%target, "taking over expired target lock");
        }

        let deadline = now + self.ttl;
        table.insert(target.to_string(), deadline);
        Some(TargetLockGuard {
            table: self.table.clone(),
            target: target.to_string(),
            deadline,
        })
    }

    pub fn held(&self, target: &str) -> bool {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table
            .get(target)
            .map_or(false, |&deadline| deadline > Instant::now())
    }
}

/// Releases the lock on drop — unless the entry was already taken over after
/// TTL expiry, in which case the newer holder keeps it.
pub struct TargetLockGuard {
    table: Arc<Mutex<HashMap<String, Instant>>>,
    target: String,
    deadline: Instant,
}

impl Drop for TargetLockGuard {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        if table.get(&self.target) == Some(&self.deadline) {
            table.remove(&self.target);
        }
    }
}
