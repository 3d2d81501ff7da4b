//! Policy snapshot cache and background reloader.
//!
//! Policy CRUD happens outside this process; the pipeline only reads a
//! materialized set. The cache holds the current [`PolicySnapshot`] behind a
//! cheap atomic swap, refreshed by a dedicated task on a timer or when
//! explicitly invalidated.

use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tracing::{error, info, warn};

use crate::{
    policy::{Action, Condition, PolicySnapshot, SharedSnapshot, DEFAULT_PRIORITY},
    store::{NewPolicy, Store},
    Result,
};

pub struct PolicyCache {
    store: Arc<dyn Store>,
    snapshot: RwLock<SharedSnapshot>,
    invalidated: Notify,
}

impl PolicyCache {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            snapshot: RwLock::new(Arc::new(PolicySnapshot::default())),
            invalidated: Notify::new(),
        }
    }

    /// The current snapshot. Callers hold the Arc for a whole matching cycle;
    /// refreshes never mutate a snapshot in place.
    pub async fn snapshot(&self) -> SharedSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Fetches the policy set from the store and swaps in a new snapshot.
    pub async fn refresh(&self) -> Result<usize> {
        let policies = self.store.list_policies().await?;
        let count = policies.len();
        let next = Arc::new(PolicySnapshot::new(policies));
        *self.snapshot.write().await = next;
        Ok(count)
    }

    /// Signals the reloader to refresh ahead of its timer.
    pub fn invalidate(&self) {
        self.invalidated.notify_one();
    }

    /// Runs the refresh loop: one refresh per interval tick or invalidation
    /// signal, whichever comes first. Errors are logged and the previous
    /// snapshot stays active.
    pub async fn run_reloader(self: Arc<Self>, interval: std::time::Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.invalidated.notified() => {}
            }

            match self.refresh().await {
                Ok(count) => info!(policies = count, "policy snapshot refreshed"),
                Err(e) => error!("policy refresh failed, keeping previous snapshot: {e}"),
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct PolicySeed {
    name: String,
    condition: Condition,
    action: Action,
    #[serde(default = "default_priority")]
    priority: i32,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

/// Loads seed policies from a YAML file into an empty policy table. A
/// non-empty table is left untouched; the external store owns the policy set
/// after first boot.
pub async fn seed_policies(store: &Arc<dyn Store>, path: &Path) -> Result<usize> {
    if store.count_policies().await? > 0 {
        info!("policy table already populated, skipping seed file");
        return Ok(0);
    }

    let raw = tokio::fs::read_to_string(path).await?;
    let seeds: Vec<PolicySeed> = serde_yaml::from_str(&raw)?;
    let count = seeds.len();

    for seed in seeds {
        if seed.priority < 0 {
            warn!(policy = %seed.name, "negative priority in seed file, clamping to 0");
        }
        store
            .create_policy(NewPolicy {
                name: seed.name,
                condition: seed.condition,
                action: seed.action,
                priority: seed.priority.max(0),
            })
            .await?;
    }

    info!(policies = count, path = %path.display(), "seeded policy table");
    Ok(count)
}
