//! Alert ingestion: normalizes inbound Alertmanager batches, runs policy
//! evaluation, and enqueues remediation jobs.
//!
//! Evaluation happens synchronously in the webhook request, but the request
//! returns as soon as jobs are enqueued; remediation latency never backs up
//! into alert delivery.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    metrics,
    policy::{self, PolicyCache, SharedSnapshot},
    queue::{JobQueue, QueuedJob},
    store::{Job, JobStatus, Store},
    Result,
};

// Alertmanager webhook payload structures. Fields beyond what the pipeline
// needs are accepted and ignored; senders vary.
#[derive(Debug, Deserialize, Serialize)]
pub struct AlertmanagerWebhook {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(rename = "groupKey", default)]
    pub group_key: Option<String>,
    pub status: String,
    #[serde(default)]
    pub receiver: Option<String>,
    #[serde(rename = "groupLabels", default)]
    pub group_labels: HashMap<String, String>,
    #[serde(rename = "commonLabels", default)]
    pub common_labels: HashMap<String, String>,
    #[serde(rename = "commonAnnotations", default)]
    pub common_annotations: HashMap<String, String>,
    #[serde(rename = "externalURL", default)]
    pub external_url: Option<String>,
    #[serde(default)]
    pub alerts: Vec<AlertmanagerAlert>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AlertmanagerAlert {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(rename = "startsAt", default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(rename = "endsAt", default)]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

/// One normalized alert, the unit of policy evaluation. Ephemeral; nothing
/// outlives the job snapshot it produces.
#[derive(Debug, Clone)]
pub struct AlertEvent {
    pub status: String,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub fingerprint: String,
    pub received_at: DateTime<Utc>,
}

impl AlertEvent {
    /// Normalizes one batch entry. A per-alert status wins over the group
    /// status when present.
    pub fn from_batch_entry(group_status: &str, alert: &AlertmanagerAlert) -> Self {
        let status = alert
            .status
            .clone()
            .unwrap_or_else(|| group_status.to_string());
        let alert_name = alert
            .labels
            .get("alertname")
            .map(String::as_str)
            .unwrap_or("unknown");
        let fingerprint = alert
            .fingerprint
            .clone()
            .unwrap_or_else(|| Self::generate_fingerprint(alert_name, &alert.labels));

        Self {
            status,
            labels: alert.labels.clone(),
            annotations: alert.annotations.clone(),
            fingerprint,
            received_at: Utc::now(),
        }
    }

    pub fn generate_fingerprint(alert_name: &str, labels: &HashMap<String, String>) -> String {
        use std::collections::BTreeMap;

        // Sort labels for consistent fingerprinting
        let sorted_labels: BTreeMap<_, _> = labels.iter().collect();
        let labels_str = serde_json::to_string(&sorted_labels).unwrap_or_default();

        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(alert_name.as_bytes());
        hasher.update(b"-");
        hasher.update(labels_str.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Serialize)]
pub struct IngestSummary {
    pub status: &'static str,
    pub received: usize,
    pub enqueued: usize,
    pub no_match: usize,
    pub skipped_policies: usize,
    pub job_ids: Vec<Uuid>,
}

enum AlertOutcome {
    Enqueued { job_id: Uuid, skipped: usize },
    NoMatch { skipped: usize },
    Failed { skipped: usize },
}

pub struct Ingestor {
    policies: Arc<PolicyCache>,
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn Store>,
    max_attempts: i32,
}

impl Ingestor {
    pub fn new(
        policies: Arc<PolicyCache>,
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn Store>,
        max_attempts: u32,
    ) -> Self {
        Self {
            policies,
            queue,
            store,
            max_attempts: max_attempts as i32,
        }
    }

    /// Processes one webhook batch. Alerts are independent: evaluation fans
    /// out concurrently, per-alert failures are logged and do not fail the
    /// batch, and at most one job is created per alert.
    pub async fn ingest(&self, payload: AlertmanagerWebhook) -> Result<IngestSummary> {
        let snapshot = self.policies.snapshot().await;
        let received = payload.alerts.len();
        metrics::ALERTS_RECEIVED_TOTAL.inc_by(received as u64);

        let events: Vec<AlertEvent> = payload
            .alerts
            .iter()
            .map(|alert| AlertEvent::from_batch_entry(&payload.status, alert))
            .collect();

        let outcomes = join_all(
            events
                .into_iter()
                .map(|event| self.process_alert(event, snapshot.clone())),
        )
        .await;

        let mut summary = IngestSummary {
            status: "no_action",
            received,
            enqueued: 0,
            no_match: 0,
            skipped_policies: 0,
            job_ids: Vec::new(),
        };
        for outcome in outcomes {
            match outcome {
                AlertOutcome::Enqueued { job_id, skipped } => {
                    summary.enqueued += 1;
                    summary.skipped_policies += skipped;
                    summary.job_ids.push(job_id);
                }
                AlertOutcome::NoMatch { skipped } | AlertOutcome::Failed { skipped } => {
                    summary.no_match += 1;
                    summary.skipped_policies += skipped;
                }
            }
        }
        if summary.enqueued > 0 {
            summary.status = "accepted";
        }

        info!(
            received = summary.received,
            enqueued = summary.enqueued,
            "alert batch processed"
        );
        Ok(summary)
    }

    async fn process_alert(&self, alert: AlertEvent, snapshot: SharedSnapshot) -> AlertOutcome {
        let outcome = policy::evaluate(&alert, &snapshot);

        for skipped in &outcome.skipped {
            metrics::UNRESOLVED_PARAMS_TOTAL.inc();
            warn!(
                policy = %skipped.policy_name,
                fingerprint = %alert.fingerprint,
                error = %skipped.error,
                "policy matched but parameters did not resolve"
            );
        }
        let skipped = outcome.skipped.len();

        let Some(matched) = outcome.matched else {
            debug!(fingerprint = %alert.fingerprint, "no policy applies");
            return AlertOutcome::NoMatch { skipped };
        };

        let job = Job {
            id: Uuid::new_v4(),
            policy_id: matched.policy_id,
            policy_name: matched.policy_name.clone(),
            tool: matched.tool.clone(),
            target_key: matched.resolution.target_key.clone(),
            resolved_params: matched.resolution.params.clone(),
            alert_fingerprint: alert.fingerprint.clone(),
            attempts: 0,
            max_attempts: self.max_attempts,
            status: JobStatus::Pending,
            result_summary: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        let queued = QueuedJob {
            job_id: job.id,
            priority: matched.priority,
        };

        if let Err(e) = self.store.save_job(job).await {
            warn!(policy = %matched.policy_name, "failed to persist job: {e}");
            return AlertOutcome::Failed { skipped };
        }
        if let Err(e) = self.queue.enqueue(queued).await {
            // The fallback queue absorbs backend outages; reaching this
            // means the spool is down too. The job row stays pending.
            warn!(job_id = %queued.job_id, "failed to enqueue job: {e}");
            return AlertOutcome::Failed { skipped };
        }

        metrics::JOBS_ENQUEUED_TOTAL.inc();
        info!(
            job_id = %queued.job_id,
            policy = %matched.policy_name,
            tool = %matched.tool,
            target = %matched.resolution.target_key,
            "remediation job enqueued"
        );
        AlertOutcome::Enqueued {
            job_id: queued.job_id,
            skipped,
        }
    }
}
