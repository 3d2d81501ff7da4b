//! Policy evaluation: condition matching and first-applicable selection.

use tracing::debug;

use crate::{
    ingest::AlertEvent,
    policy::{resolver, Condition, PolicySnapshot, Resolution},
    Error,
};

impl Condition {
    /// Evaluates this condition against one alert. Total: missing keys are a
    /// non-match, never an error.
    pub fn matches(&self, alert: &AlertEvent) -> bool {
        match self {
            Condition::SingleKeyValue { label, value } => {
                alert.labels.get(label).map(String::as_str) == Some(value.as_str())
            }
            Condition::LabelMatch { labels, status } => {
                let labels_match = labels
                    .iter()
                    .all(|(key, value)| alert.labels.get(key) == Some(value));
                let status_match = status
                    .as_ref()
                    .map_or(true, |status| alert.status == *status);
                labels_match && status_match
            }
            Condition::StatusOnly { status } => alert.status == *status,
        }
    }
}

/// The selected policy together with its frozen resolution.
#[derive(Debug, Clone)]
pub struct PolicyMatch {
    pub policy_id: i64,
    pub policy_name: String,
    pub priority: i32,
    pub tool: String,
    pub resolution: Resolution,
}

/// A policy whose condition matched but whose parameters could not be
/// resolved against the alert. Reported to the caller for logging; the
/// matcher continues to the next policy.
#[derive(Debug)]
pub struct SkippedPolicy {
    pub policy_id: i64,
    pub policy_name: String,
    pub error: Error,
}

#[derive(Debug, Default)]
pub struct EvaluationOutcome {
    pub matched: Option<PolicyMatch>,
    pub skipped: Vec<SkippedPolicy>,
}

/// Selects the first applicable policy for `alert`.
///
/// The snapshot is already ordered by (priority asc, id asc); iteration
/// returns the first policy that both matches and resolves. A matching
/// policy with unresolvable params is recorded in `skipped` and evaluation
/// moves on, so a lower-priority policy can still apply.
pub fn evaluate(alert: &AlertEvent, snapshot: &PolicySnapshot) -> EvaluationOutcome {
    let mut outcome = EvaluationOutcome::default();

    for policy in snapshot.policies() {
        if !policy.condition.matches(alert) {
            continue;
        }

        match resolver::resolve(&policy.action, alert) {
            Ok(resolution) => {
                debug!(
                    policy = %policy.name,
                    priority = policy.priority,
                    target = %resolution.target_key,
                    "policy matched"
                );
                outcome.matched = Some(PolicyMatch {
                    policy_id: policy.id,
                    policy_name: policy.name.clone(),
                    priority: policy.priority,
                    tool: policy.action.tool.clone(),
                    resolution,
                });
                return outcome;
            }
            Err(error) => {
                debug!(policy = %policy.name, %error, "policy matched but did not resolve, skipping");
                outcome.skipped.push(SkippedPolicy {
                    policy_id: policy.id,
                    policy_name: policy.name.clone(),
                    error,
                });
            }
        }
    }

    outcome
}
