mod matcher;
mod resolver;
mod source;

pub use matcher::{evaluate, EvaluationOutcome, PolicyMatch, SkippedPolicy};
pub use resolver::{resolve, Resolution};
pub use source::{seed_policies, PolicyCache};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Priority assigned when a policy does not specify one. Urgent policies use
/// small numbers; lower value wins.
pub const DEFAULT_PRIORITY: i32 = 100;

/// A remediation policy: when `condition` matches an incoming alert, `action`
/// is resolved against the alert and dispatched as a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: i64,
    pub name: String,
    pub condition: Condition,
    pub action: Action,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

/// Policy condition formats, matching the shapes accepted in the policy
/// store:
///
/// - `{"label": "alertname", "value": "PodCrashLoop"}`
/// - `{"labels": {"alertname": "HighMemory", "severity": "critical"}, "status": "firing"}`
/// - `{"status": "firing"}`
///
/// Untagged so the stored JSON stays in its natural shape. Variant order
/// matters: `SingleKeyValue` and `LabelMatch` carry distinguishing fields and
/// must be tried before the status-only form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Condition {
    SingleKeyValue {
        label: String,
        value: String,
    },
    LabelMatch {
        labels: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    StatusOnly {
        status: String,
    },
}

/// The remediation to run. Param values may contain `${label.KEY}` and
/// `${annotation.KEY}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    pub tool: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
}

/// An immutable, consistently ordered view of the policy set. Evaluation
/// always runs against one snapshot, so a concurrent refresh never changes
/// the outcome of an in-flight matching cycle.
#[derive(Debug, Clone, Default)]
pub struct PolicySnapshot {
    policies: Vec<Policy>,
}

impl PolicySnapshot {
    /// Builds a snapshot with the deterministic evaluation order:
    /// priority ascending, ties broken by id ascending.
    pub fn new(mut policies: Vec<Policy>) -> Self {
        policies.sort_by_key(|p| (p.priority, p.id));
        Self { policies }
    }

    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

pub type SharedSnapshot = Arc<PolicySnapshot>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn condition_deserializes_single_key_value() {
        let condition: Condition =
            serde_json::from_value(json!({"label": "alertname", "value": "PodCrashLoop"})).unwrap();
        assert_eq!(
            condition,
            Condition::SingleKeyValue {
                label: "alertname".into(),
                value: "PodCrashLoop".into()
            }
        );
    }

    #[test]
    fn condition_deserializes_label_match_with_status() {
        let condition: Condition = serde_json::from_value(
            json!({"labels": {"severity": "critical"}, "status": "firing"}),
        )
        .unwrap();
        match condition {
            Condition::LabelMatch { labels, status } => {
                assert_eq!(labels.get("severity").map(String::as_str), Some("critical"));
                assert_eq!(status.as_deref(), Some("firing"));
            }
            other => panic!("expected LabelMatch, got {other:?}"),
        }
    }

    #[test]
    fn condition_deserializes_status_only() {
        let condition: Condition = serde_json::from_value(json!({"status": "resolved"})).unwrap();
        assert_eq!(
            condition,
            Condition::StatusOnly {
                status: "resolved".into()
            }
        );
    }

    #[test]
    fn snapshot_orders_by_priority_then_id() {
        let mk = |id: i64, priority: i32| Policy {
            id,
            name: format!("p{id}"),
            condition: Condition::StatusOnly {
                status: "firing".into(),
            },
            action: Action {
                tool: "restart_pod".into(),
                params: HashMap::new(),
            },
            priority,
            created_at: Utc::now(),
        };

        let snapshot = PolicySnapshot::new(vec![mk(3, 100), mk(1, 10), mk(2, 10)]);
        let order: Vec<i64> = snapshot.policies().iter().map(|p| p.id).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }
}
