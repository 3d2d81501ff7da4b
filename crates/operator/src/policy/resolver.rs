//! Parameter interpolation for remediation actions.
//!
//! Placeholder grammar: `${label.KEY}` substitutes an alert label,
//! `${annotation.KEY}` an alert annotation. A single param value may mix
//! literal text with any number of placeholders. If any referenced key is
//! missing from the alert, the whole action is rejected; a half-resolved
//! remediation call must never reach a live target.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

use crate::{ingest::AlertEvent, policy::Action, Error, Result};

lazy_static! {
    static ref PLACEHOLDER: Regex =
        Regex::new(r"\$\{(label|annotation)\.([^}]+)\}").expect("placeholder regex");
}

/// A fully resolved action: concrete params plus the derived mutual-exclusion
/// key for the target the action touches.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub params: HashMap<String, String>,
    pub target_key: String,
}

/// Expands every placeholder in `action.params` using the alert snapshot.
///
/// Pure and idempotent: the same `(action, alert)` pair always yields the
/// same resolution.
pub fn resolve(action: &Action, alert: &AlertEvent) -> Result<Resolution> {
    let mut params = HashMap::with_capacity(action.params.len());

    for (name, template) in &action.params {
        params.insert(name.clone(), resolve_value(name, template, alert)?);
    }

    let target_key = derive_target_key(&action.tool, &params);
    Ok(Resolution { params, target_key })
}

fn resolve_value(param: &str, template: &str, alert: &AlertEvent) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let whole = caps.get(0).expect("capture 0 always present");
        let scope = &caps[1];
        let key = &caps[2];

        let value = match scope {
            "label" => alert.labels.get(key),
            _ => alert.annotations.get(key),
        };
        let value = value.ok_or_else(|| Error::UnresolvedParameter {
            param: param.to_string(),
            key: format!("{scope}.{key}"),
        })?;

        out.push_str(&template[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }
    out.push_str(&template[last..]);

    Ok(out)
}

/// Target-identifying parameter names: `namespace`, `vm_name`, and anything
/// else ending in `_name` (pod_name, deployment_name, ...).
fn is_target_param(name: &str) -> bool {
    name == "namespace" || name.ends_with("_name")
}

/// Concatenates all target-identifying resolved values in ascending
/// parameter-name order, so the same logical target always yields the same
/// key regardless of param map iteration order. Actions without any
/// target-identifying parameter fall back to the tool name, keeping mutual
/// exclusion per tool.
fn derive_target_key(tool: &str, params: &HashMap<String, String>) -> String {
    let mut parts: Vec<(&str, &str)> = params
        .iter()
        .filter(|(name, _)| is_target_param(name))
        .map(|(name, value)| (name.as_str(), value.as_str()))
        .collect();

    if parts.is_empty() {
        return tool.to_string();
    }

    parts.sort_by_key(|(name, _)| *name);
    parts
        .iter()
        .map(|(_, value)| *value)
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn alert_with(labels: &[(&str, &str)], annotations: &[(&str, &str)]) -> AlertEvent {
        AlertEvent {
            status: "firing".into(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            annotations: annotations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            fingerprint: "test".into(),
            received_at: Utc::now(),
        }
    }

    fn action(tool: &str, params: &[(&str, &str)]) -> Action {
        Action {
            tool: tool.into(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn resolves_pod_restart_params() {
        let alert = alert_with(
            &[
                ("alertname", "PodCrashLoop"),
                ("pod_name", "app-pod-123"),
                ("namespace", "production"),
            ],
            &[],
        );
        let action = action(
            "restart_pod",
            &[
                ("pod_name", "${label.pod_name}"),
                ("namespace", "${label.namespace}"),
            ],
        );

        let resolution = resolve(&action, &alert).unwrap();
        assert_eq!(
            resolution.params.get("pod_name").map(String::as_str),
            Some("app-pod-123")
        );
        assert_eq!(
            resolution.params.get("namespace").map(String::as_str),
            Some("production")
        );
        // namespace sorts before pod_name
        assert_eq!(resolution.target_key, "production/app-pod-123");
    }

    #[test]
    fn mixes_literals_and_multiple_placeholders() {
        let alert = alert_with(
            &[("pod_name", "web-1"), ("namespace", "staging")],
            &[("summary", "oom")],
        );
        let action = action(
            "query_prometheus",
            &[(
                "query",
                "rate(oom{pod=\"${label.pod_name}\",ns=\"${label.namespace}\"}[5m]) # ${annotation.summary}",
            )],
        );

        let resolution = resolve(&action, &alert).unwrap();
        assert_eq!(
            resolution.params.get("query").map(String::as_str),
            Some("rate(oom{pod=\"web-1\",ns=\"staging\"}[5m]) # oom")
        );
    }

    #[test]
    fn missing_key_rejects_whole_action() {
        let alert = alert_with(&[("alertname", "PodCrashLoop")], &[]);
        let action = action(
            "restart_pod",
            &[
                ("pod_name", "${label.missing_key}"),
                ("namespace", "${label.namespace}"),
            ],
        );

        match resolve(&action, &alert) {
            Err(Error::UnresolvedParameter { param, key }) => {
                assert!(param == "pod_name" || param == "namespace");
                assert!(key.starts_with("label."));
            }
            other => panic!("expected UnresolvedParameter, got {other:?}"),
        }
    }

    #[test]
    fn resolution_is_idempotent() {
        let alert = alert_with(&[("vm_name", "db-vm-7")], &[]);
        let action = action("restart_vm", &[("vm_name", "${label.vm_name}")]);

        let first = resolve(&action, &alert).unwrap();
        let second = resolve(&action, &alert).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn mixed_identifiers_produce_deterministic_key() {
        let alert = alert_with(&[("vm_name", "vm-1"), ("pod_name", "pod-1")], &[]);
        let action = action(
            "restart_vm",
            &[
                ("vm_name", "${label.vm_name}"),
                ("pod_name", "${label.pod_name}"),
            ],
        );

        // pod_name sorts before vm_name
        let resolution = resolve(&action, &alert).unwrap();
        assert_eq!(resolution.target_key, "pod-1/vm-1");
    }

    #[test]
    fn actions_without_target_params_fall_back_to_tool_name() {
        let alert = alert_with(&[], &[("runbook", "https://wiki/oom")]);
        let action = action("query_prometheus", &[("query", "up == 0")]);

        let resolution = resolve(&action, &alert).unwrap();
        assert_eq!(resolution.target_key, "query_prometheus");
    }

    #[test]
    fn literal_params_pass_through() {
        let alert = alert_with(&[("deployment_name", "api")], &[]);
        let action = action(
            "scale_deployment",
            &[
                ("deployment_name", "${label.deployment_name}"),
                ("replicas", "3"),
                ("namespace", "default"),
            ],
        );

        let resolution = resolve(&action, &alert).unwrap();
        assert_eq!(
            resolution.params.get("replicas").map(String::as_str),
            Some("3")
        );
        assert_eq!(resolution.target_key, "api/default");
    }
}
