//! Remediation capabilities: the boundary to the external systems that
//! actually touch infrastructure (container orchestration, virtualization,
//! metrics, dashboards). Each capability backs one tool name in the
//! dispatcher registry.

pub mod dashboard;
pub mod http;
pub mod kubernetes;
pub mod metrics;
pub mod virtualization;

pub use http::HttpInvoker;

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// Successful outcome of a capability call.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub detail: String,
}

/// Failure classification driving the worker's retry decision.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// Network faults, timeouts, remote 5xx: worth retrying.
    #[error("transient: {0}")]
    Transient(String),
    /// Explicit remote rejection (target not found, invalid request): a
    /// retry cannot succeed.
    #[error("permanent: {0}")]
    Permanent(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemediationCapability: Send + Sync {
    /// The tool name policies refer to.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    async fn invoke(
        &self,
        params: &HashMap<String, String>,
    ) -> std::result::Result<Invocation, CapabilityError>;
}

/// Pulls a required parameter, rejecting the call when it is absent. Params
/// are frozen at enqueue time, so a missing key here is a policy defect, not
/// something a retry can fix.
pub(crate) fn require_param<'a>(
    params: &'a HashMap<String, String>,
    key: &str,
) -> std::result::Result<&'a str, CapabilityError> {
    params
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| CapabilityError::Permanent(format!("missing required parameter '{key}'")))
}
