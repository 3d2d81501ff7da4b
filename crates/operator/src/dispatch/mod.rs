//! Tool dispatch: maps an action's tool name to a remediation capability and
//! serializes remediations per target.

pub mod capability;
pub mod locks;

pub use capability::{CapabilityError, Invocation, RemediationCapability};
pub use locks::{TargetLockGuard, TargetLocks};

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::DispatchConfig;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// No capability registered under this tool name. A policy defect;
    /// never retried.
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    /// Another remediation currently holds the target. Defer, do not fail.
    #[error("target busy: {target}")]
    TargetBusy { target: String },
    #[error("transient: {0}")]
    Transient(String),
    #[error("permanent: {0}")]
    Permanent(String),
}

/// Static registry of remediation capabilities plus the per-target lock
/// table. Built once at startup from config; extension happens by
/// registering another capability at init, not by runtime reflection.
pub struct ToolDispatcher {
    registry: HashMap<String, Arc<dyn RemediationCapability>>,
    locks: TargetLocks,
    call_timeout: std::time::Duration,
}

impl ToolDispatcher {
    pub fn new(config: &DispatchConfig) -> Self {
        Self {
            registry: HashMap::new(),
            locks: TargetLocks::new(config.lock_ttl()),
            call_timeout: config.tool_call_timeout(),
        }
    }

    /// Builds the registry from the configured adapter endpoints. A
    /// capability is registered only when its service URL is set.
    pub fn from_config(config: &DispatchConfig) -> crate::Result<Self> {
        let mut dispatcher = Self::new(config);
        let timeout = config.tool_call_timeout();

        if let Some(url) = &config.kubernetes_tool_url {
            dispatcher.register(Arc::new(capability::kubernetes::RestartPod::new(url, timeout)?));
            dispatcher.register(Arc::new(capability::kubernetes::ScaleDeployment::new(
                url, timeout,
            )?));
        }
        if let Some(url) = &config.virt_tool_url {
            dispatcher.register(Arc::new(capability::virtualization::RestartVm::new(
                url, timeout,
            )?));
        }
        if let Some(url) = &config.prometheus_tool_url {
            dispatcher.register(Arc::new(capability::metrics::PrometheusQuery::new(
                url, timeout,
            )?));
        }
        if let Some(url) = &config.grafana_tool_url {
            dispatcher.register(Arc::new(capability::dashboard::GrafanaDashboard::new(
                url, timeout,
            )?));
        }

        info!(tools = ?dispatcher.tool_names(), "capability registry built");
        Ok(dispatcher)
    }

    pub fn register(&mut self, capability: Arc<dyn RemediationCapability>) {
        self.registry
            .insert(capability.name().to_string(), capability);
    }

    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.registry.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    /// Invokes the capability for `tool` under the target's advisory lock.
    ///
    /// The lock guard spans the whole call; its TTL exceeds the call timeout
    /// so a lock is never reclaimed while its call is still running.
    pub async fn dispatch(
        &self,
        tool: &str,
        params: &HashMap<String, String>,
        target_key: &str,
    ) -> std::result::Result<Invocation, DispatchError> {
        let capability = self
            .registry
            .get(tool)
            .ok_or_else(|| DispatchError::UnknownTool(tool.to_string()))?;

        let _guard = self
            .locks
            .try_acquire(target_key)
            .ok_or_else(|| DispatchError::TargetBusy {
                target: target_key.to_string(),
            })?;

        debug!(%tool, target = %target_key, "invoking capability");
        match tokio::time::timeout(self.call_timeout, capability.invoke(params)).await {
            Ok(Ok(invocation)) => Ok(invocation),
            Ok(Err(CapabilityError::Transient(msg))) => Err(DispatchError::Transient(msg)),
            Ok(Err(CapabilityError::Permanent(msg))) => Err(DispatchError::Permanent(msg)),
            Err(_) => Err(DispatchError::Transient(format!(
                "capability call timed out after {:?}",
                self.call_timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;
    use crate::dispatch::capability::MockRemediationCapability;
    use std::time::Duration;

    fn test_config() -> DispatchConfig {
        DispatchConfig {
            lock_ttl_secs: 5,
            tool_call_timeout_secs: 1,
            kubernetes_tool_url: None,
            virt_tool_url: None,
            prometheus_tool_url: None,
            grafana_tool_url: None,
        }
    }

    fn mock_tool(name: &'static str) -> MockRemediationCapability {
        let mut mock = MockRemediationCapability::new();
        mock.expect_name().return_const(name.to_string());
        mock
    }

    #[tokio::test]
    async fn unknown_tool_is_a_configuration_error() {
        let dispatcher = ToolDispatcher::new(&test_config());
        let params = HashMap::new();

        match dispatcher.dispatch("restart_toaster", &params, "kitchen").await {
            Err(DispatchError::UnknownTool(name)) => assert_eq!(name, "restart_toaster"),
            other => panic!("expected UnknownTool, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn held_target_defers_dispatch() {
        let mut tool = mock_tool("restart_pod");
        tool.expect_invoke().never();

        let mut dispatcher = ToolDispatcher::new(&test_config());
        dispatcher.register(Arc::new(tool));

        let _held = dispatcher.locks.try_acquire("prod/web-1").unwrap();
        let params = HashMap::new();
        match dispatcher.dispatch("restart_pod", &params, "prod/web-1").await {
            Err(DispatchError::TargetBusy { target }) => assert_eq!(target, "prod/web-1"),
            other => panic!("expected TargetBusy, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn successful_invocation_releases_the_lock() {
        let mut tool = mock_tool("restart_pod");
        tool.expect_invoke()
            .returning(|_| Ok(Invocation { detail: "restarted".into() }));

        let mut dispatcher = ToolDispatcher::new(&test_config());
        dispatcher.register(Arc::new(tool));

        let params = HashMap::new();
        let invocation = dispatcher
            .dispatch("restart_pod", &params, "prod/web-1")
            .await
            .unwrap();
        assert_eq!(invocation.detail, "restarted");
        assert!(!dispatcher.locks.held("prod/web-1"));
    }

    struct SlowTool;

    #[async_trait::async_trait]
    impl RemediationCapability for SlowTool {
        fn name(&self) -> &str {
            "restart_vm"
        }

        fn description(&self) -> &str {
            "never finishes in time"
        }

        async fn invoke(
            &self,
            _params: &HashMap<String, String>,
        ) -> std::result::Result<Invocation, CapabilityError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Invocation { detail: "too late".into() })
        }
    }

    #[tokio::test]
    async fn slow_capability_times_out_as_transient() {
        let mut dispatcher = ToolDispatcher::new(&test_config());
        dispatcher.register(Arc::new(SlowTool));

        let params = HashMap::new();
        match dispatcher.dispatch("restart_vm", &params, "vm-7").await {
            Err(DispatchError::Transient(msg)) => assert!(msg.contains("timed out")),
            other => panic!("expected Transient, got {other:?}"),
        }
        // Timeout must still release the target.
        assert!(!dispatcher.locks.held("vm-7"));
    }

    #[tokio::test]
    async fn error_classification_passes_through() {
        let mut transient = mock_tool("restart_pod");
        transient
            .expect_invoke()
            .returning(|_| Err(CapabilityError::Transient("connection refused".into())));

        let mut permanent = mock_tool("restart_vm");
        permanent
            .expect_invoke()
            .returning(|_| Err(CapabilityError::Permanent("vm not found".into())));

        let mut dispatcher = ToolDispatcher::new(&test_config());
        dispatcher.register(Arc::new(transient));
        dispatcher.register(Arc::new(permanent));

        let params = HashMap::new();
        assert!(matches!(
            dispatcher.dispatch("restart_pod", &params, "a").await,
            Err(DispatchError::Transient(_))
        ));
        assert!(matches!(
            dispatcher.dispatch("restart_vm", &params, "b").await,
            Err(DispatchError::Permanent(_))
        ));
    }
}
