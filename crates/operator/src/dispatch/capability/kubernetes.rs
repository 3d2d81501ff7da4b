//! Container-orchestration remediation tools.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::dispatch::capability::{
    require_param, CapabilityError, HttpInvoker, Invocation, RemediationCapability,
};

pub struct RestartPod {
    invoker: HttpInvoker,
}

impl RestartPod {
    pub fn new(base_url: &str, timeout: Duration) -> crate::Result<Self> {
        Ok(Self {
            invoker: HttpInvoker::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl RemediationCapability for RestartPod {
    fn name(&self) -> &str {
        "restart_pod"
    }

    fn description(&self) -> &str {
        "Restart a pod by deleting it and letting its controller reschedule it"
    }

    async fn invoke(
        &self,
        params: &HashMap<String, String>,
    ) -> std::result::Result<Invocation, CapabilityError> {
        require_param(params, "pod_name")?;
        require_param(params, "namespace")?;
        self.invoker.call("restart_pod", params).await
    }
}

pub struct ScaleDeployment {
    invoker: HttpInvoker,
}

impl ScaleDeployment {
    pub fn new(base_url: &str, timeout: Duration) -> crate::Result<Self> {
        Ok(Self {
            invoker: HttpInvoker::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl RemediationCapability for ScaleDeployment {
    fn name(&self) -> &str {
        "scale_deployment"
    }

    fn description(&self) -> &str {
        "Scale a deployment to the requested replica count"
    }

    async fn invoke(
        &self,
        params: &HashMap<String, String>,
    ) -> std::result::Result<Invocation, CapabilityError> {
        require_param(params, "deployment_name")?;
        let replicas = require_param(params, "replicas")?;
        replicas.parse::<u32>().map_err(|_| {
            CapabilityError::Permanent(format!("replicas must be an integer, got '{replicas}'"))
        })?;
        self.invoker.call("scale_deployment", params).await
    }
}
