//! Virtualization control remediation tools.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::dispatch::capability::{
    require_param, CapabilityError, HttpInvoker, Invocation, RemediationCapability,
};

pub struct RestartVm {
    invoker: HttpInvoker,
}

impl RestartVm {
    pub fn new(base_url: &str, timeout: Duration) -> crate::Result<Self> {
        Ok(Self {
            invoker: HttpInvoker::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl RemediationCapability for RestartVm {
    fn name(&self) -> &str {
        "restart_vm"
    }

    fn description(&self) -> &str {
        "Power-cycle a virtual machine through the virtualization control plane"
    }

    async fn invoke(
        &self,
        params: &HashMap<String, String>,
    ) -> std::result::Result<Invocation, CapabilityError> {
        require_param(params, "vm_name")?;
        self.invoker.call("restart_vm", params).await
    }
}
