//! Dashboard snapshot remediation tool.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::dispatch::capability::{
    require_param, CapabilityError, HttpInvoker, Invocation, RemediationCapability,
};

pub struct GrafanaDashboard {
    invoker: HttpInvoker,
}

impl GrafanaDashboard {
    pub fn new(base_url: &str, timeout: Duration) -> crate::Result<Self> {
        Ok(Self {
            invoker: HttpInvoker::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl RemediationCapability for GrafanaDashboard {
    fn name(&self) -> &str {
        "get_grafana_dashboard"
    }

    fn description(&self) -> &str {
        "Fetch a dashboard snapshot for incident context"
    }

    async fn invoke(
        &self,
        params: &HashMap<String, String>,
    ) -> std::result::Result<Invocation, CapabilityError> {
        require_param(params, "dashboard_id")?;
        self.invoker.call("get_grafana_dashboard", params).await
    }
}
