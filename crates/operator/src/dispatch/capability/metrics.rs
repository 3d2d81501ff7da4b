//! Metrics-query remediation tool. Read-only, but dispatched like any other
//! remediation so diagnostic policies share the job pipeline.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::dispatch::capability::{
    require_param, CapabilityError, HttpInvoker, Invocation, RemediationCapability,
};

pub struct PrometheusQuery {
    invoker: HttpInvoker,
}

impl PrometheusQuery {
    pub fn new(base_url: &str, timeout: Duration) -> crate::Result<Self> {
        Ok(Self {
            invoker: HttpInvoker::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl RemediationCapability for PrometheusQuery {
    fn name(&self) -> &str {
        "query_prometheus"
    }

    fn description(&self) -> &str {
        "Execute a PromQL query and record the result"
    }

    async fn invoke(
        &self,
        params: &HashMap<String, String>,
    ) -> std::result::Result<Invocation, CapabilityError> {
        require_param(params, "query")?;
        self.invoker.call("query_prometheus", params).await
    }
}
