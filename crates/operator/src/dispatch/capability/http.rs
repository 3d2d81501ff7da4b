use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::dispatch::capability::{CapabilityError, Invocation};

/// Wire shape every remediation endpoint replies with.
#[derive(Debug, Deserialize)]
struct InvokeResponse {
    success: bool,
    #[serde(default)]
    detail: String,
}

/// Shared HTTP client for capability adapters. One invoker per remote
/// service; each tool posts to its own operation path under the base URL.
#[derive(Clone)]
pub struct HttpInvoker {
    client: reqwest::Client,
    base_url: String,
}

impl HttpInvoker {
    pub fn new(base_url: &str, timeout: Duration) -> crate::Result<Self> {
        // Validated again here because invokers are also constructed directly
        // in tests, bypassing config validation.
        url::Url::parse(base_url)
            .map_err(|e| crate::Error::Config(format!("invalid capability URL '{base_url}': {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| crate::Error::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Posts params to `{base}/{operation}` and classifies the response.
    pub async fn call(
        &self,
        operation: &str,
        params: &HashMap<String, String>,
    ) -> std::result::Result<Invocation, CapabilityError> {
        let url = format!("{}/{}", self.base_url, operation);
        debug!(%url, "invoking remediation endpoint");

        let response = self
            .client
            .post(&url)
            .json(params)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(CapabilityError::Transient(format!(
                "{operation} returned {status}"
            )));
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CapabilityError::Permanent(format!(
                "{operation}: target not found"
            )));
        }
        if !status.is_success() {
            return Err(CapabilityError::Permanent(format!(
                "{operation} rejected with {status}"
            )));
        }

        let body: InvokeResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::Transient(format!("unreadable response body: {e}")))?;

        if body.success {
            Ok(Invocation { detail: body.detail })
        } else {
            // The remote executed the call and said no; retrying repeats the
            // same rejection.
            Err(CapabilityError::Permanent(body.detail))
        }
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> CapabilityError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        CapabilityError::Transient(e.to_string())
    } else {
        CapabilityError::Permanent(e.to_string())
    }
}
