mod routes;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{ingest::Ingestor, policy::PolicyCache, store::Store, Result};

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub ingestor: Arc<Ingestor>,
    pub policies: Arc<PolicyCache>,
}

pub struct Server {
    state: Arc<AppState>,
}

impl Server {
    pub fn new(store: Arc<dyn Store>, ingestor: Arc<Ingestor>, policies: Arc<PolicyCache>) -> Self {
        Self {
            state: Arc::new(AppState {
                store,
                ingestor,
                policies,
            }),
        }
    }

    pub fn build_router(self) -> Router {
        Router::new()
            .route("/health", get(routes::health))
            .route("/webhook/alerts", post(routes::webhook_alerts))
            .route("/jobs", get(routes::list_jobs))
            .route("/jobs/{id}", get(routes::get_job))
            .route("/joblogs", get(routes::list_job_logs))
            .route("/policies", get(routes::list_policies))
            .route("/policies/reload", post(routes::reload_policies))
            .route("/metrics", get(routes::metrics))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state)
    }

    pub async fn start(self, addr: &str) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "HTTP server listening");
        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to install shutdown signal handler: {e}");
    }
}
