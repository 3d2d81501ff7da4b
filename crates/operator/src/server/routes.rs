use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use http::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::{ingest::AlertmanagerWebhook, metrics as crate_metrics, server::AppState};

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

pub async fn webhook_alerts(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AlertmanagerWebhook>,
) -> Response {
    match state.ingestor.ingest(payload).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(e) => {
            error!("alert ingestion failed: {e}");
            internal_error(&e)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(page): Query<Pagination>,
) -> Response {
    match state.store.list_jobs(page.limit, page.offset).await {
        Ok(jobs) => (StatusCode::OK, Json(jobs)).into_response(),
        Err(e) => {
            error!("failed to list jobs: {e}");
            internal_error(&e)
        }
    }
}

pub async fn get_job(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match state.store.get_job(id).await {
        Ok(Some(job)) => (StatusCode::OK, Json(job)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Job not found" })),
        )
            .into_response(),
        Err(e) => {
            error!("failed to fetch job {id}: {e}");
            internal_error(&e)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    #[serde(default = "default_log_limit")]
    pub limit: i64,
}

fn default_log_limit() -> i64 {
    100
}

pub async fn list_job_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogQuery>,
) -> Response {
    match state.store.list_job_logs(query.limit).await {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(e) => {
            error!("failed to list job logs: {e}");
            internal_error(&e)
        }
    }
}

pub async fn list_policies(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = state.policies.snapshot().await;
    (StatusCode::OK, Json(snapshot.policies().to_vec())).into_response()
}

pub async fn reload_policies(State(state): State<Arc<AppState>>) -> Response {
    match state.policies.refresh().await {
        Ok(count) => (
            StatusCode::OK,
            Json(json!({ "status": "reloaded", "policies": count })),
        )
            .into_response(),
        Err(e) => {
            error!("policy reload failed: {e}");
            internal_error(&e)
        }
    }
}

pub async fn metrics() -> String {
    crate_metrics::gather_metrics()
}

fn internal_error(e: &crate::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
        .into_response()
}
