//! Administrative routes: jobs, manual pipeline stages, snapshot cache and
//! catalog hooks. Access control is left to the deployment in front.

use super::chart_routes::query_error_response;
use super::metrics;
use super::state::{GuardedOrchestrator, GuardedPipeline, GuardedQueryService};
use crate::background_jobs::{job_id_for, HookEvent, JobError};
use crate::chart_store::CacheFilter;
use crate::charts::{PipelineError, PipelineStage};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Deserialize, Debug)]
pub(super) struct PageParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

fn job_error_response(err: JobError) -> Response {
    match err {
        JobError::NotFound => StatusCode::NOT_FOUND.into_response(),
        JobError::AlreadyRunning | JobError::Cancelled => {
            (StatusCode::CONFLICT, err.to_string()).into_response()
        }
        JobError::ExecutionFailed(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

pub(super) async fn list_jobs(State(orchestrator): State<GuardedOrchestrator>) -> Response {
    match orchestrator.status().await {
        Ok(status) => Json(status).into_response(),
        Err(e) => {
            error!("Failed to list jobs: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub(super) async fn get_job_history(
    State(orchestrator): State<GuardedOrchestrator>,
    Path(name): Path<String>,
    Query(params): Query<PageParams>,
) -> Response {
    let handle = orchestrator.handle();
    let job_id = job_id_for(&name);
    if !handle.job_exists(job_id).await {
        return StatusCode::NOT_FOUND.into_response();
    }
    match handle.get_job_history(job_id, params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT)) {
        Ok(history) => Json(history).into_response(),
        Err(e) => {
            error!("Failed to read history of {}: {:#}", job_id, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub(super) async fn get_job_audit(
    State(orchestrator): State<GuardedOrchestrator>,
    Path(name): Path<String>,
    Query(params): Query<PageParams>,
) -> Response {
    let handle = orchestrator.handle();
    let job_id = job_id_for(&name);
    if !handle.job_exists(job_id).await {
        return StatusCode::NOT_FOUND.into_response();
    }
    match handle.get_job_audit_log_by_job(
        job_id,
        params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
        params.offset.unwrap_or(0),
    ) {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => {
            error!("Failed to read audit log of {}: {:#}", job_id, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub(super) async fn trigger_job(
    State(orchestrator): State<GuardedOrchestrator>,
    Path(name): Path<String>,
) -> Response {
    info!("Manual trigger of job {}", name);
    match orchestrator.trigger_job(&name).await {
        Ok(()) => Json(json!({ "job": job_id_for(&name), "status": "completed" })).into_response(),
        Err(err) => job_error_response(err),
    }
}

pub(super) async fn trigger_pipeline_stage(
    State(pipeline): State<GuardedPipeline>,
    Path(stage): Path<String>,
) -> Response {
    let Some(stage) = PipelineStage::parse(&stage) else {
        return (
            StatusCode::BAD_REQUEST,
            format!("unknown pipeline stage: {}", stage),
        )
            .into_response();
    };

    let now = chrono::Utc::now().timestamp();
    let result = tokio::task::spawn_blocking(move || {
        pipeline.trigger_stage(stage, now, &CancellationToken::new())
    })
    .await;

    match result {
        Ok(Ok(report)) => Json(report).into_response(),
        Ok(Err(err @ (PipelineError::StageBusy(_) | PipelineError::Cancelled))) => {
            (StatusCode::CONFLICT, err.to_string()).into_response()
        }
        Ok(Err(PipelineError::Store(e))) => {
            error!("Manual pipeline stage {:?} failed: {:#}", stage, e);
            metrics::record_error("pipeline", "admin");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)).into_response()
        }
        Err(e) => {
            error!("Manual pipeline stage {:?} panicked: {}", stage, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub(super) async fn get_cache_diagnostics(
    State(query_service): State<GuardedQueryService>,
    Query(filter): Query<CacheFilter>,
) -> Response {
    match query_service.get_cache_diagnostics(filter) {
        Ok(diagnostics) => Json(diagnostics).into_response(),
        Err(err) => query_error_response(err, "admin"),
    }
}

pub(super) async fn clear_cache(
    State(query_service): State<GuardedQueryService>,
    Query(filter): Query<CacheFilter>,
) -> Response {
    match query_service.clear_cache(filter) {
        Ok(deleted) => Json(json!({ "deleted": deleted })).into_response(),
        Err(err) => query_error_response(err, "admin"),
    }
}

pub(super) async fn notify_catalog_change(
    State(orchestrator): State<GuardedOrchestrator>,
) -> Response {
    match orchestrator.notify_hook(HookEvent::OnCatalogChange).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => {
            error!("Failed to fire catalog change hook: {:#}", e);
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}
