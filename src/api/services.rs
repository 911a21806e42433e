use std::collections::BTreeMap;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::{Json, http::StatusCode, response::IntoResponse};
use tracing::warn;

use super::error::ApiError;
use super::models::{
    CreateCrawlRequest, HealthResponse, JobActionResponse, JobListResponse, ListQuery,
};
use super::state::AppState;
use crate::jobs::JobRecord;
use crate::manager::ManagerError;

const DEFAULT_LIST_LIMIT: usize = 50;

/// Create a crawl job (POST /crawl)
///
/// Answers 201 with the job record. With `"start": true` the job is launched
/// immediately; if the manager is at capacity the job is still created and
/// returned PENDING so the caller can start it later.
pub async fn create_crawl(
    State(state): State<AppState>,
    payload: Result<Json<CreateCrawlRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;
    let config = request.to_config(&state.config.crawl);
    let job = state.manager.create_job(&request.url, config)?;

    if request.start {
        match state.manager.start_job(job.id()) {
            Ok(_) => {}
            Err(ManagerError::ConcurrencyLimit(max)) => {
                warn!(job_id = %job.id(), max, "Created job left pending, manager at capacity");
            }
            Err(e) => return Err(e.into()),
        }
    }

    let record = state
        .manager
        .get_job(job.id())
        .map(JobRecord::from)
        .unwrap_or_else(|| JobRecord::from(job));

    Ok((StatusCode::CREATED, Json(record)))
}

/// List jobs newest first (GET /crawl?status=&limit=)
pub async fn list_crawls(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let limit = query
        .limit
        .unwrap_or_else(|| DEFAULT_LIST_LIMIT.min(state.manager.settings().list_limit_max));

    let jobs: Vec<JobRecord> = state
        .manager
        .list_jobs_by_name(query.status.as_deref(), limit)?
        .into_iter()
        .map(JobRecord::from)
        .collect();

    Ok(Json(JobListResponse {
        count: jobs.len(),
        jobs,
    }))
}

/// Job status endpoint (GET /crawl/{job_id})
pub async fn get_crawl(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .manager
        .get_job(&job_id)
        .ok_or(ApiError::NotFound(job_id))?;
    Ok(Json(JobRecord::from(job)))
}

/// Launch a pending job (POST /crawl/{job_id}/start)
pub async fn start_crawl(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.manager.start_job(&job_id)? {
        return Err(ApiError::NotPending(job_id));
    }
    Ok(Json(JobActionResponse {
        job_id,
        started: Some(true),
        cancelled: None,
    }))
}

/// Cancel a pending or running job (POST /crawl/{job_id}/cancel)
pub async fn cancel_crawl(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.manager.cancel_job(&job_id) {
        return Ok(Json(JobActionResponse {
            job_id,
            started: None,
            cancelled: Some(true),
        }));
    }
    match state.manager.get_job(&job_id) {
        Some(_) => Err(ApiError::NotCancellable(job_id)),
        None => Err(ApiError::NotFound(job_id)),
    }
}

/// Health check endpoint (GET /health)
///
/// Reports the crawler service and job counts. Returns 503 when the crawler
/// service is not started.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let crawler_up = state.manager.service().health_check();
    let stats = state.manager.stats();

    let mut components = BTreeMap::new();
    components.insert("api".to_string(), "healthy".to_string());
    components.insert(
        "crawler".to_string(),
        if crawler_up { "healthy" } else { "unhealthy" }.to_string(),
    );

    let status_code = if crawler_up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if crawler_up { "healthy" } else { "unhealthy" }.to_string(),
        components,
        jobs: stats.by_status,
        running: stats.running,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status_code, Json(response))
}
