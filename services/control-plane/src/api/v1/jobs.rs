//! Job submission endpoints.
//!
//! Requests are validated and appended to the hand-off queue; the effect is
//! visible after the next reconciliation tick, so every mutation answers
//! 202 Accepted.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, post, put},
    Json, Router,
};
use chrono::Utc;
use compute_events::{Backend, Dimensions, JobSpec};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::error::ApiError;
use crate::state::AppState;

/// Create job routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(submit_job))
        .route("/{job_id}", delete(withdraw_job))
        .route("/{job_id}/time-allocation", put(update_time_allocation))
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub job_id: String,
    pub resource_class: String,
    #[serde(default)]
    pub backend: Backend,
    pub dimensions: Dimensions,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default)]
    pub time_allocation_secs: Option<u64>,
}

fn default_replicas() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct TimeAllocationRequest {
    pub time_allocation_secs: u64,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct AcceptedResponse {
    pub job_id: String,
    pub accepted: bool,
}

fn accepted(job_id: String) -> impl IntoResponse {
    (
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            job_id,
            accepted: true,
        }),
    )
}

// =============================================================================
// Handlers
// =============================================================================

async fn submit_job(
    State(state): State<AppState>,
    Json(req): Json<SubmitJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let spec = JobSpec {
        job_id: req.job_id,
        resource_class: req.resource_class,
        backend: req.backend,
        dimensions: req.dimensions,
        replicas: req.replicas,
        submitted_at: Utc::now(),
        time_allocation_secs: req.time_allocation_secs,
    };
    spec.validate()?;

    if !state.accepts_class(&spec.resource_class) {
        return Err(ApiError::unprocessable(
            "unknown_resource_class",
            format!("resource class {} is not served", spec.resource_class),
        ));
    }

    info!(
        job_id = %spec.job_id,
        resource_class = %spec.resource_class,
        replicas = spec.replicas,
        "Job submitted"
    );
    let job_id = spec.job_id.clone();
    state.handoff().submit(spec);
    Ok(accepted(job_id))
}

async fn withdraw_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    info!(job_id = %job_id, "Job withdrawal requested");
    state.handoff().withdraw(job_id.clone());
    accepted(job_id)
}

async fn update_time_allocation(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(req): Json<TimeAllocationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.time_allocation_secs == 0 {
        return Err(ApiError::bad_request(
            "invalid_time_allocation",
            "time_allocation_secs must be positive",
        ));
    }

    state
        .handoff()
        .update_time_allocation(job_id.clone(), req.time_allocation_secs);
    Ok(accepted(job_id))
}
