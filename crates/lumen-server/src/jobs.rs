// The three job-boundary endpoints this binary exposes: `POST /jobs`,
// `GET /jobs/:id`, `DELETE /jobs/:id`. Everything else in the HTTP router —
// auth, course/lecture CRUD, uploads — is an out-of-scope external
// collaborator.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{routing::get, Json, Router};
use lumen_core::job::{Job, JobType};
use lumen_queue::JobQueue;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<JobQueue>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/jobs", axum::routing::post(create_job))
        .route("/jobs/:id", get(get_job).delete(cancel_job))
        .with_state(state)
}

/// `Enqueue(userId, type, payload, courseId?, lectureId?) -> jobId`.
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub user_id: Uuid,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub course_id: Option<Uuid>,
    pub lecture_id: Option<Uuid>,
}

#[derive(Debug, serde::Serialize)]
pub struct CreateJobResponse {
    pub id: Uuid,
}

async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<Json<CreateJobResponse>, StatusCode> {
    let id = state
        .queue
        .enqueue(
            request.user_id,
            request.job_type,
            request.payload,
            request.course_id,
            request.lecture_id,
        )
        .await
        .map_err(|e| map_error(&e))?;
    Ok(Json(CreateJobResponse { id }))
}

async fn get_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Job>, StatusCode> {
    let job = state
        .queue
        .get_job(id)
        .await
        .map_err(|e| map_error(&e))?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(job))
}

/// `CancelJob(id)` — idempotent, silently a no-op when the job is
/// already terminal. Always returns the current row either way.
async fn cancel_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Job>, StatusCode> {
    let job = state.queue.cancel_job(id).await.map_err(|e| map_error(&e))?;
    Ok(Json(job))
}

fn map_error(err: &lumen_core::error::PipelineError) -> StatusCode {
    use lumen_core::error::PipelineError::*;
    match err {
        InvalidInput(_) => StatusCode::BAD_REQUEST,
        NotReady(_) => StatusCode::CONFLICT,
        UnknownProvider(_) => StatusCode::BAD_REQUEST,
        TransientStorage(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
