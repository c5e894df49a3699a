//! Batch job endpoints.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use innsight_core::JobId;

use crate::app::dto::{JobListResponse, StartJobResponse};
use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", post(start_job).get(list_jobs))
        .route("/run-sync", post(run_sync))
        .route("/:job_id", get(get_job))
}

/// POST /jobs
///
/// Start the KPI batch in the background.
pub async fn start_job(Extension(services): Extension<Arc<AppServices>>) -> Response {
    let orchestrator = &services.orchestrator;
    let job_id = match orchestrator.start_batch(services.plan_today()) {
        Ok(id) => id,
        Err(e) => return errors::orchestrator_error_to_response(e),
    };

    match orchestrator.status(job_id) {
        Ok(record) => (StatusCode::OK, Json(StartJobResponse::from(&record))).into_response(),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

/// GET /jobs/:job_id
pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<String>,
) -> Response {
    let job_id = match job_id.parse::<JobId>() {
        Ok(id) => id,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_job_id", e.to_string()),
    };

    match services.orchestrator.status(job_id) {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

/// POST /jobs/run-sync
///
/// Run the KPI batch and answer once it is done.
pub async fn run_sync(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match services.orchestrator.run_synchronously(services.plan_today()).await {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

/// GET /jobs
pub async fn list_jobs(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match services.orchestrator.recent_jobs() {
        Ok(jobs) => Json(JobListResponse {
            running: services.orchestrator.is_running(),
            jobs,
        })
        .into_response(),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}
