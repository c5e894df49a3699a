use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use innsight_infra::cache::CacheError;
use innsight_infra::jobs::OrchestratorError;
use innsight_infra::kpi::KpiLookupError;

pub fn orchestrator_error_to_response(err: OrchestratorError) -> Response {
    match err {
        OrchestratorError::AlreadyRunning => {
            json_error(StatusCode::CONFLICT, "already_running", err.to_string())
        }
        OrchestratorError::JobNotFound(_) => {
            json_error(StatusCode::NOT_FOUND, "job_not_found", err.to_string())
        }
        OrchestratorError::Fault { .. } => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "batch_failed", err.to_string())
        }
        OrchestratorError::Store(_) | OrchestratorError::State(_) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", err.to_string())
        }
    }
}

pub fn lookup_error_to_response(err: KpiLookupError) -> Response {
    match err {
        KpiLookupError::NotConfigured { .. } => {
            json_error(StatusCode::NOT_FOUND, "kpi_not_found", err.to_string())
        }
        KpiLookupError::Cache(CacheError::Compute { .. }) => {
            json_error(StatusCode::BAD_GATEWAY, "kpi_source_error", err.to_string())
        }
        KpiLookupError::Cache(CacheError::Aborted { .. }) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "computation_aborted",
            err.to_string(),
        ),
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
