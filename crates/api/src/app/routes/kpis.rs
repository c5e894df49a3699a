//! On-demand KPI reads, served through the result cache.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{NaiveDate, Utc};

use innsight_core::{DateRange, Period};

use crate::app::dto::{KpiQuery, KpiResponse};
use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/:domain", get(get_kpi))
}

/// Resolve `period`, `start` and `end`. Without bounds, the window ending today is used.
fn parse_query(query: &KpiQuery, today: NaiveDate) -> Result<(Period, DateRange), Response> {
    let period = query
        .period
        .as_deref()
        .ok_or_else(|| errors::json_error(StatusCode::BAD_REQUEST, "invalid_query", "period is required"))?
        .parse::<Period>()
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_period", e.to_string()))?;

    let parse_date = |field: &str, raw: &str| {
        raw.parse::<NaiveDate>().map_err(|_| {
            errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_range",
                format!("{field} must be a YYYY-MM-DD date"),
            )
        })
    };

    let range = match (query.start.as_deref(), query.end.as_deref()) {
        (None, None) => period.window_ending(today),
        (Some(start), Some(end)) => {
            DateRange::new(parse_date("start", start)?, parse_date("end", end)?)
                .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_range", e.to_string()))?
        }
        _ => {
            return Err(errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_range",
                "start and end must be given together",
            ));
        }
    };

    Ok((period, range))
}

/// GET /kpis/:domain?period=&start=&end=
pub async fn get_kpi(
    Extension(services): Extension<Arc<AppServices>>,
    Path(domain): Path<String>,
    Query(query): Query<KpiQuery>,
) -> Response {
    let (period, range) = match parse_query(&query, Utc::now().date_naive()) {
        Ok(parsed) => parsed,
        Err(resp) => return resp,
    };

    match services.catalog.lookup(&domain, period, range).await {
        Ok(kpi) => (StatusCode::OK, Json(KpiResponse::new(domain, period, range, kpi))).into_response(),
        Err(e) => errors::lookup_error_to_response(e),
    }
}
