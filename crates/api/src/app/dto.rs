//! Request/response bodies. Wire names are camelCase.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use innsight_core::{DateRange, JobId, Period};
use innsight_infra::cache::{CacheSource, Cached};
use innsight_infra::jobs::JobRecord;
use innsight_infra::kpi::KpiValue;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartJobResponse {
    pub job_id: JobId,
    pub total_units: usize,
    pub started_at: DateTime<Utc>,
}

impl From<&JobRecord> for StartJobResponse {
    fn from(record: &JobRecord) -> Self {
        Self {
            job_id: record.id(),
            total_units: record.total_units(),
            started_at: record.started_at(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub running: bool,
    pub jobs: Vec<JobRecord>,
}

/// Query of `GET /kpis/{domain}`. Kept as strings so parse errors get our error shape.
#[derive(Debug, Default, Deserialize)]
pub struct KpiQuery {
    pub period: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiResponse {
    pub domain: String,
    pub period: Period,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub value: f64,
    pub sample_days: u64,
    pub computed_at: DateTime<Utc>,
    pub cached: bool,
    pub source: CacheSource,
}

impl KpiResponse {
    pub fn new(domain: String, period: Period, range: DateRange, kpi: Cached<KpiValue>) -> Self {
        Self {
            domain,
            period,
            start: range.start(),
            end: range.end(),
            value: kpi.value.value,
            sample_days: kpi.value.sample_days,
            computed_at: kpi.computed_at,
            cached: kpi.was_cached(),
            source: kpi.source,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheClearResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub removed: usize,
}
