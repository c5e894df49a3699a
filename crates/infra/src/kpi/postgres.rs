//! Postgres-backed KPI source.
//!
//! Aggregates over a fact table with one row per domain and day:
//!
//! ```sql
//! CREATE TABLE kpi_facts (
//!     domain TEXT NOT NULL,
//!     day    DATE NOT NULL,
//!     value  DOUBLE PRECISION NOT NULL,
//!     PRIMARY KEY (domain, day)
//! );
//! ```

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::debug;

use innsight_core::DateRange;

use super::source::{Aggregation, KpiSource, KpiSourceError, KpiValue};

#[derive(Debug, Clone)]
pub struct PostgresKpiSource {
    pool: PgPool,
}

impl PostgresKpiSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    async fn domain_exists(&self, domain: &str) -> Result<bool, KpiSourceError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM kpi_facts WHERE domain = $1)")
            .bind(domain)
            .fetch_one(&self.pool)
            .await
            .map_err(query_error)
    }
}

fn query_error(e: sqlx::Error) -> KpiSourceError {
    KpiSourceError::Query(e.to_string())
}

#[async_trait]
impl KpiSource for PostgresKpiSource {
    async fn compute(
        &self,
        domain: &str,
        aggregation: Aggregation,
        range: DateRange,
    ) -> Result<KpiValue, KpiSourceError> {
        let sql = match aggregation {
            Aggregation::Sum => {
                "SELECT COALESCE(SUM(value), 0)::float8 AS value, COUNT(*) AS days \
                 FROM kpi_facts WHERE domain = $1 AND day BETWEEN $2 AND $3"
            }
            Aggregation::Mean => {
                "SELECT COALESCE(AVG(value), 0)::float8 AS value, COUNT(*) AS days \
                 FROM kpi_facts WHERE domain = $1 AND day BETWEEN $2 AND $3"
            }
        };

        let row = sqlx::query(sql)
            .bind(domain)
            .bind(range.start())
            .bind(range.end())
            .fetch_one(&self.pool)
            .await
            .map_err(query_error)?;

        let value: f64 = row.try_get("value").map_err(query_error)?;
        let days: i64 = row.try_get("days").map_err(query_error)?;
        debug!(domain, %aggregation, %range, days, "kpi facts aggregated");

        if days == 0 && !self.domain_exists(domain).await? {
            return Err(KpiSourceError::UnknownDomain(domain.to_string()));
        }

        Ok(KpiValue {
            value,
            sample_days: days.max(0) as u64,
        })
    }
}
