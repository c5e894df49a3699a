//! Environment-driven configuration.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use innsight_infra::jobs::{DEFAULT_BATCH_SCHEDULE, DEFAULT_RETENTION};
use innsight_infra::kpi::KpiDefinition;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// `BIND_ADDR`
    pub bind_addr: SocketAddr,
    /// `JOB_RETENTION`: job records kept in memory.
    pub job_retention: usize,
    /// `BATCH_SCHEDULE`: cron expression (with seconds); empty disables the scheduler.
    pub batch_schedule: Option<String>,
    /// `KPI_DOMAINS`: comma-separated `domain:period[:sum|mean]`.
    pub kpi_definitions: Vec<KpiDefinition>,
    /// `KPI_CACHE_TTL_SECS`: unset keeps results until invalidated.
    pub cache_ttl: Option<Duration>,
    /// `USE_PERSISTENT_STORES`: read KPI facts from Postgres.
    pub use_persistent_stores: bool,
    /// `DATABASE_URL`
    pub database_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            job_retention: DEFAULT_RETENTION,
            batch_schedule: Some(DEFAULT_BATCH_SCHEDULE.to_string()),
            kpi_definitions: KpiDefinition::defaults(),
            cache_ttl: None,
            use_persistent_stores: false,
            database_url: None,
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Parse `raw`, warning and returning `None` when it is invalid.
fn parse_or_warn<T>(key: &str, raw: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(key, value = raw, error = %e, "invalid configuration value; using default");
            None
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source. Invalid values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("BIND_ADDR").and_then(|v| parse_or_warn("BIND_ADDR", &v)) {
            config.bind_addr = addr;
        }

        if let Some(retention) =
            lookup("JOB_RETENTION").and_then(|v| parse_or_warn::<usize>("JOB_RETENTION", &v))
        {
            if retention == 0 {
                tracing::warn!("JOB_RETENTION must be at least 1; using default");
            } else {
                config.job_retention = retention;
            }
        }

        if let Some(schedule) = lookup("BATCH_SCHEDULE") {
            let schedule = schedule.trim();
            config.batch_schedule = (!schedule.is_empty()).then(|| schedule.to_string());
        }

        if let Some(raw) = lookup("KPI_DOMAINS") {
            match KpiDefinition::parse_list(&raw) {
                Ok(defs) if !defs.is_empty() => config.kpi_definitions = defs,
                Ok(_) => tracing::warn!("KPI_DOMAINS is empty; using defaults"),
                Err(e) => {
                    tracing::warn!(value = %raw, error = %e, "invalid KPI_DOMAINS; using defaults")
                }
            }
        }

        if let Some(secs) = lookup("KPI_CACHE_TTL_SECS")
            .and_then(|v| parse_or_warn::<u64>("KPI_CACHE_TTL_SECS", &v))
        {
            config.cache_ttl = (secs > 0).then(|| Duration::from_secs(secs));
        }

        config.use_persistent_stores = lookup("USE_PERSISTENT_STORES")
            .and_then(|v| parse_or_warn("USE_PERSISTENT_STORES", &v))
            .unwrap_or(false);
        config.database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());

        config
    }
}
