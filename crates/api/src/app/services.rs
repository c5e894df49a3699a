use std::sync::Arc;

use chrono::{NaiveDate, Utc};

use innsight_infra::cache::CacheConfig;
use innsight_infra::jobs::{Batch, JobOrchestrator};
use innsight_infra::kpi::{InMemoryKpiSource, KpiCache, KpiCatalog, KpiSource};

use crate::config::AppConfig;

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppServices {
    pub orchestrator: JobOrchestrator,
    pub catalog: KpiCatalog,
}

impl AppServices {
    pub fn new(orchestrator: JobOrchestrator, catalog: KpiCatalog) -> Self {
        Self {
            orchestrator,
            catalog,
        }
    }

    /// Wire the orchestrator and KPI catalog around `source`.
    pub fn with_source(config: &AppConfig, source: Arc<dyn KpiSource>) -> Self {
        let cache = KpiCache::with_config(CacheConfig {
            ttl: config.cache_ttl,
        });
        let catalog = KpiCatalog::new(config.kpi_definitions.clone(), source, cache);
        Self::new(JobOrchestrator::in_memory(config.job_retention), catalog)
    }

    /// The KPI precomputation batch for `as_of`.
    pub fn plan(&self, as_of: NaiveDate) -> Batch {
        self.catalog.plan(as_of)
    }

    pub fn plan_today(&self) -> Batch {
        self.plan(Utc::now().date_naive())
    }
}

pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    if config.use_persistent_stores {
        #[cfg(feature = "postgres")]
        {
            return build_persistent_services(config).await;
        }
        #[cfg(not(feature = "postgres"))]
        {
            tracing::warn!(
                "USE_PERSISTENT_STORES=true but postgres feature not enabled, falling back to in-memory"
            );
        }
    }

    Ok(build_in_memory_services(config))
}

/// In-memory facts (dev/test). Configured domains are known but start empty.
fn build_in_memory_services(config: &AppConfig) -> AppServices {
    let source = InMemoryKpiSource::new();
    for definition in &config.kpi_definitions {
        source.register_domain(definition.domain.clone());
    }
    AppServices::with_source(config, Arc::new(source))
}

#[cfg(feature = "postgres")]
async fn build_persistent_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    use anyhow::Context;
    use innsight_infra::kpi::PostgresKpiSource;

    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")?;
    let source = PostgresKpiSource::connect(database_url)
        .await
        .context("failed to connect to Postgres")?;
    tracing::info!("reading KPI facts from Postgres");

    Ok(AppServices::with_source(config, Arc::new(source)))
}
