use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use innsight_core::DateRange;

use super::catalog::KpiDefinition;
use super::source::{KpiSource, KpiValue};
use crate::cache::{CacheError, Cached, ComputationCache};
use crate::jobs::{ComputationUnit, RunContext};

/// Cache of computed KPIs, shared by batch units and on-demand reads.
pub type KpiCache = ComputationCache<KpiValue>;

/// Compute one KPI through the cache.
pub async fn compute_cached(
    cache: &KpiCache,
    source: &Arc<dyn KpiSource>,
    definition: &KpiDefinition,
    range: DateRange,
) -> Result<Cached<KpiValue>, CacheError> {
    let source = Arc::clone(source);
    let domain = definition.domain.clone();
    let aggregation = definition.aggregation;

    cache
        .get_or_compute(&definition.domain, definition.period, range, move || async move {
            source.compute(&domain, aggregation, range).await
        })
        .await
}

/// Batch unit that warms the cache for one KPI over the window ending `as_of`.
pub struct KpiUnit {
    name: String,
    definition: KpiDefinition,
    as_of: NaiveDate,
    source: Arc<dyn KpiSource>,
    cache: KpiCache,
}

impl KpiUnit {
    pub fn new(
        definition: KpiDefinition,
        as_of: NaiveDate,
        source: Arc<dyn KpiSource>,
        cache: KpiCache,
    ) -> Self {
        Self {
            name: format!("kpi:{}:{}", definition.domain, definition.period),
            definition,
            as_of,
            source,
            cache,
        }
    }

    pub fn window(&self) -> DateRange {
        self.definition.period.window_ending(self.as_of)
    }
}

#[async_trait]
impl ComputationUnit for KpiUnit {
    type Output = Cached<KpiValue>;

    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: &RunContext) -> anyhow::Result<Cached<KpiValue>> {
        let computed = compute_cached(&self.cache, &self.source, &self.definition, self.window()).await?;
        Ok(computed)
    }
}
