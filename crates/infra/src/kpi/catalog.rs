use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use innsight_core::{DateRange, DomainError, Period};

use super::source::{Aggregation, KpiSource, KpiValue};
use super::unit::{compute_cached, KpiCache, KpiUnit};
use crate::cache::{CacheError, Cached};
use crate::jobs::{batch_unit, Batch, BatchFactory};

/// Definitions used when none are configured.
pub const DEFAULT_KPI_DOMAINS: &str = "revenue:day:sum,revenue:month:sum,occupancy:day:mean,\
occupancy:month:mean,cleaning:week:sum,adr:month:mean";

/// One KPI the nightly batch precomputes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KpiDefinition {
    pub domain: String,
    pub period: Period,
    pub aggregation: Aggregation,
}

impl KpiDefinition {
    pub fn new(domain: impl Into<String>, period: Period, aggregation: Aggregation) -> Self {
        Self {
            domain: domain.into(),
            period,
            aggregation,
        }
    }

    /// Parse a comma-separated list of `domain:period[:aggregation]`.
    pub fn parse_list(list: &str) -> Result<Vec<Self>, DomainError> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }

    pub fn defaults() -> Vec<Self> {
        Self::parse_list(DEFAULT_KPI_DOMAINS).unwrap_or_default()
    }
}

impl fmt::Display for KpiDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.domain, self.period, self.aggregation)
    }
}

/// `domain:period[:aggregation]`, aggregation defaulting to `sum`.
impl FromStr for KpiDefinition {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split(':');
        let domain = parts.next().map(str::trim).unwrap_or_default();
        if domain.is_empty() {
            return Err(DomainError::validation(format!("missing KPI domain in '{s}'")));
        }
        let period: Period = parts
            .next()
            .ok_or_else(|| DomainError::validation(format!("missing period in '{s}'")))?
            .parse()?;
        let aggregation = match parts.next() {
            Some(a) => a.parse()?,
            None => Aggregation::Sum,
        };
        if parts.next().is_some() {
            return Err(DomainError::validation(format!("too many fields in '{s}'")));
        }
        Ok(Self::new(domain, period, aggregation))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KpiLookupError {
    #[error("no KPI configured for {domain} per {period}")]
    NotConfigured { domain: String, period: Period },
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// The configured KPIs, their data source and the shared result cache.
#[derive(Clone)]
pub struct KpiCatalog {
    definitions: Arc<[KpiDefinition]>,
    source: Arc<dyn KpiSource>,
    cache: KpiCache,
}

impl KpiCatalog {
    pub fn new(definitions: Vec<KpiDefinition>, source: Arc<dyn KpiSource>, cache: KpiCache) -> Self {
        Self {
            definitions: definitions.into(),
            source,
            cache,
        }
    }

    pub fn definitions(&self) -> &[KpiDefinition] {
        &self.definitions
    }

    pub fn cache(&self) -> &KpiCache {
        &self.cache
    }

    pub fn find(&self, domain: &str, period: Period) -> Option<&KpiDefinition> {
        self.definitions
            .iter()
            .find(|d| d.domain == domain && d.period == period)
    }

    /// The nightly batch: one unit per definition, in configuration order.
    pub fn plan(&self, as_of: NaiveDate) -> Batch {
        self.definitions
            .iter()
            .map(|definition| {
                batch_unit(KpiUnit::new(
                    definition.clone(),
                    as_of,
                    Arc::clone(&self.source),
                    self.cache.clone(),
                ))
            })
            .collect()
    }

    /// Read a KPI through the cache, computing it on a miss.
    pub async fn lookup(
        &self,
        domain: &str,
        period: Period,
        range: DateRange,
    ) -> Result<Cached<KpiValue>, KpiLookupError> {
        let definition = self
            .find(domain, period)
            .ok_or_else(|| KpiLookupError::NotConfigured {
                domain: domain.to_string(),
                period,
            })?;
        Ok(compute_cached(&self.cache, &self.source, definition, range).await?)
    }
}

impl BatchFactory for KpiCatalog {
    fn build(&self, fire_time: DateTime<Utc>) -> Batch {
        self.plan(fire_time.date_naive())
    }
}
