use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use innsight_core::DateRange;

use super::source::{Aggregation, KpiSource, KpiSourceError, KpiValue};

/// Daily facts held in memory, for development and tests.
#[derive(Debug, Default)]
pub struct InMemoryKpiSource {
    facts: RwLock<HashMap<String, BTreeMap<NaiveDate, f64>>>,
    calls: AtomicU64,
    latency: Option<Duration>,
}

impl InMemoryKpiSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every query, to make single-flight behavior observable.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make a domain known without any facts.
    pub fn register_domain(&self, domain: impl Into<String>) {
        if let Ok(mut facts) = self.facts.write() {
            facts.entry(domain.into()).or_default();
        }
    }

    /// Set the fact for one day, replacing any previous value.
    pub fn record(&self, domain: impl Into<String>, day: NaiveDate, value: f64) {
        if let Ok(mut facts) = self.facts.write() {
            facts.entry(domain.into()).or_default().insert(day, value);
        }
    }

    /// Number of queries served so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KpiSource for InMemoryKpiSource {
    async fn compute(
        &self,
        domain: &str,
        aggregation: Aggregation,
        range: DateRange,
    ) -> Result<KpiValue, KpiSourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let facts = self
            .facts
            .read()
            .map_err(|_| KpiSourceError::Query("fact table lock poisoned".to_string()))?;
        let days = facts
            .get(domain)
            .ok_or_else(|| KpiSourceError::UnknownDomain(domain.to_string()))?;

        let (total, sample_days) = days
            .range(range.start()..=range.end())
            .fold((0.0, 0u64), |(sum, n), (_, v)| (sum + v, n + 1));

        let value = match aggregation {
            Aggregation::Sum => total,
            Aggregation::Mean if sample_days == 0 => 0.0,
            Aggregation::Mean => total / sample_days as f64,
        };
        Ok(KpiValue { value, sample_days })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn seeded() -> InMemoryKpiSource {
        let source = InMemoryKpiSource::new();
        for (d, v) in [(1, 100.0), (2, 200.0), (5, 300.0), (31, 1000.0)] {
            source.record("revenue", day(d), v);
        }
        source
    }

    #[tokio::test]
    async fn sums_and_averages_inside_the_range() {
        let source = seeded();
        let range = DateRange::new(day(1), day(5)).unwrap();

        let sum = source.compute("revenue", Aggregation::Sum, range).await.unwrap();
        assert_eq!(sum, KpiValue { value: 600.0, sample_days: 3 });

        let mean = source.compute("revenue", Aggregation::Mean, range).await.unwrap();
        assert_eq!(mean, KpiValue { value: 200.0, sample_days: 3 });
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn empty_range_of_known_domain_is_zero() {
        let source = seeded();
        source.register_domain("occupancy");
        let range = DateRange::day(day(10));

        let v = source.compute("occupancy", Aggregation::Mean, range).await.unwrap();
        assert_eq!(v, KpiValue { value: 0.0, sample_days: 0 });
    }

    #[tokio::test]
    async fn unknown_domain_is_an_error() {
        let source = seeded();
        let err = source
            .compute("spa", Aggregation::Sum, DateRange::day(day(1)))
            .await
            .unwrap_err();
        assert_eq!(err, KpiSourceError::UnknownDomain("spa".to_string()));
    }
}
