use std::fmt;

use innsight_core::{DateRange, Period};

/// Identity of one cached computation: `(domain, period, date range)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    domain: String,
    period: Period,
    range: DateRange,
}

impl CacheKey {
    pub fn new(domain: impl Into<String>, period: Period, range: DateRange) -> Self {
        Self {
            domain: domain.into(),
            period,
            range,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn period(&self) -> Period {
        self.period
    }

    pub fn range(&self) -> DateRange {
        self.range
    }

    /// Stable textual form, e.g. `revenue:month:2024-03-01:2024-03-31`.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.domain,
            self.period,
            self.range.start(),
            self.range.end()
        )
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fingerprint())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn range(a: (i32, u32, u32), b: (i32, u32, u32)) -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(a.0, a.1, a.2).unwrap(),
            NaiveDate::from_ymd_opt(b.0, b.1, b.2).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn fingerprint_names_every_component() {
        let key = CacheKey::new("revenue", Period::Month, range((2024, 3, 1), (2024, 3, 31)));
        assert_eq!(key.fingerprint(), "revenue:month:2024-03-01:2024-03-31");
        assert_eq!(key.to_string(), key.fingerprint());
    }

    #[test]
    fn keys_differ_by_any_component() {
        let march = range((2024, 3, 1), (2024, 3, 31));
        let base = CacheKey::new("revenue", Period::Month, march);

        assert_eq!(base, CacheKey::new("revenue", Period::Month, march));
        assert_ne!(base, CacheKey::new("occupancy", Period::Month, march));
        assert_ne!(base, CacheKey::new("revenue", Period::Quarter, march));
        assert_ne!(
            base,
            CacheKey::new("revenue", Period::Month, range((2024, 3, 1), (2024, 3, 30)))
        );
    }
}
