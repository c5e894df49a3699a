use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use innsight_core::{DateRange, DomainError};

/// How daily facts are folded into one KPI value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Sum,
    Mean,
}

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Sum => "sum",
            Aggregation::Mean => "mean",
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggregation {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" | "total" => Ok(Aggregation::Sum),
            "mean" | "avg" | "average" => Ok(Aggregation::Mean),
            other => Err(DomainError::validation(format!("unknown aggregation: {other}"))),
        }
    }
}

/// Computed KPI.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiValue {
    pub value: f64,
    /// Days in the range that had facts.
    pub sample_days: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KpiSourceError {
    #[error("unknown KPI domain: {0}")]
    UnknownDomain(String),
    #[error("KPI query failed: {0}")]
    Query(String),
}

/// Reporting data backend the KPI units aggregate over.
#[async_trait]
pub trait KpiSource: Send + Sync + 'static {
    async fn compute(
        &self,
        domain: &str,
        aggregation: Aggregation,
        range: DateRange,
    ) -> Result<KpiValue, KpiSourceError>;
}
