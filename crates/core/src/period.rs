//! Reporting periods and inclusive date ranges.

use core::fmt;
use core::str::FromStr;

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Granularity a KPI is reported at.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl Period {
    pub const ALL: [Period; 5] = [
        Period::Day,
        Period::Week,
        Period::Month,
        Period::Quarter,
        Period::Year,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
            Period::Quarter => "quarter",
            Period::Year => "year",
        }
    }

    /// The reporting window of this period that ends on `as_of` (inclusive).
    ///
    /// - `Day`: just `as_of`
    /// - `Week`: the trailing seven days
    /// - `Month`, `Quarter`, `Year`: period-to-date
    pub fn window_ending(&self, as_of: NaiveDate) -> DateRange {
        let start = match self {
            Period::Day => as_of,
            Period::Week => as_of.checked_sub_days(Days::new(6)).unwrap_or(NaiveDate::MIN),
            Period::Month => as_of.with_day(1).unwrap_or(as_of),
            Period::Quarter => {
                let first_month = ((as_of.month0() / 3) * 3) + 1;
                as_of
                    .with_day(1)
                    .and_then(|d| d.with_month(first_month))
                    .unwrap_or(as_of)
            }
            Period::Year => as_of.with_ordinal(1).unwrap_or(as_of),
        };
        DateRange { start, end: as_of }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" | "daily" => Ok(Period::Day),
            "week" | "weekly" => Ok(Period::Week),
            "month" | "monthly" => Ok(Period::Month),
            "quarter" | "quarterly" => Ok(Period::Quarter),
            "year" | "yearly" | "annual" => Ok(Period::Year),
            other => Err(DomainError::UnknownPeriod(other.to_string())),
        }
    }
}

/// Inclusive calendar date range; `start <= end` always holds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> DomainResult<Self> {
        if start > end {
            return Err(DomainError::invalid_range(format!(
                "start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Single-day range.
    pub fn day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of calendar days covered (at least 1).
    pub fn days(&self) -> u64 {
        (self.end - self.start).num_days() as u64 + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}
