//! KPI computations for the reporting pages.
//!
//! A [`KpiCatalog`] lists the configured KPIs. It turns them into batch units
//! for the nightly precomputation and serves on-demand reads, both through the
//! shared [`KpiCache`].

mod catalog;
mod in_memory;
#[cfg(feature = "postgres")]
mod postgres;
mod source;
mod unit;

pub use catalog::{KpiCatalog, KpiDefinition, KpiLookupError, DEFAULT_KPI_DOMAINS};
pub use in_memory::InMemoryKpiSource;
#[cfg(feature = "postgres")]
pub use postgres::PostgresKpiSource;
pub use source::{Aggregation, KpiSource, KpiSourceError, KpiValue};
pub use unit::{compute_cached, KpiCache, KpiUnit};
