//! Computation units: the opaque work items a batch is made of.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use innsight_core::JobId;

/// Execution context handed to each unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub job_id: JobId,
    /// When the owning batch was created.
    pub batch_started_at: DateTime<Utc>,
    /// Zero-based position of the unit inside the batch.
    pub index: usize,
    pub total_units: usize,
}

/// A unit of expensive work, supplied by the reporting layer.
///
/// The orchestrator never inspects what a unit does: it only runs it and
/// records whether it succeeded. `Output` keeps results typed for callers that
/// run units directly.
#[async_trait]
pub trait ComputationUnit: Send + Sync + 'static {
    type Output: Send + 'static;

    /// Stable name used in job reports and logs.
    fn name(&self) -> &str;

    async fn run(&self, ctx: &RunContext) -> anyhow::Result<Self::Output>;
}

/// Output-erased view of a [`ComputationUnit`], so heterogeneous units can
/// share one batch.
#[async_trait]
pub trait BatchUnit: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, ctx: &RunContext) -> anyhow::Result<()>;
}

#[async_trait]
impl<U: ComputationUnit> BatchUnit for U {
    fn name(&self) -> &str {
        ComputationUnit::name(self)
    }

    async fn execute(&self, ctx: &RunContext) -> anyhow::Result<()> {
        self.run(ctx).await.map(drop)
    }
}

/// Ordered list of units executed as one job.
pub type Batch = Vec<Arc<dyn BatchUnit>>;

/// Erase a unit's output type for use in a [`Batch`].
pub fn batch_unit<U: ComputationUnit>(unit: U) -> Arc<dyn BatchUnit> {
    Arc::new(unit)
}

/// Unit backed by an async closure. Handy for ad-hoc and operational batches.
pub struct FnUnit<F> {
    name: String,
    f: F,
}

impl<F> FnUnit<F> {
    pub fn new<Fut, T>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(RunContext) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut, T> ComputationUnit for FnUnit<F>
where
    F: Fn(RunContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &RunContext) -> anyhow::Result<T> {
        (self.f)(ctx.clone()).await
    }
}
