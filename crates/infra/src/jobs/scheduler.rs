//! Cron-driven nightly batch trigger.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::orchestrator::{JobOrchestrator, OrchestratorError};
use super::store::{InMemoryJobStore, JobStore};
use super::types::JobRecord;
use super::unit::Batch;

/// Default schedule: every day at 03:00 UTC (`sec min hour dom month dow`).
pub const DEFAULT_BATCH_SCHEDULE: &str = "0 0 3 * * *";

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("invalid cron expression '{expression}': {source}")]
    InvalidSchedule {
        expression: String,
        #[source]
        source: cron::error::Error,
    },
}

/// Builds the batch to run for a given fire time.
pub trait BatchFactory: Send + Sync {
    fn build(&self, fire_time: DateTime<Utc>) -> Batch;
}

impl<F> BatchFactory for F
where
    F: Fn(DateTime<Utc>) -> Batch + Send + Sync,
{
    fn build(&self, fire_time: DateTime<Utc>) -> Batch {
        self(fire_time)
    }
}

/// Fires the orchestrator's synchronous entry point on a cron schedule.
///
/// A fire that finds a batch already running is skipped, not queued.
pub struct BatchScheduler<S: JobStore = InMemoryJobStore> {
    orchestrator: JobOrchestrator<S>,
    schedule: Schedule,
    expression: String,
    factory: Arc<dyn BatchFactory>,
}

impl<S: JobStore + 'static> BatchScheduler<S> {
    pub fn new(
        orchestrator: JobOrchestrator<S>,
        expression: &str,
        factory: impl BatchFactory + 'static,
    ) -> Result<Self, SchedulerError> {
        let schedule =
            Schedule::from_str(expression).map_err(|source| SchedulerError::InvalidSchedule {
                expression: expression.to_string(),
                source,
            })?;
        Ok(Self {
            orchestrator,
            schedule,
            expression: expression.to_string(),
            factory: Arc::new(factory),
        })
    }

    /// First fire time strictly after `after`.
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Run one scheduled batch now.
    ///
    /// Returns `None` when the fire was skipped or the batch faulted; both are
    /// logged here.
    pub async fn fire(&self, at: DateTime<Utc>) -> Option<JobRecord> {
        let units = self.factory.build(at);
        match self.orchestrator.run_synchronously(units).await {
            Ok(record) => {
                info!(
                    job_id = %record.id(),
                    failed_units = record.failed_units(),
                    "scheduled batch finished"
                );
                Some(record)
            }
            Err(OrchestratorError::AlreadyRunning) => {
                info!(fire_time = %at, "scheduled batch skipped: a batch is already running");
                None
            }
            Err(e) => {
                error!(fire_time = %at, error = %e, "scheduled batch failed");
                None
            }
        }
    }

    /// Loop until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(schedule = %self.expression, "batch scheduler started");

        loop {
            let Some(next) = self.next_fire(Utc::now()) else {
                warn!(schedule = %self.expression, "schedule has no upcoming fire time");
                break;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or_default();

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    self.fire(next).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("batch scheduler stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(Arc::new(self).run(shutdown))
    }
}
