//! Batch orchestrator: one batch at a time, run in the background, pollable.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use innsight_core::JobId;

use super::store::{InMemoryJobStore, JobStore, JobStoreError};
use super::types::{JobRecord, JobStateError, JobStatus, UnitResult};
use super::unit::{Batch, RunContext};
use crate::panic_message;

/// Orchestrator error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OrchestratorError {
    /// Another batch holds the run permit.
    #[error("a batch is already running")]
    AlreadyRunning,
    /// Unknown or evicted job ID.
    #[error("job not found: {0}")]
    JobNotFound(JobId),
    /// The batch ended `Failed` because the orchestrator itself faulted.
    #[error("batch {job_id} failed: {message}")]
    Fault { job_id: JobId, message: String },
    #[error(transparent)]
    Store(#[from] JobStoreError),
    #[error(transparent)]
    State(#[from] JobStateError),
}

/// Runs batches of computation units.
///
/// At most one batch runs at a time, whichever entry point started it. The run
/// permit is a single-slot semaphore; the permit travels with the execution and
/// is released when it is dropped, on every exit path.
pub struct JobOrchestrator<S: JobStore = InMemoryJobStore> {
    store: Arc<S>,
    permit: Arc<Semaphore>,
}

impl<S: JobStore> Clone for JobOrchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            permit: Arc::clone(&self.permit),
        }
    }
}

impl JobOrchestrator<InMemoryJobStore> {
    /// Orchestrator over an in-memory store keeping `retention` records.
    pub fn in_memory(retention: usize) -> Self {
        Self::new(InMemoryJobStore::with_retention(retention))
    }
}

impl<S: JobStore + 'static> JobOrchestrator<S> {
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
            permit: Arc::new(Semaphore::new(1)),
        }
    }

    /// Whether a batch currently holds the run permit.
    pub fn is_running(&self) -> bool {
        self.permit.available_permits() == 0
    }

    /// Claim the run permit and register a pending record.
    ///
    /// Fails fast with `AlreadyRunning` without creating a record.
    fn claim(&self, units: &Batch) -> Result<(OwnedSemaphorePermit, JobRecord), OrchestratorError> {
        let permit = Arc::clone(&self.permit)
            .try_acquire_owned()
            .map_err(|_| OrchestratorError::AlreadyRunning)?;

        let record = JobRecord::new(units.len());
        self.store.insert(record.clone())?;
        Ok((permit, record))
    }

    /// Start a batch in the background and return its ID immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_batch(&self, units: Batch) -> Result<JobId, OrchestratorError> {
        let (permit, record) = self.claim(&units)?;
        let job_id = record.id();
        info!(job_id = %job_id, total_units = units.len(), "batch started");

        tokio::spawn(supervise(Arc::clone(&self.store), record, units, permit));
        Ok(job_id)
    }

    /// Run a batch and wait for it to finish.
    ///
    /// Used by the scheduler and the manual "run now" path. Individual unit
    /// failures still return `Ok`; only an orchestrator fault is an error.
    ///
    /// The batch runs on its own task. Dropping this future stops the wait,
    /// not the batch, which still finishes and releases the run permit.
    pub async fn run_synchronously(&self, units: Batch) -> Result<JobRecord, OrchestratorError> {
        let (permit, record) = self.claim(&units)?;
        let job_id = record.id();
        info!(job_id = %job_id, total_units = units.len(), "batch started (synchronous)");

        let finished = tokio::spawn(supervise(Arc::clone(&self.store), record, units, permit))
            .await
            .map_err(|join| OrchestratorError::Fault {
                job_id,
                message: format!("batch supervisor stopped: {join}"),
            })?;
        match finished.status() {
            JobStatus::Failed => Err(OrchestratorError::Fault {
                job_id: finished.id(),
                message: finished.error().unwrap_or("unknown fault").to_string(),
            }),
            _ => Ok(finished),
        }
    }

    /// Current snapshot of a job.
    pub fn status(&self, job_id: JobId) -> Result<JobRecord, OrchestratorError> {
        self.store
            .get(job_id)?
            .ok_or(OrchestratorError::JobNotFound(job_id))
    }

    /// Retained jobs, most recently started first.
    pub fn recent_jobs(&self) -> Result<Vec<JobRecord>, OrchestratorError> {
        Ok(self.store.recent(usize::MAX)?)
    }
}

/// Run `execute` on its own task and turn anything escaping it into a failed job.
///
/// Owns the run permit for the whole execution, so the permit is released
/// exactly once this returns (or the task is torn down).
async fn supervise<S: JobStore + 'static>(
    store: Arc<S>,
    record: JobRecord,
    units: Batch,
    permit: OwnedSemaphorePermit,
) -> JobRecord {
    let job_id = record.id();
    let unit_names: Vec<String> = units.iter().map(|u| u.name().to_string()).collect();

    let handle = tokio::spawn(execute(Arc::clone(&store), record.clone(), units));
    let outcome = match handle.await {
        Ok(Ok(done)) => Ok(done),
        Ok(Err(fault)) => Err(fault.to_string()),
        Err(join) if join.is_panic() => Err(format!(
            "execution panicked: {}",
            panic_message(join.into_panic())
        )),
        Err(_) => Err("execution task was cancelled".to_string()),
    };

    let finished = match outcome {
        Ok(done) => done,
        Err(message) => {
            error!(job_id = %job_id, error = %message, "batch failed");
            // Start from the last persisted snapshot so recorded units are kept.
            let mut latest = match store.get(job_id) {
                Ok(Some(stored)) => stored,
                _ => record,
            };
            if let Err(e) = latest.mark_failed(message, &unit_names) {
                warn!(job_id = %job_id, error = %e, "could not mark batch failed");
            } else if let Err(e) = store.update(&latest) {
                error!(job_id = %job_id, error = %e, "could not persist failed batch");
            }
            latest
        }
    };

    drop(permit);

    match store.prune() {
        Ok(evicted) if !evicted.is_empty() => {
            debug!(evicted = evicted.len(), "pruned old job records");
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "job retention cleanup failed"),
    }

    finished
}

/// Execute units strictly in order, recording each outcome.
///
/// A unit error or panic is recorded and the loop continues. Only store and
/// state-machine errors abort the batch.
async fn execute<S: JobStore>(
    store: Arc<S>,
    mut record: JobRecord,
    units: Batch,
) -> Result<JobRecord, OrchestratorError> {
    let job_id = record.id();
    let batch_started = Instant::now();

    record.mark_running()?;
    store.update(&record)?;

    let total_units = units.len();
    for (index, unit) in units.iter().enumerate() {
        let ctx = RunContext {
            job_id,
            batch_started_at: record.started_at(),
            index,
            total_units,
        };
        let started = Instant::now();

        let result = match AssertUnwindSafe(unit.execute(&ctx)).catch_unwind().await {
            Ok(Ok(())) => {
                debug!(
                    job_id = %job_id,
                    unit = unit.name(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "computation unit finished"
                );
                UnitResult::success(unit.name())
            }
            Ok(Err(e)) => {
                let error = format!("{e:#}");
                warn!(job_id = %job_id, unit = unit.name(), error = %error, "computation unit failed");
                UnitResult::failed(unit.name(), error)
            }
            Err(panic) => {
                let error = format!("unit panicked: {}", panic_message(panic));
                warn!(job_id = %job_id, unit = unit.name(), error = %error, "computation unit failed");
                UnitResult::failed(unit.name(), error)
            }
        };

        record.record_unit(result)?;
        store.update(&record)?;
    }

    record.mark_completed()?;
    store.update(&record)?;

    info!(
        job_id = %job_id,
        total_units,
        failed_units = record.failed_units(),
        elapsed_ms = batch_started.elapsed().as_millis() as u64,
        "batch completed"
    );
    Ok(record)
}
