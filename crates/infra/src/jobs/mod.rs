//! Batch job orchestration.
//!
//! ## Components
//!
//! - `JobRecord`: status, progress and per-unit results of one batch
//! - `JobStore`: bounded job table (in-memory by default)
//! - `ComputationUnit`: opaque unit of work supplied by the reporting layer
//! - `JobOrchestrator`: runs one batch at a time, in the background or inline
//! - `BatchScheduler`: fires the synchronous entry point on a cron schedule

pub mod orchestrator;
pub mod scheduler;
pub mod store;
pub mod types;
pub mod unit;

pub use orchestrator::{JobOrchestrator, OrchestratorError};
pub use scheduler::{BatchFactory, BatchScheduler, SchedulerError, DEFAULT_BATCH_SCHEDULE};
pub use store::{InMemoryJobStore, JobStore, JobStoreError, DEFAULT_RETENTION};
pub use types::{progress_percent, JobRecord, JobStateError, JobStatus, UnitOutcome, UnitResult};
pub use unit::{batch_unit, Batch, BatchUnit, ComputationUnit, FnUnit, RunContext};
