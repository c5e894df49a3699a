//! Batch job record and its lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use innsight_core::JobId;

/// Batch execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not started yet
    Pending,
    /// Units are being executed
    Running,
    /// Every unit ran (some may have failed individually)
    Completed,
    /// The orchestrator itself faulted
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Allowed edges: `Pending -> Running -> {Completed, Failed}` and `Pending -> Failed`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

/// Outcome of a single computation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitOutcome {
    Success,
    Failed,
}

/// Record of one finished unit. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitResult {
    pub name: String,
    pub outcome: UnitOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl UnitResult {
    pub fn success(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: UnitOutcome::Success,
            error: None,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: UnitOutcome::Failed,
            error: Some(error.into()),
            completed_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == UnitOutcome::Success
    }
}

/// Rejected mutation of a [`JobRecord`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStateError {
    #[error("invalid job transition {from:?} -> {to:?}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
    #[error("unit results can only be appended while running (status {0:?})")]
    NotRunning(JobStatus),
    #[error("batch already has all {total} unit results")]
    UnitOverflow { total: usize },
    #[error("batch finished with {recorded} of {total} unit results")]
    Incomplete { recorded: usize, total: usize },
}

/// State of one batch execution.
///
/// Fields are private: every mutation goes through a transition method so the
/// record invariants hold at each step.
/// - `progress` never decreases and is 100 exactly when the status is terminal
/// - `unit_results.len() == total_units` exactly when the status is terminal
/// - `completed_at` is set once, when entering a terminal state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    #[serde(rename = "jobId")]
    id: JobId,
    status: JobStatus,
    progress: u8,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    total_units: usize,
    unit_results: Vec<UnitResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl JobRecord {
    /// Create a pending record for a batch of `total_units` units.
    pub fn new(total_units: usize) -> Self {
        Self {
            id: JobId::new(),
            status: JobStatus::Pending,
            progress: 0,
            started_at: Utc::now(),
            completed_at: None,
            total_units,
            unit_results: Vec::with_capacity(total_units),
            error: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn total_units(&self) -> usize {
        self.total_units
    }

    pub fn unit_results(&self) -> &[UnitResult] {
        &self.unit_results
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn completed_units(&self) -> usize {
        self.unit_results.len()
    }

    pub fn failed_units(&self) -> usize {
        self.unit_results.iter().filter(|r| !r.is_success()).count()
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), JobStateError> {
        if !self.status.can_transition_to(to) {
            return Err(JobStateError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        if to.is_terminal() {
            self.progress = 100;
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Mark the batch as running.
    pub fn mark_running(&mut self) -> Result<(), JobStateError> {
        self.transition(JobStatus::Running)
    }

    /// Append the result of a finished unit and advance progress.
    pub fn record_unit(&mut self, result: UnitResult) -> Result<(), JobStateError> {
        if self.status != JobStatus::Running {
            return Err(JobStateError::NotRunning(self.status));
        }
        if self.unit_results.len() >= self.total_units {
            return Err(JobStateError::UnitOverflow {
                total: self.total_units,
            });
        }
        self.unit_results.push(result);
        // 100 is reserved for terminal states, large batches round up to it early.
        let next = progress_percent(self.unit_results.len(), self.total_units).min(99);
        self.progress = self.progress.max(next);
        Ok(())
    }

    /// Mark the batch as completed. Requires every unit to have reported.
    pub fn mark_completed(&mut self) -> Result<(), JobStateError> {
        if self.unit_results.len() != self.total_units {
            return Err(JobStateError::Incomplete {
                recorded: self.unit_results.len(),
                total: self.total_units,
            });
        }
        self.transition(JobStatus::Completed)
    }

    /// Mark the batch as failed because of an orchestrator fault.
    ///
    /// `unit_names` is the full ordered list of the batch's units; every unit
    /// without a result yet is recorded as failed ("not run").
    pub fn mark_failed(
        &mut self,
        error: impl Into<String>,
        unit_names: &[String],
    ) -> Result<(), JobStateError> {
        if !self.status.can_transition_to(JobStatus::Failed) {
            return Err(JobStateError::InvalidTransition {
                from: self.status,
                to: JobStatus::Failed,
            });
        }
        let error = error.into();
        let recorded = self.unit_results.len();
        for index in recorded..self.total_units {
            let name = unit_names
                .get(index)
                .cloned()
                .unwrap_or_else(|| format!("unit-{index}"));
            self.unit_results
                .push(UnitResult::failed(name, format!("not run: {error}")));
        }
        self.error = Some(error);
        self.transition(JobStatus::Failed)
    }
}

/// `round(100 * done / total)`, in integer arithmetic. An empty batch is 100% done.
pub fn progress_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let done = done.min(total) as u128;
    let total = total as u128;
    ((200 * done + total) / (2 * total)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("u{i}")).collect()
    }

    #[test]
    fn progress_rounds_to_nearest_percent() {
        assert_eq!(progress_percent(0, 3), 0);
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 67);
        assert_eq!(progress_percent(3, 3), 100);
        assert_eq!(progress_percent(1, 8), 13);
        assert_eq!(progress_percent(0, 0), 100);
    }

    #[test]
    fn job_lifecycle() {
        let mut job = JobRecord::new(2);
        assert_eq!(job.status(), JobStatus::Pending);
        assert_eq!(job.progress(), 0);

        job.mark_running().unwrap();
        job.record_unit(UnitResult::success("a")).unwrap();
        assert_eq!(job.progress(), 50);
        assert!(job.completed_at().is_none());

        job.record_unit(UnitResult::failed("b", "boom")).unwrap();
        job.mark_completed().unwrap();

        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.progress(), 100);
        assert!(job.completed_at().is_some());
        assert_eq!(job.failed_units(), 1);
        assert!(job.error().is_none());
    }

    #[test]
    fn terminal_records_reject_further_mutation() {
        let mut job = JobRecord::new(0);
        job.mark_running().unwrap();
        job.mark_completed().unwrap();
        let completed_at = job.completed_at();

        assert!(matches!(
            job.mark_running(),
            Err(JobStateError::InvalidTransition { .. })
        ));
        assert!(matches!(
            job.record_unit(UnitResult::success("late")),
            Err(JobStateError::NotRunning(JobStatus::Completed))
        ));
        assert!(job.mark_failed("late fault", &[]).is_err());
        assert_eq!(job.completed_at(), completed_at);
    }

    #[test]
    fn completion_requires_every_unit() {
        let mut job = JobRecord::new(2);
        job.mark_running().unwrap();
        job.record_unit(UnitResult::success("a")).unwrap();
        assert_eq!(
            job.mark_completed(),
            Err(JobStateError::Incomplete {
                recorded: 1,
                total: 2
            })
        );
    }

    #[test]
    fn overflowing_unit_results_are_rejected() {
        let mut job = JobRecord::new(1);
        job.mark_running().unwrap();
        job.record_unit(UnitResult::success("a")).unwrap();
        assert_eq!(
            job.record_unit(UnitResult::success("b")),
            Err(JobStateError::UnitOverflow { total: 1 })
        );
    }

    #[test]
    fn fault_fills_remaining_units_as_not_run() {
        let mut job = JobRecord::new(3);
        job.mark_running().unwrap();
        job.record_unit(UnitResult::success("u0")).unwrap();

        job.mark_failed("store unavailable", &names(3)).unwrap();

        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.progress(), 100);
        assert_eq!(job.error(), Some("store unavailable"));
        assert_eq!(job.unit_results().len(), 3);
        assert!(job.unit_results()[0].is_success());
        assert_eq!(job.unit_results()[2].name, "u2");
        assert_eq!(
            job.unit_results()[1].error.as_deref(),
            Some("not run: store unavailable")
        );
    }

    #[test]
    fn wire_format_uses_camel_case() {
        let job = JobRecord::new(4);
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["jobId"], job.id().to_string());
        assert_eq!(json["totalUnits"], 4);
        assert_eq!(json["status"], "pending");
        assert!(json["completedAt"].is_null());
        assert!(json.get("error").is_none());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Progress never decreases and reaches 100 only on completion.
            #[test]
            fn progress_is_monotonic(total in 1usize..400, fail_mask in any::<u64>()) {
                let mut job = JobRecord::new(total);
                job.mark_running().unwrap();
                let mut last = job.progress();
                for i in 0..total {
                    let result = if fail_mask & (1 << (i % 64)) != 0 {
                        UnitResult::failed(format!("u{i}"), "err")
                    } else {
                        UnitResult::success(format!("u{i}"))
                    };
                    job.record_unit(result).unwrap();
                    prop_assert!(job.progress() >= last);
                    prop_assert!(job.progress() < 100);
                    last = job.progress();
                }
                job.mark_completed().unwrap();
                prop_assert_eq!(job.progress(), 100);
                prop_assert_eq!(job.unit_results().len(), total);
            }
        }
    }
}
