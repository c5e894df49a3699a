//! Job storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use innsight_core::JobId;

use super::types::{JobRecord, JobStatus};

/// Default number of records kept by [`InMemoryJobStore`].
pub const DEFAULT_RETENTION: usize = 10;

/// Job store abstraction.
pub trait JobStore: Send + Sync {
    /// Insert a freshly created record.
    fn insert(&self, record: JobRecord) -> Result<JobId, JobStoreError>;

    /// Get a record by ID. `None` if unknown or evicted.
    fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, JobStoreError>;

    /// Replace a stored record with a newer snapshot of itself.
    fn update(&self, record: &JobRecord) -> Result<(), JobStoreError>;

    /// Most recently started records first.
    fn recent(&self, limit: usize) -> Result<Vec<JobRecord>, JobStoreError>;

    /// Apply the retention policy, returning the evicted IDs.
    fn prune(&self) -> Result<Vec<JobId>, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("job {0} is terminal and can no longer change")]
    Terminal(JobId),
    #[error("stale update for job {job_id}: {stored} unit results stored, {incoming} offered")]
    StaleUpdate {
        job_id: JobId,
        stored: usize,
        incoming: usize,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

/// Bounded in-memory job table.
///
/// Keeps the `retention` most recently started records. Records that are not
/// terminal yet are never evicted.
#[derive(Debug)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
    retention: usize,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    /// Store keeping at most `retention` records (minimum 1).
    pub fn with_retention(retention: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            retention: retention.max(1),
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    pub fn len(&self) -> usize {
        self.jobs.read().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_oldest(jobs: &mut HashMap<JobId, JobRecord>, retention: usize) -> Vec<JobId> {
        if jobs.len() <= retention {
            return Vec::new();
        }

        let mut candidates: Vec<_> = jobs
            .values()
            .filter(|j| j.status().is_terminal())
            .map(|j| (j.started_at(), j.id()))
            .collect();
        // Oldest first; the time-ordered id breaks ties within the same instant.
        candidates.sort();

        let excess = jobs.len() - retention;
        let evicted: Vec<JobId> = candidates.into_iter().take(excess).map(|(_, id)| id).collect();
        for id in &evicted {
            jobs.remove(id);
        }
        evicted
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> JobStoreError {
    JobStoreError::Storage("job table lock poisoned".to_string())
}

impl JobStore for InMemoryJobStore {
    fn insert(&self, record: JobRecord) -> Result<JobId, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        if jobs.contains_key(&record.id()) {
            return Err(JobStoreError::AlreadyExists(record.id()));
        }
        let id = record.id();
        jobs.insert(id, record);
        Self::evict_oldest(&mut jobs, self.retention);
        Ok(id)
    }

    fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        Ok(jobs.get(&job_id).cloned())
    }

    fn update(&self, record: &JobRecord) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        let stored = jobs
            .get_mut(&record.id())
            .ok_or(JobStoreError::NotFound(record.id()))?;

        if stored.status().is_terminal() {
            return Err(JobStoreError::Terminal(record.id()));
        }
        // Readers must never observe progress going backwards.
        if record.unit_results().len() < stored.unit_results().len()
            || (record.status() == JobStatus::Pending && stored.status() != JobStatus::Pending)
        {
            return Err(JobStoreError::StaleUpdate {
                job_id: record.id(),
                stored: stored.unit_results().len(),
                incoming: record.unit_results().len(),
            });
        }

        *stored = record.clone();
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<JobRecord>, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        let mut result: Vec<_> = jobs.values().cloned().collect();
        result.sort_by(|a, b| (b.started_at(), b.id()).cmp(&(a.started_at(), a.id())));
        result.truncate(limit);
        Ok(result)
    }

    fn prune(&self) -> Result<Vec<JobId>, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        Ok(Self::evict_oldest(&mut jobs, self.retention))
    }
}

impl<S: JobStore + ?Sized> JobStore for Arc<S> {
    fn insert(&self, record: JobRecord) -> Result<JobId, JobStoreError> {
        (**self).insert(record)
    }

    fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, JobStoreError> {
        (**self).get(job_id)
    }

    fn update(&self, record: &JobRecord) -> Result<(), JobStoreError> {
        (**self).update(record)
    }

    fn recent(&self, limit: usize) -> Result<Vec<JobRecord>, JobStoreError> {
        (**self).recent(limit)
    }

    fn prune(&self) -> Result<Vec<JobId>, JobStoreError> {
        (**self).prune()
    }
}
