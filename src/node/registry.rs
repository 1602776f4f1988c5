use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, Result};
use crate::node::runtime::{JobView, RuntimeJob, StopHandle};

/// Sole owner of the node's runtime jobs, keyed by job id.
///
/// The lock only guards map access and the non-blocking cancel/stop
/// signals; it is never held across a run or an await point. Callers get
/// [`JobView`] snapshots, never the jobs themselves.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<i64, RuntimeJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<i64, RuntimeJob>> {
        self.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<i64, RuntimeJob>> {
        self.jobs.write().unwrap_or_else(|e| e.into_inner())
    }

    /// First writer wins: returns false and drops `job` (halting it) if the id is taken.
    /// With `start` set the job is started only once it is in the map.
    pub fn add(&self, mut job: RuntimeJob, start: bool) -> bool {
        let id = job.id();
        let mut jobs = self.write();
        if jobs.contains_key(&id) {
            tracing::warn!(job_id = id, "job already registered, add ignored");
            return false;
        }
        if start {
            job.start();
        }
        jobs.insert(id, job);
        true
    }

    /// Detaches a job without stopping it; the caller takes ownership.
    pub fn remove(&self, id: i64) -> Option<RuntimeJob> {
        self.write().remove(&id)
    }

    /// Cancels, stops and removes a job, in that order.
    pub fn teardown(&self, id: i64) -> Option<StopHandle> {
        let mut jobs = self.write();
        let job = jobs.get_mut(&id)?;
        job.cancel();
        let stopped = job.stop();
        jobs.remove(&id);
        Some(stopped)
    }

    /// Tears down the job with the same id and installs `job` in its place,
    /// under one lock acquisition. Fails with `JobNotFound` if there was none.
    ///
    /// The old job is cancelled and stopped before `job` is started, so two
    /// tickers never run for the same id.
    pub fn replace(&self, mut job: RuntimeJob, start: bool) -> Result<StopHandle> {
        let id = job.id();
        let mut jobs = self.write();
        let old = jobs.get_mut(&id).ok_or(Error::JobNotFound(id))?;
        old.cancel();
        let stopped = old.stop();
        if start {
            job.start();
        }
        jobs.insert(id, job);
        Ok(stopped)
    }

    pub fn get(&self, id: i64) -> Option<JobView> {
        self.read().get(&id).map(RuntimeJob::view)
    }

    pub fn contains(&self, id: i64) -> bool {
        self.read().contains_key(&id)
    }

    pub fn all(&self) -> Vec<JobView> {
        let mut views: Vec<JobView> = self.read().values().map(RuntimeJob::view).collect();
        views.sort_by_key(|v| v.id);
        views
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
