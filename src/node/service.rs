use std::sync::Arc;

use crate::error::{Error, Result};
use crate::job::{Active, ExecType, JobDispatch};
use crate::node::callback::ResultReporter;
use crate::node::executor::ExecutorFactory;
use crate::node::registry::JobRegistry;
use crate::node::runtime::{JobView, RuntimeJob};
use crate::storage::ArtifactStore;

/// Applies master dispatches to the node's registry.
#[derive(Clone)]
pub struct NodeJobService {
    registry: Arc<JobRegistry>,
    factory: ExecutorFactory,
    reporter: Arc<dyn ResultReporter>,
    artifacts: ArtifactStore,
}

impl NodeJobService {
    pub fn new(
        registry: Arc<JobRegistry>,
        factory: ExecutorFactory,
        reporter: Arc<dyn ResultReporter>,
        artifacts: ArtifactStore,
    ) -> Self {
        Self {
            registry,
            factory,
            reporter,
            artifacts,
        }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Idempotent by skip: an id that is already scheduled is left untouched.
    pub fn add_job(&self, req: JobDispatch) -> Result<()> {
        if self.registry.contains(req.id) {
            tracing::warn!(job_id = req.id, name = %req.name, "job already exists, add skipped");
            return Ok(());
        }
        let start = req.active == Active::Start;
        let job = self.build(req)?;
        self.registry.add(job, start);
        Ok(())
    }

    /// Replaces the existing runtime job with one built from `req`.
    pub fn update_job(&self, req: JobDispatch) -> Result<()> {
        if !self.registry.contains(req.id) {
            return Err(Error::JobNotFound(req.id));
        }
        let id = req.id;
        let start = req.active == Active::Start;
        let job = self.build(req)?;
        self.registry.replace(job, start)?;
        tracing::info!(job_id = id, "job replaced");
        Ok(())
    }

    /// Deleting an unknown id is not an error.
    pub fn delete_job(&self, id: i64) {
        match self.registry.teardown(id) {
            Some(_) => tracing::info!(job_id = id, "job deleted"),
            None => tracing::debug!(job_id = id, "delete of unknown job ignored"),
        }
    }

    pub fn get_job(&self, id: i64) -> Result<JobView> {
        self.registry.get(id).ok_or(Error::JobNotFound(id))
    }

    pub fn list_jobs(&self) -> Vec<JobView> {
        self.registry.all()
    }

    /// Built jobs are not started; the registry starts them once installed.
    fn build(&self, req: JobDispatch) -> Result<RuntimeJob> {
        if req.exec_type == ExecType::File && !self.artifacts.exists(&req.filename) {
            return Err(Error::FileNotExist(req.filename));
        }
        let executor = self.factory.build(&req)?;
        RuntimeJob::build(req, executor, self.reporter.clone())
    }
}
