//! Durable job definitions and their propagation to nodes.
//!
//! Create and update persist first and then dispatch. When the dispatch
//! fails the local write is compensated: a created row is deleted, an
//! updated row is restored to its previous value. A crash between the
//! failed dispatch and the compensating write leaves the row diverged from
//! the node; nothing here repairs that beyond the next resync.
//!
//! Delete dispatches first and only removes the row once the node has
//! dropped the job.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::crontab;
use crate::db::{JobFilter, JobRepo, NodeRepo};
use crate::error::{Error, Result};
use crate::job::{Active, ExecType, FileRef, JobDefinition, JobDispatch, NodeDescriptor, NotifyConfig};
use crate::master::dispatch::Dispatch;
use crate::master::notify::{NotifyRegistration, NotifyStore};
use crate::storage::ArtifactStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJob {
    pub name: String,
    pub exec_type: ExecType,
    pub cron_expr: String,
    #[serde(default = "default_active")]
    pub active: Active,
    pub node_id: i64,
    #[serde(default)]
    pub notify: NotifyConfig,
    pub file: Option<FileRef>,
}

/// Absent fields keep their stored value. The owning node cannot change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateJob {
    pub name: Option<String>,
    pub cron_expr: Option<String>,
    pub active: Option<Active>,
    pub notify: Option<NotifyConfig>,
    pub file: Option<FileRef>,
}

fn default_active() -> Active {
    Active::Start
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResyncReport {
    pub synced: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct JobService {
    jobs: Arc<dyn JobRepo>,
    nodes: Arc<dyn NodeRepo>,
    dispatch: Arc<dyn Dispatch>,
    notify: Arc<dyn NotifyStore>,
    artifacts: ArtifactStore,
}

impl JobService {
    pub fn new(
        jobs: Arc<dyn JobRepo>,
        nodes: Arc<dyn NodeRepo>,
        dispatch: Arc<dyn Dispatch>,
        notify: Arc<dyn NotifyStore>,
        artifacts: ArtifactStore,
    ) -> Self {
        Self {
            jobs,
            nodes,
            dispatch,
            notify,
            artifacts,
        }
    }

    pub async fn create(&self, user_id: i64, req: CreateJob) -> Result<JobDefinition> {
        if req.name.trim().is_empty() {
            return Err(Error::Params("job name is required".into()));
        }
        self.validate(req.exec_type, &req.cron_expr, req.file.as_ref())?;
        let node = self.node(req.node_id).await?;

        let now = Utc::now();
        let job = self
            .jobs
            .insert_job(JobDefinition {
                id: 0,
                name: req.name,
                exec_type: req.exec_type,
                cron_expr: req.cron_expr,
                active: req.active,
                node_id: node.id,
                user_id,
                notify: req.notify,
                file: req.file,
                created_at: now,
                updated_at: now,
            })
            .await?;

        if let Err(e) = self.dispatch.create(&node, &job).await {
            tracing::warn!(job_id = job.id, node = %node.address, op = "create", "rolling back job row");
            if let Err(db_err) = self.jobs.delete_job(job.id).await {
                tracing::error!(
                    job_id = job.id,
                    node = %node.address,
                    error = %db_err,
                    "create compensation failed, row left without a node copy"
                );
            }
            return Err(e);
        }

        self.register_notify(&job);
        tracing::info!(job_id = job.id, node = %node.address, user_id, "job created");
        Ok(job)
    }

    pub async fn update(&self, user_id: i64, id: i64, req: UpdateJob) -> Result<JobDefinition> {
        let previous = self.owned(user_id, id).await?;

        let mut job = previous.clone();
        if let Some(name) = req.name {
            if name.trim().is_empty() {
                return Err(Error::Params("job name is required".into()));
            }
            job.name = name;
        }
        if let Some(cron_expr) = req.cron_expr {
            job.cron_expr = cron_expr;
        }
        if let Some(active) = req.active {
            job.active = active;
        }
        if let Some(notify) = req.notify {
            job.notify = notify;
        }
        if req.file.is_some() {
            job.file = req.file;
        }
        self.validate(job.exec_type, &job.cron_expr, job.file.as_ref())?;
        let node = self.node(job.node_id).await?;
        job.updated_at = Utc::now();

        self.jobs.update_job(&job).await?;
        if let Err(e) = self.dispatch.update(&node, &job).await {
            tracing::warn!(job_id = id, node = %node.address, op = "update", "restoring previous job row");
            if let Err(db_err) = self.jobs.update_job(&previous).await {
                tracing::error!(
                    job_id = id,
                    node = %node.address,
                    error = %db_err,
                    "update compensation failed, row diverged from node"
                );
            }
            return Err(e);
        }

        self.register_notify(&job);
        tracing::info!(job_id = id, node = %node.address, user_id, "job updated");
        Ok(job)
    }

    pub async fn delete(&self, user_id: i64, id: i64) -> Result<()> {
        let job = self.owned(user_id, id).await?;
        let node = self.node(job.node_id).await?;
        self.dispatch.delete(&node, id).await?;
        self.jobs.delete_job(id).await?;
        self.notify.delete(id);
        tracing::info!(job_id = id, node = %node.address, user_id, "job deleted");
        Ok(())
    }

    pub async fn get(&self, user_id: i64, id: i64) -> Result<JobDefinition> {
        self.owned(user_id, id).await
    }

    pub async fn list(&self, user_id: i64) -> Result<Vec<JobDefinition>> {
        self.jobs
            .list_jobs(&JobFilter {
                user_id: Some(user_id),
                ..Default::default()
            })
            .await
    }

    /// Active jobs assigned to `node_id`, in the shape a node accepts.
    pub async fn jobs_for_node(&self, node_id: i64) -> Result<Vec<JobDispatch>> {
        let jobs = self
            .jobs
            .list_jobs(&JobFilter {
                node_id: Some(node_id),
                active: Some(Active::Start),
                ..Default::default()
            })
            .await?;
        Ok(jobs.iter().map(JobDefinition::to_dispatch).collect())
    }

    /// Pushes every stored job to its node and reloads notify registrations.
    /// Nodes skip jobs they already run, so repeating this is harmless.
    pub async fn resync_all(&self) -> Result<ResyncReport> {
        let jobs = self.jobs.list_jobs(&JobFilter::default()).await?;
        for job in &jobs {
            self.register_notify(job);
        }

        let pushes = jobs.iter().map(|job| async move {
            let node = self.node(job.node_id).await?;
            self.dispatch.create(&node, job).await
        });
        let mut report = ResyncReport::default();
        for (job, outcome) in jobs.iter().zip(join_all(pushes).await) {
            match outcome {
                Ok(()) => report.synced += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(job_id = job.id, node_id = job.node_id, error = %e, "resync failed");
                }
            }
        }
        tracing::info!(synced = report.synced, failed = report.failed, "resynced jobs to nodes");
        Ok(report)
    }

    fn validate(&self, exec_type: ExecType, cron_expr: &str, file: Option<&FileRef>) -> Result<()> {
        if exec_type != ExecType::File {
            return Err(Error::UnsupportedExecType(exec_type.to_string()));
        }
        let file = file.ok_or(Error::MissingFileRef)?;
        crontab::validate(cron_expr)?;
        if !self.artifacts.exists(&file.unique_name) {
            return Err(Error::FileNotExist(file.unique_name.clone()));
        }
        Ok(())
    }

    async fn node(&self, node_id: i64) -> Result<NodeDescriptor> {
        self.nodes
            .get_node(node_id)
            .await?
            .ok_or(Error::NodeNotExists(node_id))
    }

    async fn owned(&self, user_id: i64, id: i64) -> Result<JobDefinition> {
        let job = self.jobs.get_job(id).await?.ok_or(Error::JobNotFound(id))?;
        if job.user_id != user_id {
            return Err(Error::UserNotPermission);
        }
        Ok(job)
    }

    fn register_notify(&self, job: &JobDefinition) {
        match NotifyRegistration::for_job(job) {
            Some(registration) => self.notify.set(registration),
            None => self.notify.delete(job.id),
        }
    }
}
