use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};

use crate::error::{Error, Result};
use crate::heartbeat::NodeLiveness;
use crate::http::{self, RemoteError};
use crate::job::{ExecType, FileRef, JobDefinition, NodeDescriptor};
use crate::storage::ArtifactStore;

pub const NODE_ADD_PATH: &str = "/jobs/add";
pub const NODE_UPDATE_PATH: &str = "/jobs";
pub const NODE_UPLOAD_PATH: &str = "/jobs/upload";

/// Pushes job changes to the node that owns the job.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn create(&self, node: &NodeDescriptor, job: &JobDefinition) -> Result<()>;
    async fn update(&self, node: &NodeDescriptor, job: &JobDefinition) -> Result<()>;
    async fn delete(&self, node: &NodeDescriptor, job_id: i64) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Push {
    Create,
    Update,
}

impl Push {
    fn as_str(self) -> &'static str {
        match self {
            Push::Create => "create",
            Push::Update => "update",
        }
    }
}

pub struct HttpDispatcher {
    client: reqwest::Client,
    artifacts: ArtifactStore,
    liveness: Arc<dyn NodeLiveness>,
}

impl HttpDispatcher {
    pub fn new(timeout: Duration, artifacts: ArtifactStore, liveness: Arc<dyn NodeLiveness>) -> Result<Self> {
        let client = http::client(timeout).map_err(|e| Error::Internal(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            artifacts,
            liveness,
        })
    }

    // Any answer means the node is up, even an error status or a bad envelope.
    fn observe<T>(&self, node: &NodeDescriptor, result: &std::result::Result<T, RemoteError>) {
        let online = !matches!(result, Err(e) if e.is_unreachable());
        self.liveness.record(node.id, online);
    }

    async fn upload(
        &self,
        node: &NodeDescriptor,
        file: &FileRef,
        content: Vec<u8>,
    ) -> std::result::Result<(), RemoteError> {
        let form = Form::new()
            .part("file", Part::bytes(content).file_name(file.filename.clone()))
            .text("filename", file.unique_name.clone());
        let response = self
            .client
            .post(http::url(&node.address, NODE_UPLOAD_PATH))
            .multipart(form)
            .send()
            .await?;
        http::parse_envelope::<serde_json::Value>(response).await.map(|_| ())
    }

    async fn push(&self, node: &NodeDescriptor, job: &JobDefinition, op: Push) -> Result<()> {
        if job.exec_type == ExecType::File {
            let file = job.file.as_ref().ok_or(Error::MissingFileRef)?;
            let content = self.artifacts.read(&file.unique_name).await?;
            let uploaded = self.upload(node, file, content).await;
            self.observe(node, &uploaded);
            if let Err(e) = uploaded {
                tracing::error!(
                    job_id = job.id,
                    node = %node.address,
                    op = op.as_str(),
                    file = %file.unique_name,
                    error = %e,
                    "artifact transfer failed"
                );
                return Err(Error::SyncExecFileToNode);
            }
        }

        let payload = job.to_dispatch();
        let request = match op {
            Push::Create => self.client.post(http::url(&node.address, NODE_ADD_PATH)),
            Push::Update => self.client.put(http::url(&node.address, NODE_UPDATE_PATH)),
        };
        let pushed = match request.json(&payload).send().await {
            Ok(response) => http::parse_envelope::<serde_json::Value>(response).await.map(|_| ()),
            Err(e) => Err(e.into()),
        };
        self.observe(node, &pushed);
        match pushed {
            Ok(()) => {
                tracing::info!(job_id = job.id, node = %node.address, op = op.as_str(), "job dispatched");
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    job_id = job.id,
                    node = %node.address,
                    op = op.as_str(),
                    error = %e,
                    "job dispatch failed"
                );
                Err(Error::SyncJobToNode)
            }
        }
    }
}

#[async_trait]
impl Dispatch for HttpDispatcher {
    async fn create(&self, node: &NodeDescriptor, job: &JobDefinition) -> Result<()> {
        self.push(node, job, Push::Create).await
    }

    async fn update(&self, node: &NodeDescriptor, job: &JobDefinition) -> Result<()> {
        self.push(node, job, Push::Update).await
    }

    async fn delete(&self, node: &NodeDescriptor, job_id: i64) -> Result<()> {
        let path = format!("/jobs/{}", job_id);
        let deleted = match self.client.delete(http::url(&node.address, &path)).send().await {
            Ok(response) => http::parse_envelope::<serde_json::Value>(response).await.map(|_| ()),
            Err(e) => Err(e.into()),
        };
        self.observe(node, &deleted);
        match deleted {
            Ok(()) => {
                tracing::info!(job_id, node = %node.address, op = "delete", "job dispatched");
                Ok(())
            }
            Err(e) => {
                tracing::error!(job_id, node = %node.address, op = "delete", error = %e, "job dispatch failed");
                Err(Error::SyncJobToNode)
            }
        }
    }
}
