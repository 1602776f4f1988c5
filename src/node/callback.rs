use std::time::Duration;

use crate::error::{Error, Result};
use crate::http::{self, RemoteError};
use crate::job::CallbackPayload;

pub const JOB_RECORD_ADD_PATH: &str = "/job_records/add";

/// Where a runtime job sends its finished-run reports.
pub trait ResultReporter: Send + Sync {
    /// Must not block the caller; delivery happens in the background.
    fn report(&self, payload: CallbackPayload);
}

/// Posts results to the master. Fire-and-forget: a failed send is logged and dropped.
#[derive(Clone)]
pub struct MasterCallback {
    client: reqwest::Client,
    url: String,
}

impl MasterCallback {
    pub fn new(master_address: &str, timeout: Duration) -> Result<Self> {
        let client = http::client(timeout).map_err(|e| Error::Internal(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            url: http::url(master_address, JOB_RECORD_ADD_PATH),
        })
    }

    pub async fn send(&self, payload: &CallbackPayload) -> std::result::Result<(), RemoteError> {
        let response = self.client.post(&self.url).json(payload).send().await?;
        http::parse_envelope::<serde_json::Value>(response).await?;
        Ok(())
    }
}

impl ResultReporter for MasterCallback {
    fn report(&self, payload: CallbackPayload) {
        let callback = self.clone();
        tokio::spawn(async move {
            match callback.send(&payload).await {
                Ok(()) => tracing::debug!(job_id = payload.job_id, status = %payload.status, "result reported"),
                Err(e) => tracing::error!(
                    job_id = payload.job_id,
                    url = %callback.url,
                    error = %e,
                    "failed to report result to master"
                ),
            }
        });
    }
}
