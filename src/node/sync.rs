use std::time::Duration;

use crate::http::{self, RemoteError};
use crate::job::JobDispatch;
use crate::node::service::NodeJobService;

pub const JOB_SYNC_PATH: &str = "/jobs/sync";

/// Pulls the active jobs assigned to `node_id` from the master and adds
/// each one. Returns how many were accepted; individual failures are logged.
pub async fn sync_from_master(
    service: &NodeJobService,
    master_address: &str,
    node_id: i64,
    timeout: Duration,
) -> Result<usize, RemoteError> {
    let client = http::client(timeout)?;
    let url = http::url(master_address, JOB_SYNC_PATH);
    let response = client
        .get(&url)
        .query(&[("node_id", node_id)])
        .send()
        .await?;
    let jobs: Vec<JobDispatch> = http::parse_envelope(response).await?.unwrap_or_default();

    let mut added = 0;
    for job in jobs {
        let (id, name) = (job.id, job.name.clone());
        match service.add_job(job) {
            Ok(()) => added += 1,
            Err(e) => tracing::error!(job_id = id, name = %name, error = %e, "sync job failed"),
        }
    }
    tracing::info!(node_id, added, "synced jobs from master");
    Ok(added)
}
