use std::sync::Arc;

use crate::db::{JobRecordRepo, Page, RecordPage};
use crate::error::{Error, Result};
use crate::job::{CallbackPayload, JobRecord};
use crate::master::notify::{NotifyStore, NotifyUnit};

/// Ingests run reports from nodes and serves the run history.
#[derive(Clone)]
pub struct JobRecordService {
    records: Arc<dyn JobRecordRepo>,
    notify: Arc<dyn NotifyStore>,
}

impl JobRecordService {
    pub fn new(records: Arc<dyn JobRecordRepo>, notify: Arc<dyn NotifyStore>) -> Self {
        Self { records, notify }
    }

    /// Persists the record, then hands a notify unit to the pipeline when
    /// the job's strategy asks for one. Only persistence can fail the call.
    pub async fn add_job_record(&self, payload: CallbackPayload) -> Result<JobRecord> {
        let record = match self.records.insert_record(JobRecord::from(payload)).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(error = %e, "failed to persist job record");
                return Err(e);
            }
        };
        tracing::debug!(job_id = record.job_id, record_id = record.id, status = %record.status, "job record stored");

        if let Some(registration) = self.notify.get(record.job_id) {
            if let Some(unit) = NotifyUnit::decide(&registration, &record) {
                self.notify.push_notify_unit(unit);
            }
        }
        Ok(record)
    }

    pub async fn get(&self, id: i64) -> Result<JobRecord> {
        self.records
            .get_record(id)
            .await?
            .ok_or(Error::RecordNotFound(id))
    }

    pub async fn list(&self, job_id: Option<i64>, page: Page) -> Result<RecordPage> {
        self.records.list_records(job_id, page).await
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        self.get(id).await?;
        self.records.delete_record(id).await
    }
}
