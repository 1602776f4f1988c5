//! Alert delivery for finished runs.
//!
//! Jobs with notifications enabled are registered in a [`NotifyStore`].
//! Units pushed to the store land in a bounded queue drained by a fixed
//! pool of workers; when the queue is full the unit is dropped and logged.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::job::{JobDefinition, JobRecord, NotifyConfig, NotifyStrategy, NotifyType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyRegistration {
    pub job_id: i64,
    pub job_name: String,
    pub config: NotifyConfig,
}

impl NotifyRegistration {
    /// `None` when the job has notifications disabled.
    pub fn for_job(job: &JobDefinition) -> Option<Self> {
        if !job.notify.is_enabled() {
            return None;
        }
        Some(Self {
            job_id: job.id,
            job_name: job.name.clone(),
            config: job.notify.clone(),
        })
    }
}

/// One alert: the registration that asked for it plus the run that triggered it.
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyUnit {
    pub job_id: i64,
    pub job_name: String,
    pub notify_type: NotifyType,
    pub strategy: NotifyStrategy,
    pub mark: String,
    pub record: JobRecord,
}

impl NotifyUnit {
    /// Builds a unit only when the record's status matches the configured strategy.
    pub fn decide(registration: &NotifyRegistration, record: &JobRecord) -> Option<Self> {
        if !registration.config.is_enabled() || !registration.config.strategy.matches(record.status) {
            return None;
        }
        Some(Self {
            job_id: registration.job_id,
            job_name: registration.job_name.clone(),
            notify_type: registration.config.notify_type,
            strategy: registration.config.strategy,
            mark: registration.config.mark.clone(),
            record: record.clone(),
        })
    }

    pub fn subject(&self) -> String {
        format!("Job: {}, status: {}", self.job_name, self.record.status)
    }

    pub fn body(&self) -> String {
        format!(
            "Job {} finished with status {}.\nStarted: {}\nDuration: {:.3}s\nOutput:\n{}\nError:\n{}",
            self.job_name,
            self.record.status,
            self.record.start_time.format("%Y-%m-%d %H:%M:%S"),
            self.record.duration,
            self.record.output,
            self.record.error,
        )
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, unit: &NotifyUnit) -> anyhow::Result<()>;
}

/// Writes the rendered alert to the log. Mail backends plug in behind [`Notifier`].
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, unit: &NotifyUnit) -> anyhow::Result<()> {
        match unit.notify_type {
            NotifyType::Email => {
                tracing::info!(
                    job_id = unit.job_id,
                    to = %unit.mark,
                    subject = %unit.subject(),
                    body = %unit.body(),
                    "job notification"
                );
            }
        }
        Ok(())
    }
}

pub trait NotifyStore: Send + Sync {
    fn set(&self, registration: NotifyRegistration);
    fn get(&self, job_id: i64) -> Option<NotifyRegistration>;
    fn delete(&self, job_id: i64);
    /// Never blocks. Returns `false` when the unit was dropped.
    fn push_notify_unit(&self, unit: NotifyUnit) -> bool;
}

pub struct MemoryNotifyStore {
    registrations: RwLock<HashMap<i64, NotifyRegistration>>,
    queue: mpsc::Sender<NotifyUnit>,
}

impl MemoryNotifyStore {
    /// Spawns `workers` tasks on the current runtime.
    pub fn start(workers: usize, capacity: usize, notifier: Arc<dyn Notifier>) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        for worker in 0..workers.max(1) {
            let rx = rx.clone();
            let notifier = notifier.clone();
            tokio::spawn(async move {
                loop {
                    let unit = rx.lock().await.recv().await;
                    let Some(unit) = unit else { break };
                    if let Err(e) = notifier.send(&unit).await {
                        tracing::error!(worker, job_id = unit.job_id, error = %e, "notification failed");
                    }
                }
            });
        }
        Arc::new(Self {
            registrations: RwLock::new(HashMap::new()),
            queue: tx,
        })
    }
}

impl NotifyStore for MemoryNotifyStore {
    fn set(&self, registration: NotifyRegistration) {
        let mut registrations = self.registrations.write().unwrap_or_else(|e| e.into_inner());
        registrations.insert(registration.job_id, registration);
    }

    fn get(&self, job_id: i64) -> Option<NotifyRegistration> {
        let registrations = self.registrations.read().unwrap_or_else(|e| e.into_inner());
        registrations.get(&job_id).cloned()
    }

    fn delete(&self, job_id: i64) {
        let mut registrations = self.registrations.write().unwrap_or_else(|e| e.into_inner());
        registrations.remove(&job_id);
    }

    fn push_notify_unit(&self, unit: NotifyUnit) -> bool {
        let job_id = unit.job_id;
        match self.queue.try_send(unit) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(job_id, "notify queue is full, dropping notification");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::error!(job_id, "notify workers are gone, dropping notification");
                false
            }
        }
    }
}
