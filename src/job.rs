use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecType {
    Shell,
    Http,
    File,
}

impl fmt::Display for ExecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecType::Shell => write!(f, "shell"),
            ExecType::Http => write!(f, "http"),
            ExecType::File => write!(f, "file"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Active {
    Start,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Success => write!(f, "success"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotifyStatus {
    Enabled,
    #[default]
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotifyType {
    #[default]
    Email,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotifyStrategy {
    AfterSuccess,
    #[default]
    AfterFailed,
    Always,
}

impl NotifyStrategy {
    /// Whether a finished run with `status` should raise an alert.
    pub fn matches(self, status: JobStatus) -> bool {
        match self {
            NotifyStrategy::AfterSuccess => status == JobStatus::Success,
            NotifyStrategy::AfterFailed => status == JobStatus::Failed,
            NotifyStrategy::Always => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NotifyConfig {
    #[serde(default)]
    pub status: NotifyStatus,
    #[serde(default, rename = "type")]
    pub notify_type: NotifyType,
    #[serde(default)]
    pub strategy: NotifyStrategy,
    /// Destination address, e.g. an email.
    #[serde(default)]
    pub mark: String,
}

impl NotifyConfig {
    pub fn is_enabled(&self) -> bool {
        self.status == NotifyStatus::Enabled
    }
}

/// An uploaded script as known to the master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub filename: String,
    pub unique_name: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
}

/// Durable job definition owned by the master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: i64,
    pub name: String,
    pub exec_type: ExecType,
    pub cron_expr: String,
    pub active: Active,
    pub node_id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub notify: NotifyConfig,
    pub file: Option<FileRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobDefinition {
    pub fn to_dispatch(&self) -> JobDispatch {
        JobDispatch {
            id: self.id,
            name: self.name.clone(),
            exec_type: self.exec_type,
            cron_expr: self.cron_expr.clone(),
            active: self.active,
            filename: self
                .file
                .as_ref()
                .map(|f| f.unique_name.clone())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub id: i64,
    pub name: String,
    /// `host:port`
    pub address: String,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub last_check: Option<DateTime<Utc>>,
}

/// Body of a create/update push from master to node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDispatch {
    pub id: i64,
    pub name: String,
    pub exec_type: ExecType,
    pub cron_expr: String,
    pub active: Active,
    #[serde(default)]
    pub filename: String,
}

/// Outcome of a single `run` of an executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Seconds.
    pub duration: f64,
    pub status: JobStatus,
    pub output: String,
    pub error: String,
}

/// Node to master report of a finished run. Times are epoch integers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub job_id: i64,
    pub start_time: i64,
    pub end_time: i64,
    pub duration: f64,
    pub status: JobStatus,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: String,
    pub next_exec_time: i64,
}

impl CallbackPayload {
    pub fn new(job_id: i64, result: ExecutionResult, next: Option<DateTime<Utc>>) -> Self {
        Self {
            job_id,
            start_time: result.start_time.timestamp(),
            end_time: result.end_time.timestamp(),
            duration: result.duration,
            status: result.status,
            output: result.output,
            error: result.error,
            next_exec_time: next.map(|t| t.timestamp()).unwrap_or_default(),
        }
    }
}

/// Append-only run history row on the master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: i64,
    pub job_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub next_exec_time: DateTime<Utc>,
    pub duration: f64,
    pub status: JobStatus,
    pub output: String,
    pub error: String,
}

impl From<CallbackPayload> for JobRecord {
    fn from(payload: CallbackPayload) -> Self {
        JobRecord {
            id: 0,
            job_id: payload.job_id,
            start_time: timestamp_to_datetime(payload.start_time),
            end_time: timestamp_to_datetime(payload.end_time),
            next_exec_time: timestamp_to_datetime(payload.next_exec_time),
            duration: payload.duration,
            status: payload.status,
            output: payload.output,
            error: payload.error,
        }
    }
}

/// Interprets an epoch integer as seconds, milliseconds or nanoseconds by magnitude.
pub fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    let converted = if ts > 1_000_000_000_000_000_000 {
        Some(DateTime::from_timestamp_nanos(ts))
    } else if ts > 1_000_000_000_000 {
        DateTime::from_timestamp_millis(ts)
    } else {
        DateTime::from_timestamp(ts, 0)
    };
    converted.unwrap_or_default()
}
