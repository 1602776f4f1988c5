use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::NodeConfig;
use crate::error::Error;
use crate::job::{ExecType, ExecutionResult, JobDispatch, JobStatus};

pub const DEFAULT_OUTPUT_LIMIT: usize = 10 * 1024;
const ELLIPSIS: &str = "...";

/// Receives the result of every finished `run`.
pub type ResultSink = Arc<dyn Fn(ExecutionResult) + Send + Sync>;

pub type ExecOutcome = Result<String, ExecError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecError {
    #[error("unsupported script extension: {0:?}")]
    UnsupportedExtension(String),

    #[error("script not found: {0}")]
    ScriptMissing(String),

    #[error("failed to launch {program}: {reason}")]
    Launch { program: String, reason: String },

    #[error("exited with code {code:?}, stderr: {stderr}")]
    NonZeroExit {
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("stderr: {stderr}")]
    Stderr { stdout: String, stderr: String },

    #[error("cancelled before start")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl ExecError {
    /// Stdout captured before the failure was detected.
    pub fn output(&self) -> &str {
        match self {
            ExecError::NonZeroExit { stdout, .. } | ExecError::Stderr { stdout, .. } => stdout,
            _ => "",
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ExecError::UnsupportedExtension(_) | ExecError::Cancelled
        )
    }
}

/// One schedulable unit of work.
///
/// `run` is what the cron trigger calls. It brackets `execute` with the
/// before/after hooks and hands the outcome to the registered sink.
/// Decorators override `execute` and forward the hooks to the wrapped
/// executor, so hooks fire once per outer `run`.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, cancel: &CancellationToken) -> ExecOutcome;

    fn before_execute(&self);

    fn after_execute(&self, outcome: &ExecOutcome);

    fn report(&self, outcome: ExecOutcome);

    fn on_result_change(&self, sink: ResultSink);

    fn status(&self) -> JobStatus;

    async fn run(&self, cancel: &CancellationToken) {
        self.before_execute();
        let outcome = self.execute(cancel).await;
        self.after_execute(&outcome);
        self.report(outcome);
    }
}

struct LifecycleState {
    status: JobStatus,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    sink: Option<ResultSink>,
}

/// Run bookkeeping shared by concrete executors: status, timings and the sink.
pub struct Lifecycle {
    state: Mutex<LifecycleState>,
    output_limit: usize,
}

impl Lifecycle {
    pub fn new(output_limit: usize) -> Self {
        let now = Utc::now();
        Self {
            state: Mutex::new(LifecycleState {
                status: JobStatus::Pending,
                started_at: now,
                ended_at: now,
                sink: None,
            }),
            output_limit,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn begin(&self) {
        let mut state = self.lock();
        state.status = JobStatus::Running;
        state.started_at = Utc::now();
    }

    pub fn finish(&self, outcome: &ExecOutcome) {
        let mut state = self.lock();
        state.status = if outcome.is_ok() {
            JobStatus::Success
        } else {
            JobStatus::Failed
        };
        state.ended_at = Utc::now();
    }

    pub fn set_sink(&self, sink: ResultSink) {
        self.lock().sink = Some(sink);
    }

    pub fn status(&self) -> JobStatus {
        self.lock().status
    }

    pub fn report(&self, outcome: ExecOutcome) {
        let (result, sink) = {
            let state = self.lock();
            let (output, error) = match outcome {
                Ok(output) => (output, String::new()),
                Err(e) => (e.output().to_string(), e.to_string()),
            };
            let duration = (state.ended_at - state.started_at)
                .to_std()
                .map(|d| d.as_secs_f64())
                .unwrap_or_default();
            let result = ExecutionResult {
                start_time: state.started_at,
                end_time: state.ended_at,
                duration,
                status: state.status,
                output: truncate_output(&output, self.output_limit),
                error,
            };
            (result, state.sink.clone())
        };
        if let Some(sink) = sink {
            sink(result);
        }
    }
}

/// Caps `output` at `limit` characters, marking a cut with a trailing ellipsis.
pub fn truncate_output(output: &str, limit: usize) -> String {
    if output.chars().count() <= limit {
        return output.to_string();
    }
    if limit < ELLIPSIS.len() {
        return ELLIPSIS[..limit].to_string();
    }
    let mut truncated: String = output.chars().take(limit - ELLIPSIS.len()).collect();
    truncated.push_str(ELLIPSIS);
    truncated
}

/// Runs an uploaded script with the interpreter registered for its extension.
pub struct FileExecutor {
    job_id: i64,
    name: String,
    script: PathBuf,
    extension: String,
    interpreter: Option<String>,
    lifecycle: Lifecycle,
}

impl FileExecutor {
    pub fn new(
        job_id: i64,
        name: impl Into<String>,
        upload_dir: &Path,
        file_name: &str,
        interpreters: &HashMap<String, String>,
        output_limit: usize,
    ) -> Self {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_string();
        let interpreter = interpreters.get(&extension).cloned();
        Self {
            job_id,
            name: name.into(),
            script: upload_dir.join(file_name),
            extension,
            interpreter,
            lifecycle: Lifecycle::new(output_limit),
        }
    }

    pub fn script(&self) -> &Path {
        &self.script
    }
}

#[async_trait]
impl Executor for FileExecutor {
    async fn execute(&self, cancel: &CancellationToken) -> ExecOutcome {
        let program = match &self.interpreter {
            Some(program) => program,
            None => return Err(ExecError::UnsupportedExtension(self.extension.clone())),
        };
        if cancel.is_cancelled() {
            return Err(ExecError::Cancelled);
        }
        if !self.script.is_file() {
            return Err(ExecError::ScriptMissing(self.script.display().to_string()));
        }

        tracing::debug!(job_id = self.job_id, name = %self.name, program = %program, script = %self.script.display(), "executing script");

        let result = Command::new(program)
            .arg(&self.script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        match result {
            Ok(output) => classify(output),
            Err(e) => Err(ExecError::Launch {
                program: program.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn before_execute(&self) {
        self.lifecycle.begin();
    }

    fn after_execute(&self, outcome: &ExecOutcome) {
        self.lifecycle.finish(outcome);
    }

    fn report(&self, outcome: ExecOutcome) {
        self.lifecycle.report(outcome);
    }

    fn on_result_change(&self, sink: ResultSink) {
        self.lifecycle.set_sink(sink);
    }

    fn status(&self) -> JobStatus {
        self.lifecycle.status()
    }
}

/// Non-zero exit or any stderr output counts as a failure.
fn classify(output: std::process::Output) -> ExecOutcome {
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    if !output.status.success() {
        return Err(ExecError::NonZeroExit {
            code: output.status.code(),
            stdout,
            stderr,
        });
    }
    if !stderr.is_empty() {
        return Err(ExecError::Stderr { stdout, stderr });
    }
    Ok(stdout)
}

/// Re-runs the wrapped executor's `execute` until it succeeds or the attempts run out.
/// Only the final outcome reaches the sink.
pub struct RetryExecutor {
    inner: Arc<dyn Executor>,
    retries: usize,
}

impl RetryExecutor {
    pub fn new(inner: Arc<dyn Executor>, retries: usize) -> Self {
        Self {
            inner,
            retries: retries.max(1),
        }
    }
}

/// Why a failed attempt ends the retry loop; `None` means try again.
fn give_up_reason(err: &ExecError, cancelled: bool, attempt: usize, retries: usize) -> Option<&'static str> {
    if cancelled {
        Some("cancelled")
    } else if !err.is_retryable() {
        Some("not retryable")
    } else if attempt >= retries {
        Some("retries exhausted")
    } else {
        None
    }
}

#[async_trait]
impl Executor for RetryExecutor {
    async fn execute(&self, cancel: &CancellationToken) -> ExecOutcome {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.inner.execute(cancel).await {
                Ok(output) => return Ok(output),
                Err(e) => e,
            };
            tracing::warn!(attempt, retries = self.retries, error = %err, "executor attempt failed");
            if let Some(reason) = give_up_reason(&err, cancel.is_cancelled(), attempt, self.retries) {
                tracing::info!(attempt, retries = self.retries, reason, "run failed");
                return Err(err);
            }
        }
    }

    fn before_execute(&self) {
        self.inner.before_execute();
    }

    fn after_execute(&self, outcome: &ExecOutcome) {
        self.inner.after_execute(outcome);
    }

    fn report(&self, outcome: ExecOutcome) {
        self.inner.report(outcome);
    }

    fn on_result_change(&self, sink: ResultSink) {
        self.inner.on_result_change(sink);
    }

    fn status(&self) -> JobStatus {
        self.inner.status()
    }
}

/// Resolves the executor for a dispatched job from its exec type.
#[derive(Clone)]
pub struct ExecutorFactory {
    upload_dir: PathBuf,
    interpreters: Arc<HashMap<String, String>>,
    retries: usize,
    output_limit: usize,
}

impl ExecutorFactory {
    pub fn new(
        upload_dir: impl Into<PathBuf>,
        interpreters: HashMap<String, String>,
        retries: usize,
        output_limit: usize,
    ) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            interpreters: Arc::new(interpreters),
            retries,
            output_limit,
        }
    }

    pub fn from_config(config: &NodeConfig) -> Self {
        Self::new(
            config.upload_dir.clone(),
            config.interpreters.clone(),
            config.retries,
            config.output_limit,
        )
    }

    pub fn build(&self, req: &JobDispatch) -> Result<Arc<dyn Executor>, Error> {
        match req.exec_type {
            ExecType::File => {
                let file: Arc<dyn Executor> = Arc::new(FileExecutor::new(
                    req.id,
                    req.name.clone(),
                    &self.upload_dir,
                    &req.filename,
                    &self.interpreters,
                    self.output_limit,
                ));
                if self.retries > 1 {
                    Ok(Arc::new(RetryExecutor::new(file, self.retries)))
                } else {
                    Ok(file)
                }
            }
            other => Err(Error::UnsupportedExecType(other.to_string())),
        }
    }
}
