use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::crontab;
use crate::error::Result;
use crate::job::{Active, CallbackPayload, ExecType, ExecutionResult, JobDispatch, JobStatus};
use crate::node::callback::ResultReporter;
use crate::node::executor::Executor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeState {
    Created,
    Scheduled,
    Stopped,
}

/// Read-only snapshot of a runtime job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub id: i64,
    pub name: String,
    pub exec_type: ExecType,
    pub cron_expr: String,
    pub active: Active,
    pub file_name: String,
    pub state: RuntimeState,
    pub running_status: JobStatus,
    pub next_exec_time: Option<DateTime<Utc>>,
}

/// Resolves once the scheduler loop has exited, i.e. after any in-flight run.
pub struct StopHandle {
    task: Option<JoinHandle<()>>,
}

impl StopHandle {
    pub async fn finished(self) {
        if let Some(task) = self.task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "scheduler task ended abnormally");
            }
        }
    }
}

/// A job definition bound to its own single-entry scheduler and executor.
///
/// Never mutated in place: an update tears the old instance down and builds
/// a new one. Dropping the job halts its scheduler.
pub struct RuntimeJob {
    meta: JobDispatch,
    schedule: Schedule,
    executor: Arc<dyn Executor>,
    cancel: CancellationToken,
    halt: CancellationToken,
    task: Option<JoinHandle<()>>,
    next_fire: Arc<Mutex<Option<DateTime<Utc>>>>,
    state: RuntimeState,
}

impl RuntimeJob {
    /// Validates the cron expression, wires the executor's result sink to
    /// `reporter` and computes the first fire time. Nothing runs until `start`.
    pub fn build(
        req: JobDispatch,
        executor: Arc<dyn Executor>,
        reporter: Arc<dyn ResultReporter>,
    ) -> Result<Self> {
        let schedule = crontab::parse(&req.cron_expr)?;
        let next_fire = Arc::new(Mutex::new(crontab::next_fire(&schedule)));

        let job_id = req.id;
        let sink_schedule = schedule.clone();
        executor.on_result_change(Arc::new(move |result: ExecutionResult| {
            let next = crontab::next_fire(&sink_schedule);
            reporter.report(CallbackPayload::new(job_id, result, next));
        }));

        Ok(Self {
            meta: req,
            schedule,
            executor,
            cancel: CancellationToken::new(),
            halt: CancellationToken::new(),
            task: None,
            next_fire,
            state: RuntimeState::Created,
        })
    }

    pub fn id(&self) -> i64 {
        self.meta.id
    }

    pub fn state(&self) -> RuntimeState {
        self.state
    }

    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        *self.next_fire.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Spawns the scheduler loop. Only a freshly built job can be started.
    pub fn start(&mut self) {
        if self.state != RuntimeState::Created {
            tracing::warn!(job_id = self.meta.id, state = ?self.state, "start ignored");
            return;
        }
        let ticker = Ticker {
            job_id: self.meta.id,
            schedule: self.schedule.clone(),
            executor: self.executor.clone(),
            cancel: self.cancel.clone(),
            halt: self.halt.clone(),
            next_fire: self.next_fire.clone(),
        };
        self.task = Some(tokio::spawn(ticker.run()));
        self.state = RuntimeState::Scheduled;
        tracing::info!(job_id = self.meta.id, name = %self.meta.name, cron = %self.meta.cron_expr, "job scheduled");
    }

    /// Halts the scheduler. No new run starts; an in-flight run finishes on its own.
    pub fn stop(&mut self) -> StopHandle {
        self.halt.cancel();
        self.state = RuntimeState::Stopped;
        StopHandle {
            task: self.task.take(),
        }
    }

    /// Signals the executor's cancellation token.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn view(&self) -> JobView {
        JobView {
            id: self.meta.id,
            name: self.meta.name.clone(),
            exec_type: self.meta.exec_type,
            cron_expr: self.meta.cron_expr.clone(),
            active: self.meta.active,
            file_name: self.meta.filename.clone(),
            state: self.state,
            running_status: self.executor.status(),
            next_exec_time: self.next_fire(),
        }
    }
}

impl Drop for RuntimeJob {
    fn drop(&mut self) {
        self.halt.cancel();
    }
}

struct Ticker {
    job_id: i64,
    schedule: Schedule,
    executor: Arc<dyn Executor>,
    cancel: CancellationToken,
    halt: CancellationToken,
    next_fire: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl Ticker {
    async fn run(self) {
        let mut last_fired: Option<DateTime<Utc>> = None;
        loop {
            // The timer can wake a hair early; never fire the same instant twice.
            let from = match last_fired {
                Some(last) if last > Utc::now() => last,
                _ => Utc::now(),
            };
            let next = match crontab::next_after(&self.schedule, from) {
                Some(next) => next,
                None => {
                    tracing::info!(job_id = self.job_id, "no upcoming fire time, scheduler exiting");
                    break;
                }
            };
            self.set_next(Some(next));

            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = self.halt.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
            if self.halt.is_cancelled() || self.cancel.is_cancelled() {
                break;
            }

            last_fired = Some(next);
            self.executor.run(&self.cancel).await;
        }
        tracing::debug!(job_id = self.job_id, "scheduler stopped");
    }

    fn set_next(&self, next: Option<DateTime<Utc>>) {
        *self.next_fire.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::node::testing::{dispatch, ChannelReporter, CountingExecutor};

    #[tokio::test]
    async fn build_rejects_bad_cron() {
        let (reporter, _rx) = ChannelReporter::new();
        let result = RuntimeJob::build(
            dispatch(1, "* * * * *"),
            Arc::new(CountingExecutor::default()),
            reporter,
        );
        assert!(matches!(result, Err(Error::CronExprParse { .. })));
    }

    #[tokio::test]
    async fn build_computes_next_fire_without_running() {
        let (reporter, _rx) = ChannelReporter::new();
        let executor = Arc::new(CountingExecutor::default());
        let job = RuntimeJob::build(dispatch(1, "*/5 * * * * *"), executor.clone(), reporter)
            .unwrap();

        let next = job.next_fire().unwrap();
        assert!(next <= Utc::now() + chrono::Duration::seconds(5));
        assert_eq!(job.state(), RuntimeState::Created);
        assert_eq!(job.view().running_status, JobStatus::Pending);
        assert_eq!(executor.runs(), 0);
    }

    #[tokio::test]
    async fn started_job_runs_and_reports() {
        let (reporter, mut rx) = ChannelReporter::new();
        let executor = Arc::new(CountingExecutor::default());
        let mut job =
            RuntimeJob::build(dispatch(7, "* * * * * *"), executor.clone(), reporter).unwrap();
        job.start();
        assert_eq!(job.state(), RuntimeState::Scheduled);

        let payload = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("a run within three seconds")
            .unwrap();
        assert_eq!(payload.job_id, 7);
        assert_eq!(payload.status, JobStatus::Success);
        assert!(payload.next_exec_time >= payload.start_time);

        job.stop().finished().await;
        let runs = executor.runs();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(executor.runs(), runs);
        assert_eq!(job.state(), RuntimeState::Stopped);
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_run() {
        let (reporter, _rx) = ChannelReporter::new();
        let executor = Arc::new(CountingExecutor::with_delay(Duration::from_millis(800)));
        let mut job =
            RuntimeJob::build(dispatch(2, "* * * * * *"), executor.clone(), reporter).unwrap();
        job.start();

        tokio::time::timeout(Duration::from_secs(3), async {
            while executor.started() == 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        job.cancel();
        job.stop().finished().await;
        assert_eq!(executor.runs(), executor.started());
    }

    #[tokio::test]
    async fn start_is_one_shot() {
        let (reporter, _rx) = ChannelReporter::new();
        let mut job = RuntimeJob::build(
            dispatch(3, "0 0 0 1 1 *"),
            Arc::new(CountingExecutor::default()),
            reporter,
        )
        .unwrap();
        job.start();
        let _ = job.stop();
        job.start();
        assert_eq!(job.state(), RuntimeState::Stopped);
    }
}
