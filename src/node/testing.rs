use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::job::{Active, CallbackPayload, ExecType, JobDispatch, JobStatus};
use crate::node::callback::ResultReporter;
use crate::node::executor::{ExecOutcome, Executor, Lifecycle, ResultSink, DEFAULT_OUTPUT_LIMIT};

pub fn dispatch(id: i64, cron: &str) -> JobDispatch {
    JobDispatch {
        id,
        name: format!("job-{id}"),
        exec_type: ExecType::Shell,
        cron_expr: cron.to_string(),
        active: Active::Start,
        filename: String::new(),
    }
}

/// Always succeeds, optionally after a delay.
pub struct CountingExecutor {
    delay: Duration,
    started: AtomicUsize,
    runs: AtomicUsize,
    lifecycle: Lifecycle,
}

impl Default for CountingExecutor {
    fn default() -> Self {
        Self::with_delay(Duration::ZERO)
    }
}

impl CountingExecutor {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            started: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
            lifecycle: Lifecycle::new(DEFAULT_OUTPUT_LIMIT),
        }
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for CountingExecutor {
    async fn execute(&self, _cancel: &CancellationToken) -> ExecOutcome {
        self.started.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("run {n}"))
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

pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<CallbackPayload>,
}

impl ChannelReporter {
    pub fn new() -> (Arc<dyn ResultReporter>, mpsc::UnboundedReceiver<CallbackPayload>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(ChannelReporter { tx }), rx)
    }
}

impl ResultReporter for ChannelReporter {
    fn report(&self, payload: CallbackPayload) {
        let _ = self.tx.send(payload);
    }
}
