use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::job::{JobDefinition, NodeDescriptor};
use crate::master::dispatch::Dispatch;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Fail {
    #[default]
    Never,
    File,
    Job,
}

/// Records successful dispatches and fails on demand.
#[derive(Default)]
pub struct FakeDispatch {
    fail: Mutex<Fail>,
    calls: Mutex<Vec<String>>,
}

impl FakeDispatch {
    pub fn fail_with(&self, fail: Fail) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn outcome(&self, call: String, uploads: bool) -> Result<()> {
        match *self.fail.lock().unwrap() {
            Fail::File if uploads => Err(Error::SyncExecFileToNode),
            Fail::File | Fail::Job => Err(Error::SyncJobToNode),
            Fail::Never => {
                self.calls.lock().unwrap().push(call);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Dispatch for FakeDispatch {
    async fn create(&self, _node: &NodeDescriptor, job: &JobDefinition) -> Result<()> {
        self.outcome(format!("create {}", job.id), true)
    }

    async fn update(&self, _node: &NodeDescriptor, job: &JobDefinition) -> Result<()> {
        self.outcome(format!("update {}", job.id), true)
    }

    async fn delete(&self, _node: &NodeDescriptor, job_id: i64) -> Result<()> {
        self.outcome(format!("delete {}", job_id), false)
    }
}
