//! Master side: owns job definitions and keeps nodes in step with them.
//!
//! - [`dispatch`]: pushes create/update/delete and script files to a node
//! - [`job`]: persisted job definitions with compensating dispatch
//! - [`record`]: run reports from nodes and the notify decision
//! - [`notify`]: bounded alert queue and its workers
//! - [`node`]: node registration and liveness view
//! - [`dashboard`]: job and node counts for the summary view
//! - [`api`]: HTTP surface for users and nodes

pub mod api;
pub mod dashboard;
pub mod dispatch;
pub mod job;
pub mod node;
pub mod notify;
pub mod record;

#[cfg(test)]
pub(crate) mod testing;

pub use api::MasterState;
pub use job::JobService;
pub use record::JobRecordService;
