//! Node side: runs dispatched jobs on their cron schedules.
//!
//! - [`executor`]: the unit of work and its retry decorator
//! - [`runtime`]: a job bound to its own scheduler loop
//! - [`registry`]: the node's set of runtime jobs
//! - [`service`]: applies add/update/delete dispatches
//! - [`callback`]: reports finished runs to the master
//! - [`sync`]: pulls the active job list from the master at startup
//! - [`api`]: HTTP surface the master dispatches to

pub mod api;
pub mod callback;
pub mod executor;
pub mod registry;
pub mod runtime;
pub mod service;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use registry::JobRegistry;
pub use service::NodeJobService;
