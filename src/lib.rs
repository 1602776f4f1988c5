//! Distributed cron: a master that owns job definitions and pushes them to
//! nodes, and nodes that run each job on its own seconds-resolution
//! schedule and report every run back to the master.

pub mod config;
pub mod crontab;
pub mod db;
pub mod error;
pub mod heartbeat;
pub mod http;
pub mod job;
pub mod master;
pub mod node;
pub mod storage;

pub use error::{Error, Result};

/// Installs the `tracing` subscriber used by all binaries. `RUST_LOG` wins over `default`.
pub fn init_tracing(default: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
