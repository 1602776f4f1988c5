use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{App, Arg};

use cronfleet::config::Config;
use cronfleet::node::api;
use cronfleet::node::callback::MasterCallback;
use cronfleet::node::executor::ExecutorFactory;
use cronfleet::node::sync::sync_from_master;
use cronfleet::node::{JobRegistry, NodeJobService};
use cronfleet::storage::ArtifactStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cronfleet::init_tracing("info");

    let matches = App::new("cronfleet-node")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Runs the cron jobs the master assigns to this node")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Configuration file, defaults to $CRONFLEET_CONFIG or app.toml")
                .takes_value(true),
        )
        .get_matches();

    let config_file = Config::resolve_path(matches.value_of("config"));
    let config = Config::from_file(&config_file)?;
    let node = config
        .node
        .with_context(|| format!("{} has no [node] section", config_file))?;

    let artifacts = ArtifactStore::new(&node.upload_dir);
    artifacts
        .ensure_dir()
        .await
        .with_context(|| format!("creating upload directory {}", node.upload_dir.display()))?;

    let timeout = Duration::from_secs(node.callback_timeout_secs);
    let service = NodeJobService::new(
        Arc::new(JobRegistry::new()),
        ExecutorFactory::from_config(&node),
        Arc::new(MasterCallback::new(&node.master_address, timeout)?),
        artifacts,
    );

    let listener = tokio::net::TcpListener::bind(&node.listen)
        .await
        .with_context(|| format!("binding {}", node.listen))?;

    if node.sync_on_start {
        let service = service.clone();
        let master_address = node.master_address.clone();
        let node_id = node.id;
        tokio::spawn(async move {
            if let Err(e) = sync_from_master(&service, &master_address, node_id, timeout).await {
                tracing::error!(node_id, master = %master_address, error = %e, "startup sync failed");
            }
        });
    }

    tracing::info!(node_id = node.id, master = %node.master_address, "node starting");
    api::serve(listener, service).await?;
    Ok(())
}
