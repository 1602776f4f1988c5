use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{App, Arg};

use cronfleet::config::Config;
use cronfleet::db::{JobRecordRepo, JobRepo, MemoryStore, MongoStore, NodeRepo};
use cronfleet::heartbeat::HeartbeatTable;
use cronfleet::master::api::{self, MasterState};
use cronfleet::master::dispatch::HttpDispatcher;
use cronfleet::master::node::NodeService;
use cronfleet::master::notify::{LogNotifier, MemoryNotifyStore};
use cronfleet::master::{JobRecordService, JobService};
use cronfleet::storage::ArtifactStore;

type Repos = (Arc<dyn JobRepo>, Arc<dyn NodeRepo>, Arc<dyn JobRecordRepo>);

fn repos<S>(store: S) -> Repos
where
    S: JobRepo + NodeRepo + JobRecordRepo + 'static,
{
    let store = Arc::new(store);
    (store.clone(), store.clone(), store)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cronfleet::init_tracing("info");

    let matches = App::new("cronfleet-master")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Stores cron jobs and dispatches them to nodes")
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
    let master = config.master.clone().unwrap_or_default();

    let (jobs, nodes, records) = match &config.database {
        Some(database) => repos(MongoStore::connect(database).await?),
        None => {
            tracing::warn!("no [database] section, job definitions will not survive a restart");
            repos(MemoryStore::new())
        }
    };

    let artifacts = ArtifactStore::new(&master.upload_dir);
    artifacts
        .ensure_dir()
        .await
        .with_context(|| format!("creating upload directory {}", master.upload_dir.display()))?;

    let liveness = Arc::new(HeartbeatTable::new());
    let dispatch = Arc::new(HttpDispatcher::new(
        Duration::from_secs(master.dispatch_timeout_secs),
        artifacts.clone(),
        liveness.clone(),
    )?);
    let notify = MemoryNotifyStore::start(master.notify_workers, master.notify_queue, Arc::new(LogNotifier));

    let job_service = JobService::new(jobs.clone(), nodes.clone(), dispatch, notify.clone(), artifacts.clone());
    let state = MasterState {
        jobs: job_service.clone(),
        records: JobRecordService::new(records, notify),
        nodes: NodeService::new(nodes, jobs, liveness),
        artifacts,
    };

    if master.resync_on_start {
        tokio::spawn(async move {
            if let Err(e) = job_service.resync_all().await {
                tracing::error!(error = %e, "startup resync failed");
            }
        });
    }

    let listener = tokio::net::TcpListener::bind(&master.listen)
        .await
        .with_context(|| format!("binding {}", master.listen))?;
    api::serve(listener, state).await?;
    Ok(())
}
