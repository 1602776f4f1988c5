use std::net::SocketAddr;
use std::sync::Arc;

use serde::Deserialize;

use crate::db::{JobFilter, JobRepo, NodeRepo};
use crate::error::{Error, Result};
use crate::heartbeat::NodeLiveness;
use crate::job::NodeDescriptor;

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterNode {
    pub name: String,
    pub address: String,
}

#[derive(Clone)]
pub struct NodeService {
    nodes: Arc<dyn NodeRepo>,
    jobs: Arc<dyn JobRepo>,
    liveness: Arc<dyn NodeLiveness>,
}

impl NodeService {
    pub fn new(nodes: Arc<dyn NodeRepo>, jobs: Arc<dyn JobRepo>, liveness: Arc<dyn NodeLiveness>) -> Self {
        Self { nodes, jobs, liveness }
    }

    pub async fn register(&self, req: RegisterNode) -> Result<NodeDescriptor> {
        if req.name.trim().is_empty() {
            return Err(Error::Params("node name is required".into()));
        }
        validate_address(&req.address)?;
        let node = self
            .nodes
            .insert_node(NodeDescriptor {
                id: 0,
                name: req.name,
                address: req.address,
                online: false,
                last_check: None,
            })
            .await?;
        tracing::info!(node_id = node.id, address = %node.address, "node registered");
        Ok(node)
    }

    /// Nodes with their last observed liveness.
    pub async fn list(&self) -> Result<Vec<NodeDescriptor>> {
        let mut nodes = self.nodes.list_nodes().await?;
        for node in nodes.iter_mut() {
            if let Some(beat) = self.liveness.get(node.id) {
                node.online = beat.online;
                node.last_check = Some(beat.last_check);
            }
        }
        Ok(nodes)
    }

    /// Refused while any job still points at the node.
    pub async fn delete(&self, id: i64) -> Result<()> {
        if self.nodes.get_node(id).await?.is_none() {
            return Err(Error::NodeNotExists(id));
        }
        let filter = JobFilter {
            node_id: Some(id),
            ..Default::default()
        };
        if !self.jobs.list_jobs(&filter).await?.is_empty() {
            return Err(Error::JobUseCurrentNode(id));
        }
        self.nodes.delete_node(id).await?;
        tracing::info!(node_id = id, "node removed");
        Ok(())
    }
}

/// Accepts `host:port` where host is an IP literal or a hostname.
fn validate_address(address: &str) -> Result<()> {
    if address.parse::<SocketAddr>().is_ok() {
        return Ok(());
    }
    let invalid = || Error::InvalidAddress(address.to_string());
    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    let host_ok = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    match port.parse::<u16>() {
        Ok(p) if p > 0 && host_ok => Ok(()),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::heartbeat::HeartbeatTable;
    use crate::job::{Active, ExecType, JobDefinition, NotifyConfig};
    use chrono::Utc;

    fn service() -> (Arc<MemoryStore>, Arc<HeartbeatTable>, NodeService) {
        let store = Arc::new(MemoryStore::new());
        let liveness = Arc::new(HeartbeatTable::new());
        let service = NodeService::new(store.clone(), store.clone(), liveness.clone());
        (store, liveness, service)
    }

    fn register(address: &str) -> RegisterNode {
        RegisterNode {
            name: "n".into(),
            address: address.into(),
        }
    }

    #[test]
    fn address_validation() {
        for ok in ["127.0.0.1:9090", "[::1]:80", "node-1.internal:8080", "localhost:1"] {
            assert!(validate_address(ok).is_ok(), "{ok}");
        }
        for bad in ["", "localhost", ":80", "host:0", "host:99999", "ho st:80", "http://h:80"] {
            assert!(validate_address(bad).is_err(), "{bad}");
        }
    }

    #[tokio::test]
    async fn list_overlays_liveness() {
        let (_store, liveness, service) = service();
        let a = service.register(register("10.0.0.1:9090")).await.unwrap();
        let b = service.register(register("10.0.0.2:9090")).await.unwrap();
        liveness.record(a.id, true);

        let nodes = service.list().await.unwrap();
        let a_view = nodes.iter().find(|n| n.id == a.id).unwrap();
        let b_view = nodes.iter().find(|n| n.id == b.id).unwrap();
        assert!(a_view.online);
        assert!(a_view.last_check.is_some());
        assert!(!b_view.online);
        assert!(b_view.last_check.is_none());
    }

    #[tokio::test]
    async fn delete_refused_while_referenced() {
        let (store, _liveness, service) = service();
        let node = service.register(register("10.0.0.1:9090")).await.unwrap();
        let now = Utc::now();
        let job = store
            .insert_job(JobDefinition {
                id: 0,
                name: "j".into(),
                exec_type: ExecType::File,
                cron_expr: "* * * * * *".into(),
                active: Active::Start,
                node_id: node.id,
                user_id: 1,
                notify: NotifyConfig::default(),
                file: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        assert!(matches!(
            service.delete(node.id).await,
            Err(Error::JobUseCurrentNode(_))
        ));
        store.delete_job(job.id).await.unwrap();
        service.delete(node.id).await.unwrap();
        assert!(matches!(service.delete(node.id).await, Err(Error::NodeNotExists(_))));
    }
}
