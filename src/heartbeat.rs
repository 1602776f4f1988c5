use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    pub node_id: i64,
    pub online: bool,
    pub last_check: DateTime<Utc>,
}

/// Read side of node liveness. A dedicated health monitor may implement
/// this; the master ships [`HeartbeatTable`], fed by dispatch outcomes.
pub trait NodeLiveness: Send + Sync {
    fn get(&self, node_id: i64) -> Option<Heartbeat>;
    fn record(&self, node_id: i64, online: bool);
}

#[derive(Debug, Default)]
pub struct HeartbeatTable {
    beats: RwLock<HashMap<i64, Heartbeat>>,
}

impl HeartbeatTable {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeLiveness for HeartbeatTable {
    fn get(&self, node_id: i64) -> Option<Heartbeat> {
        let beats = self.beats.read().unwrap_or_else(|e| e.into_inner());
        beats.get(&node_id).cloned()
    }

    fn record(&self, node_id: i64, online: bool) {
        let mut beats = self.beats.write().unwrap_or_else(|e| e.into_inner());
        beats.insert(
            node_id,
            Heartbeat {
                node_id,
                online,
                last_check: Utc::now(),
            },
        );
    }
}
