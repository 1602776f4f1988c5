//! Headline counts for a user's jobs and the fleet's nodes.

use serde::{Deserialize, Serialize};

use crate::job::{Active, JobDefinition, NodeDescriptor};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
}

/// Nodes never contacted since the master started count as offline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCounts {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub job: JobCounts,
    pub node: NodeCounts,
}

impl Summary {
    /// `nodes` should already carry the liveness overlay.
    pub fn collect(jobs: &[JobDefinition], nodes: &[NodeDescriptor]) -> Self {
        let active = jobs.iter().filter(|j| j.active == Active::Start).count();
        let online = nodes.iter().filter(|n| n.online).count();
        Self {
            job: JobCounts {
                total: jobs.len(),
                active,
                inactive: jobs.len() - active,
            },
            node: NodeCounts {
                total: nodes.len(),
                online,
                offline: nodes.len() - online,
            },
        }
    }
}
