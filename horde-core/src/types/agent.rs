use serde::{Deserialize, Serialize};

use crate::acl::Acl;

use super::{AgentCapabilities, AgentLease};

/// Health reported by an agent's session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AgentStatus {
    #[default]
    Unspecified,
    Ok,
    Stopping,
    Unhealthy,
}

/// A worker machine as held by the agent store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub enabled: bool,
    #[serde(default)]
    pub status: AgentStatus,
    /// Pools the agent was explicitly added to
    #[serde(default)]
    pub pools: Vec<String>,
    pub capabilities: AgentCapabilities,
    #[serde(default)]
    pub leases: Vec<AgentLease>,
    /// Optimistic concurrency counter. Writes must present the value they read.
    #[serde(default)]
    pub update_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acl: Option<Acl>,
}

impl Agent {
    pub fn new(id: impl Into<String>, capabilities: AgentCapabilities) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            status: AgentStatus::Ok,
            pools: Vec::new(),
            capabilities,
            leases: Vec::new(),
            update_index: 0,
            acl: None,
        }
    }

    pub fn with_pool(mut self, pool_id: impl Into<String>) -> Self {
        self.pools.push(pool_id.into());
        self
    }

    /// Leases still holding capacity on the agent.
    pub fn active_leases(&self) -> Vec<AgentLease> {
        self.leases
            .iter()
            .filter(|lease| !lease.state.is_terminal())
            .cloned()
            .collect()
    }

    pub fn find_lease_mut(&mut self, lease_id: &str) -> Option<&mut AgentLease> {
        self.leases.iter_mut().find(|lease| lease.id == lease_id)
    }
}
