use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::pool::PoolMembership;
use crate::types::{
    Agent, AgentLeaseDevice, AgentRequirements, AgentWorkspace, LeasePayload, Pool,
};

/// A candidate unit of work waiting for an agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseRequest {
    pub name: String,
    #[serde(default)]
    pub requirements: Option<AgentRequirements>,
    #[serde(default)]
    pub payload: LeasePayload,
    #[serde(default)]
    pub stream_id: Option<String>,
    /// Workspaces the work needs in addition to the pool's own
    #[serde(default)]
    pub workspaces: Vec<AgentWorkspace>,
    #[serde(default)]
    pub ttl_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelVerdictStatus {
    Granted,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelVerdict {
    pub agent_id: String,
    pub pool_id: String,
    pub status: KernelVerdictStatus,
    pub reason: Option<String>,
    pub devices: Vec<AgentLeaseDevice>,
}

impl KernelVerdict {
    pub fn is_granted(&self) -> bool {
        self.status == KernelVerdictStatus::Granted
    }
}

/// The pure half of a scheduling decision: pool membership, agent state
/// and device admission, evaluated against one agent snapshot.
pub struct AdmissionKernel;

impl AdmissionKernel {
    pub fn execute(agent: &Agent, pool: &Pool, request: &LeaseRequest) -> KernelVerdict {
        let outcome = PoolMembership::check_lease(agent, pool, request.requirements.as_ref());

        let (status, reason, devices) = match outcome {
            Ok(devices) => (KernelVerdictStatus::Granted, None, devices),
            Err(reason) => {
                debug!(
                    agent_id = %agent.id,
                    pool_id = %pool.id,
                    lease = %request.name,
                    %reason,
                    "lease rejected"
                );
                (KernelVerdictStatus::Rejected, Some(reason.to_string()), Vec::new())
            }
        };

        KernelVerdict {
            agent_id: agent.id.clone(),
            pool_id: pool.id.clone(),
            status,
            reason,
            devices,
        }
    }
}
