//! Pool membership.
//!
//! An agent belongs to a pool if it was added explicitly, or if its
//! capabilities could ever satisfy the pool's requirements. The second test
//! runs against an empty lease list: membership describes what the machine
//! is, not how busy it is right now.

use tracing::debug;

use crate::admission::{AdmissionEngine, AdmissionResult, RejectReason};
use crate::types::{Agent, AgentLeaseDevice, AgentRequirements, AgentStatus, Pool};

pub struct PoolMembership;

impl PoolMembership {
    pub fn in_pool(agent: &Agent, pool: &Pool) -> bool {
        if agent.pools.iter().any(|id| *id == pool.id) {
            return true;
        }

        match &pool.requirements {
            Some(requirements) => {
                AdmissionEngine::check(&agent.capabilities, Some(requirements), &[]).is_admitted()
            }
            None => false,
        }
    }

    /// All pools the agent belongs to, in the order given.
    pub fn get_pools<'a>(agent: &Agent, pools: &'a [Pool]) -> Vec<&'a Pool> {
        pools
            .iter()
            .filter(|pool| Self::in_pool(agent, pool))
            .collect()
    }

    /// Agent-level admission: the agent must be schedulable and in the pool,
    /// and the requirements must fit alongside its current leases.
    pub fn try_create_lease(
        agent: &Agent,
        pool: &Pool,
        requirements: Option<&AgentRequirements>,
    ) -> Option<Vec<AgentLeaseDevice>> {
        Self::check_lease(agent, pool, requirements).ok()
    }

    /// [`try_create_lease`](Self::try_create_lease) with the reason for a
    /// rejection.
    pub fn check_lease(
        agent: &Agent,
        pool: &Pool,
        requirements: Option<&AgentRequirements>,
    ) -> Result<Vec<AgentLeaseDevice>, RejectReason> {
        if !agent.enabled {
            return Err(RejectReason::AgentDisabled);
        }
        if agent.status != AgentStatus::Ok {
            return Err(RejectReason::AgentNotReady(agent.status));
        }
        if !Self::in_pool(agent, pool) {
            debug!(agent_id = %agent.id, pool_id = %pool.id, "agent not in pool");
            return Err(RejectReason::NotInPool(pool.id.clone()));
        }

        match AdmissionEngine::check(&agent.capabilities, requirements, &agent.active_leases()) {
            AdmissionResult::Admitted { devices } => Ok(devices),
            AdmissionResult::Rejected { reason } => Err(reason),
        }
    }
}
