//! High-level client that wraps the pure kernel + pluggable storage.
//!
//! Every write follows the same shape: read the agent, decide, write back
//! with the update counter that was read, and start over from a fresh read
//! if someone else wrote first. Nothing is locked while deciding.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use nanoid::nanoid;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, GlobalConfig};
use crate::error::{HordeError, HordeResult};
use crate::infrastructure::AgentStore;
use crate::infrastructure_in_memory::InMemoryAgentStore;
use crate::state::{AdmissionKernel, KernelVerdict, LeaseRequest};
use crate::types::{Agent, AgentCapabilities, AgentLease, AgentWorkspace, LeaseState, Pool};
use crate::workspace::{AgentWorkspaceMessage, ServerSelector, try_resolve_workspaces};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A lease that was admitted and persisted, with the workspaces the agent
/// has to prepare for it.
#[derive(Debug, Clone)]
pub struct LeaseGrant {
    pub lease: AgentLease,
    pub workspaces: Vec<AgentWorkspaceMessage>,
}

/// The main entry point for scheduling work onto agents.
///
/// Cheap to clone; clones share the same store, so several scheduler tasks
/// can race on one agent and the store's counter sorts them out.
#[derive(Clone)]
pub struct HordeClient {
    store: Arc<dyn AgentStore>,
    config: ClientConfig,
}

impl HordeClient {
    /// Create a new client with an empty in-memory store.
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemoryAgentStore::new()), ClientConfig::default())
    }

    pub fn with_store(store: Arc<dyn AgentStore>, config: ClientConfig) -> Self {
        Self { store, config }
    }

    /// Create a new client backed by SQLite at the given path.
    #[cfg(feature = "sqlite")]
    pub fn with_sqlite(path: &str, config: ClientConfig) -> HordeResult<Self> {
        let store = crate::infrastructure_sqlite::SqliteAgentStore::open(path)?;
        Ok(Self::with_store(Arc::new(store), config))
    }

    pub fn register_agent(&self, agent: Agent) -> HordeResult<()> {
        agent.capabilities.validate()?;
        info!(agent_id = %agent.id, devices = agent.capabilities.devices.len(), "registering agent");
        Ok(self.store.add_agent(agent)?)
    }

    pub fn get_agent(&self, agent_id: &str) -> HordeResult<Agent> {
        self.store
            .get_agent(agent_id)?
            .ok_or_else(|| HordeError::AgentNotFound(agent_id.to_string()))
    }

    pub fn list_agents(&self) -> HordeResult<Vec<Agent>> {
        Ok(self.store.list_agents()?)
    }

    /// Evaluate a request against the current agent document without
    /// writing anything.
    pub fn check(
        &self,
        agent_id: &str,
        pool: &Pool,
        request: &LeaseRequest,
    ) -> HordeResult<KernelVerdict> {
        let agent = self.get_agent(agent_id)?;
        Ok(AdmissionKernel::execute(&agent, pool, request))
    }

    /// Try to grant `request` on the agent.
    ///
    /// Returns `Ok(None)` when the work does not fit or one of its
    /// workspaces cannot be resolved. A lost optimistic write reruns the
    /// whole decision from a fresh read; after `max_update_attempts` losses
    /// the call fails with [`HordeError::UpdateContention`].
    pub async fn try_assign_lease<S>(
        &self,
        agent_id: &str,
        pool: &Pool,
        request: &LeaseRequest,
        globals: &GlobalConfig,
        selector: &S,
    ) -> HordeResult<Option<LeaseGrant>>
    where
        S: ServerSelector,
    {
        let attempts = self.config.max_update_attempts;
        for attempt in 1..=attempts {
            let agent = self.get_agent(agent_id)?;

            let verdict = AdmissionKernel::execute(&agent, pool, request);
            if !verdict.is_granted() {
                return Ok(None);
            }

            let workspaces: Vec<AgentWorkspace> = pool
                .workspaces
                .iter()
                .chain(&request.workspaces)
                .cloned()
                .collect();
            let Some(messages) = try_resolve_workspaces(&agent, &workspaces, globals, selector).await
            else {
                warn!(%agent_id, lease = %request.name, "workspace resolution failed");
                return Ok(None);
            };

            let now = now_ms();
            let mut lease = AgentLease::new(
                format!("lease_{}", nanoid!()),
                request.name.clone(),
                request.payload.clone(),
                verdict.devices,
                now,
            );
            lease.pool_id = Some(pool.id.clone());
            lease.stream_id = request.stream_id.clone();
            lease.expiry_time = request
                .ttl_ms
                .or(self.config.default_lease_ttl_ms)
                .map(|ttl| now + ttl);

            let expected = agent.update_index;
            let mut updated = agent;
            updated.leases.push(lease.clone());

            if self.store.try_update_agent(expected, updated)?.is_some() {
                info!(
                    %agent_id,
                    lease_id = %lease.id,
                    payload = %lease.payload.type_name(),
                    attempt,
                    "lease granted"
                );
                return Ok(Some(LeaseGrant {
                    lease,
                    workspaces: messages,
                }));
            }
            debug!(%agent_id, attempt, "agent changed during admission, recomputing");
        }

        Err(HordeError::UpdateContention {
            agent_id: agent_id.to_string(),
            attempts,
        })
    }

    /// Move a lease along its lifecycle. Terminal leases are dropped from
    /// the agent's active list.
    pub fn transition_lease(
        &self,
        agent_id: &str,
        lease_id: &str,
        state: LeaseState,
    ) -> HordeResult<AgentLease> {
        let lease = self.update_agent(agent_id, |agent| {
            let lease = agent
                .find_lease_mut(lease_id)
                .ok_or_else(|| HordeError::LeaseNotFound {
                    agent_id: agent_id.to_string(),
                    lease_id: lease_id.to_string(),
                })?;
            lease.transition(state)?;
            let lease = lease.clone();
            if state.is_terminal() {
                agent.leases.retain(|held| held.id != lease_id);
            }
            Ok(Some(lease))
        })?;

        // The closure always asks for a write, so a successful update
        // carries the lease.
        lease.ok_or_else(|| HordeError::LeaseNotFound {
            agent_id: agent_id.to_string(),
            lease_id: lease_id.to_string(),
        })
    }

    /// Replace an agent's capability snapshot, e.g. after it reconnects.
    pub fn update_capabilities(
        &self,
        agent_id: &str,
        capabilities: AgentCapabilities,
    ) -> HordeResult<()> {
        capabilities.validate()?;
        self.update_agent(agent_id, |agent| {
            agent.capabilities = capabilities.clone();
            Ok(Some(()))
        })?;
        Ok(())
    }

    /// Cancel leases whose expiry time has passed. Returns the number of
    /// leases cancelled.
    pub fn evict_expired(&self, now: u64) -> HordeResult<usize> {
        let mut evicted = 0;
        for agent in self.store.list_agents()? {
            if !agent.leases.iter().any(|lease| lease.is_expired(now)) {
                continue;
            }
            let removed = self.update_agent(&agent.id, |agent| {
                let before = agent.leases.len();
                agent.leases.retain(|lease| !lease.is_expired(now));
                let removed = before - agent.leases.len();
                Ok((removed > 0).then_some(removed))
            })?;
            if let Some(removed) = removed {
                info!(agent_id = %agent.id, removed, "cancelled expired leases");
                evicted += removed;
            }
        }
        Ok(evicted)
    }

    /// Read-modify-write loop for synchronous updates. `mutate` returns
    /// `Ok(None)` when there is nothing to write.
    fn update_agent<T>(
        &self,
        agent_id: &str,
        mut mutate: impl FnMut(&mut Agent) -> HordeResult<Option<T>>,
    ) -> HordeResult<Option<T>> {
        let attempts = self.config.max_update_attempts;
        for attempt in 1..=attempts {
            let mut agent = self.get_agent(agent_id)?;
            let expected = agent.update_index;
            let Some(value) = mutate(&mut agent)? else {
                return Ok(None);
            };
            if self.store.try_update_agent(expected, agent)?.is_some() {
                return Ok(Some(value));
            }
            debug!(%agent_id, attempt, "agent changed during update, retrying");
        }

        Err(HordeError::UpdateContention {
            agent_id: agent_id.to_string(),
            attempts,
        })
    }
}

impl Default for HordeClient {
    fn default() -> Self {
        Self::new()
    }
}
