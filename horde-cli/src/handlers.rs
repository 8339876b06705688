use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use horde_core::acl::{authorize_chain, Acl, AclAction, AclClaim, Principal};
use horde_core::client::{HordeClient, LeaseGrant};
use horde_core::config::GlobalConfig;
use horde_core::HordeError;
use horde_core::pool::PoolMembership;
use horde_core::state::{AdmissionKernel, KernelVerdict, LeaseRequest};
use horde_core::types::{Agent, AgentLease, AgentWorkspace, Pool};
use horde_core::workspace::{try_resolve_workspaces, AgentWorkspaceMessage, ServerSelector};

// ─── Request Types ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRequest {
    pub agent: Agent,
    pub pool: Pool,
    pub request: LeaseRequest,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolsRequest {
    pub agent: Agent,
    pub pools: Vec<Pool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeRequest {
    /// Innermost scope first; `null` for scopes without an ACL
    pub scopes: Vec<Option<Acl>>,
    pub action: AclAction,
    #[serde(default)]
    pub claims: Vec<AclClaim>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    pub agent: Agent,
    pub workspaces: Vec<AgentWorkspace>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    /// Registered before scheduling if the store does not know it yet
    #[serde(default)]
    pub agent: Option<Agent>,
    #[serde(default)]
    pub agent_id: Option<String>,
    pub pool: Pool,
    pub request: LeaseRequest,
}

impl AssignRequest {
    pub fn validate(&self) -> Result<&str> {
        let id = match (&self.agent, &self.agent_id) {
            (Some(agent), Some(id)) if agent.id != *id => {
                bail!("agentId '{}' does not match agent.id '{}'", id, agent.id)
            }
            (Some(agent), _) => agent.id.as_str(),
            (None, Some(id)) => id.as_str(),
            (None, None) => bail!("either agent or agentId is required"),
        };
        if id.is_empty() {
            bail!("agent id must not be empty");
        }
        if self.request.name.is_empty() {
            bail!("request.name is required");
        }
        Ok(id)
    }
}

// ─── Response Types ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct CliResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> CliResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolsResponse {
    pub agent_id: String,
    pub pools: Vec<String>,
}

#[derive(Serialize)]
pub struct AuthorizeResponse {
    pub action: AclAction,
    pub allowed: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantResponse {
    pub lease: AgentLease,
    pub workspaces: Vec<AgentWorkspaceMessage>,
}

impl From<LeaseGrant> for GrantResponse {
    fn from(grant: LeaseGrant) -> Self {
        Self {
            lease: grant.lease,
            workspaces: grant.workspaces,
        }
    }
}

#[derive(Serialize)]
pub struct EvictResponse {
    pub evicted: usize,
}

// ─── Handlers ───────────────────────────────────────────────────────────────

pub fn check(req: CheckRequest) -> KernelVerdict {
    AdmissionKernel::execute(&req.agent, &req.pool, &req.request)
}

pub fn pools(req: PoolsRequest) -> PoolsResponse {
    let pools = PoolMembership::get_pools(&req.agent, &req.pools)
        .into_iter()
        .map(|pool| pool.id.clone())
        .collect();
    PoolsResponse {
        agent_id: req.agent.id,
        pools,
    }
}

pub fn authorize(req: AuthorizeRequest) -> AuthorizeResponse {
    let principal = Principal::new(req.claims);
    let allowed = authorize_chain(req.scopes.iter().map(Option::as_ref), req.action, &principal);
    AuthorizeResponse {
        action: req.action,
        allowed,
    }
}

pub async fn resolve<S: ServerSelector>(
    req: ResolveRequest,
    globals: &GlobalConfig,
    selector: &S,
) -> Result<Vec<AgentWorkspaceMessage>> {
    try_resolve_workspaces(&req.agent, &req.workspaces, globals, selector)
        .await
        .context("one or more workspaces could not be resolved")
}

pub async fn assign<S: ServerSelector>(
    client: &HordeClient,
    req: AssignRequest,
    globals: &GlobalConfig,
    selector: &S,
) -> Result<Option<GrantResponse>> {
    let agent_id = req.validate()?.to_string();

    if let Some(agent) = req.agent {
        match client.get_agent(&agent.id) {
            Ok(stored) if stored.capabilities != agent.capabilities || stored.pools != agent.pools => {
                debug!(agent_id = %agent.id, "agent already stored; ignoring the request snapshot");
            }
            Ok(_) => {}
            Err(HordeError::AgentNotFound(_)) => client.register_agent(agent)?,
            Err(e) => return Err(e.into()),
        }
    }

    let grant = client
        .try_assign_lease(&agent_id, &req.pool, &req.request, globals, selector)
        .await?;
    Ok(grant.map(GrantResponse::from))
}
