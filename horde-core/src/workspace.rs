//! Resolves the Perforce server and credentials for each workspace a lease
//! needs.
//!
//! Within one resolution pass every workspace on the same cluster is pointed
//! at the same server: once a server has been chosen for a cluster, later
//! workspaces reuse it instead of asking the selector again.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{GlobalConfig, PerforceCluster, PerforceServer, ServerHealth};
use crate::types::{Agent, AgentWorkspace};

/// Connection details sent to the agent for one workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentWorkspaceMessage {
    pub cluster: String,
    pub server_and_port: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_server_and_port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub identifier: String,
    pub stream: String,
    #[serde(default)]
    pub view: Vec<String>,
    pub incremental: bool,
}

/// Picks a server within a cluster for a given agent.
///
/// Implementations may call out to health checks or other services, so the
/// selection is asynchronous.
pub trait ServerSelector: Send + Sync {
    fn select_server(
        &self,
        cluster: &PerforceCluster,
        agent: &Agent,
    ) -> impl Future<Output = Option<PerforceServer>> + Send;
}

/// Round-robin over the servers an agent is allowed to use.
///
/// A server is eligible when the agent has every property the server
/// lists and the server is not known to be unhealthy.
#[derive(Debug, Default)]
pub struct LoadBalancer {
    counter: AtomicUsize,
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_eligible(server: &PerforceServer, agent: &Agent) -> bool {
        server.health != ServerHealth::Unhealthy
            && server
                .properties
                .iter()
                .flatten()
                .all(|property| agent.capabilities.has_property(property))
    }

    pub fn pick(&self, cluster: &PerforceCluster, agent: &Agent) -> Option<PerforceServer> {
        let eligible: Vec<&PerforceServer> = cluster
            .servers
            .iter()
            .filter(|server| Self::is_eligible(server, agent))
            .collect();
        if eligible.is_empty() {
            return None;
        }
        let idx = self.counter.fetch_add(1, Ordering::Relaxed) % eligible.len();
        Some(eligible[idx].clone())
    }
}

impl ServerSelector for LoadBalancer {
    async fn select_server(
        &self,
        cluster: &PerforceCluster,
        agent: &Agent,
    ) -> Option<PerforceServer> {
        self.pick(cluster, agent)
    }
}

/// Resolves one workspace and appends its message to `messages`.
///
/// Returns `false`, leaving `messages` untouched, when the cluster is not
/// configured or no server can be chosen. Callers decide whether that
/// skips the workspace or fails the lease.
pub async fn try_add_workspace_message<S>(
    agent: &Agent,
    workspace: &AgentWorkspace,
    globals: &GlobalConfig,
    selector: &S,
    messages: &mut Vec<AgentWorkspaceMessage>,
) -> bool
where
    S: ServerSelector,
{
    let Some(cluster) = globals.find_perforce_cluster(workspace.cluster.as_deref()) else {
        warn!(
            agent_id = %agent.id,
            cluster = ?workspace.cluster,
            identifier = %workspace.identifier,
            "workspace references unknown perforce cluster"
        );
        return false;
    };

    let sticky = messages
        .iter()
        .find(|message| message.cluster.eq_ignore_ascii_case(&cluster.name))
        .map(|message| {
            (
                message.server_and_port.clone(),
                message.base_server_and_port.clone(),
            )
        });

    let (server_and_port, base_server_and_port) = match sticky {
        Some(server) => server,
        None => match selector.select_server(cluster, agent).await {
            Some(server) => {
                debug!(
                    agent_id = %agent.id,
                    cluster = %cluster.name,
                    server = %server.server_and_port,
                    "selected perforce server"
                );
                (server.server_and_port, server.base_server_and_port)
            }
            None => {
                warn!(
                    agent_id = %agent.id,
                    cluster = %cluster.name,
                    "no perforce server available"
                );
                return false;
            }
        },
    };

    let credentials = cluster.find_credentials(workspace.user_name.as_deref());

    messages.push(AgentWorkspaceMessage {
        cluster: cluster.name.clone(),
        server_and_port,
        base_server_and_port,
        user_name: credentials
            .map(|creds| creds.user_name.clone())
            .or_else(|| workspace.user_name.clone()),
        password: credentials.map(|creds| creds.password.clone()),
        identifier: workspace.identifier.clone(),
        stream: workspace.stream.clone(),
        view: workspace.view.clone().unwrap_or_default(),
        incremental: workspace.incremental,
    });
    true
}

/// Resolves a batch of workspaces in a single pass.
///
/// Duplicates are dropped (first occurrence kept). Returns `None` if any
/// workspace fails to resolve.
pub async fn try_resolve_workspaces<S>(
    agent: &Agent,
    workspaces: &[AgentWorkspace],
    globals: &GlobalConfig,
    selector: &S,
) -> Option<Vec<AgentWorkspaceMessage>>
where
    S: ServerSelector,
{
    let mut seen = HashSet::new();
    let mut messages = Vec::with_capacity(workspaces.len());
    for workspace in workspaces {
        if !seen.insert(workspace) {
            continue;
        }
        if !try_add_workspace_message(agent, workspace, globals, selector, &mut messages).await {
            return None;
        }
    }
    Some(messages)
}
