use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A source-control workspace a lease needs on the agent.
///
/// Equality and hashing cover every field, so two lists of workspaces can be
/// compared as sets regardless of order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentWorkspace {
    /// Perforce cluster name; the first configured cluster when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    /// Distinguishes sibling workspaces on the same agent
    pub identifier: String,
    pub stream: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<Vec<String>>,
    #[serde(default)]
    pub incremental: bool,
}

impl AgentWorkspace {
    pub fn new(identifier: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            cluster: None,
            user_name: None,
            identifier: identifier.into(),
            stream: stream.into(),
            view: None,
            incremental: false,
        }
    }

    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    pub fn with_user_name(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = Some(user_name.into());
        self
    }
}

/// Order-insensitive comparison of two workspace lists.
pub fn workspace_sets_equal(a: &[AgentWorkspace], b: &[AgentWorkspace]) -> bool {
    let a: HashSet<&AgentWorkspace> = a.iter().collect();
    let b: HashSet<&AgentWorkspace> = b.iter().collect();
    a == b
}
