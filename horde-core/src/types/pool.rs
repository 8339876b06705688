use serde::{Deserialize, Serialize};

use super::{AgentRequirements, AgentWorkspace};

/// A named group of agents eligible for a class of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool {
    pub id: String,
    pub name: String,
    /// Automatic membership expression. Evaluated elsewhere, never here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Capability shape an agent must have to join implicitly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<AgentRequirements>,
    #[serde(default)]
    pub workspaces: Vec<AgentWorkspace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_agents: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_reserve_agents: Option<u32>,
}

impl Pool {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            condition: None,
            requirements: None,
            workspaces: Vec::new(),
            min_agents: None,
            num_reserve_agents: None,
        }
    }

    pub fn with_requirements(mut self, requirements: AgentRequirements) -> Self {
        self.requirements = Some(requirements);
        self
    }

    pub fn with_workspace(mut self, workspace: AgentWorkspace) -> Self {
        self.workspaces.push(workspace);
        self
    }
}
