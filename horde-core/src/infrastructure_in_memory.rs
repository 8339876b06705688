use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::StoreError;
use crate::infrastructure::AgentStore;
use crate::types::Agent;

pub struct InMemoryAgentStore {
    // Map of Agent ID -> Agent
    agents: RwLock<HashMap<String, Agent>>,
}

impl InMemoryAgentStore {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryAgentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentStore for InMemoryAgentStore {
    fn add_agent(&self, agent: Agent) -> Result<(), StoreError> {
        let mut agents = self.agents.write().map_err(|_| StoreError::Poisoned)?;
        if agents.contains_key(&agent.id) {
            return Err(StoreError::AgentExists(agent.id));
        }
        agents.insert(agent.id.clone(), agent);
        Ok(())
    }

    fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>, StoreError> {
        let agents = self.agents.read().map_err(|_| StoreError::Poisoned)?;
        Ok(agents.get(agent_id).cloned())
    }

    fn list_agents(&self) -> Result<Vec<Agent>, StoreError> {
        let agents = self.agents.read().map_err(|_| StoreError::Poisoned)?;
        let mut list: Vec<Agent> = agents.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(list)
    }

    fn try_update_agent(
        &self,
        expected_update_index: u32,
        mut agent: Agent,
    ) -> Result<Option<Agent>, StoreError> {
        let mut agents = self.agents.write().map_err(|_| StoreError::Poisoned)?;
        let Some(current) = agents.get_mut(&agent.id) else {
            return Ok(None);
        };
        if current.update_index != expected_update_index {
            return Ok(None);
        }
        agent.update_index = expected_update_index.wrapping_add(1);
        *current = agent.clone();
        Ok(Some(agent))
    }
}
