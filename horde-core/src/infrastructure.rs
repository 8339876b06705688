use crate::error::StoreError;
use crate::types::Agent;

/// Defines the contract for agent document storage.
///
/// There are no locks around scheduling decisions. Every write presents the
/// `update_index` it read, and the store refuses the write if the document
/// has moved on since. Callers then re-read and recompute.
pub trait AgentStore: Send + Sync {
    /// Insert a new agent document
    fn add_agent(&self, agent: Agent) -> Result<(), StoreError>;

    /// Fetch the current document for an agent
    fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>, StoreError>;

    /// All agent documents
    fn list_agents(&self) -> Result<Vec<Agent>, StoreError>;

    /// Replace the document if its counter still equals
    /// `expected_update_index`.
    ///
    /// Returns the stored document (counter incremented) on success and
    /// `None` if another writer got there first or the agent is gone.
    fn try_update_agent(
        &self,
        expected_update_index: u32,
        agent: Agent,
    ) -> Result<Option<Agent>, StoreError>;
}
