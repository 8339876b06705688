//! SQLite-backed AgentStore implementation.
//! Agent documents survive server restarts and several scheduler
//! processes can share one database file.
//!
//! Enable with the `sqlite` feature flag:
//! ```toml
//! horde-core = { path = "../horde-core", features = ["sqlite"] }
//! ```

use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;
use crate::infrastructure::AgentStore;
use crate::types::Agent;

/// A persistent agent store backed by SQLite.
///
/// Each row holds the JSON document alongside its update counter; the
/// compare-and-swap is a single conditional `UPDATE`.
pub struct SqliteAgentStore {
    conn: Mutex<Connection>,
}

impl SqliteAgentStore {
    /// Open (or create) a SQLite database at the given path.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        // WAL lets readers proceed while a scheduler writes
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Self::init(conn)
    }

    /// A private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS agents (
                id           TEXT PRIMARY KEY,
                update_index INTEGER NOT NULL,
                document     TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn decode(document: &str, update_index: u32) -> Result<Agent, StoreError> {
        let mut agent: Agent = serde_json::from_str(document)?;
        agent.update_index = update_index;
        Ok(agent)
    }
}

impl AgentStore for SqliteAgentStore {
    fn add_agent(&self, agent: Agent) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let document = serde_json::to_string(&agent)?;
        let rows = conn.execute(
            "INSERT OR IGNORE INTO agents (id, update_index, document) VALUES (?1, ?2, ?3)",
            params![agent.id, agent.update_index, document],
        )?;
        if rows == 0 {
            return Err(StoreError::AgentExists(agent.id));
        }
        Ok(())
    }

    fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let row = conn
            .query_row(
                "SELECT document, update_index FROM agents WHERE id = ?1",
                params![agent_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)),
            )
            .optional()?;
        row.map(|(document, update_index)| Self::decode(&document, update_index))
            .transpose()
    }

    fn list_agents(&self) -> Result<Vec<Agent>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare("SELECT document, update_index FROM agents ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
        })?;

        let mut agents = Vec::new();
        for row in rows {
            let (document, update_index) = row?;
            agents.push(Self::decode(&document, update_index)?);
        }
        Ok(agents)
    }

    fn try_update_agent(
        &self,
        expected_update_index: u32,
        mut agent: Agent,
    ) -> Result<Option<Agent>, StoreError> {
        agent.update_index = expected_update_index.wrapping_add(1);
        let document = serde_json::to_string(&agent)?;

        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let rows = conn.execute(
            "UPDATE agents SET document = ?1, update_index = ?2 WHERE id = ?3 AND update_index = ?4",
            params![document, agent.update_index, agent.id, expected_update_index],
        )?;
        Ok((rows == 1).then_some(agent))
    }
}
