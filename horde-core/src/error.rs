//! Error types for the admission core.
//!
//! "The lease does not fit" is never an error: the engine answers with
//! `Option`/enum results. Errors are reserved for malformed input, storage
//! failures and exhausted optimistic-write retries.

use thiserror::Error;

use crate::types::LeaseState;

/// Errors raised by an [`AgentStore`](crate::infrastructure::AgentStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("agent already exists: {0}")]
    AgentExists(String),

    #[error("failed to encode agent document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,

    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Crate-level error type.
#[derive(Debug, Error)]
pub enum HordeError {
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("lease {lease_id} not found on agent {agent_id}")]
    LeaseNotFound { agent_id: String, lease_id: String },

    #[error("invalid lease transition: {from:?} -> {to:?}")]
    InvalidLeaseTransition { from: LeaseState, to: LeaseState },

    #[error("misconfiguration: {0}")]
    Misconfiguration(String),

    #[error("agent {agent_id} changed under {attempts} consecutive update attempts")]
    UpdateContention { agent_id: String, attempts: u32 },

    #[error("invalid config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl HordeError {
    /// Returns true if retrying against fresh state could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HordeError::UpdateContention { .. })
    }
}

pub type HordeResult<T> = Result<T, HordeError>;
