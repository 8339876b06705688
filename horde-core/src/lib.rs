//! # horde-core
//!
//! Admission control for the Horde build farm. Decides whether a lease fits
//! an agent's free devices, which pools an agent belongs to, which Perforce
//! server and credentials each workspace should use, and whether a
//! principal may act on a scope at all.

pub mod acl;
pub mod admission;
pub mod client;
pub mod config;
pub mod error;
pub mod infrastructure;
#[path = "infrastructure_in_memory.rs"]
pub mod infrastructure_in_memory;
#[cfg(feature = "sqlite")]
#[path = "infrastructure_sqlite.rs"]
pub mod infrastructure_sqlite;
pub mod pool;
pub mod state;
pub mod types;
pub mod workspace;

pub use error::{HordeError, HordeResult, StoreError};

#[cfg(test)]
mod admission_test;
