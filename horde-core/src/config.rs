//! Static configuration: Perforce clusters and client tuning.
//!
//! Both are plain serde documents. The server loads `GlobalConfig` from
//! JSON at startup and hands it to every resolution pass by reference.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::HordeResult;

/// Health of a Perforce server as last observed by the load balancer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServerHealth {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerforceServer {
    pub server_and_port: String,
    /// Address agents should record in their workspace, if it differs
    /// from the edge server they connect through
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_server_and_port: Option<String>,
    /// Agent properties required to use this server, e.g. `Site=NYC`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Vec<String>>,
    #[serde(default)]
    pub health: ServerHealth,
}

impl PerforceServer {
    pub fn new(server_and_port: impl Into<String>) -> Self {
        Self {
            server_and_port: server_and_port.into(),
            base_server_and_port: None,
            properties: None,
            health: ServerHealth::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerforceCredentials {
    pub user_name: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerforceCluster {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
    #[serde(default)]
    pub servers: Vec<PerforceServer>,
    #[serde(default)]
    pub credentials: Vec<PerforceCredentials>,
}

impl PerforceCluster {
    /// Credentials for `user_name`, or the first configured entry when no
    /// user is given. User names compare case-insensitively.
    pub fn find_credentials(&self, user_name: Option<&str>) -> Option<&PerforceCredentials> {
        match user_name {
            None => self.credentials.first(),
            Some(user_name) => self
                .credentials
                .iter()
                .find(|creds| creds.user_name.eq_ignore_ascii_case(user_name)),
        }
    }
}

/// Server-wide settings consumed by workspace resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    #[serde(default)]
    pub perforce_clusters: Vec<PerforceCluster>,
}

impl GlobalConfig {
    pub fn from_json_str(json: &str) -> HordeResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> HordeResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Looks a cluster up by name (case-insensitive). With no name, the
    /// first configured cluster is the default.
    pub fn find_perforce_cluster(&self, name: Option<&str>) -> Option<&PerforceCluster> {
        match name {
            None => self.perforce_clusters.first(),
            Some(name) => self
                .perforce_clusters
                .iter()
                .find(|cluster| cluster.name.eq_ignore_ascii_case(name)),
        }
    }
}

/// Tuning for [`HordeClient`](crate::client::HordeClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// How many times a lease grant is recomputed after losing an
    /// optimistic write before giving up
    pub max_update_attempts: u32,
    /// Expiry applied to leases whose request carries no TTL
    pub default_lease_ttl_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_update_attempts: 10,
            default_lease_ttl_ms: None,
        }
    }
}
