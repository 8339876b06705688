use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{HordeError, HordeResult};

/// Lease lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeaseState {
    /// Granted by the server, not yet picked up by the agent
    Pending,
    /// Executing on the agent
    Active,
    /// Finished normally
    Completed,
    /// Cancelled before or during execution
    Cancelled,
}

impl LeaseState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LeaseState::Completed | LeaseState::Cancelled)
    }

    pub fn can_transition_to(self, next: LeaseState) -> bool {
        matches!(
            (self, next),
            (LeaseState::Pending, LeaseState::Active)
                | (LeaseState::Pending, LeaseState::Cancelled)
                | (LeaseState::Active, LeaseState::Completed)
                | (LeaseState::Active, LeaseState::Cancelled)
        )
    }
}

/// Opaque work description produced by another subsystem.
///
/// Only the type URL is ever looked at, and only for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeasePayload {
    pub type_url: String,
    #[serde(default)]
    pub data: Vec<u8>,
}

impl LeasePayload {
    pub fn new(type_url: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            type_url: type_url.into(),
            data,
        }
    }

    /// Short message name, e.g. `ConformTask` for
    /// `type.googleapis.com/Horde.ConformTask`.
    pub fn type_name(&self) -> &str {
        self.type_url
            .rsplit(['/', '.'])
            .next()
            .unwrap_or(self.type_url.as_str())
    }
}

/// A device claimed by a lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentLeaseDevice {
    /// Index into the agent's device list, fixed at admission time
    pub index: usize,
    /// Logical handle the work refers to this device by
    pub handle: String,
    /// Claimed amounts. `None` claims the whole device exclusively.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<BTreeMap<String, i32>>,
}

impl AgentLeaseDevice {
    pub fn is_exclusive(&self) -> bool {
        self.resources.is_none()
    }

    pub fn claimed(&self, name: &str) -> i32 {
        self.resources
            .as_ref()
            .and_then(|res| res.get(name).copied())
            .unwrap_or(0)
    }
}

/// One unit of dispatched work running on an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentLease {
    pub id: String,
    pub name: String,
    pub state: LeaseState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_id: Option<String>,
    /// Milliseconds since the Unix epoch
    pub start_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_time: Option<u64>,
    #[serde(default)]
    pub payload: LeasePayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devices: Option<Vec<AgentLeaseDevice>>,
}

impl AgentLease {
    pub fn new(
        id: String,
        name: String,
        payload: LeasePayload,
        devices: Vec<AgentLeaseDevice>,
        now: u64,
    ) -> Self {
        Self {
            id,
            name,
            state: LeaseState::Pending,
            stream_id: None,
            pool_id: None,
            start_time: now,
            expiry_time: None,
            payload,
            devices: (!devices.is_empty()).then_some(devices),
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expiry_time.is_some_and(|expiry| expiry < now)
    }

    /// Moves the lease to `next`, rejecting transitions the lifecycle does
    /// not allow.
    pub fn transition(&mut self, next: LeaseState) -> HordeResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(HordeError::InvalidLeaseTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Devices this lease holds on the given device index.
    pub fn devices_on(&self, index: usize) -> impl Iterator<Item = &AgentLeaseDevice> {
        self.devices
            .iter()
            .flatten()
            .filter(move |device| device.index == index)
    }
}
