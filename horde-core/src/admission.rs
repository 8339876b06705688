use std::fmt;

use tracing::trace;

use crate::types::{
    AgentCapabilities, AgentLease, AgentLeaseDevice, AgentRequirements, AgentStatus,
    DeviceCapabilities, DeviceRequirements,
};

/// Why a lease could not be admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Non-shared work requested while the agent already runs something
    ExclusiveAgentBusy,
    /// The agent lacks a required agent-wide property
    MissingProperty(String),
    /// No assignment of required devices to free devices exists
    NoDeviceMatch,
    AgentDisabled,
    AgentNotReady(AgentStatus),
    NotInPool(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::ExclusiveAgentBusy => {
                write!(f, "exclusive work requested but the agent has active leases")
            }
            RejectReason::MissingProperty(property) => {
                write!(f, "agent is missing property '{}'", property)
            }
            RejectReason::NoDeviceMatch => write!(f, "no free devices satisfy the requirements"),
            RejectReason::AgentDisabled => write!(f, "agent is disabled"),
            RejectReason::AgentNotReady(status) => write!(f, "agent status is {:?}", status),
            RejectReason::NotInPool(pool_id) => write!(f, "agent is not a member of pool {}", pool_id),
        }
    }
}

/// Outcome of an admission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionResult {
    Admitted { devices: Vec<AgentLeaseDevice> },
    Rejected { reason: RejectReason },
}

impl AdmissionResult {
    pub fn is_admitted(&self) -> bool {
        matches!(self, AdmissionResult::Admitted { .. })
    }

    pub fn into_devices(self) -> Option<Vec<AgentLeaseDevice>> {
        match self {
            AdmissionResult::Admitted { devices } => Some(devices),
            AdmissionResult::Rejected { .. } => None,
        }
    }
}

/// Decides whether a lease's requirements fit an agent's free capacity.
///
/// Pure and allocation-light: callers pass an immutable snapshot of the
/// agent's capabilities and active leases and get back the device claims
/// the new lease would hold. Nothing here blocks or touches shared state.
pub struct AdmissionEngine;

impl AdmissionEngine {
    /// Returns the devices to claim if the lease fits, `None` otherwise.
    pub fn try_create_lease(
        capabilities: &AgentCapabilities,
        requirements: Option<&AgentRequirements>,
        existing_leases: &[AgentLease],
    ) -> Option<Vec<AgentLeaseDevice>> {
        Self::check(capabilities, requirements, existing_leases).into_devices()
    }

    /// Same decision as [`try_create_lease`](Self::try_create_lease), with
    /// the reason for a rejection.
    pub fn check(
        capabilities: &AgentCapabilities,
        requirements: Option<&AgentRequirements>,
        existing_leases: &[AgentLease],
    ) -> AdmissionResult {
        let Some(requirements) = requirements else {
            return AdmissionResult::Admitted {
                devices: Vec::new(),
            };
        };

        if !requirements.shared && !existing_leases.is_empty() {
            return AdmissionResult::Rejected {
                reason: RejectReason::ExclusiveAgentBusy,
            };
        }

        if let Some(properties) = &requirements.properties {
            if let Some(missing) = properties.iter().find(|p| !capabilities.has_property(p)) {
                return AdmissionResult::Rejected {
                    reason: RejectReason::MissingProperty(missing.clone()),
                };
            }
        }

        let required = match requirements.devices.as_deref() {
            Some(devices) if !devices.is_empty() => devices,
            _ => {
                return AdmissionResult::Admitted {
                    devices: Vec::new(),
                };
            }
        };

        let mut claimed = vec![false; capabilities.devices.len()];
        let mut chosen = Vec::with_capacity(required.len());
        if !Self::allocate(capabilities, required, existing_leases, &mut claimed, &mut chosen) {
            trace!(required = required.len(), "no device assignment found");
            return AdmissionResult::Rejected {
                reason: RejectReason::NoDeviceMatch,
            };
        }

        let devices = required
            .iter()
            .zip(chosen)
            .map(|(requirement, index)| AgentLeaseDevice {
                index,
                handle: requirement
                    .handle
                    .clone()
                    .unwrap_or_else(|| capabilities.devices[index].handle.clone()),
                resources: requirement.resources.clone(),
            })
            .collect();

        AdmissionResult::Admitted { devices }
    }

    /// Depth-first search over candidate devices in ascending index order.
    ///
    /// `chosen[i]` holds the device index picked for `required[i]`; its
    /// length is the depth of the search. `claimed` marks indices taken by
    /// this attempt so two requirements never share a device.
    fn allocate(
        capabilities: &AgentCapabilities,
        required: &[DeviceRequirements],
        existing_leases: &[AgentLease],
        claimed: &mut [bool],
        chosen: &mut Vec<usize>,
    ) -> bool {
        let Some(requirement) = required.get(chosen.len()) else {
            return true;
        };

        for (index, device) in capabilities.devices.iter().enumerate() {
            if claimed[index] {
                continue;
            }

            let on_device: Vec<&AgentLeaseDevice> = existing_leases
                .iter()
                .flat_map(|lease| lease.devices_on(index))
                .collect();
            if !Self::match_device(device, requirement, &on_device) {
                continue;
            }

            claimed[index] = true;
            chosen.push(index);
            if Self::allocate(capabilities, required, existing_leases, claimed, chosen) {
                return true;
            }
            chosen.pop();
            claimed[index] = false;
        }

        false
    }

    /// Checks one requirement against one device and the claims already
    /// held on it.
    pub fn match_device(
        device: &DeviceCapabilities,
        requirement: &DeviceRequirements,
        leases_on_device: &[&AgentLeaseDevice],
    ) -> bool {
        if let Some(properties) = &requirement.properties {
            if !properties.iter().all(|p| device.has_property(p)) {
                return false;
            }
        }

        let Some(required) = &requirement.resources else {
            // Whole-device claim: any existing holder blocks it
            return leases_on_device.is_empty();
        };

        if device.resources.is_none() {
            return false;
        }

        if leases_on_device.iter().any(|lease| lease.is_exclusive()) {
            return false;
        }

        required.iter().all(|(name, &amount)| {
            if amount < 0 {
                return false;
            }
            let total = i64::from(device.capacity(name).unwrap_or(0));
            let used: i64 = leases_on_device
                .iter()
                .map(|lease| i64::from(lease.claimed(name)))
                .sum();
            total - used >= i64::from(amount)
        })
    }
}
