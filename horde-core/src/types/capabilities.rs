use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{HordeError, HordeResult};

/// A single resource-bearing device on an agent.
///
/// Index 0 of an agent's device list is the host machine itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCapabilities {
    /// Device handle as reported by the agent
    pub handle: String,
    /// Properties in the form "KEY=VALUE" (or bare flags)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeSet<String>>,
    /// Resource name -> capacity. `None` means the device can only be
    /// claimed as a whole.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<BTreeMap<String, i32>>,
}

impl DeviceCapabilities {
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            properties: None,
            resources: None,
        }
    }

    pub fn with_properties<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties = Some(properties.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_resource(mut self, name: impl Into<String>, capacity: i32) -> Self {
        self.resources
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), capacity);
        self
    }

    pub fn has_property(&self, property: &str) -> bool {
        self.properties
            .as_ref()
            .is_some_and(|props| props.contains(property))
    }

    /// Capacity of a named resource, if the device is countable.
    pub fn capacity(&self, name: &str) -> Option<i32> {
        self.resources.as_ref()?.get(name).copied()
    }
}

/// Everything an agent reported about its hardware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawAgentCapabilities")]
pub struct AgentCapabilities {
    pub devices: Vec<DeviceCapabilities>,
    /// Agent-wide properties
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeSet<String>>,
}

/// Wire shape of [`AgentCapabilities`] before the device list is checked.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAgentCapabilities {
    devices: Vec<DeviceCapabilities>,
    #[serde(default)]
    properties: Option<BTreeSet<String>>,
}

impl TryFrom<RawAgentCapabilities> for AgentCapabilities {
    type Error = HordeError;

    fn try_from(raw: RawAgentCapabilities) -> HordeResult<Self> {
        Self::new(raw.devices, raw.properties)
    }
}

impl AgentCapabilities {
    /// Builds a capability snapshot. The device list must contain at least
    /// the primary device.
    pub fn new(
        devices: Vec<DeviceCapabilities>,
        properties: Option<BTreeSet<String>>,
    ) -> HordeResult<Self> {
        let capabilities = Self {
            devices,
            properties,
        };
        capabilities.validate()?;
        Ok(capabilities)
    }

    /// Capabilities for a machine with only a host device.
    pub fn single(device: DeviceCapabilities) -> Self {
        Self {
            devices: vec![device],
            properties: None,
        }
    }

    /// Re-checks the device list of a value built field by field.
    pub fn validate(&self) -> HordeResult<()> {
        if self.devices.is_empty() {
            return Err(HordeError::Misconfiguration(
                "agent capabilities must describe at least one device".into(),
            ));
        }
        Ok(())
    }

    pub fn primary_device(&self) -> Option<&DeviceCapabilities> {
        self.devices.first()
    }

    /// Agent-wide property lookup.
    pub fn has_property(&self, property: &str) -> bool {
        self.properties
            .as_ref()
            .is_some_and(|props| props.contains(property))
    }
}
