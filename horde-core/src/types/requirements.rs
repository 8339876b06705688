use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// What a unit of work needs from a single device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRequirements {
    /// Logical name the work uses for this device. Informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeSet<String>>,
    /// Amounts to claim. `None` asks for the whole device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<BTreeMap<String, i32>>,
}

impl DeviceRequirements {
    /// A requirement for an entire device.
    pub fn exclusive() -> Self {
        Self::default()
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    pub fn with_property(mut self, property: impl Into<String>) -> Self {
        self.properties
            .get_or_insert_with(BTreeSet::new)
            .insert(property.into());
        self
    }

    pub fn with_resource(mut self, name: impl Into<String>, amount: i32) -> Self {
        self.resources
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), amount);
        self
    }
}

/// Requirements a lease places on an agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devices: Option<Vec<DeviceRequirements>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeSet<String>>,
    /// Free-form settings forwarded to the work; never interpreted here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<BTreeMap<String, String>>,
    /// Whether the work may run alongside other leases on the same agent
    #[serde(default)]
    pub shared: bool,
}

impl AgentRequirements {
    pub fn shared() -> Self {
        Self {
            shared: true,
            ..Self::default()
        }
    }

    pub fn with_device(mut self, device: DeviceRequirements) -> Self {
        self.devices.get_or_insert_with(Vec::new).push(device);
        self
    }

    pub fn with_property(mut self, property: impl Into<String>) -> Self {
        self.properties
            .get_or_insert_with(BTreeSet::new)
            .insert(property.into());
        self
    }
}
