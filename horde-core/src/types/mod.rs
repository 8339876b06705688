mod agent;
mod capabilities;
mod lease;
mod pool;
mod requirements;
mod workspace;

pub use agent::{Agent, AgentStatus};
pub use capabilities::{AgentCapabilities, DeviceCapabilities};
pub use lease::{AgentLease, AgentLeaseDevice, LeasePayload, LeaseState};
pub use pool::Pool;
pub use requirements::{AgentRequirements, DeviceRequirements};
pub use workspace::{AgentWorkspace, workspace_sets_equal};
