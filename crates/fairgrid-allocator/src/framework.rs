//! Framework registry entries.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use fairgrid_resources::ResourceBundle;

use crate::ids::AgentId;

/// Opt-in capabilities a framework registers with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// May receive revocable (oversubscribed) resources.
    pub revocable_resources: bool,
    /// May receive shared resources, including extra copies of a shared
    /// unit that is already allocated elsewhere.
    pub shared_resources: bool,
    /// May receive resources from agents that have gpus.
    pub gpu_resources: bool,
}

/// Registration-time framework description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkInfo {
    pub role: String,
    pub capabilities: Capabilities,
}

impl FrameworkInfo {
    pub fn new(role: impl Into<String>) -> Self {
        FrameworkInfo {
            role: role.into(),
            capabilities: Capabilities::default(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// One registered framework.
#[derive(Debug)]
pub(crate) struct Framework {
    pub role: String,
    pub capabilities: Capabilities,
    /// Deactivated frameworks keep their allocations but get no offers.
    pub active: bool,
    /// Suppressed frameworks asked for no offers until revived.
    pub suppressed: bool,
    /// Mirror of the agent-side allocation maps.
    pub allocations: HashMap<AgentId, ResourceBundle>,
}

impl Framework {
    pub fn new(info: FrameworkInfo, active: bool) -> Self {
        Framework {
            role: info.role,
            capabilities: info.capabilities,
            active,
            suppressed: false,
            allocations: HashMap::new(),
        }
    }

    /// In the sorter iff active and not suppressed.
    pub fn offerable(&self) -> bool {
        self.active && !self.suppressed
    }
}
