//! Typed identifiers for agents and frameworks.
//!
//! Ids are opaque strings assigned by the master; typing them keeps the two
//! namespaces from mixing in maps and signatures.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one agent (worker node) in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        AgentId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(id: &str) -> Self {
        AgentId::new(id)
    }
}

/// Identifies one registered framework.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameworkId(String);

impl FrameworkId {
    pub fn new(id: impl Into<String>) -> Self {
        FrameworkId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FrameworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FrameworkId {
    fn from(id: &str) -> Self {
        FrameworkId::new(id)
    }
}
