//! Agent registry entries.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use fairgrid_resources::ResourceBundle;

use crate::ids::FrameworkId;

/// A maintenance window on an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unavailability {
    pub start: Instant,
    /// `None` means the window has no scheduled end.
    pub duration: Option<Duration>,
}

impl Unavailability {
    /// True once the window has begun.
    pub fn has_started(&self, now: Instant) -> bool {
        self.start <= now
    }
}

/// Resources requested back from a framework, with the window driving the
/// request. Empty resources means "everything currently allocated".
#[derive(Debug, Clone, PartialEq)]
pub struct UnavailableResources {
    pub resources: ResourceBundle,
    pub unavailability: Unavailability,
}

/// One registered agent.
///
/// The per-framework allocation map here is the source of truth; the
/// framework-side map mirrors it.
#[derive(Debug)]
pub(crate) struct Agent {
    pub hostname: String,
    /// Registered (non-revocable) capacity. Offer operations applied via
    /// `update_available` and `update_allocation` mutate this in place.
    pub total: ResourceBundle,
    /// Revocable capacity estimated by oversubscription; replaced wholesale
    /// by `update_agent`.
    pub oversubscribed: ResourceBundle,
    pub allocations: HashMap<FrameworkId, ResourceBundle>,
    pub unavailability: Option<Unavailability>,
}

impl Agent {
    pub fn new(hostname: impl Into<String>, total: ResourceBundle) -> Self {
        Agent {
            hostname: hostname.into(),
            total,
            oversubscribed: ResourceBundle::new(),
            allocations: HashMap::new(),
            unavailability: None,
        }
    }

    /// Full capacity including the revocable delta.
    pub fn capacity(&self) -> ResourceBundle {
        self.total.clone() + &self.oversubscribed
    }

    /// Unallocated resources.
    ///
    /// Shared resources are subtracted only by identity removal, so a shared
    /// entry in the capacity stays available while allocated — one logical
    /// unit can back multiple allocations.
    pub fn available(&self) -> ResourceBundle {
        let mut available = self.capacity();
        for allocation in self.allocations.values() {
            available -= &allocation.non_shared();
        }
        available
    }
}
