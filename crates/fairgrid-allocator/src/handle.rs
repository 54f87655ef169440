//! The public, asynchronous face of the allocator.
//!
//! Every operation is a fire-and-forget submission onto the worker's queue,
//! except `update_available` and `metrics`, which reply over a oneshot.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use fairgrid_resources::{Operation, ResourceBundle};

use crate::agent::{Unavailability, UnavailableResources};
use crate::error::{AllocatorError, AllocatorResult};
use crate::framework::FrameworkInfo;
use crate::ids::{AgentId, FrameworkId};
use crate::metrics::MetricsSnapshot;

/// Offer delivery: one call per framework per allocation run at most.
pub type OfferCallback = Box<dyn Fn(FrameworkId, BTreeMap<AgentId, ResourceBundle>) + Send>;

/// Inverse-offer delivery for agents entering maintenance.
pub type InverseOfferCallback =
    Box<dyn Fn(FrameworkId, BTreeMap<AgentId, UnavailableResources>) + Send>;

/// A serialized allocator operation.
#[derive(Debug)]
pub(crate) enum AllocatorOp {
    AddAgent {
        id: AgentId,
        hostname: String,
        unavailability: Option<Unavailability>,
        total: ResourceBundle,
        used: HashMap<FrameworkId, ResourceBundle>,
    },
    RemoveAgent {
        id: AgentId,
    },
    UpdateAgent {
        id: AgentId,
        oversubscribed: ResourceBundle,
    },
    UpdateUnavailability {
        id: AgentId,
        unavailability: Option<Unavailability>,
    },
    UpdateAvailable {
        id: AgentId,
        operations: Vec<Operation>,
        reply: oneshot::Sender<AllocatorResult<()>>,
    },
    AddFramework {
        id: FrameworkId,
        info: FrameworkInfo,
        used: HashMap<AgentId, ResourceBundle>,
        active: bool,
    },
    RemoveFramework {
        id: FrameworkId,
    },
    ActivateFramework {
        id: FrameworkId,
    },
    DeactivateFramework {
        id: FrameworkId,
    },
    SuppressOffers {
        id: FrameworkId,
    },
    ReviveOffers {
        id: FrameworkId,
    },
    UpdateAllocation {
        framework: FrameworkId,
        agent: AgentId,
        resources: ResourceBundle,
        operations: Vec<Operation>,
    },
    RecoverResources {
        framework: FrameworkId,
        agent: AgentId,
        resources: ResourceBundle,
        refuse: Option<Duration>,
    },
    SetQuota {
        role: String,
        guarantee: ResourceBundle,
    },
    RemoveQuota {
        role: String,
    },
    UpdateWeights {
        weights: Vec<(String, f64)>,
    },
    UpdateWhitelist {
        hostnames: Option<HashSet<String>>,
    },
    Metrics {
        reply: oneshot::Sender<MetricsSnapshot>,
    },
}

/// Cheaply cloneable handle submitting operations to the worker.
#[derive(Clone)]
pub struct Allocator {
    tx: mpsc::UnboundedSender<AllocatorOp>,
}

impl Allocator {
    pub(crate) fn new(tx: mpsc::UnboundedSender<AllocatorOp>) -> Self {
        Allocator { tx }
    }

    fn submit(&self, op: AllocatorOp) {
        if self.tx.send(op).is_err() {
            warn!("allocator worker is gone; operation dropped");
        }
    }

    /// Register an agent with its capacity and resources already in use.
    pub fn add_agent(
        &self,
        id: AgentId,
        hostname: impl Into<String>,
        unavailability: Option<Unavailability>,
        total: ResourceBundle,
        used: HashMap<FrameworkId, ResourceBundle>,
    ) {
        self.submit(AllocatorOp::AddAgent {
            id,
            hostname: hostname.into(),
            unavailability,
            total,
            used,
        });
    }

    /// Deregister an agent, recovering every allocation on it.
    pub fn remove_agent(&self, id: AgentId) {
        self.submit(AllocatorOp::RemoveAgent { id });
    }

    /// Replace the agent's revocable (oversubscribed) capacity estimate.
    pub fn update_agent(&self, id: AgentId, oversubscribed: ResourceBundle) {
        self.submit(AllocatorOp::UpdateAgent { id, oversubscribed });
    }

    /// Set or clear a maintenance window; setting one triggers inverse
    /// offers for every framework allocated on the agent.
    pub fn update_unavailability(&self, id: AgentId, unavailability: Option<Unavailability>) {
        self.submit(AllocatorOp::UpdateUnavailability { id, unavailability });
    }

    /// Atomically apply offer operations to the agent's unallocated pool.
    pub async fn update_available(
        &self,
        id: AgentId,
        operations: Vec<Operation>,
    ) -> AllocatorResult<()> {
        let (reply, rx) = oneshot::channel();
        self.submit(AllocatorOp::UpdateAvailable {
            id,
            operations,
            reply,
        });
        rx.await.map_err(|_| AllocatorError::Shutdown)?
    }

    /// Register a framework; if active, an allocation is scheduled.
    pub fn add_framework(
        &self,
        id: FrameworkId,
        info: FrameworkInfo,
        used: HashMap<AgentId, ResourceBundle>,
        active: bool,
    ) {
        self.submit(AllocatorOp::AddFramework {
            id,
            info,
            used,
            active,
        });
    }

    /// Deregister a framework, recovering everything it holds.
    pub fn remove_framework(&self, id: FrameworkId) {
        self.submit(AllocatorOp::RemoveFramework { id });
    }

    pub fn activate_framework(&self, id: FrameworkId) {
        self.submit(AllocatorOp::ActivateFramework { id });
    }

    pub fn deactivate_framework(&self, id: FrameworkId) {
        self.submit(AllocatorOp::DeactivateFramework { id });
    }

    /// Stop offers to the framework until revived; allocations stay put.
    pub fn suppress_offers(&self, id: FrameworkId) {
        self.submit(AllocatorOp::SuppressOffers { id });
    }

    /// Clear suppression and all of the framework's offer filters.
    pub fn revive_offers(&self, id: FrameworkId) {
        self.submit(AllocatorOp::ReviveOffers { id });
    }

    /// Transform part of a framework's allocation on an agent by applying
    /// offer operations (RESERVE / CREATE / …).
    pub fn update_allocation(
        &self,
        framework: FrameworkId,
        agent: AgentId,
        resources: ResourceBundle,
        operations: Vec<Operation>,
    ) {
        self.submit(AllocatorOp::UpdateAllocation {
            framework,
            agent,
            resources,
            operations,
        });
    }

    /// Return declined or unused resources; a `refuse` duration installs an
    /// offer filter for the returned bundle.
    pub fn recover_resources(
        &self,
        framework: FrameworkId,
        agent: AgentId,
        resources: ResourceBundle,
        refuse: Option<Duration>,
    ) {
        self.submit(AllocatorOp::RecoverResources {
            framework,
            agent,
            resources,
            refuse,
        });
    }

    /// Set a role's quota guarantee (scalar resources only).
    pub fn set_quota(&self, role: impl Into<String>, guarantee: ResourceBundle) {
        self.submit(AllocatorOp::SetQuota {
            role: role.into(),
            guarantee,
        });
    }

    pub fn remove_quota(&self, role: impl Into<String>) {
        self.submit(AllocatorOp::RemoveQuota { role: role.into() });
    }

    /// Update role weights; takes effect on the next allocation run.
    pub fn update_weights(&self, weights: Vec<(String, f64)>) {
        self.submit(AllocatorOp::UpdateWeights { weights });
    }

    /// Replace the agent hostname whitelist; `None` allows all agents.
    pub fn update_whitelist(&self, hostnames: Option<HashSet<String>>) {
        self.submit(AllocatorOp::UpdateWhitelist { hostnames });
    }

    /// A consistent snapshot of counters and gauges.
    pub async fn metrics(&self) -> AllocatorResult<MetricsSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.submit(AllocatorOp::Metrics { reply });
        rx.await.map_err(|_| AllocatorError::Shutdown)
    }
}
