//! The allocator state machine.
//!
//! One [`AllocatorState`] owns every registry and sorter; the worker calls
//! [`AllocatorState::handle`] for each queued operation and
//! [`AllocatorState::allocate`] (engine.rs) when a run is due. Allocation
//! bookkeeping flows through `track_allocation` / `untrack_allocation` so
//! the agent map, the framework mirror, both sorter levels, and the quota
//! charges always move in lockstep.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use fairgrid_resources::{Operation, ResourceBundle, Value};
use fairgrid_sorter::DrfSorter;

use crate::agent::{Agent, Unavailability, UnavailableResources};
use crate::config::AllocatorConfig;
use crate::error::{AllocatorError, AllocatorResult};
use crate::filters::OfferFilterSet;
use crate::framework::{Framework, FrameworkInfo};
use crate::handle::{AllocatorOp, InverseOfferCallback, OfferCallback};
use crate::ids::{AgentId, FrameworkId};
use crate::metrics::{AllocatorMetrics, MetricsSnapshot, QuotaMetrics};
use crate::quota::QuotaTracker;

/// Per-role bookkeeping: weight, member frameworks, and the sorter ordering
/// those frameworks by share within the role.
pub(crate) struct RoleState {
    pub weight: f64,
    pub frameworks: HashSet<FrameworkId>,
    pub sorter: DrfSorter,
}

pub(crate) struct AllocatorState {
    pub config: AllocatorConfig,
    pub offer_cb: OfferCallback,
    pub inverse_offer_cb: InverseOfferCallback,

    pub agents: BTreeMap<AgentId, Agent>,
    pub frameworks: HashMap<FrameworkId, Framework>,
    pub roles: HashMap<String, RoleState>,
    /// Orders roles by weighted dominant share. A role is active here iff
    /// it has at least one active, non-suppressed framework.
    pub role_sorter: DrfSorter,
    pub quota: QuotaTracker,
    pub filters: OfferFilterSet,
    pub whitelist: Option<HashSet<String>>,
    pub metrics: AllocatorMetrics,
    /// Coalescing flag: set by marking events, cleared when a run begins.
    pub allocation_needed: bool,
}

impl AllocatorState {
    pub fn new(
        config: AllocatorConfig,
        offer_cb: OfferCallback,
        inverse_offer_cb: InverseOfferCallback,
    ) -> Self {
        let excluded = config.fairness_excluded.clone();
        let mut state = AllocatorState {
            role_sorter: DrfSorter::new(excluded.clone()),
            quota: QuotaTracker::new(excluded),
            config,
            offer_cb,
            inverse_offer_cb,
            agents: BTreeMap::new(),
            frameworks: HashMap::new(),
            roles: HashMap::new(),
            filters: OfferFilterSet::new(),
            whitelist: None,
            metrics: AllocatorMetrics::default(),
            allocation_needed: false,
        };
        for (role, weight) in state.config.initial_weights.clone() {
            state.ensure_role(&role);
            state.set_weight(&role, weight);
        }
        state
    }

    /// Dispatch one queued operation. Fire-and-forget failures are logged
    /// and dropped; replies go back over their oneshot.
    pub fn handle(&mut self, op: AllocatorOp) {
        let result = match op {
            AllocatorOp::AddAgent {
                id,
                hostname,
                unavailability,
                total,
                used,
            } => self.add_agent(id, hostname, unavailability, total, used),
            AllocatorOp::RemoveAgent { id } => self.remove_agent(&id),
            AllocatorOp::UpdateAgent { id, oversubscribed } => {
                self.update_agent(&id, oversubscribed)
            }
            AllocatorOp::UpdateUnavailability { id, unavailability } => {
                self.update_unavailability(&id, unavailability)
            }
            AllocatorOp::UpdateAvailable {
                id,
                operations,
                reply,
            } => {
                let _ = reply.send(self.update_available(&id, &operations));
                Ok(())
            }
            AllocatorOp::AddFramework {
                id,
                info,
                used,
                active,
            } => self.add_framework(id, info, used, active),
            AllocatorOp::RemoveFramework { id } => self.remove_framework(&id),
            AllocatorOp::ActivateFramework { id } => self.set_framework_active(&id, true),
            AllocatorOp::DeactivateFramework { id } => self.set_framework_active(&id, false),
            AllocatorOp::SuppressOffers { id } => self.suppress_offers(&id),
            AllocatorOp::ReviveOffers { id } => self.revive_offers(&id),
            AllocatorOp::UpdateAllocation {
                framework,
                agent,
                resources,
                operations,
            } => self.update_allocation(&framework, &agent, &resources, &operations),
            AllocatorOp::RecoverResources {
                framework,
                agent,
                resources,
                refuse,
            } => self.recover_resources(&framework, &agent, resources, refuse),
            AllocatorOp::SetQuota { role, guarantee } => self.set_quota(&role, guarantee),
            AllocatorOp::RemoveQuota { role } => self.remove_quota(&role),
            AllocatorOp::UpdateWeights { weights } => self.update_weights(weights),
            AllocatorOp::UpdateWhitelist { hostnames } => {
                self.update_whitelist(hostnames);
                Ok(())
            }
            AllocatorOp::Metrics { reply } => {
                let _ = reply.send(self.metrics_snapshot());
                Ok(())
            }
        };
        if let Err(error) = result {
            warn!(%error, "allocator operation dropped");
        }
    }

    // ── Agents ────────────────────────────────────────────────────

    fn add_agent(
        &mut self,
        id: AgentId,
        hostname: String,
        unavailability: Option<Unavailability>,
        total: ResourceBundle,
        used: HashMap<FrameworkId, ResourceBundle>,
    ) -> AllocatorResult<()> {
        if self.agents.contains_key(&id) {
            return Err(AllocatorError::InvalidArgument(format!(
                "agent {id} is already registered"
            )));
        }

        let mut agent = Agent::new(hostname, total);
        agent.unavailability = unavailability;
        info!(agent = %id, total = %agent.total, "added agent");
        self.agents.insert(id.clone(), agent);
        self.broadcast_total(&id);

        for (framework_id, resources) in used {
            if resources.is_empty() {
                continue;
            }
            if self.frameworks.contains_key(&framework_id) {
                self.track_allocation(&framework_id, &id, &resources);
            } else {
                // The framework re-registers later and brings these along
                // as its initial allocations.
                debug!(
                    framework = %framework_id,
                    agent = %id,
                    "agent reports usage by an unknown framework"
                );
            }
        }

        self.allocation_needed = true;
        Ok(())
    }

    fn remove_agent(&mut self, id: &AgentId) -> AllocatorResult<()> {
        let Some(agent) = self.agents.get(id) else {
            return Err(AllocatorError::UnknownAgent(id.clone()));
        };

        let allocations: Vec<(FrameworkId, ResourceBundle)> =
            agent.allocations.clone().into_iter().collect();
        for (framework_id, resources) in allocations {
            self.untrack_allocation(&framework_id, id, &resources);
        }

        self.agents.remove(id);
        self.broadcast_total(id);
        self.filters.remove_agent(id);
        info!(agent = %id, "removed agent");
        self.allocation_needed = true;
        Ok(())
    }

    fn update_agent(
        &mut self,
        id: &AgentId,
        oversubscribed: ResourceBundle,
    ) -> AllocatorResult<()> {
        let Some(agent) = self.agents.get_mut(id) else {
            return Err(AllocatorError::UnknownAgent(id.clone()));
        };

        // The revocable marker is what distinguishes this pool; enforce it.
        let oversubscribed: ResourceBundle = oversubscribed
            .iter()
            .cloned()
            .map(|mut r| {
                r.revocable = true;
                r
            })
            .collect();

        info!(agent = %id, oversubscribed = %oversubscribed, "updated oversubscription");
        agent.oversubscribed = oversubscribed;
        self.broadcast_total(id);
        self.allocation_needed = true;
        Ok(())
    }

    fn update_unavailability(
        &mut self,
        id: &AgentId,
        unavailability: Option<Unavailability>,
    ) -> AllocatorResult<()> {
        let Some(agent) = self.agents.get_mut(id) else {
            return Err(AllocatorError::UnknownAgent(id.clone()));
        };
        agent.unavailability = unavailability.clone();

        if let Some(window) = unavailability {
            // Ask every framework allocated here for its resources back.
            let framework_ids: Vec<FrameworkId> = agent.allocations.keys().cloned().collect();
            for framework_id in framework_ids {
                let mut unavailable = BTreeMap::new();
                unavailable.insert(
                    id.clone(),
                    UnavailableResources {
                        resources: ResourceBundle::new(),
                        unavailability: window.clone(),
                    },
                );
                debug!(framework = %framework_id, agent = %id, "sending inverse offer");
                (self.inverse_offer_cb)(framework_id, unavailable);
            }
        }

        self.allocation_needed = true;
        Ok(())
    }

    fn update_available(
        &mut self,
        id: &AgentId,
        operations: &[Operation],
    ) -> AllocatorResult<()> {
        let Some(agent) = self.agents.get(id) else {
            return Err(AllocatorError::UnknownAgent(id.clone()));
        };

        // Operations apply to the unallocated, non-revocable pool; validate
        // everything before touching any state.
        let available = agent.available().non_revocable();
        let mut updated = available.clone();
        for op in operations {
            updated = updated
                .apply(op)
                .map_err(|e| AllocatorError::InsufficientResources {
                    agent: id.clone(),
                    detail: e.to_string(),
                })?;
        }

        if let Some(agent) = self.agents.get_mut(id) {
            agent.total = agent.total.clone() - &available + &updated;
        }
        self.broadcast_total(id);
        debug!(agent = %id, "applied operations to available resources");
        self.allocation_needed = true;
        Ok(())
    }

    // ── Frameworks ────────────────────────────────────────────────

    fn add_framework(
        &mut self,
        id: FrameworkId,
        info: FrameworkInfo,
        used: HashMap<AgentId, ResourceBundle>,
        active: bool,
    ) -> AllocatorResult<()> {
        if self.frameworks.contains_key(&id) {
            return Err(AllocatorError::InvalidArgument(format!(
                "framework {id} is already registered"
            )));
        }
        if info.role.is_empty() {
            return Err(AllocatorError::InvalidArgument(
                "framework role must not be empty".to_string(),
            ));
        }

        let role = info.role.clone();
        info!(framework = %id, %role, active, "added framework");
        self.frameworks.insert(id.clone(), Framework::new(info, active));

        self.ensure_role(&role);
        if let Some(role_state) = self.roles.get_mut(&role) {
            role_state.frameworks.insert(id.clone());
            role_state.sorter.add(id.as_str(), 1.0);
            if !active {
                role_state.sorter.deactivate(id.as_str());
            }
        }

        for (agent_id, resources) in used {
            if resources.is_empty() {
                continue;
            }
            if self.agents.contains_key(&agent_id) {
                self.track_allocation(&id, &agent_id, &resources);
            } else {
                debug!(
                    framework = %id,
                    agent = %agent_id,
                    "initial allocation on an unknown agent"
                );
            }
        }

        self.refresh_role_activation(&role);
        if active {
            self.allocation_needed = true;
        }
        Ok(())
    }

    fn remove_framework(&mut self, id: &FrameworkId) -> AllocatorResult<()> {
        let Some(framework) = self.frameworks.get(id) else {
            return Err(AllocatorError::UnknownFramework(id.clone()));
        };
        let role = framework.role.clone();

        let allocations: Vec<(AgentId, ResourceBundle)> =
            framework.allocations.clone().into_iter().collect();
        for (agent_id, resources) in allocations {
            self.untrack_allocation(id, &agent_id, &resources);
        }

        self.frameworks.remove(id);
        if let Some(role_state) = self.roles.get_mut(&role) {
            role_state.frameworks.remove(id);
            role_state.sorter.remove(id.as_str());
        }
        self.filters.remove_framework(id);
        self.refresh_role_activation(&role);
        self.maybe_remove_role(&role);
        info!(framework = %id, %role, "removed framework");
        self.allocation_needed = true;
        Ok(())
    }

    fn set_framework_active(&mut self, id: &FrameworkId, active: bool) -> AllocatorResult<()> {
        let Some(framework) = self.frameworks.get_mut(id) else {
            return Err(AllocatorError::UnknownFramework(id.clone()));
        };
        framework.active = active;
        let role = framework.role.clone();
        let offerable = framework.offerable();

        self.sync_framework_sorter(id, &role, offerable);
        self.refresh_role_activation(&role);
        debug!(framework = %id, active, "framework activation changed");
        if active {
            self.allocation_needed = true;
        }
        Ok(())
    }

    fn suppress_offers(&mut self, id: &FrameworkId) -> AllocatorResult<()> {
        let Some(framework) = self.frameworks.get_mut(id) else {
            return Err(AllocatorError::UnknownFramework(id.clone()));
        };
        framework.suppressed = true;
        let role = framework.role.clone();
        self.sync_framework_sorter(id, &role, false);
        self.refresh_role_activation(&role);
        debug!(framework = %id, "offers suppressed");
        Ok(())
    }

    fn revive_offers(&mut self, id: &FrameworkId) -> AllocatorResult<()> {
        let Some(framework) = self.frameworks.get_mut(id) else {
            return Err(AllocatorError::UnknownFramework(id.clone()));
        };
        framework.suppressed = false;
        let role = framework.role.clone();
        let offerable = framework.offerable();

        self.filters.remove_framework(id);
        self.sync_framework_sorter(id, &role, offerable);
        self.refresh_role_activation(&role);
        debug!(framework = %id, "offers revived");
        self.allocation_needed = true;
        Ok(())
    }

    fn sync_framework_sorter(&mut self, id: &FrameworkId, role: &str, offerable: bool) {
        if let Some(role_state) = self.roles.get_mut(role) {
            if offerable {
                role_state.sorter.activate(id.as_str());
            } else {
                role_state.sorter.deactivate(id.as_str());
            }
        }
    }

    // ── Allocations ───────────────────────────────────────────────

    fn update_allocation(
        &mut self,
        framework_id: &FrameworkId,
        agent_id: &AgentId,
        resources: &ResourceBundle,
        operations: &[Operation],
    ) -> AllocatorResult<()> {
        let Some(framework) = self.frameworks.get(framework_id) else {
            return Err(AllocatorError::UnknownFramework(framework_id.clone()));
        };
        if !self.agents.contains_key(agent_id) {
            return Err(AllocatorError::UnknownAgent(agent_id.clone()));
        }
        if resources.is_empty() {
            return Err(AllocatorError::InvalidArgument(
                "update_allocation with empty resources".to_string(),
            ));
        }

        let current = framework
            .allocations
            .get(agent_id)
            .cloned()
            .unwrap_or_default();
        if !current.contains(resources) {
            return Err(AllocatorError::InvalidOperation(format!(
                "allocation of {framework_id} on {agent_id} does not contain {resources}"
            )));
        }

        // Validate the whole chain before mutating anything.
        let mut updated = resources.clone();
        for op in operations {
            updated = updated
                .apply(op)
                .map_err(|e| AllocatorError::InvalidOperation(e.to_string()))?;
        }
        if updated == *resources {
            return Ok(());
        }

        let role = framework.role.clone();
        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.total = agent.total.clone() - resources + &updated;
            if let Some(entry) = agent.allocations.get_mut(framework_id) {
                *entry = entry.clone() - resources + &updated;
            }
        }
        if let Some(framework) = self.frameworks.get_mut(framework_id) {
            if let Some(entry) = framework.allocations.get_mut(agent_id) {
                *entry = entry.clone() - resources + &updated;
            }
        }

        self.role_sorter
            .update_allocation(&role, agent_id.as_str(), resources, &updated);
        if let Some(role_state) = self.roles.get_mut(&role) {
            role_state
                .sorter
                .update_allocation(framework_id.as_str(), agent_id.as_str(), resources, &updated);
        }
        self.broadcast_total(agent_id);

        debug!(
            framework = %framework_id,
            agent = %agent_id,
            from = %resources,
            to = %updated,
            "applied operations to allocation"
        );
        Ok(())
    }

    fn recover_resources(
        &mut self,
        framework_id: &FrameworkId,
        agent_id: &AgentId,
        resources: ResourceBundle,
        refuse: Option<Duration>,
    ) -> AllocatorResult<()> {
        if !self.frameworks.contains_key(framework_id) {
            return Err(AllocatorError::UnknownFramework(framework_id.clone()));
        }
        if !self.agents.contains_key(agent_id) {
            return Err(AllocatorError::UnknownAgent(agent_id.clone()));
        }

        if !resources.is_empty() {
            let held = self
                .frameworks
                .get(framework_id)
                .and_then(|f| f.allocations.get(agent_id))
                .cloned()
                .unwrap_or_default();
            if !held.contains(&resources) {
                return Err(AllocatorError::InvalidArgument(format!(
                    "framework {framework_id} does not hold {resources} on {agent_id}"
                )));
            }
            self.untrack_allocation(framework_id, agent_id, &resources);
            debug!(
                framework = %framework_id,
                agent = %agent_id,
                resources = %resources,
                "recovered resources"
            );
        }

        match refuse {
            Some(refuse) if !refuse.is_zero() => {
                self.filters.insert(
                    framework_id,
                    agent_id,
                    resources,
                    Instant::now() + refuse,
                    self.metrics.allocation_runs,
                );
            }
            Some(_) => {}
            // An unfiltered recovery frees resources someone else may want
            // right away.
            None => self.allocation_needed = true,
        }
        Ok(())
    }

    // ── Quota, weights, whitelist ─────────────────────────────────

    fn set_quota(&mut self, role: &str, guarantee: ResourceBundle) -> AllocatorResult<()> {
        if guarantee.is_empty() {
            return Err(AllocatorError::InvalidArgument(format!(
                "empty quota guarantee for role {role}"
            )));
        }
        for r in guarantee.iter() {
            let plain_scalar =
                matches!(r.value, Value::Scalar(_)) && r.reservation.is_none() && !r.revocable;
            if !plain_scalar {
                return Err(AllocatorError::InvalidArgument(format!(
                    "quota guarantees must be plain scalar resources, got {r}"
                )));
            }
        }

        self.ensure_role(role);
        info!(%role, guarantee = %guarantee, "set quota");
        self.quota.set_guarantee(role, guarantee.scalar_totals());
        self.allocation_needed = true;
        Ok(())
    }

    fn remove_quota(&mut self, role: &str) -> AllocatorResult<()> {
        if !self.quota.has_guarantee(role) {
            return Err(AllocatorError::UnknownRole(role.to_string()));
        }
        info!(%role, "removed quota");
        self.quota.remove_guarantee(role);
        self.maybe_remove_role(role);
        self.allocation_needed = true;
        Ok(())
    }

    fn update_weights(&mut self, weights: Vec<(String, f64)>) -> AllocatorResult<()> {
        for (role, weight) in &weights {
            if !weight.is_finite() || *weight <= 0.0 {
                return Err(AllocatorError::InvalidArgument(format!(
                    "weight for role {role} must be positive, got {weight}"
                )));
            }
        }
        for (role, weight) in weights {
            self.ensure_role(&role);
            self.set_weight(&role, weight);
            info!(%role, weight, "updated weight");
        }
        self.allocation_needed = true;
        Ok(())
    }

    pub(crate) fn set_weight(&mut self, role: &str, weight: f64) {
        if let Some(role_state) = self.roles.get_mut(role) {
            role_state.weight = weight;
        }
        self.role_sorter.update_weight(role, weight);
    }

    fn update_whitelist(&mut self, hostnames: Option<HashSet<String>>) {
        match &hostnames {
            Some(set) => info!(agents = set.len(), "updated agent whitelist"),
            None => info!("cleared agent whitelist"),
        }
        self.whitelist = hostnames;
        self.allocation_needed = true;
    }

    // ── Shared bookkeeping ────────────────────────────────────────

    /// Create the role bucket if missing. New roles start deactivated in
    /// the top-level sorter until an offerable framework appears.
    pub(crate) fn ensure_role(&mut self, role: &str) {
        if self.roles.contains_key(role) {
            return;
        }
        let mut sorter = DrfSorter::new(self.config.fairness_excluded.clone());
        for (agent_id, agent) in &self.agents {
            sorter.update_total(agent_id.as_str(), agent.capacity());
        }
        self.roles.insert(
            role.to_string(),
            RoleState {
                weight: 1.0,
                frameworks: HashSet::new(),
                sorter,
            },
        );
        self.role_sorter.add(role, 1.0);
        self.role_sorter.deactivate(role);
    }

    /// Drop the role bucket once nothing keeps it alive.
    fn maybe_remove_role(&mut self, role: &str) {
        let Some(role_state) = self.roles.get(role) else {
            return;
        };
        if role_state.frameworks.is_empty()
            && !self.quota.has_guarantee(role)
            && role_state.weight == 1.0
        {
            self.roles.remove(role);
            self.role_sorter.remove(role);
        }
    }

    /// A role sorts iff it has at least one active, non-suppressed framework.
    fn refresh_role_activation(&mut self, role: &str) {
        let Some(role_state) = self.roles.get(role) else {
            return;
        };
        let offerable = role_state
            .frameworks
            .iter()
            .any(|id| self.frameworks.get(id).is_some_and(Framework::offerable));
        if offerable {
            self.role_sorter.activate(role);
        } else {
            self.role_sorter.deactivate(role);
        }
    }

    /// Push an agent's capacity into every sorter; removal broadcasts empty.
    fn broadcast_total(&mut self, agent_id: &AgentId) {
        let capacity = self
            .agents
            .get(agent_id)
            .map(Agent::capacity)
            .unwrap_or_default();
        self.role_sorter
            .update_total(agent_id.as_str(), capacity.clone());
        for role_state in self.roles.values_mut() {
            role_state
                .sorter
                .update_total(agent_id.as_str(), capacity.clone());
        }
    }

    /// Record an allocation everywhere it is tracked.
    pub(crate) fn track_allocation(
        &mut self,
        framework_id: &FrameworkId,
        agent_id: &AgentId,
        resources: &ResourceBundle,
    ) {
        let Some(framework) = self.frameworks.get_mut(framework_id) else {
            return;
        };
        let role = framework.role.clone();
        *framework.allocations.entry(agent_id.clone()).or_default() += resources;

        if let Some(agent) = self.agents.get_mut(agent_id) {
            *agent.allocations.entry(framework_id.clone()).or_default() += resources;
        }

        self.role_sorter
            .allocated(&role, agent_id.as_str(), resources);
        if let Some(role_state) = self.roles.get_mut(&role) {
            role_state
                .sorter
                .allocated(framework_id.as_str(), agent_id.as_str(), resources);
        }
        self.quota.charge(&role, resources);
    }

    /// Reverse [`Self::track_allocation`].
    pub(crate) fn untrack_allocation(
        &mut self,
        framework_id: &FrameworkId,
        agent_id: &AgentId,
        resources: &ResourceBundle,
    ) {
        let Some(framework) = self.frameworks.get_mut(framework_id) else {
            return;
        };
        let role = framework.role.clone();
        if let Some(entry) = framework.allocations.get_mut(agent_id) {
            *entry -= resources;
            if entry.is_empty() {
                framework.allocations.remove(agent_id);
            }
        }

        if let Some(agent) = self.agents.get_mut(agent_id) {
            if let Some(entry) = agent.allocations.get_mut(framework_id) {
                *entry -= resources;
                if entry.is_empty() {
                    agent.allocations.remove(framework_id);
                }
            }
        }

        self.role_sorter
            .unallocated(&role, agent_id.as_str(), resources);
        if let Some(role_state) = self.roles.get_mut(&role) {
            role_state
                .sorter
                .unallocated(framework_id.as_str(), agent_id.as_str(), resources);
        }
        self.quota.uncharge(&role, resources);
    }

    // ── Metrics ───────────────────────────────────────────────────

    pub(crate) fn metrics_snapshot(&self) -> MetricsSnapshot {
        let mut snapshot = MetricsSnapshot {
            allocation_runs: self.metrics.allocation_runs,
            allocation_run_ms: self.metrics.latency_stats(),
            ..MetricsSnapshot::default()
        };

        for agent in self.agents.values() {
            for (name, quantity) in agent.capacity().scalar_totals() {
                *snapshot.total.entry(name).or_default() += quantity.as_f64();
            }
            for allocation in agent.allocations.values() {
                for (name, quantity) in allocation.scalar_totals() {
                    *snapshot.offered_or_allocated.entry(name).or_default() +=
                        quantity.as_f64();
                }
            }
        }

        for role in self.roles.keys() {
            snapshot
                .dominant_shares
                .insert(role.clone(), self.role_sorter.dominant_share(role));
        }

        for role in self.quota.roles() {
            let guarantee = self
                .quota
                .guarantee(role)
                .map(|g| g.iter().map(|(k, v)| (k.clone(), v.as_f64())).collect())
                .unwrap_or_default();
            let offered_or_allocated = self
                .quota
                .charged(role)
                .iter()
                .map(|(k, v)| (k.clone(), v.as_f64()))
                .collect();
            snapshot.quota.insert(
                role.to_string(),
                QuotaMetrics {
                    guarantee,
                    offered_or_allocated,
                },
            );
        }

        for (framework_id, framework) in &self.frameworks {
            let count = self.filters.count_for(framework_id);
            if count > 0 {
                *snapshot
                    .active_offer_filters
                    .entry(framework.role.clone())
                    .or_default() += count;
            }
        }

        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fairgrid_resources::{Resource, ReservationKind};

    fn test_state() -> AllocatorState {
        AllocatorState::new(
            AllocatorConfig::default(),
            Box::new(|_, _| {}),
            Box::new(|_, _| {}),
        )
    }

    fn bundle(s: &str) -> ResourceBundle {
        s.parse().unwrap()
    }

    fn add_agent(state: &mut AllocatorState, id: &str, total: &str) {
        state
            .add_agent(
                AgentId::new(id),
                format!("host-{id}"),
                None,
                bundle(total),
                HashMap::new(),
            )
            .unwrap();
    }

    fn add_framework(state: &mut AllocatorState, id: &str, role: &str) {
        state
            .add_framework(
                FrameworkId::new(id),
                FrameworkInfo::new(role),
                HashMap::new(),
                true,
            )
            .unwrap();
    }

    /// total(a) == available(a) + Σ allocated(a, f) for every agent.
    fn assert_accounting(state: &AllocatorState) {
        for (id, agent) in &state.agents {
            let mut rebuilt = agent.available();
            for allocation in agent.allocations.values() {
                rebuilt += &allocation.non_shared();
            }
            assert_eq!(rebuilt, agent.capacity(), "accounting broke on agent {id}");
        }
    }

    #[test]
    fn tracking_keeps_accounting_invariant() {
        let mut state = test_state();
        add_framework(&mut state, "f1", "role1");
        add_agent(&mut state, "a1", "cpus:4;mem:2048");

        state.track_allocation(
            &FrameworkId::new("f1"),
            &AgentId::new("a1"),
            &bundle("cpus:1;mem:512"),
        );
        assert_accounting(&state);

        state.untrack_allocation(
            &FrameworkId::new("f1"),
            &AgentId::new("a1"),
            &bundle("cpus:1;mem:512"),
        );
        assert_accounting(&state);
        assert!(state.frameworks[&FrameworkId::new("f1")]
            .allocations
            .is_empty());
    }

    #[test]
    fn add_remove_framework_restores_state() {
        let mut state = test_state();
        add_agent(&mut state, "a1", "cpus:4;mem:2048");

        let mut used = HashMap::new();
        used.insert(AgentId::new("a1"), bundle("cpus:2;mem:1024"));
        state
            .add_framework(
                FrameworkId::new("f1"),
                FrameworkInfo::new("role1"),
                used,
                true,
            )
            .unwrap();
        assert_accounting(&state);
        assert!(state.roles.contains_key("role1"));

        state.remove_framework(&FrameworkId::new("f1")).unwrap();
        assert_accounting(&state);
        assert_eq!(
            state.agents[&AgentId::new("a1")].available(),
            bundle("cpus:4;mem:2048")
        );
        // The frameworkless, quotaless role is gone.
        assert!(!state.roles.contains_key("role1"));
    }

    #[test]
    fn add_remove_agent_restores_state() {
        let mut state = test_state();
        add_framework(&mut state, "f1", "role1");

        let mut used = HashMap::new();
        used.insert(FrameworkId::new("f1"), bundle("cpus:2"));
        state
            .add_agent(
                AgentId::new("a1"),
                "host-a1".to_string(),
                None,
                bundle("cpus:4"),
                used,
            )
            .unwrap();
        assert_accounting(&state);

        state.remove_agent(&AgentId::new("a1")).unwrap();
        assert!(state.frameworks[&FrameworkId::new("f1")]
            .allocations
            .is_empty());
        assert_eq!(state.role_sorter.dominant_share("role1"), 0.0);
    }

    #[test]
    fn update_available_is_atomic() {
        let mut state = test_state();
        add_agent(&mut state, "a1", "cpus:2;mem:1024");

        let reserve_ok = Operation::Reserve(
            bundle("cpus:1").flatten("role1", ReservationKind::Static),
        );
        let reserve_too_much = Operation::Reserve(
            bundle("cpus:4").flatten("role1", ReservationKind::Static),
        );

        // Second operation fails; the first must not stick.
        let err = state
            .update_available(
                &AgentId::new("a1"),
                &[reserve_ok.clone(), reserve_too_much],
            )
            .unwrap_err();
        assert!(matches!(err, AllocatorError::InsufficientResources { .. }));
        assert_eq!(
            state.agents[&AgentId::new("a1")].total,
            bundle("cpus:2;mem:1024")
        );

        state
            .update_available(&AgentId::new("a1"), &[reserve_ok])
            .unwrap();
        assert!(state.agents[&AgentId::new("a1")]
            .total
            .contains(&bundle("cpus(role1):1")));
        assert_accounting(&state);
    }

    #[test]
    fn update_allocation_create_destroy_is_identity() {
        let mut state = test_state();
        add_framework(&mut state, "f1", "role1");
        add_agent(&mut state, "a1", "cpus:2;disk(role1):100");
        state.track_allocation(
            &FrameworkId::new("f1"),
            &AgentId::new("a1"),
            &bundle("cpus:2;disk(role1):100"),
        );

        let volume = ResourceBundle::from(
            Resource::scalar("disk", 50.0)
                .reserved_for("role1")
                .with_volume("v1"),
        );
        let before_total = state.agents[&AgentId::new("a1")].total.clone();

        state
            .update_allocation(
                &FrameworkId::new("f1"),
                &AgentId::new("a1"),
                &bundle("disk(role1):100"),
                &[Operation::Create(volume.clone())],
            )
            .unwrap();
        assert!(state.agents[&AgentId::new("a1")].total.contains(&volume));
        assert_accounting(&state);

        state
            .update_allocation(
                &FrameworkId::new("f1"),
                &AgentId::new("a1"),
                &(bundle("disk(role1):50") + &volume),
                &[Operation::Destroy(volume)],
            )
            .unwrap();
        assert_eq!(state.agents[&AgentId::new("a1")].total, before_total);
        assert_accounting(&state);
    }

    #[test]
    fn update_allocation_rejects_bad_operations() {
        let mut state = test_state();
        add_framework(&mut state, "f1", "role1");
        add_agent(&mut state, "a1", "cpus:2");
        state.track_allocation(
            &FrameworkId::new("f1"),
            &AgentId::new("a1"),
            &bundle("cpus:2"),
        );

        let volume = ResourceBundle::from(
            Resource::scalar("disk", 50.0)
                .reserved_for("role1")
                .with_volume("v1"),
        );
        let err = state
            .update_allocation(
                &FrameworkId::new("f1"),
                &AgentId::new("a1"),
                &bundle("cpus:2"),
                &[Operation::Create(volume)],
            )
            .unwrap_err();
        assert!(matches!(err, AllocatorError::InvalidOperation(_)));
        // Bookkeeping untouched.
        assert_eq!(state.agents[&AgentId::new("a1")].total, bundle("cpus:2"));
        assert_accounting(&state);
    }

    #[test]
    fn weight_only_role_persists_without_frameworks() {
        let mut state = test_state();
        state
            .update_weights(vec![("role1".to_string(), 2.0)])
            .unwrap();
        assert!(state.roles.contains_key("role1"));

        // Quota-less, frameworkless, default-weight roles do get dropped.
        state
            .update_weights(vec![("role1".to_string(), 1.0)])
            .unwrap();
        state.maybe_remove_role("role1");
        assert!(!state.roles.contains_key("role1"));
    }

    #[test]
    fn invalid_weights_are_dropped_whole() {
        let mut state = test_state();
        let err = state
            .update_weights(vec![
                ("role1".to_string(), 2.0),
                ("role2".to_string(), -1.0),
            ])
            .unwrap_err();
        assert!(matches!(err, AllocatorError::InvalidArgument(_)));
        assert!(!state.roles.contains_key("role1"));
    }

    #[test]
    fn quota_requires_plain_scalars() {
        let mut state = test_state();
        assert!(state.set_quota("role1", bundle("cpus:2;mem:1024")).is_ok());
        assert!(state
            .set_quota("role2", bundle("ports:[31000-32000]"))
            .is_err());
        assert!(state.set_quota("role3", bundle("cpus(role3):1")).is_err());
        assert!(state.set_quota("role4", ResourceBundle::new()).is_err());
    }

    #[test]
    fn quota_keeps_role_alive_without_frameworks() {
        let mut state = test_state();
        state.set_quota("role1", bundle("cpus:2")).unwrap();
        assert!(state.roles.contains_key("role1"));

        state.remove_quota("role1").unwrap();
        assert!(!state.roles.contains_key("role1"));
        assert!(matches!(
            state.remove_quota("role1"),
            Err(AllocatorError::UnknownRole(_))
        ));
    }

    #[test]
    fn operations_on_unknown_entities_fail() {
        let mut state = test_state();
        assert!(matches!(
            state.remove_agent(&AgentId::new("nope")),
            Err(AllocatorError::UnknownAgent(_))
        ));
        assert!(matches!(
            state.remove_framework(&FrameworkId::new("nope")),
            Err(AllocatorError::UnknownFramework(_))
        ));
        assert!(matches!(
            state.recover_resources(
                &FrameworkId::new("nope"),
                &AgentId::new("nope"),
                bundle("cpus:1"),
                None,
            ),
            Err(AllocatorError::UnknownFramework(_))
        ));
    }

    #[test]
    fn metrics_snapshot_reflects_cluster() {
        let mut state = test_state();
        add_framework(&mut state, "f1", "role1");
        add_agent(&mut state, "a1", "cpus:4;mem:2048");
        state.set_quota("role1", bundle("cpus:2")).unwrap();
        state.track_allocation(
            &FrameworkId::new("f1"),
            &AgentId::new("a1"),
            &bundle("cpus:2;mem:1024"),
        );

        let snapshot = state.metrics_snapshot();
        assert_eq!(snapshot.total["cpus"], 4.0);
        assert_eq!(snapshot.offered_or_allocated["mem"], 1024.0);
        assert!((snapshot.dominant_shares["role1"] - 0.5).abs() < 1e-9);
        assert_eq!(snapshot.quota["role1"].guarantee["cpus"], 2.0);
        assert_eq!(snapshot.quota["role1"].offered_or_allocated["cpus"], 2.0);
    }
}
