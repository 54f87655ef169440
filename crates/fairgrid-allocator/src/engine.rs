//! The two-stage allocation pass.
//!
//! One run walks the eligible agents in ascending id order. For each agent
//! the role and per-role framework sorters are re-sorted, so "ascending
//! weighted dominant share" holds at every decision point — that is what
//! interleaves offers across agents and realizes the configured weights.
//!
//! Stage 1 serves roles with unsatisfied quota; stage 2 serves everyone,
//! laying away whatever unreserved capacity the remaining quota guarantees
//! still need. Commits are coarse-grained: a framework takes the whole
//! per-agent slice visible to it, or nothing.

use std::collections::{BTreeMap, HashMap};

use tokio::time::Instant;
use tracing::debug;

use fairgrid_resources::{ResourceBundle, Scalar};

use crate::agent::Agent;
use crate::core::AllocatorState;
use crate::ids::{AgentId, FrameworkId};

type Offers = HashMap<FrameworkId, BTreeMap<AgentId, ResourceBundle>>;

impl AllocatorState {
    /// Perform one allocation run and deliver the resulting offers.
    pub(crate) fn allocate(&mut self) {
        let started = std::time::Instant::now();
        let now = Instant::now();

        let eligible: Vec<AgentId> = self
            .agents
            .iter()
            .filter(|(_, agent)| self.agent_eligible(agent, now))
            .map(|(id, _)| id.clone())
            .collect();

        let mut offers = Offers::new();
        self.quota_stage(&eligible, now, &mut offers);
        self.fair_share_stage(&eligible, now, &mut offers);

        let frameworks_offered = offers.len();
        for (framework_id, agent_offers) in offers {
            debug!(
                framework = %framework_id,
                agents = agent_offers.len(),
                "delivering offers"
            );
            (self.offer_cb)(framework_id, agent_offers);
        }

        self.metrics.record_run(started.elapsed());
        debug!(
            run = self.metrics.allocation_runs,
            agents = eligible.len(),
            frameworks_offered,
            "allocation run complete"
        );
    }

    /// Stage 1: each agent goes to the neediest quota role first.
    fn quota_stage(&mut self, agents: &[AgentId], now: Instant, offers: &mut Offers) {
        for agent_id in agents {
            let roles = self.role_sorter.sort();
            for role in roles {
                if !self.quota.has_unsatisfied(&role) {
                    continue;
                }
                let framework_names = match self.roles.get_mut(&role) {
                    Some(role_state) => role_state.sorter.sort(),
                    None => continue,
                };
                for name in framework_names {
                    let framework_id = FrameworkId::new(name);
                    let Some(slice) = self.candidate_slice(&framework_id, agent_id, now) else {
                        continue;
                    };
                    // The slice must actually move the guarantee forward.
                    if !self.reduces_quota(&role, &slice) {
                        continue;
                    }
                    self.commit(&framework_id, agent_id, slice, offers);
                    // The role's visible share of this agent is gone;
                    // remaining roles still see their own reservations.
                    break;
                }
            }
        }
    }

    /// Stage 2: fair share over every role, protecting quota headroom.
    fn fair_share_stage(&mut self, agents: &[AgentId], now: Instant, offers: &mut Offers) {
        // Unreserved, non-revocable capacity still unallocated across the
        // eligible agents — the pool quota guarantees draw from.
        let mut available_headroom: BTreeMap<String, Scalar> = BTreeMap::new();
        for agent_id in agents {
            if let Some(agent) = self.agents.get(agent_id) {
                let free = agent.available().unreserved().non_revocable();
                for (name, quantity) in free.scalar_totals() {
                    *available_headroom.entry(name).or_insert(Scalar::ZERO) += quantity;
                }
            }
        }

        for agent_id in agents {
            let roles = self.role_sorter.sort();
            for role in roles {
                let framework_names = match self.roles.get_mut(&role) {
                    Some(role_state) => role_state.sorter.sort(),
                    None => continue,
                };
                for name in framework_names {
                    let framework_id = FrameworkId::new(name);
                    let Some(mut slice) = self.candidate_slice(&framework_id, agent_id, now) else {
                        continue;
                    };

                    // Roles with no unsatisfied quota may not eat into the
                    // headroom other roles' guarantees still need. Lay-away
                    // strips the whole unreserved non-revocable portion;
                    // reservations to this role are never laid away.
                    if !self.quota.has_unsatisfied(&role) {
                        let required = self.quota.required_headroom();
                        if !required.is_empty() {
                            let unreserved = slice.unreserved().non_revocable();
                            let violates =
                                unreserved.scalar_totals().iter().any(|(name, quantity)| {
                                    let available = available_headroom
                                        .get(name)
                                        .copied()
                                        .unwrap_or(Scalar::ZERO);
                                    let needed =
                                        required.get(name).copied().unwrap_or(Scalar::ZERO);
                                    available.saturating_sub(*quantity) < needed
                                });
                            if violates {
                                slice -= &unreserved;
                                if !self.config.is_allocatable(&slice) {
                                    continue;
                                }
                                // The reduced slice may match a filter the
                                // full slice did not.
                                let runs = self.metrics.allocation_runs;
                                if self
                                    .filters
                                    .filtered(&framework_id, agent_id, &slice, now, runs)
                                {
                                    continue;
                                }
                            }
                        }
                    }

                    let committed = slice.clone();
                    self.commit(&framework_id, agent_id, slice, offers);
                    for (name, quantity) in
                        committed.unreserved().non_revocable().scalar_totals()
                    {
                        if let Some(headroom) = available_headroom.get_mut(&name) {
                            *headroom = headroom.saturating_sub(quantity);
                        }
                    }
                    break;
                }
            }
        }
    }

    /// The slice of an agent a framework may be offered right now, or
    /// `None` when gating, filters, or the allocatability minimum rule it
    /// out. Both stages share this one rule; only the framework's
    /// capabilities decide what it sees.
    fn candidate_slice(
        &mut self,
        framework_id: &FrameworkId,
        agent_id: &AgentId,
        now: Instant,
    ) -> Option<ResourceBundle> {
        let framework = self.frameworks.get(framework_id)?;
        let agent = self.agents.get(agent_id)?;

        // Agents with gpus are kept whole for gpu-capable frameworks.
        if !framework.capabilities.gpu_resources && agent.capacity().has_name("gpus") {
            return None;
        }

        let available = agent.available();
        let mut slice = available.reserved(&framework.role) + &available.unreserved();
        if !framework.capabilities.revocable_resources {
            slice = slice.non_revocable();
        }
        if !framework.capabilities.shared_resources {
            slice = slice.non_shared();
        }
        if slice.is_empty() {
            return None;
        }

        let runs = self.metrics.allocation_runs;
        if self.filters.filtered(framework_id, agent_id, &slice, now, runs) {
            return None;
        }
        if !self.config.is_allocatable(&slice) {
            return None;
        }
        Some(slice)
    }

    /// Does the slice contain anything that counts toward the role's
    /// unsatisfied guarantee? Revocable and fairness-excluded kinds never
    /// charge, so they cannot reduce it.
    fn reduces_quota(&self, role: &str, slice: &ResourceBundle) -> bool {
        let unsatisfied = self.quota.unsatisfied(role);
        slice
            .non_revocable()
            .scalar_totals()
            .iter()
            .any(|(name, quantity)| {
                quantity.is_positive()
                    && !self.config.fairness_excluded.contains(name.as_str())
                    && unsatisfied.contains_key(name)
            })
    }

    fn commit(
        &mut self,
        framework_id: &FrameworkId,
        agent_id: &AgentId,
        slice: ResourceBundle,
        offers: &mut Offers,
    ) {
        debug!(
            framework = %framework_id,
            agent = %agent_id,
            resources = %slice,
            "allocated slice"
        );
        self.track_allocation(framework_id, agent_id, &slice);
        let entry = offers
            .entry(framework_id.clone())
            .or_default()
            .entry(agent_id.clone())
            .or_default();
        *entry += &slice;
    }

    fn agent_eligible(&self, agent: &Agent, now: Instant) -> bool {
        if let Some(whitelist) = &self.whitelist {
            if !whitelist.contains(&agent.hostname) {
                return false;
            }
        }
        if let Some(window) = &agent.unavailability {
            if window.has_started(now) {
                return false;
            }
        }
        true
    }
}
