//! The DRF sorter.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use fairgrid_resources::{ResourceBundle, Scalar};

/// Per-client state tracked by the sorter.
#[derive(Debug)]
struct Client {
    weight: f64,
    active: bool,
    /// Allocation bundles keyed by agent id.
    allocations: HashMap<String, ResourceBundle>,
    /// Tie-break sequence; lower sorts first among equal shares.
    seq: u64,
}

/// Orders clients by weighted dominant share.
///
/// The dominant share of a client is its largest relative share of any
/// tracked resource kind (`allocation_k / cluster_total_k`), divided by the
/// client's weight. A configured set of resource names is excluded from the
/// `max` but still tracked in the allocation.
#[derive(Debug, Default)]
pub struct DrfSorter {
    clients: HashMap<String, Client>,
    /// Cluster capacity per agent; the per-kind totals derive from this.
    agent_totals: HashMap<String, ResourceBundle>,
    /// Resource names excluded from fairness.
    excluded: HashSet<String>,
    next_seq: u64,
}

impl DrfSorter {
    pub fn new(excluded: HashSet<String>) -> Self {
        DrfSorter {
            excluded,
            ..DrfSorter::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn contains(&self, client: &str) -> bool {
        self.clients.contains_key(client)
    }

    /// Register a client. New clients start active.
    pub fn add(&mut self, client: &str, weight: f64) {
        if self.clients.contains_key(client) {
            debug!(%client, "sorter add: client already present");
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.clients.insert(
            client.to_string(),
            Client {
                weight,
                active: true,
                allocations: HashMap::new(),
                seq,
            },
        );
    }

    pub fn remove(&mut self, client: &str) {
        if self.clients.remove(client).is_none() {
            debug!(%client, "sorter remove: unknown client");
        }
    }

    pub fn activate(&mut self, client: &str) {
        self.set_active(client, true);
    }

    pub fn deactivate(&mut self, client: &str) {
        self.set_active(client, false);
    }

    fn set_active(&mut self, client: &str, active: bool) {
        match self.clients.get_mut(client) {
            Some(c) => c.active = active,
            None => debug!(%client, active, "sorter activate: unknown client"),
        }
    }

    pub fn update_weight(&mut self, client: &str, weight: f64) {
        match self.clients.get_mut(client) {
            Some(c) => c.weight = weight,
            None => debug!(%client, "sorter update_weight: unknown client"),
        }
    }

    /// Record resources allocated to `client` on `agent`.
    pub fn allocated(&mut self, client: &str, agent: &str, resources: &ResourceBundle) {
        match self.clients.get_mut(client) {
            Some(c) => {
                *c.allocations.entry(agent.to_string()).or_default() += resources;
            }
            None => debug!(%client, %agent, "sorter allocated: unknown client"),
        }
    }

    /// Record resources returned by `client` on `agent`.
    pub fn unallocated(&mut self, client: &str, agent: &str, resources: &ResourceBundle) {
        match self.clients.get_mut(client) {
            Some(c) => {
                if let Some(entry) = c.allocations.get_mut(agent) {
                    *entry -= resources;
                    if entry.is_empty() {
                        c.allocations.remove(agent);
                    }
                }
            }
            None => debug!(%client, %agent, "sorter unallocated: unknown client"),
        }
    }

    /// Substitute one allocation for another (RESERVE / CREATE application).
    pub fn update_allocation(
        &mut self,
        client: &str,
        agent: &str,
        old: &ResourceBundle,
        new: &ResourceBundle,
    ) {
        self.unallocated(client, agent, old);
        self.allocated(client, agent, new);
    }

    /// Announce an agent's total capacity; an empty bundle removes it.
    pub fn update_total(&mut self, agent: &str, total: ResourceBundle) {
        if total.is_empty() {
            self.agent_totals.remove(agent);
        } else {
            self.agent_totals.insert(agent.to_string(), total);
        }
    }

    /// Cluster scalar capacity per resource name.
    fn cluster_totals(&self) -> BTreeMap<String, Scalar> {
        let mut totals: BTreeMap<String, Scalar> = BTreeMap::new();
        for bundle in self.agent_totals.values() {
            for (name, quantity) in bundle.scalar_totals() {
                *totals.entry(name).or_insert(Scalar::ZERO) += quantity;
            }
        }
        totals
    }

    /// Weighted dominant share of one client, against current cluster totals.
    pub fn dominant_share(&self, client: &str) -> f64 {
        let totals = self.cluster_totals();
        self.clients
            .get(client)
            .map(|c| self.share_of(c, &totals))
            .unwrap_or(0.0)
    }

    fn share_of(&self, client: &Client, totals: &BTreeMap<String, Scalar>) -> f64 {
        let mut allocated: BTreeMap<String, Scalar> = BTreeMap::new();
        for bundle in client.allocations.values() {
            for (name, quantity) in bundle.scalar_totals() {
                *allocated.entry(name).or_insert(Scalar::ZERO) += quantity;
            }
        }

        let mut dominant: f64 = 0.0;
        for (name, quantity) in &allocated {
            if self.excluded.contains(name.as_str()) {
                continue;
            }
            let total = totals.get(name).copied().unwrap_or(Scalar::ZERO);
            if total.is_positive() {
                dominant = dominant.max(quantity.as_f64() / total.as_f64());
            }
        }
        dominant / client.weight
    }

    /// Active clients in ascending weighted-dominant-share order.
    ///
    /// Ties are broken by sequence number, and the head of every tied group
    /// is re-sequenced behind the group, so equal-share clients alternate
    /// first position across successive calls.
    pub fn sort(&mut self) -> Vec<String> {
        let totals = self.cluster_totals();
        let mut entries: Vec<(f64, u64, String)> = self
            .clients
            .iter()
            .filter(|(_, c)| c.active)
            .map(|(name, c)| (self.share_of(c, &totals), c.seq, name.clone()))
            .collect();

        entries.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        // Rotate each tied group: its current head goes to the back of the
        // group on the next sort.
        let mut i = 0;
        while i < entries.len() {
            let mut j = i + 1;
            while j < entries.len() && entries[j].0 == entries[i].0 {
                j += 1;
            }
            if j - i > 1 {
                let head = &entries[i].2;
                if let Some(c) = self.clients.get_mut(head) {
                    c.seq = self.next_seq;
                    self.next_seq += 1;
                }
            }
            i = j;
        }

        entries.into_iter().map(|(_, _, name)| name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(s: &str) -> ResourceBundle {
        s.parse().unwrap()
    }

    fn sorter_with_total(total: &str) -> DrfSorter {
        let mut sorter = DrfSorter::new(HashSet::new());
        sorter.update_total("agent1", bundle(total));
        sorter
    }

    #[test]
    fn orders_by_dominant_share() {
        let mut sorter = sorter_with_total("cpus:8;mem:4096");
        sorter.add("a", 1.0);
        sorter.add("b", 1.0);

        // a: cpus share 0.5; b: mem share 0.25.
        sorter.allocated("a", "agent1", &bundle("cpus:4;mem:512"));
        sorter.allocated("b", "agent1", &bundle("cpus:1;mem:1024"));

        assert_eq!(sorter.sort(), vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn weight_divides_share() {
        let mut sorter = sorter_with_total("cpus:4");
        sorter.add("a", 1.0);
        sorter.add("b", 2.0);

        // Equal raw shares; b's weight halves its effective share.
        sorter.allocated("a", "agent1", &bundle("cpus:2"));
        sorter.allocated("b", "agent1", &bundle("cpus:2"));

        assert_eq!(sorter.sort(), vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn excluded_kinds_do_not_affect_ordering() {
        let mut sorter = DrfSorter::new(["gpus".to_string()].into_iter().collect());
        sorter.update_total("agent1", bundle("cpus:4;gpus:2"));
        sorter.add("a", 1.0);
        sorter.add("b", 1.0);

        // a holds all gpus but gpus are excluded from fairness.
        sorter.allocated("a", "agent1", &bundle("gpus:2"));
        sorter.allocated("b", "agent1", &bundle("cpus:1"));

        assert_eq!(sorter.sort(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn tied_clients_alternate_first_position() {
        let mut sorter = sorter_with_total("cpus:4");
        sorter.add("a", 1.0);
        sorter.add("b", 1.0);

        let mut first_counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..10 {
            let order = sorter.sort();
            *first_counts.entry(order[0].clone()).or_default() += 1;
        }
        assert_eq!(first_counts["a"], 5);
        assert_eq!(first_counts["b"], 5);
    }

    #[test]
    fn deactivated_clients_are_skipped() {
        let mut sorter = sorter_with_total("cpus:4");
        sorter.add("a", 1.0);
        sorter.add("b", 1.0);

        sorter.deactivate("a");
        assert_eq!(sorter.sort(), vec!["b".to_string()]);

        sorter.activate("a");
        assert_eq!(sorter.sort().len(), 2);
    }

    #[test]
    fn unallocated_restores_share() {
        let mut sorter = sorter_with_total("cpus:4");
        sorter.add("a", 1.0);
        sorter.add("b", 1.0);

        sorter.allocated("a", "agent1", &bundle("cpus:4"));
        assert_eq!(sorter.sort()[0], "b");

        sorter.unallocated("a", "agent1", &bundle("cpus:4"));
        assert_eq!(sorter.dominant_share("a"), 0.0);
    }

    #[test]
    fn update_total_changes_shares() {
        let mut sorter = sorter_with_total("cpus:4");
        sorter.add("a", 1.0);
        sorter.allocated("a", "agent1", &bundle("cpus:2"));
        assert!((sorter.dominant_share("a") - 0.5).abs() < 1e-9);

        sorter.update_total("agent2", bundle("cpus:4"));
        assert!((sorter.dominant_share("a") - 0.25).abs() < 1e-9);

        // Removing the second agent restores the old share.
        sorter.update_total("agent2", ResourceBundle::new());
        assert!((sorter.dominant_share("a") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn update_allocation_substitutes() {
        let mut sorter = sorter_with_total("cpus:4;disk:100");
        sorter.add("a", 1.0);
        sorter.allocated("a", "agent1", &bundle("disk:50"));

        let reserved = bundle("disk:50").flatten(
            "role1",
            fairgrid_resources::ReservationKind::Static,
        );
        sorter.update_allocation("a", "agent1", &bundle("disk:50"), &reserved);

        // Share is unchanged; the allocation identity is what moved.
        assert!((sorter.dominant_share("a") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn zero_total_kinds_contribute_no_share() {
        let mut sorter = sorter_with_total("cpus:4");
        sorter.add("a", 1.0);
        // mem has no cluster capacity; only cpus counts.
        sorter.allocated("a", "agent1", &bundle("cpus:1;mem:512"));
        assert!((sorter.dominant_share("a") - 0.25).abs() < 1e-9);
    }
}
