//! Quota bookkeeping.
//!
//! Per role: a scalar guarantee and a running charged-toward-quota counter.
//! Revocable resources and fairness-excluded kinds are never charged. A
//! guarantee persists even when the role has no frameworks, and its
//! unsatisfied remainder is laid away by the fair-share stage.

use std::collections::{BTreeMap, HashSet};

use fairgrid_resources::{ResourceBundle, Scalar};

type ScalarMap = BTreeMap<String, Scalar>;

#[derive(Debug, Default)]
pub(crate) struct QuotaTracker {
    guarantees: BTreeMap<String, ScalarMap>,
    charged: BTreeMap<String, ScalarMap>,
    /// Resource names excluded from fairness, and with it from charging.
    excluded: HashSet<String>,
}

impl QuotaTracker {
    pub fn new(excluded: HashSet<String>) -> Self {
        QuotaTracker {
            excluded,
            ..QuotaTracker::default()
        }
    }

    pub fn set_guarantee(&mut self, role: &str, guarantee: ScalarMap) {
        self.guarantees.insert(role.to_string(), guarantee);
    }

    pub fn remove_guarantee(&mut self, role: &str) {
        self.guarantees.remove(role);
    }

    pub fn has_guarantee(&self, role: &str) -> bool {
        self.guarantees.contains_key(role)
    }

    pub fn guarantee(&self, role: &str) -> Option<&ScalarMap> {
        self.guarantees.get(role)
    }

    pub fn charged(&self, role: &str) -> ScalarMap {
        self.charged.get(role).cloned().unwrap_or_default()
    }

    /// Charge a new allocation for `role`. Only the non-revocable,
    /// non-excluded portion reserved to the role or unreserved counts.
    pub fn charge(&mut self, role: &str, resources: &ResourceBundle) {
        let counted = self.countable(role, resources);
        let entry = self.charged.entry(role.to_string()).or_default();
        for (name, quantity) in counted.scalar_totals() {
            *entry.entry(name).or_insert(Scalar::ZERO) += quantity;
        }
    }

    /// Reverse a charge when an allocation is recovered.
    pub fn uncharge(&mut self, role: &str, resources: &ResourceBundle) {
        let counted = self.countable(role, resources);
        if let Some(entry) = self.charged.get_mut(role) {
            for (name, quantity) in counted.scalar_totals() {
                if let Some(current) = entry.get_mut(&name) {
                    *current = current.saturating_sub(quantity);
                    if current.is_zero() {
                        entry.remove(&name);
                    }
                }
            }
            if entry.is_empty() {
                self.charged.remove(role);
            }
        }
    }

    fn countable(&self, role: &str, resources: &ResourceBundle) -> ResourceBundle {
        resources.non_revocable().filter(|r| {
            !self.excluded.contains(&r.name)
                && r.role().map_or(true, |reserved_to| reserved_to == role)
        })
    }

    /// Per-kind remainder still owed to `role`'s guarantee.
    pub fn unsatisfied(&self, role: &str) -> ScalarMap {
        let Some(guarantee) = self.guarantees.get(role) else {
            return ScalarMap::new();
        };
        let charged = self.charged.get(role);
        guarantee
            .iter()
            .filter_map(|(name, wanted)| {
                let have = charged
                    .and_then(|c| c.get(name))
                    .copied()
                    .unwrap_or(Scalar::ZERO);
                let missing = wanted.saturating_sub(have);
                missing.is_positive().then(|| (name.clone(), missing))
            })
            .collect()
    }

    pub fn has_unsatisfied(&self, role: &str) -> bool {
        !self.unsatisfied(role).is_empty()
    }

    /// Sum of unsatisfied quota across all roles — the pool the fair-share
    /// stage must keep reachable.
    pub fn required_headroom(&self) -> ScalarMap {
        let mut headroom = ScalarMap::new();
        for role in self.guarantees.keys() {
            for (name, missing) in self.unsatisfied(role) {
                *headroom.entry(name).or_insert(Scalar::ZERO) += missing;
            }
        }
        headroom
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.guarantees.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fairgrid_resources::Resource;

    fn guarantee(s: &str) -> ScalarMap {
        s.parse::<ResourceBundle>().unwrap().scalar_totals()
    }

    fn bundle(s: &str) -> ResourceBundle {
        s.parse().unwrap()
    }

    #[test]
    fn unsatisfied_shrinks_with_charges() {
        let mut quota = QuotaTracker::new(HashSet::new());
        quota.set_guarantee("role1", guarantee("cpus:2;mem:1024"));

        assert_eq!(quota.unsatisfied("role1"), guarantee("cpus:2;mem:1024"));

        quota.charge("role1", &bundle("cpus:1;mem:512"));
        assert_eq!(quota.unsatisfied("role1"), guarantee("cpus:1;mem:512"));

        quota.charge("role1", &bundle("cpus:1;mem:512"));
        assert!(!quota.has_unsatisfied("role1"));
    }

    #[test]
    fn overshoot_does_not_go_negative() {
        let mut quota = QuotaTracker::new(HashSet::new());
        quota.set_guarantee("role1", guarantee("cpus:0.5;mem:200"));

        // Coarse-grained allocation can exceed the guarantee.
        quota.charge("role1", &bundle("cpus:1;mem:512"));
        assert!(!quota.has_unsatisfied("role1"));
        assert!(quota.required_headroom().is_empty());
    }

    #[test]
    fn revocable_is_never_charged() {
        let mut quota = QuotaTracker::new(HashSet::new());
        quota.set_guarantee("role1", guarantee("cpus:2"));

        let revocable = ResourceBundle::from(Resource::scalar("cpus", 2.0).revocable());
        quota.charge("role1", &revocable);
        assert_eq!(quota.unsatisfied("role1"), guarantee("cpus:2"));
    }

    #[test]
    fn excluded_kinds_are_never_charged() {
        let mut quota = QuotaTracker::new(["gpus".to_string()].into_iter().collect());
        quota.set_guarantee("role1", guarantee("cpus:2"));

        quota.charge("role1", &bundle("cpus:1;gpus:4"));
        assert_eq!(quota.charged("role1"), guarantee("cpus:1"));
        assert_eq!(quota.unsatisfied("role1"), guarantee("cpus:1"));

        // Uncharging is symmetric: the excluded kind never moved.
        quota.uncharge("role1", &bundle("cpus:1;gpus:4"));
        assert_eq!(quota.unsatisfied("role1"), guarantee("cpus:2"));
    }

    #[test]
    fn other_role_reservations_do_not_count() {
        let mut quota = QuotaTracker::new(HashSet::new());
        quota.set_guarantee("role1", guarantee("cpus:2"));

        quota.charge("role1", &bundle("cpus(role2):2"));
        assert_eq!(quota.unsatisfied("role1"), guarantee("cpus:2"));

        quota.charge("role1", &bundle("cpus(role1):2"));
        assert!(!quota.has_unsatisfied("role1"));
    }

    #[test]
    fn uncharge_restores_the_debt() {
        let mut quota = QuotaTracker::new(HashSet::new());
        quota.set_guarantee("role1", guarantee("cpus:2"));

        quota.charge("role1", &bundle("cpus:2"));
        quota.uncharge("role1", &bundle("cpus:2"));
        assert_eq!(quota.unsatisfied("role1"), guarantee("cpus:2"));
    }

    #[test]
    fn headroom_sums_across_roles() {
        let mut quota = QuotaTracker::new(HashSet::new());
        quota.set_guarantee("role1", guarantee("cpus:2;mem:1024"));
        quota.set_guarantee("role2", guarantee("cpus:1"));

        let headroom = quota.required_headroom();
        assert_eq!(headroom, guarantee("cpus:3;mem:1024"));
    }

    #[test]
    fn guarantee_outlives_charges() {
        let mut quota = QuotaTracker::new(HashSet::new());
        quota.set_guarantee("role1", guarantee("cpus:2"));
        quota.remove_guarantee("role1");

        assert!(!quota.has_guarantee("role1"));
        assert!(quota.required_headroom().is_empty());
    }
}
