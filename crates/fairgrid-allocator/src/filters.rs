//! Offer filters — timed suppression of re-offers after a decline.

use std::collections::HashMap;

use tokio::time::Instant;
use tracing::debug;

use fairgrid_resources::ResourceBundle;

use crate::ids::{AgentId, FrameworkId};

/// One declined bundle with its expiry conditions.
#[derive(Debug)]
struct OfferFilter {
    resources: ResourceBundle,
    deadline: Instant,
    /// Completed allocation runs at install time. The filter may only be
    /// dropped after a further run has completed, so a timeout shorter than
    /// the allocation interval still suppresses the very next run.
    installed_at_run: u64,
}

impl OfferFilter {
    fn expired(&self, now: Instant, completed_runs: u64) -> bool {
        now >= self.deadline && completed_runs > self.installed_at_run
    }
}

/// All active filters, keyed by (framework, agent), insertion-ordered.
#[derive(Debug, Default)]
pub(crate) struct OfferFilterSet {
    filters: HashMap<(FrameworkId, AgentId), Vec<OfferFilter>>,
}

impl OfferFilterSet {
    pub fn new() -> Self {
        OfferFilterSet::default()
    }

    pub fn insert(
        &mut self,
        framework: &FrameworkId,
        agent: &AgentId,
        resources: ResourceBundle,
        deadline: Instant,
        completed_runs: u64,
    ) {
        debug!(%framework, %agent, %resources, "installed offer filter");
        self.filters
            .entry((framework.clone(), agent.clone()))
            .or_default()
            .push(OfferFilter {
                resources,
                deadline,
                installed_at_run: completed_runs,
            });
    }

    /// True when an active filter covers `candidate`. Expired filters are
    /// removed lazily here.
    pub fn filtered(
        &mut self,
        framework: &FrameworkId,
        agent: &AgentId,
        candidate: &ResourceBundle,
        now: Instant,
        completed_runs: u64,
    ) -> bool {
        let key = (framework.clone(), agent.clone());
        let Some(filters) = self.filters.get_mut(&key) else {
            return false;
        };
        filters.retain(|f| !f.expired(now, completed_runs));
        if filters.is_empty() {
            self.filters.remove(&key);
            return false;
        }
        filters.iter().any(|f| f.resources.contains(candidate))
    }

    /// Drop every filter belonging to `framework` (offer revival).
    pub fn remove_framework(&mut self, framework: &FrameworkId) {
        self.filters.retain(|(f, _), _| f != framework);
    }

    /// Drop every filter referencing `agent` (agent removal).
    pub fn remove_agent(&mut self, agent: &AgentId) {
        self.filters.retain(|(_, a), _| a != agent);
    }

    /// Active filter count for the frameworks passed in (metrics).
    pub fn count_for(&self, framework: &FrameworkId) -> u64 {
        self.filters
            .iter()
            .filter(|((f, _), _)| f == framework)
            .map(|(_, v)| v.len() as u64)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn bundle(s: &str) -> ResourceBundle {
        s.parse().unwrap()
    }

    fn ids() -> (FrameworkId, AgentId) {
        (FrameworkId::new("f1"), AgentId::new("a1"))
    }

    #[test]
    fn filter_suppresses_contained_bundles() {
        let (f, a) = ids();
        let now = Instant::now();
        let mut set = OfferFilterSet::new();
        set.insert(&f, &a, bundle("cpus:2;mem:1024"), now + Duration::from_secs(5), 0);

        assert!(set.filtered(&f, &a, &bundle("cpus:1"), now, 0));
        assert!(set.filtered(&f, &a, &bundle("cpus:2;mem:1024"), now, 0));
        // Larger than the declined bundle: not covered.
        assert!(!set.filtered(&f, &a, &bundle("cpus:3"), now, 0));
        // Different framework/agent pair: untouched.
        assert!(!set.filtered(&FrameworkId::new("f2"), &a, &bundle("cpus:1"), now, 0));
    }

    #[test]
    fn expiry_needs_timeout_and_a_completed_run() {
        let (f, a) = ids();
        let now = Instant::now();
        let mut set = OfferFilterSet::new();
        set.insert(&f, &a, bundle("cpus:1"), now + Duration::from_secs(1), 3);

        let later = now + Duration::from_secs(2);
        // Past the deadline but no run has completed since install.
        assert!(set.filtered(&f, &a, &bundle("cpus:1"), later, 3));
        // Deadline passed and a run completed: dropped.
        assert!(!set.filtered(&f, &a, &bundle("cpus:1"), later, 4));
    }

    #[test]
    fn run_alone_does_not_expire() {
        let (f, a) = ids();
        let now = Instant::now();
        let mut set = OfferFilterSet::new();
        set.insert(&f, &a, bundle("cpus:1"), now + Duration::from_secs(60), 0);

        assert!(set.filtered(&f, &a, &bundle("cpus:1"), now, 10));
    }

    #[test]
    fn remove_framework_clears_all_agents() {
        let (f, a) = ids();
        let now = Instant::now();
        let mut set = OfferFilterSet::new();
        set.insert(&f, &a, bundle("cpus:1"), now + Duration::from_secs(60), 0);
        set.insert(&f, &AgentId::new("a2"), bundle("cpus:1"), now + Duration::from_secs(60), 0);
        assert_eq!(set.count_for(&f), 2);

        set.remove_framework(&f);
        assert_eq!(set.count_for(&f), 0);
        assert!(!set.filtered(&f, &a, &bundle("cpus:1"), now, 0));
    }
}
