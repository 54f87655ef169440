//! Allocator configuration.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use fairgrid_resources::{ResourceBundle, Scalar};

/// Tunables for the allocator core.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// Period of the batch allocation tick.
    pub allocation_interval: Duration,
    /// Minimum cpus for a per-agent slice to be worth offering.
    pub min_allocatable_cpus: f64,
    /// Minimum mem (MB) for a per-agent slice to be worth offering.
    pub min_allocatable_mem: f64,
    /// Resource names excluded from dominant-share fairness.
    pub fairness_excluded: HashSet<String>,
    /// Role weights applied at startup; further changes via update_weights.
    pub initial_weights: HashMap<String, f64>,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        AllocatorConfig {
            allocation_interval: Duration::from_secs(1),
            min_allocatable_cpus: 0.01,
            min_allocatable_mem: 32.0,
            fairness_excluded: HashSet::new(),
            initial_weights: HashMap::new(),
        }
    }
}

impl AllocatorConfig {
    /// The allocatability predicate, applied per agent per role slice.
    pub fn is_allocatable(&self, bundle: &ResourceBundle) -> bool {
        bundle.scalar("cpus") >= Scalar::from(self.min_allocatable_cpus)
            || bundle.scalar("mem") >= Scalar::from(self.min_allocatable_mem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocatable_needs_min_cpus_or_mem() {
        let config = AllocatorConfig::default();

        assert!(config.is_allocatable(&"cpus:0.01".parse().unwrap()));
        assert!(config.is_allocatable(&"mem:32".parse().unwrap()));
        assert!(config.is_allocatable(&"cpus:1;mem:1".parse().unwrap()));

        assert!(!config.is_allocatable(&"cpus:0.005;mem:16".parse().unwrap()));
        assert!(!config.is_allocatable(&"disk:1000".parse().unwrap()));
        assert!(!config.is_allocatable(&ResourceBundle::new()));
    }
}
