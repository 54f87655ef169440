//! Canonicalized resource multisets.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::{Deserialize, Serialize};

use crate::resource::{Reservation, ReservationKind, Resource};
use crate::value::Scalar;

/// A multiset of typed resources, kept sorted by identity with adjacent
/// entries merged.
///
/// Shared resources are idempotent under addition: one logical unit can
/// appear in multiple allocations simultaneously, so adding an
/// identity-equal shared entry is a no-op and subtraction removes the entry
/// entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBundle {
    resources: Vec<Resource>,
}

impl ResourceBundle {
    pub fn new() -> Self {
        ResourceBundle::default()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    /// Add one resource, preserving canonical form.
    pub fn push(&mut self, resource: Resource) {
        if resource.is_empty() {
            return;
        }
        match self
            .resources
            .binary_search_by(|r| r.cmp_identity(&resource))
        {
            Ok(index) => {
                // Shared resources are idempotent: the entry is already the
                // whole logical unit.
                if !resource.shared {
                    self.resources[index].value.merge(&resource.value);
                }
            }
            Err(index) => self.resources.insert(index, resource),
        }
    }

    /// Remove up to `resource`'s quantity; saturating, missing identities
    /// are ignored. A shared entry is removed outright.
    pub fn remove(&mut self, resource: &Resource) {
        if let Ok(index) = self
            .resources
            .binary_search_by(|r| r.cmp_identity(resource))
        {
            if resource.shared {
                self.resources.remove(index);
                return;
            }
            self.resources[index].value.remove(&resource.value);
            if self.resources[index].is_empty() {
                self.resources.remove(index);
            }
        }
    }

    /// True when this bundle covers every entry of `other`.
    pub fn contains(&self, other: &ResourceBundle) -> bool {
        other.resources.iter().all(|needed| {
            self.resources
                .binary_search_by(|r| r.cmp_identity(needed))
                .map(|index| self.resources[index].value.contains(&needed.value))
                .unwrap_or(false)
        })
    }

    /// Replace the reservation on every entry with a reservation to `role`.
    pub fn flatten(&self, role: impl Into<String>, kind: ReservationKind) -> ResourceBundle {
        let reservation = Reservation {
            role: role.into(),
            kind,
        };
        self.map_entries(|mut r| {
            r.reservation = Some(reservation.clone());
            r
        })
    }

    /// Strip all reservations, yielding the unreserved equivalent.
    pub fn to_unreserved(&self) -> ResourceBundle {
        self.map_entries(|mut r| {
            r.reservation = None;
            r
        })
    }

    pub fn unreserved(&self) -> ResourceBundle {
        self.filter(|r| r.is_unreserved())
    }

    pub fn reserved(&self, role: &str) -> ResourceBundle {
        self.filter(|r| r.role() == Some(role))
    }

    pub fn revocable(&self) -> ResourceBundle {
        self.filter(|r| r.revocable)
    }

    pub fn non_revocable(&self) -> ResourceBundle {
        self.filter(|r| !r.revocable)
    }

    pub fn shared(&self) -> ResourceBundle {
        self.filter(|r| r.shared)
    }

    pub fn non_shared(&self) -> ResourceBundle {
        self.filter(|r| !r.shared)
    }

    /// Entries satisfying `keep`, as a new bundle.
    pub fn filter(&self, keep: impl Fn(&Resource) -> bool) -> ResourceBundle {
        ResourceBundle {
            resources: self
                .resources
                .iter()
                .filter(|r| keep(r))
                .cloned()
                .collect(),
        }
    }

    fn map_entries(&self, f: impl Fn(Resource) -> Resource) -> ResourceBundle {
        let mut out = ResourceBundle::new();
        for r in &self.resources {
            out.push(f(r.clone()));
        }
        out
    }

    /// Total scalar quantity of entries named `name` (all identities).
    pub fn scalar(&self, name: &str) -> Scalar {
        self.resources
            .iter()
            .filter(|r| r.name == name)
            .map(Resource::scalar_quantity)
            .sum()
    }

    /// Aggregate scalar totals per resource name.
    pub fn scalar_totals(&self) -> BTreeMap<String, Scalar> {
        let mut totals = BTreeMap::new();
        for r in &self.resources {
            let quantity = r.scalar_quantity();
            if quantity.is_positive() {
                *totals.entry(r.name.clone()).or_insert(Scalar::ZERO) += quantity;
            }
        }
        totals
    }

    /// True when any entry carries the given name.
    pub fn has_name(&self, name: &str) -> bool {
        self.resources.iter().any(|r| r.name == name)
    }
}

impl From<Resource> for ResourceBundle {
    fn from(resource: Resource) -> Self {
        let mut bundle = ResourceBundle::new();
        bundle.push(resource);
        bundle
    }
}

impl FromIterator<Resource> for ResourceBundle {
    fn from_iter<I: IntoIterator<Item = Resource>>(iter: I) -> Self {
        let mut bundle = ResourceBundle::new();
        for r in iter {
            bundle.push(r);
        }
        bundle
    }
}

impl Add<&ResourceBundle> for ResourceBundle {
    type Output = ResourceBundle;

    fn add(mut self, other: &ResourceBundle) -> ResourceBundle {
        self += other;
        self
    }
}

impl AddAssign<&ResourceBundle> for ResourceBundle {
    fn add_assign(&mut self, other: &ResourceBundle) {
        for r in &other.resources {
            self.push(r.clone());
        }
    }
}

impl Sub<&ResourceBundle> for ResourceBundle {
    type Output = ResourceBundle;

    fn sub(mut self, other: &ResourceBundle) -> ResourceBundle {
        self -= other;
        self
    }
}

impl SubAssign<&ResourceBundle> for ResourceBundle {
    fn sub_assign(&mut self, other: &ResourceBundle) {
        for r in &other.resources {
            self.remove(r);
        }
    }
}

impl fmt::Display for ResourceBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.resources.is_empty() {
            return write!(f, "{{}}");
        }
        for (i, r) in self.resources.iter().enumerate() {
            if i > 0 {
                write!(f, ";")?;
            }
            write!(f, "{r}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(s: &str) -> ResourceBundle {
        s.parse().unwrap()
    }

    #[test]
    fn add_merges_identical_identity() {
        let mut b = bundle("cpus:1;mem:512");
        b += &bundle("cpus:0.5");
        assert_eq!(b, bundle("cpus:1.5;mem:512"));
    }

    #[test]
    fn add_keeps_distinct_reservations_separate() {
        let mut b = bundle("cpus:1");
        b += &bundle("cpus(role1):1");
        assert_eq!(b.scalar("cpus"), Scalar::from(2.0));
        assert_eq!(b.unreserved().scalar("cpus"), Scalar::from(1.0));
        assert_eq!(b.reserved("role1").scalar("cpus"), Scalar::from(1.0));
    }

    #[test]
    fn subtract_saturates_and_drops_empty() {
        let mut b = bundle("cpus:1;mem:512");
        b -= &bundle("cpus:2;mem:256");
        assert_eq!(b, bundle("mem:256"));
    }

    #[test]
    fn contains_respects_reservation_identity() {
        let b = bundle("cpus(role1):2;mem:1024");
        assert!(b.contains(&bundle("cpus(role1):1")));
        assert!(!b.contains(&bundle("cpus:1")));
        assert!(b.contains(&bundle("mem:1024")));
        assert!(!b.contains(&bundle("mem:1025")));
    }

    #[test]
    fn flatten_reserves_everything() {
        let b = bundle("cpus:1;mem:512").flatten("role1", ReservationKind::Static);
        assert_eq!(b, bundle("cpus(role1):1;mem(role1):512"));
        assert_eq!(b.to_unreserved(), bundle("cpus:1;mem:512"));
    }

    #[test]
    fn shared_addition_is_idempotent() {
        let volume = Resource::scalar("disk", 5.0)
            .reserved_for("role1")
            .with_volume("id1")
            .shared();

        let mut b = ResourceBundle::from(volume.clone());
        b.push(volume.clone());
        assert_eq!(b.scalar("disk"), Scalar::from(5.0));

        b.remove(&volume);
        assert!(b.is_empty());
    }

    #[test]
    fn revocable_views() {
        let b: ResourceBundle = [
            Resource::scalar("cpus", 2.0),
            Resource::scalar("cpus", 1.0).revocable(),
        ]
        .into_iter()
        .collect();
        assert_eq!(b.revocable().scalar("cpus"), Scalar::from(1.0));
        assert_eq!(b.non_revocable().scalar("cpus"), Scalar::from(2.0));
    }

    #[test]
    fn ranges_subtract_in_bundle() {
        let mut b = bundle("ports:[31000-32000]");
        b -= &bundle("ports:[31000-31499]");
        assert_eq!(b, bundle("ports:[31500-32000]"));
    }

    #[test]
    fn scalar_totals_aggregate_across_identities() {
        let b = bundle("cpus:1;cpus(role1):2;mem:512");
        let totals = b.scalar_totals();
        assert_eq!(totals["cpus"], Scalar::from(3.0));
        assert_eq!(totals["mem"], Scalar::from(512.0));
    }

    #[test]
    fn serde_round_trip_preserves_identity() {
        let b = bundle("cpus(role1):1.5;mem:512;ports:[31000-32000]")
            + &ResourceBundle::from(
                Resource::scalar("disk", 5.0)
                    .reserved_for("role1")
                    .with_volume("v1")
                    .shared(),
            );
        let json = serde_json::to_string(&b).unwrap();
        let back: ResourceBundle = serde_json::from_str(&json).unwrap();
        assert_eq!(back, b);
    }
}
