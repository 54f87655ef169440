//! A single typed resource entry and its identity-bearing markers.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::{Ranges, Scalar, Value};

/// How a reservation was made.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ReservationKind {
    /// Set on the agent at registration time.
    Static,
    /// Made at runtime via a RESERVE operation.
    Dynamic {
        principal: Option<String>,
        labels: BTreeMap<String, String>,
    },
}

/// A reservation ties a resource to a role.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Reservation {
    pub role: String,
    pub kind: ReservationKind,
}

impl Reservation {
    pub fn static_for(role: impl Into<String>) -> Self {
        Reservation {
            role: role.into(),
            kind: ReservationKind::Static,
        }
    }

    pub fn dynamic_for(role: impl Into<String>, principal: Option<&str>) -> Self {
        Reservation {
            role: role.into(),
            kind: ReservationKind::Dynamic {
                principal: principal.map(str::to_string),
                labels: BTreeMap::new(),
            },
        }
    }
}

/// Persistent-volume identity on a `disk` resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
    pub principal: Option<String>,
}

/// One typed resource entry.
///
/// Every field except the quantity inside `value` is identity-bearing: two
/// entries merge quantitatively only when all other fields match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub value: Value,
    pub reservation: Option<Reservation>,
    pub revocable: bool,
    pub shared: bool,
    pub volume: Option<Volume>,
}

impl Resource {
    pub fn scalar(name: impl Into<String>, amount: f64) -> Self {
        Resource {
            name: name.into(),
            value: Value::Scalar(Scalar::from(amount)),
            reservation: None,
            revocable: false,
            shared: false,
            volume: None,
        }
    }

    pub fn ranges(name: impl Into<String>, intervals: impl IntoIterator<Item = (u64, u64)>) -> Self {
        Resource {
            name: name.into(),
            value: Value::Ranges(Ranges::new(intervals)),
            reservation: None,
            revocable: false,
            shared: false,
            volume: None,
        }
    }

    pub fn set<S: Into<String>>(name: impl Into<String>, items: impl IntoIterator<Item = S>) -> Self {
        Resource {
            name: name.into(),
            value: Value::Set(items.into_iter().map(Into::into).collect::<BTreeSet<_>>()),
            reservation: None,
            revocable: false,
            shared: false,
            volume: None,
        }
    }

    /// Statically reserve this resource for `role`.
    pub fn reserved_for(mut self, role: impl Into<String>) -> Self {
        self.reservation = Some(Reservation::static_for(role));
        self
    }

    /// Dynamically reserve this resource for `role`.
    pub fn dynamically_reserved(mut self, role: impl Into<String>, principal: Option<&str>) -> Self {
        self.reservation = Some(Reservation::dynamic_for(role, principal));
        self
    }

    pub fn revocable(mut self) -> Self {
        self.revocable = true;
        self
    }

    pub fn shared(mut self) -> Self {
        self.shared = true;
        self
    }

    pub fn with_volume(mut self, id: impl Into<String>) -> Self {
        self.volume = Some(Volume {
            id: id.into(),
            principal: None,
        });
        self
    }

    /// The role this resource is reserved to, if any.
    pub fn role(&self) -> Option<&str> {
        self.reservation.as_ref().map(|r| r.role.as_str())
    }

    pub fn is_unreserved(&self) -> bool {
        self.reservation.is_none()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// The scalar quantity, or zero for non-scalar values.
    pub fn scalar_quantity(&self) -> Scalar {
        match &self.value {
            Value::Scalar(s) => *s,
            _ => Scalar::ZERO,
        }
    }

    /// True when every identity-bearing field matches (quantity excluded).
    pub fn same_identity(&self, other: &Resource) -> bool {
        self.name == other.name
            && self.value.kind() == other.value.kind()
            && self.reservation == other.reservation
            && self.revocable == other.revocable
            && self.shared == other.shared
            && self.volume == other.volume
    }

    /// Total order on identity fields, used to keep bundles canonical.
    pub(crate) fn cmp_identity(&self, other: &Resource) -> std::cmp::Ordering {
        (
            &self.name,
            self.value.kind(),
            &self.reservation,
            self.revocable,
            self.shared,
            &self.volume,
        )
            .cmp(&(
                &other.name,
                other.value.kind(),
                &other.reservation,
                other.revocable,
                other.shared,
                &other.volume,
            ))
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(reservation) = &self.reservation {
            write!(f, "({})", reservation.role)?;
        }
        if let Some(volume) = &self.volume {
            write!(f, "[{}]", volume.id)?;
        }
        write!(f, ":{}", self.value)?;
        if self.revocable {
            write!(f, "{{REV}}")?;
        }
        if self.shared {
            write!(f, "<shared>")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_distinguishes_reservation() {
        let unreserved = Resource::scalar("cpus", 2.0);
        let reserved = Resource::scalar("cpus", 2.0).reserved_for("role1");
        assert!(!unreserved.same_identity(&reserved));
        assert!(unreserved.same_identity(&Resource::scalar("cpus", 5.0)));
    }

    #[test]
    fn identity_distinguishes_revocable_and_shared() {
        let plain = Resource::scalar("cpus", 1.0);
        assert!(!plain.same_identity(&Resource::scalar("cpus", 1.0).revocable()));
        assert!(!plain.same_identity(&Resource::scalar("cpus", 1.0).shared()));
    }

    #[test]
    fn display_round_trips_role() {
        let r = Resource::scalar("disk", 100.0).reserved_for("role1");
        assert_eq!(r.to_string(), "disk(role1):100");
    }
}
