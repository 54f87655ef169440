//! Scalar, range, and set values.
//!
//! Scalars use fixed-point arithmetic with three decimal digits so that
//! repeated add/subtract round-trips exactly — `0.1 + 0.2` of cpu must
//! equal `0.3`, not `0.30000000000000004`.

use std::collections::BTreeSet;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// A fixed-point scalar quantity with millis (1/1000) precision.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Scalar(i64);

impl Scalar {
    pub const ZERO: Scalar = Scalar(0);

    /// Construct from raw thousandths.
    pub const fn from_millis(millis: i64) -> Self {
        Scalar(millis)
    }

    /// The raw value in thousandths.
    pub const fn millis(self) -> i64 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// `max(0, self - other)` — subtraction that never goes negative.
    pub fn saturating_sub(self, other: Scalar) -> Scalar {
        Scalar((self.0 - other.0).max(0))
    }

    pub fn min(self, other: Scalar) -> Scalar {
        Scalar(self.0.min(other.0))
    }

    pub fn max(self, other: Scalar) -> Scalar {
        Scalar(self.0.max(other.0))
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        // Round to nearest millis; the original system truncates excess
        // precision the same way.
        Scalar((v * 1000.0).round() as i64)
    }
}

impl Add for Scalar {
    type Output = Scalar;

    fn add(self, other: Scalar) -> Scalar {
        Scalar(self.0 + other.0)
    }
}

impl AddAssign for Scalar {
    fn add_assign(&mut self, other: Scalar) {
        self.0 += other.0;
    }
}

impl Sub for Scalar {
    type Output = Scalar;

    fn sub(self, other: Scalar) -> Scalar {
        Scalar(self.0 - other.0)
    }
}

impl SubAssign for Scalar {
    fn sub_assign(&mut self, other: Scalar) {
        self.0 -= other.0;
    }
}

impl Sum for Scalar {
    fn sum<I: Iterator<Item = Scalar>>(iter: I) -> Scalar {
        iter.fold(Scalar::ZERO, |acc, s| acc + s)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 1000 == 0 {
            write!(f, "{}", self.0 / 1000)
        } else {
            let s = format!("{:.3}", self.as_f64());
            write!(f, "{}", s.trim_end_matches('0'))
        }
    }
}

/// A canonical set of inclusive `u64` intervals, sorted, non-overlapping,
/// and non-adjacent. Used for `ports`-style resources.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ranges(Vec<(u64, u64)>);

impl Ranges {
    /// Build a canonical range set; overlapping and adjacent intervals merge,
    /// intervals with `end < start` are dropped.
    pub fn new(intervals: impl IntoIterator<Item = (u64, u64)>) -> Self {
        let mut sorted: Vec<(u64, u64)> = intervals
            .into_iter()
            .filter(|(start, end)| end >= start)
            .collect();
        sorted.sort_unstable();

        let mut merged: Vec<(u64, u64)> = Vec::with_capacity(sorted.len());
        for (start, end) in sorted {
            match merged.last_mut() {
                // Adjacent or overlapping: extend the previous interval.
                Some((_, prev_end)) if start <= prev_end.saturating_add(1) => {
                    *prev_end = (*prev_end).max(end);
                }
                _ => merged.push((start, end)),
            }
        }
        Ranges(merged)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total number of contained values.
    pub fn len(&self) -> u64 {
        self.0.iter().map(|(start, end)| end - start + 1).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.0.iter().copied()
    }

    pub fn union(&self, other: &Ranges) -> Ranges {
        Ranges::new(self.iter().chain(other.iter()))
    }

    /// Remove every value of `other` from `self`.
    pub fn subtract(&self, other: &Ranges) -> Ranges {
        let mut result: Vec<(u64, u64)> = Vec::with_capacity(self.0.len());
        for &(start, end) in &self.0 {
            let mut pieces = vec![(start, end)];
            for &(sub_start, sub_end) in &other.0 {
                let mut next = Vec::with_capacity(pieces.len());
                for (s, e) in pieces {
                    if sub_end < s || sub_start > e {
                        next.push((s, e));
                        continue;
                    }
                    if sub_start > s {
                        next.push((s, sub_start - 1));
                    }
                    if sub_end < e {
                        next.push((sub_end + 1, e));
                    }
                }
                pieces = next;
            }
            result.extend(pieces);
        }
        Ranges::new(result)
    }

    /// True when every value of `other` is contained in `self`.
    pub fn contains(&self, other: &Ranges) -> bool {
        other
            .iter()
            .all(|(start, end)| self.iter().any(|(s, e)| s <= start && end <= e))
    }
}

impl fmt::Display for Ranges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (start, end)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{start}-{end}")?;
        }
        write!(f, "]")
    }
}

/// The quantity of a resource: scalar, ranges, or a set of items.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Value {
    Scalar(Scalar),
    Ranges(Ranges),
    Set(BTreeSet<String>),
}

impl Value {
    /// Discriminant used in identity comparison: two entries only merge when
    /// their values are of the same kind.
    pub(crate) fn kind(&self) -> u8 {
        match self {
            Value::Scalar(_) => 0,
            Value::Ranges(_) => 1,
            Value::Set(_) => 2,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Value::Scalar(s) => !s.is_positive(),
            Value::Ranges(r) => r.is_empty(),
            Value::Set(s) => s.is_empty(),
        }
    }

    /// Merge `other` into `self`. Caller guarantees matching kinds.
    pub(crate) fn merge(&mut self, other: &Value) {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => *a += *b,
            (Value::Ranges(a), Value::Ranges(b)) => *a = a.union(b),
            (Value::Set(a), Value::Set(b)) => a.extend(b.iter().cloned()),
            _ => {}
        }
    }

    /// Remove `other` from `self`; scalar subtraction saturates at zero.
    pub(crate) fn remove(&mut self, other: &Value) {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => *a = a.saturating_sub(*b),
            (Value::Ranges(a), Value::Ranges(b)) => *a = a.subtract(b),
            (Value::Set(a), Value::Set(b)) => {
                for item in b {
                    a.remove(item);
                }
            }
            _ => {}
        }
    }

    pub(crate) fn contains(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => a >= b,
            (Value::Ranges(a), Value::Ranges(b)) => a.contains(b),
            (Value::Set(a), Value::Set(b)) => b.is_subset(a),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(s) => write!(f, "{s}"),
            Value::Ranges(r) => write!(f, "{r}"),
            Value::Set(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_fixed_point_addition() {
        let a = Scalar::from(0.1);
        let b = Scalar::from(0.2);
        assert_eq!(a + b, Scalar::from(0.3));
    }

    #[test]
    fn scalar_saturating_sub_never_negative() {
        let a = Scalar::from(1.0);
        let b = Scalar::from(2.5);
        assert_eq!(a.saturating_sub(b), Scalar::ZERO);
        assert_eq!(b.saturating_sub(a), Scalar::from(1.5));
    }

    #[test]
    fn scalar_display_trims_zeros() {
        assert_eq!(Scalar::from(2.0).to_string(), "2");
        assert_eq!(Scalar::from(0.5).to_string(), "0.5");
        assert_eq!(Scalar::from(1.25).to_string(), "1.25");
    }

    #[test]
    fn ranges_canonicalize_merges_adjacent() {
        let r = Ranges::new([(1, 5), (6, 10), (20, 30), (25, 40)]);
        assert_eq!(r, Ranges::new([(1, 10), (20, 40)]));
        assert_eq!(r.len(), 31);
    }

    #[test]
    fn ranges_subtract_splits_intervals() {
        let r = Ranges::new([(1, 100)]);
        let s = r.subtract(&Ranges::new([(10, 20), (50, 60)]));
        assert_eq!(s, Ranges::new([(1, 9), (21, 49), (61, 100)]));
    }

    #[test]
    fn ranges_containment() {
        let r = Ranges::new([(31000, 32000)]);
        assert!(r.contains(&Ranges::new([(31100, 31200)])));
        assert!(!r.contains(&Ranges::new([(31900, 32100)])));
    }
}
