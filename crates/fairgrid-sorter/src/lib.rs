//! fairgrid-sorter — Dominant Resource Fairness ordering.
//!
//! A [`DrfSorter`] maintains a set of clients (opaque string keys — roles at
//! the top level, framework ids within a role) with their allocations and
//! weights, and yields the active ones in ascending order of weighted
//! dominant share. Equal-share clients alternate first position across
//! successive sorts.

mod sorter;

pub use sorter::DrfSorter;
