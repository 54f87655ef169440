//! fairgrid-resources — the resource algebra underneath the allocator.
//!
//! Resources are typed multisets: each entry has a name (`cpus`, `mem`,
//! `disk`, `ports`, `gpus`, …), a scalar/range/set value, and a set of
//! identity-bearing markers — reservation, revocability, shared flag,
//! persistent-volume identity. Entries with identical identity add
//! quantitatively; entries that differ in any identity field coexist.
//!
//! # Architecture
//!
//! ```text
//! Scalar / Ranges / Value     fixed-point and interval arithmetic
//! Resource                    one typed entry with identity markers
//! ResourceBundle              canonicalized multiset with algebra ops
//! Operation / apply()         RESERVE / UNRESERVE / CREATE / DESTROY / LAUNCH
//! "cpus:2;mem(role):512"      compact parse form used by tests and fixtures
//! ```

mod bundle;
mod error;
mod operation;
mod parse;
mod resource;
mod value;

pub use bundle::ResourceBundle;
pub use error::{ResourceError, ResourceResult};
pub use operation::Operation;
pub use resource::{Reservation, ReservationKind, Resource, Volume};
pub use value::{Ranges, Scalar, Value};
