//! fairgrid-allocator — the hierarchical DRF allocator core.
//!
//! A single logical actor owns all allocator state: agents, frameworks,
//! roles, quota, offer filters, and the DRF sorters. Every mutation is
//! submitted through the [`Allocator`] handle, serialized onto one queue,
//! and drained by an [`AllocatorWorker`]. Allocation-triggering events
//! coalesce into a single run; each run walks the agents in two stages
//! (quota first, then fair share) and emits offers through the bound
//! callbacks.
//!
//! # Architecture
//!
//! ```text
//! Allocator (handle)
//!   └── mpsc queue ──► AllocatorWorker::run()
//!                        ├── AllocatorState       registries + sorters + quota
//!                        ├── allocate()           two-stage pass over agents
//!                        ├── OfferFilterSet       per-(framework, agent) declines
//!                        └── MetricsSnapshot      counters, gauges, run latency
//! ```
//!
//! The worker never re-enters itself: offer callbacks run synchronously
//! inside a handler and may only enqueue further operations.

mod agent;
mod config;
mod core;
mod engine;
mod error;
mod filters;
mod framework;
mod handle;
mod ids;
mod metrics;
mod quota;
mod worker;

pub use agent::{Unavailability, UnavailableResources};
pub use config::AllocatorConfig;
pub use error::{AllocatorError, AllocatorResult};
pub use framework::{Capabilities, FrameworkInfo};
pub use handle::{Allocator, InverseOfferCallback, OfferCallback};
pub use ids::{AgentId, FrameworkId};
pub use metrics::{LatencyStats, MetricsSnapshot, QuotaMetrics};
pub use worker::AllocatorWorker;
