//! Error types for allocator operations.

use thiserror::Error;

use crate::ids::{AgentId, FrameworkId};

/// Result type alias for allocator operations.
pub type AllocatorResult<T> = Result<T, AllocatorError>;

/// Errors surfaced by the allocator core.
///
/// Fire-and-forget operations log and drop their errors; only
/// `update_available` and the metrics snapshot report back to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocatorError {
    /// A malformed operation (negative weight, non-scalar quota, …).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `update_available` operations do not fit the agent's free pool.
    #[error("insufficient available resources on agent {agent}: {detail}")]
    InsufficientResources { agent: AgentId, detail: String },

    /// An offer operation does not apply to the stated resources.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("unknown agent: {0}")]
    UnknownAgent(AgentId),

    #[error("unknown framework: {0}")]
    UnknownFramework(FrameworkId),

    #[error("unknown role: {0}")]
    UnknownRole(String),

    /// The worker is gone; the operation was not submitted.
    #[error("allocator worker shut down")]
    Shutdown,
}
