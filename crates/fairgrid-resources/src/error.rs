//! Error types for the resource algebra.

use thiserror::Error;

/// Result type alias for resource operations.
pub type ResourceResult<T> = Result<T, ResourceError>;

/// Errors that can occur when manipulating resource bundles.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// An offer operation does not apply to the bundle it was given.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A compact resource string could not be parsed.
    #[error("failed to parse resources: {0}")]
    Parse(String),
}
