//! Error classification shared across the freightline crate
//!
//! Each subsystem owns its error enum ([`CoordinatorError`], [`StoreError`],
//! [`EventError`], [`AuditError`]). Errors that reach a caller implement
//! [`FreightlineErrorTrait`] so the API, logs and metrics can treat them by
//! [`ErrorCategory`] instead of by concrete type.
//!
//! # Usage
//!
//! ```rust,ignore
//! use freightline::error::FreightlineErrorTrait;
//!
//! match coordinator.create(driver_id, load_id).await {
//!     Err(e) if e.is_recoverable() => retry_later(),
//!     Err(e) => eprintln!("Rejected ({}): {}", e.category().as_str(), e),
//!     Ok(assignment) => println!("{}", assignment.id),
//! }
//! ```

// Re-export domain-specific errors for convenience
pub use crate::audit::AuditError;
pub use crate::coordinator::CoordinatorError;
pub use crate::events::EventError;
pub use crate::models::ValidationError;
pub use crate::storage::StoreError;

/// Common trait for errors surfaced to callers
pub trait FreightlineErrorTrait: std::error::Error {
    /// Check if this error is recoverable (the whole request can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Caller supplied malformed input
    Validation,
    /// Referenced record does not exist
    NotFound,
    /// Record is in a state that forbids the operation
    InvalidState,
    /// Exclusivity rule rejected the operation
    Conflict,
    /// Relational store failures
    Storage,
}

impl ErrorCategory {
    /// Short label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::InvalidState => "invalid_state",
            Self::Conflict => "conflict",
            Self::Storage => "storage",
        }
    }

    /// Whether the caller is at fault
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Storage)
    }
}
