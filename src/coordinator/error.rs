//! Errors returned by the assignment coordinator

use thiserror::Error;

use crate::error::{ErrorCategory, FreightlineErrorTrait};
use crate::models::ValidationError;
use crate::storage::{StoreError, ACTIVE_ASSIGNMENT_CONSTRAINT};

pub const LOAD_NOT_OPEN: &str = "load not open";
pub const DRIVER_ALREADY_ACTIVE: &str = "driver already active";
pub const ONLY_ACTIVE_UPDATABLE: &str = "only active assignments can be updated";

/// Outcome of a rejected or failed coordinator operation
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Referenced driver, load or assignment does not exist
    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    /// Target record is in a state that forbids the operation
    #[error("{reason}")]
    InvalidState { reason: String },

    /// The one-active-assignment-per-driver rule rejected the operation
    #[error("{reason}")]
    Conflict { reason: String },

    /// Malformed request
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// The store failed; nothing was committed
    #[error("transaction failed: {0}")]
    Transaction(#[source] StoreError),
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

impl CoordinatorError {
    pub fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }

    /// Map a failed `assign` write.
    ///
    /// Only the active-assignment index becomes a conflict; any other unique
    /// violation stays a store failure.
    pub(crate) fn from_assign(err: StoreError) -> Self {
        if err.is_unique_violation_of(ACTIVE_ASSIGNMENT_CONSTRAINT) {
            return Self::conflict(DRIVER_ALREADY_ACTIVE);
        }
        match err {
            StoreError::StaleState { .. } => Self::invalid_state(LOAD_NOT_OPEN),
            StoreError::Missing { entity, .. } => Self::not_found(entity),
            other => Self::Transaction(other),
        }
    }

    /// Map a failed `transition` write
    pub(crate) fn from_transition(err: StoreError) -> Self {
        match err {
            StoreError::StaleState { .. } => Self::invalid_state(ONLY_ACTIVE_UPDATABLE),
            StoreError::Missing { entity, .. } => Self::not_found(entity),
            other => Self::Transaction(other),
        }
    }
}

impl From<StoreError> for CoordinatorError {
    fn from(err: StoreError) -> Self {
        Self::Transaction(err)
    }
}

impl FreightlineErrorTrait for CoordinatorError {
    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Transaction(_))
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::InvalidState { .. } => ErrorCategory::InvalidState,
            Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Transaction(_) => ErrorCategory::Storage,
        }
    }
}
