//! Repository abstraction over the relational record store
//!
//! The assignment coordinator talks to storage only through [`RecordStore`],
//! which keeps the business rules independent of the backend:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  AssignmentCoordinator                      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     RecordStore trait                       │
//! │   point lookups · first-match query · atomic transitions    │
//! └─────────────────────────────────────────────────────────────┘
//!                  │                               │
//!                  ▼                               ▼
//!        ┌─────────────────┐             ┌─────────────────┐
//!        │   PostgreSQL    │             │    In-memory    │
//!        │ Implementation  │             │ Implementation  │
//!        └─────────────────┘             └─────────────────┘
//! ```
//!
//! Both writes of an operation (assignment row + load status) happen inside
//! one call so that a backend can run them in a single transaction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Assignment, AssignmentDetails, AssignmentStatus, Driver, Load, LoadStatus};

/// Name of the partial unique index allowing one `ASSIGNED` row per driver
pub const ACTIVE_ASSIGNMENT_CONSTRAINT: &str = "uq_assignments_active_driver";

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a record store
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write
    #[error("unique constraint '{constraint}' violated")]
    UniqueViolation { constraint: String },

    /// The row changed state between the read and the guarded write
    #[error("{entity} {id} is no longer in the expected state")]
    StaleState { entity: &'static str, id: Uuid },

    /// A row the transaction depends on does not exist
    #[error("{entity} {id} does not exist")]
    Missing { entity: &'static str, id: Uuid },

    /// Backend query failure
    #[error("database error: {0}")]
    Database(#[source] tokio_postgres::Error),

    /// Could not check out a pooled connection
    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// Backend not reachable
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be decoded
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// True when the write was rejected by the given uniqueness constraint
    pub fn is_unique_violation_of(&self, name: &str) -> bool {
        matches!(self, Self::UniqueViolation { constraint } if constraint == name)
    }
}

/// Relational storage for drivers, loads and assignments
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Get driver by ID
    async fn get_driver(&self, id: Uuid) -> StoreResult<Option<Driver>>;

    /// Get load by ID
    async fn get_load(&self, id: Uuid) -> StoreResult<Option<Load>>;

    /// Get assignment by ID
    async fn get_assignment(&self, id: Uuid) -> StoreResult<Option<Assignment>>;

    /// Get assignment joined with its driver and load
    async fn get_assignment_details(&self, id: Uuid) -> StoreResult<Option<AssignmentDetails>>;

    /// First assignment for a driver in the given status
    async fn find_assignment_by_driver(
        &self,
        driver_id: Uuid,
        status: AssignmentStatus,
    ) -> StoreResult<Option<Assignment>>;

    /// Atomically insert `assignment` and move its load from `OPEN` to `ASSIGNED`.
    ///
    /// Fails with [`StoreError::UniqueViolation`] when the driver already holds
    /// an active assignment and [`StoreError::StaleState`] when the load is no
    /// longer open. Nothing is written on failure.
    async fn assign(&self, assignment: &Assignment) -> StoreResult<Assignment>;

    /// Atomically move an `ASSIGNED` assignment to `target` and its load to the
    /// matching status.
    ///
    /// Fails with [`StoreError::StaleState`] when the assignment is no longer
    /// active. Nothing is written on failure.
    async fn transition(
        &self,
        assignment_id: Uuid,
        target: AssignmentStatus,
    ) -> StoreResult<Assignment>;
}

/// Thread-safe shared store handle
pub type SharedRecordStore = Arc<dyn RecordStore>;

// ============================================================================
// In-memory Implementation
// ============================================================================

#[derive(Default)]
struct Tables {
    drivers: HashMap<Uuid, Driver>,
    loads: HashMap<Uuid, Load>,
    assignments: HashMap<Uuid, Assignment>,
}

/// In-memory implementation of [`RecordStore`]
///
/// Every transition holds the write lock for its whole duration, which gives
/// the same all-or-nothing visibility as a database transaction. The
/// one-active-assignment-per-driver rule is enforced on insert, mirroring the
/// partial unique index of the PostgreSQL schema.
#[derive(Default)]
pub struct MemoryRecordStore {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a driver
    pub fn insert_driver(&self, driver: Driver) {
        self.write().drivers.insert(driver.id, driver);
    }

    /// Insert or replace a load
    pub fn insert_load(&self, load: Load) {
        self.write().loads.insert(load.id, load);
    }

    /// Snapshot of all assignments
    pub fn assignments(&self) -> Vec<Assignment> {
        self.read().assignments.values().cloned().collect()
    }

    /// Number of active assignments held by a driver
    pub fn active_count(&self, driver_id: Uuid) -> usize {
        self.read()
            .assignments
            .values()
            .filter(|a| a.driver_id == driver_id && a.is_active())
            .count()
    }

    /// Make every call fail as if the backend were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make only the transactional writes fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store disabled".to_string()));
        }
        Ok(())
    }

    fn check_writable(&self) -> StoreResult<()> {
        self.check_available()?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("transaction aborted".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get_driver(&self, id: Uuid) -> StoreResult<Option<Driver>> {
        self.check_available()?;
        Ok(self.read().drivers.get(&id).cloned())
    }

    async fn get_load(&self, id: Uuid) -> StoreResult<Option<Load>> {
        self.check_available()?;
        Ok(self.read().loads.get(&id).cloned())
    }

    async fn get_assignment(&self, id: Uuid) -> StoreResult<Option<Assignment>> {
        self.check_available()?;
        Ok(self.read().assignments.get(&id).cloned())
    }

    async fn get_assignment_details(&self, id: Uuid) -> StoreResult<Option<AssignmentDetails>> {
        self.check_available()?;
        let tables = self.read();

        let Some(assignment) = tables.assignments.get(&id) else {
            return Ok(None);
        };
        let driver = tables
            .drivers
            .get(&assignment.driver_id)
            .cloned()
            .ok_or(StoreError::Missing {
                entity: "driver",
                id: assignment.driver_id,
            })?;
        let load = tables
            .loads
            .get(&assignment.load_id)
            .cloned()
            .ok_or(StoreError::Missing {
                entity: "load",
                id: assignment.load_id,
            })?;

        Ok(Some(AssignmentDetails {
            assignment: assignment.clone(),
            driver,
            load,
        }))
    }

    async fn find_assignment_by_driver(
        &self,
        driver_id: Uuid,
        status: AssignmentStatus,
    ) -> StoreResult<Option<Assignment>> {
        self.check_available()?;
        Ok(self
            .read()
            .assignments
            .values()
            .find(|a| a.driver_id == driver_id && a.status == status)
            .cloned())
    }

    async fn assign(&self, assignment: &Assignment) -> StoreResult<Assignment> {
        self.check_writable()?;
        let mut tables = self.write();

        if !tables.drivers.contains_key(&assignment.driver_id) {
            return Err(StoreError::Missing {
                entity: "driver",
                id: assignment.driver_id,
            });
        }

        if assignment.is_active()
            && tables
                .assignments
                .values()
                .any(|a| a.driver_id == assignment.driver_id && a.is_active())
        {
            return Err(StoreError::UniqueViolation {
                constraint: ACTIVE_ASSIGNMENT_CONSTRAINT.to_string(),
            });
        }

        let load = tables
            .loads
            .get_mut(&assignment.load_id)
            .ok_or(StoreError::Missing {
                entity: "load",
                id: assignment.load_id,
            })?;
        if load.status != LoadStatus::Open {
            return Err(StoreError::StaleState {
                entity: "load",
                id: assignment.load_id,
            });
        }

        load.status = LoadStatus::Assigned;
        load.updated_at = Utc::now();
        tables
            .assignments
            .insert(assignment.id, assignment.clone());

        Ok(assignment.clone())
    }

    async fn transition(
        &self,
        assignment_id: Uuid,
        target: AssignmentStatus,
    ) -> StoreResult<Assignment> {
        self.check_writable()?;
        let mut tables = self.write();

        let current = tables
            .assignments
            .get(&assignment_id)
            .cloned()
            .ok_or(StoreError::Missing {
                entity: "assignment",
                id: assignment_id,
            })?;
        if !current.status.can_transition_to(target) {
            return Err(StoreError::StaleState {
                entity: "assignment",
                id: assignment_id,
            });
        }

        // Validate the load before touching anything so a failure leaves both rows intact
        let load = tables
            .loads
            .get_mut(&current.load_id)
            .ok_or(StoreError::Missing {
                entity: "load",
                id: current.load_id,
            })?;
        load.status = target.load_status();
        load.updated_at = Utc::now();

        let updated = Assignment {
            status: target,
            ..current
        };
        tables.assignments.insert(assignment_id, updated.clone());

        Ok(updated)
    }
}
