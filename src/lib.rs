//! freightline - driver-load assignment lifecycle service
//!
//! Binds drivers to freight loads, enforces one active assignment per driver,
//! and propagates each committed change to a cache, an event stream and an
//! audit trail.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`models`] - Drivers, loads, assignments and request types
//! - [`storage`] - Relational record store (PostgreSQL, in-memory)
//! - [`cache`] - Load listing cache (Redis, in-memory)
//! - [`events`] - Event notifier over Redis Streams
//! - [`audit`] - Append-only audit trail
//! - [`coordinator`] - Assignment lifecycle coordinator and HTTP API
//! - [`worker`] - Consumer recording assignment events in the audit trail
//! - [`metrics`] - Prometheus counters
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use freightline::audit::MemoryAuditSink;
//! use freightline::cache::MemoryCache;
//! use freightline::coordinator::AssignmentCoordinator;
//! use freightline::events::MemoryEventBus;
//! use freightline::storage::MemoryRecordStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let coordinator = AssignmentCoordinator::new(
//!         Arc::new(MemoryRecordStore::new()),
//!         Arc::new(MemoryCache::new()),
//!         Arc::new(MemoryEventBus::new()),
//!         Arc::new(MemoryAuditSink::new()),
//!     );
//!     let _ = coordinator.find_one(uuid::Uuid::new_v4()).await;
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod metrics;
pub mod models;
pub mod storage;
pub mod worker;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::coordinator::{AssignmentCoordinator, CoordinatorError, CoordinatorServer};
    pub use crate::error::{ErrorCategory, FreightlineErrorTrait};
    pub use crate::models::{
        Assignment, AssignmentDetails, AssignmentStatus, Driver, DriverStatus, Load, LoadStatus,
    };
    pub use crate::storage::{MemoryRecordStore, PgRecordStore, RecordStore};
}

// Direct re-exports for convenience
pub use models::{Assignment, AssignmentStatus, Driver, Load, LoadStatus};
