//! Driver-load assignment lifecycle
//!
//! The coordinator is the only writer of assignments and of load status.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              Assignment API              │
//! │  POST  /api/assignments                  │
//! │  GET   /api/assignments/{id}             │
//! │  PATCH /api/assignments/{id}/status      │
//! └──────────────────────────────────────────┘
//!                      │
//!                      ▼
//! ┌──────────────────────────────────────────┐
//! │          AssignmentCoordinator           │
//! │  preconditions · atomic write · effects  │
//! └──────────────────────────────────────────┘
//!        │            │           │        │
//!        ▼            ▼           ▼        ▼
//!   RecordStore   CacheStore  EventPublisher AuditSink
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use freightline::coordinator::{AssignmentCoordinator, CoordinatorServer, ServerConfig};
//!
//! let coordinator = AssignmentCoordinator::new(store, cache, events, audit);
//! let server = CoordinatorServer::new(ServerConfig::default(), coordinator)?;
//! server.start_with_shutdown(shutdown_signal()).await?;
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod server;
pub mod service;

// Re-export main types
pub use config::{ConfigError, ServerConfig};
pub use error::{CoordinatorError, CoordinatorResult};
pub use server::{AppState, CoordinatorServer};
pub use service::AssignmentCoordinator;
