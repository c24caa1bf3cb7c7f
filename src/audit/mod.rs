//! Append-only audit trail
//!
//! Business events are written to their own `audit_events` table through a
//! dedicated pool, never inside the record store transaction. Nothing in the
//! service reads the trail back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::models::{Assignment, AssignmentCreatedEvent};

/// Event type recorded by the worker for each assignment-created message
pub const ASSIGNED_EVENT_TYPE: &str = "ASSIGNED";

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS audit_events (
        id BIGSERIAL PRIMARY KEY,
        event_type TEXT NOT NULL,
        driver_id UUID,
        load_id UUID,
        payload JSONB NOT NULL DEFAULT '{}'::jsonb,
        timestamp TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );

    CREATE INDEX IF NOT EXISTS idx_audit_events_type_time
        ON audit_events(event_type, timestamp DESC);
"#;

/// Audit sink errors
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("audit pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

/// Audit trail configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Connection string for the audit database; the record store's when unset
    pub database_url: Option<String>,
}

impl AuditConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("AUDIT_DATABASE_URL").ok(),
        }
    }

    /// Audit database URL, falling back to the record store
    pub fn url<'a>(&'a self, database: &'a DatabaseConfig) -> &'a str {
        self.database_url.as_deref().unwrap_or(&database.url)
    }
}

/// One business event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub event_type: String,
    pub driver_id: Option<Uuid>,
    pub load_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// Event for an assignment that just reached a terminal status.
    ///
    /// Returns `None` for a non-terminal assignment.
    pub fn transition(assignment: &Assignment) -> Option<Self> {
        let event_type = assignment.status.audit_event_type()?;
        Some(Self {
            event_type: event_type.to_string(),
            driver_id: Some(assignment.driver_id),
            load_id: Some(assignment.load_id),
            payload: serde_json::json!({
                "assignmentId": assignment.id,
                "newStatus": assignment.status,
            }),
            timestamp: Utc::now(),
        })
    }

    /// Event recorded when an assignment-created message is consumed
    pub fn assigned(event: &AssignmentCreatedEvent) -> Self {
        Self {
            event_type: ASSIGNED_EVENT_TYPE.to_string(),
            driver_id: Some(event.driver.id),
            load_id: Some(event.load.id),
            payload: serde_json::to_value(event).unwrap_or(serde_json::Value::Null),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only sink for audit events
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

pub type SharedAuditSink = Arc<dyn AuditSink>;

/// PostgreSQL audit recorder
#[derive(Clone)]
pub struct PgAuditRecorder {
    pool: Pool,
}

impl PgAuditRecorder {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Open a dedicated pool for the audit database
    pub fn connect(config: &AuditConfig, database: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = crate::storage::pool_for_url(config.url(database), database)
            .context("Failed to create audit pool")?;
        Ok(Self::new(pool))
    }

    /// Create the audit table if it does not exist
    pub async fn init_schema(&self) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .batch_execute(SCHEMA)
            .await
            .context("Failed to create audit schema")?;
        tracing::info!("Audit schema initialized");
        Ok(())
    }
}

#[async_trait]
impl AuditSink for PgAuditRecorder {
    async fn append(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO audit_events (event_type, driver_id, load_id, payload, timestamp)
                 VALUES ($1, $2, $3, $4, $5)",
                &[
                    &event.event_type,
                    &event.driver_id,
                    &event.load_id,
                    &event.payload,
                    &event.timestamp,
                ],
            )
            .await?;

        tracing::debug!(event_type = %event.event_type, "Audit event recorded");
        Ok(())
    }
}

/// Process-local sink for tests and `--in-memory` runs
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
    fail: AtomicBool,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent append fail
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Events appended so far
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, event: &AuditEvent) -> Result<(), AuditError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AuditError::Unavailable("audit store offline".to_string()));
        }
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }
}
