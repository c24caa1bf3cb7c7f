//! Relational record storage
//!
//! Drivers, loads and assignments live in PostgreSQL. The coordinator only
//! sees the [`RecordStore`] trait; tests and local runs use the in-memory
//! implementation.

pub mod postgres;
pub mod repository;

use std::time::Duration;

use anyhow::{Context, Result};
use deadpool_postgres::{Config as PgConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;

use crate::config::DatabaseConfig;

pub use postgres::PgRecordStore;
pub use repository::{
    MemoryRecordStore, RecordStore, SharedRecordStore, StoreError, StoreResult,
    ACTIVE_ASSIGNMENT_CONSTRAINT,
};

/// Create a PostgreSQL connection pool
///
/// The pool bounds how long a caller waits for a connection and every
/// session carries a statement timeout, so no store call blocks forever.
pub fn create_pool(config: &DatabaseConfig) -> Result<Pool> {
    pool_for_url(&config.url, config)
}

/// Create a pool for `url` using the sizing and timeouts of `config`
pub fn pool_for_url(url: &str, config: &DatabaseConfig) -> Result<Pool> {
    let mut cfg = PgConfig::new();
    cfg.url = Some(url.to_string());
    cfg.connect_timeout = Some(Duration::from_secs(config.connect_timeout_secs));
    cfg.options = Some(format!(
        "-c statement_timeout={}",
        config.statement_timeout_secs * 1000
    ));
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    let mut pool_cfg = deadpool_postgres::PoolConfig::new(config.pool_size);
    pool_cfg.timeouts.wait = Some(Duration::from_secs(config.connect_timeout_secs));
    pool_cfg.timeouts.create = Some(Duration::from_secs(config.connect_timeout_secs));
    cfg.pool = Some(pool_cfg);

    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        .context("Failed to create PostgreSQL connection pool")
}

/// Check that the pool can reach the server
pub async fn ping(pool: &Pool) -> Result<()> {
    let client = pool
        .get()
        .await
        .context("Failed to connect to PostgreSQL")?;
    client.simple_query("SELECT 1").await?;
    Ok(())
}
