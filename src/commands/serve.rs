use std::sync::Arc;

use anyhow::{Context, Result};

use freightline::audit::{MemoryAuditSink, PgAuditRecorder, SharedAuditSink};
use freightline::cache::{MemoryCache, RedisCache, SharedCache};
use freightline::config::Config;
use freightline::coordinator::{AssignmentCoordinator, CoordinatorServer};
use freightline::events::{MemoryEventBus, RedisStreamBus, SharedPublisher};
use freightline::storage::{self, MemoryRecordStore, PgRecordStore, SharedRecordStore};

use super::{demo_records, print_demo_records, shutdown_signal};

/// Options of the `serve` command
#[derive(Debug, Clone, Copy)]
pub struct ServeParams {
    pub in_memory: bool,
    pub seed: bool,
}

/// Start the assignment API
pub async fn serve(config: &Config, params: ServeParams) -> Result<()> {
    let coordinator = if params.in_memory {
        in_memory_coordinator(params.seed)
    } else {
        if params.seed {
            tracing::warn!("--seed only applies to --in-memory; use `migrate --seed` instead");
        }
        connected_coordinator(config).await?
    }
    .with_topic(&config.events.assignment_topic);

    let server = CoordinatorServer::new(config.server.clone(), coordinator)
        .context("Failed to create assignment server")?;

    println!("{}", server.info().display());
    println!();
    println!("API Endpoints:");
    println!("  GET   /api/health                 - Health check");
    println!("  GET   /metrics                    - Prometheus metrics endpoint");
    println!("  POST  /api/assignments            - Assign a driver to a load");
    println!("  GET   /api/assignments/{{id}}       - Get assignment with driver and load");
    println!("  PATCH /api/assignments/{{id}}/status - Complete or cancel an assignment");
    println!();
    println!("Press Ctrl+C to stop.\n");

    server.start_with_shutdown(shutdown_signal()).await?;

    println!("Assignment server stopped.");
    Ok(())
}

fn in_memory_coordinator(seed: bool) -> AssignmentCoordinator {
    let store = Arc::new(MemoryRecordStore::new());
    if seed {
        let (drivers, loads) = demo_records();
        print_demo_records(&drivers, &loads);
        for driver in drivers {
            store.insert_driver(driver);
        }
        for load in loads {
            store.insert_load(load);
        }
    }

    tracing::info!("Using in-memory store, cache, event bus and audit sink");
    AssignmentCoordinator::new(
        store,
        Arc::new(MemoryCache::new()),
        Arc::new(MemoryEventBus::new()),
        Arc::new(MemoryAuditSink::new()),
    )
}

async fn connected_coordinator(config: &Config) -> Result<AssignmentCoordinator> {
    let pool = storage::create_pool(&config.database)?;
    storage::ping(&pool)
        .await
        .context("Record store is not reachable")?;
    let store: SharedRecordStore = Arc::new(PgRecordStore::new(pool));

    // The cache and notifier are only used after commit, so an outage is not fatal
    let redis = RedisCache::new(&config.cache)?;
    if let Err(e) = redis.health_check().await {
        tracing::warn!(
            error = %e,
            "Redis cache unavailable, invalidations will fail until it returns"
        );
    }
    let cache: SharedCache = Arc::new(redis);

    let events: SharedPublisher = Arc::new(RedisStreamBus::new(&config.events)?);

    let audit: SharedAuditSink =
        Arc::new(PgAuditRecorder::connect(&config.audit, &config.database)?);

    Ok(AssignmentCoordinator::new(store, cache, events, audit))
}
