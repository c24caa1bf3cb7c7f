use std::sync::Arc;

use anyhow::{Context, Result};

use freightline::audit::PgAuditRecorder;
use freightline::config::Config;
use freightline::events::RedisStreamBus;
use freightline::worker::{provision, AuditWorker};

use super::shutdown_signal;

/// Consume assignment events until Ctrl+C
pub async fn worker(config: &Config) -> Result<()> {
    let bus = Arc::new(RedisStreamBus::new(&config.events)?);
    let audit = Arc::new(PgAuditRecorder::connect(&config.audit, &config.database)?);

    let worker = AuditWorker::new(bus.clone(), audit, &config.events);
    provision(bus.as_ref(), worker.subscription())
        .await
        .context("Failed to provision worker subscription")?;

    println!(
        "Worker consuming '{}' as '{}' in group '{}'",
        worker.subscription().topic,
        worker.subscription().consumer,
        worker.subscription().group
    );
    println!("Press Ctrl+C to stop.\n");

    worker.run(shutdown_signal()).await;
    Ok(())
}
