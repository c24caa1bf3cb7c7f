use anyhow::{Context, Result};

use freightline::audit::PgAuditRecorder;
use freightline::config::Config;
use freightline::storage::{self, PgRecordStore};

use super::{demo_records, print_demo_records};

/// Create record store and audit schemas, optionally inserting demo records
pub async fn migrate(config: &Config, seed: bool) -> Result<()> {
    let pool = storage::create_pool(&config.database)?;
    let store = PgRecordStore::new(pool);
    store.init_schema().await?;

    let audit = PgAuditRecorder::connect(&config.audit, &config.database)?;
    audit.init_schema().await?;

    println!("Schema ready.");

    if seed {
        let (drivers, loads) = demo_records();
        for driver in &drivers {
            store
                .insert_driver(driver)
                .await
                .with_context(|| format!("Failed to insert driver {}", driver.name))?;
        }
        for load in &loads {
            store
                .insert_load(load)
                .await
                .with_context(|| format!("Failed to insert load {}", load.id))?;
        }
        print_demo_records(&drivers, &loads);
    }

    Ok(())
}
