pub mod migrate;
pub mod serve;
pub mod worker;

use freightline::models::{Driver, Load};

// Re-export command functions for convenience
pub use migrate::migrate;
pub use serve::{serve, ServeParams};
pub use worker::worker;

/// Wait for Ctrl+C
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Shutdown signal received");
        }
        Err(e) => {
            tracing::error!("Failed to wait for Ctrl+C: {}", e);
        }
    }
}

/// Sample drivers and open loads for local runs
pub fn demo_records() -> (Vec<Driver>, Vec<Load>) {
    let drivers = vec![
        Driver::new("Maria Gonzalez", "TX-DL-40211"),
        Driver::new("James Whitaker", "OK-DL-77310"),
    ];
    let loads = vec![
        Load::new("Houston, TX", "Memphis, TN", "Palletized dry goods"),
        Load::new("Tulsa, OK", "Denver, CO", "Refrigerated produce"),
        Load::new("Dallas, TX", "Phoenix, AZ", "Steel coils"),
    ];
    (drivers, loads)
}

pub fn print_demo_records(drivers: &[Driver], loads: &[Load]) {
    println!("Demo records:");
    for driver in drivers {
        println!("  driver {}  {}", driver.id, driver.name);
    }
    for load in loads {
        println!(
            "  load   {}  {} -> {} ({})",
            load.id, load.origin, load.destination, load.cargo_type
        );
    }
    println!();
}
