//! # Seed Data Generator
//!
//! Populates a database with a development fleet.
//!
//! ## Usage
//! ```bash
//! # 8 units per category (default)
//! cargo run -p fleet-db --bin seed
//!
//! # Custom fleet size and path
//! cargo run -p fleet-db --bin seed -- --per-category 20 --db ./data/fleet.db
//! ```
//!
//! ## Generated Data
//! - Catalog entries for each category below, with their rate tables
//! - `per-category` devices per category, serials `{PREFIX}-{NNN}`,
//!   every seventh one parked in Maintenance
//! - Two promotional codes

use chrono::Utc;
use std::env;
use tracing::{info, warn};
use uuid::Uuid;

use fleet_core::{
    CatalogPatch, Device, DevicePatch, DeviceStatus, NewDevice, NewOffer, PromotionalOffer,
    RateTable,
};
use fleet_db::{Database, DbConfig};

/// (category, serial prefix, daily, weekly, monthly, controller daily/weekly/monthly, max controllers)
const CATEGORIES: &[(&str, &str, [i64; 6], u32)] = &[
    ("PS5", "PS5", [600, 3500, 12000, 150, 700, 2000], 4),
    ("PS5 Pro", "PS5P", [800, 4500, 15000, 150, 700, 2000], 4),
    ("Xbox Series X", "XSX", [550, 3200, 11000, 120, 600, 1800], 4),
    ("Nintendo Switch", "NSW", [400, 2200, 8000, 100, 500, 1500], 8),
    ("Retro Console", "RET", [250, 1400, 5000, 50, 250, 800], 2),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args: Vec<String> = env::args().collect();

    let mut per_category: usize = 8;
    let mut db_path = String::from("./fleet_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--per-category" | "-n" => {
                if i + 1 < args.len() {
                    per_category = args[i + 1].parse().unwrap_or(8);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Console Fleet Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -n, --per-category <N>  Devices per category (default: 8)");
                println!("  -d, --db <PATH>         Database file path (default: ./fleet_dev.db)");
                println!("  -h, --help              Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let db = Database::new(DbConfig::new(&db_path)).await?;
    info!(path = %db_path, "Connected, migrations applied");

    let existing = db.devices().count().await?;
    if existing > 0 {
        warn!(existing, "Database already has devices; skipping seed");
        return Ok(());
    }

    let start = std::time::Instant::now();
    let mut generated = 0usize;

    for (category, prefix, rates, max_controllers) in CATEGORIES {
        let [daily, weekly, monthly, c_daily, c_weekly, c_monthly] = *rates;
        let patch = CatalogPatch {
            max_controllers: Some(*max_controllers),
            rates: Some(RateTable {
                daily_rate: daily,
                weekly_rate: weekly,
                monthly_rate: monthly,
                controller_daily_rate: c_daily,
                controller_weekly_rate: c_weekly,
                controller_monthly_rate: c_monthly,
            }),
            features: Some(vec![format!("{max_controllers} controllers max")]),
            ..Default::default()
        };
        db.catalog().upsert(category, &patch).await?;

        for n in 1..=per_category {
            let now = Utc::now();
            let mut new = NewDevice::new(format!("{prefix}-{n:03}"), *category);
            new.connectors = vec!["HDMI".into(), "USB-C".into()];
            new.controller_count = Some(2);
            let device = Device::onboard(Uuid::new_v4().to_string(), new, now);

            if let Err(e) = db.devices().insert(&device).await {
                warn!(serial = %device.serial_number, error = %e, "Failed to insert device");
                continue;
            }
            if n % 7 == 0 {
                db.devices()
                    .update(
                        &device.id,
                        &DevicePatch::health_and_status(55, DeviceStatus::Maintenance),
                    )
                    .await?;
            }
            generated += 1;
        }
    }

    let now = Utc::now();
    for new in [
        NewOffer::percentage("SPRING10", 10).min_days(3),
        NewOffer::fixed("RETRO200", 200).for_categories(["Retro Console"]),
    ] {
        db.offers()
            .insert(&PromotionalOffer::from_new(Uuid::new_v4().to_string(), new, now))
            .await?;
    }

    info!(
        devices = generated,
        categories = CATEGORIES.len(),
        elapsed = ?start.elapsed(),
        "Seed complete"
    );

    Ok(())
}
