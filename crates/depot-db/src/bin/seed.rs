//! # Seed Data Generator
//!
//! Populates a database with a small distributor catalog for development.
//!
//! ## Usage
//! ```bash
//! cargo run -p depot-db --bin seed
//!
//! # Specify database path
//! cargo run -p depot-db --bin seed -- --db ./data/depot.db
//! ```
//!
//! ## Generated Data
//! - Warehouses: MAIN (primary), NORTH, SOUTH
//! - Products with five price tiers, a unit cost and stock split across
//!   warehouses (the aggregate equals the sum of the warehouse rows)
//! - Clients on different default tiers, one of them on credit
//! - One enabled voucher

use chrono::Utc;
use depot_core::{CatalogProduct, Client, Money, PriceTier, Quantity};
use depot_db::{Database, DbConfig};
use std::env;

const WAREHOUSES: &[(&str, &str)] = &[
    ("MAIN", "Main store"),
    ("NORTH", "North yard"),
    ("SOUTH", "South depot"),
];

/// (code, name, retail price in cents, per-warehouse units)
const PRODUCTS: &[(&str, &str, i64, [i64; 3])] = &[
    ("RICE-25", "Rice 25kg", 3500, [40, 12, 0]),
    ("BEANS-1", "Black beans 1kg", 450, [120, 60, 30]),
    ("SUGAR-50", "Sugar 50kg", 5200, [8, 4, 6]),
    ("FLOUR-25", "Wheat flour 25kg", 2900, [25, 0, 10]),
    ("OIL-20", "Vegetable oil 20L", 4100, [15, 15, 0]),
    ("SALT-1", "Salt 1kg", 120, [300, 0, 0]),
    ("CEM-50", "Cement 50kg", 980, [200, 150, 80]),
    ("NAIL-KG", "Nails (by kg)", 260, [90, 20, 0]),
];

/// Tier n is (100 - 3 * (n - 1))% of retail.
fn tiers(retail: i64) -> [Money; 5] {
    let mut out = [Money::zero(); 5];
    for (n, slot) in out.iter_mut().enumerate() {
        *slot = Money::from_cents(retail).scale(
            Money::from_cents(100 - 3 * n as i64),
            Money::from_cents(100),
        );
    }
    out
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    let mut db_path = String::from("./depot_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Depot POS Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./depot_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 Depot POS Seed Data Generator");
    println!("================================");
    println!("Database: {}", db_path);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;

    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.products().count().await?;
    if existing > 0 {
        println!("⚠ Database already has {} products", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let start = std::time::Instant::now();
    let products = db.products();

    for (id, name) in WAREHOUSES {
        products.insert_warehouse(id, name).await?;
    }
    println!("✓ {} warehouses", WAREHOUSES.len());

    for (code, name, retail, split) in PRODUCTS {
        let product = CatalogProduct {
            id: format!("p-{}", code.to_lowercase()),
            code: code.to_string(),
            name: name.to_string(),
            stock: Quantity::from_units(split.iter().sum()),
            price_tiers: tiers(*retail),
            cost: Money::from_cents(retail * 70 / 100),
        };
        products.insert(&product).await?;

        for ((warehouse, _), units) in WAREHOUSES.iter().zip(split) {
            if *units > 0 {
                products
                    .set_warehouse_stock(warehouse, &product.id, Quantity::from_units(*units))
                    .await?;
            }
        }
    }
    println!("✓ {} products", PRODUCTS.len());

    let clients = [
        ("c-acme", "Acme Hardware", 500_000, 3),
        ("c-rosa", "Tienda Rosa", 150_000, 2),
        ("c-cash", "Cash-only Market", 0, 1),
    ];
    for (id, name, limit, tier) in clients {
        db.clients()
            .insert(&Client {
                id: id.to_string(),
                name: name.to_string(),
                credit_limit: Money::from_cents(limit),
                balance: Money::zero(),
                default_price_tier: PriceTier::new(tier)?,
            })
            .await?;
    }
    println!("✓ {} clients", clients.len());

    let voucher = db.vouchers().issue("c-rosa", Money::from_cents(2_500)).await?;
    println!("✓ voucher {} ({})", voucher.id, voucher.face_value);

    println!();
    println!(
        "Done in {:.2?} at {}",
        start.elapsed(),
        Utc::now().format("%Y-%m-%d %H:%M:%S")
    );

    Ok(())
}
