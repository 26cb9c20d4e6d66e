//! # depot-core: Pure Business Logic for Depot POS
//!
//! The order math and rules of the terminal, as pure functions with zero
//! I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Depot POS Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Terminal UI (tabs)                           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │       depot-engine: locks, tab sessions, settlement             │   │
//! │  └──────────────┬──────────────────────────────┬───────────────────┘   │
//! │                 │                              │                        │
//! │  ┌──────────────▼──────────────────┐  ┌────────▼──────────────────┐    │
//! │  │   ★ depot-core (THIS CRATE) ★   │  │  depot-db (SQLite store)  │    │
//! │  │                                 │  │                           │    │
//! │  │  order · builder · tender       │  │  repositories, one-tx     │    │
//! │  │  allocation · lock · money      │  │  settlement writer        │    │
//! │  │                                 │  └───────────────────────────┘    │
//! │  │  NO I/O • NO DATABASE • NO CLOCK│                                    │
//! │  └─────────────────────────────────┘                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Identifiers, statuses, catalog/client snapshots, vouchers
//! - [`order`] - Order and OrderItem with the totals invariant
//! - [`builder`] - Order Builder mutations (add/remove/quantity/price/discount)
//! - [`tender`] - Settlement planning (tender arithmetic)
//! - [`allocation`] - Warehouse Allocator
//! - [`lock`] - Lock ownership and expiry rules
//! - [`money`] / [`quantity`] - Fixed-point arithmetic
//! - [`error`] / [`validation`] - Domain errors and input checks
//!
//! ## Example Usage
//!
//! ```rust
//! use depot_core::builder::add_item;
//! use depot_core::money::Money;
//! use depot_core::order::{Order, PriceChoice};
//! use depot_core::quantity::Quantity;
//! use depot_core::types::{CatalogProduct, PriceTier};
//!
//! let beans = CatalogProduct {
//!     id: "p-beans".into(),
//!     code: "BEANS-1".into(),
//!     name: "Black beans 1kg".into(),
//!     stock: Quantity::from_units(40),
//!     price_tiers: [Money::from_cents(450); 5],
//!     cost: Money::from_cents(300),
//! };
//!
//! let order = Order::new_draft("cashier-1");
//! let order = add_item(
//!     &order,
//!     &beans,
//!     Quantity::from_units(3),
//!     PriceChoice::Tier(PriceTier::RETAIL),
//!     Some(beans.stock),
//! )
//! .unwrap();
//!
//! assert_eq!(order.total.cents(), 1350);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod allocation;
pub mod builder;
pub mod error;
pub mod lock;
pub mod money;
pub mod order;
pub mod quantity;
pub mod tender;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use allocation::{Allocation, WarehouseDistribution};
pub use error::{CoreError, CoreResult, ValidationError};
pub use lock::{LockHolder, LockStatus, OrderLock};
pub use money::Money;
pub use order::{Discount, Order, OrderFlags, OrderItem, PriceChoice};
pub use quantity::Quantity;
pub use tender::{SettlementPlan, Tender, TenderBreakdown};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Number of catalog price levels.
pub const PRICE_TIER_COUNT: usize = 5;

/// Maximum lines on a single order.
pub const MAX_ORDER_LINES: usize = 200;

/// Maximum quantity on a single line.
///
/// ## Business Reason
/// Catches fat-finger entries (10000 instead of 100) on the "+" keypad.
pub const MAX_LINE_QUANTITY: Quantity = Quantity::from_units(99_999);

/// Maximum length of observations, driver and route fields.
pub const MAX_TEXT_FIELD_LEN: usize = 500;
