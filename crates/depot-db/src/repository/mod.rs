//! # Repository Module
//!
//! Store access for Depot POS, one repository per aggregate.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  depot-engine                                                          │
//! │       │                                                                 │
//! │       │  db.locks().try_acquire(42, &holder, "Ana", now, ttl)          │
//! │       ▼                                                                 │
//! │  LockRepository                                                        │
//! │  ├── try_acquire   single upsert, no read-then-write window            │
//! │  ├── renew                                                             │
//! │  ├── release                                                           │
//! │  └── sweep_expired                                                     │
//! │       │                                                                 │
//! │       │  SQL                                                            │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`OrderRepository`](order::OrderRepository) - Save, load, list, cancel orders
//! - [`LockRepository`](lock::LockRepository) - Per-order editing leases
//! - [`ProductRepository`](product::ProductRepository) - Catalog and warehouse stock
//! - [`ClientRepository`](client::ClientRepository) - Clients and credit balances
//! - [`VoucherRepository`](voucher::VoucherRepository) - Return vouchers
//! - [`SettlementRepository`](settlement::SettlementRepository) - Atomic settlement write

pub mod client;
pub mod lock;
pub mod order;
pub mod product;
pub mod settlement;
pub mod voucher;

use chrono::{DateTime, Utc};

use crate::error::{DbError, DbResult};

/// Lock timestamps are stored as Unix milliseconds.
pub(crate) fn from_millis(entity: &str, ms: i64) -> DbResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| DbError::corrupt(entity, format!("timestamp {ms} out of range")))
}
