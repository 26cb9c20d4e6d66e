//! # depot-db: Store Layer for Depot POS
//!
//! SQLite persistence for orders, editing leases, the catalog and the
//! settlement write path, using sqlx for async access.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Depot POS Data Flow                              │
//! │                                                                         │
//! │  depot-engine (LockManager, TabSessionManager, SettlementEngine)       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     depot-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────────┐  ┌────────────┐  │   │
//! │  │   │   Database    │    │   Repositories     │  │ Migrations │  │   │
//! │  │   │   (pool.rs)   │    │                    │  │ (embedded) │  │   │
//! │  │   │               │    │ OrderRepository    │  │            │  │   │
//! │  │   │ SqlitePool    │◄───│ LockRepository     │  │ 001_init   │  │   │
//! │  │   │ WAL, FKs on   │    │ ProductRepository  │  │            │  │   │
//! │  │   │               │    │ ClientRepository   │  │            │  │   │
//! │  │   │               │    │ VoucherRepository  │  │            │  │   │
//! │  │   │               │    │ SettlementRepo.    │  │            │  │   │
//! │  │   └───────────────┘    └────────────────────┘  └────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  SQLite database shared by every terminal in the store          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use depot_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("depot.db")).await?;
//!
//! let order = db.orders().get(42).await?;
//! let granted = db.locks().try_acquire(42, &holder, "Ana", now, ttl).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig, DbLocation};

pub use repository::client::ClientRepository;
pub use repository::lock::LockRepository;
pub use repository::order::{OrderRepository, OrderSummary};
pub use repository::product::{ProductRepository, StockMovement};
pub use repository::settlement::{SettlementReceipt, SettlementRepository};
pub use repository::voucher::VoucherRepository;
