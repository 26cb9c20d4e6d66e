//! # depot-engine: Terminal Services for Depot POS
//!
//! Async services that keep many terminals from stepping on each other's
//! orders and that settle payments against the shared store.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Terminal session                                │
//! │                                                                         │
//! │  ┌───────────────────┐     ┌───────────────────┐                        │
//! │  │ TabSessionManager │────►│    LockManager    │◄─── LockMaintenance    │
//! │  │  new/open/switch/ │     │  acquire / renew  │     sweep 30 s         │
//! │  │  close/save/settle│     │  release / status │     heartbeat 120 s    │
//! │  └─────────┬─────────┘     └─────────┬─────────┘                        │
//! │            │                         │                                  │
//! │            ▼                         │                                  │
//! │  ┌───────────────────┐               │          ┌──────────────────┐    │
//! │  │ SettlementEngine  │── gates ──────┼─────────►│   Authorizer     │    │
//! │  │  confirm_payment  │               │          └──────────────────┘    │
//! │  └─────────┬─────────┘               │                                  │
//! │            │                         │                                  │
//! │            ▼                         ▼                                  │
//! │  ┌─────────────────────────────────────────────┐  ┌────────────────┐    │
//! │  │           depot-db (one SqlitePool)         │  │    EventBus    │    │
//! │  └─────────────────────────────────────────────┘  └────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`lock_manager`] - Editing leases and the maintenance task
//! - [`tabs`] - Open orders of one terminal
//! - [`settlement`] - confirm_payment and the warehouse allocator feed
//! - [`auth`] - Identity, capabilities, step-up grants
//! - [`events`] - Change notifications for other screens
//! - [`config`] - TOML + environment configuration
//! - [`terminal`] - Wires everything for one session
//! - [`error`] - Engine error taxonomy
//!
//! ## Usage
//!
//! ```rust,ignore
//! use depot_engine::{EngineConfig, Identity, Terminal};
//! use depot_core::SessionId;
//!
//! depot_engine::init_tracing();
//! let config = EngineConfig::load_or_default(None);
//!
//! let terminal = Terminal::builder(config)
//!     .with_identity(Identity::new("u-ana", "Ana", SessionId::generate()))
//!     .build()
//!     .await?;
//!
//! let tab = terminal.tabs().open_order(42).await?;
//! ```

use tracing_subscriber::EnvFilter;

// =============================================================================
// Module Declarations
// =============================================================================

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod lock_manager;
pub mod settlement;
pub mod tabs;
pub mod terminal;

// =============================================================================
// Re-exports
// =============================================================================

pub use auth::{Authorizer, Capability, Identity, StaticAuthorizer, StepUpGrant};
pub use config::{EngineConfig, LockSettings};
pub use error::{EngineError, EngineResult, StockShortfall};
pub use events::{EngineEvent, EventBus};
pub use lock_manager::{AcquireOutcome, LockMaintenance, LockMaintenanceHandle, LockManager};
pub use settlement::{SettlementEngine, SettlementOutcome, SettlementRequest};
pub use tabs::{Tab, TabId, TabSessionManager};
pub use terminal::{Terminal, TerminalBuilder};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,depot=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
