//! # Engine Error Types
//!
//! Errors surfaced by the terminal services to the UI.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Engine Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Authorization  │  │   Step-up       │  │   Concurrency           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │ PermissionDenied│  │ CreditLimit-    │  │  LockConflict           │ │
//! │  │ StockInsuffic.  │  │   Exceeded      │  │  Conflict               │ │
//! │  │                 │  │ BelowCostPrice  │  │  SettlementInProgress   │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Input         │  │     Store       │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Validation     │  │  TransientStore │  │  Config                 │ │
//! │  │  InvalidStatus  │  │  Store          │  │  ChannelError           │ │
//! │  │  NotFound       │  │ ProcessingFailed│  │  Serialization          │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Step-up errors do not end the flow: the UI asks a supervisor for a
//! credential and calls again with the grant attached.

use std::fmt;

use depot_core::{CoreError, Money, Quantity};
use depot_db::DbError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::Capability;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// One product the order asks more of than the store holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockShortfall {
    pub product: String,
    pub available: Quantity,
    pub requested: Quantity,
}

impl fmt::Display for StockShortfall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (available {}, requested {})",
            self.product, self.available, self.requested
        )
    }
}

/// Formats a shortfall list for the error message.
fn list(shortfalls: &[StockShortfall]) -> String {
    shortfalls
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Engine error type.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    // =========================================================================
    // Authorization Errors
    // =========================================================================
    /// The user lacks a capability the operation needs.
    #[error("Permission denied: requires '{capability}'")]
    PermissionDenied { capability: Capability },

    /// Items exceed current stock and the user may not sell without stock.
    #[error("Insufficient stock: {}", list(.shortfalls))]
    StockInsufficient { shortfalls: Vec<StockShortfall> },

    // =========================================================================
    // Step-up Errors
    // =========================================================================
    /// The credit part would take the client past its limit.
    #[error("Credit limit exceeded for {client}: balance {balance} + {credit} > limit {limit}")]
    CreditLimitExceeded {
        client: String,
        balance: Money,
        credit: Money,
        limit: Money,
    },

    /// A custom price is below the product's estimated cost.
    #[error("Price {unit_price} for {product} is below cost {cost}")]
    BelowCostPrice {
        product: String,
        unit_price: Money,
        cost: Money,
    },

    // =========================================================================
    // Concurrency Errors
    // =========================================================================
    /// Another session holds the editing lease.
    #[error("Order {order_id} is being edited by {holder_name}")]
    LockConflict { order_id: i64, holder_name: String },

    /// The stored record changed since it was read.
    #[error("Changed by another terminal: {0}")]
    Conflict(String),

    /// The tab is waiting on a settlement.
    #[error("A settlement is in progress on this tab")]
    SettlementInProgress,

    // =========================================================================
    // Input Errors
    // =========================================================================
    #[error("Validation error: {0}")]
    Validation(String),

    /// The order's status does not allow the operation.
    #[error("Order {order_id} is {status}")]
    InvalidStatus { order_id: String, status: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    // =========================================================================
    // Store Errors
    // =========================================================================
    /// The store could not be reached. Retrying may succeed.
    #[error("Store unavailable: {0}")]
    TransientStore(String),

    /// The store rejected the request.
    #[error("Store error: {0}")]
    Store(String),

    /// Settlement failed after validation. Nothing was written.
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl EngineError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// True when the UI should ask for a step-up credential and retry.
    pub fn is_step_up(&self) -> bool {
        matches!(
            self,
            EngineError::CreditLimitExceeded { .. } | EngineError::BelowCostPrice { .. }
        )
    }

    /// True when the same call may succeed if repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::TransientStore(_))
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InsufficientStock {
                product,
                available,
                requested,
            } => EngineError::StockInsufficient {
                shortfalls: vec![StockShortfall {
                    product,
                    available,
                    requested,
                }],
            },
            CoreError::InvalidOrderStatus { order_id, status } => {
                EngineError::InvalidStatus { order_id, status }
            }
            other => EngineError::Validation(other.to_string()),
        }
    }
}

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        if err.is_transient() {
            return EngineError::TransientStore(err.to_string());
        }
        match err {
            DbError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            DbError::Conflict { .. } => EngineError::Conflict(err.to_string()),
            other => EngineError::Store(other.to_string()),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for EngineError {
    fn from(err: toml::ser::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_up_classification() {
        let credit = EngineError::CreditLimitExceeded {
            client: "Acme".into(),
            balance: Money::zero(),
            credit: Money::from_cents(10_000),
            limit: Money::from_cents(5_000),
        };
        assert!(credit.is_step_up());
        assert!(!credit.is_retryable());

        let denied = EngineError::PermissionDenied {
            capability: Capability::CreditSales,
        };
        assert!(!denied.is_step_up());
        assert!(denied.to_string().contains("credit_sales"));
    }

    #[test]
    fn test_db_error_mapping() {
        let busy: EngineError = DbError::Busy("database is locked".into()).into();
        assert!(busy.is_retryable());

        let missing: EngineError = DbError::not_found("Order", "42").into();
        assert!(matches!(missing, EngineError::NotFound { ref id, .. } if id == "42"));

        let stale: EngineError = DbError::conflict("Order", "42", "already paid").into();
        assert!(matches!(stale, EngineError::Conflict(_)));
    }

    #[test]
    fn test_core_stock_error_names_product() {
        let err: EngineError = CoreError::InsufficientStock {
            product: "Rice 25kg".into(),
            available: Quantity::from_units(4),
            requested: Quantity::from_units(5),
        }
        .into();

        match &err {
            EngineError::StockInsufficient { shortfalls } => assert_eq!(shortfalls.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
        assert!(err.to_string().contains("Rice 25kg"));
    }
}
