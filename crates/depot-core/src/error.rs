//! # Error Types
//!
//! Domain-specific error types for depot-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  depot-core errors (this file)                                         │
//! │  ├── CoreError        - Order Builder / tender / allocation rules      │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  depot-db errors (separate crate)                                      │
//! │  └── DbError          - Store round-trip failures                      │
//! │                                                                         │
//! │  depot-engine errors                                                   │
//! │  └── EngineError      - What the terminal UI sees                      │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError → UI message          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::money::Money;
use crate::quantity::Quantity;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// These represent business rule violations detected by the pure layer,
/// before anything is written to the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Requested quantity exceeds the stock figure supplied by the caller.
    ///
    /// ## User Workflow
    /// ```text
    /// "+1" on a line (qty: 4 → 5)
    ///      │
    ///      ▼
    /// Current stock: 4
    ///      │
    ///      ▼
    /// InsufficientStock { product: "Rice 25kg", available: 4, requested: 5 }
    ///      │
    ///      ▼
    /// UI shows: "Only 4 Rice 25kg in stock"
    /// ```
    #[error("Insufficient stock for {product}: available {available}, requested {requested}")]
    InsufficientStock {
        product: String,
        available: Quantity,
        requested: Quantity,
    },

    /// No line at the given position.
    #[error("Order has no line {index}")]
    LineNotFound { index: usize },

    /// A line was addressed with a product it does not hold.
    #[error("Order line {index} holds {expected}, not {actual}")]
    ProductMismatch {
        index: usize,
        expected: String,
        actual: String,
    },

    /// The order's status does not allow the requested operation.
    ///
    /// ## When This Occurs
    /// - Editing items of a pending or paid order
    /// - Settling an order that is already paid or cancelled
    #[error("Order {order_id} is {status}, cannot perform operation")]
    InvalidOrderStatus { order_id: String, status: String },

    /// Tender cannot be applied as described.
    #[error("Invalid tender: {reason}")]
    InvalidTender { reason: String },

    /// Tender breakdown does not add up to what is owed.
    #[error("Tender breakdown sums to {provided}, but {owed} is owed")]
    TenderMismatch { owed: Money, provided: Money },

    /// A warehouse distribution does not cover the ordered quantity.
    #[error("Distribution for {product} allocates {allocated}, expected {expected}")]
    AllocationMismatch {
        product: String,
        expected: Quantity,
        allocated: Quantity,
    },

    /// A warehouse was asked for more than it holds.
    #[error("Warehouse {warehouse} holds {available} of {product}, {requested} allocated")]
    WarehouseOverdrawn {
        product: String,
        warehouse: String,
        available: Quantity,
        requested: Quantity,
    },

    /// Neither a single warehouse nor the two largest together cover the quantity.
    #[error("No warehouse combination covers {requested} of {product}")]
    NoWarehouseCoverage { product: String, requested: Quantity },

    /// The interactive allocator has no product left to distribute.
    #[error("Every product is already distributed")]
    AllocationComplete,

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when user input doesn't meet requirements.
/// Used for early validation before business logic runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Invalid format (e.g., invalid UUID, malformed quantity).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InsufficientStock {
            product: "Rice 25kg".to_string(),
            available: Quantity::from_units(4),
            requested: Quantity::from_milli(4_500),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for Rice 25kg: available 4, requested 4.5"
        );

        let err = CoreError::TenderMismatch {
            owed: Money::from_cents(4000),
            provided: Money::from_cents(3900),
        };
        assert_eq!(
            err.to_string(),
            "Tender breakdown sums to $39.00, but $40.00 is owed"
        );
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "client".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
