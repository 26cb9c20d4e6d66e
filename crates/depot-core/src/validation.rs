//! # Validation Module
//!
//! Input validation utilities for Depot POS.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Terminal UI                                                  │
//! │  ├── Basic format checks (empty, numeric input)                        │
//! │  └── Immediate user feedback                                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Order Builder / tender planning (Rust)                       │
//! │  └── THIS MODULE: Business rule validation                             │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Store (SQLite)                                               │
//! │  ├── CHECK constraints (status values, non-negative stock)             │
//! │  └── Foreign key constraints                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::money::Money;
use crate::quantity::Quantity;
use crate::{MAX_LINE_QUANTITY, MAX_ORDER_LINES, MAX_TEXT_FIELD_LEN, PRICE_TIER_COUNT};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a line quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_LINE_QUANTITY
///
/// ## User Workflow
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  Order: "+1" on a line                                                  │
/// │                                                                         │
/// │  New quantity: 6                                                        │
/// │       │                                                                 │
/// │       ▼                                                                 │
/// │  validate_quantity(6) ← THIS FUNCTION                                  │
/// │       │                                                                 │
/// │       ├── qty <= 0? → Error: "quantity must be positive"               │
/// │       │                                                                 │
/// │       ├── qty > max? → Error: out of range                             │
/// │       │                                                                 │
/// │       └── OK → stock re-validation in the Order Builder                │
/// │                                                                         │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
pub fn validate_quantity(qty: Quantity) -> ValidationResult<()> {
    if !qty.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_LINE_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 0,
            max: MAX_LINE_QUANTITY.milli() / Quantity::SCALE,
        });
    }

    Ok(())
}

/// Validates a unit price. Zero is allowed (free items).
///
/// ## Example
/// ```rust
/// use depot_core::money::Money;
/// use depot_core::validation::validate_price;
///
/// assert!(validate_price(Money::from_cents(1099)).is_ok());
/// assert!(validate_price(Money::zero()).is_ok());
/// assert!(validate_price(Money::from_cents(-100)).is_err());
/// ```
pub fn validate_price(price: Money) -> ValidationResult<()> {
    if price.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: "price".to_string(),
        });
    }

    Ok(())
}

/// Validates a price tier number (1 through 5).
pub fn validate_price_tier(tier: u8) -> ValidationResult<()> {
    if tier == 0 || tier as usize > PRICE_TIER_COUNT {
        return Err(ValidationError::OutOfRange {
            field: "price tier".to_string(),
            min: 1,
            max: PRICE_TIER_COUNT as i64,
        });
    }

    Ok(())
}

/// Validates a percentage discount in basis points (0 to 10000).
pub fn validate_discount_bps(bps: u32) -> ValidationResult<()> {
    if bps > 10_000 {
        return Err(ValidationError::OutOfRange {
            field: "discount".to_string(),
            min: 0,
            max: 10_000,
        });
    }

    Ok(())
}

/// Validates one component of a tender breakdown.
pub fn validate_tender_amount(field: &str, amount: Money) -> ValidationResult<()> {
    if amount.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Collection Validators
// =============================================================================

/// Validates that one more line fits on the order.
pub fn validate_line_count(current_lines: usize) -> ValidationResult<()> {
    if current_lines >= MAX_ORDER_LINES {
        return Err(ValidationError::OutOfRange {
            field: "order lines".to_string(),
            min: 0,
            max: MAX_ORDER_LINES as i64,
        });
    }

    Ok(())
}

// =============================================================================
// String Validators
// =============================================================================

/// Validates and normalizes a free-text header field (observations, driver,
/// route).
///
/// Blank input becomes `None`.
pub fn validate_text_field(field: &str, value: Option<&str>) -> ValidationResult<Option<String>> {
    let value = match value.map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ => return Ok(None),
    };

    if value.chars().count() > MAX_TEXT_FIELD_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_TEXT_FIELD_LEN,
        });
    }

    Ok(Some(value.to_string()))
}

/// Validates a UUID string format.
///
/// ## Example
/// ```rust
/// use depot_core::validation::validate_uuid;
///
/// assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_uuid("not-a-uuid").is_err());
/// ```
pub fn validate_uuid(id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "id".to_string(),
        });
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: "id".to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(Quantity::from_units(1)).is_ok());
        assert!(validate_quantity(Quantity::from_milli(250)).is_ok());
        assert!(validate_quantity(MAX_LINE_QUANTITY).is_ok());

        assert!(validate_quantity(Quantity::zero()).is_err());
        assert!(validate_quantity(Quantity::from_units(-1)).is_err());
        assert!(validate_quantity(MAX_LINE_QUANTITY + Quantity::from_milli(1)).is_err());
    }

    #[test]
    fn test_validate_price_tier() {
        for tier in 1..=5 {
            assert!(validate_price_tier(tier).is_ok());
        }
        assert!(validate_price_tier(0).is_err());
        assert!(validate_price_tier(6).is_err());
    }

    #[test]
    fn test_validate_discount_bps() {
        assert!(validate_discount_bps(0).is_ok());
        assert!(validate_discount_bps(10_000).is_ok());
        assert!(validate_discount_bps(10_001).is_err());
    }

    #[test]
    fn test_validate_line_count() {
        assert!(validate_line_count(0).is_ok());
        assert!(validate_line_count(MAX_ORDER_LINES - 1).is_ok());
        assert!(validate_line_count(MAX_ORDER_LINES).is_err());
    }

    #[test]
    fn test_validate_text_field() {
        assert_eq!(validate_text_field("driver", Some("  Luis ")).unwrap(), Some("Luis".to_string()));
        assert_eq!(validate_text_field("driver", Some("   ")).unwrap(), None);
        assert_eq!(validate_text_field("driver", None).unwrap(), None);
        assert!(validate_text_field("route", Some(&"x".repeat(MAX_TEXT_FIELD_LEN + 1))).is_err());
    }

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(validate_uuid("").is_err());
        assert!(validate_uuid("123").is_err());
    }
}
