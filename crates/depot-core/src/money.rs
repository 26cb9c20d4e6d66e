//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  Split tender in floating point:                                        │
//! │    total 40.10 - cash 30.00 - card 10.10 = 0.0000000000000036  ❌      │
//! │                                                                         │
//! │  Status check "remaining <= 0.01" then depends on float noise.          │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Cents                                            │
//! │    4010 - 3000 - 1010 = 0 cents, exactly                                │
//! │    Tolerances become whole cents (MONEY_TOLERANCE = 1 cent)             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use depot_core::money::Money;
//! use depot_core::quantity::Quantity;
//!
//! let price = Money::from_cents(1099); // $10.99
//! let line = price.times(Quantity::from_units(3));
//! assert_eq!(line.cents(), 3297);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use ts_rs::TS;

use crate::quantity::Quantity;

/// Tolerance used when two amounts should be treated as equal (one cent).
///
/// Applies to the add-item merge rule and to the "fully paid" check.
pub const MONEY_TOLERANCE: Money = Money::from_cents(1);

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit (cents).
///
/// ## Design Decisions
/// - **i64 (signed)**: client balances and deltas can be negative
/// - **Single field tuple struct**: Zero-cost abstraction over i64
/// - **Derives**: Full serde support for JSON serialization
///
/// ## Where Money Flows
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  Price tier ──► OrderItem.unit_price ──► OrderItem.total                │
/// │                                               │                         │
/// │                                               ▼                         │
/// │  Order.subtotal - Order.discount_total = Order.total                    │
/// │                                               │                         │
/// │                                               ▼                         │
/// │  Tender split ──► Payments / client balance / voucher balance           │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    ///
    /// ## Example
    /// ```rust
    /// use depot_core::money::Money;
    ///
    /// let price = Money::from_cents(1099);
    /// assert_eq!(price.cents(), 1099);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from major and minor units.
    ///
    /// For negative amounts only the major unit should be negative:
    /// `from_major_minor(-5, 50)` is -$5.50.
    #[inline]
    pub const fn from_major_minor(major: i64, minor: i64) -> Self {
        if major < 0 {
            Money(major * 100 - minor)
        } else {
            Money(major * 100 + minor)
        }
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit portion.
    #[inline]
    pub const fn dollars(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit portion (always 0-99).
    #[inline]
    pub const fn cents_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Returns zero.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Returns the absolute value.
    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Clamps negative values to zero.
    ///
    /// ## Example
    /// ```rust
    /// use depot_core::money::Money;
    ///
    /// assert_eq!(Money::from_cents(-20).non_negative(), Money::zero());
    /// assert_eq!(Money::from_cents(20).non_negative().cents(), 20);
    /// ```
    #[inline]
    pub fn non_negative(self) -> Self {
        Money(self.0.max(0))
    }

    /// True when both amounts differ by at most `tolerance`.
    #[inline]
    pub fn approx_eq(&self, other: Money, tolerance: Money) -> bool {
        (self.0 - other.0).abs() <= tolerance.0
    }

    /// Multiplies a unit price by a fractional quantity.
    ///
    /// ## User Workflow
    /// ```text
    /// Product: Rice 25kg sack, tier 2 = $31.50
    /// Quantity: 2.5
    ///      │
    ///      ▼
    /// times(2.500) ← THIS FUNCTION
    ///      │
    ///      ▼
    /// Line Total: $78.75
    /// ```
    ///
    /// Rounds half away from zero to the nearest cent.
    pub fn times(&self, qty: Quantity) -> Money {
        let raw = self.0 as i128 * qty.milli() as i128;
        Money(div_round(raw, Quantity::SCALE as i128) as i64)
    }

    /// Scales this amount by the ratio `numerator / denominator`.
    ///
    /// Used to build proportional audit records (voucher redemption keeps
    /// only the cash share of a sale). A zero denominator yields zero.
    ///
    /// ## Example
    /// ```rust
    /// use depot_core::money::Money;
    ///
    /// let total = Money::from_cents(5000);
    /// let scaled = total.scale(Money::from_cents(3000), Money::from_cents(5000));
    /// assert_eq!(scaled.cents(), 3000);
    /// ```
    pub fn scale(&self, numerator: Money, denominator: Money) -> Money {
        if denominator.is_zero() {
            return Money::zero();
        }
        let raw = self.0 as i128 * numerator.0 as i128;
        Money(div_round(raw, denominator.0 as i128) as i64)
    }

    /// Returns the discount amount for a percentage in basis points.
    ///
    /// ## Example
    /// ```rust
    /// use depot_core::money::Money;
    ///
    /// let subtotal = Money::from_cents(10000);
    /// assert_eq!(subtotal.percentage(1000).cents(), 1000); // 10%
    /// ```
    pub fn percentage(&self, bps: u32) -> Money {
        Money(div_round(self.0 as i128 * bps as i128, 10_000) as i64)
    }
}

/// Integer division rounding half away from zero.
pub(crate) fn div_round(numerator: i128, denominator: i128) -> i128 {
    let (numerator, denominator) = if denominator < 0 {
        (-numerator, -denominator)
    } else {
        (numerator, denominator)
    };
    let half = denominator / 2;
    if numerator >= 0 {
        (numerator + half) / denominator
    } else {
        (numerator - half) / denominator
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Debug-friendly display. The terminal UI handles localized formatting.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(
            f,
            "{}${}.{:02}",
            sign,
            self.dollars().abs(),
            self.cents_part()
        )
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cents() {
        let money = Money::from_cents(1099);
        assert_eq!(money.cents(), 1099);
        assert_eq!(money.dollars(), 10);
        assert_eq!(money.cents_part(), 99);
    }

    #[test]
    fn test_from_major_minor() {
        assert_eq!(Money::from_major_minor(10, 99).cents(), 1099);
        assert_eq!(Money::from_major_minor(-5, 50).cents(), -550);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Money::from_cents(1099)), "$10.99");
        assert_eq!(format!("{}", Money::from_cents(-550)), "-$5.50");
        assert_eq!(format!("{}", Money::from_cents(0)), "$0.00");
    }

    #[test]
    fn test_times_fractional_quantity() {
        let price = Money::from_cents(3150);
        assert_eq!(price.times(Quantity::from_milli(2_500)).cents(), 7875);
        // 0.333 × $1.00 = $0.333 → 33 cents
        assert_eq!(Money::from_cents(100).times(Quantity::from_milli(333)).cents(), 33);
        // 0.005 × $1.00 = 0.5 cents → rounds away from zero
        assert_eq!(Money::from_cents(100).times(Quantity::from_milli(5)).cents(), 1);
    }

    #[test]
    fn test_scale_rounds_half_away_from_zero() {
        let amount = Money::from_cents(1001);
        // 1001 × 1/2 = 500.5 → 501
        assert_eq!(amount.scale(Money::from_cents(1), Money::from_cents(2)).cents(), 501);
        assert_eq!((-amount).scale(Money::from_cents(1), Money::from_cents(2)).cents(), -501);
        assert_eq!(amount.scale(Money::from_cents(1), Money::zero()), Money::zero());
    }

    #[test]
    fn test_approx_eq_uses_one_cent_tolerance() {
        let a = Money::from_cents(1000);
        assert!(a.approx_eq(Money::from_cents(1001), MONEY_TOLERANCE));
        assert!(a.approx_eq(Money::from_cents(999), MONEY_TOLERANCE));
        assert!(!a.approx_eq(Money::from_cents(1002), MONEY_TOLERANCE));
    }

    #[test]
    fn test_percentage() {
        assert_eq!(Money::from_cents(10000).percentage(1000).cents(), 1000);
        assert_eq!(Money::from_cents(999).percentage(1500).cents(), 150);
    }

    #[test]
    fn test_sum_and_non_negative() {
        let total: Money = [100, 250, -50].iter().map(|c| Money::from_cents(*c)).sum();
        assert_eq!(total.cents(), 300);
        assert!(Money::from_cents(-1).non_negative().is_zero());
    }
}
