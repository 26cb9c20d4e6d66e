//! # Quantity Module
//!
//! Fixed-point quantities for products sold by weight, length, or fraction
//! of a pack.
//!
//! A `Quantity` stores thousandths of a unit in an `i64`, the same way
//! [`Money`](crate::money::Money) stores cents: `2.5 kg` is `2500`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::{div_round, Money};

/// A product quantity in thousandths of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Quantity(i64);

impl Quantity {
    /// Milli-units per whole unit.
    pub const SCALE: i64 = 1_000;

    #[inline]
    pub const fn from_milli(milli: i64) -> Self {
        Quantity(milli)
    }

    #[inline]
    pub const fn from_units(units: i64) -> Self {
        Quantity(units * Self::SCALE)
    }

    #[inline]
    pub const fn milli(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        Quantity(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Scales by `numerator / denominator`, rounding to the nearest milli-unit.
    pub fn scale(&self, numerator: Money, denominator: Money) -> Quantity {
        if denominator.is_zero() {
            return Quantity::zero();
        }
        let raw = self.0 as i128 * numerator.cents() as i128;
        Quantity(div_round(raw, denominator.cents() as i128) as i64)
    }
}

impl fmt::Display for Quantity {
    /// Prints whole quantities without decimals ("3") and trims trailing
    /// zeros otherwise ("2.5").
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let whole = (self.0 / Self::SCALE).abs();
        let frac = (self.0 % Self::SCALE).abs();
        if frac == 0 {
            write!(f, "{}{}", sign, whole)
        } else {
            let digits = format!("{:03}", frac);
            write!(f, "{}{}.{}", sign, whole, digits.trim_end_matches('0'))
        }
    }
}

impl FromStr for Quantity {
    type Err = ValidationError;

    /// Parses decimal input such as `"2"`, `"2.5"` or `"0.125"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ValidationError::InvalidFormat {
            field: "quantity".to_string(),
            reason: reason.to_string(),
        };

        let s = s.trim();
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid("empty value"));
        }
        if frac.len() > 3 {
            return Err(invalid("at most 3 decimal places"));
        }
        if !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
            return Err(invalid("not a number"));
        }

        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid("value too large"))?
        };
        let frac: i64 = if frac.is_empty() {
            0
        } else {
            format!("{:0<3}", frac).parse().map_err(|_| invalid("not a number"))?
        };

        let milli = whole
            .checked_mul(Self::SCALE)
            .and_then(|w| w.checked_add(frac))
            .ok_or_else(|| invalid("value too large"))?;
        Ok(Quantity(if negative { -milli } else { milli }))
    }
}

impl Default for Quantity {
    fn default() -> Self {
        Quantity::zero()
    }
}

impl Add for Quantity {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Quantity(self.0 + other.0)
    }
}

impl AddAssign for Quantity {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Quantity {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Quantity(self.0 - other.0)
    }
}

impl SubAssign for Quantity {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Sum for Quantity {
    fn sum<I: Iterator<Item = Quantity>>(iter: I) -> Self {
        iter.fold(Quantity::zero(), |acc, q| acc + q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Quantity::from_units(3).to_string(), "3");
        assert_eq!(Quantity::from_milli(2_500).to_string(), "2.5");
        assert_eq!(Quantity::from_milli(125).to_string(), "0.125");
        assert_eq!(Quantity::from_milli(-1_050).to_string(), "-1.05");
    }

    #[test]
    fn test_parse() {
        assert_eq!("2".parse::<Quantity>().unwrap(), Quantity::from_units(2));
        assert_eq!("2.5".parse::<Quantity>().unwrap(), Quantity::from_milli(2_500));
        assert_eq!(".25".parse::<Quantity>().unwrap(), Quantity::from_milli(250));
        assert_eq!("-1.5".parse::<Quantity>().unwrap(), Quantity::from_milli(-1_500));

        assert!("".parse::<Quantity>().is_err());
        assert!("1.2345".parse::<Quantity>().is_err());
        assert!("abc".parse::<Quantity>().is_err());
    }

    #[test]
    fn test_scale() {
        let qty = Quantity::from_units(5);
        let scaled = qty.scale(Money::from_cents(3000), Money::from_cents(5000));
        assert_eq!(scaled, Quantity::from_units(3));
    }
}
