//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                         │
//! │                                                                     │
//! │  In floating point:                                                 │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                       │
//! │                                                                     │
//! │  A crediario ledger adds hundreds of small installments per client. │
//! │  Accumulated float error WILL eventually disagree with the paper    │
//! │  notebook the collector carries.                                    │
//! │                                                                     │
//! │  OUR SOLUTION: Integer Centavos                                     │
//! │    R$ 15.50 is stored as 1550, everywhere, always.                  │
//! │    The schema migration (v2) converts old float columns once.       │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use caderneta_core::money::Money;
//!
//! // Create from cents (the only constructor from raw numbers)
//! let debt = Money::from_cents(10000); // R$ 100,00
//!
//! let installment = Money::from_cents(4000);
//! let remaining = debt - installment;  // R$ 60,00
//! assert_eq!(remaining.cents(), 6000);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in centavos (the smallest currency unit).
///
/// ## Design Decisions
/// - **i64 (signed)**: intermediate results of reversals may dip negative
///   before being clamped by business rules
/// - **Single field tuple struct**: zero-cost abstraction over i64
/// - **Derives**: full serde support for the export boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from centavos.
    ///
    /// ## Example
    /// ```rust
    /// use caderneta_core::money::Money;
    ///
    /// let price = Money::from_cents(1550); // R$ 15,50
    /// assert_eq!(price.cents(), 1550);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from major and minor units (reais and centavos).
    ///
    /// For negative amounts only the major unit should be negative:
    /// `from_major_minor(-5, 50)` is -R$ 5,50.
    #[inline]
    pub const fn from_major_minor(major: i64, minor: i64) -> Self {
        if major < 0 {
            Money(major * 100 - minor)
        } else {
            Money(major * 100 + minor)
        }
    }

    /// Returns the value in centavos.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit (reais) portion.
    #[inline]
    pub const fn reais(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit portion (always 0-99).
    #[inline]
    pub const fn cents_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Zero money value.
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

    /// Clamps the value into `[0, max]`.
    ///
    /// ## Why This Exists
    /// The ledger invariant is `0 <= paid <= total`. Payment application
    /// and payment reversal both funnel through this so the invariant can
    /// never be violated by arithmetic on the way in.
    ///
    /// ## Example
    /// ```rust
    /// use caderneta_core::money::Money;
    ///
    /// let total = Money::from_cents(10000);
    /// let overpaid = Money::from_cents(12000);
    /// assert_eq!(overpaid.clamp_to(total).cents(), 10000);
    ///
    /// let reversed = Money::from_cents(-500);
    /// assert_eq!(reversed.clamp_to(total).cents(), 0);
    /// ```
    #[inline]
    pub fn clamp_to(&self, max: Money) -> Money {
        Money(self.0.clamp(0, max.0.max(0)))
    }

    /// Saturating subtraction floored at zero.
    #[inline]
    pub const fn saturating_sub_floor_zero(&self, other: Money) -> Money {
        let v = self.0 - other.0;
        Money(if v < 0 { 0 } else { v })
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Display implementation shows money in Brazilian notation.
///
/// ## Note
/// This is used in audit log descriptions, so the format matters:
/// collectors read these strings back in the client history screen.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}R$ {},{:02}", sign, self.reais().abs(), self.cents_part())
    }
}

/// Default money is zero.
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

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cents() {
        let money = Money::from_cents(1550);
        assert_eq!(money.cents(), 1550);
        assert_eq!(money.reais(), 15);
        assert_eq!(money.cents_part(), 50);
    }

    #[test]
    fn test_from_major_minor() {
        let money = Money::from_major_minor(10, 99);
        assert_eq!(money.cents(), 1099);

        let negative = Money::from_major_minor(-5, 50);
        assert_eq!(negative.cents(), -550);
    }

    #[test]
    fn test_display_brazilian_format() {
        assert_eq!(format!("{}", Money::from_cents(1099)), "R$ 10,99");
        assert_eq!(format!("{}", Money::from_cents(500)), "R$ 5,00");
        assert_eq!(format!("{}", Money::from_cents(-550)), "-R$ 5,50");
        assert_eq!(format!("{}", Money::from_cents(0)), "R$ 0,00");
    }

    #[test]
    fn test_arithmetic() {
        let a = Money::from_cents(1000);
        let b = Money::from_cents(400);

        assert_eq!((a + b).cents(), 1400);
        assert_eq!((a - b).cents(), 600);
    }

    #[test]
    fn test_clamp_to() {
        let total = Money::from_cents(10000);
        assert_eq!(Money::from_cents(12000).clamp_to(total).cents(), 10000);
        assert_eq!(Money::from_cents(-100).clamp_to(total).cents(), 0);
        assert_eq!(Money::from_cents(5000).clamp_to(total).cents(), 5000);
        // Degenerate: negative ceiling behaves as zero
        assert_eq!(Money::from_cents(100).clamp_to(Money::from_cents(-1)).cents(), 0);
    }

    #[test]
    fn test_saturating_sub_floor_zero() {
        let paid = Money::from_cents(3000);
        let reversal = Money::from_cents(5000);
        assert_eq!(paid.saturating_sub_floor_zero(reversal).cents(), 0);
        assert_eq!(reversal.saturating_sub_floor_zero(paid).cents(), 2000);
    }
}
