//! # Money Module
//!
//! Provides the `Money` type for rental prices.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  In JavaScript/floating point:                                          │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                           │
//! │    Rounding a float total can flip between re-quotes                    │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Units                                            │
//! │    All catalog rates are whole currency units (e.g. rupees)             │
//! │    Discounts round half-up with integer math: (999*85 + 50) / 100      │
//! │    The same inputs ALWAYS give the same total                           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use fleet_core::money::Money;
//!
//! let daily = Money::from_units(500);
//! let with_pad = daily + Money::from_units(100);
//! assert_eq!(with_pad.apply_percentage_discount(10).units(), 540);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use ts_rs::TS;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in whole currency units.
///
/// ## Design Decisions
/// - **i64 (signed)**: subtraction never wraps; floors are explicit
/// - **Currency agnostic**: the catalog picks one unit and sticks to it
/// - **Single field tuple struct**: zero-cost abstraction over i64
///
/// ## Where Money Flows
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  RateTable.daily_rate ──┐                                              │
/// │                         ├──► Quote.base_price ──┐                      │
/// │  controller rate × n ───┴──► Quote.add_on_price ┴─► subtotal           │
/// │                                                     │                   │
/// │                          offer discount ◄───────────┘                   │
/// │                                │                                        │
/// │                                ▼                                        │
/// │                      Quote.total_price ──► Rental.total_price (frozen) │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from whole currency units.
    #[inline]
    pub const fn from_units(units: i64) -> Self {
        Money(units)
    }

    /// Returns the value in whole currency units.
    #[inline]
    pub const fn units(&self) -> i64 {
        self.0
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is negative.
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies a per-unit rate by a count; `None` on overflow.
    #[inline]
    pub const fn checked_multiply_quantity(&self, qty: i64) -> Option<Self> {
        match self.0.checked_mul(qty) {
            Some(units) => Some(Money(units)),
            None => None,
        }
    }

    /// Adds two amounts; `None` on overflow.
    #[inline]
    pub const fn checked_add(&self, other: Money) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(units) => Some(Money(units)),
            None => None,
        }
    }

    /// Applies a percentage discount and returns the discounted amount.
    ///
    /// ## Rounding
    /// The result is `self × (1 - pct/100)` rounded to the nearest whole
    /// unit, halves rounding up. Integer math only:
    /// `(amount × (100 - pct) + 50) / 100`
    ///
    /// `pct` is clamped to `0..=100`, so a discount never turns a price
    /// negative.
    ///
    /// ## Example
    /// ```rust
    /// use fleet_core::money::Money;
    ///
    /// let subtotal = Money::from_units(999);
    /// // 999 × 0.85 = 849.15 → 849
    /// assert_eq!(subtotal.apply_percentage_discount(15).units(), 849);
    /// // 5 × 0.5 = 2.5 → 3 (half-up)
    /// assert_eq!(Money::from_units(5).apply_percentage_discount(50).units(), 3);
    /// ```
    pub fn apply_percentage_discount(&self, pct: i64) -> Money {
        let pct = pct.clamp(0, 100) as i128;
        let amount = self.0.max(0) as i128;
        let discounted = (amount * (100 - pct) + 50) / 100;
        Money(discounted as i64)
    }

    /// Subtracts a fixed amount, never going below zero.
    ///
    /// ## Example
    /// ```rust
    /// use fleet_core::money::Money;
    ///
    /// let subtotal = Money::from_units(300);
    /// assert_eq!(subtotal.saturating_discount(Money::from_units(500)), Money::zero());
    /// ```
    pub fn saturating_discount(&self, amount: Money) -> Money {
        Money((self.0 - amount.0.max(0)).max(0))
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Plain integer display; the storefront owns currency formatting.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
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

// =============================================================================
// Unit Tests
// =============================================================================
