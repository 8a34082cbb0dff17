//! Integer minor-unit money.

use serde::{Deserialize, Serialize};

/// Fixed conversion factor from a major currency unit to minor units.
pub const MINOR_UNITS_PER_MAJOR: i64 = 100;

/// Money amount represented in minor units to avoid floating point issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money {
    minor: i64,
}

impl Money {
    /// Creates a new amount from minor units (e.g. 1000 = 10.00).
    pub const fn from_minor(minor: i64) -> Self {
        Self { minor }
    }

    /// Converts a whole major-unit price into minor units.
    ///
    /// Returns `None` on overflow.
    pub fn from_major(major: i64) -> Option<Self> {
        major
            .checked_mul(MINOR_UNITS_PER_MAJOR)
            .map(Self::from_minor)
    }

    /// Returns zero money.
    pub const fn zero() -> Self {
        Self { minor: 0 }
    }

    /// Returns the amount in minor units.
    pub const fn minor(&self) -> i64 {
        self.minor
    }

    /// Returns true if the amount is positive.
    pub fn is_positive(&self) -> bool {
        self.minor > 0
    }

    /// Returns true if the amount is negative.
    pub fn is_negative(&self) -> bool {
        self.minor < 0
    }

    /// Returns the amount with its sign flipped.
    pub fn negate(&self) -> Money {
        Money { minor: -self.minor }
    }

    /// Subtracts `other`, returning `None` on overflow.
    pub fn checked_sub(&self, other: Money) -> Option<Money> {
        self.minor.checked_sub(other.minor).map(Money::from_minor)
    }

    /// Adds `other`, returning `None` on overflow.
    pub fn checked_add(&self, other: Money) -> Option<Money> {
        self.minor.checked_add(other.minor).map(Money::from_minor)
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let major = (self.minor / MINOR_UNITS_PER_MAJOR).abs();
        let minor = (self.minor % MINOR_UNITS_PER_MAJOR).abs();
        if self.minor < 0 {
            write!(f, "-{major}.{minor:02}")
        } else {
            write!(f, "{major}.{minor:02}")
        }
    }
}
