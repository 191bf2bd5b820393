//! Value objects: equality by value, not identity.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values. To
/// "modify" one, build a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

/// A non-negative amount of marketplace credits.
///
/// One credit corresponds to one unit of the payment currency. The amount is
/// a decimal so that purchases of fractional currency amounts can be held
/// exactly; it can never be negative, which is what keeps every ledger balance
/// at or above zero.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Credits(Decimal);

impl ValueObject for Credits {}

impl Credits {
    pub const ZERO: Credits = Credits(Decimal::ZERO);

    /// Zero or positive amount.
    pub fn new(amount: Decimal) -> DomainResult<Self> {
        if amount < Decimal::ZERO {
            return Err(DomainError::validation("credit amount cannot be negative"));
        }
        Ok(Self(amount.normalize()))
    }

    /// Strictly positive amount (what every ledger mutation requires).
    pub fn positive(amount: Decimal) -> DomainResult<Self> {
        if amount <= Decimal::ZERO {
            return Err(DomainError::validation("credit amount must be positive"));
        }
        Ok(Self(amount.normalize()))
    }

    pub fn whole(units: u64) -> Self {
        Self(Decimal::from(units))
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_add(self, other: Credits) -> DomainResult<Credits> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or_else(|| DomainError::validation("credit amount overflow"))
    }

    /// `None` when `other` exceeds `self`.
    pub fn checked_sub(self, other: Credits) -> Option<Credits> {
        if other.0 > self.0 {
            None
        } else {
            Some(Self(self.0 - other.0))
        }
    }
}

impl TryFrom<Decimal> for Credits {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Credits> for Decimal {
    fn from(value: Credits) -> Self {
        value.0
    }
}

impl core::fmt::Display for Credits {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}
