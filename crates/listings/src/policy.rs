use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use propmarket_core::{Credits, DomainError};

/// Pricing and duration applied when a listing is published or renewed.
///
/// Renewals always use the policy in force at renewal time; the fee stored on
/// a listing is a historical record of what its first publication cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingPolicy {
    pub publication_fee: Credits,
    pub listing_days: u32,
}

impl ListingPolicy {
    pub const DEFAULT_FEE: u64 = 50;
    pub const DEFAULT_DAYS: u32 = 30;
    /// Longest listing period accepted from configuration (about a century).
    pub const MAX_DAYS: u32 = 36_500;

    pub fn new(publication_fee: Credits, listing_days: u32) -> Self {
        Self {
            publication_fee,
            listing_days,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::days(i64::from(self.listing_days))
    }

    /// Expiration of a listing published or renewed at `from`.
    pub fn expires_from(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>, DomainError> {
        from.checked_add_signed(self.duration())
            .ok_or_else(|| DomainError::validation("listing expiration is out of range"))
    }
}

impl Default for ListingPolicy {
    fn default() -> Self {
        Self::new(Credits::whole(Self::DEFAULT_FEE), Self::DEFAULT_DAYS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_charges_fifty_for_thirty_days() {
        let policy = ListingPolicy::default();
        assert_eq!(policy.publication_fee, Credits::whole(50));
        assert_eq!(policy.duration(), Duration::days(30));
    }

    #[test]
    fn expiration_past_the_calendar_is_a_validation_error() {
        let policy = ListingPolicy::new(Credits::whole(1), u32::MAX);

        assert!(matches!(
            policy.expires_from(Utc::now()),
            Err(DomainError::Validation(_))
        ));
    }
}
