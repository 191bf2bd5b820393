//! Marketplace configuration loaded from `PROPMARKET_*` environment variables.

use core::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;

use propmarket_core::Credits;
use propmarket_listings::ListingPolicy;

pub const PUBLICATION_FEE_VAR: &str = "PROPMARKET_PUBLICATION_FEE";
pub const LISTING_DAYS_VAR: &str = "PROPMARKET_LISTING_DAYS";
pub const SWEEP_INTERVAL_VAR: &str = "PROPMARKET_SWEEP_INTERVAL_SECS";
pub const LOCK_TIMEOUT_VAR: &str = "PROPMARKET_LOCK_TIMEOUT_MS";
pub const PURCHASE_MIN_VAR: &str = "PROPMARKET_PURCHASE_MIN";
pub const PURCHASE_MAX_VAR: &str = "PROPMARKET_PURCHASE_MAX";
pub const TX_RETRIES_VAR: &str = "PROPMARKET_TX_RETRIES";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketplaceConfig {
    /// Credits charged to publish or renew a listing.
    pub publication_fee: Credits,
    pub listing_days: u32,
    pub sweep_interval: Duration,
    pub lock_timeout: Duration,
    /// Inclusive bounds of a direct credit purchase.
    pub purchase_min: Decimal,
    pub purchase_max: Decimal,
    /// Attempts per operation when a concurrent creation races it.
    pub tx_retries: u32,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            publication_fee: Credits::whole(ListingPolicy::DEFAULT_FEE),
            listing_days: ListingPolicy::DEFAULT_DAYS,
            sweep_interval: Duration::from_secs(3600),
            lock_timeout: Duration::from_millis(5000),
            purchase_min: Decimal::ONE,
            purchase_max: Decimal::from(1000),
            tx_retries: 3,
        }
    }
}

impl MarketplaceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; unset variables keep their
    /// defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let publication_fee = match parse::<Decimal>(&lookup, PUBLICATION_FEE_VAR)? {
            Some(fee) => Credits::positive(fee).map_err(|e| invalid(PUBLICATION_FEE_VAR, fee, e))?,
            None => defaults.publication_fee,
        };
        let listing_days = parse(&lookup, LISTING_DAYS_VAR)?.unwrap_or(defaults.listing_days);
        if !(1..=ListingPolicy::MAX_DAYS).contains(&listing_days) {
            return Err(invalid(
                LISTING_DAYS_VAR,
                listing_days,
                format!("must be between 1 and {} days", ListingPolicy::MAX_DAYS),
            ));
        }

        let sweep_interval = parse(&lookup, SWEEP_INTERVAL_VAR)?
            .map(Duration::from_secs)
            .unwrap_or(defaults.sweep_interval);
        if sweep_interval.is_zero() {
            return Err(invalid(SWEEP_INTERVAL_VAR, 0, "must be at least one second"));
        }
        let lock_timeout = parse(&lookup, LOCK_TIMEOUT_VAR)?
            .map(Duration::from_millis)
            .unwrap_or(defaults.lock_timeout);

        let purchase_min = parse(&lookup, PURCHASE_MIN_VAR)?.unwrap_or(defaults.purchase_min);
        let purchase_max = parse(&lookup, PURCHASE_MAX_VAR)?.unwrap_or(defaults.purchase_max);
        if purchase_min <= Decimal::ZERO {
            return Err(invalid(PURCHASE_MIN_VAR, purchase_min, "must be positive"));
        }
        if purchase_max < purchase_min {
            return Err(invalid(
                PURCHASE_MAX_VAR,
                purchase_max,
                format!("below the purchase minimum {purchase_min}"),
            ));
        }

        let tx_retries = parse(&lookup, TX_RETRIES_VAR)?.unwrap_or(defaults.tx_retries);

        Ok(Self {
            publication_fee,
            listing_days,
            sweep_interval,
            lock_timeout,
            purchase_min,
            purchase_max,
            tx_retries: tx_retries.max(1),
        })
    }

    pub fn listing_policy(&self) -> ListingPolicy {
        ListingPolicy::new(self.publication_fee, self.listing_days)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    lookup(key)
        .map(|raw| raw.trim().parse::<T>().map_err(|e| invalid(key, &raw, e)))
        .transpose()
}

fn invalid(key: &'static str, value: impl ToString, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
