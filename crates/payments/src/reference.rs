use serde::{Deserialize, Serialize};
use uuid::Uuid;

use propmarket_core::{DomainError, DomainResult, ValueObject};

use crate::method::PaymentMethod;

/// Unique, caller-visible payment reference.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentReference(String);

impl ValueObject for PaymentReference {}

impl PaymentReference {
    /// Caller-supplied reference; surrounding whitespace is dropped.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("payment reference cannot be empty"));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// `MZ` + method code + 8 uppercase hex characters taken from `nonce`.
    pub fn generate(method: PaymentMethod, nonce: Uuid) -> Self {
        let hex = nonce.simple().to_string();
        let tail = &hex[hex.len() - 8..];
        Self(format!("MZ{}{}", method.code(), tail.to_ascii_uppercase()))
    }

    /// Reference of a direct credit purchase, derived from the purchase time.
    pub fn purchase(unix_millis: i64, attempt: u32) -> Self {
        if attempt == 0 {
            Self(format!("PAG_{unix_millis}"))
        } else {
            Self(format!("PAG_{unix_millis}_{attempt}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
