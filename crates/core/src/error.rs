//! Domain error model.

use thiserror::Error;

use crate::value_object::Credits;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Every variant is a deterministic business outcome that callers are expected
/// to handle. Messages are safe to show to end users: they never carry
/// storage details or internal identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input (bad time range, non-positive amount, unknown method).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A ledger debit exceeds the available balance.
    #[error("insufficient credits: available {available}, required {required}")]
    InsufficientCredits { available: Credits, required: Credits },

    /// Duplicate active listing, overlapping booking, duplicate reference.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The actor lacks authority for the requested transition.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A concurrent creation of the same unique record won the race.
    ///
    /// Resolved internally by retrying; only surfaces when retries run out.
    #[error("concurrent update detected: {0}")]
    IntegrityRace(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn insufficient_credits(available: Credits, required: Credits) -> Self {
        Self::InsufficientCredits {
            available,
            required,
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    pub fn integrity_race(msg: impl Into<String>) -> Self {
        Self::IntegrityRace(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
