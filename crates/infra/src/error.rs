//! Service-level error taxonomy and its caller-facing representation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use propmarket_core::DomainError;

use crate::store::{StoreError, UniqueConstraint};

/// Error returned by every service operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// A deterministic business outcome.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Storage was unavailable (lock timeout, poisoned state).
    #[error("storage failure: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::UniqueViolation(UniqueConstraint::AccountUser) => ServiceError::Domain(
                DomainError::integrity_race("account for this user was created concurrently"),
            ),
            StoreError::UniqueViolation(UniqueConstraint::PaymentReference) => {
                ServiceError::Domain(DomainError::conflict("payment reference already exists"))
            }
            other => ServiceError::Store(other),
        }
    }
}

/// Stable error categories exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    ValidationError,
    InsufficientCredits,
    Conflict,
    PermissionDenied,
    IntegrityRace,
    Unavailable,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::InsufficientCredits => "insufficient_credits",
            ErrorKind::Conflict => "conflict",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::IntegrityRace => "integrity_race",
            ErrorKind::Unavailable => "unavailable",
        }
    }
}

/// Serializable error body: a kind code plus a message safe to show users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorKind,
    pub message: String,
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Domain(err) => match err {
                DomainError::Validation(_) | DomainError::InvalidId(_) => {
                    ErrorKind::ValidationError
                }
                DomainError::NotFound(_) => ErrorKind::NotFound,
                DomainError::InsufficientCredits { .. } => ErrorKind::InsufficientCredits,
                DomainError::Conflict(_) => ErrorKind::Conflict,
                DomainError::PermissionDenied(_) => ErrorKind::PermissionDenied,
                DomainError::IntegrityRace(_) => ErrorKind::IntegrityRace,
            },
            ServiceError::Store(_) => ErrorKind::Unavailable,
        }
    }

    /// Whether re-running the whole transaction may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Domain(DomainError::IntegrityRace(_)))
    }

    /// Storage details (lock keys, constraint names) never leave the service.
    pub fn to_response(&self) -> ErrorResponse {
        let message = match self {
            ServiceError::Domain(err) => err.to_string(),
            ServiceError::Store(_) => "storage temporarily unavailable".to_string(),
        };
        ErrorResponse {
            error: self.kind(),
            message,
        }
    }
}
