//! `propmarket-core`: shared domain building blocks for the marketplace.
//!
//! Pure domain primitives only: identifiers, the error taxonomy, the credit
//! amount value object and time sources. No storage or locking lives here.

pub mod aggregate;
pub mod clock;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot};
pub use clock::{Clock, FixedClock, SystemClock};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AccountId, BalanceId, BookingId, ListingId, PaymentId, PropertyId, UserId};
pub use value_object::{Credits, ValueObject};
