//! Storage abstraction: per-entity repositories behind a scoped transaction.
//!
//! ## Transaction model
//!
//! A [`Transaction`] is obtained from a [`UnitOfWork`] and is the only way to
//! read or write rows. Writes are buffered inside the transaction and become
//! visible to others atomically on [`Transaction::commit`]. Dropping a
//! transaction without committing rolls it back: early returns, `?`
//! propagation and panics all discard the buffered writes.
//!
//! ## Locking
//!
//! Serialization happens through keyed row locks ([`LockKey`]) taken with
//! [`Transaction::lock`] and held until the transaction ends. Callers must
//! lock every key whose rows they read-modify-write *before* reading them.
//! Keys are ordered `Property < Requester < Account`; a multi-key request is
//! sorted before acquisition, and services lock lower-ranked keys first, so
//! two transactions can never wait on each other in a cycle.
//!
//! ## Unique constraints
//!
//! One account per user and one payment per reference are checked at commit
//! time against everything already committed, and surface as
//! [`StoreError::UniqueViolation`]. Balances are keyed by their account, so
//! "one balance per account" holds structurally.

mod locks;
mod memory;

pub use locks::KeyLocks;
pub use memory::{InMemoryStore, InMemoryTx};

use thiserror::Error;

use propmarket_bookings::Booking;
use propmarket_core::{AccountId, BookingId, ListingId, PaymentId, PropertyId, UserId};
use propmarket_ledger::{Account, CreditBalance};
use propmarket_listings::{Listing, ListingStatus};
use propmarket_payments::{Payment, PaymentReference};

/// A row-lock key. The derived `Ord` is the global acquisition order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockKey {
    Property(PropertyId),
    Requester(UserId),
    Account(AccountId),
}

impl core::fmt::Display for LockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LockKey::Property(id) => write!(f, "property:{id}"),
            LockKey::Requester(id) => write!(f, "requester:{id}"),
            LockKey::Account(id) => write!(f, "account:{id}"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum UniqueConstraint {
    /// At most one account per linked user.
    AccountUser,
    /// Payment references are unique across all payments.
    PaymentReference,
}

impl core::fmt::Display for UniqueConstraint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            UniqueConstraint::AccountUser => f.write_str("accounts.user_id"),
            UniqueConstraint::PaymentReference => f.write_str("payments.reference"),
        }
    }
}

/// Storage failure.
///
/// These are infrastructure errors, distinct from the business outcomes in
/// `DomainError`. Only `UniqueViolation` has a business meaning; the service
/// layer translates it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("timed out waiting for row lock {0}")]
    LockTimeout(LockKey),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(UniqueConstraint),

    #[error("storage lock poisoned")]
    Poisoned,
}

pub trait AccountRepository {
    fn find_account(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    fn find_account_by_user(&self, user_id: UserId) -> Result<Option<Account>, StoreError>;

    fn insert_account(&mut self, account: Account) -> Result<(), StoreError>;
}

pub trait BalanceRepository {
    fn find_balance(&self, account_id: AccountId) -> Result<Option<CreditBalance>, StoreError>;

    fn all_balances(&self) -> Result<Vec<CreditBalance>, StoreError>;

    /// Insert or replace the balance row of `balance.account_id()`.
    fn save_balance(&mut self, balance: CreditBalance) -> Result<(), StoreError>;
}

pub trait ListingRepository {
    fn find_listing(&self, id: ListingId) -> Result<Option<Listing>, StoreError>;

    fn listings_for_property(&self, property_id: PropertyId) -> Result<Vec<Listing>, StoreError>;

    fn listings_with_status(&self, status: ListingStatus) -> Result<Vec<Listing>, StoreError>;

    fn all_listings(&self) -> Result<Vec<Listing>, StoreError>;

    fn save_listing(&mut self, listing: Listing) -> Result<(), StoreError>;

    fn delete_listing(&mut self, id: ListingId) -> Result<(), StoreError>;
}

pub trait BookingRepository {
    fn find_booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError>;

    fn bookings_for_property(&self, property_id: PropertyId) -> Result<Vec<Booking>, StoreError>;

    fn bookings_for_requester(&self, requester_id: UserId) -> Result<Vec<Booking>, StoreError>;

    fn save_booking(&mut self, booking: Booking) -> Result<(), StoreError>;
}

pub trait PaymentRepository {
    fn find_payment(&self, id: PaymentId) -> Result<Option<Payment>, StoreError>;

    fn find_payment_by_reference(
        &self,
        reference: &PaymentReference,
    ) -> Result<Option<Payment>, StoreError>;

    fn payments_for_account(&self, account_id: AccountId) -> Result<Vec<Payment>, StoreError>;

    fn all_payments(&self) -> Result<Vec<Payment>, StoreError>;

    fn save_payment(&mut self, payment: Payment) -> Result<(), StoreError>;
}

/// A scoped unit of work. Rolled back on drop unless committed.
pub trait Transaction:
    AccountRepository + BalanceRepository + ListingRepository + BookingRepository + PaymentRepository
{
    /// Acquire row locks for `keys`, held until the transaction ends.
    ///
    /// Keys already held by this transaction are skipped.
    fn lock(&mut self, keys: &[LockKey]) -> Result<(), StoreError>;

    /// Validate unique constraints and publish all buffered writes atomically.
    fn commit(self) -> Result<(), StoreError>;
}

/// Factory for transactions.
pub trait UnitOfWork: Send + Sync {
    type Tx: Transaction;

    fn begin(&self) -> Result<Self::Tx, StoreError>;
}

impl<U> UnitOfWork for std::sync::Arc<U>
where
    U: UnitOfWork + ?Sized,
{
    type Tx = U::Tx;

    fn begin(&self) -> Result<Self::Tx, StoreError> {
        (**self).begin()
    }
}
