//! Credit ledger domain: accounts and their per-account credit balance.
//!
//! Pure domain logic only: no IO, no locking, no persistence concerns. The
//! infrastructure layer is responsible for running each balance mutation as a
//! single locked read-modify-write.

pub mod account;
pub mod ledger;

pub use account::{Account, AccountEvent, AccountOpened, AccountType};
pub use ledger::{
    AdjustBalance, CreditBalance, CreditsAdded, CreditsDebited, LedgerCommand, LedgerEvent,
};
