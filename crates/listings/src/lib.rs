//! Listing publication domain.
//!
//! A listing advertises a property for a fixed period paid for in credits.
//! This crate holds the state machine and the pricing policy; charging the
//! owner's ledger and enforcing the one-active-listing-per-property rule
//! against stored rows are infrastructure concerns.

pub mod listing;
pub mod policy;

pub use listing::{
    Listing, ListingCommand, ListingDeleted, ListingEvent, ListingExpired, ListingPublished,
    ListingRenewed, ListingStatus, ListingSuspended, ListingViewed,
};
pub use policy::ListingPolicy;
