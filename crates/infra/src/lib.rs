//! Infrastructure layer: storage, transactions, event publication,
//! configuration and the marketplace services built on them.

pub mod config;
pub mod directory;
pub mod error;
pub mod marketplace;
pub mod publisher;
pub mod services;
pub mod store;
pub mod sweeper;
pub mod transaction;


pub use config::{ConfigError, MarketplaceConfig};
pub use directory::{InMemoryPropertyDirectory, PropertyDirectory};
pub use error::{ErrorKind, ErrorResponse, ServiceError};
pub use marketplace::{InMemoryMarketplace, Marketplace};
pub use publisher::{EnvelopeBus, EventPublisher, Outbox};
pub use services::{
    BookingScheduler, CreditLedger, ListingLifecycle, PaymentProcessor, PaymentReceipt,
    PurchaseReceipt, ServiceContext, SweepReport,
};
pub use store::{InMemoryStore, LockKey, StoreError, Transaction, UnitOfWork};
pub use sweeper::{ExpirySweeper, SweeperHandle, SweeperStats};
pub use transaction::run_in_transaction;
