//! Application services: one per marketplace component.
//!
//! Each public operation runs in its own scoped transaction (see
//! [`crate::transaction::run_in_transaction`]), takes the row locks it needs
//! before reading the rows it will modify, and publishes its events after the
//! commit. Services are cheap to clone and safe to share across threads.

pub mod bookings;
pub mod ledger;
pub mod listings;
pub mod payments;

use std::sync::Arc;

use propmarket_core::Clock;
use tracing::{error, warn};

use crate::config::MarketplaceConfig;
use crate::directory::PropertyDirectory;
use crate::error::ServiceError;
use crate::publisher::{EventPublisher, Outbox};
use crate::store::UnitOfWork;
use crate::transaction::run_in_transaction;

pub use bookings::BookingScheduler;
pub use ledger::CreditLedger;
pub use listings::{ListingLifecycle, SweepReport};
pub use payments::{PaymentProcessor, PaymentReceipt, PurchaseReceipt};

/// Dependencies shared by every service.
pub struct ServiceContext<S> {
    store: S,
    directory: Arc<dyn PropertyDirectory>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    config: MarketplaceConfig,
}

impl<S: Clone> Clone for ServiceContext<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            directory: self.directory.clone(),
            publisher: self.publisher.clone(),
            clock: self.clock.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S> core::fmt::Debug for ServiceContext<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: UnitOfWork> ServiceContext<S> {
    pub fn new(
        store: S,
        directory: Arc<dyn PropertyDirectory>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        config: MarketplaceConfig,
    ) -> Self {
        Self {
            store,
            directory,
            publisher,
            clock,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn directory(&self) -> &dyn PropertyDirectory {
        self.directory.as_ref()
    }

    pub fn config(&self) -> &MarketplaceConfig {
        &self.config
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// Run `body` as one retried, post-commit-publishing transaction.
    pub(crate) fn transact<T, F>(&self, body: F) -> Result<T, ServiceError>
    where
        F: FnMut(&mut S::Tx, &mut Outbox) -> Result<T, ServiceError>,
    {
        run_in_transaction(
            &self.store,
            self.publisher.as_ref(),
            self.config.tx_retries,
            body,
        )
    }
}

/// Log a failed operation at the level its kind deserves.
pub(crate) fn log_failure(operation: &'static str, err: &ServiceError) {
    match err {
        ServiceError::Domain(e) => warn!(operation, error = %e, "operation rejected"),
        ServiceError::Store(e) => error!(operation, error = %e, "storage failure"),
    }
}
