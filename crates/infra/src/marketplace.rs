//! Wiring of the four marketplace services over one store.

use std::io;
use std::ops::Deref;
use std::sync::Arc;

use chrono::{TimeZone, Utc};

use propmarket_core::{Clock, FixedClock, SystemClock};

use crate::config::MarketplaceConfig;
use crate::directory::{InMemoryPropertyDirectory, PropertyDirectory};
use crate::publisher::{EnvelopeBus, EventPublisher};
use crate::services::{
    BookingScheduler, CreditLedger, ListingLifecycle, PaymentProcessor, ServiceContext,
};
use crate::store::{InMemoryStore, UnitOfWork};
use crate::sweeper::{ExpirySweeper, SweeperHandle};

/// The marketplace core: every service sharing one context.
#[derive(Debug, Clone)]
pub struct Marketplace<S> {
    context: ServiceContext<S>,
    ledger: CreditLedger<S>,
    payments: PaymentProcessor<S>,
    listings: ListingLifecycle<S>,
    bookings: BookingScheduler<S>,
}

impl<S: UnitOfWork + Clone> Marketplace<S> {
    pub fn new(context: ServiceContext<S>) -> Self {
        Self {
            ledger: CreditLedger::new(context.clone()),
            payments: PaymentProcessor::new(context.clone()),
            listings: ListingLifecycle::new(context.clone()),
            bookings: BookingScheduler::new(context.clone()),
            context,
        }
    }

    pub fn context(&self) -> &ServiceContext<S> {
        &self.context
    }

    pub fn ledger(&self) -> &CreditLedger<S> {
        &self.ledger
    }

    pub fn payments(&self) -> &PaymentProcessor<S> {
        &self.payments
    }

    pub fn listings(&self) -> &ListingLifecycle<S> {
        &self.listings
    }

    pub fn bookings(&self) -> &BookingScheduler<S> {
        &self.bookings
    }

    /// Expiry sweeper over this marketplace's listings; call
    /// [`ExpirySweeper::spawn`] to run it in the background.
    pub fn sweeper(&self) -> ExpirySweeper<S>
    where
        S: 'static,
    {
        ExpirySweeper::new(self.listings.clone())
    }

    /// Start the expiry sweeper on the configured sweep interval.
    pub fn spawn_sweeper(&self) -> io::Result<SweeperHandle>
    where
        S: 'static,
    {
        self.sweeper().spawn(self.context.config().sweep_interval)
    }
}

impl Marketplace<InMemoryStore> {
    /// Fully in-memory marketplace for tests and local runs.
    pub fn in_memory<C: Clock + 'static>(
        config: MarketplaceConfig,
        clock: Arc<C>,
    ) -> InMemoryMarketplace<C> {
        let store = InMemoryStore::with_lock_timeout(config.lock_timeout);
        let directory = Arc::new(InMemoryPropertyDirectory::new());
        let bus = Arc::new(EnvelopeBus::new());

        let context = ServiceContext::new(
            store.clone(),
            directory.clone() as Arc<dyn PropertyDirectory>,
            bus.clone() as Arc<dyn EventPublisher>,
            clock.clone() as Arc<dyn Clock>,
            config,
        );

        InMemoryMarketplace {
            marketplace: Marketplace::new(context),
            store,
            directory,
            bus,
            clock,
        }
    }

    /// In-memory marketplace on the wall clock with configuration from the
    /// environment.
    pub fn in_memory_from_env() -> Result<InMemoryMarketplace, crate::config::ConfigError> {
        Ok(Self::in_memory(
            MarketplaceConfig::from_env()?,
            Arc::new(SystemClock),
        ))
    }

    /// Default configuration on a clock frozen at 2024-01-01T00:00:00Z.
    pub fn in_memory_for_tests() -> InMemoryMarketplace<FixedClock> {
        let start = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_default();
        Self::in_memory(MarketplaceConfig::default(), Arc::new(FixedClock::new(start)))
    }
}

/// In-memory marketplace together with handles on its collaborators.
pub struct InMemoryMarketplace<C = SystemClock> {
    marketplace: Marketplace<InMemoryStore>,
    pub store: InMemoryStore,
    pub directory: Arc<InMemoryPropertyDirectory>,
    pub bus: Arc<EnvelopeBus>,
    pub clock: Arc<C>,
}

impl<C: Clock + 'static> InMemoryMarketplace<C> {
    /// Services over the same store, directory, bus and clock with a
    /// different configuration.
    pub fn with_config(&self, config: MarketplaceConfig) -> Marketplace<InMemoryStore> {
        Marketplace::new(ServiceContext::new(
            self.store.clone(),
            self.directory.clone() as Arc<dyn PropertyDirectory>,
            self.bus.clone() as Arc<dyn EventPublisher>,
            self.clock.clone() as Arc<dyn Clock>,
            config,
        ))
    }
}

impl<C> Deref for InMemoryMarketplace<C> {
    type Target = Marketplace<InMemoryStore>;

    fn deref(&self) -> &Self::Target {
        &self.marketplace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    use propmarket_core::{PropertyId, UserId};
    use propmarket_events::EventBus;
    use propmarket_payments::PaymentMethod;
    use rust_decimal_macros::dec;

    #[test]
    fn services_share_one_store_and_bus() {
        let m = Marketplace::in_memory_for_tests();
        let sub = m.bus.subscribe();

        let receipt = m
            .payments()
            .process(UserId::new(), dec!(75), PaymentMethod::Mpesa, None)
            .unwrap();
        let property_id = PropertyId::new();
        m.directory.register(property_id, receipt.payment.account_id);
        m.listings().publish(property_id).unwrap();

        let types: Vec<String> = sub
            .drain()
            .iter()
            .map(|e| e.event_type().to_string())
            .collect();
        assert_eq!(
            types,
            vec![
                "account.opened",
                "payment.recorded",
                "ledger.credited",
                "ledger.debited",
                "listing.published",
            ]
        );
        assert_eq!(m.store.row_counts(), [1, 1, 1, 0, 1]);
    }

    #[test]
    fn spawn_sweeper_uses_the_configured_interval() {
        let config = MarketplaceConfig {
            sweep_interval: Duration::from_millis(5),
            ..MarketplaceConfig::default()
        };
        let m = Marketplace::in_memory(config, Arc::new(FixedClock::new(Utc::now())));

        let handle = m.spawn_sweeper().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.stats().runs == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        assert!(handle.stats().runs >= 1);
        handle.shutdown();
    }
}
