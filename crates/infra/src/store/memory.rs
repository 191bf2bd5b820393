//! In-memory transactional store.
//!
//! Intended for tests/dev and single-process deployments. Committed rows live
//! behind one `RwLock`; each transaction buffers its writes in an overlay that
//! is validated and applied under the write lock at commit.

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use std::time::Duration;

use tracing::trace;

use propmarket_bookings::Booking;
use propmarket_core::{AccountId, BookingId, Entity, ListingId, PaymentId, PropertyId, UserId};
use propmarket_ledger::{Account, CreditBalance};
use propmarket_listings::{Listing, ListingStatus};
use propmarket_payments::{Payment, PaymentReference};

use super::locks::KeyLocks;
use super::{
    AccountRepository, BalanceRepository, BookingRepository, ListingRepository, LockKey,
    PaymentRepository, StoreError, Transaction, UniqueConstraint, UnitOfWork,
};

#[derive(Debug, Default, Clone)]
struct Tables {
    accounts: HashMap<AccountId, Account>,
    balances: HashMap<AccountId, CreditBalance>,
    listings: HashMap<ListingId, Listing>,
    bookings: HashMap<BookingId, Booking>,
    payments: HashMap<PaymentId, Payment>,
}

/// Buffered writes of one transaction. `None` marks a deletion.
#[derive(Debug, Default)]
struct Overlay {
    accounts: HashMap<AccountId, Option<Account>>,
    balances: HashMap<AccountId, Option<CreditBalance>>,
    listings: HashMap<ListingId, Option<Listing>>,
    bookings: HashMap<BookingId, Option<Booking>>,
    payments: HashMap<PaymentId, Option<Payment>>,
}

impl Overlay {
    fn is_empty(&self) -> bool {
        self.accounts.is_empty()
            && self.balances.is_empty()
            && self.listings.is_empty()
            && self.bookings.is_empty()
            && self.payments.is_empty()
    }
}

#[derive(Debug)]
struct Shared {
    tables: RwLock<Tables>,
    locks: KeyLocks,
    lock_timeout: Duration,
}

/// Cheap to clone; clones share the same data.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl InMemoryStore {
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new() -> Self {
        Self::with_lock_timeout(Self::DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                locks: KeyLocks::new(),
                lock_timeout,
            }),
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        self.shared.lock_timeout
    }

    /// Whether some transaction currently holds `key`.
    pub fn is_locked(&self, key: &LockKey) -> bool {
        self.shared.locks.is_held(key)
    }

    /// Number of committed rows per table: accounts, balances, listings,
    /// bookings, payments.
    pub fn row_counts(&self) -> [usize; 5] {
        let tables = self
            .shared
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        [
            tables.accounts.len(),
            tables.balances.len(),
            tables.listings.len(),
            tables.bookings.len(),
            tables.payments.len(),
        ]
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitOfWork for InMemoryStore {
    type Tx = InMemoryTx;

    fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(InMemoryTx {
            shared: self.shared.clone(),
            overlay: Overlay::default(),
            held: BTreeSet::new(),
        })
    }
}

/// Transaction over an [`InMemoryStore`].
#[derive(Debug)]
pub struct InMemoryTx {
    shared: Arc<Shared>,
    overlay: Overlay,
    held: BTreeSet<LockKey>,
}

impl InMemoryTx {
    fn tables(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.shared.tables.read().map_err(|_| StoreError::Poisoned)
    }

    /// Look `key` up in the overlay first, then in committed rows.
    fn find<K, V>(
        overlay: &HashMap<K, Option<V>>,
        committed: &HashMap<K, V>,
        key: &K,
    ) -> Option<V>
    where
        K: Eq + Hash,
        V: Clone,
    {
        match overlay.get(key) {
            Some(buffered) => buffered.clone(),
            None => committed.get(key).cloned(),
        }
    }

    /// Committed rows as seen through the overlay, filtered by `keep`.
    fn merged<K, V, F>(
        overlay: &HashMap<K, Option<V>>,
        committed: &HashMap<K, V>,
        keep: F,
    ) -> Vec<V>
    where
        K: Eq + Hash,
        V: Clone,
        F: Fn(&V) -> bool,
    {
        committed
            .iter()
            .filter(|(k, _)| !overlay.contains_key(*k))
            .map(|(_, v)| v)
            .chain(overlay.values().flatten())
            .filter(|v| keep(v))
            .cloned()
            .collect()
    }

    fn check_unique(&self, tables: &Tables) -> Result<(), StoreError> {
        for account in self.overlay.accounts.values().flatten() {
            let taken = tables
                .accounts
                .values()
                .any(|a| a.user_id == account.user_id && a.id != account.id);
            if taken {
                return Err(StoreError::UniqueViolation(UniqueConstraint::AccountUser));
            }
        }

        for payment in self.overlay.payments.values().flatten() {
            let taken = tables
                .payments
                .values()
                .any(|p| p.reference == payment.reference && p.id != payment.id);
            if taken {
                return Err(StoreError::UniqueViolation(UniqueConstraint::PaymentReference));
            }
        }

        Ok(())
    }
}

/// Buffer `row` under its own identifier.
fn stage<E: Entity>(writes: &mut HashMap<E::Id, Option<E>>, row: E) {
    writes.insert(row.id().clone(), Some(row));
}

fn apply<K, V>(target: &mut HashMap<K, V>, writes: HashMap<K, Option<V>>)
where
    K: Eq + Hash,
{
    for (key, value) in writes {
        match value {
            Some(v) => {
                target.insert(key, v);
            }
            None => {
                target.remove(&key);
            }
        }
    }
}

impl Drop for InMemoryTx {
    fn drop(&mut self) {
        if !self.held.is_empty() {
            self.shared.locks.release_all(&self.held);
        }
    }
}

impl Transaction for InMemoryTx {
    fn lock(&mut self, keys: &[LockKey]) -> Result<(), StoreError> {
        let wanted: BTreeSet<LockKey> = keys
            .iter()
            .filter(|k| !self.held.contains(*k))
            .copied()
            .collect();

        for key in wanted {
            self.shared.locks.acquire(key, self.shared.lock_timeout)?;
            self.held.insert(key);
        }
        Ok(())
    }

    fn commit(mut self) -> Result<(), StoreError> {
        if self.overlay.is_empty() {
            return Ok(());
        }

        let shared = self.shared.clone();
        let mut tables = shared.tables.write().map_err(|_| StoreError::Poisoned)?;
        self.check_unique(&tables)?;

        let overlay = std::mem::take(&mut self.overlay);
        apply(&mut tables.accounts, overlay.accounts);
        apply(&mut tables.balances, overlay.balances);
        apply(&mut tables.listings, overlay.listings);
        apply(&mut tables.bookings, overlay.bookings);
        apply(&mut tables.payments, overlay.payments);

        trace!(locks = self.held.len(), "transaction committed");
        Ok(())
    }
}

impl AccountRepository for InMemoryTx {
    fn find_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let tables = self.tables()?;
        Ok(Self::find(&self.overlay.accounts, &tables.accounts, &id))
    }

    fn find_account_by_user(&self, user_id: UserId) -> Result<Option<Account>, StoreError> {
        let tables = self.tables()?;
        Ok(Self::merged(&self.overlay.accounts, &tables.accounts, |a| {
            a.user_id == user_id
        })
        .into_iter()
        .next())
    }

    fn insert_account(&mut self, account: Account) -> Result<(), StoreError> {
        stage(&mut self.overlay.accounts, account);
        Ok(())
    }
}

impl BalanceRepository for InMemoryTx {
    fn find_balance(&self, account_id: AccountId) -> Result<Option<CreditBalance>, StoreError> {
        let tables = self.tables()?;
        Ok(Self::find(&self.overlay.balances, &tables.balances, &account_id))
    }

    fn all_balances(&self) -> Result<Vec<CreditBalance>, StoreError> {
        let tables = self.tables()?;
        Ok(Self::merged(&self.overlay.balances, &tables.balances, |_| true))
    }

    fn save_balance(&mut self, balance: CreditBalance) -> Result<(), StoreError> {
        self.overlay
            .balances
            .insert(balance.account_id(), Some(balance));
        Ok(())
    }
}

impl ListingRepository for InMemoryTx {
    fn find_listing(&self, id: ListingId) -> Result<Option<Listing>, StoreError> {
        let tables = self.tables()?;
        Ok(Self::find(&self.overlay.listings, &tables.listings, &id))
    }

    fn listings_for_property(&self, property_id: PropertyId) -> Result<Vec<Listing>, StoreError> {
        let tables = self.tables()?;
        Ok(Self::merged(&self.overlay.listings, &tables.listings, |l| {
            l.property_id() == Some(property_id)
        }))
    }

    fn listings_with_status(&self, status: ListingStatus) -> Result<Vec<Listing>, StoreError> {
        let tables = self.tables()?;
        Ok(Self::merged(&self.overlay.listings, &tables.listings, |l| {
            l.status() == status
        }))
    }

    fn all_listings(&self) -> Result<Vec<Listing>, StoreError> {
        let tables = self.tables()?;
        Ok(Self::merged(&self.overlay.listings, &tables.listings, |_| true))
    }

    fn save_listing(&mut self, listing: Listing) -> Result<(), StoreError> {
        self.overlay.listings.insert(listing.id_typed(), Some(listing));
        Ok(())
    }

    fn delete_listing(&mut self, id: ListingId) -> Result<(), StoreError> {
        self.overlay.listings.insert(id, None);
        Ok(())
    }
}

impl BookingRepository for InMemoryTx {
    fn find_booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        let tables = self.tables()?;
        Ok(Self::find(&self.overlay.bookings, &tables.bookings, &id))
    }

    fn bookings_for_property(&self, property_id: PropertyId) -> Result<Vec<Booking>, StoreError> {
        let tables = self.tables()?;
        Ok(Self::merged(&self.overlay.bookings, &tables.bookings, |b| {
            b.property_id() == Some(property_id)
        }))
    }

    fn bookings_for_requester(&self, requester_id: UserId) -> Result<Vec<Booking>, StoreError> {
        let tables = self.tables()?;
        Ok(Self::merged(&self.overlay.bookings, &tables.bookings, |b| {
            b.requester_id() == Some(requester_id)
        }))
    }

    fn save_booking(&mut self, booking: Booking) -> Result<(), StoreError> {
        self.overlay.bookings.insert(booking.id_typed(), Some(booking));
        Ok(())
    }
}

impl PaymentRepository for InMemoryTx {
    fn find_payment(&self, id: PaymentId) -> Result<Option<Payment>, StoreError> {
        let tables = self.tables()?;
        Ok(Self::find(&self.overlay.payments, &tables.payments, &id))
    }

    fn find_payment_by_reference(
        &self,
        reference: &PaymentReference,
    ) -> Result<Option<Payment>, StoreError> {
        let tables = self.tables()?;
        Ok(Self::merged(&self.overlay.payments, &tables.payments, |p| {
            &p.reference == reference
        })
        .into_iter()
        .next())
    }

    fn payments_for_account(&self, account_id: AccountId) -> Result<Vec<Payment>, StoreError> {
        let tables = self.tables()?;
        Ok(Self::merged(&self.overlay.payments, &tables.payments, |p| {
            p.account_id == account_id
        }))
    }

    fn all_payments(&self) -> Result<Vec<Payment>, StoreError> {
        let tables = self.tables()?;
        Ok(Self::merged(&self.overlay.payments, &tables.payments, |_| true))
    }

    fn save_payment(&mut self, payment: Payment) -> Result<(), StoreError> {
        stage(&mut self.overlay.payments, payment);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use propmarket_core::{BalanceId, Credits};

    fn open_account(tx: &mut InMemoryTx, user_id: UserId) -> AccountId {
        let (account, _) = Account::open(AccountId::new(), user_id, Utc::now());
        let id = account.id;
        tx.insert_account(account).unwrap();
        tx.save_balance(CreditBalance::open(BalanceId::new(), id, Utc::now()))
            .unwrap();
        id
    }

    #[test]
    fn uncommitted_writes_are_invisible_to_others_and_dropped_on_rollback() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().unwrap();
        let account_id = open_account(&mut tx, UserId::new());

        assert!(tx.find_account(account_id).unwrap().is_some());
        let other = store.begin().unwrap();
        assert!(other.find_account(account_id).unwrap().is_none());

        drop(tx);
        assert_eq!(store.row_counts(), [0, 0, 0, 0, 0]);
    }

    #[test]
    fn commit_publishes_every_table_at_once() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().unwrap();
        let account_id = open_account(&mut tx, UserId::new());
        tx.commit().unwrap();

        let reader = store.begin().unwrap();
        let balance = reader.find_balance(account_id).unwrap().unwrap();
        assert_eq!(balance.balance(), Credits::ZERO);
        assert_eq!(store.row_counts(), [1, 1, 0, 0, 0]);
    }

    #[test]
    fn second_account_for_the_same_user_violates_uniqueness() {
        let store = InMemoryStore::new();
        let user_id = UserId::new();

        let mut first = store.begin().unwrap();
        let mut second = store.begin().unwrap();
        open_account(&mut first, user_id);
        open_account(&mut second, user_id);

        first.commit().unwrap();
        assert_eq!(
            second.commit().unwrap_err(),
            StoreError::UniqueViolation(UniqueConstraint::AccountUser)
        );
        assert_eq!(store.row_counts()[0], 1);
    }

    #[test]
    fn locks_are_released_when_the_transaction_ends() {
        let store = InMemoryStore::with_lock_timeout(Duration::from_millis(20));
        let key = LockKey::Account(AccountId::new());

        let mut tx = store.begin().unwrap();
        tx.lock(&[key, key]).unwrap();
        assert!(store.is_locked(&key));

        let mut contender = store.begin().unwrap();
        assert_eq!(
            contender.lock(&[key]).unwrap_err(),
            StoreError::LockTimeout(key)
        );

        tx.commit().unwrap();
        assert!(!store.is_locked(&key));
        contender.lock(&[key]).unwrap();
    }

    #[test]
    fn deletes_hide_committed_rows_inside_the_transaction() {
        use propmarket_core::Aggregate;
        use propmarket_listings::{ListingCommand, ListingPolicy};

        let store = InMemoryStore::new();
        let property_id = PropertyId::new();
        let mut listing = Listing::empty(ListingId::new());
        listing
            .execute(&ListingCommand::Publish {
                property_id,
                policy: ListingPolicy::default(),
                occurred_at: Utc::now(),
            })
            .unwrap();
        let listing_id = listing.id_typed();

        let mut tx = store.begin().unwrap();
        tx.save_listing(listing).unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin().unwrap();
        tx.delete_listing(listing_id).unwrap();
        assert!(tx.find_listing(listing_id).unwrap().is_none());
        assert!(tx.listings_for_property(property_id).unwrap().is_empty());
        tx.commit().unwrap();

        assert_eq!(store.row_counts()[2], 0);
    }
}
