//! ListingLifecycle: paid publication, views, suspension, deletion and the
//! expiry sweep that renews or expires overdue listings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use propmarket_core::{Aggregate, DomainError, ListingId, PropertyId};
use propmarket_listings::{Listing, ListingCommand, ListingStatus};

use crate::error::ServiceError;
use crate::store::{ListingRepository, LockKey, Transaction, UnitOfWork};

use super::ledger::debit_in;
use super::{ServiceContext, log_failure};

/// What one expiry sweep did, per listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Charged again and extended.
    pub renewed: Vec<ListingId>,
    /// Owner unresolvable or out of credits.
    pub expired: Vec<ListingId>,
    /// Unexpected errors; these listings were left untouched.
    pub failed: Vec<ListingId>,
}

impl SweepReport {
    pub fn processed(&self) -> usize {
        self.renewed.len() + self.expired.len() + self.failed.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SweepOutcome {
    Renewed,
    Expired,
    /// Changed by someone else since the sweep listed it.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct ListingLifecycle<S> {
    ctx: ServiceContext<S>,
}

impl<S: UnitOfWork> ListingLifecycle<S> {
    pub fn new(ctx: ServiceContext<S>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &ServiceContext<S> {
        &self.ctx
    }

    /// Charge the owner the publication fee and publish a new listing.
    #[instrument(skip_all, fields(%property_id))]
    pub fn publish(&self, property_id: PropertyId) -> Result<Listing, ServiceError> {
        let listing = self
            .ctx
            .transact(|tx, outbox| {
                if !self.ctx.directory().property_exists(property_id) {
                    return Err(DomainError::not_found("property").into());
                }

                tx.lock(&[LockKey::Property(property_id)])?;
                let has_active = tx
                    .listings_for_property(property_id)?
                    .iter()
                    .any(Listing::is_active);
                if has_active {
                    return Err(
                        DomainError::conflict("property already has an active listing").into(),
                    );
                }

                let owner = self
                    .ctx
                    .directory()
                    .resolve_owning_account(property_id)
                    .ok_or_else(|| DomainError::not_found("property owner"))?;

                let now = self.ctx.now();
                let policy = self.ctx.config().listing_policy();
                debit_in(tx, outbox, owner, policy.publication_fee, now)?;

                let mut listing = Listing::empty(ListingId::new());
                let events = listing.execute(&ListingCommand::Publish {
                    property_id,
                    policy,
                    occurred_at: now,
                })?;
                tx.save_listing(listing.clone())?;
                outbox.record_all("listing", &events);
                Ok(listing)
            })
            .inspect_err(|e| log_failure("listings.publish", e))?;

        info!(listing_id = %listing.id_typed(), expires_at = ?listing.expires_at(), "listing published");
        Ok(listing)
    }

    /// Count a view of a published listing; anything else is ignored.
    pub fn record_view(&self, listing_id: ListingId) -> Result<(), ServiceError> {
        self.ctx.transact(|tx, outbox| {
            let Some(mut listing) = load_locked(tx, listing_id)? else {
                return Ok(());
            };
            let events = listing.execute(&ListingCommand::RecordView {
                occurred_at: self.ctx.now(),
            })?;
            if !events.is_empty() {
                tx.save_listing(listing)?;
                outbox.record_all("listing", &events);
            }
            Ok(())
        })
    }

    #[instrument(skip_all, fields(%listing_id))]
    pub fn suspend(&self, listing_id: ListingId) -> Result<Listing, ServiceError> {
        let listing = self
            .ctx
            .transact(|tx, outbox| {
                let mut listing =
                    load_locked(tx, listing_id)?.ok_or_else(|| DomainError::not_found("listing"))?;
                let events = listing.execute(&ListingCommand::Suspend {
                    occurred_at: self.ctx.now(),
                })?;
                tx.save_listing(listing.clone())?;
                outbox.record_all("listing", &events);
                Ok(listing)
            })
            .inspect_err(|e| log_failure("listings.suspend", e))?;

        info!("listing suspended");
        Ok(listing)
    }

    /// Remove a listing whatever its status.
    #[instrument(skip_all, fields(%listing_id))]
    pub fn delete(&self, listing_id: ListingId) -> Result<(), ServiceError> {
        self.ctx
            .transact(|tx, outbox| {
                let mut listing =
                    load_locked(tx, listing_id)?.ok_or_else(|| DomainError::not_found("listing"))?;
                let events = listing.execute(&ListingCommand::Delete {
                    occurred_at: self.ctx.now(),
                })?;
                tx.delete_listing(listing_id)?;
                outbox.record_all("listing", &events);
                Ok(())
            })
            .inspect_err(|e| log_failure("listings.delete", e))?;

        info!("listing deleted");
        Ok(())
    }

    /// Renew or expire every published listing whose expiration is before `now`.
    ///
    /// Each listing runs in its own transaction: the owner is charged the
    /// current publication fee and the listing extended to `now + duration`;
    /// an unresolvable owner or insufficient credits expires it instead. Any
    /// other failure is reported and leaves that listing untouched without
    /// affecting the rest.
    #[instrument(skip_all, fields(%now))]
    pub fn expire_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, ServiceError> {
        let due: Vec<ListingId> = self.ctx.transact(|tx, _| {
            Ok(tx
                .listings_with_status(ListingStatus::Published)?
                .into_iter()
                .filter(|l| l.is_due(now))
                .map(|l| l.id_typed())
                .collect())
        })?;

        let mut report = SweepReport::default();
        for listing_id in due {
            match self.renew_or_expire(listing_id, now) {
                Ok(SweepOutcome::Renewed) => report.renewed.push(listing_id),
                Ok(SweepOutcome::Expired) => report.expired.push(listing_id),
                Ok(SweepOutcome::Skipped) => debug!(%listing_id, "listing changed before sweep"),
                Err(error) => {
                    warn!(%listing_id, %error, "sweep failed for listing");
                    report.failed.push(listing_id);
                }
            }
        }

        info!(
            renewed = report.renewed.len(),
            expired = report.expired.len(),
            failed = report.failed.len(),
            "expiry sweep finished"
        );
        Ok(report)
    }

    fn renew_or_expire(
        &self,
        listing_id: ListingId,
        now: DateTime<Utc>,
    ) -> Result<SweepOutcome, ServiceError> {
        self.ctx.transact(|tx, outbox| {
            let Some(mut listing) = load_locked(tx, listing_id)? else {
                return Ok(SweepOutcome::Skipped);
            };
            let Some(property_id) = listing.property_id().filter(|_| listing.is_due(now)) else {
                return Ok(SweepOutcome::Skipped);
            };

            let policy = self.ctx.config().listing_policy();
            let charged = match self.ctx.directory().resolve_owning_account(property_id) {
                None => false,
                Some(owner) => match debit_in(tx, outbox, owner, policy.publication_fee, now) {
                    Ok(_) => true,
                    Err(ServiceError::Domain(
                        DomainError::InsufficientCredits { .. } | DomainError::NotFound(_),
                    )) => false,
                    Err(other) => return Err(other),
                },
            };

            let (command, outcome) = if charged {
                (
                    ListingCommand::Renew {
                        policy,
                        occurred_at: now,
                    },
                    SweepOutcome::Renewed,
                )
            } else {
                (ListingCommand::Expire { occurred_at: now }, SweepOutcome::Expired)
            };

            let events = listing.execute(&command)?;
            tx.save_listing(listing)?;
            outbox.record_all("listing", &events);
            Ok(outcome)
        })
    }

    pub fn get(&self, listing_id: ListingId) -> Result<Listing, ServiceError> {
        self.ctx.transact(|tx, _| {
            tx.find_listing(listing_id)?
                .ok_or_else(|| DomainError::not_found("listing").into())
        })
    }

    pub fn list_all(&self) -> Result<Vec<Listing>, ServiceError> {
        let mut listings = self.ctx.transact(|tx, _| Ok(tx.all_listings()?))?;
        newest_first(&mut listings);
        Ok(listings)
    }

    pub fn list_by_property(&self, property_id: PropertyId) -> Result<Vec<Listing>, ServiceError> {
        let mut listings = self
            .ctx
            .transact(|tx, _| Ok(tx.listings_for_property(property_id)?))?;
        newest_first(&mut listings);
        Ok(listings)
    }

    pub fn list_by_status(&self, status: ListingStatus) -> Result<Vec<Listing>, ServiceError> {
        let mut listings = self
            .ctx
            .transact(|tx, _| Ok(tx.listings_with_status(status)?))?;
        newest_first(&mut listings);
        Ok(listings)
    }

    /// Published listings, most recently published first.
    pub fn list_published(&self) -> Result<Vec<Listing>, ServiceError> {
        self.list_by_status(ListingStatus::Published)
    }
}

/// Read a listing after taking its property lock.
///
/// The listing is read once to learn its property, then again under the lock
/// so the returned state cannot change before the transaction ends.
fn load_locked<T: Transaction>(
    tx: &mut T,
    listing_id: ListingId,
) -> Result<Option<Listing>, ServiceError> {
    let Some(property_id) = tx.find_listing(listing_id)?.and_then(|l| l.property_id()) else {
        return Ok(None);
    };
    tx.lock(&[LockKey::Property(property_id)])?;
    Ok(tx.find_listing(listing_id)?)
}

fn newest_first(listings: &mut [Listing]) {
    listings.sort_by(|a, b| b.published_at().cmp(&a.published_at()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use propmarket_core::{AccountId, Clock, Credits, FixedClock, UserId};
    use propmarket_payments::PaymentMethod;
    use rust_decimal::Decimal;

    use crate::directory::PropertyDirectory;
    use crate::error::ErrorKind;
    use crate::marketplace::{InMemoryMarketplace, Marketplace};

    /// Marketplace with one property whose owner holds `credits`.
    fn with_owner(credits: u32) -> (InMemoryMarketplace<FixedClock>, PropertyId, AccountId) {
        let m = Marketplace::in_memory_for_tests();
        let receipt = m
            .payments()
            .process(UserId::new(), Decimal::from(credits), PaymentMethod::Mpesa, None)
            .unwrap();
        let owner = receipt.payment.account_id;
        let property_id = PropertyId::new();
        m.directory.register(property_id, owner);
        (m, property_id, owner)
    }

    #[test]
    fn publish_charges_the_fee_and_sets_expiration() {
        let (m, property_id, owner) = with_owner(100);
        let now = m.clock.now();

        let listing = m.listings().publish(property_id).unwrap();

        assert_eq!(listing.status(), ListingStatus::Published);
        assert_eq!(listing.published_at(), Some(now));
        assert_eq!(listing.expires_at(), Some(now + Duration::days(30)));
        assert_eq!(listing.fee_charged(), Credits::whole(50));
        assert_eq!(listing.view_count(), 0);
        assert_eq!(m.ledger().get_balance(owner).unwrap().balance(), Credits::whole(50));
    }

    #[test]
    fn second_active_listing_for_a_property_conflicts() {
        let (m, property_id, owner) = with_owner(200);
        m.listings().publish(property_id).unwrap();

        let err = m.listings().publish(property_id).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(m.ledger().get_balance(owner).unwrap().balance(), Credits::whole(150));
    }

    #[test]
    fn suspended_listing_frees_the_property() {
        let (m, property_id, _) = with_owner(200);
        let first = m.listings().publish(property_id).unwrap();
        m.listings().suspend(first.id_typed()).unwrap();

        let second = m.listings().publish(property_id).unwrap();
        assert_ne!(first.id_typed(), second.id_typed());
        assert_eq!(m.listings().list_by_property(property_id).unwrap().len(), 2);
    }

    #[test]
    fn publish_failures_report_their_cause() {
        let (m, _, _) = with_owner(100);
        assert_eq!(
            m.listings().publish(PropertyId::new()).unwrap_err().kind(),
            ErrorKind::NotFound
        );

        let orphan = PropertyId::new();
        m.directory.register_orphan(orphan);
        assert_eq!(m.listings().publish(orphan).unwrap_err().kind(), ErrorKind::NotFound);

        let (poor, property_id, owner) = with_owner(20);
        let err = poor.listings().publish(property_id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientCredits);
        assert!(poor.listings().list_by_property(property_id).unwrap().is_empty());
        assert_eq!(poor.ledger().get_balance(owner).unwrap().balance(), Credits::whole(20));
    }

    #[test]
    fn views_count_only_while_published() {
        let (m, property_id, _) = with_owner(100);
        let listing = m.listings().publish(property_id).unwrap();
        let id = listing.id_typed();

        m.listings().record_view(id).unwrap();
        m.listings().record_view(id).unwrap();
        m.listings().suspend(id).unwrap();
        m.listings().record_view(id).unwrap();
        m.listings().record_view(ListingId::new()).unwrap();

        assert_eq!(m.listings().get(id).unwrap().view_count(), 2);
    }

    #[test]
    fn delete_removes_regardless_of_status() {
        let (m, property_id, _) = with_owner(100);
        let id = m.listings().publish(property_id).unwrap().id_typed();
        m.listings().suspend(id).unwrap();

        m.listings().delete(id).unwrap();

        assert_eq!(m.listings().get(id).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(m.listings().delete(id).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(m.listings().suspend(id).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn sweep_renews_when_the_owner_can_pay() {
        let (m, property_id, owner) = with_owner(100);
        let listing = m.listings().publish(property_id).unwrap();

        m.clock.advance(Duration::days(31));
        let now = m.clock.now();
        let report = m.listings().expire_sweep(now).unwrap();

        assert_eq!(report.renewed, vec![listing.id_typed()]);
        let renewed = m.listings().get(listing.id_typed()).unwrap();
        assert_eq!(renewed.status(), ListingStatus::Published);
        assert_eq!(renewed.expires_at(), Some(now + Duration::days(30)));
        assert_eq!(m.ledger().get_balance(owner).unwrap().balance(), Credits::ZERO);
    }

    #[test]
    fn sweep_expires_when_the_owner_cannot_pay() {
        let (m, property_id, owner) = with_owner(50);
        let listing = m.listings().publish(property_id).unwrap();

        m.clock.advance(Duration::days(31));
        let report = m.listings().expire_sweep(m.clock.now()).unwrap();

        assert_eq!(report.expired, vec![listing.id_typed()]);
        assert_eq!(
            m.listings().get(listing.id_typed()).unwrap().status(),
            ListingStatus::Expired
        );
        assert_eq!(m.ledger().get_balance(owner).unwrap().balance(), Credits::ZERO);
    }

    #[test]
    fn sweep_expires_when_the_owner_is_gone_and_ignores_fresh_listings() {
        let (m, stale_property, _) = with_owner(200);
        let stale = m.listings().publish(stale_property).unwrap();
        m.clock.advance(Duration::days(31));

        let fresh_property = PropertyId::new();
        let fresh_owner = m.directory.resolve_owning_account(stale_property).unwrap();
        m.directory.register(fresh_property, fresh_owner);
        let fresh = m.listings().publish(fresh_property).unwrap();

        m.directory.register_orphan(stale_property);
        let report = m.listings().expire_sweep(m.clock.now()).unwrap();

        assert_eq!(report.expired, vec![stale.id_typed()]);
        assert!(report.renewed.is_empty());
        assert_eq!(
            m.listings().get(fresh.id_typed()).unwrap().status(),
            ListingStatus::Published
        );
    }

    #[test]
    fn renewal_charges_the_current_fee() {
        let (m, property_id, owner) = with_owner(100);
        let listing = m.listings().publish(property_id).unwrap();
        m.clock.advance(Duration::days(31));

        let mut config = m.listings().context().config().clone();
        config.publication_fee = Credits::whole(30);
        let repriced = m.with_config(config);
        repriced.listings().expire_sweep(m.clock.now()).unwrap();

        assert_eq!(m.ledger().get_balance(owner).unwrap().balance(), Credits::whole(20));
        assert_eq!(
            m.listings().get(listing.id_typed()).unwrap().fee_charged(),
            Credits::whole(50)
        );
    }

    #[test]
    fn published_listings_are_newest_first() {
        let (m, first_property, owner) = with_owner(200);
        let second_property = PropertyId::new();
        m.directory.register(second_property, owner);

        let older = m.listings().publish(first_property).unwrap();
        m.clock.advance(Duration::hours(1));
        let newer = m.listings().publish(second_property).unwrap();

        let ids: Vec<ListingId> = m
            .listings()
            .list_published()
            .unwrap()
            .iter()
            .map(|l| l.id_typed())
            .collect();
        assert_eq!(ids, vec![newer.id_typed(), older.id_typed()]);
        assert_eq!(m.listings().list_all().unwrap().len(), 2);
    }
}
