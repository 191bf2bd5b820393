//! BookingScheduler: visit requests with overlap detection per property and
//! per requester, and owner/requester permissions for confirm and cancel.

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use propmarket_bookings::{Booking, BookingCommand, CancelActor, TimeSlot, ensure_no_overlap};
use propmarket_core::{AccountId, Aggregate, BookingId, DomainError, PropertyId, UserId};

use crate::error::ServiceError;
use crate::store::{BookingRepository, LockKey, Transaction, UnitOfWork};

use super::{ServiceContext, log_failure};

#[derive(Debug, Clone)]
pub struct BookingScheduler<S> {
    ctx: ServiceContext<S>,
}

impl<S: UnitOfWork> BookingScheduler<S> {
    pub fn new(ctx: ServiceContext<S>) -> Self {
        Self { ctx }
    }

    /// Request a visit of `property_id` during `[start, end)`.
    ///
    /// Both the property and the requester keys are locked before the
    /// overlap checks, so two overlapping requests can never both pass.
    #[instrument(skip_all, fields(%requester_id, %property_id))]
    pub fn create(
        &self,
        requester_id: UserId,
        property_id: PropertyId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        notes: Option<String>,
    ) -> Result<Booking, ServiceError> {
        let booking = self
            .ctx
            .transact(|tx, outbox| {
                let slot = TimeSlot::new(start, end)?;
                if !self.ctx.directory().property_exists(property_id) {
                    return Err(DomainError::not_found("property").into());
                }

                tx.lock(&[
                    LockKey::Property(property_id),
                    LockKey::Requester(requester_id),
                ])?;
                ensure_no_overlap(&slot, &tx.bookings_for_requester(requester_id)?, "requester")?;
                ensure_no_overlap(&slot, &tx.bookings_for_property(property_id)?, "property")?;

                let mut booking = Booking::empty(BookingId::new());
                let events = booking.execute(&BookingCommand::Request {
                    requester_id,
                    property_id,
                    slot,
                    notes: notes.clone(),
                    occurred_at: self.ctx.now(),
                })?;
                tx.save_booking(booking.clone())?;
                outbox.record_all("booking", &events);
                Ok(booking)
            })
            .inspect_err(|e| log_failure("bookings.create", e))?;

        info!(booking_id = %booking.id_typed(), "booking requested");
        Ok(booking)
    }

    /// Confirm a pending booking on behalf of the property's owner.
    #[instrument(skip_all, fields(%booking_id, %acting_account))]
    pub fn confirm(
        &self,
        booking_id: BookingId,
        acting_account: AccountId,
    ) -> Result<Booking, ServiceError> {
        let booking = self
            .ctx
            .transact(|tx, outbox| {
                let (mut booking, property_id) = load_locked(tx, booking_id)?;
                let property_owner = self
                    .ctx
                    .directory()
                    .resolve_owning_account(property_id)
                    .ok_or_else(|| DomainError::not_found("property owner"))?;

                let events = booking.execute(&BookingCommand::Confirm {
                    acting_account,
                    property_owner,
                    occurred_at: self.ctx.now(),
                })?;
                tx.save_booking(booking.clone())?;
                outbox.record_all("booking", &events);
                Ok(booking)
            })
            .inspect_err(|e| log_failure("bookings.confirm", e))?;

        info!("booking confirmed");
        Ok(booking)
    }

    /// Cancel a booking as its requester or as the property's owner.
    #[instrument(skip_all, fields(%booking_id, ?actor))]
    pub fn cancel(&self, booking_id: BookingId, actor: CancelActor) -> Result<Booking, ServiceError> {
        let booking = self
            .ctx
            .transact(|tx, outbox| {
                let (mut booking, property_id) = load_locked(tx, booking_id)?;
                let property_owner = self.ctx.directory().resolve_owning_account(property_id);

                let events = booking.execute(&BookingCommand::Cancel {
                    actor,
                    property_owner,
                    occurred_at: self.ctx.now(),
                })?;
                tx.save_booking(booking.clone())?;
                outbox.record_all("booking", &events);
                Ok(booking)
            })
            .inspect_err(|e| log_failure("bookings.cancel", e))?;

        info!("booking cancelled");
        Ok(booking)
    }

    pub fn get(&self, booking_id: BookingId) -> Result<Booking, ServiceError> {
        self.ctx.transact(|tx, _| {
            tx.find_booking(booking_id)?
                .ok_or_else(|| DomainError::not_found("booking").into())
        })
    }

    /// Bookings made by `requester_id`, latest start first.
    pub fn list_by_requester(&self, requester_id: UserId) -> Result<Vec<Booking>, ServiceError> {
        let mut bookings = self
            .ctx
            .transact(|tx, _| Ok(tx.bookings_for_requester(requester_id)?))?;
        latest_start_first(&mut bookings);
        Ok(bookings)
    }

    /// Bookings of `property_id`, latest start first.
    pub fn list_by_property(&self, property_id: PropertyId) -> Result<Vec<Booking>, ServiceError> {
        let mut bookings = self
            .ctx
            .transact(|tx, _| Ok(tx.bookings_for_property(property_id)?))?;
        latest_start_first(&mut bookings);
        Ok(bookings)
    }
}

/// Read a booking under its property lock.
fn load_locked<T: Transaction>(
    tx: &mut T,
    booking_id: BookingId,
) -> Result<(Booking, PropertyId), ServiceError> {
    let property_id = tx
        .find_booking(booking_id)?
        .and_then(|b| b.property_id())
        .ok_or_else(|| DomainError::not_found("booking"))?;
    tx.lock(&[LockKey::Property(property_id)])?;
    let booking = tx
        .find_booking(booking_id)?
        .ok_or_else(|| DomainError::not_found("booking"))?;
    Ok((booking, property_id))
}

fn latest_start_first(bookings: &mut [Booking]) {
    bookings.sort_by_key(|b| std::cmp::Reverse(b.slot().map(|s| s.start())));
}
