use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use propmarket_core::{
    AccountId, Aggregate, AggregateRoot, BookingId, DomainError, DomainResult, PropertyId, UserId,
};
use propmarket_events::Event;

use crate::slot::TimeSlot;

/// Booking lifecycle: `Pending -> Confirmed | Cancelled`, `Confirmed -> Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    /// Whether a booking in this status still occupies its time slot.
    pub fn holds_slot(self) -> bool {
        self != BookingStatus::Cancelled
    }
}

/// Who is asking to cancel a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CancelActor {
    /// The account owning the booked property.
    Owner(AccountId),
    /// The user who requested the visit.
    Requester(UserId),
}

/// Aggregate root: Booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    id: BookingId,
    requester_id: Option<UserId>,
    property_id: Option<PropertyId>,
    slot: Option<TimeSlot>,
    status: BookingStatus,
    notes: Option<String>,
    created_at: Option<DateTime<Utc>>,
    version: u64,
}

impl Booking {
    /// Create an empty, not-yet-requested instance.
    pub fn empty(id: BookingId) -> Self {
        Self {
            id,
            requester_id: None,
            property_id: None,
            slot: None,
            status: BookingStatus::Pending,
            notes: None,
            created_at: None,
            version: 0,
        }
    }

    pub fn id_typed(&self) -> BookingId {
        self.id
    }

    pub fn requester_id(&self) -> Option<UserId> {
        self.requester_id
    }

    pub fn property_id(&self) -> Option<PropertyId> {
        self.property_id
    }

    pub fn slot(&self) -> Option<TimeSlot> {
        self.slot
    }

    pub fn status(&self) -> BookingStatus {
        self.status
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// Whether this booking blocks `slot` for its property and requester.
    pub fn conflicts_with(&self, slot: &TimeSlot) -> bool {
        self.status.holds_slot() && self.slot.is_some_and(|own| own.overlaps(slot))
    }

    fn is_requested(&self) -> bool {
        self.created_at.is_some()
    }
}

/// Reject `slot` if any of `existing` still holds an overlapping slot.
///
/// `scope` names what the bookings share ("property" or "requester") and
/// ends up in the error message.
pub fn ensure_no_overlap<'a>(
    slot: &TimeSlot,
    existing: impl IntoIterator<Item = &'a Booking>,
    scope: &str,
) -> DomainResult<()> {
    if existing.into_iter().any(|b| b.conflicts_with(slot)) {
        return Err(DomainError::conflict(format!(
            "the {scope} already has a booking in this time slot"
        )));
    }
    Ok(())
}

impl AggregateRoot for Booking {
    type Id = BookingId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingCommand {
    /// Overlap checks against stored bookings are done by the caller first.
    Request {
        requester_id: UserId,
        property_id: PropertyId,
        slot: TimeSlot,
        notes: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    Confirm {
        acting_account: AccountId,
        property_owner: AccountId,
        occurred_at: DateTime<Utc>,
    },
    Cancel {
        actor: CancelActor,
        /// Resolved owner of the booked property, when there is one.
        property_owner: Option<AccountId>,
        occurred_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequested {
    pub booking_id: BookingId,
    pub requester_id: UserId,
    pub property_id: PropertyId,
    pub slot: TimeSlot,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingConfirmed {
    pub booking_id: BookingId,
    pub confirmed_by: AccountId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingCancelled {
    pub booking_id: BookingId,
    pub cancelled_by: CancelActor,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingEvent {
    Requested(BookingRequested),
    Confirmed(BookingConfirmed),
    Cancelled(BookingCancelled),
}

impl Event for BookingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BookingEvent::Requested(_) => "booking.requested",
            BookingEvent::Confirmed(_) => "booking.confirmed",
            BookingEvent::Cancelled(_) => "booking.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BookingEvent::Requested(e) => e.occurred_at,
            BookingEvent::Confirmed(e) => e.occurred_at,
            BookingEvent::Cancelled(e) => e.occurred_at,
        }
    }

    fn subject_id(&self) -> Uuid {
        let id = match self {
            BookingEvent::Requested(e) => e.booking_id,
            BookingEvent::Confirmed(e) => e.booking_id,
            BookingEvent::Cancelled(e) => e.booking_id,
        };
        *id.as_uuid()
    }
}

impl Aggregate for Booking {
    type Command = BookingCommand;
    type Event = BookingEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            BookingEvent::Requested(e) => {
                self.requester_id = Some(e.requester_id);
                self.property_id = Some(e.property_id);
                self.slot = Some(e.slot);
                self.notes = e.notes.clone();
                self.status = BookingStatus::Pending;
                self.created_at = Some(e.occurred_at);
            }
            BookingEvent::Confirmed(_) => {
                self.status = BookingStatus::Confirmed;
            }
            BookingEvent::Cancelled(_) => {
                self.status = BookingStatus::Cancelled;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            BookingCommand::Request {
                requester_id,
                property_id,
                slot,
                notes,
                occurred_at,
            } => {
                if self.is_requested() {
                    return Err(DomainError::conflict("booking already exists"));
                }

                Ok(vec![BookingEvent::Requested(BookingRequested {
                    booking_id: self.id,
                    requester_id: *requester_id,
                    property_id: *property_id,
                    slot: *slot,
                    notes: notes.clone(),
                    occurred_at: *occurred_at,
                })])
            }
            BookingCommand::Confirm {
                acting_account,
                property_owner,
                occurred_at,
            } => {
                self.ensure_requested()?;

                if acting_account != property_owner {
                    return Err(DomainError::permission_denied(
                        "only the property owner can confirm a booking",
                    ));
                }
                if self.status != BookingStatus::Pending {
                    return Err(DomainError::validation(
                        "only pending bookings can be confirmed",
                    ));
                }

                Ok(vec![BookingEvent::Confirmed(BookingConfirmed {
                    booking_id: self.id,
                    confirmed_by: *acting_account,
                    occurred_at: *occurred_at,
                })])
            }
            BookingCommand::Cancel {
                actor,
                property_owner,
                occurred_at,
            } => {
                self.ensure_requested()?;
                self.ensure_may_cancel(actor, *property_owner)?;

                if self.status == BookingStatus::Cancelled {
                    return Err(DomainError::validation("booking is already cancelled"));
                }

                Ok(vec![BookingEvent::Cancelled(BookingCancelled {
                    booking_id: self.id,
                    cancelled_by: *actor,
                    occurred_at: *occurred_at,
                })])
            }
        }
    }
}

impl Booking {
    fn ensure_requested(&self) -> DomainResult<()> {
        if !self.is_requested() {
            return Err(DomainError::not_found("booking"));
        }
        Ok(())
    }

    fn ensure_may_cancel(
        &self,
        actor: &CancelActor,
        property_owner: Option<AccountId>,
    ) -> DomainResult<()> {
        let allowed = match actor {
            CancelActor::Owner(account_id) => {
                let owner = property_owner.ok_or_else(|| DomainError::not_found("property owner"))?;
                owner == *account_id
            }
            CancelActor::Requester(user_id) => self.requester_id == Some(*user_id),
        };

        if !allowed {
            return Err(DomainError::permission_denied(
                "only the requester or the property owner can cancel a booking",
            ));
        }
        Ok(())
    }
}
