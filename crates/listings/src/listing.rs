use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use propmarket_core::{Aggregate, AggregateRoot, Credits, DomainError, ListingId, PropertyId};
use propmarket_events::Event;

use crate::policy::ListingPolicy;

/// Listing publication lifecycle.
///
/// `Pending -> Published -> (Expired | Suspended)`; `Published` loops on
/// itself through renewal. Nothing leaves `Expired` or `Suspended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Pending,
    Published,
    Suspended,
    Expired,
}

impl ListingStatus {
    /// Statuses that block another listing for the same property.
    pub fn is_active(self) -> bool {
        matches!(self, ListingStatus::Pending | ListingStatus::Published)
    }
}

/// Aggregate root: Listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    id: ListingId,
    property_id: Option<PropertyId>,
    status: ListingStatus,
    published_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    view_count: u64,
    fee_charged: Credits,
    version: u64,
    created: bool,
}

impl Listing {
    /// Create an empty, not-yet-published instance.
    pub fn empty(id: ListingId) -> Self {
        Self {
            id,
            property_id: None,
            status: ListingStatus::Pending,
            published_at: None,
            expires_at: None,
            view_count: 0,
            fee_charged: Credits::ZERO,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ListingId {
        self.id
    }

    pub fn property_id(&self) -> Option<PropertyId> {
        self.property_id
    }

    pub fn status(&self) -> ListingStatus {
        self.status
    }

    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        self.published_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn view_count(&self) -> u64 {
        self.view_count
    }

    pub fn fee_charged(&self) -> Credits {
        self.fee_charged
    }

    pub fn is_active(&self) -> bool {
        self.created && self.status.is_active()
    }

    /// Published and past its expiration time.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.created
            && self.status == ListingStatus::Published
            && self.expires_at.is_some_and(|at| at < now)
    }
}

impl AggregateRoot for Listing {
    type Id = ListingId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingCommand {
    /// Publish a new listing. The fee has already been charged by the caller.
    Publish {
        property_id: PropertyId,
        policy: ListingPolicy,
        occurred_at: DateTime<Utc>,
    },
    RecordView {
        occurred_at: DateTime<Utc>,
    },
    Suspend {
        occurred_at: DateTime<Utc>,
    },
    /// Extend a published listing by the policy duration, counted from now.
    Renew {
        policy: ListingPolicy,
        occurred_at: DateTime<Utc>,
    },
    Expire {
        occurred_at: DateTime<Utc>,
    },
    Delete {
        occurred_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingPublished {
    pub listing_id: ListingId,
    pub property_id: PropertyId,
    pub fee_charged: Credits,
    pub published_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingViewed {
    pub listing_id: ListingId,
    pub view_count: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingRenewed {
    pub listing_id: ListingId,
    pub fee_charged: Credits,
    pub expires_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingSuspended {
    pub listing_id: ListingId,
    pub previous_status: ListingStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingExpired {
    pub listing_id: ListingId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingDeleted {
    pub listing_id: ListingId,
    pub property_id: PropertyId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingEvent {
    Published(ListingPublished),
    Viewed(ListingViewed),
    Renewed(ListingRenewed),
    Suspended(ListingSuspended),
    Expired(ListingExpired),
    Deleted(ListingDeleted),
}

impl Event for ListingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ListingEvent::Published(_) => "listing.published",
            ListingEvent::Viewed(_) => "listing.viewed",
            ListingEvent::Renewed(_) => "listing.renewed",
            ListingEvent::Suspended(_) => "listing.suspended",
            ListingEvent::Expired(_) => "listing.expired",
            ListingEvent::Deleted(_) => "listing.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ListingEvent::Published(e) => e.published_at,
            ListingEvent::Viewed(e) => e.occurred_at,
            ListingEvent::Renewed(e) => e.occurred_at,
            ListingEvent::Suspended(e) => e.occurred_at,
            ListingEvent::Expired(e) => e.occurred_at,
            ListingEvent::Deleted(e) => e.occurred_at,
        }
    }

    fn subject_id(&self) -> Uuid {
        let id = match self {
            ListingEvent::Published(e) => e.listing_id,
            ListingEvent::Viewed(e) => e.listing_id,
            ListingEvent::Renewed(e) => e.listing_id,
            ListingEvent::Suspended(e) => e.listing_id,
            ListingEvent::Expired(e) => e.listing_id,
            ListingEvent::Deleted(e) => e.listing_id,
        };
        *id.as_uuid()
    }
}

impl Aggregate for Listing {
    type Command = ListingCommand;
    type Event = ListingEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ListingEvent::Published(e) => {
                self.property_id = Some(e.property_id);
                self.status = ListingStatus::Published;
                self.published_at = Some(e.published_at);
                self.expires_at = Some(e.expires_at);
                self.view_count = 0;
                self.fee_charged = e.fee_charged;
                self.created = true;
            }
            ListingEvent::Viewed(e) => {
                self.view_count = e.view_count;
            }
            ListingEvent::Renewed(e) => {
                self.expires_at = Some(e.expires_at);
            }
            ListingEvent::Suspended(_) => {
                self.status = ListingStatus::Suspended;
            }
            ListingEvent::Expired(_) => {
                self.status = ListingStatus::Expired;
            }
            ListingEvent::Deleted(_) => {
                self.created = false;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ListingCommand::Publish {
                property_id,
                policy,
                occurred_at,
            } => {
                if self.created {
                    return Err(DomainError::conflict("listing already published"));
                }

                Ok(vec![ListingEvent::Published(ListingPublished {
                    listing_id: self.id,
                    property_id: *property_id,
                    fee_charged: policy.publication_fee,
                    published_at: *occurred_at,
                    expires_at: policy.expires_from(*occurred_at)?,
                })])
            }
            ListingCommand::RecordView { occurred_at } => {
                // Views of anything but a live listing are ignored.
                if !self.created || self.status != ListingStatus::Published {
                    return Ok(vec![]);
                }

                Ok(vec![ListingEvent::Viewed(ListingViewed {
                    listing_id: self.id,
                    view_count: self.view_count.saturating_add(1),
                    occurred_at: *occurred_at,
                })])
            }
            ListingCommand::Suspend { occurred_at } => {
                self.ensure_created()?;

                Ok(vec![ListingEvent::Suspended(ListingSuspended {
                    listing_id: self.id,
                    previous_status: self.status,
                    occurred_at: *occurred_at,
                })])
            }
            ListingCommand::Renew {
                policy,
                occurred_at,
            } => {
                self.ensure_published("renew")?;

                Ok(vec![ListingEvent::Renewed(ListingRenewed {
                    listing_id: self.id,
                    fee_charged: policy.publication_fee,
                    expires_at: policy.expires_from(*occurred_at)?,
                    occurred_at: *occurred_at,
                })])
            }
            ListingCommand::Expire { occurred_at } => {
                self.ensure_published("expire")?;

                Ok(vec![ListingEvent::Expired(ListingExpired {
                    listing_id: self.id,
                    occurred_at: *occurred_at,
                })])
            }
            ListingCommand::Delete { occurred_at } => {
                let property_id = self
                    .property_id
                    .filter(|_| self.created)
                    .ok_or_else(|| DomainError::not_found("listing"))?;

                Ok(vec![ListingEvent::Deleted(ListingDeleted {
                    listing_id: self.id,
                    property_id,
                    occurred_at: *occurred_at,
                })])
            }
        }
    }
}

impl Listing {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found("listing"));
        }
        Ok(())
    }

    fn ensure_published(&self, action: &str) -> Result<(), DomainError> {
        self.ensure_created()?;
        if self.status != ListingStatus::Published {
            return Err(DomainError::validation(format!(
                "cannot {action} a listing that is not published"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn published() -> Listing {
        let mut listing = Listing::empty(ListingId::new());
        listing
            .execute(&ListingCommand::Publish {
                property_id: PropertyId::new(),
                policy: ListingPolicy::default(),
                occurred_at: t0(),
            })
            .unwrap();
        listing
    }

    #[test]
    fn publish_sets_expiration_from_policy_duration() {
        let listing = published();

        assert_eq!(listing.status(), ListingStatus::Published);
        assert_eq!(listing.published_at(), Some(t0()));
        assert_eq!(listing.expires_at(), Some(t0() + Duration::days(30)));
        assert_eq!(listing.fee_charged(), Credits::whole(50));
        assert_eq!(listing.view_count(), 0);
        assert!(listing.is_active());
    }

    #[test]
    fn publishing_twice_is_rejected() {
        let listing = published();
        let err = listing
            .handle(&ListingCommand::Publish {
                property_id: PropertyId::new(),
                policy: ListingPolicy::default(),
                occurred_at: t0(),
            })
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn publish_with_an_unrepresentable_expiration_is_rejected() {
        let mut listing = Listing::empty(ListingId::new());
        let err = listing
            .execute(&ListingCommand::Publish {
                property_id: PropertyId::new(),
                policy: ListingPolicy::new(Credits::whole(50), u32::MAX),
                occurred_at: t0(),
            })
            .unwrap_err();

        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(listing.status(), ListingStatus::Pending);
        assert_eq!(listing.expires_at(), None);
    }

    #[test]
    fn views_only_count_while_published() {
        let mut listing = published();
        let view = ListingCommand::RecordView { occurred_at: t0() };

        listing.execute(&view).unwrap();
        listing.execute(&view).unwrap();
        assert_eq!(listing.view_count(), 2);

        listing
            .execute(&ListingCommand::Suspend { occurred_at: t0() })
            .unwrap();
        let events = listing.execute(&view).unwrap();
        assert!(events.is_empty());
        assert_eq!(listing.view_count(), 2);
    }

    #[test]
    fn views_of_an_unpublished_listing_are_ignored() {
        let listing = Listing::empty(ListingId::new());
        let events = listing
            .handle(&ListingCommand::RecordView { occurred_at: t0() })
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn suspend_applies_from_any_status() {
        let mut listing = published();
        listing
            .execute(&ListingCommand::Expire { occurred_at: t0() })
            .unwrap();

        listing
            .execute(&ListingCommand::Suspend { occurred_at: t0() })
            .unwrap();
        assert_eq!(listing.status(), ListingStatus::Suspended);
        assert!(!listing.is_active());
    }

    #[test]
    fn renewal_extends_from_renewal_time_with_current_fee() {
        let mut listing = published();
        let later = t0() + Duration::days(31);
        let policy = ListingPolicy::new(Credits::whole(75), 30);

        let events = listing
            .execute(&ListingCommand::Renew {
                policy,
                occurred_at: later,
            })
            .unwrap();

        assert_eq!(listing.expires_at(), Some(later + Duration::days(30)));
        assert_eq!(listing.status(), ListingStatus::Published);
        // The stored fee stays the original publication fee.
        assert_eq!(listing.fee_charged(), Credits::whole(50));
        match &events[0] {
            ListingEvent::Renewed(e) => assert_eq!(e.fee_charged, Credits::whole(75)),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn nothing_leaves_expired() {
        let mut listing = published();
        listing
            .execute(&ListingCommand::Expire { occurred_at: t0() })
            .unwrap();

        let renew = listing.handle(&ListingCommand::Renew {
            policy: ListingPolicy::default(),
            occurred_at: t0(),
        });
        assert!(matches!(renew, Err(DomainError::Validation(_))));
        assert!(listing
            .handle(&ListingCommand::Expire { occurred_at: t0() })
            .is_err());
    }

    #[test]
    fn is_due_only_after_expiration() {
        let listing = published();
        let expiry = t0() + Duration::days(30);

        assert!(!listing.is_due(expiry));
        assert!(listing.is_due(expiry + Duration::seconds(1)));
    }

    #[test]
    fn deleting_an_unpublished_listing_is_not_found() {
        let listing = Listing::empty(ListingId::new());
        let err = listing
            .handle(&ListingCommand::Delete { occurred_at: t0() })
            .unwrap_err();
        assert_eq!(err, DomainError::not_found("listing"));
    }

    proptest! {
        #[test]
        fn view_count_never_decreases(ops in prop::collection::vec(0u8..4, 0..30)) {
            let mut listing = published();
            let mut last = listing.view_count();

            for op in ops {
                let cmd = match op {
                    0 | 1 => ListingCommand::RecordView { occurred_at: t0() },
                    2 => ListingCommand::Renew { policy: ListingPolicy::default(), occurred_at: t0() },
                    _ => ListingCommand::Suspend { occurred_at: t0() },
                };
                let _ = listing.execute(&cmd);
                prop_assert!(listing.view_count() >= last);
                last = listing.view_count();
            }
        }
    }
}
