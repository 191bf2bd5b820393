use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use propmarket_core::{AccountId, Entity, UserId};
use propmarket_events::Event;

/// Kind of marketplace account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    #[default]
    Personal,
    Business,
}

/// A user's capability to own listings and hold credits.
///
/// Exactly one account exists per user; it is opened lazily on the user's
/// first payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub user_id: UserId,
    pub account_type: AccountType,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Open a default (personal, unverified) account for a user.
    pub fn open(id: AccountId, user_id: UserId, now: DateTime<Utc>) -> (Self, AccountEvent) {
        let account = Self {
            id,
            user_id,
            account_type: AccountType::default(),
            verified: false,
            created_at: now,
        };
        let event = AccountEvent::Opened(AccountOpened {
            account_id: id,
            user_id,
            account_type: account.account_type,
            occurred_at: now,
        });
        (account, event)
    }
}

impl Entity for Account {
    type Id = AccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOpened {
    pub account_id: AccountId,
    pub user_id: UserId,
    pub account_type: AccountType,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountEvent {
    Opened(AccountOpened),
}

impl Event for AccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AccountEvent::Opened(_) => "account.opened",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AccountEvent::Opened(e) => e.occurred_at,
        }
    }

    fn subject_id(&self) -> Uuid {
        match self {
            AccountEvent::Opened(e) => *e.account_id.as_uuid(),
        }
    }
}
