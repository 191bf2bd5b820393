use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use propmarket_core::{AccountId, DomainError, DomainResult, Entity, PaymentId};
use propmarket_events::Event;

use crate::method::PaymentMethod;
use crate::reference::PaymentReference;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Confirmed,
}

/// Whole credits granted for a payment amount: the fractional part is dropped.
pub fn credits_for(amount: Decimal) -> DomainResult<u64> {
    if amount <= Decimal::ZERO {
        return Err(DomainError::validation("payment amount must be positive"));
    }
    amount
        .trunc()
        .to_u64()
        .ok_or_else(|| DomainError::validation("payment amount is too large"))
}

/// A recorded funds transfer. Immutable after creation except for `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub account_id: AccountId,
    pub amount: Decimal,
    pub credits_granted: u64,
    pub method: PaymentMethod,
    pub reference: PaymentReference,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn record(
        id: PaymentId,
        account_id: AccountId,
        amount: Decimal,
        method: PaymentMethod,
        reference: PaymentReference,
        status: PaymentStatus,
        now: DateTime<Utc>,
    ) -> DomainResult<(Self, PaymentEvent)> {
        let credits_granted = credits_for(amount)?;

        let payment = Self {
            id,
            account_id,
            amount,
            credits_granted,
            method,
            reference,
            status,
            created_at: now,
        };
        let event = PaymentEvent::Recorded(PaymentRecorded {
            payment_id: id,
            account_id,
            amount,
            credits_granted,
            method,
            reference: payment.reference.clone(),
            status,
            occurred_at: now,
        });
        Ok((payment, event))
    }

    pub fn confirm(&mut self, now: DateTime<Utc>) -> DomainResult<PaymentEvent> {
        if self.status == PaymentStatus::Confirmed {
            return Err(DomainError::validation("payment is already confirmed"));
        }
        self.status = PaymentStatus::Confirmed;

        Ok(PaymentEvent::Confirmed(PaymentConfirmed {
            payment_id: self.id,
            account_id: self.account_id,
            occurred_at: now,
        }))
    }
}

impl Entity for Payment {
    type Id = PaymentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecorded {
    pub payment_id: PaymentId,
    pub account_id: AccountId,
    pub amount: Decimal,
    pub credits_granted: u64,
    pub method: PaymentMethod,
    pub reference: PaymentReference,
    pub status: PaymentStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmed {
    pub payment_id: PaymentId,
    pub account_id: AccountId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentEvent {
    Recorded(PaymentRecorded),
    Confirmed(PaymentConfirmed),
}

impl Event for PaymentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PaymentEvent::Recorded(_) => "payment.recorded",
            PaymentEvent::Confirmed(_) => "payment.confirmed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PaymentEvent::Recorded(e) => e.occurred_at,
            PaymentEvent::Confirmed(e) => e.occurred_at,
        }
    }

    fn subject_id(&self) -> Uuid {
        match self {
            PaymentEvent::Recorded(e) => *e.payment_id.as_uuid(),
            PaymentEvent::Confirmed(e) => *e.payment_id.as_uuid(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn record(amount: Decimal, status: PaymentStatus) -> Payment {
        Payment::record(
            PaymentId::new(),
            AccountId::new(),
            amount,
            PaymentMethod::Mpesa,
            PaymentReference::parse("REF-1").unwrap(),
            status,
            Utc::now(),
        )
        .unwrap()
        .0
    }

    #[test]
    fn fractional_amounts_are_truncated() {
        assert_eq!(credits_for(dec!(25.99)).unwrap(), 25);
        assert_eq!(credits_for(dec!(0.50)).unwrap(), 0);
        assert_eq!(record(dec!(25.99), PaymentStatus::Confirmed).credits_granted, 25);
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        assert!(credits_for(Decimal::ZERO).is_err());
        assert!(credits_for(dec!(-3)).is_err());
    }

    #[test]
    fn pending_payments_confirm_once() {
        let mut payment = record(dec!(10), PaymentStatus::Pending);

        let event = payment.confirm(Utc::now()).unwrap();
        assert_eq!(event.event_type(), "payment.confirmed");
        assert_eq!(payment.status, PaymentStatus::Confirmed);

        assert!(matches!(
            payment.confirm(Utc::now()),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn recorded_event_serializes_amount_as_decimal_string() {
        let (_, event) = Payment::record(
            PaymentId::new(),
            AccountId::new(),
            dec!(12.5),
            PaymentMethod::Emola,
            PaymentReference::parse("X").unwrap(),
            PaymentStatus::Confirmed,
            Utc::now(),
        )
        .unwrap();

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["Recorded"]["amount"], "12.5");
        assert_eq!(json["Recorded"]["method"], "EMOLA");
    }

    proptest! {
        #[test]
        fn credits_never_exceed_amount(cents in 1u64..10_000_000) {
            let amount = Decimal::new(cents as i64, 2);
            let credits = credits_for(amount).unwrap();
            prop_assert!(Decimal::from(credits) <= amount);
            prop_assert!(amount - Decimal::from(credits) < Decimal::ONE);
        }
    }
}
