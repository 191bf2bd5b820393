use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use propmarket_core::{AccountId, Aggregate, AggregateRoot, BalanceId, Credits, DomainError};
use propmarket_events::Event;

/// Aggregate root: the credit balance of one account.
///
/// The balance is a `Credits` value and therefore never negative; a debit
/// larger than the balance is rejected before any state changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditBalance {
    id: BalanceId,
    account_id: AccountId,
    balance: Credits,
    updated_at: DateTime<Utc>,
    version: u64,
}

impl CreditBalance {
    /// Zero balance for a freshly opened account.
    pub fn open(id: BalanceId, account_id: AccountId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            account_id,
            balance: Credits::ZERO,
            updated_at: now,
            version: 0,
        }
    }

    pub fn id_typed(&self) -> BalanceId {
        self.id
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn balance(&self) -> Credits {
        self.balance
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Add credits; returns the emitted event.
    pub fn credit(&mut self, amount: Credits, at: DateTime<Utc>) -> Result<LedgerEvent, DomainError> {
        self.adjust(LedgerCommand::Credit(AdjustBalance {
            account_id: self.account_id,
            amount,
            occurred_at: at,
        }))
    }

    /// Remove credits; fails with `InsufficientCredits` when the balance does
    /// not cover `amount`, leaving the balance untouched.
    pub fn debit(&mut self, amount: Credits, at: DateTime<Utc>) -> Result<LedgerEvent, DomainError> {
        self.adjust(LedgerCommand::Debit(AdjustBalance {
            account_id: self.account_id,
            amount,
            occurred_at: at,
        }))
    }

    fn adjust(&mut self, command: LedgerCommand) -> Result<LedgerEvent, DomainError> {
        let mut events = self.execute(&command)?;
        events
            .pop()
            .ok_or_else(|| DomainError::validation("ledger adjustment produced no change"))
    }
}

impl AggregateRoot for CreditBalance {
    type Id = BalanceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Payload shared by both ledger commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustBalance {
    pub account_id: AccountId,
    pub amount: Credits,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerCommand {
    Credit(AdjustBalance),
    Debit(AdjustBalance),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditsAdded {
    pub account_id: AccountId,
    pub amount: Credits,
    pub balance_after: Credits,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditsDebited {
    pub account_id: AccountId,
    pub amount: Credits,
    pub balance_after: Credits,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    CreditsAdded(CreditsAdded),
    CreditsDebited(CreditsDebited),
}

impl LedgerEvent {
    pub fn balance_after(&self) -> Credits {
        match self {
            LedgerEvent::CreditsAdded(e) => e.balance_after,
            LedgerEvent::CreditsDebited(e) => e.balance_after,
        }
    }
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::CreditsAdded(_) => "ledger.credited",
            LedgerEvent::CreditsDebited(_) => "ledger.debited",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::CreditsAdded(e) => e.occurred_at,
            LedgerEvent::CreditsDebited(e) => e.occurred_at,
        }
    }

    fn subject_id(&self) -> Uuid {
        match self {
            LedgerEvent::CreditsAdded(e) => *e.account_id.as_uuid(),
            LedgerEvent::CreditsDebited(e) => *e.account_id.as_uuid(),
        }
    }
}

impl Aggregate for CreditBalance {
    type Command = LedgerCommand;
    type Event = LedgerEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LedgerEvent::CreditsAdded(e) => {
                self.balance = e.balance_after;
                self.updated_at = e.occurred_at;
            }
            LedgerEvent::CreditsDebited(e) => {
                self.balance = e.balance_after;
                self.updated_at = e.occurred_at;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            LedgerCommand::Credit(cmd) => self.handle_credit(cmd),
            LedgerCommand::Debit(cmd) => self.handle_debit(cmd),
        }
    }
}

impl CreditBalance {
    fn ensure_account(&self, cmd: &AdjustBalance) -> Result<(), DomainError> {
        if cmd.account_id != self.account_id {
            return Err(DomainError::validation("command targets a different account"));
        }
        if cmd.amount.is_zero() {
            return Err(DomainError::validation("amount must be positive"));
        }
        Ok(())
    }

    fn handle_credit(&self, cmd: &AdjustBalance) -> Result<Vec<LedgerEvent>, DomainError> {
        self.ensure_account(cmd)?;

        let balance_after = self.balance.checked_add(cmd.amount)?;

        Ok(vec![LedgerEvent::CreditsAdded(CreditsAdded {
            account_id: self.account_id,
            amount: cmd.amount,
            balance_after,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_debit(&self, cmd: &AdjustBalance) -> Result<Vec<LedgerEvent>, DomainError> {
        self.ensure_account(cmd)?;

        let balance_after = self
            .balance
            .checked_sub(cmd.amount)
            .ok_or_else(|| DomainError::insufficient_credits(self.balance, cmd.amount))?;

        Ok(vec![LedgerEvent::CreditsDebited(CreditsDebited {
            account_id: self.account_id,
            amount: cmd.amount,
            balance_after,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn fresh_balance() -> CreditBalance {
        CreditBalance::open(BalanceId::new(), AccountId::new(), Utc::now())
    }

    #[test]
    fn credit_increases_balance_and_bumps_version() {
        let mut balance = fresh_balance();

        let event = balance.credit(Credits::whole(100), Utc::now()).unwrap();

        assert_eq!(balance.balance(), Credits::whole(100));
        assert_eq!(balance.version(), 1);
        assert_eq!(event.event_type(), "ledger.credited");
        assert_eq!(event.balance_after(), Credits::whole(100));
    }

    #[test]
    fn second_debit_of_an_exactly_covered_amount_fails() {
        let mut balance = fresh_balance();
        balance.credit(Credits::whole(50), Utc::now()).unwrap();

        balance.debit(Credits::whole(50), Utc::now()).unwrap();
        assert_eq!(balance.balance(), Credits::ZERO);

        let err = balance.debit(Credits::whole(50), Utc::now()).unwrap_err();
        assert_eq!(
            err,
            DomainError::insufficient_credits(Credits::ZERO, Credits::whole(50))
        );
        assert_eq!(balance.balance(), Credits::ZERO);
        assert_eq!(balance.version(), 2);
    }

    #[test]
    fn zero_amounts_are_rejected() {
        let mut balance = fresh_balance();
        let err = balance.credit(Credits::ZERO, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn fractional_credits_are_kept_exactly() {
        let mut balance = fresh_balance();
        balance
            .credit(Credits::positive(dec!(10.25)).unwrap(), Utc::now())
            .unwrap();
        balance
            .debit(Credits::positive(dec!(0.25)).unwrap(), Utc::now())
            .unwrap();
        assert_eq!(balance.balance(), Credits::whole(10));
    }

    #[test]
    fn command_for_another_account_is_rejected() {
        let balance = fresh_balance();
        let cmd = LedgerCommand::Credit(AdjustBalance {
            account_id: AccountId::new(),
            amount: Credits::whole(1),
            occurred_at: Utc::now(),
        });
        assert!(balance.handle(&cmd).is_err());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Credit(u64),
        Debit(u64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u64..500).prop_map(Op::Credit),
            (1u64..500).prop_map(Op::Debit),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: whatever sequence of credits/debits is attempted, the
        /// balance equals credits minus *accepted* debits and is never negative.
        #[test]
        fn balance_never_goes_negative(ops in prop::collection::vec(op_strategy(), 1..40)) {
            let mut balance = fresh_balance();
            let mut expected: i128 = 0;

            for op in ops {
                match op {
                    Op::Credit(n) => {
                        balance.credit(Credits::whole(n), Utc::now()).unwrap();
                        expected += n as i128;
                    }
                    Op::Debit(n) => {
                        let covered = expected >= n as i128;
                        let outcome = balance.debit(Credits::whole(n), Utc::now());
                        prop_assert_eq!(outcome.is_ok(), covered);
                        if covered {
                            expected -= n as i128;
                        }
                    }
                }
                prop_assert!(balance.balance() >= Credits::ZERO);
            }

            prop_assert_eq!(balance.balance(), Credits::whole(expected as u64));
        }
    }
}
