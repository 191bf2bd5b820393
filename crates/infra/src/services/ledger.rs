//! CreditLedger: per-account balances with atomic credit/debit.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, instrument};

use propmarket_core::{AccountId, Credits, DomainError};
use propmarket_ledger::CreditBalance;

use crate::error::ServiceError;
use crate::publisher::Outbox;
use crate::store::{BalanceRepository, LockKey, Transaction, UnitOfWork};

use super::{ServiceContext, log_failure};

/// Add `amount` to the balance of `account_id` inside the caller's transaction.
///
/// Takes the account's row lock first; returns the new balance.
pub fn credit_in<T: Transaction>(
    tx: &mut T,
    outbox: &mut Outbox,
    account_id: AccountId,
    amount: Credits,
    now: DateTime<Utc>,
) -> Result<Credits, ServiceError> {
    let mut balance = locked_balance(tx, account_id)?;
    let event = balance.credit(amount, now)?;
    tx.save_balance(balance)?;
    outbox.record("ledger", &event);
    Ok(event.balance_after())
}

/// Remove `amount` from the balance of `account_id` inside the caller's
/// transaction. Fails with `InsufficientCredits` without writing anything.
pub fn debit_in<T: Transaction>(
    tx: &mut T,
    outbox: &mut Outbox,
    account_id: AccountId,
    amount: Credits,
    now: DateTime<Utc>,
) -> Result<Credits, ServiceError> {
    let mut balance = locked_balance(tx, account_id)?;
    let event = balance.debit(amount, now)?;
    tx.save_balance(balance)?;
    outbox.record("ledger", &event);
    Ok(event.balance_after())
}

fn locked_balance<T: Transaction>(
    tx: &mut T,
    account_id: AccountId,
) -> Result<CreditBalance, ServiceError> {
    tx.lock(&[LockKey::Account(account_id)])?;
    tx.find_balance(account_id)?
        .ok_or_else(|| DomainError::not_found("credit balance").into())
}

#[derive(Debug, Clone)]
pub struct CreditLedger<S> {
    ctx: ServiceContext<S>,
}

impl<S: UnitOfWork> CreditLedger<S> {
    pub fn new(ctx: ServiceContext<S>) -> Self {
        Self { ctx }
    }

    #[instrument(skip_all, fields(%account_id))]
    pub fn get_balance(&self, account_id: AccountId) -> Result<CreditBalance, ServiceError> {
        self.ctx
            .transact(|tx, _| {
                tx.find_balance(account_id)?
                    .ok_or_else(|| DomainError::not_found("credit balance").into())
            })
            .inspect_err(|e| log_failure("ledger.get_balance", e))
    }

    /// Every ledger row, most recently updated first.
    pub fn list_balances(&self) -> Result<Vec<CreditBalance>, ServiceError> {
        let mut balances = self.ctx.transact(|tx, _| Ok(tx.all_balances()?))?;
        balances.sort_by(|a, b| b.updated_at().cmp(&a.updated_at()));
        Ok(balances)
    }

    #[instrument(skip_all, fields(%account_id, %amount))]
    pub fn credit(&self, account_id: AccountId, amount: Decimal) -> Result<Credits, ServiceError> {
        let amount = Credits::positive(amount)?;

        let balance = self
            .ctx
            .transact(|tx, outbox| credit_in(tx, outbox, account_id, amount, self.ctx.now()))
            .inspect_err(|e| log_failure("ledger.credit", e))?;

        info!(%balance, "credits added");
        Ok(balance)
    }

    #[instrument(skip_all, fields(%account_id, %amount))]
    pub fn debit(&self, account_id: AccountId, amount: Decimal) -> Result<Credits, ServiceError> {
        let amount = Credits::positive(amount)?;

        let balance = self
            .ctx
            .transact(|tx, outbox| debit_in(tx, outbox, account_id, amount, self.ctx.now()))
            .inspect_err(|e| log_failure("ledger.debit", e))?;

        info!(%balance, "credits debited");
        Ok(balance)
    }
}
