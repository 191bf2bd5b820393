//! PaymentProcessor: turns payment notifications and direct purchases into
//! ledger credits, opening the payer's account on first contact.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use propmarket_core::{AccountId, BalanceId, Credits, DomainError, PaymentId, UserId};
use propmarket_ledger::{Account, CreditBalance};
use propmarket_payments::{
    Payment, PaymentMethod, PaymentReference, PaymentStatus, credits_for,
};

use crate::error::ServiceError;
use crate::publisher::Outbox;
use crate::store::{
    AccountRepository, BalanceRepository, LockKey, PaymentRepository, Transaction,
    UnitOfWork,
};

use super::ledger::credit_in;
use super::{ServiceContext, log_failure};

/// Attempts at drawing an unused reference before giving up.
const REFERENCE_ATTEMPTS: u32 = 16;

/// Outcome of [`PaymentProcessor::process`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub payment: Payment,
    /// Whether the payer's account was opened by this payment.
    pub account_created: bool,
    pub balance: Credits,
}

/// Outcome of [`PaymentProcessor::purchase_credits`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseReceipt {
    pub payment_id: PaymentId,
    pub account_id: AccountId,
    pub reference: PaymentReference,
    pub previous_balance: Credits,
    pub credited: Credits,
    pub new_balance: Credits,
}

#[derive(Debug, Clone)]
pub struct PaymentProcessor<S> {
    ctx: ServiceContext<S>,
}

impl<S: UnitOfWork> PaymentProcessor<S> {
    pub fn new(ctx: ServiceContext<S>) -> Self {
        Self { ctx }
    }

    /// Record an external payment and credit `floor(amount)` to the payer.
    ///
    /// The payer's account and zero balance are created on first payment.
    /// Without `reference` a unique one is generated; a supplied reference
    /// that already exists is a `Conflict`.
    #[instrument(skip_all, fields(%requester_id, %amount, %method))]
    pub fn process(
        &self,
        requester_id: UserId,
        amount: Decimal,
        method: PaymentMethod,
        reference: Option<&str>,
    ) -> Result<PaymentReceipt, ServiceError> {
        let credits_granted = credits_for(amount)?;
        let supplied = reference.map(PaymentReference::parse).transpose()?;

        let receipt = self
            .ctx
            .transact(|tx, outbox| {
                let now = self.ctx.now();
                let (account_id, account_created) = account_for_user(tx, outbox, requester_id, now)?;
                tx.lock(&[LockKey::Account(account_id)])?;

                let reference = match &supplied {
                    Some(reference) => {
                        if tx.find_payment_by_reference(reference)?.is_some() {
                            return Err(DomainError::conflict("payment reference already exists").into());
                        }
                        reference.clone()
                    }
                    None => generate_reference(tx, method)?,
                };

                let (payment, event) = Payment::record(
                    PaymentId::new(),
                    account_id,
                    amount,
                    method,
                    reference,
                    PaymentStatus::Confirmed,
                    now,
                )?;
                tx.save_payment(payment.clone())?;
                outbox.record("payment", &event);

                let balance = if credits_granted > 0 {
                    credit_in(tx, outbox, account_id, Credits::whole(credits_granted), now)?
                } else {
                    current_balance(tx, account_id)?
                };

                Ok(PaymentReceipt {
                    payment,
                    account_created,
                    balance,
                })
            })
            .inspect_err(|e| log_failure("payments.process", e))?;

        info!(
            payment_id = %receipt.payment.id,
            account_id = %receipt.payment.account_id,
            credits_granted,
            account_created = receipt.account_created,
            "payment processed"
        );
        Ok(receipt)
    }

    /// Direct credit purchase by an existing account (1 currency unit buys
    /// 1 credit, fractions included). The payment is recorded as pending.
    #[instrument(skip_all, fields(%account_id, %amount, %method))]
    pub fn purchase_credits(
        &self,
        account_id: AccountId,
        method: PaymentMethod,
        amount: Decimal,
    ) -> Result<PurchaseReceipt, ServiceError> {
        let config = self.ctx.config();
        if amount < config.purchase_min || amount > config.purchase_max {
            return Err(DomainError::validation(format!(
                "purchase amount must be between {} and {}",
                config.purchase_min, config.purchase_max
            ))
            .into());
        }
        let credited = Credits::positive(amount)?;

        let receipt = self
            .ctx
            .transact(|tx, outbox| {
                let now = self.ctx.now();
                if tx.find_account(account_id)?.is_none() {
                    return Err(DomainError::not_found("account").into());
                }
                tx.lock(&[LockKey::Account(account_id)])?;
                let previous_balance = current_balance(tx, account_id)?;

                let reference = purchase_reference(tx, now)?;
                let (payment, event) = Payment::record(
                    PaymentId::new(),
                    account_id,
                    amount,
                    method,
                    reference.clone(),
                    PaymentStatus::Pending,
                    now,
                )?;
                tx.save_payment(payment.clone())?;
                outbox.record("payment", &event);

                let new_balance = credit_in(tx, outbox, account_id, credited, now)?;

                Ok(PurchaseReceipt {
                    payment_id: payment.id,
                    account_id,
                    reference,
                    previous_balance,
                    credited,
                    new_balance,
                })
            })
            .inspect_err(|e| log_failure("payments.purchase_credits", e))?;

        info!(payment_id = %receipt.payment_id, new_balance = %receipt.new_balance, "credits purchased");
        Ok(receipt)
    }

    /// Move a pending payment to confirmed.
    #[instrument(skip_all, fields(%payment_id))]
    pub fn confirm_payment(&self, payment_id: PaymentId) -> Result<Payment, ServiceError> {
        self.ctx
            .transact(|tx, outbox| {
                let account_id = tx
                    .find_payment(payment_id)?
                    .ok_or_else(|| DomainError::not_found("payment"))?
                    .account_id;
                tx.lock(&[LockKey::Account(account_id)])?;

                let mut payment = tx
                    .find_payment(payment_id)?
                    .ok_or_else(|| DomainError::not_found("payment"))?;
                let event = payment.confirm(self.ctx.now())?;
                tx.save_payment(payment.clone())?;
                outbox.record("payment", &event);
                Ok(payment)
            })
            .inspect_err(|e| log_failure("payments.confirm", e))
    }

    /// Every payment, newest first.
    pub fn list_payments(&self) -> Result<Vec<Payment>, ServiceError> {
        let mut payments = self.ctx.transact(|tx, _| Ok(tx.all_payments()?))?;
        newest_first(&mut payments);
        Ok(payments)
    }

    /// Payments of one account, newest first.
    pub fn list_payments_for_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Payment>, ServiceError> {
        let mut payments = self.ctx.transact(|tx, _| {
            if tx.find_account(account_id)?.is_none() {
                return Err(DomainError::not_found("account").into());
            }
            Ok(tx.payments_for_account(account_id)?)
        })?;
        newest_first(&mut payments);
        Ok(payments)
    }

    pub fn find_account_for_user(&self, user_id: UserId) -> Result<Option<Account>, ServiceError> {
        self.ctx.transact(|tx, _| Ok(tx.find_account_by_user(user_id)?))
    }
}

/// Existing account of `user_id`, or a freshly opened one with a zero balance.
///
/// A concurrent opening for the same user is caught by the account-per-user
/// constraint at commit and the whole transaction is retried.
fn account_for_user<T: Transaction>(
    tx: &mut T,
    outbox: &mut Outbox,
    user_id: UserId,
    now: DateTime<Utc>,
) -> Result<(AccountId, bool), ServiceError> {
    if let Some(account) = tx.find_account_by_user(user_id)? {
        return Ok((account.id, false));
    }

    let (account, event) = Account::open(AccountId::new(), user_id, now);
    let account_id = account.id;
    tx.insert_account(account)?;
    tx.save_balance(CreditBalance::open(BalanceId::new(), account_id, now))?;
    outbox.record("account", &event);

    info!(%user_id, %account_id, "account opened");
    Ok((account_id, true))
}

fn current_balance<T: Transaction>(tx: &T, account_id: AccountId) -> Result<Credits, ServiceError> {
    tx.find_balance(account_id)?
        .map(|b| b.balance())
        .ok_or_else(|| DomainError::not_found("credit balance").into())
}

fn generate_reference<T: Transaction>(
    tx: &T,
    method: PaymentMethod,
) -> Result<PaymentReference, ServiceError> {
    for _ in 0..REFERENCE_ATTEMPTS {
        let candidate = PaymentReference::generate(method, Uuid::now_v7());
        if tx.find_payment_by_reference(&candidate)?.is_none() {
            return Ok(candidate);
        }
    }
    Err(DomainError::conflict("could not generate a unique payment reference").into())
}

fn purchase_reference<T: Transaction>(
    tx: &T,
    now: DateTime<Utc>,
) -> Result<PaymentReference, ServiceError> {
    let millis = now.timestamp_millis();
    for attempt in 0..REFERENCE_ATTEMPTS {
        let candidate = PaymentReference::purchase(millis, attempt);
        if tx.find_payment_by_reference(&candidate)?.is_none() {
            return Ok(candidate);
        }
    }
    Err(DomainError::conflict("could not generate a unique payment reference").into())
}

fn newest_first(payments: &mut [Payment]) {
    payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}
