use tracing::{debug, info};

use nrl_store::{KvStore, KvStoreExt, Mutation, TxnOutcome};
use nrl_types::{keys, AccountId, Coins, Timestamp};

use crate::account::{Account, PendingKind};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};

/// Per-account balances and flags over a shared store.
///
/// Every method that mutates an account is exactly one optimistic
/// transaction on `accounts/{id}`.
pub struct BalanceLedger<S> {
    store: S,
    config: LedgerConfig,
}

impl<S: KvStore> BalanceLedger<S> {
    pub fn new(store: S, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create the account on first login; return the existing one otherwise.
    pub fn open_account(
        &self,
        id: &AccountId,
        display_name: &str,
        now: Timestamp,
    ) -> LedgerResult<Account> {
        let fresh = Account::new(id.clone(), display_name, self.config.starting_balance, now);
        let out = self
            .store
            .transact(&keys::account(id), self.config.retry, |cur: Option<Account>| {
                match cur {
                    Some(_) => Mutation::Abort,
                    None => Mutation::Set(fresh.clone()),
                }
            })?;
        match out {
            TxnOutcome::Committed { value: Some(account), .. } => {
                info!(account = %id, balance = account.balance, "account opened");
                Ok(account)
            }
            TxnOutcome::Aborted { current: Some(account), .. } => Ok(account),
            _ => Err(LedgerError::AccountNotFound(id.clone())),
        }
    }

    /// Read an account, failing if it was never opened.
    pub fn account(&self, id: &AccountId) -> LedgerResult<Account> {
        self.find_account(id)?
            .ok_or_else(|| LedgerError::AccountNotFound(id.clone()))
    }

    pub fn find_account(&self, id: &AccountId) -> LedgerResult<Option<Account>> {
        Ok(self.store.get_as(&keys::account(id))?)
    }

    pub fn balance(&self, id: &AccountId) -> LedgerResult<Coins> {
        Ok(self.account(id)?.balance)
    }

    /// Every account, in id order.
    pub fn accounts(&self) -> LedgerResult<Vec<Account>> {
        Ok(self
            .store
            .list_as::<Account>(keys::ACCOUNTS_PREFIX)?
            .into_iter()
            .map(|(_, a)| a)
            .collect())
    }

    /// Add `amount` to the balance. Returns the new balance.
    pub fn credit(&self, id: &AccountId, amount: Coins) -> LedgerResult<Coins> {
        require_positive(amount)?;
        let account = self.update(id, |account| {
            account.balance = account
                .balance
                .checked_add(amount)
                .ok_or_else(|| LedgerError::InvalidAmount(format!("credit of {amount} overflows")))?;
            Ok(true)
        })?;
        debug!(account = %id, amount, balance = account.balance, "credited");
        Ok(account.balance)
    }

    /// Subtract `amount` only if the balance covers it. Returns the new
    /// balance; on [`LedgerError::InsufficientFunds`] nothing changed.
    pub fn debit(&self, id: &AccountId, amount: Coins) -> LedgerResult<Coins> {
        require_positive(amount)?;
        let account = self.update(id, |account| {
            account.balance = checked_debit(account, amount)?;
            Ok(true)
        })?;
        debug!(account = %id, amount, balance = account.balance, "debited");
        Ok(account.balance)
    }

    pub fn set_pending_flag(&self, id: &AccountId, kind: PendingKind, on: bool) -> LedgerResult<()> {
        self.update(id, |account| {
            if account.pending_flag(kind) == on {
                return Ok(false);
            }
            account.set_pending_flag(kind, on);
            Ok(true)
        })?;
        Ok(())
    }

    /// Atomically apply `edit` to one account.
    ///
    /// `edit` returns `Ok(true)` to write the modified record, `Ok(false)`
    /// to leave it untouched, or an error to abort. It may run several times
    /// if other writers race on the same account, each time on a fresh copy.
    /// Returns the account as stored afterwards.
    pub fn update<F>(&self, id: &AccountId, mut edit: F) -> LedgerResult<Account>
    where
        F: FnMut(&mut Account) -> LedgerResult<bool>,
    {
        let mut failure: Option<LedgerError> = None;
        let out = self
            .store
            .transact(&keys::account(id), self.config.retry, |cur: Option<Account>| {
                failure = None;
                let Some(mut account) = cur else {
                    failure = Some(LedgerError::AccountNotFound(id.clone()));
                    return Mutation::Abort;
                };
                match edit(&mut account) {
                    Ok(true) => Mutation::Set(account),
                    Ok(false) => Mutation::Abort,
                    Err(e) => {
                        failure = Some(e);
                        Mutation::Abort
                    }
                }
            })?;

        if let Some(err) = failure {
            return Err(err);
        }
        match out {
            TxnOutcome::Committed { value: Some(account), .. }
            | TxnOutcome::Aborted { current: Some(account), .. } => Ok(account),
            _ => Err(LedgerError::AccountNotFound(id.clone())),
        }
    }
}

pub(crate) fn require_positive(amount: Coins) -> LedgerResult<()> {
    if amount == 0 {
        return Err(LedgerError::InvalidAmount("amount must be positive".into()));
    }
    Ok(())
}

pub(crate) fn checked_debit(account: &Account, amount: Coins) -> LedgerResult<Coins> {
    account
        .balance
        .checked_sub(amount)
        .ok_or_else(|| LedgerError::InsufficientFunds {
            account: account.id.clone(),
            balance: account.balance,
            requested: amount,
        })
}
