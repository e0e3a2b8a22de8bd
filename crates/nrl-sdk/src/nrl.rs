use std::sync::Arc;

use tracing::{info, warn};

use nrl_ledger::{
    Account, BalanceLedger, BetLedger, BetReceipt, Reconciled, Settlement, TallyAudit,
};
use nrl_payments::{
    AdminCapability, AdminGate, Identity, PaymentKind, PaymentQueue, PaymentRequest, Resolution,
};
use nrl_round::{
    Advance, HistoryEntry, HistoryFilter, HistoryStats, OutcomeSelector, Round, RoundEngine, Tally,
    TallyCell, TallyStore,
};
use nrl_store::{InMemoryKvStore, KvStore};
use nrl_types::{keys, AccountId, Coins, RequestId, Timestamp, Wager};

use crate::config::EngineConfig;
use crate::error::{SdkError, SdkResult};
use crate::watch::Subscription;

/// One client's handle on a deployment.
///
/// Every component shares the same store, so any number of `Nrl` values
/// (in one process or many) can operate on the same rounds and accounts.
pub struct Nrl<S> {
    store: S,
    engine: RoundEngine<S>,
    bets: BetLedger<S, TallyStore<S>>,
    payments: PaymentQueue<S>,
    gate: AdminGate,
    config: EngineConfig,
}

impl Nrl<Arc<InMemoryKvStore>> {
    /// A deployment backed by a fresh in-memory store.
    pub fn in_memory(config: EngineConfig) -> SdkResult<Self> {
        Self::open(Arc::new(InMemoryKvStore::new()), config)
    }
}

impl<S: KvStore + Clone> Nrl<S> {
    pub fn open(store: S, config: EngineConfig) -> SdkResult<Self> {
        config.validate()?;
        let engine = RoundEngine::new(store.clone(), config.round.clone())?;
        let tally = TallyStore::new(store.clone(), config.round.retry);
        let bets = BetLedger::new(
            BalanceLedger::new(store.clone(), config.ledger.clone()),
            tally,
        );
        let payments = PaymentQueue::new(
            BalanceLedger::new(store.clone(), config.ledger.clone()),
            config.payments.clone(),
        );
        Ok(Self {
            gate: AdminGate::from_config(&config.payments),
            store,
            engine,
            bets,
            payments,
            config,
        })
    }

    /// Replace the outcome strategy, e.g. with a seeded selector.
    pub fn with_selector(mut self, selector: impl OutcomeSelector + 'static) -> Self {
        self.engine = self.engine.with_selector(selector);
        self
    }
}

impl<S: KvStore> Nrl<S> {
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn engine(&self) -> &RoundEngine<S> {
        &self.engine
    }

    pub fn bets(&self) -> &BetLedger<S, TallyStore<S>> {
        &self.bets
    }

    pub fn payments(&self) -> &PaymentQueue<S> {
        &self.payments
    }

    // Accounts

    /// Open the account on first login, or return the existing one.
    pub fn login(&self, identity: &Identity, now: Timestamp) -> SdkResult<Account> {
        Ok(self
            .bets
            .balances()
            .open_account(&identity.account, &identity.display_name, now)?)
    }

    pub fn account(&self, id: &AccountId) -> SdkResult<Account> {
        Ok(self.bets.balances().account(id)?)
    }

    pub fn balance(&self, id: &AccountId) -> SdkResult<Coins> {
        Ok(self.bets.balances().balance(id)?)
    }

    // Rounds

    pub fn current_round(&self) -> SdkResult<Option<Round>> {
        Ok(self.engine.current()?)
    }

    pub fn advance_round(&self, now: Timestamp) -> SdkResult<Advance> {
        Ok(self.engine.advance_if_expired(now)?)
    }

    /// Stakes placed so far in the current round.
    pub fn tally(&self) -> SdkResult<Tally> {
        match self.engine.current()? {
            Some(round) => Ok(self.engine.tally().snapshot(round.closes_at)?),
            None => Ok(Tally::empty()),
        }
    }

    /// Bet on the round that is open right now.
    pub fn place_bet(&self, id: &AccountId, wager: &Wager, now: Timestamp) -> SdkResult<BetReceipt> {
        let round = self.engine.current()?.ok_or(SdkError::NoActiveRound)?;
        Ok(self.bets.place_bet(id, wager, round.closes_at, now)?)
    }

    /// Settle the account's slip against the winner of the slip's round.
    ///
    /// Returns [`Settlement::NothingToSettle`] while that round has no
    /// result yet. A slip whose round ended two or more transitions ago and
    /// is missing from the history log is voided.
    pub fn settle(&self, id: &AccountId) -> SdkResult<Settlement> {
        let Some(slip) = self.bets.current_slip(id)? else {
            return Ok(Settlement::NothingToSettle);
        };
        // One read of the round record decides both lookups; a second read
        // could observe a transition that happened in between.
        let current = self.engine.current()?;
        let winner = match current.as_ref().and_then(|r| r.winner_of(slip.round)) {
            Some(winner) => Some(winner),
            None => self.engine.history().winner_of(slip.round)?,
        };
        if let Some(winner) = winner {
            return Ok(self.bets.settle(id, slip.round, winner)?);
        }
        match current {
            Some(round) if slip.round.is_before(&round.closes_at) => {
                warn!(account = %id, round = %slip.round, "result of bet round is gone");
                Ok(self.bets.void_bet(id)?)
            }
            _ => Ok(Settlement::NothingToSettle),
        }
    }

    pub fn history(&self, filter: HistoryFilter) -> SdkResult<Vec<HistoryEntry>> {
        Ok(self.engine.history().list(filter)?)
    }

    pub fn stats(&self) -> SdkResult<HistoryStats> {
        Ok(self.engine.history().stats()?)
    }

    // Payments

    /// Exchange an identity for an admin capability.
    pub fn authorize_admin(&self, identity: &Identity) -> SdkResult<AdminCapability> {
        Ok(self.gate.authorize(identity)?)
    }

    pub fn submit_deposit(
        &self,
        id: &AccountId,
        amount: Coins,
        payer_upi: &str,
        transaction_ref: &str,
        now: Timestamp,
    ) -> SdkResult<PaymentRequest> {
        Ok(self
            .payments
            .submit_deposit(id, amount, payer_upi, transaction_ref, now)?)
    }

    pub fn submit_withdrawal(
        &self,
        id: &AccountId,
        amount: Coins,
        payout_upi: &str,
        now: Timestamp,
    ) -> SdkResult<PaymentRequest> {
        Ok(self.payments.submit_withdrawal(id, amount, payout_upi, now)?)
    }

    pub fn approve_deposit(&self, cap: &AdminCapability, id: &RequestId) -> SdkResult<Resolution> {
        Ok(self.payments.approve_deposit(cap, id)?)
    }

    pub fn approve_withdrawal(&self, cap: &AdminCapability, id: &RequestId) -> SdkResult<Resolution> {
        Ok(self.payments.approve_withdrawal(cap, id)?)
    }

    pub fn reject(&self, cap: &AdminCapability, id: &RequestId) -> SdkResult<Resolution> {
        Ok(self.payments.reject(cap, id)?)
    }

    pub fn pending(&self, cap: &AdminCapability, kind: PaymentKind) -> SdkResult<Vec<PaymentRequest>> {
        Ok(self.payments.pending(cap, kind)?)
    }

    pub fn pending_for(&self, id: &AccountId) -> SdkResult<Vec<PaymentRequest>> {
        Ok(self.payments.pending_for(id)?)
    }

    // Repair

    /// Finish interrupted work: a history append lost by a crashed
    /// transition winner, and bet debits that never completed.
    pub fn repair(&self, now: Timestamp) -> SdkResult<Vec<(AccountId, Reconciled)>> {
        if let Some(entry) = self.engine.repair_history(now)? {
            info!(round_number = entry.round_number, "history checked");
        }
        Ok(self.bets.reconcile_all()?)
    }

    pub fn reconcile(&self, id: &AccountId) -> SdkResult<Reconciled> {
        Ok(self.bets.reconcile(id)?)
    }

    pub fn audit_tally(&self, round: Timestamp) -> SdkResult<TallyAudit> {
        Ok(self.bets.audit_tally(round)?)
    }

    // Subscriptions

    pub fn watch_round(&self) -> Subscription<Round> {
        Subscription::exact(self.store.watch(keys::ROUND_CURRENT), keys::ROUND_CURRENT.to_string())
    }

    pub fn watch_tally(&self) -> Subscription<TallyCell> {
        Subscription::prefix(self.store.watch(keys::TALLY_PREFIX))
    }

    pub fn watch_history(&self) -> Subscription<HistoryEntry> {
        Subscription::prefix(self.store.watch(keys::HISTORY_PREFIX))
    }

    pub fn watch_account(&self, id: &AccountId) -> Subscription<Account> {
        let key = keys::account(id);
        Subscription::exact(self.store.watch(&key), key)
    }

    pub fn watch_payments(&self) -> Subscription<PaymentRequest> {
        Subscription::prefix(self.store.watch(keys::PAYMENTS_PREFIX))
    }
}
