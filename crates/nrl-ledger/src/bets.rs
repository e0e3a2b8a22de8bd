use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use nrl_store::KvStore;
use nrl_types::{AccountId, Coins, Digit, Timestamp, Wager};

use crate::account::BetSlip;
use crate::balance::{checked_debit, BalanceLedger};
use crate::error::{LedgerError, LedgerResult};

/// Where bet placement records per-digit stakes.
///
/// Implemented by the round engine's tally. `round` is the `closes_at` of
/// the round the stake belongs to; an implementation refuses stakes for a
/// round that is no longer current.
pub trait StakeRecorder: Send + Sync {
    fn record_stake(&self, round: Timestamp, digit: Digit, amount: Coins) -> LedgerResult<()>;

    /// Aggregate stakes recorded for `round`, indexed by digit.
    fn recorded_stakes(&self, round: Timestamp) -> LedgerResult<[Coins; Digit::COUNT]>;
}

impl<R: StakeRecorder + ?Sized> StakeRecorder for Arc<R> {
    fn record_stake(&self, round: Timestamp, digit: Digit, amount: Coins) -> LedgerResult<()> {
        (**self).record_stake(round, digit, amount)
    }

    fn recorded_stakes(&self, round: Timestamp) -> LedgerResult<[Coins; Digit::COUNT]> {
        (**self).recorded_stakes(round)
    }
}

/// Confirmation of a fully placed bet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetReceipt {
    pub account: AccountId,
    pub round: Timestamp,
    pub wager: Wager,
    pub balance: Coins,
}

/// What settling (or voiding) a slip did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Settlement {
    /// No slip for the requested round; nothing changed.
    NothingToSettle,
    Settled {
        round: Timestamp,
        winner: Digit,
        /// Gross payout: stake on the winner times the multiplier.
        payout: Coins,
        /// Stake that was never debited and had to be netted here.
        netted: Coins,
        /// Part of `netted` the balance could not cover.
        shortfall: Coins,
        balance: Coins,
    },
    /// The slip's round result is unrecoverable; the stake went back.
    Voided {
        round: Timestamp,
        refunded: Coins,
        balance: Coins,
    },
}

impl Settlement {
    pub fn is_noop(&self) -> bool {
        matches!(self, Self::NothingToSettle)
    }
}

/// Bet placement and settlement on top of a [`BalanceLedger`].
pub struct BetLedger<S, R> {
    pub(crate) balances: BalanceLedger<S>,
    pub(crate) recorder: R,
}

impl<S: KvStore, R: StakeRecorder> BetLedger<S, R> {
    pub fn new(balances: BalanceLedger<S>, recorder: R) -> Self {
        Self { balances, recorder }
    }

    pub fn balances(&self) -> &BalanceLedger<S> {
        &self.balances
    }

    pub fn recorder(&self) -> &R {
        &self.recorder
    }

    pub fn current_slip(&self, id: &AccountId) -> LedgerResult<Option<BetSlip>> {
        Ok(self.balances.account(id)?.current_bet)
    }

    /// Place `wager` in the round closing at `round`.
    ///
    /// Runs three steps: write the slip, record each stake in the tally,
    /// then debit the total and mark the slip debited. Each step is its own
    /// conditional write. If the process dies after the first step the slip
    /// stays undebited and settlement or [`BetLedger::reconcile`] finishes
    /// the job.
    pub fn place_bet(
        &self,
        id: &AccountId,
        wager: &Wager,
        round: Timestamp,
        now: Timestamp,
    ) -> LedgerResult<BetReceipt> {
        if !now.is_before(&round) {
            return Err(LedgerError::RoundClosed { round });
        }
        let total = wager.total();

        self.balances.update(id, |account| {
            if let Some(slip) = &account.current_bet {
                if slip.round == round {
                    return Err(LedgerError::DuplicateBet {
                        account: id.clone(),
                        round,
                    });
                }
                return Err(LedgerError::UnsettledBet {
                    account: id.clone(),
                    round: slip.round,
                });
            }
            if total > account.balance {
                return Err(LedgerError::InsufficientFunds {
                    account: id.clone(),
                    balance: account.balance,
                    requested: total,
                });
            }
            account.current_bet = Some(BetSlip {
                round,
                wager: wager.clone(),
                placed_at: now,
                debited: false,
            });
            Ok(true)
        })?;
        debug!(account = %id, %round, total, "bet slip written");

        for (digit, amount) in wager.iter() {
            if let Err(err) = self.recorder.record_stake(round, digit, amount) {
                if matches!(err, LedgerError::RoundClosed { .. }) {
                    self.withdraw_slip(id, round)?;
                }
                return Err(err);
            }
        }

        let balance = match self.complete_debit(id, round)? {
            Some(balance) => balance,
            None => self.balances.balance(id)?,
        };
        info!(account = %id, %round, total, balance, "bet placed");
        Ok(BetReceipt {
            account: id.clone(),
            round,
            wager: wager.clone(),
            balance,
        })
    }

    /// Drop the undebited slip for `round` after the tally refused it.
    ///
    /// Stakes already recorded for the closed round stay in its cells; they
    /// can only make that round's digits look busier and are cleared by the
    /// next reset.
    fn withdraw_slip(&self, id: &AccountId, round: Timestamp) -> LedgerResult<()> {
        self.balances.update(id, |account| {
            match &account.current_bet {
                Some(slip) if slip.round == round && !slip.debited => {
                    account.current_bet = None;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })?;
        debug!(account = %id, %round, "refused bet slip withdrawn");
        Ok(())
    }

    /// Debit an undebited slip for `round` and mark it debited.
    ///
    /// Returns the new balance, or `None` if there was nothing to debit.
    pub(crate) fn complete_debit(&self, id: &AccountId, round: Timestamp) -> LedgerResult<Option<Coins>> {
        let mut debited = false;
        let account = self.balances.update(id, |account| {
            debited = false;
            let Some(slip) = account.current_bet.as_ref() else {
                return Ok(false);
            };
            if slip.round != round || slip.debited {
                return Ok(false);
            }
            let total = slip.total();
            account.balance = checked_debit(account, total)?;
            if let Some(slip) = account.current_bet.as_mut() {
                slip.debited = true;
            }
            debited = true;
            Ok(true)
        })?;
        Ok(debited.then_some(account.balance))
    }

    /// Settle the slip placed in `round` against `winner`.
    ///
    /// Credits the payout and clears the slip in one conditional write, so a
    /// second call finds no slip and does nothing. A slip whose stake was
    /// never debited has that stake netted against the payout here; if the
    /// balance cannot cover it the balance floors at zero and the uncovered
    /// part is logged as a shortfall.
    pub fn settle(&self, id: &AccountId, round: Timestamp, winner: Digit) -> LedgerResult<Settlement> {
        let multiplier = self.balances.config().payout_multiplier;
        let mut result = Settlement::NothingToSettle;
        let account = self.balances.update(id, |account| {
            result = Settlement::NothingToSettle;
            let Some(slip) = account.current_bet.as_ref() else {
                return Ok(false);
            };
            if slip.round != round {
                return Ok(false);
            }
            let payout = slip.payout(winner, multiplier);
            let netted = if slip.debited { 0 } else { slip.total() };

            let credited = account.balance.checked_add(payout).ok_or_else(|| {
                LedgerError::InvalidAmount(format!("payout of {payout} overflows"))
            })?;
            let balance = credited.saturating_sub(netted);
            let shortfall = netted - (credited - balance);

            account.balance = balance;
            account.current_bet = None;
            result = Settlement::Settled {
                round,
                winner,
                payout,
                netted,
                shortfall,
                balance,
            };
            Ok(true)
        })?;

        if let Settlement::Settled {
            payout,
            netted,
            shortfall,
            ..
        } = &result
        {
            if *shortfall > 0 {
                warn!(account = %id, %round, netted, shortfall, "settled undebited slip with a shortfall");
            } else if *netted > 0 {
                warn!(account = %id, %round, netted, "netted undebited stake at settlement");
            }
            info!(account = %id, %round, %winner, payout, balance = account.balance, "bet settled");
        }
        Ok(result)
    }

    /// Drop the current slip whatever its round, refunding a debited stake.
    ///
    /// Used when the slip's round result can no longer be recovered.
    pub fn void_bet(&self, id: &AccountId) -> LedgerResult<Settlement> {
        let mut result = Settlement::NothingToSettle;
        let account = self.balances.update(id, |account| {
            result = Settlement::NothingToSettle;
            let Some(slip) = account.current_bet.take() else {
                return Ok(false);
            };
            let refunded = if slip.debited { slip.total() } else { 0 };
            account.balance = account.balance.checked_add(refunded).ok_or_else(|| {
                LedgerError::InvalidAmount(format!("refund of {refunded} overflows"))
            })?;
            result = Settlement::Voided {
                round: slip.round,
                refunded,
                balance: account.balance,
            };
            Ok(true)
        })?;
        if let Settlement::Voided { round, refunded, .. } = &result {
            warn!(account = %id, %round, refunded, balance = account.balance, "voided unsettleable bet");
        }
        Ok(result)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use nrl_store::{FaultyStore, InMemoryKvStore, StoreError};
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Tally stand-in: remembers stakes per round, refuses a closed round.
    #[derive(Default)]
    pub(crate) struct MemoryTally {
        pub stakes: Mutex<BTreeMap<(Timestamp, Digit), Coins>>,
        pub closed: Mutex<Option<Timestamp>>,
    }

    impl StakeRecorder for MemoryTally {
        fn record_stake(&self, round: Timestamp, digit: Digit, amount: Coins) -> LedgerResult<()> {
            if *self.closed.lock().unwrap() == Some(round) {
                return Err(LedgerError::RoundClosed { round });
            }
            *self.stakes.lock().unwrap().entry((round, digit)).or_default() += amount;
            Ok(())
        }

        fn recorded_stakes(&self, round: Timestamp) -> LedgerResult<[Coins; Digit::COUNT]> {
            let mut out = [0; Digit::COUNT];
            for ((r, d), amount) in self.stakes.lock().unwrap().iter() {
                if *r == round {
                    out[d.index()] += amount;
                }
            }
            Ok(out)
        }
    }

    pub(crate) fn id(s: &str) -> AccountId {
        AccountId::new(s).unwrap()
    }

    pub(crate) fn d(n: u8) -> Digit {
        Digit::new(n).unwrap()
    }

    pub(crate) const ROUND: Timestamp = Timestamp::from_millis(300_000);
    pub(crate) const NOW: Timestamp = Timestamp::from_millis(10_000);

    pub(crate) fn bets<S: KvStore>(store: S) -> BetLedger<S, Arc<MemoryTally>> {
        let l = BetLedger::new(
            BalanceLedger::new(store, LedgerConfig::default()),
            Arc::new(MemoryTally::default()),
        );
        l.balances().open_account(&id("alice"), "Alice", NOW).unwrap();
        l
    }

    fn memory() -> BetLedger<Arc<InMemoryKvStore>, Arc<MemoryTally>> {
        bets(Arc::new(InMemoryKvStore::new()))
    }

    #[test]
    fn place_bet_debits_and_records_stakes() {
        let l = memory();
        let wager = Wager::from_pairs([(d(3), 100), (d(5), 20)]).unwrap();
        let receipt = l.place_bet(&id("alice"), &wager, ROUND, NOW).unwrap();
        assert_eq!(receipt.balance, 880);

        let slip = l.current_slip(&id("alice")).unwrap().unwrap();
        assert!(slip.debited);
        assert_eq!(slip.round, ROUND);

        let recorded = l.recorder().recorded_stakes(ROUND).unwrap();
        assert_eq!(recorded[3], 100);
        assert_eq!(recorded[5], 20);
        assert_eq!(recorded.iter().sum::<Coins>(), 120);
    }

    #[test]
    fn second_bet_same_round_is_duplicate() {
        let l = memory();
        let wager = Wager::single(d(1), 10).unwrap();
        l.place_bet(&id("alice"), &wager, ROUND, NOW).unwrap();
        let err = l.place_bet(&id("alice"), &wager, ROUND, NOW).unwrap_err();
        assert_eq!(
            err,
            LedgerError::DuplicateBet {
                account: id("alice"),
                round: ROUND
            }
        );
        assert_eq!(l.balances().balance(&id("alice")).unwrap(), 990);
        assert_eq!(l.recorder().recorded_stakes(ROUND).unwrap()[1], 10);
    }

    #[test]
    fn unsettled_slip_blocks_next_round() {
        let l = memory();
        l.place_bet(&id("alice"), &Wager::single(d(1), 10).unwrap(), ROUND, NOW)
            .unwrap();
        let next = ROUND.plus(std::time::Duration::from_secs(300));
        let err = l
            .place_bet(&id("alice"), &Wager::single(d(2), 10).unwrap(), next, ROUND)
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnsettledBet { round, .. } if round == ROUND));
    }

    #[test]
    fn bet_above_balance_writes_nothing() {
        let l = memory();
        let err = l
            .place_bet(&id("alice"), &Wager::single(d(1), 1001).unwrap(), ROUND, NOW)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { requested: 1001, .. }));
        assert!(l.current_slip(&id("alice")).unwrap().is_none());
        assert_eq!(l.recorder().recorded_stakes(ROUND).unwrap(), [0; 10]);
    }

    #[test]
    fn bet_after_close_is_refused() {
        let l = memory();
        let err = l
            .place_bet(&id("alice"), &Wager::single(d(1), 1).unwrap(), ROUND, ROUND)
            .unwrap_err();
        assert_eq!(err, LedgerError::RoundClosed { round: ROUND });
    }

    #[test]
    fn end_to_end_win() {
        let l = memory();
        l.place_bet(&id("alice"), &Wager::single(d(3), 100).unwrap(), ROUND, NOW)
            .unwrap();
        let s = l.settle(&id("alice"), ROUND, d(3)).unwrap();
        assert!(matches!(s, Settlement::Settled { payout: 1000, balance: 1900, .. }));
        assert!(l.current_slip(&id("alice")).unwrap().is_none());
        // 1000 - 100 + 100 * 10
        assert_eq!(l.balances().balance(&id("alice")).unwrap(), 1900);
    }

    #[test]
    fn end_to_end_loss() {
        let l = memory();
        l.place_bet(&id("alice"), &Wager::single(d(3), 100).unwrap(), ROUND, NOW)
            .unwrap();
        let s = l.settle(&id("alice"), ROUND, d(7)).unwrap();
        assert!(matches!(s, Settlement::Settled { payout: 0, balance: 900, .. }));
        assert_eq!(l.balances().balance(&id("alice")).unwrap(), 900);
    }

    #[test]
    fn settlement_is_idempotent() {
        let l = memory();
        l.place_bet(&id("alice"), &Wager::single(d(3), 100).unwrap(), ROUND, NOW)
            .unwrap();
        l.settle(&id("alice"), ROUND, d(3)).unwrap();
        for _ in 0..3 {
            assert!(l.settle(&id("alice"), ROUND, d(3)).unwrap().is_noop());
        }
        assert_eq!(l.balances().balance(&id("alice")).unwrap(), 1900);
    }

    #[test]
    fn concurrent_settlers_credit_once() {
        let l = memory();
        l.place_bet(&id("alice"), &Wager::single(d(3), 100).unwrap(), ROUND, NOW)
            .unwrap();
        let settled = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| l.settle(&id("alice"), ROUND, d(3)).unwrap()))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|s| !s.is_noop())
                .count()
        });
        assert_eq!(settled, 1);
        assert_eq!(l.balances().balance(&id("alice")).unwrap(), 1900);
    }

    #[test]
    fn settle_for_other_round_is_noop() {
        let l = memory();
        l.place_bet(&id("alice"), &Wager::single(d(3), 100).unwrap(), ROUND, NOW)
            .unwrap();
        let s = l
            .settle(&id("alice"), Timestamp::from_millis(1), d(3))
            .unwrap();
        assert!(s.is_noop());
        assert!(l.current_slip(&id("alice")).unwrap().is_some());
    }

    #[test]
    fn settle_without_bet_is_noop() {
        let l = memory();
        assert!(l.settle(&id("alice"), ROUND, d(0)).unwrap().is_noop());
        assert_eq!(l.balances().balance(&id("alice")).unwrap(), 1000);
    }

    #[test]
    fn crash_before_debit_is_netted_at_settlement() {
        let store = Arc::new(FaultyStore::new(InMemoryKvStore::new()));
        let l = bets(Arc::clone(&store));
        // The slip write succeeds; the debit step hits an outage.
        store.fail_writes_after("accounts/alice", 1);
        let err = l
            .place_bet(&id("alice"), &Wager::single(d(3), 100).unwrap(), ROUND, NOW)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Store(StoreError::Unavailable(_))));
        store.heal();

        let slip = l.current_slip(&id("alice")).unwrap().unwrap();
        assert!(!slip.debited);
        assert_eq!(l.balances().balance(&id("alice")).unwrap(), 1000);
        assert_eq!(l.recorder().recorded_stakes(ROUND).unwrap()[3], 100);

        let s = l.settle(&id("alice"), ROUND, d(3)).unwrap();
        assert!(matches!(s, Settlement::Settled { netted: 100, shortfall: 0, .. }));
        assert_eq!(l.balances().balance(&id("alice")).unwrap(), 1900);
    }

    #[test]
    fn undebited_loss_nets_down_to_zero_with_shortfall() {
        let store = Arc::new(FaultyStore::new(InMemoryKvStore::new()));
        let l = bets(Arc::clone(&store));
        store.fail_writes_after("accounts/alice", 1);
        let _ = l.place_bet(&id("alice"), &Wager::single(d(3), 600).unwrap(), ROUND, NOW);
        store.heal();
        // Spend most of the balance elsewhere before settlement.
        l.balances().debit(&id("alice"), 900).unwrap();

        let s = l.settle(&id("alice"), ROUND, d(7)).unwrap();
        assert_eq!(
            s,
            Settlement::Settled {
                round: ROUND,
                winner: d(7),
                payout: 0,
                netted: 600,
                shortfall: 500,
                balance: 0
            }
        );
    }

    #[test]
    fn void_refunds_debited_stake() {
        let l = memory();
        l.place_bet(&id("alice"), &Wager::single(d(3), 100).unwrap(), ROUND, NOW)
            .unwrap();
        let s = l.void_bet(&id("alice")).unwrap();
        assert_eq!(
            s,
            Settlement::Voided {
                round: ROUND,
                refunded: 100,
                balance: 1000
            }
        );
        assert!(l.void_bet(&id("alice")).unwrap().is_noop());
    }

    #[test]
    fn recorder_refusal_withdraws_the_slip() {
        let l = memory();
        *l.recorder().closed.lock().unwrap() = Some(ROUND);
        let err = l
            .place_bet(&id("alice"), &Wager::single(d(3), 100).unwrap(), ROUND, NOW)
            .unwrap_err();
        assert_eq!(err, LedgerError::RoundClosed { round: ROUND });
        assert!(l.current_slip(&id("alice")).unwrap().is_none());
        assert_eq!(l.balances().balance(&id("alice")).unwrap(), 1000);
        // Nothing left to pay out, and the next round is open to her.
        assert!(l.settle(&id("alice"), ROUND, d(3)).unwrap().is_noop());
        let next = ROUND.plus(std::time::Duration::from_secs(300));
        let receipt = l
            .place_bet(&id("alice"), &Wager::single(d(3), 100).unwrap(), next, ROUND)
            .unwrap();
        assert_eq!(receipt.balance, 900);
    }

    #[test]
    fn store_failure_while_recording_keeps_the_slip() {
        // A refusal clears the slip; an outage does not, since the stake may
        // already be counted.
        let l = BetLedger::new(memory().balances, FailingTally);
        let err = l
            .place_bet(&id("alice"), &Wager::single(d(3), 100).unwrap(), ROUND, NOW)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Store(StoreError::Unavailable(_))));
        assert!(l.current_slip(&id("alice")).unwrap().is_some());
    }

    struct FailingTally;

    impl StakeRecorder for FailingTally {
        fn record_stake(&self, _round: Timestamp, _digit: Digit, _amount: Coins) -> LedgerResult<()> {
            Err(LedgerError::Store(StoreError::Unavailable("tally offline".into())))
        }

        fn recorded_stakes(&self, _round: Timestamp) -> LedgerResult<[Coins; Digit::COUNT]> {
            Ok([0; Digit::COUNT])
        }
    }
}
