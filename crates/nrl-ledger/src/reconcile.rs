//! Repair of interrupted bet placements.
//!
//! Bet placement is three separate conditional writes. A client that dies
//! after writing the slip leaves an undebited slip behind (and possibly a
//! partially recorded tally). Settlement already tolerates that, but an
//! operator can also finish the debit eagerly and audit the tally.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use nrl_store::KvStore;
use nrl_types::{AccountId, Coins, Digit, Timestamp};

use crate::bets::{BetLedger, StakeRecorder};
use crate::error::{LedgerError, LedgerResult};

/// Outcome of reconciling one account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reconciled {
    /// No slip, or the slip was already debited.
    Clean,
    /// The missing debit was applied.
    DebitCompleted {
        round: Timestamp,
        amount: Coins,
        balance: Coins,
    },
    /// The balance cannot cover the outstanding stake; left for settlement.
    Shortfall {
        round: Timestamp,
        owed: Coins,
        balance: Coins,
    },
}

/// Recorded tally versus the sum of the slips placed in a round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyAudit {
    pub round: Timestamp,
    pub expected: [Coins; Digit::COUNT],
    pub observed: [Coins; Digit::COUNT],
    pub mismatches: Vec<Digit>,
}

impl TallyAudit {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }
}

impl<S: KvStore, R: StakeRecorder> BetLedger<S, R> {
    /// Finish a bet placement that stopped before its debit.
    pub fn reconcile(&self, id: &AccountId) -> LedgerResult<Reconciled> {
        let account = self.balances.account(id)?;
        let Some(slip) = account.current_bet.filter(|s| !s.debited) else {
            return Ok(Reconciled::Clean);
        };
        match self.complete_debit(id, slip.round) {
            Ok(Some(balance)) => {
                info!(account = %id, round = %slip.round, amount = slip.total(), "completed interrupted bet debit");
                Ok(Reconciled::DebitCompleted {
                    round: slip.round,
                    amount: slip.total(),
                    balance,
                })
            }
            // Settled or debited by someone else in the meantime.
            Ok(None) => Ok(Reconciled::Clean),
            Err(LedgerError::InsufficientFunds { balance, requested, .. }) => {
                warn!(account = %id, round = %slip.round, owed = requested, balance, "cannot complete bet debit");
                Ok(Reconciled::Shortfall {
                    round: slip.round,
                    owed: requested,
                    balance,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Reconcile every account. Returns only the accounts that needed work.
    pub fn reconcile_all(&self) -> LedgerResult<Vec<(AccountId, Reconciled)>> {
        let mut touched = Vec::new();
        for account in self.balances.accounts()? {
            match self.reconcile(&account.id)? {
                Reconciled::Clean => {}
                other => touched.push((account.id, other)),
            }
        }
        Ok(touched)
    }

    /// Compare the recorded tally of `round` with the unsettled slips for it.
    ///
    /// Only meaningful while the round's slips are still outstanding;
    /// settlement clears slips but not the recorded tally.
    pub fn audit_tally(&self, round: Timestamp) -> LedgerResult<TallyAudit> {
        let mut expected: [Coins; Digit::COUNT] = [0; Digit::COUNT];
        for account in self.balances.accounts()? {
            let Some(slip) = account.current_bet.filter(|s| s.round == round) else {
                continue;
            };
            for (digit, amount) in slip.wager.iter() {
                expected[digit.index()] = expected[digit.index()].saturating_add(amount);
            }
        }
        let observed = self.recorder.recorded_stakes(round)?;
        let mismatches: Vec<Digit> = Digit::ALL
            .into_iter()
            .filter(|d| expected[d.index()] != observed[d.index()])
            .collect();
        if !mismatches.is_empty() {
            warn!(%round, ?mismatches, "tally does not match bet slips");
        }
        Ok(TallyAudit {
            round,
            expected,
            observed,
            mismatches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bets::tests::{bets, d, id, ROUND, NOW};
    use nrl_store::{FaultyStore, InMemoryKvStore};
    use nrl_types::Wager;
    use std::sync::Arc;

    #[test]
    fn clean_account_needs_nothing() {
        let l = bets(Arc::new(InMemoryKvStore::new()));
        assert_eq!(l.reconcile(&id("alice")).unwrap(), Reconciled::Clean);
        l.place_bet(&id("alice"), &Wager::single(d(1), 5).unwrap(), ROUND, NOW)
            .unwrap();
        assert_eq!(l.reconcile(&id("alice")).unwrap(), Reconciled::Clean);
    }

    #[test]
    fn completes_interrupted_debit_once() {
        let store = Arc::new(FaultyStore::new(InMemoryKvStore::new()));
        let l = bets(Arc::clone(&store));
        store.fail_writes_after("accounts/alice", 1);
        let _ = l.place_bet(&id("alice"), &Wager::single(d(4), 250).unwrap(), ROUND, NOW);
        store.heal();

        assert_eq!(
            l.reconcile(&id("alice")).unwrap(),
            Reconciled::DebitCompleted {
                round: ROUND,
                amount: 250,
                balance: 750
            }
        );
        assert_eq!(l.reconcile(&id("alice")).unwrap(), Reconciled::Clean);

        // Settlement after reconciliation does not net a second time.
        l.settle(&id("alice"), ROUND, d(0)).unwrap();
        assert_eq!(l.balances().balance(&id("alice")).unwrap(), 750);
    }

    #[test]
    fn shortfall_is_reported_not_forced() {
        let store = Arc::new(FaultyStore::new(InMemoryKvStore::new()));
        let l = bets(Arc::clone(&store));
        store.fail_writes_after("accounts/alice", 1);
        let _ = l.place_bet(&id("alice"), &Wager::single(d(4), 800).unwrap(), ROUND, NOW);
        store.heal();
        l.balances().debit(&id("alice"), 500).unwrap();

        assert_eq!(
            l.reconcile(&id("alice")).unwrap(),
            Reconciled::Shortfall {
                round: ROUND,
                owed: 800,
                balance: 500
            }
        );
        assert_eq!(l.balances().balance(&id("alice")).unwrap(), 500);
    }

    #[test]
    fn reconcile_all_reports_only_repairs() {
        let store = Arc::new(FaultyStore::new(InMemoryKvStore::new()));
        let l = bets(Arc::clone(&store));
        l.balances().open_account(&id("bob"), "Bob", NOW).unwrap();
        l.place_bet(&id("bob"), &Wager::single(d(2), 10).unwrap(), ROUND, NOW)
            .unwrap();
        store.fail_writes_after("accounts/alice", 1);
        let _ = l.place_bet(&id("alice"), &Wager::single(d(4), 10).unwrap(), ROUND, NOW);
        store.heal();

        let touched = l.reconcile_all().unwrap();
        assert_eq!(touched.len(), 1);
        assert_eq!(touched[0].0, id("alice"));
    }

    #[test]
    fn audit_matches_after_clean_bets() {
        let l = bets(Arc::new(InMemoryKvStore::new()));
        l.balances().open_account(&id("bob"), "Bob", NOW).unwrap();
        l.place_bet(&id("alice"), &Wager::from_pairs([(d(1), 5), (d(2), 7)]).unwrap(), ROUND, NOW)
            .unwrap();
        l.place_bet(&id("bob"), &Wager::single(d(1), 3).unwrap(), ROUND, NOW)
            .unwrap();

        let audit = l.audit_tally(ROUND).unwrap();
        assert!(audit.is_consistent());
        assert_eq!(audit.expected[1], 8);
        assert_eq!(audit.expected[2], 7);
    }

    #[test]
    fn audit_flags_missing_tally_increment() {
        let l = bets(Arc::new(InMemoryKvStore::new()));
        *l.recorder().closed.lock().unwrap() = Some(ROUND);
        let _ = l.place_bet(&id("alice"), &Wager::single(d(6), 40).unwrap(), ROUND, NOW);

        let audit = l.audit_tally(ROUND).unwrap();
        assert_eq!(audit.mismatches, vec![d(6)]);
        assert_eq!(audit.expected[6], 40);
        assert_eq!(audit.observed[6], 0);
    }
}
