use serde::{Deserialize, Serialize};
use tracing::debug;

use nrl_ledger::{LedgerError, LedgerResult, StakeRecorder};
use nrl_store::{KvStore, KvStoreExt, Mutation, RetryPolicy, TxnOutcome};
use nrl_types::{keys, Coins, Digit, Timestamp};

use crate::error::{RoundError, RoundResult};
use crate::round::Round;
use crate::selector::Tally;

/// One digit's aggregate stake, stored at `round/tally/{digit}`.
///
/// The `round` stamp (a round's `closes_at`) keeps a late increment from an
/// expired round out of the next round's total.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyCell {
    pub round: Timestamp,
    pub amount: Coins,
}

/// Per-digit stake totals for the active round.
pub struct TallyStore<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S: KvStore> TallyStore<S> {
    pub fn new(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Add `amount` to `digit` for the round closing at `round`.
    ///
    /// Returns the digit's new total. Fails with [`RoundError::StaleRound`]
    /// if the round has already been replaced, either in the round record
    /// or by a newer stamp on the cell. A cell left over from an older
    /// round is restarted rather than added to.
    ///
    /// The round record and the cell are separate keys, so the record is
    /// checked on both sides of the cell write. A stake that lands after
    /// the round moved on is refused even though it stays in the old
    /// round's cell until the next reset. The transition winner draws from
    /// its snapshot before its own write commits, so a stake landing in
    /// that gap is accepted without having been seen by the draw.
    pub fn increment(&self, round: Timestamp, digit: Digit, amount: Coins) -> RoundResult<Coins> {
        self.ensure_current(round)?;

        let mut stale = None;
        let out = self
            .store
            .transact(&keys::tally(digit), self.retry, |cell: Option<TallyCell>| {
                stale = None;
                match cell {
                    Some(cell) if cell.round == round => Mutation::Set(TallyCell {
                        round,
                        amount: cell.amount.saturating_add(amount),
                    }),
                    Some(cell) if cell.round.is_after(&round) => {
                        stale = Some(cell.round);
                        Mutation::Abort
                    }
                    _ => Mutation::Set(TallyCell { round, amount }),
                }
            })?;

        if let Some(current) = stale {
            return Err(RoundError::StaleRound { round, current });
        }
        self.ensure_current(round)?;
        let total = match out {
            TxnOutcome::Committed { value: Some(cell), .. } => cell.amount,
            _ => 0,
        };
        debug!(%round, %digit, amount, total, "tally incremented");
        Ok(total)
    }

    fn ensure_current(&self, round: Timestamp) -> RoundResult<()> {
        match self.store.get_as::<Round>(keys::ROUND_CURRENT)? {
            Some(current) if current.closes_at.is_after(&round) => Err(RoundError::StaleRound {
                round,
                current: current.closes_at,
            }),
            _ => Ok(()),
        }
    }

    /// Every stored cell, whatever its round.
    pub fn cells(&self) -> RoundResult<Vec<(Digit, TallyCell)>> {
        self.store
            .list_as::<TallyCell>(keys::TALLY_PREFIX)?
            .into_iter()
            .map(|(key, cell)| {
                let digit = keys::leaf(&key)
                    .parse::<Digit>()
                    .map_err(|e| RoundError::Corrupt {
                        key: key.clone(),
                        reason: e.to_string(),
                    })?;
                Ok((digit, cell))
            })
            .collect()
    }

    /// The totals staked in the round closing at `round`.
    pub fn snapshot(&self, round: Timestamp) -> RoundResult<Tally> {
        let mut tally = Tally::empty();
        for (digit, cell) in self.cells()? {
            if cell.round == round {
                tally.add(digit, cell.amount);
            }
        }
        Ok(tally)
    }

    /// Delete every cell stamped with a round older than `current`.
    ///
    /// Each delete is conditional, so a cell a bettor has meanwhile
    /// restarted for `current` survives. Returns the number removed.
    pub fn reset(&self, current: Timestamp) -> RoundResult<usize> {
        let mut removed = 0;
        for (digit, cell) in self.cells()? {
            if !cell.round.is_before(&current) {
                continue;
            }
            let out = self
                .store
                .transact(&keys::tally(digit), self.retry, |cell: Option<TallyCell>| {
                    match cell {
                        Some(cell) if cell.round.is_before(&current) => Mutation::Delete,
                        _ => Mutation::Abort,
                    }
                })?;
            if out.is_committed() {
                removed += 1;
            }
        }
        debug!(%current, removed, "tally reset");
        Ok(removed)
    }
}

impl<S: KvStore> StakeRecorder for TallyStore<S> {
    fn record_stake(&self, round: Timestamp, digit: Digit, amount: Coins) -> LedgerResult<()> {
        self.increment(round, digit, amount)
            .map(|_| ())
            .map_err(into_ledger_error)
    }

    fn recorded_stakes(&self, round: Timestamp) -> LedgerResult<[Coins; Digit::COUNT]> {
        self.snapshot(round)
            .map(|t| *t.as_array())
            .map_err(into_ledger_error)
    }
}

fn into_ledger_error(err: RoundError) -> LedgerError {
    match err {
        RoundError::StaleRound { round, .. } => LedgerError::RoundClosed { round },
        RoundError::Store(e) => LedgerError::Store(e),
        other => LedgerError::Invalid(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nrl_store::{FaultyStore, InMemoryKvStore};
    use std::sync::Arc;
    use std::time::Duration;

    fn d(n: u8) -> Digit {
        Digit::new(n).unwrap()
    }

    fn t(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    fn tally_store() -> TallyStore<Arc<InMemoryKvStore>> {
        TallyStore::new(Arc::new(InMemoryKvStore::new()), RetryPolicy::default())
    }

    #[test]
    fn increments_accumulate_per_round() {
        let ts = tally_store();
        assert_eq!(ts.increment(t(100), d(3), 10).unwrap(), 10);
        assert_eq!(ts.increment(t(100), d(3), 5).unwrap(), 15);
        ts.increment(t(100), d(7), 1).unwrap();
        let snap = ts.snapshot(t(100)).unwrap();
        assert_eq!(snap.get(d(3)), 15);
        assert_eq!(snap.get(d(7)), 1);
        assert_eq!(snap.total(), 16);
    }

    #[test]
    fn newer_round_restarts_cell() {
        let ts = tally_store();
        ts.increment(t(100), d(3), 10).unwrap();
        assert_eq!(ts.increment(t(200), d(3), 4).unwrap(), 4);
        assert_eq!(ts.snapshot(t(100)).unwrap().get(d(3)), 0);
        assert_eq!(ts.snapshot(t(200)).unwrap().get(d(3)), 4);
    }

    #[test]
    fn stale_increment_is_rejected_by_cell_stamp() {
        let ts = tally_store();
        ts.increment(t(200), d(3), 4).unwrap();
        let err = ts.increment(t(100), d(3), 10).unwrap_err();
        assert_eq!(
            err,
            RoundError::StaleRound {
                round: t(100),
                current: t(200)
            }
        );
        assert_eq!(ts.snapshot(t(200)).unwrap().get(d(3)), 4);
    }

    #[test]
    fn stale_increment_is_rejected_by_round_record() {
        let ts = tally_store();
        let round = Round::genesis(t(0), Duration::from_secs(300));
        ts.store().put_as(keys::ROUND_CURRENT, &round).unwrap();
        // A digit nobody has staked yet, so only the round record can tell.
        let err = ts.increment(t(100), d(5), 1).unwrap_err();
        assert!(matches!(err, RoundError::StaleRound { current, .. } if current == round.closes_at));
        assert!(ts.cells().unwrap().is_empty());
    }

    #[test]
    fn increment_landing_after_a_transition_is_refused() {
        let store = Arc::new(FaultyStore::new(InMemoryKvStore::new()));
        let ts = TallyStore::new(Arc::clone(&store), RetryPolicy::default());
        let round = Round::genesis(t(0), Duration::from_secs(300));
        store.put_as(keys::ROUND_CURRENT, &round).unwrap();

        // The round is replaced after the first check but before the cell write.
        let next = round.successor(round.closes_at, Duration::from_secs(300), d(0));
        let writer = Arc::clone(&store);
        store.before_next_write(keys::TALLY_PREFIX, move || {
            writer.put_as(keys::ROUND_CURRENT, &next).unwrap();
        });
        let err = ts.increment(round.closes_at, d(4), 25).unwrap_err();
        assert!(matches!(err, RoundError::StaleRound { round: r, .. } if r == round.closes_at));
        // The stray stake only ever counts toward the old round.
        assert_eq!(ts.snapshot(round.closes_at).unwrap().get(d(4)), 25);
        assert_eq!(ts.reset(round.closes_at.plus(Duration::from_secs(300))).unwrap(), 1);
    }

    #[test]
    fn reset_removes_only_older_rounds() {
        let ts = tally_store();
        ts.increment(t(100), d(1), 1).unwrap();
        ts.increment(t(100), d(2), 2).unwrap();
        ts.increment(t(200), d(3), 3).unwrap();
        assert_eq!(ts.reset(t(200)).unwrap(), 2);
        let cells = ts.cells().unwrap();
        assert_eq!(cells, vec![(d(3), TallyCell { round: t(200), amount: 3 })]);
        assert_eq!(ts.reset(t(200)).unwrap(), 0);
    }

    #[test]
    fn concurrent_increments_sum_exactly() {
        let ts = TallyStore::new(Arc::new(InMemoryKvStore::new()), RetryPolicy::new(10_000));
        std::thread::scope(|s| {
            for i in 0..8u64 {
                let ts = &ts;
                s.spawn(move || {
                    for _ in 0..25 {
                        ts.increment(t(100), d((i % 2) as u8), 2).unwrap();
                    }
                });
            }
        });
        let snap = ts.snapshot(t(100)).unwrap();
        assert_eq!(snap.get(d(0)), 200);
        assert_eq!(snap.get(d(1)), 200);
    }

    #[test]
    fn recorder_maps_stale_round_to_closed() {
        let ts = tally_store();
        ts.increment(t(200), d(3), 4).unwrap();
        let err = ts.record_stake(t(100), d(3), 1).unwrap_err();
        assert_eq!(err, LedgerError::RoundClosed { round: t(100) });
        assert_eq!(ts.recorded_stakes(t(200)).unwrap()[3], 4);
    }
}
