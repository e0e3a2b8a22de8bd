use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use nrl_store::{KvStore, KvStoreExt, Mutation, TxnOutcome};
use nrl_types::{keys, Digit, Timestamp};

use crate::config::RoundConfig;
use crate::error::{RoundError, RoundResult};
use crate::history::{HistoryEntry, HistoryLog};
use crate::round::Round;
use crate::selector::{LeastStakedSelector, OutcomeSelector, Tally};
use crate::tally::TallyStore;

/// What one call to [`RoundEngine::advance_if_expired`] observed or did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Advance {
    /// No round existed; this caller opened the first one.
    Opened { round: Round },
    /// This caller replaced the expired round and recorded its result.
    Advanced {
        closed: Round,
        round: Round,
        winner: Digit,
        tally: Tally,
        entry: HistoryEntry,
    },
    /// The current round is still open.
    NotYetExpired { round: Round },
    /// Another caller won the race for this boundary.
    AlreadyAdvanced { round: Round },
}

impl Advance {
    /// The round record current after the call.
    pub fn round(&self) -> &Round {
        match self {
            Self::Opened { round }
            | Self::Advanced { round, .. }
            | Self::NotYetExpired { round }
            | Self::AlreadyAdvanced { round } => round,
        }
    }

    /// Whether this caller performed the transition.
    pub fn is_winner(&self) -> bool {
        matches!(self, Self::Opened { .. } | Self::Advanced { .. })
    }
}

/// The round state machine.
///
/// Every client owns one and calls [`advance_if_expired`] on its own
/// timer. The round record is replaced with a single compare-and-swap, so
/// for each boundary exactly one caller wins; that caller alone clears the
/// tally and appends to the history log.
///
/// [`advance_if_expired`]: RoundEngine::advance_if_expired
pub struct RoundEngine<S> {
    store: S,
    tally: TallyStore<S>,
    history: HistoryLog<S>,
    selector: Box<dyn OutcomeSelector>,
    config: RoundConfig,
}

impl<S: KvStore + Clone> RoundEngine<S> {
    pub fn new(store: S, config: RoundConfig) -> RoundResult<Self> {
        config.validate()?;
        let selector = LeastStakedSelector::from_entropy().with_rule(config.selection);
        Ok(Self {
            tally: TallyStore::new(store.clone(), config.retry),
            history: HistoryLog::new(store.clone(), &config),
            store,
            selector: Box::new(selector),
            config,
        })
    }

    /// Replace the outcome strategy, e.g. with a seeded selector.
    pub fn with_selector(mut self, selector: impl OutcomeSelector + 'static) -> Self {
        self.selector = Box::new(selector);
        self
    }
}

impl<S: KvStore> RoundEngine<S> {
    pub fn config(&self) -> &RoundConfig {
        &self.config
    }

    pub fn tally(&self) -> &TallyStore<S> {
        &self.tally
    }

    pub fn history(&self) -> &HistoryLog<S> {
        &self.history
    }

    pub fn current(&self) -> RoundResult<Option<Round>> {
        Ok(self.store.get_as(keys::ROUND_CURRENT)?)
    }

    /// Open the first round or replace an expired one.
    ///
    /// The winner of an expired round is drawn from the tally stamped with
    /// that round, inside the same compare-and-swap cycle that writes its
    /// successor. A caller that loses the race sees the successor and gets
    /// [`Advance::AlreadyAdvanced`].
    pub fn advance_if_expired(&self, now: Timestamp) -> RoundResult<Advance> {
        let duration = self.config.round_duration();
        let mut contended = false;
        let mut decided: Option<(Round, Digit, Tally)> = None;
        let mut failure: Option<RoundError> = None;

        let out = self
            .store
            .transact(keys::ROUND_CURRENT, self.config.retry, |cur: Option<Round>| {
                decided = None;
                match cur {
                    None => {
                        contended = true;
                        Mutation::Set(Round::genesis(now, duration))
                    }
                    Some(round) if !round.is_expired(now) => Mutation::Abort,
                    Some(round) => {
                        contended = true;
                        let tally = match self.tally.snapshot(round.closes_at) {
                            Ok(tally) => tally,
                            Err(e) => {
                                failure = Some(e);
                                return Mutation::Abort;
                            }
                        };
                        let winner = self.selector.select(&tally);
                        let next = round.successor(now, duration, winner);
                        decided = Some((round, winner, tally));
                        Mutation::Set(next)
                    }
                }
            })?;

        if let Some(err) = failure {
            return Err(err);
        }

        match out {
            TxnOutcome::Committed { value: Some(round), .. } => match decided {
                None => {
                    self.tally.reset(round.closes_at)?;
                    info!(closes_at = %round.closes_at, "first round opened");
                    Ok(Advance::Opened { round })
                }
                Some((closed, winner, tally)) => {
                    self.tally.reset(round.closes_at)?;
                    let entry = self.history.append(winner, closed.closes_at, now)?;
                    info!(
                        sequence = round.sequence,
                        winner = %winner,
                        round_number = entry.round_number,
                        staked = tally.total(),
                        closes_at = %round.closes_at,
                        "round advanced"
                    );
                    Ok(Advance::Advanced {
                        closed,
                        round,
                        winner,
                        tally,
                        entry,
                    })
                }
            },
            TxnOutcome::Aborted { current: Some(round), .. } if contended => {
                debug!(sequence = round.sequence, "round already advanced by another client");
                Ok(Advance::AlreadyAdvanced { round })
            }
            TxnOutcome::Aborted { current: Some(round), .. } => Ok(Advance::NotYetExpired { round }),
            _ => Err(RoundError::Corrupt {
                key: keys::ROUND_CURRENT.to_string(),
                reason: "round record vanished during advance".into(),
            }),
        }
    }

    /// Winner of the round that closed at `round`.
    ///
    /// Looks at the current round record first, then the history log.
    /// `None` means the round is still open or its result was compacted
    /// away.
    pub fn winner_of(&self, round: Timestamp) -> RoundResult<Option<Digit>> {
        if let Some(winner) = self.current()?.and_then(|r| r.winner_of(round)) {
            return Ok(Some(winner));
        }
        self.history.winner_of(round)
    }

    /// Record the result carried by the current round record if the winner
    /// of that transition failed to append it.
    pub fn repair_history(&self, now: Timestamp) -> RoundResult<Option<HistoryEntry>> {
        let Some(round) = self.current()? else {
            return Ok(None);
        };
        match (round.winning_number, round.settled_round) {
            (Some(winner), Some(closed)) => Ok(Some(self.history.append(winner, closed, now)?)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nrl_store::{FaultyStore, InMemoryKvStore};
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixed(Digit);

    impl OutcomeSelector for Fixed {
        fn select(&self, _tally: &Tally) -> Digit {
            self.0
        }
    }

    fn d(n: u8) -> Digit {
        Digit::new(n).unwrap()
    }

    fn t(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    const FIVE_MIN: u64 = 300_000;

    fn engine() -> RoundEngine<Arc<InMemoryKvStore>> {
        RoundEngine::new(Arc::new(InMemoryKvStore::new()), RoundConfig::default())
            .unwrap()
            .with_selector(LeastStakedSelector::seeded(5))
    }

    #[test]
    fn first_call_opens_a_round() {
        let e = engine();
        let a = e.advance_if_expired(t(1_000)).unwrap();
        assert!(matches!(a, Advance::Opened { .. }));
        assert_eq!(a.round().closes_at, t(1_000 + FIVE_MIN));
        assert!(e.current().unwrap().is_some());
    }

    #[test]
    fn open_round_is_not_advanced() {
        let e = engine();
        e.advance_if_expired(t(0)).unwrap();
        let a = e.advance_if_expired(t(FIVE_MIN - 1)).unwrap();
        assert!(matches!(a, Advance::NotYetExpired { .. }));
        assert!(!a.is_winner());
    }

    #[test]
    fn expired_round_is_replaced_and_recorded() {
        let e = engine().with_selector(Fixed(d(7)));
        e.advance_if_expired(t(0)).unwrap();
        let a = e.advance_if_expired(t(FIVE_MIN)).unwrap();
        let Advance::Advanced { closed, round, winner, entry, .. } = a else {
            panic!("expected advance, got {a:?}");
        };
        assert_eq!(winner, d(7));
        assert_eq!(closed.closes_at, t(FIVE_MIN));
        assert_eq!(round.closes_at, t(2 * FIVE_MIN));
        assert_eq!(round.winning_number, Some(d(7)));
        assert_eq!(round.settled_round, Some(t(FIVE_MIN)));
        assert_eq!(entry.round_number, 1);
        assert_eq!(entry.round_closes_at, t(FIVE_MIN));
        assert_eq!(e.winner_of(t(FIVE_MIN)).unwrap(), Some(d(7)));
    }

    #[test]
    fn winner_comes_from_the_expiring_rounds_tally() {
        let e = engine();
        let round = e.advance_if_expired(t(0)).unwrap().round().clone();
        e.tally().increment(round.closes_at, d(2), 50).unwrap();
        e.tally().increment(round.closes_at, d(6), 10).unwrap();
        e.tally().increment(round.closes_at, d(8), 90).unwrap();

        let a = e.advance_if_expired(round.closes_at).unwrap();
        let Advance::Advanced { winner, tally, .. } = a else {
            panic!("expected advance");
        };
        assert_eq!(winner, d(6));
        assert_eq!(tally.total(), 150);
        // The tally was cleared for the new round.
        assert!(e.tally().cells().unwrap().is_empty());
    }

    #[test]
    fn racing_advancers_produce_one_transition() {
        let e = engine();
        e.advance_if_expired(t(0)).unwrap();
        let results: Vec<Advance> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| s.spawn(|| e.advance_if_expired(t(FIVE_MIN + 10)).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        let winners: Vec<&Advance> = results.iter().filter(|a| a.is_winner()).collect();
        assert_eq!(winners.len(), 1);
        let final_round = e.current().unwrap().unwrap();
        for a in &results {
            assert_eq!(a.round(), &final_round);
        }
        assert_eq!(e.history().entries().unwrap().len(), 1);
        assert_eq!(final_round.sequence, 1);
    }

    #[test]
    fn racing_openers_produce_one_round() {
        let e = &engine();
        let opened = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| s.spawn(move || e.advance_if_expired(t(i)).unwrap()))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|a| matches!(a, Advance::Opened { .. }))
                .count()
        });
        assert_eq!(opened, 1);
    }

    #[test]
    fn closes_at_is_monotonic_over_many_rounds() {
        let e = engine();
        let mut now = t(0);
        let mut last = e.advance_if_expired(now).unwrap().round().clone();
        for _ in 0..10 {
            now = last.closes_at.plus(Duration::from_millis(3));
            let next = e.advance_if_expired(now).unwrap().round().clone();
            assert!(next.closes_at.is_after(&last.closes_at));
            assert_eq!(next.previous_winning_number, last.winning_number);
            last = next;
        }
        let numbers: Vec<u64> = e.history().entries().unwrap().iter().map(|h| h.round_number).collect();
        assert_eq!(numbers, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn winner_of_falls_back_to_history() {
        let e = engine().with_selector(Fixed(d(4)));
        e.advance_if_expired(t(0)).unwrap();
        e.advance_if_expired(t(FIVE_MIN)).unwrap();
        e.advance_if_expired(t(2 * FIVE_MIN)).unwrap();
        // The record now carries the second round; the first is in history.
        assert_eq!(e.winner_of(t(FIVE_MIN)).unwrap(), Some(d(4)));
        assert_eq!(e.winner_of(t(2 * FIVE_MIN)).unwrap(), Some(d(4)));
        assert_eq!(e.winner_of(t(3 * FIVE_MIN)).unwrap(), None);
    }

    #[test]
    fn failed_history_append_is_repaired() {
        let store = Arc::new(FaultyStore::new(InMemoryKvStore::new()));
        let e = RoundEngine::new(Arc::clone(&store), RoundConfig::default())
            .unwrap()
            .with_selector(Fixed(d(1)));
        e.advance_if_expired(t(0)).unwrap();

        store.fail_writes_after("history/", 0);
        assert!(e.advance_if_expired(t(FIVE_MIN)).is_err());
        store.heal();

        // The transition itself happened; later callers see it as done.
        assert!(matches!(
            e.advance_if_expired(t(FIVE_MIN + 1)).unwrap(),
            Advance::NotYetExpired { .. }
        ));
        assert!(e.history().entries().unwrap().is_empty());

        let entry = e.repair_history(t(FIVE_MIN + 2)).unwrap().unwrap();
        assert_eq!(entry.winning_number, d(1));
        assert_eq!(entry.round_closes_at, t(FIVE_MIN));
        // Idempotent.
        e.repair_history(t(FIVE_MIN + 3)).unwrap();
        assert_eq!(e.history().entries().unwrap().len(), 1);
    }

    #[test]
    fn repair_racing_the_transition_winner_records_once() {
        let store = Arc::new(FaultyStore::new(InMemoryKvStore::new()));
        let e = Arc::new(
            RoundEngine::new(Arc::clone(&store), RoundConfig::default())
                .unwrap()
                .with_selector(Fixed(d(6))),
        );
        e.advance_if_expired(t(0)).unwrap();

        // Repair runs after the round record moved but before the winner
        // writes its history row.
        let (tx, rx) = std::sync::mpsc::channel();
        let repairer = Arc::clone(&e);
        store.before_next_write(keys::HISTORY_PREFIX, move || {
            tx.send(repairer.repair_history(t(FIVE_MIN + 1)).unwrap()).unwrap();
        });
        let Advance::Advanced { entry, .. } = e.advance_if_expired(t(FIVE_MIN)).unwrap() else {
            panic!("expected advance");
        };
        let repaired = rx.recv().unwrap().unwrap();
        assert_eq!(entry, repaired);
        assert_eq!(entry.round_number, 1);
        assert_eq!(e.history().entries().unwrap().len(), 1);
    }

    #[test]
    fn repair_and_advance_on_threads_never_duplicate_rows() {
        let store = Arc::new(FaultyStore::new(InMemoryKvStore::new()));
        store.slow_writes(keys::HISTORY_PREFIX, Duration::from_millis(1));
        let e = RoundEngine::new(Arc::clone(&store), RoundConfig::default())
            .unwrap()
            .with_selector(Fixed(d(2)));
        e.advance_if_expired(t(0)).unwrap();

        for boundary in 1..=4u64 {
            let now = t(boundary * FIVE_MIN);
            std::thread::scope(|s| {
                for _ in 0..3 {
                    s.spawn(|| e.advance_if_expired(now).unwrap());
                    s.spawn(|| {
                        for _ in 0..3 {
                            e.repair_history(now).unwrap();
                        }
                    });
                }
            });
            let numbers: Vec<u64> = e.history().entries().unwrap().iter().map(|h| h.round_number).collect();
            assert_eq!(numbers, (1..=boundary).collect::<Vec<_>>());
        }
    }

    #[test]
    fn rejects_invalid_config() {
        let config = RoundConfig {
            history_limit: 0,
            ..RoundConfig::default()
        };
        assert!(RoundEngine::new(Arc::new(InMemoryKvStore::new()), config).is_err());
    }
}
