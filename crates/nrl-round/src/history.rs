use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use nrl_store::{KvStore, KvStoreExt, Mutation, RetryPolicy, TxnOutcome};
use nrl_types::{keys, Digit, EntryId, Timestamp};

use crate::config::RoundConfig;
use crate::error::{RoundError, RoundResult};

/// One finished round, stored at `history/{round_closes_at}`. Never
/// modified.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: EntryId,
    /// 1, 2, 3, ... in the order rounds were recorded.
    pub round_number: u64,
    pub winning_number: Digit,
    /// `closes_at` of the finished round.
    pub round_closes_at: Timestamp,
    pub settled_at: Timestamp,
}

/// Which entries [`HistoryLog::list`] returns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryFilter {
    /// At most this many entries; `None` means everything retained.
    pub limit: Option<usize>,
    /// Only rounds settled at or after this instant.
    pub since: Option<Timestamp>,
}

impl HistoryFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn last(n: usize) -> Self {
        Self {
            limit: Some(n),
            since: None,
        }
    }

    pub fn since(t: Timestamp) -> Self {
        Self {
            limit: None,
            since: Some(t),
        }
    }

    /// Rounds settled since midnight UTC of `now`'s day.
    pub fn today(now: Timestamp) -> Self {
        Self::since(now.start_of_utc_day())
    }

    pub fn with_limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    fn admits(&self, entry: &HistoryEntry) -> bool {
        self.since.map_or(true, |t| !entry.settled_at.is_before(&t))
    }
}

/// Winning-number statistics over the retained history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total_rounds: usize,
    /// Wins per digit.
    pub frequency: [u64; Digit::COUNT],
    /// Lowest digit on ties; `None` with no history.
    pub most_frequent: Option<Digit>,
    /// Least frequent among digits that won at least once.
    pub least_frequent: Option<Digit>,
    /// Most frequent within the newest `recent_window` rounds.
    pub recent_most_frequent: Option<Digit>,
    pub recent_window: usize,
    pub limit: usize,
}

/// The durable round-number counter at `meta/history-seq`.
///
/// It remembers which round took the last number, so appenders racing on
/// the same round agree on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct RoundCounter {
    last: u64,
    round: Timestamp,
}

/// Bounded, numbered log of finished rounds.
pub struct HistoryLog<S> {
    store: S,
    limit: usize,
    recent_window: usize,
    retry: RetryPolicy,
}

impl<S: KvStore> HistoryLog<S> {
    pub fn new(store: S, config: &RoundConfig) -> Self {
        Self {
            store,
            limit: config.history_limit,
            recent_window: config.recent_window,
            retry: config.retry,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Record the round that closed at `round_closes_at`, then compact.
    ///
    /// The row is keyed by the round and created only if absent, so however
    /// many callers record the same round, one row exists and every caller
    /// gets it back.
    pub fn append(
        &self,
        winner: Digit,
        round_closes_at: Timestamp,
        settled_at: Timestamp,
    ) -> RoundResult<HistoryEntry> {
        let key = keys::history_entry(round_closes_at);
        if let Some(entry) = self.store.get_as::<HistoryEntry>(&key)? {
            debug!(round_number = entry.round_number, "round already recorded");
            return Ok(entry);
        }
        let max_seen = self.latest()?.map_or(0, |e| e.round_number);
        let round_number = self.claim_round_number(round_closes_at, max_seen)?;

        let entry = HistoryEntry {
            id: EntryId::new(),
            round_number,
            winning_number: winner,
            round_closes_at,
            settled_at,
        };
        let out = self
            .store
            .transact(&key, self.retry, |cur: Option<HistoryEntry>| match cur {
                Some(_) => Mutation::Abort,
                None => Mutation::Set(entry.clone()),
            })?;
        match out {
            TxnOutcome::Committed { .. } => {
                info!(round_number, winner = %winner, round = %round_closes_at, "round recorded");
                self.compact()?;
                Ok(entry)
            }
            TxnOutcome::Aborted { current, .. } => {
                let existing = current.ok_or_else(|| RoundError::Corrupt {
                    key: key.clone(),
                    reason: "history row vanished while recording".into(),
                })?;
                debug!(round_number = existing.round_number, "round recorded concurrently");
                Ok(existing)
            }
        }
    }

    /// Take the next number for `round`, or the one it already took.
    ///
    /// The counter never falls behind `max_seen`, so numbering survives the
    /// counter being lost.
    fn claim_round_number(&self, round: Timestamp, max_seen: u64) -> RoundResult<u64> {
        let out = self
            .store
            .transact(keys::HISTORY_SEQ, self.retry, |cur: Option<RoundCounter>| match cur {
                Some(counter) if counter.round == round => Mutation::Abort,
                cur => Mutation::Set(RoundCounter {
                    last: cur.map_or(0, |c| c.last).max(max_seen) + 1,
                    round,
                }),
            })?;
        Ok(match out {
            TxnOutcome::Committed { value: Some(c), .. } | TxnOutcome::Aborted { current: Some(c), .. } => c.last,
            _ => max_seen + 1,
        })
    }

    /// Delete the lowest-numbered entries beyond the retention limit.
    ///
    /// Returns the number deleted. Entries are immutable, so concurrent
    /// compactions at worst delete the same key twice.
    pub fn compact(&self) -> RoundResult<usize> {
        let entries = self.entries()?;
        if entries.len() <= self.limit {
            return Ok(0);
        }
        let excess = entries.len() - self.limit;
        let mut removed = 0;
        for entry in &entries[..excess] {
            if self.store.delete(&keys::history_entry(entry.round_closes_at))? {
                removed += 1;
            }
        }
        debug!(removed, retained = self.limit, "history compacted");
        Ok(removed)
    }

    /// Every retained entry, oldest first.
    pub fn entries(&self) -> RoundResult<Vec<HistoryEntry>> {
        let mut entries: Vec<HistoryEntry> = self
            .store
            .list_as::<HistoryEntry>(keys::HISTORY_PREFIX)?
            .into_iter()
            .map(|(_, e)| e)
            .collect();
        entries.sort_by_key(|e| e.round_number);
        Ok(entries)
    }

    /// Entries matching `filter`, newest first, never more than the limit.
    pub fn list(&self, filter: HistoryFilter) -> RoundResult<Vec<HistoryEntry>> {
        let cap = filter.limit.unwrap_or(self.limit).min(self.limit);
        Ok(self
            .entries()?
            .into_iter()
            .rev()
            .filter(|e| filter.admits(e))
            .take(cap)
            .collect())
    }

    pub fn latest(&self) -> RoundResult<Option<HistoryEntry>> {
        Ok(self.entries()?.pop())
    }

    /// Winner of the round that closed at `round_closes_at`, if retained.
    pub fn winner_of(&self, round_closes_at: Timestamp) -> RoundResult<Option<Digit>> {
        Ok(self
            .store
            .get_as::<HistoryEntry>(&keys::history_entry(round_closes_at))?
            .map(|e| e.winning_number))
    }

    pub fn stats(&self) -> RoundResult<HistoryStats> {
        let newest_first = self.list(HistoryFilter::all())?;

        let mut frequency = [0u64; Digit::COUNT];
        for e in &newest_first {
            frequency[e.winning_number.index()] += 1;
        }
        let mut recent = [0u64; Digit::COUNT];
        for e in newest_first.iter().take(self.recent_window) {
            recent[e.winning_number.index()] += 1;
        }

        Ok(HistoryStats {
            total_rounds: newest_first.len(),
            frequency,
            most_frequent: most_frequent(&frequency),
            least_frequent: least_frequent(&frequency),
            recent_most_frequent: most_frequent(&recent),
            recent_window: self.recent_window,
            limit: self.limit,
        })
    }
}

fn most_frequent(counts: &[u64; Digit::COUNT]) -> Option<Digit> {
    let max = *counts.iter().max()?;
    (max > 0)
        .then(|| Digit::ALL.into_iter().find(|d| counts[d.index()] == max))
        .flatten()
}

fn least_frequent(counts: &[u64; Digit::COUNT]) -> Option<Digit> {
    let min = counts.iter().copied().filter(|n| *n > 0).min()?;
    Digit::ALL.into_iter().find(|d| counts[d.index()] == min)
}
