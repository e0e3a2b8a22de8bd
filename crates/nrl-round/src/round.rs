use std::time::Duration;

use serde::{Deserialize, Serialize};

use nrl_types::{Digit, Timestamp};

/// The single active round, stored at `round/current`.
///
/// A round is identified by its `closes_at`. The record written when a
/// round expires also carries the result of the round it replaced:
/// `winning_number` won the round that closed at `settled_round`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    /// 0 for the first round ever opened, then +1 per transition.
    pub sequence: u64,
    pub opened_at: Timestamp,
    pub closes_at: Timestamp,
    /// Winner of the round that closed at `settled_round`.
    pub winning_number: Option<Digit>,
    pub settled_round: Option<Timestamp>,
    /// Winner of the round before that, for display.
    pub previous_winning_number: Option<Digit>,
}

/// Whether bets are still accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundPhase {
    Open,
    Expired,
}

impl Round {
    /// First round, opened when the store holds none.
    pub fn genesis(now: Timestamp, duration: Duration) -> Self {
        Self {
            sequence: 0,
            opened_at: now,
            closes_at: now.plus(duration),
            winning_number: None,
            settled_round: None,
            previous_winning_number: None,
        }
    }

    /// The round that replaces `self`, which was won by `winner`.
    pub fn successor(&self, now: Timestamp, duration: Duration, winner: Digit) -> Self {
        let mut closes_at = now.plus(duration);
        if !closes_at.is_after(&self.closes_at) {
            closes_at = self.closes_at.plus(Duration::from_millis(1));
        }
        Self {
            sequence: self.sequence + 1,
            opened_at: now,
            closes_at,
            winning_number: Some(winner),
            settled_round: Some(self.closes_at),
            previous_winning_number: self.winning_number,
        }
    }

    pub fn phase(&self, now: Timestamp) -> RoundPhase {
        if now.is_before(&self.closes_at) {
            RoundPhase::Open
        } else {
            RoundPhase::Expired
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.phase(now) == RoundPhase::Expired
    }

    /// Time left until the round closes; zero once expired.
    pub fn remaining(&self, now: Timestamp) -> Duration {
        self.closes_at.since(&now)
    }

    /// Winner of the round that closed at `round`, if this record carries it.
    pub fn winner_of(&self, round: Timestamp) -> Option<Digit> {
        (self.settled_round == Some(round))
            .then_some(self.winning_number)
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIVE_MIN: Duration = Duration::from_secs(300);

    fn t(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[test]
    fn genesis_has_no_result() {
        let r = Round::genesis(t(1_000), FIVE_MIN);
        assert_eq!(r.closes_at, t(301_000));
        assert!(r.winning_number.is_none());
        assert!(r.settled_round.is_none());
        assert_eq!(r.phase(t(1_000)), RoundPhase::Open);
    }

    #[test]
    fn expires_at_closes_at() {
        let r = Round::genesis(t(0), FIVE_MIN);
        assert_eq!(r.phase(t(299_999)), RoundPhase::Open);
        assert_eq!(r.phase(t(300_000)), RoundPhase::Expired);
        assert_eq!(r.remaining(t(299_000)), Duration::from_secs(1));
        assert_eq!(r.remaining(t(400_000)), Duration::ZERO);
    }

    #[test]
    fn successor_carries_results() {
        let d3 = Digit::new(3).unwrap();
        let d8 = Digit::new(8).unwrap();
        let first = Round::genesis(t(0), FIVE_MIN);
        let second = first.successor(t(300_500), FIVE_MIN, d3);
        assert_eq!(second.sequence, 1);
        assert_eq!(second.closes_at, t(600_500));
        assert_eq!(second.winning_number, Some(d3));
        assert_eq!(second.settled_round, Some(t(300_000)));
        assert_eq!(second.previous_winning_number, None);

        let third = second.successor(t(700_000), FIVE_MIN, d8);
        assert_eq!(third.previous_winning_number, Some(d3));
        assert_eq!(third.winner_of(t(600_500)), Some(d8));
        assert_eq!(third.winner_of(t(300_000)), None);
    }

    #[test]
    fn closes_at_strictly_increases_even_with_clock_skew() {
        let first = Round::genesis(t(1_000_000), FIVE_MIN);
        // A client whose clock lags far behind still moves time forward.
        let next = first.successor(t(0), FIVE_MIN, Digit::new(0).unwrap());
        assert!(next.closes_at.is_after(&first.closes_at));
    }
}
