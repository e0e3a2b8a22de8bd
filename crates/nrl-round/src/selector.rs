use std::fmt;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use nrl_types::{Coins, Digit};

/// Aggregate stake per digit for one round. Unstaked digits hold 0.
#[derive(Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally([Coins; Digit::COUNT]);

impl Tally {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_array(stakes: [Coins; Digit::COUNT]) -> Self {
        Self(stakes)
    }

    pub fn get(&self, digit: Digit) -> Coins {
        self.0[digit.index()]
    }

    pub fn add(&mut self, digit: Digit, amount: Coins) {
        let slot = &mut self.0[digit.index()];
        *slot = slot.saturating_add(amount);
    }

    pub fn total(&self) -> Coins {
        self.0.iter().fold(0, |acc, n| acc.saturating_add(*n))
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|n| *n == 0)
    }

    pub fn as_array(&self) -> &[Coins; Digit::COUNT] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = (Digit, Coins)> + '_ {
        Digit::ALL.into_iter().map(|d| (d, self.get(d)))
    }

    /// Digits that compete under `rule` and carry the minimum stake among
    /// them, ascending. Empty only if nothing competes.
    pub fn least_staked(&self, rule: SelectionRule) -> Vec<Digit> {
        let competing: Vec<Digit> = match rule {
            SelectionRule::StakedDigits if !self.is_empty() => Digit::ALL
                .into_iter()
                .filter(|d| self.get(*d) > 0)
                .collect(),
            _ => Digit::ALL.to_vec(),
        };
        let min = competing.iter().map(|d| self.get(*d)).min().unwrap_or(0);
        competing.into_iter().filter(|d| self.get(*d) == min).collect()
    }
}

/// Which digits take part in the least-staked draw.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionRule {
    /// Only digits somebody staked on; all ten when the tally is empty.
    #[default]
    StakedDigits,
    /// All ten digits, unstaked ones counting as zero.
    AllDigits,
}

impl fmt::Debug for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().filter(|(_, n)| *n > 0).map(|(d, n)| (d.value(), n)))
            .finish()
    }
}

/// Pick the winning digit: the least-staked staked digit, ties broken
/// uniformly.
///
/// An empty tally makes the draw uniform over 0–9. Deterministic for a
/// given tally and random source.
pub fn select_winner<R: Rng + ?Sized>(tally: &Tally, rng: &mut R) -> Digit {
    select_winner_with(tally, SelectionRule::StakedDigits, rng)
}

/// [`select_winner`] under an explicit [`SelectionRule`].
pub fn select_winner_with<R: Rng + ?Sized>(tally: &Tally, rule: SelectionRule, rng: &mut R) -> Digit {
    let candidates = tally.least_staked(rule);
    candidates.choose(rng).copied().unwrap_or(Digit::ALL[0])
}

/// Strategy the round engine uses to decide a round.
pub trait OutcomeSelector: Send + Sync {
    fn select(&self, tally: &Tally) -> Digit;
}

/// [`select_winner_with`] over an owned, seedable random source.
pub struct LeastStakedSelector {
    rng: Mutex<StdRng>,
    rule: SelectionRule,
}

impl LeastStakedSelector {
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
            rule: SelectionRule::default(),
        }
    }

    /// Reproducible draws, for the simulator and tests.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            rule: SelectionRule::default(),
        }
    }

    pub fn with_rule(mut self, rule: SelectionRule) -> Self {
        self.rule = rule;
        self
    }

    pub fn rule(&self) -> SelectionRule {
        self.rule
    }
}

impl Default for LeastStakedSelector {
    fn default() -> Self {
        Self::from_entropy()
    }
}

impl OutcomeSelector for LeastStakedSelector {
    fn select(&self, tally: &Tally) -> Digit {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        select_winner_with(tally, self.rule, &mut *rng)
    }
}

impl<T: OutcomeSelector + ?Sized> OutcomeSelector for std::sync::Arc<T> {
    fn select(&self, tally: &Tally) -> Digit {
        (**self).select(tally)
    }
}
