use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::digit::{Coins, Digit};
use crate::error::TypeError;

/// A validated stake distribution: digit → positive coin amount.
///
/// Invariants upheld by every constructor (including deserialization):
/// - at least one digit is staked
/// - every stake is strictly positive
/// - the total fits in [`Coins`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<Digit, Coins>", into = "BTreeMap<Digit, Coins>")]
pub struct Wager {
    stakes: BTreeMap<Digit, Coins>,
    total: Coins,
}

impl Wager {
    /// Build a wager from digit/amount pairs. Repeated digits are summed.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, TypeError>
    where
        I: IntoIterator<Item = (Digit, Coins)>,
    {
        let mut stakes: BTreeMap<Digit, Coins> = BTreeMap::new();
        for (digit, amount) in pairs {
            if amount == 0 {
                return Err(TypeError::InvalidAmount(format!(
                    "stake on {digit} must be positive"
                )));
            }
            let slot = stakes.entry(digit).or_insert(0);
            *slot = slot.checked_add(amount).ok_or_else(|| {
                TypeError::InvalidAmount(format!("stake on {digit} overflows"))
            })?;
        }
        Self::from_map(stakes)
    }

    /// Convenience for a single-digit wager.
    pub fn single(digit: Digit, amount: Coins) -> Result<Self, TypeError> {
        Self::from_pairs([(digit, amount)])
    }

    fn from_map(stakes: BTreeMap<Digit, Coins>) -> Result<Self, TypeError> {
        if stakes.is_empty() {
            return Err(TypeError::InvalidAmount("wager must stake at least one digit".into()));
        }
        let mut total: Coins = 0;
        for (digit, amount) in &stakes {
            if *amount == 0 {
                return Err(TypeError::InvalidAmount(format!(
                    "stake on {digit} must be positive"
                )));
            }
            total = total
                .checked_add(*amount)
                .ok_or_else(|| TypeError::InvalidAmount("wager total overflows".into()))?;
        }
        Ok(Self { stakes, total })
    }

    /// Sum of all stakes.
    pub fn total(&self) -> Coins {
        self.total
    }

    /// Stake on one digit (zero if not staked).
    pub fn stake_on(&self, digit: Digit) -> Coins {
        self.stakes.get(&digit).copied().unwrap_or(0)
    }

    /// Staked digits in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (Digit, Coins)> + '_ {
        self.stakes.iter().map(|(d, a)| (*d, *a))
    }

    /// Number of distinct digits staked.
    pub fn len(&self) -> usize {
        self.stakes.len()
    }

    /// Always `false`; a wager stakes at least one digit.
    pub fn is_empty(&self) -> bool {
        self.stakes.is_empty()
    }
}

impl TryFrom<BTreeMap<Digit, Coins>> for Wager {
    type Error = TypeError;

    fn try_from(map: BTreeMap<Digit, Coins>) -> Result<Self, Self::Error> {
        Self::from_map(map)
    }
}

impl From<Wager> for BTreeMap<Digit, Coins> {
    fn from(w: Wager) -> Self {
        w.stakes
    }
}
