use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// A whole number of coins. Balances and stakes are never negative.
pub type Coins = u64;

/// One of the ten numbers a round can be won on.
///
/// Serialized as a plain integer so stored tallies and bet slips stay
/// readable (`{"3": 100}`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Digit(u8);

impl Digit {
    /// Number of distinct digits.
    pub const COUNT: usize = 10;

    /// Every digit in ascending order.
    pub const ALL: [Digit; 10] = [
        Digit(0),
        Digit(1),
        Digit(2),
        Digit(3),
        Digit(4),
        Digit(5),
        Digit(6),
        Digit(7),
        Digit(8),
        Digit(9),
    ];

    /// Create a digit, rejecting values above 9.
    pub fn new(value: u8) -> Result<Self, TypeError> {
        if value <= 9 {
            Ok(Self(value))
        } else {
            Err(TypeError::InvalidDigit(i64::from(value)))
        }
    }

    /// The numeric value.
    pub fn value(self) -> u8 {
        self.0
    }

    /// Position of this digit in a 10-slot array.
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl TryFrom<u8> for Digit {
    type Error = TypeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Digit> for u8 {
    fn from(d: Digit) -> u8 {
        d.0
    }
}

impl FromStr for Digit {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: i64 = s
            .trim()
            .parse()
            .map_err(|_| TypeError::InvalidId(format!("not a digit: {s:?}")))?;
        u8::try_from(value)
            .map_err(|_| TypeError::InvalidDigit(value))
            .and_then(Self::new)
    }
}

impl fmt::Debug for Digit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digit({})", self.0)
    }
}

impl fmt::Display for Digit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
