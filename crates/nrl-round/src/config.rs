use std::time::Duration;

use serde::{Deserialize, Serialize};

use nrl_store::RetryPolicy;

use crate::error::{RoundError, RoundResult};
use crate::selector::SelectionRule;

/// Round engine parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundConfig {
    /// Length of one betting round, in seconds.
    pub round_duration_secs: u64,
    /// Finished rounds retained by the history log.
    pub history_limit: usize,
    /// Most recent rounds considered for the "recent" statistic.
    pub recent_window: usize,
    /// Which digits compete in the least-staked draw.
    pub selection: SelectionRule,
    pub retry: RetryPolicy,
}

impl RoundConfig {
    pub fn round_duration(&self) -> Duration {
        Duration::from_secs(self.round_duration_secs)
    }

    pub fn validate(&self) -> RoundResult<()> {
        if self.round_duration_secs == 0 {
            return Err(RoundError::InvalidConfig(
                "round_duration_secs must be positive".into(),
            ));
        }
        if self.history_limit == 0 {
            return Err(RoundError::InvalidConfig(
                "history_limit must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            round_duration_secs: 300,
            history_limit: 100,
            recent_window: 20,
            selection: SelectionRule::StakedDigits,
            retry: RetryPolicy::default(),
        }
    }
}
