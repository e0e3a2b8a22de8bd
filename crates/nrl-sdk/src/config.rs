use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use nrl_ledger::LedgerConfig;
use nrl_payments::PaymentConfig;
use nrl_round::RoundConfig;

use crate::error::{SdkError, SdkResult};

/// Everything a client needs to join a deployment.
///
/// Every section is optional in the TOML file; missing keys take their
/// defaults.
///
/// ```toml
/// poll_interval_ms = 1000
///
/// [round]
/// round_duration_secs = 300
/// history_limit = 100
///
/// [ledger]
/// starting_balance = 1000
/// payout_multiplier = 10
///
/// [payments]
/// admin_accounts = ["root"]
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How often a player polls the round, in milliseconds.
    pub poll_interval_ms: u64,
    pub round: RoundConfig,
    pub ledger: LedgerConfig,
    pub payments: PaymentConfig,
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> SdkResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| SdkError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> SdkResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| SdkError::ConfigIo {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> SdkResult<String> {
        toml::to_string_pretty(self).map_err(|e| SdkError::InvalidConfig(e.to_string()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> SdkResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(SdkError::InvalidConfig(
                "poll_interval_ms must be positive".into(),
            ));
        }
        if self.ledger.payout_multiplier == 0 {
            return Err(SdkError::InvalidConfig(
                "payout_multiplier must be positive".into(),
            ));
        }
        self.round.validate()?;
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            round: RoundConfig::default(),
            ledger: LedgerConfig::default(),
            payments: PaymentConfig::default(),
        }
    }
}
