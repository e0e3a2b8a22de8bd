use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use nrl_ledger::{Account, BetReceipt, Settlement};
use nrl_payments::Identity;
use nrl_round::Advance;
use nrl_store::KvStore;
use nrl_types::{Coins, Timestamp, Wager};

use crate::clock::Clock;
use crate::error::SdkResult;
use crate::nrl::Nrl;

/// What one poll of the round did for this player.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    pub advance: Advance,
    pub settlement: Settlement,
}

/// One logged-in client session.
///
/// Sessions are independent: nothing coordinates them beyond the shared
/// store, so the round advances at whichever session polls first after it
/// expires.
pub struct Player<S> {
    nrl: Arc<Nrl<S>>,
    identity: Identity,
}

impl<S: KvStore> Player<S> {
    /// Log in, opening the account on first use.
    pub fn login(nrl: Arc<Nrl<S>>, identity: Identity, now: Timestamp) -> SdkResult<Self> {
        nrl.login(&identity, now)?;
        Ok(Self { nrl, identity })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn nrl(&self) -> &Nrl<S> {
        &self.nrl
    }

    pub fn account(&self) -> SdkResult<Account> {
        self.nrl.account(&self.identity.account)
    }

    pub fn balance(&self) -> SdkResult<Coins> {
        self.nrl.balance(&self.identity.account)
    }

    pub fn bet(&self, wager: &Wager, now: Timestamp) -> SdkResult<BetReceipt> {
        self.nrl.place_bet(&self.identity.account, wager, now)
    }

    /// Advance the round if it expired, then settle this player's slip.
    pub fn tick(&self, now: Timestamp) -> SdkResult<Tick> {
        let advance = self.nrl.advance_round(now)?;
        if advance.is_winner() {
            debug!(player = %self.identity, round = %advance.round().closes_at, "advanced the round");
        }
        let settlement = self.nrl.settle(&self.identity.account)?;
        Ok(Tick { advance, settlement })
    }

    /// Poll once per `interval` until `shutdown` turns true or its sender
    /// is dropped. Returns the number of completed ticks.
    ///
    /// Transient failures (lost races, an unavailable store) are logged and
    /// retried on the next tick; anything else ends the loop.
    pub async fn run<C: Clock>(
        &self,
        clock: C,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> SdkResult<u64> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = 0u64;
        info!(player = %self.identity, ?interval, "session started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.tick(clock.now()) {
                        Ok(_) => ticks += 1,
                        Err(err) if err.is_transient() => {
                            warn!(player = %self.identity, %err, "tick failed, retrying next interval");
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }
        info!(player = %self.identity, ticks, "session stopped");
        Ok(ticks)
    }
}
