//! In-process simulation of many uncoordinated clients.
//!
//! Every client is a [`Player`] over the same store. Bets are drawn from a
//! seeded generator; at each boundary all clients poll on their own thread
//! at the same instant, so they race to advance the round exactly as
//! separate processes would.

use std::sync::Arc;

use anyhow::{anyhow, ensure};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::debug;

use nrl_ledger::LedgerError;
use nrl_round::{HistoryStats, LeastStakedSelector};
use nrl_sdk::{
    AccountId, Advance, Clock, Coins, Digit, EngineConfig, Identity, ManualClock, Nrl, Player,
    Reconciled, SdkError, Settlement, Tally, Timestamp, Wager,
};

/// Start of simulated time, so reports are the same on every run.
pub const EPOCH: Timestamp = Timestamp::from_millis(1_700_000_000_000);

/// Chance that a client sits a round out.
const SIT_OUT: f64 = 0.2;

#[derive(Debug, Serialize)]
pub struct RoundReport {
    pub round_number: u64,
    pub winner: Digit,
    pub tally: Tally,
    pub bettors: usize,
    pub paid_out: Coins,
    /// The client whose poll performed the transition.
    pub advanced_by: AccountId,
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub clients: usize,
    pub seed: u64,
    pub rounds: Vec<RoundReport>,
    pub balances: Vec<(AccountId, Coins)>,
    pub stats: HistoryStats,
    /// Coins handed out as starting balances.
    pub issued: Coins,
    /// Coins still held by clients.
    pub held: Coins,
    /// Accounts that needed repair at the end. Zero on a healthy run.
    pub repaired: usize,
}

impl SimulationReport {
    /// What the house kept (negative when it paid out more than it took).
    pub fn house_net(&self) -> i128 {
        i128::from(self.issued) - i128::from(self.held)
    }
}

pub fn run(
    config: EngineConfig,
    clients: usize,
    rounds: u32,
    seed: u64,
    max_stake: Coins,
) -> anyhow::Result<SimulationReport> {
    ensure!(clients > 0, "need at least one client");
    ensure!(max_stake > 0, "max stake must be positive");

    let duration = config.round.round_duration();
    let starting = config.ledger.starting_balance;
    let selector = LeastStakedSelector::seeded(seed).with_rule(config.round.selection);
    let nrl = Arc::new(Nrl::in_memory(config)?.with_selector(selector));
    let clock = ManualClock::new(EPOCH);

    let players = (0..clients)
        .map(|i| {
            let id = AccountId::new(format!("client-{i:03}"))?;
            let identity = Identity::new(id, format!("Client {i}"));
            Ok(Player::login(nrl.clone(), identity, clock.now())?)
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    let issued = starting.saturating_mul(clients as Coins);

    // Whoever polls first opens the first round.
    players[0].tick(clock.now())?;

    let mut rng = StdRng::seed_from_u64(seed);
    let mut reports = Vec::with_capacity(rounds as usize);
    for _ in 0..rounds {
        let mut bettors = 0;
        for player in &players {
            let Some(wager) = random_wager(&mut rng, max_stake)? else {
                continue;
            };
            match player.bet(&wager, clock.now()) {
                Ok(_) => bettors += 1,
                Err(SdkError::Ledger(LedgerError::InsufficientFunds { balance, .. })) => {
                    debug!(player = %player.identity(), balance, "cannot cover wager, sitting out");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let now = clock.advance(duration);
        let ticks = std::thread::scope(|s| {
            let handles: Vec<_> = players
                .iter()
                .map(|p| s.spawn(move || p.tick(now)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().map_err(|_| anyhow!("client thread panicked")))
                .collect::<anyhow::Result<Vec<_>>>()
        })?;

        let mut advanced = None;
        let mut paid_out = 0;
        for (player, tick) in players.iter().zip(ticks) {
            let tick = tick?;
            if let Advance::Advanced { winner, tally, entry, .. } = tick.advance {
                ensure!(advanced.is_none(), "round advanced twice at one boundary");
                advanced = Some((player.identity().account.clone(), winner, tally, entry.round_number));
            }
            if let Settlement::Settled { payout, .. } = tick.settlement {
                paid_out += payout;
            }
        }
        let (advanced_by, winner, tally, round_number) =
            advanced.ok_or_else(|| anyhow!("no client advanced the expired round"))?;
        reports.push(RoundReport {
            round_number,
            winner,
            tally,
            bettors,
            paid_out,
            advanced_by,
        });
    }

    let balances = players
        .iter()
        .map(|p| Ok((p.identity().account.clone(), p.balance()?)))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let held = balances.iter().map(|(_, b)| *b).sum();
    let repaired = nrl
        .repair(clock.now())?
        .into_iter()
        .filter(|(_, r)| *r != Reconciled::Clean)
        .count();

    Ok(SimulationReport {
        clients,
        seed,
        rounds: reports,
        balances,
        stats: nrl.stats()?,
        issued,
        held,
        repaired,
    })
}

/// One to three distinct digits with a random stake each, or `None` when
/// the client sits the round out.
fn random_wager(rng: &mut StdRng, max_stake: Coins) -> anyhow::Result<Option<Wager>> {
    if rng.gen_bool(SIT_OUT) {
        return Ok(None);
    }
    let picks = rng.gen_range(1..=3);
    let digits = rand::seq::index::sample(rng, Digit::COUNT, picks);
    let pairs: Vec<_> = digits
        .into_iter()
        .map(|i| (Digit::ALL[i], rng.gen_range(1..=max_stake)))
        .collect();
    Ok(Some(Wager::from_pairs(pairs)?))
}
