use anyhow::{bail, Context};
use colored::Colorize;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;

use nrl_round::{select_winner_with, SelectionRule, Tally};
use nrl_sdk::{Digit, EngineConfig};

use crate::cli::*;
use crate::simulate::{self, SimulationReport};

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    match cli.command {
        Command::Simulate(args) => cmd_simulate(args, format),
        Command::Select(args) => cmd_select(args, format),
        Command::Config(args) => cmd_config(args, format),
    }
}

fn cmd_simulate(args: SimulateArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let report = simulate::run(config, args.clients, args.rounds, args.seed, args.max_stake)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_simulation(&report),
    }
    Ok(())
}

fn print_simulation(report: &SimulationReport) {
    println!(
        "{} Simulated {} rounds with {} clients (seed {})",
        "✓".green().bold(),
        report.rounds.len().to_string().bold(),
        report.clients.to_string().bold(),
        report.seed
    );
    for round in &report.rounds {
        println!(
            "  round {:>4}  winner {}  staked {:>6}  paid {:>6}  bettors {:>3}  advanced by {}",
            round.round_number.to_string().yellow(),
            round.winner.to_string().green().bold(),
            round.tally.total(),
            round.paid_out,
            round.bettors,
            round.advanced_by.as_str().dimmed()
        );
    }

    println!("\nBalances:");
    for (account, balance) in &report.balances {
        println!("  {:<12} {:>8}", account.as_str(), balance);
    }

    let net = report.house_net();
    let net = if net >= 0 {
        format!("+{net}").green()
    } else {
        net.to_string().red()
    };
    println!("\nIssued {}  held {}  house net {}", report.issued, report.held, net);

    let digit = |d: Option<Digit>| d.map_or_else(|| "-".to_string(), |d| d.to_string());
    println!(
        "Most frequent {}  least frequent {}  recent ({}) {}",
        digit(report.stats.most_frequent).cyan(),
        digit(report.stats.least_frequent).cyan(),
        report.stats.recent_window,
        digit(report.stats.recent_most_frequent).cyan()
    );
    if report.repaired > 0 {
        println!("{} {} accounts needed repair", "!".yellow().bold(), report.repaired);
    }
}

fn cmd_select(args: SelectArgs, format: OutputFormat) -> anyhow::Result<()> {
    let tally = parse_tally(&args.tally)?;
    let rule = if args.all_digits {
        SelectionRule::AllDigits
    } else {
        SelectionRule::StakedDigits
    };
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let candidates = tally.least_staked(rule);
    let mut counts = [0u32; Digit::COUNT];
    for _ in 0..args.samples.max(1) {
        counts[select_winner_with(&tally, rule, &mut rng).index()] += 1;
    }

    match format {
        OutputFormat::Json => {
            let drawn: Vec<_> = Digit::ALL
                .iter()
                .filter(|d| counts[d.index()] > 0)
                .map(|d| json!({ "digit": d, "count": counts[d.index()] }))
                .collect();
            let out = json!({ "tally": tally, "candidates": candidates, "drawn": drawn });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            println!("Tally: {:?}", tally);
            let names: Vec<_> = candidates.iter().map(|d| d.to_string()).collect();
            println!("Candidates: {}", names.join(", ").yellow());
            for d in Digit::ALL {
                if counts[d.index()] > 0 {
                    println!("  {} {}", d.to_string().green().bold(), counts[d.index()]);
                }
            }
        }
    }
    Ok(())
}

/// Parse `digit=amount` pairs; repeated digits add up.
fn parse_tally(pairs: &[String]) -> anyhow::Result<Tally> {
    let mut tally = Tally::empty();
    for pair in pairs.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
        let Some((digit, amount)) = pair.split_once('=') else {
            bail!("expected digit=amount, got {pair:?}");
        };
        let digit: Digit = digit.trim().parse()?;
        let amount: u64 = amount
            .trim()
            .parse()
            .with_context(|| format!("bad amount in {pair:?}"))?;
        tally.add(digit, amount);
    }
    Ok(tally)
}

fn cmd_config(args: ConfigArgs, format: OutputFormat) -> anyhow::Result<()> {
    let (config, source) = match &args.check {
        Some(path) => (
            EngineConfig::load(path).with_context(|| format!("checking {}", path.display()))?,
            Some(path),
        ),
        None => (EngineConfig::default(), None),
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
        OutputFormat::Text => {
            if let Some(path) = source {
                println!("{} {} is valid", "✓".green().bold(), path.display().to_string().bold());
            }
            print!("{}", config.to_toml_string()?);
        }
    }
    Ok(())
}
