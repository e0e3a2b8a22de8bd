use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "nrl",
    about = "Number Round Ledger: leaderless betting rounds over a shared store",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run many independent clients against one in-memory store
    Simulate(SimulateArgs),
    /// Draw winning numbers for a given tally
    Select(SelectArgs),
    /// Print the default configuration or check a config file
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct SimulateArgs {
    /// Number of client sessions
    #[arg(short, long, default_value_t = 8)]
    pub clients: usize,
    /// Rounds to play
    #[arg(short, long, default_value_t = 10)]
    pub rounds: u32,
    /// Seed for bets and the outcome draw
    #[arg(long, default_value_t = 7)]
    pub seed: u64,
    /// Largest stake a client puts on one number
    #[arg(long, default_value_t = 50)]
    pub max_stake: u64,
    /// Engine configuration (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Args)]
pub struct SelectArgs {
    /// Stakes as digit=amount pairs, e.g. 0=5,1=5,2=10
    #[arg(long, value_delimiter = ',')]
    pub tally: Vec<String>,
    /// Number of draws
    #[arg(short, long, default_value_t = 1)]
    pub samples: u32,
    #[arg(long)]
    pub seed: Option<u64>,
    /// Let unstaked digits compete as zero stake
    #[arg(long)]
    pub all_digits: bool,
}

#[derive(Args)]
pub struct ConfigArgs {
    /// Validate this file instead of printing the defaults
    #[arg(long)]
    pub check: Option<PathBuf>,
}
