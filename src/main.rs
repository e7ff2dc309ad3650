use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveTime;
use clap::{Parser, Subcommand};
use interest_ledger::logging::init_logging;
use interest_ledger::types::parse_date;
use interest_ledger::{
    AccountId, DiskLedgerStore, LedgerConfig, LedgerService, MonthKey, Rate, SafeTimeProvider,
    TimeSource,
};

const DEFAULT_DATA_PATH: &str = "ledger-data";

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Close a finished month for every account
    CloseMonth {
        /// Month to close, YYYY-MM
        month: MonthKey,
    },
    /// Show interest and end balance of one account for a month
    Accrue {
        account: AccountId,
        /// Month to simulate, YYYY-MM
        month: MonthKey,
    },
    /// Show the balance in effect at the start of a day
    Balance {
        account: AccountId,
        /// Day, YYYY-MM-DD
        date: String,
    },
    /// Set the interest rate of a month for all accounts
    SetRate {
        /// Month, YYYY-MM
        month: MonthKey,
        /// Annual percentage, e.g. 12.50
        rate: Rate,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = run(cli);
    if let Err(e) = &result {
        tracing::error!(error = %e, "command failed");
    }
    result
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => LedgerConfig::load_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => LedgerConfig::default(),
    };
    let data_path = config
        .data_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_PATH));
    let store = DiskLedgerStore::open(&data_path)
        .with_context(|| format!("Failed to open ledger at {}", data_path.display()))?;
    let ledger = LedgerService::new(store, config);
    let time = SafeTimeProvider::new(TimeSource::System);

    match cli.command {
        Commands::CloseMonth { month } => {
            let summary = ledger.close_month(month, &time)?;
            println!(
                "{}: processed {}, capitalized {}, failed {}{}",
                summary.month,
                summary.processed,
                summary.capitalized,
                summary.failed,
                if summary.cancelled { " (cancelled)" } else { "" }
            );
            if summary.failed > 0 {
                anyhow::bail!(
                    "{} account(s) failed to close for {}",
                    summary.failed,
                    summary.month
                );
            }
        }
        Commands::Accrue { account, month } => {
            let accrual = ledger.accrue_month(account, month)?;
            let rate = accrual.rate.map_or_else(|| "none".to_string(), |r| r.to_string());
            println!("month:        {}", accrual.month);
            println!("rate:         {rate}");
            println!("opening:      {}", accrual.opening_balance);
            println!("interest:     {}", accrual.interest);
            println!("end balance:  {}", accrual.end_balance);
            if accrual.is_approximate() {
                println!(
                    "note: no checkpoint for {}, opening balance is approximate",
                    month.previous()
                );
            }
        }
        Commands::Balance { account, date } => {
            let date = parse_date(&date)?;
            let balance = ledger.balance_at(account, date.and_time(NaiveTime::MIN))?;
            println!("{balance}");
        }
        Commands::SetRate { month, rate } => {
            let rate = ledger.set_interest_rate(month, rate)?;
            println!("{}: {}", rate.month, rate.rate);
        }
    }
    Ok(())
}
