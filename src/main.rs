mod config;
mod loader;
mod models;
mod pipeline;
mod scraper;
mod storage;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::AppConfig;
use crate::pipeline::Pipeline;
use crate::storage::Dataset;

#[derive(Parser)]
#[command(name = "card-prices", about = "Trading card price scraper", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, default_value = "config.yaml", global = true, env = "CARDPRICE_CONFIG")]
    config: PathBuf,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape prices for every card in a catalog file or folder of catalogs
    Scrape {
        /// Catalog CSV or folder of catalog CSVs (default: output.default_folder)
        input: Option<PathBuf>,

        /// Output CSV (default: output.default_output_file)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Summarise an existing price dataset
    Stats {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the effective configuration
    ShowConfig,
}

fn init_tracing(verbose: u8, debug_mode: bool) {
    let filter = match (verbose, debug_mode) {
        (0, false) => "card_price_scraper=info,warn",
        (0, true) | (1, _) => "card_price_scraper=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(&cli.config)?;
    init_tracing(cli.verbose, config.scraping.debug_mode);
    match &config.source {
        Some(path) => info!("Loaded config from {:?}", path),
        None => warn!("Config file {:?} not found, using defaults", cli.config),
    }

    match cli.command {
        Command::Scrape { input, output } => {
            let input = input.unwrap_or_else(|| config.output.default_folder.clone());
            let output = output.unwrap_or_else(|| config.output.default_output_file.clone());

            let _t = utils::Timer::start("Price scrape");
            Pipeline::from_config(&config)?.run(&input, &output).await?;
        }

        Command::Stats { output } => {
            let output = output.unwrap_or_else(|| config.output.default_output_file.clone());
            let stats = Dataset::load(&output)?.stats();
            let fmt_ts = |ts: Option<chrono::NaiveDateTime>| {
                ts.map(|t| utils::format_timestamp(&t)).unwrap_or_else(|| "—".into())
            };

            println!("─────────────────────────────────");
            println!("  Card Prices — Dataset Stats");
            println!("─────────────────────────────────");
            println!("  File      : {}", output.display());
            println!("  Rows      : {}", utils::fmt_number(stats.rows));
            println!("  Sets      : {}", utils::fmt_number(stats.sets));
            println!("  Priced    : {}", utils::fmt_number(stats.succeeded));
            println!("  Failed    : {}", utils::fmt_number(stats.failed));
            for (kind, n) in &stats.failures_by_type {
                println!("    {:<20}{}", kind, utils::fmt_number(*n));
            }
            println!("  Oldest    : {}", fmt_ts(stats.oldest));
            println!("  Newest    : {}", fmt_ts(stats.newest));
            println!("─────────────────────────────────");
        }

        Command::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
