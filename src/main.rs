//! Pump Radar - futures-wide pump likelihood scanner
//!
//! Scans the futures universe for pre-pump footprints (open interest surges,
//! funding pressure, volatility compression, ...) and manages simulated
//! trades on the alerts it raises.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

use pump_radar::cli::commands;
use pump_radar::config::Config;

/// Pump likelihood scanner for futures-listed tokens
#[derive(Parser)]
#[command(name = "pump-radar")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single scan cycle and print the alerts
    Scan,

    /// Run continuous scanning and trade monitoring
    Start,

    /// Show active trades and recent trade history
    Status,

    /// Show store row counts
    Stats,

    /// Drop stored rows older than the retention window
    Cleanup {
        /// Retention in days
        #[arg(long)]
        days: Option<f64>,
    },

    /// Show the effective configuration
    Config,

    /// Simulated trade management
    Trade {
        #[command(subcommand)]
        action: TradeAction,
    },
}

#[derive(Subcommand)]
enum TradeAction {
    /// Register a trade
    Add {
        /// Token symbol (e.g. SOL)
        symbol: String,

        /// Entry price
        entry: f64,

        /// Position size in USD
        #[arg(long, default_value = "10000")]
        size: f64,

        /// Stop loss distance in percent
        #[arg(long, default_value = "7.0")]
        stop_pct: f64,
    },

    /// Close a trade
    Close {
        /// Token symbol
        symbol: String,

        /// Exit price (default: live price)
        #[arg(long)]
        price: Option<f64>,
    },

    /// Manually move a trade's stop
    Stop {
        /// Token symbol
        symbol: String,

        /// New stop price
        price: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pump_radar=info".parse().unwrap()),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Scan => commands::scan(&config).await,
        Commands::Start => commands::start(&config).await,
        Commands::Status => commands::status(&config).await,
        Commands::Stats => commands::stats(&config).await,
        Commands::Cleanup { days } => {
            let days = days.unwrap_or(config.storage.retention_days);
            commands::cleanup(&config, days).await
        }
        Commands::Config => commands::show_config(&config),
        Commands::Trade { action } => match action {
            TradeAction::Add {
                symbol,
                entry,
                size,
                stop_pct,
            } => commands::trade_add(&config, &symbol, entry, size, stop_pct).await,
            TradeAction::Close { symbol, price } => {
                commands::trade_close(&config, &symbol, price).await
            }
            TradeAction::Stop { symbol, price } => {
                commands::trade_stop(&config, &symbol, price).await
            }
        },
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
