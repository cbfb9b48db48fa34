//! CLI command implementations

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::alerts::{format_pct, format_price, format_usd, AlertSink, ConsoleSink};
use crate::config::Config;
use crate::market::{MarketDataProvider, NullProvider};
use crate::scanner::Scanner;
use crate::storage::{unix_now, MemoryStore, Store};

async fn build_store(config: &Config) -> Result<Arc<dyn Store>> {
    if config.storage.trades_path.is_empty() {
        return Ok(Arc::new(MemoryStore::new()));
    }
    let path = PathBuf::from(&config.storage.trades_path);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }
    Ok(Arc::new(MemoryStore::with_persistence(path).await?))
}

/// Wire up the scanner stack: provider, store, console sink.
///
/// No exchange adapter ships with the binary yet, so the provider is the
/// null one; the store-backed commands (trades, stats, cleanup) are fully
/// functional either way.
async fn build_scanner(config: &Config) -> Result<Arc<Scanner>> {
    let provider: Arc<dyn MarketDataProvider> = Arc::new(NullProvider);
    let store = build_store(config).await?;
    let sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(ConsoleSink::new())];
    Ok(Scanner::new(provider, store, sinks, config.clone()))
}

/// Run a single scan cycle and print the results.
pub async fn scan(config: &Config) -> Result<()> {
    let scanner = build_scanner(config).await?;
    let results = scanner.run_once().await?;

    if results.is_empty() {
        info!("No tokens cleared the alert threshold");
        return Ok(());
    }

    println!("\n{} alert(s):", results.len());
    for result in &results {
        println!(
            "  {:12} {:6.1}  {}  {}",
            result.symbol,
            result.score.composite_score,
            result.score.classification,
            format_price(result.current_price)
        );
    }
    Ok(())
}

/// Run the continuous scan + trade-monitor loops until ctrl-c.
pub async fn start(config: &Config) -> Result<()> {
    info!(
        "Starting scanner: scan every {}m, trade monitor every {}m",
        config.scanning.scan_interval_minutes, config.scanning.trade_monitor_interval_minutes
    );
    let scanner = build_scanner(config).await?;
    scanner.run_continuous().await;
    Ok(())
}

/// Show active trades and recent trade history.
pub async fn status(config: &Config) -> Result<()> {
    let store = build_store(config).await?;
    let trades = store.active_trades().await?;

    println!("\nActive trades: {}", trades.len());
    for trade in trades {
        let hours = (unix_now() - trade.entry_timestamp) / 3600.0;
        println!(
            "  {:12} entry {} | stop {} | rem {:.0}% | realized {} | {:.1}h",
            trade.symbol,
            format_price(trade.entry_price),
            format_price(trade.current_stop_price),
            trade.remaining_fraction * 100.0,
            format_usd(trade.realized_pnl),
            hours
        );
    }

    let history = store.trade_history(10).await?;
    if !history.is_empty() {
        println!("\nRecent closed trades:");
        for record in history {
            println!(
                "  {:12} {} ({}) | {:.1}h | {}",
                record.symbol,
                format_usd(record.total_pnl),
                format_pct(record.total_pnl_pct),
                record.duration_hours,
                record.exit_reason
            );
        }
    }
    Ok(())
}

/// Print store row counts.
pub async fn stats(config: &Config) -> Result<()> {
    let scanner = build_scanner(config).await?;
    let stats = scanner.stats().await?;
    println!("\nStore:");
    println!("  snapshots:     {}", stats.snapshot_rows);
    println!("  signals:       {}", stats.signal_rows);
    println!("  scores:        {}", stats.score_rows);
    println!("  active trades: {}", stats.active_trades);
    println!("  closed trades: {}", stats.closed_trades);
    println!("  universe:      {}", stats.universe_size);
    Ok(())
}

/// Drop rows older than `days`.
pub async fn cleanup(config: &Config, days: f64) -> Result<()> {
    let scanner = build_scanner(config).await?;
    let removed = scanner.cleanup(days).await?;
    info!(removed, days, "cleanup done");
    Ok(())
}

/// Show the effective configuration.
pub fn show_config(config: &Config) -> Result<()> {
    println!("{config:#?}");
    Ok(())
}

/// Register a simulated trade.
pub async fn trade_add(
    config: &Config,
    symbol: &str,
    entry_price: f64,
    position_size_usd: f64,
    stop_loss_pct: f64,
) -> Result<()> {
    if entry_price <= 0.0 {
        anyhow::bail!("entry price must be positive");
    }
    if !(0.0..100.0).contains(&stop_loss_pct) || stop_loss_pct == 0.0 {
        anyhow::bail!("stop loss % must be between 0 and 100");
    }
    let scanner = build_scanner(config).await?;
    let trade = scanner
        .monitor()
        .add_trade(symbol, entry_price, position_size_usd, stop_loss_pct)
        .await?;
    info!(
        symbol = trade.symbol,
        stop = trade.current_stop_price,
        "trade registered"
    );
    Ok(())
}

/// Close a trade, at a live price when none is given.
pub async fn trade_close(config: &Config, symbol: &str, price: Option<f64>) -> Result<()> {
    let scanner = build_scanner(config).await?;
    match scanner.monitor().close_trade(symbol, price).await? {
        Some(record) => info!(
            symbol = record.symbol,
            pnl = record.total_pnl,
            "trade closed"
        ),
        None => warn!(symbol, "no active trade"),
    }
    Ok(())
}

/// Manually move a trade's stop.
pub async fn trade_stop(config: &Config, symbol: &str, price: f64) -> Result<()> {
    if price <= 0.0 {
        anyhow::bail!("stop price must be positive");
    }
    let scanner = build_scanner(config).await?;
    scanner.monitor().adjust_stop(symbol, price).await?;
    Ok(())
}
