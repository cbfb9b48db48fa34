//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scanning: ScanningConfig,
    #[serde(default)]
    pub universe: UniverseConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanningConfig {
    #[serde(default = "default_scan_interval")]
    pub scan_interval_minutes: u64,
    #[serde(default = "default_monitor_interval")]
    pub trade_monitor_interval_minutes: u64,
    /// Composite score at or above which a token is alerted.
    #[serde(default = "default_alert_threshold")]
    pub alert_score_threshold: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens_per_scan: usize,
    #[serde(default = "default_scan_workers")]
    pub max_scan_workers: usize,
    #[serde(default = "default_candle_limit")]
    pub ohlcv_candle_limit: usize,
    #[serde(default = "default_orderbook_depth")]
    pub orderbook_depth: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UniverseConfig {
    /// A token must have futures on at least this many exchanges.
    #[serde(default = "default_min_futures_exchanges")]
    pub min_futures_exchanges: usize,
    /// Cached universe older than this is rebuilt.
    #[serde(default = "default_universe_max_age")]
    pub max_age_hours: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapConfig {
    /// Hours between history backfill attempts per symbol.
    #[serde(default = "default_bootstrap_refresh")]
    pub refresh_hours: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// JSON file for active trades and trade history. Empty disables
    /// persistence.
    #[serde(default = "default_trades_path")]
    pub trades_path: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: f64,
}

fn default_scan_interval() -> u64 {
    15
}

fn default_monitor_interval() -> u64 {
    5
}

fn default_alert_threshold() -> f64 {
    48.0
}

fn default_max_tokens() -> usize {
    400
}

fn default_scan_workers() -> usize {
    6
}

fn default_candle_limit() -> usize {
    500
}

fn default_orderbook_depth() -> usize {
    50
}

fn default_min_futures_exchanges() -> usize {
    1
}

fn default_universe_max_age() -> f64 {
    24.0
}

fn default_bootstrap_refresh() -> f64 {
    24.0
}

fn default_trades_path() -> String {
    "data/trades.json".to_string()
}

fn default_retention_days() -> f64 {
    30.0
}

impl Default for ScanningConfig {
    fn default() -> Self {
        Self {
            scan_interval_minutes: default_scan_interval(),
            trade_monitor_interval_minutes: default_monitor_interval(),
            alert_score_threshold: default_alert_threshold(),
            max_tokens_per_scan: default_max_tokens(),
            max_scan_workers: default_scan_workers(),
            ohlcv_candle_limit: default_candle_limit(),
            orderbook_depth: default_orderbook_depth(),
        }
    }
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            min_futures_exchanges: default_min_futures_exchanges(),
            max_age_hours: default_universe_max_age(),
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            refresh_hours: default_bootstrap_refresh(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            trades_path: default_trades_path(),
            retention_days: default_retention_days(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scanning: ScanningConfig::default(),
            universe: UniverseConfig::default(),
            bootstrap: BootstrapConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix RADAR_)
            .add_source(
                config::Environment::with_prefix("RADAR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.scanning.scan_interval_minutes == 0 {
            anyhow::bail!("scan_interval_minutes must be positive");
        }

        if self.scanning.trade_monitor_interval_minutes == 0 {
            anyhow::bail!("trade_monitor_interval_minutes must be positive");
        }

        if !(0.0..=100.0).contains(&self.scanning.alert_score_threshold) {
            anyhow::bail!("alert_score_threshold must be between 0 and 100");
        }

        if self.scanning.max_scan_workers == 0 {
            anyhow::bail!("max_scan_workers must be positive");
        }

        if self.scanning.max_tokens_per_scan == 0 {
            anyhow::bail!("max_tokens_per_scan must be positive");
        }

        if self.universe.min_futures_exchanges == 0 {
            anyhow::bail!("min_futures_exchanges must be positive");
        }

        if self.storage.retention_days <= 0.0 {
            anyhow::bail!("retention_days must be positive");
        }

        Ok(())
    }
}
