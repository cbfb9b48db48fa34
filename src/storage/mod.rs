//! Persistence boundary: snapshots, signal/score history, trades, universe
//!
//! The scanner only ever talks to the [`Store`] trait. The default backend is
//! the in-memory [`MemoryStore`] with optional JSON persistence for active
//! trades; a SQL backend can be slotted in behind the same trait.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::market::{Candle, OrderBook, Ticker};

/// Current unix time in seconds with sub-second precision.
pub fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Snapshot payload kinds, used to query the snapshot log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    Ticker,
    OpenInterest,
    FundingRate,
    OrderBook,
    LongShortRatio,
    Ohlcv,
}

/// Typed snapshot payload. One variant per market data kind so the shape of
/// every logged row is checked at compile time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "data_type", rename_all = "snake_case")]
pub enum SnapshotData {
    Ticker(Ticker),
    OpenInterest { value_usd: f64 },
    FundingRate { rate: f64 },
    OrderBook(OrderBook),
    LongShortRatio { ratio: f64 },
    Ohlcv { candles: Vec<Candle> },
}

impl SnapshotData {
    pub fn kind(&self) -> SnapshotKind {
        match self {
            SnapshotData::Ticker(_) => SnapshotKind::Ticker,
            SnapshotData::OpenInterest { .. } => SnapshotKind::OpenInterest,
            SnapshotData::FundingRate { .. } => SnapshotKind::FundingRate,
            SnapshotData::OrderBook(_) => SnapshotKind::OrderBook,
            SnapshotData::LongShortRatio { .. } => SnapshotKind::LongShortRatio,
            SnapshotData::Ohlcv { .. } => SnapshotKind::Ohlcv,
        }
    }
}

/// One row in the append-only snapshot log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub symbol: String,
    pub exchange: String,
    pub timestamp: f64,
    pub data: SnapshotData,
}

/// One computed-signal observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRow {
    pub symbol: String,
    pub signal: String,
    pub timestamp: f64,
    pub raw_value: f64,
    pub normalized_score: f64,
    pub metadata: serde_json::Value,
}

/// One composite-score observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRow {
    pub symbol: String,
    pub timestamp: f64,
    pub composite_score: f64,
    pub classification: String,
    pub signal_scores: BTreeMap<String, f64>,
    pub metadata: serde_json::Value,
}

/// An open simulated trade. One per symbol; re-adding a symbol replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub entry_price: f64,
    pub position_size_usd: f64,
    pub stop_loss_pct: f64,
    /// Only ever ratchets upward.
    pub current_stop_price: f64,
    pub entry_timestamp: f64,
    pub tp1_hit: bool,
    pub tp2_hit: bool,
    pub tp3_hit: bool,
    pub tp4_hit: bool,
    /// Fraction of the position still open, in [0, 1]. Only decreases.
    pub remaining_fraction: f64,
    pub realized_pnl: f64,
    /// Stop level (% relative to entry) last announced; trail rungs fire only
    /// above this.
    pub last_notified_stop_pct: f64,
    pub last_score: f64,
    /// Hour bucket of the last status notification, for idempotent hourly
    /// updates.
    pub last_status_hour: i64,
    pub max_gain_pct: f64,
}

impl Trade {
    pub fn new(symbol: &str, entry_price: f64, position_size_usd: f64, stop_loss_pct: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            entry_price,
            position_size_usd,
            stop_loss_pct,
            current_stop_price: entry_price * (1.0 - stop_loss_pct / 100.0),
            entry_timestamp: unix_now(),
            tp1_hit: false,
            tp2_hit: false,
            tp3_hit: false,
            tp4_hit: false,
            remaining_fraction: 1.0,
            realized_pnl: 0.0,
            last_notified_stop_pct: -stop_loss_pct,
            last_score: 0.0,
            last_status_hour: -1,
            max_gain_pct: 0.0,
        }
    }

    pub fn tp_hit(&self, level: usize) -> bool {
        match level {
            1 => self.tp1_hit,
            2 => self.tp2_hit,
            3 => self.tp3_hit,
            4 => self.tp4_hit,
            _ => false,
        }
    }

    pub fn mark_tp_hit(&mut self, level: usize) {
        match level {
            1 => self.tp1_hit = true,
            2 => self.tp2_hit = true,
            3 => self.tp3_hit = true,
            4 => self.tp4_hit = true,
            _ => {}
        }
    }

    /// Unrealized PnL of the still-open fraction at `price`.
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        self.remaining_fraction * self.position_size_usd * (price - self.entry_price)
            / self.entry_price
    }

    /// Gain of `price` over entry, in percent.
    pub fn gain_pct(&self, price: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        (price - self.entry_price) / self.entry_price * 100.0
    }

    /// Finalize into a closed-trade record at `exit_price`.
    pub fn into_record(self, exit_price: f64, exit_reason: &str, now: f64) -> TradeRecord {
        let total_pnl = self.realized_pnl + self.unrealized_pnl(exit_price);
        let total_pnl_pct = if self.position_size_usd > 0.0 {
            total_pnl / self.position_size_usd * 100.0
        } else {
            0.0
        };
        TradeRecord {
            symbol: self.symbol,
            entry_price: self.entry_price,
            exit_price,
            position_size_usd: self.position_size_usd,
            realized_pnl: self.realized_pnl,
            total_pnl,
            total_pnl_pct,
            entry_timestamp: self.entry_timestamp,
            exit_timestamp: now,
            duration_hours: (now - self.entry_timestamp) / 3600.0,
            max_gain_pct: self.max_gain_pct,
            exit_reason: exit_reason.to_string(),
        }
    }
}

/// Immutable record of a closed trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub position_size_usd: f64,
    pub realized_pnl: f64,
    pub total_pnl: f64,
    /// Total PnL as a percentage of the position size.
    pub total_pnl_pct: f64,
    pub entry_timestamp: f64,
    pub exit_timestamp: f64,
    pub duration_hours: f64,
    pub max_gain_pct: f64,
    pub exit_reason: String,
}

/// One token in the scan universe with the exchanges that list it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseEntry {
    pub symbol: String,
    pub futures_exchanges: Vec<String>,
    pub spot_exchanges: Vec<String>,
}

/// Row counts for the `stats` command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub snapshot_rows: usize,
    pub signal_rows: usize,
    pub score_rows: usize,
    pub active_trades: usize,
    pub closed_trades: usize,
    pub universe_size: usize,
}

/// Persistence operations used by the scanner, signal engine, and monitor.
#[async_trait]
pub trait Store: Send + Sync {
    async fn append_snapshots(&self, rows: Vec<SnapshotRow>) -> Result<()>;

    /// Snapshots of `kind` for `symbol` within the last `hours_back` hours,
    /// oldest first, optionally restricted to one exchange.
    async fn snapshots(
        &self,
        symbol: &str,
        kind: SnapshotKind,
        hours_back: f64,
        exchange: Option<&str>,
    ) -> Result<Vec<SnapshotRow>>;

    async fn append_signals(&self, rows: Vec<SignalRow>) -> Result<()>;

    /// Signal observations for (symbol, signal) within the window, oldest
    /// first.
    async fn signal_history(
        &self,
        symbol: &str,
        signal: &str,
        hours_back: f64,
    ) -> Result<Vec<SignalRow>>;

    async fn append_score(&self, row: ScoreRow) -> Result<()>;

    async fn latest_score(&self, symbol: &str) -> Result<Option<ScoreRow>>;

    /// Second-latest score row, i.e. the score before the current one.
    async fn previous_score(&self, symbol: &str) -> Result<Option<ScoreRow>>;

    /// Latest score per symbol, filtered to `>= floor`, sorted descending,
    /// capped at `limit`.
    async fn top_scores(&self, floor: f64, limit: usize) -> Result<Vec<ScoreRow>>;

    async fn upsert_trade(&self, trade: Trade) -> Result<()>;

    async fn active_trade(&self, symbol: &str) -> Result<Option<Trade>>;

    async fn active_trades(&self) -> Result<Vec<Trade>>;

    /// Close an active trade, appending the record to trade history. Returns
    /// `None` when no trade is open for `symbol`.
    async fn close_trade(
        &self,
        symbol: &str,
        exit_price: f64,
        reason: &str,
    ) -> Result<Option<TradeRecord>>;

    async fn trade_history(&self, limit: usize) -> Result<Vec<TradeRecord>>;

    async fn store_universe(&self, entries: Vec<UniverseEntry>) -> Result<()>;

    /// Stored universe with its build timestamp, if any.
    async fn universe(&self) -> Result<Option<(f64, Vec<UniverseEntry>)>>;

    async fn bootstrap_timestamp(&self, symbol: &str) -> Result<Option<f64>>;

    async fn set_bootstrap_timestamp(&self, symbol: &str, timestamp: f64) -> Result<()>;

    /// Drop snapshot/signal/score rows older than `days`. Returns rows
    /// removed.
    async fn cleanup(&self, days: f64) -> Result<u64>;

    async fn stats(&self) -> Result<StoreStats>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_trade_invariants() {
        let trade = Trade::new("SOL", 100.0, 10_000.0, 7.0);
        assert_eq!(trade.current_stop_price, 93.0);
        assert_eq!(trade.remaining_fraction, 1.0);
        assert_eq!(trade.realized_pnl, 0.0);
        assert_eq!(trade.last_notified_stop_pct, -7.0);
        assert!(!trade.tp_hit(1));
    }

    #[test]
    fn test_total_pnl_combines_realized_and_remaining() {
        let mut trade = Trade::new("SOL", 100.0, 10_000.0, 7.0);
        trade.realized_pnl = 375.0;
        trade.remaining_fraction = 0.75;
        trade.mark_tp_hit(1);

        let record = trade.into_record(120.0, "manual", unix_now());
        // 375 realized + 0.75 * 10k * 20% open gain
        assert!((record.total_pnl - (375.0 + 1500.0)).abs() < 1e-9);
        assert_eq!(record.exit_reason, "manual");
    }

    #[test]
    fn test_snapshot_data_round_trips_tagged() {
        let data = SnapshotData::FundingRate { rate: -0.0005 };
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["data_type"], "funding_rate");
        let back: SnapshotData = serde_json::from_value(json).unwrap();
        assert_eq!(back, data);
        assert_eq!(back.kind(), SnapshotKind::FundingRate);
    }
}
