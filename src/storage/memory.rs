//! In-memory store with optional JSON trade persistence
//!
//! Time-series logs (snapshots, signals, scores) live in dashmaps keyed by
//! symbol and are dropped on process exit; trades survive restarts through a
//! JSON file when a persistence path is configured.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{
    unix_now, ScoreRow, SignalRow, SnapshotKind, SnapshotRow, Store, StoreStats, Trade,
    TradeRecord, UniverseEntry,
};
use crate::error::{Error, Result};

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedTrades {
    active: Vec<Trade>,
    history: Vec<TradeRecord>,
}

pub struct MemoryStore {
    snapshots: DashMap<String, Vec<SnapshotRow>>,
    signals: DashMap<String, Vec<SignalRow>>,
    scores: DashMap<String, Vec<ScoreRow>>,
    trades: RwLock<HashMap<String, Trade>>,
    trade_records: RwLock<Vec<TradeRecord>>,
    universe: RwLock<Option<(f64, Vec<UniverseEntry>)>>,
    bootstrap_stamps: DashMap<String, f64>,
    persist_path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            snapshots: DashMap::new(),
            signals: DashMap::new(),
            scores: DashMap::new(),
            trades: RwLock::new(HashMap::new()),
            trade_records: RwLock::new(Vec::new()),
            universe: RwLock::new(None),
            bootstrap_stamps: DashMap::new(),
            persist_path: None,
        }
    }

    /// Store that saves active trades and trade history to `path` after every
    /// trade mutation and loads them back on startup.
    pub async fn with_persistence(path: PathBuf) -> Result<Self> {
        let mut store = Self::new();
        store.persist_path = Some(path);
        store.load_trades().await?;
        Ok(store)
    }

    fn signal_key(symbol: &str, signal: &str) -> String {
        format!("{symbol}:{signal}")
    }

    async fn load_trades(&self) -> Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        if !path.exists() {
            debug!(path = %path.display(), "no persisted trades file, starting fresh");
            return Ok(());
        }
        let contents = tokio::fs::read_to_string(path).await?;
        let persisted: PersistedTrades = serde_json::from_str(&contents)
            .map_err(|e| Error::TradePersistence(format!("corrupt trades file: {e}")))?;

        let mut trades = self.trades.write().await;
        for trade in persisted.active {
            trades.insert(trade.symbol.clone(), trade);
        }
        let mut records = self.trade_records.write().await;
        *records = persisted.history;
        debug!(
            active = trades.len(),
            closed = records.len(),
            "loaded persisted trades"
        );
        Ok(())
    }

    async fn save_trades(&self) -> Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        let persisted = {
            let trades = self.trades.read().await;
            let records = self.trade_records.read().await;
            PersistedTrades {
                active: trades.values().cloned().collect(),
                history: records.clone(),
            }
        };
        let json = serde_json::to_string_pretty(&persisted)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn append_snapshots(&self, rows: Vec<SnapshotRow>) -> Result<()> {
        for row in rows {
            self.snapshots
                .entry(row.symbol.clone())
                .or_default()
                .push(row);
        }
        Ok(())
    }

    async fn snapshots(
        &self,
        symbol: &str,
        kind: SnapshotKind,
        hours_back: f64,
        exchange: Option<&str>,
    ) -> Result<Vec<SnapshotRow>> {
        let cutoff = unix_now() - hours_back * 3600.0;
        let mut rows: Vec<SnapshotRow> = self
            .snapshots
            .get(symbol)
            .map(|entry| {
                entry
                    .iter()
                    .filter(|r| r.data.kind() == kind && r.timestamp >= cutoff)
                    .filter(|r| exchange.is_none_or(|e| r.exchange == e))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by(|a, b| {
            a.timestamp
                .partial_cmp(&b.timestamp)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(rows)
    }

    async fn append_signals(&self, rows: Vec<SignalRow>) -> Result<()> {
        for row in rows {
            let key = Self::signal_key(&row.symbol, &row.signal);
            self.signals.entry(key).or_default().push(row);
        }
        Ok(())
    }

    async fn signal_history(
        &self,
        symbol: &str,
        signal: &str,
        hours_back: f64,
    ) -> Result<Vec<SignalRow>> {
        let cutoff = unix_now() - hours_back * 3600.0;
        let mut rows: Vec<SignalRow> = self
            .signals
            .get(&Self::signal_key(symbol, signal))
            .map(|entry| {
                entry
                    .iter()
                    .filter(|r| r.timestamp >= cutoff)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by(|a, b| {
            a.timestamp
                .partial_cmp(&b.timestamp)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(rows)
    }

    async fn append_score(&self, row: ScoreRow) -> Result<()> {
        self.scores.entry(row.symbol.clone()).or_default().push(row);
        Ok(())
    }

    async fn latest_score(&self, symbol: &str) -> Result<Option<ScoreRow>> {
        Ok(self
            .scores
            .get(symbol)
            .and_then(|entry| entry.last().cloned()))
    }

    async fn previous_score(&self, symbol: &str) -> Result<Option<ScoreRow>> {
        Ok(self.scores.get(symbol).and_then(|entry| {
            let len = entry.len();
            if len >= 2 {
                entry.get(len - 2).cloned()
            } else {
                None
            }
        }))
    }

    async fn top_scores(&self, floor: f64, limit: usize) -> Result<Vec<ScoreRow>> {
        let mut latest: Vec<ScoreRow> = self
            .scores
            .iter()
            .filter_map(|entry| entry.value().last().cloned())
            .filter(|row| row.composite_score >= floor)
            .collect();
        latest.sort_by(|a, b| {
            b.composite_score
                .partial_cmp(&a.composite_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        latest.truncate(limit);
        Ok(latest)
    }

    async fn upsert_trade(&self, trade: Trade) -> Result<()> {
        {
            let mut trades = self.trades.write().await;
            trades.insert(trade.symbol.clone(), trade);
        }
        if let Err(e) = self.save_trades().await {
            warn!(error = %e, "failed to persist trades");
        }
        Ok(())
    }

    async fn active_trade(&self, symbol: &str) -> Result<Option<Trade>> {
        Ok(self.trades.read().await.get(symbol).cloned())
    }

    async fn active_trades(&self) -> Result<Vec<Trade>> {
        let mut trades: Vec<Trade> = self.trades.read().await.values().cloned().collect();
        trades.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(trades)
    }

    async fn close_trade(
        &self,
        symbol: &str,
        exit_price: f64,
        reason: &str,
    ) -> Result<Option<TradeRecord>> {
        let removed = {
            let mut trades = self.trades.write().await;
            trades.remove(symbol)
        };
        let Some(trade) = removed else {
            return Ok(None);
        };
        let record = trade.into_record(exit_price, reason, unix_now());
        {
            let mut records = self.trade_records.write().await;
            records.push(record.clone());
        }
        if let Err(e) = self.save_trades().await {
            warn!(error = %e, "failed to persist trades");
        }
        Ok(Some(record))
    }

    async fn trade_history(&self, limit: usize) -> Result<Vec<TradeRecord>> {
        let records = self.trade_records.read().await;
        Ok(records.iter().rev().take(limit).cloned().collect())
    }

    async fn store_universe(&self, entries: Vec<UniverseEntry>) -> Result<()> {
        let mut universe = self.universe.write().await;
        *universe = Some((unix_now(), entries));
        Ok(())
    }

    async fn universe(&self) -> Result<Option<(f64, Vec<UniverseEntry>)>> {
        Ok(self.universe.read().await.clone())
    }

    async fn bootstrap_timestamp(&self, symbol: &str) -> Result<Option<f64>> {
        Ok(self.bootstrap_stamps.get(symbol).map(|e| *e.value()))
    }

    async fn set_bootstrap_timestamp(&self, symbol: &str, timestamp: f64) -> Result<()> {
        self.bootstrap_stamps.insert(symbol.to_string(), timestamp);
        Ok(())
    }

    async fn cleanup(&self, days: f64) -> Result<u64> {
        let cutoff = unix_now() - days * 86_400.0;
        let mut removed = 0u64;
        for mut entry in self.snapshots.iter_mut() {
            let before = entry.len();
            entry.retain(|r| r.timestamp >= cutoff);
            removed += (before - entry.len()) as u64;
        }
        for mut entry in self.signals.iter_mut() {
            let before = entry.len();
            entry.retain(|r| r.timestamp >= cutoff);
            removed += (before - entry.len()) as u64;
        }
        for mut entry in self.scores.iter_mut() {
            let before = entry.len();
            entry.retain(|r| r.timestamp >= cutoff);
            removed += (before - entry.len()) as u64;
        }
        Ok(removed)
    }

    async fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            snapshot_rows: self.snapshots.iter().map(|e| e.len()).sum(),
            signal_rows: self.signals.iter().map(|e| e.len()).sum(),
            score_rows: self.scores.iter().map(|e| e.len()).sum(),
            active_trades: self.trades.read().await.len(),
            closed_trades: self.trade_records.read().await.len(),
            universe_size: self
                .universe
                .read()
                .await
                .as_ref()
                .map(|(_, u)| u.len())
                .unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SnapshotData;
    use std::collections::BTreeMap;

    fn score_row(symbol: &str, score: f64, ts: f64) -> ScoreRow {
        ScoreRow {
            symbol: symbol.to_string(),
            timestamp: ts,
            composite_score: score,
            classification: "MONITOR".to_string(),
            signal_scores: BTreeMap::new(),
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_snapshot_window_and_exchange_filter() {
        let store = MemoryStore::new();
        let now = unix_now();
        let mk = |exchange: &str, age_hours: f64| SnapshotRow {
            symbol: "SOL".into(),
            exchange: exchange.into(),
            timestamp: now - age_hours * 3600.0,
            data: SnapshotData::OpenInterest { value_usd: 1e7 },
        };
        store
            .append_snapshots(vec![mk("binance", 1.0), mk("bybit", 1.0), mk("binance", 100.0)])
            .await
            .unwrap();

        let recent = store
            .snapshots("SOL", SnapshotKind::OpenInterest, 72.0, None)
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);

        let binance_only = store
            .snapshots("SOL", SnapshotKind::OpenInterest, 72.0, Some("binance"))
            .await
            .unwrap();
        assert_eq!(binance_only.len(), 1);
        assert_eq!(binance_only[0].exchange, "binance");
    }

    #[tokio::test]
    async fn test_previous_score_is_second_latest() {
        let store = MemoryStore::new();
        let now = unix_now();
        store.append_score(score_row("SOL", 40.0, now - 2.0)).await.unwrap();
        assert!(store.previous_score("SOL").await.unwrap().is_none());

        store.append_score(score_row("SOL", 60.0, now - 1.0)).await.unwrap();
        let prev = store.previous_score("SOL").await.unwrap().unwrap();
        assert_eq!(prev.composite_score, 40.0);
        let latest = store.latest_score("SOL").await.unwrap().unwrap();
        assert_eq!(latest.composite_score, 60.0);
    }

    #[tokio::test]
    async fn test_top_scores_latest_per_symbol_above_floor() {
        let store = MemoryStore::new();
        let now = unix_now();
        store.append_score(score_row("SOL", 90.0, now - 2.0)).await.unwrap();
        store.append_score(score_row("SOL", 55.0, now - 1.0)).await.unwrap();
        store.append_score(score_row("DOGE", 70.0, now - 1.0)).await.unwrap();
        store.append_score(score_row("ADA", 10.0, now - 1.0)).await.unwrap();

        let top = store.top_scores(33.0, 10).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].symbol, "DOGE");
        // SOL contributes its latest row, not its 90 peak
        assert_eq!(top[1].composite_score, 55.0);
    }

    #[tokio::test]
    async fn test_close_trade_computes_total_pnl() {
        let store = MemoryStore::new();
        let mut trade = Trade::new("SOL", 100.0, 10_000.0, 7.0);
        trade.realized_pnl = 375.0;
        trade.remaining_fraction = 0.75;
        store.upsert_trade(trade).await.unwrap();

        let record = store
            .close_trade("SOL", 120.0, "manual")
            .await
            .unwrap()
            .unwrap();
        assert!((record.total_pnl - 1875.0).abs() < 1e-9);
        assert!(store.active_trade("SOL").await.unwrap().is_none());
        assert_eq!(store.trade_history(10).await.unwrap().len(), 1);

        assert!(store
            .close_trade("SOL", 120.0, "manual")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_trade_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.json");

        {
            let store = MemoryStore::with_persistence(path.clone()).await.unwrap();
            store
                .upsert_trade(Trade::new("SOL", 100.0, 10_000.0, 7.0))
                .await
                .unwrap();
            store
                .upsert_trade(Trade::new("DOGE", 0.1, 5_000.0, 10.0))
                .await
                .unwrap();
            store.close_trade("DOGE", 0.12, "manual").await.unwrap();
        }

        let reloaded = MemoryStore::with_persistence(path).await.unwrap();
        let active = reloaded.active_trades().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].symbol, "SOL");
        assert_eq!(reloaded.trade_history(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_drops_old_rows() {
        let store = MemoryStore::new();
        let now = unix_now();
        store
            .append_signals(vec![
                SignalRow {
                    symbol: "SOL".into(),
                    signal: "oi_surge".into(),
                    timestamp: now - 10.0 * 86_400.0,
                    raw_value: 1.0,
                    normalized_score: 10.0,
                    metadata: serde_json::Value::Null,
                },
                SignalRow {
                    symbol: "SOL".into(),
                    signal: "oi_surge".into(),
                    timestamp: now,
                    raw_value: 2.0,
                    normalized_score: 20.0,
                    metadata: serde_json::Value::Null,
                },
            ])
            .await
            .unwrap();

        let removed = store.cleanup(7.0).await.unwrap();
        assert_eq!(removed, 1);
        let remaining = store.signal_history("SOL", "oi_surge", 24.0 * 30.0).await.unwrap();
        assert_eq!(remaining.len(), 1);
    }
}
