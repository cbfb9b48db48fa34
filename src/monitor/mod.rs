//! Open-trade monitoring: stops, take-profit ladder, trailing ratchet
//!
//! Each tick re-evaluates every active trade against a live price. Trade
//! invariants enforced here: `remaining_fraction` only decreases, each TP
//! fires at most once, and the stop price only ratchets upward.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::alerts::{AlertSink, SignalDegradation, StopUpdate, TakeProfitHit, TradeStatus};
use crate::error::{Error, Result};
use crate::market::MarketDataProvider;
use crate::storage::{unix_now, Store, Trade, TradeRecord};

/// Sell 25% at +15/+30/+50; the final quarter has no fixed target and rides
/// the trailing stop.
pub struct TakeProfitRung {
    pub level: usize,
    pub target_pct: Option<f64>,
    pub sell_fraction: f64,
}

pub const TAKE_PROFIT_LADDER: [TakeProfitRung; 4] = [
    TakeProfitRung {
        level: 1,
        target_pct: Some(15.0),
        sell_fraction: 0.25,
    },
    TakeProfitRung {
        level: 2,
        target_pct: Some(30.0),
        sell_fraction: 0.25,
    },
    TakeProfitRung {
        level: 3,
        target_pct: Some(50.0),
        sell_fraction: 0.25,
    },
    TakeProfitRung {
        level: 4,
        target_pct: None,
        sell_fraction: 0.25,
    },
];

/// When the price move reaches `price_move_pct`, raise the stop to
/// `stop_at_pct` relative to entry.
pub struct TrailRung {
    pub price_move_pct: f64,
    pub stop_at_pct: f64,
    pub label: &'static str,
}

pub const STOP_TRAIL_LADDER: [TrailRung; 6] = [
    TrailRung {
        price_move_pct: 5.0,
        stop_at_pct: 0.0,
        label: "break-even",
    },
    TrailRung {
        price_move_pct: 10.0,
        stop_at_pct: 5.0,
        label: "+5%",
    },
    TrailRung {
        price_move_pct: 15.0,
        stop_at_pct: 10.0,
        label: "+10%",
    },
    TrailRung {
        price_move_pct: 25.0,
        stop_at_pct: 18.0,
        label: "+18%",
    },
    TrailRung {
        price_move_pct: 40.0,
        stop_at_pct: 30.0,
        label: "+30%",
    },
    TrailRung {
        price_move_pct: 60.0,
        stop_at_pct: 45.0,
        label: "+45%",
    },
];

/// Score drop (points) that triggers a degradation warning.
const DEGRADATION_DROP: f64 = 20.0;

pub struct TradeMonitor {
    provider: Arc<dyn MarketDataProvider>,
    store: Arc<dyn Store>,
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl TradeMonitor {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        store: Arc<dyn Store>,
        sinks: Vec<Arc<dyn AlertSink>>,
    ) -> Self {
        Self {
            provider,
            store,
            sinks,
        }
    }

    /// One monitoring pass over all active trades. Per-trade failures are
    /// logged and do not stop the pass.
    pub async fn monitor_all(&self) -> Result<()> {
        let trades = self.store.active_trades().await?;
        if trades.is_empty() {
            return Ok(());
        }
        info!(count = trades.len(), "monitoring trades");
        for trade in trades {
            let symbol = trade.symbol.clone();
            if let Err(e) = self.check_trade(trade).await {
                error!(symbol, error = %e, "trade check failed");
            }
        }
        Ok(())
    }

    pub async fn check_trade(&self, trade: Trade) -> Result<()> {
        let symbol = trade.symbol.clone();

        if trade.remaining_fraction <= 0.0 {
            self.store
                .close_trade(&symbol, trade.entry_price, "fully_exited")
                .await?;
            return Ok(());
        }

        let Some(price) = self.live_price(&symbol).await? else {
            // no price this tick, try again next pass
            return Ok(());
        };

        let mut trade = trade;
        let change_pct = trade.gain_pct(price);
        trade.max_gain_pct = trade.max_gain_pct.max(change_pct);

        if price <= trade.current_stop_price {
            if let Some(record) = self
                .store
                .close_trade(&symbol, price, "stop_loss")
                .await?
            {
                self.notify_closed(&record, "STOP LOSS HIT").await;
            }
            return Ok(());
        }

        // Take-profit ladder; a gap up can fire several rungs in one tick.
        for rung in &TAKE_PROFIT_LADDER {
            let Some(target_pct) = rung.target_pct else {
                continue;
            };
            if trade.tp_hit(rung.level) || change_pct < target_pct {
                continue;
            }
            let chunk = rung.sell_fraction * trade.position_size_usd * (change_pct / 100.0);
            trade.remaining_fraction = (trade.remaining_fraction - rung.sell_fraction).max(0.0);
            trade.realized_pnl += chunk;
            trade.mark_tp_hit(rung.level);

            let hit = TakeProfitHit {
                symbol: symbol.clone(),
                level: rung.level,
                target_pct,
                current_price: price,
                entry_price: trade.entry_price,
                pnl_chunk: chunk,
                remaining_pct: trade.remaining_fraction * 100.0,
            };
            for sink in &self.sinks {
                sink.on_tp_hit(&hit).await;
            }
        }

        // Trailing ladder: highest rung reached that beats the last notified
        // stop level. The stop never moves down.
        let mut notified_pct = trade.last_notified_stop_pct;
        let mut stop_price = trade.current_stop_price;
        for rung in &STOP_TRAIL_LADDER {
            if change_pct >= rung.price_move_pct && rung.stop_at_pct > notified_pct {
                notified_pct = rung.stop_at_pct;
                stop_price = trade.entry_price * (1.0 + notified_pct / 100.0);
            }
        }
        if notified_pct > trade.last_notified_stop_pct {
            trade.current_stop_price = stop_price.max(trade.current_stop_price);
            trade.last_notified_stop_pct = notified_pct;

            let update = StopUpdate {
                symbol: symbol.clone(),
                new_stop_price: trade.current_stop_price,
                new_stop_pct: notified_pct,
                current_price: price,
                entry_price: trade.entry_price,
                reason: format!("Price +{change_pct:.1}%"),
            };
            for sink in &self.sinks {
                sink.on_stop_update(&update).await;
            }
        }

        // Signal degradation while in a trade
        let latest_score = self.store.latest_score(&symbol).await?;
        if let Some(row) = &latest_score {
            if trade.last_score > 0.0
                && row.composite_score < trade.last_score - DEGRADATION_DROP
            {
                let degradation = SignalDegradation {
                    symbol: symbol.clone(),
                    old_score: trade.last_score,
                    new_score: row.composite_score,
                    current_price: price,
                    entry_price: trade.entry_price,
                    price_change_pct: change_pct,
                };
                for sink in &self.sinks {
                    sink.on_signal_degradation(&degradation).await;
                }
            }
            trade.last_score = row.composite_score;
        }

        // At most one status update per whole hour in the trade
        let hours_in = (unix_now() - trade.entry_timestamp) / 3600.0;
        let current_hour = hours_in as i64;
        if current_hour > trade.last_status_hour && current_hour > 0 {
            let status = TradeStatus {
                symbol: symbol.clone(),
                entry_price: trade.entry_price,
                current_price: price,
                price_change_pct: change_pct,
                unrealized_pnl: trade.unrealized_pnl(price),
                realized_pnl: trade.realized_pnl,
                remaining_pct: trade.remaining_fraction * 100.0,
                current_stop: trade.current_stop_price,
                hours_in,
                score: latest_score.map(|r| r.composite_score).unwrap_or(0.0),
            };
            for sink in &self.sinks {
                sink.on_trade_status(&status).await;
            }
            trade.last_status_hour = current_hour;
        }

        self.store.upsert_trade(trade).await?;
        Ok(())
    }

    /// Register a simulated trade. Re-adding a symbol replaces the open
    /// trade.
    pub async fn add_trade(
        &self,
        symbol: &str,
        entry_price: f64,
        position_size_usd: f64,
        stop_loss_pct: f64,
    ) -> Result<Trade> {
        let symbol = symbol.trim().to_uppercase();
        let trade = Trade::new(&symbol, entry_price, position_size_usd, stop_loss_pct);
        self.store.upsert_trade(trade.clone()).await?;
        for sink in &self.sinks {
            sink.on_trade_registered(&symbol, entry_price, position_size_usd, stop_loss_pct)
                .await;
        }
        Ok(trade)
    }

    /// Close manually, looking up a live price when none is given.
    pub async fn close_trade(
        &self,
        symbol: &str,
        exit_price: Option<f64>,
    ) -> Result<Option<TradeRecord>> {
        let symbol = symbol.trim().to_uppercase();
        let exit_price = match exit_price {
            Some(p) => p,
            None => self
                .live_price(&symbol)
                .await?
                .ok_or_else(|| Error::PriceUnavailable(symbol.clone()))?,
        };
        let record = self
            .store
            .close_trade(&symbol, exit_price, "manual_close")
            .await?;
        if let Some(record) = &record {
            self.notify_closed(record, "MANUAL CLOSE").await;
        }
        Ok(record)
    }

    pub async fn adjust_stop(&self, symbol: &str, stop_price: f64) -> Result<()> {
        let symbol = symbol.trim().to_uppercase();
        let Some(mut trade) = self.store.active_trade(&symbol).await? else {
            return Err(Error::TradeNotFound(symbol));
        };
        trade.current_stop_price = stop_price;
        let stop_pct = (stop_price - trade.entry_price) / trade.entry_price * 100.0;
        let entry_price = trade.entry_price;
        self.store.upsert_trade(trade).await?;

        let update = StopUpdate {
            symbol,
            new_stop_price: stop_price,
            new_stop_pct: stop_pct,
            current_price: 0.0,
            entry_price,
            reason: "Manual".to_string(),
        };
        for sink in &self.sinks {
            sink.on_stop_update(&update).await;
        }
        Ok(())
    }

    async fn notify_closed(&self, record: &TradeRecord, reason: &str) {
        for sink in &self.sinks {
            sink.on_trade_closed(record, reason).await;
        }
    }

    /// First positive last price across the symbol's futures exchanges.
    async fn live_price(&self, symbol: &str) -> Result<Option<f64>> {
        let Some((_, universe)) = self.store.universe().await? else {
            warn!(symbol, "no universe, cannot resolve live price");
            return Ok(None);
        };
        let Some(entry) = universe.iter().find(|e| e.symbol == symbol) else {
            return Ok(None);
        };
        for exchange in &entry.futures_exchanges {
            match self.provider.get_ticker(symbol, exchange).await {
                Ok(ticker) => {
                    if let Some(last) = ticker.last.filter(|p| *p > 0.0) {
                        return Ok(Some(last));
                    }
                }
                Err(_) => continue,
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{
        Candle, FundingRatePoint, LongShortPoint, OpenInterest, OpenInterestPoint, OrderBook,
        ProviderError, ProviderResult, Ticker, UniverseCandidate,
    };
    use crate::storage::{MemoryStore, ScoreRow, UniverseEntry};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Provider that answers tickers from a settable price map.
    #[derive(Default)]
    struct PricedProvider {
        prices: Mutex<BTreeMap<String, f64>>,
    }

    impl PricedProvider {
        fn set_price(&self, symbol: &str, price: f64) {
            self.prices
                .lock()
                .unwrap()
                .insert(symbol.to_string(), price);
        }
    }

    #[async_trait]
    impl MarketDataProvider for PricedProvider {
        async fn get_ohlcv(
            &self,
            _symbol: &str,
            exchange: &str,
            _timeframe: &str,
            _limit: usize,
        ) -> ProviderResult<Vec<Candle>> {
            Err(ProviderError::Unsupported {
                exchange: exchange.to_string(),
                operation: "get_ohlcv",
            })
        }

        async fn get_ticker(&self, symbol: &str, exchange: &str) -> ProviderResult<Ticker> {
            match self.prices.lock().unwrap().get(symbol) {
                Some(p) => Ok(Ticker {
                    last: Some(*p),
                    ..Ticker::default()
                }),
                None => Err(ProviderError::NoData {
                    symbol: symbol.to_string(),
                    exchange: exchange.to_string(),
                }),
            }
        }

        async fn get_open_interest(
            &self,
            _symbol: &str,
            exchange: &str,
        ) -> ProviderResult<OpenInterest> {
            Err(ProviderError::Unsupported {
                exchange: exchange.to_string(),
                operation: "get_open_interest",
            })
        }

        async fn get_open_interest_history(
            &self,
            _symbol: &str,
            exchange: &str,
            _limit: usize,
        ) -> ProviderResult<Vec<OpenInterestPoint>> {
            Err(ProviderError::Unsupported {
                exchange: exchange.to_string(),
                operation: "get_open_interest_history",
            })
        }

        async fn get_funding_rate(&self, _symbol: &str, exchange: &str) -> ProviderResult<f64> {
            Err(ProviderError::Unsupported {
                exchange: exchange.to_string(),
                operation: "get_funding_rate",
            })
        }

        async fn get_funding_rate_history(
            &self,
            _symbol: &str,
            exchange: &str,
            _limit: usize,
        ) -> ProviderResult<Vec<FundingRatePoint>> {
            Err(ProviderError::Unsupported {
                exchange: exchange.to_string(),
                operation: "get_funding_rate_history",
            })
        }

        async fn get_order_book(
            &self,
            _symbol: &str,
            exchange: &str,
            _depth: usize,
        ) -> ProviderResult<OrderBook> {
            Err(ProviderError::Unsupported {
                exchange: exchange.to_string(),
                operation: "get_order_book",
            })
        }

        async fn get_long_short_ratio(&self, _symbol: &str, exchange: &str) -> ProviderResult<f64> {
            Err(ProviderError::Unsupported {
                exchange: exchange.to_string(),
                operation: "get_long_short_ratio",
            })
        }

        async fn get_long_short_ratio_history(
            &self,
            _symbol: &str,
            exchange: &str,
            _limit: usize,
        ) -> ProviderResult<Vec<LongShortPoint>> {
            Err(ProviderError::Unsupported {
                exchange: exchange.to_string(),
                operation: "get_long_short_ratio_history",
            })
        }

        async fn list_universe_candidates(&self) -> ProviderResult<Vec<UniverseCandidate>> {
            Ok(Vec::new())
        }
    }

    /// Sink that records which callbacks fired.
    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn record(&self, tag: String) {
            self.calls.lock().unwrap().push(tag);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn on_signal_alert(&self, result: &crate::scanner::ScanResult) {
            self.record(format!("alert:{}", result.symbol));
        }
        async fn on_event(&self, event: &crate::scoring::Event) {
            self.record(format!("event:{}", event.symbol()));
        }
        async fn on_trade_registered(&self, symbol: &str, _: f64, _: f64, _: f64) {
            self.record(format!("registered:{symbol}"));
        }
        async fn on_stop_update(&self, update: &StopUpdate) {
            self.record(format!("stop:{}:{}", update.symbol, update.new_stop_pct));
        }
        async fn on_tp_hit(&self, hit: &TakeProfitHit) {
            self.record(format!("tp{}:{}", hit.level, hit.symbol));
        }
        async fn on_trade_closed(&self, record: &TradeRecord, reason: &str) {
            self.record(format!("closed:{}:{reason}", record.symbol));
        }
        async fn on_trade_status(&self, status: &TradeStatus) {
            self.record(format!("status:{}", status.symbol));
        }
        async fn on_signal_degradation(&self, d: &SignalDegradation) {
            self.record(format!("degrade:{}", d.symbol));
        }
    }

    struct Fixture {
        monitor: TradeMonitor,
        provider: Arc<PricedProvider>,
        store: Arc<MemoryStore>,
        sink: Arc<RecordingSink>,
    }

    async fn fixture() -> Fixture {
        let provider = Arc::new(PricedProvider::default());
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        store
            .store_universe(vec![UniverseEntry {
                symbol: "SOL".into(),
                futures_exchanges: vec!["binance".into()],
                spot_exchanges: vec![],
            }])
            .await
            .unwrap();
        let sinks: Vec<Arc<dyn AlertSink>> = vec![sink.clone()];
        let monitor = TradeMonitor::new(provider.clone(), store.clone(), sinks);
        Fixture {
            monitor,
            provider,
            store,
            sink,
        }
    }

    #[tokio::test]
    async fn test_add_trade_sets_initial_stop() {
        let f = fixture().await;
        let trade = f.monitor.add_trade("sol", 100.0, 10_000.0, 7.0).await.unwrap();
        assert_eq!(trade.symbol, "SOL");
        assert_eq!(trade.current_stop_price, 93.0);
        assert!(f.sink.calls().contains(&"registered:SOL".to_string()));
    }

    #[tokio::test]
    async fn test_tp1_realizes_quarter_and_trail_raises_stop() {
        let f = fixture().await;
        f.monitor.add_trade("SOL", 100.0, 10_000.0, 7.0).await.unwrap();
        f.provider.set_price("SOL", 115.0);

        f.monitor.monitor_all().await.unwrap();

        let trade = f.store.active_trade("SOL").await.unwrap().unwrap();
        assert!(trade.tp1_hit);
        assert!(!trade.tp2_hit);
        assert_eq!(trade.remaining_fraction, 0.75);
        // 0.25 * 10k * 15%
        assert!((trade.realized_pnl - 375.0).abs() < 1e-9);
        // +15% reaches the +10% trail rung
        assert_eq!(trade.current_stop_price, 110.0);
        assert_eq!(trade.last_notified_stop_pct, 10.0);
        assert!(f.sink.calls().contains(&"tp1:SOL".to_string()));
        assert!(f.sink.calls().contains(&"stop:SOL:10".to_string()));
    }

    #[tokio::test]
    async fn test_gap_fires_multiple_tps_and_stop_is_above_breakeven() {
        let f = fixture().await;
        f.monitor.add_trade("SOL", 100.0, 10_000.0, 7.0).await.unwrap();
        f.provider.set_price("SOL", 135.0);

        f.monitor.monitor_all().await.unwrap();

        let trade = f.store.active_trade("SOL").await.unwrap().unwrap();
        assert!(trade.tp1_hit && trade.tp2_hit);
        assert!(!trade.tp3_hit);
        assert_eq!(trade.remaining_fraction, 0.5);
        // two quarters realized at +35% each
        assert!((trade.realized_pnl - 1750.0).abs() < 1e-9);
        // +35% reaches the +18% rung, comfortably above break-even
        assert!(trade.current_stop_price >= 100.0);
        assert_eq!(trade.current_stop_price, 118.0);
    }

    #[tokio::test]
    async fn test_stop_never_ratchets_down() {
        let f = fixture().await;
        f.monitor.add_trade("SOL", 100.0, 10_000.0, 7.0).await.unwrap();

        f.provider.set_price("SOL", 135.0);
        f.monitor.monitor_all().await.unwrap();
        let stop_after_spike = f
            .store
            .active_trade("SOL")
            .await
            .unwrap()
            .unwrap()
            .current_stop_price;

        // price falls back but stays above the stop
        f.provider.set_price("SOL", 120.0);
        f.monitor.monitor_all().await.unwrap();
        let trade = f.store.active_trade("SOL").await.unwrap().unwrap();
        assert_eq!(trade.current_stop_price, stop_after_spike);
    }

    #[tokio::test]
    async fn test_stop_hit_closes_trade() {
        let f = fixture().await;
        f.monitor.add_trade("SOL", 100.0, 10_000.0, 7.0).await.unwrap();
        f.provider.set_price("SOL", 92.0);

        f.monitor.monitor_all().await.unwrap();

        assert!(f.store.active_trade("SOL").await.unwrap().is_none());
        let history = f.store.trade_history(10).await.unwrap();
        assert_eq!(history[0].exit_reason, "stop_loss");
        assert!(f
            .sink
            .calls()
            .contains(&"closed:SOL:STOP LOSS HIT".to_string()));
    }

    #[tokio::test]
    async fn test_exhausted_position_closes_as_fully_exited() {
        let f = fixture().await;
        let mut trade = Trade::new("SOL", 100.0, 10_000.0, 7.0);
        trade.remaining_fraction = 0.0;
        f.store.upsert_trade(trade).await.unwrap();

        f.monitor.monitor_all().await.unwrap();

        assert!(f.store.active_trade("SOL").await.unwrap().is_none());
        let history = f.store.trade_history(10).await.unwrap();
        assert_eq!(history[0].exit_reason, "fully_exited");
    }

    #[tokio::test]
    async fn test_missing_price_skips_tick_without_closing() {
        let f = fixture().await;
        f.monitor.add_trade("SOL", 100.0, 10_000.0, 7.0).await.unwrap();
        // no price set on the provider

        f.monitor.monitor_all().await.unwrap();

        let trade = f.store.active_trade("SOL").await.unwrap().unwrap();
        assert_eq!(trade.remaining_fraction, 1.0);
        assert!(!f.sink.calls().iter().any(|c| c.starts_with("closed")));
    }

    #[tokio::test]
    async fn test_hourly_status_is_idempotent_per_hour() {
        let f = fixture().await;
        let mut trade = Trade::new("SOL", 100.0, 10_000.0, 7.0);
        trade.entry_timestamp = unix_now() - 2.5 * 3600.0;
        f.store.upsert_trade(trade).await.unwrap();
        f.provider.set_price("SOL", 101.0);

        f.monitor.monitor_all().await.unwrap();
        f.monitor.monitor_all().await.unwrap();

        let statuses = f
            .sink
            .calls()
            .iter()
            .filter(|c| c.starts_with("status"))
            .count();
        assert_eq!(statuses, 1);
        let trade = f.store.active_trade("SOL").await.unwrap().unwrap();
        assert_eq!(trade.last_status_hour, 2);
    }

    #[tokio::test]
    async fn test_degradation_alert_does_not_close() {
        let f = fixture().await;
        let mut trade = Trade::new("SOL", 100.0, 10_000.0, 7.0);
        trade.last_score = 70.0;
        f.store.upsert_trade(trade).await.unwrap();
        f.store
            .append_score(ScoreRow {
                symbol: "SOL".into(),
                timestamp: unix_now(),
                composite_score: 45.0,
                classification: "MONITOR".into(),
                signal_scores: BTreeMap::new(),
                metadata: serde_json::Value::Null,
            })
            .await
            .unwrap();
        f.provider.set_price("SOL", 101.0);

        f.monitor.monitor_all().await.unwrap();

        assert!(f.sink.calls().contains(&"degrade:SOL".to_string()));
        let trade = f.store.active_trade("SOL").await.unwrap().unwrap();
        assert_eq!(trade.last_score, 45.0);
    }

    #[tokio::test]
    async fn test_manual_close_uses_live_price() {
        let f = fixture().await;
        f.monitor.add_trade("SOL", 100.0, 10_000.0, 7.0).await.unwrap();
        f.provider.set_price("SOL", 110.0);

        let record = f.monitor.close_trade("SOL", None).await.unwrap().unwrap();
        assert_eq!(record.exit_price, 110.0);
        assert_eq!(record.exit_reason, "manual_close");
        assert!((record.total_pnl - 1000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_manual_stop_adjust() {
        let f = fixture().await;
        f.monitor.add_trade("SOL", 100.0, 10_000.0, 7.0).await.unwrap();
        f.monitor.adjust_stop("SOL", 95.0).await.unwrap();

        let trade = f.store.active_trade("SOL").await.unwrap().unwrap();
        assert_eq!(trade.current_stop_price, 95.0);

        let err = f.monitor.adjust_stop("DOGE", 1.0).await.unwrap_err();
        assert!(matches!(err, Error::TradeNotFound(_)));
    }
}
