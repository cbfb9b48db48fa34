//! Per-exchange data collection and historical bootstrap
//!
//! Every provider call is independent: an exchange that errors or does not
//! support an operation is skipped and the bundle simply lacks that entry.
//! Everything fetched is also appended to the snapshot log, which is what the
//! history-dependent signals read.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::Result;
use crate::market::{DataBundle, MarketDataProvider, OpenInterest, ProviderError, Ticker};
use crate::storage::{unix_now, SnapshotData, SnapshotRow, Store};

pub const BOOTSTRAP_OI_PERIODS: usize = 200;
pub const BOOTSTRAP_FUNDING_PERIODS: usize = 100;
pub const BOOTSTRAP_LS_PERIODS: usize = 100;
pub const BOOTSTRAP_OHLCV_CANDLES: usize = 500;

/// Candles kept per OHLCV snapshot row.
const SNAPSHOT_CANDLE_TAIL: usize = 72;

/// Resolve an exchange's open-interest report to a USD notional.
///
/// Prefers the reported USD value; falls back to base amount times price.
/// Values under 1e6 with a known price are assumed to be base units and get
/// multiplied by price. This is an approximation: a token whose genuine USD
/// open interest is below 1e6 gets inflated here.
pub fn resolve_open_interest(oi: &OpenInterest, price: Option<f64>) -> Option<f64> {
    if let Some(value) = oi.value_usd.filter(|v| *v > 0.0) {
        if value < 1e6 {
            if let Some(p) = price.filter(|p| *p > 0.0) {
                return Some(value * p);
            }
        }
        return Some(value);
    }
    let amount = oi.amount_base.filter(|a| *a > 0.0)?;
    let price = price.filter(|p| *p > 0.0)?;
    Some(amount * price)
}

fn log_skip(err: &ProviderError, symbol: &str, operation: &str) {
    match err {
        ProviderError::Unsupported { exchange, .. } => {
            debug!(symbol, exchange, operation, "unsupported, skipping")
        }
        other => debug!(symbol, operation, error = %other, "fetch failed, skipping"),
    }
}

pub struct Collector {
    provider: Arc<dyn MarketDataProvider>,
    store: Arc<dyn Store>,
    candle_limit: usize,
    orderbook_depth: usize,
}

impl Collector {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        store: Arc<dyn Store>,
        candle_limit: usize,
        orderbook_depth: usize,
    ) -> Self {
        Self {
            provider,
            store,
            candle_limit,
            orderbook_depth,
        }
    }

    /// One scan cycle's worth of data for `symbol` across `exchanges`.
    pub async fn collect(&self, symbol: &str, exchanges: &[String]) -> Result<DataBundle> {
        let timestamp = unix_now();
        let mut bundle = DataBundle {
            symbol: symbol.to_string(),
            timestamp,
            ..DataBundle::default()
        };
        let mut rows: Vec<SnapshotRow> = Vec::new();
        let mut snapshot = |exchange: &str, data: SnapshotData| {
            rows.push(SnapshotRow {
                symbol: symbol.to_string(),
                exchange: exchange.to_string(),
                timestamp,
                data,
            });
        };

        for exchange in exchanges {
            match self
                .provider
                .get_ohlcv(symbol, exchange, "1h", self.candle_limit)
                .await
            {
                Ok(candles) if !candles.is_empty() => {
                    let tail_start = candles.len().saturating_sub(SNAPSHOT_CANDLE_TAIL);
                    snapshot(
                        exchange,
                        SnapshotData::Ohlcv {
                            candles: candles[tail_start..].to_vec(),
                        },
                    );
                    bundle.ohlcv.insert(exchange.clone(), candles);
                }
                Ok(_) => {}
                Err(e) => log_skip(&e, symbol, "ohlcv"),
            }

            match self.provider.get_ticker(symbol, exchange).await {
                Ok(ticker) => {
                    snapshot(exchange, SnapshotData::Ticker(ticker.clone()));
                    bundle.tickers.insert(exchange.clone(), ticker);
                }
                Err(e) => log_skip(&e, symbol, "ticker"),
            }

            match self.provider.get_open_interest(symbol, exchange).await {
                Ok(oi) => {
                    let price = bundle
                        .tickers
                        .get(exchange)
                        .and_then(|t| t.last)
                        .or_else(|| bundle.current_price());
                    if let Some(value_usd) = resolve_open_interest(&oi, price) {
                        snapshot(exchange, SnapshotData::OpenInterest { value_usd });
                        bundle.open_interest.insert(exchange.clone(), value_usd);
                    }
                }
                Err(e) => log_skip(&e, symbol, "open_interest"),
            }

            match self.provider.get_funding_rate(symbol, exchange).await {
                Ok(rate) => {
                    snapshot(exchange, SnapshotData::FundingRate { rate });
                    bundle.funding_rates.insert(exchange.clone(), rate);
                }
                Err(e) => log_skip(&e, symbol, "funding_rate"),
            }

            match self
                .provider
                .get_order_book(symbol, exchange, self.orderbook_depth)
                .await
            {
                Ok(mut book) => {
                    book.bids.truncate(self.orderbook_depth);
                    book.asks.truncate(self.orderbook_depth);
                    if !book.bids.is_empty() && !book.asks.is_empty() {
                        snapshot(exchange, SnapshotData::OrderBook(book.clone()));
                        bundle.orderbooks.insert(exchange.clone(), book);
                    }
                }
                Err(e) => log_skip(&e, symbol, "order_book"),
            }

            match self.provider.get_long_short_ratio(symbol, exchange).await {
                Ok(ratio) => {
                    snapshot(exchange, SnapshotData::LongShortRatio { ratio });
                    bundle.long_short_ratios.insert(exchange.clone(), ratio);
                }
                Err(e) => log_skip(&e, symbol, "long_short_ratio"),
            }
        }

        if !rows.is_empty() {
            self.store.append_snapshots(rows).await?;
        }
        Ok(bundle)
    }

    /// A symbol needs bootstrapping while its stored OI history spans less
    /// than 48 hours.
    pub async fn needs_bootstrap(&self, symbol: &str) -> Result<bool> {
        let snaps = self
            .store
            .snapshots(symbol, crate::storage::SnapshotKind::OpenInterest, 200.0, None)
            .await?;
        let Some(oldest) = snaps
            .iter()
            .map(|s| s.timestamp)
            .min_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        else {
            return Ok(true);
        };
        Ok((unix_now() - oldest) / 3600.0 < 48.0)
    }

    /// Backfill OI, funding, and long/short history plus OHLCV-derived
    /// synthetic ticker snapshots. Serial per exchange; any missing history
    /// endpoint is tolerated.
    pub async fn bootstrap(&self, symbol: &str, exchanges: &[String]) -> Result<()> {
        info!(symbol, "bootstrapping history");

        for exchange in exchanges {
            let current_price = match self.provider.get_ticker(symbol, exchange).await {
                Ok(t) => t.last.filter(|p| *p > 0.0),
                Err(_) => None,
            };

            match self
                .provider
                .get_open_interest_history(symbol, exchange, BOOTSTRAP_OI_PERIODS)
                .await
            {
                Ok(points) => {
                    let rows: Vec<SnapshotRow> = points
                        .iter()
                        .filter(|p| p.timestamp > 0.0)
                        .filter_map(|p| {
                            resolve_open_interest(&p.open_interest, current_price).map(
                                |value_usd| SnapshotRow {
                                    symbol: symbol.to_string(),
                                    exchange: exchange.clone(),
                                    timestamp: p.timestamp,
                                    data: SnapshotData::OpenInterest { value_usd },
                                },
                            )
                        })
                        .collect();
                    if !rows.is_empty() {
                        debug!(symbol, exchange, points = rows.len(), "OI history");
                        self.store.append_snapshots(rows).await?;
                    }
                }
                Err(e) => log_skip(&e, symbol, "open_interest_history"),
            }

            match self
                .provider
                .get_funding_rate_history(symbol, exchange, BOOTSTRAP_FUNDING_PERIODS)
                .await
            {
                Ok(points) => {
                    let rows: Vec<SnapshotRow> = points
                        .iter()
                        .filter(|p| p.timestamp > 0.0)
                        .map(|p| SnapshotRow {
                            symbol: symbol.to_string(),
                            exchange: exchange.clone(),
                            timestamp: p.timestamp,
                            data: SnapshotData::FundingRate {
                                rate: p.funding_rate,
                            },
                        })
                        .collect();
                    if !rows.is_empty() {
                        debug!(symbol, exchange, points = rows.len(), "funding history");
                        self.store.append_snapshots(rows).await?;
                    }
                }
                Err(e) => log_skip(&e, symbol, "funding_rate_history"),
            }

            match self
                .provider
                .get_long_short_ratio_history(symbol, exchange, BOOTSTRAP_LS_PERIODS)
                .await
            {
                Ok(points) => {
                    let rows: Vec<SnapshotRow> = points
                        .iter()
                        .filter(|p| p.timestamp > 0.0)
                        .map(|p| SnapshotRow {
                            symbol: symbol.to_string(),
                            exchange: exchange.clone(),
                            timestamp: p.timestamp,
                            data: SnapshotData::LongShortRatio {
                                ratio: p.long_short_ratio,
                            },
                        })
                        .collect();
                    if !rows.is_empty() {
                        debug!(symbol, exchange, points = rows.len(), "L/S history");
                        self.store.append_snapshots(rows).await?;
                    }
                }
                Err(e) => log_skip(&e, symbol, "long_short_ratio_history"),
            }

            match self
                .provider
                .get_ohlcv(symbol, exchange, "1h", BOOTSTRAP_OHLCV_CANDLES)
                .await
            {
                Ok(candles) if candles.len() > 10 => {
                    let rows: Vec<SnapshotRow> = candles
                        .iter()
                        .map(|c| SnapshotRow {
                            symbol: symbol.to_string(),
                            exchange: exchange.clone(),
                            timestamp: c.timestamp,
                            data: SnapshotData::Ticker(Ticker {
                                last: Some(c.close),
                                high: Some(c.high),
                                low: Some(c.low),
                                volume: Some(c.volume),
                                quote_volume: Some(c.volume * c.close),
                                ..Ticker::default()
                            }),
                        })
                        .collect();
                    debug!(symbol, exchange, points = rows.len(), "synthetic tickers");
                    self.store.append_snapshots(rows).await?;
                }
                Ok(_) => {}
                Err(e) => log_skip(&e, symbol, "ohlcv_bootstrap"),
            }
        }

        info!(symbol, "bootstrap done");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{
        Candle, FundingRatePoint, LongShortPoint, OpenInterestPoint, OrderBook, ProviderResult,
        UniverseCandidate,
    };
    use crate::storage::{MemoryStore, SnapshotKind};
    use async_trait::async_trait;

    /// Provider that serves canned data and marks some operations
    /// unsupported, mirroring a venue with partial coverage.
    #[derive(Default)]
    struct CannedProvider {
        oi_value: Option<f64>,
        oi_amount: Option<f64>,
        ls_unsupported: bool,
    }

    #[async_trait]
    impl MarketDataProvider for CannedProvider {
        async fn get_ohlcv(
            &self,
            _symbol: &str,
            _exchange: &str,
            _timeframe: &str,
            limit: usize,
        ) -> ProviderResult<Vec<Candle>> {
            Ok((0..limit.min(100))
                .map(|i| Candle {
                    timestamp: 1_700_000_000.0 + i as f64 * 3600.0,
                    open: 10.0,
                    high: 10.2,
                    low: 9.8,
                    close: 10.0,
                    volume: 50.0,
                })
                .collect())
        }

        async fn get_ticker(&self, _symbol: &str, _exchange: &str) -> ProviderResult<Ticker> {
            Ok(Ticker {
                last: Some(10.0),
                quote_volume: Some(1e6),
                ..Ticker::default()
            })
        }

        async fn get_open_interest(
            &self,
            _symbol: &str,
            _exchange: &str,
        ) -> ProviderResult<OpenInterest> {
            Ok(OpenInterest {
                value_usd: self.oi_value,
                amount_base: self.oi_amount,
            })
        }

        async fn get_open_interest_history(
            &self,
            _symbol: &str,
            _exchange: &str,
            limit: usize,
        ) -> ProviderResult<Vec<OpenInterestPoint>> {
            Ok((0..limit.min(5))
                .map(|i| OpenInterestPoint {
                    timestamp: 1_700_000_000.0 + i as f64 * 3600.0,
                    open_interest: OpenInterest {
                        value_usd: Some(2e7),
                        amount_base: None,
                    },
                })
                .collect())
        }

        async fn get_funding_rate(&self, _symbol: &str, _exchange: &str) -> ProviderResult<f64> {
            Ok(-0.0005)
        }

        async fn get_funding_rate_history(
            &self,
            _symbol: &str,
            _exchange: &str,
            limit: usize,
        ) -> ProviderResult<Vec<FundingRatePoint>> {
            Ok((0..limit.min(3))
                .map(|i| FundingRatePoint {
                    timestamp: 1_700_000_000.0 + i as f64 * 3600.0,
                    funding_rate: -0.0003,
                })
                .collect())
        }

        async fn get_order_book(
            &self,
            _symbol: &str,
            _exchange: &str,
            _depth: usize,
        ) -> ProviderResult<OrderBook> {
            Ok(OrderBook {
                bids: vec![(9.9, 100.0), (9.8, 50.0)],
                asks: vec![(10.1, 80.0)],
            })
        }

        async fn get_long_short_ratio(&self, _symbol: &str, exchange: &str) -> ProviderResult<f64> {
            if self.ls_unsupported {
                return Err(ProviderError::Unsupported {
                    exchange: exchange.to_string(),
                    operation: "get_long_short_ratio",
                });
            }
            Ok(0.8)
        }

        async fn get_long_short_ratio_history(
            &self,
            _symbol: &str,
            exchange: &str,
            _limit: usize,
        ) -> ProviderResult<Vec<LongShortPoint>> {
            if self.ls_unsupported {
                return Err(ProviderError::Unsupported {
                    exchange: exchange.to_string(),
                    operation: "get_long_short_ratio_history",
                });
            }
            Ok(vec![LongShortPoint {
                timestamp: 1_700_000_000.0,
                long_short_ratio: 0.9,
            }])
        }

        async fn list_universe_candidates(&self) -> ProviderResult<Vec<UniverseCandidate>> {
            Ok(Vec::new())
        }
    }

    fn collector(provider: CannedProvider) -> (Collector, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (
            Collector::new(Arc::new(provider), store.clone(), 100, 50),
            store,
        )
    }

    #[tokio::test]
    async fn test_collect_fills_bundle_and_snapshot_log() {
        let (collector, store) = collector(CannedProvider {
            oi_value: Some(5e7),
            ..CannedProvider::default()
        });
        let exchanges = vec!["binance".to_string(), "bybit".to_string()];
        let bundle = collector.collect("SOL", &exchanges).await.unwrap();

        assert_eq!(bundle.tickers.len(), 2);
        assert_eq!(bundle.open_interest.get("binance"), Some(&5e7));
        assert_eq!(bundle.funding_rates.len(), 2);
        assert_eq!(bundle.orderbooks.len(), 2);
        assert_eq!(bundle.long_short_ratios.len(), 2);

        let ticker_snaps = store
            .snapshots("SOL", SnapshotKind::Ticker, 1.0, None)
            .await
            .unwrap();
        assert_eq!(ticker_snaps.len(), 2);
    }

    #[tokio::test]
    async fn test_unsupported_operation_is_skipped_not_fatal() {
        let (collector, _store) = collector(CannedProvider {
            oi_value: Some(5e7),
            ls_unsupported: true,
            ..CannedProvider::default()
        });
        let exchanges = vec!["kraken".to_string()];
        let bundle = collector.collect("SOL", &exchanges).await.unwrap();
        assert!(bundle.long_short_ratios.is_empty());
        assert_eq!(bundle.tickers.len(), 1);
    }

    #[test]
    fn test_open_interest_base_unit_heuristic() {
        // small value with a known price is treated as base units
        let oi = OpenInterest {
            value_usd: Some(500_000.0),
            amount_base: None,
        };
        assert_eq!(resolve_open_interest(&oi, Some(2.0)), Some(1_000_000.0));

        // large value passes through untouched
        let oi = OpenInterest {
            value_usd: Some(5e7),
            amount_base: None,
        };
        assert_eq!(resolve_open_interest(&oi, Some(2.0)), Some(5e7));

        // amount-only reports need a price
        let oi = OpenInterest {
            value_usd: None,
            amount_base: Some(1000.0),
        };
        assert_eq!(resolve_open_interest(&oi, Some(2.0)), Some(2000.0));
        assert_eq!(resolve_open_interest(&oi, None), None);
    }

    #[tokio::test]
    async fn test_needs_bootstrap_tracks_history_span() {
        let (collector, store) = collector(CannedProvider::default());
        assert!(collector.needs_bootstrap("SOL").await.unwrap());

        // recent-only history still needs a backfill
        store
            .append_snapshots(vec![SnapshotRow {
                symbol: "SOL".into(),
                exchange: "binance".into(),
                timestamp: unix_now() - 3600.0,
                data: SnapshotData::OpenInterest { value_usd: 1e7 },
            }])
            .await
            .unwrap();
        assert!(collector.needs_bootstrap("SOL").await.unwrap());

        // history reaching back 60h is enough
        store
            .append_snapshots(vec![SnapshotRow {
                symbol: "SOL".into(),
                exchange: "binance".into(),
                timestamp: unix_now() - 60.0 * 3600.0,
                data: SnapshotData::OpenInterest { value_usd: 1e7 },
            }])
            .await
            .unwrap();
        assert!(!collector.needs_bootstrap("SOL").await.unwrap());
    }

    #[tokio::test]
    async fn test_bootstrap_backfills_history_and_synthetic_tickers() {
        let (collector, store) = collector(CannedProvider {
            oi_value: Some(5e7),
            ..CannedProvider::default()
        });
        let exchanges = vec!["binance".to_string()];
        collector.bootstrap("SOL", &exchanges).await.unwrap();

        let oi = store
            .snapshots("SOL", SnapshotKind::OpenInterest, 1e6, None)
            .await
            .unwrap();
        assert_eq!(oi.len(), 5);

        let tickers = store
            .snapshots("SOL", SnapshotKind::Ticker, 1e6, None)
            .await
            .unwrap();
        assert_eq!(tickers.len(), 100);
        if let SnapshotData::Ticker(t) = &tickers[0].data {
            assert_eq!(t.quote_volume, Some(500.0));
        } else {
            panic!("expected ticker snapshot");
        }
    }
}
