//! Market data types and the provider boundary
//!
//! Raw exchange connectivity lives behind [`MarketDataProvider`]. Every call
//! targets one (symbol, exchange) pair and may fail independently; the rest
//! of the crate tolerates any subset of exchanges responding. Operations an
//! exchange simply does not offer return [`ProviderError::Unsupported`]
//! rather than being probed for at runtime.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// One OHLCV candle. Timestamps are unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Ticker snapshot. Exchanges differ in which fields they populate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub last: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    /// Base-asset volume.
    pub volume: Option<f64>,
    pub quote_volume: Option<f64>,
    pub change_pct: Option<f64>,
}

impl Ticker {
    /// Quote volume, falling back to base volume when the exchange reports
    /// only one of the two.
    pub fn any_volume(&self) -> f64 {
        self.quote_volume.or(self.volume).unwrap_or(0.0)
    }
}

/// Order book sides as `(price, amount)` levels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
}

impl OrderBook {
    /// Total notional value on the bid side.
    pub fn bid_value(&self) -> f64 {
        self.bids.iter().map(|(p, a)| p * a).sum()
    }

    /// Total notional value on the ask side.
    pub fn ask_value(&self) -> f64 {
        self.asks.iter().map(|(p, a)| p * a).sum()
    }
}

/// Open interest as reported by an exchange. Some venues report a USD
/// notional, some a base-asset amount, some both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenInterest {
    pub value_usd: Option<f64>,
    pub amount_base: Option<f64>,
}

/// A timestamped open-interest observation (bootstrap backfill).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpenInterestPoint {
    pub timestamp: f64,
    pub open_interest: OpenInterest,
}

/// A timestamped funding-rate observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FundingRatePoint {
    pub timestamp: f64,
    pub funding_rate: f64,
}

/// A timestamped long/short-ratio observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LongShortPoint {
    pub timestamp: f64,
    pub long_short_ratio: f64,
}

/// One market listing reported by `list_universe_candidates`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseCandidate {
    /// Normalized base symbol (e.g. "SOL", not "SOL/USDT:USDT").
    pub symbol: String,
    pub exchange: String,
    pub futures: bool,
    pub spot: bool,
}

/// Everything collected for one token in one scan cycle, keyed by exchange.
///
/// Produced fresh each cycle and never mutated afterwards. `BTreeMap` keeps
/// exchange iteration deterministic, which matters for the "first exchange
/// with enough candles" style fallbacks in the signal engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataBundle {
    pub symbol: String,
    pub timestamp: f64,
    pub ohlcv: BTreeMap<String, Vec<Candle>>,
    pub tickers: BTreeMap<String, Ticker>,
    /// USD notional per exchange.
    pub open_interest: BTreeMap<String, f64>,
    pub funding_rates: BTreeMap<String, f64>,
    pub orderbooks: BTreeMap<String, OrderBook>,
    pub long_short_ratios: BTreeMap<String, f64>,
}

impl DataBundle {
    /// True when no exchange produced anything worth scanning.
    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty() && self.open_interest.is_empty() && self.ohlcv.is_empty()
    }

    /// Best-effort current price: first ticker with a positive last price,
    /// falling back to the close of the last candle on any exchange.
    pub fn current_price(&self) -> Option<f64> {
        for ticker in self.tickers.values() {
            if let Some(last) = ticker.last {
                if last > 0.0 {
                    return Some(last);
                }
            }
        }
        for candles in self.ohlcv.values() {
            if let Some(candle) = candles.last() {
                if candle.close > 0.0 {
                    return Some(candle.close);
                }
            }
        }
        None
    }

    /// Longest candle series across exchanges.
    pub fn longest_candles(&self) -> &[Candle] {
        self.ohlcv
            .values()
            .max_by_key(|c| c.len())
            .map(|c| c.as_slice())
            .unwrap_or(&[])
    }

    /// Merge all order books, bids sorted descending and asks ascending by
    /// price.
    pub fn merged_orderbook(&self) -> OrderBook {
        let mut merged = OrderBook::default();
        for ob in self.orderbooks.values() {
            merged.bids.extend_from_slice(&ob.bids);
            merged.asks.extend_from_slice(&ob.asks);
        }
        merged
            .bids
            .sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        merged
            .asks
            .sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        merged
    }
}

/// Errors from the provider boundary.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The exchange does not offer this operation at all. Callers skip the
    /// exchange instead of retrying.
    #[error("{exchange} does not support {operation}")]
    Unsupported {
        exchange: String,
        operation: &'static str,
    },

    #[error("{exchange}: {message}")]
    Exchange { exchange: String, message: String },

    #[error("{exchange}: timed out after {millis}ms")]
    Timeout { exchange: String, millis: u64 },

    #[error("no data for {symbol} on {exchange}")]
    NoData { symbol: String, exchange: String },
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Boundary to exchange connectivity.
///
/// Implementations own rate limiting and must impose per-call timeouts; a
/// hung call blocks only its own token's scan task.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn get_ohlcv(
        &self,
        symbol: &str,
        exchange: &str,
        timeframe: &str,
        limit: usize,
    ) -> ProviderResult<Vec<Candle>>;

    async fn get_ticker(&self, symbol: &str, exchange: &str) -> ProviderResult<Ticker>;

    async fn get_open_interest(&self, symbol: &str, exchange: &str)
        -> ProviderResult<OpenInterest>;

    async fn get_open_interest_history(
        &self,
        symbol: &str,
        exchange: &str,
        limit: usize,
    ) -> ProviderResult<Vec<OpenInterestPoint>>;

    async fn get_funding_rate(&self, symbol: &str, exchange: &str) -> ProviderResult<f64>;

    async fn get_funding_rate_history(
        &self,
        symbol: &str,
        exchange: &str,
        limit: usize,
    ) -> ProviderResult<Vec<FundingRatePoint>>;

    async fn get_order_book(
        &self,
        symbol: &str,
        exchange: &str,
        depth: usize,
    ) -> ProviderResult<OrderBook>;

    async fn get_long_short_ratio(&self, symbol: &str, exchange: &str) -> ProviderResult<f64>;

    async fn get_long_short_ratio_history(
        &self,
        symbol: &str,
        exchange: &str,
        limit: usize,
    ) -> ProviderResult<Vec<LongShortPoint>>;

    /// Enumerate listed markets across all configured exchanges.
    async fn list_universe_candidates(&self) -> ProviderResult<Vec<UniverseCandidate>>;
}

/// Provider used by the CLI when no exchange adapter is wired in. Every call
/// reports `Unsupported`, so scans complete (with an empty universe) and the
/// store-backed commands keep working.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProvider;

impl NullProvider {
    fn unsupported<T>(exchange: &str, operation: &'static str) -> ProviderResult<T> {
        Err(ProviderError::Unsupported {
            exchange: exchange.to_string(),
            operation,
        })
    }
}

#[async_trait]
impl MarketDataProvider for NullProvider {
    async fn get_ohlcv(
        &self,
        _symbol: &str,
        exchange: &str,
        _timeframe: &str,
        _limit: usize,
    ) -> ProviderResult<Vec<Candle>> {
        Self::unsupported(exchange, "get_ohlcv")
    }

    async fn get_ticker(&self, _symbol: &str, exchange: &str) -> ProviderResult<Ticker> {
        Self::unsupported(exchange, "get_ticker")
    }

    async fn get_open_interest(
        &self,
        _symbol: &str,
        exchange: &str,
    ) -> ProviderResult<OpenInterest> {
        Self::unsupported(exchange, "get_open_interest")
    }

    async fn get_open_interest_history(
        &self,
        _symbol: &str,
        exchange: &str,
        _limit: usize,
    ) -> ProviderResult<Vec<OpenInterestPoint>> {
        Self::unsupported(exchange, "get_open_interest_history")
    }

    async fn get_funding_rate(&self, _symbol: &str, exchange: &str) -> ProviderResult<f64> {
        Self::unsupported(exchange, "get_funding_rate")
    }

    async fn get_funding_rate_history(
        &self,
        _symbol: &str,
        exchange: &str,
        _limit: usize,
    ) -> ProviderResult<Vec<FundingRatePoint>> {
        Self::unsupported(exchange, "get_funding_rate_history")
    }

    async fn get_order_book(
        &self,
        _symbol: &str,
        exchange: &str,
        _depth: usize,
    ) -> ProviderResult<OrderBook> {
        Self::unsupported(exchange, "get_order_book")
    }

    async fn get_long_short_ratio(&self, _symbol: &str, exchange: &str) -> ProviderResult<f64> {
        Self::unsupported(exchange, "get_long_short_ratio")
    }

    async fn get_long_short_ratio_history(
        &self,
        _symbol: &str,
        exchange: &str,
        _limit: usize,
    ) -> ProviderResult<Vec<LongShortPoint>> {
        Self::unsupported(exchange, "get_long_short_ratio_history")
    }

    async fn list_universe_candidates(&self) -> ProviderResult<Vec<UniverseCandidate>> {
        Ok(Vec::new())
    }
}

/// Strip quote/contract suffixes from an exchange market symbol.
pub fn normalize_symbol(symbol: &str) -> String {
    let mut s = symbol.trim().to_uppercase();
    for suffix in [
        "/USDT:USDT",
        "/USDT",
        "USDT",
        "/USD:USD",
        "/USD",
        "-USDT",
        "_USDT",
        "PERP",
        "-PERP",
        "_PERP",
    ] {
        if let Some(stripped) = s.strip_suffix(suffix) {
            s = stripped.to_string();
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(normalize_symbol("sol/usdt:usdt"), "SOL");
        assert_eq!(normalize_symbol("BTC/USDT"), "BTC");
        assert_eq!(normalize_symbol("ETH-PERP"), "ETH");
        assert_eq!(normalize_symbol("DOGE"), "DOGE");
    }

    #[test]
    fn test_bundle_current_price_prefers_ticker() {
        let mut bundle = DataBundle::default();
        bundle.ohlcv.insert(
            "bybit".into(),
            vec![Candle {
                timestamp: 0.0,
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 2.0,
                volume: 1.0,
            }],
        );
        assert_eq!(bundle.current_price(), Some(2.0));

        bundle.tickers.insert(
            "binance".into(),
            Ticker {
                last: Some(3.0),
                ..Ticker::default()
            },
        );
        assert_eq!(bundle.current_price(), Some(3.0));
    }

    #[test]
    fn test_merged_orderbook_sorting() {
        let mut bundle = DataBundle::default();
        bundle.orderbooks.insert(
            "a".into(),
            OrderBook {
                bids: vec![(9.0, 1.0), (8.0, 1.0)],
                asks: vec![(11.0, 1.0)],
            },
        );
        bundle.orderbooks.insert(
            "b".into(),
            OrderBook {
                bids: vec![(9.5, 1.0)],
                asks: vec![(10.5, 1.0), (12.0, 1.0)],
            },
        );
        let merged = bundle.merged_orderbook();
        assert_eq!(merged.bids[0].0, 9.5);
        assert_eq!(merged.asks[0].0, 10.5);
    }

    #[tokio::test]
    async fn test_null_provider_is_typed_unsupported() {
        let provider = NullProvider;
        let err = provider.get_ticker("SOL", "binance").await.unwrap_err();
        assert!(matches!(err, ProviderError::Unsupported { .. }));
        assert!(provider
            .list_universe_candidates()
            .await
            .unwrap()
            .is_empty());
    }
}
