//! The nine pump-likelihood signal computations
//!
//! Every signal degrades to a zero score with a `reason` in its metadata when
//! its inputs are missing; a scan cycle never fails because one feed is dark.
//! Normalization always goes through the monotonic breakpoint curves in this
//! file, so raising any raw input never lowers a score.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use super::{Signal, SignalName};
use crate::error::Result;
use crate::market::{Candle, DataBundle};
use crate::normalize::{clamp, piecewise_lerp, round_dp, safe_divide};
use crate::storage::{unix_now, SignalRow, SnapshotData, SnapshotKind, Store};

const OI_SURGE_CURVE: &[(f64, f64)] = &[
    (-10.0, 0.0),
    (0.0, 10.0),
    (5.0, 25.0),
    (10.0, 45.0),
    (15.0, 58.0),
    (20.0, 68.0),
    (30.0, 80.0),
    (40.0, 90.0),
    (60.0, 100.0),
];

const FUNDING_POSITIVE_CURVE: &[(f64, f64)] = &[(-0.001, 0.0), (0.0, 5.0)];

const FUNDING_NEGATIVE_CURVE: &[(f64, f64)] = &[
    (0.0, 5.0),
    (0.0003, 20.0),
    (0.0005, 30.0),
    (0.001, 45.0),
    (0.0015, 55.0),
    (0.002, 65.0),
    (0.003, 78.0),
    (0.005, 90.0),
    (0.01, 100.0),
];

const FUNDING_PERSISTENCE_CURVE: &[(f64, f64)] = &[
    (0.0, 0.0),
    (0.3, 20.0),
    (0.5, 45.0),
    (0.7, 70.0),
    (0.85, 90.0),
    (1.0, 100.0),
];

const LIQ_LEVERAGE_CURVE: &[(f64, f64)] = &[
    (0.5, 0.0),
    (1.0, 10.0),
    (2.0, 35.0),
    (3.0, 55.0),
    (5.0, 75.0),
    (8.0, 90.0),
    (12.0, 100.0),
];

const XVOL_DIVERGENCE_CURVE: &[(f64, f64)] = &[
    (1.0, 0.0),
    (1.3, 18.0),
    (1.5, 35.0),
    (2.0, 55.0),
    (3.0, 75.0),
    (4.0, 88.0),
    (6.0, 100.0),
];

const XVOL_SINGLE_CURVE: &[(f64, f64)] = &[
    (0.8, 0.0),
    (1.0, 5.0),
    (1.5, 30.0),
    (2.0, 50.0),
    (3.0, 70.0),
    (5.0, 90.0),
    (8.0, 100.0),
];

const DEPTH_CURVE: &[(f64, f64)] = &[
    (1.0, 0.0),
    (1.15, 15.0),
    (1.3, 30.0),
    (1.5, 50.0),
    (1.8, 65.0),
    (2.0, 75.0),
    (2.5, 88.0),
    (3.0, 95.0),
    (4.0, 100.0),
];

const VPD_CURVE: &[(f64, f64)] = &[
    (0.0, 0.0),
    (10.0, 15.0),
    (20.0, 30.0),
    (35.0, 50.0),
    (50.0, 63.0),
    (75.0, 78.0),
    (100.0, 88.0),
    (150.0, 95.0),
    (200.0, 100.0),
];

const VOLCOMP_CURVE: &[(f64, f64)] = &[
    (0.0, 0.0),
    (30.0, 10.0),
    (50.0, 25.0),
    (65.0, 42.0),
    (75.0, 58.0),
    (85.0, 75.0),
    (92.0, 88.0),
    (97.0, 95.0),
    (100.0, 100.0),
];

const LS_CROWDED_LONG_CURVE: &[(f64, f64)] = &[(1.0, 8.0), (1.1, 3.0), (1.3, 0.0)];

const LS_CROWDED_SHORT_CURVE: &[(f64, f64)] = &[
    (0.5, 100.0),
    (0.6, 90.0),
    (0.7, 75.0),
    (0.8, 55.0),
    (0.85, 42.0),
    (0.9, 30.0),
    (0.95, 18.0),
    (1.0, 8.0),
];

const FSD_CURVE: &[(f64, f64)] = &[
    (0.5, 0.0),
    (1.0, 5.0),
    (1.3, 20.0),
    (1.5, 35.0),
    (2.0, 55.0),
    (2.5, 68.0),
    (3.0, 78.0),
    (4.0, 90.0),
    (6.0, 100.0),
];

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Population standard deviation.
fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// Computes all nine signals from a [`DataBundle`] plus store history, and
/// appends one history row per signal.
pub struct SignalEngine {
    store: Arc<dyn Store>,
}

impl SignalEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn compute_all(
        &self,
        symbol: &str,
        bundle: &DataBundle,
    ) -> Result<BTreeMap<SignalName, Signal>> {
        let mut signals = BTreeMap::new();
        signals.insert(SignalName::OiSurge, self.oi_surge(symbol, bundle).await?);
        signals.insert(
            SignalName::FundingRate,
            self.funding_rate(symbol, bundle).await?,
        );
        signals.insert(
            SignalName::LiquidationLeverage,
            self.liquidation_leverage(bundle),
        );
        signals.insert(
            SignalName::CrossExchangeVolume,
            self.cross_exchange_volume(symbol, bundle).await?,
        );
        signals.insert(SignalName::DepthImbalance, self.depth_imbalance(bundle));
        signals.insert(
            SignalName::VolumePriceDecouple,
            self.volume_price_decouple(bundle),
        );
        signals.insert(
            SignalName::VolatilityCompression,
            self.volatility_compression(bundle),
        );
        signals.insert(
            SignalName::LongShortRatio,
            self.long_short_ratio(symbol, bundle).await?,
        );
        signals.insert(
            SignalName::FuturesSpotDivergence,
            self.futures_spot_divergence(symbol, bundle).await?,
        );

        let timestamp = unix_now();
        let rows: Vec<SignalRow> = signals
            .iter()
            .map(|(name, signal)| SignalRow {
                symbol: symbol.to_string(),
                signal: name.as_str().to_string(),
                timestamp,
                raw_value: signal.raw_value,
                normalized_score: signal.normalized_score,
                metadata: signal.metadata.clone(),
            })
            .collect();
        self.store.append_signals(rows).await?;

        debug!(symbol, signals = signals.len(), "computed signals");
        Ok(signals)
    }

    /// Open-interest growth over 72h, dampened when price already moved.
    async fn oi_surge(&self, symbol: &str, bundle: &DataBundle) -> Result<Signal> {
        let current_oi: BTreeMap<&String, f64> = bundle
            .open_interest
            .iter()
            .filter(|(_, v)| **v > 0.0)
            .map(|(k, v)| (k, *v))
            .collect();
        if current_oi.is_empty() {
            return Ok(Signal::insufficient("no OI"));
        }
        let total_current: f64 = current_oi.values().sum();

        let historical = self
            .store
            .snapshots(symbol, SnapshotKind::OpenInterest, 72.0, None)
            .await?;
        if historical.is_empty() {
            return Ok(Signal::new(
                0.0,
                0.0,
                json!({ "reason": "no hist OI", "current_oi": total_current }),
            ));
        }

        let earliest = historical
            .iter()
            .map(|h| h.timestamp)
            .fold(f64::INFINITY, f64::min);
        // Baseline: per-exchange OI observed within the first hour of the window.
        let mut oldest_oi: BTreeMap<String, f64> = BTreeMap::new();
        for row in &historical {
            if row.timestamp <= earliest + 3600.0 {
                if let SnapshotData::OpenInterest { value_usd } = &row.data {
                    if *value_usd > 0.0 {
                        oldest_oi.insert(row.exchange.clone(), *value_usd);
                    }
                }
            }
        }
        if oldest_oi.is_empty() {
            return Ok(Signal::insufficient("no valid hist OI"));
        }
        let total_old: f64 = oldest_oi.values().sum();
        if total_old == 0.0 {
            return Ok(Signal::insufficient("zero hist OI"));
        }

        let oi_pct = (total_current - total_old) / total_old * 100.0;
        let price_pct = self.price_change(symbol, bundle, 72).await?;
        let dampening = (1.0 - price_pct.abs() / 20.0).max(0.2);
        let effective = oi_pct * dampening;
        let norm = piecewise_lerp(effective, OI_SURGE_CURVE);

        Ok(Signal::new(
            round_dp(oi_pct, 2),
            round_dp(clamp(norm, 0.0, 100.0), 1),
            json!({
                "oi_change_pct": round_dp(oi_pct, 2),
                "price_change_pct": round_dp(price_pct, 2),
                "current_oi": round_dp(total_current, 2),
                "old_oi": round_dp(total_old, 2),
                "history_hours": round_dp((unix_now() - earliest) / 3600.0, 1),
                "exchanges_with_oi": current_oi.keys().collect::<Vec<_>>(),
            }),
        ))
    }

    /// Negative funding magnitude blended with how persistently funding has
    /// been negative over 72h.
    async fn funding_rate(&self, symbol: &str, bundle: &DataBundle) -> Result<Signal> {
        if bundle.funding_rates.is_empty() {
            return Ok(Signal::insufficient("no funding"));
        }
        let rates: Vec<f64> = bundle.funding_rates.values().copied().collect();
        let current = mean(&rates);

        let hist = self
            .store
            .snapshots(symbol, SnapshotKind::FundingRate, 72.0, None)
            .await?;
        let mut negative = 0usize;
        let mut total = 0usize;
        for row in &hist {
            if let SnapshotData::FundingRate { rate } = &row.data {
                total += 1;
                if *rate < -0.0001 {
                    negative += 1;
                }
            }
        }
        let persistence = safe_divide(negative as f64, total.max(1) as f64, 0.0);

        let magnitude = if current >= 0.0 {
            piecewise_lerp(-current, FUNDING_POSITIVE_CURVE)
        } else {
            piecewise_lerp(current.abs(), FUNDING_NEGATIVE_CURVE)
        };
        let persistence_score = piecewise_lerp(persistence, FUNDING_PERSISTENCE_CURVE);
        let norm = magnitude * 0.55 + persistence_score * 0.45;

        Ok(Signal::new(
            round_dp(current, 6),
            round_dp(clamp(norm, 0.0, 100.0), 1),
            json!({
                "current_rate": round_dp(current, 6),
                "current_rate_pct": format!("{:.4}%", current * 100.0),
                "negative_periods": negative,
                "total_periods": total,
                "persistence_ratio": round_dp(persistence, 2),
                "exchanges": bundle.funding_rates.keys().collect::<Vec<_>>(),
            }),
        ))
    }

    /// Estimated short liquidation notional within +15% vs the ask-side
    /// resistance in the same band.
    fn liquidation_leverage(&self, bundle: &DataBundle) -> Signal {
        let Some(price) = bundle.current_price() else {
            return Signal::insufficient("no price");
        };
        let total_oi: f64 = bundle.open_interest.values().filter(|v| **v > 0.0).sum();
        if total_oi == 0.0 {
            return Signal::insufficient("no OI");
        }

        let short_fraction = if bundle.long_short_ratios.is_empty() {
            0.5
        } else {
            let ratios: Vec<f64> = bundle.long_short_ratios.values().copied().collect();
            safe_divide(1.0, 1.0 + mean(&ratios), 0.5)
        };
        let short_oi = total_oi * short_fraction;
        // Rough cap: ~8x average leverage implies most shorts liquidate within
        // a 15% move, bounded at 80% of the short book.
        let liq_within_15 = short_oi * (0.15_f64 / (1.0 / 8.0)).min(0.8);

        let ask_resistance: f64 = bundle
            .orderbooks
            .values()
            .flat_map(|ob| ob.asks.iter())
            .filter(|(p, _)| *p <= price * 1.15)
            .map(|(p, a)| p * a)
            .sum();
        let ratio = if ask_resistance > 0.0 {
            safe_divide(liq_within_15, ask_resistance, 3.0)
        } else {
            3.0
        };
        let norm = piecewise_lerp(ratio, LIQ_LEVERAGE_CURVE);

        Signal::new(
            round_dp(ratio, 2),
            round_dp(clamp(norm, 0.0, 100.0), 1),
            json!({
                "leverage_ratio": round_dp(ratio, 2),
                "estimated_liq_within_15pct": round_dp(liq_within_15, 2),
                "ask_resistance_15pct": round_dp(ask_resistance, 2),
                "short_fraction": round_dp(short_fraction, 2),
            }),
        )
    }

    /// Divergence of the busiest exchange's volume from the cross-exchange
    /// median; falls back to a vs-history ratio when only one exchange reports.
    async fn cross_exchange_volume(&self, symbol: &str, bundle: &DataBundle) -> Result<Signal> {
        let volumes: BTreeMap<&String, f64> = bundle
            .tickers
            .iter()
            .map(|(ex, t)| (ex, t.any_volume()))
            .filter(|(_, v)| *v > 0.0)
            .collect();

        if volumes.len() < 2 {
            if volumes.len() == 1 {
                let (exchange, current) = volumes.into_iter().next().unwrap_or((&bundle.symbol, 0.0));
                return self.single_exchange_volume(symbol, exchange, current).await;
            }
            return Ok(Signal::insufficient("need 2+ exchanges"));
        }

        let values: Vec<f64> = volumes.values().copied().collect();
        let med = median(&values);
        if med <= 0.0 {
            return Ok(Signal::insufficient("zero median"));
        }
        let max_vol = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let divergence = max_vol / med;
        let norm = piecewise_lerp(divergence, XVOL_DIVERGENCE_CURVE);

        let max_exchange = volumes
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(ex, _)| ex.as_str())
            .unwrap_or("");

        Ok(Signal::new(
            round_dp(divergence, 2),
            round_dp(clamp(norm, 0.0, 100.0), 1),
            json!({
                "divergence_ratio": round_dp(divergence, 2),
                "max_volume_exchange": max_exchange,
                "volumes": volumes
                    .iter()
                    .map(|(ex, v)| (ex.to_string(), round_dp(*v, 2)))
                    .collect::<BTreeMap<String, f64>>(),
            }),
        ))
    }

    async fn single_exchange_volume(
        &self,
        symbol: &str,
        exchange: &str,
        current: f64,
    ) -> Result<Signal> {
        let hist = self
            .store
            .snapshots(symbol, SnapshotKind::Ticker, 72.0, None)
            .await?;
        if hist.len() < 5 {
            return Ok(Signal::insufficient("no hist"));
        }
        let hist_volumes: Vec<f64> = hist
            .iter()
            .filter_map(|row| match &row.data {
                SnapshotData::Ticker(t) => Some(t.any_volume()),
                _ => None,
            })
            .filter(|v| *v > 0.0)
            .collect();
        if hist_volumes.is_empty() {
            return Ok(Signal::insufficient("no hist vol"));
        }
        let avg = mean(&hist_volumes);
        if avg == 0.0 {
            return Ok(Signal::insufficient("zero avg"));
        }
        let ratio = current / avg;
        let norm = piecewise_lerp(ratio, XVOL_SINGLE_CURVE);
        Ok(Signal::new(
            round_dp(ratio, 2),
            round_dp(clamp(norm, 0.0, 100.0), 1),
            json!({
                "volume_vs_avg": round_dp(ratio, 2),
                "single_exchange": exchange,
            }),
        ))
    }

    /// Bid-side vs ask-side notional over the merged books. Ask-heavy books
    /// score zero.
    fn depth_imbalance(&self, bundle: &DataBundle) -> Signal {
        let bid_value: f64 = bundle.orderbooks.values().map(|ob| ob.bid_value()).sum();
        let ask_value: f64 = bundle.orderbooks.values().map(|ob| ob.ask_value()).sum();
        if ask_value == 0.0 {
            return Signal::insufficient("no asks");
        }
        let ratio = safe_divide(bid_value, ask_value, 1.0);
        let norm = if ratio >= 1.0 {
            piecewise_lerp(ratio, DEPTH_CURVE)
        } else {
            0.0
        };
        Signal::new(
            round_dp(ratio, 3),
            round_dp(clamp(norm, 0.0, 100.0), 1),
            json!({
                "imbalance_ratio": round_dp(ratio, 3),
                "total_bid_value": round_dp(bid_value, 2),
                "total_ask_value": round_dp(ask_value, 2),
            }),
        )
    }

    /// Volume expansion discounted by how much price already moved with it.
    fn volume_price_decouple(&self, bundle: &DataBundle) -> Signal {
        let candles: &[Candle] = bundle
            .ohlcv
            .values()
            .map(|c| c.as_slice())
            .find(|c| c.len() >= 20)
            .unwrap_or(&[]);
        if candles.len() < 20 {
            return Signal::insufficient("no OHLCV");
        }

        let (recent, previous) = if candles.len() >= 48 {
            (
                &candles[candles.len() - 24..],
                &candles[candles.len() - 48..candles.len() - 24],
            )
        } else {
            let half = candles.len() / 2;
            (&candles[half..], &candles[..half])
        };

        let recent_vol: f64 = recent.iter().map(|c| c.volume).sum();
        let previous_vol: f64 = previous.iter().map(|c| c.volume).sum();
        if previous_vol == 0.0 {
            return Signal::insufficient("zero prev vol");
        }

        let volume_change = (recent_vol - previous_vol) / previous_vol * 100.0;
        let price_change = if recent[0].open != 0.0 {
            ((recent[recent.len() - 1].close - recent[0].open) / recent[0].open * 100.0).abs()
        } else {
            0.0
        };
        let raw = if volume_change > 0.0 {
            (volume_change * (1.0 - price_change / 12.0).max(0.15)).max(0.0)
        } else {
            0.0
        };
        let norm = piecewise_lerp(raw, VPD_CURVE);

        Signal::new(
            round_dp(raw, 2),
            round_dp(clamp(norm, 0.0, 100.0), 1),
            json!({
                "volume_change_pct": round_dp(volume_change, 2),
                "price_change_pct": round_dp(price_change, 2),
            }),
        )
    }

    /// Bollinger band width percentile: the more compressed the current band
    /// vs its own history, the higher the score. ATR(14) rides along in the
    /// metadata for the levels calculator.
    fn volatility_compression(&self, bundle: &DataBundle) -> Signal {
        let candles = bundle.longest_candles();
        if candles.len() < 30 {
            return Signal::new(
                0.0,
                0.0,
                json!({ "reason": "no data", "candles": candles.len() }),
            );
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let mut bb_widths = Vec::new();
        for i in 20..closes.len() {
            let window = &closes[i - 20..i];
            let m = mean(window);
            if m > 0.0 {
                bb_widths.push(2.0 * std_dev(window) / m);
            }
        }
        if bb_widths.len() < 5 {
            return Signal::insufficient("no BB data");
        }

        let current_width = bb_widths[bb_widths.len() - 1];
        let percentile =
            bb_widths.iter().filter(|w| **w > current_width).count() as f64 / bb_widths.len() as f64
                * 100.0;

        let mut true_ranges = Vec::with_capacity(candles.len() - 1);
        for i in 1..candles.len() {
            let tr = (candles[i].high - candles[i].low)
                .max((candles[i].high - candles[i - 1].close).abs())
                .max((candles[i].low - candles[i - 1].close).abs());
            true_ranges.push(tr);
        }
        let atr = if true_ranges.len() >= 14 {
            mean(&true_ranges[true_ranges.len() - 14..])
        } else {
            mean(&true_ranges)
        };
        let last_close = closes[closes.len() - 1];
        let atr_pct = if last_close > 0.0 {
            atr / last_close * 100.0
        } else {
            0.0
        };

        let norm = piecewise_lerp(percentile, VOLCOMP_CURVE);

        Signal::new(
            round_dp(current_width, 6),
            round_dp(clamp(norm, 0.0, 100.0), 1),
            json!({
                "bb_width": round_dp(current_width, 6),
                "bb_percentile": round_dp(percentile, 1),
                "atr": round_dp(atr, 6),
                "atr_pct": round_dp(atr_pct, 4),
                "candles_used": closes.len(),
            }),
        )
    }

    /// Crowded-short positioning scores high; crowded-long scores near zero.
    async fn long_short_ratio(&self, symbol: &str, bundle: &DataBundle) -> Result<Signal> {
        let mut ratios: BTreeMap<String, f64> = bundle
            .long_short_ratios
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        if ratios.is_empty() {
            let hist = self
                .store
                .snapshots(symbol, SnapshotKind::LongShortRatio, 24.0, None)
                .await?;
            if let Some(row) = hist.last() {
                if let SnapshotData::LongShortRatio { ratio } = &row.data {
                    if *ratio != 0.0 {
                        ratios.insert("historical".to_string(), *ratio);
                    }
                }
            }
        }
        if ratios.is_empty() {
            return Ok(Signal::insufficient("no L/S"));
        }

        let values: Vec<f64> = ratios.values().copied().collect();
        let avg = mean(&values);
        let norm = if avg >= 1.0 {
            piecewise_lerp(avg, LS_CROWDED_LONG_CURVE)
        } else {
            piecewise_lerp(avg, LS_CROWDED_SHORT_CURVE)
        };

        Ok(Signal::new(
            round_dp(avg, 4),
            round_dp(clamp(norm, 0.0, 100.0), 1),
            json!({
                "avg_ls_ratio": round_dp(avg, 4),
                "per_exchange": ratios
                    .iter()
                    .map(|(k, v)| (k.clone(), round_dp(*v, 4)))
                    .collect::<BTreeMap<String, f64>>(),
            }),
        ))
    }

    /// Aggregate current quote volume vs its own 72h mean.
    async fn futures_spot_divergence(&self, symbol: &str, bundle: &DataBundle) -> Result<Signal> {
        if bundle.tickers.is_empty() {
            return Ok(Signal::insufficient("no tickers"));
        }
        let total_volume: f64 = bundle
            .tickers
            .values()
            .map(|t| t.quote_volume.unwrap_or(0.0))
            .sum();

        let hist = self
            .store
            .snapshots(symbol, SnapshotKind::Ticker, 72.0, None)
            .await?;
        if hist.len() < 5 {
            return Ok(Signal::new(
                0.0,
                0.0,
                json!({ "reason": "no hist", "current_volume": total_volume }),
            ));
        }
        let hist_volumes: Vec<f64> = hist
            .iter()
            .filter_map(|row| match &row.data {
                SnapshotData::Ticker(t) => Some(t.any_volume()),
                _ => None,
            })
            .filter(|v| *v > 0.0)
            .collect();
        if hist_volumes.is_empty() {
            return Ok(Signal::insufficient("no hist vol"));
        }
        let avg = mean(&hist_volumes);
        if avg == 0.0 {
            return Ok(Signal::insufficient("zero avg"));
        }

        let ratio = total_volume / avg;
        let norm = piecewise_lerp(ratio, FSD_CURVE);

        Ok(Signal::new(
            round_dp(ratio, 2),
            round_dp(clamp(norm, 0.0, 100.0), 1),
            json!({
                "volume_ratio": round_dp(ratio, 2),
                "current_volume": round_dp(total_volume, 2),
                "avg_volume": round_dp(avg, 2),
            }),
        ))
    }

    /// Price change % over roughly `hours` using the bundle's candles,
    /// falling back to the oldest ticker snapshot with a price.
    pub async fn price_change(
        &self,
        symbol: &str,
        bundle: &DataBundle,
        hours: usize,
    ) -> Result<f64> {
        let Some(current) = bundle.current_price() else {
            return Ok(0.0);
        };
        for candles in bundle.ohlcv.values() {
            if candles.len() >= hours {
                let old = candles[candles.len() - hours].close;
                if old > 0.0 {
                    return Ok((current - old) / old * 100.0);
                }
            } else if candles.len() > 1 {
                let old = candles[0].close;
                if old > 0.0 {
                    return Ok((current - old) / old * 100.0);
                }
            }
        }
        let hist = self
            .store
            .snapshots(symbol, SnapshotKind::Ticker, hours as f64, None)
            .await?;
        for row in &hist {
            if let SnapshotData::Ticker(t) = &row.data {
                if let Some(old) = t.last {
                    if old > 0.0 {
                        return Ok((current - old) / old * 100.0);
                    }
                }
            }
        }
        Ok(0.0)
    }
}
