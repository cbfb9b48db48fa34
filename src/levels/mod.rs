//! Entry, stop, take-profit, and trailing-stop levels
//!
//! Pure calculator over one cycle's bundle, the computed signals, and the
//! score. Blends three stop methods (ATR, swing low, bid-cluster support) and
//! substitutes ask walls for ATR take-profit targets when a wall sits in the
//! substitution window. Never errors: an unusable price yields an
//! [`LevelsResult::unavailable`] result with the reason attached.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::market::{Candle, DataBundle, OrderBook};
use crate::normalize::round_dp;
use crate::scoring::{Classification, ScoreResult};
use crate::signals::{Signal, SignalName};

pub const MIN_STOP_PCT: f64 = 2.5;
pub const MAX_STOP_PCT: f64 = 15.0;
pub const MIN_TP1_PCT: f64 = 5.0;
pub const MIN_RR_RATIO: f64 = 1.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryZone {
    pub low: f64,
    pub high: f64,
    pub ideal: f64,
    pub method: String,
    pub urgency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopLevel {
    pub price: f64,
    pub pct: f64,
    pub method: String,
    pub methods_considered: Vec<String>,
    pub atr_distance: f64,
    pub swing_low_stop: Option<f64>,
    pub ob_support_stop: Option<f64>,
    pub atr_stop: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeProfit {
    pub level: u8,
    pub price: f64,
    pub pct: f64,
    pub sell_pct: f64,
    pub method: String,
    pub atr_multiple: f64,
    /// Notional of the ask wall that set this target, for resistance targets.
    pub wall_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailingStop {
    pub sell_pct: f64,
    pub trail_distance: f64,
    pub trail_pct: f64,
    pub trail_atr_multiple: f64,
    pub activation: String,
    pub method: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskReward {
    pub ratio: f64,
    pub risk_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AtrInfo {
    pub value: f64,
    pub pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQuality {
    pub score: u32,
    pub label: String,
    pub candles: usize,
    pub orderbook_depth: usize,
    pub has_atr: bool,
    pub has_liq_data: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelsResult {
    pub symbol: String,
    pub price: f64,
    pub entry: EntryZone,
    pub stop: StopLevel,
    pub take_profits: Vec<TakeProfit>,
    pub trailing: Option<TrailingStop>,
    pub risk_reward: RiskReward,
    pub atr: AtrInfo,
    pub data_quality: DataQuality,
    /// Set when levels could not be computed; all other fields are zeroed.
    pub unavailable_reason: Option<String>,
}

impl LevelsResult {
    pub fn unavailable(symbol: &str, reason: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            price: 0.0,
            entry: EntryZone {
                low: 0.0,
                high: 0.0,
                ideal: 0.0,
                method: "none".into(),
                urgency: "none".into(),
            },
            stop: StopLevel {
                price: 0.0,
                pct: 0.0,
                method: "none".into(),
                methods_considered: Vec::new(),
                atr_distance: 0.0,
                swing_low_stop: None,
                ob_support_stop: None,
                atr_stop: 0.0,
            },
            take_profits: Vec::new(),
            trailing: None,
            risk_reward: RiskReward {
                ratio: 0.0,
                risk_pct: 0.0,
            },
            atr: AtrInfo {
                value: 0.0,
                pct: 0.0,
            },
            data_quality: DataQuality {
                score: 0,
                label: "NONE".into(),
                candles: 0,
                orderbook_depth: 0,
                has_atr: false,
                has_liq_data: false,
            },
            unavailable_reason: Some(reason.to_string()),
        }
    }
}

/// Position size for risking `risk_fraction` of `account_usd` with a stop
/// `stop_pct` below entry.
pub fn position_for_risk(account_usd: f64, risk_fraction: f64, stop_pct: f64) -> f64 {
    if stop_pct <= 0.0 {
        return 0.0;
    }
    account_usd * risk_fraction / (stop_pct / 100.0)
}

#[derive(Debug, Clone, Copy)]
struct Wall {
    price: f64,
    value: f64,
}

#[derive(Default)]
struct Bucket {
    price_sum: f64,
    value: f64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LevelsCalculator;

impl LevelsCalculator {
    pub fn new() -> Self {
        Self
    }

    pub fn compute(
        &self,
        symbol: &str,
        price: f64,
        bundle: &DataBundle,
        signals: &BTreeMap<SignalName, Signal>,
        score_result: &ScoreResult,
    ) -> LevelsResult {
        if price <= 0.0 {
            return LevelsResult::unavailable(symbol, "no price");
        }

        let score = score_result.composite_score;
        let classification = score_result.classification;
        let atr = Self::atr_from_signals(signals, price);
        let atr_pct = atr / price * 100.0;
        let candles = bundle.longest_candles();
        let orderbook = bundle.merged_orderbook();
        let leverage_ratio = Self::leverage_ratio(signals);

        let stop = self.stop(price, atr, candles, &orderbook, score);
        let entry = self.entry(price, atr_pct, candles, classification);
        let take_profits =
            self.take_profits(price, atr, &orderbook, leverage_ratio, score, &stop);
        let trailing = self.trailing(price, atr, score);
        let risk_reward = self.risk_reward(&entry, &stop, &take_profits);
        let data_quality = self.quality(candles, &orderbook, signals);

        LevelsResult {
            symbol: symbol.to_string(),
            price,
            entry,
            stop,
            take_profits,
            trailing: Some(trailing),
            risk_reward,
            atr: AtrInfo {
                value: round_dp(atr, 8),
                pct: round_dp(atr_pct, 2),
            },
            data_quality,
            unavailable_reason: None,
        }
    }

    fn stop(
        &self,
        price: f64,
        atr: f64,
        candles: &[Candle],
        orderbook: &OrderBook,
        score: f64,
    ) -> StopLevel {
        let mut methods = Vec::new();
        let mut candidates: Vec<(&'static str, f64, f64)> = Vec::new();

        // Higher conviction tolerates a tighter ATR stop.
        let mult = if score >= 78.0 {
            1.5
        } else if score >= 62.0 {
            2.0
        } else {
            2.5
        };
        let atr_stop = price - atr * mult;
        let atr_stop_pct = (price - atr_stop) / price * 100.0;
        candidates.push(("atr", atr_stop, atr_stop_pct));
        methods.push(format!("ATR*{mult}"));

        let mut swing_stop = None;
        if candles.len() >= 12 {
            let lookback = candles.len().min(24);
            let low = candles[candles.len() - lookback..]
                .iter()
                .map(|c| c.low)
                .filter(|l| *l > 0.0)
                .fold(f64::INFINITY, f64::min);
            if low.is_finite() {
                let stop = low * 0.995;
                let pct = (price - stop) / price * 100.0;
                swing_stop = Some(stop);
                if (MIN_STOP_PCT..=MAX_STOP_PCT).contains(&pct) {
                    candidates.push(("swing_low", stop, pct));
                    methods.push(format!("Swing ${low:.6}"));
                }
            }
        }

        let mut ob_stop = None;
        if let Some(support) = Self::bid_cluster(&orderbook.bids, price, 10.0) {
            let stop = support * 0.997;
            let pct = (price - stop) / price * 100.0;
            ob_stop = Some(stop);
            if (MIN_STOP_PCT..=MAX_STOP_PCT).contains(&pct) {
                candidates.push(("support", stop, pct));
                methods.push(format!("OB ${support:.6}"));
            }
        }

        // Tightest candidate at least 1x ATR below price wins.
        let min_distance = atr;
        let best = candidates
            .iter()
            .filter(|(_, stop, pct)| price - stop >= min_distance && *pct >= MIN_STOP_PCT)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .copied()
            .unwrap_or(("atr", atr_stop, atr_stop_pct));

        let clamped = (price * (1.0 - MAX_STOP_PCT / 100.0))
            .max((price * (1.0 - MIN_STOP_PCT / 100.0)).min(best.1));
        let final_pct = (price - clamped) / price * 100.0;

        StopLevel {
            price: round_dp(clamped, 8),
            pct: round_dp(final_pct, 2),
            method: best.0.to_string(),
            methods_considered: methods,
            atr_distance: if atr > 0.0 {
                round_dp((price - clamped) / atr, 1)
            } else {
                0.0
            },
            swing_low_stop: swing_stop.map(|s| round_dp(s, 8)),
            ob_support_stop: ob_stop.map(|s| round_dp(s, 8)),
            atr_stop: round_dp(atr_stop, 8),
        }
    }

    fn entry(
        &self,
        price: f64,
        atr_pct: f64,
        candles: &[Candle],
        classification: Classification,
    ) -> EntryZone {
        match classification {
            Classification::Critical => EntryZone {
                low: round_dp(price * 0.998, 8),
                high: round_dp(price * 1.003, 8),
                ideal: round_dp(price, 8),
                method: "market_entry".into(),
                urgency: "immediate".into(),
            },
            Classification::HighAlert => {
                if let Some(vwap) = Self::vwap(candles, 12).filter(|v| *v < price) {
                    EntryZone {
                        low: round_dp(vwap * 0.998, 8),
                        high: round_dp(price * 1.002, 8),
                        ideal: round_dp(vwap, 8),
                        method: "vwap_pullback".into(),
                        urgency: "wait_pullback".into(),
                    }
                } else {
                    EntryZone {
                        low: round_dp(price * (1.0 - atr_pct / 200.0), 8),
                        high: round_dp(price * 1.002, 8),
                        ideal: round_dp(price * (1.0 - atr_pct / 400.0), 8),
                        method: "bid_side".into(),
                        urgency: "wait_pullback".into(),
                    }
                }
            }
            _ => EntryZone {
                low: round_dp(price * (1.0 - atr_pct / 100.0), 8),
                high: round_dp(price * 0.998, 8),
                ideal: round_dp(price * (1.0 - atr_pct / 150.0), 8),
                method: "support_entry".into(),
                urgency: "limit_order".into(),
            },
        }
    }

    fn take_profits(
        &self,
        price: f64,
        atr: f64,
        orderbook: &OrderBook,
        leverage_ratio: f64,
        score: f64,
        stop: &StopLevel,
    ) -> Vec<TakeProfit> {
        let cascade_mult = if leverage_ratio >= 5.0 {
            1.8
        } else if leverage_ratio >= 3.0 {
            1.4
        } else if leverage_ratio >= 2.0 {
            1.2
        } else {
            1.0
        };
        let score_mult = if score >= 85.0 {
            1.3
        } else if score >= 75.0 {
            1.15
        } else {
            1.0
        };
        let mult = cascade_mult * score_mult;

        let tp1_atr = price + atr * 3.0 * mult;
        let tp2_atr = price + atr * 5.5 * mult;
        let tp3_atr = price + atr * 9.0 * mult;

        let walls = Self::ask_walls(&orderbook.asks, price, 60.0);

        let (mut tp1, mut tp1_method, mut tp1_wall) = (tp1_atr, "atr", None);
        if let Some(wall) = walls.first() {
            if wall.price < tp1_atr && wall.price > price * 1.03 {
                tp1 = wall.price * 0.997;
                tp1_method = "resistance";
                tp1_wall = Some(wall.value);
            }
        }

        let (mut tp2, mut tp2_method, mut tp2_wall) = (tp2_atr, "atr", None);
        if let Some(wall) = walls.get(1) {
            if wall.price < tp2_atr * 1.1 && wall.price > tp1 * 1.05 {
                tp2 = wall.price * 0.997;
                tp2_method = "resistance";
                tp2_wall = Some(wall.value);
            }
        }

        let (mut tp3, mut tp3_method, mut tp3_wall) = (tp3_atr, "atr", None);
        if let Some(wall) = walls.get(2) {
            if wall.price < tp3_atr * 1.15 && wall.price > tp2 * 1.05 {
                tp3 = wall.price * 0.997;
                tp3_method = "resistance";
                tp3_wall = Some(wall.value);
            }
        }

        // Floors: minimum first-target distance, then spacing, then R:R.
        tp1 = tp1.max(price * (1.0 + MIN_TP1_PCT / 100.0));
        tp2 = tp2.max(tp1 * 1.05);
        tp3 = tp3.max(tp2 * 1.05);
        let risk = price * stop.pct / 100.0;
        tp1 = tp1.max(price + risk * MIN_RR_RATIO);

        [
            (tp1, tp1_method, tp1_wall),
            (tp2, tp2_method, tp2_wall),
            (tp3, tp3_method, tp3_wall),
        ]
        .into_iter()
        .enumerate()
        .map(|(i, (target, method, wall))| TakeProfit {
            level: (i + 1) as u8,
            price: round_dp(target, 8),
            pct: round_dp((target - price) / price * 100.0, 1),
            sell_pct: 25.0,
            method: method.to_string(),
            atr_multiple: if atr > 0.0 {
                round_dp((target - price) / atr, 1)
            } else {
                0.0
            },
            wall_value: wall.map(|v| round_dp(v, 2)),
        })
        .collect()
    }

    fn trailing(&self, price: f64, atr: f64, score: f64) -> TrailingStop {
        let mult = if score >= 78.0 { 2.0 } else { 2.5 };
        let distance = atr * mult;
        TrailingStop {
            sell_pct: 25.0,
            trail_distance: round_dp(distance, 8),
            trail_pct: round_dp(distance / price * 100.0, 2),
            trail_atr_multiple: mult,
            activation: "after_tp3".into(),
            method: format!("trail_{mult}x_atr"),
        }
    }

    fn risk_reward(
        &self,
        entry: &EntryZone,
        stop: &StopLevel,
        take_profits: &[TakeProfit],
    ) -> RiskReward {
        let entry_price = entry.ideal;
        let stop_price = stop.price;
        if entry_price <= 0.0 || stop_price <= 0.0 {
            return RiskReward {
                ratio: 0.0,
                risk_pct: stop.pct,
            };
        }
        let risk = entry_price - stop_price;
        if risk <= 0.0 {
            return RiskReward {
                ratio: 0.0,
                risk_pct: stop.pct,
            };
        }
        let mut reward: f64 = take_profits
            .iter()
            .map(|tp| (tp.price - entry_price) * (tp.sell_pct / 100.0))
            .sum();
        // Final 25% trails; assume it captures 60% of the TP3 excess.
        if let Some(last) = take_profits.last() {
            reward += (last.price - entry_price) * 0.6 * 0.25;
        }
        RiskReward {
            ratio: round_dp(reward / risk, 2),
            risk_pct: round_dp(stop.pct, 2),
        }
    }

    /// Densest bid bucket within `depth_pct` below price. Buckets are 0.5% of
    /// price wide; the returned level is the bucket's value-weighted price.
    fn bid_cluster(bids: &[(f64, f64)], price: f64, depth_pct: f64) -> Option<f64> {
        let floor = price * (1.0 - depth_pct / 100.0);
        let bucket_size = price * 0.005;
        let mut buckets: BTreeMap<i64, Bucket> = BTreeMap::new();

        for (bid_price, amount) in bids {
            if *bid_price < floor || *bid_price >= price {
                continue;
            }
            let key = (bid_price / bucket_size) as i64;
            let value = bid_price * amount;
            let bucket = buckets.entry(key).or_default();
            bucket.price_sum += bid_price * value;
            bucket.value += value;
        }

        buckets
            .values()
            .max_by(|a, b| a.value.partial_cmp(&b.value).unwrap_or(std::cmp::Ordering::Equal))
            .filter(|b| b.value > 0.0)
            .map(|b| b.price_sum / b.value)
    }

    /// Ask buckets (1% of price wide) within `depth_pct` above price whose
    /// value is at least 1.5x the bucket mean, sorted by price, top 5.
    fn ask_walls(asks: &[(f64, f64)], price: f64, depth_pct: f64) -> Vec<Wall> {
        let ceiling = price * (1.0 + depth_pct / 100.0);
        let bucket_size = price * 0.01;
        let mut buckets: BTreeMap<i64, Bucket> = BTreeMap::new();

        for (ask_price, amount) in asks {
            if *ask_price <= price || *ask_price > ceiling {
                continue;
            }
            let key = (ask_price / bucket_size) as i64;
            let value = ask_price * amount;
            let bucket = buckets.entry(key).or_default();
            bucket.price_sum += ask_price * value;
            bucket.value += value;
        }
        if buckets.is_empty() {
            return Vec::new();
        }

        let mean_value =
            buckets.values().map(|b| b.value).sum::<f64>() / buckets.len() as f64;
        let threshold = mean_value * 1.5;

        let mut walls: Vec<Wall> = buckets
            .values()
            .filter(|b| b.value >= threshold && b.value > 0.0)
            .map(|b| Wall {
                price: b.price_sum / b.value,
                value: b.value,
            })
            .collect();
        walls.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal));
        walls.truncate(5);
        walls
    }

    /// ATR from the volatility-compression metadata, falling back to its ATR%
    /// and finally to 3% of price.
    fn atr_from_signals(signals: &BTreeMap<SignalName, Signal>, price: f64) -> f64 {
        let metadata = signals
            .get(&SignalName::VolatilityCompression)
            .map(|s| &s.metadata);
        if let Some(m) = metadata {
            if let Some(atr) = m.get("atr").and_then(|v| v.as_f64()) {
                if atr > 0.0 {
                    return atr;
                }
            }
            if let Some(atr_pct) = m.get("atr_pct").and_then(|v| v.as_f64()) {
                if atr_pct > 0.0 {
                    return price * atr_pct / 100.0;
                }
            }
        }
        price * 0.03
    }

    fn leverage_ratio(signals: &BTreeMap<SignalName, Signal>) -> f64 {
        signals
            .get(&SignalName::LiquidationLeverage)
            .and_then(|s| s.metadata.get("leverage_ratio"))
            .and_then(|v| v.as_f64())
            .unwrap_or(1.0)
    }

    fn vwap(candles: &[Candle], periods: usize) -> Option<f64> {
        if candles.len() < 2 {
            return None;
        }
        let window = if candles.len() >= periods {
            &candles[candles.len() - periods..]
        } else {
            candles
        };
        let mut typical_price_volume = 0.0;
        let mut total_volume = 0.0;
        for c in window.iter().filter(|c| c.volume > 0.0) {
            typical_price_volume += (c.high + c.low + c.close) / 3.0 * c.volume;
            total_volume += c.volume;
        }
        if total_volume > 0.0 {
            Some(typical_price_volume / total_volume)
        } else {
            None
        }
    }

    fn quality(
        &self,
        candles: &[Candle],
        orderbook: &OrderBook,
        signals: &BTreeMap<SignalName, Signal>,
    ) -> DataQuality {
        let candle_count = candles.len();
        let bid_depth = orderbook.bids.len();
        let ask_depth = orderbook.asks.len();
        let has_atr = signals
            .get(&SignalName::VolatilityCompression)
            .and_then(|s| s.metadata.get("atr"))
            .and_then(|v| v.as_f64())
            .map(|a| a != 0.0)
            .unwrap_or(false);
        let has_liq = signals
            .get(&SignalName::LiquidationLeverage)
            .and_then(|s| s.metadata.get("leverage_ratio"))
            .and_then(|v| v.as_f64())
            .map(|r| r != 0.0)
            .unwrap_or(false);

        let mut score = 0u32;
        score += if candle_count >= 100 {
            30
        } else if candle_count >= 30 {
            15
        } else {
            0
        };
        score += if bid_depth >= 20 {
            20
        } else if bid_depth >= 5 {
            10
        } else {
            0
        };
        score += if ask_depth >= 20 {
            20
        } else if ask_depth >= 5 {
            10
        } else {
            0
        };
        if has_atr {
            score += 15;
        }
        if has_liq {
            score += 15;
        }

        let label = if score >= 80 {
            "HIGH"
        } else if score >= 50 {
            "MEDIUM"
        } else {
            "LOW"
        };

        DataQuality {
            score,
            label: label.to_string(),
            candles: candle_count,
            orderbook_depth: bid_depth + ask_depth,
            has_atr,
            has_liq_data: has_liq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn score_result(score: f64) -> ScoreResult {
        ScoreResult {
            composite_score: score,
            classification: Classification::from_score(score),
            base_score: score,
            signal_scores: BTreeMap::new(),
            weighted_contributions: BTreeMap::new(),
            bonuses_applied: Vec::new(),
            penalties_applied: Vec::new(),
            bonus_total: 0.0,
            penalty_total: 0.0,
        }
    }

    fn signals_with_atr(atr: f64, leverage_ratio: f64) -> BTreeMap<SignalName, Signal> {
        let mut signals = BTreeMap::new();
        signals.insert(
            SignalName::VolatilityCompression,
            Signal::new(0.0, 50.0, json!({ "atr": atr, "atr_pct": 0.0 })),
        );
        signals.insert(
            SignalName::LiquidationLeverage,
            Signal::new(leverage_ratio, 50.0, json!({ "leverage_ratio": leverage_ratio })),
        );
        signals
    }

    fn candles(count: usize, price: f64) -> Vec<Candle> {
        (0..count)
            .map(|i| Candle {
                timestamp: i as f64 * 3600.0,
                open: price,
                high: price * 1.02,
                low: price * 0.96,
                close: price,
                volume: 100.0,
            })
            .collect()
    }

    #[test]
    fn test_zero_price_is_unavailable_not_error() {
        let calc = LevelsCalculator::new();
        let result = calc.compute(
            "SOL",
            0.0,
            &DataBundle::default(),
            &BTreeMap::new(),
            &score_result(80.0),
        );
        assert_eq!(result.unavailable_reason.as_deref(), Some("no price"));
        assert!(result.take_profits.is_empty());
    }

    #[test]
    fn test_stop_stays_within_band() {
        let calc = LevelsCalculator::new();
        let mut bundle = DataBundle::default();
        bundle.ohlcv.insert("binance".into(), candles(48, 100.0));

        for score in [20.0, 55.0, 70.0, 90.0] {
            let result = calc.compute(
                "SOL",
                100.0,
                &bundle,
                &signals_with_atr(2.0, 1.0),
                &score_result(score),
            );
            let stop = &result.stop;
            assert!(
                stop.pct >= MIN_STOP_PCT - 1e-9 && stop.pct <= MAX_STOP_PCT + 1e-9,
                "stop pct {} out of band at score {score}",
                stop.pct
            );
            assert!(stop.price < 100.0);
        }
    }

    #[test]
    fn test_critical_entry_is_market_band() {
        let calc = LevelsCalculator::new();
        let result = calc.compute(
            "SOL",
            100.0,
            &DataBundle::default(),
            &signals_with_atr(2.0, 1.0),
            &score_result(80.0),
        );
        assert_eq!(result.entry.method, "market_entry");
        assert_eq!(result.entry.low, 99.8);
        assert_eq!(result.entry.high, 100.3);
        assert_eq!(result.entry.ideal, 100.0);
    }

    #[test]
    fn test_watchlist_entry_waits_for_support() {
        let calc = LevelsCalculator::new();
        let result = calc.compute(
            "SOL",
            100.0,
            &DataBundle::default(),
            &signals_with_atr(2.0, 1.0),
            &score_result(50.0),
        );
        assert_eq!(result.entry.method, "support_entry");
        assert!(result.entry.ideal < 100.0);
        assert!(result.entry.high <= 99.8);
    }

    #[test]
    fn test_take_profits_are_ordered_with_floors() {
        let calc = LevelsCalculator::new();
        let result = calc.compute(
            "SOL",
            100.0,
            &DataBundle::default(),
            &signals_with_atr(1.0, 1.0),
            &score_result(50.0),
        );
        let tps = &result.take_profits;
        assert_eq!(tps.len(), 3);
        assert!(tps[0].price >= 105.0, "TP1 below +5% floor: {}", tps[0].price);
        assert!(tps[1].price >= tps[0].price * 1.05);
        assert!(tps[2].price >= tps[1].price * 1.05);
        assert!(tps.iter().all(|tp| tp.sell_pct == 25.0));
    }

    #[test]
    fn test_cascade_and_score_multipliers_stretch_targets() {
        let calc = LevelsCalculator::new();
        let base = calc.compute(
            "SOL",
            100.0,
            &DataBundle::default(),
            &signals_with_atr(3.0, 1.0),
            &score_result(50.0),
        );
        let stretched = calc.compute(
            "SOL",
            100.0,
            &DataBundle::default(),
            &signals_with_atr(3.0, 6.0),
            &score_result(90.0),
        );
        assert!(stretched.take_profits[2].price > base.take_profits[2].price);
    }

    #[test]
    fn test_ask_wall_substitutes_tp1() {
        let calc = LevelsCalculator::new();
        let mut bundle = DataBundle::default();
        // heavy wall near +6%, light asks elsewhere
        let mut asks: Vec<(f64, f64)> = (1..=40).map(|i| (100.0 + i as f64, 1.0)).collect();
        asks.push((106.0, 500.0));
        bundle
            .orderbooks
            .insert("binance".into(), OrderBook { bids: vec![], asks });

        // score 80: ATR target 100 + 2*3*1.15 = 106.9, wall at 106 undercuts it
        let result = calc.compute(
            "SOL",
            100.0,
            &bundle,
            &signals_with_atr(2.0, 1.0),
            &score_result(80.0),
        );
        assert_eq!(result.take_profits[0].method, "resistance");
        assert!((result.take_profits[0].price - 105.682).abs() < 1e-6);
        // wall notional: 500 units plus the 1-unit filler ask, both at 106
        let wall_value = result.take_profits[0].wall_value.unwrap();
        assert!((wall_value - 53_106.0).abs() < 1e-6);
        // ATR-derived targets carry no wall
        assert!(result.take_profits[2].wall_value.is_none());
    }

    #[test]
    fn test_trailing_tightens_with_score() {
        let calc = LevelsCalculator::new();
        let high = calc.trailing(100.0, 2.0, 80.0);
        let low = calc.trailing(100.0, 2.0, 50.0);
        assert_eq!(high.trail_atr_multiple, 2.0);
        assert_eq!(low.trail_atr_multiple, 2.5);
        assert_eq!(high.activation, "after_tp3");
    }

    #[test]
    fn test_risk_reward_is_positive_and_quality_graded() {
        let calc = LevelsCalculator::new();
        let mut bundle = DataBundle::default();
        bundle.ohlcv.insert("binance".into(), candles(120, 100.0));
        bundle.orderbooks.insert(
            "binance".into(),
            OrderBook {
                bids: (1..=25).map(|i| (100.0 - i as f64 * 0.1, 10.0)).collect(),
                asks: (1..=25).map(|i| (100.0 + i as f64 * 0.1, 10.0)).collect(),
            },
        );
        let result = calc.compute(
            "SOL",
            100.0,
            &bundle,
            &signals_with_atr(2.0, 1.0),
            &score_result(65.0),
        );
        assert!(result.risk_reward.ratio > 0.0);
        // 30 (candles) + 20 + 20 (depth) + 15 (atr) + 15 (liq) = 100
        assert_eq!(result.data_quality.score, 100);
        assert_eq!(result.data_quality.label, "HIGH");
    }

    #[test]
    fn test_position_for_risk() {
        assert_eq!(position_for_risk(10_000.0, 0.01, 5.0), 2_000.0);
        assert_eq!(position_for_risk(10_000.0, 0.02, 0.0), 0.0);
    }
}
