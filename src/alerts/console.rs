//! Console sink: renders alerts to stdout with score bars and smart levels

use async_trait::async_trait;
use chrono::Utc;

use super::{
    format_pct, format_price, format_usd, score_bar, AlertSink, SignalDegradation, StopUpdate,
    TakeProfitHit, TradeStatus,
};
use crate::levels::position_for_risk;
use crate::scanner::ScanResult;
use crate::scoring::{Classification, Event};
use crate::storage::TradeRecord;

#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new() -> Self {
        Self
    }

    fn tier_emoji(classification: Classification) -> &'static str {
        match classification {
            Classification::Critical => "\u{1F534}\u{1F534}\u{1F534}",
            Classification::HighAlert => "\u{1F7E0}\u{1F7E0}",
            Classification::Watchlist => "\u{1F7E1}",
            Classification::Monitor => "\u{26AA}",
            Classification::None => "",
        }
    }

    fn print_levels(result: &ScanResult) {
        let Some(levels) = &result.levels else {
            return;
        };
        if levels.unavailable_reason.is_some() {
            return;
        }

        println!(
            "\u{26A1} SMART LEVELS (quality: {})",
            levels.data_quality.label
        );
        println!(
            "  ATR: {} ({:.2}%)\n",
            format_price(levels.atr.value),
            levels.atr.pct
        );

        let entry = &levels.entry;
        println!(
            "  \u{1F4E5} ENTRY ({}): {} -> {}",
            entry.urgency,
            format_price(entry.low),
            format_price(entry.high)
        );
        println!("     Ideal: {} [{}]\n", format_price(entry.ideal), entry.method);

        let stop = &levels.stop;
        println!(
            "  \u{1F6D1} STOP ({}): {} ({})",
            stop.method,
            format_price(stop.price),
            format_pct(-stop.pct)
        );
        println!("     {:.1}x ATR\n", stop.atr_distance);

        if !levels.take_profits.is_empty() {
            println!("  \u{1F3AF} TAKE PROFITS:");
            for tp in &levels.take_profits {
                let wall = tp
                    .wall_value
                    .map(|v| format!(" | wall {}", format_usd(v)))
                    .unwrap_or_default();
                println!(
                    "     TP{} ({}%): {} ({}) [{:.1}x ATR]{wall}",
                    tp.level,
                    tp.sell_pct,
                    format_price(tp.price),
                    format_pct(tp.pct),
                    tp.atr_multiple
                );
            }
            if let Some(trail) = &levels.trailing {
                println!(
                    "     TP4 ({}%): Trail {:.1}% ({}x ATR)",
                    trail.sell_pct, trail.trail_pct, trail.trail_atr_multiple
                );
            }
            println!();
        }

        let rr = &levels.risk_reward;
        println!(
            "  \u{1F4D0} R:R {:.2}:1 | Risk: {:.1}% | $10k 2%: {}\n",
            rr.ratio,
            rr.risk_pct,
            format_usd(position_for_risk(10_000.0, 0.02, rr.risk_pct))
        );
    }
}

#[async_trait]
impl AlertSink for ConsoleSink {
    async fn on_signal_alert(&self, result: &ScanResult) {
        let score = &result.score;
        let emoji = Self::tier_emoji(score.classification);

        println!("\n{}", "=".repeat(60));
        println!("{emoji} {}: {} {emoji}", score.classification, result.symbol);
        println!("{}", "=".repeat(60));
        println!(
            "\u{1F4CA} Score: {:.1} / 100  |  \u{1F4B0} Price: {}\n",
            score.composite_score,
            format_price(result.current_price)
        );

        println!("\u{1F3AF} Signals:");
        let mut scores: Vec<(&String, &f64)> = score.signal_scores.iter().collect();
        scores.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal));
        for (name, value) in scores {
            println!("  {name:25} {} {value:.0}", score_bar(*value));
        }
        println!();

        let detail = |signal: &str, key: &str| -> Option<f64> {
            result
                .signal_details
                .get(signal)
                .and_then(|m| m.get(key))
                .and_then(|v| v.as_f64())
                .filter(|v| *v != 0.0)
        };
        if let Some(oi) = detail("oi_surge", "oi_change_pct") {
            println!("  OI 72h: {}", format_pct(oi));
        }
        if let Some(rate) = result
            .signal_details
            .get("funding_rate")
            .and_then(|m| m.get("current_rate_pct"))
            .and_then(|v| v.as_str())
        {
            println!("  Funding: {rate}");
        }
        if let Some(lr) = detail("liquidation_leverage", "leverage_ratio") {
            println!("  Liq: {lr:.1}x");
        }
        if let Some(atr_pct) = detail("volatility_compression", "atr_pct") {
            println!("  ATR: {atr_pct:.2}%");
        }
        if let Some(pctl) = detail("volatility_compression", "bb_percentile") {
            println!("  BB: {pctl:.0}th pctl");
        }
        println!();

        if !score.bonuses_applied.is_empty() {
            println!("\u{1F517} {}", score.bonuses_applied.join(", "));
        }
        if !score.penalties_applied.is_empty() {
            println!("\u{26A0}\u{FE0F} {}", score.penalties_applied.join(", "));
        }
        if !score.bonuses_applied.is_empty() || !score.penalties_applied.is_empty() {
            println!();
        }

        match score.classification {
            Classification::Critical | Classification::HighAlert => Self::print_levels(result),
            Classification::Watchlist => {
                if let Some(levels) = &result.levels {
                    if levels.unavailable_reason.is_none() {
                        println!(
                            "  \u{1F440} Watch: {} -> {}\n",
                            format_price(levels.entry.low),
                            format_price(levels.entry.high)
                        );
                    }
                }
            }
            _ => {}
        }

        println!("\u{23F0} {}", Utc::now().format("%H:%M:%S UTC"));
        println!("{}", "=".repeat(60));
    }

    async fn on_event(&self, event: &Event) {
        let emoji = match event {
            Event::Ignition { .. } => "\u{1F680}",
            Event::ScoreJump { .. } => "\u{1F4C8}",
            Event::Upgrade { .. } => "\u{2B06}\u{FE0F}",
        };
        println!("\n{emoji} {}  {}", event.symbol(), event.message());
    }

    async fn on_trade_registered(
        &self,
        symbol: &str,
        entry_price: f64,
        position_size_usd: f64,
        stop_loss_pct: f64,
    ) {
        println!(
            "\n\u{2705} TRADE: {symbol} @ {} | Size: {} | Stop: {}",
            format_price(entry_price),
            format_usd(position_size_usd),
            format_pct(-stop_loss_pct)
        );
    }

    async fn on_stop_update(&self, update: &StopUpdate) {
        println!(
            "\n\u{1F4CD} STOP {}: {} ({}) - {}",
            update.symbol,
            format_price(update.new_stop_price),
            format_pct(update.new_stop_pct),
            update.reason
        );
    }

    async fn on_tp_hit(&self, hit: &TakeProfitHit) {
        println!(
            "\n\u{1F3AF} TP{} {}: {} (+{}%) | PnL: {} | Rem: {:.0}%",
            hit.level,
            hit.symbol,
            format_price(hit.current_price),
            hit.target_pct,
            format_usd(hit.pnl_chunk),
            hit.remaining_pct
        );
    }

    async fn on_trade_closed(&self, record: &TradeRecord, reason: &str) {
        let emoji = if record.total_pnl >= 0.0 {
            "\u{1F7E2}"
        } else {
            "\u{1F534}"
        };
        println!(
            "\n{emoji} CLOSED {}: {} ({}) - {reason}",
            record.symbol,
            format_usd(record.total_pnl),
            format_pct(record.total_pnl_pct)
        );
    }

    async fn on_trade_status(&self, status: &TradeStatus) {
        let emoji = if status.price_change_pct >= 0.0 {
            "\u{1F7E2}"
        } else {
            "\u{1F534}"
        };
        println!(
            "\n{emoji} {} ({:.1}h): {} ({}) | U:{} R:{} | {:.0}% | Score:{:.0}",
            status.symbol,
            status.hours_in,
            format_price(status.current_price),
            format_pct(status.price_change_pct),
            format_usd(status.unrealized_pnl),
            format_usd(status.realized_pnl),
            status.remaining_pct,
            status.score
        );
    }

    async fn on_signal_degradation(&self, degradation: &SignalDegradation) {
        println!(
            "\n\u{26A0}\u{FE0F} DEGRADE {}: {:.0}->{:.0} | {} ({})",
            degradation.symbol,
            degradation.old_score,
            degradation.new_score,
            format_price(degradation.current_price),
            format_pct(degradation.price_change_pct)
        );
    }
}
