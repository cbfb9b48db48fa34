//! Notification boundary and shared formatting helpers
//!
//! Sinks are fire-and-forget: they return nothing and must not panic, so a
//! broken notification channel can never abort a scan cycle or a trade tick.

pub mod console;

pub use console::ConsoleSink;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::scanner::ScanResult;
use crate::scoring::Event;
use crate::storage::TradeRecord;

/// Stop moved (by the trail ladder or manually).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopUpdate {
    pub symbol: String,
    pub new_stop_price: f64,
    /// New stop relative to entry, in percent.
    pub new_stop_pct: f64,
    pub current_price: f64,
    pub entry_price: f64,
    pub reason: String,
}

/// A take-profit rung fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitHit {
    pub symbol: String,
    pub level: usize,
    pub target_pct: f64,
    pub current_price: f64,
    pub entry_price: f64,
    pub pnl_chunk: f64,
    pub remaining_pct: f64,
}

/// Periodic open-trade summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeStatus {
    pub symbol: String,
    pub entry_price: f64,
    pub current_price: f64,
    pub price_change_pct: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub remaining_pct: f64,
    pub current_stop: f64,
    pub hours_in: f64,
    pub score: f64,
}

/// Composite score dropped sharply while a trade is open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDegradation {
    pub symbol: String,
    pub old_score: f64,
    pub new_score: f64,
    pub current_price: f64,
    pub entry_price: f64,
    pub price_change_pct: f64,
}

/// Notification delivery. At-most-once; implementations swallow their own
/// failures.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn on_signal_alert(&self, result: &ScanResult);
    async fn on_event(&self, event: &Event);
    async fn on_trade_registered(
        &self,
        symbol: &str,
        entry_price: f64,
        position_size_usd: f64,
        stop_loss_pct: f64,
    );
    async fn on_stop_update(&self, update: &StopUpdate);
    async fn on_tp_hit(&self, hit: &TakeProfitHit);
    async fn on_trade_closed(&self, record: &TradeRecord, reason: &str);
    async fn on_trade_status(&self, status: &TradeStatus);
    async fn on_signal_degradation(&self, degradation: &SignalDegradation);
}

/// `+x.xx%` / `-x.xx%`, sign always shown for non-negative values.
pub fn format_pct(value: f64) -> String {
    let sign = if value >= 0.0 { "+" } else { "" };
    format!("{sign}{value:.2}%")
}

pub fn format_usd(value: f64) -> String {
    if value.abs() >= 1_000_000.0 {
        format!("${:.1}M", value / 1_000_000.0)
    } else if value.abs() >= 1_000.0 {
        format!("${:.1}K", value / 1_000.0)
    } else {
        format!("${value:.2}")
    }
}

/// Price with precision scaled to magnitude (micro-caps need more digits).
pub fn format_price(value: f64) -> String {
    if value >= 1000.0 {
        format!("${value:.2}")
    } else if value >= 1.0 {
        format!("${value:.4}")
    } else if value >= 0.01 {
        format!("${value:.6}")
    } else {
        format!("${value:.8}")
    }
}

/// Ten-slot unicode bar for a 0-100 value.
pub fn score_bar(value: f64) -> String {
    let width = 10usize;
    let filled = ((value / 100.0) * width as f64) as i64;
    let filled = filled.clamp(0, width as i64) as usize;
    "\u{2588}".repeat(filled) + &"\u{2591}".repeat(width - filled)
}
