//! Composite scoring, classification, and delta-based event detection

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::Result;
use crate::normalize::{clamp, round_dp};
use crate::signals::{Signal, SignalName};
use crate::storage::{unix_now, ScoreRow, SnapshotData, SnapshotKind, Store};

/// 7d price change above which the extension penalty kicks in.
pub const EXTENDED_PRICE_THRESHOLD_PCT: f64 = 15.0;
pub const EXTENDED_PRICE_PENALTY: f64 = 0.40;

/// Scores at or above these thresholds fall into the tier.
pub const CRITICAL_THRESHOLD: f64 = 78.0;
pub const HIGH_ALERT_THRESHOLD: f64 = 62.0;
pub const WATCHLIST_THRESHOLD: f64 = 48.0;
pub const MONITOR_THRESHOLD: f64 = 33.0;

/// Minimum 6h price move (%) for an IGNITION event.
const IGNITION_MOVE_PCT: f64 = 5.0;
/// Minimum score jump (points) for a SCORE_JUMP event.
const SCORE_JUMP_DELTA: f64 = 15.0;

struct InteractionBonus {
    name: &'static str,
    signals: &'static [SignalName],
    min_score: f64,
    bonus: f64,
}

/// Bonus applies only when every listed signal clears `min_score`.
const INTERACTION_BONUSES: [InteractionBonus; 3] = [
    InteractionBonus {
        name: "squeeze_setup",
        signals: &[
            SignalName::OiSurge,
            SignalName::FundingRate,
            SignalName::VolatilityCompression,
        ],
        min_score: 45.0,
        bonus: 0.25,
    },
    InteractionBonus {
        name: "cascade_setup",
        signals: &[
            SignalName::LiquidationLeverage,
            SignalName::FundingRate,
            SignalName::LongShortRatio,
        ],
        min_score: 40.0,
        bonus: 0.30,
    },
    InteractionBonus {
        name: "accumulation_setup",
        signals: &[
            SignalName::OiSurge,
            SignalName::VolumePriceDecouple,
            SignalName::CrossExchangeVolume,
        ],
        min_score: 40.0,
        bonus: 0.20,
    },
];

/// Alert tier. Ordering follows severity, so a strict rank increase is an
/// upgrade.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    None,
    Monitor,
    Watchlist,
    HighAlert,
    Critical,
}

impl Classification {
    pub fn from_score(score: f64) -> Self {
        if score >= CRITICAL_THRESHOLD {
            Classification::Critical
        } else if score >= HIGH_ALERT_THRESHOLD {
            Classification::HighAlert
        } else if score >= WATCHLIST_THRESHOLD {
            Classification::Watchlist
        } else if score >= MONITOR_THRESHOLD {
            Classification::Monitor
        } else {
            Classification::None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::None => "NONE",
            Classification::Monitor => "MONITOR",
            Classification::Watchlist => "WATCHLIST",
            Classification::HighAlert => "HIGH_ALERT",
            Classification::Critical => "CRITICAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NONE" => Some(Classification::None),
            "MONITOR" => Some(Classification::Monitor),
            "WATCHLIST" => Some(Classification::Watchlist),
            "HIGH_ALERT" => Some(Classification::HighAlert),
            "CRITICAL" => Some(Classification::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full breakdown of one composite score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub composite_score: f64,
    pub classification: Classification,
    pub base_score: f64,
    pub signal_scores: BTreeMap<String, f64>,
    pub weighted_contributions: BTreeMap<String, f64>,
    pub bonuses_applied: Vec<String>,
    pub penalties_applied: Vec<String>,
    /// Total bonus applied, in percent of base.
    pub bonus_total: f64,
    /// Total penalty applied, in percent of base.
    pub penalty_total: f64,
}

/// Events derived from comparing the current score against stored history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    ScoreJump {
        symbol: String,
        previous_score: f64,
        current_score: f64,
        delta: f64,
    },
    Upgrade {
        symbol: String,
        from_class: Classification,
        to_class: Classification,
        score: f64,
    },
    Ignition {
        symbol: String,
        price_move_pct: f64,
        score: f64,
    },
}

impl Event {
    pub fn symbol(&self) -> &str {
        match self {
            Event::ScoreJump { symbol, .. }
            | Event::Upgrade { symbol, .. }
            | Event::Ignition { symbol, .. } => symbol,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Event::ScoreJump { delta, .. } => format!("Score jumped +{delta:.0} points"),
            Event::Upgrade {
                from_class,
                to_class,
                ..
            } => format!("Upgraded {from_class} -> {to_class}"),
            Event::Ignition {
                price_move_pct,
                score,
                ..
            } => format!("IGNITION: price +{price_move_pct:.1}% in 6h with score {score:.0}"),
        }
    }
}

/// Fuses the nine normalized signals into one 0-100 composite and persists
/// every score for delta detection.
pub struct Scorer {
    store: Arc<dyn Store>,
}

impl Scorer {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn score(
        &self,
        symbol: &str,
        signals: &BTreeMap<SignalName, Signal>,
        price_change_7d: f64,
    ) -> Result<ScoreResult> {
        let mut signal_scores = BTreeMap::new();
        let mut weighted = BTreeMap::new();
        let mut base = 0.0;

        for name in SignalName::ALL {
            let normalized = signals
                .get(&name)
                .map(|s| s.normalized_score)
                .unwrap_or(0.0);
            signal_scores.insert(name.as_str().to_string(), round_dp(normalized, 1));
            let contribution = normalized * name.weight();
            weighted.insert(name.as_str().to_string(), round_dp(contribution, 2));
            base += contribution;
        }

        let mut bonuses = Vec::new();
        let mut bonus_mult = 0.0;
        for bonus in &INTERACTION_BONUSES {
            let all_clear = bonus.signals.iter().all(|s| {
                signal_scores
                    .get(s.as_str())
                    .copied()
                    .unwrap_or(0.0)
                    >= bonus.min_score
            });
            if all_clear {
                bonus_mult += bonus.bonus;
                bonuses.push(bonus.name.to_string());
            }
        }

        let mut penalties = Vec::new();
        let mut penalty_mult = 0.0;
        if price_change_7d > EXTENDED_PRICE_THRESHOLD_PCT {
            penalty_mult += EXTENDED_PRICE_PENALTY;
            penalties.push(format!("extended_{price_change_7d:.1}%"));
        }

        let final_score = clamp(base * (1.0 + bonus_mult) * (1.0 - penalty_mult), 0.0, 100.0);
        let classification = Classification::from_score(final_score);

        self.store
            .append_score(ScoreRow {
                symbol: symbol.to_string(),
                timestamp: unix_now(),
                composite_score: final_score,
                classification: classification.as_str().to_string(),
                signal_scores: signal_scores.clone(),
                metadata: json!({
                    "bonuses": bonuses,
                    "penalties": penalties,
                }),
            })
            .await?;

        debug!(
            symbol,
            score = round_dp(final_score, 1),
            classification = %classification,
            "scored"
        );

        Ok(ScoreResult {
            composite_score: round_dp(final_score, 1),
            classification,
            base_score: round_dp(base, 1),
            signal_scores,
            weighted_contributions: weighted,
            bonuses_applied: bonuses,
            penalties_applied: penalties,
            bonus_total: round_dp(bonus_mult * 100.0, 1),
            penalty_total: round_dp(penalty_mult * 100.0, 1),
        })
    }

    /// Compare the current score against the previous stored row and the 6h
    /// ticker history. `score()` must have been called first so "previous"
    /// means the row before this cycle's.
    pub async fn detect_events(
        &self,
        symbol: &str,
        current: &ScoreResult,
        current_price: f64,
    ) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        let Some(previous) = self.store.previous_score(symbol).await? else {
            return Ok(events);
        };

        let delta = current.composite_score - previous.composite_score;
        if delta >= SCORE_JUMP_DELTA {
            events.push(Event::ScoreJump {
                symbol: symbol.to_string(),
                previous_score: previous.composite_score,
                current_score: current.composite_score,
                delta: round_dp(delta, 1),
            });
        }

        if let Some(previous_class) = Classification::parse(&previous.classification) {
            if current.classification > previous_class {
                events.push(Event::Upgrade {
                    symbol: symbol.to_string(),
                    from_class: previous_class,
                    to_class: current.classification,
                    score: current.composite_score,
                });
            }
        }

        if current_price > 0.0 {
            let hist = self
                .store
                .snapshots(symbol, SnapshotKind::Ticker, 6.0, None)
                .await?;
            // Compare against the earliest priced snapshot in the window.
            let baseline = hist
                .iter()
                .filter_map(|row| match &row.data {
                    SnapshotData::Ticker(t) => t
                        .last
                        .filter(|p| *p > 0.0)
                        .map(|p| (row.timestamp, p)),
                    _ => None,
                })
                .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
            if let Some((_, old_price)) = baseline {
                let move_pct = (current_price - old_price) / old_price * 100.0;
                if move_pct >= IGNITION_MOVE_PCT
                    && current.composite_score >= WATCHLIST_THRESHOLD
                {
                    events.push(Event::Ignition {
                        symbol: symbol.to_string(),
                        price_move_pct: round_dp(move_pct, 1),
                        score: current.composite_score,
                    });
                }
            }
        }

        Ok(events)
    }
}
