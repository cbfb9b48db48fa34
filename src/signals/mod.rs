//! Signal types shared by the engine and the scorer

pub mod engine;

pub use engine::SignalEngine;

use serde::{Deserialize, Serialize};

use crate::normalize::clamp;

/// The nine pump-likelihood signals, in descending weight order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SignalName {
    OiSurge,
    FundingRate,
    LiquidationLeverage,
    CrossExchangeVolume,
    DepthImbalance,
    VolumePriceDecouple,
    VolatilityCompression,
    LongShortRatio,
    FuturesSpotDivergence,
}

impl SignalName {
    pub const ALL: [SignalName; 9] = [
        SignalName::OiSurge,
        SignalName::FundingRate,
        SignalName::LiquidationLeverage,
        SignalName::CrossExchangeVolume,
        SignalName::DepthImbalance,
        SignalName::VolumePriceDecouple,
        SignalName::VolatilityCompression,
        SignalName::LongShortRatio,
        SignalName::FuturesSpotDivergence,
    ];

    /// Weight in the composite score. Weights across all signals sum to 1.0.
    pub fn weight(&self) -> f64 {
        match self {
            SignalName::OiSurge => 0.18,
            SignalName::FundingRate => 0.17,
            SignalName::LiquidationLeverage => 0.15,
            SignalName::CrossExchangeVolume => 0.12,
            SignalName::DepthImbalance => 0.11,
            SignalName::VolumePriceDecouple => 0.08,
            SignalName::VolatilityCompression => 0.08,
            SignalName::LongShortRatio => 0.06,
            SignalName::FuturesSpotDivergence => 0.05,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalName::OiSurge => "oi_surge",
            SignalName::FundingRate => "funding_rate",
            SignalName::LiquidationLeverage => "liquidation_leverage",
            SignalName::CrossExchangeVolume => "cross_exchange_volume",
            SignalName::DepthImbalance => "depth_imbalance",
            SignalName::VolumePriceDecouple => "volume_price_decouple",
            SignalName::VolatilityCompression => "volatility_compression",
            SignalName::LongShortRatio => "long_short_ratio",
            SignalName::FuturesSpotDivergence => "futures_spot_divergence",
        }
    }
}

impl std::fmt::Display for SignalName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One computed signal. `normalized_score` is always within [0, 100].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub raw_value: f64,
    pub normalized_score: f64,
    pub metadata: serde_json::Value,
}

impl Signal {
    pub fn new(raw_value: f64, normalized_score: f64, metadata: serde_json::Value) -> Self {
        Self {
            raw_value,
            normalized_score: clamp(normalized_score, 0.0, 100.0),
            metadata,
        }
    }

    /// Neutral signal for missing or insufficient data. Never an error: the
    /// composite just sees a zero contribution with the reason preserved.
    pub fn insufficient(reason: &str) -> Self {
        Self {
            raw_value: 0.0,
            normalized_score: 0.0,
            metadata: serde_json::json!({ "reason": reason }),
        }
    }

    pub fn reason(&self) -> Option<&str> {
        self.metadata.get("reason").and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_sum_to_one() {
        let total: f64 = SignalName::ALL.iter().map(|s| s.weight()).sum();
        assert!((total - 1.0).abs() < 1e-9, "weights sum to {total}");
    }

    #[test]
    fn test_signal_new_clamps_score() {
        assert_eq!(Signal::new(1.0, 150.0, serde_json::Value::Null).normalized_score, 100.0);
        assert_eq!(Signal::new(1.0, -5.0, serde_json::Value::Null).normalized_score, 0.0);
    }

    #[test]
    fn test_insufficient_carries_reason() {
        let signal = Signal::insufficient("no hist OI");
        assert_eq!(signal.normalized_score, 0.0);
        assert_eq!(signal.reason(), Some("no hist OI"));
    }

    #[test]
    fn test_name_serde_matches_as_str() {
        for name in SignalName::ALL {
            let json = serde_json::to_value(name).unwrap();
            assert_eq!(json, serde_json::json!(name.as_str()));
        }
    }
}
