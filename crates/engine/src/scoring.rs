//! Weighted aggregation of indicator signals into a single recommendation

use serde::Serialize;

use crate::indicators::{
    AdxResult, BollingerResult, Indicator, MacdResult, MovingAverageResult, PatternScan, Reading,
    RsiResult, StochRsiResult, VolumeResult,
};
use crate::types::Bias;

// ============================================================================
// Weights
// ============================================================================

pub const WEIGHT_RSI: f64 = 15.0;
pub const WEIGHT_MACD: f64 = 15.0;
pub const WEIGHT_MA200: f64 = 10.0;
pub const WEIGHT_BOLLINGER: f64 = 10.0;
pub const WEIGHT_VOLUME: f64 = 20.0;
pub const WEIGHT_PATTERNS: f64 = 20.0;
pub const WEIGHT_STOCH_RSI: f64 = 5.0;
pub const WEIGHT_ADX: f64 = 5.0;

const STRONG_THRESHOLD: f64 = 70.0;
const THRESHOLD: f64 = 55.0;

/// The indicator results a score is computed from. Absent entries carry no
/// weight; insufficient readings still count with their neutral default.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    pub rsi: Option<Reading<RsiResult>>,
    pub macd: Option<Reading<MacdResult>>,
    pub ma200: Option<Reading<MovingAverageResult>>,
    pub bollinger: Option<Reading<BollingerResult>>,
    pub volume: Option<Reading<VolumeResult>>,
    pub patterns: Option<Reading<PatternScan>>,
    pub stoch_rsi: Option<Reading<StochRsiResult>>,
    pub adx: Option<Reading<AdxResult>>,
}

impl IndicatorSnapshot {
    fn weighted(&self) -> [(f64, Option<&dyn Indicator>); 8] {
        fn dyn_ref<T: Indicator>(r: &Option<Reading<T>>) -> Option<&dyn Indicator> {
            r.as_ref().map(|r| r as &dyn Indicator)
        }
        [
            (WEIGHT_RSI, dyn_ref(&self.rsi)),
            (WEIGHT_MACD, dyn_ref(&self.macd)),
            (WEIGHT_MA200, dyn_ref(&self.ma200)),
            (WEIGHT_BOLLINGER, dyn_ref(&self.bollinger)),
            (WEIGHT_VOLUME, dyn_ref(&self.volume)),
            (WEIGHT_PATTERNS, dyn_ref(&self.patterns)),
            (WEIGHT_STOCH_RSI, dyn_ref(&self.stoch_rsi)),
            (WEIGHT_ADX, dyn_ref(&self.adx)),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
}

impl Recommendation {
    pub fn label(&self) -> &'static str {
        match self {
            Self::StrongBuy => "STRONG BUY",
            Self::Buy => "BUY",
            Self::Hold => "HOLD",
            Self::Sell => "SELL",
            Self::StrongSell => "STRONG SELL",
        }
    }

    pub fn bias(&self) -> Bias {
        match self {
            Self::StrongBuy | Self::Buy => Bias::Bullish,
            Self::Hold => Bias::Neutral,
            Self::Sell | Self::StrongSell => Bias::Bearish,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverallScore {
    /// Rounded to a whole percent
    pub bullish_percent: f64,
    /// Rounded to a whole percent
    pub bearish_percent: f64,
    /// Absolute gap between the unrounded percentages
    pub confidence: f64,
    pub recommendation: Recommendation,
    pub signal: Bias,
}

/// Combine the snapshot into bullish/bearish percentages of the total weight
/// present. An empty snapshot reads 50/50 and holds.
pub fn overall_score(snapshot: &IndicatorSnapshot) -> OverallScore {
    let mut bullish = 0.0;
    let mut bearish = 0.0;
    let mut total = 0.0;

    for (weight, indicator) in snapshot.weighted() {
        let Some(indicator) = indicator else { continue };
        total += weight;
        match indicator.bias() {
            Bias::Bullish => bullish += weight,
            Bias::Bearish => bearish += weight,
            Bias::Neutral => {}
        }
    }

    let (bullish_pct, bearish_pct) = if total > 0.0 {
        (bullish / total * 100.0, bearish / total * 100.0)
    } else {
        (50.0, 50.0)
    };

    let recommendation = if bullish_pct >= STRONG_THRESHOLD {
        Recommendation::StrongBuy
    } else if bullish_pct >= THRESHOLD {
        Recommendation::Buy
    } else if bearish_pct >= STRONG_THRESHOLD {
        Recommendation::StrongSell
    } else if bearish_pct >= THRESHOLD {
        Recommendation::Sell
    } else {
        Recommendation::Hold
    };

    OverallScore {
        bullish_percent: bullish_pct.round(),
        bearish_percent: bearish_pct.round(),
        confidence: (bullish_pct - bearish_pct).abs(),
        recommendation,
        signal: recommendation.bias(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{bollinger_bands, macd, ma200, rsi};

    fn rsi_reading(signal: Bias) -> Reading<RsiResult> {
        Reading::Computed(RsiResult {
            value: 55.0,
            signal,
            description: String::new(),
        })
    }

    fn ma_reading(signal: Bias) -> Reading<MovingAverageResult> {
        Reading::Computed(MovingAverageResult {
            value: 1.0,
            period: 200,
            signal,
            description: String::new(),
        })
    }

    #[test]
    fn test_empty_snapshot_holds() {
        let score = overall_score(&IndicatorSnapshot::default());
        assert_eq!(score.bullish_percent, 50.0);
        assert_eq!(score.bearish_percent, 50.0);
        assert_eq!(score.recommendation, Recommendation::Hold);
    }

    #[test]
    fn test_all_neutral_is_zero_and_hold() {
        let snapshot = IndicatorSnapshot {
            rsi: Some(rsi(&[1.0, 2.0, 3.0], 14)),
            macd: Some(macd(&[1.0, 2.0, 3.0], 12, 26, 9)),
            bollinger: Some(bollinger_bands(&[1.0], 20, 2.0)),
            ..Default::default()
        };
        let score = overall_score(&snapshot);
        assert_eq!(score.bullish_percent, 0.0);
        assert_eq!(score.bearish_percent, 0.0);
        assert_eq!(score.confidence, 0.0);
        assert_eq!(score.recommendation, Recommendation::Hold);
    }

    #[test]
    fn test_unanimous_bullish_is_strong_buy() {
        let snapshot = IndicatorSnapshot {
            rsi: Some(rsi_reading(Bias::Bullish)),
            ma200: Some(ma_reading(Bias::Bullish)),
            ..Default::default()
        };
        let score = overall_score(&snapshot);
        assert_eq!(score.bullish_percent, 100.0);
        assert_eq!(score.recommendation, Recommendation::StrongBuy);
        assert_eq!(score.signal, Bias::Bullish);
        assert_eq!(score.confidence, 100.0);
    }

    #[test]
    fn test_weighted_split() {
        // rsi 15 bullish vs ma200 10 bearish -> 60 / 40
        let snapshot = IndicatorSnapshot {
            rsi: Some(rsi_reading(Bias::Bullish)),
            ma200: Some(ma_reading(Bias::Bearish)),
            ..Default::default()
        };
        let score = overall_score(&snapshot);
        assert_eq!(score.bullish_percent, 60.0);
        assert_eq!(score.bearish_percent, 40.0);
        assert_eq!(score.recommendation, Recommendation::Buy);
        assert!((score.confidence - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_bearish_majority_sells() {
        let snapshot = IndicatorSnapshot {
            rsi: Some(rsi_reading(Bias::Bearish)),
            ma200: Some(ma_reading(Bias::Bearish)),
            ..Default::default()
        };
        assert_eq!(overall_score(&snapshot).recommendation, Recommendation::StrongSell);

        let prices: Vec<f64> = (0..40).map(|i| 100.0 - i as f64).collect();
        let snapshot = IndicatorSnapshot {
            ma200: Some(ma200(&prices)),
            ..Default::default()
        };
        assert_eq!(overall_score(&snapshot).signal, Bias::Bearish);
    }

    #[test]
    fn test_percentages_bounded() {
        let snapshot = IndicatorSnapshot {
            rsi: Some(rsi_reading(Bias::Bullish)),
            ma200: Some(ma_reading(Bias::Neutral)),
            ..Default::default()
        };
        let score = overall_score(&snapshot);
        assert!((0.0..=100.0).contains(&score.bullish_percent));
        assert!((0.0..=100.0).contains(&score.bearish_percent));
    }
}
