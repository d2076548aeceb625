//! Full single-instrument analysis for display

use serde::Serialize;

use crate::indicators::{
    adx, bollinger_bands, detect_candlestick_patterns, fibonacci, ma200, macd, obv,
    pivot_from_candles, rsi, stoch_rsi, support_resistance, volume_analysis, FibonacciResult,
    ObvResult, PatternScan, PivotPoints, Reading, SupportResistance,
};
use crate::scoring::{overall_score, IndicatorSnapshot, OverallScore};
use crate::types::{values, volumes, Candle, PricePoint};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentAnalysis {
    /// Last value of the price series
    pub price: f64,
    /// The weighted indicators feeding the overall score
    pub indicators: IndicatorSnapshot,
    pub obv: Reading<ObvResult>,
    pub support_resistance: Reading<SupportResistance>,
    pub fibonacci: Reading<FibonacciResult>,
    pub pivots: Reading<PivotPoints>,
    pub overall: OverallScore,
}

impl InstrumentAnalysis {
    pub fn patterns(&self) -> Option<&PatternScan> {
        self.indicators.patterns.as_ref().map(|p| p.get())
    }
}

/// Run every indicator over an instrument. Price-based indicators read the
/// line series; volume, pattern, trend-strength and pivot indicators read
/// the candles.
pub fn analyze_instrument(candles: &[Candle], series: &[PricePoint]) -> InstrumentAnalysis {
    let prices = values(series);
    let vols = volumes(candles);

    let indicators = IndicatorSnapshot {
        rsi: Some(rsi(&prices, 14)),
        macd: Some(macd(&prices, 12, 26, 9)),
        ma200: Some(ma200(&prices)),
        bollinger: Some(bollinger_bands(&prices, 20, 2.0)),
        volume: Some(volume_analysis(&vols, &prices)),
        patterns: Some(detect_candlestick_patterns(candles)),
        stoch_rsi: Some(stoch_rsi(&prices, 14, 14, 3, 3)),
        adx: Some(adx(candles, 14)),
    };
    let overall = overall_score(&indicators);

    InstrumentAnalysis {
        price: prices.last().copied().unwrap_or_default(),
        obv: obv(&prices, &vols),
        support_resistance: support_resistance(&prices, candles),
        fibonacci: fibonacci(&prices),
        pivots: pivot_from_candles(candles),
        indicators,
        overall,
    }
}
