//! Technical indicator library
//!
//! Stateless functions that turn price, volume and OHLC series into indicator
//! readings. Every function is total: too-short input produces a documented
//! neutral default wrapped in [`Reading::Insufficient`] instead of an error,
//! so callers can tell "flat market" apart from "not enough history".

pub mod bands;
pub mod candlestick;
pub mod levels;
pub mod oscillators;
pub mod volume;

use serde::Serialize;
use ta::indicators::SimpleMovingAverage;
use ta::Next;

use crate::types::Bias;

pub use bands::{bollinger_bands, ma200, BollingerResult, MovingAverageResult};
pub use candlestick::{detect_candlestick_patterns, Pattern, PatternScan};
pub use levels::{
    fibonacci, pivot_from_candles, pivot_points, support_resistance, FibLevel, FibonacciResult,
    Level, PivotPoints, SupportResistance,
};
pub use oscillators::{
    adx, macd, obv, rsi, stoch_rsi, AdxResult, MacdResult, ObvResult, ObvTrend, RsiResult,
    StochRsiResult, TrendStrength,
};
pub use volume::{format_volume, volume_analysis, VolumeResult, VolumeTrend};

// ============================================================================
// Shared result capability
// ============================================================================

/// Capability shared by every indicator result
pub trait Indicator {
    fn bias(&self) -> Bias;
    fn description(&self) -> &str;
}

/// An indicator result tagged with whether enough history was available
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "result", rename_all = "snake_case")]
pub enum Reading<T> {
    Computed(T),
    /// Not enough history; carries the neutral default
    Insufficient(T),
}

impl<T> Reading<T> {
    pub fn get(&self) -> &T {
        match self {
            Self::Computed(v) | Self::Insufficient(v) => v,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Self::Computed(v) | Self::Insufficient(v) => v,
        }
    }

    pub fn is_insufficient(&self) -> bool {
        matches!(self, Self::Insufficient(_))
    }
}

impl<T> std::ops::Deref for Reading<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.get()
    }
}

impl<T: Indicator> Indicator for Reading<T> {
    fn bias(&self) -> Bias {
        self.get().bias()
    }

    fn description(&self) -> &str {
        self.get().description()
    }
}

/// Run `compute` when at least `required` points are available, otherwise
/// return the `fallback` default tagged as insufficient.
pub(crate) fn guard<T>(
    available: usize,
    required: usize,
    fallback: impl FnOnce() -> T,
    compute: impl FnOnce() -> T,
) -> Reading<T> {
    if available < required {
        Reading::Insufficient(fallback())
    } else {
        Reading::Computed(compute())
    }
}

pub(crate) const INSUFFICIENT_DATA: &str = "Insufficient data";

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

pub(crate) fn max_of(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

pub(crate) fn min_of(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::INFINITY, f64::min)
}

// ============================================================================
// Base series transforms
// ============================================================================

/// Simple moving average aligned to the input; the first `period - 1`
/// entries are `None`.
pub fn sma(series: &[f64], period: usize) -> Vec<Option<f64>> {
    let Ok(mut indicator) = SimpleMovingAverage::new(period) else {
        return vec![None; series.len()];
    };
    series
        .iter()
        .enumerate()
        .map(|(i, &x)| {
            let value = indicator.next(x);
            (i + 1 >= period).then_some(value)
        })
        .collect()
}

/// Exponential moving average seeded with the SMA of the first `period`
/// values, aligned to the input. All `None` when the input is shorter than
/// `period`.
pub fn ema(series: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; series.len()];
    if period == 0 || series.len() < period {
        return out;
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut prev = series[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(prev);

    for (i, &x) in series.iter().enumerate().skip(period) {
        prev = (x - prev) * k + prev;
        out[i] = Some(prev);
    }
    out
}

/// Last defined entry of an aligned series
pub(crate) fn last_defined(series: &[Option<f64>]) -> Option<f64> {
    series.iter().rev().find_map(|v| *v)
}
