//! Moving-average bands: MA200 trend filter and Bollinger Bands

use serde::Serialize;
use ta::indicators::BollingerBands;
use ta::Next;

use super::{guard, sma, Indicator, Reading, INSUFFICIENT_DATA};
use crate::types::Bias;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovingAverageResult {
    pub value: f64,
    /// Effective period, shortened when history is below 200 bars
    pub period: usize,
    pub signal: Bias,
    pub description: String,
}

impl Indicator for MovingAverageResult {
    fn bias(&self) -> Bias {
        self.signal
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Long-term trend filter: SMA over `min(len, 200)` bars
pub fn ma200(prices: &[f64]) -> Reading<MovingAverageResult> {
    let fallback = || MovingAverageResult {
        value: 0.0,
        period: 0,
        signal: Bias::Neutral,
        description: INSUFFICIENT_DATA.to_string(),
    };

    guard(prices.len(), 1, fallback, || {
        let period = prices.len().min(200);
        let value = sma(prices, period)
            .last()
            .copied()
            .flatten()
            .unwrap_or_default();
        let current = prices[prices.len() - 1];
        let (signal, description) = if current > value {
            (Bias::Bullish, "Price above MA")
        } else {
            (Bias::Bearish, "Price below MA")
        };
        MovingAverageResult {
            value,
            period,
            signal,
            description: description.to_string(),
        }
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BollingerResult {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    pub signal: Bias,
    pub description: String,
}

impl BollingerResult {
    /// Position of `price` inside the band, 0 at lower and 1 at upper.
    /// A collapsed band reads as the midpoint.
    pub fn percent_b(&self, price: f64) -> f64 {
        let width = self.upper - self.lower;
        if width <= 0.0 {
            0.5
        } else {
            (price - self.lower) / width
        }
    }
}

impl Indicator for BollingerResult {
    fn bias(&self) -> Bias {
        self.signal
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Mean and one population standard deviation of `window`
fn unit_band(window: &[f64]) -> Option<(f64, f64)> {
    let mut bands = BollingerBands::new(window.len(), 1.0).ok()?;
    let out = window.iter().map(|&p| bands.next(p)).last()?;
    Some((out.average, (out.upper - out.average).max(0.0)))
}

/// Bollinger Bands using the population standard deviation of the last
/// `period` prices. Needs `period` prices.
pub fn bollinger_bands(prices: &[f64], period: usize, std_dev: f64) -> Reading<BollingerResult> {
    let fallback = || BollingerResult {
        upper: 0.0,
        middle: 0.0,
        lower: 0.0,
        signal: Bias::Neutral,
        description: INSUFFICIENT_DATA.to_string(),
    };
    let required = if period == 0 { usize::MAX } else { period };

    guard(prices.len(), required, fallback, || {
        let current = prices[prices.len() - 1];
        let (middle, deviation) =
            unit_band(&prices[prices.len() - period..]).unwrap_or((current, 0.0));
        let band = std_dev.max(0.0) * deviation;
        let upper = middle + band;
        let lower = middle - band;

        let (signal, description) = if band <= 0.0 {
            (Bias::Neutral, "Bands collapsed")
        } else if current >= upper {
            (Bias::Bearish, "Touching upper band")
        } else if current <= lower {
            (Bias::Bullish, "Touching lower band")
        } else if current > middle {
            (Bias::Bullish, "Above middle band")
        } else {
            (Bias::Bearish, "Below middle band")
        };

        BollingerResult {
            upper,
            middle,
            lower,
            signal,
            description: description.to_string(),
        }
    })
}
