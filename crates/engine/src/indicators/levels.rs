//! Price levels: clustered support/resistance, Fibonacci retracement and
//! classic pivot points

use serde::Serialize;

use super::{guard, max_of, min_of, Indicator, Reading, INSUFFICIENT_DATA};
use crate::types::{Bias, Candle};

// ============================================================================
// Support / Resistance
// ============================================================================

const MIN_LEVEL_HISTORY: usize = 20;
const CLUSTER_TOLERANCE: f64 = 0.005;
const NEAR_LEVEL_PCT: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Level {
    pub price: f64,
    /// Accumulated weight of every candidate merged into this level
    pub strength: f64,
    pub touches: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupportResistance {
    /// Up to three levels below price, nearest first
    pub supports: Vec<Level>,
    /// Up to three levels above price, nearest first
    pub resistances: Vec<Level>,
    pub support_distance_pct: Option<f64>,
    pub resistance_distance_pct: Option<f64>,
    pub signal: Bias,
    pub description: String,
}

impl SupportResistance {
    pub fn nearest_support(&self) -> Option<&Level> {
        self.supports.first()
    }

    pub fn nearest_resistance(&self) -> Option<&Level> {
        self.resistances.first()
    }
}

impl Indicator for SupportResistance {
    fn bias(&self) -> Bias {
        self.signal
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Swing points over a 5-bar window, strictly above/below both neighbours
/// on each side
fn swing_points(prices: &[f64]) -> Vec<Level> {
    let mut out = Vec::new();
    for i in 2..prices.len().saturating_sub(2) {
        let p = prices[i];
        let neighbours = [prices[i - 2], prices[i - 1], prices[i + 1], prices[i + 2]];
        if neighbours.iter().all(|&n| p > n) || neighbours.iter().all(|&n| p < n) {
            out.push(Level {
                price: p,
                strength: 1.0,
                touches: 1,
            });
        }
    }
    out
}

/// Merge candidates (sorted ascending) into the first group whose anchor
/// price is within `tolerance`
fn cluster(mut candidates: Vec<Level>, tolerance: f64) -> Vec<Level> {
    candidates.sort_by(|a, b| a.price.total_cmp(&b.price));
    let mut groups: Vec<Level> = Vec::new();
    for level in candidates {
        match groups
            .iter_mut()
            .find(|g| (g.price - level.price).abs() < tolerance)
        {
            Some(group) => {
                group.strength += level.strength;
                group.touches += 1;
            }
            None => groups.push(level),
        }
    }
    groups
}

/// Detect and rank support/resistance levels from swing points in `prices`
/// and the highs/lows of the last 20 `candles`. Needs 20 prices.
pub fn support_resistance(prices: &[f64], candles: &[Candle]) -> Reading<SupportResistance> {
    let fallback = || SupportResistance {
        supports: Vec::new(),
        resistances: Vec::new(),
        support_distance_pct: None,
        resistance_distance_pct: None,
        signal: Bias::Neutral,
        description: INSUFFICIENT_DATA.to_string(),
    };

    guard(prices.len(), MIN_LEVEL_HISTORY, fallback, || {
        let current = prices[prices.len() - 1];

        let mut candidates = swing_points(prices);
        for c in &candles[candles.len().saturating_sub(MIN_LEVEL_HISTORY)..] {
            for price in [c.high, c.low] {
                candidates.push(Level {
                    price,
                    strength: 0.5,
                    touches: 1,
                });
            }
        }

        let mut groups = cluster(candidates, current * CLUSTER_TOLERANCE);
        groups.sort_by(|a, b| b.strength.total_cmp(&a.strength));

        let mut supports: Vec<Level> = groups.iter().filter(|l| l.price < current).copied().collect();
        supports.sort_by(|a, b| b.price.total_cmp(&a.price));
        supports.truncate(3);

        let mut resistances: Vec<Level> = groups.iter().filter(|l| l.price > current).copied().collect();
        resistances.sort_by(|a, b| a.price.total_cmp(&b.price));
        resistances.truncate(3);

        let mut result = SupportResistance {
            supports,
            resistances,
            support_distance_pct: None,
            resistance_distance_pct: None,
            signal: Bias::Neutral,
            description: "Between levels".to_string(),
        };

        if let (Some(s), Some(r)) = (result.supports.first(), result.resistances.first()) {
            if current > 0.0 {
                let to_support = (current - s.price) / current * 100.0;
                let to_resistance = (r.price - current) / current * 100.0;
                result.support_distance_pct = Some(to_support);
                result.resistance_distance_pct = Some(to_resistance);

                if to_support < NEAR_LEVEL_PCT {
                    result.signal = Bias::Bullish;
                    result.description = format!("Near support ({to_support:.1}%)");
                } else if to_resistance < NEAR_LEVEL_PCT {
                    result.signal = Bias::Bearish;
                    result.description = format!("Near resistance ({to_resistance:.1}%)");
                } else {
                    result.description = format!("S: {to_support:.1}% | R: {to_resistance:.1}%");
                }
            }
        }

        result
    })
}

// ============================================================================
// Fibonacci retracement
// ============================================================================

const FIB_RATIOS: [(f64, &str); 7] = [
    (0.0, "0%"),
    (0.236, "23.6%"),
    (0.382, "38.2%"),
    (0.5, "50%"),
    (0.618, "61.8%"),
    (0.786, "78.6%"),
    (1.0, "100%"),
];

const CRITICAL_RATIOS: [f64; 3] = [0.382, 0.5, 0.618];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FibLevel {
    pub ratio: f64,
    pub label: &'static str,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FibonacciResult {
    /// Ordered from 0% to 100%, oriented by trend
    pub levels: Vec<FibLevel>,
    pub high: f64,
    pub low: f64,
    /// Bullish for an uptrend over the last 20 bars, bearish otherwise
    pub trend: Bias,
    pub nearest: Option<FibLevel>,
    pub percent_from_nearest: f64,
    pub signal: Bias,
    pub description: String,
}

impl Indicator for FibonacciResult {
    fn bias(&self) -> Bias {
        self.signal
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Fibonacci retracement over the last `min(len, 50)` prices. Needs 20 prices.
pub fn fibonacci(prices: &[f64]) -> Reading<FibonacciResult> {
    let fallback = || FibonacciResult {
        levels: Vec::new(),
        high: 0.0,
        low: 0.0,
        trend: Bias::Neutral,
        nearest: None,
        percent_from_nearest: 0.0,
        signal: Bias::Neutral,
        description: INSUFFICIENT_DATA.to_string(),
    };

    guard(prices.len(), MIN_LEVEL_HISTORY, fallback, || {
        let recent = &prices[prices.len() - prices.len().min(50)..];
        let high = max_of(recent);
        let low = min_of(recent);
        let diff = high - low;
        let current = prices[prices.len() - 1];

        let short_term = &prices[prices.len() - MIN_LEVEL_HISTORY..];
        let uptrend = short_term[short_term.len() - 1] > short_term[0];

        let levels: Vec<FibLevel> = FIB_RATIOS
            .iter()
            .map(|&(ratio, label)| FibLevel {
                ratio,
                label,
                price: if uptrend {
                    low + diff * ratio
                } else {
                    high - diff * ratio
                },
            })
            .collect();

        let nearest = levels
            .iter()
            .copied()
            .min_by(|a, b| (current - a.price).abs().total_cmp(&(current - b.price).abs()));

        let percent_from_nearest = match nearest {
            Some(l) if current > 0.0 => (current - l.price).abs() / current * 100.0,
            _ => 0.0,
        };

        let critical = levels.iter().find(|l| {
            CRITICAL_RATIOS.contains(&l.ratio)
                && current > 0.0
                && (current - l.price).abs() / current < 0.01
        });

        let (signal, description) = match critical {
            Some(l) if uptrend => (Bias::Bullish, format!("At {} retracement", l.label)),
            Some(l) => (Bias::Bearish, format!("At {} retracement", l.label)),
            None => (Bias::Neutral, "Between Fibonacci levels".to_string()),
        };

        FibonacciResult {
            levels,
            high,
            low,
            trend: if uptrend { Bias::Bullish } else { Bias::Bearish },
            nearest,
            percent_from_nearest,
            signal,
            description,
        }
    })
}

// ============================================================================
// Pivot points
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PivotPoints {
    pub pp: f64,
    pub r1: f64,
    pub r2: f64,
    pub r3: f64,
    pub s1: f64,
    pub s2: f64,
    pub s3: f64,
}

/// Classic floor-trader pivots from a completed bar's high, low and close
pub fn pivot_points(high: f64, low: f64, close: f64) -> PivotPoints {
    let pp = (high + low + close) / 3.0;
    PivotPoints {
        pp,
        r1: 2.0 * pp - low,
        r2: pp + (high - low),
        r3: high + 2.0 * (pp - low),
        s1: 2.0 * pp - high,
        s2: pp - (high - low),
        s3: low - 2.0 * (high - pp),
    }
}

/// Pivots from the previous completed candle (second to last)
pub fn pivot_from_candles(candles: &[Candle]) -> Reading<PivotPoints> {
    guard(candles.len(), 2, PivotPoints::default, || {
        let prev = &candles[candles.len() - 2];
        pivot_points(prev.high, prev.low, prev.close)
    })
}
