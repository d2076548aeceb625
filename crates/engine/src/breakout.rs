//! Breakout/retest and triangle/wedge detection for the high-leverage scan

use serde::Serialize;

use crate::indicators::{max_of, mean, min_of, support_resistance};
use crate::types::{closes, volumes, Candle, Direction};

// ============================================================================
// Breakout + retest
// ============================================================================

const BREAKOUT_TOLERANCE: f64 = 0.003;
const RECENT_BARS: usize = 5;
const VOLUME_WINDOW: usize = 20;
const CONFIRM_VOLUME: f64 = 1.5;
const STRONG_VOLUME: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Breakout {
    pub direction: Direction,
    pub score: i32,
    /// The support or resistance price that was broken
    pub level: f64,
    pub retest: bool,
    pub pattern: &'static str,
    pub reasons: Vec<&'static str>,
}

/// Detect a volume-confirmed break of the nearest resistance (long) or,
/// failing that, of the nearest support (short).
///
/// Levels are measured against the last close; `current_price` is the live
/// price that must have cleared the level by more than 0.3%.
pub fn detect_breakout(candles: &[Candle], current_price: f64) -> Option<Breakout> {
    let prices = closes(candles);
    let sr = support_resistance(&prices, candles);
    if sr.is_insufficient() {
        return None;
    }

    let vols = volumes(candles);
    let avg_volume = mean(&vols[vols.len().saturating_sub(VOLUME_WINDOW)..]);
    let recent_start = candles.len().saturating_sub(RECENT_BARS);
    let recent = &candles[recent_start..];

    if let Some(resistance) = sr.nearest_resistance() {
        let level = resistance.price;
        let tolerance = level * BREAKOUT_TOLERANCE;
        if current_price > level + tolerance {
            let found = recent
                .iter()
                .position(|c| c.close > level && c.volume > avg_volume * CONFIRM_VOLUME);
            if let Some(idx) = found {
                let retest = recent[idx + 1..]
                    .iter()
                    .any(|c| (c.low - level).abs() < tolerance);
                return Some(score_breakout(
                    Direction::Long,
                    level,
                    recent[idx].volume > avg_volume * STRONG_VOLUME,
                    retest,
                ));
            }
        }
    }

    if let Some(support) = sr.nearest_support() {
        let level = support.price;
        let tolerance = level * BREAKOUT_TOLERANCE;
        if current_price < level - tolerance {
            let found = recent
                .iter()
                .position(|c| c.close < level && c.volume > avg_volume * CONFIRM_VOLUME);
            if let Some(idx) = found {
                let retest = recent[idx + 1..]
                    .iter()
                    .any(|c| (c.high - level).abs() < tolerance);
                return Some(score_breakout(
                    Direction::Short,
                    level,
                    recent[idx].volume > avg_volume * STRONG_VOLUME,
                    retest,
                ));
            }
        }
    }

    None
}

fn score_breakout(direction: Direction, level: f64, strong_volume: bool, retest: bool) -> Breakout {
    let mut score = 20;
    let mut reasons = vec![match direction {
        Direction::Long => "Resistance broken",
        Direction::Short => "Support broken",
    }];
    let mut pattern = match direction {
        Direction::Long => "Resistance Breakout",
        Direction::Short => "Support Breakdown",
    };

    if strong_volume {
        score += 10;
        reasons.push("Strong volume");
    }
    if retest {
        score += 10;
        pattern = "Breakout + Retest";
        reasons.push("Retest confirmed");
    }

    Breakout {
        direction,
        score,
        level,
        retest,
        pattern,
        reasons,
    }
}

// ============================================================================
// Triangles and wedges
// ============================================================================

const GEOMETRY_BARS: usize = 20;
const FLAT_SLOPE: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryKind {
    AscendingTriangle,
    DescendingTriangle,
    FallingWedge,
    RisingWedge,
    SymmetricalTriangle,
}

impl GeometryKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::AscendingTriangle => "Ascending Triangle",
            Self::DescendingTriangle => "Descending Triangle",
            Self::FallingWedge => "Falling Wedge",
            Self::RisingWedge => "Rising Wedge",
            Self::SymmetricalTriangle => "Symmetrical Triangle",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeometricPattern {
    pub kind: GeometryKind,
    pub direction: Direction,
    pub score: i32,
}

impl GeometricPattern {
    pub fn reason(&self) -> String {
        let way = match self.direction {
            Direction::Long => "breakout up",
            Direction::Short => "breakdown",
        };
        format!("{} {way}", self.kind.label())
    }
}

/// Least-squares slope of `values` against their index, divided by the mean
pub fn linear_trend(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if values.len() < 2 {
        return 0.0;
    }
    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_x2) = (0.0, 0.0, 0.0, 0.0);
    for (i, &y) in values.iter().enumerate() {
        let x = i as f64;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_x2 += x * x;
    }
    let slope = (n * sum_xy - sum_x * sum_y) / (n * sum_x2 - sum_x * sum_x);
    let avg = sum_y / n;
    if avg == 0.0 {
        0.0
    } else {
        slope / avg
    }
}

/// Classify the last 20 bars' high/low geometry. Checks run in a fixed
/// priority order and the first confirmed pattern wins.
pub fn detect_triangle_wedge(candles: &[Candle]) -> Option<GeometricPattern> {
    if candles.len() < GEOMETRY_BARS {
        return None;
    }

    let recent = &candles[candles.len() - GEOMETRY_BARS..];
    let highs: Vec<f64> = recent.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = recent.iter().map(|c| c.low).collect();
    let high_trend = linear_trend(&highs);
    let low_trend = linear_trend(&lows);

    let prices = closes(candles);
    let current = prices[prices.len() - 1];
    let avg10 = mean(&prices[prices.len().saturating_sub(10)..]);

    let found = |kind, direction, score| {
        Some(GeometricPattern {
            kind,
            direction,
            score,
        })
    };

    if high_trend.abs() < FLAT_SLOPE
        && low_trend > FLAT_SLOPE
        && current > max_of(&highs[GEOMETRY_BARS - 5..]) * 0.995
    {
        return found(GeometryKind::AscendingTriangle, Direction::Long, 30);
    }

    if high_trend < -FLAT_SLOPE
        && low_trend.abs() < FLAT_SLOPE
        && current < min_of(&lows[GEOMETRY_BARS - 5..]) * 1.005
    {
        return found(GeometryKind::DescendingTriangle, Direction::Short, 30);
    }

    if high_trend < 0.0 && low_trend < 0.0 && low_trend < high_trend && current > avg10 * 1.02 {
        return found(GeometryKind::FallingWedge, Direction::Long, 25);
    }

    if high_trend > 0.0 && low_trend > 0.0 && high_trend < low_trend && current < avg10 * 0.98 {
        return found(GeometryKind::RisingWedge, Direction::Short, 25);
    }

    if high_trend < 0.0 && low_trend > 0.0 {
        // extremes of the three bars before the latest one
        let prior_highs = &highs[GEOMETRY_BARS - 4..GEOMETRY_BARS - 1];
        let prior_lows = &lows[GEOMETRY_BARS - 4..GEOMETRY_BARS - 1];
        let top = max_of(prior_highs);
        let bottom = min_of(prior_lows);
        let half_range = (max_of(&highs) - min_of(&lows)) / 2.0;

        if top - bottom < half_range * 0.5 {
            if current > top {
                return found(GeometryKind::SymmetricalTriangle, Direction::Long, 20);
            }
            if current < bottom {
                return found(GeometryKind::SymmetricalTriangle, Direction::Short, 20);
            }
        }
    }

    None
}
