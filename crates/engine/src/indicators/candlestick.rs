//! Candlestick pattern recognition over the last five candles

use serde::Serialize;

use super::{guard, Indicator, Reading, INSUFFICIENT_DATA};
use crate::types::{Bias, Candle};

const WINDOW: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pattern {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub kind: Bias,
    /// 2 (weak) to 5 (strong)
    pub strength: u8,
    pub description: &'static str,
}

impl Pattern {
    fn new(name: &'static str, kind: Bias, strength: u8, description: &'static str) -> Self {
        Self {
            name,
            kind,
            strength,
            description,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternScan {
    /// Matches ordered by strength, strongest first
    pub patterns: Vec<Pattern>,
    pub signal: Bias,
    pub description: String,
    pub bullish_count: usize,
    pub bearish_count: usize,
}

impl PatternScan {
    pub fn contains(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| p.name == name)
    }
}

impl Indicator for PatternScan {
    fn bias(&self) -> Bias {
        self.signal
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Evaluate every pattern rule against the latest candles. A window may
/// match several patterns; the aggregate signal is a majority vote of
/// bullish against bearish matches.
pub fn detect_candlestick_patterns(candles: &[Candle]) -> Reading<PatternScan> {
    let fallback = || PatternScan {
        patterns: Vec::new(),
        signal: Bias::Neutral,
        description: INSUFFICIENT_DATA.to_string(),
        bullish_count: 0,
        bearish_count: 0,
    };

    guard(candles.len(), WINDOW, fallback, || {
        let window = &candles[candles.len() - WINDOW..];
        let cur = &window[4];
        let prev = &window[3];
        let prev2 = &window[2];
        let avg_body = window.iter().map(Candle::body).sum::<f64>() / WINDOW as f64;

        let mut patterns = Vec::new();

        if cur.body() < avg_body * 0.1 {
            patterns.push(Pattern::new("Doji", Bias::Neutral, 2, "Indecision, possible reversal"));
        }

        let long_upper = cur.upper_wick() > cur.body() * 2.0;
        let long_lower = cur.lower_wick() > cur.body() * 2.0;
        let short_upper = cur.upper_wick() < cur.body() * 0.5;
        let short_lower = cur.lower_wick() < cur.body() * 0.5;

        if long_lower && short_upper && !cur.is_bullish() {
            patterns.push(Pattern::new("Hammer", Bias::Bullish, 3, "Potential bottom"));
        }
        if long_upper && short_lower {
            patterns.push(Pattern::new("Inverted Hammer", Bias::Bullish, 2, "Buying pressure"));
        }
        if long_upper && short_lower && cur.is_bullish() && prev.is_bullish() {
            patterns.push(Pattern::new("Shooting Star", Bias::Bearish, 3, "Potential top"));
        }

        if cur.is_bullish()
            && !prev.is_bullish()
            && cur.open <= prev.close
            && cur.close >= prev.open
            && cur.body() > prev.body() * 1.5
        {
            patterns.push(Pattern::new("Bullish Engulfing", Bias::Bullish, 4, "Strong buy signal"));
        }
        if !cur.is_bullish()
            && prev.is_bullish()
            && cur.open >= prev.close
            && cur.close <= prev.open
            && cur.body() > prev.body() * 1.5
        {
            patterns.push(Pattern::new("Bearish Engulfing", Bias::Bearish, 4, "Strong sell signal"));
        }

        let small_middle = prev.body() < avg_body * 0.3;
        if !prev2.is_bullish()
            && prev2.body() > avg_body
            && small_middle
            && cur.is_bullish()
            && cur.body() > avg_body
        {
            patterns.push(Pattern::new("Morning Star", Bias::Bullish, 5, "Strong reversal up"));
        }
        if prev2.is_bullish()
            && prev2.body() > avg_body
            && small_middle
            && !cur.is_bullish()
            && cur.body() > avg_body
        {
            patterns.push(Pattern::new("Evening Star", Bias::Bearish, 5, "Strong reversal down"));
        }

        if cur.is_bullish()
            && prev.is_bullish()
            && prev2.is_bullish()
            && cur.close > prev.close
            && prev.close > prev2.close
        {
            patterns.push(Pattern::new("Three White Soldiers", Bias::Bullish, 5, "Strong advance"));
        }
        if !cur.is_bullish()
            && !prev.is_bullish()
            && !prev2.is_bullish()
            && cur.close < prev.close
            && prev.close < prev2.close
        {
            patterns.push(Pattern::new("Three Black Crows", Bias::Bearish, 5, "Strong decline"));
        }

        let range = cur.range();
        if cur.lower_wick() > range * 0.6 || cur.upper_wick() > range * 0.6 {
            if cur.lower_wick() > cur.upper_wick() {
                patterns.push(Pattern::new("Bullish Pin Bar", Bias::Bullish, 3, "Lower prices rejected"));
            } else {
                patterns.push(Pattern::new("Bearish Pin Bar", Bias::Bearish, 3, "Higher prices rejected"));
            }
        }

        let bullish: Vec<&str> = names_of(&patterns, Bias::Bullish);
        let bearish: Vec<&str> = names_of(&patterns, Bias::Bearish);

        let (signal, description) = if bullish.len() > bearish.len() {
            (Bias::Bullish, bullish.join(", "))
        } else if bearish.len() > bullish.len() {
            (Bias::Bearish, bearish.join(", "))
        } else if !patterns.is_empty() {
            let all: Vec<&str> = patterns.iter().map(|p| p.name).collect();
            (Bias::Neutral, all.join(", "))
        } else {
            (Bias::Neutral, "No clear pattern".to_string())
        };

        let (bullish_count, bearish_count) = (bullish.len(), bearish.len());
        // stable: equal strengths keep rule order
        patterns.sort_by(|a, b| b.strength.cmp(&a.strength));

        PatternScan {
            patterns,
            signal,
            description,
            bullish_count,
            bearish_count,
        }
    })
}

fn names_of(patterns: &[Pattern], kind: Bias) -> Vec<&'static str> {
    patterns
        .iter()
        .filter(|p| p.kind == kind)
        .map(|p| p.name)
        .collect()
}
