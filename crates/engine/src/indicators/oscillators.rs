//! Momentum and trend oscillators: RSI, Stochastic RSI, MACD, ADX, OBV

use serde::Serialize;

use super::volume::format_volume;
use super::{ema, guard, last_defined, max_of, min_of, sma, Indicator, Reading, INSUFFICIENT_DATA};
use crate::types::{Bias, Candle};

// ============================================================================
// RSI
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RsiResult {
    pub value: f64,
    pub signal: Bias,
    pub description: String,
}

impl RsiResult {
    fn insufficient() -> Self {
        Self {
            value: 50.0,
            signal: Bias::Neutral,
            description: INSUFFICIENT_DATA.to_string(),
        }
    }
}

impl Indicator for RsiResult {
    fn bias(&self) -> Bias {
        self.signal
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Wilder RSI value over the whole series. Flat input (no gains and no
/// losses) yields the 50 midpoint.
pub(crate) fn rsi_value(prices: &[f64], period: usize) -> f64 {
    let changes: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
    let gain = |c: f64| if c > 0.0 { c } else { 0.0 };
    let loss = |c: f64| if c < 0.0 { -c } else { 0.0 };

    let p = period as f64;
    let mut avg_gain = changes[..period].iter().map(|&c| gain(c)).sum::<f64>() / p;
    let mut avg_loss = changes[..period].iter().map(|&c| loss(c)).sum::<f64>() / p;

    for &c in &changes[period..] {
        avg_gain = (avg_gain * (p - 1.0) + gain(c)) / p;
        avg_loss = (avg_loss * (p - 1.0) + loss(c)) / p;
    }

    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// Relative Strength Index (Wilder smoothing). Needs `period + 1` prices.
pub fn rsi(prices: &[f64], period: usize) -> Reading<RsiResult> {
    let required = if period == 0 { usize::MAX } else { period + 1 };
    guard(prices.len(), required, RsiResult::insufficient, || {
        let value = rsi_value(prices, period);
        let (signal, description) = if value >= 70.0 {
            (Bias::Bearish, "Overbought")
        } else if value <= 30.0 {
            (Bias::Bullish, "Oversold")
        } else if value > 50.0 {
            (Bias::Bullish, "Upward momentum")
        } else {
            (Bias::Bearish, "Downward momentum")
        };
        RsiResult {
            value,
            signal,
            description: description.to_string(),
        }
    })
}

// ============================================================================
// Stochastic RSI
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StochRsiResult {
    pub k: f64,
    pub d: f64,
    pub signal: Bias,
    pub description: String,
    /// Direction of a %K/%D cross on the latest bar, if any
    pub crossover: Option<Bias>,
    pub overbought: bool,
    pub oversold: bool,
}

impl StochRsiResult {
    fn insufficient() -> Self {
        Self {
            k: 50.0,
            d: 50.0,
            signal: Bias::Neutral,
            description: INSUFFICIENT_DATA.to_string(),
            crossover: None,
            overbought: false,
            oversold: false,
        }
    }
}

impl Indicator for StochRsiResult {
    fn bias(&self) -> Bias {
        self.signal
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Raw stochastic of `value` within `[lowest, highest]`; 50 when the window is flat
pub(crate) fn raw_stochastic(value: f64, lowest: f64, highest: f64) -> f64 {
    if highest == lowest {
        50.0
    } else {
        (value - lowest) / (highest - lowest) * 100.0
    }
}

/// Stochastic RSI with SMA-smoothed %K and %D lines.
///
/// The RSI series is rolled over windows of `rsi_period` prices. Needs
/// `rsi_period + stoch_period` prices.
pub fn stoch_rsi(
    prices: &[f64],
    rsi_period: usize,
    stoch_period: usize,
    k_smooth: usize,
    d_smooth: usize,
) -> Reading<StochRsiResult> {
    let required = if rsi_period < 2 || stoch_period == 0 {
        usize::MAX
    } else {
        rsi_period + stoch_period
    };

    guard(prices.len(), required, StochRsiResult::insufficient, || {
        let rsi_series: Vec<f64> = prices
            .windows(rsi_period)
            .map(|w| rsi_value(w, rsi_period - 1))
            .collect();

        let stoch: Vec<f64> = rsi_series
            .windows(stoch_period)
            .map(|w| raw_stochastic(w[w.len() - 1], min_of(w), max_of(w)))
            .collect();

        let k_line: Vec<f64> = sma(&stoch, k_smooth).into_iter().flatten().collect();
        let d_line: Vec<f64> = sma(&k_line, d_smooth).into_iter().flatten().collect();

        let k = k_line.last().copied().unwrap_or(50.0).clamp(0.0, 100.0);
        let d = d_line.last().copied().unwrap_or(50.0).clamp(0.0, 100.0);
        let prev_k = k_line.len().checked_sub(2).map_or(k, |i| k_line[i]);
        let prev_d = d_line.len().checked_sub(2).map_or(d, |i| d_line[i]);

        let mut signal = Bias::Neutral;
        let mut description = "Neutral zone";
        let mut crossover = None;

        if prev_k <= prev_d && k > d {
            crossover = Some(Bias::Bullish);
            signal = Bias::Bullish;
            description = "Bullish cross (K > D)";
        } else if prev_k >= prev_d && k < d {
            crossover = Some(Bias::Bearish);
            signal = Bias::Bearish;
            description = "Bearish cross (K < D)";
        }

        if k >= 80.0 && d >= 80.0 {
            signal = Bias::Bearish;
            description = "Overbought zone";
        } else if k <= 20.0 && d <= 20.0 {
            signal = Bias::Bullish;
            description = "Oversold zone";
        }

        StochRsiResult {
            k,
            d,
            signal,
            description: description.to_string(),
            crossover,
            overbought: k >= 80.0,
            oversold: k <= 20.0,
        }
    })
}

// ============================================================================
// MACD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MacdResult {
    pub macd: f64,
    pub signal_line: f64,
    pub histogram: f64,
    pub trend: Bias,
    pub description: String,
}

impl MacdResult {
    fn insufficient() -> Self {
        Self {
            macd: 0.0,
            signal_line: 0.0,
            histogram: 0.0,
            trend: Bias::Neutral,
            description: INSUFFICIENT_DATA.to_string(),
        }
    }
}

impl Indicator for MacdResult {
    fn bias(&self) -> Bias {
        self.trend
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// MACD line, signal line and histogram. Needs `slow + signal_period` prices.
pub fn macd(prices: &[f64], fast: usize, slow: usize, signal_period: usize) -> Reading<MacdResult> {
    let required = if fast == 0 || slow == 0 || signal_period == 0 {
        usize::MAX
    } else {
        slow + signal_period
    };

    guard(prices.len(), required, MacdResult::insufficient, || {
        let fast_ema = ema(prices, fast);
        let slow_ema = ema(prices, slow);
        let macd_line: Vec<f64> = fast_ema
            .iter()
            .zip(&slow_ema)
            .filter_map(|(f, s)| Some((*f)? - (*s)?))
            .collect();

        let signal_series = ema(&macd_line, signal_period);
        let latest_macd = macd_line.last().copied().unwrap_or(0.0);
        let latest_signal = last_defined(&signal_series).unwrap_or(latest_macd);
        let histogram = latest_macd - latest_signal;

        let (trend, description) = if histogram > 0.0 {
            (Bias::Bullish, "Positive momentum")
        } else {
            (Bias::Bearish, "Negative momentum")
        };

        MacdResult {
            macd: latest_macd,
            signal_line: latest_signal,
            histogram,
            trend,
            description: description.to_string(),
        }
    })
}

// ============================================================================
// ADX
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendStrength {
    Weak,
    Developing,
    Moderate,
    Strong,
    VeryStrong,
}

impl TrendStrength {
    pub fn from_adx(adx: f64) -> Self {
        if adx >= 50.0 {
            Self::VeryStrong
        } else if adx >= 40.0 {
            Self::Strong
        } else if adx >= 25.0 {
            Self::Moderate
        } else if adx >= 20.0 {
            Self::Developing
        } else {
            Self::Weak
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Weak => "No trend or weak trend",
            Self::Developing => "Developing trend",
            Self::Moderate => "Moderate trend",
            Self::Strong => "Strong trend",
            Self::VeryStrong => "Very strong trend",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdxResult {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
    pub signal: Bias,
    pub description: String,
    pub trend_strength: TrendStrength,
    pub has_trend: bool,
    pub strong_trend: bool,
}

impl AdxResult {
    fn insufficient() -> Self {
        Self {
            adx: 0.0,
            plus_di: 0.0,
            minus_di: 0.0,
            signal: Bias::Neutral,
            description: INSUFFICIENT_DATA.to_string(),
            trend_strength: TrendStrength::Weak,
            has_trend: false,
            strong_trend: false,
        }
    }
}

impl Indicator for AdxResult {
    fn bias(&self) -> Bias {
        self.signal
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Wilder smoothing normalised by `period`. Series shorter than `period`
/// are returned unchanged.
pub(crate) fn wilder_smooth(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return data.to_vec();
    }
    let p = period as f64;
    let mut sum: f64 = data[..period].iter().sum();
    let mut out = Vec::with_capacity(data.len() - period + 1);
    out.push(sum / p);
    for &x in &data[period..] {
        sum = sum - sum / p + x;
        out.push(sum / p);
    }
    out
}

/// Average Directional Index with +DI/-DI. Needs `period + 1` candles.
pub fn adx(candles: &[Candle], period: usize) -> Reading<AdxResult> {
    let required = if period == 0 { usize::MAX } else { period + 1 };

    guard(candles.len(), required, AdxResult::insufficient, || {
        let mut tr = Vec::with_capacity(candles.len() - 1);
        let mut plus_dm = Vec::with_capacity(candles.len() - 1);
        let mut minus_dm = Vec::with_capacity(candles.len() - 1);

        for pair in candles.windows(2) {
            let (prev, cur) = (&pair[0], &pair[1]);
            tr.push(
                (cur.high - cur.low)
                    .max((cur.high - prev.close).abs())
                    .max((cur.low - prev.close).abs()),
            );
            let up = cur.high - prev.high;
            let down = prev.low - cur.low;
            plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
            minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
        }

        let smooth_tr = wilder_smooth(&tr, period);
        let smooth_plus = wilder_smooth(&plus_dm, period);
        let smooth_minus = wilder_smooth(&minus_dm, period);

        let di = |dm: &[f64]| -> Vec<f64> {
            smooth_tr
                .iter()
                .zip(dm)
                .map(|(&t, &m)| if t > 0.0 { m / t * 100.0 } else { 0.0 })
                .collect()
        };
        let plus_di = di(&smooth_plus);
        let minus_di = di(&smooth_minus);

        let dx: Vec<f64> = plus_di
            .iter()
            .zip(&minus_di)
            .map(|(&p, &m)| {
                let sum = p + m;
                if sum > 0.0 {
                    (p - m).abs() / sum * 100.0
                } else {
                    0.0
                }
            })
            .collect();

        let tail = &dx[dx.len().saturating_sub(period * 2)..];
        let adx = wilder_smooth(tail, period).last().copied().unwrap_or(0.0);
        let plus = plus_di.last().copied().unwrap_or(0.0);
        let minus = minus_di.last().copied().unwrap_or(0.0);

        let trend_strength = TrendStrength::from_adx(adx);
        let mut description = trend_strength.label().to_string();
        let signal = if adx >= 20.0 {
            if plus > minus {
                description.push_str(" (up)");
                Bias::Bullish
            } else {
                description.push_str(" (down)");
                Bias::Bearish
            }
        } else {
            Bias::Neutral
        };

        AdxResult {
            adx,
            plus_di: plus,
            minus_di: minus,
            signal,
            description,
            trend_strength,
            has_trend: adx >= 20.0,
            strong_trend: adx >= 40.0,
        }
    })
}

// ============================================================================
// OBV
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObvTrend {
    DivergenceBullish,
    DivergenceBearish,
    Accumulation,
    Distribution,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObvResult {
    pub value: f64,
    /// OBV change over the divergence window
    pub change: f64,
    pub signal: Bias,
    pub trend: ObvTrend,
    pub description: String,
}

impl ObvResult {
    fn insufficient() -> Self {
        Self {
            value: 0.0,
            change: 0.0,
            signal: Bias::Neutral,
            trend: ObvTrend::Neutral,
            description: INSUFFICIENT_DATA.to_string(),
        }
    }
}

impl Indicator for ObvResult {
    fn bias(&self) -> Bias {
        self.signal
    }

    fn description(&self) -> &str {
        &self.description
    }
}

const OBV_WINDOW: usize = 10;

/// On-Balance Volume with a 10-point price/volume divergence check
pub fn obv(prices: &[f64], volumes: &[f64]) -> Reading<ObvResult> {
    let len = prices.len().min(volumes.len());

    guard(len, 2, ObvResult::insufficient, || {
        let mut running = 0.0;
        let mut series = Vec::with_capacity(len);
        series.push(0.0);
        for i in 1..len {
            if prices[i] > prices[i - 1] {
                running += volumes[i];
            } else if prices[i] < prices[i - 1] {
                running -= volumes[i];
            }
            series.push(running);
        }

        let start = len.saturating_sub(OBV_WINDOW);
        let obv_change = series[len - 1] - series[start];
        let price_change = prices[len - 1] - prices[start];

        let (signal, trend, label) = if obv_change > 0.0 && price_change < 0.0 {
            (Bias::Bullish, ObvTrend::DivergenceBullish, "Bullish divergence, hidden buying")
        } else if obv_change < 0.0 && price_change > 0.0 {
            (Bias::Bearish, ObvTrend::DivergenceBearish, "Bearish divergence, hidden selling")
        } else if obv_change > 0.0 {
            (Bias::Bullish, ObvTrend::Accumulation, "Positive volume flow")
        } else if obv_change < 0.0 {
            (Bias::Bearish, ObvTrend::Distribution, "Negative volume flow")
        } else {
            (Bias::Neutral, ObvTrend::Neutral, "Neutral volume flow")
        };

        let sign = if obv_change > 0.0 { "+" } else { "" };
        ObvResult {
            value: running.round(),
            change: obv_change,
            signal,
            trend,
            description: format!("{label} ({sign}{})", format_volume(obv_change)),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_walk(seed: u64, n: usize) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut price = 100.0;
        (0..n)
            .map(|_| {
                price *= 1.0 + rng.gen_range(-0.03..0.03);
                price
            })
            .collect()
    }

    fn uptrend(n: usize) -> Vec<f64> {
        // 100, 102, 104, 103, 105, 107, 109, 108, ...
        let steps = [2.0, 2.0, -1.0, 2.0];
        let mut out = vec![100.0];
        for i in 1..n {
            let prev = out[i - 1];
            out.push(prev + steps[(i - 1) % steps.len()]);
        }
        out
    }

    fn flat_candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle {
                time: i as i64 * 3600,
                open: 10.0,
                high: 10.0,
                low: 10.0,
                close: 10.0,
                volume: 0.0,
            })
            .collect()
    }

    #[test]
    fn test_rsi_insufficient_is_neutral() {
        let r = rsi(&[1.0, 2.0, 3.0], 14);
        assert!(r.is_insufficient());
        assert_eq!(r.value, 50.0);
        assert_eq!(r.signal, Bias::Neutral);
    }

    #[test]
    fn test_rsi_bounded_on_random_walks() {
        for seed in 0..20 {
            let prices = random_walk(seed, 120);
            let r = rsi(&prices, 14);
            assert!((0.0..=100.0).contains(&r.value), "seed {seed}: {}", r.value);
        }
    }

    #[test]
    fn test_rsi_rising_series_tends_to_100() {
        let prices: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let r = rsi(&prices, 14);
        assert_eq!(r.value, 100.0);
        assert_eq!(r.signal, Bias::Bearish);
    }

    #[test]
    fn test_rsi_steady_uptrend_reads_overbought() {
        let prices = uptrend(30);
        let r = rsi(&prices, 14);
        assert!(!r.is_insufficient());
        assert!(r.value >= 70.0, "rsi {}", r.value);
        assert_eq!(r.signal, Bias::Bearish);
    }

    #[test]
    fn test_rsi_mild_uptrend_is_bullish() {
        // +2 / -1.5 alternating keeps RSI in the 50..70 band
        let mut prices = vec![100.0];
        for i in 1..30 {
            let step = if i % 2 == 1 { 2.0 } else { -1.5 };
            prices.push(prices[i - 1] + step);
        }
        let r = rsi(&prices, 14);
        assert!(r.value > 50.0 && r.value < 70.0, "rsi {}", r.value);
        assert_eq!(r.signal, Bias::Bullish);
    }

    #[test]
    fn test_rsi_flat_series_is_midpoint() {
        let r = rsi(&[5.0; 20], 14);
        assert_eq!(r.value, 50.0);
    }

    #[test]
    fn test_macd_accelerating_uptrend_is_bullish() {
        let prices: Vec<f64> = (0..40).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let m = macd(&prices, 12, 26, 9);
        assert!(!m.is_insufficient());
        assert!(m.histogram > 0.0);
        assert_eq!(m.trend, Bias::Bullish);
    }

    #[test]
    fn test_macd_insufficient_is_all_zero() {
        let m = macd(&[1.0, 2.0, 3.0], 12, 26, 9);
        assert!(m.is_insufficient());
        assert_eq!(m.macd, 0.0);
        assert_eq!(m.signal_line, 0.0);
        assert_eq!(m.histogram, 0.0);
        assert_eq!(m.trend, Bias::Neutral);
    }

    #[test]
    fn test_stoch_rsi_insufficient_is_neutral() {
        let s = stoch_rsi(&[1.0, 2.0, 3.0], 14, 14, 3, 3);
        assert!(s.is_insufficient());
        assert_eq!((s.k, s.d), (50.0, 50.0));
        assert_eq!(s.crossover, None);
    }

    #[test]
    fn test_stoch_rsi_bounded_on_random_walks() {
        for seed in 0..20 {
            let prices = random_walk(seed + 100, 150);
            let s = stoch_rsi(&prices, 14, 14, 3, 3);
            assert!((0.0..=100.0).contains(&s.k), "seed {seed}: k={}", s.k);
            assert!((0.0..=100.0).contains(&s.d), "seed {seed}: d={}", s.d);
        }
    }

    #[test]
    fn test_stoch_rsi_flat_window_is_midpoint() {
        assert_eq!(raw_stochastic(42.0, 42.0, 42.0), 50.0);
        let s = stoch_rsi(&[7.0; 60], 14, 14, 3, 3);
        assert_eq!(s.k, 50.0);
        assert_eq!(s.d, 50.0);
        assert!(!s.k.is_nan());
    }

    #[test]
    fn test_adx_insufficient() {
        let a = adx(&flat_candles(5), 14);
        assert!(a.is_insufficient());
        assert_eq!(a.trend_strength, TrendStrength::Weak);
    }

    #[test]
    fn test_adx_strong_uptrend() {
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                let base = 100.0 + i as f64 * 2.0;
                Candle {
                    time: i as i64 * 3600,
                    open: base,
                    high: base + 1.5,
                    low: base - 0.5,
                    close: base + 1.0,
                    volume: 10.0,
                }
            })
            .collect();
        let a = adx(&candles, 14);
        assert!(a.plus_di > a.minus_di);
        assert!(a.adx >= 20.0, "adx {}", a.adx);
        assert_eq!(a.signal, Bias::Bullish);
        assert!(a.has_trend);
    }

    #[test]
    fn test_adx_flat_market_has_no_trend() {
        let a = adx(&flat_candles(40), 14);
        assert_eq!(a.adx, 0.0);
        assert_eq!(a.signal, Bias::Neutral);
    }

    #[test]
    fn test_wilder_smooth_seed_and_step() {
        let out = wilder_smooth(&[1.0, 2.0, 3.0, 4.0], 2);
        // seed sum 3 -> 1.5, then 3 - 1.5 + 3 = 4.5 -> 2.25, then 4.5 - 2.25 + 4 = 6.25 -> 3.125
        assert_eq!(out, vec![1.5, 2.25, 3.125]);
        assert_eq!(wilder_smooth(&[1.0], 3), vec![1.0]);
    }

    #[test]
    fn test_obv_accumulation_and_divergence() {
        let prices: Vec<f64> = (0..15).map(|i| 10.0 + i as f64).collect();
        let volumes = vec![100.0; 15];
        let up = obv(&prices, &volumes);
        assert_eq!(up.trend, ObvTrend::Accumulation);
        assert_eq!(up.signal, Bias::Bullish);
        assert_eq!(up.value, 1400.0);

        // Price slips overall but the up-days carry the volume
        let prices = [10.0, 9.0, 9.5, 8.0, 8.5, 7.0, 7.5, 6.0, 6.5, 5.0, 5.5];
        let volumes = [0.0, 10.0, 100.0, 10.0, 100.0, 10.0, 100.0, 10.0, 100.0, 10.0, 100.0];
        let div = obv(&prices, &volumes);
        assert_eq!(div.trend, ObvTrend::DivergenceBullish);
        assert_eq!(div.signal, Bias::Bullish);
    }

    #[test]
    fn test_obv_insufficient() {
        let r = obv(&[1.0], &[1.0]);
        assert!(r.is_insufficient());
        assert_eq!(r.trend, ObvTrend::Neutral);
    }

    #[test]
    fn test_indicators_are_idempotent() {
        let prices = random_walk(7, 90);
        assert_eq!(rsi(&prices, 14), rsi(&prices, 14));
        assert_eq!(macd(&prices, 12, 26, 9), macd(&prices, 12, 26, 9));
        assert_eq!(stoch_rsi(&prices, 14, 14, 3, 3), stoch_rsi(&prices, 14, 14, 3, 3));
    }
}
