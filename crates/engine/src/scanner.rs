//! Market scanner: run the indicator engine across the most liquid
//! instruments and rank the results into long/short leaderboards.
//!
//! Instruments are processed sequentially with small pauses to stay inside
//! exchange rate limits. A failed fetch skips that instrument; a failed
//! listing aborts the scan and discards everything gathered so far.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::api::{ApiError, MarketData};
use crate::breakout::{detect_breakout, detect_triangle_wedge};
use crate::cache::{get_json, set_json, ScanCache};
use crate::indicators::{
    bollinger_bands, ma200, macd, rsi, stoch_rsi, volume_analysis, Indicator,
};
use crate::types::{closes, values, volumes, Bias, Candle, Direction, Instrument, PricePoint};

// ============================================================================
// Modes and presets
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanMode {
    Quick,
    Detailed,
    HighLeverage,
}

impl ScanMode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Detailed => "detailed",
            Self::HighLeverage => "high-leverage",
        }
    }

    pub fn preset(&self) -> ScanPreset {
        match self {
            Self::Quick => ScanPreset {
                instruments: 200,
                lookback_days: 7,
                min_points: 30,
                min_score: 30,
                cache_ttl: Duration::from_secs(2 * 60),
                delay: Duration::from_millis(30),
                delay_every: None,
            },
            Self::Detailed => ScanPreset {
                instruments: 100,
                lookback_days: 30,
                min_points: 50,
                min_score: 35,
                cache_ttl: Duration::from_secs(2 * 60),
                delay: Duration::from_millis(50),
                delay_every: None,
            },
            Self::HighLeverage => ScanPreset {
                instruments: 500,
                lookback_days: 7,
                min_points: 20,
                min_score: 0,
                cache_ttl: Duration::from_secs(5 * 60),
                delay: Duration::from_millis(30),
                delay_every: Some(10),
            },
        }
    }
}

impl FromStr for ScanMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "quick" => Ok(Self::Quick),
            "detailed" => Ok(Self::Detailed),
            "high-leverage" | "hl" => Ok(Self::HighLeverage),
            other => Err(format!("unknown scan mode '{other}' (quick, detailed, high-leverage)")),
        }
    }
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Depth and pacing of one scan mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanPreset {
    /// How many of the most liquid instruments to scan
    pub instruments: usize,
    pub lookback_days: u32,
    /// Shorter series are skipped
    pub min_points: usize,
    pub min_score: i32,
    pub cache_ttl: Duration,
    pub delay: Duration,
    /// Pause every N instruments instead of after each uncached fetch
    pub delay_every: Option<usize>,
}

// ============================================================================
// Signals and leaderboards
// ============================================================================

/// Indicator values backing a signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SignalIndicators {
    pub rsi: f64,
    pub stoch_rsi_k: f64,
    pub macd_histogram: f64,
    pub bollinger_percent_b: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub instrument: Instrument,
    pub direction: Direction,
    /// 0..=100
    pub score: i32,
    pub price: f64,
    pub reasons: Vec<String>,
    /// Detected chart patterns (high-leverage mode)
    pub pattern: Option<String>,
    /// 1% protective stop (high-leverage mode)
    pub stop_price: Option<f64>,
    pub indicators: SignalIndicators,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Leaderboard {
    pub mode: ScanMode,
    pub longs: Vec<Signal>,
    pub shorts: Vec<Signal>,
    /// Longs and shorts merged by score
    pub top: Vec<Signal>,
    pub analyzed: u32,
    pub total: u32,
    pub completed_at: DateTime<Utc>,
}

const PER_SIDE: usize = 3;
const TECHNICAL_TOP: usize = 5;

fn by_score_desc(signals: &mut [Signal]) {
    signals.sort_by(|a, b| b.score.cmp(&a.score));
}

/// Best three per side, then the merged view: five for technical modes,
/// all six for high-leverage
pub fn build_leaderboard(mode: ScanMode, signals: Vec<Signal>, analyzed: u32, total: u32) -> Leaderboard {
    let (mut longs, mut shorts): (Vec<Signal>, Vec<Signal>) = signals
        .into_iter()
        .partition(|s| s.direction == Direction::Long);
    by_score_desc(&mut longs);
    by_score_desc(&mut shorts);
    longs.truncate(PER_SIDE);
    shorts.truncate(PER_SIDE);

    let mut top: Vec<Signal> = longs.iter().chain(shorts.iter()).cloned().collect();
    by_score_desc(&mut top);
    if mode != ScanMode::HighLeverage {
        top.truncate(TECHNICAL_TOP);
    }

    Leaderboard {
        mode,
        longs,
        shorts,
        top,
        analyzed,
        total,
        completed_at: Utc::now(),
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("a scan is already running")]
    AlreadyRunning,

    #[error("failed to list instruments: {0}")]
    Listing(#[source] ApiError),
}

impl ScanError {
    /// Message suitable for showing to the person who started the scan
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::AlreadyRunning => "A scan is already in progress.",
            Self::Listing(e) if e.is_rate_limited() => {
                "Exchange rate limit reached, wait a minute and retry."
            }
            Self::Listing(_) => "Connection problem, please try again.",
        }
    }
}

// ============================================================================
// Progress tracking (same pattern as the other long-running jobs)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanStatus {
    Idle,
    FetchingInstruments,
    Analyzing,
    Complete,
    Error,
}

pub struct ScanProgress {
    pub status: RwLock<ScanStatus>,
    pub mode: RwLock<Option<ScanMode>>,
    pub total: AtomicU32,
    pub analyzed: AtomicU32,
    pub current_instrument: RwLock<String>,
    pub leaderboard: RwLock<Option<Leaderboard>>,
    pub error_message: RwLock<Option<String>>,
    pub started_at: RwLock<Option<DateTime<Utc>>>,
    running: AtomicBool,
}

/// Holds the in-progress flag; released on drop
pub struct ScanGuard<'a> {
    progress: &'a ScanProgress,
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.progress.release();
    }
}

/// Owned form of [`ScanGuard`] that can move into a spawned task
pub struct ScanClaim {
    progress: Arc<ScanProgress>,
}

impl ScanClaim {
    pub fn progress(&self) -> &ScanProgress {
        &self.progress
    }
}

impl Drop for ScanClaim {
    fn drop(&mut self) {
        self.progress.release();
    }
}

impl ScanProgress {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(ScanStatus::Idle),
            mode: RwLock::new(None),
            total: AtomicU32::new(0),
            analyzed: AtomicU32::new(0),
            current_instrument: RwLock::new(String::new()),
            leaderboard: RwLock::new(None),
            error_message: RwLock::new(None),
            started_at: RwLock::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Claim the scanner, rejecting overlapping scans
    pub fn try_begin(&self) -> Result<ScanGuard<'_>, ScanError> {
        self.acquire()?;
        Ok(ScanGuard { progress: self })
    }

    /// Claim the scanner ahead of spawning the scan itself
    pub fn claim(self: &Arc<Self>) -> Result<ScanClaim, ScanError> {
        self.acquire()?;
        Ok(ScanClaim {
            progress: Arc::clone(self),
        })
    }

    fn acquire(&self) -> Result<(), ScanError> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| ScanError::AlreadyRunning)
    }

    fn release(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn reset(&self, mode: ScanMode) {
        *self.status.write().unwrap() = ScanStatus::FetchingInstruments;
        *self.mode.write().unwrap() = Some(mode);
        self.total.store(0, Ordering::Relaxed);
        self.analyzed.store(0, Ordering::Relaxed);
        *self.current_instrument.write().unwrap() = String::new();
        *self.leaderboard.write().unwrap() = None;
        *self.error_message.write().unwrap() = None;
        *self.started_at.write().unwrap() = Some(Utc::now());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn fail(&self, message: &str) {
        *self.status.write().unwrap() = ScanStatus::Error;
        *self.error_message.write().unwrap() = Some(message.to_string());
        *self.current_instrument.write().unwrap() = String::new();
    }
}

impl Default for ScanProgress {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Scan loop
// ============================================================================

/// Scan the market in `mode` and return the ranked leaderboard
pub async fn run_scan(
    market: &dyn MarketData,
    cache: &dyn ScanCache,
    progress: &ScanProgress,
    mode: ScanMode,
) -> Result<Leaderboard, ScanError> {
    let _guard = progress.try_begin()?;
    scan(market, cache, progress, mode).await
}

/// Scan under a claim taken earlier with [`ScanProgress::claim`]; the
/// scanner is released when the claim is dropped at the end
pub async fn run_claimed_scan(
    market: &dyn MarketData,
    cache: &dyn ScanCache,
    claim: ScanClaim,
    mode: ScanMode,
) -> Result<Leaderboard, ScanError> {
    scan(market, cache, claim.progress(), mode).await
}

async fn scan(
    market: &dyn MarketData,
    cache: &dyn ScanCache,
    progress: &ScanProgress,
    mode: ScanMode,
) -> Result<Leaderboard, ScanError> {
    progress.reset(mode);
    let preset = mode.preset();

    info!(mode = %mode, limit = preset.instruments, "Starting market scan");

    // Step 1: instrument universe
    let instruments = match list_instruments(market, cache, &preset).await {
        Ok(list) => list,
        Err(e) => {
            let err = ScanError::Listing(e);
            error!(mode = %mode, error = %err, "Scan aborted");
            progress.fail(err.user_message());
            return Err(err);
        }
    };

    let total = instruments.len() as u32;
    progress.total.store(total, Ordering::Relaxed);
    *progress.status.write().unwrap() = ScanStatus::Analyzing;
    info!(count = total, "Instruments listed, analyzing");

    // Step 2: per-instrument analysis
    let mut signals = Vec::new();
    for (i, instrument) in instruments.iter().enumerate() {
        *progress.current_instrument.write().unwrap() = instrument.name.clone();
        debug!(symbol = %instrument.symbol, n = i + 1, total, "Analyzing");

        let outcome = match mode {
            ScanMode::Quick | ScanMode::Detailed => {
                scan_technical(market, cache, &preset, mode, instrument).await
            }
            ScanMode::HighLeverage => scan_high_leverage(market, cache, &preset, instrument).await,
        };

        match outcome {
            Ok(Some(signal)) => signals.push(signal),
            Ok(None) => {}
            Err(e) => warn!(symbol = %instrument.symbol, error = %e, "Skipping instrument"),
        }
        progress.analyzed.fetch_add(1, Ordering::Relaxed);

        if let Some(every) = preset.delay_every {
            if i % every == 0 {
                tokio::time::sleep(preset.delay).await;
            }
        }
    }

    let leaderboard = build_leaderboard(mode, signals, progress.analyzed.load(Ordering::Relaxed), total);
    info!(
        mode = %mode,
        longs = leaderboard.longs.len(),
        shorts = leaderboard.shorts.len(),
        "Scan complete"
    );

    *progress.leaderboard.write().unwrap() = Some(leaderboard.clone());
    *progress.current_instrument.write().unwrap() = String::new();
    *progress.status.write().unwrap() = ScanStatus::Complete;

    Ok(leaderboard)
}

async fn list_instruments(
    market: &dyn MarketData,
    cache: &dyn ScanCache,
    preset: &ScanPreset,
) -> Result<Vec<Instrument>, ApiError> {
    let key = format!("scan:instruments:{}", preset.instruments);
    if let Some(list) = get_json::<Vec<Instrument>>(cache, &key).await {
        return Ok(list);
    }
    let list = market.top_instruments(preset.instruments).await?;
    set_json(cache, &key, &list, preset.cache_ttl).await;
    Ok(list)
}

async fn scan_technical(
    market: &dyn MarketData,
    cache: &dyn ScanCache,
    preset: &ScanPreset,
    mode: ScanMode,
    instrument: &Instrument,
) -> Result<Option<Signal>, ApiError> {
    let key = format!("scan:{}:{}", mode.label(), instrument.id);
    let series = match get_json::<Vec<PricePoint>>(cache, &key).await {
        Some(series) => series,
        None => {
            let fetched = market.price_series(&instrument.id, preset.lookback_days).await;
            // pace uncached fetches, failed ones included
            tokio::time::sleep(preset.delay).await;
            let series = fetched?;
            set_json(cache, &key, &series, preset.cache_ttl).await;
            series
        }
    };

    if series.len() < preset.min_points {
        debug!(symbol = %instrument.symbol, points = series.len(), "Series too short");
        return Ok(None);
    }

    Ok(score_technical(instrument, &values(&series)).filter(|s| s.score >= preset.min_score))
}

async fn scan_high_leverage(
    market: &dyn MarketData,
    cache: &dyn ScanCache,
    preset: &ScanPreset,
    instrument: &Instrument,
) -> Result<Option<Signal>, ApiError> {
    let key = format!("scan:{}:{}", ScanMode::HighLeverage.label(), instrument.id);
    let candles = match get_json::<Vec<Candle>>(cache, &key).await {
        Some(candles) => candles,
        None => {
            let count = preset.lookback_days as usize * 6;
            let candles = market.candles(&instrument.id, "4h", count).await?;
            set_json(cache, &key, &candles, preset.cache_ttl).await;
            candles
        }
    };

    if candles.len() < preset.min_points {
        debug!(symbol = %instrument.symbol, candles = candles.len(), "Not enough candles");
        return Ok(None);
    }

    Ok(score_high_leverage(instrument, &candles))
}

// ============================================================================
// Technical scoring (quick / detailed)
// ============================================================================

const TECHNICAL_MIN_MARGIN: i32 = 10;
const TECHNICAL_MIN_SCORE: i32 = 30;
const TECHNICAL_MAX_REASONS: usize = 3;

#[derive(Default)]
struct Tally {
    long: i32,
    short: i32,
    reasons: Vec<String>,
}

impl Tally {
    fn long(&mut self, points: i32, reason: Option<String>) {
        self.long += points;
        self.reasons.extend(reason);
    }

    fn short(&mut self, points: i32, reason: Option<String>) {
        self.short += points;
        self.reasons.extend(reason);
    }

    fn side(&mut self, direction: Direction, points: i32, reason: Option<String>) {
        match direction {
            Direction::Long => self.long(points, reason),
            Direction::Short => self.short(points, reason),
        }
    }
}

fn reason(text: impl Into<String>) -> Option<String> {
    Some(text.into())
}

fn bias_direction(bias: Bias) -> Option<Direction> {
    match bias {
        Bias::Bullish => Some(Direction::Long),
        Bias::Bearish => Some(Direction::Short),
        Bias::Neutral => None,
    }
}

/// Score a close-price series for the quick/detailed scans. Returns `None`
/// when the series is too short, the sides are within 10 points of each
/// other, or the winning side scores under 30.
pub fn score_technical(instrument: &Instrument, prices: &[f64]) -> Option<Signal> {
    if prices.len() < 20 {
        return None;
    }

    let price = instrument.current_price;
    let rsi = rsi(prices, 14);
    let macd = macd(prices, 12, 26, 9);
    let bb = bollinger_bands(prices, 20, 2.0);
    let ma = ma200(prices);
    let stoch = stoch_rsi(prices, 14, 14, 3, 3);
    let percent_b = bb.percent_b(price);

    let mut t = Tally::default();

    if rsi.value <= 30.0 {
        t.long(25, reason(format!("RSI oversold ({:.0})", rsi.value)));
    } else if rsi.value <= 40.0 {
        t.long(15, reason(format!("RSI low ({:.0})", rsi.value)));
    } else if rsi.value >= 70.0 {
        t.short(25, reason(format!("RSI overbought ({:.0})", rsi.value)));
    } else if rsi.value >= 60.0 {
        t.short(15, reason(format!("RSI high ({:.0})", rsi.value)));
    }

    if stoch.oversold {
        t.long(20, reason("Stoch RSI oversold"));
    } else if stoch.k < 30.0 {
        t.long(10, None);
    }
    if stoch.overbought {
        t.short(20, reason("Stoch RSI overbought"));
    } else if stoch.k > 70.0 {
        t.short(10, None);
    }
    match stoch.crossover {
        Some(Bias::Bullish) => t.long(10, reason("Stoch RSI bullish cross")),
        Some(Bias::Bearish) => t.short(10, reason("Stoch RSI bearish cross")),
        _ => {}
    }

    if macd.histogram > 0.0 && macd.trend == Bias::Bullish {
        t.long(15, reason("MACD positive"));
    } else if macd.histogram < 0.0 && macd.trend == Bias::Bearish {
        t.short(15, reason("MACD negative"));
    }

    if percent_b <= 0.10 {
        t.long(20, reason("At lower Bollinger band"));
    } else if percent_b <= 0.25 {
        t.long(10, reason("In lower Bollinger zone"));
    } else if percent_b >= 0.90 {
        t.short(20, reason("At upper Bollinger band"));
    } else if percent_b >= 0.75 {
        t.short(10, reason("In upper Bollinger zone"));
    }

    if let Some(direction) = bias_direction(ma.bias()) {
        let text = match direction {
            Direction::Long => "Above MA",
            Direction::Short => "Below MA",
        };
        t.side(direction, 10, reason(text));
    }

    let change = instrument.price_change_percent_24h;
    if change >= 5.0 {
        t.long(10, reason(format!("Strong momentum (+{change:.1}%)")));
    } else if change <= -5.0 {
        t.short(10, reason(format!("Weak momentum ({change:.1}%)")));
    }

    let direction = if t.long > t.short {
        Direction::Long
    } else {
        Direction::Short
    };
    let score = t.long.max(t.short);
    if (t.long - t.short).abs() < TECHNICAL_MIN_MARGIN || score < TECHNICAL_MIN_SCORE {
        return None;
    }

    t.reasons.truncate(TECHNICAL_MAX_REASONS);
    Some(Signal {
        instrument: instrument.clone(),
        direction,
        score: score.min(100),
        price,
        reasons: t.reasons,
        pattern: None,
        stop_price: None,
        indicators: SignalIndicators {
            rsi: rsi.value,
            stoch_rsi_k: stoch.k,
            macd_histogram: macd.histogram,
            bollinger_percent_b: percent_b,
        },
    })
}

// ============================================================================
// High-leverage scoring
// ============================================================================

const LIQUIDITY_FLOOR: f64 = 5_000_000.0;
const LIQUIDITY_PENALTY: i32 = 10;
const TIE_MARGIN: i32 = 5;
const TIE_DISCOUNT: i32 = 10;
const TIE_FLOOR: i32 = 5;
const HL_MAX_REASONS: usize = 4;
const STOP_DISTANCE: f64 = 0.01;

/// Pick the winning side. When the margin is under 5 points the score is
/// discounted and the 24h change decides the direction.
pub fn resolve_direction(long: i32, short: i32, change_24h: f64) -> (Direction, i32) {
    let winner = if long > short {
        Direction::Long
    } else {
        Direction::Short
    };
    let score = if long > short { long } else { short };

    if (long - short).abs() < TIE_MARGIN {
        let direction = if change_24h >= 0.0 {
            Direction::Long
        } else {
            Direction::Short
        };
        (direction, (score - TIE_DISCOUNT).max(TIE_FLOOR))
    } else {
        (winner, score)
    }
}

fn dedup_preserving_order(reasons: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    reasons
        .into_iter()
        .filter(|r| seen.insert(r.clone()))
        .collect()
}

/// Multi-factor breakout/momentum score over 4h candles. Always yields a
/// signal for 20+ candles; weak setups surface with a low score.
pub fn score_high_leverage(instrument: &Instrument, candles: &[Candle]) -> Option<Signal> {
    let prices = closes(candles);
    if prices.len() < 20 {
        return None;
    }
    let vols = volumes(candles);
    let price = instrument.current_price;

    let mut t = Tally::default();
    let mut patterns: Vec<String> = Vec::new();

    if let Some(b) = detect_breakout(candles, price) {
        t.side(b.direction, b.score, None);
        patterns.push(b.pattern.to_string());
        t.reasons.extend(b.reasons.iter().map(|r| r.to_string()));
    }

    if let Some(p) = detect_triangle_wedge(candles) {
        t.side(p.direction, p.score, reason(p.reason()));
        patterns.push(p.kind.label().to_string());
    }

    let volume = volume_analysis(&vols, &prices);
    if volume.spike {
        if let Some(direction) = bias_direction(volume.signal) {
            t.side(direction, 15, reason("Volume spike"));
        }
    }

    let rsi = rsi(&prices, 14);
    let macd = macd(&prices, 12, 26, 9);
    let stoch = stoch_rsi(&prices, 14, 14, 3, 3);

    if rsi.value <= 35.0 {
        t.long(20, reason(format!("RSI oversold ({:.0})", rsi.value)));
    } else if rsi.value <= 45.0 {
        t.long(10, None);
    } else if rsi.value >= 65.0 {
        t.short(20, reason(format!("RSI overbought ({:.0})", rsi.value)));
    } else if rsi.value >= 55.0 {
        t.short(10, None);
    }

    if macd.histogram > 0.0 && macd.trend == Bias::Bullish {
        t.long(15, reason("MACD positive"));
    } else if macd.histogram < 0.0 && macd.trend == Bias::Bearish {
        t.short(15, reason("MACD negative"));
    }

    if stoch.oversold || stoch.k < 25.0 {
        t.long(15, reason("StochRSI low"));
    } else if stoch.overbought || stoch.k > 75.0 {
        t.short(15, reason("StochRSI high"));
    }
    match stoch.crossover {
        Some(Bias::Bullish) => t.long(10, reason("StochRSI cross up")),
        Some(Bias::Bearish) => t.short(10, reason("StochRSI cross down")),
        _ => {}
    }

    let ma = ma200(&prices);
    match bias_direction(ma.bias()) {
        Some(Direction::Long) => t.long(10, reason("Above MA")),
        Some(Direction::Short) => t.short(10, reason("Below MA")),
        None => {}
    }

    let bb = bollinger_bands(&prices, 20, 2.0);
    let percent_b = bb.percent_b(price);
    if percent_b <= 0.15 {
        t.long(15, reason("BB lower band"));
    } else if percent_b >= 0.85 {
        t.short(15, reason("BB upper band"));
    }

    let change = instrument.price_change_percent_24h;
    if change >= 5.0 {
        t.long(10, reason(format!("Momentum +{change:.1}%")));
    } else if change <= -5.0 {
        t.short(10, reason(format!("Momentum {change:.1}%")));
    }

    if instrument.total_volume < LIQUIDITY_FLOOR {
        t.long -= LIQUIDITY_PENALTY;
        t.short -= LIQUIDITY_PENALTY;
    }

    let (direction, score) = resolve_direction(t.long, t.short, change);

    let pattern = if patterns.is_empty() {
        match direction {
            Direction::Long => "Bullish Momentum".to_string(),
            Direction::Short => "Bearish Momentum".to_string(),
        }
    } else {
        patterns.join(", ")
    };

    let mut reasons = dedup_preserving_order(t.reasons);
    reasons.truncate(HL_MAX_REASONS);

    let stop_price = match direction {
        Direction::Long => price * (1.0 - STOP_DISTANCE),
        Direction::Short => price * (1.0 + STOP_DISTANCE),
    };

    Some(Signal {
        instrument: instrument.clone(),
        direction,
        score: score.clamp(0, 100),
        price,
        reasons,
        pattern: Some(pattern),
        stop_price: Some(stop_price),
        indicators: SignalIndicators {
            rsi: rsi.value,
            stoch_rsi_k: stoch.k,
            macd_histogram: macd.histogram,
            bollinger_percent_b: percent_b,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    // ------------------------------------------------------------------
    // Fixtures
    // ------------------------------------------------------------------

    fn instrument(id: &str, price: f64, change: f64, volume: f64) -> Instrument {
        Instrument {
            id: id.to_string(),
            symbol: format!("{}USDT", id.to_uppercase()),
            name: id.to_uppercase(),
            current_price: price,
            price_change_percent_24h: change,
            total_volume: volume,
        }
    }

    fn declining(n: usize) -> Vec<f64> {
        (0..n).map(|i| 200.0 * 0.98f64.powi(i as i32)).collect()
    }

    fn rising(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 * 1.02f64.powi(i as i32)).collect()
    }

    fn to_series(prices: &[f64]) -> Vec<PricePoint> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &value)| PricePoint {
                time: i as i64 * 14_400,
                value,
            })
            .collect()
    }

    fn to_candles(prices: &[f64]) -> Vec<Candle> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                time: i as i64 * 14_400,
                open: close,
                high: close * 1.001,
                low: close * 0.999,
                close,
                volume: 1_000.0,
            })
            .collect()
    }

    struct MockMarket {
        instruments: Vec<Instrument>,
        series: HashMap<String, Vec<f64>>,
        listing_error: Option<u16>,
        failing: HashSet<String>,
        listing_calls: AtomicUsize,
        series_calls: AtomicUsize,
    }

    impl MockMarket {
        fn new(entries: Vec<(Instrument, Vec<f64>)>) -> Self {
            let series = entries
                .iter()
                .map(|(i, p)| (i.id.clone(), p.clone()))
                .collect();
            Self {
                instruments: entries.into_iter().map(|(i, _)| i).collect(),
                series,
                listing_error: None,
                failing: HashSet::new(),
                listing_calls: AtomicUsize::new(0),
                series_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MarketData for MockMarket {
        async fn top_instruments(&self, limit: usize) -> Result<Vec<Instrument>, ApiError> {
            self.listing_calls.fetch_add(1, Ordering::SeqCst);
            match self.listing_error {
                Some(status @ (429 | 418)) => Err(ApiError::RateLimited(status)),
                Some(status) => Err(ApiError::Status {
                    status,
                    body: "down".into(),
                }),
                None => Ok(self.instruments.iter().take(limit).cloned().collect()),
            }
        }

        async fn candles(&self, id: &str, _interval: &str, count: usize) -> Result<Vec<Candle>, ApiError> {
            if self.failing.contains(id) {
                return Err(ApiError::Decode("boom".into()));
            }
            let prices = self.series.get(id).cloned().unwrap_or_default();
            let start = prices.len().saturating_sub(count);
            Ok(to_candles(&prices[start..]))
        }

        async fn price_series(&self, id: &str, _days: u32) -> Result<Vec<PricePoint>, ApiError> {
            self.series_calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(id) {
                return Err(ApiError::Decode("boom".into()));
            }
            Ok(to_series(self.series.get(id).map(Vec::as_slice).unwrap_or(&[])))
        }
    }

    fn signal(id: &str, direction: Direction, score: i32) -> Signal {
        Signal {
            instrument: instrument(id, 1.0, 0.0, 1e7),
            direction,
            score,
            price: 1.0,
            reasons: Vec::new(),
            pattern: None,
            stop_price: None,
            indicators: SignalIndicators {
                rsi: 50.0,
                stoch_rsi_k: 50.0,
                macd_histogram: 0.0,
                bollinger_percent_b: 0.5,
            },
        }
    }

    // ------------------------------------------------------------------
    // Presets and modes
    // ------------------------------------------------------------------

    #[test]
    fn test_presets() {
        let quick = ScanMode::Quick.preset();
        assert_eq!((quick.instruments, quick.lookback_days, quick.min_points), (200, 7, 30));
        let detailed = ScanMode::Detailed.preset();
        assert_eq!((detailed.instruments, detailed.min_score), (100, 35));
        let hl = ScanMode::HighLeverage.preset();
        assert_eq!(hl.instruments, 500);
        assert_eq!(hl.cache_ttl, Duration::from_secs(300));
        assert_eq!(hl.delay_every, Some(10));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("quick".parse::<ScanMode>().unwrap(), ScanMode::Quick);
        assert_eq!("high_leverage".parse::<ScanMode>().unwrap(), ScanMode::HighLeverage);
        assert_eq!("High-Leverage".parse::<ScanMode>().unwrap(), ScanMode::HighLeverage);
        assert!("turbo".parse::<ScanMode>().is_err());
        assert_eq!(
            serde_json::to_string(&ScanMode::HighLeverage).unwrap(),
            "\"high-leverage\""
        );
    }

    // ------------------------------------------------------------------
    // Scoring
    // ------------------------------------------------------------------

    #[test]
    fn test_technical_oversold_decline_is_long() {
        let prices = declining(60);
        let inst = instrument("abc", prices[59], 6.0, 1e8);
        let s = score_technical(&inst, &prices).unwrap();
        assert_eq!(s.direction, Direction::Long);
        assert!(s.score >= 45, "score {}", s.score);
        assert!(s.reasons.len() <= 3);
        assert!(s.reasons[0].starts_with("RSI oversold"));
        assert!(s.stop_price.is_none());
    }

    #[test]
    fn test_technical_rejects_short_series() {
        let inst = instrument("abc", 1.0, 0.0, 1e8);
        assert!(score_technical(&inst, &[1.0; 10]).is_none());
    }

    #[test]
    fn test_technical_rejects_flat_market() {
        // Nothing fires except MA (price == MA reads bearish, 10 points)
        let inst = instrument("abc", 50.0, 0.0, 1e8);
        assert!(score_technical(&inst, &[50.0; 60]).is_none());
    }

    #[test]
    fn test_resolve_direction_tie_break() {
        assert_eq!(resolve_direction(30, 28, -1.0), (Direction::Short, 20));
        assert_eq!(resolve_direction(28, 30, 0.0), (Direction::Long, 20));
        assert_eq!(resolve_direction(12, 10, 2.0), (Direction::Long, 5));
        assert_eq!(resolve_direction(-10, -10, -2.0), (Direction::Short, 5));
        assert_eq!(resolve_direction(40, 10, -3.0), (Direction::Long, 40));
        assert_eq!(resolve_direction(5, 35, 9.0), (Direction::Short, 35));
    }

    #[test]
    fn test_dedup_preserving_order() {
        let reasons = vec!["a".to_string(), "b".into(), "a".into(), "c".into()];
        assert_eq!(dedup_preserving_order(reasons), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_high_leverage_signal_shape() {
        let prices = rising(42);
        let inst = instrument("up", prices[41], 6.0, 1e8);
        let s = score_high_leverage(&inst, &to_candles(&prices)).unwrap();
        assert!((0..=100).contains(&s.score));
        assert!(s.reasons.len() <= 4);
        let unique: HashSet<&String> = s.reasons.iter().collect();
        assert_eq!(unique.len(), s.reasons.len());
        let stop = s.stop_price.unwrap();
        match s.direction {
            Direction::Long => assert!((stop - s.price * 0.99).abs() < 1e-9),
            Direction::Short => assert!((stop - s.price * 1.01).abs() < 1e-9),
        }
        assert!(s.pattern.is_some());
    }

    #[test]
    fn test_high_leverage_needs_twenty_candles() {
        let prices = rising(10);
        let inst = instrument("up", prices[9], 0.0, 1e8);
        assert!(score_high_leverage(&inst, &to_candles(&prices)).is_none());
    }

    #[test]
    fn test_high_leverage_illiquid_is_penalised() {
        let prices = rising(42);
        let liquid = instrument("up", prices[41], 0.0, 1e8);
        let illiquid = instrument("up", prices[41], 0.0, 1e5);
        let candles = to_candles(&prices);
        let a = score_high_leverage(&liquid, &candles).unwrap();
        let b = score_high_leverage(&illiquid, &candles).unwrap();
        assert!(b.score <= a.score);
    }

    // ------------------------------------------------------------------
    // Leaderboards
    // ------------------------------------------------------------------

    #[test]
    fn test_technical_leaderboard_merges_top_five() {
        let signals = vec![
            signal("a", Direction::Long, 90),
            signal("b", Direction::Long, 80),
            signal("c", Direction::Long, 70),
            signal("d", Direction::Long, 60),
            signal("e", Direction::Short, 85),
            signal("f", Direction::Short, 40),
        ];
        let board = build_leaderboard(ScanMode::Quick, signals, 6, 6);
        assert_eq!(board.longs.len(), 3);
        assert_eq!(board.shorts.len(), 2);
        let ids: Vec<&str> = board.top.iter().map(|s| s.instrument.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "e", "b", "c", "f"]);
    }

    #[test]
    fn test_high_leverage_leaderboard_keeps_both_sides() {
        let signals = vec![
            signal("a", Direction::Long, 90),
            signal("b", Direction::Long, 80),
            signal("c", Direction::Long, 70),
            signal("d", Direction::Long, 65),
            signal("e", Direction::Short, 85),
            signal("f", Direction::Short, 40),
            signal("g", Direction::Short, 30),
            signal("h", Direction::Short, 20),
        ];
        let board = build_leaderboard(ScanMode::HighLeverage, signals, 8, 8);
        assert_eq!(board.longs.len(), 3);
        assert_eq!(board.shorts.len(), 3);
        assert_eq!(board.top.len(), 6);
        assert_eq!(board.shorts[0].instrument.id, "e");
    }

    // ------------------------------------------------------------------
    // Scan loop
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_quick_scan_ranks_and_skips_failures() {
        let down = declining(60);
        let mut market = MockMarket::new(vec![
            (instrument("dip", down[59], 6.0, 1e8), down.clone()),
            (instrument("short", 1.0, 0.0, 1e8), vec![1.0; 10]),
            (instrument("broken", 1.0, 0.0, 1e8), down),
        ]);
        market.failing.insert("broken".into());
        let cache = MemoryCache::new();
        let progress = ScanProgress::new();

        let board = run_scan(&market, &cache, &progress, ScanMode::Quick).await.unwrap();

        assert_eq!(board.total, 3);
        assert_eq!(board.analyzed, 3);
        assert_eq!(board.longs.len(), 1);
        assert_eq!(board.longs[0].instrument.id, "dip");
        assert!(board.shorts.is_empty());
        assert_eq!(*progress.status.read().unwrap(), ScanStatus::Complete);
        assert!(progress.leaderboard.read().unwrap().is_some());
        assert!(!progress.is_running());
    }

    #[tokio::test]
    async fn test_second_scan_uses_cache() {
        let down = declining(60);
        let market = MockMarket::new(vec![(instrument("dip", down[59], 6.0, 1e8), down)]);
        let cache = MemoryCache::new();
        let progress = ScanProgress::new();

        run_scan(&market, &cache, &progress, ScanMode::Quick).await.unwrap();
        run_scan(&market, &cache, &progress, ScanMode::Quick).await.unwrap();

        assert_eq!(market.listing_calls.load(Ordering::SeqCst), 1);
        assert_eq!(market.series_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_overlapping_scan_is_rejected() {
        let market = MockMarket::new(Vec::new());
        let cache = MemoryCache::new();
        let progress = ScanProgress::new();

        let guard = progress.try_begin().unwrap();
        let err = run_scan(&market, &cache, &progress, ScanMode::Quick).await.unwrap_err();
        assert!(matches!(err, ScanError::AlreadyRunning));
        drop(guard);

        assert!(run_scan(&market, &cache, &progress, ScanMode::Quick).await.is_ok());
    }

    #[tokio::test]
    async fn test_claim_blocks_until_claimed_scan_finishes() {
        let down = declining(60);
        let market = MockMarket::new(vec![(instrument("dip", down[59], 6.0, 1e8), down)]);
        let cache = MemoryCache::new();
        let progress = Arc::new(ScanProgress::new());

        let claim = progress.claim().unwrap();
        assert!(progress.is_running());
        assert!(matches!(progress.claim(), Err(ScanError::AlreadyRunning)));
        assert!(matches!(
            run_scan(&market, &cache, &progress, ScanMode::Quick).await,
            Err(ScanError::AlreadyRunning)
        ));

        let board = run_claimed_scan(&market, &cache, claim, ScanMode::Quick).await.unwrap();
        assert_eq!(board.longs.len(), 1);
        assert!(!progress.is_running());
        assert!(progress.claim().is_ok());
    }

    #[tokio::test]
    async fn test_listing_failure_aborts_scan() {
        let mut market = MockMarket::new(vec![(instrument("a", 1.0, 0.0, 1e8), declining(60))]);
        market.listing_error = Some(429);
        let cache = MemoryCache::new();
        let progress = ScanProgress::new();

        let err = run_scan(&market, &cache, &progress, ScanMode::Detailed).await.unwrap_err();
        assert!(matches!(err, ScanError::Listing(ApiError::RateLimited(429))));
        assert_eq!(err.user_message(), "Exchange rate limit reached, wait a minute and retry.");
        assert_eq!(*progress.status.read().unwrap(), ScanStatus::Error);
        assert!(progress.leaderboard.read().unwrap().is_none());

        market.listing_error = Some(503);
        let err = run_scan(&market, &cache, &progress, ScanMode::Detailed).await.unwrap_err();
        assert_eq!(err.user_message(), "Connection problem, please try again.");
    }

    #[tokio::test]
    async fn test_high_leverage_scan() {
        let up = rising(60);
        let market = MockMarket::new(vec![
            (instrument("up", up[59], 6.0, 1e8), up),
            (instrument("tiny", 1.0, 0.0, 1e8), vec![1.0; 5]),
        ]);
        let cache = MemoryCache::new();
        let progress = ScanProgress::new();

        let board = run_scan(&market, &cache, &progress, ScanMode::HighLeverage).await.unwrap();
        assert_eq!(board.longs.len() + board.shorts.len(), 1);
        assert_eq!(board.top.len(), 1);
        assert!(board.top[0].stop_price.is_some());
    }
}
