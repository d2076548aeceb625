//! Coin Scanner Engine: technical indicators, scoring, and market scans
//!
//! Provides:
//! - Indicator library (RSI, Stochastic RSI, MACD, ADX, OBV, Bollinger,
//!   MA200, volume, candlestick patterns, support/resistance, Fibonacci, pivots)
//! - Weighted bullish/bearish scoring with a five-step recommendation
//! - Breakout and triangle/wedge detection
//! - Quick, detailed and high-leverage market scanners
//! - Binance REST and websocket clients for market data

pub mod analysis;
pub mod api;
pub mod breakout;
pub mod cache;
pub mod indicators;
pub mod scanner;
pub mod scoring;
pub mod types;

// Re-exports for convenience
pub use analysis::{analyze_instrument, InstrumentAnalysis};
pub use api::{ApiError, BinanceClient, MarketData, TickerStats, TickerUpdate};
pub use breakout::{detect_breakout, detect_triangle_wedge, Breakout, GeometricPattern};
pub use cache::{MemoryCache, ScanCache, SqliteScanCache};
pub use indicators::{Indicator, Reading};
pub use scanner::{
    run_claimed_scan, run_scan, Leaderboard, ScanClaim, ScanError, ScanMode, ScanProgress,
    ScanStatus, Signal,
};
pub use scoring::{overall_score, IndicatorSnapshot, OverallScore, Recommendation};
pub use types::*;
