//! Market-data clients

pub mod binance;
pub mod stream;

pub use binance::{symbol_for, BinanceClient, TickerStats, DEFAULT_BASE_URL};
pub use stream::{parse_ticker_event, subscribe_ticker, TickerUpdate};

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Candle, Instrument, PricePoint};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("rate limited by exchange (HTTP {0})")]
    RateLimited(u16),

    #[error("exchange returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("websocket error: {0}")]
    Stream(String),
}

impl ApiError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// What the scanning pipeline needs from a market-data source
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Most liquid instruments, sorted by quote volume descending
    async fn top_instruments(&self, limit: usize) -> ApiResult<Vec<Instrument>>;

    /// OHLCV candles for an instrument id, oldest first
    async fn candles(&self, instrument_id: &str, interval: &str, count: usize)
        -> ApiResult<Vec<Candle>>;

    /// Close-price series covering `days` of history, oldest first
    async fn price_series(&self, instrument_id: &str, days: u32) -> ApiResult<Vec<PricePoint>>;
}
