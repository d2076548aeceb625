//! Binance public API client for market data (no authentication required)

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::{ApiError, ApiResult, MarketData};
use crate::types::{Candle, Instrument, PricePoint};

pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const MAX_KLINES_PER_REQUEST: usize = 1000;
const MIN_QUOTE_VOLUME: f64 = 1_000_000.0;
const QUOTE_ASSET: &str = "USDT";

/// Stable-value bases never worth scanning
const STABLE_BASES: &[&str] = &[
    "USDC", "BUSD", "TUSD", "FDUSD", "USDP", "DAI", "USDD", "PYUSD", "USDE", "EUR", "AEUR",
];

/// Well-known instrument ids whose pair symbol isn't `<ID>USDT`
const COIN_MAP: &[(&str, &str)] = &[
    ("bitcoin", "BTCUSDT"),
    ("ethereum", "ETHUSDT"),
    ("binancecoin", "BNBUSDT"),
    ("ripple", "XRPUSDT"),
    ("cardano", "ADAUSDT"),
    ("solana", "SOLUSDT"),
    ("dogecoin", "DOGEUSDT"),
    ("polkadot", "DOTUSDT"),
    ("avalanche-2", "AVAXUSDT"),
    ("chainlink", "LINKUSDT"),
    ("polygon", "MATICUSDT"),
    ("litecoin", "LTCUSDT"),
    ("uniswap", "UNIUSDT"),
    ("stellar", "XLMUSDT"),
    ("cosmos", "ATOMUSDT"),
    ("monero", "XMRUSDT"),
    ("tron", "TRXUSDT"),
    ("near", "NEARUSDT"),
    ("aptos", "APTUSDT"),
    ("arbitrum", "ARBUSDT"),
    ("optimism", "OPUSDT"),
    ("filecoin", "FILUSDT"),
    ("hedera", "HBARUSDT"),
    ("vechain", "VETUSDT"),
    ("algorand", "ALGOUSDT"),
    ("fantom", "FTMUSDT"),
    ("the-sandbox", "SANDUSDT"),
    ("decentraland", "MANAUSDT"),
    ("axie-infinity", "AXSUSDT"),
    ("aave", "AAVEUSDT"),
    ("maker", "MKRUSDT"),
    ("eos", "EOSUSDT"),
    ("theta-token", "THETAUSDT"),
    ("injective-protocol", "INJUSDT"),
    ("render-token", "RENDERUSDT"),
    ("sui", "SUIUSDT"),
    ("sei-network", "SEIUSDT"),
    ("pepe", "PEPEUSDT"),
    ("shiba-inu", "SHIBUSDT"),
    ("floki", "FLOKIUSDT"),
];

/// Map an instrument id to its USDT pair, e.g. `bitcoin` or `btc` -> `BTCUSDT`.
/// Symbols already ending in USDT pass through uppercased.
pub fn symbol_for(instrument_id: &str) -> String {
    if let Some((_, symbol)) = COIN_MAP.iter().find(|(id, _)| *id == instrument_id) {
        return symbol.to_string();
    }
    let upper = instrument_id.to_uppercase();
    if upper.ends_with(QUOTE_ASSET) {
        upper
    } else {
        format!("{upper}{QUOTE_ASSET}")
    }
}

/// Binance public market data client
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
}

/// Raw kline data from Binance API (array of arrays)
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct RawKline(
    i64,    // 0: Open time (ms)
    String, // 1: Open
    String, // 2: High
    String, // 3: Low
    String, // 4: Close
    String, // 5: Volume
    i64,    // 6: Close time
    String, // 7: Quote asset volume
    u64,    // 8: Number of trades
    String, // 9: Taker buy base
    String, // 10: Taker buy quote
    String, // 11: Ignore
);

/// Raw 24h ticker statistics (numbers arrive as strings)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTicker {
    symbol: String,
    price_change: String,
    price_change_percent: String,
    high_price: String,
    low_price: String,
    last_price: String,
    volume: String,
    quote_volume: String,
}

/// Binance 24h ticker statistics
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TickerStats {
    pub symbol: String,
    pub last_price: f64,
    pub price_change: f64,
    pub price_change_percent: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub volume: f64,
    pub quote_volume: f64,
}

impl TryFrom<RawTicker> for TickerStats {
    type Error = std::num::ParseFloatError;

    fn try_from(raw: RawTicker) -> Result<Self, Self::Error> {
        Ok(Self {
            last_price: raw.last_price.parse()?,
            price_change: raw.price_change.parse()?,
            price_change_percent: raw.price_change_percent.parse()?,
            high_price: raw.high_price.parse()?,
            low_price: raw.low_price.parse()?,
            volume: raw.volume.parse()?,
            quote_volume: raw.quote_volume.parse()?,
            symbol: raw.symbol,
        })
    }
}

impl Default for BinanceClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BinanceClient {
    /// Create a new Binance client with default base URL
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> ApiResult<T> {
        let response = check_status(self.client.get(url).send().await?).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Fetch klines (candlestick data) for a pair symbol
    pub async fn get_klines(&self, symbol: &str, interval: &str, limit: usize) -> ApiResult<Vec<Candle>> {
        let limit = limit.clamp(1, MAX_KLINES_PER_REQUEST);
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );

        debug!(symbol, interval, limit, "Fetching klines from Binance");
        let raw: Vec<RawKline> = self.get_json(&url).await?;
        let candles = candles_from_raw(raw);
        debug!(symbol, count = candles.len(), "Fetched klines");
        Ok(candles)
    }

    /// Line-chart series with the interval picked from the range:
    /// up to a day of 5m bars, up to a week of 1h bars, else 4h bars
    pub async fn chart_data(&self, symbol: &str, days: u32) -> ApiResult<Vec<PricePoint>> {
        let (interval, limit) = chart_interval(days);
        let candles = self.get_klines(symbol, interval, limit).await?;
        Ok(to_price_points(&candles))
    }

    /// Get 24h ticker statistics for one pair
    pub async fn get_24h_stats(&self, symbol: &str) -> ApiResult<TickerStats> {
        let url = format!("{}/api/v3/ticker/24hr?symbol={}", self.base_url, symbol);
        let raw: RawTicker = self.get_json(&url).await?;
        TickerStats::try_from(raw).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// 24h statistics for every USDT pair
    pub async fn get_all_tickers(&self) -> ApiResult<Vec<TickerStats>> {
        let url = format!("{}/api/v3/ticker/24hr", self.base_url);
        let raw: Vec<RawTicker> = self.get_json(&url).await?;
        Ok(raw
            .into_iter()
            .filter(|t| t.symbol.ends_with(QUOTE_ASSET))
            .filter_map(|t| TickerStats::try_from(t).ok())
            .collect())
    }
}

#[async_trait]
impl MarketData for BinanceClient {
    async fn top_instruments(&self, limit: usize) -> ApiResult<Vec<Instrument>> {
        let tickers = self.get_all_tickers().await?;
        let instruments = rank_instruments(tickers, limit);
        debug!(count = instruments.len(), "Ranked instruments by quote volume");
        Ok(instruments)
    }

    async fn candles(&self, instrument_id: &str, interval: &str, count: usize) -> ApiResult<Vec<Candle>> {
        self.get_klines(&symbol_for(instrument_id), interval, count).await
    }

    async fn price_series(&self, instrument_id: &str, days: u32) -> ApiResult<Vec<PricePoint>> {
        // 4h bars: six per day
        let limit = (days as usize * 6).min(500);
        let candles = self.get_klines(&symbol_for(instrument_id), "4h", limit).await?;
        Ok(to_price_points(&candles))
    }
}

async fn check_status(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
        return Err(ApiError::RateLimited(status.as_u16()));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

fn candles_from_raw(raw: Vec<RawKline>) -> Vec<Candle> {
    raw.into_iter()
        .filter_map(|k| {
            Some(Candle {
                time: k.0 / 1000,
                open: k.1.parse().ok()?,
                high: k.2.parse().ok()?,
                low: k.3.parse().ok()?,
                close: k.4.parse().ok()?,
                volume: k.5.parse().ok()?,
            })
        })
        .collect()
}

fn to_price_points(candles: &[Candle]) -> Vec<PricePoint> {
    candles
        .iter()
        .map(|c| PricePoint {
            time: c.time,
            value: c.close,
        })
        .collect()
}

fn chart_interval(days: u32) -> (&'static str, usize) {
    if days <= 1 {
        ("5m", 288)
    } else if days <= 7 {
        ("1h", 168)
    } else {
        ("4h", (days as usize * 6).min(500))
    }
}

/// Liquid, non-stable USDT pairs by quote volume descending, first `limit`
fn rank_instruments(tickers: Vec<TickerStats>, limit: usize) -> Vec<Instrument> {
    let mut liquid: Vec<TickerStats> = tickers
        .into_iter()
        .filter(|t| t.quote_volume > MIN_QUOTE_VOLUME)
        .filter(|t| {
            let base = t.symbol.trim_end_matches(QUOTE_ASSET);
            !base.is_empty() && !STABLE_BASES.contains(&base)
        })
        .collect();
    liquid.sort_by(|a, b| b.quote_volume.total_cmp(&a.quote_volume));
    liquid.truncate(limit);

    liquid
        .into_iter()
        .map(|t| {
            let base = t.symbol.trim_end_matches(QUOTE_ASSET).to_string();
            Instrument {
                id: base.to_lowercase(),
                name: base,
                current_price: t.last_price,
                price_change_percent_24h: t.price_change_percent,
                total_volume: t.quote_volume,
                symbol: t.symbol,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticker(symbol: &str, quote_volume: f64) -> TickerStats {
        TickerStats {
            symbol: symbol.to_string(),
            last_price: 1.0,
            price_change: 0.0,
            price_change_percent: 2.5,
            high_price: 1.1,
            low_price: 0.9,
            volume: 1.0,
            quote_volume,
        }
    }

    #[test]
    fn test_symbol_for() {
        assert_eq!(symbol_for("bitcoin"), "BTCUSDT");
        assert_eq!(symbol_for("avalanche-2"), "AVAXUSDT");
        assert_eq!(symbol_for("btc"), "BTCUSDT");
        assert_eq!(symbol_for("ethusdt"), "ETHUSDT");
    }

    #[test]
    fn test_parse_klines() {
        let body = r#"[
            [1700000000000,"100.5","110.0","99.0","105.25","1234.5",1700014399999,"0",42,"0","0","0"],
            [1700014400000,"105.25","106.0","101.0","102.0","999.0",1700028799999,"0",17,"0","0","0"]
        ]"#;
        let raw: Vec<RawKline> = serde_json::from_str(body).unwrap();
        let candles = candles_from_raw(raw);
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].time, 1_700_000_000);
        assert_eq!(candles[0].close, 105.25);
        assert_eq!(candles[1].volume, 999.0);
    }

    #[test]
    fn test_parse_ticker() {
        let body = r#"{"symbol":"BTCUSDT","priceChange":"-100.0","priceChangePercent":"-0.25",
            "weightedAvgPrice":"40000","prevClosePrice":"40100","lastPrice":"40000.0",
            "highPrice":"41000.0","lowPrice":"39000.0","volume":"1000","quoteVolume":"40000000",
            "openTime":0,"closeTime":0,"count":10}"#;
        let raw: RawTicker = serde_json::from_str(body).unwrap();
        let stats = TickerStats::try_from(raw).unwrap();
        assert_eq!(stats.last_price, 40000.0);
        assert_eq!(stats.price_change_percent, -0.25);
        assert_eq!(stats.quote_volume, 40_000_000.0);
    }

    #[test]
    fn test_rank_instruments_filters_and_sorts() {
        let tickers = vec![
            ticker("ETHUSDT", 5_000_000.0),
            ticker("USDCUSDT", 900_000_000.0),
            ticker("BTCUSDT", 50_000_000.0),
            ticker("DUSTUSDT", 500.0),
            ticker("SOLUSDT", 2_000_000.0),
        ];
        let ranked = rank_instruments(tickers, 2);
        let ids: Vec<&str> = ranked.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["btc", "eth"]);
        assert_eq!(ranked[0].symbol, "BTCUSDT");
        assert_eq!(ranked[0].name, "BTC");
    }

    #[test]
    fn test_chart_interval() {
        assert_eq!(chart_interval(1), ("5m", 288));
        assert_eq!(chart_interval(7), ("1h", 168));
        assert_eq!(chart_interval(30), ("4h", 180));
        assert_eq!(chart_interval(365), ("4h", 500));
    }
}
