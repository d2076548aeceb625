//! Live 24h ticker stream over the Binance websocket API

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::{ApiError, ApiResult};

pub const STREAM_BASE_URL: &str = "wss://stream.binance.com:9443/ws";

/// One `<symbol>@ticker` event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickerUpdate {
    pub symbol: String,
    pub price: f64,
    pub price_change: f64,
    pub price_change_percent: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub volume: f64,
    pub quote_volume: f64,
    /// Event time, unix milliseconds
    pub event_time: i64,
}

#[derive(Debug, Deserialize)]
struct RawTickerEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    price: String,
    #[serde(rename = "p")]
    price_change: String,
    #[serde(rename = "P")]
    price_change_percent: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "q")]
    quote_volume: String,
    #[serde(rename = "E")]
    event_time: i64,
}

/// Decode a ticker event payload
pub fn parse_ticker_event(text: &str) -> ApiResult<TickerUpdate> {
    let raw: RawTickerEvent =
        serde_json::from_str(text).map_err(|e| ApiError::Decode(e.to_string()))?;
    let num = |s: &str| -> ApiResult<f64> {
        s.parse()
            .map_err(|e: std::num::ParseFloatError| ApiError::Decode(e.to_string()))
    };

    Ok(TickerUpdate {
        price: num(&raw.price)?,
        price_change: num(&raw.price_change)?,
        price_change_percent: num(&raw.price_change_percent)?,
        high_24h: num(&raw.high)?,
        low_24h: num(&raw.low)?,
        volume: num(&raw.volume)?,
        quote_volume: num(&raw.quote_volume)?,
        event_time: raw.event_time,
        symbol: raw.symbol,
    })
}

/// Stream ticker updates for `symbol` into `tx` until `shutdown` flips to
/// true, the receiver is dropped, or the server closes the socket.
pub async fn subscribe_ticker(
    symbol: &str,
    tx: mpsc::Sender<TickerUpdate>,
    mut shutdown: watch::Receiver<bool>,
) -> ApiResult<()> {
    let url = format!("{}/{}@ticker", STREAM_BASE_URL, symbol.to_lowercase());
    let (ws_stream, _) = connect_async(url.as_str())
        .await
        .map_err(|e| ApiError::Stream(e.to_string()))?;
    info!(symbol, "Ticker stream connected");

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!(symbol, "Ticker stream cancelled");
                    break;
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match parse_ticker_event(&text) {
                        Ok(update) => {
                            if tx.send(update).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(symbol, error = %e, "Skipping malformed ticker event"),
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        write
                            .send(Message::Pong(payload))
                            .await
                            .map_err(|e| ApiError::Stream(e.to_string()))?;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(symbol, "Ticker stream closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(ApiError::Stream(e.to_string())),
                }
            }
        }
    }

    write.close().await.ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ticker_event() {
        let text = r#"{"e":"24hrTicker","E":1700000000123,"s":"BTCUSDT","p":"-250.50","P":"-0.61",
            "w":"41000","x":"41250","c":"41000.10","Q":"0.1","b":"41000","B":"1","a":"41000.2","A":"1",
            "o":"41250.60","h":"41800.00","l":"40500.00","v":"12345.6","q":"506000000.5",
            "O":0,"C":0,"F":0,"L":0,"n":100}"#;
        let update = parse_ticker_event(text).unwrap();
        assert_eq!(update.symbol, "BTCUSDT");
        assert_eq!(update.price, 41000.10);
        assert_eq!(update.price_change, -250.50);
        assert_eq!(update.price_change_percent, -0.61);
        assert_eq!(update.high_24h, 41800.0);
        assert_eq!(update.low_24h, 40500.0);
        assert_eq!(update.quote_volume, 506000000.5);
        assert_eq!(update.event_time, 1_700_000_000_123);
    }

    #[test]
    fn test_parse_ticker_event_rejects_garbage() {
        assert!(matches!(parse_ticker_event("{}"), Err(ApiError::Decode(_))));
        let bad_number = r#"{"E":1,"s":"X","c":"abc","p":"0","P":"0","h":"0","l":"0","v":"0","q":"0"}"#;
        assert!(matches!(parse_ticker_event(bad_number), Err(ApiError::Decode(_))));
    }
}
