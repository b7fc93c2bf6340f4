use serde::Deserialize;
use serde_json::Value;

use super::{ExchangeId, HttpClient, TradingPair};
use crate::error::FetchError;
use crate::klines::{self, Candle, RowLayout, TimeUnit, Timeframe};

const BASE_URL: &str = "https://api.gateio.ws/api/v4";

/// `[time, quote_volume, close, high, low, open, base_volume, closed]`.
const LAYOUT: RowLayout = RowLayout {
    time: 0,
    open: 5,
    high: 3,
    low: 4,
    close: 2,
    volume: 6,
    unit: TimeUnit::Seconds,
};

#[derive(Deserialize, Debug)]
struct CurrencyPair {
    id: String,
    base: String,
    quote: String,
    trade_status: String,
}

#[derive(Deserialize, Debug)]
struct Ticker {
    #[serde(default, deserialize_with = "klines::deserialize_f64_lenient")]
    base_volume: Option<f64>,
}

fn parse_pairs(payload: Value) -> Result<Vec<TradingPair>, FetchError> {
    let pairs: Vec<CurrencyPair> = serde_json::from_value(payload)?;
    Ok(pairs
        .iter()
        .filter(|p| p.trade_status == "tradable")
        .map(|p| TradingPair::new(ExchangeId::Gate, &p.base, &p.quote, &p.id))
        .collect())
}

fn parse_ticker_volume(payload: Value) -> Result<f64, FetchError> {
    let tickers: Vec<Ticker> = serde_json::from_value(payload)?;
    tickers
        .first()
        .and_then(|t| t.base_volume)
        .ok_or_else(|| FetchError::Decode("ticker without base_volume".into()))
}

pub async fn list_pairs(http: &HttpClient) -> Result<Vec<TradingPair>, FetchError> {
    let payload: Value = http.get_json(&format!("{BASE_URL}/spot/currency_pairs"), &[]).await?;
    parse_pairs(payload)
}

pub async fn fetch_candles(
    http: &HttpClient,
    pair: &TradingPair,
    timeframe: Timeframe,
    count: u32,
) -> Result<Vec<Candle>, FetchError> {
    let query = [
        ("currency_pair", pair.venue_symbol.clone()),
        ("interval", timeframe.as_str().to_string()),
        ("limit", count.to_string()),
    ];
    let rows: Vec<Vec<Value>> = http
        .get_json(&format!("{BASE_URL}/spot/candlesticks"), &query)
        .await?;
    klines::parse_rows(&rows, &LAYOUT, count as usize)
}

pub async fn fetch_ticker_volume(http: &HttpClient, pair: &TradingPair) -> Result<f64, FetchError> {
    let payload: Value = http
        .get_json(
            &format!("{BASE_URL}/spot/tickers"),
            &[("currency_pair", pair.venue_symbol.clone())],
        )
        .await?;
    parse_ticker_volume(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_tradable_pairs() {
        let payload = json!([
            {"id": "BTC_USDT", "base": "BTC", "quote": "USDT", "trade_status": "tradable"},
            {"id": "ABC_USDT", "base": "ABC", "quote": "USDT", "trade_status": "untradable"}
        ]);
        let pairs = parse_pairs(payload).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].venue_symbol, "BTC_USDT");
    }

    #[test]
    fn candle_layout_uses_base_volume() {
        let rows: Vec<Vec<Value>> = serde_json::from_value(json!([
            ["1700000000", "5000", "1.1", "1.2", "0.9", "1.0", "4500", "true"]
        ]))
        .unwrap();
        let candles = klines::parse_rows(&rows, &LAYOUT, 30).unwrap();
        assert_eq!(candles[0].open, 1.0);
        assert_eq!(candles[0].close, 1.1);
        assert_eq!(candles[0].volume, 4500.0);
    }

    #[test]
    fn ticker_base_volume() {
        let payload = json!([{"currency_pair": "BTC_USDT", "base_volume": "42"}]);
        assert_eq!(parse_ticker_volume(payload).unwrap(), 42.0);
    }
}
