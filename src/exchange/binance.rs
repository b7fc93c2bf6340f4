//! Binance spot, and MEXC which mirrors the same v3 REST surface.

use serde::Deserialize;
use serde_json::Value;

use super::{ExchangeId, HttpClient, TradingPair};
use crate::error::FetchError;
use crate::klines::{self, Candle, RowLayout, Timeframe};

fn base_url(exchange: ExchangeId) -> &'static str {
    match exchange {
        ExchangeId::Mexc => "https://api.mexc.com",
        _ => "https://api.binance.com",
    }
}

fn interval(exchange: ExchangeId, timeframe: Timeframe) -> &'static str {
    match (exchange, timeframe) {
        (ExchangeId::Mexc, Timeframe::H1) => "60m",
        (_, tf) => tf.as_str(),
    }
}

#[derive(Deserialize, Debug)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    #[serde(default)]
    status: Value,
    base_asset: String,
    quote_asset: String,
}

impl SymbolInfo {
    // Binance reports "TRADING", MEXC has used both "ENABLED" and "1".
    fn is_trading(&self) -> bool {
        match &self.status {
            Value::String(s) => matches!(s.as_str(), "TRADING" | "ENABLED" | "1"),
            Value::Number(n) => n.as_i64() == Some(1),
            _ => false,
        }
    }
}

#[derive(Deserialize, Debug)]
struct Ticker24h {
    #[serde(default, deserialize_with = "klines::deserialize_f64_lenient")]
    volume: Option<f64>,
}

fn parse_pairs(exchange: ExchangeId, payload: Value) -> Result<Vec<TradingPair>, FetchError> {
    let info: ExchangeInfo = serde_json::from_value(payload)?;
    Ok(info
        .symbols
        .iter()
        .filter(|s| s.is_trading())
        .map(|s| TradingPair::new(exchange, &s.base_asset, &s.quote_asset, &s.symbol))
        .collect())
}

fn parse_ticker_volume(payload: Value) -> Result<f64, FetchError> {
    let ticker: Ticker24h = serde_json::from_value(payload)?;
    ticker
        .volume
        .ok_or_else(|| FetchError::Decode("ticker without volume".into()))
}

pub async fn list_pairs(http: &HttpClient, exchange: ExchangeId) -> Result<Vec<TradingPair>, FetchError> {
    let url = format!("{}/api/v3/exchangeInfo", base_url(exchange));
    let payload: Value = http.get_json(&url, &[]).await?;
    parse_pairs(exchange, payload)
}

pub async fn fetch_candles(
    http: &HttpClient,
    pair: &TradingPair,
    timeframe: Timeframe,
    count: u32,
) -> Result<Vec<Candle>, FetchError> {
    let url = format!("{}/api/v3/klines", base_url(pair.exchange));
    let query = [
        ("symbol", pair.venue_symbol.clone()),
        ("interval", interval(pair.exchange, timeframe).to_string()),
        ("limit", count.to_string()),
    ];
    let rows: Vec<Vec<Value>> = http.get_json(&url, &query).await?;
    klines::parse_rows(&rows, &RowLayout::OHLCV_MILLIS, count as usize)
}

pub async fn fetch_ticker_volume(http: &HttpClient, pair: &TradingPair) -> Result<f64, FetchError> {
    let url = format!("{}/api/v3/ticker/24hr", base_url(pair.exchange));
    let payload: Value = http
        .get_json(&url, &[("symbol", pair.venue_symbol.clone())])
        .await?;
    parse_ticker_volume(payload)
}
