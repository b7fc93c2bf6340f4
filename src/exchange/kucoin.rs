use chrono::Utc;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{ExchangeId, HttpClient, TradingPair};
use crate::error::FetchError;
use crate::klines::{self, Candle, RowLayout, TimeUnit, Timeframe};

const BASE_URL: &str = "https://api.kucoin.com";
const OK_CODE: &str = "200000";

/// `[time, open, close, high, low, volume, turnover]`, time in seconds.
const LAYOUT: RowLayout = RowLayout {
    time: 0,
    open: 1,
    close: 2,
    high: 3,
    low: 4,
    volume: 5,
    unit: TimeUnit::Seconds,
};

fn candle_type(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::M1 => "1min",
        Timeframe::M5 => "5min",
        Timeframe::M15 => "15min",
        Timeframe::H1 => "1hour",
        Timeframe::H4 => "4hour",
        Timeframe::D1 => "1day",
    }
}

fn interval_secs(timeframe: Timeframe) -> i64 {
    match timeframe {
        Timeframe::M1 => 60,
        Timeframe::M5 => 300,
        Timeframe::M15 => 900,
        Timeframe::H1 => 3_600,
        Timeframe::H4 => 14_400,
        Timeframe::D1 => 86_400,
    }
}

#[derive(Deserialize, Debug)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    base_currency: String,
    quote_currency: String,
    #[serde(default)]
    enable_trading: bool,
}

#[derive(Deserialize, Debug)]
struct Stats {
    #[serde(default, deserialize_with = "klines::deserialize_f64_lenient")]
    vol: Option<f64>,
}

fn unwrap_data<T: DeserializeOwned>(payload: Value) -> Result<T, FetchError> {
    let envelope: Envelope<T> = serde_json::from_value(payload)?;
    if envelope.code != OK_CODE {
        return Err(FetchError::Api {
            code: envelope.code,
            message: envelope.msg,
        });
    }
    envelope
        .data
        .ok_or_else(|| FetchError::Decode("response without data".into()))
}

fn parse_pairs(payload: Value) -> Result<Vec<TradingPair>, FetchError> {
    let symbols: Vec<SymbolInfo> = unwrap_data(payload)?;
    Ok(symbols
        .iter()
        .filter(|s| s.enable_trading)
        .map(|s| TradingPair::new(ExchangeId::Kucoin, &s.base_currency, &s.quote_currency, &s.symbol))
        .collect())
}

fn parse_candles(payload: Value, count: usize) -> Result<Vec<Candle>, FetchError> {
    let rows: Vec<Vec<Value>> = unwrap_data(payload)?;
    klines::parse_rows(&rows, &LAYOUT, count)
}

fn parse_ticker_volume(payload: Value) -> Result<f64, FetchError> {
    let stats: Stats = unwrap_data(payload)?;
    stats
        .vol
        .ok_or_else(|| FetchError::Decode("stats without vol".into()))
}

pub async fn list_pairs(http: &HttpClient) -> Result<Vec<TradingPair>, FetchError> {
    let payload: Value = http.get_json(&format!("{BASE_URL}/api/v2/symbols"), &[]).await?;
    parse_pairs(payload)
}

pub async fn fetch_candles(
    http: &HttpClient,
    pair: &TradingPair,
    timeframe: Timeframe,
    count: u32,
) -> Result<Vec<Candle>, FetchError> {
    // No limit parameter; bound the window by time instead.
    let end = Utc::now().timestamp();
    let start = end - (count as i64 + 1) * interval_secs(timeframe);
    let query = [
        ("symbol", pair.venue_symbol.clone()),
        ("type", candle_type(timeframe).to_string()),
        ("startAt", start.to_string()),
        ("endAt", end.to_string()),
    ];
    let payload: Value = http
        .get_json(&format!("{BASE_URL}/api/v1/market/candles"), &query)
        .await?;
    parse_candles(payload, count as usize)
}

pub async fn fetch_ticker_volume(http: &HttpClient, pair: &TradingPair) -> Result<f64, FetchError> {
    let payload: Value = http
        .get_json(
            &format!("{BASE_URL}/api/v1/market/stats"),
            &[("symbol", pair.venue_symbol.clone())],
        )
        .await?;
    parse_ticker_volume(payload)
}
