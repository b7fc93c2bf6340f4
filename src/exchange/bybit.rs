use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{ExchangeId, HttpClient, TradingPair};
use crate::error::FetchError;
use crate::klines::{self, Candle, RowLayout, Timeframe};

const BASE_URL: &str = "https://api.bybit.com";

fn interval(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::M1 => "1",
        Timeframe::M5 => "5",
        Timeframe::M15 => "15",
        Timeframe::H1 => "60",
        Timeframe::H4 => "240",
        Timeframe::D1 => "D",
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    ret_code: i64,
    #[serde(default)]
    ret_msg: String,
    result: Option<T>,
}

#[derive(Deserialize, Debug)]
struct ListResult<T> {
    #[serde(default = "Vec::new")]
    list: Vec<T>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Instrument {
    symbol: String,
    base_coin: String,
    quote_coin: String,
    status: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Ticker {
    #[serde(default, deserialize_with = "klines::deserialize_f64_lenient")]
    volume24h: Option<f64>,
}

fn unwrap_list<T: DeserializeOwned>(payload: Value) -> Result<Vec<T>, FetchError> {
    let envelope: Envelope<ListResult<T>> = serde_json::from_value(payload)?;
    if envelope.ret_code != 0 {
        return Err(FetchError::Api {
            code: envelope.ret_code.to_string(),
            message: envelope.ret_msg,
        });
    }
    Ok(envelope.result.map(|r| r.list).unwrap_or_default())
}

fn parse_pairs(payload: Value) -> Result<Vec<TradingPair>, FetchError> {
    let instruments: Vec<Instrument> = unwrap_list(payload)?;
    Ok(instruments
        .iter()
        .filter(|i| i.status == "Trading")
        .map(|i| TradingPair::new(ExchangeId::Bybit, &i.base_coin, &i.quote_coin, &i.symbol))
        .collect())
}

fn parse_candles(payload: Value, count: usize) -> Result<Vec<Candle>, FetchError> {
    let rows: Vec<Vec<Value>> = unwrap_list(payload)?;
    klines::parse_rows(&rows, &RowLayout::OHLCV_MILLIS, count)
}

fn parse_ticker_volume(payload: Value) -> Result<f64, FetchError> {
    let tickers: Vec<Ticker> = unwrap_list(payload)?;
    tickers
        .first()
        .and_then(|t| t.volume24h)
        .ok_or_else(|| FetchError::Decode("ticker without volume24h".into()))
}

pub async fn list_pairs(http: &HttpClient) -> Result<Vec<TradingPair>, FetchError> {
    let url = format!("{BASE_URL}/v5/market/instruments-info");
    let payload: Value = http.get_json(&url, &[("category", "spot".to_string())]).await?;
    parse_pairs(payload)
}

pub async fn fetch_candles(
    http: &HttpClient,
    pair: &TradingPair,
    timeframe: Timeframe,
    count: u32,
) -> Result<Vec<Candle>, FetchError> {
    let url = format!("{BASE_URL}/v5/market/kline");
    let query = [
        ("category", "spot".to_string()),
        ("symbol", pair.venue_symbol.clone()),
        ("interval", interval(timeframe).to_string()),
        ("limit", count.to_string()),
    ];
    let payload: Value = http.get_json(&url, &query).await?;
    parse_candles(payload, count as usize)
}

pub async fn fetch_ticker_volume(http: &HttpClient, pair: &TradingPair) -> Result<f64, FetchError> {
    let url = format!("{BASE_URL}/v5/market/tickers");
    let query = [
        ("category", "spot".to_string()),
        ("symbol", pair.venue_symbol.clone()),
    ];
    let payload: Value = http.get_json(&url, &query).await?;
    parse_ticker_volume(payload)
}
