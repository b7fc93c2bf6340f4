use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{ExchangeId, HttpClient, TradingPair};
use crate::error::FetchError;
use crate::klines::{self, Candle, RowLayout, Timeframe};

const BASE_URL: &str = "https://www.okx.com";

fn bar(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::M1 => "1m",
        Timeframe::M5 => "5m",
        Timeframe::M15 => "15m",
        Timeframe::H1 => "1H",
        Timeframe::H4 => "4H",
        // plain "1D" is aligned to Hong Kong time
        Timeframe::D1 => "1Dutc",
    }
}

#[derive(Deserialize, Debug)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Instrument {
    inst_id: String,
    base_ccy: String,
    quote_ccy: String,
    state: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Ticker {
    #[serde(default, deserialize_with = "klines::deserialize_f64_lenient")]
    vol24h: Option<f64>,
}

fn unwrap_data<T: DeserializeOwned>(payload: Value) -> Result<Vec<T>, FetchError> {
    let envelope: Envelope<T> = serde_json::from_value(payload)?;
    if envelope.code != "0" {
        return Err(FetchError::Api {
            code: envelope.code,
            message: envelope.msg,
        });
    }
    Ok(envelope.data)
}

fn parse_pairs(payload: Value) -> Result<Vec<TradingPair>, FetchError> {
    let instruments: Vec<Instrument> = unwrap_data(payload)?;
    Ok(instruments
        .iter()
        .filter(|i| i.state == "live")
        .map(|i| TradingPair::new(ExchangeId::Okx, &i.base_ccy, &i.quote_ccy, &i.inst_id))
        .collect())
}

fn parse_candles(payload: Value, count: usize) -> Result<Vec<Candle>, FetchError> {
    let rows: Vec<Vec<Value>> = unwrap_data(payload)?;
    klines::parse_rows(&rows, &RowLayout::OHLCV_MILLIS, count)
}

fn parse_ticker_volume(payload: Value) -> Result<f64, FetchError> {
    let tickers: Vec<Ticker> = unwrap_data(payload)?;
    tickers
        .first()
        .and_then(|t| t.vol24h)
        .ok_or_else(|| FetchError::Decode("ticker without vol24h".into()))
}

pub async fn list_pairs(http: &HttpClient) -> Result<Vec<TradingPair>, FetchError> {
    let url = format!("{BASE_URL}/api/v5/public/instruments");
    let payload: Value = http.get_json(&url, &[("instType", "SPOT".to_string())]).await?;
    parse_pairs(payload)
}

pub async fn fetch_candles(
    http: &HttpClient,
    pair: &TradingPair,
    timeframe: Timeframe,
    count: u32,
) -> Result<Vec<Candle>, FetchError> {
    let url = format!("{BASE_URL}/api/v5/market/candles");
    let query = [
        ("instId", pair.venue_symbol.clone()),
        ("bar", bar(timeframe).to_string()),
        ("limit", count.min(300).to_string()),
    ];
    let payload: Value = http.get_json(&url, &query).await?;
    parse_candles(payload, count as usize)
}

pub async fn fetch_ticker_volume(http: &HttpClient, pair: &TradingPair) -> Result<f64, FetchError> {
    let url = format!("{BASE_URL}/api/v5/market/ticker");
    let payload: Value = http
        .get_json(&url, &[("instId", pair.venue_symbol.clone())])
        .await?;
    parse_ticker_volume(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_live_instruments() {
        let payload = json!({
            "code": "0",
            "msg": "",
            "data": [
                {"instId": "BTC-USDT", "baseCcy": "BTC", "quoteCcy": "USDT", "state": "live"},
                {"instId": "NEW-USDT", "baseCcy": "NEW", "quoteCcy": "USDT", "state": "preopen"}
            ]
        });
        let pairs = parse_pairs(payload).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].venue_symbol, "BTC-USDT");
    }

    #[test]
    fn candles_sorted_oldest_first() {
        let payload = json!({
            "code": "0",
            "msg": "",
            "data": [
                ["1700086400000", "2", "3", "1", "2.5", "200", "500", "500", "1"],
                ["1700000000000", "1", "2", "1", "2", "100", "200", "200", "1"]
            ]
        });
        let candles = parse_candles(payload, 30).unwrap();
        assert_eq!(candles[0].volume, 100.0);
        assert_eq!(candles[1].close, 2.5);
    }

    #[test]
    fn error_code_surfaces_message() {
        let payload = json!({"code": "51001", "msg": "Instrument ID does not exist", "data": []});
        let err = parse_ticker_volume(payload).unwrap_err();
        assert!(matches!(err, FetchError::Api { message, .. } if message.contains("does not exist")));
    }
}
