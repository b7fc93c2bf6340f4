use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::FetchError;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            other => Err(format!("unknown timeframe: {other}")),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Return of this single candle, `(close - open) / open`.
    pub fn body_return(&self) -> Option<f64> {
        if self.open == 0.0 {
            return None;
        }
        Some((self.close - self.open) / self.open)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Millis,
    Seconds,
}

/// Column positions of one venue's kline array rows.
#[derive(Debug, Clone, Copy)]
pub struct RowLayout {
    pub time: usize,
    pub open: usize,
    pub high: usize,
    pub low: usize,
    pub close: usize,
    pub volume: usize,
    pub unit: TimeUnit,
}

impl RowLayout {
    /// `[time, open, high, low, close, volume, ...]` in milliseconds.
    pub const OHLCV_MILLIS: RowLayout = RowLayout {
        time: 0,
        open: 1,
        high: 2,
        low: 3,
        close: 4,
        volume: 5,
        unit: TimeUnit::Millis,
    };
}

pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.trim().is_empty() => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_row(row: &[Value], layout: &RowLayout) -> Result<Candle, FetchError> {
    let field = |idx: usize, name: &str| {
        row.get(idx)
            .and_then(value_as_f64)
            .ok_or_else(|| FetchError::Decode(format!("kline row missing {name}")))
    };

    let raw_time = row
        .get(layout.time)
        .and_then(value_as_i64)
        .ok_or_else(|| FetchError::Decode("kline row missing time".into()))?;
    let millis = match layout.unit {
        TimeUnit::Millis => raw_time,
        TimeUnit::Seconds => raw_time
            .checked_mul(1000)
            .ok_or_else(|| FetchError::Decode(format!("kline time out of range: {raw_time}")))?,
    };
    let open_time = DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| FetchError::Decode(format!("kline time out of range: {raw_time}")))?;

    Ok(Candle {
        open_time,
        open: field(layout.open, "open")?,
        high: field(layout.high, "high")?,
        low: field(layout.low, "low")?,
        close: field(layout.close, "close")?,
        volume: field(layout.volume, "volume")?,
    })
}

/// Converts raw kline rows into candles ordered oldest first, keeping at most
/// the `count` most recent ones.
pub fn parse_rows(rows: &[Vec<Value>], layout: &RowLayout, count: usize) -> Result<Vec<Candle>, FetchError> {
    let mut candles = rows
        .iter()
        .map(|row| parse_row(row, layout))
        .collect::<Result<Vec<_>, _>>()?;

    candles.sort_by_key(|c| c.open_time);
    candles.dedup_by_key(|c| c.open_time);

    if candles.len() > count {
        candles.drain(..candles.len() - count);
    }
    Ok(candles)
}

// Venues disagree on whether numbers arrive as JSON numbers or strings.

struct LenientF64Visitor;

impl<'de> Visitor<'de> for LenientF64Visitor {
    type Value = Option<f64>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a float, an integer, or a string representing a number")
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
        Ok(Some(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if v.trim().is_empty() {
            Ok(None)
        } else {
            v.trim().parse::<f64>().map(Some).map_err(E::custom)
        }
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_none<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }
}

pub fn deserialize_f64_lenient<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(LenientF64Visitor)
}
