//! Uniform access to the public market-data endpoints of the supported venues.

mod binance;
mod bybit;
mod gate;
mod kucoin;
mod okx;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::error::{FetchError, ScanError};
use crate::klines::{Candle, Timeframe};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeId {
    Binance,
    Bybit,
    Okx,
    Kucoin,
    Gate,
    Mexc,
}

impl ExchangeId {
    pub const ALL: [ExchangeId; 6] = [
        ExchangeId::Binance,
        ExchangeId::Bybit,
        ExchangeId::Okx,
        ExchangeId::Kucoin,
        ExchangeId::Gate,
        ExchangeId::Mexc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::Binance => "binance",
            ExchangeId::Bybit => "bybit",
            ExchangeId::Okx => "okx",
            ExchangeId::Kucoin => "kucoin",
            ExchangeId::Gate => "gate",
            ExchangeId::Mexc => "mexc",
        }
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeId {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ExchangeId::ALL
            .into_iter()
            .find(|id| id.as_str() == wanted)
            .ok_or_else(|| ScanError::UnsupportedExchange(s.trim().to_string()))
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TradingPair {
    pub exchange: ExchangeId,
    pub base: String,
    pub quote: String,
    /// Symbol as the venue spells it in requests.
    pub venue_symbol: String,
}

impl TradingPair {
    pub fn new(exchange: ExchangeId, base: &str, quote: &str, venue_symbol: &str) -> Self {
        Self {
            exchange,
            base: base.to_ascii_uppercase(),
            quote: quote.to_ascii_uppercase(),
            venue_symbol: venue_symbol.to_string(),
        }
    }

    pub fn symbol(&self) -> String {
        format!("{}/{}", self.base, self.quote)
    }
}

#[async_trait]
pub trait MarketSource: Send + Sync {
    async fn list_pairs(&self, exchange: ExchangeId) -> Result<Vec<TradingPair>, FetchError>;

    async fn fetch_candles(
        &self,
        pair: &TradingPair,
        timeframe: Timeframe,
        count: u32,
    ) -> Result<Vec<Candle>, FetchError>;

    async fn fetch_ticker_volume(&self, pair: &TradingPair) -> Result<f64, FetchError>;
}

static BAN_UNTIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"until\s+(\d+)").expect("static regex"));

/// Shared HTTP plumbing for the venue adapters.
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(50)
            .user_agent(concat!("demand-scanner/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        debug!(url, ?query, "GET");
        let response = self.client.get(url).query(query).send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::IM_A_TEAPOT {
            let header_wait = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            let retry_after = header_wait.or_else(|| ban_wait(&body, now_ms()));
            return Err(FetchError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: truncate(&body, 256),
            });
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Binance answers IP bans with "... banned until <epoch ms>".
fn ban_wait(body: &str, now_ms: u64) -> Option<Duration> {
    let caps = BAN_UNTIL.captures(body)?;
    let ban_until: u64 = caps.get(1)?.as_str().parse().ok()?;
    if ban_until <= now_ms {
        return None;
    }
    let wait_sec = ((ban_until - now_ms) as f64 / 1000.0) + 5.0;
    Some(Duration::from_secs_f64(wait_sec))
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Live implementation backed by each venue's public REST API.
pub struct RestMarketSource {
    http: HttpClient,
}

impl RestMarketSource {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        Ok(Self {
            http: HttpClient::new(timeout)?,
        })
    }
}

#[async_trait]
impl MarketSource for RestMarketSource {
    async fn list_pairs(&self, exchange: ExchangeId) -> Result<Vec<TradingPair>, FetchError> {
        match exchange {
            ExchangeId::Binance | ExchangeId::Mexc => binance::list_pairs(&self.http, exchange).await,
            ExchangeId::Bybit => bybit::list_pairs(&self.http).await,
            ExchangeId::Okx => okx::list_pairs(&self.http).await,
            ExchangeId::Kucoin => kucoin::list_pairs(&self.http).await,
            ExchangeId::Gate => gate::list_pairs(&self.http).await,
        }
    }

    async fn fetch_candles(
        &self,
        pair: &TradingPair,
        timeframe: Timeframe,
        count: u32,
    ) -> Result<Vec<Candle>, FetchError> {
        match pair.exchange {
            ExchangeId::Binance | ExchangeId::Mexc => {
                binance::fetch_candles(&self.http, pair, timeframe, count).await
            }
            ExchangeId::Bybit => bybit::fetch_candles(&self.http, pair, timeframe, count).await,
            ExchangeId::Okx => okx::fetch_candles(&self.http, pair, timeframe, count).await,
            ExchangeId::Kucoin => kucoin::fetch_candles(&self.http, pair, timeframe, count).await,
            ExchangeId::Gate => gate::fetch_candles(&self.http, pair, timeframe, count).await,
        }
    }

    async fn fetch_ticker_volume(&self, pair: &TradingPair) -> Result<f64, FetchError> {
        match pair.exchange {
            ExchangeId::Binance | ExchangeId::Mexc => binance::fetch_ticker_volume(&self.http, pair).await,
            ExchangeId::Bybit => bybit::fetch_ticker_volume(&self.http, pair).await,
            ExchangeId::Okx => okx::fetch_ticker_volume(&self.http, pair).await,
            ExchangeId::Kucoin => kucoin::fetch_ticker_volume(&self.http, pair).await,
            ExchangeId::Gate => gate::fetch_ticker_volume(&self.http, pair).await,
        }
    }
}
