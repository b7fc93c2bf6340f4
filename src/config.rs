use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::analysis::RankBy;
use crate::exchange::ExchangeId;
use crate::indicators::IndicatorConfig;
use crate::klines::Timeframe;

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub scan: ScanConfig,
    pub indicators: IndicatorConfig,
    pub cache: CacheConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ScanConfig {
    pub default_exchange: ExchangeId,
    /// Only pairs quoted in one of these assets are scanned.
    pub quote_assets: Vec<String>,
    pub timeframe: Timeframe,
    /// Candles in the trailing window that "normal" volume and return come from.
    pub lookback: usize,
    pub candle_limit: u32,
    pub max_pairs: Option<usize>,
    /// Pairs fetched at the same time.
    pub concurrency: usize,
    pub request_timeout_secs: u64,
    pub rank_by: RankBy,
    pub fetch_ticker_volume: bool,
    pub demand_filter: DemandFilter,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            default_exchange: ExchangeId::Bybit,
            quote_assets: vec!["USDT".to_string()],
            timeframe: Timeframe::D1,
            lookback: 20,
            candle_limit: 30,
            max_pairs: None,
            concurrency: 8,
            request_timeout_secs: 10,
            rank_by: RankBy::VolumeRatio,
            fetch_ticker_volume: false,
            demand_filter: DemandFilter::default(),
        }
    }
}

impl ScanConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Keeps only pairs whose latest volume and return both break out of their
/// trailing range by the given number of standard deviations.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct DemandFilter {
    pub enabled: bool,
    pub volume_mult: f64,
    pub return_mult: f64,
}

impl Default for DemandFilter {
    fn default() -> Self {
        Self {
            enabled: false,
            volume_mult: 2.0,
            return_mult: 2.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub staleness_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { staleness_secs: 15 * 60 }
    }
}

/// One week.
pub const MAX_STALENESS_SECS: u64 = 7 * 24 * 60 * 60;

impl CacheConfig {
    pub fn staleness(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.staleness_secs.min(MAX_STALENESS_SECS) as i64)
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        let scan = &self.scan;
        if scan.lookback == 0 {
            bail!("scan.lookback must be at least 1");
        }
        if (scan.candle_limit as usize) <= scan.lookback {
            bail!(
                "scan.candle_limit ({}) must exceed scan.lookback ({})",
                scan.candle_limit,
                scan.lookback
            );
        }
        if scan.concurrency == 0 {
            bail!("scan.concurrency must be at least 1");
        }
        if scan.quote_assets.is_empty() {
            bail!("scan.quote_assets must name at least one asset");
        }

        let ind = &self.indicators;
        if ind.rsi_period == 0 || ind.macd_fast == 0 || ind.macd_slow == 0 || ind.macd_signal == 0 {
            bail!("indicator periods must be positive");
        }
        if ind.macd_fast >= ind.macd_slow {
            bail!("indicators.macd_fast must be shorter than indicators.macd_slow");
        }

        let staleness = self.cache.staleness_secs;
        if staleness == 0 || staleness > MAX_STALENESS_SECS {
            bail!("cache.staleness_secs must be between 1 and {MAX_STALENESS_SECS}, got {staleness}");
        }
        Ok(())
    }

    /// Applies `SCANNER_BIND` / `SCANNER_PORT` style overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        if let Some(bind) = get("SCANNER_BIND") {
            self.server.bind = bind;
        }
        if let Some(port) = get("SCANNER_PORT").and_then(|s| s.parse().ok()) {
            self.server.port = port;
        }
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }
}
