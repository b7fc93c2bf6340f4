//! The scan pipeline: list an exchange's pairs, fetch their candles, derive
//! volume/return metrics and indicators, and rank the survivors.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ScanConfig;
use crate::error::{FetchError, ScanError};
use crate::exchange::{ExchangeId, MarketSource, TradingPair};
use crate::find_tickers;
use crate::indicators::{IndicatorConfig, IndicatorSnapshot};
use crate::metrics;

const MAX_RATE_LIMIT_PAUSE: Duration = Duration::from_secs(60);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RankBy {
    #[default]
    VolumeRatio,
    LookbackReturn,
    CurrentReturn,
    Rsi,
    MacdHistogram,
}

impl RankBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankBy::VolumeRatio => "volume_ratio",
            RankBy::LookbackReturn => "lookback_return",
            RankBy::CurrentReturn => "current_return",
            RankBy::Rsi => "rsi",
            RankBy::MacdHistogram => "macd_histogram",
        }
    }

    pub fn key(&self, row: &ScanRow) -> Option<f64> {
        let value = match self {
            RankBy::VolumeRatio => Some(row.volume_ratio),
            RankBy::LookbackReturn => Some(row.lookback_return_pct),
            RankBy::CurrentReturn => Some(row.current_return_pct),
            RankBy::Rsi => row.indicators.rsi,
            RankBy::MacdHistogram => row.indicators.macd.map(|m| m.histogram),
        };
        value.filter(|v| v.is_finite())
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ScanRow {
    pub rank: usize,
    pub symbol: String,
    pub last_price: f64,
    pub current_volume: f64,
    pub normal_volume: f64,
    pub volume_ratio: f64,
    pub current_return_pct: f64,
    pub normal_return_pct: f64,
    pub lookback_return_pct: f64,
    pub ticker_volume: Option<f64>,
    pub indicators: IndicatorSnapshot,
    pub candle_time: DateTime<Utc>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ScanResult {
    pub exchange: ExchangeId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub rank_by: RankBy,
    pub pairs_scanned: usize,
    pub pairs_failed: usize,
    pub rows: Vec<ScanRow>,
}

#[async_trait]
pub trait ScanJob: Send + Sync {
    async fn run(&self, exchange: ExchangeId) -> Result<ScanResult, ScanError>;
}

/// Sorts descending by `rank_by`, rows without a value last, then numbers
/// the ranks from 1.
pub fn rank_rows(rows: &mut [ScanRow], rank_by: RankBy) {
    rows.sort_by(|a, b| match (rank_by.key(a), rank_by.key(b)) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    for (i, row) in rows.iter_mut().enumerate() {
        row.rank = i + 1;
    }
}

pub struct Scanner<M> {
    source: Arc<M>,
    scan: ScanConfig,
    indicators: IndicatorConfig,
}

impl<M: MarketSource> Scanner<M> {
    pub fn new(source: Arc<M>, scan: ScanConfig, indicators: IndicatorConfig) -> Self {
        Self {
            source,
            scan,
            indicators,
        }
    }

    /// `Ok(None)` means the pair was fetched fine but the demand filter
    /// dropped it.
    async fn scan_pair(&self, pair: &TradingPair) -> Result<Option<ScanRow>, FetchError> {
        let candles = self
            .source
            .fetch_candles(pair, self.scan.timeframe, self.scan.candle_limit)
            .await?;
        let m = metrics::analyze(&candles, self.scan.lookback)?;

        let filter = &self.scan.demand_filter;
        if filter.enabled && !m.is_high_demand(filter) {
            debug!(symbol = %pair.symbol(), "below demand thresholds");
            return Ok(None);
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let indicators = IndicatorSnapshot::compute(&closes, &self.indicators);

        let ticker_volume = if self.scan.fetch_ticker_volume {
            match self.source.fetch_ticker_volume(pair).await {
                Ok(volume) => Some(volume),
                Err(err) => {
                    warn!(symbol = %pair.symbol(), %err, "ticker volume unavailable");
                    None
                }
            }
        } else {
            None
        };

        let candle_time = candles
            .last()
            .map(|c| c.open_time)
            .unwrap_or_else(Utc::now);

        Ok(Some(ScanRow {
            rank: 0,
            symbol: pair.symbol(),
            last_price: m.last_price,
            current_volume: m.current_volume,
            normal_volume: m.volume.mean,
            volume_ratio: m.volume_ratio,
            current_return_pct: m.current_return * 100.0,
            normal_return_pct: m.returns.mean * 100.0,
            lookback_return_pct: m.lookback_return_pct,
            ticker_volume,
            indicators,
            candle_time,
        }))
    }
}

#[async_trait]
impl<M: MarketSource> ScanJob for Scanner<M> {
    async fn run(&self, exchange: ExchangeId) -> Result<ScanResult, ScanError> {
        let started_at = Utc::now();

        let listed = self
            .source
            .list_pairs(exchange)
            .await
            .map_err(|err| ScanError::SourceUnavailable {
                exchange,
                reason: err.to_string(),
            })?;
        let pairs = find_tickers::select_pairs(listed, &self.scan.quote_assets, self.scan.max_pairs);
        info!(%exchange, pairs = pairs.len(), timeframe = %self.scan.timeframe, "scan started");

        let mut rows = Vec::with_capacity(pairs.len());
        let mut failed = 0usize;

        for batch in pairs.chunks(self.scan.concurrency.max(1)) {
            let results = join_all(batch.iter().map(|pair| self.scan_pair(pair))).await;

            let mut pause: Option<Duration> = None;
            for (pair, result) in batch.iter().zip(results) {
                match result {
                    Ok(Some(row)) => rows.push(row),
                    Ok(None) => {}
                    Err(source) => {
                        failed += 1;
                        if let Some(wait) = source.retry_after() {
                            pause = Some(pause.map_or(wait, |p| p.max(wait)));
                        }
                        let err = ScanError::PairFetchFailed {
                            symbol: pair.symbol(),
                            source,
                        };
                        warn!(%exchange, %err, "skipping pair");
                    }
                }
            }

            if let Some(wait) = pause {
                let wait = wait.min(MAX_RATE_LIMIT_PAUSE);
                warn!(%exchange, ?wait, "rate limited, pausing before next batch");
                tokio::time::sleep(wait).await;
            }
        }

        if !pairs.is_empty() && failed == pairs.len() {
            return Err(ScanError::SourceUnavailable {
                exchange,
                reason: format!("all {failed} pair fetches failed"),
            });
        }

        rank_rows(&mut rows, self.scan.rank_by);

        let result = ScanResult {
            exchange,
            started_at,
            finished_at: Utc::now(),
            rank_by: self.scan.rank_by,
            pairs_scanned: pairs.len(),
            pairs_failed: failed,
            rows,
        };
        info!(
            %exchange,
            rows = result.rows.len(),
            failed,
            elapsed_ms = (result.finished_at - result.started_at).num_milliseconds(),
            "scan finished"
        );
        Ok(result)
    }
}
