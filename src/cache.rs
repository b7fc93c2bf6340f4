//! Per-exchange cache of the latest scan, refreshed on demand once stale.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::analysis::{ScanJob, ScanResult};
use crate::error::ScanError;
use crate::exchange::ExchangeId;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub result: Arc<ScanResult>,
    pub refreshed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Freshness {
    /// Served from the cache without running a scan.
    Cached,
    /// A scan ran for (or alongside) this request.
    Refreshed,
    /// The refresh failed; this is the last good result.
    Stale { reason: String },
}

impl Freshness {
    pub fn label(&self) -> &'static str {
        match self {
            Freshness::Cached => "cached",
            Freshness::Refreshed => "refreshed",
            Freshness::Stale { .. } => "stale",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub entry: Arc<CacheEntry>,
    pub freshness: Freshness,
}

#[derive(Default)]
struct Slot {
    current: RwLock<Option<Arc<CacheEntry>>>,
    /// Held for the whole duration of a refresh; one scan per exchange at a time.
    refresh: Mutex<()>,
}

pub struct RefreshCache {
    job: Arc<dyn ScanJob>,
    staleness: Duration,
    slots: Mutex<HashMap<ExchangeId, Arc<Slot>>>,
}

impl RefreshCache {
    pub fn new(job: Arc<dyn ScanJob>, staleness: Duration) -> Self {
        Self {
            job,
            staleness,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn staleness(&self) -> Duration {
        self.staleness
    }

    async fn slot(&self, exchange: ExchangeId) -> Arc<Slot> {
        let mut slots = self.slots.lock().await;
        Arc::clone(slots.entry(exchange).or_default())
    }

    fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        now - entry.refreshed_at <= self.staleness
    }

    /// Current entry for `exchange`, never triggering or waiting on a scan.
    pub async fn peek(&self, exchange: ExchangeId) -> Option<Arc<CacheEntry>> {
        let slot = self.slot(exchange).await;
        let current = slot.current.read().await;
        current.clone()
    }

    /// Returns the cached scan for `exchange`, running a new one first when
    /// there is none, when it is older than the staleness threshold at `now`,
    /// or when `force` is set.
    pub async fn get_or_refresh(
        &self,
        exchange: ExchangeId,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<CacheLookup, ScanError> {
        let slot = self.slot(exchange).await;

        if !force {
            if let Some(entry) = slot.current.read().await.clone() {
                if self.is_fresh(&entry, now) {
                    return Ok(CacheLookup {
                        entry,
                        freshness: Freshness::Cached,
                    });
                }
            }
        }

        let _refreshing = slot.refresh.lock().await;

        // Someone else may have refreshed while we queued for the lock.
        let previous = slot.current.read().await.clone();
        if let Some(entry) = &previous {
            let reusable = if force {
                entry.refreshed_at >= now
            } else {
                self.is_fresh(entry, now)
            };
            if reusable {
                return Ok(CacheLookup {
                    entry: Arc::clone(entry),
                    freshness: Freshness::Refreshed,
                });
            }
        }

        info!(%exchange, force, "refreshing scan");
        match self.job.run(exchange).await {
            Ok(result) => {
                let entry = Arc::new(CacheEntry {
                    result: Arc::new(result),
                    refreshed_at: now,
                });
                *slot.current.write().await = Some(Arc::clone(&entry));
                Ok(CacheLookup {
                    entry,
                    freshness: Freshness::Refreshed,
                })
            }
            Err(err) => match previous {
                Some(entry) => {
                    warn!(%exchange, %err, "refresh failed, serving last known results");
                    Ok(CacheLookup {
                        entry,
                        freshness: Freshness::Stale {
                            reason: err.to_string(),
                        },
                    })
                }
                None => {
                    error!(%exchange, %err, "refresh failed with nothing cached");
                    Err(err)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{RankBy, ScanRow};
    use crate::indicators::IndicatorSnapshot;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Each run produces rows stamped with the run number in every field, so
    /// a mixed result would show differing stamps.
    struct CountingJob {
        runs: AtomicUsize,
        fail: AtomicBool,
        delay: std::time::Duration,
    }

    impl CountingJob {
        fn new(delay_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                runs: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                delay: std::time::Duration::from_millis(delay_ms),
            })
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    fn stamped_row(stamp: f64, rank: usize) -> ScanRow {
        ScanRow {
            rank,
            symbol: format!("P{rank}/USDT"),
            last_price: stamp,
            current_volume: stamp,
            normal_volume: stamp,
            volume_ratio: stamp,
            current_return_pct: stamp,
            normal_return_pct: stamp,
            lookback_return_pct: stamp,
            ticker_volume: Some(stamp),
            indicators: IndicatorSnapshot::default(),
            candle_time: DateTime::from_timestamp(0, 0).unwrap(),
        }
    }

    #[async_trait]
    impl ScanJob for CountingJob {
        async fn run(&self, exchange: ExchangeId) -> Result<ScanResult, ScanError> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(ScanError::SourceUnavailable {
                    exchange,
                    reason: "connection refused".into(),
                });
            }
            let stamp = run as f64;
            let now = Utc::now();
            Ok(ScanResult {
                exchange,
                started_at: now,
                finished_at: now,
                rank_by: RankBy::VolumeRatio,
                pairs_scanned: 3,
                pairs_failed: 0,
                rows: (1..=3).map(|rank| stamped_row(stamp, rank)).collect(),
            })
        }
    }

    fn cache_with(job: &Arc<CountingJob>) -> Arc<RefreshCache> {
        let job: Arc<dyn ScanJob> = job.clone();
        Arc::new(RefreshCache::new(job, Duration::minutes(15)))
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn assert_single_cycle(result: &ScanResult) {
        let stamp = result.rows[0].last_price;
        for row in &result.rows {
            assert_eq!(row.last_price, stamp);
            assert_eq!(row.volume_ratio, stamp);
            assert_eq!(row.ticker_volume, Some(stamp));
        }
    }

    #[tokio::test]
    async fn second_request_within_threshold_reuses_the_scan() {
        let job = CountingJob::new(0);
        let cache = cache_with(&job);

        let first = cache.get_or_refresh(ExchangeId::Bybit, t0(), false).await.unwrap();
        assert_eq!(first.freshness, Freshness::Refreshed);

        let later = t0() + Duration::minutes(10);
        let second = cache.get_or_refresh(ExchangeId::Bybit, later, false).await.unwrap();
        assert_eq!(second.freshness, Freshness::Cached);
        assert_eq!(job.runs(), 1);
        assert!(Arc::ptr_eq(&first.entry, &second.entry));
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_scan() {
        let job = CountingJob::new(50);
        let cache = cache_with(&job);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get_or_refresh(ExchangeId::Okx, t0(), false).await })
            })
            .collect();

        for handle in handles {
            let lookup = handle.await.unwrap().unwrap();
            assert_eq!(lookup.entry.result.rows[0].last_price, 1.0);
        }
        assert_eq!(job.runs(), 1);
    }

    #[tokio::test]
    async fn concurrent_forced_refreshes_share_one_scan() {
        let job = CountingJob::new(50);
        let cache = cache_with(&job);

        let a = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_or_refresh(ExchangeId::Okx, t0(), true).await })
        };
        let b = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_or_refresh(ExchangeId::Okx, t0(), true).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        assert_eq!(job.runs(), 1);
    }

    #[tokio::test]
    async fn stale_entry_triggers_exactly_one_new_scan() {
        let job = CountingJob::new(0);
        let cache = cache_with(&job);

        let first = cache.get_or_refresh(ExchangeId::Gate, t0(), false).await.unwrap();
        let after = t0() + Duration::minutes(15) + Duration::seconds(1);
        let second = cache.get_or_refresh(ExchangeId::Gate, after, false).await.unwrap();
        let third = cache.get_or_refresh(ExchangeId::Gate, after, false).await.unwrap();

        assert_eq!(job.runs(), 2);
        assert_eq!(second.freshness, Freshness::Refreshed);
        assert_eq!(third.freshness, Freshness::Cached);
        assert!(second.entry.refreshed_at > first.entry.refreshed_at);
        assert_eq!(second.entry.result.rows[0].last_price, 2.0);
    }

    #[tokio::test]
    async fn exactly_at_threshold_is_still_fresh() {
        let job = CountingJob::new(0);
        let cache = cache_with(&job);

        cache.get_or_refresh(ExchangeId::Gate, t0(), false).await.unwrap();
        cache
            .get_or_refresh(ExchangeId::Gate, t0() + Duration::minutes(15), false)
            .await
            .unwrap();
        assert_eq!(job.runs(), 1);
    }

    #[tokio::test]
    async fn exchanges_are_cached_independently() {
        let job = CountingJob::new(0);
        let cache = cache_with(&job);

        cache.get_or_refresh(ExchangeId::Bybit, t0(), false).await.unwrap();
        cache.get_or_refresh(ExchangeId::Binance, t0(), false).await.unwrap();
        assert_eq!(job.runs(), 2);
        assert!(cache.peek(ExchangeId::Kucoin).await.is_none());
    }

    #[tokio::test]
    async fn failed_refresh_serves_previous_result_as_stale() {
        let job = CountingJob::new(0);
        let cache = cache_with(&job);

        let first = cache.get_or_refresh(ExchangeId::Mexc, t0(), false).await.unwrap();
        job.fail.store(true, Ordering::SeqCst);

        let lookup = cache
            .get_or_refresh(ExchangeId::Mexc, t0() + Duration::hours(1), false)
            .await
            .unwrap();
        assert!(matches!(&lookup.freshness, Freshness::Stale { reason } if reason.contains("connection refused")));
        assert!(Arc::ptr_eq(&lookup.entry, &first.entry));
    }

    #[tokio::test]
    async fn failed_first_refresh_is_an_error() {
        let job = CountingJob::new(0);
        job.fail.store(true, Ordering::SeqCst);
        let cache = cache_with(&job);

        let err = cache
            .get_or_refresh(ExchangeId::Kucoin, t0(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::SourceUnavailable { .. }));
        assert!(cache.peek(ExchangeId::Kucoin).await.is_none());
    }

    #[tokio::test]
    async fn readers_never_see_a_mix_of_cycles() {
        let job = CountingJob::new(5);
        let cache = cache_with(&job);
        cache.get_or_refresh(ExchangeId::Bybit, t0(), false).await.unwrap();

        let writer = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                for i in 1..=5 {
                    let now = t0() + Duration::seconds(i);
                    cache.get_or_refresh(ExchangeId::Bybit, now, true).await.unwrap();
                }
            })
        };

        let mut seen = Vec::new();
        while !writer.is_finished() {
            if let Some(entry) = cache.peek(ExchangeId::Bybit).await {
                assert_single_cycle(&entry.result);
                seen.push(entry.result.rows[0].last_price);
            }
            let lookup = cache
                .get_or_refresh(ExchangeId::Bybit, t0(), false)
                .await
                .unwrap();
            assert_single_cycle(&lookup.entry.result);
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();

        assert_eq!(job.runs(), 6);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }
}
