//! Incremental candle synchronization.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, info, instrument, warn};

use ohlcv_core::api::{CandleFeed, FeedRequest, MAX_FEED_PAGE};
use ohlcv_core::store::CandleStore;
use ohlcv_core::types::{Candle, SeriesKey, TimeframeCatalog};
use ohlcv_core::{Error, Result};

use crate::scheduler::{Job, JobScheduler};

/// Outcome of synchronizing one (symbol, cadence) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub symbol: String,
    pub cadence: String,
    /// Rows inserted or overwritten.
    pub inserted: u64,
}

/// A pair that failed during an isolated batch.
#[derive(Debug)]
pub struct SyncFailure {
    pub symbol: String,
    pub cadence: String,
    pub error: Error,
}

/// Per-pair results of [`CandleSynchronizer::sync_each`].
#[derive(Debug, Default)]
pub struct SyncReport {
    pub succeeded: Vec<SyncStats>,
    pub failed: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn total_inserted(&self) -> u64 {
        self.succeeded.iter().map(|s| s.inserted).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Pages candles from a feed into a store.
pub struct CandleSynchronizer {
    store: Arc<dyn CandleStore>,
    feed: Arc<dyn CandleFeed>,
    catalog: TimeframeCatalog,
    source: String,
}

impl CandleSynchronizer {
    pub fn new(
        store: Arc<dyn CandleStore>,
        feed: Arc<dyn CandleFeed>,
        catalog: TimeframeCatalog,
        source: impl Into<String>,
    ) -> Self {
        Self {
            store,
            feed,
            catalog,
            source: source.into(),
        }
    }

    pub fn catalog(&self) -> &TimeframeCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<dyn CandleStore> {
        &self.store
    }

    /// Storage key for a pair under this synchronizer's source.
    pub fn series_key(&self, symbol: &str, cadence: &str) -> SeriesKey {
        SeriesKey::new(&self.source, symbol, cadence)
    }

    /// Bring one series up to date.
    ///
    /// Resumes at the latest stored open time plus one bar; falls back to
    /// `start` for an empty series and does nothing if neither exists.
    /// Pages until the feed is exhausted or the cursor passes `end` (now if
    /// `None`). Feed errors propagate without retry.
    #[instrument(skip(self), fields(source = %self.source))]
    pub async fn sync_one(
        &self,
        symbol: &str,
        cadence: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<SyncStats> {
        let meta = self.catalog.require(cadence)?;
        let key = self.series_key(symbol, &meta.name);
        let delta = meta.delta();

        let mut stats = SyncStats {
            symbol: key.symbol.clone(),
            cadence: key.cadence.clone(),
            inserted: 0,
        };

        let latest = self.store.latest_open_time(&key).await?;
        let Some(mut fetch_start) = latest.map(|t| t + delta).or(start) else {
            info!(series = %key, "No start time provided and no stored candles; skipping");
            return Ok(stats);
        };

        let upper_bound = end.unwrap_or_else(Utc::now);
        while fetch_start <= upper_bound {
            debug!(series = %key, from = %fetch_start, to = %upper_bound, "Fetching candles");

            let page = self
                .feed
                .fetch(FeedRequest {
                    symbol: key.symbol.clone(),
                    interval: meta.interval.clone(),
                    limit: MAX_FEED_PAGE,
                    start: Some(fetch_start),
                    end: Some(upper_bound),
                })
                .await?;
            if page.is_empty() {
                break;
            }

            // Feeds may repeat the boundary bar; never write behind the cursor.
            let batch: Vec<Candle> = page
                .into_iter()
                .filter(|c| c.open_time >= fetch_start && c.open_time <= upper_bound)
                .collect();
            let Some(last_open) = batch.iter().map(|c| c.open_time).max() else {
                break;
            };

            stats.inserted += self.store.upsert(&key, &batch).await?;
            fetch_start = last_open + delta;
        }

        info!(series = %key, inserted = stats.inserted, "Synchronization finished");
        Ok(stats)
    }

    /// Synchronize every symbol × cadence pair in order, stopping at the first
    /// failure. `cadences` defaults to the whole catalog.
    pub async fn sync_many<S>(
        &self,
        symbols: &[S],
        cadences: Option<&[S]>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<SyncStats>>
    where
        S: AsRef<str> + Sync,
    {
        let cadences = self.requested_cadences(cadences);
        let mut stats = Vec::with_capacity(symbols.len() * cadences.len());

        for symbol in symbols {
            for cadence in &cadences {
                stats.push(self.sync_one(symbol.as_ref(), cadence, start, end).await?);
            }
        }

        Ok(stats)
    }

    /// Like [`sync_many`](Self::sync_many), but every pair is attempted and
    /// failures are reported per pair instead of aborting the batch.
    pub async fn sync_each<S>(
        &self,
        symbols: &[S],
        cadences: Option<&[S]>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> SyncReport
    where
        S: AsRef<str> + Sync,
    {
        let cadences = self.requested_cadences(cadences);
        let mut report = SyncReport::default();

        for symbol in symbols {
            for cadence in &cadences {
                match self.sync_one(symbol.as_ref(), cadence, start, end).await {
                    Ok(stats) => report.succeeded.push(stats),
                    Err(error) => {
                        warn!(
                            symbol = symbol.as_ref(),
                            cadence = %cadence,
                            error = %error,
                            "Candle synchronization failed"
                        );
                        report.failed.push(SyncFailure {
                            symbol: symbol.as_ref().to_uppercase(),
                            cadence: cadence.clone(),
                            error,
                        });
                    }
                }
            }
        }

        report
    }

    /// Return at least `min_bars` of the newest candles when possible,
    /// backfilling from `bootstrap_start` if the store is short.
    ///
    /// Returns whatever is available afterwards; deciding whether a short
    /// series is fatal is left to the caller.
    pub async fn ensure_history(
        &self,
        symbol: &str,
        cadence: &str,
        min_bars: usize,
        bootstrap_start: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>> {
        let meta = self.catalog.require(cadence)?;
        let key = self.series_key(symbol, &meta.name);

        let candles = self.store.recent(&key, Some(min_bars)).await?;
        if candles.len() >= min_bars {
            return Ok(candles);
        }

        info!(
            series = %key,
            have = candles.len(),
            need = min_bars,
            "Stored history is short; synchronizing missing candles"
        );
        self.sync_one(symbol, &meta.name, bootstrap_start, None).await?;

        let candles = self.store.recent(&key, Some(min_bars)).await?;
        debug!(series = %key, have = candles.len(), "History after synchronization");
        Ok(candles)
    }

    /// Register one recurring job per cadence, firing at the cadence's
    /// refresh interval. Each run synchronizes all `symbols` up to now and
    /// reports failures per pair.
    pub fn schedule_periodic(
        self: &Arc<Self>,
        scheduler: &dyn JobScheduler,
        symbols: Vec<String>,
        cadences: Option<Vec<String>>,
    ) -> Result<usize> {
        let cadences = match cadences {
            Some(list) => list,
            None => self.catalog.names(),
        };
        let metas = cadences
            .iter()
            .map(|c| self.catalog.require(c).cloned())
            .collect::<Result<Vec<_>>>()?;

        for meta in &metas {
            let period = StdDuration::from_secs(meta.bar_minutes() * 60);
            let sync = Arc::clone(self);
            let symbols = symbols.clone();
            let cadence = meta.name.clone();

            let job: Job = Arc::new(move || {
                let sync = Arc::clone(&sync);
                let symbols = symbols.clone();
                let cadence = cadence.clone();
                Box::pin(async move {
                    let report = sync
                        .sync_each(symbols.as_slice(), Some(std::slice::from_ref(&cadence)), None, None)
                        .await;
                    info!(
                        cadence = %cadence,
                        inserted = report.total_inserted(),
                        failed = report.failed.len(),
                        "Periodic synchronization run complete"
                    );
                })
            });

            scheduler.every(&format!("sync-{}", meta.name), period, job);
            info!(cadence = %meta.name, minutes = meta.bar_minutes(), "Scheduled periodic synchronization");
        }

        Ok(metas.len())
    }

    fn requested_cadences<S: AsRef<str>>(&self, cadences: Option<&[S]>) -> Vec<String> {
        match cadences {
            Some(list) => list.iter().map(|c| c.as_ref().to_lowercase()).collect(),
            None => self.catalog.names(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use mockall::mock;
    use ohlcv_core::store::MemoryCandleStore;
    use std::sync::Mutex;

    mock! {
        pub Feed {}

        #[async_trait]
        impl CandleFeed for Feed {
            async fn fetch(&self, request: FeedRequest) -> Result<Vec<Candle>>;
        }
    }

    /// Serves a fixed hourly series, honoring start/end/limit like a real feed.
    struct RangeFeed {
        bars: Vec<Candle>,
        /// Also return the bar just before `start`.
        overlap: bool,
        requests: Mutex<Vec<FeedRequest>>,
    }

    impl RangeFeed {
        fn new(bars: Vec<Candle>) -> Self {
            Self {
                bars,
                overlap: false,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CandleFeed for RangeFeed {
        async fn fetch(&self, request: FeedRequest) -> Result<Vec<Candle>> {
            self.requests.lock().unwrap().push(request.clone());
            let start = request.start.unwrap_or(DateTime::<Utc>::MIN_UTC);
            let end = request.end.unwrap_or(DateTime::<Utc>::MAX_UTC);

            let mut page: Vec<Candle> = self
                .bars
                .iter()
                .filter(|c| c.open_time >= start && c.open_time <= end)
                .take(request.limit)
                .cloned()
                .collect();
            if self.overlap {
                if let Some(prev) = self.bars.iter().rev().find(|c| c.open_time < start) {
                    page.insert(0, prev.clone());
                }
            }
            Ok(page)
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn hourly(count: usize) -> Vec<Candle> {
        (0..count)
            .map(|i| {
                let open_time = t0() + Duration::hours(i as i64);
                let price = 100.0 + (i % 17) as f64;
                Candle::new(
                    open_time,
                    open_time + Duration::hours(1) - Duration::milliseconds(1),
                    price,
                    price + 1.5,
                    price - 1.5,
                    price + 0.5,
                    25.0,
                )
            })
            .collect()
    }

    fn synchronizer(store: Arc<MemoryCandleStore>, feed: Arc<dyn CandleFeed>) -> CandleSynchronizer {
        CandleSynchronizer::new(
            store,
            feed,
            TimeframeCatalog::resolve(["1h", "4h"]),
            "binance_spot",
        )
    }

    fn api_error() -> Error {
        Error::Api {
            message: "API error: 503 Service Unavailable".to_string(),
            status: Some(503),
        }
    }

    #[tokio::test]
    async fn test_sync_one_pages_through_feed() {
        let bars = hourly(2500);
        let end = bars[2499].open_time;
        let feed = Arc::new(RangeFeed::new(bars.clone()));
        let store = Arc::new(MemoryCandleStore::new());
        let sync = synchronizer(store.clone(), feed.clone());

        let stats = sync.sync_one("btcusdt", "1h", Some(t0()), Some(end)).await.unwrap();

        assert_eq!(stats.symbol, "BTCUSDT");
        assert_eq!(stats.inserted, 2500);
        assert_eq!(feed.request_count(), 3);

        let key = sync.series_key("BTCUSDT", "1h");
        let stored = store.recent(&key, None).await.unwrap();
        assert_eq!(stored, bars);
    }

    #[tokio::test]
    async fn test_sync_one_is_idempotent() {
        let bars = hourly(300);
        let end = bars[299].open_time;
        let feed = Arc::new(RangeFeed::new(bars));
        let store = Arc::new(MemoryCandleStore::new());
        let sync = synchronizer(store.clone(), feed.clone());
        let key = sync.series_key("BTCUSDT", "1h");

        let first = sync.sync_one("BTCUSDT", "1h", Some(t0()), Some(end)).await.unwrap();
        let snapshot = store.recent(&key, None).await.unwrap();
        let requests = feed.request_count();

        let second = sync.sync_one("BTCUSDT", "1h", Some(t0()), Some(end)).await.unwrap();

        assert_eq!(first.inserted, 300);
        assert_eq!(second.inserted, 0);
        assert_eq!(feed.request_count(), requests);
        assert_eq!(store.recent(&key, None).await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_sync_one_resumes_from_cursor_and_drops_overlap() {
        let bars = hourly(50);
        let store = Arc::new(MemoryCandleStore::new());
        let key = SeriesKey::new("binance_spot", "BTCUSDT", "1h");
        store.upsert(&key, &bars[..20]).await.unwrap();

        let mut feed = RangeFeed::new(bars.clone());
        feed.overlap = true;
        let feed = Arc::new(feed);
        let sync = synchronizer(store.clone(), feed.clone());

        let stats = sync
            .sync_one("BTCUSDT", "1h", None, Some(bars[49].open_time))
            .await
            .unwrap();

        // Bars 20..50 only; the repeated boundary bar is never rewritten.
        assert_eq!(stats.inserted, 30);
        let first_request = feed.requests.lock().unwrap()[0].clone();
        assert_eq!(first_request.start, Some(bars[20].open_time));
        assert_eq!(first_request.interval, "1h");
        assert_eq!(store.count(&key).await.unwrap(), 50);
    }

    #[tokio::test]
    async fn test_cursor_never_passes_upper_bound() {
        let bars = hourly(120);
        let feed = Arc::new(RangeFeed::new(bars.clone()));
        let store = Arc::new(MemoryCandleStore::new());
        let sync = synchronizer(store.clone(), feed);
        let key = sync.series_key("BTCUSDT", "1h");

        let mut previous = None;
        for upper in [10usize, 10, 55, 90, 119] {
            let bound = bars[upper].open_time;
            sync.sync_one("BTCUSDT", "1h", Some(t0()), Some(bound)).await.unwrap();

            let latest = store.latest_open_time(&key).await.unwrap().unwrap();
            assert!(latest <= bound);
            if let Some(prev) = previous {
                assert!(latest >= prev);
            }
            previous = Some(latest);
        }
        assert_eq!(previous, Some(bars[119].open_time));
    }

    #[tokio::test]
    async fn test_bars_past_end_are_dropped() {
        let bars = hourly(30);
        let end = bars[19].open_time;
        let page = bars.clone();

        // Ignores the requested end and returns everything it has.
        let mut feed = MockFeed::new();
        feed.expect_fetch()
            .times(1)
            .returning(move |_| Ok(page.clone()));
        let store = Arc::new(MemoryCandleStore::new());
        let sync = synchronizer(store.clone(), Arc::new(feed));
        let key = sync.series_key("BTCUSDT", "1h");

        let stats = sync.sync_one("BTCUSDT", "1h", Some(t0()), Some(end)).await.unwrap();

        assert_eq!(stats.inserted, 20);
        assert_eq!(store.latest_open_time(&key).await.unwrap(), Some(end));
        assert_eq!(store.recent(&key, None).await.unwrap(), bars[..20].to_vec());
    }

    #[tokio::test]
    async fn test_sync_one_without_start_is_noop() {
        let mut feed = MockFeed::new();
        feed.expect_fetch().times(0);
        let store = Arc::new(MemoryCandleStore::new());
        let sync = synchronizer(store.clone(), Arc::new(feed));

        let stats = sync.sync_one("BTCUSDT", "1h", None, None).await.unwrap();
        assert_eq!(stats.inserted, 0);
    }

    #[tokio::test]
    async fn test_unknown_cadence_fails_before_io() {
        let mut feed = MockFeed::new();
        feed.expect_fetch().times(0);
        let sync = synchronizer(Arc::new(MemoryCandleStore::new()), Arc::new(feed));

        let err = sync.sync_one("BTCUSDT", "1d", Some(t0()), None).await.unwrap_err();
        assert!(matches!(err, Error::UnknownCadence(ref c) if c == "1d"));
    }

    #[tokio::test]
    async fn test_empty_page_stops_loop() {
        let mut feed = MockFeed::new();
        feed.expect_fetch().times(1).returning(|_| Ok(Vec::new()));
        let sync = synchronizer(Arc::new(MemoryCandleStore::new()), Arc::new(feed));

        let stats = sync
            .sync_one("BTCUSDT", "1h", Some(t0()), Some(t0() + Duration::days(30)))
            .await
            .unwrap();
        assert_eq!(stats.inserted, 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_propagates() {
        let mut feed = MockFeed::new();
        feed.expect_fetch().times(1).returning(|_| Err(api_error()));
        let sync = synchronizer(Arc::new(MemoryCandleStore::new()), Arc::new(feed));

        let err = sync.sync_one("BTCUSDT", "1h", Some(t0()), None).await.unwrap_err();
        assert!(err.is_fetch_failure());
    }

    #[tokio::test]
    async fn test_sync_many_aborts_on_first_failure() {
        let mut feed = MockFeed::new();
        feed.expect_fetch().times(1).returning(|_| Err(api_error()));
        let sync = synchronizer(Arc::new(MemoryCandleStore::new()), Arc::new(feed));

        let result = sync
            .sync_many(&["BTCUSDT", "ETHUSDT"], Some(&["1h"][..]), Some(t0()), None)
            .await;
        assert!(matches!(result, Err(Error::Api { status: Some(503), .. })));
    }

    #[tokio::test]
    async fn test_sync_many_covers_every_pair() {
        let bars = hourly(10);
        let end = bars[9].open_time;
        let feed = Arc::new(RangeFeed::new(bars));
        let sync = synchronizer(Arc::new(MemoryCandleStore::new()), feed);

        let stats = sync
            .sync_many(&["BTCUSDT", "ETHUSDT"], None, Some(t0()), Some(end))
            .await
            .unwrap();

        let pairs: Vec<_> = stats.iter().map(|s| (s.symbol.as_str(), s.cadence.as_str())).collect();
        assert_eq!(
            pairs,
            vec![("BTCUSDT", "1h"), ("BTCUSDT", "4h"), ("ETHUSDT", "1h"), ("ETHUSDT", "4h")]
        );
    }

    #[tokio::test]
    async fn test_sync_each_isolates_failures() {
        let mut feed = MockFeed::new();
        feed.expect_fetch().times(2).returning(|request| {
            if request.symbol == "BADUSDT" {
                Err(api_error())
            } else {
                Ok(Vec::new())
            }
        });
        let sync = synchronizer(Arc::new(MemoryCandleStore::new()), Arc::new(feed));

        let report = sync
            .sync_each(&["BADUSDT", "BTCUSDT"], Some(&["1h"][..]), Some(t0()), None)
            .await;

        assert!(!report.is_complete());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].symbol, "BADUSDT");
        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(report.succeeded[0].symbol, "BTCUSDT");
    }

    #[tokio::test]
    async fn test_ensure_history_backfills_when_short() {
        let bars = hourly(40);
        let store = Arc::new(MemoryCandleStore::new());
        let key = SeriesKey::new("binance_spot", "BTCUSDT", "1h");
        store.upsert(&key, &bars[..5]).await.unwrap();

        let feed = Arc::new(RangeFeed::new(bars.clone()));
        let sync = synchronizer(store, feed.clone());

        let history = sync.ensure_history("BTCUSDT", "1h", 30, Some(t0())).await.unwrap();
        assert_eq!(history.len(), 30);
        assert_eq!(history.last().map(|c| c.open_time), Some(bars[39].open_time));
        assert!(feed.request_count() >= 1);

        // Enough stored now: no further feed traffic.
        let requests = feed.request_count();
        sync.ensure_history("BTCUSDT", "1h", 30, Some(t0())).await.unwrap();
        assert_eq!(feed.request_count(), requests);
    }

    #[test]
    fn test_ensure_history_returns_short_series() {
        let mut feed = MockFeed::new();
        feed.expect_fetch().returning(|_| Ok(Vec::new()));
        let sync = synchronizer(Arc::new(MemoryCandleStore::new()), Arc::new(feed));

        let history = tokio_test::block_on(sync.ensure_history("BTCUSDT", "4h", 60, Some(t0()))).unwrap();
        assert!(history.is_empty());
    }
}
