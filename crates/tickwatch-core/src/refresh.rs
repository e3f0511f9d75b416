//! Refresh pipeline: bounded fan-out fetch, validation and a single
//! fan-in commit into the instrument store.
//!
//! Every instrument in a batch gets its own task, but at most `concurrency`
//! fetches are in flight at once across every caller of the pipeline. Failed
//! instruments are reported and keep their previous snapshot; the successful
//! ones are written together once every task has resolved.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::calendar::TradingCalendar;
use crate::fetch::{FetchAdapter, FetchError};
use crate::fields::snapshot_from_fields;
use crate::store::{InstrumentStore, StoreError};
use crate::throttling::FetchThrottle;
use crate::{is_stale, CoreError, Instrument, InstrumentId, MarketSnapshot, Ticker, UtcDateTime};

/// Whether the freshness and market-hours gates apply to a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    /// Skip fresh snapshots and do nothing while the market is closed. (Default)
    #[default]
    Policy,
    /// Fetch every instrument regardless of freshness or market hours.
    Force,
}

/// Pipeline tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSettings {
    /// Maximum fetches in flight.
    pub concurrency: usize,
    /// Snapshots younger than this are not refetched.
    pub freshness: Duration,
    pub fetch_timeout: Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            concurrency: 8,
            freshness: Duration::from_secs(30 * 60),
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

/// One instrument that could not be refreshed in a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshFailure {
    pub instrument_id: InstrumentId,
    pub ticker: Ticker,
    pub code: &'static str,
    pub message: String,
    /// Whether a later cycle may succeed without operator action.
    pub retryable: bool,
}

impl RefreshFailure {
    fn new(instrument: &Instrument, error: &CoreError) -> Self {
        Self {
            instrument_id: instrument.id,
            ticker: instrument.ticker.clone(),
            code: error.code(),
            message: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

/// Outcome of one `refresh_many` cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub cycle_id: Uuid,
    pub requested: usize,
    pub succeeded: Vec<Ticker>,
    pub failed: Vec<RefreshFailure>,
    pub skipped_fresh: usize,
    pub market_closed: bool,
    pub latency_ms: u64,
}

impl RefreshReport {
    fn empty(cycle_id: Uuid, requested: usize) -> Self {
        Self {
            cycle_id,
            requested,
            succeeded: Vec::new(),
            failed: Vec::new(),
            skipped_fresh: 0,
            market_closed: false,
            latency_ms: 0,
        }
    }

    pub fn succeeded_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

/// Shared fetch path: permit, quota, timeout, then validation.
#[derive(Clone)]
struct FetchLane {
    adapter: Arc<dyn FetchAdapter>,
    permits: Arc<Semaphore>,
    throttle: Option<FetchThrottle>,
    timeout: Duration,
}

impl FetchLane {
    async fn fetch(&self, instrument: &Instrument, stamp: UtcDateTime) -> Result<MarketSnapshot, CoreError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FetchError::unavailable("fetch pool is closed"))?;
        if let Some(throttle) = &self.throttle {
            throttle.until_ready().await;
        }

        let raw = tokio::time::timeout(self.timeout, self.adapter.fetch(&instrument.locator))
            .await
            .map_err(|_| {
                FetchError::timeout(format!(
                    "fetch for '{}' exceeded {:?}",
                    instrument.locator, self.timeout
                ))
            })??;
        Ok(snapshot_from_fields(&raw, stamp)?)
    }
}

pub struct RefreshPipeline {
    lane: FetchLane,
    store: Arc<dyn InstrumentStore>,
    calendar: TradingCalendar,
    freshness: Duration,
}

impl RefreshPipeline {
    pub fn new(
        adapter: Arc<dyn FetchAdapter>,
        store: Arc<dyn InstrumentStore>,
        calendar: TradingCalendar,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            lane: FetchLane {
                adapter,
                permits: Arc::new(Semaphore::new(settings.concurrency.max(1))),
                throttle: None,
                timeout: settings.fetch_timeout,
            },
            store,
            calendar,
            freshness: settings.freshness,
        }
    }

    pub fn with_throttle(mut self, throttle: FetchThrottle) -> Self {
        self.lane.throttle = Some(throttle);
        self
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    pub fn store(&self) -> &Arc<dyn InstrumentStore> {
        &self.store
    }

    /// Refresh every instrument that has a tracker.
    pub async fn refresh_tracked(
        &self,
        mode: RefreshMode,
        now: UtcDateTime,
    ) -> Result<RefreshReport, CoreError> {
        let instruments = self.store.tracked_instruments().await?;
        self.refresh_many(&instruments, mode, now).await
    }

    /// Refresh every registered instrument.
    pub async fn refresh_all(
        &self,
        mode: RefreshMode,
        now: UtcDateTime,
    ) -> Result<RefreshReport, CoreError> {
        let instruments = self.store.list_instruments().await?;
        self.refresh_many(&instruments, mode, now).await
    }

    /// Fetch, validate and commit a batch.
    ///
    /// Per-instrument failures land in the report. Only a failure of the
    /// store itself is returned as an error, in which case nothing from this
    /// batch was committed.
    pub async fn refresh_many(
        &self,
        instruments: &[Instrument],
        mode: RefreshMode,
        now: UtcDateTime,
    ) -> Result<RefreshReport, CoreError> {
        let started = Instant::now();
        let mut seen = HashSet::new();
        let unique = instruments
            .iter()
            .filter(|instrument| seen.insert(instrument.id))
            .collect::<Vec<_>>();
        let mut report = RefreshReport::empty(Uuid::new_v4(), unique.len());
        let cycle_id = report.cycle_id;

        if mode == RefreshMode::Policy && !self.calendar.is_open(now) {
            report.market_closed = true;
            debug!(%cycle_id, requested = report.requested, "market closed, refresh skipped");
            return Ok(report);
        }

        let mut due = Vec::with_capacity(unique.len());
        for instrument in unique {
            if mode == RefreshMode::Policy {
                let cached = self.store.snapshot(instrument.id).await?;
                if !is_stale(cached.as_ref(), self.freshness, now) {
                    report.skipped_fresh += 1;
                    continue;
                }
            }
            due.push(instrument.clone());
        }

        let tasks: Vec<(Instrument, JoinHandle<Result<MarketSnapshot, CoreError>>)> = due
            .into_iter()
            .map(|instrument| {
                let lane = self.lane.clone();
                let task_instrument = instrument.clone();
                let handle =
                    tokio::spawn(async move { lane.fetch(&task_instrument, now).await });
                (instrument, handle)
            })
            .collect();

        let mut batch = Vec::with_capacity(tasks.len());
        for (instrument, handle) in tasks {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_error) => {
                    report.failed.push(RefreshFailure {
                        instrument_id: instrument.id,
                        ticker: instrument.ticker.clone(),
                        code: "refresh.task_failed",
                        message: join_error.to_string(),
                        retryable: true,
                    });
                    continue;
                }
            };
            match outcome {
                Ok(snapshot) => batch.push((instrument, snapshot)),
                Err(error) => {
                    let failure = RefreshFailure::new(&instrument, &error);
                    warn!(
                        %cycle_id,
                        ticker = %instrument.ticker,
                        code = failure.code,
                        retryable = failure.retryable,
                        error = %error,
                        "instrument refresh failed"
                    );
                    report.failed.push(failure);
                }
            }
        }

        if !batch.is_empty() {
            let committed_at = commit_stamp(now, started);
            self.commit(&mut batch, committed_at, &mut report).await?;
            report.succeeded = batch
                .into_iter()
                .map(|(instrument, _)| instrument.ticker)
                .collect();
        }

        report.latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            %cycle_id,
            requested = report.requested,
            succeeded = report.succeeded_count(),
            failed = report.failed_count(),
            skipped_fresh = report.skipped_fresh,
            latency_ms = report.latency_ms,
            "refresh cycle finished"
        );
        Ok(report)
    }

    /// Write the batch in one transaction. Instruments removed while their
    /// fetch was in flight are moved to the failures and the rest is retried;
    /// any other store failure commits nothing.
    async fn commit(
        &self,
        batch: &mut Vec<(Instrument, MarketSnapshot)>,
        committed_at: UtcDateTime,
        report: &mut RefreshReport,
    ) -> Result<(), CoreError> {
        while !batch.is_empty() {
            let rows = batch
                .iter()
                .map(|(instrument, snapshot)| {
                    let mut snapshot = snapshot.clone();
                    snapshot.updated_at = committed_at;
                    (instrument.id, snapshot)
                })
                .collect();
            let missing = match self.store.replace_snapshots(rows).await {
                Ok(()) => return Ok(()),
                Err(StoreError::MissingReference {
                    entity: "instrument",
                    id,
                }) => id,
                Err(error) => return Err(error.into()),
            };
            let Some(index) = batch
                .iter()
                .position(|(instrument, _)| instrument.id.get() == missing)
            else {
                return Err(StoreError::MissingReference {
                    entity: "instrument",
                    id: missing,
                }
                .into());
            };

            let (instrument, _) = batch.remove(index);
            warn!(
                cycle_id = %report.cycle_id,
                ticker = %instrument.ticker,
                "instrument removed during refresh, snapshot dropped"
            );
            report.failed.push(RefreshFailure {
                instrument_id: instrument.id,
                message: format!("instrument '{}' was removed during the refresh", instrument.ticker),
                ticker: instrument.ticker,
                code: "refresh.instrument_removed",
                retryable: false,
            });
        }
        Ok(())
    }

    /// Fetch one instrument and write it through immediately.
    pub async fn refresh_one(
        &self,
        instrument: &Instrument,
        now: UtcDateTime,
    ) -> Result<MarketSnapshot, CoreError> {
        let started = Instant::now();
        let mut snapshot = self.lane.fetch(instrument, now).await?;
        snapshot.updated_at = commit_stamp(now, started);
        self.store
            .replace_snapshot(instrument.id, snapshot.clone())
            .await?;
        debug!(ticker = %instrument.ticker, ltp = snapshot.last_traded_price, "instrument refreshed");
        Ok(snapshot)
    }

    /// Snapshot to act on at `now`.
    ///
    /// A fresh snapshot, or any snapshot while the market is closed, is
    /// served from the store. Otherwise the instrument is refreshed; if that
    /// fails the previous snapshot is served when there is one.
    pub async fn current_snapshot(
        &self,
        instrument: &Instrument,
        now: UtcDateTime,
    ) -> Result<MarketSnapshot, CoreError> {
        let cached = self.store.snapshot(instrument.id).await?;
        if let Some(snapshot) = &cached {
            if !self.calendar.is_open(now) || !is_stale(Some(snapshot), self.freshness, now) {
                return Ok(snapshot.clone());
            }
        }

        match self.refresh_one(instrument, now).await {
            Ok(snapshot) => Ok(snapshot),
            Err(error) if !error.is_fatal_to_cycle() => match cached {
                Some(snapshot) => {
                    warn!(
                        ticker = %instrument.ticker,
                        code = error.code(),
                        error = %error,
                        "refresh failed, serving previous snapshot"
                    );
                    Ok(snapshot)
                }
                None => Err(error),
            },
            Err(error) => Err(error),
        }
    }
}

/// Commit time on the caller's clock: `now` plus the wall time the cycle took.
fn commit_stamp(now: UtcDateTime, started: Instant) -> UtcDateTime {
    now.checked_add(started.elapsed()).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchFuture;
    use crate::fields::{sample_fields, RawFieldMap};
    use crate::MemoryStore;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct StubAdapter {
        responses: Mutex<HashMap<String, Result<RawFieldMap, FetchError>>>,
        calls: Mutex<Vec<String>>,
    }

    impl StubAdapter {
        fn new(responses: Vec<(&str, Result<RawFieldMap, FetchError>)>) -> Self {
            Self {
                responses: Mutex::new(
                    responses
                        .into_iter()
                        .map(|(locator, response)| (locator.to_owned(), response))
                        .collect(),
                ),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    impl FetchAdapter for StubAdapter {
        fn fetch<'a>(&'a self, locator: &'a str) -> FetchFuture<'a> {
            Box::pin(async move {
                self.calls.lock().expect("calls lock").push(locator.to_owned());
                self.responses
                    .lock()
                    .expect("responses lock")
                    .get(locator)
                    .cloned()
                    .unwrap_or_else(|| Err(FetchError::not_found(locator)))
            })
        }
    }

    // Sunday 2024-06-02 12:00 NPT.
    fn trading_now() -> UtcDateTime {
        UtcDateTime::parse("2024-06-02T06:15:00Z").expect("timestamp")
    }

    async fn register(store: &MemoryStore, ticker: &str) -> Instrument {
        let ticker = Ticker::parse(ticker).expect("ticker");
        store
            .register_instrument(&ticker, ticker.as_str(), ticker.as_str())
            .await
            .expect("instrument")
    }

    fn pipeline(store: &MemoryStore, adapter: Arc<StubAdapter>) -> RefreshPipeline {
        RefreshPipeline::new(
            adapter,
            Arc::new(store.clone()),
            TradingCalendar::nepse(),
            RefreshSettings::default(),
        )
    }

    #[tokio::test]
    async fn duplicates_are_fetched_once() {
        let store = MemoryStore::new();
        let nabil = register(&store, "NABIL").await;
        let adapter = Arc::new(StubAdapter::new(vec![("NABIL", Ok(sample_fields("1,200.00")))]));
        let pipeline = pipeline(&store, adapter.clone());

        let report = pipeline
            .refresh_many(&[nabil.clone(), nabil.clone()], RefreshMode::Policy, trading_now())
            .await
            .expect("report");

        assert_eq!(report.requested, 1);
        assert_eq!(adapter.calls(), vec![String::from("NABIL")]);
    }

    #[tokio::test]
    async fn fresh_snapshots_are_skipped_unless_forced() {
        let store = MemoryStore::new();
        let nabil = register(&store, "NABIL").await;
        let adapter = Arc::new(StubAdapter::new(vec![("NABIL", Ok(sample_fields("1,200.00")))]));
        let pipeline = pipeline(&store, adapter.clone());
        let now = trading_now();
        pipeline
            .refresh_many(std::slice::from_ref(&nabil), RefreshMode::Policy, now)
            .await
            .expect("first cycle");

        let ten_minutes_later = now.checked_add(Duration::from_secs(600)).expect("add");
        let skipped = pipeline
            .refresh_many(std::slice::from_ref(&nabil), RefreshMode::Policy, ten_minutes_later)
            .await
            .expect("second cycle");
        let forced = pipeline
            .refresh_many(std::slice::from_ref(&nabil), RefreshMode::Force, ten_minutes_later)
            .await
            .expect("forced cycle");

        assert_eq!(skipped.skipped_fresh, 1);
        assert!(skipped.succeeded.is_empty());
        assert_eq!(forced.succeeded_count(), 1);
        assert_eq!(adapter.calls().len(), 2);
    }

    #[tokio::test]
    async fn closed_market_skips_policy_refresh() {
        let store = MemoryStore::new();
        let nabil = register(&store, "NABIL").await;
        let adapter = Arc::new(StubAdapter::new(vec![("NABIL", Ok(sample_fields("1,200.00")))]));
        let pipeline = pipeline(&store, adapter.clone());
        // Friday 2024-06-07 12:00 NPT.
        let friday = UtcDateTime::parse("2024-06-07T06:15:00Z").expect("timestamp");

        let report = pipeline
            .refresh_many(&[nabil], RefreshMode::Policy, friday)
            .await
            .expect("report");

        assert!(report.market_closed);
        assert!(adapter.calls().is_empty());
    }

    #[tokio::test]
    async fn slow_fetch_times_out_as_adapter_failure() {
        struct Hanging;
        impl FetchAdapter for Hanging {
            fn fetch<'a>(&'a self, _locator: &'a str) -> FetchFuture<'a> {
                Box::pin(std::future::pending())
            }
        }

        let store = MemoryStore::new();
        let nabil = register(&store, "NABIL").await;
        let pipeline = RefreshPipeline::new(
            Arc::new(Hanging),
            Arc::new(store.clone()),
            TradingCalendar::nepse(),
            RefreshSettings {
                fetch_timeout: Duration::from_millis(20),
                ..RefreshSettings::default()
            },
        );

        let report = pipeline
            .refresh_many(&[nabil], RefreshMode::Force, trading_now())
            .await
            .expect("report");

        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.failed[0].code, "fetch.timeout");
        assert!(report.failed[0].retryable);
    }

    #[tokio::test]
    async fn unknown_locator_is_reported_as_not_retryable() {
        let store = MemoryStore::new();
        let nabil = register(&store, "NABIL").await;
        let pipeline = pipeline(&store, Arc::new(StubAdapter::new(Vec::new())));

        let report = pipeline
            .refresh_many(&[nabil], RefreshMode::Force, trading_now())
            .await
            .expect("report");

        assert_eq!(report.failed[0].code, "fetch.not_found");
        assert!(!report.failed[0].retryable);
    }

    #[tokio::test]
    async fn current_snapshot_falls_back_to_previous_on_failure() {
        let store = MemoryStore::new();
        let nabil = register(&store, "NABIL").await;
        let old = UtcDateTime::parse("2024-06-02T05:00:00Z").expect("timestamp");
        store
            .replace_snapshot(nabil.id, crate::domain::sample_snapshot(1_150.0, old))
            .await
            .expect("seed");
        let adapter = Arc::new(StubAdapter::new(vec![(
            "NABIL",
            Err(FetchError::unavailable("upstream down")),
        )]));
        let pipeline = pipeline(&store, adapter.clone());

        let served = pipeline
            .current_snapshot(&nabil, trading_now())
            .await
            .expect("fallback snapshot");

        assert_eq!(served.last_traded_price, 1_150.0);
        assert_eq!(adapter.calls().len(), 1);
    }

    #[tokio::test]
    async fn current_snapshot_without_prior_data_surfaces_failure() {
        let store = MemoryStore::new();
        let nabil = register(&store, "NABIL").await;
        let adapter = Arc::new(StubAdapter::new(Vec::new()));
        let pipeline = pipeline(&store, adapter);

        let error = pipeline
            .current_snapshot(&nabil, trading_now())
            .await
            .expect_err("no snapshot");

        assert_eq!(error.code(), "fetch.not_found");
    }
}
