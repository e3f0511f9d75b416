//! Behavior-driven tests for alert evaluation and job scheduling
//!
//! These tests verify WHEN a subscriber gets alerted and WHEN polling jobs
//! exist, from the perspective of the messages a subscriber receives.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tickwatch_core::{
    AlertEvaluator, FetchAdapter, FetchError, FetchFuture, Instrument, InstrumentStore,
    JobScheduler, MarketSnapshot, MemoryStore, MessageRef, NewTracker, Notifier, NotifierError,
    NotifyFuture, PauseRegistry, RefreshPipeline, RefreshSettings, Subscriber, Ticker, Tracker,
    TrackerRegistry, TradingCalendar, UtcDateTime,
};

// =============================================================================
// Helpers
// =============================================================================

/// Upstream that is always down; evaluations must work from the store.
struct OfflineAdapter;

impl FetchAdapter for OfflineAdapter {
    fn fetch<'a>(&'a self, _locator: &'a str) -> FetchFuture<'a> {
        Box::pin(async { Err(FetchError::unavailable("offline")) })
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
    deleted: Mutex<Vec<MessageRef>>,
    fail_sends: bool,
    send_delay: Duration,
}

impl RecordingNotifier {
    fn failing() -> Self {
        Self {
            fail_sends: true,
            ..Self::default()
        }
    }

    fn slow(send_delay: Duration) -> Self {
        Self {
            send_delay,
            ..Self::default()
        }
    }

    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("sent lock").clone()
    }

    fn deleted(&self) -> Vec<MessageRef> {
        self.deleted.lock().expect("deleted lock").clone()
    }
}

impl Notifier for RecordingNotifier {
    fn send<'a>(&'a self, recipient: &'a str, content: &'a str) -> NotifyFuture<'a, MessageRef> {
        Box::pin(async move {
            if !self.send_delay.is_zero() {
                tokio::time::sleep(self.send_delay).await;
            }
            if self.fail_sends {
                return Err(NotifierError::unavailable("chat api down"));
            }
            let mut sent = self.sent.lock().expect("sent lock");
            sent.push((recipient.to_string(), content.to_string()));
            Ok(MessageRef(format!("msg-{}", sent.len())))
        })
    }

    fn delete<'a>(&'a self, _recipient: &'a str, message: &'a MessageRef) -> NotifyFuture<'a, ()> {
        Box::pin(async move {
            self.deleted.lock().expect("deleted lock").push(message.clone());
            Ok(())
        })
    }
}

/// Sunday 2024-06-02 12:00 in Kathmandu.
fn trading_hours() -> UtcDateTime {
    UtcDateTime::parse("2024-06-02T06:15:00Z").expect("timestamp")
}

fn later(at: UtcDateTime, secs: u64) -> UtcDateTime {
    at.checked_add(Duration::from_secs(secs)).expect("add")
}

fn snapshot(last_traded_price: f64, updated_at: UtcDateTime) -> MarketSnapshot {
    MarketSnapshot {
        last_traded_price,
        previous_close: last_traded_price,
        open_price: last_traded_price,
        close_price: last_traded_price,
        total_traded_quantity: 1_000,
        total_trades: 10,
        high_price: last_traded_price,
        low_price: last_traded_price,
        week_52_high: None,
        week_52_low: None,
        total_listed_shares: Some(1_000_000),
        total_paid_up_value: None,
        market_capitalization: None,
        instrument_type: None,
        listing_date: None,
        updated_at,
    }
}

struct Fixture {
    store: MemoryStore,
    notifier: Arc<RecordingNotifier>,
    evaluator: Arc<AlertEvaluator>,
    subscriber: Subscriber,
    instrument: Instrument,
}

impl Fixture {
    async fn new(notifier: RecordingNotifier) -> Self {
        let store = MemoryStore::new();
        let notifier = Arc::new(notifier);
        let pipeline = Arc::new(RefreshPipeline::new(
            Arc::new(OfflineAdapter),
            Arc::new(store.clone()),
            TradingCalendar::nepse(),
            RefreshSettings::default(),
        ));
        let evaluator = Arc::new(AlertEvaluator::new(
            Arc::new(store.clone()),
            pipeline,
            notifier.clone(),
            PauseRegistry::new(),
        ));
        let ticker = Ticker::parse("NABIL").expect("ticker");
        let instrument = store
            .register_instrument(&ticker, "Nabil Bank", "NABIL")
            .await
            .expect("instrument");
        let subscriber = store
            .register_subscriber("1001", "asha")
            .await
            .expect("subscriber");
        Self {
            store,
            notifier,
            evaluator,
            subscriber,
            instrument,
        }
    }

    async fn price_at(&self, last_traded_price: f64, at: UtcDateTime) {
        self.store
            .replace_snapshot(self.instrument.id, snapshot(last_traded_price, at))
            .await
            .expect("snapshot");
    }

    async fn track(&self, target: f64, tolerance: f64) -> Tracker {
        self.store
            .create_tracker(
                NewTracker::new(self.subscriber.id, self.instrument.id, target, tolerance)
                    .expect("valid tracker"),
            )
            .await
            .expect("tracker")
    }

    async fn stored(&self, tracker: &Tracker) -> Tracker {
        self.store
            .tracker(tracker.id)
            .await
            .expect("read")
            .expect("tracker exists")
    }
}

// =============================================================================
// Alert rules
// =============================================================================

#[tokio::test]
async fn when_price_enters_tolerance_band_system_alerts_subscriber() {
    // Given: A tracker at 100 with 5% tolerance and a price of 104
    let fixture = Fixture::new(RecordingNotifier::default()).await;
    let now = trading_hours();
    fixture.price_at(104.0, now).await;
    let tracker = fixture.track(100.0, 5.0).await;

    // When: The subscriber is evaluated
    let report = fixture
        .evaluator
        .evaluate_subscriber(fixture.subscriber.id, now)
        .await
        .expect("evaluation");

    // Then: An alert reaches the subscriber's chat and the state is recorded
    assert_eq!(report.fired, vec![tracker.id]);
    let sent = fixture.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "1001");
    assert!(sent[0].1.contains("Price Alert: <code>NABIL</code>"));
    assert!(sent[0].1.contains("<b>Target:</b> <code>100.00</code>"));
    let stored = fixture.stored(&tracker).await;
    assert_eq!(stored.last_alert_at, Some(now));
    assert_eq!(stored.last_alert_message, Some(MessageRef("msg-1".to_string())));
}

#[tokio::test]
async fn when_price_is_far_above_small_target_system_stays_quiet() {
    // Given: A target of 50 and a price of 200
    let fixture = Fixture::new(RecordingNotifier::default()).await;
    let now = trading_hours();
    fixture.price_at(200.0, now).await;
    let tracker = fixture.track(50.0, 1.0).await;

    // When: The subscriber is evaluated
    let report = fixture
        .evaluator
        .evaluate_subscriber(fixture.subscriber.id, now)
        .await
        .expect("evaluation");

    // Then: Nothing is sent and the tracker is untouched
    assert!(report.fired.is_empty());
    assert_eq!(report.not_matched, 1);
    assert!(fixture.notifier.sent().is_empty());
    assert_eq!(fixture.stored(&tracker).await, tracker);
}

#[tokio::test]
async fn when_price_breaks_out_above_large_target_system_alerts() {
    // Given: A target of 150 with 1% tolerance and a price of 160
    let fixture = Fixture::new(RecordingNotifier::default()).await;
    let now = trading_hours();
    fixture.price_at(160.0, now).await;
    let tracker = fixture.track(150.0, 1.0).await;

    // When: The subscriber is evaluated
    let report = fixture
        .evaluator
        .evaluate_subscriber(fixture.subscriber.id, now)
        .await
        .expect("evaluation");

    // Then: The breakout rule fires
    assert_eq!(report.fired, vec![tracker.id]);
}

// =============================================================================
// Debounce and replacement
// =============================================================================

#[tokio::test]
async fn when_alerted_recently_system_waits_for_debounce_window() {
    // Given: A tracker that alerted at `now`
    let fixture = Fixture::new(RecordingNotifier::default()).await;
    let now = trading_hours();
    fixture.price_at(104.0, now).await;
    let tracker = fixture.track(100.0, 5.0).await;
    fixture
        .evaluator
        .evaluate_subscriber(fixture.subscriber.id, now)
        .await
        .expect("first evaluation");

    // When: It is checked 100 s and 301 s later with the price still in range
    let at_100 = fixture
        .evaluator
        .evaluate_subscriber(fixture.subscriber.id, later(now, 100))
        .await
        .expect("evaluation at +100s");
    fixture.price_at(104.0, later(now, 300)).await;
    let at_301 = fixture
        .evaluator
        .evaluate_subscriber(fixture.subscriber.id, later(now, 301))
        .await
        .expect("evaluation at +301s");

    // Then: Only the second check alerts, replacing the earlier message
    assert_eq!(at_100.debounced, 1);
    assert!(at_100.fired.is_empty());
    assert_eq!(at_301.fired, vec![tracker.id]);
    assert_eq!(fixture.notifier.sent().len(), 2);
    assert_eq!(fixture.notifier.deleted(), vec![MessageRef("msg-1".to_string())]);
    let stored = fixture.stored(&tracker).await;
    assert_eq!(stored.last_alert_at, Some(later(now, 301)));
    assert_eq!(stored.last_alert_message, Some(MessageRef("msg-2".to_string())));
}

#[tokio::test]
async fn when_notifier_fails_system_still_records_alert_for_debounce() {
    // Given: A chat channel that rejects every send
    let fixture = Fixture::new(RecordingNotifier::failing()).await;
    let now = trading_hours();
    fixture.price_at(104.0, now).await;
    let tracker = fixture.track(100.0, 5.0).await;

    // When: The tracker fires
    let report = fixture
        .evaluator
        .evaluate_subscriber(fixture.subscriber.id, now)
        .await
        .expect("evaluation");

    // Then: The alert time is stored without a message reference
    assert_eq!(report.fired, vec![tracker.id]);
    let stored = fixture.stored(&tracker).await;
    assert_eq!(stored.last_alert_at, Some(now));
    assert_eq!(stored.last_alert_message, None);
}

#[tokio::test]
async fn when_two_jobs_overlap_system_alerts_once() {
    // Given: A matching tracker and a chat channel that is slow to answer
    let fixture = Fixture::new(RecordingNotifier::slow(Duration::from_millis(50))).await;
    let now = trading_hours();
    fixture.price_at(104.0, now).await;
    let tracker = fixture.track(100.0, 5.0).await;

    // When: Two evaluations of the same subscriber run at the same time
    let (first, second) = tokio::join!(
        fixture.evaluator.evaluate_subscriber(fixture.subscriber.id, now),
        fixture.evaluator.evaluate_subscriber(fixture.subscriber.id, now),
    );
    let (first, second) = (first.expect("first"), second.expect("second"));

    // Then: One of them alerts and the other finds the tracker debounced
    assert_eq!(fixture.notifier.sent().len(), 1);
    assert_eq!(first.fired.len() + second.fired.len(), 1);
    assert_eq!(first.debounced + second.debounced, 1);
    let stored = fixture.stored(&tracker).await;
    assert_eq!(stored.last_alert_at, Some(now));
    assert_eq!(stored.last_alert_message, Some(MessageRef("msg-1".to_string())));
}

#[tokio::test]
async fn when_snapshot_is_missing_system_contains_failure_to_that_tracker() {
    // Given: One tracker without any snapshot and one with a matching price
    let fixture = Fixture::new(RecordingNotifier::default()).await;
    let now = trading_hours();
    let orphan_ticker = Ticker::parse("HIDCL").expect("ticker");
    let orphan = fixture
        .store
        .register_instrument(&orphan_ticker, "HIDCL", "HIDCL")
        .await
        .expect("instrument");
    let broken = fixture
        .store
        .create_tracker(NewTracker::new(fixture.subscriber.id, orphan.id, 250.0, 1.0).expect("valid"))
        .await
        .expect("tracker");
    fixture.price_at(104.0, now).await;
    let working = fixture.track(100.0, 5.0).await;

    // When: The subscriber is evaluated while the upstream is offline
    let report = fixture
        .evaluator
        .evaluate_subscriber(fixture.subscriber.id, now)
        .await
        .expect("evaluation");

    // Then: The broken tracker is reported and the other still alerts
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].tracker_id, broken.id);
    assert_eq!(report.errors[0].code, "fetch.unavailable");
    assert_eq!(report.fired, vec![working.id]);
}

#[tokio::test]
async fn when_subscriber_is_paused_system_skips_all_trackers() {
    // Given: A matching tracker and a subscriber mid-conversation
    let fixture = Fixture::new(RecordingNotifier::default()).await;
    let now = trading_hours();
    fixture.price_at(104.0, now).await;
    fixture.track(100.0, 5.0).await;
    let guard = fixture.evaluator.pauses().pause(fixture.subscriber.id);

    // When: The job fires during the pause and again after it
    let paused = fixture
        .evaluator
        .evaluate_subscriber(fixture.subscriber.id, now)
        .await
        .expect("paused evaluation");
    drop(guard);
    let resumed = fixture
        .evaluator
        .evaluate_subscriber(fixture.subscriber.id, now)
        .await
        .expect("resumed evaluation");

    // Then: Only the evaluation after the pause sends anything
    assert!(paused.paused);
    assert!(paused.fired.is_empty());
    assert_eq!(resumed.fired.len(), 1);
    assert_eq!(fixture.notifier.sent().len(), 1);
}

#[tokio::test]
async fn when_market_is_closed_system_does_not_alert() {
    // Given: A matching tracker on a Friday
    let fixture = Fixture::new(RecordingNotifier::default()).await;
    let friday_noon = UtcDateTime::parse("2024-06-07T06:15:00Z").expect("timestamp");
    fixture.price_at(104.0, friday_noon).await;
    fixture.track(100.0, 5.0).await;

    // When: A leftover job fires
    let report = fixture
        .evaluator
        .evaluate_subscriber(fixture.subscriber.id, friday_noon)
        .await
        .expect("evaluation");

    // Then: Nothing is sent
    assert!(report.market_closed);
    assert!(fixture.notifier.sent().is_empty());
}

// =============================================================================
// Job scheduling
// =============================================================================

fn scheduler(fixture: &Fixture) -> JobScheduler {
    JobScheduler::new(
        Arc::new(fixture.store.clone()),
        fixture.evaluator.clone(),
        TradingCalendar::nepse(),
        Duration::from_secs(3600),
    )
}

#[tokio::test]
async fn when_reconciling_twice_system_keeps_one_job_per_subscriber() {
    // Given: A subscriber with two trackers during trading hours
    let fixture = Fixture::new(RecordingNotifier::default()).await;
    fixture.track(100.0, 5.0).await;
    fixture.track(120.0, 5.0).await;
    let scheduler = scheduler(&fixture);

    // When: Reconciliation runs twice
    let first = scheduler.reconcile(trading_hours()).await.expect("first");
    let second = scheduler
        .reconcile(later(trading_hours(), 60))
        .await
        .expect("second");

    // Then: Exactly one job exists and the second tick started nothing
    assert_eq!(first.started, vec![fixture.subscriber.id]);
    assert!(second.started.is_empty());
    assert_eq!(scheduler.active_jobs(), vec![fixture.subscriber.id]);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn when_market_closes_system_removes_all_jobs_and_starts_none() {
    // Given: A running job for a subscriber with trackers
    let fixture = Fixture::new(RecordingNotifier::default()).await;
    fixture.track(100.0, 5.0).await;
    let scheduler = scheduler(&fixture);
    scheduler.reconcile(trading_hours()).await.expect("open tick");

    // When: Reconciliation runs on Friday at noon, twice
    let friday_noon = UtcDateTime::parse("2024-06-07T06:15:00Z").expect("timestamp");
    let closed = scheduler.reconcile(friday_noon).await.expect("closed tick");
    let again = scheduler.reconcile(friday_noon).await.expect("idempotent tick");

    // Then: The job is removed, nothing starts, and the repeat is a no-op
    assert!(!closed.market_open);
    assert_eq!(closed.removed, vec![fixture.subscriber.id]);
    assert!(closed.started.is_empty());
    assert!(again.removed.is_empty());
    assert!(!scheduler.has_job(fixture.subscriber.id));
}

#[tokio::test]
async fn when_last_tracker_is_removed_system_drops_the_job() {
    // Given: A subscriber with one tracker and a running job
    let fixture = Fixture::new(RecordingNotifier::default()).await;
    let tracker = fixture.track(100.0, 5.0).await;
    let scheduler = scheduler(&fixture);
    scheduler.reconcile(trading_hours()).await.expect("open tick");

    // When: The tracker is deleted and the next tick runs
    fixture.store.remove_tracker(tracker.id).await.expect("remove");
    let outcome = scheduler
        .reconcile(later(trading_hours(), 60))
        .await
        .expect("tick");

    // Then: The job is gone
    assert_eq!(outcome.removed, vec![fixture.subscriber.id]);
    assert_eq!(outcome.active, 0);
}

#[tokio::test]
async fn when_no_jobs_exist_removing_them_is_a_no_op() {
    // Given: A scheduler that never started a job
    let fixture = Fixture::new(RecordingNotifier::default()).await;
    let scheduler = scheduler(&fixture);

    // When: Every job is removed
    let removed = scheduler.remove_all();

    // Then: Nothing happens
    assert!(removed.is_empty());
    assert!(scheduler.active_jobs().is_empty());
}
