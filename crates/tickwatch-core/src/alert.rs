//! Alert rules, message formatting and the per-subscriber evaluator.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use time::UtcOffset;
use tracing::{debug, error, info, warn};

use crate::notifier::Notifier;
use crate::pause::PauseRegistry;
use crate::refresh::RefreshPipeline;
use crate::store::{AlertWrite, TrackerRegistry};
use crate::{
    CoreError, Instrument, MarketSnapshot, Subscriber, SubscriberId, Ticker, Tracker, TrackerId,
    UtcDateTime,
};

/// Targets above this fire once the price reaches or passes them, even far
/// outside the tolerance band.
pub const BREAKOUT_MIN_TARGET: f64 = 100.0;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(300);

/// `target - current*tol/100 <= current <= target + current*tol/100`.
pub fn in_range(target: f64, current: f64, tolerance_pct: f64) -> bool {
    let delta = current * tolerance_pct / 100.0;
    target - delta <= current && current <= target + delta
}

/// Whether a tracker with `target` and `tolerance_pct` fires at `current`.
pub fn should_alert(target: f64, current: f64, tolerance_pct: f64) -> bool {
    in_range(target, current, tolerance_pct) || (current >= target && target > BREAKOUT_MIN_TARGET)
}

/// True while `now` is inside the debounce window opened by `last_alert_at`.
pub fn is_debounced(last_alert_at: Option<UtcDateTime>, window: Duration, now: UtcDateTime) -> bool {
    last_alert_at.is_some_and(|last| now.saturating_since(last) < window)
}

/// `1234567.891` -> `1,234,567.89`.
pub fn format_price(value: f64) -> String {
    let fixed = format!("{value:.2}");
    let (sign, unsigned) = match fixed.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", fixed.as_str()),
    };
    let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (index, digit) in whole.chars().enumerate() {
        if index > 0 && (whole.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    format!("{sign}{grouped}.{fraction}")
}

/// HTML alert body sent to a subscriber.
pub fn alert_message(
    ticker: &Ticker,
    last_traded_price: f64,
    target_price: f64,
    at: UtcDateTime,
    offset: UtcOffset,
) -> String {
    format!(
        "<b>Price Alert: <code>{ticker}</code></b>\n\n\
         <b>LTP:</b> <code>{}</code>\n\
         <b>Target:</b> <code>{}</code>\n\
         <b>Time:</b> <code>{}</code>\n",
        format_price(last_traded_price),
        format_price(target_price),
        at.format_local(offset),
    )
}

/// HTML summary for an on-demand quote.
pub fn quote_message(instrument: &Instrument, snapshot: &MarketSnapshot, offset: UtcOffset) -> String {
    format!(
        "<b>{}</b>\n\
         <b>{}</b>\n\
         <b>LTP:</b> <code>{}</code>\n\
         <b>Open:</b> <code>{}</code>\n\
         <b>High - Low:</b> <code>{} - {}</code>\n\
         <b>Time:</b> <code>{}</code>\n",
        instrument.ticker,
        "-".repeat(30),
        format_price(snapshot.last_traded_price),
        format_price(snapshot.open_price),
        format_price(snapshot.high_price),
        format_price(snapshot.low_price),
        snapshot.updated_at.format_local(offset),
    )
}

/// What happened to one tracker during an evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackerOutcome {
    Fired,
    Debounced,
    NotMatched,
    /// Deleted between listing and locking.
    Gone,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackerFailure {
    pub tracker_id: TrackerId,
    pub code: &'static str,
    pub message: String,
}

/// Outcome of evaluating one subscriber's trackers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluationReport {
    pub subscriber_id: SubscriberId,
    pub paused: bool,
    pub market_closed: bool,
    pub fired: Vec<TrackerId>,
    pub debounced: usize,
    pub not_matched: usize,
    pub errors: Vec<TrackerFailure>,
}

impl EvaluationReport {
    fn new(subscriber_id: SubscriberId) -> Self {
        Self {
            subscriber_id,
            paused: false,
            market_closed: false,
            fired: Vec::new(),
            debounced: 0,
            not_matched: 0,
            errors: Vec::new(),
        }
    }
}

/// Decides, per job firing, which trackers alert and delivers the alerts.
pub struct AlertEvaluator {
    registry: Arc<dyn TrackerRegistry>,
    pipeline: Arc<RefreshPipeline>,
    notifier: Arc<dyn Notifier>,
    pauses: PauseRegistry,
    debounce: Duration,
    /// Per-tracker evaluation locks, keyed with the owning subscriber.
    tracker_locks: Mutex<HashMap<TrackerId, (SubscriberId, TrackerLock)>>,
}

type TrackerLock = Arc<tokio::sync::Mutex<()>>;

impl AlertEvaluator {
    pub fn new(
        registry: Arc<dyn TrackerRegistry>,
        pipeline: Arc<RefreshPipeline>,
        notifier: Arc<dyn Notifier>,
        pauses: PauseRegistry,
    ) -> Self {
        Self {
            registry,
            pipeline,
            notifier,
            pauses,
            debounce: DEFAULT_DEBOUNCE,
            tracker_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn pauses(&self) -> &PauseRegistry {
        &self.pauses
    }

    /// Evaluate every tracker of `subscriber_id` at `now`.
    ///
    /// Failures on a single tracker are collected in the report; only
    /// store-level failures abort the pass.
    pub async fn evaluate_subscriber(
        &self,
        subscriber_id: SubscriberId,
        now: UtcDateTime,
    ) -> Result<EvaluationReport, CoreError> {
        let mut report = EvaluationReport::new(subscriber_id);
        if self.pauses.is_paused(subscriber_id) {
            debug!(subscriber_id = %subscriber_id, "subscriber paused, evaluation skipped");
            report.paused = true;
            return Ok(report);
        }
        if !self.pipeline.calendar().is_open(now) {
            report.market_closed = true;
            return Ok(report);
        }

        let subscriber = self
            .registry
            .subscriber(subscriber_id)
            .await?
            .ok_or_else(|| CoreError::not_found("subscriber", subscriber_id))?;
        let trackers = self.registry.trackers_by_subscriber(subscriber_id).await?;
        let listed = trackers.iter().map(|tracker| tracker.id).collect::<HashSet<_>>();

        for tracker in trackers {
            match self.evaluate_tracker(&subscriber, tracker.id, now).await {
                Ok(TrackerOutcome::Fired) => report.fired.push(tracker.id),
                Ok(TrackerOutcome::Debounced) => report.debounced += 1,
                Ok(TrackerOutcome::NotMatched) => report.not_matched += 1,
                Ok(TrackerOutcome::Gone) => {}
                Err(error) if error.is_fatal_to_cycle() => return Err(error),
                Err(error) => {
                    warn!(
                        subscriber_id = %subscriber_id,
                        tracker_id = %tracker.id,
                        code = error.code(),
                        error = %error,
                        "tracker evaluation failed"
                    );
                    report.errors.push(TrackerFailure {
                        tracker_id: tracker.id,
                        code: error.code(),
                        message: error.to_string(),
                    });
                }
            }
        }
        self.prune_locks(subscriber_id, &listed);

        debug!(
            subscriber_id = %subscriber_id,
            fired = report.fired.len(),
            debounced = report.debounced,
            not_matched = report.not_matched,
            errors = report.errors.len(),
            "subscriber evaluated"
        );
        Ok(report)
    }

    async fn evaluate_tracker(
        &self,
        subscriber: &Subscriber,
        tracker_id: TrackerId,
        now: UtcDateTime,
    ) -> Result<TrackerOutcome, CoreError> {
        let lock = self.tracker_lock(subscriber.id, tracker_id);
        let _held = lock.lock().await;

        // Another job may have alerted while we waited for the lock.
        let Some(tracker) = self.registry.tracker(tracker_id).await? else {
            return Ok(TrackerOutcome::Gone);
        };
        if is_debounced(tracker.last_alert_at, self.debounce, now) {
            return Ok(TrackerOutcome::Debounced);
        }

        let instrument = self
            .pipeline
            .store()
            .instrument_by_id(tracker.instrument_id)
            .await?
            .ok_or_else(|| CoreError::not_found("instrument", tracker.instrument_id))?;
        let snapshot = self.pipeline.current_snapshot(&instrument, now).await?;
        if !should_alert(
            tracker.target_price,
            snapshot.last_traded_price,
            tracker.tolerance_pct,
        ) {
            return Ok(TrackerOutcome::NotMatched);
        }

        self.deliver(subscriber, &tracker, &instrument, &snapshot, now)
            .await;
        Ok(TrackerOutcome::Fired)
    }

    async fn deliver(
        &self,
        subscriber: &Subscriber,
        tracker: &Tracker,
        instrument: &Instrument,
        snapshot: &MarketSnapshot,
        now: UtcDateTime,
    ) {
        let recipient = subscriber.external_id.as_str();
        if let Some(previous) = &tracker.last_alert_message {
            if let Err(error) = self.notifier.delete(recipient, previous).await {
                warn!(
                    tracker_id = %tracker.id,
                    message_ref = %previous,
                    error = %error,
                    "failed to delete previous alert"
                );
            }
        }

        let content = alert_message(
            &instrument.ticker,
            snapshot.last_traded_price,
            tracker.target_price,
            snapshot.updated_at,
            self.pipeline.calendar().offset(),
        );
        let message = match self.notifier.send(recipient, &content).await {
            Ok(message) => Some(message),
            Err(error) => {
                warn!(
                    tracker_id = %tracker.id,
                    code = error.code(),
                    error = %error,
                    "alert delivery failed, recording alert anyway"
                );
                None
            }
        };

        match self
            .registry
            .record_alert(tracker.id, tracker.last_alert_at, now, message)
            .await
        {
            Ok(AlertWrite::Applied) => info!(
                subscriber_id = %subscriber.id,
                tracker_id = %tracker.id,
                ticker = %instrument.ticker,
                ltp = snapshot.last_traded_price,
                target = tracker.target_price,
                "price alert fired"
            ),
            Ok(write) => warn!(
                tracker_id = %tracker.id,
                outcome = ?write,
                "alert state changed concurrently, write dropped"
            ),
            Err(error) => error!(
                tracker_id = %tracker.id,
                error = %error,
                "failed to record alert, tracker may alert again after the debounce window"
            ),
        }
    }

    fn tracker_lock(&self, subscriber_id: SubscriberId, tracker_id: TrackerId) -> TrackerLock {
        let mut locks = self
            .tracker_locks
            .lock()
            .expect("tracker lock map is not poisoned");
        let (_, lock) = locks
            .entry(tracker_id)
            .or_insert_with(|| (subscriber_id, TrackerLock::default()));
        lock.clone()
    }

    /// Drop the idle locks of this subscriber's trackers that were not
    /// listed in this pass, including ones deleted between two passes.
    fn prune_locks(&self, subscriber_id: SubscriberId, listed: &HashSet<TrackerId>) {
        let mut locks = self
            .tracker_locks
            .lock()
            .expect("tracker lock map is not poisoned");
        let before = locks.len();
        locks.retain(|tracker_id, (owner, lock)| {
            *owner != subscriber_id || listed.contains(tracker_id) || Arc::strong_count(lock) > 1
        });
        if locks.len() < before {
            debug!(
                subscriber_id = %subscriber_id,
                released = before - locks.len(),
                "released locks of deleted trackers"
            );
        }
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.tracker_locks
            .lock()
            .expect("tracker lock map is not poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchAdapter, FetchError, FetchFuture};
    use crate::store::InstrumentStore;
    use crate::{LogNotifier, MemoryStore, NewTracker, RefreshSettings, TradingCalendar};
    use time::macros::offset;

    #[test]
    fn in_range_rule_matches_tolerance_band() {
        assert!(should_alert(100.0, 104.0, 5.0));
        assert!(!should_alert(50.0, 200.0, 1.0));
        assert!(should_alert(500.0, 500.0, 0.0));
        assert!(!should_alert(500.0, 480.0, 1.0));
    }

    #[test]
    fn breakout_rule_needs_target_above_threshold() {
        assert!(should_alert(150.0, 160.0, 1.0));
        assert!(!should_alert(100.0, 160.0, 1.0));
        assert!(!should_alert(150.0, 140.0, 1.0));
    }

    #[test]
    fn debounce_window_is_exclusive_at_its_end() {
        let last = UtcDateTime::parse("2024-06-02T06:00:00Z").expect("timestamp");
        let window = Duration::from_secs(300);
        let after = |secs| last.checked_add(Duration::from_secs(secs)).expect("add");

        assert!(is_debounced(Some(last), window, after(100)));
        assert!(!is_debounced(Some(last), window, after(300)));
        assert!(!is_debounced(Some(last), window, after(301)));
        assert!(!is_debounced(None, window, last));
    }

    #[test]
    fn prices_use_thousands_separators() {
        assert_eq!(format_price(1_234_567.891), "1,234,567.89");
        assert_eq!(format_price(999.5), "999.50");
        assert_eq!(format_price(1_000.0), "1,000.00");
        assert_eq!(format_price(0.0), "0.00");
    }

    #[test]
    fn alert_message_shows_local_time() {
        let ticker = Ticker::parse("NABIL").expect("ticker");
        let at = UtcDateTime::parse("2024-06-02T06:15:00Z").expect("timestamp");

        let message = alert_message(&ticker, 1_201.1, 1_200.0, at, offset!(+05:45));

        assert_eq!(
            message,
            "<b>Price Alert: <code>NABIL</code></b>\n\n\
             <b>LTP:</b> <code>1,201.10</code>\n\
             <b>Target:</b> <code>1,200.00</code>\n\
             <b>Time:</b> <code>2024-06-02 12:00:00</code>\n"
        );
    }

    struct Offline;

    impl FetchAdapter for Offline {
        fn fetch<'a>(&'a self, _locator: &'a str) -> FetchFuture<'a> {
            Box::pin(async { Err(FetchError::unavailable("offline")) })
        }
    }

    #[tokio::test]
    async fn locks_of_deleted_trackers_are_released() {
        let store = MemoryStore::new();
        let now = UtcDateTime::parse("2024-06-02T06:15:00Z").expect("timestamp");
        let ticker = Ticker::parse("NABIL").expect("ticker");
        let instrument = store
            .register_instrument(&ticker, "Nabil Bank", "NABIL")
            .await
            .expect("instrument");
        store
            .replace_snapshot(instrument.id, crate::domain::sample_snapshot(1_000.0, now))
            .await
            .expect("snapshot");
        let subscriber = store
            .register_subscriber("1001", "asha")
            .await
            .expect("subscriber");
        let mut trackers = Vec::new();
        for target in [1_500.0, 1_600.0] {
            let tracker = NewTracker::new(subscriber.id, instrument.id, target, 0.5)
                .expect("valid tracker");
            trackers.push(store.create_tracker(tracker).await.expect("tracker"));
        }
        let pipeline = Arc::new(RefreshPipeline::new(
            Arc::new(Offline),
            Arc::new(store.clone()),
            TradingCalendar::nepse(),
            RefreshSettings::default(),
        ));
        let evaluator = AlertEvaluator::new(
            Arc::new(store.clone()),
            pipeline,
            Arc::new(LogNotifier::new()),
            PauseRegistry::new(),
        );
        evaluator
            .evaluate_subscriber(subscriber.id, now)
            .await
            .expect("first pass");
        assert_eq!(evaluator.lock_count(), 2);

        assert!(store.remove_tracker(trackers[0].id).await.expect("remove"));
        evaluator
            .evaluate_subscriber(subscriber.id, now)
            .await
            .expect("second pass");

        assert_eq!(evaluator.lock_count(), 1);
    }
}
