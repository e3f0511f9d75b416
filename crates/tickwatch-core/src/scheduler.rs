//! Per-subscriber polling jobs.
//!
//! A subscriber has a job while the market is open and they own at least
//! one tracker. Jobs are keyed by subscriber id, so reconciling twice never
//! starts a second job for the same subscriber.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alert::AlertEvaluator;
use crate::calendar::TradingCalendar;
use crate::store::TrackerRegistry;
use crate::{CoreError, SubscriberId, UtcDateTime};

struct JobHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Result of one reconciliation tick.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ReconcileOutcome {
    pub market_open: bool,
    pub started: Vec<SubscriberId>,
    pub removed: Vec<SubscriberId>,
    pub active: usize,
}

pub struct JobScheduler {
    registry: Arc<dyn TrackerRegistry>,
    evaluator: Arc<AlertEvaluator>,
    calendar: TradingCalendar,
    check_interval: Duration,
    jobs: Mutex<HashMap<SubscriberId, JobHandle>>,
}

impl JobScheduler {
    pub fn new(
        registry: Arc<dyn TrackerRegistry>,
        evaluator: Arc<AlertEvaluator>,
        calendar: TradingCalendar,
        check_interval: Duration,
    ) -> Self {
        Self {
            registry,
            evaluator,
            calendar,
            check_interval,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Bring the job map in line with the calendar and the set of
    /// subscribers that own trackers.
    pub async fn reconcile(&self, now: UtcDateTime) -> Result<ReconcileOutcome, CoreError> {
        if !self.calendar.is_open(now) {
            let removed = self.remove_all();
            if !removed.is_empty() {
                info!(removed = removed.len(), "market closed, tracker jobs removed");
            }
            return Ok(ReconcileOutcome {
                market_open: false,
                removed,
                ..ReconcileOutcome::default()
            });
        }

        let wanted = self
            .registry
            .subscribers_with_trackers()
            .await?
            .into_iter()
            .map(|subscriber| subscriber.id)
            .collect::<Vec<_>>();
        let wanted_set = wanted.iter().copied().collect::<HashSet<_>>();

        let mut jobs = self.lock();
        let mut removed = Vec::new();
        jobs.retain(|subscriber, job| {
            // A job whose task died is restarted below.
            let keep = wanted_set.contains(subscriber) && !job.task.is_finished();
            if !keep {
                job.cancel.cancel();
                removed.push(*subscriber);
            }
            keep
        });

        let mut started = Vec::new();
        for subscriber in wanted {
            if jobs.contains_key(&subscriber) {
                continue;
            }
            jobs.insert(subscriber, self.spawn_job(subscriber));
            started.push(subscriber);
        }
        removed.sort();

        if !started.is_empty() || !removed.is_empty() {
            info!(
                started = started.len(),
                removed = removed.len(),
                active = jobs.len(),
                "tracker jobs reconciled"
            );
        }
        Ok(ReconcileOutcome {
            market_open: true,
            started,
            removed,
            active: jobs.len(),
        })
    }

    /// Cancel every job. Evaluations already running finish first.
    pub fn remove_all(&self) -> Vec<SubscriberId> {
        let mut removed = self
            .lock()
            .drain()
            .map(|(subscriber, job)| {
                job.cancel.cancel();
                subscriber
            })
            .collect::<Vec<_>>();
        removed.sort();
        removed
    }

    pub fn has_job(&self, subscriber: SubscriberId) -> bool {
        self.lock().contains_key(&subscriber)
    }

    pub fn active_jobs(&self) -> Vec<SubscriberId> {
        let mut active = self.lock().keys().copied().collect::<Vec<_>>();
        active.sort();
        active
    }

    /// Cancel every job and wait for their tasks to exit.
    pub async fn shutdown(&self) {
        let jobs = self.lock().drain().map(|(_, job)| job).collect::<Vec<_>>();
        for job in &jobs {
            job.cancel.cancel();
        }
        for job in jobs {
            if let Err(error) = job.task.await {
                warn!(error = %error, "tracker job ended abnormally");
            }
        }
    }

    fn spawn_job(&self, subscriber: SubscriberId) -> JobHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_job(
            Arc::clone(&self.evaluator),
            subscriber,
            self.check_interval,
            cancel.clone(),
        ));
        JobHandle { cancel, task }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriberId, JobHandle>> {
        self.jobs.lock().expect("job map lock is not poisoned")
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        if let Ok(jobs) = self.jobs.get_mut() {
            for job in jobs.values() {
                job.cancel.cancel();
            }
        }
    }
}

async fn run_job(
    evaluator: Arc<AlertEvaluator>,
    subscriber: SubscriberId,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    debug!(subscriber_id = %subscriber, "tracker job started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(error) = evaluator.evaluate_subscriber(subscriber, UtcDateTime::now()).await {
                    warn!(
                        subscriber_id = %subscriber,
                        code = error.code(),
                        error = %error,
                        "tracker check failed"
                    );
                }
            }
        }
    }
    debug!(subscriber_id = %subscriber, "tracker job stopped");
}
