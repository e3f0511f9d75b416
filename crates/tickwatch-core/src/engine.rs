//! Engine runtime: wires the pipeline, evaluator and scheduler together and
//! drives the refresh and reconcile tickers until shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::alert::AlertEvaluator;
use crate::config::EngineConfig;
use crate::fetch::FetchAdapter;
use crate::notifier::Notifier;
use crate::pause::PauseRegistry;
use crate::refresh::{RefreshMode, RefreshPipeline, RefreshReport};
use crate::scheduler::JobScheduler;
use crate::store::{InstrumentStore, TrackerRegistry};
use crate::throttling::FetchThrottle;
use crate::{CoreError, UtcDateTime};

pub struct Engine {
    pipeline: Arc<RefreshPipeline>,
    evaluator: Arc<AlertEvaluator>,
    scheduler: Arc<JobScheduler>,
    refresh_interval: Duration,
    reconcile_interval: Duration,
}

impl Engine {
    pub fn new(
        config: &EngineConfig,
        instruments: Arc<dyn InstrumentStore>,
        registry: Arc<dyn TrackerRegistry>,
        adapter: Arc<dyn FetchAdapter>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let calendar = config.trading_calendar()?;

        let mut pipeline =
            RefreshPipeline::new(adapter, instruments, calendar, config.refresh_settings());
        if let Some(per_minute) = config.fetch_quota_per_minute {
            let throttle = FetchThrottle::per_minute(per_minute);
            info!(quota = %throttle.describe(), "fetch quota enabled");
            pipeline = pipeline.with_throttle(throttle);
        }
        let pipeline = Arc::new(pipeline);

        let evaluator = Arc::new(
            AlertEvaluator::new(
                Arc::clone(&registry),
                Arc::clone(&pipeline),
                notifier,
                PauseRegistry::new(),
            )
            .with_debounce(config.debounce()),
        );
        let scheduler = Arc::new(JobScheduler::new(
            registry,
            Arc::clone(&evaluator),
            calendar,
            config.check_interval(),
        ));

        Ok(Self {
            pipeline,
            evaluator,
            scheduler,
            refresh_interval: config.refresh_interval(),
            reconcile_interval: config.reconcile_interval(),
        })
    }

    pub fn pipeline(&self) -> &Arc<RefreshPipeline> {
        &self.pipeline
    }

    pub fn evaluator(&self) -> &Arc<AlertEvaluator> {
        &self.evaluator
    }

    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.scheduler
    }

    pub fn pauses(&self) -> &PauseRegistry {
        self.evaluator.pauses()
    }

    /// One policy refresh over every tracked instrument.
    pub async fn refresh_cycle(&self, now: UtcDateTime) -> Result<RefreshReport, CoreError> {
        self.pipeline.refresh_tracked(RefreshMode::Policy, now).await
    }

    /// Run until `shutdown` fires, then cancel every job.
    ///
    /// A refresh tick that fires while the previous cycle is still running
    /// is skipped.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut reconcile = tokio::time::interval(self.reconcile_interval);
        reconcile.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut refresh = tokio::time::interval(self.refresh_interval);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<()>> = None;

        info!(
            refresh_interval_secs = self.refresh_interval.as_secs(),
            reconcile_interval_secs = self.reconcile_interval.as_secs(),
            "engine started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = reconcile.tick() => {
                    if let Err(error) = self.scheduler.reconcile(UtcDateTime::now()).await {
                        warn!(code = error.code(), error = %error, "job reconciliation failed");
                    }
                }
                _ = refresh.tick() => {
                    if in_flight.as_ref().is_some_and(|task| !task.is_finished()) {
                        debug!("previous refresh cycle still running, tick skipped");
                    } else {
                        in_flight = Some(spawn_refresh(Arc::clone(&self.pipeline)));
                    }
                }
            }
        }

        info!("engine stopping");
        self.scheduler.shutdown().await;
        if let Some(task) = in_flight {
            if let Err(error) = task.await {
                warn!(error = %error, "refresh cycle ended abnormally");
            }
        }
    }
}

fn spawn_refresh(pipeline: Arc<RefreshPipeline>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match pipeline
            .refresh_tracked(RefreshMode::Policy, UtcDateTime::now())
            .await
        {
            Ok(report) if report.market_closed => debug!("market closed, refresh tick idle"),
            Ok(_) => {}
            Err(error) => error!(
                code = error.code(),
                error = %error,
                "refresh cycle aborted, retrying next tick"
            ),
        }
    })
}
