//! # tickwatch Core
//!
//! Market data refresh and price alert scheduling.
//!
//! ## Overview
//!
//! - **Refresh pipeline**: bounded fan-out fetch of instrument field maps,
//!   validation into [`MarketSnapshot`]s and a single fan-in commit
//! - **Tracker registry**: subscribers, target-price trackers and their
//!   alert state
//! - **Job scheduler**: one polling job per subscriber with trackers, only
//!   while the market is open
//! - **Alert evaluator**: debounce, in-range and breakout rules, message
//!   replacement
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`alert`] | Alert rules, message formatting, [`AlertEvaluator`] |
//! | [`calendar`] | Trading-hours predicate |
//! | [`circuit_breaker`] | Circuit breaker for the upstream site |
//! | [`config`] | [`EngineConfig`] |
//! | [`domain`] | Instruments, snapshots, subscribers, trackers |
//! | [`engine`] | Runtime tying the tickers together |
//! | [`error`] | Core error types |
//! | [`fetch`] | Fetch adapter contract and HTTP adapter |
//! | [`fields`] | Raw field map validation |
//! | [`http_client`] | HTTP client abstraction |
//! | [`memory`] | In-memory store |
//! | [`notifier`] | Telegram and log notifiers |
//! | [`pause`] | Paused-subscriber registry |
//! | [`refresh`] | [`RefreshPipeline`] |
//! | [`registry`] | [`TrackerService`] |
//! | [`scheduler`] | [`JobScheduler`] |
//! | [`store`] | Persistence contracts |
//! | [`throttling`] | Fetch rate quota |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tickwatch_core::{
//!     Engine, EngineConfig, HttpFetchAdapter, LogNotifier, ReqwestHttpClient, Warehouse,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::default();
//!     let warehouse = Arc::new(Warehouse::open_default()?);
//!     let adapter = HttpFetchAdapter::new(Arc::new(ReqwestHttpClient::new()), &config.fetch_base_url)
//!         .with_timeout_ms(config.http_timeout_ms());
//!     let engine = Engine::new(
//!         &config,
//!         warehouse.clone(),
//!         warehouse,
//!         Arc::new(adapter),
//!         Arc::new(LogNotifier::new()),
//!     )?;
//!
//!     engine.run(CancellationToken::new()).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  reconcile tick   ┌──────────────┐  per-subscriber job  ┌────────────────┐
//! │    Engine    │──────────────────▶│ JobScheduler │─────────────────────▶│ AlertEvaluator │
//! └──────┬───────┘                   └──────────────┘                      └───────┬────────┘
//!        │ refresh tick                                                            │
//!        ▼                                                                         ▼
//! ┌──────────────────┐     ┌──────────────┐                              ┌──────────────┐
//! │ RefreshPipeline  │────▶│ FetchAdapter │                              │   Notifier   │
//! └──────┬───────────┘     └──────────────┘                              └──────────────┘
//!        ▼
//! ┌──────────────────────────────────────┐
//! │ InstrumentStore / TrackerRegistry    │
//! │ (MemoryStore or DuckDB Warehouse)    │
//! └──────────────────────────────────────┘
//! ```

pub mod alert;
pub mod calendar;
pub mod circuit_breaker;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod fields;
pub mod http_client;
pub mod memory;
pub mod notifier;
pub mod pause;
pub mod refresh;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod throttling;
mod warehouse_store;

pub use alert::{
    alert_message, format_price, is_debounced, quote_message, should_alert, AlertEvaluator,
    EvaluationReport, TrackerFailure, BREAKOUT_MIN_TARGET, DEFAULT_DEBOUNCE,
};
pub use calendar::{CalendarConfig, TradingCalendar};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use config::EngineConfig;
pub use domain::{
    is_stale, Instrument, InstrumentId, MarketSnapshot, MessageRef, NewTracker, Subscriber,
    SubscriberId, Ticker, Tracker, TrackerId, UtcDateTime, DEFAULT_TOLERANCE_PCT,
};
pub use engine::Engine;
pub use error::{CoreError, ValidationError};
pub use fetch::{FetchAdapter, FetchError, FetchErrorKind, FetchFuture, HttpFetchAdapter};
pub use fields::{snapshot_from_fields, RawFieldMap};
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient,
    ScriptedHttpClient,
};
pub use memory::MemoryStore;
pub use notifier::{
    LogNotifier, Notifier, NotifierError, NotifierErrorKind, NotifyFuture, TelegramNotifier,
};
pub use pause::{PauseGuard, PauseRegistry};
pub use refresh::{RefreshFailure, RefreshMode, RefreshPipeline, RefreshReport, RefreshSettings};
pub use registry::TrackerService;
pub use scheduler::{JobScheduler, ReconcileOutcome};
pub use store::{AlertWrite, InstrumentStore, StoreError, StoreFuture, TrackerRegistry};
pub use throttling::FetchThrottle;

pub use tickwatch_warehouse::{Warehouse, WarehouseConfig, WarehouseError};
