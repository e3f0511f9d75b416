//! Persistence contracts for instruments, snapshots, subscribers and trackers.
//!
//! Two implementations ship with the crate: [`crate::MemoryStore`] for tests
//! and dry runs, and [`tickwatch_warehouse::Warehouse`] for DuckDB-backed
//! deployments. Both enforce the same rules:
//!
//! - snapshots are replaced wholesale, a batch commits together;
//! - a tracker is only created when its subscriber and instrument exist;
//! - deleting a subscriber or instrument deletes its trackers;
//! - alert state is written with compare-and-set on the previous timestamp.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tickwatch_warehouse::WarehouseError;

pub use tickwatch_warehouse::AlertWrite;

use crate::{
    Instrument, InstrumentId, MarketSnapshot, MessageRef, NewTracker, Subscriber, SubscriberId,
    Ticker, Tracker, TrackerId, UtcDateTime,
};

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Persistence failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Warehouse(WarehouseError),

    #[error("{entity} #{id} does not exist")]
    MissingReference { entity: &'static str, id: i64 },

    #[error("stored row is invalid: {0}")]
    Corrupt(String),

    #[error("store task failed: {0}")]
    Task(String),
}

impl From<WarehouseError> for StoreError {
    fn from(error: WarehouseError) -> Self {
        match error {
            WarehouseError::MissingReference { entity, id } => {
                Self::MissingReference { entity, id }
            }
            other => Self::Warehouse(other),
        }
    }
}

/// Instrument identity and latest-snapshot storage.
pub trait InstrumentStore: Send + Sync {
    /// Register an instrument; an existing ticker returns the stored row.
    fn register_instrument<'a>(
        &'a self,
        ticker: &'a Ticker,
        name: &'a str,
        locator: &'a str,
    ) -> StoreFuture<'a, Instrument>;

    fn instrument_by_ticker<'a>(&'a self, ticker: &'a Ticker) -> StoreFuture<'a, Option<Instrument>>;

    fn instrument_by_id(&self, id: InstrumentId) -> StoreFuture<'_, Option<Instrument>>;

    fn list_instruments(&self) -> StoreFuture<'_, Vec<Instrument>>;

    /// Instruments with at least one tracker.
    fn tracked_instruments(&self) -> StoreFuture<'_, Vec<Instrument>>;

    fn rename_instrument<'a>(&'a self, id: InstrumentId, name: &'a str) -> StoreFuture<'a, bool>;

    /// Remove an instrument, its snapshot and its trackers.
    fn remove_instrument(&self, id: InstrumentId) -> StoreFuture<'_, bool>;

    fn snapshot(&self, id: InstrumentId) -> StoreFuture<'_, Option<MarketSnapshot>>;

    /// Replace one snapshot atomically.
    fn replace_snapshot(&self, id: InstrumentId, snapshot: MarketSnapshot) -> StoreFuture<'_, ()> {
        self.replace_snapshots(vec![(id, snapshot)])
    }

    /// Replace every snapshot in `batch` in one commit.
    fn replace_snapshots(&self, batch: Vec<(InstrumentId, MarketSnapshot)>) -> StoreFuture<'_, ()>;
}

/// Subscriber and tracker storage.
pub trait TrackerRegistry: Send + Sync {
    /// Register a subscriber; an existing external id returns the stored row.
    fn register_subscriber<'a>(
        &'a self,
        external_id: &'a str,
        name: &'a str,
    ) -> StoreFuture<'a, Subscriber>;

    fn subscriber_by_external_id<'a>(
        &'a self,
        external_id: &'a str,
    ) -> StoreFuture<'a, Option<Subscriber>>;

    fn subscriber(&self, id: SubscriberId) -> StoreFuture<'_, Option<Subscriber>>;

    /// Remove a subscriber and its trackers.
    fn remove_subscriber(&self, id: SubscriberId) -> StoreFuture<'_, bool>;

    /// Persist a validated tracker; fails with
    /// [`StoreError::MissingReference`] on a dangling subscriber or instrument.
    fn create_tracker(&self, tracker: NewTracker) -> StoreFuture<'_, Tracker>;

    fn tracker(&self, id: TrackerId) -> StoreFuture<'_, Option<Tracker>>;

    /// Trackers of `subscriber` in creation order.
    fn trackers_by_subscriber(&self, subscriber: SubscriberId) -> StoreFuture<'_, Vec<Tracker>>;

    /// Subscribers with at least one tracker, ordered by id.
    fn subscribers_with_trackers(&self) -> StoreFuture<'_, Vec<Subscriber>>;

    fn remove_tracker(&self, id: TrackerId) -> StoreFuture<'_, bool>;

    /// Compare-and-set the alert state of a tracker.
    fn record_alert(
        &self,
        id: TrackerId,
        expected_last_alert_at: Option<UtcDateTime>,
        alerted_at: UtcDateTime,
        message: Option<MessageRef>,
    ) -> StoreFuture<'_, AlertWrite>;
}
