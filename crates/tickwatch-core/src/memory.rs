//! In-memory store for tests, dry runs and `--memory` sessions.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::store::{AlertWrite, InstrumentStore, StoreError, StoreFuture, TrackerRegistry};
use crate::{
    Instrument, InstrumentId, MarketSnapshot, MessageRef, NewTracker, Subscriber, SubscriberId,
    Ticker, Tracker, TrackerId, UtcDateTime,
};

#[derive(Debug, Default)]
struct MemoryInner {
    next_id: i64,
    instruments: BTreeMap<InstrumentId, Instrument>,
    snapshots: HashMap<InstrumentId, MarketSnapshot>,
    subscribers: BTreeMap<SubscriberId, Subscriber>,
    trackers: BTreeMap<TrackerId, Tracker>,
}

impl MemoryInner {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn drop_trackers_where(&mut self, predicate: impl Fn(&Tracker) -> bool) {
        self.trackers.retain(|_, tracker| !predicate(tracker));
    }
}

/// Thread-safe in-memory implementation of both store contracts.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<tokio::sync::RwLock<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots.
    pub async fn snapshot_count(&self) -> usize {
        self.inner.read().await.snapshots.len()
    }
}

impl InstrumentStore for MemoryStore {
    fn register_instrument<'a>(
        &'a self,
        ticker: &'a Ticker,
        name: &'a str,
        locator: &'a str,
    ) -> StoreFuture<'a, Instrument> {
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            if let Some(existing) = inner.instruments.values().find(|i| &i.ticker == ticker) {
                return Ok(existing.clone());
            }

            let instrument = Instrument {
                id: InstrumentId(inner.allocate_id()),
                ticker: ticker.clone(),
                name: name.to_owned(),
                locator: locator.to_owned(),
            };
            inner.instruments.insert(instrument.id, instrument.clone());
            Ok(instrument)
        })
    }

    fn instrument_by_ticker<'a>(&'a self, ticker: &'a Ticker) -> StoreFuture<'a, Option<Instrument>> {
        Box::pin(async move {
            let inner = self.inner.read().await;
            Ok(inner
                .instruments
                .values()
                .find(|instrument| &instrument.ticker == ticker)
                .cloned())
        })
    }

    fn instrument_by_id(&self, id: InstrumentId) -> StoreFuture<'_, Option<Instrument>> {
        Box::pin(async move { Ok(self.inner.read().await.instruments.get(&id).cloned()) })
    }

    fn list_instruments(&self) -> StoreFuture<'_, Vec<Instrument>> {
        Box::pin(async move {
            let inner = self.inner.read().await;
            let mut instruments = inner.instruments.values().cloned().collect::<Vec<_>>();
            instruments.sort_by(|a, b| a.ticker.cmp(&b.ticker));
            Ok(instruments)
        })
    }

    fn tracked_instruments(&self) -> StoreFuture<'_, Vec<Instrument>> {
        Box::pin(async move {
            let inner = self.inner.read().await;
            let mut instruments = inner
                .instruments
                .values()
                .filter(|instrument| {
                    inner
                        .trackers
                        .values()
                        .any(|tracker| tracker.instrument_id == instrument.id)
                })
                .cloned()
                .collect::<Vec<_>>();
            instruments.sort_by(|a, b| a.ticker.cmp(&b.ticker));
            Ok(instruments)
        })
    }

    fn rename_instrument<'a>(&'a self, id: InstrumentId, name: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            Ok(match inner.instruments.get_mut(&id) {
                Some(instrument) => {
                    instrument.name = name.to_owned();
                    true
                }
                None => false,
            })
        })
    }

    fn remove_instrument(&self, id: InstrumentId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            inner.drop_trackers_where(|tracker| tracker.instrument_id == id);
            inner.snapshots.remove(&id);
            Ok(inner.instruments.remove(&id).is_some())
        })
    }

    fn snapshot(&self, id: InstrumentId) -> StoreFuture<'_, Option<MarketSnapshot>> {
        Box::pin(async move { Ok(self.inner.read().await.snapshots.get(&id).cloned()) })
    }

    fn replace_snapshots(&self, batch: Vec<(InstrumentId, MarketSnapshot)>) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            if let Some((missing, _)) = batch
                .iter()
                .find(|(id, _)| !inner.instruments.contains_key(id))
            {
                return Err(StoreError::MissingReference {
                    entity: "instrument",
                    id: missing.get(),
                });
            }
            inner.snapshots.extend(batch);
            Ok(())
        })
    }
}

impl TrackerRegistry for MemoryStore {
    fn register_subscriber<'a>(
        &'a self,
        external_id: &'a str,
        name: &'a str,
    ) -> StoreFuture<'a, Subscriber> {
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            if let Some(existing) = inner
                .subscribers
                .values()
                .find(|subscriber| subscriber.external_id == external_id)
            {
                return Ok(existing.clone());
            }

            let subscriber = Subscriber {
                id: SubscriberId(inner.allocate_id()),
                external_id: external_id.to_owned(),
                name: name.to_owned(),
                created_at: UtcDateTime::now(),
            };
            inner.subscribers.insert(subscriber.id, subscriber.clone());
            Ok(subscriber)
        })
    }

    fn subscriber_by_external_id<'a>(
        &'a self,
        external_id: &'a str,
    ) -> StoreFuture<'a, Option<Subscriber>> {
        Box::pin(async move {
            let inner = self.inner.read().await;
            Ok(inner
                .subscribers
                .values()
                .find(|subscriber| subscriber.external_id == external_id)
                .cloned())
        })
    }

    fn subscriber(&self, id: SubscriberId) -> StoreFuture<'_, Option<Subscriber>> {
        Box::pin(async move { Ok(self.inner.read().await.subscribers.get(&id).cloned()) })
    }

    fn remove_subscriber(&self, id: SubscriberId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            inner.drop_trackers_where(|tracker| tracker.subscriber_id == id);
            Ok(inner.subscribers.remove(&id).is_some())
        })
    }

    fn create_tracker(&self, tracker: NewTracker) -> StoreFuture<'_, Tracker> {
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            if !inner.subscribers.contains_key(&tracker.subscriber_id) {
                return Err(StoreError::MissingReference {
                    entity: "subscriber",
                    id: tracker.subscriber_id.get(),
                });
            }
            if !inner.instruments.contains_key(&tracker.instrument_id) {
                return Err(StoreError::MissingReference {
                    entity: "instrument",
                    id: tracker.instrument_id.get(),
                });
            }

            let created = Tracker {
                id: TrackerId(inner.allocate_id()),
                subscriber_id: tracker.subscriber_id,
                instrument_id: tracker.instrument_id,
                target_price: tracker.target_price,
                tolerance_pct: tracker.tolerance_pct,
                last_alert_at: None,
                last_alert_message: None,
                created_at: UtcDateTime::now(),
            };
            inner.trackers.insert(created.id, created.clone());
            Ok(created)
        })
    }

    fn tracker(&self, id: TrackerId) -> StoreFuture<'_, Option<Tracker>> {
        Box::pin(async move { Ok(self.inner.read().await.trackers.get(&id).cloned()) })
    }

    fn trackers_by_subscriber(&self, subscriber: SubscriberId) -> StoreFuture<'_, Vec<Tracker>> {
        Box::pin(async move {
            let inner = self.inner.read().await;
            Ok(inner
                .trackers
                .values()
                .filter(|tracker| tracker.subscriber_id == subscriber)
                .cloned()
                .collect())
        })
    }

    fn subscribers_with_trackers(&self) -> StoreFuture<'_, Vec<Subscriber>> {
        Box::pin(async move {
            let inner = self.inner.read().await;
            Ok(inner
                .subscribers
                .values()
                .filter(|subscriber| {
                    inner
                        .trackers
                        .values()
                        .any(|tracker| tracker.subscriber_id == subscriber.id)
                })
                .cloned()
                .collect())
        })
    }

    fn remove_tracker(&self, id: TrackerId) -> StoreFuture<'_, bool> {
        Box::pin(async move { Ok(self.inner.write().await.trackers.remove(&id).is_some()) })
    }

    fn record_alert(
        &self,
        id: TrackerId,
        expected_last_alert_at: Option<UtcDateTime>,
        alerted_at: UtcDateTime,
        message: Option<MessageRef>,
    ) -> StoreFuture<'_, AlertWrite> {
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            let Some(tracker) = inner.trackers.get_mut(&id) else {
                return Ok(AlertWrite::Missing);
            };
            if tracker.last_alert_at != expected_last_alert_at {
                return Ok(AlertWrite::Conflict);
            }
            tracker.last_alert_at = Some(alerted_at);
            tracker.last_alert_message = message;
            Ok(AlertWrite::Applied)
        })
    }
}
