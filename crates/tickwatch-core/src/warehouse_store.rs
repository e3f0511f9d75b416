//! Store contracts backed by the DuckDB warehouse.
//!
//! Warehouse calls are synchronous; each one runs on the blocking pool so a
//! slow disk never stalls the refresh or alert loops.

use tickwatch_warehouse::{
    InstrumentRecord, NewTrackerRecord, SnapshotRecord, SubscriberRecord, TrackerRecord,
    Warehouse, WarehouseError,
};

use crate::store::{AlertWrite, InstrumentStore, StoreError, StoreFuture, TrackerRegistry};
use crate::{
    Instrument, InstrumentId, MarketSnapshot, MessageRef, NewTracker, Subscriber, SubscriberId,
    Ticker, Tracker, TrackerId, UtcDateTime,
};

async fn blocking<T, F>(warehouse: &Warehouse, work: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(Warehouse) -> Result<T, WarehouseError> + Send + 'static,
{
    let warehouse = warehouse.clone();
    tokio::task::spawn_blocking(move || work(warehouse))
        .await
        .map_err(|error| StoreError::Task(error.to_string()))?
        .map_err(StoreError::from)
}

impl InstrumentStore for Warehouse {
    fn register_instrument<'a>(
        &'a self,
        ticker: &'a Ticker,
        name: &'a str,
        locator: &'a str,
    ) -> StoreFuture<'a, Instrument> {
        let ticker = ticker.as_str().to_owned();
        let name = name.to_owned();
        let locator = locator.to_owned();
        Box::pin(async move {
            let created_at = UtcDateTime::now().format_rfc3339();
            let record = blocking(self, move |warehouse| {
                warehouse.register_instrument(&ticker, &name, &locator, &created_at)
            })
            .await?;
            instrument_from_record(record)
        })
    }

    fn instrument_by_ticker<'a>(&'a self, ticker: &'a Ticker) -> StoreFuture<'a, Option<Instrument>> {
        let ticker = ticker.as_str().to_owned();
        Box::pin(async move {
            blocking(self, move |warehouse| warehouse.instrument_by_ticker(&ticker))
                .await?
                .map(instrument_from_record)
                .transpose()
        })
    }

    fn instrument_by_id(&self, id: InstrumentId) -> StoreFuture<'_, Option<Instrument>> {
        Box::pin(async move {
            blocking(self, move |warehouse| warehouse.instrument_by_id(id.get()))
                .await?
                .map(instrument_from_record)
                .transpose()
        })
    }

    fn list_instruments(&self) -> StoreFuture<'_, Vec<Instrument>> {
        Box::pin(async move {
            blocking(self, |warehouse| warehouse.list_instruments())
                .await?
                .into_iter()
                .map(instrument_from_record)
                .collect()
        })
    }

    fn tracked_instruments(&self) -> StoreFuture<'_, Vec<Instrument>> {
        Box::pin(async move {
            blocking(self, |warehouse| warehouse.tracked_instruments())
                .await?
                .into_iter()
                .map(instrument_from_record)
                .collect()
        })
    }

    fn rename_instrument<'a>(&'a self, id: InstrumentId, name: &'a str) -> StoreFuture<'a, bool> {
        let name = name.to_owned();
        Box::pin(async move {
            blocking(self, move |warehouse| warehouse.rename_instrument(id.get(), &name)).await
        })
    }

    fn remove_instrument(&self, id: InstrumentId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            blocking(self, move |warehouse| warehouse.remove_instrument(id.get())).await
        })
    }

    fn snapshot(&self, id: InstrumentId) -> StoreFuture<'_, Option<MarketSnapshot>> {
        Box::pin(async move {
            blocking(self, move |warehouse| warehouse.snapshot(id.get()))
                .await?
                .map(snapshot_from_record)
                .transpose()
        })
    }

    fn replace_snapshots(&self, batch: Vec<(InstrumentId, MarketSnapshot)>) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let rows = batch
                .into_iter()
                .map(|(id, snapshot)| snapshot_to_record(id, snapshot))
                .collect::<Result<Vec<_>, _>>()?;
            blocking(self, move |warehouse| warehouse.replace_snapshots(&rows)).await
        })
    }
}

impl TrackerRegistry for Warehouse {
    fn register_subscriber<'a>(
        &'a self,
        external_id: &'a str,
        name: &'a str,
    ) -> StoreFuture<'a, Subscriber> {
        let external_id = external_id.to_owned();
        let name = name.to_owned();
        Box::pin(async move {
            let created_at = UtcDateTime::now().format_rfc3339();
            let record = blocking(self, move |warehouse| {
                warehouse.register_subscriber(&external_id, &name, &created_at)
            })
            .await?;
            subscriber_from_record(record)
        })
    }

    fn subscriber_by_external_id<'a>(
        &'a self,
        external_id: &'a str,
    ) -> StoreFuture<'a, Option<Subscriber>> {
        let external_id = external_id.to_owned();
        Box::pin(async move {
            blocking(self, move |warehouse| {
                warehouse.subscriber_by_external_id(&external_id)
            })
            .await?
            .map(subscriber_from_record)
            .transpose()
        })
    }

    fn subscriber(&self, id: SubscriberId) -> StoreFuture<'_, Option<Subscriber>> {
        Box::pin(async move {
            blocking(self, move |warehouse| warehouse.subscriber_by_id(id.get()))
                .await?
                .map(subscriber_from_record)
                .transpose()
        })
    }

    fn remove_subscriber(&self, id: SubscriberId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            blocking(self, move |warehouse| warehouse.remove_subscriber(id.get())).await
        })
    }

    fn create_tracker(&self, tracker: NewTracker) -> StoreFuture<'_, Tracker> {
        Box::pin(async move {
            let row = NewTrackerRecord {
                subscriber_id: tracker.subscriber_id.get(),
                instrument_id: tracker.instrument_id.get(),
                target_price: tracker.target_price,
                tolerance_pct: tracker.tolerance_pct,
                created_at: UtcDateTime::now().format_rfc3339(),
            };
            let record = blocking(self, move |warehouse| warehouse.create_tracker(&row)).await?;
            tracker_from_record(record)
        })
    }

    fn tracker(&self, id: TrackerId) -> StoreFuture<'_, Option<Tracker>> {
        Box::pin(async move {
            blocking(self, move |warehouse| warehouse.tracker(id.get()))
                .await?
                .map(tracker_from_record)
                .transpose()
        })
    }

    fn trackers_by_subscriber(&self, subscriber: SubscriberId) -> StoreFuture<'_, Vec<Tracker>> {
        Box::pin(async move {
            blocking(self, move |warehouse| {
                warehouse.trackers_by_subscriber(subscriber.get())
            })
            .await?
            .into_iter()
            .map(tracker_from_record)
            .collect()
        })
    }

    fn subscribers_with_trackers(&self) -> StoreFuture<'_, Vec<Subscriber>> {
        Box::pin(async move {
            blocking(self, |warehouse| warehouse.subscribers_with_trackers())
                .await?
                .into_iter()
                .map(subscriber_from_record)
                .collect()
        })
    }

    fn remove_tracker(&self, id: TrackerId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            blocking(self, move |warehouse| warehouse.remove_tracker(id.get())).await
        })
    }

    fn record_alert(
        &self,
        id: TrackerId,
        expected_last_alert_at: Option<UtcDateTime>,
        alerted_at: UtcDateTime,
        message: Option<MessageRef>,
    ) -> StoreFuture<'_, AlertWrite> {
        Box::pin(async move {
            let expected = expected_last_alert_at.map(UtcDateTime::format_rfc3339);
            let alerted_at = alerted_at.format_rfc3339();
            blocking(self, move |warehouse| {
                warehouse.record_alert(
                    id.get(),
                    expected.as_deref(),
                    &alerted_at,
                    message.as_ref().map(MessageRef::as_str),
                )
            })
            .await
        })
    }
}

fn corrupt(entity: &str, id: i64, detail: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{entity} #{id}: {detail}"))
}

fn parse_timestamp(entity: &str, id: i64, value: &str) -> Result<UtcDateTime, StoreError> {
    UtcDateTime::parse(value).map_err(|error| corrupt(entity, id, error))
}

fn instrument_from_record(record: InstrumentRecord) -> Result<Instrument, StoreError> {
    let ticker = Ticker::parse(&record.ticker)
        .map_err(|error| corrupt("instrument", record.id, error))?;
    Ok(Instrument {
        id: InstrumentId(record.id),
        ticker,
        name: record.name,
        locator: record.locator,
    })
}

fn subscriber_from_record(record: SubscriberRecord) -> Result<Subscriber, StoreError> {
    Ok(Subscriber {
        id: SubscriberId(record.id),
        created_at: parse_timestamp("subscriber", record.id, &record.created_at)?,
        external_id: record.external_id,
        name: record.name,
    })
}

fn tracker_from_record(record: TrackerRecord) -> Result<Tracker, StoreError> {
    let last_alert_at = record
        .last_alert_at
        .as_deref()
        .map(|value| parse_timestamp("tracker", record.id, value))
        .transpose()?;
    Ok(Tracker {
        id: TrackerId(record.id),
        subscriber_id: SubscriberId(record.subscriber_id),
        instrument_id: InstrumentId(record.instrument_id),
        target_price: record.target_price,
        tolerance_pct: record.tolerance_pct,
        last_alert_at,
        last_alert_message: record.last_alert_message.map(MessageRef),
        created_at: parse_timestamp("tracker", record.id, &record.created_at)?,
    })
}

fn snapshot_from_record(record: SnapshotRecord) -> Result<MarketSnapshot, StoreError> {
    let id = record.instrument_id;
    let count = |field: &str, value: i64| {
        u64::try_from(value).map_err(|_| corrupt("snapshot", id, format!("negative {field}")))
    };
    Ok(MarketSnapshot {
        last_traded_price: record.last_traded_price,
        previous_close: record.previous_close,
        open_price: record.open_price,
        close_price: record.close_price,
        total_traded_quantity: count("total_traded_quantity", record.total_traded_quantity)?,
        total_trades: count("total_trades", record.total_trades)?,
        high_price: record.high_price,
        low_price: record.low_price,
        week_52_high: record.week_52_high,
        week_52_low: record.week_52_low,
        total_listed_shares: record
            .total_listed_shares
            .map(|value| count("total_listed_shares", value))
            .transpose()?,
        total_paid_up_value: record.total_paid_up_value,
        market_capitalization: record.market_capitalization,
        instrument_type: record.instrument_type,
        listing_date: record.listing_date,
        updated_at: parse_timestamp("snapshot", id, &record.updated_at)?,
    })
}

fn snapshot_to_record(id: InstrumentId, snapshot: MarketSnapshot) -> Result<SnapshotRecord, StoreError> {
    let count = |field: &str, value: u64| {
        i64::try_from(value)
            .map_err(|_| corrupt("snapshot", id.get(), format!("{field} out of range")))
    };
    Ok(SnapshotRecord {
        instrument_id: id.get(),
        last_traded_price: snapshot.last_traded_price,
        previous_close: snapshot.previous_close,
        open_price: snapshot.open_price,
        close_price: snapshot.close_price,
        total_traded_quantity: count("total_traded_quantity", snapshot.total_traded_quantity)?,
        total_trades: count("total_trades", snapshot.total_trades)?,
        high_price: snapshot.high_price,
        low_price: snapshot.low_price,
        week_52_high: snapshot.week_52_high,
        week_52_low: snapshot.week_52_low,
        total_listed_shares: snapshot
            .total_listed_shares
            .map(|value| count("total_listed_shares", value))
            .transpose()?,
        total_paid_up_value: snapshot.total_paid_up_value,
        market_capitalization: snapshot.market_capitalization,
        instrument_type: snapshot.instrument_type,
        listing_date: snapshot.listing_date,
        updated_at: snapshot.updated_at.format_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::sample_snapshot;
    use tickwatch_warehouse::WarehouseConfig;

    fn open_temp() -> (tempfile::TempDir, Warehouse) {
        let dir = tempfile::tempdir().expect("tempdir");
        let warehouse = Warehouse::open(WarehouseConfig::with_home(dir.path())).expect("warehouse");
        (dir, warehouse)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn snapshot_round_trips_through_duckdb() {
        let (_dir, warehouse) = open_temp();
        let store: &dyn InstrumentStore = &warehouse;
        let ticker = Ticker::parse("NABIL").expect("ticker");
        let instrument = store
            .register_instrument(&ticker, "Nabil Bank", "NABIL")
            .await
            .expect("instrument");
        let updated = UtcDateTime::parse("2024-06-02T06:15:00Z").expect("timestamp");
        let mut snapshot = sample_snapshot(1_201.5, updated);
        snapshot.instrument_type = Some(String::from("Equity"));

        store
            .replace_snapshot(instrument.id, snapshot.clone())
            .await
            .expect("replace");
        let stored = store.snapshot(instrument.id)
            .await
            .expect("read");

        assert_eq!(stored, Some(snapshot));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dangling_tracker_maps_to_missing_reference() {
        let (_dir, warehouse) = open_temp();
        let tracker = NewTracker::new(SubscriberId(9), InstrumentId(9), 100.0, 1.0).expect("valid");

        let registry: &dyn TrackerRegistry = &warehouse;
        let error = registry.create_tracker(tracker).await.expect_err("dangling");

        assert!(matches!(
            error,
            StoreError::MissingReference { entity: "subscriber", id: 9 }
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn alert_state_survives_compare_and_set() {
        let (_dir, warehouse) = open_temp();
        let store: &dyn InstrumentStore = &warehouse;
        let registry: &dyn TrackerRegistry = &warehouse;
        let ticker = Ticker::parse("HIDCL").expect("ticker");
        let instrument = store
            .register_instrument(&ticker, "Hydroelectricity Investment", "HIDCL")
            .await
            .expect("instrument");
        let subscriber = registry
            .register_subscriber("42", "ram")
            .await
            .expect("subscriber");
        let tracker = registry
            .create_tracker(
                NewTracker::new(subscriber.id, instrument.id, 250.0, 1.0).expect("valid"),
            )
            .await
            .expect("tracker");
        let first = UtcDateTime::parse("2024-06-02T06:00:00Z").expect("timestamp");
        let second = UtcDateTime::parse("2024-06-02T06:06:00Z").expect("timestamp");

        let applied = registry
            .record_alert(tracker.id, None, first, Some(MessageRef(String::from("11"))))
            .await
            .expect("write");
        let stale = registry
            .record_alert(tracker.id, None, second, None)
            .await
            .expect("write");
        let next = registry
            .record_alert(tracker.id, Some(first), second, Some(MessageRef(String::from("12"))))
            .await
            .expect("write");

        assert_eq!(
            (applied, stale, next),
            (AlertWrite::Applied, AlertWrite::Conflict, AlertWrite::Applied)
        );
        let stored = registry.tracker(tracker.id).await.expect("read").expect("exists");
        assert_eq!(stored.last_alert_at, Some(second));
        assert_eq!(stored.last_alert_message, Some(MessageRef(String::from("12"))));
    }
}
