//! Behavior-driven tests for the DuckDB-backed store
//!
//! These tests verify WHAT survives in the warehouse: snapshots, trackers,
//! their alert state and the all-or-nothing snapshot batch.

use std::sync::Arc;

use tempfile::TempDir;
use tickwatch_core::{
    AlertWrite, InstrumentId, InstrumentStore, MarketSnapshot, MessageRef, NewTracker, StoreError,
    Ticker, TrackerRegistry, TrackerService, UtcDateTime, Warehouse, WarehouseConfig,
};

// =============================================================================
// Helpers
// =============================================================================

fn open_temp() -> (TempDir, Warehouse) {
    let dir = tempfile::tempdir().expect("tempdir");
    let warehouse = Warehouse::open(WarehouseConfig::with_home(dir.path())).expect("warehouse");
    (dir, warehouse)
}

fn snapshot(last_traded_price: f64, updated_at: UtcDateTime) -> MarketSnapshot {
    MarketSnapshot {
        last_traded_price,
        previous_close: 1_180.25,
        open_price: 1_190.0,
        close_price: last_traded_price,
        total_traded_quantity: 48_213,
        total_trades: 912,
        high_price: 1_210.0,
        low_price: 1_175.5,
        week_52_high: Some(1_420.0),
        week_52_low: Some(980.0),
        total_listed_shares: Some(270_585_862),
        total_paid_up_value: Some(27_058_586_200.0),
        market_capitalization: None,
        instrument_type: Some(String::from("Equity")),
        listing_date: Some(String::from("1985-06-04")),
        updated_at,
    }
}

fn trading_hours() -> UtcDateTime {
    UtcDateTime::parse("2024-06-02T06:15:00Z").expect("timestamp")
}

// =============================================================================
// Snapshots
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn when_warehouse_is_reopened_system_keeps_latest_snapshot() {
    // Given: A snapshot replaced twice for one instrument
    let (dir, warehouse) = open_temp();
    let store: &dyn InstrumentStore = &warehouse;
    let ticker = Ticker::parse("NABIL").expect("ticker");
    let instrument = store
        .register_instrument(&ticker, "Nabil Bank", "NABIL")
        .await
        .expect("instrument");
    store
        .replace_snapshot(instrument.id, snapshot(1_190.0, trading_hours()))
        .await
        .expect("first");
    let latest = snapshot(1_201.1, trading_hours());
    store
        .replace_snapshot(instrument.id, latest.clone())
        .await
        .expect("second");
    drop(warehouse);

    // When: The database is opened again
    let reopened = Warehouse::open(WarehouseConfig::with_home(dir.path())).expect("reopen");
    let store: &dyn InstrumentStore = &reopened;

    // Then: Exactly the latest snapshot is there
    let stored = store.snapshot(instrument.id).await.expect("read");
    assert_eq!(stored, Some(latest));
    let again = store
        .register_instrument(&ticker, "Nabil Bank Limited", "NABIL")
        .await
        .expect("idempotent register");
    assert_eq!(again.id, instrument.id);
}

#[tokio::test(flavor = "multi_thread")]
async fn when_snapshot_batch_has_unknown_instrument_system_commits_nothing() {
    // Given: One instrument with a committed snapshot
    let (_dir, warehouse) = open_temp();
    let store: &dyn InstrumentStore = &warehouse;
    let ticker = Ticker::parse("HIDCL").expect("ticker");
    let instrument = store
        .register_instrument(&ticker, "Hydroelectricity Investment", "HIDCL")
        .await
        .expect("instrument");
    let before = snapshot(250.0, trading_hours());
    store
        .replace_snapshot(instrument.id, before.clone())
        .await
        .expect("seed");

    // When: A batch mixes a valid update with an unregistered instrument
    let error = store
        .replace_snapshots(vec![
            (instrument.id, snapshot(260.0, trading_hours())),
            (InstrumentId(404), snapshot(10.0, trading_hours())),
        ])
        .await
        .expect_err("dangling instrument");

    // Then: The batch is rolled back as a whole
    assert!(matches!(
        error,
        StoreError::MissingReference {
            entity: "instrument",
            id: 404
        }
    ));
    let stored = store.snapshot(instrument.id).await.expect("read");
    assert_eq!(stored, Some(before));
}

// =============================================================================
// Trackers
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn when_subscriber_is_removed_system_removes_their_trackers() {
    // Given: Two subscribers tracking the same instrument
    let (_dir, warehouse) = open_temp();
    let warehouse = Arc::new(warehouse);
    let service = TrackerService::new(warehouse.clone(), warehouse.clone());
    service
        .register_instrument("NABIL", "NABIL", None)
        .await
        .expect("instrument");
    let asha = service.register_subscriber("1001", "asha").await.expect("asha");
    let bikash = service
        .register_subscriber("1002", "bikash")
        .await
        .expect("bikash");
    service
        .add_tracker("1001", "NABIL", 1_200.0, None)
        .await
        .expect("asha tracker");
    service
        .add_tracker("1002", "NABIL", 1_150.0, Some(2.0))
        .await
        .expect("bikash tracker");

    // When: One subscriber is removed
    let registry: &dyn TrackerRegistry = warehouse.as_ref();
    assert!(registry.remove_subscriber(asha.id).await.expect("remove"));

    // Then: Only the other subscriber still has a job-worthy tracker
    let remaining = registry
        .subscribers_with_trackers()
        .await
        .expect("subscribers");
    assert_eq!(remaining, vec![bikash.clone()]);
    assert!(registry
        .trackers_by_subscriber(asha.id)
        .await
        .expect("trackers")
        .is_empty());
    let kept = service.list("1002").await.expect("list");
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].tolerance_pct, 2.0);
}

#[tokio::test(flavor = "multi_thread")]
async fn when_two_writers_race_on_alert_state_system_keeps_the_first() {
    // Given: A tracker that has never alerted
    let (_dir, warehouse) = open_temp();
    let store: &dyn InstrumentStore = &warehouse;
    let registry: &dyn TrackerRegistry = &warehouse;
    let ticker = Ticker::parse("NICA").expect("ticker");
    let instrument = store
        .register_instrument(&ticker, "NIC Asia Bank", "NICA")
        .await
        .expect("instrument");
    let subscriber = registry
        .register_subscriber("1001", "asha")
        .await
        .expect("subscriber");
    let tracker = registry
        .create_tracker(NewTracker::new(subscriber.id, instrument.id, 845.0, 1.0).expect("valid"))
        .await
        .expect("tracker");

    // When: Two evaluations both believe the tracker never alerted
    let first_at = trading_hours();
    let second_at = UtcDateTime::parse("2024-06-02T06:15:02Z").expect("timestamp");
    let first = registry
        .record_alert(tracker.id, None, first_at, Some(MessageRef(String::from("77"))))
        .await
        .expect("first write");
    let second = registry
        .record_alert(tracker.id, None, second_at, Some(MessageRef(String::from("78"))))
        .await
        .expect("second write");

    // Then: The second write is refused and the first state remains
    assert_eq!(first, AlertWrite::Applied);
    assert_eq!(second, AlertWrite::Conflict);
    let stored = registry
        .tracker(tracker.id)
        .await
        .expect("read")
        .expect("tracker");
    assert_eq!(stored.last_alert_at, Some(first_at));
    assert_eq!(stored.last_alert_message, Some(MessageRef(String::from("77"))));
}
