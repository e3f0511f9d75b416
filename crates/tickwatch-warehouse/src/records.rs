//! Plain row types exchanged with the warehouse.
//!
//! Timestamps travel as RFC3339 strings and counts as `i64`; conversion to
//! validated domain types happens in `tickwatch-core`.

use serde::Serialize;

/// A registered instrument row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstrumentRecord {
    pub id: i64,
    /// Uppercase exchange ticker (e.g., "NABIL").
    pub ticker: String,
    pub name: String,
    /// Source locator handed to the fetch adapter.
    pub locator: String,
    pub created_at: String,
}

/// Latest market snapshot of one instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotRecord {
    pub instrument_id: i64,
    pub last_traded_price: f64,
    pub previous_close: f64,
    pub open_price: f64,
    pub close_price: f64,
    pub total_traded_quantity: i64,
    pub total_trades: i64,
    pub high_price: f64,
    pub low_price: f64,
    pub week_52_high: Option<f64>,
    pub week_52_low: Option<f64>,
    pub total_listed_shares: Option<i64>,
    pub total_paid_up_value: Option<f64>,
    pub market_capitalization: Option<f64>,
    pub instrument_type: Option<String>,
    pub listing_date: Option<String>,
    pub updated_at: String,
}

/// A subscriber row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriberRecord {
    pub id: i64,
    /// Chat or account id on the notification channel.
    pub external_id: String,
    pub name: String,
    pub created_at: String,
}

/// A price tracker row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerRecord {
    pub id: i64,
    pub subscriber_id: i64,
    pub instrument_id: i64,
    pub target_price: f64,
    pub tolerance_pct: f64,
    pub last_alert_at: Option<String>,
    /// Opaque notifier handle of the last alert message.
    pub last_alert_message: Option<String>,
    pub created_at: String,
}

/// Tracker fields supplied at creation.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrackerRecord {
    pub subscriber_id: i64,
    pub instrument_id: i64,
    pub target_price: f64,
    pub tolerance_pct: f64,
    pub created_at: String,
}

/// Outcome of a compare-and-set alert write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertWrite {
    /// The expected prior timestamp matched and the row was updated.
    Applied,
    /// Another writer recorded an alert first.
    Conflict,
    /// The tracker no longer exists.
    Missing,
}
