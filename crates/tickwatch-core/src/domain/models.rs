use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{CoreError, Ticker, UtcDateTime, ValidationError};

/// Tolerance used when a tracker is created without one, in percent.
pub const DEFAULT_TOLERANCE_PCT: f64 = 0.5;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Store-assigned instrument identity.
    InstrumentId
);
entity_id!(
    /// Store-assigned subscriber identity.
    SubscriberId
);
entity_id!(
    /// Store-assigned tracker identity.
    TrackerId
);

/// Tradable instrument. Only the display name may change after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub id: InstrumentId,
    pub ticker: Ticker,
    pub name: String,
    /// Opaque address understood by the fetch adapter.
    pub locator: String,
}

/// Latest market data for one instrument, always replaced as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub last_traded_price: f64,
    pub previous_close: f64,
    pub open_price: f64,
    pub close_price: f64,
    pub total_traded_quantity: u64,
    pub total_trades: u64,
    pub high_price: f64,
    pub low_price: f64,
    /// Absent for new listings without a year of trading.
    pub week_52_high: Option<f64>,
    pub week_52_low: Option<f64>,
    pub total_listed_shares: Option<u64>,
    pub total_paid_up_value: Option<f64>,
    pub market_capitalization: Option<f64>,
    pub instrument_type: Option<String>,
    pub listing_date: Option<String>,
    pub updated_at: UtcDateTime,
}

impl MarketSnapshot {
    /// Check numeric invariants: finite, non-negative, and a strictly positive
    /// last price and share count.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_positive("last_traded_price", self.last_traded_price)?;
        for (field, value) in [
            ("previous_close", self.previous_close),
            ("open_price", self.open_price),
            ("close_price", self.close_price),
            ("high_price", self.high_price),
            ("low_price", self.low_price),
        ] {
            validate_non_negative(field, value)?;
        }
        validate_optional_non_negative("week_52_high", self.week_52_high)?;
        validate_optional_non_negative("week_52_low", self.week_52_low)?;
        validate_optional_non_negative("total_paid_up_value", self.total_paid_up_value)?;
        validate_optional_non_negative("market_capitalization", self.market_capitalization)?;
        if self.total_listed_shares == Some(0) {
            return Err(ValidationError::NonPositiveValue {
                field: "total_listed_shares",
            });
        }
        Ok(())
    }

    /// Age of the snapshot at `now`.
    pub fn age(&self, now: UtcDateTime) -> Duration {
        now.saturating_since(self.updated_at)
    }
}

/// True when `snapshot` is absent or at least `threshold` old.
pub fn is_stale(snapshot: Option<&MarketSnapshot>, threshold: Duration, now: UtcDateTime) -> bool {
    match snapshot {
        Some(snapshot) => snapshot.age(now) >= threshold,
        None => true,
    }
}

/// Alert recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: SubscriberId,
    /// Chat or account id on the notification channel.
    pub external_id: String,
    pub name: String,
    pub created_at: UtcDateTime,
}

/// Opaque handle of a delivered message, used to replace or delete it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageRef(pub String);

impl MessageRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for MessageRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Price alert rule owned by one subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tracker {
    pub id: TrackerId,
    pub subscriber_id: SubscriberId,
    pub instrument_id: InstrumentId,
    pub target_price: f64,
    pub tolerance_pct: f64,
    pub last_alert_at: Option<UtcDateTime>,
    pub last_alert_message: Option<MessageRef>,
    pub created_at: UtcDateTime,
}

/// Validated tracker parameters, ready to be persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewTracker {
    pub subscriber_id: SubscriberId,
    pub instrument_id: InstrumentId,
    pub target_price: f64,
    pub tolerance_pct: f64,
}

impl NewTracker {
    pub fn new(
        subscriber_id: SubscriberId,
        instrument_id: InstrumentId,
        target_price: f64,
        tolerance_pct: f64,
    ) -> Result<Self, CoreError> {
        if !target_price.is_finite() || target_price <= 0.0 {
            return Err(CoreError::invalid_input(
                "target_price",
                format!("must be a positive number, got {target_price}"),
            ));
        }
        if !tolerance_pct.is_finite() || tolerance_pct < 0.0 {
            return Err(CoreError::invalid_input(
                "tolerance_pct",
                format!("must be zero or a positive percentage, got {tolerance_pct}"),
            ));
        }

        Ok(Self {
            subscriber_id,
            instrument_id,
            target_price,
            tolerance_pct,
        })
    }

    pub fn with_default_tolerance(
        subscriber_id: SubscriberId,
        instrument_id: InstrumentId,
        target_price: f64,
    ) -> Result<Self, CoreError> {
        Self::new(
            subscriber_id,
            instrument_id,
            target_price,
            DEFAULT_TOLERANCE_PCT,
        )
    }
}

fn validate_non_negative(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    if value < 0.0 {
        return Err(ValidationError::NegativeValue { field });
    }
    Ok(())
}

fn validate_positive(field: &'static str, value: f64) -> Result<(), ValidationError> {
    validate_non_negative(field, value)?;
    if value == 0.0 {
        return Err(ValidationError::NonPositiveValue { field });
    }
    Ok(())
}

fn validate_optional_non_negative(
    field: &'static str,
    value: Option<f64>,
) -> Result<(), ValidationError> {
    match value {
        Some(value) => validate_non_negative(field, value),
        None => Ok(()),
    }
}

#[cfg(test)]
pub(crate) fn sample_snapshot(last_traded_price: f64, updated_at: UtcDateTime) -> MarketSnapshot {
    MarketSnapshot {
        last_traded_price,
        previous_close: 1_180.0,
        open_price: 1_185.0,
        close_price: last_traded_price,
        total_traded_quantity: 12_500,
        total_trades: 340,
        high_price: 1_215.0,
        low_price: 1_170.0,
        week_52_high: Some(1_420.0),
        week_52_low: Some(980.0),
        total_listed_shares: Some(270_585_862),
        total_paid_up_value: None,
        market_capitalization: None,
        instrument_type: None,
        listing_date: None,
        updated_at,
    }
}
