//! # Domain Models
//!
//! Canonical types shared by the store, pipeline, scheduler and evaluator.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Instrument`] | Ticker, display name and source locator |
//! | [`MarketSnapshot`] | Latest prices and volumes, replaced wholesale |
//! | [`Subscriber`] | Alert recipient |
//! | [`Tracker`] | Target price rule with last-alert state |
//! | [`Ticker`] | Validated exchange ticker |
//! | [`UtcDateTime`] | UTC timestamp |
//!
//! Validation happens at construction ([`Ticker::parse`], [`NewTracker::new`])
//! or, for fetched data, in [`MarketSnapshot::validate`].

mod models;
mod ticker;
mod timestamp;

#[cfg(test)]
pub(crate) use models::sample_snapshot;
pub use models::{
    is_stale, Instrument, InstrumentId, MarketSnapshot, MessageRef, NewTracker, Subscriber,
    SubscriberId, Tracker, TrackerId, DEFAULT_TOLERANCE_PCT,
};
pub use ticker::Ticker;
pub use timestamp::UtcDateTime;
