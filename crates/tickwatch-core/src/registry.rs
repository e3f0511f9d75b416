//! Tracker management on top of the raw registry contract.
//!
//! [`TrackerService`] is what callers outside the engine talk to: it checks
//! tracker parameters before anything is persisted and turns dangling
//! references into [`CoreError::NotFound`].

use std::sync::Arc;

use tracing::info;

use crate::store::{InstrumentStore, StoreError, TrackerRegistry};
use crate::{
    CoreError, Instrument, InstrumentId, NewTracker, Subscriber, SubscriberId, Ticker, Tracker,
    TrackerId, ValidationError, DEFAULT_TOLERANCE_PCT,
};

#[derive(Clone)]
pub struct TrackerService {
    registry: Arc<dyn TrackerRegistry>,
    instruments: Arc<dyn InstrumentStore>,
}

impl TrackerService {
    pub fn new(registry: Arc<dyn TrackerRegistry>, instruments: Arc<dyn InstrumentStore>) -> Self {
        Self {
            registry,
            instruments,
        }
    }

    /// Register an instrument by ticker; re-registering returns the stored row.
    pub async fn register_instrument(
        &self,
        ticker: &str,
        locator: &str,
        name: Option<&str>,
    ) -> Result<Instrument, CoreError> {
        let ticker = Ticker::parse(ticker)?;
        let locator = locator.trim();
        if locator.is_empty() {
            return Err(ValidationError::EmptyLocator.into());
        }
        let name = name.unwrap_or(ticker.as_str());
        let instrument = self
            .instruments
            .register_instrument(&ticker, name, locator)
            .await?;
        info!(ticker = %instrument.ticker, instrument_id = %instrument.id, "instrument registered");
        Ok(instrument)
    }

    pub async fn instrument(&self, ticker: &str) -> Result<Instrument, CoreError> {
        let ticker = Ticker::parse(ticker)?;
        self.instruments
            .instrument_by_ticker(&ticker)
            .await?
            .ok_or_else(|| CoreError::not_found("instrument", &ticker))
    }

    pub async fn register_subscriber(
        &self,
        external_id: &str,
        name: &str,
    ) -> Result<Subscriber, CoreError> {
        let external_id = external_id.trim();
        if external_id.is_empty() {
            return Err(CoreError::invalid_input("external_id", "cannot be empty"));
        }
        let subscriber = self.registry.register_subscriber(external_id, name).await?;
        info!(subscriber_id = %subscriber.id, "subscriber registered");
        Ok(subscriber)
    }

    pub async fn subscriber(&self, external_id: &str) -> Result<Subscriber, CoreError> {
        self.registry
            .subscriber_by_external_id(external_id)
            .await?
            .ok_or_else(|| CoreError::not_found("subscriber", external_id))
    }

    /// Validate and persist a tracker.
    ///
    /// Fails with [`CoreError::InvalidInput`] before touching the store when
    /// the target or tolerance is out of range, and with
    /// [`CoreError::NotFound`] when either reference is unknown.
    pub async fn create(
        &self,
        subscriber_id: SubscriberId,
        instrument_id: InstrumentId,
        target_price: f64,
        tolerance_pct: f64,
    ) -> Result<Tracker, CoreError> {
        let new = NewTracker::new(subscriber_id, instrument_id, target_price, tolerance_pct)?;
        let tracker = self
            .registry
            .create_tracker(new)
            .await
            .map_err(|error| match error {
                StoreError::MissingReference { entity, id } => CoreError::not_found(entity, id),
                other => CoreError::Store(other),
            })?;
        info!(
            tracker_id = %tracker.id,
            subscriber_id = %tracker.subscriber_id,
            instrument_id = %tracker.instrument_id,
            target_price = tracker.target_price,
            "tracker created"
        );
        Ok(tracker)
    }

    /// Create a tracker addressed by external subscriber id and ticker.
    pub async fn add_tracker(
        &self,
        external_id: &str,
        ticker: &str,
        target_price: f64,
        tolerance_pct: Option<f64>,
    ) -> Result<Tracker, CoreError> {
        let subscriber = self.subscriber(external_id).await?;
        let instrument = self.instrument(ticker).await?;
        self.create(
            subscriber.id,
            instrument.id,
            target_price,
            tolerance_pct.unwrap_or(DEFAULT_TOLERANCE_PCT),
        )
        .await
    }

    /// Trackers of a subscriber in creation order.
    pub async fn list(&self, external_id: &str) -> Result<Vec<Tracker>, CoreError> {
        let subscriber = self.subscriber(external_id).await?;
        Ok(self.registry.trackers_by_subscriber(subscriber.id).await?)
    }

    pub async fn remove(&self, id: TrackerId) -> Result<(), CoreError> {
        if self.registry.remove_tracker(id).await? {
            info!(tracker_id = %id, "tracker removed");
            Ok(())
        } else {
            Err(CoreError::not_found("tracker", id))
        }
    }

    /// Subscribers that currently own at least one tracker.
    pub async fn active_subscribers(&self) -> Result<Vec<Subscriber>, CoreError> {
        Ok(self.registry.subscribers_with_trackers().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    fn service() -> (MemoryStore, TrackerService) {
        let store = MemoryStore::new();
        let service = TrackerService::new(Arc::new(store.clone()), Arc::new(store.clone()));
        (store, service)
    }

    #[tokio::test]
    async fn invalid_parameters_are_never_persisted() {
        let (store, service) = service();
        let instrument = service
            .register_instrument("nabil", "NABIL", None)
            .await
            .expect("instrument");
        let subscriber = service
            .register_subscriber("1001", "asha")
            .await
            .expect("subscriber");

        let zero_target = service.create(subscriber.id, instrument.id, 0.0, 1.0).await;
        let negative_tolerance = service.create(subscriber.id, instrument.id, 10.0, -1.0).await;

        assert!(matches!(zero_target, Err(CoreError::InvalidInput { field: "target_price", .. })));
        assert!(matches!(
            negative_tolerance,
            Err(CoreError::InvalidInput { field: "tolerance_pct", .. })
        ));
        assert!(store
            .trackers_by_subscriber(subscriber.id)
            .await
            .expect("list")
            .is_empty());
    }

    #[tokio::test]
    async fn unknown_references_are_not_found() {
        let (_store, service) = service();
        let subscriber = service
            .register_subscriber("1001", "asha")
            .await
            .expect("subscriber");

        let error = service
            .create(subscriber.id, InstrumentId(77), 100.0, 1.0)
            .await
            .expect_err("dangling instrument");
        let by_ticker = service
            .add_tracker("1001", "UNKNOWN", 100.0, None)
            .await
            .expect_err("unknown ticker");

        assert_eq!(error.code(), "not_found");
        assert!(matches!(by_ticker, CoreError::NotFound { entity: "instrument", .. }));
    }

    #[tokio::test]
    async fn add_tracker_uses_default_tolerance_and_lists_in_order() {
        let (_store, service) = service();
        service
            .register_instrument("NABIL", "NABIL", Some("Nabil Bank"))
            .await
            .expect("instrument");
        service
            .register_instrument("HIDCL", "HIDCL", None)
            .await
            .expect("instrument");
        service
            .register_subscriber("1001", "asha")
            .await
            .expect("subscriber");

        let first = service
            .add_tracker("1001", "NABIL", 1_200.0, None)
            .await
            .expect("tracker");
        let second = service
            .add_tracker("1001", "HIDCL", 250.0, Some(2.0))
            .await
            .expect("tracker");

        assert_eq!(first.tolerance_pct, DEFAULT_TOLERANCE_PCT);
        let listed = service.list("1001").await.expect("list");
        assert_eq!(
            listed.iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![first.id, second.id]
        );

        service.remove(first.id).await.expect("remove");
        assert!(matches!(
            service.remove(first.id).await,
            Err(CoreError::NotFound { entity: "tracker", .. })
        ));
    }

    #[tokio::test]
    async fn empty_locator_is_rejected() {
        let (_store, service) = service();

        let error = service
            .register_instrument("NABIL", "  ", None)
            .await
            .expect_err("empty locator");

        assert!(matches!(error, CoreError::Validation(ValidationError::EmptyLocator)));
    }
}
