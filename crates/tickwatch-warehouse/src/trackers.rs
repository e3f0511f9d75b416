use ::duckdb::{Connection, Row, ToSql};

use crate::instruments::ensure_instrument;
use crate::{
    AccessMode, AlertWrite, NewTrackerRecord, SubscriberRecord, TrackerRecord, Warehouse,
    WarehouseError,
};

const SUBSCRIBER_COLUMNS: &str = "id, external_id, name, created_at";

const TRACKER_COLUMNS: &str = "id, subscriber_id, instrument_id, target_price, tolerance_pct, \
     last_alert_at, last_alert_message, created_at";

impl Warehouse {
    /// Register a subscriber, returning the existing row for a known external id.
    pub fn register_subscriber(
        &self,
        external_id: &str,
        name: &str,
        created_at: &str,
    ) -> Result<SubscriberRecord, WarehouseError> {
        self.transaction(|connection| {
            if let Some(existing) = find_subscriber(connection, "external_id = ?", &external_id)? {
                return Ok(existing);
            }

            let params: [&dyn ToSql; 3] = [&external_id, &name, &created_at];
            let id: i64 = connection.query_row(
                "INSERT INTO subscribers (external_id, name, created_at) \
                 VALUES (?, ?, ?) RETURNING id",
                params.as_slice(),
                |row| row.get(0),
            )?;

            Ok(SubscriberRecord {
                id,
                external_id: external_id.to_owned(),
                name: name.to_owned(),
                created_at: created_at.to_owned(),
            })
        })
    }

    pub fn subscriber_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<SubscriberRecord>, WarehouseError> {
        let connection = self.connection(AccessMode::ReadOnly)?;
        find_subscriber(&connection, "external_id = ?", &external_id)
    }

    pub fn subscriber_by_id(&self, id: i64) -> Result<Option<SubscriberRecord>, WarehouseError> {
        let connection = self.connection(AccessMode::ReadOnly)?;
        find_subscriber(&connection, "id = ?", &id)
    }

    /// Delete a subscriber and every tracker it owns.
    pub fn remove_subscriber(&self, id: i64) -> Result<bool, WarehouseError> {
        self.transaction(|connection| {
            let params: [&dyn ToSql; 1] = [&id];
            connection.execute(
                "DELETE FROM trackers WHERE subscriber_id = ?",
                params.as_slice(),
            )?;
            let removed =
                connection.execute("DELETE FROM subscribers WHERE id = ?", params.as_slice())?;
            Ok(removed > 0)
        })
    }

    /// Subscribers owning at least one tracker, ordered by id.
    pub fn subscribers_with_trackers(&self) -> Result<Vec<SubscriberRecord>, WarehouseError> {
        let connection = self.connection(AccessMode::ReadOnly)?;
        let sql = format!(
            "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers \
             WHERE id IN (SELECT subscriber_id FROM trackers) ORDER BY id"
        );
        let mut statement = connection.prepare(&sql)?;
        let rows = statement
            .query_map([], read_subscriber)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Create a tracker after checking both of its references in the same
    /// transaction.
    pub fn create_tracker(&self, new: &NewTrackerRecord) -> Result<TrackerRecord, WarehouseError> {
        self.transaction(|connection| {
            ensure_subscriber(connection, new.subscriber_id)?;
            ensure_instrument(connection, new.instrument_id)?;

            let params: [&dyn ToSql; 5] = [
                &new.subscriber_id,
                &new.instrument_id,
                &new.target_price,
                &new.tolerance_pct,
                &new.created_at,
            ];
            let id: i64 = connection.query_row(
                "INSERT INTO trackers \
                 (subscriber_id, instrument_id, target_price, tolerance_pct, created_at) \
                 VALUES (?, ?, ?, ?, ?) RETURNING id",
                params.as_slice(),
                |row| row.get(0),
            )?;

            Ok(TrackerRecord {
                id,
                subscriber_id: new.subscriber_id,
                instrument_id: new.instrument_id,
                target_price: new.target_price,
                tolerance_pct: new.tolerance_pct,
                last_alert_at: None,
                last_alert_message: None,
                created_at: new.created_at.clone(),
            })
        })
    }

    pub fn tracker(&self, id: i64) -> Result<Option<TrackerRecord>, WarehouseError> {
        let connection = self.connection(AccessMode::ReadOnly)?;
        let sql = format!("SELECT {TRACKER_COLUMNS} FROM trackers WHERE id = ?");
        let params: [&dyn ToSql; 1] = [&id];
        let mut statement = connection.prepare(&sql)?;
        let mut rows = statement
            .query_map(params.as_slice(), read_tracker)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows.pop())
    }

    /// Trackers of one subscriber in creation order.
    pub fn trackers_by_subscriber(
        &self,
        subscriber_id: i64,
    ) -> Result<Vec<TrackerRecord>, WarehouseError> {
        let connection = self.connection(AccessMode::ReadOnly)?;
        let sql = format!(
            "SELECT {TRACKER_COLUMNS} FROM trackers WHERE subscriber_id = ? ORDER BY id"
        );
        let params: [&dyn ToSql; 1] = [&subscriber_id];
        let mut statement = connection.prepare(&sql)?;
        let rows = statement
            .query_map(params.as_slice(), read_tracker)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn remove_tracker(&self, id: i64) -> Result<bool, WarehouseError> {
        let connection = self.connection(AccessMode::ReadWrite)?;
        let params: [&dyn ToSql; 1] = [&id];
        let removed = connection.execute("DELETE FROM trackers WHERE id = ?", params.as_slice())?;
        Ok(removed > 0)
    }

    /// Record an alert only if the stored `last_alert_at` still equals
    /// `expected_last_alert_at`.
    pub fn record_alert(
        &self,
        id: i64,
        expected_last_alert_at: Option<&str>,
        alerted_at: &str,
        message: Option<&str>,
    ) -> Result<AlertWrite, WarehouseError> {
        self.transaction(|connection| {
            let params: [&dyn ToSql; 4] = [&alerted_at, &message, &id, &expected_last_alert_at];
            let changed = connection.execute(
                "UPDATE trackers SET last_alert_at = ?, last_alert_message = ? \
                 WHERE id = ? AND last_alert_at IS NOT DISTINCT FROM CAST(? AS TEXT)",
                params.as_slice(),
            )?;
            if changed > 0 {
                return Ok(AlertWrite::Applied);
            }

            let params: [&dyn ToSql; 1] = [&id];
            let exists: i64 = connection.query_row(
                "SELECT COUNT(*) FROM trackers WHERE id = ?",
                params.as_slice(),
                |row| row.get(0),
            )?;
            Ok(if exists == 0 {
                AlertWrite::Missing
            } else {
                AlertWrite::Conflict
            })
        })
    }
}

fn find_subscriber(
    connection: &Connection,
    predicate: &str,
    value: &dyn ToSql,
) -> Result<Option<SubscriberRecord>, WarehouseError> {
    let sql = format!("SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE {predicate}");
    let params: [&dyn ToSql; 1] = [value];
    let mut statement = connection.prepare(&sql)?;
    let mut rows = statement
        .query_map(params.as_slice(), read_subscriber)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows.pop())
}

fn ensure_subscriber(connection: &Connection, id: i64) -> Result<(), WarehouseError> {
    let params: [&dyn ToSql; 1] = [&id];
    let count: i64 = connection.query_row(
        "SELECT COUNT(*) FROM subscribers WHERE id = ?",
        params.as_slice(),
        |row| row.get(0),
    )?;
    if count == 0 {
        return Err(WarehouseError::MissingReference {
            entity: "subscriber",
            id,
        });
    }
    Ok(())
}

fn read_subscriber(row: &Row<'_>) -> Result<SubscriberRecord, ::duckdb::Error> {
    Ok(SubscriberRecord {
        id: row.get(0)?,
        external_id: row.get(1)?,
        name: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn read_tracker(row: &Row<'_>) -> Result<TrackerRecord, ::duckdb::Error> {
    Ok(TrackerRecord {
        id: row.get(0)?,
        subscriber_id: row.get(1)?,
        instrument_id: row.get(2)?,
        target_price: row.get(3)?,
        tolerance_pct: row.get(4)?,
        last_alert_at: row.get(5)?,
        last_alert_message: row.get(6)?,
        created_at: row.get(7)?,
    })
}
