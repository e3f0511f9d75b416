use ::duckdb::{Connection, Row, ToSql};

use crate::{AccessMode, InstrumentRecord, SnapshotRecord, Warehouse, WarehouseError};

const INSTRUMENT_COLUMNS: &str = "id, ticker, name, locator, created_at";

const SNAPSHOT_COLUMNS: &str = "instrument_id, last_traded_price, previous_close, open_price, \
     close_price, total_traded_quantity, total_trades, high_price, low_price, week_52_high, \
     week_52_low, total_listed_shares, total_paid_up_value, market_capitalization, \
     instrument_type, listing_date, updated_at";

impl Warehouse {
    /// Register an instrument, returning the existing row when the ticker is
    /// already known.
    pub fn register_instrument(
        &self,
        ticker: &str,
        name: &str,
        locator: &str,
        created_at: &str,
    ) -> Result<InstrumentRecord, WarehouseError> {
        self.transaction(|connection| {
            if let Some(existing) = find_instrument(connection, "ticker = ?", &ticker)? {
                return Ok(existing);
            }

            let params: [&dyn ToSql; 4] = [&ticker, &name, &locator, &created_at];
            let id: i64 = connection.query_row(
                "INSERT INTO instruments (ticker, name, locator, created_at) \
                 VALUES (?, ?, ?, ?) RETURNING id",
                params.as_slice(),
                |row| row.get(0),
            )?;

            Ok(InstrumentRecord {
                id,
                ticker: ticker.to_owned(),
                name: name.to_owned(),
                locator: locator.to_owned(),
                created_at: created_at.to_owned(),
            })
        })
    }

    pub fn instrument_by_ticker(
        &self,
        ticker: &str,
    ) -> Result<Option<InstrumentRecord>, WarehouseError> {
        let connection = self.connection(AccessMode::ReadOnly)?;
        find_instrument(&connection, "ticker = ?", &ticker)
    }

    pub fn instrument_by_id(&self, id: i64) -> Result<Option<InstrumentRecord>, WarehouseError> {
        let connection = self.connection(AccessMode::ReadOnly)?;
        find_instrument(&connection, "id = ?", &id)
    }

    /// All instruments ordered by ticker.
    pub fn list_instruments(&self) -> Result<Vec<InstrumentRecord>, WarehouseError> {
        let connection = self.connection(AccessMode::ReadOnly)?;
        let sql = format!("SELECT {INSTRUMENT_COLUMNS} FROM instruments ORDER BY ticker");
        let mut statement = connection.prepare(&sql)?;
        let rows = statement
            .query_map([], read_instrument)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Instruments referenced by at least one tracker, ordered by ticker.
    pub fn tracked_instruments(&self) -> Result<Vec<InstrumentRecord>, WarehouseError> {
        let connection = self.connection(AccessMode::ReadOnly)?;
        let sql = format!(
            "SELECT {INSTRUMENT_COLUMNS} FROM instruments \
             WHERE id IN (SELECT instrument_id FROM trackers) ORDER BY ticker"
        );
        let mut statement = connection.prepare(&sql)?;
        let rows = statement
            .query_map([], read_instrument)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Change the display name. Returns `false` when the instrument is unknown.
    pub fn rename_instrument(&self, id: i64, name: &str) -> Result<bool, WarehouseError> {
        let connection = self.connection(AccessMode::ReadWrite)?;
        let params: [&dyn ToSql; 2] = [&name, &id];
        let changed = connection.execute(
            "UPDATE instruments SET name = ? WHERE id = ?",
            params.as_slice(),
        )?;
        Ok(changed > 0)
    }

    /// Delete an instrument together with its snapshot and trackers.
    pub fn remove_instrument(&self, id: i64) -> Result<bool, WarehouseError> {
        self.transaction(|connection| {
            let params: [&dyn ToSql; 1] = [&id];
            connection.execute(
                "DELETE FROM trackers WHERE instrument_id = ?",
                params.as_slice(),
            )?;
            connection.execute(
                "DELETE FROM snapshots WHERE instrument_id = ?",
                params.as_slice(),
            )?;
            let removed = connection.execute("DELETE FROM instruments WHERE id = ?", params.as_slice())?;
            Ok(removed > 0)
        })
    }

    pub fn snapshot(&self, instrument_id: i64) -> Result<Option<SnapshotRecord>, WarehouseError> {
        let connection = self.connection(AccessMode::ReadOnly)?;
        let sql = format!("SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE instrument_id = ?");
        let params: [&dyn ToSql; 1] = [&instrument_id];
        let mut statement = connection.prepare(&sql)?;
        let mut rows = statement
            .query_map(params.as_slice(), read_snapshot)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows.pop())
    }

    /// Replace the snapshots of every instrument in `rows` in one transaction.
    ///
    /// Either the whole batch becomes visible or none of it does.
    pub fn replace_snapshots(&self, rows: &[SnapshotRecord]) -> Result<(), WarehouseError> {
        if rows.is_empty() {
            return Ok(());
        }

        self.transaction(|connection| {
            for row in rows {
                ensure_instrument(connection, row.instrument_id)?;
                let params: [&dyn ToSql; 17] = [
                    &row.instrument_id,
                    &row.last_traded_price,
                    &row.previous_close,
                    &row.open_price,
                    &row.close_price,
                    &row.total_traded_quantity,
                    &row.total_trades,
                    &row.high_price,
                    &row.low_price,
                    &row.week_52_high,
                    &row.week_52_low,
                    &row.total_listed_shares,
                    &row.total_paid_up_value,
                    &row.market_capitalization,
                    &row.instrument_type,
                    &row.listing_date,
                    &row.updated_at,
                ];
                let sql = format!(
                    "INSERT OR REPLACE INTO snapshots ({SNAPSHOT_COLUMNS}) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
                );
                connection.execute(&sql, params.as_slice())?;
            }
            Ok(())
        })
    }
}

fn find_instrument(
    connection: &Connection,
    predicate: &str,
    value: &dyn ToSql,
) -> Result<Option<InstrumentRecord>, WarehouseError> {
    let sql = format!("SELECT {INSTRUMENT_COLUMNS} FROM instruments WHERE {predicate}");
    let params: [&dyn ToSql; 1] = [value];
    let mut statement = connection.prepare(&sql)?;
    let mut rows = statement
        .query_map(params.as_slice(), read_instrument)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows.pop())
}

pub(crate) fn ensure_instrument(connection: &Connection, id: i64) -> Result<(), WarehouseError> {
    let params: [&dyn ToSql; 1] = [&id];
    let count: i64 = connection.query_row(
        "SELECT COUNT(*) FROM instruments WHERE id = ?",
        params.as_slice(),
        |row| row.get(0),
    )?;
    if count == 0 {
        return Err(WarehouseError::MissingReference {
            entity: "instrument",
            id,
        });
    }
    Ok(())
}

fn read_instrument(row: &Row<'_>) -> Result<InstrumentRecord, ::duckdb::Error> {
    Ok(InstrumentRecord {
        id: row.get(0)?,
        ticker: row.get(1)?,
        name: row.get(2)?,
        locator: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn read_snapshot(row: &Row<'_>) -> Result<SnapshotRecord, ::duckdb::Error> {
    Ok(SnapshotRecord {
        instrument_id: row.get(0)?,
        last_traded_price: row.get(1)?,
        previous_close: row.get(2)?,
        open_price: row.get(3)?,
        close_price: row.get(4)?,
        total_traded_quantity: row.get(5)?,
        total_trades: row.get(6)?,
        high_price: row.get(7)?,
        low_price: row.get(8)?,
        week_52_high: row.get(9)?,
        week_52_low: row.get(10)?,
        total_listed_shares: row.get(11)?,
        total_paid_up_value: row.get(12)?,
        market_capitalization: row.get(13)?,
        instrument_type: row.get(14)?,
        listing_date: row.get(15)?,
        updated_at: row.get(16)?,
    })
}
