use ::duckdb::{Connection, ToSql};

struct Migration {
    version: &'static str,
    sql: &'static str,
}

// Referential integrity and cascades are enforced by the write paths in
// transactions; DuckDB foreign keys cannot cascade.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_instruments_and_snapshots",
        sql: r#"
CREATE SEQUENCE IF NOT EXISTS instruments_id_seq START 1;

CREATE TABLE IF NOT EXISTS instruments (
    id BIGINT PRIMARY KEY DEFAULT nextval('instruments_id_seq'),
    ticker TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    locator TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS snapshots (
    instrument_id BIGINT PRIMARY KEY,
    last_traded_price DOUBLE NOT NULL,
    previous_close DOUBLE NOT NULL,
    open_price DOUBLE NOT NULL,
    close_price DOUBLE NOT NULL,
    total_traded_quantity BIGINT NOT NULL,
    total_trades BIGINT NOT NULL,
    high_price DOUBLE NOT NULL,
    low_price DOUBLE NOT NULL,
    week_52_high DOUBLE,
    week_52_low DOUBLE,
    total_listed_shares BIGINT,
    total_paid_up_value DOUBLE,
    market_capitalization DOUBLE,
    instrument_type TEXT,
    listing_date TEXT,
    updated_at TEXT NOT NULL
);
"#,
    },
    Migration {
        version: "0002_subscribers_and_trackers",
        sql: r#"
CREATE SEQUENCE IF NOT EXISTS subscribers_id_seq START 1;
CREATE SEQUENCE IF NOT EXISTS trackers_id_seq START 1;

CREATE TABLE IF NOT EXISTS subscribers (
    id BIGINT PRIMARY KEY DEFAULT nextval('subscribers_id_seq'),
    external_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS trackers (
    id BIGINT PRIMARY KEY DEFAULT nextval('trackers_id_seq'),
    subscriber_id BIGINT NOT NULL,
    instrument_id BIGINT NOT NULL,
    target_price DOUBLE NOT NULL,
    tolerance_pct DOUBLE NOT NULL,
    last_alert_at TEXT,
    last_alert_message TEXT,
    created_at TEXT NOT NULL
);
"#,
    },
];

pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let params: [&dyn ToSql; 1] = [&migration.version];
        let applied: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            params.as_slice(),
            |row| row.get(0),
        )?;

        if applied == 0 {
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                params.as_slice(),
            )?;
        }
    }

    Ok(())
}

/// Versions recorded in `schema_migrations`, oldest first.
pub fn applied_versions(connection: &Connection) -> Result<Vec<String>, ::duckdb::Error> {
    let mut statement =
        connection.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let versions = statement
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(versions)
}
