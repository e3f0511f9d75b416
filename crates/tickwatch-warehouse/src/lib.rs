//! # tickwatch Warehouse
//!
//! DuckDB-backed persistence for the tickwatch engine.
//!
//! ## Overview
//!
//! The warehouse stores the four entities the engine works with and nothing
//! else. Every write that touches more than one row runs inside an explicit
//! transaction, so readers never see half of a snapshot batch or a tracker
//! without its owner.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tickwatch_warehouse::{Warehouse, WarehouseConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open(WarehouseConfig::default())?;
//!     let instrument = warehouse.register_instrument(
//!         "NABIL",
//!         "Nabil Bank Limited",
//!         "NABIL",
//!         "2024-06-02T06:15:00Z",
//!     )?;
//!     println!("registered #{}", instrument.id);
//!     Ok(())
//! }
//! ```
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `instruments` | Instrument identity, unique by ticker |
//! | `snapshots` | Latest market snapshot, one row per instrument |
//! | `subscribers` | Alert recipients, unique by external id |
//! | `trackers` | Price alert rules and their last-alert state |
//! | `schema_migrations` | Applied migration versions |

pub mod duckdb;
pub mod migrations;
mod instruments;
mod records;
mod trackers;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::Connection;
use thiserror::Error;

pub use duckdb::{AccessMode, DuckDbConnectionManager, PooledConnection};
pub use records::{
    AlertWrite, InstrumentRecord, NewTrackerRecord, SnapshotRecord, SubscriberRecord,
    TrackerRecord,
};

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (file system operations).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A write referenced a row that does not exist.
    #[error("{entity} #{id} does not exist")]
    MissingReference { entity: &'static str, id: i64 },
}

/// Configuration for the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for tickwatch data.
    pub tickwatch_home: PathBuf,
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Maximum number of idle connections kept per access mode.
    pub max_pool_size: usize,
}

impl WarehouseConfig {
    /// Place the database under `home` using the default file layout.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        let tickwatch_home = home.into();
        let db_path = tickwatch_home.join("tickwatch.duckdb");
        Self {
            tickwatch_home,
            db_path,
            max_pool_size: 4,
        }
    }
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self::with_home(resolve_tickwatch_home())
    }
}

/// Persistence handle; cheap to clone, clones share one connection pool.
#[derive(Clone)]
pub struct Warehouse {
    config: WarehouseConfig,
    manager: DuckDbConnectionManager,
}

impl Warehouse {
    /// Open a warehouse with default configuration.
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    /// Open (creating if needed) the database and apply pending migrations.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let manager = DuckDbConnectionManager::new(config.db_path.clone(), config.max_pool_size);
        let warehouse = Self { config, manager };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    /// Apply pending schema migrations.
    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    /// Migration versions applied to this database.
    pub fn schema_versions(&self) -> Result<Vec<String>, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadOnly)?;
        Ok(migrations::applied_versions(&connection)?)
    }

    /// Get the path to the database file.
    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    /// Root directory holding the database.
    pub fn home(&self) -> &Path {
        self.config.tickwatch_home.as_path()
    }

    pub(crate) fn connection(&self, mode: AccessMode) -> Result<PooledConnection, WarehouseError> {
        Ok(self.manager.acquire(mode)?)
    }

    /// Run `work` inside a transaction, committing on success.
    pub(crate) fn transaction<T>(
        &self,
        work: impl FnOnce(&Connection) -> Result<T, WarehouseError>,
    ) -> Result<T, WarehouseError> {
        let connection = self.connection(AccessMode::ReadWrite)?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = work(&connection);
        finalize_transaction(&connection, result)
    }
}

/// Finalize a transaction, committing on success or rolling back on failure.
fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

/// Resolve the tickwatch home directory from environment or default.
fn resolve_tickwatch_home() -> PathBuf {
    if let Some(path) = env::var_os("TICKWATCH_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".tickwatch");
    }

    PathBuf::from(".tickwatch")
}


#[cfg(test)]
mod tests {
    use super::test_support::open_temp;
    use super::*;

    #[test]
    fn applies_every_migration_once() {
        let (_temp, warehouse) = open_temp();
        warehouse.initialize().expect("second initialize is a no-op");

        let versions = warehouse.schema_versions().expect("versions");
        assert_eq!(
            versions,
            vec![
                String::from("0001_instruments_and_snapshots"),
                String::from("0002_subscribers_and_trackers"),
            ]
        );
    }

    #[test]
    fn reopening_keeps_existing_rows() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = WarehouseConfig::with_home(temp.path().join("home"));

        {
            let warehouse = Warehouse::open(config.clone()).expect("open");
            warehouse
                .register_instrument("NABIL", "Nabil Bank", "NABIL", "2024-06-02T06:15:00Z")
                .expect("register");
        }

        let reopened = Warehouse::open(config).expect("reopen");
        let found = reopened
            .instrument_by_ticker("NABIL")
            .expect("lookup")
            .expect("row survives reopen");
        assert_eq!(found.name, "Nabil Bank");
    }
}
