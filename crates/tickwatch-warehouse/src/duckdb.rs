//! `DuckDB` connection pool management.
//!
//! DuckDB allows a single database instance per file and process, so the
//! pool opens the file once and hands out clones of that root connection,
//! recycling them on drop instead of cloning for every store call.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ::duckdb::Connection;

/// Access mode for database connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Lookups only (snapshots, tracker listings).
    ReadOnly,
    /// Registrations, snapshot replacement and alert recording.
    ReadWrite,
}

#[derive(Default)]
struct Idle {
    read_only: Vec<Connection>,
    read_write: Vec<Connection>,
}

impl Idle {
    fn bucket(&mut self, mode: AccessMode) -> &mut Vec<Connection> {
        match mode {
            AccessMode::ReadOnly => &mut self.read_only,
            AccessMode::ReadWrite => &mut self.read_write,
        }
    }
}

struct PoolInner {
    db_path: PathBuf,
    max_idle: usize,
    idle: Mutex<Idle>,
    root: Mutex<Option<Connection>>,
}

/// Connection pool shared by every clone of a [`crate::Warehouse`].
#[derive(Clone)]
pub struct DuckDbConnectionManager {
    inner: Arc<PoolInner>,
}

impl DuckDbConnectionManager {
    /// Create a pool for `path` keeping at most `max_pool_size` idle
    /// connections per access mode.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, max_pool_size: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                db_path: path.into(),
                max_idle: max_pool_size.max(1),
                idle: Mutex::new(Idle::default()),
                root: Mutex::new(None),
            }),
        }
    }

    /// Take an idle connection or open a new one.
    ///
    /// # Errors
    /// Returns an error if the database file cannot be opened or configured.
    ///
    /// # Panics
    /// Panics if the pool mutex is poisoned.
    pub fn acquire(&self, mode: AccessMode) -> Result<PooledConnection, ::duckdb::Error> {
        let recycled = self
            .inner
            .idle
            .lock()
            .expect("duckdb connection pool mutex poisoned")
            .bucket(mode)
            .pop();

        let connection = match recycled {
            Some(connection) => connection,
            None => self.open_connection(mode)?,
        };

        Ok(PooledConnection {
            mode,
            pool: Arc::clone(&self.inner),
            connection: Some(connection),
        })
    }

    /// Number of idle connections currently held for `mode`.
    ///
    /// # Panics
    /// Panics if the pool mutex is poisoned.
    #[must_use]
    pub fn idle_connections(&self, mode: AccessMode) -> usize {
        self.inner
            .idle
            .lock()
            .expect("duckdb connection pool mutex poisoned")
            .bucket(mode)
            .len()
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn db_path(&self) -> &Path {
        self.inner.db_path.as_path()
    }

    fn open_connection(&self, mode: AccessMode) -> Result<Connection, ::duckdb::Error> {
        let mut root = self
            .inner
            .root
            .lock()
            .expect("duckdb root connection mutex poisoned");
        let connection = match root.as_ref() {
            Some(root) => root.try_clone()?,
            None => {
                let opened = Connection::open(self.inner.db_path.as_path())?;
                let connection = opened.try_clone()?;
                *root = Some(opened);
                connection
            }
        };
        drop(root);

        // access_mode is fixed per database instance, so read-only is a bucket, not a setting.
        let _ = mode;
        connection.execute_batch("PRAGMA disable_progress_bar;")?;
        Ok(connection)
    }
}

/// A pooled connection that returns to the pool when dropped.
pub struct PooledConnection {
    mode: AccessMode,
    pool: Arc<PoolInner>,
    connection: Option<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("pooled connection unexpectedly missing")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_mut()
            .expect("pooled connection unexpectedly missing")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        let mut idle = self
            .pool
            .idle
            .lock()
            .expect("duckdb connection pool mutex poisoned");
        let max_idle = self.pool.max_idle;
        let bucket = idle.bucket(self.mode);
        if bucket.len() < max_idle {
            bucket.push(connection);
        }
    }
}
