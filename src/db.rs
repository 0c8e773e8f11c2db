//! The SQLite pool behind the validator store, the member record
//! repositories and the universe entity store.
//!
//! Every ingestion pipeline shares one pool, so `max_connections` bounds the
//! whole process. File databases run in WAL mode so `show` reads do not block
//! a concurrent `sync`.
//!
//! ```no_run
//! use ingestor_core::Database;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("ingestor.db")).await?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, instrument};

/// Writers serialize on the file lock; more connections only add waiters.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

const DEFAULT_BUSY_TIMEOUT_MS: u32 = 5000;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("failed to open database: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("failed to migrate schema: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Pool settings for [`Database::new_with_options`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseOptions {
    /// Clamped to at least one.
    pub max_connections: u32,
    /// How long a connection waits on a locked file before `SQLITE_BUSY`.
    pub busy_timeout_ms: u32,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

/// Shared handle to the migrated pool. Clones share connections.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if missing) and migrates the database at `db_path`.
    ///
    /// # Errors
    ///
    /// [`DbError::Connection`] if the file cannot be opened,
    /// [`DbError::Migration`] if the schema cannot be brought up to date.
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        Self::new_with_options(db_path, DatabaseOptions::default()).await
    }

    /// Like [`new`](Self::new) with explicit pool settings.
    ///
    /// Journal mode and busy timeout are connection options, so every pooled
    /// connection carries them.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new_with_options(db_path: &Path, options: DatabaseOptions) -> Result<Self, DbError> {
        let connect = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(u64::from(options.busy_timeout_ms)));

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections.max(1))
            .connect_with(connect)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!(max_connections = options.max_connections.max(1), "database ready");

        Ok(Self { pool })
    }

    /// Single-connection in-memory database; the schema lives as long as
    /// that connection.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// # Errors
    ///
    /// [`DbError::Connection`] if the pragma query fails.
    pub async fn is_wal_enabled(&self) -> Result<bool, DbError> {
        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;

        Ok(mode.eq_ignore_ascii_case("wal"))
    }

    /// Waits for checked-out connections, then closes the pool.
    #[instrument(skip(self))]
    pub async fn close(self) {
        self.pool.close().await;
    }
}
