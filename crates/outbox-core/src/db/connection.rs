//! Database connection management

use crate::error::Result;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

use super::migrations;

/// Storage options for the queue database
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    /// Cap on database size in pages (`PRAGMA max_page_count`).
    ///
    /// Models the device storage quota; writes beyond it fail with
    /// [`crate::Error::QuotaExceeded`].
    pub max_pages: Option<u32>,
    /// How long a writer waits for a lock held by another connection
    pub busy_timeout: Option<Duration>,
}

impl StorageConfig {
    /// Set the storage cap in pages
    #[must_use]
    pub const fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = Some(max_pages);
        self
    }
}

/// Database wrapper for the `SQLite` connection backing the queue
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, &StorageConfig::default())
    }

    /// Open a database at the given path with explicit storage options
    pub fn open_with_config(path: impl AsRef<Path>, config: &StorageConfig) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        let database = Self { conn };
        database.configure(config)?;
        database.migrate()?;
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let database = Self { conn };
        database.configure(&StorageConfig::default())?;
        database.migrate()?;
        Ok(database)
    }

    /// Configure `SQLite` for durable, concurrent access
    fn configure(&self, config: &StorageConfig) -> Result<()> {
        // In-memory databases report "memory" here; that's fine.
        self.conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .ok();
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.busy_timeout(
            config
                .busy_timeout
                .unwrap_or_else(|| Duration::from_secs(5)),
        )?;
        if let Some(max_pages) = config.max_pages {
            self.set_max_pages(max_pages)?;
        }
        Ok(())
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn)
    }

    /// Cap the database size; returns the effective limit.
    ///
    /// `SQLite` never lowers the limit below the current page count.
    pub fn set_max_pages(&self, max_pages: u32) -> Result<i64> {
        let effective = self.conn.pragma_update_and_check(
            None,
            "max_page_count",
            i64::from(max_pages),
            |row| row.get::<_, i64>(0),
        )?;
        tracing::debug!("Queue storage capped at {effective} pages");
        Ok(effective)
    }

    /// Current database size in pages
    pub fn page_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .pragma_query_value(None, "page_count", |row| row.get(0))?)
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Get a mutable reference to the underlying connection (for transactions)
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}
