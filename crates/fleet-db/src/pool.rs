//! # Connection Pool
//!
//! Opens the SQLite primary store and hands out repositories over one pool.
//!
//! ```text
//!   DbConfig ──► Database::new ──► WAL + foreign keys ──► migrate ──► Database
//!                                                                      │
//!                     devices() · rentals() · catalog() · offers() ◄───┘
//! ```
//!
//! The storefront reads availability while admin writes land, so the
//! journal runs in WAL mode. A writer that finds the file locked waits
//! `busy_timeout` before the error reaches the engine as an outage.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::catalog::CatalogRepository;
use crate::repository::device::DeviceRepository;
use crate::repository::offer::OfferRepository;
use crate::repository::rental::RentalRepository;

const IN_MEMORY: &str = ":memory:";

/// Where the primary store lives and how many connections it may hold.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_path: PathBuf,
    /// Default: 5. Always 1 for `:memory:`, which exists per connection.
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl DbConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// A private, throwaway database for tests.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(IN_MEMORY),
            max_connections: 1,
            busy_timeout: Duration::from_secs(1),
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == IN_MEMORY
    }
}

/// Handle on the primary store. Clones share the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connects, creating the file if needed, and applies pending migrations.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(path = %config.database_path.display(), "Opening fleet database");

        let base = if config.is_in_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
        } else {
            SqliteConnectOptions::new()
                .filename(&config.database_path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
        };
        let options = base.foreign_keys(true).busy_timeout(config.busy_timeout);

        let max_connections = if config.is_in_memory() {
            1
        } else {
            config.max_connections
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            // The in-memory database is dropped with its last connection.
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        migrations::run_migrations(&pool).await?;
        info!(max_connections, "Fleet database ready");
        Ok(Database { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn devices(&self) -> DeviceRepository {
        DeviceRepository::new(self.pool.clone())
    }

    pub fn rentals(&self) -> RentalRepository {
        RentalRepository::new(self.pool.clone())
    }

    pub fn catalog(&self) -> CatalogRepository {
        CatalogRepository::new(self.pool.clone())
    }

    pub fn offers(&self) -> OfferRepository {
        OfferRepository::new(self.pool.clone())
    }

    /// Closes the pool. Every later call fails with `ConnectionFailed`,
    /// which the engine reads as an outage.
    pub async fn close(&self) {
        info!("Closing fleet database");
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database_is_migrated() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.devices().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_pool_reads_as_connectivity_error() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.close().await;

        let err = db.devices().list().await.unwrap_err();
        assert!(err.is_connectivity());
    }

    #[test]
    fn test_config() {
        let config = DbConfig::new("/tmp/fleet-test.db").max_connections(0);
        assert_eq!(config.max_connections, 1);
        assert!(!config.is_in_memory());
        assert!(DbConfig::in_memory().is_in_memory());
    }
}
