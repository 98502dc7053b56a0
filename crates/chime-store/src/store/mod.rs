//! SQLite-backed reminder store.
//!
//! - `reminders` — row storage, deletion, and recovery-on-load
//!
//! The schema carries a single integer version in a one-row
//! `migration_version` table; pending migrations apply strictly in
//! ascending order when the store is opened.

mod reminders;

pub use reminders::StoredReminder;

use chime_core::config::{shellexpand, StorageConfig};
use chime_core::error::ChimeError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

/// Schema version this build writes and expects after migration.
const LATEST_MIGRATION_VERSION: i64 = 3;

/// Persistent reminder store backed by SQLite.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database and bring its schema up to
    /// date. `default_timezone` backfills rows that predate the timezone
    /// column.
    pub async fn new(config: &StorageConfig, default_timezone: &str) -> Result<Self, ChimeError> {
        let db_path = shellexpand(&config.db_path);

        // Ensure parent directory exists.
        if let Some(parent) = std::path::Path::new(&db_path).parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ChimeError::Storage(format!("failed to create data dir: {e}")))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))
            .map_err(|e| ChimeError::Storage(format!("invalid db path: {e}")))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| ChimeError::Storage(format!("failed to connect to sqlite: {e}")))?;

        Self::run_migrations(&pool, default_timezone).await?;

        info!("reminder store initialized at {db_path}");

        Ok(Self { pool })
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Read the stored schema version and apply pending migrations in
    /// ascending order. A fresh database gets the version-0 schema first
    /// and then replays the full history.
    async fn run_migrations(pool: &SqlitePool, default_timezone: &str) -> Result<(), ChimeError> {
        sqlx::raw_sql("CREATE TABLE IF NOT EXISTS migration_version (version INTEGER NOT NULL)")
            .execute(pool)
            .await
            .map_err(|e| ChimeError::Storage(format!("failed to create version table: {e}")))?;

        let row: Option<(i64,)> = sqlx::query_as("SELECT version FROM migration_version")
            .fetch_optional(pool)
            .await
            .map_err(|e| ChimeError::Storage(format!("failed to read schema version: {e}")))?;

        let mut version = match row {
            Some((v,)) => v,
            None => {
                info!("performing initial database setup");
                sqlx::raw_sql(include_str!("../../migrations/0001_initial.sql"))
                    .execute(pool)
                    .await
                    .map_err(|e| ChimeError::Storage(format!("initial setup failed: {e}")))?;
                sqlx::query("INSERT INTO migration_version (version) VALUES (?)")
                    .bind(0i64)
                    .execute(pool)
                    .await
                    .map_err(|e| {
                        ChimeError::Storage(format!("failed to record schema version: {e}"))
                    })?;
                0
            }
        };

        if version < 1 {
            info!("migrating database from v0 to v1");
            sqlx::raw_sql(include_str!("../../migrations/0002_cron_expression.sql"))
                .execute(pool)
                .await
                .map_err(|e| ChimeError::Storage(format!("migration to v1 failed: {e}")))?;
            version = Self::bump_version(pool, 1).await?;
        }

        if version < 2 {
            info!("migrating database from v1 to v2");
            sqlx::raw_sql(include_str!("../../migrations/0003_timezone.sql"))
                .execute(pool)
                .await
                .map_err(|e| ChimeError::Storage(format!("migration to v2 failed: {e}")))?;
            // Rows from before the timezone column assume the configured
            // default.
            sqlx::query("UPDATE reminder SET timezone = ?")
                .bind(default_timezone)
                .execute(pool)
                .await
                .map_err(|e| ChimeError::Storage(format!("timezone backfill failed: {e}")))?;
            version = Self::bump_version(pool, 2).await?;
        }

        if version < 3 {
            info!("migrating database from v2 to v3");
            sqlx::raw_sql(include_str!("../../migrations/0004_naive_timestamps.sql"))
                .execute(pool)
                .await
                .map_err(|e| ChimeError::Storage(format!("migration to v3 failed: {e}")))?;
            version = Self::bump_version(pool, 3).await?;
        }

        debug_assert_eq!(version, LATEST_MIGRATION_VERSION);
        Ok(())
    }

    async fn bump_version(pool: &SqlitePool, version: i64) -> Result<i64, ChimeError> {
        sqlx::query("UPDATE migration_version SET version = ?")
            .bind(version)
            .execute(pool)
            .await
            .map_err(|e| ChimeError::Storage(format!("failed to bump schema version: {e}")))?;
        Ok(version)
    }
}
