use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;

// ============================================================================
// Database
// ============================================================================

/// Handle to the SQLite record store. Cheap to clone (wraps a pool).
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database file by path (or `:memory:`) and run migrations.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        Self::connect(&format!("sqlite:{}?mode=rwc", path)).await
    }

    /// Connect using an sqlx SQLite URL (`sqlite:path?mode=rwc`, `sqlite::memory:`)
    /// and run migrations.
    ///
    /// A value without the `sqlite:` prefix is treated as a file path.
    pub async fn connect(url: &str) -> Result<Self, DatabaseError> {
        let url = if url.starts_with("sqlite:") {
            url.to_string()
        } else {
            format!("sqlite:{}?mode=rwc", url)
        };

        // busy_timeout=5000: concurrent refresh transactions wait for the write
        // lock instead of failing with SQLITE_BUSY.
        // foreign_keys is a per-connection setting, so it goes on the options
        // rather than a one-off PRAGMA.
        let options = SqliteConnectOptions::from_str(&url)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");

        // Every connection to an in-memory database is a separate database,
        // so those pools are pinned to one connection that is never recycled.
        let mut pool_options = SqlitePoolOptions::new().acquire_timeout(Duration::from_secs(10));
        pool_options = if url.contains(":memory:") {
            pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options.max_connections(5)
        };

        let pool = pool_options.connect_with(options).await?;
        let db = Self { pool };
        db.migrate()
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        tracing::debug!(url = %url, "Database ready");
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                url TEXT UNIQUE NOT NULL,
                title TEXT,
                description TEXT,
                link TEXT,
                language TEXT,
                etag TEXT,
                last_modified TEXT,
                last_checked INTEGER,
                last_published INTEGER
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS episodes (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                guid TEXT NOT NULL,
                title TEXT,
                link TEXT,
                summary TEXT,
                content TEXT,
                audio_url TEXT,
                duration TEXT,
                published INTEGER,
                CONSTRAINT uq_episode_feed_guid UNIQUE(feed_id, guid)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_episodes_feed ON episodes(feed_id)")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_episodes_published ON episodes(published DESC)",
        )
        .execute(&mut *tx)
        .await?;

        // Covers the per-feed episode listing: WHERE feed_id = ? ORDER BY published DESC
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_episodes_feed_published ON episodes(feed_id, published DESC)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
