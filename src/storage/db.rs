use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use tokio::sync::watch;

use super::types::StorageError;

/// Current schema version, stored in `PRAGMA user_version`.
///
/// Bump this and append a gated block to [`Database::migrate`] when the
/// schema changes; existing databases are carried forward, never discarded.
const SCHEMA_VERSION: i64 = 1;

// ============================================================================
// Database
// ============================================================================

/// Handle to the local store. Cheap to clone; all clones share the pool and
/// the change-notification channel behind the live content views.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
    pub(crate) changes: Arc<watch::Sender<u64>>,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another instance has the database
    /// locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns [`StorageError::SchemaTooNew`] when the file was written by a
    /// newer build, and [`StorageError::Migration`] for failed migrations.
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // Restrict the database file to the owning user before the pool can
        // create it with default umask permissions.
        #[cfg(unix)]
        if path != ":memory:" {
            use std::os::unix::fs::PermissionsExt;
            let db_path = std::path::Path::new(path);
            if db_path.exists() {
                let perms = std::fs::Permissions::from_mode(0o600);
                if let Err(e) = std::fs::set_permissions(path, perms) {
                    tracing::warn!(path = %path, error = %e, "Failed to set database file permissions");
                }
            } else if let Some(parent) = db_path.parent() {
                if parent.exists() {
                    // mode() at creation time leaves no window with wider permissions
                    use std::os::unix::fs::OpenOptionsExt;
                    let _file = std::fs::OpenOptions::new()
                        .write(true)
                        .create_new(true)
                        .mode(0o600)
                        .open(db_path)
                        .ok(); // If creation fails, SQLite reports the error at connect.
                }
            }
        }

        // busy_timeout=5000: SQLite waits up to 5 seconds for locks to release
        // before returning SQLITE_BUSY, which absorbs transient contention
        // between the refresh job's writes and live-view re-queries.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StorageError::from_sqlx)?
            .pragma("busy_timeout", "5000");

        // A pooled :memory: database would hand each connection its own empty
        // db, so in-memory stores (tests) get a single connection.
        let max_connections = if path == ":memory:" { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StorageError::from_sqlx)?;

        let db = Self {
            pool,
            changes: Arc::new(watch::channel(0).0),
        };
        db.migrate().await?;
        Ok(db)
    }

    /// Run forward migrations atomically within a transaction.
    ///
    /// The schema version lives in `PRAGMA user_version`; every block below
    /// is gated on the version it upgrades from, and all blocks plus the
    /// version bump commit together. A failure mid-migration rolls the
    /// database back to its previous consistent state.
    async fn migrate(&self) -> Result<(), StorageError> {
        // Per-connection setting, must run outside the transaction
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.pool)
            .await?;

        let (version,): (i64,) = sqlx::query_as("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await?;

        if version > SCHEMA_VERSION {
            return Err(StorageError::SchemaTooNew {
                found: version,
                supported: SCHEMA_VERSION,
            });
        }
        if version == SCHEMA_VERSION {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;

        if version < 1 {
            sqlx::query(
                r#"
                CREATE TABLE content (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    is_favorite INTEGER NOT NULL DEFAULT 0,
                    is_queued INTEGER NOT NULL DEFAULT 0,
                    read INTEGER NOT NULL DEFAULT 0,
                    origin TEXT NOT NULL,
                    origin_feed_id TEXT
                )
            "#,
            )
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;

            sqlx::query(
                r#"
                CREATE TABLE feed (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    icon_url TEXT
                )
            "#,
            )
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;

            // Partial indexes back the filtered views; the flag columns are
            // almost always 0 so a full index would be wasted space.
            sqlx::query(
                "CREATE INDEX idx_content_favorite ON content(is_favorite) WHERE is_favorite = 1",
            )
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;
            sqlx::query(
                "CREATE INDEX idx_content_queued ON content(is_queued) WHERE is_queued = 1",
            )
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;
        }

        // PRAGMA does not take bind parameters
        sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;

        tracing::debug!(from = version, to = SCHEMA_VERSION, "Database migrated");
        Ok(())
    }

    /// Wake every live content view. Called after a committed mutation of the
    /// content table, never before the commit.
    pub(crate) fn notify_content_changed(&self) {
        self.changes.send_modify(|generation| *generation += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_in_memory_and_remigrate() {
        let db = Database::open(":memory:").await.unwrap();
        // Re-running migrations on an up-to-date schema is a no-op
        db.migrate().await.unwrap();

        let (version,): (i64,) = sqlx::query_as("PRAGMA user_version")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn reopen_on_disk_database_preserves_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let path = path.to_str().unwrap();

        {
            let db = Database::open(path).await.unwrap();
            sqlx::query("INSERT INTO content (id, title, origin) VALUES ('a', 'A', 'manually_saved')")
                .execute(&db.pool)
                .await
                .unwrap();
            db.pool.close().await;
        }

        let db = Database::open(path).await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM content")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn newer_schema_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let path = path.to_str().unwrap();

        {
            let db = Database::open(path).await.unwrap();
            sqlx::query("PRAGMA user_version = 99")
                .execute(&db.pool)
                .await
                .unwrap();
            db.pool.close().await;
        }

        match Database::open(path).await {
            Err(StorageError::SchemaTooNew { found: 99, .. }) => {}
            other => panic!("expected SchemaTooNew, got {:?}", other.map(|_| ())),
        }
    }
}
