use super::db::Database;
use super::types::{Feed, FeedRow, StorageError};

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Point-in-time list of subscriptions, ordered by name.
    ///
    /// Deliberately not a live view: the refresh job reads this once per
    /// cycle and the subscription list changes rarely.
    pub async fn feeds(&self) -> Result<Vec<Feed>, StorageError> {
        let rows = sqlx::query_as::<_, FeedRow>(
            "SELECT id, name, icon_url FROM feed ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FeedRow::into_feed).collect())
    }

    pub async fn feed(&self, id: &str) -> Result<Option<Feed>, StorageError> {
        let row = sqlx::query_as::<_, FeedRow>("SELECT id, name, icon_url FROM feed WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(FeedRow::into_feed))
    }

    /// Subscribe to feeds, strictly.
    ///
    /// Unlike content inserts, a colliding feed id here is a caller error:
    /// subscribing twice should be surfaced, not swallowed. Any duplicate
    /// aborts the whole batch: the transaction rolls back and the table is
    /// left exactly as it was.
    ///
    /// # Errors
    ///
    /// [`StorageError::FeedExists`] names the first feed that collided.
    pub async fn add_feeds(&self, feeds: &[Feed]) -> Result<(), StorageError> {
        if feeds.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for feed in feeds {
            let result = sqlx::query("INSERT INTO feed (id, name, icon_url) VALUES (?, ?, ?)")
                .bind(&feed.id)
                .bind(&feed.name)
                .bind(&feed.icon_url)
                .execute(&mut *tx)
                .await;

            match result {
                Ok(_) => {}
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                    // Dropping the transaction rolls back the earlier inserts
                    return Err(StorageError::FeedExists(feed.id.clone()));
                }
                Err(e) => return Err(e.into()),
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Unsubscribe; missing ids are a no-op. Returns the number removed.
    ///
    /// Existing content items that came from a removed feed keep their
    /// origin tag; unsubscribing only stops new entries from arriving.
    pub async fn remove_feeds(&self, ids: &[&str]) -> Result<usize, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut removed: usize = 0;
        for id in ids {
            let result = sqlx::query("DELETE FROM feed WHERE id = ?")
                .bind(*id)
                .execute(&self.pool)
                .await?;
            removed += result.rows_affected() as usize;
        }
        Ok(removed)
    }
}
