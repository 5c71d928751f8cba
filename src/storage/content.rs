use sqlx::QueryBuilder;

use super::db::Database;
use super::types::{ContentFilter, ContentItem, ContentRow, StorageError};

// 7 columns per row keeps chunks of 50 well under SQLite's 999 bind limit
const BATCH_SIZE: usize = 50;

impl Database {
    // ========================================================================
    // Content Queries
    // ========================================================================

    /// Point-in-time snapshot of every content item.
    pub async fn content_items(&self) -> Result<Vec<ContentItem>, StorageError> {
        self.content_filtered(ContentFilter::All).await
    }

    /// Snapshot of items with the favorite flag set (store-side filter).
    pub async fn favorites(&self) -> Result<Vec<ContentItem>, StorageError> {
        self.content_filtered(ContentFilter::Favorites).await
    }

    /// Snapshot of items with the queued flag set (store-side filter).
    pub async fn queued(&self) -> Result<Vec<ContentItem>, StorageError> {
        self.content_filtered(ContentFilter::Queued).await
    }

    /// Look up a single item by id.
    pub async fn content_item(&self, id: &str) -> Result<Option<ContentItem>, StorageError> {
        let row = sqlx::query_as::<_, ContentRow>(
            r#"
            SELECT id, title, is_favorite, is_queued, read, origin, origin_feed_id
            FROM content
            WHERE id = ?
        "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ContentRow::into_item).transpose()
    }

    pub(crate) async fn content_filtered(
        &self,
        filter: ContentFilter,
    ) -> Result<Vec<ContentItem>, StorageError> {
        let sql = format!(
            "SELECT id, title, is_favorite, is_queued, read, origin, origin_feed_id \
             FROM content {} ORDER BY id",
            filter.where_clause()
        );
        let rows = sqlx::query_as::<_, ContentRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(ContentRow::into_item).collect()
    }

    // ========================================================================
    // Content Mutations
    // ========================================================================

    /// Insert items, silently skipping any whose id already exists.
    ///
    /// The existing row wins outright: a re-fetched feed entry never clobbers
    /// the favorite/queued/read flags the user has set on it. Returns the
    /// number of rows actually inserted; watchers are only woken when that is
    /// non-zero.
    pub async fn add_content(&self, items: &[ContentItem]) -> Result<usize, StorageError> {
        if items.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted: usize = 0;

        for chunk in items.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO content \
                 (id, title, is_favorite, is_queued, read, origin, origin_feed_id) ",
            );

            builder.push_values(chunk, |mut b, item| {
                b.push_bind(&item.id)
                    .push_bind(&item.title)
                    .push_bind(item.favorite)
                    .push_bind(item.queued)
                    .push_bind(item.read)
                    .push_bind(item.origin.discriminant())
                    .push_bind(item.origin.feed_id());
            });

            // rows_affected counts only rows that made it past OR IGNORE
            let result = builder.build().execute(&mut *tx).await?;
            inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;

        if inserted > 0 {
            self.notify_content_changed();
        }
        Ok(inserted)
    }

    /// Full-row replace by id.
    ///
    /// An unknown id affects zero rows and is not an error; the affected
    /// count is returned for callers that care to check.
    pub async fn update_content(&self, items: &[ContentItem]) -> Result<usize, StorageError> {
        if items.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut affected: usize = 0;

        for item in items {
            let result = sqlx::query(
                r#"
                UPDATE content
                SET title = ?, is_favorite = ?, is_queued = ?, read = ?,
                    origin = ?, origin_feed_id = ?
                WHERE id = ?
            "#,
            )
            .bind(&item.title)
            .bind(item.favorite)
            .bind(item.queued)
            .bind(item.read)
            .bind(item.origin.discriminant())
            .bind(item.origin.feed_id())
            .bind(&item.id)
            .execute(&mut *tx)
            .await?;
            affected += result.rows_affected() as usize;
        }

        tx.commit().await?;

        if affected > 0 {
            self.notify_content_changed();
        }
        Ok(affected)
    }

    /// Delete by id; missing ids are a no-op. Returns the number removed.
    pub async fn remove_content(&self, ids: &[&str]) -> Result<usize, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut removed: usize = 0;
        for chunk in ids.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("DELETE FROM content WHERE id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            let result = builder.build().execute(&self.pool).await?;
            removed += result.rows_affected() as usize;
        }

        if removed > 0 {
            self.notify_content_changed();
        }
        Ok(removed)
    }
}
