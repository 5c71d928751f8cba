use tokio::sync::watch;

use super::db::Database;
use super::types::{ContentFilter, ContentItem, StorageError};

// ============================================================================
// Live Content Views
// ============================================================================

/// A live, push-based view over the content table.
///
/// The store bumps a shared generation counter after every committed content
/// mutation; a watcher sleeps on that counter and re-runs its query when it
/// moves. Consecutive commits between two polls coalesce into one emission:
/// subscribers see snapshots, not a change log. Dropping the watcher is the
/// whole teardown: the store never blocks on, or holds references to, its
/// subscribers.
pub struct ContentWatch {
    db: Database,
    filter: ContentFilter,
    rx: watch::Receiver<u64>,
}

impl Database {
    /// Subscribe to a live view of the content table.
    ///
    /// The first call to [`ContentWatch::next`] yields the current state
    /// immediately; each later call waits for a commit.
    pub fn watch_content(&self, filter: ContentFilter) -> ContentWatch {
        let mut rx = self.changes.subscribe();
        // Force the first poll to emit the current snapshot
        rx.mark_changed();
        ContentWatch {
            db: self.clone(),
            filter,
            rx,
        }
    }
}

impl ContentWatch {
    /// Wait for the next committed change and return a fresh snapshot.
    pub async fn next(&mut self) -> Result<Vec<ContentItem>, StorageError> {
        // The watcher holds a Database clone, so the sender side of the
        // channel outlives it and changed() cannot observe a closed sender.
        let _ = self.rx.changed().await;
        self.snapshot().await
    }

    /// Current snapshot without waiting.
    pub async fn snapshot(&self) -> Result<Vec<ContentItem>, StorageError> {
        self.db.content_filtered(self.filter).await
    }

    pub fn filter(&self) -> ContentFilter {
        self.filter
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::storage::{ContentFilter, ContentItem, Database, Origin};
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn item(id: &str) -> ContentItem {
        ContentItem::new(id, id, Origin::ManuallySaved)
    }

    #[tokio::test]
    async fn first_poll_yields_current_state() {
        let db = test_db().await;
        db.add_content(&[item("https://a.example/1")]).await.unwrap();

        let mut watch = db.watch_content(ContentFilter::All);
        let snapshot = watch.next().await.unwrap();
        assert_eq!(snapshot.len(), 1);
    }

    #[tokio::test]
    async fn insert_wakes_watcher() {
        let db = test_db().await;
        let mut watch = db.watch_content(ContentFilter::All);
        assert!(watch.next().await.unwrap().is_empty());

        db.add_content(&[item("https://a.example/1")]).await.unwrap();
        let snapshot = watch.next().await.unwrap();
        assert_eq!(snapshot.len(), 1);
    }

    #[tokio::test]
    async fn queued_flag_moves_item_in_and_out_of_view() {
        let db = test_db().await;
        db.add_content(&[item("https://a.example/1")]).await.unwrap();

        let mut watch = db.watch_content(ContentFilter::Queued);
        assert!(watch.next().await.unwrap().is_empty());

        let mut stored = db
            .content_item("https://a.example/1")
            .await
            .unwrap()
            .unwrap();
        stored.queued = true;
        db.update_content(std::slice::from_ref(&stored)).await.unwrap();

        let snapshot = watch.next().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "https://a.example/1");

        stored.queued = false;
        db.update_content(std::slice::from_ref(&stored)).await.unwrap();
        assert!(watch.next().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn noop_mutations_do_not_wake_watcher() {
        let db = test_db().await;
        db.add_content(&[item("https://a.example/1")]).await.unwrap();

        let mut watch = db.watch_content(ContentFilter::All);
        watch.next().await.unwrap();

        // Duplicate insert and missing-id remove both change nothing
        db.add_content(&[item("https://a.example/1")]).await.unwrap();
        db.remove_content(&["https://a.example/ghost"]).await.unwrap();

        let woke = tokio::time::timeout(Duration::from_millis(50), watch.next()).await;
        assert!(woke.is_err(), "zero-effect writes must not notify");
    }

    #[tokio::test]
    async fn commits_between_polls_coalesce() {
        let db = test_db().await;
        let mut watch = db.watch_content(ContentFilter::All);
        watch.next().await.unwrap();

        db.add_content(&[item("https://a.example/1")]).await.unwrap();
        db.add_content(&[item("https://a.example/2")]).await.unwrap();

        // One wake-up, already reflecting both commits
        let snapshot = watch.next().await.unwrap();
        assert_eq!(snapshot.len(), 2);

        let woke = tokio::time::timeout(Duration::from_millis(50), watch.next()).await;
        assert!(woke.is_err());
    }

    #[tokio::test]
    async fn dropped_watcher_does_not_block_writers() {
        let db = test_db().await;
        let watch = db.watch_content(ContentFilter::All);
        drop(watch);

        // Writers keep notifying into the void without error
        db.add_content(&[item("https://a.example/1")]).await.unwrap();
        assert_eq!(db.content_items().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn independent_watchers_see_their_own_filters() {
        let db = test_db().await;
        let mut all = db.watch_content(ContentFilter::All);
        let mut favorites = db.watch_content(ContentFilter::Favorites);
        all.next().await.unwrap();
        favorites.next().await.unwrap();

        let mut fav = item("https://a.example/fav");
        fav.favorite = true;
        db.add_content(&[fav, item("https://a.example/plain")])
            .await
            .unwrap();

        assert_eq!(all.next().await.unwrap().len(), 2);
        let favs = favorites.next().await.unwrap();
        assert_eq!(favs.len(), 1);
        assert_eq!(favs[0].id, "https://a.example/fav");
    }
}
