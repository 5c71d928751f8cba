//! The refresh job: one synchronization pass over every subscribed feed.
//!
//! Reads the subscription list once, fetches each feed with bounded
//! concurrency, flattens everything that parsed into a single batch, and
//! hands the batch to the content store. The store's ignore-on-conflict
//! insert is the dedup: entries seen in an earlier cycle (or in another feed
//! this cycle) stay untouched.
//!
//! Feeds fail independently. One unreachable host records a failure in the
//! report and the rest of the cycle commits as normal; only a storage error
//! aborts the run.

use futures::stream::{self, StreamExt};

use crate::feed::{fetch_entries, FetchError, FetchOptions};
use crate::storage::{ContentItem, Database, Origin, StorageError};

/// Tuning for one refresh cycle, sourced from config.
#[derive(Debug, Clone, Copy)]
pub struct RefreshOptions {
    /// How many feeds to fetch at once
    pub concurrency: usize,
    pub fetch: FetchOptions,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            fetch: FetchOptions::default(),
        }
    }
}

/// One feed that could not be fetched or parsed this cycle.
#[derive(Debug)]
pub struct FeedFailure {
    pub feed_id: String,
    pub error: FetchError,
}

/// Aggregate outcome of one refresh cycle.
#[derive(Debug, Default)]
pub struct RefreshReport {
    /// Feeds in the subscription snapshot at the start of the cycle
    pub attempted: usize,
    /// Feeds that fetched and parsed cleanly
    pub succeeded: usize,
    /// New content rows actually inserted (post-dedup)
    pub inserted: usize,
    pub failures: Vec<FeedFailure>,
}

impl RefreshReport {
    /// True when every attempted feed failed, the scheduler's cue to treat
    /// the run as failed and back off. Partial failure is still a success.
    pub fn all_failed(&self) -> bool {
        self.attempted > 0 && self.succeeded == 0
    }
}

/// Run one refresh cycle.
///
/// # Errors
///
/// Only storage failures surface as `Err`; per-feed fetch and parse problems
/// are collected into the report instead.
pub async fn run(
    db: &Database,
    client: &reqwest::Client,
    options: &RefreshOptions,
) -> Result<RefreshReport, StorageError> {
    let feeds = db.feeds().await?;
    if feeds.is_empty() {
        tracing::debug!("No subscribed feeds, nothing to refresh");
        return Ok(RefreshReport::default());
    }

    let mut report = RefreshReport {
        attempted: feeds.len(),
        ..RefreshReport::default()
    };

    let fetch_options = options.fetch;
    let results: Vec<_> = stream::iter(feeds)
        .map(|feed| {
            let client = client.clone();
            async move {
                let result = fetch_entries(&client, &feed.id, &fetch_options).await;
                (feed, result)
            }
        })
        .buffer_unordered(options.concurrency.max(1))
        .collect()
        .await;

    let mut batch: Vec<ContentItem> = Vec::new();
    for (feed, result) in results {
        match result {
            Ok(parsed) => {
                if parsed.skipped > 0 {
                    tracing::warn!(
                        feed = %feed.id,
                        skipped = parsed.skipped,
                        "Entries without a usable identity skipped"
                    );
                }
                tracing::debug!(feed = %feed.id, entries = parsed.entries.len(), "Feed fetched");
                report.succeeded += 1;
                batch.extend(parsed.entries.into_iter().map(|entry| {
                    ContentItem::new(
                        entry.id,
                        entry.title,
                        Origin::FeedSubscription {
                            feed_id: feed.id.clone(),
                        },
                    )
                }));
            }
            Err(error) => {
                tracing::warn!(
                    feed = %feed.id,
                    error = %error,
                    retryable = error.is_retryable(),
                    "Feed refresh failed"
                );
                report.failures.push(FeedFailure {
                    feed_id: feed.id,
                    error,
                });
            }
        }
    }

    report.inserted = db.add_content(&batch).await?;

    tracing::info!(
        attempted = report.attempted,
        succeeded = report.succeeded,
        failed = report.failures.len(),
        inserted = report.inserted,
        "Refresh cycle complete"
    );
    Ok(report)
}
