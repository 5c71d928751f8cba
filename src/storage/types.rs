use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Storage errors with user-facing messages
#[derive(Debug, Error)]
pub enum StorageError {
    /// Another instance of the application has locked the database
    #[error(
        "Another instance of reading-queue appears to be running. Please close it and try again."
    )]
    Locked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// The on-disk schema was written by a newer binary
    #[error("Database schema version {found} is newer than this build supports ({supported})")]
    SchemaTooNew { found: i64, supported: i64 },

    /// Strict feed insert hit an existing subscription; the whole batch was
    /// rolled back
    #[error("Feed already subscribed: {0}")]
    FeedExists(String),

    /// A stored row violates the origin encoding invariant
    #[error("Corrupt content row {id}: {reason}")]
    CorruptRow { id: String, reason: String },

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl StorageError {
    /// Classify a sqlx error, mapping SQLite lock conditions to [`StorageError::Locked`]
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        // SQLITE_CANTOPEN (14): unable to open database file
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return StorageError::Locked;
        }

        StorageError::Other(err)
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// How a content item entered the store.
///
/// The feed id travels inside the variant, so a manually saved item cannot
/// carry one. Persisted as a discriminant column plus a nullable feed-id
/// column; see [`Origin::decode`] for the read-side invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Inserted by the refresh job from a subscribed feed
    FeedSubscription { feed_id: String },
    /// Saved explicitly by the user (e.g. a shared URL)
    ManuallySaved,
    /// Imported from an email digest
    EmailImport,
}

impl Origin {
    pub(crate) fn discriminant(&self) -> &'static str {
        match self {
            Origin::FeedSubscription { .. } => "feed_subscription",
            Origin::ManuallySaved => "manually_saved",
            Origin::EmailImport => "email_import",
        }
    }

    pub(crate) fn feed_id(&self) -> Option<&str> {
        match self {
            Origin::FeedSubscription { feed_id } => Some(feed_id),
            _ => None,
        }
    }

    /// Rebuild an [`Origin`] from its two persisted columns.
    ///
    /// A feed-subscription row without a feed id, a non-feed row carrying
    /// one, or an unknown discriminant are all corruption, not valid states.
    pub(crate) fn decode(tag: &str, feed_id: Option<String>) -> Result<Self, String> {
        match (tag, feed_id) {
            ("feed_subscription", Some(feed_id)) => Ok(Origin::FeedSubscription { feed_id }),
            ("feed_subscription", None) => {
                Err("feed_subscription row without origin_feed_id".to_string())
            }
            ("manually_saved", None) => Ok(Origin::ManuallySaved),
            ("email_import", None) => Ok(Origin::EmailImport),
            (tag @ ("manually_saved" | "email_import"), Some(_)) => {
                Err(format!("{tag} row with a stray origin_feed_id"))
            }
            (other, _) => Err(format!("unknown origin discriminant {other:?}")),
        }
    }
}

/// A saved or fetched article record.
///
/// `id` is the stable identifier (the source URL or feed-entry URI) and is
/// never reassigned; inserting a duplicate id is a no-op, which is what
/// protects user flag edits from re-fetched feed entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentItem {
    pub id: String,
    pub title: String,
    pub favorite: bool,
    pub queued: bool,
    pub read: bool,
    pub origin: Origin,
}

impl ContentItem {
    /// New item with all flags cleared.
    pub fn new(id: impl Into<String>, title: impl Into<String>, origin: Origin) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            favorite: false,
            queued: false,
            read: false,
            origin,
        }
    }
}

/// A subscribed syndication source, identified by its URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    pub id: String,
    pub name: String,
    pub icon_url: Option<String>,
}

/// Shape of a live or snapshot content query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFilter {
    All,
    Favorites,
    Queued,
}

impl ContentFilter {
    pub(crate) fn where_clause(self) -> &'static str {
        match self {
            ContentFilter::All => "",
            ContentFilter::Favorites => "WHERE is_favorite = 1",
            ContentFilter::Queued => "WHERE is_queued = 1",
        }
    }
}

// ============================================================================
// Helper Types
// ============================================================================

/// Internal row type for content queries (used by sqlx FromRow).
/// Converts to ContentItem via into_item() with origin decoding.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ContentRow {
    pub id: String,
    pub title: String,
    pub is_favorite: bool,
    pub is_queued: bool,
    pub read: bool,
    pub origin: String,
    pub origin_feed_id: Option<String>,
}

impl ContentRow {
    pub(crate) fn into_item(self) -> Result<ContentItem, StorageError> {
        let origin =
            Origin::decode(&self.origin, self.origin_feed_id).map_err(|reason| {
                StorageError::CorruptRow {
                    id: self.id.clone(),
                    reason,
                }
            })?;
        Ok(ContentItem {
            id: self.id,
            title: self.title,
            favorite: self.is_favorite,
            queued: self.is_queued,
            read: self.read,
            origin,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedRow {
    pub id: String,
    pub name: String,
    pub icon_url: Option<String>,
}

impl FeedRow {
    pub(crate) fn into_feed(self) -> Feed {
        Feed {
            id: self.id,
            name: self.name,
            icon_url: self.icon_url,
        }
    }
}
