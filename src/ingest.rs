//! Intake for text shared in from outside (the mobile share sheet's
//! plain-text payload, a piped string on the CLI): find the URL, save it as
//! a manually-saved content item.

use thiserror::Error;
use url::Url;

use crate::storage::{ContentItem, Database, Origin, StorageError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("No http(s) URL found in shared text")]
    NoUrl,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// First http(s) URL token in a whitespace-separated payload.
pub fn extract_url(text: &str) -> Option<Url> {
    text.split_whitespace().find_map(|token| {
        let url = Url::parse(token).ok()?;
        matches!(url.scheme(), "http" | "https").then_some(url)
    })
}

/// Save a shared payload as a [`Origin::ManuallySaved`] item.
///
/// The URL doubles as id and title, and flags start cleared; queueing is an
/// explicit user action, not a side effect of sharing. Sharing a URL that is
/// already stored is the store's usual no-op: the existing row and whatever
/// flags the user has set on it win.
pub async fn save_shared_text(db: &Database, text: &str) -> Result<ContentItem, IngestError> {
    let url = extract_url(text).ok_or(IngestError::NoUrl)?;

    let item = ContentItem::new(url.as_str(), url.as_str(), Origin::ManuallySaved);
    let inserted = db.add_content(std::slice::from_ref(&item)).await?;
    tracing::info!(url = %url, inserted = inserted > 0, "Shared URL saved");

    Ok(item)
}
