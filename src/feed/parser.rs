use anyhow::Result;
use feed_rs::parser;
use sha2::{Digest, Sha256};

/// One entry of a syndication feed, reduced to what the content store keys on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    /// Stable identifier: the feed-supplied id/URI when present, else the
    /// entry link, else a digest of title and date.
    pub id: String,
    pub title: String,
}

/// Entries extracted from one feed document.
#[derive(Debug)]
pub struct ParsedFeed {
    pub entries: Vec<FeedEntry>,
    /// Entries dropped because they carried no usable identity at all
    pub skipped: usize,
}

/// Parse an RSS or Atom document into entries.
pub fn parse_entries(bytes: &[u8]) -> Result<ParsedFeed> {
    let feed = parser::parse(bytes)?;

    let mut entries = Vec::with_capacity(feed.entries.len());
    let mut skipped = 0;

    for entry in feed.entries {
        let link = entry.links.first().map(|l| l.href.clone());
        let published = entry.published.or(entry.updated).map(|dt| dt.timestamp());
        let title = entry
            .title
            .map(|t| t.content)
            .unwrap_or_else(|| "Untitled".to_string());

        let feed_supplied = {
            let trimmed = entry.id.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        };

        // An entry with no id, no link, and a blank title has nothing to
        // key on; synthesizing an id would collide with every sibling.
        if feed_supplied.is_none() && link.is_none() && title.trim().is_empty() {
            skipped += 1;
            continue;
        }

        let id = feed_supplied
            .or(link)
            .unwrap_or_else(|| synthesize_id(&title, published));

        entries.push(FeedEntry { id, title });
    }

    Ok(ParsedFeed { entries, skipped })
}

fn synthesize_id(title: &str, published: Option<i64>) -> String {
    let input = format!(
        "{}|{}",
        title,
        published.map(|p| p.to_string()).unwrap_or_default()
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}
