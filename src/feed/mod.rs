//! Feed layer: HTTP retrieval and RSS/Atom parsing.
//!
//! [`parser`] turns a feed document into [`FeedEntry`] values; [`fetcher`]
//! wraps that in a size-capped, timeout-bounded HTTP GET with an error
//! taxonomy the refresh job can classify as retryable or terminal.

mod fetcher;
mod parser;

pub use fetcher::{fetch_entries, FetchError, FetchOptions};
pub use parser::{parse_entries, FeedEntry, ParsedFeed};
