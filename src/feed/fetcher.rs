use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;

use super::parser::{parse_entries, ParsedFeed};

/// Errors from fetching one feed document.
///
/// [`FetchError::is_retryable`] splits these the way the refresh scheduler
/// cares about: transient network conditions are worth another cycle,
/// a malformed feed or a 404 is not going to fix itself.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    Http(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    TooLarge,
    /// Document could not be parsed as RSS or Atom
    #[error("Parse error: {0}")]
    Parse(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Timeout => true,
            // 429 and 5xx are server-side and transient; other statuses and
            // unparseable documents are terminal for this URL
            FetchError::Http(status) => *status == 429 || *status >= 500,
            FetchError::TooLarge | FetchError::Parse(_) => false,
        }
    }
}

/// Per-request limits, sourced from config.
#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub max_bytes: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Fetch one feed URL and parse its entries.
///
/// The whole request runs under an explicit timeout (an unbounded fetch
/// would stall the refresh cycle it is part of), and the body is read
/// streaming with a hard size cap.
pub async fn fetch_entries(
    client: &reqwest::Client,
    url: &str,
    options: &FetchOptions,
) -> Result<ParsedFeed, FetchError> {
    let fetch = async {
        let response = client.get(url).send().await.map_err(FetchError::Network)?;

        if !response.status().is_success() {
            return Err(FetchError::Http(response.status().as_u16()));
        }

        read_limited_bytes(response, options.max_bytes).await
    };

    let bytes = tokio::time::timeout(options.timeout, fetch)
        .await
        .map_err(|_| FetchError::Timeout)??;

    parse_entries(&bytes).map_err(|e| FetchError::Parse(e.to_string()))
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: reject via Content-Length before reading anything
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::TooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::TooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
