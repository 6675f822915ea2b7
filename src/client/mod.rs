//! Rate-limited HTTP transport for listing fetches and file downloads.
//!
//! All outbound requests pass through one shared [`TokenBucket`] before
//! touching the network. Listing fetches use a bounded timeout; file
//! downloads carry no client-side timeout and are governed entirely by
//! caller-supplied cancellation, since large transfers legitimately run
//! far longer than any fixed deadline.

pub mod error;
pub mod parser;
pub mod rate_limiter;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use reqwest::header::{CONTENT_TYPE, RANGE, REFERER, USER_AGENT};
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, instrument, warn};
use url::Url;

pub use error::ClientError;
pub use rate_limiter::TokenBucket;

/// User-Agent sent with every request.
const CLIENT_USER_AGENT: &str = concat!("mirador/", env!("CARGO_PKG_VERSION"));

/// Total timeout for directory listing fetches. Listing pages are small.
const LISTING_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect timeout for the download client. Body reads are unbounded.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// One file or subdirectory row parsed from a directory listing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    /// Display name, percent-decoded, without trailing slash.
    pub name: String,
    /// Absolute URL resolved against the listing base.
    pub url: String,
    /// Human-readable size text ("1.2M"), "-" or empty for directories.
    pub size: String,
    /// Last-modified display text as the server rendered it.
    pub date: String,
    /// Whether the entry is a subdirectory.
    pub is_dir: bool,
}

/// An accepted file download ready for streaming.
#[derive(Debug)]
pub struct FileDownload {
    response: reqwest::Response,
    /// Content length of this response body, when the server reported one.
    pub content_length: Option<u64>,
    /// Whether the server honored the requested byte range (206).
    pub resumed: bool,
}

impl FileDownload {
    /// Consumes the download and returns the chunked body stream.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, reqwest::Error>> {
        self.response.bytes_stream()
    }
}

/// HTTP client for one remote file-listing server.
///
/// Holds two reqwest clients: a listing client with a bounded total
/// timeout, and a download client whose lifetime is controlled by caller
/// cancellation only. Both share the token bucket.
#[derive(Debug, Clone)]
pub struct Client {
    listing_http: reqwest::Client,
    download_http: reqwest::Client,
    limiter: Arc<TokenBucket>,
    base_url: Url,
}

impl Client {
    /// Creates a client for the given base URL with the given request rate.
    ///
    /// The base URL is normalized to end with a slash. Non-positive rates
    /// fall back to the default (5 requests/sec, burst 5).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidUrl`] if the base URL does not parse,
    /// and [`ClientError::Network`] if the HTTP clients cannot be built.
    pub fn new(base_url: &str, requests_per_second: f64) -> Result<Self, ClientError> {
        let trimmed = base_url.trim_end_matches('/');
        let base = Url::parse(&format!("{trimmed}/")).map_err(|_| ClientError::InvalidUrl {
            url: base_url.to_string(),
        })?;

        let listing_http = reqwest::Client::builder()
            .timeout(LISTING_TIMEOUT)
            .build()
            .map_err(|source| ClientError::network(base.as_str(), source))?;

        // No total timeout: downloads run until finished or cancelled.
        let download_http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|source| ClientError::network(base.as_str(), source))?;

        Ok(Self {
            listing_http,
            download_http,
            limiter: Arc::new(TokenBucket::new(
                requests_per_second,
                rate_limiter::DEFAULT_BURST,
            )),
            base_url: base,
        })
    }

    /// Returns the configured base URL (always slash-terminated).
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Fetches and parses a directory listing.
    ///
    /// `dir_path` is relative to the base URL (e.g. `""` for the root or
    /// `"No-Intro/Nintendo - Game Boy/"`); a trailing slash is enforced.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidUrl`] for unresolvable paths,
    /// [`ClientError::Network`] for transport failures, and
    /// [`ClientError::HttpStatus`] for non-200 responses.
    #[instrument(skip(self), fields(path = %dir_path))]
    pub async fn list_directory(&self, dir_path: &str) -> Result<Vec<Entry>, ClientError> {
        self.limiter.acquire().await;

        let dir_url = self.resolve_dir_url(dir_path)?;
        debug!(url = %dir_url, "fetching directory listing");

        let response = self
            .listing_http
            .get(dir_url.clone())
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .header(REFERER, dir_url.as_str())
            .send()
            .await
            .map_err(|source| ClientError::network(dir_url.as_str(), source))?;

        if response.status() != StatusCode::OK {
            return Err(ClientError::http_status(
                dir_url.as_str(),
                response.status().as_u16(),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|source| ClientError::network(dir_url.as_str(), source))?;

        let entries = parser::parse_listing(&body, &dir_url);
        debug!(count = entries.len(), "parsed listing");
        Ok(entries)
    }

    /// Initiates a file download, optionally resuming from a byte offset.
    ///
    /// With `resume_from > 0` an open-ended `Range: bytes=N-` header is
    /// sent; a 206 response marks the download as resumed. A `text/html`
    /// response body for a URL that is not itself an HTML file is treated
    /// as a server error page, not file content.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidUrl`] for malformed URLs,
    /// [`ClientError::Network`] for transport failures,
    /// [`ClientError::HttpStatus`] for non-2xx responses, and
    /// [`ClientError::HtmlErrorPage`] for HTML masquerading as a file.
    #[instrument(skip(self), fields(url = %file_url, resume_from))]
    pub async fn download_file(
        &self,
        file_url: &str,
        resume_from: u64,
    ) -> Result<FileDownload, ClientError> {
        self.limiter.acquire().await;

        let parsed = Url::parse(file_url).map_err(|_| ClientError::InvalidUrl {
            url: file_url.to_string(),
        })?;

        // Referer mirrors the browsing pattern the origin expects.
        let referer = parent_directory_url(&parsed);

        let mut request = self
            .download_http
            .get(parsed.clone())
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .header(REFERER, referer);

        if resume_from > 0 {
            request = request.header(RANGE, format!("bytes={resume_from}-"));
        }

        let response = request
            .send()
            .await
            .map_err(|source| ClientError::network(file_url, source))?;

        let status = response.status();
        let resumed = status == StatusCode::PARTIAL_CONTENT;
        if status != StatusCode::OK && !resumed {
            return Err(ClientError::http_status(file_url, status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        let lower_url = file_url.to_ascii_lowercase();
        if content_type.contains("text/html")
            && !lower_url.ends_with(".html")
            && !lower_url.ends_with(".htm")
        {
            warn!(url = %file_url, "server returned an HTML page for a file URL");
            return Err(ClientError::HtmlErrorPage {
                url: file_url.to_string(),
            });
        }

        Ok(FileDownload {
            content_length: response.content_length(),
            resumed,
            response,
        })
    }

    fn resolve_dir_url(&self, dir_path: &str) -> Result<Url, ClientError> {
        let mut path = dir_path.trim_start_matches('/').to_string();
        if !path.is_empty() && !path.ends_with('/') {
            path.push('/');
        }
        self.base_url
            .join(&path)
            .map_err(|_| ClientError::InvalidUrl {
                url: format!("{}{path}", self.base_url),
            })
    }
}

/// Derives the parent directory URL of a file URL, slash-terminated.
fn parent_directory_url(url: &Url) -> String {
    let s = url.as_str();
    s.rfind('/')
        .map_or_else(|| s.to_string(), |idx| s[..=idx].to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_new_normalizes_trailing_slash() {
        let client = Client::new("https://example.com/files", 5.0).unwrap();
        assert_eq!(client.base_url().as_str(), "https://example.com/files/");

        let client = Client::new("https://example.com/files///", 5.0).unwrap();
        assert_eq!(client.base_url().as_str(), "https://example.com/files/");
    }

    #[test]
    fn test_new_rejects_invalid_base() {
        let result = Client::new("not a url", 5.0);
        assert!(matches!(result, Err(ClientError::InvalidUrl { .. })));
    }

    #[test]
    fn test_resolve_dir_url_enforces_trailing_slash() {
        let client = Client::new("https://example.com/files/", 5.0).unwrap();
        let url = client.resolve_dir_url("No-Intro/Sub").unwrap();
        assert_eq!(url.as_str(), "https://example.com/files/No-Intro/Sub/");
    }

    #[test]
    fn test_resolve_dir_url_root() {
        let client = Client::new("https://example.com/files/", 5.0).unwrap();
        let url = client.resolve_dir_url("").unwrap();
        assert_eq!(url.as_str(), "https://example.com/files/");
    }

    #[test]
    fn test_resolve_dir_url_strips_leading_slash() {
        let client = Client::new("https://example.com/files/", 5.0).unwrap();
        let url = client.resolve_dir_url("/No-Intro/").unwrap();
        assert_eq!(url.as_str(), "https://example.com/files/No-Intro/");
    }

    #[test]
    fn test_parent_directory_url() {
        let url = Url::parse("https://example.com/files/sub/game.zip").unwrap();
        assert_eq!(parent_directory_url(&url), "https://example.com/files/sub/");
    }
}
