//! Error types for HTTP transport operations.

use thiserror::Error;

/// Errors surfaced by listing fetches and file downloads.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The provided URL is malformed or cannot be resolved.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The offending URL string.
        url: String,
    },

    /// Network-level failure (DNS, connect, TLS, timeout, body read).
    #[error("network error for {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// Non-success HTTP status.
    #[error("HTTP {status} for {url}")]
    HttpStatus {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The server answered a file request with an HTML page.
    ///
    /// Mirrors commonly serve HTML error/ban pages with status 200;
    /// writing one to disk as file content would corrupt the download.
    #[error("refusing HTML response for file URL {url}")]
    HtmlErrorPage {
        /// The file URL that produced HTML.
        url: String,
    },
}

impl ClientError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }
}
