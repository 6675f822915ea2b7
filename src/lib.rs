//! Mirador Core Library
//!
//! This library implements a client for public HTTP autoindex mirrors:
//! browse Apache/nginx-style directory listings, crawl them into a local
//! full-text index, search and rank the results, and download files with
//! resume support.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`client`] - Rate-limited HTTP transport and listing parser
//! - [`index`] - SQLite FTS index store and the recursive crawler
//! - [`matcher`] - Query scoring and ranking over listing entries
//! - [`download`] - Concurrent, resumable download queue
//! - [`config`] - JSON configuration on disk

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod download;
pub mod index;
pub mod matcher;
pub mod util;

// Re-export commonly used types
pub use client::{Client, ClientError, Entry, TokenBucket};
pub use config::{Config, ConfigError};
pub use download::{DownloadItem, DownloadManager, DownloadStatus, ItemError};
pub use index::{
    CollectionCatalog, CrawlError, CrawlProgress, Crawler, IndexStats, IndexStore, SearchResult,
    StoreError,
};
pub use matcher::{is_non_retail, parse_preferred_languages, rank, Preferences};
