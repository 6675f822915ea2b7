//! Recursive crawler that mirrors the remote tree into the index store.
//!
//! Collections (top-level directories) are crawled in parallel by a
//! bounded worker pool; within a collection the walk is depth-first and
//! sequential, driven by an explicit stack so depth is bounded only by
//! the remote tree. Directories crawled within the freshness window are
//! skipped unless the crawl is forced.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::client::{Client, ClientError};
use crate::index::store::{IndexStore, NewFileRecord, StoreError};

/// Default number of collections crawled in parallel.
pub const DEFAULT_WORKERS: usize = 4;

/// Crawl errors.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// The crawl was cancelled by the caller.
    #[error("crawl cancelled")]
    Cancelled,

    /// A listing fetch failed at a point that is fatal for its scope
    /// (the root listing for a full crawl, the collection root for a
    /// collection crawl).
    #[error("listing {path}: {source}")]
    Listing {
        /// The remote path that failed to list.
        path: String,
        /// The underlying transport error.
        #[source]
        source: ClientError,
    },

    /// The index store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Progress snapshot published after each directory.
#[derive(Debug, Clone, Default)]
pub struct CrawlProgress {
    /// The directory most recently worked on.
    pub current_path: String,
    /// Directories processed, including freshness skips.
    pub dirs_processed: u64,
    /// Files inserted into the index.
    pub files_found: u64,
    /// Per-directory and per-collection errors tolerated so far.
    pub errors: u64,
}

type ProgressCallback = Arc<dyn Fn(CrawlProgress) + Send + Sync>;

/// Read-only lookup table mapping collection names to descriptions.
///
/// Passed into the crawler by reference rather than living as global
/// state; exact name matches win, then a prefix match covers
/// sub-collections ("No-Intro Special" inherits the "No-Intro" text).
#[derive(Debug, Clone, Default)]
pub struct CollectionCatalog {
    entries: Vec<(String, String)>,
}

impl CollectionCatalog {
    /// Creates a catalog from (name, description) pairs.
    #[must_use]
    pub fn from_entries(entries: Vec<(String, String)>) -> Self {
        Self { entries }
    }

    /// Catalog of well-known preservation collections.
    #[must_use]
    pub fn builtin() -> Self {
        let entries = [
            ("No-Intro", "Content for non-optical disk-based systems and digital platforms"),
            ("Redump", "Content for optical disc-based systems"),
            ("TOSEC", "Software for various non-optical disk-based electronics"),
            ("TOSEC-ISO", "Software for various optical disc-based electronics"),
            ("TOSEC-PIX", "Scans of various software and hardware manuals and magazines"),
            ("MAME", "Content for the arcade emulator MAME"),
            ("HBMAME", "Homebrew content not cataloged in MAME"),
            ("FinalBurn Neo", "Content for the multi-system arcade emulator FinalBurn Neo"),
            ("Hardware Target Game Database", "Content for use with flash carts"),
            ("Internet Archive", "Content at risk of removal from the Internet Archive"),
            ("RetroAchievements", "Content compatible with RetroAchievements"),
            ("T-En Collection", "Content translated into English"),
            ("Total DOS Collection", "DOS and bootable games for IBM PC"),
            ("bitsavers", "Software and documentation for vintage computers"),
            ("Miscellaneous", "Various content requested to be added"),
        ];
        Self {
            entries: entries
                .into_iter()
                .map(|(n, d)| (n.to_string(), d.to_string()))
                .collect(),
        }
    }

    /// Returns the description for a collection name, or `""`.
    #[must_use]
    pub fn describe(&self, name: &str) -> &str {
        if let Some((_, desc)) = self.entries.iter().find(|(n, _)| n == name) {
            return desc;
        }
        self.entries
            .iter()
            .find(|(n, _)| name.starts_with(n.as_str()))
            .map_or("", |(_, desc)| desc)
    }
}

/// Crawler over one remote listing server.
pub struct Crawler {
    client: Client,
    store: IndexStore,
    stale_days: i64,
    force: bool,
    workers: usize,
    catalog: CollectionCatalog,
    dirs_processed: AtomicU64,
    files_found: AtomicU64,
    errors: AtomicU64,
    current_path: Mutex<String>,
    on_progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for Crawler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crawler")
            .field("stale_days", &self.stale_days)
            .field("force", &self.force)
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

fn unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Crawler {
    /// Creates a crawler with the default worker count and an empty catalog.
    #[must_use]
    pub fn new(client: Client, store: IndexStore, stale_days: i64) -> Self {
        Self {
            client,
            store,
            stale_days,
            force: false,
            workers: DEFAULT_WORKERS,
            catalog: CollectionCatalog::default(),
            dirs_processed: AtomicU64::new(0),
            files_found: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            current_path: Mutex::new(String::new()),
            on_progress: None,
        }
    }

    /// Skips staleness checks and re-fetches every directory.
    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Sets collection crawl parallelism (minimum 1).
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets the collection description catalog.
    #[must_use]
    pub fn with_catalog(mut self, catalog: CollectionCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Registers a callback invoked after each directory is processed.
    #[must_use]
    pub fn with_progress_callback(
        mut self,
        callback: impl Fn(CrawlProgress) + Send + Sync + 'static,
    ) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    /// Returns the latest progress snapshot. Safe to call concurrently
    /// with a running crawl.
    #[must_use]
    pub fn progress(&self) -> CrawlProgress {
        CrawlProgress {
            current_path: unpoisoned(&self.current_path).clone(),
            dirs_processed: self.dirs_processed.load(Ordering::Relaxed),
            files_found: self.files_found.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    fn report_progress(&self, path: &str) {
        {
            let mut current = unpoisoned(&self.current_path);
            current.clear();
            current.push_str(path);
        }
        // Callback runs outside any lock.
        if let Some(callback) = &self.on_progress {
            callback(self.progress());
        }
    }

    /// Crawls all top-level collections with a bounded worker pool.
    ///
    /// Per-collection failures are counted and logged but never abort
    /// the run; only a root-listing failure or cancellation is fatal.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Listing`] if the root listing fails,
    /// [`CrawlError::Cancelled`] if `cancel` fires, and
    /// [`CrawlError::Store`] if the store fails while setting up.
    #[instrument(skip(self, cancel))]
    pub async fn crawl_all(self: &Arc<Self>, cancel: CancellationToken) -> Result<(), CrawlError> {
        let entries = tokio::select! {
            () = cancel.cancelled() => return Err(CrawlError::Cancelled),
            res = self.client.list_directory("") => res,
        }
        .map_err(|source| CrawlError::Listing {
            path: "/".to_string(),
            source,
        })?;

        let collections: VecDeque<String> = entries
            .into_iter()
            .filter(|e| e.is_dir)
            .map(|e| e.name)
            .collect();
        if collections.is_empty() {
            return Ok(());
        }

        let workers = self.workers.min(collections.len());
        info!(collections = collections.len(), workers, "starting full crawl");

        let queue = Arc::new(Mutex::new(collections));
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let this = Arc::clone(self);
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    // Drain without starting new work once cancelled.
                    if cancel.is_cancelled() {
                        return;
                    }
                    let Some(name) = unpoisoned(&queue).pop_front() else {
                        return;
                    };
                    if let Err(err) = this.crawl_collection(&name, cancel.clone()).await {
                        if matches!(err, CrawlError::Cancelled) {
                            return;
                        }
                        warn!(collection = %name, error = %err, "collection crawl failed");
                        this.errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }));
        }

        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "crawl worker panicked");
            }
        }

        if cancel.is_cancelled() {
            return Err(CrawlError::Cancelled);
        }
        Ok(())
    }

    /// Crawls a single collection: upserts it, then walks its directory
    /// tree depth-first, sequentially.
    ///
    /// A listing failure of the collection root fails the collection;
    /// failures deeper in the tree are counted and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Cancelled`], [`CrawlError::Listing`] (root
    /// only), or [`CrawlError::Store`].
    #[instrument(skip(self, cancel), fields(collection = %name))]
    pub async fn crawl_collection(
        &self,
        name: &str,
        cancel: CancellationToken,
    ) -> Result<(), CrawlError> {
        let coll_path = format!("{name}/");
        let description = self.catalog.describe(name);
        let col_id = self
            .store
            .upsert_collection(name, &coll_path, description)
            .await?;

        // Explicit stack instead of recursion: depth bounded by the
        // remote tree only.
        let mut stack = vec![coll_path.clone()];
        while let Some(dir_path) = stack.pop() {
            if cancel.is_cancelled() {
                return Err(CrawlError::Cancelled);
            }
            self.report_progress(&dir_path);

            if !self.force && !self.store.is_directory_stale(&dir_path, self.stale_days).await? {
                debug!(path = %dir_path, "directory fresh, skipping");
                self.dirs_processed.fetch_add(1, Ordering::Relaxed);
                self.report_progress(&dir_path);
                continue;
            }

            let listing = tokio::select! {
                () = cancel.cancelled() => return Err(CrawlError::Cancelled),
                res = self.client.list_directory(&dir_path) => res,
            };
            let entries = match listing {
                Ok(entries) => entries,
                Err(source) => {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    if dir_path == coll_path {
                        return Err(CrawlError::Listing {
                            path: dir_path,
                            source,
                        });
                    }
                    warn!(path = %dir_path, error = %source, "listing failed, skipping subtree");
                    continue;
                }
            };

            let dir_id = self.store.upsert_directory(&dir_path, col_id).await?;

            let mut files = Vec::new();
            let mut subdirs = Vec::new();
            for entry in entries {
                if entry.is_dir {
                    subdirs.push(format!("{dir_path}{}/", entry.name));
                } else {
                    files.push(NewFileRecord {
                        path: format!("{dir_path}{}", entry.name),
                        name: entry.name,
                        url: entry.url,
                        size: entry.size,
                        date: entry.date,
                        directory_id: dir_id,
                        collection_id: col_id,
                    });
                }
            }

            // Clear + batch insert in one transaction: the directory is
            // never observable half-updated.
            self.store.replace_directory_files(dir_id, &files).await?;
            self.files_found
                .fetch_add(files.len() as u64, Ordering::Relaxed);
            self.store.mark_directory_crawled(dir_id).await?;
            self.dirs_processed.fetch_add(1, Ordering::Relaxed);
            self.report_progress(&dir_path);

            // Reverse push keeps the walk depth-first in listing order.
            for subdir in subdirs.into_iter().rev() {
                stack.push(subdir);
            }
        }

        Ok(())
    }
}
