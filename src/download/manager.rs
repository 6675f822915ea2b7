//! Concurrent download queue with pause, resume, retry, and cancel.
//!
//! The manager owns the queue in memory; nothing about downloads is
//! persisted except the partial files themselves. Each enqueued item
//! gets its own transfer task that waits for one of a fixed number of
//! semaphore slots, streams into a `.part` sibling of the destination,
//! and renames into place only after the last byte is flushed. A `.part`
//! left behind by a pause, failure, or crash is picked up transparently
//! on the next attempt via an HTTP range request.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use super::item::{DownloadItem, DownloadStatus, ItemError};
use crate::client::Client;

/// Suffix appended to the destination path while a transfer is in flight.
pub const PART_SUFFIX: &str = ".part";

/// Minimum interval between throttled change notifications.
const NOTIFY_INTERVAL: Duration = Duration::from_millis(100);

type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// Errors surfaced by queue operations. Transfer failures are recorded
/// on the item instead.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The URL names a directory listing, not a file.
    #[error("refusing to download a directory URL: {url}")]
    DirectoryUrl {
        /// The offending URL.
        url: String,
    },
}

fn unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Returns the in-flight sibling path for a destination.
fn part_path(dest: &std::path::Path) -> PathBuf {
    let mut os = dest.as_os_str().to_owned();
    os.push(PART_SUFFIX);
    PathBuf::from(os)
}

/// Concurrent download queue.
pub struct DownloadManager {
    client: Client,
    slots: Arc<Semaphore>,
    items: Mutex<Vec<Arc<DownloadItem>>>,
    next_id: AtomicU64,
    on_change: Mutex<Option<ChangeCallback>>,
    last_notify: Mutex<Instant>,
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("items", &unpoisoned(&self.items).len())
            .finish_non_exhaustive()
    }
}

impl DownloadManager {
    /// Creates a manager transferring at most `max_concurrent` files at
    /// once (minimum 1).
    #[must_use]
    pub fn new(client: Client, max_concurrent: usize) -> Self {
        Self {
            client,
            slots: Arc::new(Semaphore::new(max_concurrent.max(1))),
            items: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            on_change: Mutex::new(None),
            last_notify: Mutex::new(Instant::now() - NOTIFY_INTERVAL),
        }
    }

    /// Registers a callback fired on queue changes. Progress updates are
    /// throttled; state transitions always fire.
    pub fn set_on_change(&self, callback: impl Fn() + Send + Sync + 'static) {
        *unpoisoned(&self.on_change) = Some(Arc::new(callback));
    }

    fn notify(&self, force: bool) {
        {
            let mut last = unpoisoned(&self.last_notify);
            if !force && last.elapsed() < NOTIFY_INTERVAL {
                return;
            }
            *last = Instant::now();
        }
        let callback = unpoisoned(&self.on_change).clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Adds a download and starts its transfer task.
    ///
    /// Idempotent: if a non-failed item already covers the same URL or
    /// destination path, that item is returned with `false`. A failed
    /// duplicate does not block; a fresh item is created alongside it.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::DirectoryUrl`] for slash-terminated URLs.
    #[instrument(skip(self, name, dest_path), fields(url = %url))]
    pub fn enqueue(
        self: &Arc<Self>,
        name: &str,
        url: &str,
        dest_path: PathBuf,
    ) -> Result<(Arc<DownloadItem>, bool), DownloadError> {
        if url.ends_with('/') {
            return Err(DownloadError::DirectoryUrl {
                url: url.to_string(),
            });
        }

        let item = {
            let mut items = unpoisoned(&self.items);
            if let Some(existing) = items.iter().find(|i| {
                (i.url == url || i.dest_path == dest_path)
                    && i.status() != DownloadStatus::Failed
            }) {
                debug!(id = existing.id, "duplicate enqueue ignored");
                return Ok((Arc::clone(existing), false));
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let item = Arc::new(DownloadItem::new(
                id,
                name.to_string(),
                url.to_string(),
                dest_path,
            ));
            items.push(Arc::clone(&item));
            item
        };

        info!(id = item.id, name = %item.name, "download queued");
        self.spawn_transfer(Arc::clone(&item));
        self.notify(true);
        Ok((item, true))
    }

    /// Pauses a queued or active download. Partial data is kept.
    pub fn pause(&self, id: u64) -> bool {
        let Some(item) = self.get(id) else {
            return false;
        };
        let changed = item.request_stop(true);
        if changed {
            self.notify(true);
        }
        changed
    }

    /// Moves a paused download back into the queue.
    pub fn resume(self: &Arc<Self>, id: u64) -> bool {
        let Some(item) = self.get(id) else {
            return false;
        };
        if !item.requeue(DownloadStatus::Paused) {
            return false;
        }
        self.spawn_transfer(item);
        self.notify(true);
        true
    }

    /// Cancels a queued or active download. The item lands in Failed
    /// with a cancelled error; its partial file is kept for retry.
    pub fn cancel(&self, id: u64) -> bool {
        let Some(item) = self.get(id) else {
            return false;
        };
        let changed = item.request_stop(false);
        if changed {
            self.notify(true);
        }
        changed
    }

    /// Re-queues a failed download. Only failed items can be retried.
    pub fn retry(self: &Arc<Self>, id: u64) -> bool {
        let Some(item) = self.get(id) else {
            return false;
        };
        if !item.requeue(DownloadStatus::Failed) {
            return false;
        }
        self.spawn_transfer(item);
        self.notify(true);
        true
    }

    /// Cancels every queued and active download.
    pub fn cancel_all(&self) {
        let items = self.items();
        for item in items {
            item.request_stop(false);
        }
        self.notify(true);
    }

    /// Removes completed and failed items from the queue.
    pub fn clear_finished(&self) {
        unpoisoned(&self.items).retain(|i| !i.status().is_terminal());
        self.notify(true);
    }

    /// Snapshot of all tracked items in enqueue order.
    #[must_use]
    pub fn items(&self) -> Vec<Arc<DownloadItem>> {
        unpoisoned(&self.items).clone()
    }

    /// Looks up an item by id.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<Arc<DownloadItem>> {
        unpoisoned(&self.items)
            .iter()
            .find(|i| i.id == id)
            .map(Arc::clone)
    }

    /// Number of items currently transferring.
    #[must_use]
    pub fn active_count(&self) -> usize {
        unpoisoned(&self.items)
            .iter()
            .filter(|i| i.status() == DownloadStatus::Active)
            .count()
    }

    /// Whether any item is queued or transferring.
    #[must_use]
    pub fn has_active(&self) -> bool {
        unpoisoned(&self.items).iter().any(|i| {
            matches!(
                i.status(),
                DownloadStatus::Queued | DownloadStatus::Active
            )
        })
    }

    fn spawn_transfer(self: &Arc<Self>, item: Arc<DownloadItem>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let Ok(permit) = this.slots.clone().acquire_owned().await else {
                return; // manager dropped
            };
            // The item may have been paused or cancelled while waiting.
            let Some(token) = item.begin_transfer() else {
                return;
            };
            this.notify(true);

            let result = this.transfer(&item, &token).await;
            drop(permit);

            match result {
                Ok(()) => {
                    item.finish(DownloadStatus::Completed, None);
                    info!(id = item.id, name = %item.name, "download completed");
                }
                Err(err) => {
                    // finish() keeps a racing pause in Paused.
                    item.finish(DownloadStatus::Failed, Some(err.clone()));
                    match item.status() {
                        DownloadStatus::Paused => {
                            info!(id = item.id, name = %item.name, "download paused");
                        }
                        _ => warn!(id = item.id, name = %item.name, error = %err, "download failed"),
                    }
                }
            }
            this.notify(true);
        });
    }

    async fn transfer(
        &self,
        item: &DownloadItem,
        token: &tokio_util::sync::CancellationToken,
    ) -> Result<(), ItemError> {
        // Already on disk from an earlier run.
        if let Ok(meta) = fs::metadata(&item.dest_path).await {
            debug!(id = item.id, "destination exists, skipping transfer");
            item.set_counters(meta.len(), meta.len());
            return Ok(());
        }

        if let Some(parent) = item.dest_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ItemError::Other(format!("creating {}: {e}", parent.display())))?;
        }

        let part = part_path(&item.dest_path);
        let resume_from = match fs::metadata(&part).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        let download = tokio::select! {
            () = token.cancelled() => return Err(ItemError::Cancelled),
            res = self.client.download_file(&item.url, resume_from) => {
                res.map_err(|e| ItemError::Other(e.to_string()))?
            }
        };

        let reported = download.content_length.unwrap_or(0);
        let (mut file, done, total) = if download.resumed {
            debug!(id = item.id, resume_from, "resuming partial download");
            let file = fs::OpenOptions::new()
                .append(true)
                .open(&part)
                .await
                .map_err(|e| ItemError::Other(format!("opening {}: {e}", part.display())))?;
            (file, resume_from, resume_from + reported)
        } else {
            // Server ignored the range request; start over.
            let file = fs::File::create(&part)
                .await
                .map_err(|e| ItemError::Other(format!("creating {}: {e}", part.display())))?;
            (file, 0, reported)
        };
        item.set_counters(done, total);

        let mut stream = Box::pin(download.into_stream());
        loop {
            tokio::select! {
                () = token.cancelled() => {
                    let _ = file.flush().await;
                    return Err(ItemError::Cancelled);
                }
                chunk = stream.next() => match chunk {
                    None => break,
                    Some(Ok(bytes)) => {
                        file.write_all(&bytes)
                            .await
                            .map_err(|e| ItemError::Other(format!("writing {}: {e}", part.display())))?;
                        item.add_done(bytes.len() as u64);
                        self.notify(false);
                    }
                    Some(Err(e)) => return Err(ItemError::Other(e.to_string())),
                },
            }
        }

        file.flush()
            .await
            .map_err(|e| ItemError::Other(format!("flushing {}: {e}", part.display())))?;
        drop(file);

        fs::rename(&part, &item.dest_path)
            .await
            .map_err(|e| ItemError::Other(format!("renaming into place: {e}")))?;

        // Unknown totals resolve to the final byte count.
        if item.total_bytes() == 0 {
            item.set_counters(item.done_bytes(), item.done_bytes());
        }
        Ok(())
    }
}
