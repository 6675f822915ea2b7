//! A single tracked download and its observable state.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a download.
///
/// `Queued -> Active -> Completed | Failed | Paused`. Paused items go
/// back to `Queued` on resume; failed items go back to `Queued` on
/// retry. No other transitions exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    /// Waiting for a transfer slot.
    Queued,
    /// Transferring bytes.
    Active,
    /// Stopped by the user; partial data kept for resume.
    Paused,
    /// Fully written and renamed into place.
    Completed,
    /// Stopped by an error or cancellation; retryable.
    Failed,
}

impl DownloadStatus {
    /// Whether the item will make no further progress without user action.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Why a download failed.
#[derive(Debug, Clone, Error)]
pub enum ItemError {
    /// The user cancelled the transfer.
    #[error("cancelled")]
    Cancelled,

    /// Transport, filesystem, or server error.
    #[error("{0}")]
    Other(String),
}

#[derive(Debug)]
struct ItemState {
    status: DownloadStatus,
    error: Option<ItemError>,
    started_at: Option<Instant>,
    completed_at: Option<Instant>,
    cancel: Option<CancellationToken>,
}

/// One download tracked by the manager.
///
/// Byte counters are atomics so progress reads never contend with the
/// transfer loop; everything else lives behind a short-lived mutex.
#[derive(Debug)]
pub struct DownloadItem {
    /// Manager-assigned identifier, unique within a run.
    pub id: u64,
    /// Display name, usually the remote file name.
    pub name: String,
    /// Absolute source URL.
    pub url: String,
    /// Final destination path on disk.
    pub dest_path: PathBuf,
    done_bytes: AtomicU64,
    total_bytes: AtomicU64,
    state: Mutex<ItemState>,
}

fn unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DownloadItem {
    pub(crate) fn new(id: u64, name: String, url: String, dest_path: PathBuf) -> Self {
        Self {
            id,
            name,
            url,
            dest_path,
            done_bytes: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            state: Mutex::new(ItemState {
                status: DownloadStatus::Queued,
                error: None,
                started_at: None,
                completed_at: None,
                cancel: None,
            }),
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> DownloadStatus {
        unpoisoned(&self.state).status
    }

    /// The failure reason, if the item has one.
    #[must_use]
    pub fn error(&self) -> Option<ItemError> {
        unpoisoned(&self.state).error.clone()
    }

    /// Bytes written so far, including any resumed prefix.
    #[must_use]
    pub fn done_bytes(&self) -> u64 {
        self.done_bytes.load(Ordering::Relaxed)
    }

    /// Expected total size, or 0 when the server did not report one.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    /// Completed fraction in `0.0..=1.0`, or `None` with an unknown total.
    #[must_use]
    pub fn progress(&self) -> Option<f64> {
        let total = self.total_bytes();
        if total == 0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let fraction = (self.done_bytes() as f64 / total as f64).min(1.0);
        Some(fraction)
    }

    /// Average transfer speed in bytes/sec over the active period, or
    /// `None` before the transfer starts.
    #[must_use]
    pub fn speed(&self) -> Option<f64> {
        let state = unpoisoned(&self.state);
        let started = state.started_at?;
        let end = state.completed_at.unwrap_or_else(Instant::now);
        drop(state);
        let elapsed = end.duration_since(started).as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.done_bytes() as f64 / elapsed;
        Some(rate)
    }

    pub(crate) fn set_counters(&self, done: u64, total: u64) {
        self.done_bytes.store(done, Ordering::Relaxed);
        self.total_bytes.store(total, Ordering::Relaxed);
    }

    pub(crate) fn add_done(&self, n: u64) {
        self.done_bytes.fetch_add(n, Ordering::Relaxed);
    }

    /// Claims the Queued -> Active transition; returns the token the
    /// transfer must watch, or `None` if the item is no longer queued.
    pub(crate) fn begin_transfer(&self) -> Option<CancellationToken> {
        let mut state = unpoisoned(&self.state);
        if state.status != DownloadStatus::Queued {
            return None;
        }
        let token = CancellationToken::new();
        state.status = DownloadStatus::Active;
        state.error = None;
        state.started_at = Some(Instant::now());
        state.completed_at = None;
        state.cancel = Some(token.clone());
        Some(token)
    }

    /// Requests a stop. With `pause` the item lands in Paused; otherwise
    /// a queued item fails immediately as cancelled, and an active one
    /// fails once its transfer loop observes the token.
    pub(crate) fn request_stop(&self, pause: bool) -> bool {
        let mut state = unpoisoned(&self.state);
        match state.status {
            DownloadStatus::Queued => {
                if pause {
                    state.status = DownloadStatus::Paused;
                } else {
                    state.status = DownloadStatus::Failed;
                    state.error = Some(ItemError::Cancelled);
                }
                true
            }
            DownloadStatus::Active => {
                if pause {
                    state.status = DownloadStatus::Paused;
                }
                if let Some(token) = &state.cancel {
                    token.cancel();
                }
                true
            }
            _ => false,
        }
    }

    /// Whether the transfer loop should treat an observed stop as a pause.
    pub(crate) fn stop_was_pause(&self) -> bool {
        unpoisoned(&self.state).status == DownloadStatus::Paused
    }

    /// Moves a paused or failed item back to the queue. Returns false if
    /// the item is in any other state.
    pub(crate) fn requeue(&self, from: DownloadStatus) -> bool {
        let mut state = unpoisoned(&self.state);
        if state.status != from {
            return false;
        }
        state.status = DownloadStatus::Queued;
        state.error = None;
        state.cancel = None;
        true
    }

    pub(crate) fn finish(&self, status: DownloadStatus, error: Option<ItemError>) {
        let mut state = unpoisoned(&self.state);
        // A pause that raced the final chunk stays paused.
        if state.status == DownloadStatus::Paused && status != DownloadStatus::Completed {
            state.cancel = None;
            return;
        }
        state.status = status;
        state.error = error;
        state.completed_at = Some(Instant::now());
        state.cancel = None;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn item() -> DownloadItem {
        DownloadItem::new(
            1,
            "game.zip".to_string(),
            "https://example.com/files/game.zip".to_string(),
            PathBuf::from("/tmp/game.zip"),
        )
    }

    #[test]
    fn test_new_item_is_queued() {
        let item = item();
        assert_eq!(item.status(), DownloadStatus::Queued);
        assert!(item.error().is_none());
        assert_eq!(item.done_bytes(), 0);
    }

    #[test]
    fn test_begin_transfer_only_from_queued() {
        let item = item();
        assert!(item.begin_transfer().is_some());
        assert_eq!(item.status(), DownloadStatus::Active);
        assert!(item.begin_transfer().is_none());
    }

    #[test]
    fn test_cancel_queued_fails_immediately() {
        let item = item();
        assert!(item.request_stop(false));
        assert_eq!(item.status(), DownloadStatus::Failed);
        assert!(matches!(item.error(), Some(ItemError::Cancelled)));
    }

    #[test]
    fn test_pause_active_fires_token() {
        let item = item();
        let token = item.begin_transfer().unwrap();
        assert!(item.request_stop(true));
        assert!(token.is_cancelled());
        assert_eq!(item.status(), DownloadStatus::Paused);
        assert!(item.stop_was_pause());
    }

    #[test]
    fn test_requeue_checks_source_state() {
        let item = item();
        item.request_stop(false); // Queued -> Failed (cancelled)
        assert!(!item.requeue(DownloadStatus::Paused));
        assert!(item.requeue(DownloadStatus::Failed));
        assert_eq!(item.status(), DownloadStatus::Queued);
        assert!(item.error().is_none());
    }

    #[test]
    fn test_terminal_states() {
        assert!(DownloadStatus::Completed.is_terminal());
        assert!(DownloadStatus::Failed.is_terminal());
        assert!(!DownloadStatus::Paused.is_terminal());
        assert!(!DownloadStatus::Queued.is_terminal());
        assert!(!DownloadStatus::Active.is_terminal());
    }

    #[test]
    fn test_progress_fraction() {
        let item = item();
        assert!(item.progress().is_none());
        item.set_counters(50, 200);
        assert!((item.progress().unwrap() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_finish_respects_racing_pause() {
        let item = item();
        let _token = item.begin_transfer().unwrap();
        item.request_stop(true);
        item.finish(
            DownloadStatus::Failed,
            Some(ItemError::Other("stream closed".to_string())),
        );
        assert_eq!(item.status(), DownloadStatus::Paused);
        assert!(item.error().is_none());
    }
}
