//! Live state of one in-flight request.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use parcel_fetch::WorkerHandle;
use parcel_storage::StorageClient;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::PipelineError;

/// Authentication and upload state of the chunk being sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkState {
    /// 0-based chunk position.
    pub index: usize,
    pub authenticated: bool,
    pub uploaded: bool,
}

/// Phase of a request and, once chunked, how far its upload has come.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Fetching,
    Chunking,
    Uploading {
        chunk_count: usize,
        /// Chunks fully uploaded.
        completed: usize,
        current: Option<ChunkState>,
    },
}

impl Progress {
    /// Progress on a single scale: -2 while fetching, -1 while chunking, then
    /// +0.5 for each chunk authentication and +0.5 for each chunk upload.
    pub fn value(&self) -> f64 {
        match self {
            Self::Fetching => -2.0,
            Self::Chunking => -1.0,
            Self::Uploading {
                completed, current, ..
            } => {
                let half = current.is_some_and(|c| c.authenticated && !c.uploaded);
                *completed as f64 + if half { 0.5 } else { 0.0 }
            }
        }
    }

    /// Number of chunks, once known.
    pub fn chunk_count(&self) -> Option<usize> {
        match self {
            Self::Uploading { chunk_count, .. } => Some(*chunk_count),
            _ => None,
        }
    }
}

/// Point-in-time view of a tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub progress: Progress,
    /// Fetched size in bytes, 0 until the fetch completes.
    pub total_size: u64,
    pub canceled: bool,
}

struct State {
    progress: Progress,
    total_size: u64,
}

#[derive(Default)]
struct Handles {
    worker: Option<WorkerHandle>,
    client: Option<Arc<dyn StorageClient>>,
}

/// Per-request state shared between the orchestrating task, status queries
/// and cancellation.
///
/// Only the orchestrating task advances progress. Cancellation is the one
/// externally written field: it is one-way, and it reaches whichever worker
/// or storage client is attached at the time, or at attach time if it came
/// first.
pub struct Tracker {
    identity: String,
    state: RwLock<State>,
    cancel: CancellationToken,
    handles: Mutex<Handles>,
}

impl Tracker {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            state: RwLock::new(State {
                progress: Progress::Fetching,
                total_size: 0,
            }),
            cancel: CancellationToken::new(),
            handles: Mutex::new(Handles::default()),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Snapshot {
            progress: state.progress,
            total_size: state.total_size,
            canceled: self.is_canceled(),
        }
    }

    pub fn progress(&self) -> Progress {
        self.snapshot().progress
    }

    // --- cancellation ---

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token that resolves once the request is canceled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn check_canceled(&self) -> Result<(), PipelineError> {
        if self.is_canceled() {
            Err(PipelineError::Canceled)
        } else {
            Ok(())
        }
    }

    /// Cancels the request, killing the attached fetch worker and aborting
    /// the attached storage client.
    ///
    /// Returns `false` if the request was already canceled.
    pub fn cancel(&self) -> bool {
        let handles = self.lock_handles();
        if self.cancel.is_cancelled() {
            return false;
        }
        self.cancel.cancel();
        if let Some(worker) = &handles.worker {
            worker.kill();
        }
        if let Some(client) = &handles.client {
            client.abort();
        }
        debug!(identity = %self.identity, "tracker canceled");
        true
    }

    pub fn attach_worker(&self, worker: WorkerHandle) {
        let mut handles = self.lock_handles();
        if self.cancel.is_cancelled() {
            worker.kill();
        }
        handles.worker = Some(worker);
    }

    pub fn detach_worker(&self) {
        self.lock_handles().worker = None;
    }

    pub fn attach_client(&self, client: Arc<dyn StorageClient>) {
        let mut handles = self.lock_handles();
        if self.cancel.is_cancelled() {
            client.abort();
        }
        handles.client = Some(client);
    }

    pub fn detach_client(&self) {
        self.lock_handles().client = None;
    }

    pub fn has_worker(&self) -> bool {
        self.lock_handles().worker.is_some()
    }

    pub fn has_client(&self) -> bool {
        self.lock_handles().client.is_some()
    }

    // --- progress, written by the orchestrating task only ---

    /// Fetch finished with `size` bytes; chunking starts.
    pub fn mark_fetched(&self, size: u64) {
        self.update(|state| {
            if state.progress == Progress::Fetching {
                state.total_size = size;
                state.progress = Progress::Chunking;
            }
        });
    }

    /// Chunking produced `chunk_count` chunks. Only the first call counts.
    pub fn mark_chunked(&self, chunk_count: usize) {
        self.update(|state| {
            if matches!(state.progress, Progress::Uploading { .. }) {
                debug!(identity = %self.identity, "chunk count already set");
                return;
            }
            state.progress = Progress::Uploading {
                chunk_count,
                completed: 0,
                current: None,
            };
        });
    }

    /// Chunk `index` (0-based) becomes the one being sent.
    pub fn begin_chunk(&self, index: usize) {
        self.update_chunk(|completed, current| {
            if current.is_none_or(|c| c.index != index) && index == *completed {
                *current = Some(ChunkState {
                    index,
                    ..ChunkState::default()
                });
            }
        });
    }

    /// Credits the authentication half of the current chunk, once.
    pub fn mark_authenticated(&self) {
        self.update_chunk(|_, current| {
            if let Some(chunk) = current {
                chunk.authenticated = true;
            }
        });
    }

    /// Credits the upload half of the current chunk, once.
    pub fn mark_uploaded(&self) {
        self.update_chunk(|completed, current| {
            if let Some(chunk) = current
                && !chunk.uploaded
            {
                chunk.authenticated = true;
                chunk.uploaded = true;
                *completed += 1;
            }
        });
    }

    fn update(&self, f: impl FnOnce(&mut State)) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state);
    }

    fn update_chunk(&self, f: impl FnOnce(&mut usize, &mut Option<ChunkState>)) {
        self.update(|state| {
            if let Progress::Uploading {
                completed, current, ..
            } = &mut state.progress
            {
                f(completed, current);
            }
        });
    }

    fn lock_handles(&self) -> MutexGuard<'_, Handles> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("identity", &self.identity)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parcel_storage::{AbortSignal, StorageError, StorageFuture};

    struct IdleClient {
        signal: AbortSignal,
    }

    impl StorageClient for IdleClient {
        fn login<'a>(&'a self, _: &'a str, _: &'a str) -> StorageFuture<'a, String> {
            Box::pin(async { Err(StorageError::Auth("unused".into())) })
        }

        fn upload<'a>(&'a self, _: &'a str, _: &'a [u8]) -> StorageFuture<'a, String> {
            Box::pin(async { Err(StorageError::Upload("unused".into())) })
        }

        fn abort(&self) {
            self.signal.abort();
        }
    }

    #[test]
    fn progress_values_follow_phases() {
        let tracker = Tracker::new("a@example.org");
        assert_eq!(tracker.progress().value(), -2.0);

        tracker.mark_fetched(4096);
        assert_eq!(tracker.progress().value(), -1.0);
        assert_eq!(tracker.snapshot().total_size, 4096);

        tracker.mark_chunked(2);
        assert_eq!(tracker.progress().value(), 0.0);
        assert_eq!(tracker.progress().chunk_count(), Some(2));

        tracker.begin_chunk(0);
        tracker.mark_authenticated();
        assert_eq!(tracker.progress().value(), 0.5);
        tracker.mark_uploaded();
        assert_eq!(tracker.progress().value(), 1.0);

        tracker.begin_chunk(1);
        assert_eq!(tracker.progress().value(), 1.0);
        tracker.mark_authenticated();
        tracker.mark_uploaded();
        assert_eq!(tracker.progress().value(), 2.0);
    }

    #[test]
    fn retry_does_not_double_credit() {
        let tracker = Tracker::new("a@example.org");
        tracker.mark_fetched(10);
        tracker.mark_chunked(1);
        tracker.begin_chunk(0);

        // First attempt: login ok, upload fails.
        tracker.mark_authenticated();
        // Retry: login ok again, upload ok.
        tracker.begin_chunk(0);
        tracker.mark_authenticated();
        assert_eq!(tracker.progress().value(), 0.5);
        tracker.mark_uploaded();
        tracker.mark_uploaded();
        assert_eq!(tracker.progress().value(), 1.0);
    }

    #[test]
    fn chunk_count_is_set_once() {
        let tracker = Tracker::new("a@example.org");
        tracker.mark_fetched(10);
        tracker.mark_chunked(3);
        tracker.mark_chunked(7);
        assert_eq!(tracker.progress().chunk_count(), Some(3));
    }

    #[test]
    fn cancel_is_idempotent() {
        let tracker = Tracker::new("a@example.org");
        assert!(tracker.check_canceled().is_ok());
        assert!(tracker.cancel());
        assert!(!tracker.cancel());
        assert!(tracker.is_canceled());
        assert!(tracker.check_canceled().unwrap_err().is_canceled());
    }

    #[test]
    fn cancel_aborts_attached_client() {
        let tracker = Tracker::new("a@example.org");
        let signal = AbortSignal::new();
        tracker.attach_client(Arc::new(IdleClient {
            signal: signal.clone(),
        }));
        tracker.cancel();
        assert!(signal.is_aborted());
    }

    #[test]
    fn late_attach_sees_cancellation() {
        let tracker = Tracker::new("a@example.org");
        tracker.cancel();

        let signal = AbortSignal::new();
        tracker.attach_client(Arc::new(IdleClient {
            signal: signal.clone(),
        }));
        assert!(signal.is_aborted());
        tracker.detach_client();
        assert!(!tracker.has_client());
    }
}
