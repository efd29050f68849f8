//! Admission control, scheduling, status and cancellation.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use parcel_fetch::Fetcher;
use parcel_storage::StorageProvider;
use tokio::sync::{Notify, Semaphore};
use tracing::{error, info, warn};

use crate::manifest::group_thousands;
use crate::orchestrator::Orchestrator;
use crate::{
    Credentials, PipelineConfig, PipelineError, Progress, Rejection, ReplySink, RequestOutcome,
    Tracker, TrackerRegistry,
};

/// A request to fetch `url` on behalf of `identity`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub identity: String,
    pub url: String,
    pub credentials: Credentials,
    /// Bypasses the fetch size cap.
    pub privileged: bool,
}

/// What an identity's request is doing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RequestStatus {
    /// No pending or active request.
    Idle,
    /// Accepted, waiting for a free worker.
    Queued,
    /// Fetching or chunking; the chunk count is not known yet.
    Fetching,
    Uploading {
        /// Progress value, from 0 up to `chunk_count`.
        progress: f64,
        chunk_count: usize,
        total_size: u64,
    },
}

impl RequestStatus {
    /// Fraction of chunks uploaded, once uploading.
    pub fn ratio(&self) -> Option<f64> {
        match self {
            Self::Uploading {
                progress,
                chunk_count,
                ..
            } if *chunk_count > 0 => Some(progress.max(0.0) / *chunk_count as f64),
            _ => None,
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("You have no pending request."),
            Self::Queued => f.write_str("Your request is queued, wait for your turn."),
            Self::Fetching => f.write_str("Your request is downloading..."),
            Self::Uploading {
                progress,
                chunk_count,
                total_size,
            } => {
                let done = progress.max(0.0).floor() as usize;
                let filled = if *chunk_count > 0 {
                    (10.0 * done as f64 / *chunk_count as f64).round() as usize
                } else {
                    0
                };
                let bar = "■".repeat(filled.min(10)) + &"□".repeat(10 - filled.min(10));
                write!(
                    f,
                    "Your request is uploading...\n\n{bar}\n{done}/{chunk_count} ({}KB)",
                    group_thousands(total_size / 1024)
                )
            }
        }
    }
}

/// Result of a cancel call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Canceled,
    /// The request was canceled before; nothing changed.
    AlreadyCanceled,
    /// The request is still waiting for a worker and cannot be canceled yet.
    Queued,
    NothingToCancel,
}

impl fmt::Display for CancelOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Canceled => "Canceling your download.",
            Self::AlreadyCanceled => "Your download is already being canceled.",
            Self::Queued => {
                "Your request is still queued, it can be canceled once its download starts."
            }
            Self::NothingToCancel => "You have no download in progress.",
        })
    }
}

struct Shared {
    config: PipelineConfig,
    fetcher: Arc<dyn Fetcher>,
    storage: Arc<dyn StorageProvider>,
    sink: Arc<dyn ReplySink>,
    /// Pending and active requests. Trackers are created at admission and
    /// become visible to status and cancel once their request starts.
    pending: Mutex<HashMap<String, Arc<Tracker>>>,
    active: TrackerRegistry,
    workers: Arc<Semaphore>,
    idle: Notify,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, HashMap<String, Arc<Tracker>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn process(self: Arc<Self>, request: Request, tracker: Arc<Tracker>) {
        let guard = Release {
            shared: Arc::clone(&self),
            tracker: Arc::clone(&tracker),
        };

        let cancel = tracker.cancel_token();
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = Arc::clone(&self.workers).acquire_owned() => permit.ok(),
        };

        let result = match permit {
            Some(_permit) => {
                self.active.track(Arc::clone(&tracker));
                info!(identity = %request.identity, url = %request.url, "request started");
                let orchestrator = Orchestrator {
                    config: &self.config,
                    fetcher: self.fetcher.as_ref(),
                    storage: self.storage.as_ref(),
                };
                // A panicking fetcher or storage client must still produce an outcome.
                AssertUnwindSafe(orchestrator.run(&request, &tracker))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(PipelineError::Internal))
            }
            None => Err(PipelineError::Canceled),
        };

        match &result {
            Ok(delivery) => info!(
                identity = %request.identity,
                name = %delivery.file_name,
                chunks = delivery.manifest.len(),
                "request completed"
            ),
            Err(PipelineError::Canceled) => info!(identity = %request.identity, "request canceled"),
            Err(e) => error!(identity = %request.identity, url = %request.url, error = %e, "request failed"),
        }

        drop(guard);
        self.sink.deliver(RequestOutcome {
            identity: request.identity,
            url: request.url,
            result,
        });
    }
}

/// Releases a request's identity when its task ends, including when the task
/// is aborted or panics.
struct Release {
    shared: Arc<Shared>,
    tracker: Arc<Tracker>,
}

impl Drop for Release {
    fn drop(&mut self) {
        self.shared.active.untrack(&self.tracker);
        let mut pending = self.shared.pending();
        let identity = self.tracker.identity();
        if pending
            .get(identity)
            .is_some_and(|current| Arc::ptr_eq(current, &self.tracker))
        {
            pending.remove(identity);
        }
        if pending.is_empty() {
            self.shared.idle.notify_waiters();
        }
    }
}

/// Accepts requests into a bounded queue and runs them on a fixed number of
/// workers.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub fn new(
        config: PipelineConfig,
        fetcher: Arc<dyn Fetcher>,
        storage: Arc<dyn StorageProvider>,
        sink: Arc<dyn ReplySink>,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.workers.max(1)));
        Self {
            shared: Arc::new(Shared {
                config,
                fetcher,
                storage,
                sink,
                pending: Mutex::new(HashMap::new()),
                active: TrackerRegistry::new(),
                workers,
                idle: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    /// Queues `request` without waiting for it to start.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, request: Request) -> Result<(), Rejection> {
        let tracker = {
            let mut pending = self.shared.pending();
            if pending.contains_key(&request.identity) {
                warn!(identity = %request.identity, "rejected: already queued");
                return Err(Rejection::AlreadyQueued);
            }
            if pending.len() >= self.shared.config.queue_capacity {
                warn!(identity = %request.identity, pending = pending.len(), "rejected: queue full");
                return Err(Rejection::QueueFull);
            }
            let tracker = Arc::new(Tracker::new(request.identity.clone()));
            pending.insert(request.identity.clone(), Arc::clone(&tracker));
            tracker
        };

        info!(identity = %request.identity, url = %request.url, "request accepted");
        tokio::spawn(Arc::clone(&self.shared).process(request, tracker));
        Ok(())
    }

    pub fn status(&self, identity: &str) -> RequestStatus {
        if let Some(tracker) = self.shared.active.get(identity) {
            let snapshot = tracker.snapshot();
            return match snapshot.progress {
                Progress::Fetching | Progress::Chunking => RequestStatus::Fetching,
                progress @ Progress::Uploading { chunk_count, .. } => RequestStatus::Uploading {
                    progress: progress.value(),
                    chunk_count,
                    total_size: snapshot.total_size,
                },
            };
        }
        if self.is_pending(identity) {
            RequestStatus::Queued
        } else {
            RequestStatus::Idle
        }
    }

    /// Cancels the running request of `identity`.
    pub fn cancel(&self, identity: &str) -> CancelOutcome {
        match self.shared.active.get(identity) {
            Some(tracker) if tracker.cancel() => {
                info!(identity, "cancel requested");
                CancelOutcome::Canceled
            }
            Some(_) => CancelOutcome::AlreadyCanceled,
            None if self.is_pending(identity) => CancelOutcome::Queued,
            None => CancelOutcome::NothingToCancel,
        }
    }

    /// Cancels every pending and active request. Queued requests end as
    /// canceled without starting.
    pub fn cancel_all(&self) -> usize {
        let trackers: Vec<_> = self.shared.pending().values().cloned().collect();
        let canceled = trackers.iter().filter(|t| t.cancel()).count();
        if canceled > 0 {
            info!(canceled, "canceled all requests");
        }
        canceled
    }

    /// Resolves once no request is pending or active.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.pending().is_empty() {
                return;
            }
            notified.await;
        }
    }

    pub fn is_pending(&self, identity: &str) -> bool {
        self.shared.pending().contains_key(identity)
    }

    /// Pending plus active requests.
    pub fn pending_count(&self) -> usize {
        self.shared.pending().len()
    }

    pub fn active_count(&self) -> usize {
        self.shared.active.len()
    }
}
