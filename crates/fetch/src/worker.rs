//! Killable execution context for fetches.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, warn};

use crate::{FetchError, FetchRequest, FetchedFile, Fetcher};

/// Handle that can terminate a running [`FetchWorker`] from any task.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    abort: AbortHandle,
}

impl WorkerHandle {
    /// Terminates the worker. In-flight network I/O inside it is dropped.
    pub fn kill(&self) {
        self.abort.abort();
    }

    /// Returns `true` once the worker task has stopped running.
    pub fn is_terminated(&self) -> bool {
        self.abort.is_finished()
    }
}

/// A fetch running on its own task with a bounded-wait result channel.
///
/// Dropping the worker kills it.
pub struct FetchWorker {
    task: JoinHandle<()>,
    handle: WorkerHandle,
    result: oneshot::Receiver<Result<FetchedFile, FetchError>>,
}

impl FetchWorker {
    /// Starts `fetcher` on a new task. Must be called inside a tokio runtime.
    pub fn spawn(fetcher: &dyn Fetcher, request: FetchRequest) -> Self {
        let (tx, rx) = oneshot::channel();
        let url = request.url.clone();
        let fut = fetcher.fetch(request);

        let task = tokio::spawn(async move {
            let result = fut.await;
            if tx.send(result).is_err() {
                debug!(%url, "fetch result dropped, waiter is gone");
            }
        });

        Self {
            handle: WorkerHandle {
                abort: task.abort_handle(),
            },
            task,
            result: rx,
        }
    }

    /// Returns a handle for killing this worker.
    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    /// Waits up to `timeout` for the result.
    ///
    /// On timeout the worker is killed before [`FetchError::Timeout`] is
    /// returned. A killed worker yields [`FetchError::Cancelled`]; a worker
    /// that panicked yields [`FetchError::Failed`].
    pub async fn wait(mut self, timeout: Duration) -> Result<FetchedFile, FetchError> {
        match tokio::time::timeout(timeout, &mut self.result).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => match (&mut self.task).await {
                Err(e) if e.is_panic() => {
                    warn!("fetch worker panicked");
                    Err(FetchError::Failed("fetch worker exited without a result".into()))
                }
                _ => Err(FetchError::Cancelled),
            },
            Err(_) => {
                self.handle.kill();
                Err(FetchError::Timeout)
            }
        }
    }
}

impl Drop for FetchWorker {
    fn drop(&mut self) {
        self.handle.kill();
    }
}
