use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::StorageError;

/// One-way abort flag for a storage client instance.
///
/// Calls wrapped with [`run`](Self::run) return [`StorageError::Aborted`] as
/// soon as [`abort`](Self::abort) is called, dropping the wrapped future and
/// any network I/O it was blocked on. Once aborted, the signal stays aborted.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    token: CancellationToken,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Runs `fut` unless or until the signal is aborted.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        if self.is_aborted() {
            return Err(StorageError::Aborted);
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(StorageError::Aborted),
            result = fut => result,
        }
    }
}
