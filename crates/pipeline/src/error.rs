//! Pipeline error types.

use parcel_fetch::FetchError;
use parcel_storage::StorageError;
use parcel_volume::VolumeError;

/// Terminal failure of one request.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("file exceeds the {limit} byte limit")]
    SizeExceeded { limit: u64 },

    #[error("download timed out")]
    Timeout,

    #[error("{0}")]
    Fetch(String),

    #[error("failed to upload part {index} ({size} B): {cause}")]
    ChunkUploadFailed {
        /// 1-based chunk position.
        index: usize,
        size: u64,
        cause: StorageError,
    },

    #[error("download canceled")]
    Canceled,

    #[error("volume error: {0}")]
    Volume(#[from] VolumeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The request's task panicked.
    #[error("internal error")]
    Internal,
}

impl PipelineError {
    /// Text shown to the requester.
    ///
    /// Oversized files get a short fixed message instead of the raw cause.
    pub fn user_message(&self) -> String {
        match self {
            Self::SizeExceeded { .. } => "file too large".into(),
            other => other.to_string(),
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

impl From<FetchError> for PipelineError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::SizeExceeded { limit } => Self::SizeExceeded { limit },
            FetchError::Timeout => Self::Timeout,
            FetchError::Cancelled => Self::Canceled,
            other => Self::Fetch(other.to_string()),
        }
    }
}

/// Admission-time refusal of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("you already have a pending request, wait for it to finish")]
    AlreadyQueued,

    #[error("too many pending requests, try again later")]
    QueueFull,
}
