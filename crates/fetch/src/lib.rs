//! Fetch step of the request pipeline.
//!
//! A [`Fetcher`] turns a URL into a `(name, content, size)` triple. The
//! pipeline never awaits a fetcher directly: it runs it inside a
//! [`FetchWorker`], which can be killed from another task and which enforces
//! a hard wall-clock timeout.

mod http;
mod worker;

use std::future::Future;
use std::pin::Pin;

pub use http::HttpFetcher;
pub use worker::{FetchWorker, WorkerHandle};

/// Default maximum fetch size: 200 MiB.
pub const DEFAULT_MAX_FETCH_SIZE: u64 = 200 * 1024 * 1024;

/// Parameters of one fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    /// Size cap in bytes.
    pub max_size: u64,
    /// Trusted callers bypass `max_size`.
    pub privileged: bool,
}

impl FetchRequest {
    /// Effective size cap, `None` for privileged requests.
    pub fn limit(&self) -> Option<u64> {
        (!self.privileged).then_some(self.max_size)
    }
}

/// Result of a successful fetch.
#[derive(Debug, Clone)]
pub struct FetchedFile {
    /// Logical file name.
    pub name: String,
    pub content: Vec<u8>,
    pub size: u64,
}

impl FetchedFile {
    pub fn new(name: impl Into<String>, content: Vec<u8>) -> Self {
        let size = content.len() as u64;
        Self {
            name: name.into(),
            content,
            size,
        }
    }
}

/// Errors produced by fetchers and the fetch worker.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("file exceeds the {limit} byte limit")]
    SizeExceeded { limit: u64 },

    #[error("fetch timed out")]
    Timeout,

    #[error("fetch cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("{0}")]
    Failed(String),
}

/// Boxed future returned by [`Fetcher::fetch`].
pub type FetchFuture = Pin<Box<dyn Future<Output = Result<FetchedFile, FetchError>> + Send + 'static>>;

/// Produces file content for a URL.
///
/// The returned future must own everything it needs so it can run inside a
/// detached worker task.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, request: FetchRequest) -> FetchFuture;
}
