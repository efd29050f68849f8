//! Remote storage client contract.
//!
//! The pipeline uploads chunks through a [`StorageClient`]: log in with the
//! account credentials, upload bytes with the returned token, get back a
//! download URL. [`StorageClient::abort`] must make any call blocked on the
//! same instance return [`StorageError::Aborted`] promptly; [`AbortSignal`]
//! implements that guarantee for client implementations.

mod abort;
mod http;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub use abort::AbortSignal;
pub use http::{HttpStorageClient, HttpStorageConfig, HttpStorageProvider};

/// Errors produced by storage clients.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("aborted")]
    Aborted,
}

impl StorageError {
    /// Returns `true` when the call ended because the client was aborted.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// Boxed future returned by [`StorageClient`] calls.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Authenticated chunk upload to the remote storage service.
pub trait StorageClient: Send + Sync {
    /// Exchanges credentials for an access token.
    fn login<'a>(&'a self, phone: &'a str, password: &'a str) -> StorageFuture<'a, String>;

    /// Uploads `data` and returns its download URL.
    fn upload<'a>(&'a self, token: &'a str, data: &'a [u8]) -> StorageFuture<'a, String>;

    /// Interrupts every in-flight and future call on this instance.
    fn abort(&self);
}

/// Hands out a fresh [`StorageClient`] instance per request.
pub trait StorageProvider: Send + Sync {
    fn client(&self) -> Arc<dyn StorageClient>;
}
