//! Sequential chunk upload with one retry per chunk.

use std::time::Duration;

use parcel_storage::{StorageClient, StorageError};
use parcel_volume::Volume;
use tracing::{debug, warn};

use crate::{Credentials, Manifest, PipelineError, Tracker};

/// Uploads a request's volumes in order through one storage client.
pub(crate) struct ChunkUploader<'a> {
    pub tracker: &'a Tracker,
    pub client: &'a dyn StorageClient,
    pub credentials: &'a Credentials,
    pub backoff: Duration,
}

impl ChunkUploader<'_> {
    /// Uploads every volume, stopping at the first chunk that fails twice.
    ///
    /// Cancellation is checked before each chunk and interrupts a login,
    /// upload or backoff already in progress.
    pub async fn upload_all(&self, volumes: &[Volume]) -> Result<Manifest, PipelineError> {
        let mut manifest = Manifest::new();
        for volume in volumes {
            self.tracker.check_canceled()?;
            debug!(
                identity = %self.tracker.identity(),
                chunk = volume.index,
                of = volumes.len(),
                "uploading chunk"
            );
            let data = tokio::fs::read(&volume.path).await?;
            let url = self.upload_chunk(volume, &data).await?;
            manifest.push(url, &volume.name);
        }
        Ok(manifest)
    }

    async fn upload_chunk(&self, volume: &Volume, data: &[u8]) -> Result<String, PipelineError> {
        self.tracker.begin_chunk(volume.index - 1);

        let first = match self.attempt(data).await {
            Ok(url) => return Ok(url),
            Err(e) if self.is_cancellation(&e) => return Err(PipelineError::Canceled),
            Err(e) => e,
        };
        warn!(
            identity = %self.tracker.identity(),
            chunk = volume.index,
            error = %first,
            backoff = ?self.backoff,
            "chunk upload failed, retrying"
        );

        let cancel = self.tracker.cancel_token();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Canceled),
            _ = tokio::time::sleep(self.backoff) => {}
        }

        match self.attempt(data).await {
            Ok(url) => Ok(url),
            Err(e) if self.is_cancellation(&e) => Err(PipelineError::Canceled),
            Err(cause) => Err(PipelineError::ChunkUploadFailed {
                index: volume.index,
                size: data.len() as u64,
                cause,
            }),
        }
    }

    /// Fresh login followed by the upload. Each half is credited at most once
    /// per chunk, however many attempts it takes.
    async fn attempt(&self, data: &[u8]) -> Result<String, StorageError> {
        let token = self
            .client
            .login(&self.credentials.phone, &self.credentials.password)
            .await?;
        self.tracker.mark_authenticated();

        let url = self.client.upload(&token, data).await?;
        self.tracker.mark_uploaded();
        Ok(url)
    }

    fn is_cancellation(&self, e: &StorageError) -> bool {
        e.is_aborted() || self.tracker.is_canceled()
    }
}
