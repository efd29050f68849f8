//! Drives one request through fetch, chunking and upload.

use std::sync::Arc;

use parcel_fetch::{FetchRequest, FetchWorker, FetchedFile, Fetcher};
use parcel_storage::StorageProvider;
use parcel_volume::{ScratchArea, Volume};
use tracing::{info, warn};

use crate::upload::ChunkUploader;
use crate::{Delivery, PipelineConfig, PipelineError, Request, Tracker};

pub(crate) struct Orchestrator<'a> {
    pub config: &'a PipelineConfig,
    pub fetcher: &'a dyn Fetcher,
    pub storage: &'a dyn StorageProvider,
}

impl Orchestrator<'_> {
    /// Processes `request`, reporting progress through `tracker`.
    ///
    /// The fetch worker is killed and the scratch area removed before this
    /// returns, whatever the outcome.
    pub async fn run(&self, request: &Request, tracker: &Tracker) -> Result<Delivery, PipelineError> {
        tracker.check_canceled()?;

        let FetchedFile {
            name,
            content,
            size,
        } = self.fetch(request, tracker).await?;
        tracker.check_canceled()?;
        tracker.mark_fetched(size);
        info!(identity = %request.identity, url = %request.url, name = %name, size, "fetched");

        let scratch = ScratchArea::new(self.config.scratch_dir.as_deref())?;
        let result = self.chunk_and_upload(request, tracker, &scratch, &name, content).await;
        if let Err(e) = scratch.close() {
            warn!(identity = %request.identity, error = %e, "failed to remove scratch area");
        }

        Ok(Delivery {
            file_name: name,
            total_size: size,
            manifest: result?,
        })
    }

    async fn fetch(&self, request: &Request, tracker: &Tracker) -> Result<FetchedFile, PipelineError> {
        let worker = FetchWorker::spawn(
            self.fetcher,
            FetchRequest {
                url: request.url.clone(),
                max_size: self.config.max_fetch_size,
                privileged: request.privileged,
            },
        );
        tracker.attach_worker(worker.handle());

        let result = worker.wait(self.config.fetch_timeout()).await;
        tracker.detach_worker();

        result.map_err(|e| {
            if tracker.is_canceled() {
                PipelineError::Canceled
            } else {
                e.into()
            }
        })
    }

    async fn chunk_and_upload(
        &self,
        request: &Request,
        tracker: &Tracker,
        scratch: &ScratchArea,
        name: &str,
        content: Vec<u8>,
    ) -> Result<crate::Manifest, PipelineError> {
        let volumes = self.chunk(scratch, name, content).await?;
        tracker.check_canceled()?;
        tracker.mark_chunked(volumes.len());
        info!(identity = %request.identity, chunks = volumes.len(), "chunked");

        let client = self.storage.client();
        tracker.attach_client(Arc::clone(&client));
        let uploader = ChunkUploader {
            tracker,
            client: client.as_ref(),
            credentials: &request.credentials,
            backoff: self.config.retry_backoff(),
        };
        let result = uploader.upload_all(&volumes).await;
        tracker.detach_client();
        result
    }

    async fn chunk(
        &self,
        scratch: &ScratchArea,
        name: &str,
        content: Vec<u8>,
    ) -> Result<Vec<Volume>, PipelineError> {
        let name = name.to_string();
        let dir = scratch.path().to_path_buf();
        let volume_size = self.config.volume_size;
        let volumes = tokio::task::spawn_blocking(move || {
            parcel_volume::split(&name, content, volume_size, &dir)
        })
        .await
        .map_err(std::io::Error::other)??;
        Ok(volumes)
    }
}
