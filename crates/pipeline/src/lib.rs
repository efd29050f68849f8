//! Request pipeline.
//!
//! A [`Dispatcher`] admits requests into a bounded queue and runs each one on
//! a fixed-size pool: fetch the URL in a killable worker, pack the content
//! into fixed-size volumes on scratch storage, upload the volumes one by one
//! with a single retry, and deliver either a manifest of download links or a
//! failure message to a [`ReplySink`]. Progress and cancellation are exposed
//! per identity while a request is in flight.

mod admission;
mod config;
mod error;
mod manifest;
mod orchestrator;
mod registry;
mod sink;
mod tracker;
mod upload;

pub use admission::{CancelOutcome, Dispatcher, Request, RequestStatus};
pub use config::PipelineConfig;
pub use error::{PipelineError, Rejection};
pub use manifest::{Delivery, Manifest, ManifestEntry, attachment_name};
pub use registry::TrackerRegistry;
pub use sink::{ChannelSink, ReplySink, RequestOutcome};
pub use tracker::{ChunkState, Progress, Snapshot, Tracker};

/// Login credentials of the account that uploads a request's chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub phone: String,
    pub password: String,
}
