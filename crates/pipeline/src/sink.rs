use tokio::sync::mpsc;
use tracing::debug;

use crate::{Delivery, PipelineError};

/// Terminal result of one request. Exactly one is delivered per accepted
/// request.
#[derive(Debug)]
pub struct RequestOutcome {
    pub identity: String,
    pub url: String,
    pub result: Result<Delivery, PipelineError>,
}

impl RequestOutcome {
    /// Reply text for the requester.
    pub fn message(&self) -> String {
        match &self.result {
            Ok(delivery) => delivery.caption(),
            Err(PipelineError::Canceled) => PipelineError::Canceled.to_string(),
            Err(e) => format!("download failed: {}", e.user_message()),
        }
    }
}

/// Receives request outcomes.
pub trait ReplySink: Send + Sync {
    fn deliver(&self, outcome: RequestOutcome);
}

/// Forwards outcomes into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<RequestOutcome>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RequestOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ReplySink for ChannelSink {
    fn deliver(&self, outcome: RequestOutcome) {
        if let Err(e) = self.tx.send(outcome) {
            debug!(identity = %e.0.identity, "outcome dropped, receiver is gone");
        }
    }
}
