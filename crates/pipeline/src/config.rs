use std::path::PathBuf;
use std::time::Duration;

use parcel_fetch::DEFAULT_MAX_FETCH_SIZE;
use parcel_volume::DEFAULT_VOLUME_SIZE;
use serde::{Deserialize, Serialize};

/// Tunables of the request pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum number of pending plus active requests.
    pub queue_capacity: usize,
    /// Requests processed concurrently.
    pub workers: usize,
    /// Bytes per chunk volume.
    pub volume_size: usize,
    /// Fetch size cap for non-privileged identities.
    pub max_fetch_size: u64,
    pub fetch_timeout_secs: u64,
    /// Pause before the single upload retry.
    pub retry_backoff_secs: u64,
    /// Parent of per-request scratch directories. System temp dir if unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 50,
            workers: 10,
            volume_size: DEFAULT_VOLUME_SIZE,
            max_fetch_size: DEFAULT_MAX_FETCH_SIZE,
            fetch_timeout_secs: 7200,
            retry_backoff_secs: 15,
            scratch_dir: None,
        }
    }
}

impl PipelineConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.queue_capacity, 50);
        assert_eq!(config.workers, 10);
        assert_eq!(config.volume_size, 15 * 1024 * 1024);
        assert_eq!(config.max_fetch_size, 200 * 1024 * 1024);
        assert_eq!(config.fetch_timeout(), Duration::from_secs(7200));
        assert_eq!(config.retry_backoff(), Duration::from_secs(15));
    }
}
