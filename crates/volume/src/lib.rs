//! Store-only multi-volume container used to cut payloads into fixed-size chunks.
//!
//! A payload is wrapped in a single container (see [`ContainerHeader`] for the
//! layout) and the container byte stream is cut into volumes of a fixed size
//! on scratch storage. Volume names carry a zero-padded sequence suffix, so
//! sorting them lexicographically yields creation order.

mod header;
mod scratch;
mod split;
mod volumes;

pub use header::{ContainerHeader, HEADER_FIXED_LEN, MAGIC, METHOD_STORE, VERSION};
pub use scratch::ScratchArea;
pub use split::{Volume, checksum_bytes, reassemble, sanitize_file_name, split, volume_count};
pub use volumes::{VolumeWriter, WrittenVolume, suffix_width, volume_name};

/// Default volume size: 15 MiB.
pub const DEFAULT_VOLUME_SIZE: usize = 15 * 1024 * 1024;

/// Extension inserted between the entry name and the sequence suffix.
pub const VOLUME_EXTENSION: &str = "prcl";

/// Errors produced by the volume crate.
#[derive(Debug, thiserror::Error)]
pub enum VolumeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("volume size must be greater than zero")]
    InvalidVolumeSize,

    #[error("entry name too long: {0} bytes")]
    NameTooLong(usize),

    #[error("corrupt container: {0}")]
    Corrupt(String),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("no volumes to reassemble")]
    NoVolumes,
}
