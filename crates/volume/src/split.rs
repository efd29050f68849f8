use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::header::{ContainerHeader, HEADER_FIXED_LEN};
use crate::volumes::{VolumeWriter, suffix_width};
use crate::VolumeError;

/// One volume of a split container.
#[derive(Debug, Clone)]
pub struct Volume {
    /// 1-based position in creation order.
    pub index: usize,
    /// File name of the volume.
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    /// SHA-256 hex digest of the volume bytes.
    pub checksum: String,
}

impl Volume {
    /// Reads the full volume into memory.
    pub fn read(&self) -> Result<Vec<u8>, VolumeError> {
        Ok(std::fs::read(&self.path)?)
    }
}

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Number of volumes a payload of `payload_len` bytes named with `name_len`
/// bytes occupies at `volume_size` bytes per volume.
pub fn volume_count(payload_len: u64, name_len: usize, volume_size: usize) -> usize {
    if volume_size == 0 {
        return 0;
    }
    let total = payload_len + (HEADER_FIXED_LEN + name_len) as u64;
    total.div_ceil(volume_size as u64) as usize
}

/// Makes `name` usable as a single path component.
///
/// Separators and control characters become `_`; an empty or dot-only name
/// becomes `file`.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.') {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Packs `content` as entry `name` into a store-only container and cuts it
/// into `volume_size`-byte volumes inside `dir`.
///
/// Consumes `content` so the source buffer is released as soon as the
/// volumes are on disk. Volumes are returned in creation order, which equals
/// the lexicographic order of their names.
pub fn split(
    name: &str,
    content: Vec<u8>,
    volume_size: usize,
    dir: &Path,
) -> Result<Vec<Volume>, VolumeError> {
    if volume_size == 0 {
        return Err(VolumeError::InvalidVolumeSize);
    }

    let header = ContainerHeader::for_payload(name, &content)?;
    let count = volume_count(header.payload_len, name.len(), volume_size);
    let base = sanitize_file_name(name);

    let mut writer = VolumeWriter::new(dir, &base, volume_size, suffix_width(count))?;
    header.write_to(&mut writer)?;
    writer.write_all(&content)?;
    drop(content);
    let written = writer.finish()?;

    let volumes = written
        .into_iter()
        .enumerate()
        .map(|(i, v)| {
            let name = v
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            debug!(volume = %name, size = v.size, checksum = %v.checksum, "volume written");
            Volume {
                index: i + 1,
                name,
                path: v.path,
                size: v.size,
                checksum: v.checksum,
            }
        })
        .collect::<Vec<_>>();

    debug_assert_eq!(volumes.len(), count);
    Ok(volumes)
}

/// Concatenates `paths` in order and unpacks the container.
///
/// Returns the entry name and payload after validating the header, the
/// payload length and the CRC-32.
pub fn reassemble(paths: &[PathBuf]) -> Result<(String, Vec<u8>), VolumeError> {
    if paths.is_empty() {
        return Err(VolumeError::NoVolumes);
    }

    let mut stream = Vec::new();
    for path in paths {
        std::fs::File::open(path)?.read_to_end(&mut stream)?;
    }

    let mut cursor = Cursor::new(stream);
    let header = ContainerHeader::read_from(&mut cursor)?;
    let start = cursor.position() as usize;
    let stream = cursor.into_inner();
    let payload = &stream[start..];

    if payload.len() as u64 != header.payload_len {
        return Err(VolumeError::Corrupt(format!(
            "expected {} payload bytes, found {}",
            header.payload_len,
            payload.len()
        )));
    }
    if crc32fast::hash(payload) != header.crc32 {
        return Err(VolumeError::ChecksumMismatch);
    }

    Ok((header.name, payload.to_vec()))
}
