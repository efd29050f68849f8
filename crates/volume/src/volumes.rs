use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::{VOLUME_EXTENSION, VolumeError};

/// Minimum number of digits in a volume suffix.
const MIN_SUFFIX_WIDTH: usize = 3;

/// Returns the suffix width needed so `count` volumes sort in creation order.
pub fn suffix_width(count: usize) -> usize {
    count.to_string().len().max(MIN_SUFFIX_WIDTH)
}

/// Returns the file name of volume number `seq` (1-based).
pub fn volume_name(base: &str, seq: usize, width: usize) -> String {
    format!("{base}.{VOLUME_EXTENSION}.{seq:0width$}")
}

/// A volume file produced by [`VolumeWriter`].
#[derive(Debug, Clone)]
pub struct WrittenVolume {
    pub path: PathBuf,
    pub size: u64,
    /// SHA-256 hex digest of the volume bytes.
    pub checksum: String,
}

struct OpenVolume {
    path: PathBuf,
    file: BufWriter<File>,
    hasher: Sha256,
    written: usize,
}

/// Byte sink that rolls over to a new volume file every `volume_size` bytes.
pub struct VolumeWriter {
    dir: PathBuf,
    base: String,
    volume_size: usize,
    width: usize,
    current: Option<OpenVolume>,
    finished: Vec<WrittenVolume>,
}

impl VolumeWriter {
    /// Creates a writer placing volumes named after `base` inside `dir`.
    pub fn new(dir: &Path, base: &str, volume_size: usize, width: usize) -> Result<Self, VolumeError> {
        if volume_size == 0 {
            return Err(VolumeError::InvalidVolumeSize);
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            base: base.to_string(),
            volume_size,
            width: width.max(MIN_SUFFIX_WIDTH),
            current: None,
            finished: Vec::new(),
        })
    }

    /// Flushes the last volume and returns every volume in creation order.
    pub fn finish(mut self) -> Result<Vec<WrittenVolume>, VolumeError> {
        self.seal()?;
        Ok(self.finished)
    }

    fn seal(&mut self) -> io::Result<()> {
        if let Some(mut open) = self.current.take() {
            open.file.flush()?;
            self.finished.push(WrittenVolume {
                path: open.path,
                size: open.written as u64,
                checksum: hex::encode(open.hasher.finalize()),
            });
        }
        Ok(())
    }

    fn roll(&mut self) -> io::Result<()> {
        self.seal()?;
        let seq = self.finished.len() + 1;
        let path = self.dir.join(volume_name(&self.base, seq, self.width));
        let file = File::create(&path)?;
        self.current = Some(OpenVolume {
            path,
            file: BufWriter::new(file),
            hasher: Sha256::new(),
            written: 0,
        });
        Ok(())
    }
}

impl Write for VolumeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let full = self
            .current
            .as_ref()
            .is_none_or(|open| open.written >= self.volume_size);
        if full {
            self.roll()?;
        }

        let volume_size = self.volume_size;
        let open = self
            .current
            .as_mut()
            .ok_or_else(|| io::Error::other("no open volume"))?;
        let n = buf.len().min(volume_size - open.written);
        open.file.write_all(&buf[..n])?;
        open.hasher.update(&buf[..n]);
        open.written += n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.current.as_mut() {
            Some(open) => open.file.flush(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn names_are_zero_padded() {
        assert_eq!(volume_name("a.bin", 1, 3), "a.bin.prcl.001");
        assert_eq!(volume_name("a.bin", 42, 3), "a.bin.prcl.042");
        assert_eq!(volume_name("a.bin", 42, 4), "a.bin.prcl.0042");
    }

    #[test]
    fn width_grows_past_999() {
        assert_eq!(suffix_width(1), 3);
        assert_eq!(suffix_width(999), 3);
        assert_eq!(suffix_width(1000), 4);
    }

    #[test]
    fn rolls_over_at_volume_size() {
        let dir = TempDir::new().unwrap();
        let mut writer = VolumeWriter::new(dir.path(), "data", 4, 3).unwrap();
        writer.write_all(b"0123456789").unwrap();
        let volumes = writer.finish().unwrap();

        let sizes: Vec<u64> = volumes.iter().map(|v| v.size).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(std::fs::read(&volumes[0].path).unwrap(), b"0123");
        assert_eq!(std::fs::read(&volumes[2].path).unwrap(), b"89");
        assert!(volumes[1].path.ends_with("data.prcl.002"));
    }

    #[test]
    fn checksum_matches_volume_bytes() {
        let dir = TempDir::new().unwrap();
        let mut writer = VolumeWriter::new(dir.path(), "data", 8, 3).unwrap();
        writer.write_all(b"hello").unwrap();
        let volumes = writer.finish().unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].checksum, crate::checksum_bytes(b"hello"));
    }

    #[test]
    fn zero_volume_size_rejected() {
        let dir = TempDir::new().unwrap();
        let result = VolumeWriter::new(dir.path(), "data", 0, 3);
        assert!(matches!(result, Err(VolumeError::InvalidVolumeSize)));
    }

    #[test]
    fn nothing_written_yields_no_volumes() {
        let dir = TempDir::new().unwrap();
        let writer = VolumeWriter::new(dir.path(), "data", 8, 3).unwrap();
        assert!(writer.finish().unwrap().is_empty());
    }
}
