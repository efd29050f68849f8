use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::VolumeError;

/// Private temporary directory for one request's volumes.
///
/// The directory and everything in it is removed when the area is closed or
/// dropped, whichever comes first.
pub struct ScratchArea {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl ScratchArea {
    /// Creates a scratch directory under `root`, or under the system temp
    /// directory when `root` is `None`.
    pub fn new(root: Option<&Path>) -> Result<Self, VolumeError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("parcel-");
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        let path = dir.path().to_path_buf();
        debug!(path = %path.display(), "scratch area created");
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    /// Directory backing this area.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the directory, reporting removal errors.
    pub fn close(mut self) -> Result<(), VolumeError> {
        if let Some(dir) = self.dir.take() {
            dir.close()?;
            debug!(path = %self.path.display(), "scratch area removed");
        }
        Ok(())
    }
}

impl Drop for ScratchArea {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take()
            && let Err(e) = dir.close()
        {
            warn!(path = %self.path.display(), error = %e, "failed to remove scratch area");
        }
    }
}
