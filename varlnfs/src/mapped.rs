use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};
use tracing::{debug, error, warn};

use crate::error::{Result, VarlnError};

/// Read-only mapping of one config file, held for the duration of one call.
///
/// Dropping it unmaps the file and closes the descriptor, on every path.
#[derive(Debug)]
pub struct MappedConfigFile {
    path: PathBuf,
    // `None` for an empty file: there is nothing to map.
    mmap: Option<Mmap>,
    _file: File,
}

impl MappedConfigFile {
    pub fn open(path: &Path) -> Result<Self> {
        debug!("Opening configuration file {}.", path.display());
        let file = File::open(path).map_err(|e| open_failed(path, e))?;
        let meta = file.metadata().map_err(|e| {
            warn!("Could not stat file {}: {e}", path.display());
            VarlnError::NotFound(format!("{}: {e}", path.display()))
        })?;

        if meta.is_dir() {
            warn!(
                "The file {} is a directory. Only flat files may be in the config directory.",
                path.display()
            );
            return Err(VarlnError::NotFound(format!(
                "{}: is a directory",
                path.display()
            )));
        }

        let len = meta.len();
        if len > isize::MAX as u64 {
            error!("The config file {} is too large!", path.display());
            return Err(VarlnError::NotFound(format!(
                "{}: {len} bytes exceeds the mappable size",
                path.display()
            )));
        }

        let mmap = if len == 0 {
            None
        } else {
            // SAFETY: the mapping is private and read-only and lives no longer
            // than this call. Truncating the file concurrently may still fault.
            let mmap = unsafe { MmapOptions::new().len(len as usize).map(&file) }.map_err(|e| {
                warn!("Could not mmap file {}: {e}", path.display());
                VarlnError::NotFound(format!("{}: mmap failed: {e}", path.display()))
            })?;
            Some(mmap)
        };

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            _file: file,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_none()
    }
}

/// Any failure to open a config file, a permission problem included, reads
/// as a missing link.
fn open_failed(path: &Path, e: std::io::Error) -> VarlnError {
    warn!("Could not open configuration file {}: {e}", path.display());
    VarlnError::NotFound(format!("{}: {e}", path.display()))
}
