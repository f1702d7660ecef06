//! Path based handlers for the three supported calls.
//!
//! Every virtual path maps 1:1 onto a path under the base directory. The
//! namespace is flat: the root is the only directory, and each regular file
//! in the base directory appears as a symbolic link.

use std::ffi::OsStr;
use std::fs::Metadata;
use std::ops::ControlFlow;
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::config::ConfigEntry;
use crate::environ::{EnvironSource, ProcEnviron};
use crate::error::{Result, VarlnError};
use crate::fuse::nodes::NodeTable;
use crate::mapped::MappedConfigFile;
use crate::resolver::{Origin, Resolution, resolve};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    Symlink,
}

/// Attributes reported for the root or for one virtual entry.
///
/// `dev` and `ino` are synthetic (zero) for entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryAttr {
    pub kind: EntryKind,
    pub perm: u16,
    pub dev: u64,
    pub ino: u64,
    pub size: u64,
    pub blocks: u64,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub blksize: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl EntryAttr {
    fn from_metadata(meta: &Metadata, kind: EntryKind) -> Self {
        let (dev, ino, perm) = match kind {
            EntryKind::Directory => (meta.dev(), meta.ino(), (meta.mode() & 0o7777) as u16),
            // Only the symlink type bit survives.
            EntryKind::Symlink => (0, 0, 0),
        };
        Self {
            kind,
            perm,
            dev,
            ino,
            size: meta.size(),
            blocks: meta.blocks(),
            nlink: meta.nlink() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            rdev: meta.rdev() as u32,
            blksize: meta.blksize() as u32,
            atime: unix_time(meta.atime(), meta.atime_nsec()),
            mtime: unix_time(meta.mtime(), meta.mtime_nsec()),
            ctime: unix_time(meta.ctime(), meta.ctime_nsec()),
        }
    }

    pub fn mode(&self) -> u32 {
        let kind = match self.kind {
            EntryKind::Directory => libc::S_IFDIR,
            EntryKind::Symlink => libc::S_IFLNK,
        };
        kind as u32 | self.perm as u32
    }
}

fn unix_time(secs: i64, nsecs: i64) -> SystemTime {
    let nsecs = nsecs.clamp(0, 999_999_999) as u32;
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs as u64, nsecs)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + Duration::from_nanos(nsecs as u64)
    }
}

pub(crate) fn is_root(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::RootDir | Component::CurDir))
}

/// The variant symlink filesystem.
///
/// The base directory is fixed at construction and never changes, so the
/// path handlers run concurrently without locking. Only the FUSE node table
/// is shared mutable state.
#[derive(Debug, Clone)]
pub struct VarlnFs<E = ProcEnviron> {
    base: PathBuf,
    environ: E,
    ttl: Duration,
    nodes: Arc<NodeTable>,
}

impl VarlnFs<ProcEnviron> {
    pub fn new(base: impl AsRef<Path>) -> Self {
        Self::with_environ(base, ProcEnviron::default())
    }
}

impl<E: EnvironSource> VarlnFs<E> {
    pub fn with_environ(base: impl AsRef<Path>, environ: E) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
            environ,
            ttl: Duration::from_secs(1),
            nodes: Arc::default(),
        }
    }

    /// Entry/attribute timeout handed to the kernel.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub(crate) fn entry_ttl(&self) -> Duration {
        self.ttl
    }

    pub(crate) fn nodes(&self) -> &NodeTable {
        &self.nodes
    }

    /// Real path backing `path`.
    pub fn real_path(&self, path: &Path) -> PathBuf {
        let rel: PathBuf = path
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        self.base.join(rel)
    }

    /// Attribute lookup.
    pub fn getattr_path(&self, path: &Path) -> Result<EntryAttr> {
        debug!("getattr on {}.", path.display());
        if is_root(path) {
            let meta = std::fs::metadata(&self.base)?;
            return Ok(EntryAttr::from_metadata(&meta, EntryKind::Directory));
        }

        let real = self.real_path(path);
        let meta = std::fs::metadata(&real)?;
        if meta.is_dir() {
            warn!(
                "The file {} is a directory. Only flat files may be in the config directory.",
                real.display()
            );
            return Err(VarlnError::NotFound(format!(
                "{}: is a directory",
                real.display()
            )));
        }
        Ok(EntryAttr::from_metadata(&meta, EntryKind::Symlink))
    }

    /// Link-target resolution on behalf of `caller`, written into `buf`.
    pub fn readlink_path(&self, path: &Path, caller: Pid, buf: &mut [u8]) -> Result<Resolution> {
        let real = self.real_path(path);
        let mapped = MappedConfigFile::open(&real)?;
        let entry = ConfigEntry::parse(mapped.bytes(), mapped.path())?;
        let res = resolve(&entry, caller, &self.environ, buf)?;
        if res.origin == Origin::Fallback {
            debug!("Using fallback value for {}.", path.display());
        }
        Ok(res)
    }

    /// Directory listing, root only.
    ///
    /// `filler` receives the name and metadata of every regular entry and returns
    /// `ControlFlow::Break` once it cannot take more, which ends the listing
    /// with [`VarlnError::OutOfMemory`]. Subdirectories and entries that
    /// cannot be stat'ed are logged and skipped.
    pub fn readdir_path<F>(&self, path: &Path, mut filler: F) -> Result<()>
    where
        F: FnMut(&OsStr, &Metadata) -> ControlFlow<()>,
    {
        if !is_root(path) {
            return Err(VarlnError::NotADirectory(path.display().to_string()));
        }

        for dent in std::fs::read_dir(&self.base)? {
            let dent = dent?;
            let sub = dent.path();
            match std::fs::metadata(&sub) {
                Ok(meta) if meta.is_dir() => warn!(
                    "The file {} is a directory. Only flat files may be in the config directory.",
                    sub.display()
                ),
                Ok(meta) => {
                    if filler(&dent.file_name(), &meta).is_break() {
                        return Err(VarlnError::OutOfMemory(format!(
                            "listing buffer for {} is full",
                            self.base.display()
                        )));
                    }
                }
                Err(e) => warn!("Stat for file {} failed: {e}", sub.display()),
            }
        }
        Ok(())
    }
}
