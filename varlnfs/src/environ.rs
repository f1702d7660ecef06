//! Environment snapshots of live processes.
//!
//! The kernel exposes a process's environment at `/proc/<pid>/environ` as a
//! sequence of `key=value` entries, each terminated by one NUL byte. A
//! snapshot keeps the raw block and the byte ranges of every entry, so
//! lookups never copy keys or values.

use std::fs::File;
use std::io::{self, Read};
use std::ops::Range;
use std::path::{Path, PathBuf};

use nix::unistd::Pid;
use tracing::{debug, error, warn};

use crate::error::{Result, VarlnError};

/// Initial read buffer; large enough for the environment of most processes.
const INITIAL_CAPACITY: usize = 8192;

/// Source of environment snapshots, keyed by process id.
pub trait EnvironSource {
    fn snapshot(&self, pid: Pid) -> Result<EnvironmentSnapshot>;
}

/// Reads environments from a procfs mount.
#[derive(Debug, Clone)]
pub struct ProcEnviron {
    proc_root: PathBuf,
}

impl Default for ProcEnviron {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcEnviron {
    pub fn new(proc_root: impl AsRef<Path>) -> Self {
        Self {
            proc_root: proc_root.as_ref().to_path_buf(),
        }
    }

    fn environ_path(&self, pid: Pid) -> PathBuf {
        self.proc_root
            .join(pid.as_raw().to_string())
            .join("environ")
    }
}

impl EnvironSource for ProcEnviron {
    fn snapshot(&self, pid: Pid) -> Result<EnvironmentSnapshot> {
        let path = self.environ_path(pid);
        let mut file = File::open(&path).map_err(|e| {
            warn!("Could not open {}: {e}", path.display());
            VarlnError::from_open(e, &path.display().to_string())
        })?;
        let block = read_growing(&mut file).inspect_err(|e| match e {
            VarlnError::OutOfMemory(_) => error!("Reading {} failed: {e}", path.display()),
            _ => warn!("Error while reading {}: {e}", path.display()),
        })?;
        EnvironmentSnapshot::parse(block)
    }
}

/// Read `reader` to end-of-stream into a buffer that starts at
/// [`INITIAL_CAPACITY`] and doubles whenever it fills up.
pub(crate) fn read_growing(reader: &mut impl Read) -> Result<Vec<u8>> {
    let mut buf: Vec<u8> = Vec::new();
    grow(&mut buf, INITIAL_CAPACITY)?;
    let mut filled = 0;
    loop {
        if filled == buf.len() {
            grow(&mut buf, filled)?;
        }
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

fn grow(buf: &mut Vec<u8>, additional: usize) -> Result<()> {
    buf.try_reserve_exact(additional).map_err(|e| {
        VarlnError::OutOfMemory(format!("growing read buffer by {additional} bytes: {e}"))
    })?;
    buf.resize(buf.len() + additional, 0);
    Ok(())
}

/// The environment of one process at one point in time.
///
/// Entries keep their order in the block. Keys and values may be empty but
/// never contain NUL.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentSnapshot {
    block: Vec<u8>,
    entries: Vec<(Range<usize>, Range<usize>)>,
}

impl EnvironmentSnapshot {
    /// Parse a raw environment block.
    ///
    /// Only NUL-terminated entries count; bytes after the last NUL are
    /// ignored. An entry without `=` makes the whole block malformed.
    pub fn parse(block: Vec<u8>) -> Result<Self> {
        let count = block.iter().filter(|&&b| b == 0).count();
        let mut entries = Vec::new();
        entries.try_reserve_exact(count).map_err(|e| {
            VarlnError::OutOfMemory(format!("indexing {count} environment entries: {e}"))
        })?;

        let mut start = 0;
        for end in block
            .iter()
            .enumerate()
            .filter_map(|(i, &b)| (b == 0).then_some(i))
        {
            let entry = &block[start..end];
            let Some(eq) = entry.iter().position(|&b| b == b'=') else {
                return Err(VarlnError::MalformedEnviron(format!(
                    "entry {} has no '=': {:?}",
                    entries.len(),
                    String::from_utf8_lossy(entry)
                )));
            };
            entries.push((start..start + eq, start + eq + 1..end));
            start = end + 1;
        }
        if start < block.len() {
            debug!(
                "Ignoring {} unterminated trailing bytes in environment block",
                block.len() - start
            );
        }

        Ok(Self { block, entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in block order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> + '_ {
        self.entries
            .iter()
            .map(|(k, v)| (&self.block[k.clone()], &self.block[v.clone()]))
    }

    /// Value of the first entry whose key equals `key` byte for byte.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }
}
