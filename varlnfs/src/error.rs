use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VarlnError>;

#[derive(Debug, Error)]
pub enum VarlnError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// A value taken from the caller's environment does not fit the reply buffer.
    #[error("resolved value of {len} bytes does not fit a buffer of {capacity} bytes")]
    ValueTooLarge { len: usize, capacity: usize },

    #[error("malformed environment block: {0}")]
    MalformedEnviron(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("operation not supported")]
    Unsupported,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl VarlnError {
    /// Errno reported back to the kernel for this failure.
    pub fn errno(&self) -> libc::c_int {
        match self {
            VarlnError::NotFound(_) | VarlnError::MalformedEnviron(_) => libc::ENOENT,
            VarlnError::PermissionDenied(_) => libc::EACCES,
            VarlnError::OutOfMemory(_) => libc::ENOMEM,
            VarlnError::ValueTooLarge { .. } => libc::ENAMETOOLONG,
            VarlnError::NotADirectory(_) => libc::EBADF,
            VarlnError::Unsupported => libc::ENOSYS,
            VarlnError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }

    /// Classify an open/read failure on `what`, keeping permission problems apart.
    pub(crate) fn from_open(e: io::Error, what: &str) -> Self {
        match e.kind() {
            io::ErrorKind::PermissionDenied => {
                VarlnError::PermissionDenied(format!("{what}: {e}"))
            }
            io::ErrorKind::OutOfMemory => VarlnError::OutOfMemory(format!("{what}: {e}")),
            _ => VarlnError::NotFound(format!("{what}: {e}")),
        }
    }
}

impl From<VarlnError> for rfuse3::Errno {
    fn from(e: VarlnError) -> Self {
        e.errno().into()
    }
}
