//! Variant symlinks: a flat FUSE directory whose entries are symbolic links
//! resolved per calling process.
//!
//! Each regular file in the base directory is a two-line config: a fallback
//! target and, optionally, the name of an environment variable. Reading the
//! link consults the environment of the process that asked and returns that
//! variable's value when it is set, or the fallback otherwise.

pub mod args;
pub mod config;
pub mod environ;
pub mod error;
pub mod fs;
pub mod fuse;
pub mod logging;
pub mod mapped;
pub mod resolver;

pub use config::ConfigEntry;
pub use environ::{EnvironSource, EnvironmentSnapshot, ProcEnviron};
pub use error::{Result, VarlnError};
pub use fs::{EntryAttr, EntryKind, VarlnFs};
pub use mapped::MappedConfigFile;
pub use resolver::{Origin, Resolution, resolve};
