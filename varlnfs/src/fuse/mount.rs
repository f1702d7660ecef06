//! Mount helpers for starting/stopping the variant link filesystem.
//!
//! Notes:
//! - Only supported on Unix-like systems. On Linux the default is an
//!   unprivileged mount via fusermount3.
//! - `-o` tokens from the command line are forwarded to rfuse3's
//!   `MountOptions`; the ones it has typed setters for are mapped onto them,
//!   the rest travel as custom options, unmodified.

use std::path::Path;

use rfuse3::MountOptions;
use rfuse3::raw::{MountHandle, Session};
use tracing::{debug, info};

use crate::environ::EnvironSource;
use crate::fs::VarlnFs;

pub const DEFAULT_FS_NAME: &str = "varlnfs";

/// Mount-time settings gathered from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountConfig {
    pub fs_name: String,
    pub allow_other: bool,
    pub allow_root: bool,
    pub read_only: bool,
    pub default_permissions: bool,
    pub nonempty: bool,
    /// Options without a typed setter, in the order given.
    pub custom: Vec<String>,
    pub unprivileged: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            fs_name: DEFAULT_FS_NAME.to_string(),
            allow_other: false,
            allow_root: false,
            read_only: false,
            default_permissions: false,
            nonempty: false,
            custom: Vec::new(),
            unprivileged: true,
        }
    }
}

impl MountConfig {
    /// Fold `-o` arguments (each possibly comma separated) into the config.
    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in options {
            for token in arg.as_ref().split(',').filter(|t| !t.is_empty()) {
                match token {
                    "allow_other" => self.allow_other = true,
                    "allow_root" => self.allow_root = true,
                    "ro" => self.read_only = true,
                    "rw" => self.read_only = false,
                    "default_permissions" => self.default_permissions = true,
                    "nonempty" => self.nonempty = true,
                    _ => match token.strip_prefix("fsname=") {
                        Some(name) => self.fs_name = name.to_string(),
                        None => self.custom.push(token.to_string()),
                    },
                }
            }
        }
        self
    }

    pub fn mount_options(&self) -> MountOptions {
        let mut mo = MountOptions::default();
        mo.fs_name(self.fs_name.as_str())
            .allow_other(self.allow_other)
            .allow_root(self.allow_root)
            .read_only(self.read_only)
            .default_permissions(self.default_permissions)
            .nonempty(self.nonempty);
        if !self.custom.is_empty() {
            mo.custom_options(self.custom.join(","));
        }
        mo
    }
}

/// Mount `fs` on `mount_point`.
#[cfg(target_os = "linux")]
pub async fn mount_fs<E>(
    fs: VarlnFs<E>,
    mount_point: impl AsRef<Path>,
    config: &MountConfig,
) -> std::io::Result<MountHandle>
where
    E: EnvironSource + Send + Sync + 'static,
{
    let mount_point = mount_point.as_ref();
    debug!("Mount config: {config:?}");
    info!(
        "Mounting {} on {} ({})",
        fs.base().display(),
        mount_point.display(),
        if config.unprivileged {
            "unprivileged"
        } else {
            "privileged"
        }
    );
    let session = Session::new(config.mount_options());
    if config.unprivileged {
        session.mount_with_unprivileged(fs, mount_point).await
    } else {
        session.mount(fs, mount_point).await
    }
}

/// Fallback stub for non-Linux targets.
#[cfg(not(target_os = "linux"))]
pub async fn mount_fs<E>(
    _fs: VarlnFs<E>,
    _mount_point: impl AsRef<Path>,
    _config: &MountConfig,
) -> std::io::Result<MountHandle>
where
    E: EnvironSource + Send + Sync + 'static,
{
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "FUSE mount is only supported on Linux in this build",
    ))
}
