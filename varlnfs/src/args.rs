use std::path::PathBuf;

use clap::Parser;

use crate::fuse::mount::MountConfig;

#[derive(Parser, Debug)]
#[command(
    name = "varlnfs",
    version,
    about = "Mount a directory of variant symlinks resolved per calling process"
)]
pub struct Args {
    /// Directory holding one config file per virtual link
    #[arg(value_name = "BASE_DIR")]
    pub base_dir: PathBuf,

    /// Empty directory to mount on
    #[arg(value_name = "MOUNTPOINT")]
    pub mountpoint: PathBuf,

    /// Mount options, comma separated; may be repeated
    #[arg(short = 'o', value_name = "OPT[,OPT...]")]
    pub options: Vec<String>,

    /// Stay in the foreground instead of daemonizing
    #[arg(short, long)]
    pub foreground: bool,

    /// Debug diagnostics (implies --foreground)
    #[arg(short, long)]
    pub debug: bool,

    /// Mount with the mount syscall instead of fusermount3
    #[arg(long)]
    pub privileged: bool,

    /// Entry and attribute timeout in seconds
    #[arg(long, value_name = "SECS", default_value_t = 1)]
    pub ttl: u64,
}

impl Args {
    pub fn foreground(&self) -> bool {
        self.foreground || self.debug
    }

    pub fn mount_config(&self) -> MountConfig {
        MountConfig {
            unprivileged: !self.privileged,
            ..MountConfig::default()
        }
        .with_options(&self.options)
    }
}
